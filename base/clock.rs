// This file is part of Moonfire NVR, a security camera network video recorder.
// Copyright (C) 2018 The Moonfire NVR Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! Clock interface and implementations for testability.

use std::mem;
use std::ops;
use std::sync::Mutex;
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration as StdDuration;
use tracing::warn;

use crate::error::Error;
use crate::shutdown::ShutdownError;

/// An opaque monotonic instant, comparable only to other `Instant`s produced by the same
/// [`Clocks`] implementation.
///
/// This exists (rather than reusing `std::time::Instant`) because `std::time::Instant` has no
/// public constructor besides `now()`, which makes it impossible to fake for [`SimulatedClocks`].
#[derive(Clone, Copy, Debug, Default, Eq, Ord, PartialEq, PartialOrd)]
pub struct Instant(StdDuration);

impl ops::Sub for Instant {
    type Output = StdDuration;
    fn sub(self, rhs: Instant) -> StdDuration {
        self.0.saturating_sub(rhs.0)
    }
}

impl ops::Add<StdDuration> for Instant {
    type Output = Instant;
    fn add(self, rhs: StdDuration) -> Instant {
        Instant(self.0 + rhs)
    }
}

/// Abstract interface to the system clocks. This is for testability.
pub trait Clocks: Send + Sync + 'static {
    /// Gets the current wall-clock time.
    fn realtime(&self) -> jiff::Timestamp;

    /// Gets an opaque monotonic instant, for measuring elapsed time.
    ///
    /// On Linux, the real implementation uses `CLOCK_BOOTTIME`, which includes suspended time.
    /// On other systems, it uses `CLOCK_MONOTONIC`.
    fn monotonic(&self) -> Instant;

    /// Causes the current thread to sleep for the specified time.
    fn sleep(&self, how_long: StdDuration);

    /// Calls `rcv.recv_timeout` or substitutes a test implementation.
    fn recv_timeout<T>(
        &self,
        rcv: &mpsc::Receiver<T>,
        timeout: StdDuration,
    ) -> Result<T, mpsc::RecvTimeoutError>;
}

pub fn retry<C, T, E>(
    clocks: &C,
    shutdown_rx: &crate::shutdown::Receiver,
    f: &mut dyn FnMut() -> Result<T, E>,
) -> Result<T, ShutdownError>
where
    C: Clocks,
    E: Into<Error>,
{
    loop {
        let e = match f() {
            Ok(t) => return Ok(t),
            Err(e) => e.into(),
        };
        shutdown_rx.check()?;
        let sleep_time = StdDuration::from_secs(1);
        warn!(exception = %e.chain(), "sleeping for 1 s after error");
        clocks.sleep(sleep_time);
    }
}

#[derive(Copy, Clone)]
pub struct RealClocks {}

impl RealClocks {
    fn monotonic_raw(&self, clock: libc::clockid_t) -> StdDuration {
        unsafe {
            let mut ts = mem::MaybeUninit::uninit();
            assert_eq!(0, libc::clock_gettime(clock, ts.as_mut_ptr()));
            let ts = ts.assume_init();
            StdDuration::new(ts.tv_sec as u64, ts.tv_nsec as u32)
        }
    }
}

impl Clocks for RealClocks {
    fn realtime(&self) -> jiff::Timestamp {
        jiff::Timestamp::now()
    }

    #[cfg(target_os = "linux")]
    fn monotonic(&self) -> Instant {
        Instant(self.monotonic_raw(libc::CLOCK_BOOTTIME))
    }

    #[cfg(not(target_os = "linux"))]
    fn monotonic(&self) -> Instant {
        Instant(self.monotonic_raw(libc::CLOCK_MONOTONIC))
    }

    fn sleep(&self, how_long: StdDuration) {
        thread::sleep(how_long);
    }

    fn recv_timeout<T>(
        &self,
        rcv: &mpsc::Receiver<T>,
        timeout: StdDuration,
    ) -> Result<T, mpsc::RecvTimeoutError> {
        rcv.recv_timeout(timeout)
    }
}

/// Logs a warning if the `TimerGuard` lives "too long", using the label created by a supplied
/// function.
pub struct TimerGuard<'a, C: Clocks + ?Sized, S: AsRef<str>, F: FnOnce() -> S + 'a> {
    clocks: &'a C,
    label_f: Option<F>,
    start: Instant,
}

impl<'a, C: Clocks + ?Sized, S: AsRef<str>, F: FnOnce() -> S + 'a> TimerGuard<'a, C, S, F> {
    pub fn new(clocks: &'a C, label_f: F) -> Self {
        TimerGuard {
            clocks,
            label_f: Some(label_f),
            start: clocks.monotonic(),
        }
    }
}

impl<'a, C, S, F> Drop for TimerGuard<'a, C, S, F>
where
    C: Clocks + ?Sized,
    S: AsRef<str>,
    F: FnOnce() -> S + 'a,
{
    fn drop(&mut self) {
        let elapsed = self.clocks.monotonic() - self.start;
        if elapsed >= StdDuration::from_secs(1) {
            let label_f = self.label_f.take().unwrap();
            warn!("{} took {:?}!", label_f().as_ref(), elapsed);
        }
    }
}

/// Simulated clock for testing.
#[derive(Clone)]
pub struct SimulatedClocks(Arc<SimulatedClocksInner>);

struct SimulatedClocksInner {
    boot: jiff::Timestamp,
    uptime: Mutex<StdDuration>,
}

impl SimulatedClocks {
    pub fn new(boot: jiff::Timestamp) -> Self {
        SimulatedClocks(Arc::new(SimulatedClocksInner {
            boot,
            uptime: Mutex::new(StdDuration::ZERO),
        }))
    }

    fn ts_plus(ts: jiff::Timestamp, d: StdDuration) -> jiff::Timestamp {
        let total_nanos = ts.as_nanosecond() + i128::try_from(d.as_nanos()).unwrap();
        let secs = i64::try_from(total_nanos.div_euclid(1_000_000_000)).unwrap();
        let nanos = i32::try_from(total_nanos.rem_euclid(1_000_000_000)).unwrap();
        jiff::Timestamp::new(secs, nanos).expect("simulated timestamp in range")
    }
}

impl Clocks for SimulatedClocks {
    fn realtime(&self) -> jiff::Timestamp {
        let uptime = *self.0.uptime.lock().unwrap();
        Self::ts_plus(self.0.boot, uptime)
    }

    fn monotonic(&self) -> Instant {
        Instant(*self.0.uptime.lock().unwrap())
    }

    /// Advances the clock by the specified amount without actually sleeping.
    fn sleep(&self, how_long: StdDuration) {
        let mut l = self.0.uptime.lock().unwrap();
        *l += how_long;
    }

    /// Advances the clock by the specified amount if data is not immediately available.
    fn recv_timeout<T>(
        &self,
        rcv: &mpsc::Receiver<T>,
        timeout: StdDuration,
    ) -> Result<T, mpsc::RecvTimeoutError> {
        let r = rcv.recv_timeout(StdDuration::new(0, 0));
        if r.is_err() {
            self.sleep(timeout);
        }
        r
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simulated_clock_advances() {
        let clocks = SimulatedClocks::new(jiff::Timestamp::new(1_000_000, 0).unwrap());
        let t0 = clocks.monotonic();
        clocks.sleep(StdDuration::from_secs(5));
        let t1 = clocks.monotonic();
        assert_eq!(t1 - t0, StdDuration::from_secs(5));
        assert_eq!(clocks.realtime().as_second(), 1_000_005);
    }
}
