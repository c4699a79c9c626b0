// This file is part of Moonfire NVR, a security camera network video recorder.
// Copyright (C) 2020 The Moonfire NVR Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! A purely arithmetic predictor of the binary-log writer's per-file size
//! budget. Performs no I/O; `reserve`/`release` just move a running count.

/// The kind of record being reserved, for diagnostics only (the budget itself
/// doesn't distinguish kinds).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RecordKind {
    Schema,
    Channel,
    Message,
    Attachment,
    Metadata,
    FixedOverhead,
}

/// Returned by [`SizeTracker::reserve`] when the reservation would exceed the
/// per-file budget. Not a `base::ErrorKind`: this is recovered locally by the
/// format writer via rotation, never surfaced as an `Error`.
#[derive(Clone, Copy, Debug)]
pub struct FullFile {
    pub bytes_needed: u64,
}

/// Predicts the on-disk contribution of every record written into a single
/// binary-log file, bound by the writer's configured per-file limit.
pub struct SizeTracker {
    limit: u64,
    used: u64,
}

impl SizeTracker {
    /// `limit == 0` means unbounded (every reservation succeeds).
    pub fn new(limit: u64) -> Self {
        SizeTracker { limit, used: 0 }
    }

    pub fn used(&self) -> u64 {
        self.used
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// Reserves `size` bytes for a record of the given `kind`. On success the
    /// running count is updated; on failure it is left unchanged and the
    /// shortfall is reported.
    pub fn reserve(&mut self, _kind: RecordKind, size: u64) -> Result<(), FullFile> {
        if self.limit > 0 {
            let projected = self.used + size;
            if projected > self.limit {
                return Err(FullFile {
                    bytes_needed: projected - self.limit,
                });
            }
        }
        self.used += size;
        Ok(())
    }

    /// Cancels a previous reservation, e.g. a schema re-registered on rotation.
    pub fn release(&mut self, _kind: RecordKind, size: u64) {
        self.used = self.used.saturating_sub(size);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserve_fails_and_reports_shortfall() {
        let mut t = SizeTracker::new(100);
        t.reserve(RecordKind::Message, 60).unwrap();
        let err = t.reserve(RecordKind::Message, 60).unwrap_err();
        assert_eq!(err.bytes_needed, 20);
        // The failed reservation left the running count unchanged.
        assert_eq!(t.used(), 60);
    }

    #[test]
    fn release_undoes_a_reservation() {
        let mut t = SizeTracker::new(100);
        t.reserve(RecordKind::Schema, 50).unwrap();
        t.release(RecordKind::Schema, 50);
        assert_eq!(t.used(), 0);
        t.reserve(RecordKind::Message, 100).unwrap();
    }

    #[test]
    fn zero_limit_is_unbounded() {
        let mut t = SizeTracker::new(0);
        t.reserve(RecordKind::Message, u64::MAX / 2).unwrap();
        t.reserve(RecordKind::Message, u64::MAX / 2).unwrap();
    }
}
