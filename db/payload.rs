// This file is part of Moonfire NVR, a security camera network video recorder.
// Copyright (C) 2020 The Moonfire NVR Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! Reference-counted ownership of raw serialized message payloads.
//!
//! `Payload` wraps a [`bytes::Bytes`], which already gives us the atomic
//! refcounted-slice semantics the data model calls for: cloning bumps a
//! refcount and the backing allocation is freed on the last drop. What this
//! module adds on top is pool *identity*, so `get_payload` can tell whether a
//! payload it's about to alias was allocated by this same pool or needs to be
//! copied into a fresh allocation.

use base::{bail_t, Error};
use std::sync::Arc;

/// A pool of payload buffers.
///
/// Cloning a `PayloadPool` is cheap and yields a handle to the same pool
/// (compared by pointer identity in [`PayloadPool::get_payload_from`] and
/// [`PayloadPool::release_payload`]).
#[derive(Clone)]
pub struct PayloadPool(Arc<()>);

impl Default for PayloadPool {
    fn default() -> Self {
        Self::new()
    }
}

impl PayloadPool {
    pub fn new() -> Self {
        PayloadPool(Arc::new(()))
    }

    fn is(&self, other: &PayloadPool) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Allocates a zeroed buffer of `size` bytes with refcount 1.
    pub fn get_payload(&self, size: usize) -> Result<Payload, Error> {
        if size == 0 {
            bail_t!(FailedPrecondition, "payload size must be > 0");
        }
        Ok(Payload {
            pool: self.clone(),
            bytes: vec![0u8; size].into(),
        })
    }

    /// Allocates a buffer of `data.len()` bytes with refcount 1, containing
    /// a copy of `data`.
    pub fn get_payload_with(&self, data: &[u8]) -> Payload {
        Payload {
            pool: self.clone(),
            bytes: bytes::Bytes::copy_from_slice(data),
        }
    }

    /// Produces a `Payload` owned by this pool containing `src`'s bytes.
    ///
    /// If `src` is already owned by this pool, the returned payload aliases
    /// the same allocation (a refcount bump, no copy). Otherwise the bytes
    /// are copied into a freshly allocated buffer owned by this pool.
    pub fn get_payload_from(&self, src: &Payload) -> Payload {
        if self.is(&src.pool) {
            Payload {
                pool: self.clone(),
                bytes: src.bytes.clone(),
            }
        } else {
            Payload {
                pool: self.clone(),
                bytes: bytes::Bytes::copy_from_slice(&src.bytes),
            }
        }
    }

    /// Releases `p`. This is a programming error if `p` was not allocated by
    /// this pool.
    pub fn release_payload(&self, p: Payload) -> Result<(), Error> {
        if !self.is(&p.pool) {
            bail_t!(
                Internal,
                "releasing payload not owned by this pool"
            );
        }
        drop(p);
        Ok(())
    }
}

/// An immutable, reference-counted sequence of bytes: the serialized body of
/// one message, not including transport headers.
#[derive(Clone)]
pub struct Payload {
    pool: PayloadPool,
    bytes: bytes::Bytes,
}

impl Payload {
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn owner(&self) -> &PayloadPool {
        &self.pool
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_payload_rejects_zero_length() {
        let pool = PayloadPool::new();
        pool.get_payload(0).unwrap_err();
    }

    #[test]
    fn same_pool_aliases_without_copy() {
        let pool = PayloadPool::new();
        let p1 = pool.get_payload(4).unwrap();
        let p2 = pool.get_payload_from(&p1);
        assert_eq!(p1.as_bytes(), p2.as_bytes());
        // bytes::Bytes clones share the same backing allocation.
        assert_eq!(p1.bytes.as_ptr(), p2.bytes.as_ptr());
    }

    #[test]
    fn other_pool_copies() {
        let pool_a = PayloadPool::new();
        let pool_b = PayloadPool::new();
        let p1 = pool_a.get_payload(4).unwrap();
        let p2 = pool_b.get_payload_from(&p1);
        assert_eq!(p1.as_bytes(), p2.as_bytes());
        assert_ne!(p1.bytes.as_ptr(), p2.bytes.as_ptr());
    }

    #[test]
    fn release_rejects_foreign_payload() {
        let pool_a = PayloadPool::new();
        let pool_b = PayloadPool::new();
        let p = pool_a.get_payload(4).unwrap();
        pool_b.release_payload(p).unwrap_err();
    }
}
