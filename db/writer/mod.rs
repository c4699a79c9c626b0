// This file is part of Moonfire NVR, a security camera network video recorder.
// Copyright (C) 2020 The Moonfire NVR Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! The format writer: opens, writes records into, and closes a single output
//! file. Two implementations ([`mcap::McapWriter`] and
//! [`relational::RelationalWriter`]) share this module's [`FormatWriter`]
//! trait but otherwise do not share state, per spec.md §4.D.

pub mod mcap;
pub mod relational;

use base::Error;

use crate::model::{Channel, Schema, SampleBufferEntry, Topic};

/// One record handed to a [`FormatWriter`]. `Topic` exists for the relational
/// writer's `Topics` table; the binary-log writer treats it as a no-op since
/// a channel's `metadata_map` already carries the topic's QoS.
pub enum Record {
    Topic(Topic),
    Schema(Schema),
    Channel(Channel),
    Message(SampleBufferEntry),
}

/// Configurable data format for the relational writer's `Messages.data_blob`
/// / `data_json` columns.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DataFormat {
    CdrBlob,
    JsonText,
    Both,
}

/// Version metadata written into both on-disk formats' metadata blocks, per
/// SPEC_FULL.md §B.
#[derive(Clone, Debug)]
pub struct VersionMetadata {
    pub release: String,
    pub commit: String,
}

impl VersionMetadata {
    pub fn current() -> Self {
        VersionMetadata {
            release: option_env!("VERSION").unwrap_or(env!("CARGO_PKG_VERSION")).to_string(),
            commit: option_env!("BAGREC_GIT_COMMIT").unwrap_or("unknown").to_string(),
        }
    }
}

/// Shared contract between the two output formats. Implementations are
/// single-threaded internally; concurrency is serialized by the caller (the
/// recording handler).
pub trait FormatWriter: Send {
    /// Opens a new file via the file tracker and prepares to accept records.
    fn enable(&mut self) -> Result<(), Error>;

    /// Writes the attachment, metadata, channels, and schemas, then closes
    /// the file.
    fn disable(&mut self) -> Result<(), Error>;

    /// Writes one record. `FullFile` conditions are recovered locally by
    /// rotating to a new file and retrying; only a hard failure (disk full,
    /// I/O error) is returned to the caller.
    fn write(&mut self, record: Record) -> Result<(), Error>;

    /// Atomically replaces the pending type-attachment bytes. If a file is
    /// open, re-reserves the difference in size, rotating if the new
    /// reservation doesn't fit.
    fn update_type_attachment(&mut self, payload: bytes::Bytes) -> Result<(), Error>;

    /// Registers a callback invoked when the writer can no longer write
    /// because the disk is full. The writer disables itself before invoking
    /// this; the caller should treat it as their `DiskFull` notification.
    fn on_disk_full_callback(&mut self, cb: Box<dyn FnMut() + Send>);
}
