// This file is part of Moonfire NVR, a security camera network video recorder.
// Copyright (C) 2020 The Moonfire NVR Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! The chunked binary-log writer: a self-describing container of
//! length-prefixed records, modeled after the `mcap` format (hence the
//! module name) but with a simplified encoding of our own, since this
//! recording engine doesn't link against the `mcap` crate.
//!
//! Layout, per spec.md §6:
//! 1. a fixed `Header` record identifying the format and profile;
//! 2. interleaved `Schema`, `Channel`, and `Message` records;
//! 3. a trailing `Attachment` named `dynamic_types`;
//! 4. a trailing `Metadata` block;
//! 5. a `Footer` record summarizing the file.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::sync::Arc;

use base::clock::Clocks;
use base::{format_err_t, Error};
use byteorder::{LittleEndian, WriteBytesExt};

use crate::model::{Channel, Schema};
use crate::size::{FullFile, RecordKind, SizeTracker};
use crate::tracker::FileTracker;

use super::{FormatWriter, Record, VersionMetadata};

const MAGIC: &[u8; 4] = b"BGRC";
const FORMAT_VERSION: u8 = 1;

const OP_HEADER: u8 = 1;
const OP_SCHEMA: u8 = 2;
const OP_CHANNEL: u8 = 3;
const OP_MESSAGE: u8 = 4;
const OP_ATTACHMENT: u8 = 5;
const OP_METADATA: u8 = 6;
const OP_FOOTER: u8 = 7;

/// Rough size of everything written at file-open time plus the footer, used
/// as a conservative placeholder reservation before the real attachment and
/// metadata sizes are known.
const FIXED_OVERHEAD: u64 = 64;
const METADATA_ESTIMATE: u64 = 128;

fn write_str(buf: &mut Vec<u8>, s: &str) {
    buf.write_u32::<LittleEndian>(s.len() as u32).unwrap();
    buf.extend_from_slice(s.as_bytes());
}

fn write_bytes(buf: &mut Vec<u8>, b: &[u8]) {
    buf.write_u32::<LittleEndian>(b.len() as u32).unwrap();
    buf.extend_from_slice(b);
}

fn encode_schema(s: &Schema) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.write_u32::<LittleEndian>(s.id).unwrap();
    write_str(&mut buf, &s.name);
    write_str(&mut buf, &s.encoding_tag);
    write_str(&mut buf, &s.text);
    buf
}

fn encode_channel(c: &Channel) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.write_u32::<LittleEndian>(c.id).unwrap();
    write_str(&mut buf, &c.topic_name);
    write_str(&mut buf, &c.message_encoding);
    buf.write_u32::<LittleEndian>(c.schema_id.unwrap_or(u32::MAX)).unwrap();
    buf.write_u32::<LittleEndian>(c.metadata_map.len() as u32).unwrap();
    for (k, v) in &c.metadata_map {
        write_str(&mut buf, k);
        write_str(&mut buf, v);
    }
    buf
}

fn encode_message(entry: &crate::model::SampleBufferEntry) -> Vec<u8> {
    let m = &entry.message;
    let mut buf = Vec::new();
    buf.write_u32::<LittleEndian>(entry.channel_id).unwrap();
    buf.write_u64::<LittleEndian>(m.source_identity.sequence_number).unwrap();
    buf.write_i64::<LittleEndian>(m.log_time.as_second()).unwrap();
    buf.write_u32::<LittleEndian>(m.log_time.subsec_nanosecond() as u32).unwrap();
    buf.write_i64::<LittleEndian>(m.publish_time.as_second()).unwrap();
    buf.write_u32::<LittleEndian>(m.publish_time.subsec_nanosecond() as u32).unwrap();
    write_bytes(&mut buf, m.payload.as_bytes());
    buf
}

fn opcode_for(kind: RecordKind) -> u8 {
    match kind {
        RecordKind::Schema => OP_SCHEMA,
        RecordKind::Channel => OP_CHANNEL,
        RecordKind::Message => OP_MESSAGE,
        RecordKind::Attachment => OP_ATTACHMENT,
        RecordKind::Metadata => OP_METADATA,
        RecordKind::FixedOverhead => OP_HEADER,
    }
}

/// The chunked binary-log format writer. See the module doc for layout.
pub struct McapWriter {
    tracker: FileTracker,
    clocks: Arc<dyn Clocks>,
    profile: String,
    file: Option<BufWriter<File>>,
    size: SizeTracker,
    schemas: Vec<Schema>,
    channels: Vec<Channel>,
    schemas_bytes: u64,
    channels_bytes: u64,
    attachment: bytes::Bytes,
    message_count: u32,
    on_disk_full: Option<Box<dyn FnMut() + Send>>,
}

impl McapWriter {
    pub fn new(tracker: FileTracker, clocks: Arc<dyn Clocks>, profile: String) -> Self {
        McapWriter {
            tracker,
            clocks,
            profile,
            file: None,
            size: SizeTracker::new(0),
            schemas: Vec::new(),
            channels: Vec::new(),
            schemas_bytes: 0,
            channels_bytes: 0,
            attachment: bytes::Bytes::new(),
            message_count: 0,
            on_disk_full: None,
        }
    }

    fn append_raw(&mut self, opcode: u8, payload: &[u8]) -> Result<(), Error> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| format_err_t!(FailedPrecondition, "writer is not enabled"))?;
        file.write_u8(opcode)
            .and_then(|_| file.write_u32::<LittleEndian>(payload.len() as u32))
            .and_then(|_| file.write_all(payload))
            .map_err(|e| format_err_t!(Unavailable, "writing mcap record: {}", e))
    }

    fn write_header(&mut self) -> Result<(), Error> {
        let mut buf = Vec::new();
        buf.extend_from_slice(MAGIC);
        buf.push(FORMAT_VERSION);
        write_str(&mut buf, &self.profile);
        self.append_raw(OP_HEADER, &buf)
    }

    fn open_file_at(&mut self, path: std::path::PathBuf) -> Result<(), Error> {
        let f = File::create(&path)
            .map_err(|e| format_err_t!(Unavailable, "creating {}: {}", path.display(), e))?;
        self.file = Some(BufWriter::new(f));
        self.size = SizeTracker::new(self.tracker.max_file_size());
        let _ = self.size.reserve(RecordKind::FixedOverhead, FIXED_OVERHEAD);
        let _ = self
            .size
            .reserve(RecordKind::Attachment, self.attachment.len() as u64);
        let _ = self.size.reserve(RecordKind::Metadata, METADATA_ESTIMATE);
        self.write_header()?;

        let schemas = self.schemas.clone();
        let channels = self.channels.clone();
        self.schemas_bytes = 0;
        self.channels_bytes = 0;
        for s in &schemas {
            let encoded = encode_schema(s);
            self.schemas_bytes += encoded.len() as u64;
            let _ = self.size.reserve(RecordKind::Schema, encoded.len() as u64);
            self.append_raw(OP_SCHEMA, &encoded)?;
        }
        for c in &channels {
            let encoded = encode_channel(c);
            self.channels_bytes += encoded.len() as u64;
            let _ = self.size.reserve(RecordKind::Channel, encoded.len() as u64);
            self.append_raw(OP_CHANNEL, &encoded)?;
        }
        Ok(())
    }

    fn finish_current_file(&mut self) -> Result<(), Error> {
        if self.file.is_none() {
            return Ok(());
        }
        let mut attachment_payload = Vec::new();
        write_str(&mut attachment_payload, "dynamic_types");
        write_bytes(&mut attachment_payload, &self.attachment);
        self.append_raw(OP_ATTACHMENT, &attachment_payload)?;

        let version = VersionMetadata::current();
        let mut metadata_payload = Vec::new();
        write_str(&mut metadata_payload, &version.release);
        write_str(&mut metadata_payload, &version.commit);
        write_str(&mut metadata_payload, &self.profile);
        self.append_raw(OP_METADATA, &metadata_payload)?;

        let mut footer_payload = Vec::new();
        footer_payload
            .write_u32::<LittleEndian>(self.schemas.len() as u32)
            .unwrap();
        footer_payload
            .write_u32::<LittleEndian>(self.channels.len() as u32)
            .unwrap();
        footer_payload
            .write_u32::<LittleEndian>(self.message_count)
            .unwrap();
        self.append_raw(OP_FOOTER, &footer_payload)?;

        if let Some(f) = &mut self.file {
            f.flush()
                .map_err(|e| format_err_t!(Unavailable, "flushing mcap file: {}", e))?;
            f.get_ref()
                .sync_all()
                .map_err(|e| format_err_t!(Unavailable, "fsyncing mcap file: {}", e))?;
        }
        let written = self
            .file
            .as_ref()
            .map(|f| f.get_ref().metadata().map(|m| m.len()).unwrap_or(0))
            .unwrap_or(0);
        self.tracker.set_current_size(written);
        self.tracker.close_current_file();
        self.file = None;
        Ok(())
    }

    /// Closes the current file and opens a new one sized to hold the
    /// preamble, the replayed schemas/channels, the attachment, and at least
    /// `extra_for_next_record` additional bytes.
    fn rotate(&mut self, extra_for_next_record: u64) -> Result<(), Error> {
        self.finish_current_file()?;
        let min_for_new = FIXED_OVERHEAD
            + self.schemas_bytes
            + self.channels_bytes
            + self.attachment.len() as u64
            + METADATA_ESTIMATE
            + extra_for_next_record;
        match self.tracker.open_new_file(min_for_new, self.clocks.realtime()) {
            Ok(path) => self.open_file_at(path),
            Err(e) => {
                if e.kind() == base::ErrorKind::ResourceExhausted {
                    if let Some(cb) = &mut self.on_disk_full {
                        cb();
                    }
                }
                Err(e)
            }
        }
    }

    fn reserve_or_rotate(&mut self, kind: RecordKind, encoded: &[u8]) -> Result<(), Error> {
        match self.size.reserve(kind, encoded.len() as u64) {
            Ok(()) => self.append_raw(opcode_for(kind), encoded),
            Err(FullFile { .. }) => {
                self.rotate(encoded.len() as u64)?;
                self.size
                    .reserve(kind, encoded.len() as u64)
                    .map_err(|e| {
                        format_err_t!(
                            Internal,
                            "record did not fit even after rotation: needs {} more bytes",
                            e.bytes_needed
                        )
                    })?;
                self.append_raw(opcode_for(kind), encoded)
            }
        }
    }
}

impl FormatWriter for McapWriter {
    fn enable(&mut self) -> Result<(), Error> {
        // A fresh `enable` always starts a new channel/schema ID space (it
        // pairs with `Handler::start`/`pause` resetting their own channel
        // registry from `Stopped`), unlike `rotate`, which must keep
        // replaying the session's existing schemas/channels into each new
        // file so messages written after the rotation still resolve.
        self.schemas.clear();
        self.channels.clear();
        self.schemas_bytes = 0;
        self.channels_bytes = 0;
        let min = FIXED_OVERHEAD + self.attachment.len() as u64 + METADATA_ESTIMATE;
        let path = self.tracker.open_new_file(min, self.clocks.realtime())?;
        self.message_count = 0;
        self.open_file_at(path)
    }

    fn disable(&mut self) -> Result<(), Error> {
        self.finish_current_file()
    }

    fn write(&mut self, record: Record) -> Result<(), Error> {
        match record {
            Record::Topic(_) => Ok(()),
            Record::Schema(s) => {
                let encoded = encode_schema(&s);
                self.schemas_bytes += encoded.len() as u64;
                self.reserve_or_rotate(RecordKind::Schema, &encoded)?;
                self.schemas.push(s);
                Ok(())
            }
            Record::Channel(c) => {
                let encoded = encode_channel(&c);
                self.channels_bytes += encoded.len() as u64;
                self.reserve_or_rotate(RecordKind::Channel, &encoded)?;
                self.channels.push(c);
                Ok(())
            }
            Record::Message(entry) => {
                let encoded = encode_message(&entry);
                self.reserve_or_rotate(RecordKind::Message, &encoded)?;
                self.message_count += 1;
                Ok(())
            }
        }
    }

    fn update_type_attachment(&mut self, payload: bytes::Bytes) -> Result<(), Error> {
        let old_len = self.attachment.len() as u64;
        let new_len = payload.len() as u64;
        self.attachment = payload;
        if self.file.is_none() {
            return Ok(());
        }
        if new_len > old_len {
            let diff = new_len - old_len;
            if self.size.reserve(RecordKind::Attachment, diff).is_err() {
                self.rotate(0)?;
            }
        } else {
            self.size.release(RecordKind::Attachment, old_len - new_len);
        }
        Ok(())
    }

    fn on_disk_full_callback(&mut self, cb: Box<dyn FnMut() + Send>) {
        self.on_disk_full = Some(cb);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SampleBufferEntry;
    use crate::payload::PayloadPool;
    use crate::tracker::TrackerConfig;
    use base::clock::RealClocks;
    use std::collections::BTreeMap;

    fn tracker(dir: &std::path::Path, max_file_size: u64, max_total_size: u64) -> FileTracker {
        FileTracker::new(TrackerConfig {
            dir: dir.to_path_buf(),
            base_name: "session".to_string(),
            extension: ".bgrc".to_string(),
            prepend_timestamp: false,
            timestamp_format: String::new(),
            local_timezone: false,
            max_total_size,
            max_file_size,
            size_tolerance: 0,
            rotation_enabled: true,
        })
    }

    fn sample_entry(channel_id: u32, seq: u64) -> SampleBufferEntry {
        let pool = PayloadPool::new();
        let payload = pool.get_payload(16).unwrap();
        SampleBufferEntry {
            message: crate::model::Message {
                topic: crate::model::Topic {
                    topic_name: "t".to_string(),
                    type_name: "T".to_string(),
                    qos: Default::default(),
                },
                payload,
                publish_time: jiff::Timestamp::now(),
                log_time: jiff::Timestamp::now(),
                source_identity: crate::model::SourceIdentity {
                    writer_guid: uuid::Uuid::nil(),
                    sequence_number: seq,
                },
                instance_handle: None,
            },
            channel_id,
            key_json: None,
        }
    }

    #[test]
    fn writes_schema_channel_and_messages() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = McapWriter::new(tracker(dir.path(), 0, 0), Arc::new(RealClocks {}), "generic".to_string());
        w.enable().unwrap();
        w.write(Record::Schema(Schema {
            id: 0,
            name: "T".to_string(),
            encoding_tag: "ros2msg".to_string(),
            text: "int32 i".to_string(),
        }))
        .unwrap();
        w.write(Record::Channel(Channel {
            id: 0,
            topic_name: "t".to_string(),
            message_encoding: "cdr".to_string(),
            schema_id: Some(0),
            metadata_map: BTreeMap::new(),
        }))
        .unwrap();
        for i in 0..5 {
            w.write(Record::Message(sample_entry(0, i))).unwrap();
        }
        w.update_type_attachment(bytes::Bytes::from_static(b"types")).unwrap();
        w.disable().unwrap();
        let files: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(files.len(), 1);
    }

    #[test]
    fn rotates_when_file_size_exceeded() {
        let dir = tempfile::tempdir().unwrap();
        // Small enough that a handful of messages force rotation.
        let mut w = McapWriter::new(tracker(dir.path(), 200, 0), Arc::new(RealClocks {}), "generic".to_string());
        w.enable().unwrap();
        w.write(Record::Schema(Schema {
            id: 0,
            name: "T".to_string(),
            encoding_tag: "ros2msg".to_string(),
            text: "int32 i".to_string(),
        }))
        .unwrap();
        w.write(Record::Channel(Channel {
            id: 0,
            topic_name: "t".to_string(),
            message_encoding: "cdr".to_string(),
            schema_id: Some(0),
            metadata_map: BTreeMap::new(),
        }))
        .unwrap();
        for i in 0..30 {
            w.write(Record::Message(sample_entry(0, i))).unwrap();
        }
        w.disable().unwrap();
        let files: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert!(files.len() > 1, "expected rotation to produce multiple files");
    }

    #[test]
    fn restart_does_not_replay_stale_channels_into_new_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = McapWriter::new(tracker(dir.path(), 0, 0), Arc::new(RealClocks {}), "generic".to_string());
        w.enable().unwrap();
        w.write(Record::Schema(Schema {
            id: 0,
            name: "T".to_string(),
            encoding_tag: "ros2msg".to_string(),
            text: "int32 i".to_string(),
        }))
        .unwrap();
        w.write(Record::Channel(Channel {
            id: 0,
            topic_name: "old".to_string(),
            message_encoding: "cdr".to_string(),
            schema_id: Some(0),
            metadata_map: BTreeMap::new(),
        }))
        .unwrap();
        w.disable().unwrap();

        // Simulates a Handler restart from Stopped: its own channel registry
        // resets to empty, so the first channel it re-registers gets id 0
        // again.
        w.enable().unwrap();
        assert!(w.schemas.is_empty(), "schemas must not survive a restart");
        assert!(w.channels.is_empty(), "channels must not survive a restart");
        w.write(Record::Channel(Channel {
            id: 0,
            topic_name: "new".to_string(),
            message_encoding: "cdr".to_string(),
            schema_id: None,
            metadata_map: BTreeMap::new(),
        }))
        .unwrap();
        assert_eq!(w.channels.len(), 1, "the old channel must not be replayed alongside the new one");
        assert_eq!(w.channels[0].topic_name, "new");
        w.disable().unwrap();
    }

    #[test]
    fn rotation_replays_live_schemas_and_channels() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = McapWriter::new(tracker(dir.path(), 200, 0), Arc::new(RealClocks {}), "generic".to_string());
        w.enable().unwrap();
        w.write(Record::Schema(Schema {
            id: 0,
            name: "T".to_string(),
            encoding_tag: "ros2msg".to_string(),
            text: "int32 i".to_string(),
        }))
        .unwrap();
        w.write(Record::Channel(Channel {
            id: 0,
            topic_name: "t".to_string(),
            message_encoding: "cdr".to_string(),
            schema_id: Some(0),
            metadata_map: BTreeMap::new(),
        }))
        .unwrap();
        for i in 0..30 {
            w.write(Record::Message(sample_entry(0, i))).unwrap();
        }
        // Mid-session rotation (still enabled) must keep the channel alive
        // in the writer's own registry so later messages still resolve.
        assert_eq!(w.channels.len(), 1);
        assert_eq!(w.schemas.len(), 1);
        w.disable().unwrap();
    }
}
