// This file is part of Moonfire NVR, a security camera network video recorder.
// Copyright (C) 2020 The Moonfire NVR Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! The recording handler: the heart of the system. Owns the state machine,
//! the in-memory sample buffer, the pending-sample queue, the schema/channel
//! registry, and drives a [`crate::writer::FormatWriter`].
//!
//! One handler exists per active output format (binary-log, relational, or
//! both) for a session. A single `parking_lot::Mutex` guards every field
//! that ingress, the cleanup timer, and the remote command endpoint can
//! touch concurrently, matching spec.md §5's "single fair mutex" policy.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use base::clock::Clocks;
use base::{FastHashMap, Error};
use parking_lot::Mutex;

use crate::model::{
    Channel, DynamicType, Message, PendingEntry, SampleBufferEntry, Schema, State, Topic,
};
use crate::payload::Payload;
use crate::writer::{FormatWriter, Record};

/// Static configuration for a [`Handler`], set at construction and not
/// mutated afterward.
#[derive(Clone, Debug)]
pub struct HandlerConfig {
    pub initial_state: State,
    pub buffer_size: usize,
    pub event_window: std::time::Duration,
    pub cleanup_period: std::time::Duration,
    pub max_pending_samples: usize,
    pub only_with_schema: bool,
    pub pending_timeout: Option<std::time::Duration>,
    pub record_types: bool,
    pub relational: bool,
}

/// Adapts a dynamic type description into the fields a [`Schema`] needs.
/// Grounded on spec.md §4.E.3: "derive `(name, encoding_tag, text)` from the
/// dynamic type".
pub trait SchemaDerivation: Send + Sync {
    fn derive(&self, dyn_type: &DynamicType) -> (String, String, String);
}

/// Computes the canonical-JSON key for a keyed message's instance, by
/// deserializing its payload and keeping only the key members. Grounded on
/// spec.md §4.E.5: "deserialize the payload using the dynamic type, remove
/// non-key members, re-serialize to a canonical JSON."
pub trait KeyExtraction: Send + Sync {
    fn extract_key(&self, type_name: &str, payload: &Payload) -> String;
}

struct Inner {
    state: State,
    buffer: Vec<SampleBufferEntry>,
    event_buffer: VecDeque<SampleBufferEntry>,
    pending: FastHashMap<String, VecDeque<PendingEntry>>,
    /// type_name -> (schema id, schema text). The text is kept only to
    /// detect a later re-registration with a different body.
    schemas: FastHashMap<String, (u32, String)>,
    next_schema_id: u32,
    channels: FastHashMap<(String, String), u32>,
    next_channel_id: u32,
    type_attachment: Vec<u8>,
    disk_full: bool,
    /// Memoized `instance_handle -> key_json`, cleared on rotation never:
    /// it's scoped to the whole session per spec.md §4.E.5.
    key_cache: BTreeMap<u64, String>,
}

impl Inner {
    fn new(config: &HandlerConfig) -> Self {
        Inner {
            state: config.initial_state,
            buffer: Vec::with_capacity(config.buffer_size),
            event_buffer: VecDeque::new(),
            pending: FastHashMap::default(),
            schemas: FastHashMap::default(),
            next_schema_id: 0,
            channels: FastHashMap::default(),
            next_channel_id: 0,
            type_attachment: Vec::new(),
            disk_full: false,
            key_cache: BTreeMap::new(),
        }
    }
}

/// The recording handler. See the module doc for synchronization policy.
pub struct Handler {
    config: HandlerConfig,
    clocks: Arc<dyn Clocks>,
    schema_derivation: Arc<dyn SchemaDerivation>,
    key_extraction: Arc<dyn KeyExtraction>,
    writer: Mutex<Box<dyn FormatWriter>>,
    inner: Mutex<Inner>,
}

impl Handler {
    pub fn new(
        config: HandlerConfig,
        clocks: Arc<dyn Clocks>,
        schema_derivation: Arc<dyn SchemaDerivation>,
        key_extraction: Arc<dyn KeyExtraction>,
        mut writer: Box<dyn FormatWriter>,
    ) -> Result<Self, Error> {
        if config.initial_state != State::Stopped {
            writer.enable()?;
        }
        let inner = Inner::new(&config);
        Ok(Handler {
            clocks,
            schema_derivation,
            key_extraction,
            writer: Mutex::new(writer),
            inner: Mutex::new(inner),
            config,
        })
    }

    pub fn state(&self) -> State {
        self.inner.lock().state
    }

    /// Accepts one message from the ingress adapter. Always returns — the
    /// message is buffered, queued as pending, or dropped depending on
    /// state, per spec.md §4.E.2.
    pub fn add_data(&self, topic: &Topic, message: Message) -> Result<(), Error> {
        let mut inner = self.inner.lock();
        if inner.disk_full || inner.state == State::Stopped {
            return Ok(());
        }

        let channel_id = match self.resolve_channel(&mut inner, topic) {
            Some(id) => id,
            None => {
                self.enqueue_pending(&mut inner, topic, message);
                return Ok(());
            }
        };

        let entry = self.finish_entry(&mut inner, message, channel_id);
        match inner.state {
            State::Running => self.push_running(&mut inner, entry)?,
            State::Paused => {
                inner.event_buffer.push_back(entry);
                self.evict_event_window(&mut inner);
            }
            State::Stopped => unreachable!("checked above"),
        }
        Ok(())
    }

    /// Registers a dynamic type's schema. Idempotent per type name.
    pub fn add_schema(&self, dyn_type: &DynamicType) -> Result<(), Error> {
        let mut inner = self.inner.lock();
        if let Some((_, existing_text)) = inner.schemas.get(&dyn_type.type_name) {
            let (_, _, text) = self.schema_derivation.derive(dyn_type);
            if existing_text != &text {
                tracing::warn!(
                    type_name = %dyn_type.type_name,
                    "schema re-registered with a different body; keeping the first registration",
                );
            }
            return Ok(());
        }
        let (name, encoding_tag, text) = self.schema_derivation.derive(dyn_type);
        let id = inner.next_schema_id;

        let write_result = self.writer.lock().write(Record::Schema(Schema {
            id,
            name: name.clone(),
            encoding_tag,
            text,
        }));
        if let Err(e) = write_result {
            tracing::warn!(type_name = %name, err = %e.chain(), "schema write failed; type remains pending");
            return Ok(());
        }
        inner.next_schema_id += 1;
        inner.schemas.insert(name.clone(), (id, text));

        if self.config.record_types {
            inner.type_attachment.extend_from_slice(&dyn_type.bytes);
            let attachment = bytes::Bytes::copy_from_slice(&inner.type_attachment);
            if let Err(e) = self.writer.lock().update_type_attachment(attachment) {
                tracing::warn!(err = %e.chain(), "failed to update type attachment");
            }
        }

        self.drain_pending(&mut inner, &name)?;
        Ok(())
    }

    /// Transitions `Stopped|Paused -> Running`. A no-op if already `Running`.
    pub fn start(&self) -> Result<(), Error> {
        let mut inner = self.inner.lock();
        match inner.state {
            State::Running => Ok(()),
            State::Paused => {
                let drained: Vec<_> = inner.event_buffer.drain(..).collect();
                for entry in drained {
                    self.push_running(&mut inner, entry)?;
                }
                inner.state = State::Running;
                Ok(())
            }
            State::Stopped => {
                self.writer.lock().enable()?;
                inner.channels.clear();
                inner.next_channel_id = 0;
                inner.state = State::Running;
                Ok(())
            }
        }
    }

    /// Transitions `Running -> Paused`. A no-op from `Paused`; from
    /// `Stopped` opens a new file and starts paused.
    pub fn pause(&self) -> Result<(), Error> {
        let mut inner = self.inner.lock();
        match inner.state {
            State::Paused => Ok(()),
            State::Running => {
                inner.buffer.clear();
                inner.event_buffer.clear();
                inner.state = State::Paused;
                Ok(())
            }
            State::Stopped => {
                self.writer.lock().enable()?;
                inner.channels.clear();
                inner.next_channel_id = 0;
                inner.event_buffer.clear();
                inner.state = State::Paused;
                Ok(())
            }
        }
    }

    /// Transitions to `Stopped`. `final_stop == true` flushes the buffer,
    /// disables the writer, and writes the type attachment; `final_stop ==
    /// false` preserves the buffer so a later `start`/`pause` can resume the
    /// same file.
    pub fn stop(&self, final_stop: bool) -> Result<(), Error> {
        let mut inner = self.inner.lock();
        if inner.state == State::Stopped {
            return Ok(());
        }
        if inner.state == State::Running {
            let drained: Vec<_> = inner.buffer.drain(..).collect();
            if !drained.is_empty() {
                self.write_messages(&drained)?;
            }
        } else if inner.state == State::Paused {
            if self.config.only_with_schema {
                inner.pending.clear();
            } else {
                self.flush_pending_unknown_schema(&mut inner)?;
            }
        }
        inner.state = State::Stopped;
        if final_stop {
            self.writer.lock().disable()?;
        }
        Ok(())
    }

    /// Flushes the current `event_buffer` to the writer immediately,
    /// regardless of the cleanup timer. A no-op outside `Paused`.
    pub fn trigger_event(&self) -> Result<(), Error> {
        let mut inner = self.inner.lock();
        if inner.state != State::Paused {
            return Ok(());
        }
        let drained: Vec<_> = inner.event_buffer.drain(..).collect();
        drop(inner);
        if !drained.is_empty() {
            self.write_messages(&drained)?;
        }
        Ok(())
    }

    /// Called periodically (every `cleanup_period`) by a background task.
    /// Evicts `event_buffer` entries older than `event_window`. Mutually
    /// exclusive with `trigger_event` via the handler mutex.
    pub fn run_cleanup_tick(&self) {
        let mut inner = self.inner.lock();
        if inner.state == State::Paused {
            self.evict_event_window(&mut inner);
        }
    }

    pub fn cleanup_period(&self) -> std::time::Duration {
        self.config.cleanup_period
    }

    // -- internal helpers --

    fn resolve_channel(&self, inner: &mut Inner, topic: &Topic) -> Option<u32> {
        let key = (topic.topic_name.clone(), topic.type_name.clone());
        if let Some(&id) = inner.channels.get(&key) {
            return Some(id);
        }
        let schema_id = inner.schemas.get(&topic.type_name)?.0;
        let id = inner.next_channel_id;
        let mut metadata_map = BTreeMap::new();
        metadata_map.insert("reliability".to_string(), topic.qos.reliability.clone());
        metadata_map.insert("durability".to_string(), topic.qos.durability.clone());
        metadata_map.insert("ownership".to_string(), topic.qos.ownership.clone());
        metadata_map.insert("keyed".to_string(), topic.qos.keyed.to_string());
        metadata_map.insert("history_depth".to_string(), topic.qos.history_depth.to_string());

        let write_result = self.writer.lock().write(Record::Channel(Channel {
            id,
            topic_name: topic.topic_name.clone(),
            message_encoding: "cdr".to_string(),
            schema_id: Some(schema_id),
            metadata_map,
        }));
        if let Err(e) = write_result {
            tracing::warn!(topic = %topic.topic_name, err = %e.chain(), "channel write failed");
            return None;
        }
        inner.next_channel_id += 1;
        inner.channels.insert(key, id);
        Some(id)
    }

    /// Enforces spec.md:248's boundary behavior: `max_pending_samples == 0`
    /// means messages without a schema are never queued at all, rather than
    /// queued-then-immediately-evicted.
    fn enqueue_pending(&self, inner: &mut Inner, topic: &Topic, message: Message) {
        if self.config.max_pending_samples == 0 {
            return;
        }
        let queue = inner.pending.entry(topic.type_name.clone()).or_default();
        queue.push_back(PendingEntry {
            message,
            type_name: topic.type_name.clone(),
        });
        if queue.len() > self.config.max_pending_samples {
            queue.pop_front();
        }
    }

    fn finish_entry(&self, inner: &mut Inner, mut message: Message, channel_id: u32) -> SampleBufferEntry {
        let key_json = if self.config.relational {
            Some(self.compute_key(inner, &mut message))
        } else {
            None
        };
        SampleBufferEntry {
            message,
            channel_id,
            key_json,
        }
    }

    /// Computes the canonical-JSON key via the injected [`KeyExtraction`],
    /// memoized per `instance_handle` so the deserialization runs at most
    /// once per instance within a session, per spec.md §4.E.5.
    /// `instance_handle` itself is assigned by the ingress/transport layer
    /// (the dynamic-type-aware discovery this crate takes as input); a
    /// message without one is treated as unkeyed and gets an empty key.
    fn compute_key(&self, inner: &mut Inner, message: &mut Message) -> String {
        let Some(handle) = message.instance_handle else {
            return String::new();
        };
        if let Some(cached) = inner.key_cache.get(&handle) {
            return cached.clone();
        }
        let key = self
            .key_extraction
            .extract_key(&message.topic.type_name, &message.payload);
        inner.key_cache.insert(handle, key.clone());
        key
    }

    fn push_running(&self, inner: &mut Inner, entry: SampleBufferEntry) -> Result<(), Error> {
        inner.buffer.push(entry);
        if inner.buffer.len() == self.config.buffer_size {
            let drained: Vec<_> = inner.buffer.drain(..).collect();
            self.write_messages(&drained)?;
        }
        Ok(())
    }

    fn evict_event_window(&self, inner: &mut Inner) {
        let now = self.clocks.realtime();
        let cutoff_nanos = now.as_nanosecond() - self.config.event_window.as_nanos() as i128;
        while let Some(front) = inner.event_buffer.front() {
            if (front.message.log_time.as_nanosecond()) < cutoff_nanos {
                inner.event_buffer.pop_front();
            } else {
                break;
            }
        }
    }

    fn drain_pending(&self, inner: &mut Inner, type_name: &str) -> Result<(), Error> {
        let Some(queue) = inner.pending.remove(type_name) else {
            return Ok(());
        };
        for pending in queue {
            let topic = pending.message.topic.clone();
            if let Some(channel_id) = self.resolve_channel(inner, &topic) {
                let entry = self.finish_entry(inner, pending.message, channel_id);
                match inner.state {
                    State::Running => self.push_running(inner, entry)?,
                    State::Paused => {
                        inner.event_buffer.push_back(entry);
                    }
                    State::Stopped => {}
                }
            }
        }
        Ok(())
    }

    /// `only_with_schema == false` path: flush remaining pending entries
    /// using a placeholder "unknown-schema" channel rather than discarding
    /// them, per spec.md §4.E.2.
    fn flush_pending_unknown_schema(&self, inner: &mut Inner) -> Result<(), Error> {
        const UNKNOWN_SCHEMA_NAME: &str = "__unknown__";
        let type_names: Vec<String> = inner.pending.keys().cloned().collect();
        for type_name in type_names {
            let Some(queue) = inner.pending.remove(&type_name) else {
                continue;
            };
            let channel_key = (format!("unknown:{type_name}"), type_name.clone());
            let channel_id = if let Some(&id) = inner.channels.get(&channel_key) {
                id
            } else {
                let id = inner.next_channel_id;
                let write_result = self.writer.lock().write(Record::Channel(Channel {
                    id,
                    topic_name: channel_key.0.clone(),
                    message_encoding: "cdr".to_string(),
                    schema_id: None,
                    metadata_map: BTreeMap::from([(
                        "schema".to_string(),
                        UNKNOWN_SCHEMA_NAME.to_string(),
                    )]),
                }));
                if write_result.is_err() {
                    continue;
                }
                inner.next_channel_id += 1;
                inner.channels.insert(channel_key, id);
                id
            };
            let entries: Vec<SampleBufferEntry> = queue
                .into_iter()
                .map(|p| SampleBufferEntry {
                    message: p.message,
                    channel_id,
                    key_json: None,
                })
                .collect();
            if !entries.is_empty() {
                self.write_messages(&entries)?;
            }
        }
        Ok(())
    }

    fn write_messages(&self, entries: &[SampleBufferEntry]) -> Result<(), Error> {
        let mut writer = self.writer.lock();
        for entry in entries {
            writer.write(Record::Message(entry.clone()))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::PayloadPool;
    use crate::tracker::{FileTracker, TrackerConfig};
    use crate::writer::mcap::McapWriter;
    use base::clock::SimulatedClocks;

    struct FixedSchema;
    impl SchemaDerivation for FixedSchema {
        fn derive(&self, dyn_type: &DynamicType) -> (String, String, String) {
            (dyn_type.type_name.clone(), "ros2msg".to_string(), "int32 i".to_string())
        }
    }

    struct NoopKey;
    impl KeyExtraction for NoopKey {
        fn extract_key(&self, _type_name: &str, _payload: &Payload) -> String {
            String::new()
        }
    }

    /// Parses the payload as JSON and keeps only the `id` member, matching
    /// spec.md:263's "Relational keyed writes" scenario.
    struct JsonIdKey;
    impl KeyExtraction for JsonIdKey {
        fn extract_key(&self, _type_name: &str, payload: &Payload) -> String {
            let text = std::str::from_utf8(payload.as_bytes()).unwrap_or("{}");
            let full: serde_json::Value = serde_json::from_str(text).unwrap_or_default();
            serde_json::json!({ "id": full.get("id").cloned().unwrap_or(serde_json::Value::Null) })
                .to_string()
        }
    }

    fn config(buffer_size: usize) -> HandlerConfig {
        HandlerConfig {
            initial_state: State::Running,
            buffer_size,
            event_window: std::time::Duration::from_secs(10),
            cleanup_period: std::time::Duration::from_secs(1),
            max_pending_samples: 4,
            only_with_schema: true,
            pending_timeout: None,
            record_types: true,
            relational: false,
        }
    }

    fn handler(dir: &std::path::Path, buffer_size: usize) -> Handler {
        let tracker = FileTracker::new(TrackerConfig {
            dir: dir.to_path_buf(),
            base_name: "session".to_string(),
            extension: ".bgrc".to_string(),
            prepend_timestamp: false,
            timestamp_format: String::new(),
            local_timezone: false,
            max_total_size: 0,
            max_file_size: 0,
            size_tolerance: 0,
            rotation_enabled: true,
        });
        let clocks: Arc<dyn Clocks> = Arc::new(SimulatedClocks::new(jiff::Timestamp::now()));
        let writer = Box::new(McapWriter::new(tracker, clocks.clone(), "generic".to_string()));
        Handler::new(
            config(buffer_size),
            clocks,
            Arc::new(FixedSchema),
            Arc::new(NoopKey),
            writer,
        )
        .unwrap()
    }

    fn topic() -> Topic {
        Topic {
            topic_name: "t".to_string(),
            type_name: "T".to_string(),
            qos: Default::default(),
        }
    }

    fn message(pool: &PayloadPool, seq: u64) -> Message {
        Message {
            topic: topic(),
            payload: pool.get_payload(4).unwrap(),
            publish_time: jiff::Timestamp::now(),
            log_time: jiff::Timestamp::now(),
            source_identity: crate::model::SourceIdentity {
                writer_guid: uuid::Uuid::nil(),
                sequence_number: seq,
            },
            instance_handle: None,
        }
    }

    #[test]
    fn message_before_schema_is_pending_until_schema_arrives() {
        let dir = tempfile::tempdir().unwrap();
        let h = handler(dir.path(), 1);
        let pool = PayloadPool::new();
        h.add_data(&topic(), message(&pool, 1)).unwrap();
        assert_eq!(h.inner.lock().pending.get("T").map(|q| q.len()), Some(1));
        h.add_schema(&DynamicType {
            type_name: "T".to_string(),
            bytes: bytes::Bytes::from_static(b"def"),
        })
        .unwrap();
        assert!(h.inner.lock().pending.is_empty());
    }

    #[test]
    fn full_buffer_drains_to_writer() {
        let dir = tempfile::tempdir().unwrap();
        let h = handler(dir.path(), 2);
        let pool = PayloadPool::new();
        h.add_schema(&DynamicType {
            type_name: "T".to_string(),
            bytes: bytes::Bytes::from_static(b"def"),
        })
        .unwrap();
        h.add_data(&topic(), message(&pool, 1)).unwrap();
        assert_eq!(h.inner.lock().buffer.len(), 1);
        h.add_data(&topic(), message(&pool, 2)).unwrap();
        assert_eq!(h.inner.lock().buffer.len(), 0);
    }

    #[test]
    fn pause_clears_buffer_and_stop_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let h = handler(dir.path(), 100);
        let pool = PayloadPool::new();
        h.add_schema(&DynamicType {
            type_name: "T".to_string(),
            bytes: bytes::Bytes::from_static(b"def"),
        })
        .unwrap();
        h.add_data(&topic(), message(&pool, 1)).unwrap();
        h.pause().unwrap();
        assert_eq!(h.state(), State::Paused);
        assert_eq!(h.inner.lock().buffer.len(), 0);
        h.stop(true).unwrap();
        assert_eq!(h.state(), State::Stopped);
        h.stop(true).unwrap();
    }

    #[test]
    fn dropped_in_stopped_state() {
        let dir = tempfile::tempdir().unwrap();
        let h = handler(dir.path(), 100);
        h.stop(true).unwrap();
        let pool = PayloadPool::new();
        h.add_data(&topic(), message(&pool, 1)).unwrap();
        assert_eq!(h.inner.lock().buffer.len(), 0);
        assert!(h.inner.lock().pending.is_empty());
    }

    #[test]
    fn zero_max_pending_samples_never_queues() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(100);
        cfg.max_pending_samples = 0;
        let tracker = FileTracker::new(TrackerConfig {
            dir: dir.path().to_path_buf(),
            base_name: "session".to_string(),
            extension: ".bgrc".to_string(),
            prepend_timestamp: false,
            timestamp_format: String::new(),
            local_timezone: false,
            max_total_size: 0,
            max_file_size: 0,
            size_tolerance: 0,
            rotation_enabled: true,
        });
        let clocks: Arc<dyn Clocks> = Arc::new(SimulatedClocks::new(jiff::Timestamp::now()));
        let writer = Box::new(McapWriter::new(tracker, clocks.clone(), "generic".to_string()));
        let h = Handler::new(cfg, clocks, Arc::new(FixedSchema), Arc::new(NoopKey), writer).unwrap();

        let pool = PayloadPool::new();
        h.add_data(&topic(), message(&pool, 1)).unwrap();
        assert!(h.inner.lock().pending.get("T").is_none());
    }

    #[test]
    fn relational_key_extraction_matches_scenario_and_is_memoized() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = FileTracker::new(TrackerConfig {
            dir: dir.path().to_path_buf(),
            base_name: "session".to_string(),
            extension: ".db".to_string(),
            prepend_timestamp: false,
            timestamp_format: String::new(),
            local_timezone: false,
            max_total_size: 0,
            max_file_size: 0,
            size_tolerance: 0,
            rotation_enabled: true,
        });
        let clocks: Arc<dyn Clocks> = Arc::new(SimulatedClocks::new(jiff::Timestamp::now()));
        let writer = Box::new(crate::writer::relational::RelationalWriter::new(
            tracker,
            clocks.clone(),
            crate::writer::DataFormat::JsonText,
        ));
        let h = Handler::new(
            HandlerConfig {
                relational: true,
                ..config(100)
            },
            clocks,
            Arc::new(FixedSchema),
            Arc::new(JsonIdKey),
            writer,
        )
        .unwrap();

        h.add_schema(&DynamicType {
            type_name: "T".to_string(),
            bytes: bytes::Bytes::from_static(b"def"),
        })
        .unwrap();

        let pool = PayloadPool::new();
        let keyed_message = |seq: u64, handle: u64, id: i64| Message {
            topic: topic(),
            payload: pool.get_payload_with(format!("{{\"id\":{id},\"extra\":\"x\"}}").as_bytes()),
            publish_time: jiff::Timestamp::now(),
            log_time: jiff::Timestamp::now(),
            source_identity: crate::model::SourceIdentity {
                writer_guid: uuid::Uuid::nil(),
                sequence_number: seq,
            },
            instance_handle: Some(handle),
        };

        h.add_data(&topic(), keyed_message(1, 1, 1)).unwrap();
        h.add_data(&topic(), keyed_message(2, 2, 2)).unwrap();
        h.add_data(&topic(), keyed_message(3, 1, 1)).unwrap();

        let keys: Vec<String> = {
            let inner = h.inner.lock();
            inner
                .buffer
                .iter()
                .map(|e| e.key_json.clone().unwrap())
                .collect()
        };
        assert_eq!(
            keys,
            vec![
                "{\"id\":1}".to_string(),
                "{\"id\":2}".to_string(),
                "{\"id\":1}".to_string(),
            ]
        );
    }
}
