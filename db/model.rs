// This file is part of Moonfire NVR, a security camera network video recorder.
// Copyright (C) 2020 The Moonfire NVR Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! Data types shared by every component of the recording engine: topics,
//! messages, schemas, channels, and the buffer/pending-queue entries built
//! from them.

use std::collections::BTreeMap;

use crate::payload::Payload;

/// Quality-of-service attributes carried alongside a topic's name and type.
#[derive(Clone, Debug, Default, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Qos {
    pub reliability: String,
    pub durability: String,
    pub ownership: String,
    pub keyed: bool,
    pub history_depth: i64,
}

/// A `(topic_name, type_name)` pair plus its QoS record.
///
/// Two topics with the same name but different `type_name` are distinct:
/// equality and ordering consider both fields.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Topic {
    pub topic_name: String,
    pub type_name: String,
    pub qos: Qos,
}

/// The writer GUID and sequence number that identify the publisher of a message.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct SourceIdentity {
    pub writer_guid: uuid::Uuid,
    pub sequence_number: u64,
}

/// One message received from the pub/sub layer, with its payload and timing.
#[derive(Clone)]
pub struct Message {
    pub topic: Topic,
    pub payload: Payload,
    pub publish_time: jiff::Timestamp,
    pub log_time: jiff::Timestamp,
    pub source_identity: SourceIdentity,

    /// `instance_handle`, used by the relational writer to memoize key computation.
    /// Absent for unkeyed types.
    pub instance_handle: Option<u64>,
}

/// A dynamic type description learned from the pub/sub layer's introspection,
/// prior to being registered as a [`Schema`].
#[derive(Clone)]
pub struct DynamicType {
    pub type_name: String,
    pub bytes: bytes::Bytes,
}

/// A per-output-format schema record. IDs are assigned monotonically within a
/// file and reset on rotation.
#[derive(Clone, Debug)]
pub struct Schema {
    pub id: u32,
    pub name: String,
    pub encoding_tag: String,
    pub text: String,
}

/// A per-output-format channel record: the mapping from a topic to a schema.
/// Like schemas, IDs are monotonic within a file.
#[derive(Clone, Debug)]
pub struct Channel {
    pub id: u32,
    pub topic_name: String,
    pub message_encoding: String,
    pub schema_id: Option<u32>,
    pub metadata_map: BTreeMap<String, String>,
}

/// A message plus the channel id it was resolved against, ready to hand to a
/// [`crate::writer::FormatWriter`].
#[derive(Clone)]
pub struct SampleBufferEntry {
    pub message: Message,
    pub channel_id: u32,

    /// Canonical JSON of the instance's key members, computed by the handler
    /// when the output format is relational and the type is keyed. `None`
    /// for the binary-log writer, which ignores this field, and for unkeyed
    /// or not-yet-resolved types.
    pub key_json: Option<String>,
}

/// A message that arrived before its type's schema was known.
#[derive(Clone)]
pub struct PendingEntry {
    pub message: Message,
    pub type_name: String,
}

/// The recording handler's state machine. See the module doc on
/// [`crate::handler`] for the transition table.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum State {
    Running,
    Paused,
    Stopped,
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            State::Running => "RUNNING",
            State::Paused => "PAUSED",
            State::Stopped => "STOPPED",
        })
    }
}
