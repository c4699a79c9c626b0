// This file is part of Moonfire NVR, a security camera network video recorder.
// Copyright (C) 2021 The Moonfire NVR Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! Runtime configuration file for a recording session.
//!
//! Parsing topics, formats, and budgets from a file is outside the core
//! recording engine's scope, but a runnable `record` binary needs somewhere
//! to get them from. This mirrors the ambient-config style of the run
//! command's own config file: a `serde`-derived struct loaded from TOML.

use std::path::{Path, PathBuf};
use std::time::Duration;

use base::{bail_t, format_err_t, Error};
use db::model::State;
use db::writer::DataFormat;
use serde::Deserialize;

fn default_buffer_size() -> usize {
    64
}

fn default_max_pending_samples() -> usize {
    16
}

fn default_cleanup_period_ms() -> u64 {
    1_000
}

fn default_event_window_ms() -> u64 {
    30_000
}

fn default_extension() -> String {
    ".bgrc".to_string()
}

fn default_base_name() -> String {
    "session".to_string()
}

fn default_command_topic() -> String {
    "/bagrec/command".to_string()
}

fn default_status_topic() -> String {
    "/bagrec/status".to_string()
}

/// Which topics a session subscribes to: an allow list (if non-empty, only
/// matching topics are recorded) and a deny list (always excluded, checked
/// after the allow list).
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicFilter {
    #[serde(default)]
    pub allow: Vec<String>,
    #[serde(default)]
    pub deny: Vec<String>,
}

impl TopicFilter {
    pub fn matches(&self, topic_name: &str) -> bool {
        let allowed = self.allow.is_empty() || self.allow.iter().any(|p| p == topic_name);
        let denied = self.deny.iter().any(|p| p == topic_name);
        allowed && !denied
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum InitialState {
    Running,
    Paused,
    Stopped,
}

impl From<InitialState> for State {
    fn from(s: InitialState) -> State {
        match s {
            InitialState::Running => State::Running,
            InitialState::Paused => State::Paused,
            InitialState::Stopped => State::Stopped,
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    BinaryLog,
    Relational,
    Both,
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum DataFormatConfig {
    CdrBlob,
    JsonText,
    Both,
}

impl From<DataFormatConfig> for DataFormat {
    fn from(f: DataFormatConfig) -> DataFormat {
        match f {
            DataFormatConfig::CdrBlob => DataFormat::CdrBlob,
            DataFormatConfig::JsonText => DataFormat::JsonText,
            DataFormatConfig::Both => DataFormat::Both,
        }
    }
}

/// File tracker budgets and naming, matching spec.md §4.B's configuration
/// one field at a time.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileConfig {
    pub dir: PathBuf,

    #[serde(default = "default_base_name")]
    pub base_name: String,

    #[serde(default = "default_extension")]
    pub extension: String,

    #[serde(default)]
    pub prepend_timestamp: bool,

    #[serde(default = "default_timestamp_format")]
    pub timestamp_format: String,

    #[serde(default)]
    pub local_timezone: bool,

    #[serde(default)]
    pub max_total_size: u64,

    #[serde(default)]
    pub max_file_size: u64,

    #[serde(default)]
    pub size_tolerance: u64,

    #[serde(default = "default_true")]
    pub rotation_enabled: bool,
}

fn default_timestamp_format() -> String {
    "%Y%m%d_%H%M%S".to_string()
}

fn default_true() -> bool {
    true
}

/// Top-level session configuration file object.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfig {
    #[serde(default)]
    pub topics: TopicFilter,

    pub format: OutputFormat,

    #[serde(default = "default_data_format")]
    pub data_format: DataFormatConfig,

    pub file: FileConfig,

    #[serde(default)]
    pub initial_state: Option<InitialState>,

    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    #[serde(default = "default_event_window_ms")]
    pub event_window_ms: u64,

    #[serde(default = "default_cleanup_period_ms")]
    pub cleanup_period_ms: u64,

    #[serde(default = "default_max_pending_samples")]
    pub max_pending_samples: usize,

    #[serde(default)]
    pub only_with_schema: bool,

    #[serde(default)]
    pub pending_timeout_ms: Option<u64>,

    #[serde(default = "default_true")]
    pub record_types: bool,

    #[serde(default = "default_command_topic")]
    pub command_topic: String,

    #[serde(default = "default_status_topic")]
    pub status_topic: String,
}

fn default_data_format() -> DataFormatConfig {
    DataFormatConfig::CdrBlob
}

impl SessionConfig {
    pub fn load(path: &Path) -> Result<SessionConfig, Error> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| format_err_t!(Unavailable, "reading {}: {}", path.display(), e))?;
        let config: SessionConfig = toml::from_str(&text)
            .map_err(|e| format_err_t!(InvalidArgument, "parsing {}: {}", path.display(), e))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), Error> {
        if self.buffer_size == 0 {
            bail_t!(InvalidArgument, "bufferSize must be > 0");
        }
        if self.format == OutputFormat::BinaryLog && self.data_format != DataFormatConfig::CdrBlob {
            bail_t!(
                InvalidArgument,
                "dataFormat is only meaningful for the relational or both output formats"
            );
        }
        Ok(())
    }

    pub fn event_window(&self) -> Duration {
        Duration::from_millis(self.event_window_ms)
    }

    pub fn cleanup_period(&self) -> Duration {
        Duration::from_millis(self.cleanup_period_ms)
    }

    pub fn pending_timeout(&self) -> Option<Duration> {
        self.pending_timeout_ms.map(Duration::from_millis)
    }

    pub fn initial_state(&self) -> State {
        self.initial_state.unwrap_or(InitialState::Running).into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_config() {
        let toml = r#"
            format = "binary_log"
            [file]
            dir = "/tmp"
        "#;
        let config: SessionConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.buffer_size, 64);
        assert_eq!(config.format, OutputFormat::BinaryLog);
        assert!(config.topics.matches("anything"));
    }

    #[test]
    fn allow_list_restricts_topics() {
        let filter = TopicFilter {
            allow: vec!["/a".to_string()],
            deny: vec![],
        };
        assert!(filter.matches("/a"));
        assert!(!filter.matches("/b"));
    }

    #[test]
    fn deny_list_overrides_allow() {
        let filter = TopicFilter {
            allow: vec!["/a".to_string()],
            deny: vec!["/a".to_string()],
        };
        assert!(!filter.matches("/a"));
    }
}
