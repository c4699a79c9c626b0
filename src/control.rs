// This file is part of Moonfire NVR, a security camera network video recorder.
// Copyright (C) 2021 The Moonfire NVR Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! The remote command endpoint: listens on a command topic and publishes
//! status updates, driving every attached [`Handler`]'s state transitions.
//! Per spec.md §4.G, it executes at most one command at a time and never
//! blocks ingress — it only calls the handlers' public methods.

use std::sync::Arc;

use base::Error;
use db::handler::Handler;
use db::model::State;
use parking_lot::Mutex;

/// A parsed command from the command topic.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Command {
    Start,
    Pause,
    Stop,
    Event { tag: Option<String> },
    Close,
}

impl Command {
    /// Parses `(command, args)` as received on the command topic.
    /// `command` is matched case-insensitively; unrecognized commands are
    /// rejected so the caller can publish an error status.
    pub fn parse(command: &str, args: &str) -> Result<Command, Error> {
        match command.to_ascii_lowercase().as_str() {
            "start" => Ok(Command::Start),
            "pause" => Ok(Command::Pause),
            "stop" => Ok(Command::Stop),
            "event" => Ok(Command::Event {
                tag: if args.is_empty() { None } else { Some(args.to_string()) },
            }),
            "close" => Ok(Command::Close),
            other => base::bail_t!(InvalidArgument, "unknown command: {}", other),
        }
    }
}

/// Published on every state transition and on any asynchronous error, per
/// spec.md §6.
#[derive(Clone, Debug)]
pub struct Status {
    pub previous: StatusState,
    pub current: StatusState,
    pub info: String,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StatusState {
    Running,
    Paused,
    Stopped,
    Closed,
}

impl From<State> for StatusState {
    fn from(s: State) -> StatusState {
        match s {
            State::Running => StatusState::Running,
            State::Paused => StatusState::Paused,
            State::Stopped => StatusState::Stopped,
        }
    }
}

impl std::fmt::Display for StatusState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            StatusState::Running => "RUNNING",
            StatusState::Paused => "PAUSED",
            StatusState::Stopped => "STOPPED",
            StatusState::Closed => "CLOSED",
        })
    }
}

/// Publishes [`Status`] updates. A real implementation wraps the pub/sub
/// status topic; tests use [`sim::StatusLog`].
pub trait StatusPublisher: Send + Sync {
    fn publish(&self, status: Status);
}

/// Drives every attached handler's state transitions from parsed commands.
/// Holds its own mutex so "at most one command at a time" per spec.md §4.G
/// doesn't depend on the handlers' own locking.
pub struct CommandEndpoint {
    handlers: Vec<Arc<Handler>>,
    status: Arc<dyn StatusPublisher>,
    closed: Mutex<bool>,
}

impl CommandEndpoint {
    pub fn new(handlers: Vec<Arc<Handler>>, status: Arc<dyn StatusPublisher>) -> Self {
        CommandEndpoint {
            handlers,
            status,
            closed: Mutex::new(false),
        }
    }

    /// Executes one command, publishing the resulting status (or an error
    /// status for an unrecognized command). Commands received after `Close`
    /// has run are rejected.
    pub fn handle(&self, command: &str, args: &str) {
        let mut closed = self.closed.lock();
        if *closed {
            self.status.publish(Status {
                previous: StatusState::Closed,
                current: StatusState::Closed,
                info: "endpoint is closed".to_string(),
            });
            return;
        }

        let parsed = match Command::parse(command, args) {
            Ok(c) => c,
            Err(e) => {
                self.status.publish(Status {
                    previous: StatusState::Closed,
                    current: StatusState::Closed,
                    info: format!("rejected: {}", e.chain()),
                });
                return;
            }
        };

        if parsed == Command::Close {
            for h in &self.handlers {
                if let Err(e) = h.stop(true) {
                    tracing::warn!(err = %e.chain(), "stop on close failed");
                }
            }
            *closed = true;
            self.status.publish(Status {
                previous: StatusState::Running,
                current: StatusState::Closed,
                info: String::new(),
            });
            return;
        }

        for h in &self.handlers {
            let previous: StatusState = h.state().into();
            let result = match &parsed {
                Command::Start => h.start(),
                Command::Pause => h.pause(),
                Command::Stop => h.stop(false),
                Command::Event { .. } => h.trigger_event(),
                Command::Close => unreachable!("handled above"),
            };
            let current: StatusState = h.state().into();
            match result {
                Ok(()) => self.status.publish(Status {
                    previous,
                    current,
                    info: String::new(),
                }),
                Err(e) => self.status.publish(Status {
                    previous,
                    current,
                    info: e.chain(),
                }),
            }
        }
    }
}

pub mod sim {
    use super::*;

    #[derive(Default)]
    pub struct StatusLog(Mutex<Vec<Status>>);

    impl StatusLog {
        pub fn new() -> Arc<Self> {
            Arc::new(StatusLog::default())
        }

        pub fn last(&self) -> Option<Status> {
            self.0.lock().last().cloned()
        }

        pub fn all(&self) -> Vec<Status> {
            self.0.lock().clone()
        }
    }

    impl StatusPublisher for StatusLog {
        fn publish(&self, status: Status) {
            self.0.lock().push(status);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::sim::StatusLog;
    use super::*;
    use db::handler::{HandlerConfig, KeyExtraction, SchemaDerivation};
    use db::model::{DynamicType, State};
    use db::payload::Payload;
    use db::tracker::{FileTracker, TrackerConfig};
    use db::writer::mcap::McapWriter;
    use base::clock::{Clocks, RealClocks};

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

    fn handler(dir: &std::path::Path) -> Arc<Handler> {
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
        let clocks: Arc<dyn Clocks> = Arc::new(RealClocks {});
        let writer = Box::new(McapWriter::new(tracker, clocks.clone(), "generic".to_string()));
        Arc::new(
            Handler::new(
                HandlerConfig {
                    initial_state: State::Running,
                    buffer_size: 8,
                    event_window: std::time::Duration::from_secs(10),
                    cleanup_period: std::time::Duration::from_secs(1),
                    max_pending_samples: 4,
                    only_with_schema: true,
                    pending_timeout: None,
                    record_types: true,
                    relational: false,
                },
                clocks,
                Arc::new(FixedSchema),
                Arc::new(NoopKey),
                writer,
            )
            .unwrap(),
        )
    }

    #[test]
    fn unknown_command_publishes_error_status() {
        let dir = tempfile::tempdir().unwrap();
        let status = StatusLog::new();
        let endpoint = CommandEndpoint::new(vec![handler(dir.path())], status.clone());
        endpoint.handle("frobnicate", "");
        let last = status.last().unwrap();
        assert!(last.info.contains("rejected"));
    }

    #[test]
    fn pause_then_start_round_trips_state() {
        let dir = tempfile::tempdir().unwrap();
        let h = handler(dir.path());
        let status = StatusLog::new();
        let endpoint = CommandEndpoint::new(vec![h.clone()], status.clone());
        endpoint.handle("pause", "");
        assert_eq!(h.state(), State::Paused);
        endpoint.handle("start", "");
        assert_eq!(h.state(), State::Running);
        assert_eq!(status.all().len(), 2);
    }

    #[test]
    fn close_stops_and_rejects_further_commands() {
        let dir = tempfile::tempdir().unwrap();
        let h = handler(dir.path());
        let status = StatusLog::new();
        let endpoint = CommandEndpoint::new(vec![h.clone()], status.clone());
        endpoint.handle("close", "");
        assert_eq!(h.state(), State::Stopped);
        endpoint.handle("start", "");
        assert_eq!(h.state(), State::Stopped, "commands after close are rejected");
    }
}
