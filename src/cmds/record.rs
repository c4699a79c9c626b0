// This file is part of Moonfire NVR, a security camera network video recorder.
// Copyright (C) 2021 The Moonfire NVR Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! Subcommand to run a recording session to completion: loads a
//! [`crate::config::SessionConfig`], builds the file tracker / format
//! writer / handler stack it describes, subscribes an ingress adapter and
//! a remote command endpoint, and runs until stopped by a command, a
//! signal, or an optional `--timeout`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use base::clock::{Clocks, RealClocks};
use base::{format_err_t, Error};
use bpaf::Bpaf;
use db::handler::{Handler, HandlerConfig, KeyExtraction, SchemaDerivation};
use db::model::DynamicType;
use db::payload::Payload;
use db::tracker::{FileTracker, TrackerConfig};
use db::writer::mcap::McapWriter;
use db::writer::relational::RelationalWriter;
use db::writer::FormatWriter;
use tracing::{debug, info, warn};

use crate::config::{OutputFormat, SessionConfig};
use crate::control::{CommandEndpoint, StatusPublisher};
use crate::transport::sim::SimTransport;
use crate::transport::{IngressAdapter, Transport};

/// Runs a recording session described by a configuration file.
#[derive(Bpaf, Debug)]
#[bpaf(command("record"))]
pub struct Args {
    /// Path to the session configuration file (TOML).
    #[bpaf(long("config"), argument::<PathBuf>("FILE"))]
    config: PathBuf,

    /// Overrides the cleanup timer's tick interval, in milliseconds.
    #[bpaf(long("reload-time"), argument::<u64>("MS"), optional)]
    reload_time_ms: Option<u64>,

    /// Stops the session automatically after this many milliseconds.
    #[bpaf(long("timeout"), argument::<u64>("MS"), optional)]
    timeout_ms: Option<u64>,

    /// Enables verbose per-message debug logging.
    #[bpaf(long("debug"), switch)]
    debug: bool,
}

/// A no-op [`SchemaDerivation`] used until real dynamic-type introspection
/// is wired in; it derives a schema from the raw bytes already carried on
/// [`DynamicType`].
struct RawSchemaDerivation;

impl SchemaDerivation for RawSchemaDerivation {
    fn derive(&self, dyn_type: &DynamicType) -> (String, String, String) {
        (
            dyn_type.type_name.clone(),
            "unknown".to_string(),
            String::from_utf8_lossy(&dyn_type.bytes).into_owned(),
        )
    }
}

/// A no-op [`KeyExtraction`] used until real dynamic-type introspection is
/// wired in; real payload deserialization belongs to the pub/sub transport
/// layer this workspace takes as a boundary, not the recording engine.
struct RawKeyExtraction;

impl KeyExtraction for RawKeyExtraction {
    fn extract_key(&self, _type_name: &str, _payload: &Payload) -> String {
        String::new()
    }
}

fn tracker_config(config: &SessionConfig) -> TrackerConfig {
    let file = &config.file;
    TrackerConfig {
        dir: file.dir.clone(),
        base_name: file.base_name.clone(),
        extension: file.extension.clone(),
        prepend_timestamp: file.prepend_timestamp,
        timestamp_format: file.timestamp_format.clone(),
        local_timezone: file.local_timezone,
        max_total_size: file.max_total_size,
        max_file_size: file.max_file_size,
        size_tolerance: file.size_tolerance,
        rotation_enabled: file.rotation_enabled,
    }
}

fn handler_config(config: &SessionConfig, relational: bool) -> HandlerConfig {
    HandlerConfig {
        initial_state: config.initial_state(),
        buffer_size: config.buffer_size,
        event_window: config.event_window(),
        cleanup_period: config.cleanup_period(),
        max_pending_samples: config.max_pending_samples,
        only_with_schema: config.only_with_schema,
        pending_timeout: config.pending_timeout(),
        record_types: config.record_types,
        relational,
    }
}

fn build_handlers(
    config: &SessionConfig,
    clocks: Arc<dyn Clocks>,
) -> Result<Vec<Arc<Handler>>, Error> {
    let mut handlers = Vec::new();

    if config.format == OutputFormat::BinaryLog || config.format == OutputFormat::Both {
        let tracker = FileTracker::new(tracker_config(config));
        let writer: Box<dyn FormatWriter> =
            Box::new(McapWriter::new(tracker, clocks.clone(), "bagrec".to_string()));
        let handler = Handler::new(
            handler_config(config, false),
            clocks.clone(),
            Arc::new(RawSchemaDerivation),
            Arc::new(RawKeyExtraction),
            writer,
        )
        .map_err(|e| format_err_t!(Unavailable, "initializing binary-log handler: {}", e))?;
        handlers.push(Arc::new(handler));
    }

    if config.format == OutputFormat::Relational || config.format == OutputFormat::Both {
        let tracker = FileTracker::new(tracker_config(config));
        let writer: Box<dyn FormatWriter> =
            Box::new(RelationalWriter::new(tracker, clocks.clone(), config.data_format.into()));
        let handler = Handler::new(
            handler_config(config, true),
            clocks.clone(),
            Arc::new(RawSchemaDerivation),
            Arc::new(RawKeyExtraction),
            writer,
        )
        .map_err(|e| format_err_t!(Unavailable, "initializing relational handler: {}", e))?;
        handlers.push(Arc::new(handler));
    }

    Ok(handlers)
}

/// Publishes status updates via `tracing`. The status topic's actual
/// pub/sub transport is out of this workspace's core scope; this is the
/// boundary a real deployment swaps in a topic-publishing implementation
/// for.
struct TracingStatusPublisher {
    topic: String,
}

impl StatusPublisher for TracingStatusPublisher {
    fn publish(&self, status: crate::control::Status) {
        info!(
            topic = %self.topic,
            previous = %status.previous,
            current = %status.current,
            info = %status.info,
            "status",
        );
    }
}

pub fn run(args: Args) -> Result<i32, Error> {
    if args.debug {
        debug!("debug logging requested via --debug");
    }

    let config = SessionConfig::load(&args.config)?;
    let clocks: Arc<dyn Clocks> = Arc::new(RealClocks {});
    let handlers = build_handlers(&config, clocks.clone())?;

    let transport = SimTransport::new();
    let adapter: Arc<dyn crate::transport::Listener> =
        Arc::new(IngressAdapter::new(config.topics.clone(), handlers.clone()));
    let _subscription = transport
        .subscribe(crate::config::TopicFilter::default(), adapter)
        .map_err(|e| format_err_t!(Unavailable, "subscribing ingress adapter: {}", e))?;

    let status: Arc<dyn StatusPublisher> = Arc::new(TracingStatusPublisher {
        topic: config.status_topic.clone(),
    });
    let endpoint = Arc::new(CommandEndpoint::new(handlers.clone(), status));
    // The command topic's transport binding is likewise out of core scope;
    // `endpoint` is driven here only by the signal handler and timeout
    // below, matching spec.md's "receives messages until commanded to stop
    // or until the process is signaled" lifecycle.
    let _ = &config.command_topic;

    // `shutdown_tx` is dropped once the signal/timeout wait below returns,
    // which is what actually wakes the cleanup timer thread; see
    // base::shutdown's doc comment.
    let (shutdown_tx, shutdown_rx) = base::shutdown::channel();
    let cleanup_period = args
        .reload_time_ms
        .map(Duration::from_millis)
        .unwrap_or_else(|| config.cleanup_period());
    let cleanup_handlers = handlers.clone();
    let cleanup_thread = std::thread::Builder::new()
        .name("cleanup-timer".to_string())
        .spawn(move || loop {
            match shutdown_rx.wait_for(cleanup_period) {
                Ok(()) => {
                    for h in &cleanup_handlers {
                        h.run_cleanup_tick();
                    }
                }
                Err(_) => return,
            }
        })
        .map_err(|e| format_err_t!(Unavailable, "spawning cleanup timer thread: {}", e))?;

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| format_err_t!(Unavailable, "building signal runtime: {}", e))?;
    let wait_result: Result<(), Error> = rt.block_on(async {
        let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())
            .map_err(|e| format_err_t!(Unavailable, "installing SIGINT handler: {}", e))?;
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .map_err(|e| format_err_t!(Unavailable, "installing SIGTERM handler: {}", e))?;
        let timeout = async {
            match args.timeout_ms {
                Some(ms) => tokio::time::sleep(Duration::from_millis(ms)).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::select! {
            _ = sigint.recv() => info!("received SIGINT"),
            _ = sigterm.recv() => info!("received SIGTERM"),
            _ = timeout => info!("reached --timeout; stopping"),
        }
        Ok(())
    });
    wait_result?;

    drop(shutdown_tx);
    endpoint.handle("close", "");
    cleanup_thread
        .join()
        .map_err(|_| format_err_t!(Internal, "cleanup timer thread panicked"))?;

    for h in &handlers {
        if h.state() != db::model::State::Stopped {
            warn!("handler did not reach Stopped state on shutdown");
        }
    }

    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bpaf_invariants() {
        args().check_invariants(false);
    }
}
