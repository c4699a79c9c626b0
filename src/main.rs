// This file is part of Moonfire NVR, a security camera network video recorder.
// Copyright (C) 2021 The Moonfire NVR Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

use base::Error;
use bpaf::Bpaf;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use tracing::{debug, error};

mod cmds;
mod config;
mod control;
mod transport;

// This is either in the environment when `cargo` is invoked or set from within `build.rs`.
const VERSION: &str = env!("VERSION");

/// bagrec: records pub/sub topics to a binary-log or relational file.
#[derive(Bpaf, Debug)]
#[bpaf(options, version(VERSION))]
enum Args {
    // See the docstring of `cmds::record::Args` for a description of the subcommand.
    Record(#[bpaf(external(cmds::record::args))] cmds::record::Args),
}

impl Args {
    fn run(self) -> Result<i32, Error> {
        match self {
            Args::Record(a) => cmds::record::run(a),
        }
    }
}

fn main() {
    base::tracing_setup::install();

    // Get the program name from the OS (e.g. if invoked as `target/debug/bagrec`: `bagrec`),
    // falling back to the crate name if conversion to a path/UTF-8 string fails.
    let progname = std::env::args_os().next().map(PathBuf::from);
    let progname = progname
        .as_deref()
        .and_then(Path::file_name)
        .and_then(OsStr::to_str)
        .unwrap_or(env!("CARGO_PKG_NAME"));

    let args = match args()
        .fallback_to_usage()
        .run_inner(bpaf::Args::current_args().set_name(progname))
    {
        Ok(a) => a,
        Err(e) => std::process::exit(e.exit_code()),
    };
    tracing::trace!("Parsed command-line arguments: {args:#?}");

    match args.run() {
        Err(e) => {
            error!(err = %e.chain(), "exiting due to error");
            std::process::exit(1);
        }
        Ok(rv) => {
            debug!("exiting with status {}", rv);
            std::process::exit(rv)
        }
    }
}
