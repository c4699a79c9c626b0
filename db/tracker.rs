// This file is part of Moonfire NVR, a security camera network video recorder.
// Copyright (C) 2020 The Moonfire NVR Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! The file tracker: names output files, measures their sizes, decides when
//! to rotate, and enforces the disk and total-size budgets.

use base::{bail_t, Error};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;

const TMP_SUFFIX: &str = ".tmp";

/// Configuration for a [`FileTracker`], matching spec.md §4.B one field at a time.
#[derive(Clone, Debug)]
pub struct TrackerConfig {
    pub dir: PathBuf,
    pub base_name: String,
    pub extension: String,

    /// If true, the generated file name includes a formatted timestamp.
    pub prepend_timestamp: bool,

    /// `strftime`-style pattern used when `prepend_timestamp` is set.
    pub timestamp_format: String,

    /// If true, format timestamps in the local zone; otherwise UTC.
    pub local_timezone: bool,

    /// 0 means unbounded.
    pub max_total_size: u64,

    /// 0 means a single file that is allowed to grow without bound.
    pub max_file_size: u64,

    /// Minimum headroom required on disk above any predicted write.
    pub size_tolerance: u64,

    /// If false, `open_new_file` fails with `TotalBudgetExceeded` instead of
    /// deleting old files to make room.
    pub rotation_enabled: bool,
}

/// A file the tracker knows about: either the currently open file or one that
/// has been closed and finalized.
#[derive(Clone, Debug)]
struct TrackedFile {
    id: u64,
    /// Final (non-temp) on-disk name, relative to `dir`.
    name: String,
    size: u64,
}

struct Inner {
    config: TrackerConfig,
    next_id: u64,
    closed_files: Vec<TrackedFile>,
    current: Option<TrackedFile>,
}

/// Names output files, measures their sizes, decides when to rotate, and
/// applies the disk budget. Internally synchronized; see spec.md §5.
#[derive(Clone)]
pub struct FileTracker(Arc<Mutex<Inner>>);

impl FileTracker {
    pub fn new(config: TrackerConfig) -> Self {
        FileTracker(Arc::new(Mutex::new(Inner {
            config,
            next_id: 0,
            closed_files: Vec::new(),
            current: None,
        })))
    }

    fn file_name(&self, config: &TrackerConfig, id: u64, now: jiff::Timestamp) -> String {
        if config.prepend_timestamp {
            let zone = base::time::resolve_zone(config.local_timezone);
            let ts = base::time::format_pattern(now, &zone, &config.timestamp_format);
            format!("{}_{}_{}{}", config.base_name, ts, id, config.extension)
        } else {
            format!("{}_{}{}", config.base_name, id, config.extension)
        }
    }

    fn temp_name(name: &str) -> String {
        format!("{name}{TMP_SUFFIX}")
    }

    /// Checks the filesystem's free space at `dir` against `min_bytes_required
    /// + size_tolerance`.
    fn check_disk_free(dir: &std::path::Path, needed: u64) -> Result<(), Error> {
        let stat = nix::sys::statvfs::statvfs(dir).map_err(|e| {
            base::format_err_t!(Unavailable, "statvfs({}) failed: {}", dir.display(), e)
        })?;
        let free = stat.blocks_available() as u64 * stat.fragment_size() as u64;
        if free < needed {
            bail_t!(
                ResourceExhausted,
                "only {} bytes free at {}, need {}",
                free,
                dir.display(),
                needed
            );
        }
        Ok(())
    }

    /// Picks the next file id, constructs an on-disk path, and returns it.
    ///
    /// Fails with `FullDisk` if free space is below `min_bytes_required +
    /// size_tolerance`, or with `Configuration` (standing in for
    /// `TotalBudgetExceeded`) when `rotation_enabled` is false and the new
    /// file would put the total over `max_total_size`.
    ///
    /// `now` is supplied by the caller (rather than read from a real clock
    /// here) so tests can drive file naming with a [`base::clock::SimulatedClocks`].
    pub fn open_new_file(&self, min_bytes_required: u64, now: jiff::Timestamp) -> Result<PathBuf, Error> {
        let mut inner = self.0.lock();

        if let Some(cur) = inner.current.take() {
            self.finalize_closed(&mut inner, cur);
        }

        let needed = min_bytes_required + inner.config.size_tolerance;
        Self::check_disk_free(&inner.config.dir, needed)?;

        if inner.config.max_total_size > 0 {
            let mut projected: u64 =
                inner.closed_files.iter().map(|f| f.size).sum::<u64>() + min_bytes_required;
            if projected > inner.config.max_total_size {
                if !inner.config.rotation_enabled {
                    bail_t!(
                        InvalidArgument,
                        "total budget {} exceeded by new file of at least {} bytes \
                         (rotation disabled)",
                        inner.config.max_total_size,
                        min_bytes_required
                    );
                }
                while projected > inner.config.max_total_size && !inner.closed_files.is_empty() {
                    let removed = inner.closed_files.remove(0);
                    let path = inner.config.dir.join(&removed.name);
                    if let Err(e) = std::fs::remove_file(&path) {
                        tracing::warn!(path = %path.display(), err = %e, "failed to remove rotated-out file");
                    }
                    projected -= removed.size;
                }
                if projected > inner.config.max_total_size {
                    bail_t!(
                        InvalidArgument,
                        "total budget {} exceeded even after removing all closed files",
                        inner.config.max_total_size
                    );
                }
            }
        }

        let id = inner.next_id;
        inner.next_id += 1;
        let name = self.file_name(&inner.config, id, now);
        let tmp_path = inner.config.dir.join(Self::temp_name(&name));
        std::fs::File::create(&tmp_path)
            .map_err(|e| base::format_err_t!(Unavailable, "creating {}: {}", tmp_path.display(), e))?;

        inner.current = Some(TrackedFile { id, name, size: 0 });
        Ok(tmp_path)
    }

    fn finalize_closed(&self, inner: &mut Inner, mut file: TrackedFile) {
        let tmp_path = inner.config.dir.join(Self::temp_name(&file.name));
        let final_path = inner.config.dir.join(&file.name);
        if let Err(e) = std::fs::rename(&tmp_path, &final_path) {
            tracing::warn!(
                from = %tmp_path.display(), to = %final_path.display(), err = %e,
                "failed to finalize rotated file",
            );
        }
        file.size = std::fs::metadata(&final_path).map(|m| m.len()).unwrap_or(file.size);
        inner.closed_files.push(file);
    }

    /// Marks the current file as closed and finalizes its on-disk name. A
    /// no-op if no file is currently open.
    pub fn close_current_file(&self) {
        let mut inner = self.0.lock();
        if let Some(cur) = inner.current.take() {
            self.finalize_closed(&mut inner, cur);
        }
    }

    /// The temp path of the file currently open for append, if any.
    pub fn current_path(&self) -> Option<PathBuf> {
        let inner = self.0.lock();
        inner
            .current
            .as_ref()
            .map(|f| inner.config.dir.join(Self::temp_name(&f.name)))
    }

    /// Sum of `current_size` over every tracked file (closed plus current).
    pub fn total_size(&self) -> u64 {
        let inner = self.0.lock();
        inner.closed_files.iter().map(|f| f.size).sum::<u64>()
            + inner.current.as_ref().map(|f| f.size).unwrap_or(0)
    }

    pub fn set_current_size(&self, n: u64) {
        let mut inner = self.0.lock();
        if let Some(cur) = &mut inner.current {
            cur.size = n;
        }
    }

    pub fn max_file_size(&self) -> u64 {
        self.0.lock().config.max_file_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(dir: &std::path::Path) -> TrackerConfig {
        TrackerConfig {
            dir: dir.to_path_buf(),
            base_name: "session".to_string(),
            extension: ".mcap".to_string(),
            prepend_timestamp: false,
            timestamp_format: "%Y%m%d_%H%M%S".to_string(),
            local_timezone: false,
            max_total_size: 0,
            max_file_size: 0,
            size_tolerance: 0,
            rotation_enabled: true,
        }
    }

    #[test]
    fn names_are_monotonic_and_finalized_on_close() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = FileTracker::new(config(dir.path()));
        let p0 = tracker.open_new_file(0, jiff::Timestamp::now()).unwrap();
        assert!(p0.ends_with("session_0.mcap.tmp"));
        tracker.set_current_size(10);
        tracker.close_current_file();
        assert!(dir.path().join("session_0.mcap").exists());
        assert!(!dir.path().join("session_0.mcap.tmp").exists());

        let p1 = tracker.open_new_file(0, jiff::Timestamp::now()).unwrap();
        assert!(p1.ends_with("session_1.mcap.tmp"));
    }

    #[test]
    fn total_budget_exceeded_without_rotation() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = config(dir.path());
        c.max_total_size = 100;
        c.rotation_enabled = false;
        let tracker = FileTracker::new(c);
        tracker.open_new_file(0, jiff::Timestamp::now()).unwrap();
        tracker.set_current_size(150);
        tracker.close_current_file();
        tracker.open_new_file(10, jiff::Timestamp::now()).unwrap_err();
    }

    #[test]
    fn rotation_evicts_oldest_closed_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = config(dir.path());
        c.max_total_size = 100;
        c.rotation_enabled = true;
        let tracker = FileTracker::new(c);

        tracker.open_new_file(0, jiff::Timestamp::now()).unwrap();
        tracker.set_current_size(60);
        tracker.close_current_file();
        assert!(dir.path().join("session_0.mcap").exists());

        tracker.open_new_file(60, jiff::Timestamp::now()).unwrap();
        assert!(!dir.path().join("session_0.mcap").exists());
    }
}
