// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Waypoint index over local GPX files.
//!
//! Parsing every GPX file for every batch gets slow once a track archive
//! grows to a few years of recordings. The index keeps the bounding time
//! window of each file so only files that could possibly contain a match are
//! parsed again when waypoints are requested.
//!
//! # Staleness
//!
//! The index remembers the exact set of files it scanned, along with their
//! modification times. Any difference between that set and the current one,
//! whether a file was added, removed, or touched, invalidates the whole index
//! and triggers a rescan. The check itself is a pure set comparison so it
//! can be reasoned about without touching the file system.
//!
//! The index does not guard against files changing _during_ a scan.

use crate::{
    gpx::read_gpx_file,
    progress::Progress,
    waypoint::{TimeQuery, WaypointAndSource},
};

use chrono::{DateTime, Utc};
use std::{
    collections::{BTreeSet, HashSet},
    path::{Path, PathBuf},
    time::SystemTime,
};
use tracing::{debug, instrument, warn};

/// Identity of a GPX file at scan time.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FileStamp {
    pub path: PathBuf,
    pub modified: Option<SystemTime>,
}

impl FileStamp {
    pub fn new(path: impl Into<PathBuf>, modified: Option<SystemTime>) -> Self {
        Self {
            path: path.into(),
            modified,
        }
    }

    /// Stamp file at target path, or `None` if it does not exist.
    pub async fn probe(path: impl AsRef<Path>) -> Option<Self> {
        let path = path.as_ref();
        let metadata = tokio::fs::metadata(path).await.ok()?;
        if !metadata.is_file() {
            return None;
        }

        Some(Self::new(path, metadata.modified().ok()))
    }
}

/// Bounding time window of one parsed GPX file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub path: PathBuf,
}

impl SourceWindow {
    /// Check if any query overlaps this window.
    pub fn matches_any(&self, queries: &[TimeQuery]) -> bool {
        queries
            .iter()
            .any(|query| query.overlaps(self.start, self.end))
    }
}

/// Cache of per-file time windows.
#[derive(Debug, Default, Clone)]
pub struct WindowCache {
    scanned: bool,
    last_known: BTreeSet<FileStamp>,
    windows: Vec<SourceWindow>,
}

impl WindowCache {
    /// Construct new empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if the cache must be rebuilt for the current file set.
    pub fn needs_rescan(&self, current: &BTreeSet<FileStamp>) -> bool {
        !self.scanned || self.last_known != *current
    }

    /// Rebuild the cache by parsing every file in the current set.
    ///
    /// Unreadable files and files without timestamped fixes are remembered as
    /// known but contribute no window.
    #[instrument(skip(self, current, progress), level = "debug")]
    pub async fn rescan(&mut self, current: BTreeSet<FileStamp>, progress: &dyn Progress) {
        let mut windows = Vec::new();
        let total = current.len();

        for (index, stamp) in current.iter().enumerate() {
            progress.report(&format!(
                "Scanning GPX file {} of {total}: {}",
                index + 1,
                stamp.path.display()
            ));

            match read_gpx_file(&stamp.path).await {
                Ok(document) => match document.time_window() {
                    Some((start, end)) => windows.push(SourceWindow {
                        start,
                        end,
                        path: stamp.path.clone(),
                    }),
                    None => debug!("no timestamped fixes in {}", stamp.path.display()),
                },
                Err(error) => warn!("skipping GPX file during scan: {error}"),
            }
        }

        self.scanned = true;
        self.last_known = current;
        self.windows = windows;
    }

    /// Deduplicated files whose time window overlaps any query, in scan order.
    pub fn matching(&self, queries: &[TimeQuery]) -> Vec<PathBuf> {
        let mut seen = HashSet::new();
        self.windows
            .iter()
            .filter(|window| window.matches_any(queries))
            .filter(|window| seen.insert(window.path.clone()))
            .map(|window| window.path.clone())
            .collect()
    }

    /// Current known windows.
    pub fn windows(&self) -> &[SourceWindow] {
        self.windows.as_slice()
    }

    /// Refresh the cache if needed, then collect waypoints from every file
    /// whose window overlaps a query.
    pub async fn collect(
        &mut self,
        current: BTreeSet<FileStamp>,
        queries: &[TimeQuery],
        progress: &dyn Progress,
    ) -> Vec<WaypointAndSource> {
        if self.needs_rescan(&current) {
            debug!("file set changed, rescanning {} GPX files", current.len());
            self.rescan(current, progress).await;
        }

        let mut points = Vec::new();
        for path in self.matching(queries) {
            progress.report(&format!("Reading points from {}", path.display()));
            match read_gpx_file(&path).await {
                Ok(document) => points.extend(document.waypoints(&source_name(&path))),
                Err(error) => warn!("skipping GPX file: {error}"),
            }
        }

        points
    }
}

/// Name used to attribute waypoints to a GPX file.
pub fn source_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
