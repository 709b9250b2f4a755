// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Explicit list of GPX files.

use crate::{
    progress::Progress,
    source::{
        index::{FileStamp, WindowCache},
        GpxSource, Result,
    },
    waypoint::{TimeQuery, WaypointAndSource},
};

use futures::future::BoxFuture;
use std::{collections::BTreeSet, path::PathBuf};
use tracing::warn;

/// GPX files supplied one by one.
///
/// Files that disappear between construction and a request are skipped and
/// reported, never treated as an error.
#[derive(Debug, Clone)]
pub struct FileListSource {
    files: Vec<PathBuf>,
    cache: WindowCache,
}

impl FileListSource {
    /// Construct new file list source.
    pub fn new(files: impl IntoIterator<Item = impl Into<PathBuf>>) -> Self {
        Self {
            files: files.into_iter().map(Into::into).collect(),
            cache: WindowCache::new(),
        }
    }

    /// Configured files, existing or not.
    pub fn files(&self) -> &[PathBuf] {
        self.files.as_slice()
    }

    /// Time windows from the most recent scan.
    pub fn cache(&self) -> &WindowCache {
        &self.cache
    }

    async fn present_files(&self, progress: &dyn Progress) -> BTreeSet<FileStamp> {
        let mut present = BTreeSet::new();
        for path in &self.files {
            match FileStamp::probe(path).await {
                Some(stamp) => {
                    present.insert(stamp);
                }
                None => {
                    warn!("GPX file {} no longer exists, skipping", path.display());
                    progress.report(&format!("Skipping missing GPX file {}", path.display()));
                }
            }
        }

        present
    }
}

impl GpxSource for FileListSource {
    fn name(&self) -> String {
        format!("{} listed GPX files", self.files.len())
    }

    fn points<'a>(
        &'a mut self,
        queries: &'a [TimeQuery],
        progress: &'a dyn Progress,
    ) -> BoxFuture<'a, Result<Vec<WaypointAndSource>>> {
        Box::pin(async move {
            let current = self.present_files(progress).await;
            Ok(self.cache.collect(current, queries, progress).await)
        })
    }
}
