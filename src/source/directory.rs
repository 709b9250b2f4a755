// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Directory of GPX files.

use crate::{
    progress::Progress,
    source::{
        index::{FileStamp, WindowCache},
        GpxSource, Result, SourceError,
    },
    waypoint::{TimeQuery, WaypointAndSource},
};

use futures::future::BoxFuture;
use ignore::WalkBuilder;
use std::{
    collections::BTreeSet,
    path::{Path, PathBuf},
};
use tracing::{debug, instrument, warn};

/// GPX files found under a root directory.
///
/// Only files ending in `.gpx` (any case) are considered. Hidden files and
/// ignore files are not special, every matching file is scanned.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    root: PathBuf,
    recurse: bool,
    cache: WindowCache,
}

impl DirectorySource {
    /// Construct new directory source.
    pub fn new(root: impl Into<PathBuf>, recurse: bool) -> Self {
        Self {
            root: root.into(),
            recurse,
            cache: WindowCache::new(),
        }
    }

    /// Root directory being scanned.
    pub fn root(&self) -> &Path {
        self.root.as_path()
    }

    /// Time windows from the most recent scan.
    pub fn cache(&self) -> &WindowCache {
        &self.cache
    }

    /// Enumerate GPX files currently under the root directory.
    ///
    /// # Errors
    ///
    /// - Return [`SourceError::Walk`] if the root is not a directory. Entries
    ///   that cannot be read are logged and skipped.
    #[instrument(skip(self), level = "debug")]
    pub fn current_files(&self) -> Result<BTreeSet<FileStamp>> {
        if !self.root.is_dir() {
            return Err(SourceError::Walk {
                source: ignore::Error::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "not a directory",
                )),
                path: self.root.clone(),
            });
        }

        let mut builder = WalkBuilder::new(&self.root);
        builder.standard_filters(false).follow_links(true);
        if !self.recurse {
            builder.max_depth(Some(1));
        }

        let mut files = BTreeSet::new();
        for entry in builder.build() {
            // INVARIANT: Only a missing root fails the source, bad entries are skipped.
            let entry = match entry {
                Ok(entry) => entry,
                Err(error) => {
                    warn!("skipping unreadable entry under {}: {error}", self.root.display());
                    continue;
                }
            };

            if !entry.file_type().is_some_and(|kind| kind.is_file()) || !is_gpx(entry.path()) {
                continue;
            }

            let modified = entry.metadata().ok().and_then(|meta| meta.modified().ok());
            files.insert(FileStamp::new(entry.path(), modified));
        }

        debug!("found {} GPX files under {}", files.len(), self.root.display());
        Ok(files)
    }
}

impl GpxSource for DirectorySource {
    fn name(&self) -> String {
        format!("directory {}", self.root.display())
    }

    fn points<'a>(
        &'a mut self,
        queries: &'a [TimeQuery],
        progress: &'a dyn Progress,
    ) -> BoxFuture<'a, Result<Vec<WaypointAndSource>>> {
        Box::pin(async move {
            let current = self.current_files()?;
            Ok(self.cache.collect(current, queries, progress).await)
        })
    }
}

/// Check if path names a GPX file.
pub fn is_gpx(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("gpx"))
}
