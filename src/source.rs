// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! GPX waypoint sources.
//!
//! A __source__ is anything that can produce timestamped waypoints for a set
//! of photo capture times. Three kinds exist:
//!
//! 1. [`DirectorySource`]: a directory tree of `.gpx` files.
//! 2. [`FileListSource`]: an explicit list of `.gpx` files.
//! 3. [`StravaSource`]: activities recorded on Strava, downloaded and cached
//!    locally as GPX.
//!
//! Local sources keep a [`WindowCache`] so repeated batches only parse files
//! whose time window overlaps a requested capture time. Remote sources work
//! one capture time at a time, since each one involves an activity search.

pub mod directory;
pub mod files;
pub mod index;
pub mod strava;

pub use directory::DirectorySource;
pub use files::FileListSource;
pub use index::{FileStamp, SourceWindow, WindowCache};
pub use strava::{ActivityService, StravaClient, StravaCredentials, StravaSource};

use crate::{
    config::SourceConfig,
    path::default_strava_cache_dir,
    progress::Progress,
    waypoint::{TimeQuery, WaypointAndSource},
};

use futures::future::BoxFuture;
use std::path::PathBuf;
use tracing::{info, instrument};

/// Anything that produces waypoints near photo capture times.
pub trait GpxSource: Send {
    /// Human-readable name of the source for reports.
    fn name(&self) -> String;

    /// Gather every waypoint that could match one of the queries.
    ///
    /// Waypoints outside the tolerance may be returned, since filtering
    /// happens per photo later on. Every returned waypoint carries a UTC
    /// timestamp.
    fn points<'a>(
        &'a mut self,
        queries: &'a [TimeQuery],
        progress: &'a dyn Progress,
    ) -> BoxFuture<'a, Result<Vec<WaypointAndSource>>>;
}

/// Construct the source described by a configuration entry.
///
/// Strava sources connect to the remote service right away, so bad
/// credentials surface before any photo is touched.
///
/// # Errors
///
/// - Return [`SourceError::MissingCredentials`] if a Strava source lacks
///   credentials.
/// - Return [`SourceError::NoWayHome`] if the default Strava cache directory
///   cannot be determined.
/// - Return [`SourceError::Http`] or [`SourceError::Status`] if the Strava
///   token exchange fails.
#[instrument(skip(config), level = "debug")]
pub async fn connect(config: &SourceConfig) -> Result<Box<dyn GpxSource>> {
    let source: Box<dyn GpxSource> = match config {
        SourceConfig::Directory { path, recurse } => {
            Box::new(DirectorySource::new(path, *recurse))
        }
        SourceConfig::Files { files } => Box::new(FileListSource::new(files)),
        SourceConfig::Strava {
            cache_dir,
            search_days,
            ..
        } => {
            let credentials = config.strava_credentials().unwrap_or_default();
            let cache_dir = match cache_dir {
                Some(dir) => dir.clone(),
                None => default_strava_cache_dir()?,
            };
            let client = StravaClient::connect(&credentials).await?;
            Box::new(StravaSource::new(client, cache_dir, *search_days))
        }
    };

    info!("using GPX source {}", source.name());
    Ok(source)
}

/// All possible error types for waypoint sources.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// Source directory does not exist or cannot be walked.
    #[error("cannot scan GPX directory {:?}", path.display())]
    Walk {
        #[source]
        source: ignore::Error,
        path: PathBuf,
    },

    /// Source requires credentials that were not supplied.
    #[error("missing credentials for {service}: {missing}")]
    MissingCredentials {
        service: &'static str,
        missing: &'static str,
    },

    /// Remote service request fails.
    #[error(transparent)]
    Http(#[from] reqwest::Error),

    /// Remote service answers with an error status.
    #[error("{service} request failed with status {status}: {body}")]
    Status {
        service: &'static str,
        status: reqwest::StatusCode,
        body: String,
    },

    /// Local cache cannot be read or written.
    #[error("GPX cache I/O failed at {:?}", path.display())]
    Cache {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Default cache location cannot be determined.
    #[error(transparent)]
    NoWayHome(#[from] crate::path::NoWayHome),

    /// GPX data cannot be read.
    #[error(transparent)]
    Gpx(#[from] crate::gpx::GpxError),
}

/// Friendly result alias :3
pub type Result<T, E = SourceError> = std::result::Result<T, E>;
