// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Geotag photos from GPX tracks.
//!
//! Geotagger correlates photo capture times against timestamped GPX
//! waypoints and writes the closest match into the photo's metadata.
//!
//! # Overview
//!
//! 1. [`source`]: GPX sources, local directories, file lists, or Strava.
//! 2. [`metadata`]: location and capture time reading, location writing.
//! 3. [`engine`]: the batch matching and tagging engine.
//! 4. [`report`]: per-file outcomes and batch results.
//!
//! A single run looks like this:
//!
//! ```no_run
//! use geotagger::{
//!     engine::{GeoTagger, TagOptions},
//!     metadata::MetadataAdapter,
//!     progress::Silent,
//!     source::{DirectorySource, GpxSource},
//! };
//!
//! # async fn run() {
//! let tagger = GeoTagger::new(MetadataAdapter::new(None), TagOptions::default());
//! let mut sources: Vec<Box<dyn GpxSource>> =
//!     vec![Box::new(DirectorySource::new("/home/me/tracks", true))];
//! let result = tagger
//!     .tag(&["/home/me/photos/IMG_1.jpg".into()], &mut sources, &Silent)
//!     .await;
//! for file in result.results {
//!     println!("{}", file.summary_line());
//! }
//! # }
//! ```

pub mod backup;
pub mod config;
pub mod elevation;
pub mod engine;
pub mod gpx;
pub mod metadata;
pub mod path;
pub mod progress;
pub mod report;
pub mod source;
pub mod waypoint;
