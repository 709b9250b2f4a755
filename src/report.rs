// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Batch results.
//!
//! Every tagging run produces exactly one [`GeoTagResult`], even when every
//! file failed. It holds a title, a running notes buffer, and one
//! [`GeoTagFileResult`] per input file in input order.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    path::{Path, PathBuf},
};
use tracing::{info, warn};

/// Terminal outcome of one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TagOutcome {
    Success,
    Skipped,
    Error,
    #[serde(rename = "Not Supported")]
    NotSupported,
    #[serde(rename = "Test Success")]
    TestSuccess,
    #[serde(rename = "No Matching GPX Data")]
    NoMatchingGpxData,
    #[serde(rename = "File Not Found")]
    FileNotFound,
    #[serde(rename = "Backup Error")]
    BackupError,
    #[serde(rename = "ExifTool Failure")]
    ExifToolFailure,
}

/// Coarse state of an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutcomeKind {
    Success,
    Skip,
    Error,
}

impl TagOutcome {
    pub fn kind(self) -> OutcomeKind {
        match self {
            Self::Success | Self::TestSuccess => OutcomeKind::Success,
            Self::Skipped | Self::NotSupported | Self::NoMatchingGpxData | Self::FileNotFound => {
                OutcomeKind::Skip
            }
            Self::Error | Self::BackupError | Self::ExifToolFailure => OutcomeKind::Error,
        }
    }
}

impl Display for TagOutcome {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        let text = match self {
            Self::Success => "Success",
            Self::Skipped => "Skipped",
            Self::Error => "Error",
            Self::NotSupported => "Not Supported",
            Self::TestSuccess => "Test Success",
            Self::NoMatchingGpxData => "No Matching GPX Data",
            Self::FileNotFound => "File Not Found",
            Self::BackupError => "Backup Error",
            Self::ExifToolFailure => "ExifTool Failure",
        };
        fmt.write_str(text)
    }
}

/// Outcome of one input file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeoTagFileResult {
    pub file: PathBuf,
    pub outcome: TagOutcome,
    pub notes: String,
    pub source: Option<String>,
    pub utc_time: Option<DateTime<Utc>>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub elevation: Option<f64>,
}

impl GeoTagFileResult {
    /// Construct result without any location details.
    pub fn new(file: impl Into<PathBuf>, outcome: TagOutcome, notes: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            outcome,
            notes: notes.into(),
            source: None,
            utc_time: None,
            latitude: None,
            longitude: None,
            elevation: None,
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_utc_time(mut self, time: DateTime<Utc>) -> Self {
        self.utc_time = Some(time);
        self
    }

    pub fn with_location(mut self, latitude: f64, longitude: f64, elevation: Option<f64>) -> Self {
        self.latitude = Some(latitude);
        self.longitude = Some(longitude);
        self.elevation = elevation;
        self
    }

    /// One line description for logs and notes.
    pub fn summary_line(&self) -> String {
        let mut line = format!("{} - {}", self.file.display(), self.outcome);
        if let (Some(latitude), Some(longitude)) = (self.latitude, self.longitude) {
            line.push_str(&format!(" ({latitude:.6}, {longitude:.6}"));
            if let Some(elevation) = self.elevation {
                line.push_str(&format!(", {elevation:.1}m"));
            }
            line.push(')');
        }
        if let Some(source) = &self.source {
            line.push_str(&format!(" from {source}"));
        }
        if !self.notes.is_empty() {
            line.push_str(&format!(": {}", self.notes));
        }
        line
    }
}

/// Result of one tagging run.
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct GeoTagResult {
    pub title: String,
    pub notes: String,
    pub results: Vec<GeoTagFileResult>,
}

impl GeoTagResult {
    /// Number of results in each coarse state, as `(success, skip, error)`.
    pub fn counts(&self) -> (usize, usize, usize) {
        self.results
            .iter()
            .fold((0, 0, 0), |(ok, skip, err), result| match result.outcome.kind() {
                OutcomeKind::Success => (ok + 1, skip, err),
                OutcomeKind::Skip => (ok, skip + 1, err),
                OutcomeKind::Error => (ok, skip, err + 1),
            })
    }

    /// Result for target file, if present.
    pub fn result_for(&self, file: &Path) -> Option<&GeoTagFileResult> {
        self.results.iter().find(|result| result.file == file)
    }
}

/// Incremental builder of a [`GeoTagResult`].
#[derive(Debug, Default)]
pub struct BatchReport {
    result: GeoTagResult,
}

impl BatchReport {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            result: GeoTagResult {
                title: title.into(),
                ..Default::default()
            },
        }
    }

    /// Record run header with file count, source names, and options.
    pub fn header(&mut self, file_count: usize, sources: &[String], options: &impl Display) {
        self.note(format!(
            "Tagging {file_count} files against {} GPX sources",
            sources.len()
        ));
        for source in sources {
            self.note(format!("  source: {source}"));
        }
        self.note(format!("Options: {options}"));
    }

    /// Append free text note.
    pub fn note(&mut self, note: impl AsRef<str>) {
        if !self.result.notes.is_empty() {
            self.result.notes.push('\n');
        }
        self.result.notes.push_str(note.as_ref());
    }

    /// Append warning note and log it.
    pub fn warning(&mut self, warning: impl AsRef<str>) {
        warn!("{}", warning.as_ref());
        self.note(format!("Warning: {}", warning.as_ref()));
    }

    /// Append per-file result with its summary line.
    pub fn record(&mut self, result: GeoTagFileResult) {
        let line = result.summary_line();
        info!("{line}");
        self.note(line);
        self.result.results.push(result);
    }

    pub fn len(&self) -> usize {
        self.result.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.result.results.is_empty()
    }

    /// Replace the title, usually once the run is over.
    pub fn set_title(&mut self, title: impl Into<String>) {
        self.result.title = title.into();
    }

    pub fn finish(self) -> GeoTagResult {
        self.result
    }
}
