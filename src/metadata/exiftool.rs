// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! External ExifTool backend.
//!
//! ExifTool understands far more containers than the embedded backend, so
//! raw, HEIF, TIFF, and video files are routed through it whenever an
//! executable is configured.
//!
//! # Longitude Convention
//!
//! By default longitude is always written as west (`-|lon|`), no matter the
//! sign of the source longitude. Existing tagging workflows rely on this, so
//! it stays the default. Disable `force_west_longitude` to write the real
//! hemisphere.
//!
//! # See Also
//!
//! - [ExifTool](https://exiftool.org/exiftool_pod.html)

use crate::metadata::Location;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;
use std::{
    ffi::OsString,
    path::{Path, PathBuf},
};
use tokio::process::Command;
use tracing::{debug, instrument};

/// Tags requested on every read.
const READ_TAGS: [&str; 10] = [
    "-GPSLatitude",
    "-GPSLatitudeRef",
    "-GPSLongitude",
    "-GPSLongitudeRef",
    "-GPSAltitude",
    "-GPSAltitudeRef",
    "-DateTimeOriginal",
    "-OffsetTimeOriginal",
    "-OffsetTime",
    "-GPSDateTime",
];

/// Handle to an ExifTool executable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExifTool {
    program: PathBuf,
    force_west_longitude: bool,
}

/// Subset of `exiftool -json -n` output relevant to geotags.
#[derive(Debug, Default, Clone, PartialEq, Deserialize)]
pub struct ExifToolInfo {
    #[serde(rename = "GPSLatitude")]
    pub gps_latitude: Option<f64>,
    #[serde(rename = "GPSLatitudeRef")]
    pub gps_latitude_ref: Option<String>,
    #[serde(rename = "GPSLongitude")]
    pub gps_longitude: Option<f64>,
    #[serde(rename = "GPSLongitudeRef")]
    pub gps_longitude_ref: Option<String>,
    #[serde(rename = "GPSAltitude")]
    pub gps_altitude: Option<f64>,
    #[serde(rename = "GPSAltitudeRef")]
    pub gps_altitude_ref: Option<u8>,
    #[serde(rename = "DateTimeOriginal")]
    pub date_time_original: Option<String>,
    #[serde(rename = "OffsetTimeOriginal")]
    pub offset_time_original: Option<String>,
    #[serde(rename = "OffsetTime")]
    pub offset_time: Option<String>,
    #[serde(rename = "GPSDateTime")]
    pub gps_date_time: Option<String>,
}

impl ExifToolInfo {
    /// Decode `exiftool -json` output for a single file.
    ///
    /// # Errors
    ///
    /// - Return [`ExifToolError::Decode`] if output is not valid JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        let infos: Vec<ExifToolInfo> = serde_json::from_str(json)?;
        Ok(infos.into_iter().next().unwrap_or_default())
    }

    /// Existing GPS position.
    pub fn location(&self) -> Option<Location> {
        let latitude = apply_ref(self.gps_latitude?, self.gps_latitude_ref.as_deref(), 'S');
        let longitude = apply_ref(self.gps_longitude?, self.gps_longitude_ref.as_deref(), 'W');
        let elevation = self.gps_altitude.map(|altitude| {
            if self.gps_altitude_ref == Some(1) {
                -altitude.abs()
            } else {
                altitude
            }
        });

        Some(Location::new(latitude, longitude, elevation)).filter(Location::is_valid)
    }

    /// UTC capture time, only if derivable without guessing a timezone.
    pub fn captured_on(&self) -> Option<DateTime<Utc>> {
        let original = self.date_time_original.as_deref().and_then(|local| {
            let offset = self
                .offset_time_original
                .as_deref()
                .or(self.offset_time.as_deref())?;
            DateTime::parse_from_str(
                &format!("{} {}", local.trim(), offset.trim()),
                "%Y:%m:%d %H:%M:%S %:z",
            )
            .ok()
        });

        original
            .map(|time| time.with_timezone(&Utc))
            .or_else(|| self.gps_date_time.as_deref().and_then(parse_gps_date_time))
    }
}

fn apply_ref(value: f64, reference: Option<&str>, negative: char) -> f64 {
    let is_negative = reference
        .and_then(|text| text.trim().chars().next())
        .is_some_and(|head| head.eq_ignore_ascii_case(&negative));

    if is_negative {
        -value.abs()
    } else {
        value
    }
}

fn parse_gps_date_time(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim().trim_end_matches('Z');
    NaiveDateTime::parse_from_str(text, "%Y:%m:%d %H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

impl ExifTool {
    /// Construct new ExifTool handle.
    pub fn new(program: impl Into<PathBuf>, force_west_longitude: bool) -> Self {
        Self {
            program: program.into(),
            force_west_longitude,
        }
    }

    /// Path to ExifTool executable.
    pub fn program(&self) -> &Path {
        self.program.as_path()
    }

    /// Whether longitude is always written as west.
    pub fn force_west_longitude(&self) -> bool {
        self.force_west_longitude
    }

    /// Read geotag relevant metadata of target file.
    ///
    /// # Errors
    ///
    /// - Return [`ExifToolError::Failure`] if ExifTool cannot run or exits
    ///   with failure.
    /// - Return [`ExifToolError::Decode`] if ExifTool output is malformed.
    #[instrument(skip(self, path), level = "debug")]
    pub async fn read(&self, path: &Path) -> Result<ExifToolInfo> {
        let mut args: Vec<OsString> = vec!["-json".into(), "-n".into()];
        args.extend(READ_TAGS.iter().map(OsString::from));
        args.push(path.into());

        let output = self.syscall(args).await?;
        ExifToolInfo::from_json(&output)
    }

    /// Write location into target file in place.
    ///
    /// # Errors
    ///
    /// - Return [`ExifToolError::Failure`] if ExifTool cannot run or exits
    ///   with failure.
    #[instrument(skip(self, path, location), level = "debug")]
    pub async fn write_location(&self, path: &Path, location: &Location) -> Result<()> {
        let output = self.syscall(self.write_args(path, location)).await?;
        debug!("exiftool: {output}");
        Ok(())
    }

    /// Arguments for writing location into target file.
    pub fn write_args(&self, path: &Path, location: &Location) -> Vec<OsString> {
        let latitude_ref = if location.latitude < 0.0 { "S" } else { "N" };
        let longitude_ref = if self.force_west_longitude || location.longitude < 0.0 {
            "W"
        } else {
            "E"
        };

        let mut args: Vec<OsString> = vec![
            "-overwrite_original".into(),
            "-n".into(),
            format!("-GPSLatitude={}", location.latitude.abs()).into(),
            format!("-GPSLatitudeRef={latitude_ref}").into(),
            format!("-GPSLongitude={}", location.longitude.abs()).into(),
            format!("-GPSLongitudeRef={longitude_ref}").into(),
        ];

        if let Some(elevation) = location.elevation {
            let below = u8::from(elevation < 0.0);
            args.push(format!("-GPSAltitude={}", elevation.abs()).into());
            args.push(format!("-GPSAltitudeRef={below}").into());
        }

        args.push(path.into());
        args
    }

    async fn syscall(&self, args: Vec<OsString>) -> Result<String> {
        let output = Command::new(&self.program)
            .args(&args)
            .output()
            .await
            .map_err(|err| ExifToolError::Failure {
                program: self.program.clone(),
                message: err.to_string(),
            })?;
        let stdout = String::from_utf8_lossy(output.stdout.as_slice()).into_owned();
        let stderr = String::from_utf8_lossy(output.stderr.as_slice()).into_owned();

        if !output.status.success() {
            let mut message = stderr.trim_end().to_string();
            if message.is_empty() {
                message = format!("exited with {}", output.status);
            }
            return Err(ExifToolError::Failure {
                program: self.program.clone(),
                message,
            });
        }

        // INVARIANT: Chomp trailing newlines.
        Ok(stdout.trim_end_matches(['\r', '\n']).to_string())
    }
}

/// ExifTool error types.
#[derive(Debug, thiserror::Error)]
pub enum ExifToolError {
    /// ExifTool could not run or reported failure.
    #[error("{:?} failed: {message}", program.display())]
    Failure { program: PathBuf, message: String },

    /// ExifTool output could not be decoded.
    #[error(transparent)]
    Decode(#[from] serde_json::Error),
}

/// Friendly result alias :3
pub type Result<T, E = ExifToolError> = std::result::Result<T, E>;
