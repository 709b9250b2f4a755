// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Configuration layout.
//!
//! Specify the layout of the configuration file geotagger uses to simplify
//! the process of serialization and deserialization. File I/O is left to the
//! caller to figure out.

use crate::{
    elevation::{DEFAULT_BASE_URL, DEFAULT_DATASET},
    engine::TagOptions,
    source::StravaCredentials,
};

use serde::{Deserialize, Serialize};
use std::{
    fmt::{Display, Error as FmtError, Formatter, Result as FmtResult},
    path::PathBuf,
    str::FromStr,
};

/// Geotagger configuration layout.
///
/// # General Layout
///
/// The configuration is composed of three parts: settings, elevation, and
/// sources. The settings section controls how photos are matched and
/// written. The elevation section configures the service used for waypoints
/// that lack elevation. The source listing names every GPX source to match
/// against, in order of precedence.
///
/// ```toml
/// [settings]
/// point_must_be_within_minutes = 10
/// exiftool = "/usr/bin/exiftool"
///
/// [elevation]
/// enabled = true
///
/// [[source]]
/// kind = "directory"
/// path = "~/tracks"
/// recurse = true
/// ```
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct GeoTagConfig {
    /// Matching and writing settings.
    #[serde(default)]
    pub settings: Settings,

    /// Elevation lookup settings.
    #[serde(default)]
    pub elevation: ElevationSettings,

    /// Listing of GPX sources.
    #[serde(rename = "source", default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<SourceConfig>,
}

impl FromStr for GeoTagConfig {
    type Err = ConfigError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let mut config: GeoTagConfig = toml::de::from_str(data).map_err(ConfigError::Deserialize)?;

        // INVARIANT: Perform shell expansion on every path and credential field.
        if let Some(exiftool) = config.settings.exiftool.as_mut() {
            *exiftool = expand_path(exiftool)?;
        }

        for source in config.sources.iter_mut() {
            match source {
                SourceConfig::Directory { path, .. } => *path = expand_path(path)?,
                SourceConfig::Files { files } => {
                    for file in files.iter_mut() {
                        *file = expand_path(file)?;
                    }
                }
                SourceConfig::Strava {
                    cache_dir,
                    client_id,
                    client_secret,
                    refresh_token,
                    ..
                } => {
                    if let Some(dir) = cache_dir.as_mut() {
                        *dir = expand_path(dir)?;
                    }
                    *client_id = expand(client_id)?;
                    *client_secret = expand(client_secret)?;
                    *refresh_token = expand(refresh_token)?;
                }
            }
        }

        Ok(config)
    }
}

impl Display for GeoTagConfig {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(
            toml::ser::to_string_pretty(self)
                .map_err(ConfigError::Serialize)?
                .as_str(),
        )
    }
}

/// Matching and writing settings.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    /// Maximum minutes between capture time and waypoint time.
    pub point_must_be_within_minutes: i64,

    /// Camera clock drift in minutes added to capture times.
    pub adjust_created_time_in_minutes: i64,

    /// Match and report without writing.
    pub test_run: bool,

    /// Back up files before writing.
    pub create_backup: bool,

    /// Replace existing locations.
    pub overwrite_existing_lat_long: bool,

    /// Path to ExifTool executable, enabling the external backend.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exiftool: Option<PathBuf>,

    /// Always write longitude as west through ExifTool.
    pub exiftool_force_west_longitude: bool,
}

impl Default for Settings {
    fn default() -> Self {
        let options = TagOptions::default();
        Self {
            point_must_be_within_minutes: options.point_must_be_within_minutes,
            adjust_created_time_in_minutes: options.adjust_created_time_in_minutes,
            test_run: options.test_run,
            create_backup: options.create_backup,
            overwrite_existing_lat_long: options.overwrite_existing_lat_long,
            exiftool: None,
            exiftool_force_west_longitude: true,
        }
    }
}

impl Settings {
    /// Engine options described by these settings.
    pub fn tag_options(&self) -> TagOptions {
        TagOptions {
            point_must_be_within_minutes: self.point_must_be_within_minutes,
            adjust_created_time_in_minutes: self.adjust_created_time_in_minutes,
            test_run: self.test_run,
            create_backup: self.create_backup,
            overwrite_existing_lat_long: self.overwrite_existing_lat_long,
        }
    }
}

/// Elevation lookup settings.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ElevationSettings {
    /// Look up missing elevations.
    pub enabled: bool,

    /// OpenTopoData server.
    pub base_url: String,

    /// OpenTopoData dataset name.
    pub dataset: String,
}

impl Default for ElevationSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: DEFAULT_BASE_URL.into(),
            dataset: DEFAULT_DATASET.into(),
        }
    }
}

/// Default number of days searched around a capture time on Strava.
pub const DEFAULT_SEARCH_DAYS: i64 = 3;

fn default_search_days() -> i64 {
    DEFAULT_SEARCH_DAYS
}

/// GPX source definition.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SourceConfig {
    /// Directory of GPX files.
    Directory {
        path: PathBuf,
        #[serde(default)]
        recurse: bool,
    },

    /// Explicit listing of GPX files.
    Files { files: Vec<PathBuf> },

    /// Strava activities.
    Strava {
        /// Local track cache, defaults to the user cache directory.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cache_dir: Option<PathBuf>,
        #[serde(default)]
        client_id: String,
        #[serde(default)]
        client_secret: String,
        #[serde(default)]
        refresh_token: String,
        #[serde(default = "default_search_days")]
        search_days: i64,
    },
}

impl SourceConfig {
    /// Strava credentials of this source, if it is a Strava source.
    pub fn strava_credentials(&self) -> Option<StravaCredentials> {
        match self {
            Self::Strava {
                client_id,
                client_secret,
                refresh_token,
                ..
            } => Some(StravaCredentials {
                client_id: client_id.clone(),
                client_secret: client_secret.clone(),
                refresh_token: refresh_token.clone(),
            }),
            _ => None,
        }
    }
}

fn expand(text: &str) -> Result<String> {
    Ok(shellexpand::full(text)
        .map_err(ConfigError::ShellExpansion)?
        .into_owned())
}

fn expand_path(path: &std::path::Path) -> Result<PathBuf> {
    expand(path.to_string_lossy().as_ref()).map(PathBuf::from)
}

/// Configuration error types.
#[derive(Clone, Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to deserialize configuration.
    #[error(transparent)]
    Deserialize(#[from] toml::de::Error),

    /// Failed to serialize configuration.
    #[error(transparent)]
    Serialize(#[from] toml::ser::Error),

    /// Failed to perform shell expansion on configuration.
    #[error(transparent)]
    ShellExpansion(#[from] shellexpand::LookupError<std::env::VarError>),
}

impl From<ConfigError> for FmtError {
    fn from(_: ConfigError) -> Self {
        FmtError
    }
}

/// Friendly result alias :3
type Result<T, E = ConfigError> = std::result::Result<T, E>;
