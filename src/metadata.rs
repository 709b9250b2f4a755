// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Photo metadata reading and writing.
//!
//! Two backends exist, chosen per file by extension:
//!
//! 1. [`WriteStrategy::EmbeddedLibrary`]: in-process EXIF handling for JPEG
//!    and PNG files.
//! 2. [`WriteStrategy::ExternalTool`]: the ExifTool executable for everything
//!    else it understands, only available when ExifTool is configured.
//!
//! Whatever the backend, an XMP sidecar beside the photo is consulted for
//! any location or capture time the file itself lacks.

pub mod embedded;
pub mod exiftool;
pub mod xmp;

pub use exiftool::{ExifTool, ExifToolError};

use crate::elevation::ElevationLookup;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::{
    collections::HashMap,
    fmt::{Display, Formatter, Result as FmtResult},
    path::{Path, PathBuf},
};
use tracing::{debug, instrument, warn};

/// Extensions the embedded backend handles.
pub const EMBEDDED_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// Extensions routed to ExifTool when it is configured.
pub const EXIFTOOL_EXTENSIONS: [&str; 24] = [
    "tif", "tiff", "heic", "heif", "avif", "webp", "jxl", "dng", "cr2", "cr3", "crw", "nef",
    "nrw", "arw", "srf", "sr2", "orf", "rw2", "raf", "pef", "srw", "x3f", "mp4", "mov",
];

/// Geographic position of a photo.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
    pub elevation: Option<f64>,
}

impl Location {
    pub fn new(latitude: f64, longitude: f64, elevation: Option<f64>) -> Self {
        Self {
            latitude,
            longitude,
            elevation,
        }
    }

    /// Check that coordinates are in range and not the null island
    /// placeholder `(0, 0)` many cameras write without a fix.
    pub fn is_valid(&self) -> bool {
        (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
            && !(self.latitude == 0.0 && self.longitude == 0.0)
    }
}

/// Backend used to read and write a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WriteStrategy {
    EmbeddedLibrary,
    ExternalTool,
}

impl Display for WriteStrategy {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::EmbeddedLibrary => fmt.write_str("embedded"),
            Self::ExternalTool => fmt.write_str("exiftool"),
        }
    }
}

/// Extension to backend lookup table.
///
/// Built once. When an extension shows up in both lists, the embedded
/// backend wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrategyTable {
    table: HashMap<String, WriteStrategy>,
}

impl StrategyTable {
    /// Construct table from explicit extension lists.
    pub fn from_lists<'a>(
        embedded: impl IntoIterator<Item = &'a str>,
        external: impl IntoIterator<Item = &'a str>,
    ) -> Self {
        let mut table = HashMap::new();
        for extension in external {
            table.insert(extension.to_ascii_lowercase(), WriteStrategy::ExternalTool);
        }

        // INVARIANT: Embedded entries overwrite external ones.
        for extension in embedded {
            table.insert(extension.to_ascii_lowercase(), WriteStrategy::EmbeddedLibrary);
        }

        Self { table }
    }

    /// Construct default table, routing to ExifTool only if available.
    pub fn new(exiftool_available: bool) -> Self {
        let external: &[&str] = if exiftool_available {
            &EXIFTOOL_EXTENSIONS
        } else {
            &[]
        };

        Self::from_lists(EMBEDDED_EXTENSIONS, external.iter().copied())
    }

    /// Backend for target file, or `None` if unsupported.
    pub fn strategy_for(&self, path: &Path) -> Option<WriteStrategy> {
        let extension = path.extension()?.to_str()?.to_ascii_lowercase();
        self.table.get(&extension).copied()
    }

    /// Every supported extension, sorted.
    pub fn extensions(&self) -> Vec<&str> {
        let mut extensions: Vec<&str> = self.table.keys().map(String::as_str).collect();
        extensions.sort_unstable();
        extensions
    }
}

/// Metadata relevant to geotagging.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct PhotoMetadata {
    pub location: Option<Location>,
    pub captured_on: Option<DateTime<Utc>>,
}

/// Reads and writes photo metadata through the appropriate backend.
#[derive(Debug, Clone)]
pub struct MetadataAdapter {
    strategies: StrategyTable,
    exiftool: Option<ExifTool>,
}

impl MetadataAdapter {
    /// Construct new adapter.
    pub fn new(exiftool: Option<ExifTool>) -> Self {
        Self {
            strategies: StrategyTable::new(exiftool.is_some()),
            exiftool,
        }
    }

    pub fn strategies(&self) -> &StrategyTable {
        &self.strategies
    }

    pub fn exiftool(&self) -> Option<&ExifTool> {
        self.exiftool.as_ref()
    }

    /// Backend for target file, or `None` if unsupported.
    pub fn strategy_for(&self, path: &Path) -> Option<WriteStrategy> {
        self.strategies.strategy_for(path)
    }

    /// Read location and UTC capture time of target file.
    ///
    /// Anything missing from the file itself is taken from its XMP sidecar
    /// when one exists.
    ///
    /// # Errors
    ///
    /// - Return [`MetadataError::Unsupported`] if no backend handles the file.
    /// - Return [`MetadataError::Read`] if the file cannot be read.
    /// - Return [`MetadataError::ExifTool`] if ExifTool fails.
    #[instrument(skip(self, path), level = "debug")]
    pub async fn read(&self, path: &Path) -> Result<PhotoMetadata> {
        let mut metadata = match self.backend(path)? {
            Backend::Embedded => {
                let bytes = tokio::fs::read(path).await.map_err(|err| MetadataError::Read {
                    source: err,
                    path: path.to_path_buf(),
                })?;
                embedded::read_exif(&bytes)
                    .map(|exif| PhotoMetadata {
                        location: embedded::location_from_exif(&exif),
                        captured_on: embedded::captured_on_from_exif(&exif),
                    })
                    .unwrap_or_default()
            }
            Backend::External(tool) => {
                let info = tool.read(path).await?;
                PhotoMetadata {
                    location: info.location(),
                    captured_on: info.captured_on(),
                }
            }
        };

        if metadata.location.is_none() || metadata.captured_on.is_none() {
            if let Some(sidecar) = xmp::find_sidecar(path).await {
                debug!("consulting XMP sidecar {}", sidecar.display());
                match tokio::fs::read(&sidecar).await {
                    Ok(bytes) => {
                        let xmp = xmp::parse_xmp(&String::from_utf8_lossy(&bytes));
                        metadata.location = metadata.location.or_else(|| xmp.location());
                        metadata.captured_on = metadata.captured_on.or_else(|| xmp.captured_on());
                    }
                    Err(error) => warn!("cannot read sidecar {}: {error}", sidecar.display()),
                }
            }
        }

        Ok(metadata)
    }

    /// Check if target file already carries a valid location.
    ///
    /// # Errors
    ///
    /// - Return [`MetadataError`] if metadata cannot be read.
    pub async fn has_location(&self, path: &Path) -> Result<bool> {
        Ok(self.read(path).await?.location.is_some())
    }

    /// Read location of target file.
    ///
    /// A missing elevation is filled in through `lookup` when given. Lookup
    /// failures are logged and otherwise ignored.
    ///
    /// # Errors
    ///
    /// - Return [`MetadataError`] if metadata cannot be read.
    pub async fn read_location(
        &self,
        path: &Path,
        lookup: Option<&dyn ElevationLookup>,
    ) -> Result<Option<Location>> {
        let Some(mut location) = self.read(path).await?.location else {
            return Ok(None);
        };

        if let (None, Some(lookup)) = (location.elevation, lookup) {
            match lookup.elevation(location.latitude, location.longitude).await {
                Ok(elevation) => location.elevation = Some(elevation),
                Err(error) => warn!("elevation lookup failed for {}: {error}", path.display()),
            }
        }

        Ok(Some(location))
    }

    /// Read UTC capture time of target file.
    ///
    /// # Errors
    ///
    /// - Return [`MetadataError`] if metadata cannot be read.
    pub async fn read_utc_captured_on(&self, path: &Path) -> Result<Option<DateTime<Utc>>> {
        Ok(self.read(path).await?.captured_on)
    }

    /// Write location into target file in place.
    ///
    /// # Errors
    ///
    /// - Return [`MetadataError::Unsupported`] if no backend handles the file.
    /// - Return [`MetadataError::Read`] or [`MetadataError::Write`] on I/O
    ///   failure.
    /// - Return [`MetadataError::Embedded`] if the image cannot be rebuilt.
    /// - Return [`MetadataError::ExifTool`] if ExifTool fails.
    #[instrument(skip(self, path, location), level = "debug")]
    pub async fn write_location(&self, path: &Path, location: &Location) -> Result<()> {
        match self.backend(path)? {
            Backend::Embedded => {
                let container = path
                    .extension()
                    .and_then(|ext| ext.to_str())
                    .map(str::to_ascii_lowercase)
                    .and_then(|ext| embedded::Container::from_extension(&ext))
                    .ok_or_else(|| MetadataError::Unsupported {
                        path: path.to_path_buf(),
                    })?;

                let bytes = tokio::fs::read(path).await.map_err(|err| MetadataError::Read {
                    source: err,
                    path: path.to_path_buf(),
                })?;
                let output = embedded::write_location(bytes, container, location).map_err(
                    |err| MetadataError::Embedded {
                        source: err,
                        path: path.to_path_buf(),
                    },
                )?;
                tokio::fs::write(path, output)
                    .await
                    .map_err(|err| MetadataError::Write {
                        source: err,
                        path: path.to_path_buf(),
                    })?;
            }
            Backend::External(tool) => tool.write_location(path, location).await?,
        }

        debug!(
            "wrote ({}, {}) into {}",
            location.latitude,
            location.longitude,
            path.display()
        );
        Ok(())
    }

    fn backend(&self, path: &Path) -> Result<Backend<'_>> {
        match (self.strategy_for(path), self.exiftool.as_ref()) {
            (Some(WriteStrategy::EmbeddedLibrary), _) => Ok(Backend::Embedded),
            (Some(WriteStrategy::ExternalTool), Some(tool)) => Ok(Backend::External(tool)),
            _ => Err(MetadataError::Unsupported {
                path: path.to_path_buf(),
            }),
        }
    }
}

enum Backend<'a> {
    Embedded,
    External(&'a ExifTool),
}

/// Metadata error types.
#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
    /// No backend handles this file type.
    #[error("unsupported file type {:?}", path.display())]
    Unsupported { path: PathBuf },

    /// File cannot be read.
    #[error("failed to read {:?}", path.display())]
    Read {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// File cannot be written.
    #[error("failed to write {:?}", path.display())]
    Write {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Embedded metadata cannot be rebuilt.
    #[error("failed to rebuild metadata of {:?}", path.display())]
    Embedded {
        #[source]
        source: embedded::EmbeddedError,
        path: PathBuf,
    },

    /// ExifTool failed.
    #[error(transparent)]
    ExifTool(#[from] ExifToolError),
}

/// Friendly result alias :3
pub type Result<T, E = MetadataError> = std::result::Result<T, E>;
