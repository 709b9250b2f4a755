// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Tolerant GPX reading and writing.
//!
//! GPX files found in the wild come from many different devices and
//! applications. Some forget the timezone designator, some use vendor
//! extensions, some declare GPX 1.0 while using GPX 1.1 structure, and some
//! are simply truncated because the device ran out of battery mid-write.
//!
//! The reader here only cares about fixes: `<wpt>`, `<rtept>`, and `<trkpt>`
//! elements with their `<ele>` and `<time>` children. Everything else is
//! skipped. A broken fix never poisons the rest of the document:
//!
//! - Fixes with missing or unparsable coordinates are dropped.
//! - Fixes with unparsable timestamps are kept without a time, which means
//!   they cannot be used for matching.
//! - An XML syntax error ends the read, but every fix gathered before the
//!   error is still returned alongside the error itself.
//!
//! # See Also
//!
//! - [GPX 1.1 Schema](https://www.topografix.com/GPX/1/1/)

use crate::waypoint::{Waypoint, WaypointAndSource};

use chrono::{DateTime, NaiveDateTime, Utc};
use quick_xml::{
    escape::escape,
    events::{BytesStart, Event},
    Reader,
};
use std::{
    fmt::Write as FmtWrite,
    path::{Path, PathBuf},
};
use tracing::{instrument, warn};

/// Raw GPS fix as found in a GPX document.
#[derive(Debug, Clone, PartialEq)]
pub struct GpxFix {
    pub latitude: f64,
    pub longitude: f64,
    pub elevation: Option<f64>,
    pub time: Option<DateTime<Utc>>,
}

impl GpxFix {
    /// Convert into a waypoint if and only if the fix carries a timestamp.
    pub fn to_waypoint(&self) -> Option<Waypoint> {
        self.time.map(|time| Waypoint {
            latitude: self.latitude,
            longitude: self.longitude,
            elevation: self.elevation,
            time,
        })
    }
}

/// Result of reading one GPX document.
#[derive(Debug, Default)]
pub struct GpxDocument {
    /// All fixes with valid coordinates in document order.
    pub fixes: Vec<GpxFix>,

    /// Syntax error that stopped the read early, if any.
    pub error: Option<GpxError>,
}

impl GpxDocument {
    /// Extract every timestamped fix as a waypoint attributed to `source`.
    pub fn waypoints(&self, source: &str) -> Vec<WaypointAndSource> {
        self.fixes
            .iter()
            .filter_map(GpxFix::to_waypoint)
            .map(|waypoint| WaypointAndSource::new(waypoint, source))
            .collect()
    }

    /// Bounding interval of all fix timestamps.
    pub fn time_window(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        let mut times = self.fixes.iter().filter_map(|fix| fix.time);
        let first = times.next()?;
        Some(times.fold((first, first), |(start, end), time| {
            (start.min(time), end.max(time))
        }))
    }
}

/// Parse GPX text into fixes.
///
/// Never fails outright. See module documentation for tolerance rules.
pub fn parse_gpx(xml: &str) -> GpxDocument {
    let mut reader = Reader::from_str(xml);
    let mut document = GpxDocument::default();
    let mut current: Option<PendingFix> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => match current.as_mut() {
                Some(pending) => pending.open_child(&e),
                None if is_fix_element(&e) => current = Some(PendingFix::new(&e)),
                None => {}
            },
            Ok(Event::Empty(e)) => {
                if current.is_none() && is_fix_element(&e) {
                    if let Some(fix) = PendingFix::new(&e).finish() {
                        document.fixes.push(fix);
                    }
                }
            }
            Ok(Event::Text(e)) => {
                if let Some(pending) = current.as_mut() {
                    pending.push_text(std::str::from_utf8(e.as_ref()).unwrap_or_default());
                }
            }
            Ok(Event::CData(e)) => {
                if let Some(pending) = current.as_mut() {
                    pending.push_text(std::str::from_utf8(e.as_ref()).unwrap_or_default());
                }
            }
            Ok(Event::End(_)) => {
                if let Some(mut pending) = current.take() {
                    if pending.close_child() {
                        current = Some(pending);
                    } else if let Some(fix) = pending.finish() {
                        document.fixes.push(fix);
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(error) => {
                document.error = Some(GpxError::Xml {
                    position: reader.buffer_position(),
                    message: error.to_string(),
                });
                break;
            }
            _ => {}
        }
    }

    document
}

/// Read and parse GPX file at target path.
///
/// # Errors
///
/// - Return [`GpxError::Read`] if file cannot be read.
#[instrument(skip(path), level = "debug")]
pub async fn read_gpx_file(path: impl AsRef<Path>) -> Result<GpxDocument> {
    let path = path.as_ref();
    let bytes = tokio::fs::read(path).await.map_err(|err| GpxError::Read {
        source: err,
        path: path.to_path_buf(),
    })?;
    let document = parse_gpx(&String::from_utf8_lossy(&bytes));

    if let Some(error) = &document.error {
        warn!(
            "{} is malformed, keeping {} fixes read before error: {error}",
            path.display(),
            document.fixes.len()
        );
    }

    Ok(document)
}

/// Serialize waypoints as a single-track GPX 1.1 document.
pub fn write_gpx(track_name: &str, points: &[Waypoint]) -> String {
    let mut out = String::new();
    out.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    out.push_str(
        "<gpx version=\"1.1\" creator=\"geotagger\" xmlns=\"http://www.topografix.com/GPX/1/1\">\n",
    );
    out.push_str("  <trk>\n");
    let _ = writeln!(out, "    <name>{}</name>", escape(track_name));
    out.push_str("    <trkseg>\n");
    for point in points {
        let _ = write!(
            out,
            "      <trkpt lat=\"{}\" lon=\"{}\">",
            point.latitude, point.longitude
        );
        if let Some(elevation) = point.elevation {
            let _ = write!(out, "<ele>{elevation}</ele>");
        }
        let _ = writeln!(
            out,
            "<time>{}</time></trkpt>",
            point.time.format("%Y-%m-%dT%H:%M:%SZ")
        );
    }
    out.push_str("    </trkseg>\n");
    out.push_str("  </trk>\n");
    out.push_str("</gpx>\n");
    out
}

fn is_fix_element(e: &BytesStart<'_>) -> bool {
    matches!(e.local_name().as_ref(), b"wpt" | b"trkpt" | b"rtept")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FixField {
    Elevation,
    Time,
}

/// Fix under construction while its children are being read.
#[derive(Debug)]
struct PendingFix {
    coordinates: Option<(f64, f64)>,
    elevation: Option<f64>,
    time: Option<DateTime<Utc>>,
    depth: usize,
    field: Option<FixField>,
    text: String,
}

impl PendingFix {
    fn new(start: &BytesStart<'_>) -> Self {
        Self {
            coordinates: parse_lat_lon(start),
            elevation: None,
            time: None,
            depth: 0,
            field: None,
            text: String::new(),
        }
    }

    fn open_child(&mut self, start: &BytesStart<'_>) {
        self.depth += 1;

        // INVARIANT: Only direct children count, so `<time>` inside vendor
        // extensions never overrides the fix time.
        if self.depth == 1 {
            self.field = match start.local_name().as_ref() {
                b"ele" => Some(FixField::Elevation),
                b"time" => Some(FixField::Time),
                _ => None,
            };
            self.text.clear();
        }
    }

    fn push_text(&mut self, text: &str) {
        if self.field.is_some() && self.depth == 1 {
            self.text.push_str(text);
        }
    }

    /// Close a child element. Returns `false` when the fix element itself
    /// was closed.
    fn close_child(&mut self) -> bool {
        if self.depth == 0 {
            return false;
        }

        if self.depth == 1 {
            match self.field.take() {
                Some(FixField::Elevation) => self.elevation = self.text.trim().parse().ok(),
                Some(FixField::Time) => self.time = parse_gpx_time(&self.text),
                None => {}
            }
        }
        self.depth -= 1;

        true
    }

    fn finish(self) -> Option<GpxFix> {
        let (latitude, longitude) = self.coordinates?;
        Some(GpxFix {
            latitude,
            longitude,
            elevation: self.elevation,
            time: self.time,
        })
    }
}

fn parse_lat_lon(e: &BytesStart<'_>) -> Option<(f64, f64)> {
    let mut lat: Option<f64> = None;
    let mut lon: Option<f64> = None;

    for attr in e.attributes().flatten() {
        let value = std::str::from_utf8(&attr.value).unwrap_or_default().trim();
        match attr.key.local_name().as_ref() {
            b"lat" => lat = value.parse::<f64>().ok(),
            b"lon" => lon = value.parse::<f64>().ok(),
            _ => {}
        }
    }

    let (lat, lon) = (lat?, lon?);
    if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
        return None;
    }

    Some((lat, lon))
}

/// Parse GPX timestamp.
///
/// GPX mandates UTC, so timestamps missing a designator are read as UTC.
pub fn parse_gpx_time(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(time) = DateTime::parse_from_rfc3339(text) {
        return Some(time.with_timezone(&Utc));
    }

    NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

/// GPX handling error types.
#[derive(Debug, thiserror::Error)]
pub enum GpxError {
    /// GPX file cannot be read.
    #[error("failed to read GPX file at {:?}", path.display())]
    Read {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// XML syntax error ended the read early.
    #[error("XML syntax error at byte {position}: {message}")]
    Xml { position: u64, message: String },
}

/// Friendly result alias :3
pub type Result<T, E = GpxError> = std::result::Result<T, E>;
