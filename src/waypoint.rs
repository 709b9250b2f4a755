// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Timestamped GPS fixes and the time windows used to match them.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

/// A single GPS fix with a known UTC timestamp.
///
/// Fixes without a usable timestamp never become waypoints, so every waypoint
/// can take part in matching.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Waypoint {
    pub latitude: f64,
    pub longitude: f64,
    pub elevation: Option<f64>,
    pub time: DateTime<Utc>,
}

/// Waypoint paired with the name of the GPX source that produced it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WaypointAndSource {
    pub waypoint: Waypoint,
    pub source: String,
}

impl WaypointAndSource {
    pub fn new(waypoint: Waypoint, source: impl Into<String>) -> Self {
        Self {
            waypoint,
            source: source.into(),
        }
    }
}

/// Request for waypoints near a photo's adjusted capture time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeQuery {
    pub at: DateTime<Utc>,
    pub tolerance: Duration,
}

impl TimeQuery {
    pub fn new(at: DateTime<Utc>, tolerance: Duration) -> Self {
        Self { at, tolerance }
    }

    /// Earliest acceptable waypoint time.
    pub fn start(&self) -> DateTime<Utc> {
        self.at
            .checked_sub_signed(self.tolerance)
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Latest acceptable waypoint time.
    pub fn end(&self) -> DateTime<Utc> {
        self.at
            .checked_add_signed(self.tolerance)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Check if a waypoint time falls inside the tolerance window.
    pub fn accepts(&self, time: DateTime<Utc>) -> bool {
        time >= self.start() && time <= self.end()
    }

    /// Check if the closed interval `[start, end]` overlaps the tolerance
    /// window.
    pub fn overlaps(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        start <= self.end() && end >= self.start()
    }
}

/// Select the waypoint nearest in time to `query.at` inside the tolerance.
///
/// Ties keep the first waypoint found, so callers control precedence through
/// the order of `points`.
pub fn nearest_waypoint<'a>(
    points: &'a [WaypointAndSource],
    query: &TimeQuery,
) -> Option<&'a WaypointAndSource> {
    points
        .iter()
        .filter(|point| query.accepts(point.waypoint.time))
        .min_by_key(|point| (point.waypoint.time - query.at).abs())
}
