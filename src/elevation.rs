// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Best-effort elevation lookup.
//!
//! Plenty of GPS recorders never log altitude, so a waypoint can arrive
//! without any elevation at all. When that happens an external elevation
//! service can fill the gap. Lookups are strictly best-effort: callers log a
//! failed lookup and carry on without elevation.
//!
//! # See Also
//!
//! - [OpenTopoData API](https://www.opentopodata.org/api/)

use futures::future::BoxFuture;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, instrument};

/// Default OpenTopoData server.
pub const DEFAULT_BASE_URL: &str = "https://api.opentopodata.org";

/// Default OpenTopoData dataset.
pub const DEFAULT_DATASET: &str = "srtm30m";

/// Anything that can resolve an elevation in meters for a coordinate.
pub trait ElevationLookup: Send + Sync {
    fn elevation(&self, latitude: f64, longitude: f64) -> BoxFuture<'_, Result<f64>>;
}

/// OpenTopoData elevation service.
#[derive(Debug, Clone)]
pub struct OpenTopoData {
    http: reqwest::Client,
    base_url: String,
    dataset: String,
}

#[derive(Debug, Deserialize)]
struct LookupResponse {
    status: String,
    #[serde(default)]
    results: Vec<LookupResult>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LookupResult {
    elevation: Option<f64>,
}

impl OpenTopoData {
    /// Construct new OpenTopoData client.
    ///
    /// # Errors
    ///
    /// - Return [`ElevationError::Http`] if HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>, dataset: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            dataset: dataset.into(),
        })
    }

    /// Full lookup URL for a coordinate.
    pub fn lookup_url(&self, latitude: f64, longitude: f64) -> String {
        format!(
            "{}/v1/{}?locations={latitude},{longitude}",
            self.base_url, self.dataset
        )
    }

    #[instrument(skip(self), level = "debug")]
    async fn lookup(&self, latitude: f64, longitude: f64) -> Result<f64> {
        let response = self
            .http
            .get(self.lookup_url(latitude, longitude))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ElevationError::Status { status, body });
        }

        let body: LookupResponse = response.json().await?;
        let elevation = interpret(body)?;
        debug!("elevation at ({latitude}, {longitude}) is {elevation}m");

        Ok(elevation)
    }
}

impl ElevationLookup for OpenTopoData {
    fn elevation(&self, latitude: f64, longitude: f64) -> BoxFuture<'_, Result<f64>> {
        Box::pin(self.lookup(latitude, longitude))
    }
}

fn interpret(body: LookupResponse) -> Result<f64> {
    if body.status != "OK" {
        return Err(ElevationError::Service(
            body.error.unwrap_or(body.status),
        ));
    }

    body.results
        .first()
        .and_then(|result| result.elevation)
        .ok_or(ElevationError::NoData)
}

/// Elevation lookup error types.
#[derive(Debug, thiserror::Error)]
pub enum ElevationError {
    /// Request could not be completed.
    #[error(transparent)]
    Http(#[from] reqwest::Error),

    /// Service answered with an error status code.
    #[error("elevation service failed with status {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },

    /// Service reported an error in its response body.
    #[error("elevation service error: {0}")]
    Service(String),

    /// Service has no elevation for the coordinate.
    #[error("elevation service has no data for this location")]
    NoData,
}

/// Friendly result alias :3
pub type Result<T, E = ElevationError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn decode(json: &str) -> LookupResponse {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn lookup_url_layout() -> anyhow::Result<()> {
        let service = OpenTopoData::new("https://example.org/", "srtm90m")?;
        assert_eq!(
            service.lookup_url(45.5, -122.25),
            "https://example.org/v1/srtm90m?locations=45.5,-122.25"
        );

        Ok(())
    }

    #[test]
    fn ok_response_yields_elevation() {
        let body = decode(r#"{"status": "OK", "results": [{"elevation": 55.3, "dataset": "srtm30m"}]}"#);
        assert_eq!(interpret(body).unwrap(), 55.3);
    }

    #[test]
    fn null_elevation_is_no_data() {
        let body = decode(r#"{"status": "OK", "results": [{"elevation": null}]}"#);
        assert!(matches!(interpret(body), Err(ElevationError::NoData)));
    }

    #[test]
    fn error_status_is_reported() {
        let body = decode(r#"{"status": "INVALID_REQUEST", "error": "Invalid locations"}"#);
        let result = interpret(body);
        assert!(matches!(result, Err(ElevationError::Service(message)) if message == "Invalid locations"));
    }
}
