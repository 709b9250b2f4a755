// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Strava activities as a waypoint source.
//!
//! Each capture time is answered on its own: activities started within
//! `search_days` of the capture time are listed, and the first activity
//! whose recording interval overlaps the capture time (plus tolerance) has
//! its track loaded. Tracks are cached in a local directory as
//! `strava-{id}.gpx`, so an activity is only ever downloaded once.
//!
//! # See Also
//!
//! - [Strava API v3](https://developers.strava.com/docs/reference/)

use crate::{
    gpx::{read_gpx_file, write_gpx},
    progress::Progress,
    source::{index::source_name, GpxSource, Result, SourceError},
    waypoint::{TimeQuery, Waypoint, WaypointAndSource},
};

use chrono::{DateTime, Duration, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::{
    collections::HashSet,
    path::{Path, PathBuf},
};
use tracing::{debug, info, instrument, warn};

const STRAVA_API_URL: &str = "https://www.strava.com/api/v3";
const STRAVA_TOKEN_URL: &str = "https://www.strava.com/oauth/token";
const PAGE_SIZE: usize = 100;
const MAX_PAGES: usize = 10;

/// OAuth credentials for the Strava API.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct StravaCredentials {
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
}

impl StravaCredentials {
    /// Check that every credential field is filled in.
    ///
    /// # Errors
    ///
    /// - Return [`SourceError::MissingCredentials`] naming the first empty
    ///   field.
    pub fn validate(&self) -> Result<()> {
        let missing = if self.client_id.trim().is_empty() {
            "client_id"
        } else if self.client_secret.trim().is_empty() {
            "client_secret"
        } else if self.refresh_token.trim().is_empty() {
            "refresh_token"
        } else {
            return Ok(());
        };

        Err(SourceError::MissingCredentials {
            service: "Strava",
            missing,
        })
    }
}

/// Recorded activity summary.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ActivitySummary {
    pub id: u64,
    #[serde(default)]
    pub name: String,
    pub start_date: DateTime<Utc>,
    /// Elapsed time in seconds.
    pub elapsed_time: i64,
}

impl ActivitySummary {
    /// Time the activity recording stopped.
    ///
    /// Falls back to the start time if the elapsed time is out of range.
    pub fn end_date(&self) -> DateTime<Utc> {
        Duration::try_seconds(self.elapsed_time)
            .and_then(|elapsed| self.start_date.checked_add_signed(elapsed))
            .unwrap_or(self.start_date)
    }
}

/// Layer of indirection for remote activity access.
pub trait ActivityService: Send + Sync {
    /// List activities started inside `[after, before]`.
    fn activities<'a>(
        &'a self,
        after: DateTime<Utc>,
        before: DateTime<Utc>,
    ) -> BoxFuture<'a, Result<Vec<ActivitySummary>>>;

    /// Download the timestamped track of an activity.
    fn track<'a>(&'a self, activity: &'a ActivitySummary) -> BoxFuture<'a, Result<Vec<Waypoint>>>;
}

/// Strava API client through reqwest.
#[derive(Debug, Clone)]
pub struct StravaClient {
    http: reqwest::Client,
    base_url: String,
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct StreamSet {
    latlng: Option<Stream<[f64; 2]>>,
    time: Option<Stream<i64>>,
    altitude: Option<Stream<f64>>,
}

#[derive(Debug, Deserialize)]
struct Stream<T> {
    data: Vec<T>,
}

impl StravaClient {
    /// Connect by exchanging the refresh token for an access token.
    ///
    /// # Errors
    ///
    /// - Return [`SourceError::MissingCredentials`] if credentials are
    ///   incomplete.
    /// - Return [`SourceError::Http`] or [`SourceError::Status`] if the
    ///   token exchange fails.
    #[instrument(skip(credentials), level = "debug")]
    pub async fn connect(credentials: &StravaCredentials) -> Result<Self> {
        credentials.validate()?;
        let http = http_client()?;

        info!("exchange Strava refresh token for access token");
        let response = http
            .post(STRAVA_TOKEN_URL)
            .form(&[
                ("client_id", credentials.client_id.as_str()),
                ("client_secret", credentials.client_secret.as_str()),
                ("grant_type", "refresh_token"),
                ("refresh_token", credentials.refresh_token.as_str()),
            ])
            .send()
            .await?;
        let token: TokenResponse = checked(response).await?.json().await?;

        Ok(Self {
            http,
            base_url: STRAVA_API_URL.into(),
            access_token: token.access_token,
        })
    }

    /// Construct client from an already valid access token.
    ///
    /// # Errors
    ///
    /// - Return [`SourceError::Http`] if the HTTP client cannot be built.
    pub fn with_access_token(
        access_token: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Result<Self> {
        Ok(Self {
            http: http_client()?,
            base_url: base_url.into(),
            access_token: access_token.into(),
        })
    }

    async fn list_page(
        &self,
        after: DateTime<Utc>,
        before: DateTime<Utc>,
        page: usize,
    ) -> Result<Vec<ActivitySummary>> {
        let response = self
            .http
            .get(format!("{}/athlete/activities", self.base_url))
            .bearer_auth(&self.access_token)
            .query(&[
                ("after", after.timestamp().to_string()),
                ("before", before.timestamp().to_string()),
                ("page", page.to_string()),
                ("per_page", PAGE_SIZE.to_string()),
            ])
            .send()
            .await?;

        Ok(checked(response).await?.json().await?)
    }
}

impl ActivityService for StravaClient {
    fn activities<'a>(
        &'a self,
        after: DateTime<Utc>,
        before: DateTime<Utc>,
    ) -> BoxFuture<'a, Result<Vec<ActivitySummary>>> {
        Box::pin(async move {
            let mut activities = Vec::new();
            for page in 1..=MAX_PAGES {
                let batch = self.list_page(after, before, page).await?;
                let done = batch.len() < PAGE_SIZE;
                activities.extend(batch);
                if done {
                    break;
                }
            }

            debug!("listed {} Strava activities", activities.len());
            Ok(activities)
        })
    }

    fn track<'a>(&'a self, activity: &'a ActivitySummary) -> BoxFuture<'a, Result<Vec<Waypoint>>> {
        Box::pin(async move {
            let response = self
                .http
                .get(format!("{}/activities/{}/streams", self.base_url, activity.id))
                .bearer_auth(&self.access_token)
                .query(&[("keys", "time,latlng,altitude"), ("key_by_type", "true")])
                .send()
                .await?;
            let streams: StreamSet = checked(response).await?.json().await?;

            Ok(streams_to_waypoints(activity.start_date, streams))
        })
    }
}

fn http_client() -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(60))
        .build()?)
}

async fn checked(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(SourceError::Status {
        service: "Strava",
        status,
        body,
    })
}

fn streams_to_waypoints(start: DateTime<Utc>, streams: StreamSet) -> Vec<Waypoint> {
    let (Some(latlng), Some(time)) = (streams.latlng, streams.time) else {
        return Vec::new();
    };
    let altitude = streams.altitude.map(|stream| stream.data).unwrap_or_default();

    latlng
        .data
        .iter()
        .zip(time.data.iter())
        .enumerate()
        .filter_map(|(index, ([latitude, longitude], offset))| {
            let time = Duration::try_seconds(*offset)
                .and_then(|offset| start.checked_add_signed(offset))?;
            Some(Waypoint {
                latitude: *latitude,
                longitude: *longitude,
                elevation: altitude.get(index).copied(),
                time,
            })
        })
        .collect()
}

/// Strava activities cached locally as GPX.
pub struct StravaSource<S = StravaClient>
where
    S: ActivityService,
{
    service: S,
    cache_dir: PathBuf,
    search_days: i64,
}

impl<S> StravaSource<S>
where
    S: ActivityService,
{
    /// Construct new Strava source.
    pub fn new(service: S, cache_dir: impl Into<PathBuf>, search_days: i64) -> Self {
        Self {
            service,
            cache_dir: cache_dir.into(),
            search_days: search_days.max(0),
        }
    }

    /// Directory holding cached activity tracks.
    pub fn cache_dir(&self) -> &Path {
        self.cache_dir.as_path()
    }

    fn cache_path(&self, activity: &ActivitySummary) -> PathBuf {
        self.cache_dir.join(format!("strava-{}.gpx", activity.id))
    }

    #[instrument(skip(self, activity, progress), level = "debug")]
    async fn load_track(
        &self,
        activity: &ActivitySummary,
        progress: &dyn Progress,
    ) -> Result<Vec<WaypointAndSource>> {
        let path = self.cache_path(activity);
        let name = source_name(&path);

        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            debug!("using cached track {}", path.display());
            return Ok(read_gpx_file(&path).await?.waypoints(&name));
        }

        progress.report(&format!(
            "Downloading Strava activity {} ({})",
            activity.id, activity.name
        ));
        let track = self.service.track(activity).await?;

        tokio::fs::create_dir_all(&self.cache_dir)
            .await
            .map_err(|err| SourceError::Cache {
                source: err,
                path: self.cache_dir.clone(),
            })?;
        tokio::fs::write(&path, write_gpx(&activity.name, &track))
            .await
            .map_err(|err| SourceError::Cache {
                source: err,
                path: path.clone(),
            })?;

        Ok(track
            .into_iter()
            .map(|waypoint| WaypointAndSource::new(waypoint, name.clone()))
            .collect())
    }
}

impl<S> GpxSource for StravaSource<S>
where
    S: ActivityService,
{
    fn name(&self) -> String {
        format!("Strava (cache {})", self.cache_dir.display())
    }

    fn points<'a>(
        &'a mut self,
        queries: &'a [TimeQuery],
        progress: &'a dyn Progress,
    ) -> BoxFuture<'a, Result<Vec<WaypointAndSource>>> {
        Box::pin(async move {
            let mut points = Vec::new();
            let mut known: Vec<ActivitySummary> = Vec::new();
            let mut loaded = HashSet::new();
            let mut searched = false;
            let mut last_error = None;
            let window = Duration::try_days(self.search_days).unwrap_or(Duration::MAX);

            for query in queries {
                // INVARIANT: Skip remote search if an already loaded activity covers this query.
                if known
                    .iter()
                    .any(|activity| query.overlaps(activity.start_date, activity.end_date()))
                {
                    continue;
                }

                progress.report(&format!("Searching Strava activities near {}", query.at));
                let after = query
                    .at
                    .checked_sub_signed(window)
                    .unwrap_or(DateTime::<Utc>::MIN_UTC);
                let before = query
                    .at
                    .checked_add_signed(window)
                    .unwrap_or(DateTime::<Utc>::MAX_UTC);
                let activities = match self.service.activities(after, before).await {
                    Ok(activities) => activities,
                    Err(error) => {
                        warn!("Strava search near {} failed: {error}", query.at);
                        last_error = Some(error);
                        continue;
                    }
                };
                searched = true;

                let Some(activity) = activities
                    .into_iter()
                    .find(|activity| query.overlaps(activity.start_date, activity.end_date()))
                else {
                    debug!("no Strava activity covers {}", query.at);
                    continue;
                };

                if loaded.insert(activity.id) {
                    match self.load_track(&activity, progress).await {
                        Ok(track) => points.extend(track),
                        Err(error) => warn!("skipping Strava activity {}: {error}", activity.id),
                    }
                }
                known.push(activity);
            }

            // INVARIANT: Only fail outright when no search succeeded at all.
            match last_error {
                Some(error) if !searched && points.is_empty() => Err(error),
                _ => Ok(points),
            }
        })
    }
}
