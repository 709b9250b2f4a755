// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Matching and tagging engine.
//!
//! A tagging run walks each input file through a small state machine:
//!
//! ```text
//! Pending -> NotSupported | FileNotFound | HasLocationSkip | NoUtcTime | NoMatch | Matched
//! Matched -> BackupError | WriteSuccess | WriteError | TestSuccessNoWrite
//! ```
//!
//! The run happens in three passes. First every file's metadata is read to
//! settle the cheap terminal states and find the adjusted capture times.
//! Then every GPX source is asked once for waypoints near all of those
//! times. Last every remaining candidate is matched against the merged
//! waypoints and written.
//!
//! Nothing that goes wrong with one file stops the batch. Every failure ends
//! up as an outcome in the returned [`GeoTagResult`].

use crate::{
    backup::backup_file,
    elevation::ElevationLookup,
    metadata::{Location, MetadataAdapter, MetadataError, WriteStrategy},
    progress::Progress,
    report::{BatchReport, GeoTagFileResult, GeoTagResult, TagOutcome},
    source::GpxSource,
    waypoint::{nearest_waypoint, TimeQuery, WaypointAndSource},
};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::{
    error::Error as StdError,
    fmt::{Display, Formatter, Result as FmtResult},
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};
use tracing::{debug, info, instrument, warn};

/// Shared flag that stops a run between files once set.
pub type CancelFlag = Arc<AtomicBool>;

/// Note recorded for photos without a zoned capture time.
pub const NO_VALID_TIME_ZONE: &str = "No Valid TagTimeZone";

/// Knobs for a tagging run.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct TagOptions {
    /// Maximum distance in minutes between capture time and waypoint time.
    pub point_must_be_within_minutes: i64,

    /// Camera clock drift added to every capture time.
    pub adjust_created_time_in_minutes: i64,

    /// Match and report without writing anything.
    pub test_run: bool,

    /// Copy each file into `PwGeoTagBackup` before writing.
    pub create_backup: bool,

    /// Replace locations files already carry.
    pub overwrite_existing_lat_long: bool,
}

impl Default for TagOptions {
    fn default() -> Self {
        Self {
            point_must_be_within_minutes: 10,
            adjust_created_time_in_minutes: 0,
            test_run: false,
            create_backup: true,
            overwrite_existing_lat_long: false,
        }
    }
}

impl TagOptions {
    /// Tolerance around each capture time.
    ///
    /// Saturates at [`Duration::MAX`] for tolerances chrono cannot represent.
    pub fn tolerance(&self) -> Duration {
        Duration::try_minutes(self.point_must_be_within_minutes.saturating_abs())
            .unwrap_or(Duration::MAX)
    }

    /// Apply camera clock drift to a capture time.
    ///
    /// Returns `None` if the adjusted time falls outside chrono's range.
    pub fn adjust(&self, captured_on: DateTime<Utc>) -> Option<DateTime<Utc>> {
        Duration::try_minutes(self.adjust_created_time_in_minutes)
            .and_then(|drift| captured_on.checked_add_signed(drift))
    }
}

impl Display for TagOptions {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        write!(
            fmt,
            "within {} minutes, adjust {} minutes, test run {}, backups {}, overwrite {}",
            self.point_must_be_within_minutes,
            self.adjust_created_time_in_minutes,
            self.test_run,
            self.create_backup,
            self.overwrite_existing_lat_long,
        )
    }
}

/// Photo that passed every metadata check and waits for a match.
#[derive(Debug, Clone)]
struct Candidate {
    file: PathBuf,
    strategy: WriteStrategy,
    adjusted: DateTime<Utc>,
}

#[derive(Debug)]
enum Slot {
    Done(GeoTagFileResult),
    Candidate(Candidate),
}

/// Geotags batches of photos from GPX sources.
pub struct GeoTagger {
    metadata: MetadataAdapter,
    elevation: Option<Box<dyn ElevationLookup>>,
    options: TagOptions,
    cancel: Option<CancelFlag>,
}

impl GeoTagger {
    /// Construct new tagger.
    pub fn new(metadata: MetadataAdapter, options: TagOptions) -> Self {
        Self {
            metadata,
            elevation: None,
            options,
            cancel: None,
        }
    }

    /// Fill missing waypoint elevations through target lookup.
    pub fn with_elevation(mut self, lookup: impl ElevationLookup + 'static) -> Self {
        self.elevation = Some(Box::new(lookup));
        self
    }

    /// Stop between files once target flag is set.
    pub fn with_cancel(mut self, flag: CancelFlag) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn options(&self) -> &TagOptions {
        &self.options
    }

    pub fn metadata(&self) -> &MetadataAdapter {
        &self.metadata
    }

    /// Tag every file from waypoints of every source.
    ///
    /// Sources are consulted in order. When two waypoints are equally close
    /// to a capture time, the one from the earlier source wins.
    #[instrument(skip_all, level = "debug")]
    pub async fn tag(
        &self,
        files: &[PathBuf],
        sources: &mut [Box<dyn GpxSource>],
        progress: &dyn Progress,
    ) -> GeoTagResult {
        let mut report = BatchReport::new("GeoTag");

        if files.is_empty() {
            report.set_title("GeoTag - No Files");
            report.note("No files were given to tag.");
            return report.finish();
        }

        if sources.is_empty() {
            report.set_title("GeoTag - No GPX Sources");
            report.note("No GPX sources were given to match against.");
            return report.finish();
        }

        let names: Vec<String> = sources.iter().map(|source| source.name()).collect();
        report.header(files.len(), &names, &self.options);
        if !self.options.create_backup && !self.options.test_run {
            report.warning("running without backups is risky");
        }

        let mut slots = Vec::with_capacity(files.len());
        for (index, file) in files.iter().enumerate() {
            if self.is_cancelled() {
                break;
            }

            progress.report(&format!(
                "Reading metadata {} of {}: {}",
                index + 1,
                files.len(),
                file.display()
            ));
            slots.push(self.inspect(file).await);
        }

        let queries: Vec<TimeQuery> = slots
            .iter()
            .filter_map(|slot| match slot {
                Slot::Candidate(candidate) => {
                    Some(TimeQuery::new(candidate.adjusted, self.options.tolerance()))
                }
                Slot::Done(_) => None,
            })
            .collect();

        let points = if queries.is_empty() {
            Vec::new()
        } else {
            self.gather(sources, &queries, &mut report, progress).await
        };
        debug!("{} candidate waypoints across all sources", points.len());

        let total = slots.len();
        for (index, slot) in slots.into_iter().enumerate() {
            let result = match slot {
                Slot::Done(result) => result,
                Slot::Candidate(candidate) => {
                    if self.is_cancelled() {
                        break;
                    }

                    progress.report(&format!(
                        "Tagging {} of {total}: {}",
                        index + 1,
                        candidate.file.display()
                    ));
                    self.apply(&candidate, &points).await
                }
            };
            report.record(result);
        }

        if report.len() < files.len() {
            report.note(format!(
                "Cancelled after {} of {} files",
                report.len(),
                files.len()
            ));
        }

        let result = report.finish();
        let (success, skip, error) = result.counts();
        info!("tagging finished: {success} succeeded, {skip} skipped, {error} failed");
        result
    }

    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::SeqCst))
    }

    /// Settle terminal states that need no GPX data.
    async fn inspect(&self, file: &Path) -> Slot {
        let Some(strategy) = self.metadata.strategy_for(file) else {
            return Slot::Done(GeoTagFileResult::new(
                file,
                TagOutcome::NotSupported,
                "File type is not supported for tagging",
            ));
        };

        if !tokio::fs::try_exists(file).await.unwrap_or(false) {
            return Slot::Done(GeoTagFileResult::new(
                file,
                TagOutcome::FileNotFound,
                "File does not exist",
            ));
        }

        let metadata = match self.metadata.read(file).await {
            Ok(metadata) => metadata,
            Err(error) => return Slot::Done(failure(file, &error)),
        };

        if let (Some(existing), false) = (metadata.location, self.options.overwrite_existing_lat_long)
        {
            let mut result = GeoTagFileResult::new(
                file,
                TagOutcome::Skipped,
                "File already has a location and overwrite is off",
            )
            .with_location(existing.latitude, existing.longitude, existing.elevation);
            result.utc_time = metadata.captured_on;
            return Slot::Done(result);
        }

        let Some(captured_on) = metadata.captured_on else {
            return Slot::Done(GeoTagFileResult::new(
                file,
                TagOutcome::Skipped,
                NO_VALID_TIME_ZONE,
            ));
        };

        let Some(adjusted) = self.options.adjust(captured_on) else {
            let mut result = GeoTagFileResult::new(
                file,
                TagOutcome::Error,
                format!(
                    "Adjusting capture time by {} minutes is out of range",
                    self.options.adjust_created_time_in_minutes
                ),
            );
            result.utc_time = Some(captured_on);
            return Slot::Done(result);
        };

        Slot::Candidate(Candidate {
            file: file.to_path_buf(),
            strategy,
            adjusted,
        })
    }

    /// Ask every source for waypoints, skipping sources that fail.
    async fn gather(
        &self,
        sources: &mut [Box<dyn GpxSource>],
        queries: &[TimeQuery],
        report: &mut BatchReport,
        progress: &dyn Progress,
    ) -> Vec<WaypointAndSource> {
        let mut points = Vec::new();
        for source in sources.iter_mut() {
            let name = source.name();
            progress.report(&format!("Searching {name}"));
            match source.points(queries, progress).await {
                Ok(found) => {
                    debug!("{name} produced {} waypoints", found.len());
                    points.extend(found);
                }
                Err(error) => report.warning(format!(
                    "GPX source {name} failed and was skipped: {}",
                    error_chain(&error)
                )),
            }
        }

        points
    }

    /// Match and write one candidate.
    async fn apply(&self, candidate: &Candidate, points: &[WaypointAndSource]) -> GeoTagFileResult {
        let file = candidate.file.as_path();
        let query = TimeQuery::new(candidate.adjusted, self.options.tolerance());

        let Some(nearest) = nearest_waypoint(points, &query) else {
            return GeoTagFileResult::new(
                file,
                TagOutcome::NoMatchingGpxData,
                format!(
                    "No GPX point within {} minutes of {}",
                    self.options.point_must_be_within_minutes,
                    candidate.adjusted.to_rfc3339()
                ),
            )
            .with_utc_time(candidate.adjusted);
        };

        let waypoint = &nearest.waypoint;
        let mut location = Location::new(waypoint.latitude, waypoint.longitude, waypoint.elevation);
        if location.elevation.is_none() {
            location.elevation = self.lookup_elevation(&location).await;
        }

        let written = self.as_written(candidate.strategy, location);
        let matched = |outcome: TagOutcome, notes: String| {
            GeoTagFileResult::new(file, outcome, notes)
                .with_source(nearest.source.clone())
                .with_utc_time(candidate.adjusted)
                .with_location(written.latitude, written.longitude, written.elevation)
        };

        if self.options.test_run {
            return matched(
                TagOutcome::TestSuccess,
                format!(
                    "Would write location through {} backend, point {} seconds from capture time",
                    candidate.strategy,
                    (waypoint.time - candidate.adjusted).num_seconds().abs()
                ),
            );
        }

        if self.options.create_backup {
            if let Err(error) = backup_file(file).await {
                return matched(TagOutcome::BackupError, error_chain(&error));
            }
        }

        match self.metadata.write_location(file, &location).await {
            Ok(()) => matched(
                TagOutcome::Success,
                format!("Wrote location through {} backend", candidate.strategy),
            ),
            Err(error) => {
                let failed = failure(file, &error);
                matched(failed.outcome, failed.notes)
            }
        }
    }

    async fn lookup_elevation(&self, location: &Location) -> Option<f64> {
        let lookup = self.elevation.as_ref()?;
        match lookup.elevation(location.latitude, location.longitude).await {
            Ok(elevation) => Some(elevation),
            Err(error) => {
                warn!(
                    "elevation lookup failed for ({}, {}): {error}",
                    location.latitude, location.longitude
                );
                None
            }
        }
    }

    /// Location as it lands in the file, including the forced west longitude
    /// of the ExifTool backend.
    fn as_written(&self, strategy: WriteStrategy, location: Location) -> Location {
        let forced = strategy == WriteStrategy::ExternalTool
            && self
                .metadata
                .exiftool()
                .is_some_and(|tool| tool.force_west_longitude());

        if forced {
            Location {
                longitude: -location.longitude.abs(),
                ..location
            }
        } else {
            location
        }
    }
}

fn failure(file: &Path, error: &MetadataError) -> GeoTagFileResult {
    let outcome = match error {
        MetadataError::ExifTool(_) => TagOutcome::ExifToolFailure,
        _ => TagOutcome::Error,
    };

    GeoTagFileResult::new(file, outcome, error_chain(error))
}

/// Render an error with all of its sources.
fn error_chain(error: &dyn StdError) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(&format!(": {cause}"));
        source = cause.source();
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        elevation::Result as ElevationResult,
        metadata::embedded::gps_fields,
        progress::Silent,
        source::{Result as SourceResult, SourceError},
        waypoint::Waypoint,
    };
    use chrono::TimeZone;
    use exif::{experimental::Writer, Field, In, Tag, Value};
    use futures::future::BoxFuture;
    use img_parts::{png::Png, Bytes, ImageEXIF};
    use pretty_assertions::assert_eq;
    use std::io::Cursor;

    struct FakeSource {
        name: &'static str,
        points: Vec<WaypointAndSource>,
        fail: bool,
    }

    impl FakeSource {
        fn new(name: &'static str, points: &[(u32, f64, f64, Option<f64>)]) -> Self {
            let points = points
                .iter()
                .map(|(minute, latitude, longitude, elevation)| {
                    WaypointAndSource::new(
                        Waypoint {
                            latitude: *latitude,
                            longitude: *longitude,
                            elevation: *elevation,
                            time: utc(10, *minute),
                        },
                        name,
                    )
                })
                .collect();

            Self {
                name,
                points,
                fail: false,
            }
        }

        fn failing(name: &'static str) -> Self {
            Self {
                name,
                points: Vec::new(),
                fail: true,
            }
        }
    }

    impl GpxSource for FakeSource {
        fn name(&self) -> String {
            self.name.into()
        }

        fn points<'a>(
            &'a mut self,
            _: &'a [TimeQuery],
            _: &'a dyn Progress,
        ) -> BoxFuture<'a, SourceResult<Vec<WaypointAndSource>>> {
            Box::pin(async move {
                if self.fail {
                    return Err(SourceError::MissingCredentials {
                        service: "Fake",
                        missing: "token",
                    });
                }
                Ok(self.points.clone())
            })
        }
    }

    struct FixedElevation(f64);

    impl ElevationLookup for FixedElevation {
        fn elevation(&self, _: f64, _: f64) -> BoxFuture<'_, ElevationResult<f64>> {
            let elevation = self.0;
            Box::pin(async move { Ok(elevation) })
        }
    }

    fn utc(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, hour, minute, 0).unwrap()
    }

    fn ascii(tag: Tag, text: &str) -> Field {
        Field {
            tag,
            ifd_num: In::PRIMARY,
            value: Value::Ascii(vec![text.as_bytes().to_vec()]),
        }
    }

    /// Write PNG at target path carrying target EXIF fields.
    fn photo(path: &Path, fields: &[Field]) -> PathBuf {
        let mut image = Cursor::new(Vec::new());
        image::RgbImage::new(2, 2)
            .write_to(&mut image, image::ImageFormat::Png)
            .unwrap();
        let mut png = Png::from_bytes(image.into_inner().into()).unwrap();

        if !fields.is_empty() {
            let mut exif = Cursor::new(Vec::new());
            let mut writer = Writer::new();
            for field in fields {
                writer.push_field(field);
            }
            writer.write(&mut exif, false).unwrap();
            png.set_exif(Some(Bytes::from(exif.into_inner())));
        }

        std::fs::write(path, png.encoder().bytes()).unwrap();
        path.to_path_buf()
    }

    /// Photo captured at 12:14 local time, UTC+02:00.
    fn captured_photo(path: &Path) -> PathBuf {
        photo(
            path,
            &[
                ascii(Tag::DateTimeOriginal, "2024:06:01 12:14:00"),
                ascii(Tag::OffsetTimeOriginal, "+02:00"),
            ],
        )
    }

    fn sources(list: Vec<FakeSource>) -> Vec<Box<dyn GpxSource>> {
        list.into_iter()
            .map(|source| Box::new(source) as Box<dyn GpxSource>)
            .collect()
    }

    fn options() -> TagOptions {
        TagOptions {
            point_must_be_within_minutes: 5,
            create_backup: false,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn matched_photo_is_written() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let file = captured_photo(&dir.path().join("a.png"));
        let tagger = GeoTagger::new(MetadataAdapter::new(None), options());
        let mut sources = sources(vec![FakeSource::new(
            "walk.gpx",
            &[(10, 44.0, -121.0, None), (15, 45.0, -122.0, Some(12.0))],
        )]);

        let result = tagger.tag(&[file.clone()], &mut sources, &Silent).await;
        let tagged = &result.results[0];
        assert_eq!(tagged.outcome, TagOutcome::Success);
        assert_eq!(tagged.source.as_deref(), Some("walk.gpx"));
        assert_eq!(tagged.utc_time, Some(utc(10, 14)));
        assert_eq!(tagged.latitude, Some(45.0));
        assert!(result.notes.contains("Warning: running without backups is risky"));

        let written = tagger.metadata().read_location(&file, None).await?.unwrap();
        assert!((written.latitude - 45.0).abs() < 1e-5);
        assert!((written.longitude + 122.0).abs() < 1e-5);
        assert_eq!(written.elevation, Some(12.0));

        Ok(())
    }

    #[tokio::test]
    async fn clock_adjustment_and_tolerance() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let file = captured_photo(&dir.path().join("a.png"));
        let tagger = GeoTagger::new(
            MetadataAdapter::new(None),
            TagOptions {
                adjust_created_time_in_minutes: 46,
                ..options()
            },
        );
        let mut sources = sources(vec![FakeSource::new("walk.gpx", &[(15, 45.0, -122.0, None)])]);

        let result = tagger.tag(&[file], &mut sources, &Silent).await;
        assert_eq!(result.results[0].outcome, TagOutcome::NoMatchingGpxData);
        assert_eq!(result.results[0].utc_time, Some(utc(11, 0)));

        Ok(())
    }

    #[tokio::test]
    async fn test_run_leaves_file_untouched() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let file = captured_photo(&dir.path().join("a.png"));
        let before = std::fs::read(&file)?;
        let tagger = GeoTagger::new(
            MetadataAdapter::new(None),
            TagOptions {
                test_run: true,
                create_backup: true,
                ..options()
            },
        );
        let mut sources = sources(vec![FakeSource::new("walk.gpx", &[(15, 45.0, -122.0, None)])]);

        let result = tagger.tag(&[file.clone()], &mut sources, &Silent).await;
        assert_eq!(result.results[0].outcome, TagOutcome::TestSuccess);
        assert_eq!(std::fs::read(&file)?, before);
        assert!(!dir.path().join("PwGeoTagBackup").exists());
        assert!(!result.notes.contains("running without backups"));

        Ok(())
    }

    #[tokio::test]
    async fn terminal_states_keep_input_order() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let unsupported = dir.path().join("notes.txt");
        std::fs::write(&unsupported, "text")?;
        let missing = dir.path().join("missing.png");
        let zoneless = photo(
            &dir.path().join("zoneless.png"),
            &[ascii(Tag::DateTimeOriginal, "2024:06:01 12:14:00")],
        );
        let located = photo(
            &dir.path().join("located.png"),
            &gps_fields(&Location::new(10.0, 20.0, None)),
        );
        let files = vec![unsupported, missing, zoneless, located];

        let tagger = GeoTagger::new(MetadataAdapter::new(None), options());
        let mut sources = sources(vec![FakeSource::new("walk.gpx", &[(15, 45.0, -122.0, None)])]);
        let result = tagger.tag(&files, &mut sources, &Silent).await;

        let outcomes: Vec<TagOutcome> = result.results.iter().map(|result| result.outcome).collect();
        assert_eq!(
            outcomes,
            vec![
                TagOutcome::NotSupported,
                TagOutcome::FileNotFound,
                TagOutcome::Skipped,
                TagOutcome::Skipped,
            ]
        );
        assert_eq!(result.results[2].notes, NO_VALID_TIME_ZONE);
        assert_eq!(result.results[3].latitude, Some(10.0));
        let files_back: Vec<PathBuf> = result.results.iter().map(|result| result.file.clone()).collect();
        assert_eq!(files_back, files);

        Ok(())
    }

    #[tokio::test]
    async fn failing_source_is_noted_and_skipped() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let file = captured_photo(&dir.path().join("a.png"));
        let tagger = GeoTagger::new(
            MetadataAdapter::new(None),
            TagOptions {
                test_run: true,
                ..options()
            },
        );
        let mut sources = sources(vec![
            FakeSource::failing("broken"),
            FakeSource::new("later.gpx", &[(14, 45.0, -122.0, None)]),
        ]);

        let result = tagger.tag(&[file], &mut sources, &Silent).await;
        assert!(result.notes.contains("GPX source broken failed"));
        assert_eq!(result.results[0].source.as_deref(), Some("later.gpx"));

        Ok(())
    }

    #[tokio::test]
    async fn ties_prefer_earlier_source() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let file = captured_photo(&dir.path().join("a.png"));
        let tagger = GeoTagger::new(
            MetadataAdapter::new(None),
            TagOptions {
                test_run: true,
                ..options()
            },
        );
        let mut sources = sources(vec![
            FakeSource::new("first.gpx", &[(13, 1.0, 1.0, None)]),
            FakeSource::new("second.gpx", &[(15, 2.0, 2.0, None)]),
        ]);

        let result = tagger.tag(&[file], &mut sources, &Silent).await;
        assert_eq!(result.results[0].source.as_deref(), Some("first.gpx"));

        Ok(())
    }

    #[tokio::test]
    async fn missing_elevation_is_looked_up() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let file = captured_photo(&dir.path().join("a.png"));
        let tagger = GeoTagger::new(
            MetadataAdapter::new(None),
            TagOptions {
                test_run: true,
                ..options()
            },
        )
        .with_elevation(FixedElevation(250.0));
        let mut sources = sources(vec![FakeSource::new("walk.gpx", &[(14, 45.0, -122.0, None)])]);

        let result = tagger.tag(&[file], &mut sources, &Silent).await;
        assert_eq!(result.results[0].elevation, Some(250.0));

        Ok(())
    }

    #[tokio::test]
    async fn backup_precedes_write() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let file = captured_photo(&dir.path().join("a.png"));
        let original = std::fs::read(&file)?;
        let tagger = GeoTagger::new(
            MetadataAdapter::new(None),
            TagOptions {
                create_backup: true,
                ..options()
            },
        );
        let mut sources = sources(vec![FakeSource::new("walk.gpx", &[(14, 45.0, -122.0, None)])]);

        let result = tagger.tag(&[file], &mut sources, &Silent).await;
        assert_eq!(result.results[0].outcome, TagOutcome::Success);

        let backups: Vec<PathBuf> = std::fs::read_dir(dir.path().join("PwGeoTagBackup"))?
            .map(|entry| entry.map(|entry| entry.path()))
            .collect::<Result<_, _>>()?;
        assert_eq!(backups.len(), 1);
        assert_eq!(std::fs::read(&backups[0])?, original);

        Ok(())
    }

    #[tokio::test]
    async fn cancellation_stops_batch() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let file = captured_photo(&dir.path().join("a.png"));
        let flag = CancelFlag::default();
        flag.store(true, Ordering::SeqCst);
        let tagger = GeoTagger::new(MetadataAdapter::new(None), options()).with_cancel(flag);
        let mut sources = sources(vec![FakeSource::new("walk.gpx", &[(14, 45.0, -122.0, None)])]);

        let result = tagger.tag(&[file], &mut sources, &Silent).await;
        assert!(result.results.is_empty());
        assert!(result.notes.contains("Cancelled after 0 of 1 files"));

        Ok(())
    }

    #[tokio::test]
    async fn configuration_errors_return_early() {
        let tagger = GeoTagger::new(MetadataAdapter::new(None), options());

        let result = tagger.tag(&[], &mut sources(vec![]), &Silent).await;
        assert_eq!(result.title, "GeoTag - No Files");

        let result = tagger
            .tag(&[PathBuf::from("a.png")], &mut sources(vec![]), &Silent)
            .await;
        assert_eq!(result.title, "GeoTag - No GPX Sources");
        assert!(result.results.is_empty());
    }

    /// Source that clobbers a photo while it is being searched.
    struct Clobbering {
        inner: FakeSource,
        victim: PathBuf,
    }

    impl GpxSource for Clobbering {
        fn name(&self) -> String {
            self.inner.name()
        }

        fn points<'a>(
            &'a mut self,
            queries: &'a [TimeQuery],
            progress: &'a dyn Progress,
        ) -> BoxFuture<'a, SourceResult<Vec<WaypointAndSource>>> {
            std::fs::write(&self.victim, b"definitely not a png").unwrap();
            self.inner.points(queries, progress)
        }
    }

    #[tokio::test]
    async fn out_of_range_adjustment_fails_per_file() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let first = captured_photo(&dir.path().join("a.png"));
        let second = captured_photo(&dir.path().join("b.png"));
        let tagger = GeoTagger::new(
            MetadataAdapter::new(None),
            TagOptions {
                adjust_created_time_in_minutes: 10_000_000_000_000,
                ..options()
            },
        );
        let mut sources = sources(vec![FakeSource::new("walk.gpx", &[(14, 45.0, -122.0, None)])]);

        let result = tagger.tag(&[first.clone(), second.clone()], &mut sources, &Silent).await;
        for file in [&first, &second] {
            let tagged = result.result_for(file).unwrap();
            assert_eq!(tagged.outcome, TagOutcome::Error);
            assert_eq!(tagged.utc_time, Some(utc(10, 14)));
            assert!(tagged.notes.contains("out of range"));
        }

        Ok(())
    }

    #[tokio::test]
    async fn huge_tolerance_saturates() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let file = captured_photo(&dir.path().join("a.png"));
        let tagger = GeoTagger::new(
            MetadataAdapter::new(None),
            TagOptions {
                point_must_be_within_minutes: i64::MIN,
                test_run: true,
                ..options()
            },
        );
        assert_eq!(tagger.options().tolerance(), Duration::MAX);
        let mut sources = sources(vec![FakeSource::new("walk.gpx", &[(59, 45.0, -122.0, None)])]);

        let result = tagger.tag(&[file.clone()], &mut sources, &Silent).await;
        assert_eq!(result.result_for(&file).unwrap().outcome, TagOutcome::TestSuccess);

        Ok(())
    }

    #[tokio::test]
    async fn backup_failure_skips_write_and_continues() -> anyhow::Result<()> {
        let blocked = tempfile::tempdir()?;
        let open = tempfile::tempdir()?;
        let first = captured_photo(&blocked.path().join("a.png"));
        let second = captured_photo(&open.path().join("b.png"));
        std::fs::write(blocked.path().join("PwGeoTagBackup"), "in the way")?;
        let before = std::fs::read(&first)?;

        let tagger = GeoTagger::new(
            MetadataAdapter::new(None),
            TagOptions {
                create_backup: true,
                ..options()
            },
        );
        let mut sources = sources(vec![FakeSource::new("walk.gpx", &[(14, 45.0, -122.0, None)])]);
        let result = tagger.tag(&[first.clone(), second.clone()], &mut sources, &Silent).await;

        let failed = result.result_for(&first).unwrap();
        assert_eq!(failed.outcome, TagOutcome::BackupError);
        assert_eq!(failed.source.as_deref(), Some("walk.gpx"));
        assert_eq!(std::fs::read(&first)?, before);
        assert_eq!(result.result_for(&second).unwrap().outcome, TagOutcome::Success);
        assert_eq!(result.counts(), (1, 0, 1));

        Ok(())
    }

    #[tokio::test]
    async fn write_failure_is_error_and_continues() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let first = captured_photo(&dir.path().join("a.png"));
        let second = captured_photo(&dir.path().join("b.png"));
        let tagger = GeoTagger::new(MetadataAdapter::new(None), options());
        let mut sources: Vec<Box<dyn GpxSource>> = vec![Box::new(Clobbering {
            inner: FakeSource::new("walk.gpx", &[(14, 45.0, -122.0, None)]),
            victim: first.clone(),
        })];

        let result = tagger.tag(&[first.clone(), second.clone()], &mut sources, &Silent).await;
        assert_eq!(result.result_for(&first).unwrap().outcome, TagOutcome::Error);
        assert_eq!(result.result_for(&second).unwrap().outcome, TagOutcome::Success);

        Ok(())
    }

    #[tokio::test]
    async fn missing_exiftool_is_exiftool_failure() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let heic = dir.path().join("a.heic");
        std::fs::write(&heic, b"heic")?;
        let png = captured_photo(&dir.path().join("b.png"));
        let adapter = MetadataAdapter::new(Some(crate::metadata::ExifTool::new(
            "/nonexistent/exiftool",
            true,
        )));
        assert_eq!(
            adapter.exiftool().map(|tool| tool.program()),
            Some(Path::new("/nonexistent/exiftool"))
        );
        assert_eq!(
            adapter.strategies().strategy_for(&heic),
            Some(WriteStrategy::ExternalTool)
        );

        let tagger = GeoTagger::new(adapter, options());
        let mut sources = sources(vec![FakeSource::new("walk.gpx", &[(14, 45.0, -122.0, None)])]);
        let result = tagger.tag(&[heic.clone(), png.clone()], &mut sources, &Silent).await;

        let failed = result.result_for(&heic).unwrap();
        assert_eq!(failed.outcome, TagOutcome::ExifToolFailure);
        assert!(failed.notes.contains("/nonexistent/exiftool"));
        assert_eq!(result.result_for(&png).unwrap().outcome, TagOutcome::Success);

        Ok(())
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn exiftool_write_failure_is_reported() -> anyhow::Result<()> {
        use indoc::indoc;
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir()?;
        let script = dir.path().join("exiftool");
        std::fs::write(
            &script,
            indoc! {r#"
                #!/bin/sh
                if [ "$1" = "-json" ]; then
                    echo '[{"DateTimeOriginal": "2024:06:01 10:14:00", "OffsetTimeOriginal": "+00:00"}]'
                    exit 0
                fi
                echo "Error: file is write protected" >&2
                exit 1
            "#},
        )?;
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755))?;
        let heic = dir.path().join("a.heic");
        std::fs::write(&heic, b"heic")?;

        let adapter = MetadataAdapter::new(Some(crate::metadata::ExifTool::new(&script, true)));
        let tagger = GeoTagger::new(adapter, options());
        let mut sources = sources(vec![FakeSource::new("walk.gpx", &[(14, 45.0, 122.0, None)])]);
        let result = tagger.tag(&[heic.clone()], &mut sources, &Silent).await;

        let failed = result.result_for(&heic).unwrap();
        assert_eq!(failed.outcome, TagOutcome::ExifToolFailure);
        assert!(failed.notes.contains("write protected"));
        assert_eq!(failed.utc_time, Some(utc(10, 14)));
        assert_eq!(failed.longitude, Some(-122.0));

        Ok(())
    }
}
