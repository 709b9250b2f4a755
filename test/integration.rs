// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use crate::{write_track, PhotoFixture, PhotoKind};

use anyhow::Result;
use chrono::{TimeZone, Utc};
use geotagger::{
    backup::{unique_backup_path, BACKUP_DIR_NAME},
    config::{GeoTagConfig, SourceConfig},
    engine::{GeoTagger, TagOptions, NO_VALID_TIME_ZONE},
    metadata::{Location, MetadataAdapter},
    progress::Silent,
    report::TagOutcome,
    source::{self, DirectorySource, FileListSource, GpxSource},
};
use pretty_assertions::assert_eq;
use std::{collections::HashSet, path::PathBuf};

const WALK: [(&str, f64, f64); 3] = [
    ("2024-06-01T10:00:00Z", 44.9, -121.9),
    ("2024-06-01T10:15:00Z", 45.0, -122.0),
    ("2024-06-01T10:30:00Z", 45.1, -122.1),
];

fn tagger(options: TagOptions) -> GeoTagger {
    GeoTagger::new(MetadataAdapter::new(None), options)
}

fn quiet_options() -> TagOptions {
    TagOptions {
        point_must_be_within_minutes: 5,
        create_backup: false,
        ..Default::default()
    }
}

#[tokio::test]
async fn directory_source_end_to_end() -> Result<()> {
    let tracks = tempfile::tempdir()?;
    let photos = tempfile::tempdir()?;
    write_track(tracks.path().join("walk.gpx"), &WALK)?;
    let photo = PhotoFixture::new(photos.path().join("IMG_1.png"), PhotoKind::Png)
        .captured("2024:06:01 12:14:00", "+02:00")
        .write()?;

    let mut sources: Vec<Box<dyn GpxSource>> =
        vec![Box::new(DirectorySource::new(tracks.path(), false))];
    let result = tagger(quiet_options())
        .tag(&[photo.clone()], &mut sources, &Silent)
        .await;

    let tagged = &result.results[0];
    assert_eq!(tagged.outcome, TagOutcome::Success);
    assert_eq!(tagged.latitude, Some(45.0));
    assert_eq!(tagged.longitude, Some(-122.0));
    assert_eq!(tagged.elevation, None);
    assert_eq!(tagged.source.as_deref(), Some("walk.gpx"));
    assert_eq!(
        tagged.utc_time,
        Some(Utc.with_ymd_and_hms(2024, 6, 1, 10, 14, 0).unwrap())
    );

    let written = MetadataAdapter::new(None)
        .read_location(&photo, None)
        .await?
        .unwrap();
    assert!((written.latitude - 45.0).abs() < 1e-5);
    assert!((written.longitude + 122.0).abs() < 1e-5);

    Ok(())
}

#[tokio::test]
async fn jpeg_photo_is_tagged() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let track = write_track(dir.path().join("walk.gpx"), &WALK)?;
    let photo = PhotoFixture::new(dir.path().join("IMG_2.jpg"), PhotoKind::Jpeg)
        .captured("2024:06:01 03:29:00", "-07:00")
        .write()?;

    let mut sources: Vec<Box<dyn GpxSource>> = vec![Box::new(FileListSource::new([track]))];
    let result = tagger(quiet_options())
        .tag(&[photo.clone()], &mut sources, &Silent)
        .await;
    assert_eq!(result.results[0].outcome, TagOutcome::Success);
    assert_eq!(result.results[0].latitude, Some(45.1));

    let adapter = MetadataAdapter::new(None);
    assert!(adapter.has_location(&photo).await?);
    assert_eq!(
        adapter.read_utc_captured_on(&photo).await?,
        Some(Utc.with_ymd_and_hms(2024, 6, 1, 10, 29, 0).unwrap())
    );

    Ok(())
}

#[tokio::test]
async fn no_point_within_tolerance() -> Result<()> {
    let dir = tempfile::tempdir()?;
    write_track(dir.path().join("walk.gpx"), &WALK)?;
    let photo = PhotoFixture::new(dir.path().join("IMG_1.png"), PhotoKind::Png)
        .captured("2024:06:01 11:00:00", "+00:00")
        .write()?;

    let mut sources: Vec<Box<dyn GpxSource>> =
        vec![Box::new(DirectorySource::new(dir.path(), false))];
    let result = tagger(quiet_options())
        .tag(&[photo], &mut sources, &Silent)
        .await;
    assert_eq!(result.results[0].outcome, TagOutcome::NoMatchingGpxData);

    Ok(())
}

#[tokio::test]
async fn test_run_writes_nothing() -> Result<()> {
    let dir = tempfile::tempdir()?;
    write_track(dir.path().join("walk.gpx"), &WALK)?;
    let photo = PhotoFixture::new(dir.path().join("IMG_1.png"), PhotoKind::Png)
        .captured("2024:06:01 12:14:00", "+02:00")
        .write()?;
    let before = std::fs::read(&photo)?;

    let mut sources: Vec<Box<dyn GpxSource>> =
        vec![Box::new(DirectorySource::new(dir.path(), false))];
    let options = TagOptions {
        test_run: true,
        create_backup: true,
        ..quiet_options()
    };
    let result = tagger(options).tag(&[photo.clone()], &mut sources, &Silent).await;

    assert_eq!(result.results[0].outcome, TagOutcome::TestSuccess);
    assert_eq!(result.results[0].latitude, Some(45.0));
    assert_eq!(std::fs::read(&photo)?, before);
    assert!(!dir.path().join(BACKUP_DIR_NAME).exists());

    Ok(())
}

#[tokio::test]
async fn skips_keep_their_reasons() -> Result<()> {
    let dir = tempfile::tempdir()?;
    write_track(dir.path().join("walk.gpx"), &WALK)?;
    let zoneless = PhotoFixture::new(dir.path().join("zoneless.png"), PhotoKind::Png)
        .captured_without_offset("2024:06:01 10:14:00")
        .write()?;
    let located = PhotoFixture::new(dir.path().join("located.png"), PhotoKind::Png)
        .captured("2024:06:01 10:14:00", "+00:00")
        .located(10, 20)
        .write()?;

    let mut sources: Vec<Box<dyn GpxSource>> =
        vec![Box::new(DirectorySource::new(dir.path(), false))];
    let result = tagger(quiet_options())
        .tag(&[zoneless, located.clone()], &mut sources, &Silent)
        .await;

    assert_eq!(result.results[0].outcome, TagOutcome::Skipped);
    assert_eq!(result.results[0].notes, NO_VALID_TIME_ZONE);
    assert_eq!(result.results[1].outcome, TagOutcome::Skipped);
    assert_eq!(result.results[1].latitude, Some(10.0));

    // INVARIANT: Overwrite replaces the existing location.
    let options = TagOptions {
        overwrite_existing_lat_long: true,
        ..quiet_options()
    };
    let result = tagger(options).tag(&[located.clone()], &mut sources, &Silent).await;
    assert_eq!(result.results[0].outcome, TagOutcome::Success);
    let written = MetadataAdapter::new(None)
        .read_location(&located, None)
        .await?
        .unwrap();
    assert!((written.latitude - 45.0).abs() < 1e-5);

    Ok(())
}

#[tokio::test]
async fn backups_never_collide() -> Result<()> {
    let dir = tempfile::tempdir()?;
    write_track(dir.path().join("walk.gpx"), &WALK)?;
    let photo = PhotoFixture::new(dir.path().join("IMG_1.png"), PhotoKind::Png)
        .captured("2024:06:01 12:14:00", "+02:00")
        .write()?;

    let options = TagOptions {
        create_backup: true,
        overwrite_existing_lat_long: true,
        ..quiet_options()
    };
    let tagger = tagger(options);
    let mut sources: Vec<Box<dyn GpxSource>> =
        vec![Box::new(DirectorySource::new(dir.path(), false))];
    for _ in 0..3 {
        let result = tagger.tag(&[photo.clone()], &mut sources, &Silent).await;
        assert_eq!(result.results[0].outcome, TagOutcome::Success);
    }

    let backups: HashSet<PathBuf> = std::fs::read_dir(dir.path().join(BACKUP_DIR_NAME))?
        .map(|entry| entry.map(|entry| entry.path()))
        .collect::<Result<_, _>>()?;
    assert_eq!(backups.len(), 3);

    let next = unique_backup_path(
        &dir.path().join(BACKUP_DIR_NAME),
        &photo,
        "2024-06-01-10-14-00",
        |candidate| candidate.exists() || candidate.ends_with("IMG_1--2024-06-01-10-14-00.png"),
    )?;
    assert!(next.ends_with("IMG_1--2024-06-01-10-14-00-0000.png"));

    Ok(())
}

#[tokio::test]
async fn embedded_round_trip_precision() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let photo = PhotoFixture::new(dir.path().join("IMG_1.jpg"), PhotoKind::Jpeg)
        .captured("2024:06:01 12:14:00", "+02:00")
        .write()?;

    let adapter = MetadataAdapter::new(None);
    for location in [
        Location::new(45.123456, -122.654321, Some(101.5)),
        Location::new(-33.868820, 151.209290, None),
        Location::new(64.1466, -21.9426, Some(-3.25)),
    ] {
        adapter.write_location(&photo, &location).await?;
        let result = adapter.read_location(&photo, None).await?.unwrap();
        assert!((result.latitude - location.latitude).abs() < 1e-5);
        assert!((result.longitude - location.longitude).abs() < 1e-5);
        assert_eq!(result.elevation, location.elevation);
    }

    assert_eq!(
        adapter.read_utc_captured_on(&photo).await?,
        Some(Utc.with_ymd_and_hms(2024, 6, 1, 10, 14, 0).unwrap())
    );

    Ok(())
}

#[tokio::test]
async fn sources_from_configuration() -> Result<()> {
    let dir = tempfile::tempdir()?;
    write_track(dir.path().join("walk.gpx"), &WALK)?;
    let photo = PhotoFixture::new(dir.path().join("IMG_1.png"), PhotoKind::Png)
        .captured("2024:06:01 12:14:00", "+02:00")
        .write()?;

    let config: GeoTagConfig = format!(
        "[settings]\npoint_must_be_within_minutes = 5\ncreate_backup = false\n\n[[source]]\nkind = \"directory\"\npath = {:?}\n",
        dir.path().display().to_string()
    )
    .parse()?;
    assert!(matches!(config.sources[0], SourceConfig::Directory { .. }));

    let mut sources = Vec::new();
    for entry in &config.sources {
        sources.push(source::connect(entry).await?);
    }

    let result = tagger(config.settings.tag_options())
        .tag(&[photo], &mut sources, &Silent)
        .await;
    assert_eq!(result.results[0].outcome, TagOutcome::Success);

    Ok(())
}

#[tokio::test]
async fn strava_without_credentials_fails_early() {
    let config: GeoTagConfig = "[[source]]\nkind = \"strava\"\nclient_id = \"123\"\n"
        .parse()
        .unwrap();
    let result = source::connect(&config.sources[0]).await;
    assert!(matches!(
        result,
        Err(source::SourceError::MissingCredentials { .. })
    ));
}
