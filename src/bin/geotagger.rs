// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use geotagger::{
    config::{GeoTagConfig, SourceConfig},
    elevation::OpenTopoData,
    engine::{CancelFlag, GeoTagger},
    metadata::{ExifTool, MetadataAdapter},
    path::default_config_file,
    report::{BatchReport, GeoTagResult},
    source::{self, GpxSource},
};

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::{
    path::{Path, PathBuf},
    process::exit,
    sync::atomic::Ordering,
    time::Duration,
};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Clone, Parser)]
#[command(
    about,
    override_usage = "\n  geotagger [options] <geotagger-command>",
    subcommand_help_heading = "Commands",
    version
)]
struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    async fn run(self) -> Result<()> {
        match self.command {
            Command::Tag(opts) => run_tag(opts).await,
            Command::Inspect(opts) => run_inspect(opts).await,
            Command::Init(opts) => run_init(opts).await,
        }
    }
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Geotag photos from configured GPX sources.
    #[command(override_usage = "geotagger tag [options] <files>...")]
    Tag(TagOptions),

    /// Show backend, location, and UTC capture time of photos.
    #[command(override_usage = "geotagger inspect [options] <files>...")]
    Inspect(InspectOptions),

    /// Write default configuration file.
    #[command(override_usage = "geotagger init [options]")]
    Init(InitOptions),
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct TagOptions {
    /// Photos to tag, glob patterns allowed.
    #[arg(required = true, value_name = "files")]
    pub files: Vec<String>,

    /// Path to configuration file.
    #[arg(short, long, value_name = "path")]
    pub config: Option<PathBuf>,

    /// Additional GPX directory or file to match against.
    #[arg(short, long, value_name = "path")]
    pub gpx: Vec<PathBuf>,

    /// Scan additional GPX directories recursively.
    #[arg(short, long)]
    pub recurse: bool,

    /// Maximum minutes between capture time and waypoint time.
    #[arg(short, long, value_name = "minutes")]
    pub within: Option<i64>,

    /// Camera clock drift in minutes added to capture times.
    #[arg(short, long, value_name = "minutes", allow_hyphen_values = true)]
    pub adjust: Option<i64>,

    /// Match and report without writing anything.
    #[arg(short, long)]
    pub test_run: bool,

    /// Do not back up files before writing.
    #[arg(long)]
    pub no_backup: bool,

    /// Replace locations files already carry.
    #[arg(short, long)]
    pub overwrite: bool,

    /// Path to ExifTool executable.
    #[arg(short, long, value_name = "path")]
    pub exiftool: Option<PathBuf>,

    /// Skip elevation lookups for waypoints without elevation.
    #[arg(long)]
    pub no_elevation: bool,

    /// Print result as JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct InspectOptions {
    /// Photos to inspect, glob patterns allowed.
    #[arg(required = true, value_name = "files")]
    pub files: Vec<String>,

    /// Path to configuration file.
    #[arg(short, long, value_name = "path")]
    pub config: Option<PathBuf>,

    /// Path to ExifTool executable.
    #[arg(short, long, value_name = "path")]
    pub exiftool: Option<PathBuf>,

    /// Print details as JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct InitOptions {
    /// Path to write configuration file to.
    #[arg(short, long, value_name = "path")]
    pub config: Option<PathBuf>,

    /// GPX directory to list as the first source.
    #[arg(short, long, value_name = "path")]
    pub gpx: Option<PathBuf>,

    /// Replace existing configuration file.
    #[arg(short, long)]
    pub force: bool,
}

#[tokio::main]
async fn main() {
    let layer = fmt::layer()
        .compact()
        .with_target(false)
        .with_timer(false)
        .without_time();
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap();
    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .init();

    if let Err(error) = run().await {
        error!("{error:?}");
        exit(1);
    }

    exit(0)
}

async fn run() -> Result<()> {
    Cli::parse().run().await
}

async fn run_tag(opts: TagOptions) -> Result<()> {
    let mut config = load_config(opts.config.as_deref()).await?;
    let settings = &mut config.settings;
    if let Some(within) = opts.within {
        settings.point_must_be_within_minutes = within;
    }
    if let Some(adjust) = opts.adjust {
        settings.adjust_created_time_in_minutes = adjust;
    }
    settings.test_run |= opts.test_run;
    settings.create_backup &= !opts.no_backup;
    settings.overwrite_existing_lat_long |= opts.overwrite;
    if let Some(exiftool) = opts.exiftool {
        settings.exiftool = Some(exiftool);
    }

    for path in opts.gpx {
        config.sources.push(if path.is_dir() {
            SourceConfig::Directory {
                path,
                recurse: opts.recurse,
            }
        } else {
            SourceConfig::Files { files: vec![path] }
        });
    }

    let files = expand_files(&opts.files)?;
    let mut sources: Vec<Box<dyn GpxSource>> = Vec::with_capacity(config.sources.len());
    for entry in &config.sources {
        match source::connect(entry).await {
            Ok(source) => sources.push(source),
            Err(err) => {
                let mut report = BatchReport::new("GeoTag - Configuration Error");
                report.note(format!("Cannot set up GPX source: {err}"));
                print_result(&report.finish(), opts.json)?;
                return Err(anyhow!(err).context("GPX source configuration is invalid"));
            }
        }
    }

    let mut tagger = GeoTagger::new(adapter(&config), config.settings.tag_options());
    if config.elevation.enabled && !opts.no_elevation {
        tagger = tagger.with_elevation(OpenTopoData::new(
            config.elevation.base_url.as_str(),
            config.elevation.dataset.as_str(),
        )?);
    }

    let cancel = CancelFlag::default();
    let flag = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("cancel requested, finishing current file");
            flag.store(true, Ordering::SeqCst);
        }
    });
    let tagger = tagger.with_cancel(cancel);

    let bar = spinner(opts.json)?;
    let progress = |message: &str| bar.set_message(message.to_string());
    let result = tagger.tag(&files, &mut sources, &progress).await;
    bar.finish_and_clear();

    print_result(&result, opts.json)
}

async fn run_inspect(opts: InspectOptions) -> Result<()> {
    let mut config = load_config(opts.config.as_deref()).await?;
    if let Some(exiftool) = opts.exiftool {
        config.settings.exiftool = Some(exiftool);
    }

    let adapter = adapter(&config);
    let mut details = Vec::new();
    for file in expand_files(&opts.files)? {
        let strategy = adapter.strategy_for(&file);
        let metadata = match strategy {
            Some(_) => match adapter.read(&file).await {
                Ok(metadata) => Some(metadata),
                Err(err) => {
                    warn!("cannot read {}: {err}", file.display());
                    None
                }
            },
            None => None,
        };

        let location = metadata.as_ref().and_then(|metadata| metadata.location);
        let captured_on = metadata.as_ref().and_then(|metadata| metadata.captured_on);
        if opts.json {
            details.push(serde_json::json!({
                "file": file,
                "strategy": strategy.map(|strategy| strategy.to_string()),
                "location": location,
                "utc_captured_on": captured_on,
            }));
        } else {
            println!(
                "{}\n  backend: {}\n  location: {}\n  captured (UTC): {}",
                file.display(),
                strategy.map_or_else(|| "not supported".to_string(), |s| s.to_string()),
                location.map_or_else(
                    || "none".to_string(),
                    |l| format!("{:.6}, {:.6}", l.latitude, l.longitude)
                ),
                captured_on.map_or_else(|| "unknown".to_string(), |t| t.to_rfc3339()),
            );
        }
    }

    if opts.json {
        println!("{}", serde_json::to_string_pretty(&details)?);
    }

    Ok(())
}

async fn run_init(opts: InitOptions) -> Result<()> {
    let path = match opts.config {
        Some(path) => path,
        None => default_config_file()?,
    };

    if path.exists() && !opts.force {
        return Err(anyhow!(
            "configuration file {:?} already exists, use --force to replace it",
            path.display()
        ));
    }

    let mut config = GeoTagConfig::default();
    if let Some(gpx) = opts.gpx {
        config.sources.push(SourceConfig::Directory {
            path: gpx,
            recurse: true,
        });
    }

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(&path, config.to_string()).await?;
    info!("wrote configuration to {}", path.display());

    Ok(())
}

/// Load configuration from explicit or default path.
///
/// A missing default configuration is not an error, an explicitly requested
/// one is.
async fn load_config(path: Option<&Path>) -> Result<GeoTagConfig> {
    let (path, explicit) = match path {
        Some(path) => (path.to_path_buf(), true),
        None => (default_config_file()?, false),
    };

    match tokio::fs::read_to_string(&path).await {
        Ok(data) => Ok(data.parse()?),
        Err(err) if !explicit && err.kind() == std::io::ErrorKind::NotFound => {
            info!("no configuration at {}, using defaults", path.display());
            Ok(GeoTagConfig::default())
        }
        Err(err) => Err(anyhow!(err).context(format!("cannot read {:?}", path.display()))),
    }
}

fn adapter(config: &GeoTagConfig) -> MetadataAdapter {
    let exiftool = config
        .settings
        .exiftool
        .as_ref()
        .map(|path| ExifTool::new(path, config.settings.exiftool_force_west_longitude));
    MetadataAdapter::new(exiftool)
}

/// Expand glob patterns, keeping plain paths as given so missing files
/// show up in results.
fn expand_files(patterns: &[String]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for pattern in patterns {
        if !pattern.contains(['*', '?', '[']) {
            files.push(PathBuf::from(pattern));
            continue;
        }

        for entry in glob::glob(pattern)? {
            match entry {
                Ok(path) if path.is_file() => files.push(path),
                Ok(_) => {}
                Err(err) => warn!("skipping unreadable path: {err}"),
            }
        }
    }

    Ok(files)
}

fn spinner(hidden: bool) -> Result<ProgressBar> {
    if hidden {
        return Ok(ProgressBar::hidden());
    }

    let bar = ProgressBar::new_spinner();
    bar.set_style(ProgressStyle::with_template(
        "{elapsed_precise:.green} {spinner} {msg}",
    )?);
    bar.enable_steady_tick(Duration::from_millis(100));
    Ok(bar)
}

fn print_result(result: &GeoTagResult, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(result)?);
        return Ok(());
    }

    let (success, skip, error) = result.counts();
    println!("{}", result.title);
    for file in &result.results {
        println!("  {}", file.summary_line());
    }
    println!("{success} tagged, {skip} skipped, {error} failed");

    Ok(())
}
