// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Photo backups before metadata writes.
//!
//! Backups land in a `PwGeoTagBackup` directory beside the photo. Names
//! carry a timestamp so repeated runs never overwrite an older backup:
//!
//! ```text
//! IMG_1--2024-06-01-10-14-00.jpg
//! IMG_1--2024-06-01-10-14-00-0000.jpg
//! IMG_1--2024-06-01-10-14-00-0001.jpg
//! ```

use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};
use tracing::{debug, instrument};

/// Name of backup directory created beside photos.
pub const BACKUP_DIR_NAME: &str = "PwGeoTagBackup";

/// Number of numbered names tried after the plain timestamped name.
pub const MAX_ATTEMPTS: u32 = 10_000;

/// Backup directory for target file.
pub fn backup_dir(file: &Path) -> PathBuf {
    file.parent()
        .unwrap_or_else(|| Path::new("."))
        .join(BACKUP_DIR_NAME)
}

/// Choose first backup path in `dir` for which `exists` is false.
///
/// # Errors
///
/// - Return [`BackupError::Exhausted`] if every candidate name is taken.
pub fn unique_backup_path(
    dir: &Path,
    file: &Path,
    stamp: &str,
    exists: impl Fn(&Path) -> bool,
) -> Result<PathBuf> {
    let stem = file
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    let extension = file
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_default();

    let first = dir.join(format!("{stem}--{stamp}{extension}"));
    if !exists(&first) {
        return Ok(first);
    }

    (0..MAX_ATTEMPTS)
        .map(|counter| dir.join(format!("{stem}--{stamp}-{counter:04}{extension}")))
        .find(|candidate| !exists(candidate))
        .ok_or_else(|| BackupError::Exhausted {
            path: file.to_path_buf(),
        })
}

/// Timestamp used in backup names.
pub fn backup_stamp(now: DateTime<Local>) -> String {
    now.format("%Y-%m-%d-%H-%M-%S").to_string()
}

/// Copy target file into its backup directory.
///
/// Returns the path of the new backup.
///
/// # Errors
///
/// - Return [`BackupError::CreateDir`] if backup directory cannot be made.
/// - Return [`BackupError::Exhausted`] if no free backup name remains.
/// - Return [`BackupError::Copy`] if the copy fails.
#[instrument(skip(file), level = "debug")]
pub async fn backup_file(file: &Path) -> Result<PathBuf> {
    let dir = backup_dir(file);
    tokio::fs::create_dir_all(&dir)
        .await
        .map_err(|err| BackupError::CreateDir {
            source: err,
            path: dir.clone(),
        })?;

    let target = unique_backup_path(&dir, file, &backup_stamp(Local::now()), |candidate| {
        candidate.exists()
    })?;
    tokio::fs::copy(file, &target)
        .await
        .map_err(|err| BackupError::Copy {
            source: err,
            path: target.clone(),
        })?;

    debug!("backed up {} to {}", file.display(), target.display());
    Ok(target)
}

/// Backup error types.
#[derive(Debug, thiserror::Error)]
pub enum BackupError {
    /// Backup directory cannot be created.
    #[error("failed to create backup directory {:?}", path.display())]
    CreateDir {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Every candidate backup name is already taken.
    #[error("no free backup name left for {:?}", path.display())]
    Exhausted { path: PathBuf },

    /// Copy into backup directory fails.
    #[error("failed to copy backup to {:?}", path.display())]
    Copy {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },
}

/// Friendly result alias :3
pub type Result<T, E = BackupError> = std::result::Result<T, E>;
