//! Snapshots of the application tree.
//!
//! A backup is a gzip-compressed tar of the tree's contents, named
//! `backup_<version>_<millis>.tar.gz`. The millisecond suffix orders backups;
//! retention keeps the newest ones. Symlinks are archived as links. An
//! archive is written under a hidden `.partial` name and renamed once
//! complete, so a failed backup never shows up in [`list_backups`].
//! Functions here block and are run on the blocking pool by the updater.

use crate::error::{UpdateError, UpdateResult};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

const BACKUP_PREFIX: &str = "backup_";
const BACKUP_SUFFIX: &str = ".tar.gz";

/// Millisecond stamp of a backup file name, `None` for foreign files.
pub fn backup_stamp(path: &Path) -> Option<i64> {
    let name = path.file_name()?.to_str()?;
    let stem = name
        .strip_prefix(BACKUP_PREFIX)?
        .strip_suffix(BACKUP_SUFFIX)?;
    let (_, millis) = stem.rsplit_once('_')?;
    millis.parse().ok()
}

/// Backups in `backup_dir`, newest first.
pub fn list_backups(backup_dir: &Path) -> UpdateResult<Vec<PathBuf>> {
    let entries = match fs::read_dir(backup_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(UpdateError::io(backup_dir, e)),
    };

    let mut backups: Vec<(i64, PathBuf)> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter_map(|path| backup_stamp(&path).map(|stamp| (stamp, path)))
        .collect();
    backups.sort_by(|a, b| b.0.cmp(&a.0));
    Ok(backups.into_iter().map(|(_, path)| path).collect())
}

/// Archive the contents of `app_dir` into `backup_dir`.
///
/// The stamp is bumped past any existing backup so names stay unique and
/// strictly ordered.
pub fn create_backup(app_dir: &Path, backup_dir: &Path, version: &str) -> UpdateResult<PathBuf> {
    fs::create_dir_all(backup_dir).map_err(|e| UpdateError::io(backup_dir, e))?;
    if !app_dir.is_dir() {
        return Err(UpdateError::io(
            app_dir,
            std::io::Error::new(std::io::ErrorKind::NotFound, "application directory missing"),
        ));
    }

    let newest = list_backups(backup_dir)?
        .first()
        .and_then(|path| backup_stamp(path))
        .unwrap_or(i64::MIN);
    let stamp = chrono::Utc::now().timestamp_millis().max(newest.saturating_add(1));
    let name = format!("{BACKUP_PREFIX}{version}_{stamp}{BACKUP_SUFFIX}");
    let path = backup_dir.join(&name);
    let partial = backup_dir.join(format!(".{name}.partial"));

    if let Err(e) = write_archive(app_dir, &partial) {
        if let Err(cleanup) = fs::remove_file(&partial) {
            warn!(path = %partial.display(), error = %cleanup, "cannot remove partial backup");
        }
        return Err(e);
    }
    fs::rename(&partial, &path).map_err(|e| UpdateError::io(&path, e))?;

    info!(backup = %path.display(), "application backup created");
    Ok(path)
}

fn write_archive(app_dir: &Path, path: &Path) -> UpdateResult<()> {
    let file = File::create(path).map_err(|e| UpdateError::io(path, e))?;
    let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
    builder.follow_symlinks(false);
    for entry in WalkDir::new(app_dir).min_depth(1) {
        let entry = entry.map_err(|e| UpdateError::archive(e))?;
        let relative = entry
            .path()
            .strip_prefix(app_dir)
            .map_err(|e| UpdateError::archive(e))?;
        let result = if entry.file_type().is_dir() {
            builder.append_dir(relative, entry.path())
        } else {
            builder.append_path_with_name(entry.path(), relative)
        };
        result.map_err(|e| UpdateError::io(entry.path(), e))?;
    }
    let encoder = builder
        .into_inner()
        .map_err(|e| UpdateError::io(path, e))?;
    let file = encoder.finish().map_err(|e| UpdateError::io(path, e))?;
    file.sync_all().map_err(|e| UpdateError::io(path, e))
}

/// Delete all but the `keep` newest backups. Returns the number removed.
pub fn prune_backups(backup_dir: &Path, keep: usize) -> UpdateResult<usize> {
    let mut removed = 0;
    for old in list_backups(backup_dir)?.into_iter().skip(keep) {
        match fs::remove_file(&old) {
            Ok(()) => {
                debug!(backup = %old.display(), "old backup removed");
                removed += 1;
            }
            Err(e) => warn!(backup = %old.display(), error = %e, "cannot remove old backup"),
        }
    }
    Ok(removed)
}

/// Replace `app_dir` with the contents of `backup`.
pub fn restore_backup(backup: &Path, app_dir: &Path) -> UpdateResult<()> {
    let file = File::open(backup).map_err(|e| UpdateError::io(backup, e))?;

    if app_dir.exists() {
        fs::remove_dir_all(app_dir).map_err(|e| UpdateError::io(app_dir, e))?;
    }
    fs::create_dir_all(app_dir).map_err(|e| UpdateError::io(app_dir, e))?;

    tar::Archive::new(GzDecoder::new(file))
        .unpack(app_dir)
        .map_err(|e| UpdateError::io(app_dir, e))?;

    info!(backup = %backup.display(), "application restored from backup");
    Ok(())
}
