//! Transactional self-update.
//!
//! [`AutoUpdater::check_and_update`] runs at most one session at a time. A
//! session downloads the package, verifies it, snapshots the live tree,
//! stages the package, swaps the tree and commits the new version. Any
//! failure after the swap started restores the snapshot.
//!
//! The session runs on its own task. Dropping the future returned by
//! `check_and_update` leaves the session running to completion or rollback;
//! [`AutoUpdater::wait_idle`] waits for it.

use crate::archive::{extract, verify_package};
use crate::backup::{create_backup, list_backups, prune_backups, restore_backup};
use crate::error::{UpdateError, UpdateResult};
use crate::hooks::{install_dependencies, make_scripts_executable, run_script};
use crate::phase::{PhaseMachine, PhaseTransition, UpdatePhase};
use bytes::Bytes;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use turnkey_core::DaemonConfig;
use turnkey_core::constants::{
    BACKUP_RETENTION, DEFAULT_VERSION, PACKAGE_APP_DIR, POST_UPDATE_HOOK, PRE_UPDATE_HOOK,
};
use turnkey_network::{Backend, UpdateMetadata, UpdateStatus};

/// Updater settings derived from [`DaemonConfig`].
#[derive(Debug, Clone)]
pub struct UpdaterConfig {
    pub enabled: bool,
    /// Live application tree.
    pub app_dir: PathBuf,
    pub backup_dir: PathBuf,
    /// Staging area for extracted packages.
    pub update_dir: PathBuf,
    pub restart_marker: PathBuf,
    pub version_file: PathBuf,
    /// Manifest name looked up in the new tree.
    pub dependency_manifest: String,
    pub dependency_installer: Vec<String>,
    pub backup_retention: usize,
}

impl From<&DaemonConfig> for UpdaterConfig {
    fn from(config: &DaemonConfig) -> Self {
        let update = &config.update;
        Self {
            enabled: update.enabled,
            app_dir: update.app_dir.clone(),
            backup_dir: update.backup_dir.clone(),
            update_dir: update.update_dir.clone(),
            restart_marker: update.restart_marker.clone(),
            version_file: update.version_file(),
            dependency_manifest: update.dependency_manifest.clone(),
            dependency_installer: update.dependency_installer.clone(),
            backup_retention: BACKUP_RETENTION,
        }
    }
}

/// Result of one `check_and_update` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    Disabled,
    /// Another session is running.
    Busy,
    NoUpdate,
    /// Offered version is not newer than the installed one.
    UpToDate { current: String, offered: String },
    Installed {
        version: String,
        restart_scheduled: bool,
    },
}

/// Whether `candidate` should replace `current`.
///
/// Semantic versions are compared by precedence; anything else falls back to
/// plain inequality.
pub fn is_newer_version(candidate: &str, current: &str) -> bool {
    fn parse(v: &str) -> Option<semver::Version> {
        semver::Version::parse(v.trim().trim_start_matches('v')).ok()
    }
    match (parse(candidate), parse(current)) {
        (Some(candidate), Some(current)) => candidate > current,
        _ => candidate.trim() != current.trim(),
    }
}

/// Clears the active flag when the session task ends, panics included.
struct SessionGuard(Arc<watch::Sender<bool>>);

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.0.send_replace(false);
    }
}

/// State of the running session.
struct UpdateSession {
    package: UpdateMetadata,
    staging: PathBuf,
    backup: Option<PathBuf>,
}

/// Self-updater bound to a backend.
pub struct AutoUpdater<B> {
    config: UpdaterConfig,
    backend: Arc<B>,
    phase: Mutex<PhaseMachine>,
    active: Arc<watch::Sender<bool>>,
}

impl<B: Backend> AutoUpdater<B> {
    pub fn new(config: UpdaterConfig, backend: Arc<B>) -> Self {
        Self {
            config,
            backend,
            phase: Mutex::new(PhaseMachine::new()),
            active: Arc::new(watch::Sender::new(false)),
        }
    }

    pub fn config(&self) -> &UpdaterConfig {
        &self.config
    }

    /// Create the staging and backup directories.
    pub async fn initialize(&self) -> UpdateResult<()> {
        for dir in [&self.config.update_dir, &self.config.backup_dir] {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| UpdateError::io(dir, e))?;
        }
        info!(
            version = %self.current_version().await,
            enabled = self.config.enabled,
            "auto-updater initialized"
        );
        Ok(())
    }

    /// Installed version, `1.0.0` when the marker is missing or unreadable.
    pub async fn current_version(&self) -> String {
        match tokio::fs::read_to_string(&self.config.version_file).await {
            Ok(contents) if !contents.trim().is_empty() => contents.trim().to_string(),
            Ok(_) => DEFAULT_VERSION.to_string(),
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %self.config.version_file.display(), error = %e, "cannot read version marker");
                }
                DEFAULT_VERSION.to_string()
            }
        }
    }

    pub fn is_updating(&self) -> bool {
        *self.active.borrow()
    }

    /// Wait until no session is running.
    pub async fn wait_idle(&self) {
        let mut idle = self.active.subscribe();
        let _ = idle.wait_for(|active| !*active).await;
    }

    pub fn phase(&self) -> UpdatePhase {
        self.machine().current()
    }

    pub fn history(&self) -> Vec<PhaseTransition> {
        self.machine().history().iter().cloned().collect()
    }

    fn machine(&self) -> MutexGuard<'_, PhaseMachine> {
        self.phase.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn advance(&self, next: UpdatePhase) -> UpdateResult<()> {
        let transition = self.machine().transition_to(next)?;
        debug!(from = %transition.from, to = %transition.to, "update phase");
        Ok(())
    }

    /// Query the backend and install a newer package if one is offered.
    ///
    /// Returns immediately with [`UpdateOutcome::Busy`] while another session
    /// runs. A failed session is reported to the backend, rolled back when
    /// needed, and returned as the error.
    ///
    /// The session itself is spawned: cancelling this call never interrupts
    /// it between swapping the tree and committing or restoring.
    pub async fn check_and_update(self: &Arc<Self>) -> UpdateResult<UpdateOutcome> {
        if !self.config.enabled {
            return Ok(UpdateOutcome::Disabled);
        }
        let claimed = self.active.send_if_modified(|active| {
            if *active {
                false
            } else {
                *active = true;
                true
            }
        });
        if !claimed {
            debug!("update already in progress, skipping");
            return Ok(UpdateOutcome::Busy);
        }
        let guard = SessionGuard(Arc::clone(&self.active));

        let updater = Arc::clone(self);
        tokio::spawn(async move {
            let _guard = guard;
            updater.run_check().await
        })
        .await?
    }

    async fn run_check(&self) -> UpdateResult<UpdateOutcome> {
        // A previous session may have died mid-flight through a panic.
        if self.phase() != UpdatePhase::Idle {
            self.machine().reset();
        }

        self.advance(UpdatePhase::Checking)?;
        info!("checking for updates");
        let metadata = match self.backend.check_updates().await {
            Ok(metadata) => metadata,
            Err(e) => {
                self.advance(UpdatePhase::Failed)?;
                self.advance(UpdatePhase::Idle)?;
                return Err(e.into());
            }
        };

        let current = self.current_version().await;
        let package = match metadata {
            Some(package) if package.update_available => package,
            _ => {
                debug!("no update available");
                self.advance(UpdatePhase::Idle)?;
                return Ok(UpdateOutcome::NoUpdate);
            }
        };
        if !is_newer_version(&package.version, &current) {
            debug!(%current, offered = %package.version, "installed version is current");
            self.advance(UpdatePhase::Idle)?;
            return Ok(UpdateOutcome::UpToDate {
                current,
                offered: package.version,
            });
        }

        info!(%current, target = %package.version, update_id = %package.id, "update available");
        self.report(&package.id, UpdateStatus::Started, None).await;

        let mut session = UpdateSession {
            staging: self.config.update_dir.join(format!("extracted_{}", package.id)),
            package,
            backup: None,
        };
        let result = self.run_session(&mut session, &current).await;
        self.discard_staging(&session.staging).await;

        match result {
            Ok(restart_scheduled) => {
                self.report(&session.package.id, UpdateStatus::Completed, None)
                    .await;
                info!(version = %session.package.version, "update completed");
                Ok(UpdateOutcome::Installed {
                    version: session.package.version,
                    restart_scheduled,
                })
            }
            Err(e) => {
                let failed_in = self.phase();
                error!(phase = %failed_in, error = %e, update_id = %session.package.id, "update failed");
                self.advance(UpdatePhase::Failed)?;
                let message = e.to_string();
                self.report(&session.package.id, UpdateStatus::Failed, Some(&message))
                    .await;
                if failed_in.modifies_app_tree() {
                    self.advance(UpdatePhase::RollingBack)?;
                    if let Err(rollback) = self.roll_back(session.backup.as_deref()).await {
                        error!(error = %rollback, "rollback failed, application tree may be inconsistent");
                    }
                }
                self.advance(UpdatePhase::Idle)?;
                Err(e)
            }
        }
    }

    /// Phases DOWNLOADING through VERSION_COMMIT (and RESTART_SCHEDULED).
    /// Returns whether a restart was requested.
    async fn run_session(&self, session: &mut UpdateSession, current: &str) -> UpdateResult<bool> {
        self.advance(UpdatePhase::Downloading)?;
        let data: Bytes = self.backend.download_update(&session.package).await?;

        self.advance(UpdatePhase::Verifying)?;
        verify_package(&data, &session.package)?;

        self.advance(UpdatePhase::BackingUp)?;
        let (app_dir, backup_dir) = (self.config.app_dir.clone(), self.config.backup_dir.clone());
        let (version, retention) = (current.to_string(), self.config.backup_retention);
        let backup = tokio::task::spawn_blocking(move || {
            let backup = create_backup(&app_dir, &backup_dir, &version)?;
            prune_backups(&backup_dir, retention)?;
            Ok::<_, UpdateError>(backup)
        })
        .await??;
        session.backup = Some(backup);

        self.advance(UpdatePhase::Extracting)?;
        self.discard_staging(&session.staging).await;
        tokio::fs::create_dir_all(&session.staging)
            .await
            .map_err(|e| UpdateError::io(&session.staging, e))?;
        let (staging, format) = (session.staging.clone(), session.package.format.clone());
        tokio::task::spawn_blocking(move || extract(&data, &format, &staging)).await??;

        self.advance(UpdatePhase::Applying)?;
        self.apply(&session.staging).await?;

        self.advance(UpdatePhase::VersionCommit)?;
        self.write_version(&session.package.version).await?;

        if session.package.requires_restart {
            self.advance(UpdatePhase::RestartScheduled)?;
            self.schedule_restart().await;
        }
        self.advance(UpdatePhase::Idle)?;
        Ok(session.package.requires_restart)
    }

    async fn apply(&self, staging: &Path) -> UpdateResult<()> {
        let pre = staging.join(PRE_UPDATE_HOOK);
        if pre.is_file() {
            run_script(&pre, staging).await?;
        }

        let staged_app = staging.join(PACKAGE_APP_DIR);
        if staged_app.is_dir() {
            let app_dir = self.config.app_dir.clone();
            tokio::task::spawn_blocking(move || {
                replace_tree(&staged_app, &app_dir)?;
                make_scripts_executable(&app_dir)
            })
            .await??;
            info!(app_dir = %self.config.app_dir.display(), "application tree replaced");
        } else {
            warn!("package carries no app/ tree, keeping current files");
        }

        let post = staging.join(POST_UPDATE_HOOK);
        if post.is_file() {
            run_script(&post, staging).await?;
        }

        let manifest = self.config.app_dir.join(&self.config.dependency_manifest);
        if manifest.is_file() {
            install_dependencies(&self.config.dependency_installer, &manifest).await?;
        }
        Ok(())
    }

    async fn write_version(&self, version: &str) -> UpdateResult<()> {
        let path = &self.config.version_file;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| UpdateError::io(parent, e))?;
        }
        tokio::fs::write(path, version)
            .await
            .map_err(|e| UpdateError::io(path, e))?;
        info!(%version, "version marker updated");
        Ok(())
    }

    async fn schedule_restart(&self) {
        let marker = &self.config.restart_marker;
        let result = async {
            if let Some(parent) = marker.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(marker, chrono::Utc::now().to_rfc3339()).await
        }
        .await;
        match result {
            Ok(()) => info!(marker = %marker.display(), "restart requested"),
            Err(e) => error!(marker = %marker.display(), error = %e, "cannot create restart marker"),
        }
    }

    async fn roll_back(&self, backup: Option<&Path>) -> UpdateResult<()> {
        let backup = match backup {
            Some(backup) => backup.to_path_buf(),
            None => {
                let backup_dir = self.config.backup_dir.clone();
                tokio::task::spawn_blocking(move || list_backups(&backup_dir))
                    .await??
                    .into_iter()
                    .next()
                    .ok_or_else(|| UpdateError::NoBackup(self.config.backup_dir.clone()))?
            }
        };
        warn!(backup = %backup.display(), "rolling back application tree");
        let app_dir = self.config.app_dir.clone();
        tokio::task::spawn_blocking(move || restore_backup(&backup, &app_dir)).await?
    }

    async fn discard_staging(&self, staging: &Path) {
        match tokio::fs::remove_dir_all(staging).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %staging.display(), error = %e, "cannot remove staging directory"),
        }
    }

    async fn report(&self, update_id: &str, status: UpdateStatus, error: Option<&str>) {
        if let Err(e) = self
            .backend
            .report_update_status(update_id, status, error)
            .await
        {
            warn!(%update_id, %status, error = %e, "cannot report update status");
        }
    }
}

/// Replace `dest` with `source`, moving when possible and copying across
/// filesystems.
fn replace_tree(source: &Path, dest: &Path) -> UpdateResult<()> {
    if dest.exists() {
        std::fs::remove_dir_all(dest).map_err(|e| UpdateError::io(dest, e))?;
    }
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent).map_err(|e| UpdateError::io(parent, e))?;
    }
    if std::fs::rename(source, dest).is_ok() {
        return Ok(());
    }

    for entry in walkdir::WalkDir::new(source) {
        let entry = entry.map_err(UpdateError::archive)?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(UpdateError::archive)?;
        let target = dest.join(relative);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target).map_err(|e| UpdateError::io(&target, e))?;
        } else if entry.file_type().is_symlink() {
            copy_link(entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), &target).map_err(|e| UpdateError::io(&target, e))?;
        }
    }
    Ok(())
}

/// Recreate the link at `source` as `target`, keeping its target text.
#[cfg(unix)]
fn copy_link(source: &Path, target: &Path) -> UpdateResult<()> {
    let points_to = std::fs::read_link(source).map_err(|e| UpdateError::io(source, e))?;
    std::os::unix::fs::symlink(&points_to, target).map_err(|e| UpdateError::io(target, e))
}

#[cfg(not(unix))]
fn copy_link(source: &Path, target: &Path) -> UpdateResult<()> {
    std::fs::copy(source, target)
        .map(|_| ())
        .map_err(|e| UpdateError::io(target, e))
}
