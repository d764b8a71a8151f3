//! Top-level orchestration of the access point.
//!
//! The controller owns the connectivity flag and supervises these activities
//! in a [`JoinSet`]:
//!
//! - one card-poll loop per reader (`in`, and `out` on turnstiles)
//! - the connectivity monitor
//! - the update loop, when an updater is attached and enabled
//! - remote-command intake
//!
//! A failed iteration is logged where the loop catches it and followed by a
//! one-second backoff; it never stops the other activities.

use crate::error::ControllerResult;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::task::{Id, JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use turnkey_core::constants::{CHANNEL_IN, CHANNEL_OUT, LOOP_ERROR_BACKOFF_MS};
use turnkey_core::{AccessEvent, CardId, ConnectivityState, DaemonConfig, DeviceKind, Direction};
use turnkey_hardware::{AnyCardReader, CardReader, RelayController};
use turnkey_network::{Backend, CommandReply, CommandSource, RemoteCommand};
use turnkey_storage::{AccessLogger, WhitelistStore};
use turnkey_updater::{AutoUpdater, UpdateOutcome};

/// Controller settings derived from [`DaemonConfig`].
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub device_id: String,
    pub device_kind: DeviceKind,
    /// Allow whitelist decisions while offline.
    pub fallback_enabled: bool,
    pub read_timeout: Duration,
    pub poll_interval: Duration,
    pub connectivity_interval: Duration,
    pub auto_update: bool,
    pub update_check_interval: Duration,
    /// How long running activities get to finish after shutdown is requested.
    pub shutdown_grace: Duration,
    pub error_backoff: Duration,
}

impl From<&DaemonConfig> for ControllerConfig {
    fn from(config: &DaemonConfig) -> Self {
        Self {
            device_id: config.device.id.clone(),
            device_kind: config.device.kind,
            fallback_enabled: config.access.fallback_enabled,
            read_timeout: config.reader.read_timeout,
            poll_interval: config.reader.poll_interval,
            connectivity_interval: config.access.connectivity_interval,
            auto_update: config.update.enabled,
            update_check_interval: config.update.check_interval,
            shutdown_grace: config.access.shutdown_grace,
            error_backoff: Duration::from_millis(LOOP_ERROR_BACKOFF_MS),
        }
    }
}

/// Card readers handed to [`TurnstileController::run`].
#[derive(Debug, Default)]
pub struct Readers {
    pub inbound: Option<AnyCardReader>,
    /// Ignored on doors.
    pub outbound: Option<AnyCardReader>,
}

/// How a supervised task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskTermination {
    Success,
    Error,
    /// Aborted after the shutdown grace period.
    Cancelled,
    Panic,
}

fn classify_task_result(result: &Result<(Id, ControllerResult<()>), JoinError>) -> TaskTermination {
    match result {
        Ok((_, Ok(()))) => TaskTermination::Success,
        Ok((_, Err(_))) => TaskTermination::Error,
        Err(e) if e.is_cancelled() => TaskTermination::Cancelled,
        Err(_) => TaskTermination::Panic,
    }
}

/// Supervised tasks and their names.
struct Activities {
    tasks: JoinSet<ControllerResult<()>>,
    names: HashMap<Id, &'static str>,
    failures: usize,
}

impl Activities {
    fn new() -> Self {
        Self {
            tasks: JoinSet::new(),
            names: HashMap::new(),
            failures: 0,
        }
    }

    fn spawn<F>(&mut self, name: &'static str, task: F)
    where
        F: Future<Output = ControllerResult<()>> + Send + 'static,
    {
        let id = self.tasks.spawn(task).id();
        self.names.insert(id, name);
        debug!(activity = name, "activity started");
    }

    fn report(&mut self, result: Result<(Id, ControllerResult<()>), JoinError>) {
        let id = match &result {
            Ok((id, _)) => *id,
            Err(e) => e.id(),
        };
        let name = self.names.remove(&id).unwrap_or("unknown");
        match classify_task_result(&result) {
            TaskTermination::Success => info!(activity = name, "activity finished"),
            TaskTermination::Error => {
                self.failures += 1;
                if let Ok((_, Err(e))) = &result {
                    error!(activity = name, error = %e, "activity failed");
                }
            }
            TaskTermination::Cancelled => warn!(activity = name, "activity aborted"),
            TaskTermination::Panic => {
                self.failures += 1;
                error!(activity = name, "activity panicked");
            }
        }
    }

    /// Wait up to `grace` for every task, then abort the rest.
    async fn wind_down(mut self, grace: Duration) {
        let finished = tokio::time::timeout(grace, async {
            while let Some(result) = self.tasks.join_next_with_id().await {
                self.report(result);
            }
        })
        .await;

        if finished.is_err() {
            warn!(
                remaining = self.tasks.len(),
                grace_ms = grace.as_millis() as u64,
                "activities still running after grace period, aborting"
            );
            self.tasks.abort_all();
            while let Some(result) = self.tasks.join_next_with_id().await {
                self.report(result);
            }
        }
        if self.failures > 0 {
            warn!(failures = self.failures, "activities ended abnormally during this run");
        }
    }
}

/// The access point's control loop.
pub struct TurnstileController<B: Backend> {
    config: ControllerConfig,
    backend: Arc<B>,
    relay: Arc<RelayController>,
    logger: Arc<AccessLogger>,
    whitelist: Arc<WhitelistStore>,
    updater: Option<Arc<AutoUpdater<B>>>,
    online: AtomicBool,
    shutdown: CancellationToken,
}

impl<B: Backend> TurnstileController<B> {
    pub fn new(
        config: ControllerConfig,
        backend: Arc<B>,
        relay: Arc<RelayController>,
        logger: Arc<AccessLogger>,
        whitelist: Arc<WhitelistStore>,
    ) -> Self {
        Self {
            config,
            backend,
            relay,
            logger,
            whitelist,
            updater: None,
            online: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
        }
    }

    /// Attach the self-updater driven by the update loop.
    pub fn with_updater(mut self, updater: Arc<AutoUpdater<B>>) -> Self {
        self.updater = Some(updater);
        self
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn relay(&self) -> &Arc<RelayController> {
        &self.relay
    }

    pub fn logger(&self) -> &Arc<AccessLogger> {
        &self.logger
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    pub fn connectivity(&self) -> ConnectivityState {
        ConnectivityState::from_online(self.is_online())
    }

    /// Token cancelled by [`shutdown`](Self::shutdown).
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Ask every activity to stop; `run` then winds down.
    pub fn shutdown(&self) {
        info!("shutdown requested");
        self.shutdown.cancel();
    }

    /// Probe the backend and, when reachable, sync the offline queue and
    /// refresh the whitelist.
    pub async fn initialize(&self) -> ConnectivityState {
        let online = self.backend.test_connection().await;
        self.online.store(online, Ordering::SeqCst);
        if online {
            info!(device_id = %self.config.device_id, "backend reachable at startup");
            self.resynchronize().await;
        } else {
            warn!(device_id = %self.config.device_id, "backend unreachable at startup, running offline");
        }
        ConnectivityState::from_online(online)
    }

    /// Run the authorization pipeline for one badge read.
    ///
    /// Exactly one access event is recorded. A persistence failure is logged
    /// and does not prevent the barrier from opening. `raw` must name a card:
    /// readers discard blank or garbled reads, and such input is refused here
    /// without an event or actuation.
    pub async fn process_card(&self, raw: &str, direction: Direction) -> ControllerResult<AccessEvent> {
        let card = CardId::new(raw)?;
        let authorized = self.authorize(&card, direction).await;
        let event = AccessEvent::new(
            self.config.device_id.clone(),
            card,
            direction,
            authorized,
            !self.is_online(),
        );
        self.record_and_actuate(&event).await?;
        Ok(event)
    }

    /// Open the barrier on operator request, bypassing authorization.
    pub async fn manual_open(&self, direction: Direction) -> ControllerResult<AccessEvent> {
        info!(%direction, "manual open requested");
        let event = AccessEvent::new(
            self.config.device_id.clone(),
            CardId::manual_open(),
            direction,
            true,
            !self.is_online(),
        );
        self.record_and_actuate(&event).await?;
        Ok(event)
    }

    async fn authorize(&self, card: &CardId, direction: Direction) -> bool {
        if self.is_online() {
            match self.backend.check_access(card, direction).await {
                Ok(decision) => return decision.authorized,
                Err(e) => warn!(
                    card = %card.masked(),
                    error = %e,
                    "backend access check failed, using local fallback"
                ),
            }
        }
        if !self.config.fallback_enabled {
            debug!(card = %card.masked(), "fallback disabled, denying");
            return false;
        }
        self.whitelist.contains(card).await
    }

    async fn record_and_actuate(&self, event: &AccessEvent) -> ControllerResult<()> {
        if let Err(e) = self.logger.log(event.clone()).await {
            error!(
                card = %event.card_id().masked(),
                error = %e,
                "failed to persist access event"
            );
        }
        if event.authorized() {
            self.open(event.direction()).await?;
        }
        Ok(())
    }

    async fn open(&self, direction: Direction) -> ControllerResult<()> {
        let channel = match direction {
            Direction::In => CHANNEL_IN,
            Direction::Out if self.config.device_kind.is_bidirectional() => CHANNEL_OUT,
            Direction::Out => {
                warn!(
                    device_kind = self.config.device_kind.as_str(),
                    "device has no outbound channel, not actuating"
                );
                return Ok(());
            }
        };
        self.relay.activate(channel, None).await?;
        Ok(())
    }

    /// Upload queued offline events; only the uploaded batch is removed.
    /// Returns the number of events synced.
    pub async fn sync_offline_logs(&self) -> ControllerResult<usize> {
        let batch = self.logger.get_all().await;
        if batch.is_empty() {
            return Ok(0);
        }
        if !self.backend.sync_offline_logs(&batch).await? {
            warn!(pending = batch.len(), "backend refused offline events, keeping them");
            return Ok(0);
        }
        let removed = self.logger.acknowledge(&batch).await?;
        info!(synced = removed, "offline events synchronized");
        Ok(removed)
    }

    /// Replace the local whitelist with the backend's.
    pub async fn refresh_whitelist(&self) -> ControllerResult<()> {
        let cards = self.backend.get_whitelist().await?;
        let count = cards.len();
        if self.whitelist.replace(cards).await? {
            info!(cards = count, "whitelist refreshed");
        }
        Ok(())
    }

    async fn resynchronize(&self) {
        if let Err(e) = self.sync_offline_logs().await {
            error!(error = %e, "offline sync failed");
        }
        if let Err(e) = self.refresh_whitelist().await {
            error!(error = %e, "whitelist refresh failed");
        }
    }

    /// Re-probe the backend. The offline to online edge triggers a sync and a
    /// whitelist refresh.
    pub async fn check_connectivity(&self) -> ConnectivityState {
        let online = self.backend.test_connection().await;
        let was_online = self.online.swap(online, Ordering::SeqCst);
        match (was_online, online) {
            (false, true) => {
                info!("backend connection restored");
                self.resynchronize().await;
            }
            (true, false) => warn!("backend connection lost, switching to offline mode"),
            _ => debug!(online, "connectivity unchanged"),
        }
        ConnectivityState::from_online(online)
    }

    /// Start every activity and supervise them until shutdown.
    ///
    /// On shutdown, running activities get the grace period to finish (an open
    /// relay window completes), an update session in flight runs to commit or
    /// rollback, the offline queue is synced if online, and the relay outputs
    /// are released.
    pub async fn run<C: CommandSource>(self: Arc<Self>, readers: Readers, commands: C) -> ControllerResult<()> {
        let mut activities = Activities::new();

        if let Some(reader) = readers.inbound {
            activities.spawn("card-poll-in", Arc::clone(&self).poll_loop(reader, Direction::In));
        } else {
            warn!("no inbound reader configured");
        }
        match readers.outbound {
            Some(reader) if self.config.device_kind.is_bidirectional() => {
                activities.spawn("card-poll-out", Arc::clone(&self).poll_loop(reader, Direction::Out));
            }
            Some(_) => warn!("outbound reader ignored on a door"),
            None => {}
        }
        activities.spawn("connectivity-monitor", Arc::clone(&self).connectivity_loop());
        match &self.updater {
            Some(updater) if self.config.auto_update => {
                activities.spawn("update", Arc::clone(&self).update_loop(Arc::clone(updater)));
            }
            _ => info!("automatic updates disabled"),
        }
        activities.spawn("remote-commands", Arc::clone(&self).command_loop(commands));

        info!(
            device_id = %self.config.device_id,
            device_kind = self.config.device_kind.as_str(),
            online = self.is_online(),
            "controller running"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                Some(result) = activities.tasks.join_next_with_id() => activities.report(result),
            }
        }

        activities.wind_down(self.config.shutdown_grace).await;
        if let Some(updater) = &self.updater
            && updater.is_updating()
        {
            info!(phase = %updater.phase(), "waiting for the update session to finish");
            updater.wait_idle().await;
        }
        if self.is_online()
            && let Err(e) = self.sync_offline_logs().await
        {
            error!(error = %e, "final offline sync failed");
        }
        if let Err(e) = self.relay.release() {
            error!(error = %e, "relay release failed");
        }
        info!("controller stopped");
        Ok(())
    }

    /// Sleep unless shutdown comes first. Returns `false` on shutdown.
    async fn pause(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = self.shutdown.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }

    async fn poll_loop(self: Arc<Self>, mut reader: AnyCardReader, direction: Direction) -> ControllerResult<()> {
        info!(reader = reader.name(), %direction, "card polling started");
        loop {
            let card = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                card = reader.read_card(self.config.read_timeout) => card,
            };
            if let Some(raw) = card
                && let Err(e) = self.process_card(&raw, direction).await
            {
                error!(%direction, error = %e, "card handling failed");
                if !self.pause(self.config.error_backoff).await {
                    break;
                }
            }
            if !self.pause(self.config.poll_interval).await {
                break;
            }
        }
        Ok(())
    }

    async fn connectivity_loop(self: Arc<Self>) -> ControllerResult<()> {
        while self.pause(self.config.connectivity_interval).await {
            self.check_connectivity().await;
        }
        Ok(())
    }

    async fn update_loop(self: Arc<Self>, updater: Arc<AutoUpdater<B>>) -> ControllerResult<()> {
        loop {
            if self.is_online() {
                match updater.check_and_update().await {
                    Ok(UpdateOutcome::Installed { version, restart_scheduled }) => {
                        info!(%version, restart_scheduled, "update installed")
                    }
                    Ok(outcome) => debug!(?outcome, "update check finished"),
                    Err(e) => {
                        error!(error = %e, "update attempt failed");
                        if !self.pause(self.config.error_backoff).await {
                            break;
                        }
                    }
                }
            } else {
                debug!("offline, skipping update check");
            }
            if !self.pause(self.config.update_check_interval).await {
                break;
            }
        }
        Ok(())
    }

    async fn command_loop<C: CommandSource>(self: Arc<Self>, mut commands: C) -> ControllerResult<()> {
        loop {
            let envelope = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                envelope = commands.next_command() => envelope,
            };
            let Some(envelope) = envelope else {
                info!("remote command source closed");
                break;
            };

            let reply = match envelope.command {
                RemoteCommand::OpenTurnstile { direction } => {
                    let result = self.manual_open(direction).await.map(|_| ());
                    if let Err(e) = &result {
                        error!(%direction, error = %e, "manual open failed");
                    }
                    CommandReply::from(result)
                }
                RemoteCommand::Unknown => {
                    warn!("unknown remote command acknowledged without action");
                    CommandReply::Success
                }
            };
            envelope.acknowledge(reply);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use turnkey_hardware::RelayError;

    #[test]
    fn test_config_from_daemon_config() {
        let mut daemon = DaemonConfig::default();
        daemon.device.kind = DeviceKind::Door;
        daemon.access.fallback_enabled = false;
        let config = ControllerConfig::from(&daemon);
        assert_eq!(config.device_kind, DeviceKind::Door);
        assert!(!config.fallback_enabled);
        assert_eq!(config.poll_interval, Duration::from_millis(100));
        assert_eq!(config.connectivity_interval, Duration::from_secs(30));
        assert_eq!(config.error_backoff, Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_classify_task_result() {
        let mut tasks: JoinSet<ControllerResult<()>> = JoinSet::new();
        tasks.spawn(async { Ok(()) });
        tasks.spawn(async { Err(RelayError::unknown_channel(9).into()) });
        tasks.spawn(async {
            if true {
                panic!("boom");
            }
            Ok(())
        });
        tasks.spawn(async {
            std::future::pending::<()>().await;
            Ok(())
        });
        tokio::task::yield_now().await;

        let mut seen = Vec::new();
        for _ in 0..3 {
            let result = tasks.join_next_with_id().await.unwrap();
            seen.push(classify_task_result(&result));
        }
        tasks.abort_all();
        let result = tasks.join_next_with_id().await.unwrap();
        seen.push(classify_task_result(&result));

        for expected in [
            TaskTermination::Success,
            TaskTermination::Error,
            TaskTermination::Panic,
        ] {
            assert!(seen[..3].contains(&expected));
        }
        assert_eq!(seen[3], TaskTermination::Cancelled);
    }
}
