//! Access scenarios run against mock readers, relays and backend.

use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use turnkey_core::constants::MANUAL_OPEN_CARD_ID;
use turnkey_core::{AccessEvent, CardId, ConnectivityState, DeviceKind, Direction};
use turnkey_hardware::mock::{MockActuator, MockActuatorHandle, MockReader};
use turnkey_hardware::{AnyActuator, RelayController};
use turnkey_network::{
    ChannelCommandSource, CommandEnvelope, CommandReply, MockBackend, RemoteCommand,
};
use turnkey_storage::{AccessLogger, WhitelistStore};
use turnkey_turnstile::{ControllerConfig, Readers, TurnstileController};

const OPEN: Duration = Duration::from_secs(3);

fn config(kind: DeviceKind) -> ControllerConfig {
    ControllerConfig {
        device_id: "turnstile_001".to_string(),
        device_kind: kind,
        fallback_enabled: true,
        read_timeout: Duration::from_millis(50),
        poll_interval: Duration::from_millis(10),
        connectivity_interval: Duration::from_secs(30),
        auto_update: false,
        update_check_interval: Duration::from_secs(3600),
        shutdown_grace: Duration::from_secs(5),
        error_backoff: Duration::from_millis(50),
    }
}

struct Harness {
    dir: TempDir,
    backend: MockBackend,
    relay_in: MockActuatorHandle,
    relay_out: MockActuatorHandle,
    controller: Arc<TurnstileController<MockBackend>>,
}

struct Setup {
    config: ControllerConfig,
    whitelist: Vec<&'static str>,
    logs_path: Option<&'static str>,
    open: Duration,
}

impl Default for Setup {
    fn default() -> Self {
        Self {
            config: config(DeviceKind::Turnstile),
            whitelist: Vec::new(),
            logs_path: None,
            open: OPEN,
        }
    }
}

impl Harness {
    async fn start(backend: MockBackend, setup: Setup) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let whitelist_path = dir.path().join("whitelist.json");
        if !setup.whitelist.is_empty() {
            std::fs::write(&whitelist_path, serde_json::to_string(&setup.whitelist).unwrap())
                .unwrap();
        }
        let logs_path = match setup.logs_path {
            Some(relative) => dir.path().join(relative),
            None => dir.path().join("offline_logs.json"),
        };

        let (actuator_in, relay_in) = MockActuator::new("relay-1");
        let (actuator_out, relay_out) = MockActuator::new("relay-2");
        let relay = RelayController::new(
            vec![
                (1, AnyActuator::from(actuator_in)),
                (2, AnyActuator::from(actuator_out)),
            ],
            setup.open,
        );
        let logger = AccessLogger::open(logs_path, 1000).await.unwrap();
        let whitelist = WhitelistStore::open(whitelist_path).await;

        let controller = TurnstileController::new(
            setup.config,
            Arc::new(backend.clone()),
            Arc::new(relay),
            Arc::new(logger),
            Arc::new(whitelist),
        );
        Self {
            dir,
            backend,
            relay_in,
            relay_out,
            controller: Arc::new(controller),
        }
    }

    fn path(&self, name: &str) -> std::path::PathBuf {
        self.dir.path().join(name)
    }
}

fn offline_backend() -> MockBackend {
    let backend = MockBackend::new();
    backend.set_online(false);
    backend
}

#[tokio::test(start_paused = true)]
async fn test_online_authorized_card_opens_inbound_relay() {
    let backend = MockBackend::new();
    backend.authorize("123456789");
    let h = Harness::start(backend, Setup::default()).await;
    assert_eq!(h.controller.initialize().await, ConnectivityState::Online);

    let started = tokio::time::Instant::now();
    let event = h
        .controller
        .process_card("123456789", Direction::In)
        .await
        .unwrap();
    assert!(started.elapsed() >= OPEN);

    assert_eq!(event.card_id().as_str(), "123456789");
    assert_eq!(event.direction(), Direction::In);
    assert!(event.authorized());
    assert!(!event.offline_mode());
    assert_eq!(event.device_id(), "turnstile_001");

    assert_eq!(h.relay_in.transitions(), vec![true, false]);
    assert!(h.relay_out.transitions().is_empty());
    assert!(h.controller.logger().is_empty().await);
    assert_eq!(
        h.backend.access_checks(),
        vec![("123456789".to_string(), Direction::In)]
    );
}

#[tokio::test(start_paused = true)]
async fn test_online_decision_ignores_whitelist() {
    let backend = MockBackend::new();
    backend.authorize("AUTH01");
    let setup = Setup {
        whitelist: vec!["LOCAL01"],
        ..Setup::default()
    };
    let h = Harness::start(backend, setup).await;
    h.controller.initialize().await;

    let granted = h.controller.process_card("AUTH01", Direction::Out).await.unwrap();
    let denied = h.controller.process_card("LOCAL01", Direction::In).await.unwrap();

    assert!(granted.authorized());
    assert!(!denied.authorized());
    assert_eq!(h.relay_out.activations(), 1);
    assert_eq!(h.relay_in.activations(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_offline_whitelist_fallback() {
    let setup = Setup {
        whitelist: vec!["04A1B2C3"],
        ..Setup::default()
    };
    let h = Harness::start(offline_backend(), setup).await;
    assert_eq!(h.controller.initialize().await, ConnectivityState::Offline);

    let granted = h.controller.process_card("04A1B2C3", Direction::In).await.unwrap();
    let denied = h.controller.process_card("FFFFFFFF", Direction::In).await.unwrap();

    assert!(granted.authorized());
    assert!(granted.offline_mode());
    assert!(!denied.authorized());
    assert_eq!(h.relay_in.activations(), 1);

    let queued = h.controller.logger().get_all().await;
    assert_eq!(queued, vec![granted, denied]);
}

#[tokio::test(start_paused = true)]
async fn test_fallback_disabled_denies_offline() {
    let mut config = config(DeviceKind::Turnstile);
    config.fallback_enabled = false;
    let setup = Setup {
        config,
        whitelist: vec!["04A1B2C3"],
        ..Setup::default()
    };
    let h = Harness::start(offline_backend(), setup).await;
    h.controller.initialize().await;

    let event = h.controller.process_card("04A1B2C3", Direction::In).await.unwrap();
    assert!(!event.authorized());
    assert!(event.offline_mode());
    assert_eq!(h.relay_in.activations(), 0);
    assert_eq!(h.controller.logger().len().await, 1);
}

#[tokio::test(start_paused = true)]
async fn test_backend_failure_while_online_uses_whitelist() {
    let backend = MockBackend::new();
    backend.fail_access_checks(true);
    let setup = Setup {
        whitelist: vec!["04A1B2C3"],
        ..Setup::default()
    };
    let h = Harness::start(backend, setup).await;
    h.controller.initialize().await;

    let event = h.controller.process_card("04A1B2C3", Direction::In).await.unwrap();
    assert!(event.authorized());
    assert!(!event.offline_mode());
    assert_eq!(h.relay_in.activations(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_drains_queue_and_refreshes_whitelist() {
    let backend = offline_backend();
    backend.set_whitelist(&["A1", "B2", "C3"]);
    let h = Harness::start(backend.clone(), Setup::default()).await;
    h.controller.initialize().await;

    h.controller.process_card("A1", Direction::In).await.unwrap();
    h.controller.process_card("B2", Direction::Out).await.unwrap();
    assert_eq!(h.controller.logger().len().await, 2);

    assert_eq!(
        h.controller.check_connectivity().await,
        ConnectivityState::Offline
    );
    assert!(backend.synced().is_empty());

    backend.set_online(true);
    assert_eq!(
        h.controller.check_connectivity().await,
        ConnectivityState::Online
    );

    let synced = backend.synced();
    assert_eq!(synced.len(), 1);
    assert_eq!(synced[0].len(), 2);
    assert!(h.controller.logger().is_empty().await);

    let raw = std::fs::read_to_string(h.path("whitelist.json")).unwrap();
    let stored: Vec<CardId> = serde_json::from_str(&raw).unwrap();
    assert_eq!(stored.len(), 3);

    // Steady online state does not sync again.
    h.controller.check_connectivity().await;
    assert_eq!(backend.synced().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_refused_sync_keeps_queue() {
    let backend = offline_backend();
    let h = Harness::start(backend.clone(), Setup::default()).await;
    h.controller.initialize().await;
    h.controller.process_card("A1", Direction::In).await.unwrap();

    backend.set_online(true);
    backend.reject_sync(true);
    h.controller.check_connectivity().await;

    assert_eq!(h.controller.logger().len().await, 1);
}

#[tokio::test(start_paused = true)]
async fn test_startup_sync_of_previous_queue() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("offline_logs.json");
    {
        let logger = AccessLogger::open(&path, 10).await.unwrap();
        let event = AccessEvent::new(
            "turnstile_001",
            CardId::new("OLD1").unwrap(),
            Direction::In,
            true,
            true,
        );
        logger.log(event).await.unwrap();
    }

    let backend = MockBackend::new();
    let logger = Arc::new(AccessLogger::open(&path, 10).await.unwrap());
    let (actuator, _handle) = MockActuator::new("relay-1");
    let relay = RelayController::new(vec![(1, AnyActuator::from(actuator))], OPEN);
    let controller = TurnstileController::new(
        config(DeviceKind::Door),
        Arc::new(backend.clone()),
        Arc::new(relay),
        Arc::clone(&logger),
        Arc::new(WhitelistStore::open(dir.path().join("wl.json")).await),
    );

    controller.initialize().await;
    assert_eq!(backend.synced().len(), 1);
    assert_eq!(backend.synced()[0][0].card_id().as_str(), "OLD1");
    assert!(logger.is_empty().await);
}

#[tokio::test(start_paused = true)]
async fn test_manual_open_records_sentinel() {
    let h = Harness::start(MockBackend::new(), Setup::default()).await;
    h.controller.initialize().await;

    let event = h.controller.manual_open(Direction::Out).await.unwrap();
    assert_eq!(event.card_id().as_str(), MANUAL_OPEN_CARD_ID);
    assert!(event.authorized());
    assert!(!event.offline_mode());
    assert_eq!(h.relay_out.transitions(), vec![true, false]);
    assert!(h.backend.access_checks().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_manual_open_offline_is_queued() {
    let h = Harness::start(offline_backend(), Setup::default()).await;
    h.controller.initialize().await;

    h.controller.manual_open(Direction::In).await.unwrap();
    let queued = h.controller.logger().get_all().await;
    assert_eq!(queued.len(), 1);
    assert!(queued[0].card_id().is_manual_open());
    assert_eq!(h.controller.logger().stats().await.unique_cards, 0);
}

#[tokio::test(start_paused = true)]
async fn test_door_outbound_is_not_actuated() {
    let backend = MockBackend::new();
    backend.authorize("123456789");
    let setup = Setup {
        config: config(DeviceKind::Door),
        ..Setup::default()
    };
    let h = Harness::start(backend, setup).await;
    h.controller.initialize().await;

    let event = h.controller.process_card("123456789", Direction::Out).await.unwrap();
    assert!(event.authorized());
    assert_eq!(h.relay_out.activations(), 0);
    assert_eq!(h.relay_in.activations(), 0);

    h.controller.manual_open(Direction::Out).await.unwrap();
    assert_eq!(h.relay_out.activations(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_persistence_failure_does_not_block_opening() {
    // The queue path is a directory, so every write fails.
    let setup = Setup {
        whitelist: vec!["04A1B2C3"],
        logs_path: Some("blocked"),
        ..Setup::default()
    };
    let h = Harness::start(offline_backend(), setup).await;
    std::fs::create_dir_all(h.path("blocked")).unwrap();
    h.controller.initialize().await;

    let event = h.controller.process_card("04A1B2C3", Direction::In).await.unwrap();
    assert!(event.authorized());
    assert_eq!(h.relay_in.transitions(), vec![true, false]);
}

#[tokio::test(start_paused = true)]
async fn test_invalid_card_is_rejected_without_actuation() {
    let h = Harness::start(MockBackend::new(), Setup::default()).await;
    h.controller.initialize().await;

    assert!(h.controller.process_card("   ", Direction::In).await.is_err());
    assert_eq!(h.relay_in.activations(), 0);
}

async fn wait_for(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached");
}

#[tokio::test]
async fn test_run_processes_readers_and_commands_until_shutdown() {
    let backend = MockBackend::new();
    backend.authorize("CARD_IN");
    backend.authorize("CARD_OUT");
    let setup = Setup {
        open: Duration::from_millis(20),
        ..Setup::default()
    };
    let h = Harness::start(backend, setup).await;
    h.controller.initialize().await;

    let (reader_in, cards_in) = MockReader::with_name("reader-in");
    let (reader_out, cards_out) = MockReader::with_name("reader-out");
    let (commands, source) = ChannelCommandSource::new(4);
    let readers = Readers {
        inbound: Some(reader_in.into()),
        outbound: Some(reader_out.into()),
    };
    let run = tokio::spawn(Arc::clone(&h.controller).run(readers, source));

    cards_in.present_card("CARD_IN").await.unwrap();
    cards_out.present_card("CARD_OUT").await.unwrap();
    let relay_in = h.relay_in.clone();
    let relay_out = h.relay_out.clone();
    wait_for(|| relay_in.activations() == 1 && relay_out.activations() == 1).await;

    let (envelope, reply) = CommandEnvelope::with_reply(RemoteCommand::OpenTurnstile {
        direction: Direction::In,
    });
    commands.send(envelope).await.unwrap();
    assert_eq!(reply.await.unwrap(), CommandReply::Success);
    assert_eq!(h.relay_in.activations(), 2);

    let (envelope, reply) = CommandEnvelope::with_reply(RemoteCommand::Unknown);
    commands.send(envelope).await.unwrap();
    assert_eq!(reply.await.unwrap(), CommandReply::Success);
    assert_eq!(h.relay_in.activations(), 2);

    h.controller.shutdown();
    run.await.unwrap().unwrap();

    assert!(h.relay_in.is_released());
    assert!(h.relay_out.is_released());
    assert!(!h.relay_in.is_energized());
}

#[tokio::test]
async fn test_unusable_reads_never_reach_the_pipeline() {
    let backend = MockBackend::new();
    backend.authorize("CARD_IN");
    let setup = Setup {
        open: Duration::from_millis(20),
        ..Setup::default()
    };
    let h = Harness::start(backend, setup).await;
    h.controller.initialize().await;

    let (reader_in, cards_in) = MockReader::with_name("reader-in");
    let (_commands, source) = ChannelCommandSource::new(1);
    let readers = Readers {
        inbound: Some(reader_in.into()),
        outbound: None,
    };
    let run = tokio::spawn(Arc::clone(&h.controller).run(readers, source));

    cards_in.present_card("  ").await.unwrap();
    cards_in.present_card("CA\u{7}RD").await.unwrap();
    cards_in.present_card("CARD_IN").await.unwrap();
    let relay_in = h.relay_in.clone();
    wait_for(|| relay_in.activations() == 1).await;

    h.controller.shutdown();
    run.await.unwrap().unwrap();

    assert_eq!(
        h.backend.access_checks(),
        vec![("CARD_IN".to_string(), Direction::In)]
    );
    assert_eq!(h.relay_in.activations(), 1);
}

#[tokio::test]
async fn test_shutdown_syncs_queue_when_online() {
    let backend = MockBackend::new();
    backend.reject_sync(true);
    let setup = Setup {
        whitelist: vec!["A1"],
        ..Setup::default()
    };
    let h = Harness::start(backend.clone(), setup).await;
    let queued = AccessEvent::new(
        "turnstile_001",
        CardId::new("A1").unwrap(),
        Direction::In,
        true,
        true,
    );
    h.controller.logger().log(queued).await.unwrap();

    // Startup sync is refused, so the event is still pending at shutdown.
    assert_eq!(h.controller.initialize().await, ConnectivityState::Online);
    assert_eq!(h.controller.logger().len().await, 1);
    backend.reject_sync(false);

    let (_commands, source) = ChannelCommandSource::new(1);
    let run = tokio::spawn(Arc::clone(&h.controller).run(Readers::default(), source));
    h.controller.shutdown();
    run.await.unwrap().unwrap();

    assert!(h.controller.logger().is_empty().await);
    assert_eq!(backend.synced().len(), 1);
}
