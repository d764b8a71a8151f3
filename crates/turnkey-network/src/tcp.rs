//! Remote-command transport over TCP with newline-delimited JSON.
//!
//! A background task keeps one connection to the command server:
//!
//! ```text
//! device -> {"type":"device_registration","device_id":..,"device_type":..,"capabilities":{..}}
//! server -> {"type":"command","command_id":7,"command":{"action":"open_turnstile","direction":"in"}}
//! device -> {"type":"command_response","command_id":7,"status":"success","device_id":..}
//! server -> {"type":"ping","ping_id":1}
//! device -> {"type":"pong","ping_id":1,"device_id":..}
//! ```
//!
//! Decoded commands are handed to the controller through a
//! [`CommandSource`]; the response is written once the controller
//! acknowledges. Reading continues meanwhile, so pings are answered while a
//! relay window is open and responses may overtake each other. Lost connections are retried every `reconnect_interval`;
//! after `max_reconnect_attempts` consecutive failed connects the task gives
//! up and the source yields `None`.

use crate::command::{
    ChannelCommandSource, CommandEnvelope, CommandReply, CommandSource, RemoteCommand,
};
use crate::error::CommandError;
use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use futures::{FutureExt, SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::{Framed, LinesCodec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use turnkey_core::constants::{COMMAND_MAX_RECONNECT_ATTEMPTS, COMMAND_RECONNECT_INTERVAL_SECS};
use turnkey_core::{DaemonConfig, DeviceKind, Direction};

/// Longest accepted line, in bytes.
const MAX_LINE_LENGTH: usize = 64 * 1024;

/// Configuration for [`TcpCommandSource`].
#[derive(Debug, Clone)]
pub struct TcpCommandConfig {
    /// `host:port` of the command server.
    pub server_addr: String,
    pub device_id: String,
    pub device_kind: DeviceKind,
    pub connect_timeout: Duration,
    pub reconnect_interval: Duration,
    pub max_reconnect_attempts: u32,
}

impl TcpCommandConfig {
    /// Transport settings, or `None` when no command server is configured.
    pub fn from_daemon_config(config: &DaemonConfig) -> Option<Self> {
        let server_addr = config.backend.command_addr.clone()?;
        Some(Self {
            server_addr,
            device_id: config.device.id.clone(),
            device_kind: config.device.kind,
            connect_timeout: config.backend.connection_timeout,
            reconnect_interval: Duration::from_secs(COMMAND_RECONNECT_INTERVAL_SECS),
            max_reconnect_attempts: COMMAND_MAX_RECONNECT_ATTEMPTS,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum InboundMessage {
    Command {
        #[serde(default)]
        command_id: Option<serde_json::Value>,
        command: RemoteCommand,
    },
    Ping {
        #[serde(default)]
        ping_id: Option<serde_json::Value>,
    },
    ConfigUpdate {
        #[serde(default)]
        config: serde_json::Map<String, serde_json::Value>,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Serialize)]
struct Capabilities {
    manual_open: bool,
    directions: Vec<Direction>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum OutboundMessage<'a> {
    DeviceRegistration {
        device_id: &'a str,
        device_type: DeviceKind,
        capabilities: Capabilities,
    },
    CommandResponse {
        command_id: Option<serde_json::Value>,
        status: &'static str,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        device_id: &'a str,
    },
    Pong {
        ping_id: Option<serde_json::Value>,
        device_id: &'a str,
    },
    ConfigUpdateResponse {
        status: &'static str,
        device_id: &'a str,
    },
}

type Connection = Framed<TcpStream, LinesCodec>;

/// A controller reply still in flight, keyed by its command id.
type PendingReply = BoxFuture<'static, (Option<serde_json::Value>, CommandReply)>;

/// Command source backed by a reconnecting TCP connection.
#[derive(Debug)]
pub struct TcpCommandSource {
    inner: ChannelCommandSource,
    task: JoinHandle<()>,
}

impl TcpCommandSource {
    /// Start the connection task. It stops on `shutdown` or after too many
    /// failed connects.
    pub fn spawn(config: TcpCommandConfig, shutdown: CancellationToken) -> Self {
        let (tx, rx) = mpsc::channel(8);
        let task = tokio::spawn(run(config, tx, shutdown));
        Self {
            inner: ChannelCommandSource::from_receiver(rx),
            task,
        }
    }
}

impl CommandSource for TcpCommandSource {
    async fn next_command(&mut self) -> Option<CommandEnvelope> {
        self.inner.next_command().await
    }
}

impl Drop for TcpCommandSource {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run(
    config: TcpCommandConfig,
    tx: mpsc::Sender<CommandEnvelope>,
    shutdown: CancellationToken,
) {
    let mut failures = 0u32;

    while !shutdown.is_cancelled() {
        match connect(&config).await {
            Ok(connection) => {
                failures = 0;
                if let Err(e) = serve(connection, &config, &tx, &shutdown).await {
                    warn!(error = %e, "command connection lost");
                }
                if tx.is_closed() {
                    debug!("command consumer gone, stopping transport");
                    return;
                }
            }
            Err(e) => {
                failures += 1;
                if failures > config.max_reconnect_attempts {
                    error!(
                        attempts = config.max_reconnect_attempts,
                        "command server unreachable, giving up"
                    );
                    return;
                }
                warn!(
                    error = %e,
                    attempt = failures,
                    max = config.max_reconnect_attempts,
                    retry_in_ms = config.reconnect_interval.as_millis() as u64,
                    "command server connect failed"
                );
            }
        }

        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(config.reconnect_interval) => {}
        }
    }
    debug!("command transport stopped");
}

async fn connect(config: &TcpCommandConfig) -> Result<Connection, CommandError> {
    let stream = tokio::time::timeout(
        config.connect_timeout,
        TcpStream::connect(&config.server_addr),
    )
    .await
    .map_err(|_| CommandError::ConnectionTimeout(config.connect_timeout.as_millis() as u64))??;

    if let Err(e) = stream.set_nodelay(true) {
        warn!("Failed to set TCP_NODELAY: {}", e);
    }
    info!(server = %config.server_addr, "command server connected");

    let mut connection = Framed::new(stream, LinesCodec::new_with_max_length(MAX_LINE_LENGTH));
    let mut directions = vec![Direction::In];
    if config.device_kind.is_bidirectional() {
        directions.push(Direction::Out);
    }
    send(
        &mut connection,
        &OutboundMessage::DeviceRegistration {
            device_id: &config.device_id,
            device_type: config.device_kind,
            capabilities: Capabilities {
                manual_open: true,
                directions,
            },
        },
    )
    .await?;
    debug!("device registration sent");
    Ok(connection)
}

async fn serve(
    mut connection: Connection,
    config: &TcpCommandConfig,
    tx: &mpsc::Sender<CommandEnvelope>,
    shutdown: &CancellationToken,
) -> Result<(), CommandError> {
    let mut replies: FuturesUnordered<PendingReply> = FuturesUnordered::new();
    loop {
        let line = tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            Some((command_id, reply)) = replies.next() => {
                respond(&mut connection, config, command_id, reply).await?;
                continue;
            }
            line = connection.next() => line,
        };
        let line = match line {
            Some(line) => line?,
            None => {
                info!("command server closed the connection");
                return Ok(());
            }
        };

        let message: InboundMessage = match serde_json::from_str(&line) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "unparseable command message");
                continue;
            }
        };

        match message {
            InboundMessage::Command {
                command_id,
                command,
            } => {
                info!(?command, ?command_id, "remote command received");
                let (envelope, reply) = CommandEnvelope::with_reply(command);
                if tx.send(envelope).await.is_err() {
                    let reply = CommandReply::Error("controller unavailable".to_string());
                    respond(&mut connection, config, command_id, reply).await?;
                } else {
                    replies.push(
                        async move {
                            let reply = reply
                                .await
                                .unwrap_or_else(|_| CommandReply::Error("command dropped".to_string()));
                            (command_id, reply)
                        }
                        .boxed(),
                    );
                }
            }
            InboundMessage::Ping { ping_id } => {
                send(
                    &mut connection,
                    &OutboundMessage::Pong {
                        ping_id,
                        device_id: &config.device_id,
                    },
                )
                .await?;
            }
            InboundMessage::ConfigUpdate { config: update } => {
                let keys: Vec<&String> = update.keys().collect();
                info!(?keys, "configuration update received, acknowledged only");
                send(
                    &mut connection,
                    &OutboundMessage::ConfigUpdateResponse {
                        status: "acknowledged",
                        device_id: &config.device_id,
                    },
                )
                .await?;
            }
            InboundMessage::Other => {
                warn!(message = %line, "unknown message type ignored");
            }
        }
    }
}

async fn respond(
    connection: &mut Connection,
    config: &TcpCommandConfig,
    command_id: Option<serde_json::Value>,
    reply: CommandReply,
) -> Result<(), CommandError> {
    let (status, error) = match reply {
        CommandReply::Success => ("success", None),
        CommandReply::Error(e) => ("error", Some(e)),
    };
    send(
        connection,
        &OutboundMessage::CommandResponse {
            command_id,
            status,
            error,
            device_id: &config.device_id,
        },
    )
    .await
}

async fn send(connection: &mut Connection, message: &OutboundMessage<'_>) -> Result<(), CommandError> {
    let line = serde_json::to_string(message)?;
    connection.send(line).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_requires_addr() {
        let mut daemon = DaemonConfig::default();
        assert!(TcpCommandConfig::from_daemon_config(&daemon).is_none());

        daemon.backend.command_addr = Some("10.0.0.5:7000".to_string());
        let config = TcpCommandConfig::from_daemon_config(&daemon).unwrap();
        assert_eq!(config.server_addr, "10.0.0.5:7000");
        assert_eq!(config.reconnect_interval, Duration::from_secs(5));
        assert_eq!(config.max_reconnect_attempts, 5);
    }

    #[test]
    fn test_inbound_decoding() {
        let msg: InboundMessage = serde_json::from_str(
            r#"{"type":"command","command_id":"c1","command":{"action":"open_turnstile","direction":"out"}}"#,
        )
        .unwrap();
        assert!(matches!(
            msg,
            InboundMessage::Command {
                command: RemoteCommand::OpenTurnstile {
                    direction: Direction::Out
                },
                ..
            }
        ));

        let msg: InboundMessage = serde_json::from_str(r#"{"type":"status_poll"}"#).unwrap();
        assert!(matches!(msg, InboundMessage::Other));
    }

    #[test]
    fn test_registration_shape() {
        let msg = OutboundMessage::DeviceRegistration {
            device_id: "door_1",
            device_type: DeviceKind::Door,
            capabilities: Capabilities {
                manual_open: true,
                directions: vec![Direction::In],
            },
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "device_registration");
        assert_eq!(value["device_type"], "door");
        assert_eq!(value["capabilities"]["directions"], serde_json::json!(["in"]));
    }
}
