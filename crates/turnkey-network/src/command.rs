//! Remote commands and the sources that deliver them.
//!
//! Commands arrive as `{"action": "...", ...}` objects. Only `open_turnstile`
//! is recognized; any other action decodes to [`RemoteCommand::Unknown`] and
//! is still acknowledged as handled.

use serde::{Deserialize, Serialize};
use std::future::Future;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;
use turnkey_core::Direction;

/// Command sent by the remote operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum RemoteCommand {
    /// Open the barrier without a badge. Direction defaults to `in`.
    OpenTurnstile {
        #[serde(default)]
        direction: Direction,
    },
    #[serde(other)]
    Unknown,
}

/// Outcome reported back to the command's sender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandReply {
    Success,
    Error(String),
}

impl CommandReply {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

impl<E: std::fmt::Display> From<Result<(), E>> for CommandReply {
    fn from(result: Result<(), E>) -> Self {
        match result {
            Ok(()) => Self::Success,
            Err(e) => Self::Error(e.to_string()),
        }
    }
}

/// A command plus the channel used to acknowledge it.
#[derive(Debug)]
pub struct CommandEnvelope {
    pub command: RemoteCommand,
    reply: Option<oneshot::Sender<CommandReply>>,
}

impl CommandEnvelope {
    /// Fire-and-forget command.
    pub fn new(command: RemoteCommand) -> Self {
        Self {
            command,
            reply: None,
        }
    }

    /// Command whose sender waits for the reply.
    pub fn with_reply(command: RemoteCommand) -> (Self, oneshot::Receiver<CommandReply>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                command,
                reply: Some(tx),
            },
            rx,
        )
    }

    /// Send the reply, if anyone is waiting for it.
    pub fn acknowledge(self, reply: CommandReply) {
        if let Some(tx) = self.reply
            && tx.send(reply).is_err()
        {
            debug!("command sender went away before the reply");
        }
    }
}

/// Stream of remote commands.
pub trait CommandSource: Send + 'static {
    /// Next command, or `None` once the source is exhausted.
    fn next_command(&mut self) -> impl Future<Output = Option<CommandEnvelope>> + Send;
}

/// Sender half feeding a [`ChannelCommandSource`].
pub type CommandSender = mpsc::Sender<CommandEnvelope>;

/// Command source fed by an in-process channel.
#[derive(Debug)]
pub struct ChannelCommandSource {
    rx: mpsc::Receiver<CommandEnvelope>,
}

impl ChannelCommandSource {
    pub fn new(capacity: usize) -> (CommandSender, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        (tx, Self { rx })
    }

    pub(crate) fn from_receiver(rx: mpsc::Receiver<CommandEnvelope>) -> Self {
        Self { rx }
    }
}

impl CommandSource for ChannelCommandSource {
    async fn next_command(&mut self) -> Option<CommandEnvelope> {
        self.rx.recv().await
    }
}
