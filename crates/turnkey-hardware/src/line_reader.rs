//! Line-oriented badge reader.
//!
//! Many USB badge readers enumerate as a serial or HID-keyboard device that
//! emits one card id per line. A background task reads lines from the device
//! and forwards those that form a valid [`CardId`]; [`CardReader::read_card`]
//! waits on that queue.

use crate::error::{HardwareError, Result};
use crate::traits::CardReader;
use std::path::Path;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use turnkey_core::CardId;

const LINE_QUEUE_CAPACITY: usize = 16;

/// Card reader consuming newline-terminated ids from a byte stream.
#[derive(Debug)]
pub struct LineReader {
    name: String,
    lines: mpsc::Receiver<String>,
    task: JoinHandle<()>,
}

impl LineReader {
    /// Open a device file (e.g. `/dev/ttyACM0`).
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = tokio::fs::File::open(path).await.map_err(|e| {
            HardwareError::initialization_failed(format!(
                "cannot open reader {}: {e}",
                path.display()
            ))
        })?;
        Ok(Self::from_stream(path.display().to_string(), file))
    }

    /// Wrap any async byte stream.
    pub fn from_stream<R>(name: impl Into<String>, stream: R) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let name = name.into();
        let (tx, lines) = mpsc::channel(LINE_QUEUE_CAPACITY);
        let task_name = name.clone();

        let task = tokio::spawn(async move {
            let mut reader = BufReader::new(stream).lines();
            loop {
                match reader.next_line().await {
                    Ok(Some(line)) => {
                        let card = match CardId::new(line.as_str()) {
                            Ok(card) => card,
                            Err(e) => {
                                if !line.trim().is_empty() {
                                    warn!(reader = %task_name, error = %e, "unusable card line skipped");
                                }
                                continue;
                            }
                        };
                        if tx.send(card.as_str().to_string()).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => {
                        debug!(reader = %task_name, "reader stream closed");
                        break;
                    }
                    Err(e) => {
                        warn!(reader = %task_name, error = %e, "card reader read failed");
                        break;
                    }
                }
            }
        });

        Self { name, lines, task }
    }
}

impl CardReader for LineReader {
    async fn read_card(&mut self, timeout: Duration) -> Option<String> {
        match tokio::time::timeout(timeout, self.lines.recv()).await {
            Ok(card) => card,
            Err(_) => None,
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for LineReader {
    fn drop(&mut self) {
        self.task.abort();
    }
}
