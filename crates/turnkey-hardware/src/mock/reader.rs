//! Mock card reader for testing and development.
//!
//! The reader side is handed to the controller; the [`MockReaderHandle`] stays
//! with the test and presents cards.

use crate::traits::CardReader;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

/// Mock badge reader fed through a channel.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use turnkey_hardware::mock::MockReader;
/// use turnkey_hardware::traits::CardReader;
///
/// #[tokio::main]
/// async fn main() {
///     let (mut reader, handle) = MockReader::new();
///     handle.present_card("123456789").await.unwrap();
///
///     let card = reader.read_card(Duration::from_millis(10)).await;
///     assert_eq!(card.as_deref(), Some("123456789"));
/// }
/// ```
#[derive(Debug)]
pub struct MockReader {
    event_rx: mpsc::Receiver<String>,
    name: String,
}

impl MockReader {
    pub fn new() -> (Self, MockReaderHandle) {
        Self::with_name("Mock Card Reader")
    }

    pub fn with_name(name: impl Into<String>) -> (Self, MockReaderHandle) {
        let (event_tx, event_rx) = mpsc::channel(32);
        let reader = Self {
            event_rx,
            name: name.into(),
        };
        (reader, MockReaderHandle { event_tx })
    }
}

impl CardReader for MockReader {
    async fn read_card(&mut self, timeout: Duration) -> Option<String> {
        match tokio::time::timeout(timeout, self.event_rx.recv()).await {
            Ok(Some(card)) => Some(card),
            Ok(None) => {
                debug!(reader = %self.name, "mock reader handle dropped");
                None
            }
            Err(_) => None,
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Handle presenting cards to a [`MockReader`].
#[derive(Debug, Clone)]
pub struct MockReaderHandle {
    event_tx: mpsc::Sender<String>,
}

impl MockReaderHandle {
    /// Queue a card read.
    ///
    /// # Errors
    ///
    /// Returns an error if the reader has been dropped.
    pub async fn present_card(&self, card: impl Into<String>) -> crate::Result<()> {
        self.event_tx
            .send(card.into())
            .await
            .map_err(|_| crate::HardwareError::disconnected("mock reader"))
    }
}
