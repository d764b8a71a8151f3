//! Durable offline access-event queue.
//!
//! Every access event is traced on the `access` target. Events decided while
//! offline are also appended to a bounded FIFO queue that is re-persisted as a
//! single JSON array after every mutation, and survives restarts.

use crate::atomic;
use crate::error::StorageResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use turnkey_core::AccessEvent;

/// What happened to an event handed to [`AccessLogger::log`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LogOutcome {
    /// The event was appended to the offline queue.
    pub queued: bool,
    /// Oldest events dropped to stay within capacity.
    pub evicted: usize,
}

/// Aggregates over the offline queue.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AccessStats {
    pub total: usize,
    pub authorized: usize,
    pub denied: usize,
    pub inbound: usize,
    pub outbound: usize,
    /// Distinct card ids, manual openings excluded.
    pub unique_cards: usize,
    pub oldest: Option<DateTime<Utc>>,
    pub newest: Option<DateTime<Utc>>,
}

impl AccessStats {
    pub fn from_events(events: &[AccessEvent]) -> Self {
        let mut stats = Self {
            total: events.len(),
            ..Self::default()
        };
        let mut cards = HashSet::new();

        for event in events {
            if event.authorized() {
                stats.authorized += 1;
            } else {
                stats.denied += 1;
            }
            match event.direction() {
                turnkey_core::Direction::In => stats.inbound += 1,
                turnkey_core::Direction::Out => stats.outbound += 1,
            }
            if !event.card_id().is_manual_open() {
                cards.insert(event.card_id().as_str());
            }
            let ts = event.timestamp();
            stats.oldest = Some(stats.oldest.map_or(ts, |o| o.min(ts)));
            stats.newest = Some(stats.newest.map_or(ts, |n| n.max(ts)));
        }

        stats.unique_cards = cards.len();
        stats
    }
}

/// Offline access-event queue persisted to a JSON file.
#[derive(Debug)]
pub struct AccessLogger {
    path: PathBuf,
    capacity: usize,
    queue: Mutex<Vec<AccessEvent>>,
}

impl AccessLogger {
    /// Open the queue stored at `path`, bounded to `capacity` events.
    ///
    /// A missing or malformed file yields an empty queue. A stored queue larger
    /// than `capacity` is trimmed from the oldest end.
    pub async fn open(path: impl Into<PathBuf>, capacity: usize) -> StorageResult<Self> {
        let path = path.into();
        let capacity = capacity.max(1);
        let mut queue: Vec<AccessEvent> = atomic::read_json(&path).await.unwrap_or_default();

        let excess = queue.len().saturating_sub(capacity);
        if excess > 0 {
            queue.drain(..excess);
            warn!(evicted = excess, capacity, "stored offline queue exceeded capacity");
        }
        info!(path = %path.display(), pending = queue.len(), "offline queue loaded");

        Ok(Self {
            path,
            capacity,
            queue: Mutex::new(queue),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Record an access event.
    ///
    /// The event is always traced. It is queued only when it was decided
    /// offline. On a persistence error the event stays queued in memory and
    /// is written with the next successful mutation.
    pub async fn log(&self, event: AccessEvent) -> StorageResult<LogOutcome> {
        trace_event(&event);

        if !event.offline_mode() {
            return Ok(LogOutcome::default());
        }

        let mut queue = self.queue.lock().await;
        queue.push(event);

        let evicted = queue.len().saturating_sub(self.capacity);
        if evicted > 0 {
            queue.drain(..evicted);
            warn!(evicted, capacity = self.capacity, "offline queue full, oldest events dropped");
        }

        atomic::write_json(&self.path, queue.as_slice()).await?;
        debug!(pending = queue.len(), "offline event queued");

        Ok(LogOutcome {
            queued: true,
            evicted,
        })
    }

    /// Snapshot of the queue in insertion order.
    pub async fn get_all(&self) -> Vec<AccessEvent> {
        self.queue.lock().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.queue.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.queue.lock().await.is_empty()
    }

    /// Empty the queue and persist the empty document.
    pub async fn clear(&self) -> StorageResult<()> {
        let mut queue = self.queue.lock().await;
        let cleared = queue.len();
        queue.clear();
        atomic::write_json(&self.path, queue.as_slice()).await?;
        info!(cleared, "offline queue cleared");
        Ok(())
    }

    /// Remove the events of a successfully synced batch.
    ///
    /// Events appended after the batch was taken stay queued. Returns the
    /// number of events removed.
    pub async fn acknowledge(&self, batch: &[AccessEvent]) -> StorageResult<usize> {
        if batch.is_empty() {
            return Ok(0);
        }

        let mut counts: HashMap<&AccessEvent, usize> = HashMap::new();
        for event in batch {
            *counts.entry(event).or_default() += 1;
        }

        let mut queue = self.queue.lock().await;
        let before = queue.len();
        queue.retain(|event| match counts.get_mut(event) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                false
            }
            _ => true,
        });
        let removed = before - queue.len();

        atomic::write_json(&self.path, queue.as_slice()).await?;
        info!(removed, pending = queue.len(), "offline events acknowledged");
        Ok(removed)
    }

    pub async fn stats(&self) -> AccessStats {
        AccessStats::from_events(&self.queue.lock().await)
    }

    /// Events with `start <= timestamp <= end`, in queue order.
    pub async fn export(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<AccessEvent> {
        self.queue
            .lock()
            .await
            .iter()
            .filter(|e| e.timestamp() >= start && e.timestamp() <= end)
            .cloned()
            .collect()
    }
}

fn trace_event(event: &AccessEvent) {
    let card = event.card_id().masked();
    if event.authorized() {
        info!(
            target: "access",
            device = event.device_id(),
            card = %card,
            direction = %event.direction(),
            offline = event.offline_mode(),
            "access granted"
        );
    } else {
        warn!(
            target: "access",
            device = event.device_id(),
            card = %card,
            direction = %event.direction(),
            offline = event.offline_mode(),
            "access denied"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use turnkey_core::{CardId, Direction};

    fn event(card: &str, direction: Direction, authorized: bool, minute: u32) -> AccessEvent {
        AccessEvent::with_timestamp(
            "turnstile_001",
            CardId::new(card).unwrap(),
            direction,
            Utc.with_ymd_and_hms(2025, 1, 10, 8, minute, 0).unwrap(),
            authorized,
            true,
        )
    }

    #[tokio::test]
    async fn test_online_events_not_queued() {
        let dir = tempfile::tempdir().unwrap();
        let logger = AccessLogger::open(dir.path().join("q.json"), 10).await.unwrap();

        let online = AccessEvent::new("d", CardId::new("1").unwrap(), Direction::In, true, false);
        let outcome = logger.log(online).await.unwrap();

        assert!(!outcome.queued);
        assert!(logger.is_empty().await);
        assert!(!logger.path().exists());
    }

    #[tokio::test]
    async fn test_capacity_evicts_oldest() {
        let dir = tempfile::tempdir().unwrap();
        let logger = AccessLogger::open(dir.path().join("q.json"), 3).await.unwrap();

        for minute in 0..3 {
            let outcome = logger
                .log(event(&format!("{minute}"), Direction::In, true, minute))
                .await
                .unwrap();
            assert_eq!(outcome.evicted, 0);
        }
        let outcome = logger.log(event("3", Direction::In, true, 3)).await.unwrap();
        assert_eq!(outcome, LogOutcome { queued: true, evicted: 1 });

        let cards: Vec<_> = logger
            .get_all()
            .await
            .iter()
            .map(|e| e.card_id().as_str().to_string())
            .collect();
        assert_eq!(cards, vec!["1", "2", "3"]);
    }

    #[tokio::test]
    async fn test_acknowledge_keeps_late_events() {
        let dir = tempfile::tempdir().unwrap();
        let logger = AccessLogger::open(dir.path().join("q.json"), 10).await.unwrap();

        logger.log(event("a", Direction::In, true, 0)).await.unwrap();
        logger.log(event("b", Direction::In, false, 1)).await.unwrap();
        let batch = logger.get_all().await;

        logger.log(event("c", Direction::Out, true, 2)).await.unwrap();
        assert_eq!(logger.acknowledge(&batch).await.unwrap(), 2);

        let remaining = logger.get_all().await;
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].card_id().as_str(), "c");
    }

    #[tokio::test]
    async fn test_acknowledge_duplicates_counted() {
        let dir = tempfile::tempdir().unwrap();
        let logger = AccessLogger::open(dir.path().join("q.json"), 10).await.unwrap();

        let same = event("a", Direction::In, true, 0);
        logger.log(same.clone()).await.unwrap();
        logger.log(same.clone()).await.unwrap();

        assert_eq!(logger.acknowledge(&[same]).await.unwrap(), 1);
        assert_eq!(logger.len().await, 1);
    }

    #[tokio::test]
    async fn test_clear_persists_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("q.json");
        let logger = AccessLogger::open(&path, 10).await.unwrap();
        logger.log(event("a", Direction::In, true, 0)).await.unwrap();

        logger.clear().await.unwrap();
        assert!(logger.get_all().await.is_empty());
        assert_eq!(std::fs::read_to_string(&path).unwrap().trim(), "[]");
    }

    #[tokio::test]
    async fn test_stats_and_export() {
        let dir = tempfile::tempdir().unwrap();
        let logger = AccessLogger::open(dir.path().join("q.json"), 10).await.unwrap();

        logger.log(event("a", Direction::In, true, 0)).await.unwrap();
        logger.log(event("a", Direction::Out, true, 5)).await.unwrap();
        logger.log(event("b", Direction::In, false, 10)).await.unwrap();
        let manual = AccessEvent::with_timestamp(
            "turnstile_001",
            CardId::manual_open(),
            Direction::In,
            Utc.with_ymd_and_hms(2025, 1, 10, 8, 15, 0).unwrap(),
            true,
            true,
        );
        logger.log(manual).await.unwrap();

        let stats = logger.stats().await;
        assert_eq!(stats.total, 4);
        assert_eq!(stats.authorized, 3);
        assert_eq!(stats.denied, 1);
        assert_eq!(stats.inbound, 3);
        assert_eq!(stats.outbound, 1);
        assert_eq!(stats.unique_cards, 2);
        assert_eq!(stats.oldest, Some(Utc.with_ymd_and_hms(2025, 1, 10, 8, 0, 0).unwrap()));
        assert_eq!(stats.newest, Some(Utc.with_ymd_and_hms(2025, 1, 10, 8, 15, 0).unwrap()));

        let window = logger
            .export(
                Utc.with_ymd_and_hms(2025, 1, 10, 8, 5, 0).unwrap(),
                Utc.with_ymd_and_hms(2025, 1, 10, 8, 10, 0).unwrap(),
            )
            .await;
        assert_eq!(window.len(), 2);
    }

    #[test]
    fn test_stats_empty() {
        let stats = AccessStats::from_events(&[]);
        assert_eq!(stats, AccessStats::default());
    }
}
