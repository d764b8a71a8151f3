//! Local mirror of the backend's authorized cards, consulted while offline.

use crate::atomic;
use crate::error::StorageResult;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{info, warn};
use turnkey_core::CardId;

/// Whitelist persisted as a JSON array of card ids.
#[derive(Debug)]
pub struct WhitelistStore {
    path: PathBuf,
    cards: RwLock<HashSet<CardId>>,
}

impl WhitelistStore {
    /// Load the whitelist at `path`; missing or malformed files yield an
    /// empty set.
    pub async fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let cards: HashSet<CardId> = atomic::read_json::<Vec<CardId>>(&path)
            .await
            .unwrap_or_default()
            .into_iter()
            .collect();
        info!(path = %path.display(), cards = cards.len(), "whitelist loaded");
        Self {
            path,
            cards: RwLock::new(cards),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn contains(&self, card: &CardId) -> bool {
        self.cards.read().await.contains(card)
    }

    pub async fn len(&self) -> usize {
        self.cards.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.cards.read().await.is_empty()
    }

    /// Replace the whole whitelist and persist it.
    ///
    /// An empty list is ignored and the current whitelist kept; returns
    /// whether the stored set changed.
    pub async fn replace(&self, cards: Vec<CardId>) -> StorageResult<bool> {
        if cards.is_empty() {
            warn!("backend returned an empty whitelist, keeping the local copy");
            return Ok(false);
        }

        let mut sorted: Vec<CardId> = cards;
        sorted.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        sorted.dedup();

        let mut current = self.cards.write().await;
        atomic::write_json(&self.path, &sorted).await?;
        *current = sorted.into_iter().collect();
        info!(cards = current.len(), "whitelist updated");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn card(id: &str) -> CardId {
        CardId::new(id).unwrap()
    }

    #[tokio::test]
    async fn test_replace_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("whitelist.json");

        let store = WhitelistStore::open(&path).await;
        assert!(store.is_empty().await);

        let changed = store
            .replace(vec![card("123456789"), card("04A1"), card("04A1")])
            .await
            .unwrap();
        assert!(changed);
        assert_eq!(store.len().await, 2);
        assert!(store.contains(&card("123456789")).await);

        let reloaded = WhitelistStore::open(&path).await;
        assert!(reloaded.contains(&card("04A1")).await);
        assert_eq!(reloaded.len().await, 2);
    }

    #[tokio::test]
    async fn test_empty_replacement_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let store = WhitelistStore::open(dir.path().join("w.json")).await;
        store.replace(vec![card("1")]).await.unwrap();

        assert!(!store.replace(Vec::new()).await.unwrap());
        assert!(store.contains(&card("1")).await);
    }

    #[tokio::test]
    async fn test_malformed_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("w.json");
        std::fs::write(&path, "{\"cards\": 3").unwrap();

        let store = WhitelistStore::open(&path).await;
        assert!(store.is_empty().await);
        assert_eq!(store.path(), path.as_path());
    }
}
