//! In-memory [`Backend`] for tests and offline development.
//!
//! Clones share state, so a test can keep one clone to flip the backend
//! online/offline, seed cards and inspect what the daemon sent.

use crate::backend::Backend;
use crate::error::{BackendError, BackendResult};
use crate::types::{AccessDecision, UpdateMetadata, UpdateStatus};
use bytes::Bytes;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use turnkey_core::{AccessEvent, CardId, Direction};

/// A status report recorded by [`MockBackend`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedStatus {
    pub update_id: String,
    pub status: UpdateStatus,
    pub error: Option<String>,
}

#[derive(Debug, Default)]
struct MockState {
    online: bool,
    fail_access_checks: bool,
    reject_sync: bool,
    authorized: HashSet<String>,
    whitelist: Vec<CardId>,
    update: Option<UpdateMetadata>,
    package: Bytes,
    fail_download: bool,
    access_checks: Vec<(String, Direction)>,
    synced: Vec<Vec<AccessEvent>>,
    statuses: Vec<RecordedStatus>,
    downloads: usize,
}

/// Scriptable backend.
#[derive(Debug, Clone, Default)]
pub struct MockBackend {
    state: Arc<Mutex<MockState>>,
}

impl MockBackend {
    /// A reachable backend with no authorized cards.
    pub fn new() -> Self {
        let backend = Self::default();
        backend.set_online(true);
        backend
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn ensure_online(&self) -> BackendResult<()> {
        if self.state().online {
            Ok(())
        } else {
            Err(BackendError::unavailable("mock backend offline"))
        }
    }

    pub fn set_online(&self, online: bool) {
        self.state().online = online;
    }

    /// Make `check_access` fail with a transport error while staying reachable.
    pub fn fail_access_checks(&self, fail: bool) {
        self.state().fail_access_checks = fail;
    }

    /// Make `sync_offline_logs` answer `false`.
    pub fn reject_sync(&self, reject: bool) {
        self.state().reject_sync = reject;
    }

    pub fn authorize(&self, card: &str) {
        self.state().authorized.insert(card.to_string());
    }

    pub fn set_whitelist(&self, cards: &[&str]) {
        self.state().whitelist = cards
            .iter()
            .filter_map(|c| CardId::new(*c).ok())
            .collect();
    }

    pub fn set_update(&self, metadata: Option<UpdateMetadata>, package: impl Into<Bytes>) {
        let mut state = self.state();
        state.update = metadata;
        state.package = package.into();
    }

    pub fn fail_download(&self, fail: bool) {
        self.state().fail_download = fail;
    }

    pub fn access_checks(&self) -> Vec<(String, Direction)> {
        self.state().access_checks.clone()
    }

    /// Every accepted sync batch, in order.
    pub fn synced(&self) -> Vec<Vec<AccessEvent>> {
        self.state().synced.clone()
    }

    pub fn statuses(&self) -> Vec<RecordedStatus> {
        self.state().statuses.clone()
    }

    pub fn downloads(&self) -> usize {
        self.state().downloads
    }
}

impl Backend for MockBackend {
    async fn test_connection(&self) -> bool {
        self.state().online
    }

    async fn check_access(&self, card: &CardId, direction: Direction) -> BackendResult<AccessDecision> {
        self.ensure_online()?;
        let mut state = self.state();
        if state.fail_access_checks {
            return Err(BackendError::unavailable("injected access check failure"));
        }
        state
            .access_checks
            .push((card.as_str().to_string(), direction));
        if state.authorized.contains(card.as_str()) {
            Ok(AccessDecision::granted())
        } else {
            Ok(AccessDecision::denied())
        }
    }

    async fn sync_offline_logs(&self, events: &[AccessEvent]) -> BackendResult<bool> {
        self.ensure_online()?;
        let mut state = self.state();
        if state.reject_sync {
            return Ok(false);
        }
        state.synced.push(events.to_vec());
        Ok(true)
    }

    async fn get_whitelist(&self) -> BackendResult<Vec<CardId>> {
        self.ensure_online()?;
        Ok(self.state().whitelist.clone())
    }

    async fn check_updates(&self) -> BackendResult<Option<UpdateMetadata>> {
        self.ensure_online()?;
        Ok(self.state().update.clone())
    }

    async fn download_update(&self, _metadata: &UpdateMetadata) -> BackendResult<Bytes> {
        self.ensure_online()?;
        let mut state = self.state();
        state.downloads += 1;
        if state.fail_download {
            return Err(BackendError::status(500, "/updates/download"));
        }
        Ok(state.package.clone())
    }

    async fn report_update_status(
        &self,
        update_id: &str,
        status: UpdateStatus,
        error: Option<&str>,
    ) -> BackendResult<()> {
        self.state().statuses.push(RecordedStatus {
            update_id: update_id.to_string(),
            status,
            error: error.map(str::to_string),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_offline_mock_errors() {
        let backend = MockBackend::new();
        backend.set_online(false);

        assert!(!backend.test_connection().await);
        let card = CardId::new("1").unwrap();
        assert!(backend.check_access(&card, Direction::In).await.is_err());
        assert!(backend.get_whitelist().await.is_err());
    }

    #[tokio::test]
    async fn test_authorization_and_recording() {
        let backend = MockBackend::new();
        backend.authorize("123456789");

        let granted = backend
            .check_access(&CardId::new("123456789").unwrap(), Direction::In)
            .await
            .unwrap();
        let denied = backend
            .check_access(&CardId::new("555").unwrap(), Direction::Out)
            .await
            .unwrap();

        assert!(granted.authorized);
        assert!(!denied.authorized);
        assert_eq!(backend.access_checks().len(), 2);
    }

    #[tokio::test]
    async fn test_sync_rejection() {
        let backend = MockBackend::new();
        backend.reject_sync(true);
        assert!(!backend.sync_offline_logs(&[]).await.unwrap());
        assert!(backend.synced().is_empty());
    }
}
