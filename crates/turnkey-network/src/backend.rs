//! Backend collaborator interface.
//!
//! Methods return `impl Future + Send` so the controller can call them from
//! spawned tasks while staying generic over the implementation. Implementors
//! write plain `async fn`.

use crate::error::BackendResult;
use crate::types::{AccessDecision, UpdateMetadata, UpdateStatus};
use bytes::Bytes;
use std::future::Future;
use turnkey_core::{AccessEvent, CardId, Direction};

/// Access-control backend reached over the network.
pub trait Backend: Send + Sync + 'static {
    /// Reachability probe. Never errors; failures read as `false`.
    fn test_connection(&self) -> impl Future<Output = bool> + Send;

    fn check_access(
        &self,
        card: &CardId,
        direction: Direction,
    ) -> impl Future<Output = BackendResult<AccessDecision>> + Send;

    /// Upload queued offline events. `Ok(false)` means the backend refused them.
    fn sync_offline_logs(
        &self,
        events: &[AccessEvent],
    ) -> impl Future<Output = BackendResult<bool>> + Send;

    fn get_whitelist(&self) -> impl Future<Output = BackendResult<Vec<CardId>>> + Send;

    fn check_updates(&self) -> impl Future<Output = BackendResult<Option<UpdateMetadata>>> + Send;

    fn download_update(
        &self,
        metadata: &UpdateMetadata,
    ) -> impl Future<Output = BackendResult<Bytes>> + Send;

    fn report_update_status(
        &self,
        update_id: &str,
        status: UpdateStatus,
        error: Option<&str>,
    ) -> impl Future<Output = BackendResult<()>> + Send;
}
