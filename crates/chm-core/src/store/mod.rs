//! Persistence port for workspaces, channels and account links.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    domain::{
        AccountLink, Channel, ChannelOrigin, ConversationRef, ExternalAccountId, MessagingId,
        Workspace, WorkspaceId,
    },
    errors::StoreError,
};

pub mod sqlite;

pub use sqlite::SqliteStore;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Metadata written by [`RegistryStore::upsert_channel`].
#[derive(Clone, Debug)]
pub struct ChannelAttrs {
    pub name: String,
    pub synced_at: DateTime<Utc>,
}

/// What an upsert did to the row.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    /// The display name changed.
    Updated,
    /// Only the sync timestamp moved.
    Unchanged,
}

/// Durable owner of record for registry entities.
///
/// Every method is atomic for the single row it touches. `NotFound` and
/// `Conflict` must be reported as such, never folded into `Storage`.
#[async_trait]
pub trait RegistryStore: Send + Sync {
    /// Fails with `Conflict` when `name` is already used in `conversation`.
    async fn create_workspace(
        &self,
        conversation: &ConversationRef,
        name: &str,
    ) -> StoreResult<Workspace>;

    async fn get_workspace(&self, id: &WorkspaceId) -> StoreResult<Workspace>;

    async fn find_workspace(
        &self,
        conversation: &ConversationRef,
        name: &str,
    ) -> StoreResult<Workspace>;

    /// Workspaces of `conversation` in creation order.
    async fn list_workspaces(&self, conversation: &ConversationRef)
        -> StoreResult<Vec<Workspace>>;

    /// Fails with `Conflict` when `(workspace_id, remote_id)` exists.
    async fn create_channel(
        &self,
        workspace_id: &WorkspaceId,
        remote_id: &str,
        name: &str,
    ) -> StoreResult<Channel>;

    /// Channels of a workspace in creation order.
    async fn list_channels(&self, workspace_id: &WorkspaceId) -> StoreResult<Vec<Channel>>;

    /// Inserts a `Sync`-origin channel or updates the existing row in place.
    async fn upsert_channel(
        &self,
        workspace_id: &WorkspaceId,
        remote_id: &str,
        attrs: ChannelAttrs,
    ) -> StoreResult<(Channel, UpsertOutcome)>;

    /// Replaces any previous link for `messaging_id`.
    async fn record_account_link(
        &self,
        messaging_id: &MessagingId,
        external_account: &ExternalAccountId,
    ) -> StoreResult<AccountLink>;

    async fn get_account_link(&self, messaging_id: &MessagingId) -> StoreResult<AccountLink>;
}

pub(crate) fn origin_or_manual(raw: &str) -> ChannelOrigin {
    ChannelOrigin::parse(raw).unwrap_or(ChannelOrigin::Manual)
}
