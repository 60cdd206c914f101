//! Workspace/channel registry and directory synchronization.
//!
//! All store mutations serialize on one engine-wide lock. Refresh fetches
//! from the directory outside that lock and only holds it for its upserts,
//! so a slow directory never blocks unrelated commands. Reads skip the lock;
//! the store gives read-after-write consistency.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::{
    directory::DirectoryClient,
    domain::{
        AccountLink, BotIdentity, Channel, ConversationRef, ExternalAccountId, MessagingId,
        RemoteChannel, Workspace, WorkspaceId,
    },
    errors::{EntityKind, RegistryError, StoreError},
    store::{ChannelAttrs, RegistryStore, UpsertOutcome},
};

pub type RegistryResult<T> = std::result::Result<T, RegistryError>;

const MAX_NAME_LEN: usize = 64;

/// Outcome of one workspace refresh.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RefreshSummary {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
}

impl RefreshSummary {
    fn record(&mut self, outcome: UpsertOutcome) {
        match outcome {
            UpsertOutcome::Created => self.created += 1,
            UpsertOutcome::Updated => self.updated += 1,
            UpsertOutcome::Unchanged => self.unchanged += 1,
        }
    }
}

/// Per-workspace results of [`RegistryEngine::refresh_all`].
#[derive(Debug, Default)]
pub struct RefreshAllReport {
    pub refreshed: Vec<(Workspace, RefreshSummary)>,
    pub failed: Vec<(Workspace, RegistryError)>,
    /// Skipped because the operation was cancelled first.
    pub not_reached: Vec<Workspace>,
}

impl RefreshAllReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty() && self.not_reached.is_empty()
    }
}

/// The registry engine. One instance is shared by every command handler.
pub struct RegistryEngine {
    store: Arc<dyn RegistryStore>,
    directory: Arc<dyn DirectoryClient>,
    identity: BotIdentity,
    write_lock: Mutex<()>,
}

impl RegistryEngine {
    pub fn new(
        store: Arc<dyn RegistryStore>,
        directory: Arc<dyn DirectoryClient>,
        identity: BotIdentity,
    ) -> Self {
        Self {
            store,
            directory,
            identity,
            write_lock: Mutex::new(()),
        }
    }

    pub fn identity(&self) -> &BotIdentity {
        &self.identity
    }

    pub async fn add_workspace(
        &self,
        conversation: &ConversationRef,
        name: &str,
    ) -> RegistryResult<Workspace> {
        let name = validate_name("workspace name", name)?;

        let _guard = self.write_lock.lock().await;
        let ws = self
            .store
            .create_workspace(conversation, name)
            .await
            .map_err(|e| map_store(e, EntityKind::Workspace, name))?;
        tracing::info!(workspace = %ws.id, %conversation, name, "workspace created");
        Ok(ws)
    }

    pub async fn add_channel(
        &self,
        workspace_id: &WorkspaceId,
        remote_id: &str,
        name: &str,
    ) -> RegistryResult<Channel> {
        let remote_id = validate_token("remote channel id", remote_id)?;
        let name = validate_name("channel name", name)?;

        let _guard = self.write_lock.lock().await;
        self.store
            .get_workspace(workspace_id)
            .await
            .map_err(|e| map_store(e, EntityKind::Workspace, workspace_id.as_str()))?;
        let ch = self
            .store
            .create_channel(workspace_id, remote_id, name)
            .await
            .map_err(|e| map_store(e, EntityKind::Channel, remote_id))?;
        tracing::info!(workspace = %workspace_id, remote_id, "channel added");
        Ok(ch)
    }

    pub async fn list_workspaces(
        &self,
        conversation: &ConversationRef,
    ) -> RegistryResult<Vec<Workspace>> {
        self.store
            .list_workspaces(conversation)
            .await
            .map_err(|e| map_store(e, EntityKind::Workspace, conversation.as_str()))
    }

    pub async fn list_channels(&self, workspace_id: &WorkspaceId) -> RegistryResult<Vec<Channel>> {
        self.store
            .list_channels(workspace_id)
            .await
            .map_err(|e| map_store(e, EntityKind::Workspace, workspace_id.as_str()))
    }

    /// Resolve a user-typed workspace reference (id first, then name) within
    /// `conversation`.
    pub async fn find_workspace(
        &self,
        conversation: &ConversationRef,
        reference: &str,
    ) -> RegistryResult<Workspace> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(RegistryError::Validation(
                "A workspace name is required.".to_string(),
            ));
        }

        match self.store.get_workspace(&WorkspaceId::from(reference)).await {
            Ok(ws) if &ws.conversation == conversation => return Ok(ws),
            Ok(_) | Err(StoreError::NotFound(_)) => {}
            Err(e) => return Err(map_store(e, EntityKind::Workspace, reference)),
        }

        self.store
            .find_workspace(conversation, reference)
            .await
            .map_err(|e| map_store(e, EntityKind::Workspace, reference))
    }

    /// Pull the linked account's channels and upsert them into the workspace.
    ///
    /// Never deletes: channels missing upstream are left as they are, since
    /// the listing may be partial. Upserts applied before a storage failure
    /// stay applied; the operation is safe to retry.
    pub async fn refresh(
        &self,
        workspace_id: &WorkspaceId,
        cancel: &CancellationToken,
    ) -> RegistryResult<RefreshSummary> {
        if cancel.is_cancelled() {
            return Err(RegistryError::Cancelled);
        }

        let ws = self
            .store
            .get_workspace(workspace_id)
            .await
            .map_err(|e| map_store(e, EntityKind::Workspace, workspace_id.as_str()))?;
        let link = match self
            .store
            .get_account_link(&MessagingId::from(&ws.conversation))
            .await
        {
            Ok(link) => link,
            Err(StoreError::NotFound(_)) => return Err(RegistryError::NoLinkedAccount),
            Err(e) => return Err(internal(e)),
        };

        let fetched = tokio::select! {
            _ = cancel.cancelled() => return Err(RegistryError::Cancelled),
            res = self.directory.fetch_channels(&link.external_account) => res,
        };
        let remote = match fetched {
            Ok(channels) => dedupe_by_id(channels),
            Err(e) => {
                tracing::warn!(
                    workspace = %ws.id,
                    kind = e.kind(),
                    error = %e,
                    "directory fetch failed"
                );
                return Err(RegistryError::Directory(e));
            }
        };

        let _guard = self.write_lock.lock().await;
        let synced_at = Utc::now();
        let mut summary = RefreshSummary::default();
        for rc in remote {
            let attrs = ChannelAttrs {
                name: rc.name,
                synced_at,
            };
            let (_, outcome) = self
                .store
                .upsert_channel(&ws.id, &rc.id, attrs)
                .await
                .map_err(|e| map_store(e, EntityKind::Workspace, ws.id.as_str()))?;
            summary.record(outcome);
        }

        tracing::info!(
            workspace = %ws.id,
            created = summary.created,
            updated = summary.updated,
            unchanged = summary.unchanged,
            "workspace refreshed"
        );
        Ok(summary)
    }

    /// Refresh every workspace of `conversation`, one after another.
    ///
    /// A failing workspace is recorded and iteration continues. Once
    /// `cancel` fires, the remaining workspaces are reported as not reached.
    pub async fn refresh_all(
        &self,
        conversation: &ConversationRef,
        cancel: &CancellationToken,
    ) -> RegistryResult<RefreshAllReport> {
        let workspaces = self.list_workspaces(conversation).await?;
        let mut report = RefreshAllReport::default();

        for ws in workspaces {
            if cancel.is_cancelled() {
                report.not_reached.push(ws);
                continue;
            }
            match self.refresh(&ws.id, cancel).await {
                Ok(summary) => report.refreshed.push((ws, summary)),
                Err(RegistryError::Cancelled) => report.not_reached.push(ws),
                Err(e) => report.failed.push((ws, e)),
            }
        }

        if !report.not_reached.is_empty() {
            tracing::warn!(
                %conversation,
                not_reached = report.not_reached.len(),
                "refresh-all cancelled"
            );
        }
        Ok(report)
    }

    /// Record (or replace) the external account used by refreshes.
    ///
    /// No verification happens here; the directory judges the account when
    /// it is used.
    pub async fn link_account(
        &self,
        messaging_id: &MessagingId,
        external_account: &str,
    ) -> RegistryResult<AccountLink> {
        let account = ExternalAccountId::from(validate_token("account id", external_account)?);

        let _guard = self.write_lock.lock().await;
        let link = self
            .store
            .record_account_link(messaging_id, &account)
            .await
            .map_err(internal)?;
        tracing::info!(messaging_id = %messaging_id, "account linked");
        Ok(link)
    }

    pub async fn account_link(&self, messaging_id: &MessagingId) -> RegistryResult<AccountLink> {
        match self.store.get_account_link(messaging_id).await {
            Ok(link) => Ok(link),
            Err(StoreError::NotFound(_)) => Err(RegistryError::NoLinkedAccount),
            Err(e) => Err(internal(e)),
        }
    }
}

fn validate_name<'a>(what: &str, raw: &'a str) -> RegistryResult<&'a str> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(RegistryError::Validation(format!("The {what} must not be empty.")));
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(RegistryError::Validation(format!(
            "The {what} must be at most {MAX_NAME_LEN} characters."
        )));
    }
    if name.chars().any(char::is_control) {
        return Err(RegistryError::Validation(format!(
            "The {what} must not contain control characters."
        )));
    }
    Ok(name)
}

fn validate_token<'a>(what: &str, raw: &'a str) -> RegistryResult<&'a str> {
    let token = raw.trim();
    if token.is_empty() {
        return Err(RegistryError::Validation(format!("The {what} must not be empty.")));
    }
    if token.chars().any(char::is_whitespace) {
        return Err(RegistryError::Validation(format!(
            "The {what} must not contain spaces."
        )));
    }
    Ok(token)
}

fn dedupe_by_id(channels: Vec<RemoteChannel>) -> Vec<RemoteChannel> {
    let mut seen = HashSet::new();
    channels
        .into_iter()
        .filter(|c| !c.id.trim().is_empty() && seen.insert(c.id.clone()))
        .collect()
}

fn map_store(e: StoreError, kind: EntityKind, reference: &str) -> RegistryError {
    match e {
        StoreError::NotFound(_) => RegistryError::NotFound {
            kind,
            reference: reference.to_string(),
        },
        StoreError::Conflict(_) => RegistryError::Conflict {
            kind,
            reference: reference.to_string(),
        },
        other => internal(other),
    }
}

fn internal(e: StoreError) -> RegistryError {
    tracing::error!(error = %e, "storage failure");
    RegistryError::Storage(e.to_string())
}
