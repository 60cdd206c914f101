//! SQLite-backed registry store.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};

use super::{origin_or_manual, ChannelAttrs, RegistryStore, StoreResult, UpsertOutcome};
use crate::{
    domain::{
        AccountLink, Channel, ChannelId, ChannelOrigin, ConversationRef, ExternalAccountId,
        MessagingId, Workspace, WorkspaceId,
    },
    errors::StoreError,
};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS workspaces (
    id TEXT PRIMARY KEY,
    conversation TEXT NOT NULL,
    name TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    UNIQUE (conversation, name)
);
CREATE TABLE IF NOT EXISTS channels (
    id TEXT PRIMARY KEY,
    workspace_id TEXT NOT NULL,
    remote_id TEXT NOT NULL,
    name TEXT NOT NULL,
    origin TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    last_synced_at INTEGER,
    UNIQUE (workspace_id, remote_id),
    FOREIGN KEY (workspace_id) REFERENCES workspaces(id)
);
CREATE INDEX IF NOT EXISTS idx_channels_workspace_id ON channels(workspace_id);
CREATE TABLE IF NOT EXISTS account_links (
    messaging_id TEXT PRIMARY KEY,
    external_account TEXT NOT NULL,
    linked_at INTEGER NOT NULL
);
"#;

const WORKSPACE_COLUMNS: &str = "id, conversation, name, created_at";
const CHANNEL_COLUMNS: &str =
    "id, workspace_id, remote_id, name, origin, created_at, last_synced_at";

/// Registry store on a single SQLite connection.
///
/// Statements run under `block_in_place`, so callers must be on a
/// multi-threaded tokio runtime.
pub struct SqliteStore {
    db: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Opens or creates the database file and its tables.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let conn = Connection::open(path.as_ref()).map_err(storage)?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory().map_err(storage)?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> StoreResult<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(storage)?;
        conn.execute_batch(SCHEMA).map_err(storage)?;
        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
        })
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> StoreResult<T>) -> StoreResult<T> {
        let db = self.db.clone();
        tokio::task::block_in_place(|| {
            let conn = db
                .lock()
                .map_err(|_| StoreError::Storage("connection lock poisoned".into()))?;
            f(&conn)
        })
    }
}

#[async_trait]
impl RegistryStore for SqliteStore {
    async fn create_workspace(
        &self,
        conversation: &ConversationRef,
        name: &str,
    ) -> StoreResult<Workspace> {
        let ws = Workspace {
            id: WorkspaceId(uuid::Uuid::new_v4().to_string()),
            conversation: conversation.clone(),
            name: name.to_string(),
            created_at: now_millis(),
        };
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO workspaces (id, conversation, name, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![
                    ws.id.as_str(),
                    ws.conversation.as_str(),
                    ws.name,
                    ws.created_at.timestamp_millis()
                ],
            )
            .map_err(|e| conflict_or_storage(e, || format!("workspace {name}")))?;
            Ok(())
        })?;
        Ok(ws)
    }

    async fn get_workspace(&self, id: &WorkspaceId) -> StoreResult<Workspace> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {WORKSPACE_COLUMNS} FROM workspaces WHERE id = ?1"),
                params![id.as_str()],
                workspace_from_row,
            )
            .optional()
            .map_err(storage)?
            .ok_or_else(|| StoreError::NotFound(format!("workspace {id}")))
        })
    }

    async fn find_workspace(
        &self,
        conversation: &ConversationRef,
        name: &str,
    ) -> StoreResult<Workspace> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!(
                    "SELECT {WORKSPACE_COLUMNS} FROM workspaces WHERE conversation = ?1 AND name = ?2"
                ),
                params![conversation.as_str(), name],
                workspace_from_row,
            )
            .optional()
            .map_err(storage)?
            .ok_or_else(|| StoreError::NotFound(format!("workspace {name}")))
        })
    }

    async fn list_workspaces(
        &self,
        conversation: &ConversationRef,
    ) -> StoreResult<Vec<Workspace>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {WORKSPACE_COLUMNS} FROM workspaces WHERE conversation = ?1 ORDER BY rowid ASC"
                ))
                .map_err(storage)?;
            let rows = stmt
                .query_map(params![conversation.as_str()], workspace_from_row)
                .map_err(storage)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(storage)
        })
    }

    async fn create_channel(
        &self,
        workspace_id: &WorkspaceId,
        remote_id: &str,
        name: &str,
    ) -> StoreResult<Channel> {
        let ch = Channel {
            id: ChannelId(uuid::Uuid::new_v4().to_string()),
            workspace_id: workspace_id.clone(),
            remote_id: remote_id.to_string(),
            name: name.to_string(),
            origin: ChannelOrigin::Manual,
            created_at: now_millis(),
            last_synced_at: None,
        };
        self.with_conn(|conn| {
            ensure_workspace(conn, workspace_id)?;
            conn.execute(
                "INSERT INTO channels (id, workspace_id, remote_id, name, origin, created_at, last_synced_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, NULL)",
                params![
                    ch.id.as_str(),
                    workspace_id.as_str(),
                    ch.remote_id,
                    ch.name,
                    ch.origin.as_str(),
                    ch.created_at.timestamp_millis()
                ],
            )
            .map_err(|e| conflict_or_storage(e, || format!("channel {remote_id}")))?;
            Ok(())
        })?;
        Ok(ch)
    }

    async fn list_channels(&self, workspace_id: &WorkspaceId) -> StoreResult<Vec<Channel>> {
        self.with_conn(|conn| {
            ensure_workspace(conn, workspace_id)?;
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {CHANNEL_COLUMNS} FROM channels WHERE workspace_id = ?1 ORDER BY rowid ASC"
                ))
                .map_err(storage)?;
            let rows = stmt
                .query_map(params![workspace_id.as_str()], channel_from_row)
                .map_err(storage)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(storage)
        })
    }

    async fn upsert_channel(
        &self,
        workspace_id: &WorkspaceId,
        remote_id: &str,
        attrs: ChannelAttrs,
    ) -> StoreResult<(Channel, UpsertOutcome)> {
        let synced_ms = attrs.synced_at.timestamp_millis();
        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction().map_err(storage)?;
            ensure_workspace(&tx, workspace_id)?;

            let existing = tx
                .query_row(
                    &format!(
                        "SELECT {CHANNEL_COLUMNS} FROM channels WHERE workspace_id = ?1 AND remote_id = ?2"
                    ),
                    params![workspace_id.as_str(), remote_id],
                    channel_from_row,
                )
                .optional()
                .map_err(storage)?;

            let (channel, outcome) = match existing {
                None => {
                    let ch = Channel {
                        id: ChannelId(uuid::Uuid::new_v4().to_string()),
                        workspace_id: workspace_id.clone(),
                        remote_id: remote_id.to_string(),
                        name: attrs.name.clone(),
                        origin: ChannelOrigin::Sync,
                        created_at: from_millis(synced_ms),
                        last_synced_at: Some(from_millis(synced_ms)),
                    };
                    tx.execute(
                        "INSERT INTO channels (id, workspace_id, remote_id, name, origin, created_at, last_synced_at)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
                        params![
                            ch.id.as_str(),
                            workspace_id.as_str(),
                            ch.remote_id,
                            ch.name,
                            ch.origin.as_str(),
                            synced_ms
                        ],
                    )
                    .map_err(storage)?;
                    (ch, UpsertOutcome::Created)
                }
                Some(mut ch) => {
                    let outcome = if ch.name == attrs.name {
                        UpsertOutcome::Unchanged
                    } else {
                        UpsertOutcome::Updated
                    };
                    tx.execute(
                        "UPDATE channels SET name = ?1, last_synced_at = ?2 WHERE id = ?3",
                        params![attrs.name, synced_ms, ch.id.as_str()],
                    )
                    .map_err(storage)?;
                    ch.name = attrs.name.clone();
                    ch.last_synced_at = Some(from_millis(synced_ms));
                    (ch, outcome)
                }
            };

            tx.commit().map_err(storage)?;
            Ok((channel, outcome))
        })
    }

    async fn record_account_link(
        &self,
        messaging_id: &MessagingId,
        external_account: &ExternalAccountId,
    ) -> StoreResult<AccountLink> {
        let link = AccountLink {
            messaging_id: messaging_id.clone(),
            external_account: external_account.clone(),
            linked_at: now_millis(),
        };
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO account_links (messaging_id, external_account, linked_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(messaging_id) DO UPDATE SET
                   external_account = excluded.external_account,
                   linked_at = excluded.linked_at",
                params![
                    messaging_id.as_str(),
                    external_account.as_str(),
                    link.linked_at.timestamp_millis()
                ],
            )
            .map_err(storage)?;
            Ok(())
        })?;
        Ok(link)
    }

    async fn get_account_link(&self, messaging_id: &MessagingId) -> StoreResult<AccountLink> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT messaging_id, external_account, linked_at FROM account_links WHERE messaging_id = ?1",
                params![messaging_id.as_str()],
                |row| {
                    Ok(AccountLink {
                        messaging_id: MessagingId(row.get(0)?),
                        external_account: ExternalAccountId(row.get(1)?),
                        linked_at: from_millis(row.get(2)?),
                    })
                },
            )
            .optional()
            .map_err(storage)?
            .ok_or_else(|| StoreError::NotFound(format!("account link for {messaging_id}")))
        })
    }
}

fn ensure_workspace(conn: &Connection, id: &WorkspaceId) -> StoreResult<()> {
    let found = conn
        .query_row(
            "SELECT 1 FROM workspaces WHERE id = ?1",
            params![id.as_str()],
            |_| Ok(()),
        )
        .optional()
        .map_err(storage)?;
    found.ok_or_else(|| StoreError::NotFound(format!("workspace {id}")))
}

fn workspace_from_row(row: &Row<'_>) -> rusqlite::Result<Workspace> {
    Ok(Workspace {
        id: WorkspaceId(row.get(0)?),
        conversation: ConversationRef(row.get(1)?),
        name: row.get(2)?,
        created_at: from_millis(row.get(3)?),
    })
}

fn channel_from_row(row: &Row<'_>) -> rusqlite::Result<Channel> {
    let origin: String = row.get(4)?;
    let last_synced_at: Option<i64> = row.get(6)?;
    Ok(Channel {
        id: ChannelId(row.get(0)?),
        workspace_id: WorkspaceId(row.get(1)?),
        remote_id: row.get(2)?,
        name: row.get(3)?,
        origin: origin_or_manual(&origin),
        created_at: from_millis(row.get(5)?),
        last_synced_at: last_synced_at.map(from_millis),
    })
}

/// Current time truncated to the millisecond precision we persist.
fn now_millis() -> DateTime<Utc> {
    from_millis(Utc::now().timestamp_millis())
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(ms).unwrap_or_default()
}

fn storage(e: rusqlite::Error) -> StoreError {
    StoreError::Storage(e.to_string())
}

fn conflict_or_storage(e: rusqlite::Error, what: impl FnOnce() -> String) -> StoreError {
    match &e {
        rusqlite::Error::SqliteFailure(err, _) if err.code == ErrorCode::ConstraintViolation => {
            StoreError::Conflict(what())
        }
        _ => storage(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conv(s: &str) -> ConversationRef {
        ConversationRef::from(s)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn duplicate_workspace_name_is_conflict_per_conversation() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.create_workspace(&conv("c1"), "team-a").await.unwrap();

        let err = store.create_workspace(&conv("c1"), "team-a").await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        // Same name in another conversation is fine.
        store.create_workspace(&conv("c2"), "team-a").await.unwrap();
        assert_eq!(store.list_workspaces(&conv("c1")).await.unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn channel_on_missing_workspace_is_not_found() {
        let store = SqliteStore::open_in_memory().unwrap();
        let missing = WorkspaceId::from("nope");
        let err = store.create_channel(&missing, "rc-1", "general").await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));

        let attrs = ChannelAttrs {
            name: "general".into(),
            synced_at: Utc::now(),
        };
        let err = store.upsert_channel(&missing, "rc-1", attrs).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn upsert_reports_created_updated_unchanged() {
        let store = SqliteStore::open_in_memory().unwrap();
        let ws = store.create_workspace(&conv("c1"), "w").await.unwrap();
        let attrs = |name: &str| ChannelAttrs {
            name: name.to_string(),
            synced_at: Utc::now(),
        };

        let (ch, o) = store.upsert_channel(&ws.id, "rc-9", attrs("random")).await.unwrap();
        assert_eq!(o, UpsertOutcome::Created);
        assert_eq!(ch.origin, ChannelOrigin::Sync);
        assert!(ch.last_synced_at.is_some());

        let (_, o) = store.upsert_channel(&ws.id, "rc-9", attrs("random")).await.unwrap();
        assert_eq!(o, UpsertOutcome::Unchanged);

        let (ch2, o) = store.upsert_channel(&ws.id, "rc-9", attrs("chatter")).await.unwrap();
        assert_eq!(o, UpsertOutcome::Updated);
        assert_eq!(ch2.id, ch.id);

        let all = store.list_channels(&ws.id).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].name, "chatter");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn upsert_keeps_manual_origin() {
        let store = SqliteStore::open_in_memory().unwrap();
        let ws = store.create_workspace(&conv("c1"), "w").await.unwrap();
        store.create_channel(&ws.id, "rc-1", "general").await.unwrap();

        let attrs = ChannelAttrs {
            name: "general".into(),
            synced_at: Utc::now(),
        };
        let (ch, o) = store.upsert_channel(&ws.id, "rc-1", attrs).await.unwrap();
        assert_eq!(o, UpsertOutcome::Unchanged);
        assert_eq!(ch.origin, ChannelOrigin::Manual);
        assert!(ch.last_synced_at.is_some());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn account_link_is_replaced() {
        let store = SqliteStore::open_in_memory().unwrap();
        let who = MessagingId::from("c1");
        let err = store.get_account_link(&who).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));

        store
            .record_account_link(&who, &ExternalAccountId::from("acct-1"))
            .await
            .unwrap();
        store
            .record_account_link(&who, &ExternalAccountId::from("acct-2"))
            .await
            .unwrap();
        let link = store.get_account_link(&who).await.unwrap();
        assert_eq!(link.external_account.as_str(), "acct-2");
    }
}
