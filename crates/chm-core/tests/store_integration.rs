//! Integration tests for the on-disk SqliteStore and the engine on top of it.
//! Uses multi_thread runtime so the store's block_in_place is allowed.

use std::sync::Arc;

use async_trait::async_trait;
use chm_core::{
    directory::DirectoryClient,
    domain::{BotIdentity, ChannelOrigin, ConversationRef, ExternalAccountId, MessagingId, RemoteChannel},
    errors::DirectoryError,
    registry::RegistryEngine,
    store::{RegistryStore, SqliteStore},
};
use tempfile::NamedTempFile;
use tokio_util::sync::CancellationToken;

fn is_uuid(s: &str) -> bool {
    uuid::Uuid::parse_str(s).is_ok()
}

struct OneChannel;

#[async_trait]
impl DirectoryClient for OneChannel {
    async fn fetch_channels(
        &self,
        _account: &ExternalAccountId,
    ) -> Result<Vec<RemoteChannel>, DirectoryError> {
        Ok(vec![RemoteChannel {
            id: "rc-7".into(),
            name: "announcements".into(),
        }])
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn open_creates_db_and_reopen_same_path_keeps_rows() {
    let file = NamedTempFile::new().unwrap();
    let path = file.path().to_path_buf();
    let conv = ConversationRef::from("chat-1");

    let store1 = SqliteStore::open(&path).unwrap();
    let ws = store1.create_workspace(&conv, "team-a").await.unwrap();
    assert!(is_uuid(ws.id.as_str()));
    let ch = store1.create_channel(&ws.id, "rc-1", "general").await.unwrap();
    assert!(is_uuid(ch.id.as_str()));
    store1
        .record_account_link(&MessagingId::from(&conv), &ExternalAccountId::from("acct-1"))
        .await
        .unwrap();
    drop(store1);

    let store2 = SqliteStore::open(&path).unwrap();
    let list = store2.list_workspaces(&conv).await.unwrap();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0].id, ws.id);
    assert_eq!(list[0].name, "team-a");

    let channels = store2.list_channels(&ws.id).await.unwrap();
    assert_eq!(channels.len(), 1);
    assert_eq!(channels[0].remote_id, "rc-1");
    assert_eq!(channels[0].origin, ChannelOrigin::Manual);
    assert!(channels[0].last_synced_at.is_none());

    let link = store2
        .get_account_link(&MessagingId::from(&conv))
        .await
        .unwrap();
    assert_eq!(link.external_account.as_str(), "acct-1");
}

#[tokio::test(flavor = "multi_thread")]
async fn refreshed_channels_survive_restart() {
    let file = NamedTempFile::new().unwrap();
    let conv = ConversationRef::from("chat-2");

    let ws_id = {
        let engine = RegistryEngine::new(
            Arc::new(SqliteStore::open(file.path()).unwrap()),
            Arc::new(OneChannel),
            BotIdentity::default(),
        );
        let ws = engine.add_workspace(&conv, "ops").await.unwrap();
        engine
            .link_account(&MessagingId::from(&conv), "acct-2")
            .await
            .unwrap();
        let summary = engine
            .refresh(&ws.id, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(summary.created, 1);
        ws.id
    };

    let store = SqliteStore::open(file.path()).unwrap();
    let channels = store.list_channels(&ws_id).await.unwrap();
    assert_eq!(channels.len(), 1);
    assert_eq!(channels[0].name, "announcements");
    assert_eq!(channels[0].origin, ChannelOrigin::Sync);
    assert!(channels[0].last_synced_at.is_some());
}
