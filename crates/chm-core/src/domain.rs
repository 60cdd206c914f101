use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

string_id!(
    /// Chat conversation that owns workspaces (Telegram chat id, as text).
    ConversationRef
);
string_id!(
    /// Messaging-side identity an account link is recorded for.
    MessagingId
);
string_id!(WorkspaceId);
string_id!(ChannelId);
string_id!(
    /// Opaque account identifier/token understood by the directory service.
    ExternalAccountId
);

impl From<&ConversationRef> for MessagingId {
    fn from(c: &ConversationRef) -> Self {
        Self(c.0.clone())
    }
}

/// Telegram user id (numeric).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct UserId(pub i64);

/// Telegram chat id (numeric).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ChatId(pub i64);

/// Telegram message id (numeric).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MessageId(pub i32);

/// A stable reference to a Telegram message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MessageRef {
    pub chat_id: ChatId,
    pub message_id: MessageId,
}

impl From<ChatId> for ConversationRef {
    fn from(c: ChatId) -> Self {
        Self(c.0.to_string())
    }
}

/// Named grouping of tracked channels, owned by one conversation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workspace {
    pub id: WorkspaceId,
    pub conversation: ConversationRef,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// How a channel row came to exist.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelOrigin {
    Manual,
    Sync,
}

impl ChannelOrigin {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Sync => "sync",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "manual" => Some(Self::Manual),
            "sync" => Some(Self::Sync),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub id: ChannelId,
    pub workspace_id: WorkspaceId,
    pub remote_id: String,
    pub name: String,
    pub origin: ChannelOrigin,
    pub created_at: DateTime<Utc>,
    /// `None` until a refresh has seen this channel upstream.
    pub last_synced_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountLink {
    pub messaging_id: MessagingId,
    pub external_account: ExternalAccountId,
    pub linked_at: DateTime<Utc>,
}

/// Channel as listed by the directory service.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteChannel {
    pub id: String,
    pub name: String,
}

/// Who the bot is. Passed explicitly to the engine and the command adapter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BotIdentity {
    pub display_name: String,
    /// Fingerprint of the bot's identity key, if one is configured.
    pub key_id: Option<String>,
}

impl Default for BotIdentity {
    fn default() -> Self {
        Self {
            display_name: "channel-manager".to_string(),
            key_id: None,
        }
    }
}
