use std::time::Duration;

/// Core error type for process-level failures (config, storage, transport).
///
/// Adapter crates should map their specific errors into this type so the bot
/// can report startup and delivery failures consistently. Command failures use
/// [`RegistryError`] instead.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    #[error("external error: {0}")]
    External(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by a [`crate::store::RegistryStore`].
///
/// `NotFound` and `Conflict` are expected outcomes the engine reacts to;
/// `Storage` is everything else.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("storage: {0}")]
    Storage(String),
}

/// Errors surfaced by a [`crate::directory::DirectoryClient`].
#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("directory rejected credentials: {0}")]
    Auth(String),

    #[error("directory rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    #[error("directory unreachable: {0}")]
    Network(String),

    #[error("directory sent an unexpected response: {0}")]
    Protocol(String),
}

impl DirectoryError {
    /// Short label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Auth(_) => "auth",
            Self::RateLimited { .. } => "rate_limited",
            Self::Network(_) => "network",
            Self::Protocol(_) => "protocol",
        }
    }
}

/// What kind of entity a not-found/conflict error is about.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntityKind {
    Workspace,
    Channel,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Workspace => f.write_str("workspace"),
            Self::Channel => f.write_str("channel"),
        }
    }
}

/// Error returned by every [`crate::registry::RegistryEngine`] operation.
///
/// Raw store/directory errors never leave the engine unmapped.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("invalid input: {0}")]
    Validation(String),

    #[error("{kind} not found: {reference}")]
    NotFound { kind: EntityKind, reference: String },

    #[error("no external account linked")]
    NoLinkedAccount,

    #[error("{kind} already exists: {reference}")]
    Conflict { kind: EntityKind, reference: String },

    #[error("refresh failed: {0}")]
    Directory(#[source] DirectoryError),

    #[error("operation cancelled")]
    Cancelled,

    #[error("storage failure: {0}")]
    Storage(String),
}

impl RegistryError {
    /// Internal errors get generic reply wording; the detail goes to the log.
    pub fn is_internal(&self) -> bool {
        matches!(self, Self::Storage(_))
    }

    /// Reply text for the chat user.
    pub fn user_message(&self) -> String {
        match self {
            Self::Validation(msg) => msg.clone(),
            Self::NotFound { kind, reference } => {
                format!("The {kind} \"{reference}\" does not exist.")
            }
            Self::NoLinkedAccount => {
                "No linked account. Use /link_account <account> first.".to_string()
            }
            Self::Conflict {
                kind: EntityKind::Workspace,
                reference,
            } => format!("The workspace \"{reference}\" already exists."),
            Self::Conflict {
                kind: EntityKind::Channel,
                reference,
            } => format!("The channel \"{reference}\" is already tracked."),
            Self::Directory(_) => "Refresh failed, try again later.".to_string(),
            Self::Cancelled => "The operation timed out before it finished.".to_string(),
            Self::Storage(_) => "Something went wrong on our side. Please retry.".to_string(),
        }
    }
}
