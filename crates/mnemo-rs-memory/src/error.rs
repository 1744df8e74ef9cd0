//! Error types for memory operations.

use mnemo_rs_config::{ConfigError, MemoryDomain};
use uuid::Uuid;

/// Errors returned by memory providers, the vector engine and the manager.
#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    /// No constructor registered for a domain/backend pair.
    #[error("provider not found (domain={domain}, backend={backend})")]
    ProviderNotFound {
        domain: MemoryDomain,
        backend: String,
    },
    /// A constructor produced a provider for another domain.
    #[error("provider domain mismatch (expected={expected}, actual={actual})")]
    DomainMismatch {
        expected: MemoryDomain,
        actual: MemoryDomain,
    },
    /// Component used outside its ready window.
    #[error("{component} is not ready (status={status})")]
    NotReady { component: String, status: String },
    /// No messages were ever added for the session.
    #[error("conversation not found (user_id={user_id}, session_id={session_id})")]
    ConversationNotFound { user_id: String, session_id: String },
    /// Key event id is unknown for the user.
    #[error("key event not found: {0}")]
    EventNotFound(Uuid),
    /// Knowledge memory id is unknown for the user.
    #[error("memory not found: {0}")]
    MemoryNotFound(Uuid),
    /// Object key is unknown for the user.
    #[error("object not found (user_id={user_id}, key={key})")]
    ObjectNotFound { user_id: String, key: String },
    /// First provider failure observed during manager startup.
    #[error("failed to initialize {domain} provider: {source}")]
    InitializationFailure {
        domain: MemoryDomain,
        #[source]
        source: Box<MemoryError>,
    },
    /// Invalid provider parameters or arguments.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// Invalid caller input.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Embedding step failed.
    #[error("embedding error: {0}")]
    Embedding(String),
    /// Downstream store failure.
    #[error("store error: {0}")]
    Store(String),
    /// Config decoding error.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Serialization error.
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    /// SQLite error.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// Blocking store task panicked or was cancelled.
    #[error("blocking task failed: {0}")]
    Blocking(#[from] tokio::task::JoinError),
    /// Regex compilation error.
    #[error("regex error: {0}")]
    Regex(String),
}

impl MemoryError {
    /// Build a `NotReady` error for a component and its current status.
    pub fn not_ready(component: impl Into<String>, status: impl std::fmt::Display) -> Self {
        Self::NotReady {
            component: component.into(),
            status: status.to_string(),
        }
    }
}
