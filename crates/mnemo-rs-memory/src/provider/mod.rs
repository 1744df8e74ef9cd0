//! Provider contracts for the five memory domains.

use crate::error::MemoryError;
use crate::health::HealthStatus;
use crate::model::{
    ConversationSummary, EmotionTrend, EmotionalRecord, EpisodeHit, EpisodeSearchOptions,
    HistoryOptions, KeyEvent, KeyEventQuery, KeyEventUpdate, Message, NewKeyEvent,
    NewProfileFact, ObjectMeta, ProfileFact, TimelineEntry,
};
use crate::vector::{MemoryMatch, NewUserMemory, RebuildReport, SearchOptions, UserMemory};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::warn;
use mnemo_rs_config::MemoryDomain;
use parking_lot::RwLock;
use serde::Serialize;
use std::fmt;
use std::time::Instant;
use uuid::Uuid;

pub mod episodic;
pub mod knowledge;
pub mod profile;
pub mod storage;
pub mod working;

/// Lifecycle state tracked by every built-in backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderState {
    #[default]
    Created,
    Ready,
    Shutdown,
}

impl fmt::Display for ProviderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ProviderState::Created => "created",
            ProviderState::Ready => "ready",
            ProviderState::Shutdown => "shutdown",
        };
        f.write_str(label)
    }
}

/// Shared lifecycle bookkeeping for provider implementations.
#[derive(Debug)]
pub struct Lifecycle {
    domain: MemoryDomain,
    state: RwLock<ProviderState>,
}

impl Lifecycle {
    pub fn new(domain: MemoryDomain) -> Self {
        Self {
            domain,
            state: RwLock::new(ProviderState::Created),
        }
    }

    pub fn state(&self) -> ProviderState {
        *self.state.read()
    }

    /// Returns `Ok(false)` when already ready, so callers can skip setup.
    pub fn should_initialize(&self) -> Result<bool, MemoryError> {
        match self.state() {
            ProviderState::Created => Ok(true),
            ProviderState::Ready => Ok(false),
            ProviderState::Shutdown => Err(MemoryError::not_ready(
                self.domain.as_str(),
                ProviderState::Shutdown,
            )),
        }
    }

    pub fn mark_ready(&self) {
        let mut state = self.state.write();
        if *state == ProviderState::Created {
            *state = ProviderState::Ready;
        }
    }

    /// Returns true on the first transition into `Shutdown`.
    pub fn mark_shutdown(&self) -> bool {
        let mut state = self.state.write();
        let changed = *state != ProviderState::Shutdown;
        *state = ProviderState::Shutdown;
        changed
    }

    pub fn ensure_ready(&self) -> Result<(), MemoryError> {
        match self.state() {
            ProviderState::Ready => Ok(()),
            other => Err(MemoryError::not_ready(self.domain.as_str(), other)),
        }
    }

    /// Health for providers with no external dependency.
    pub fn health(&self, started: Instant, details: serde_json::Value) -> HealthStatus {
        match self.state() {
            ProviderState::Ready => HealthStatus::healthy(started.elapsed(), details),
            other => HealthStatus::unhealthy(
                started.elapsed(),
                serde_json::json!({ "state": other.to_string() }),
            ),
        }
    }
}

/// Log a failed operation with its context before returning it to the caller.
pub(crate) fn logged<T>(
    domain: MemoryDomain,
    operation: &str,
    user_id: &str,
    result: Result<T, MemoryError>,
) -> Result<T, MemoryError> {
    if let Err(err) = &result {
        warn!(
            "memory operation failed (domain={}, operation={}, user_id={}): {}",
            domain, operation, user_id, err
        );
    }
    result
}

/// Lifecycle contract shared by every memory provider.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Backend identifier.
    fn name(&self) -> &str;

    /// Prepare resources. Calling again after success is a no-op.
    async fn initialize(&self) -> Result<(), MemoryError>;

    /// Release resources. Idempotent and terminal.
    async fn shutdown(&self) -> Result<(), MemoryError>;

    /// Report health. Internal failures become an unhealthy status.
    async fn health_check(&self) -> HealthStatus;
}

/// Short-lived, session-scoped conversational context.
#[async_trait]
pub trait WorkingMemory: Provider {
    /// Append a message after capture filtering; returns false when filtered out.
    async fn append_message(
        &self,
        user_id: &str,
        session_id: &str,
        message: Message,
    ) -> Result<bool, MemoryError>;

    /// Most recent messages in the session window, oldest first.
    async fn recent_messages(
        &self,
        user_id: &str,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<Message>, MemoryError>;

    async fn set_variable(
        &self,
        user_id: &str,
        session_id: &str,
        key: &str,
        value: serde_json::Value,
    ) -> Result<(), MemoryError>;

    async fn get_variable(
        &self,
        user_id: &str,
        session_id: &str,
        key: &str,
    ) -> Result<Option<serde_json::Value>, MemoryError>;

    async fn remove_variable(
        &self,
        user_id: &str,
        session_id: &str,
        key: &str,
    ) -> Result<bool, MemoryError>;

    /// Drop a session window; returns whether it existed.
    async fn clear_session(&self, user_id: &str, session_id: &str) -> Result<bool, MemoryError>;

    /// Live session ids for a user.
    async fn sessions(&self, user_id: &str) -> Result<Vec<String>, MemoryError>;
}

/// Durable conversation history, summaries, key events and emotion signals.
#[async_trait]
pub trait EpisodicMemory: Provider {
    /// Replace the stored messages for a session.
    async fn add_conversation(
        &self,
        user_id: &str,
        session_id: &str,
        messages: Vec<Message>,
    ) -> Result<(), MemoryError>;

    async fn get_conversation(
        &self,
        user_id: &str,
        session_id: &str,
    ) -> Result<Option<Vec<Message>>, MemoryError>;

    /// Remove messages and the summary of a session; key events are kept.
    async fn delete_conversation(&self, user_id: &str, session_id: &str)
    -> Result<bool, MemoryError>;

    /// Summary for a session, computed once and returned on later calls.
    async fn summarize_conversation(
        &self,
        user_id: &str,
        session_id: &str,
    ) -> Result<ConversationSummary, MemoryError>;

    /// Summaries newest-first with date/topic filters and pagination.
    async fn get_conversation_history(
        &self,
        user_id: &str,
        options: HistoryOptions,
    ) -> Result<Vec<ConversationSummary>, MemoryError>;

    async fn add_key_event(&self, user_id: &str, event: NewKeyEvent) -> Result<Uuid, MemoryError>;

    async fn update_key_event(
        &self,
        user_id: &str,
        event_id: Uuid,
        update: KeyEventUpdate,
    ) -> Result<KeyEvent, MemoryError>;

    async fn delete_key_event(&self, user_id: &str, event_id: Uuid) -> Result<(), MemoryError>;

    async fn get_key_events(
        &self,
        user_id: &str,
        query: KeyEventQuery,
    ) -> Result<Vec<KeyEvent>, MemoryError>;

    /// Term-overlap search across summaries and events.
    async fn search_episodes(
        &self,
        user_id: &str,
        query: &str,
        options: EpisodeSearchOptions,
    ) -> Result<Vec<EpisodeHit>, MemoryError>;

    async fn get_timeline(
        &self,
        user_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<TimelineEntry>, MemoryError>;

    /// Overwrite the current emotion record for the record's session.
    async fn record_emotion(&self, user_id: &str, record: EmotionalRecord)
    -> Result<(), MemoryError>;

    async fn get_emotion(
        &self,
        user_id: &str,
        session_id: &str,
    ) -> Result<Option<EmotionalRecord>, MemoryError>;

    async fn get_emotion_trend(
        &self,
        user_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<EmotionTrend, MemoryError>;
}

/// Durable per-user facts.
#[async_trait]
pub trait ProfileMemory: Provider {
    /// Upsert a fact by key; the latest write wins.
    async fn set_fact(&self, user_id: &str, fact: NewProfileFact)
    -> Result<ProfileFact, MemoryError>;

    async fn get_fact(&self, user_id: &str, key: &str) -> Result<Option<ProfileFact>, MemoryError>;

    /// All facts for a user, sorted by key.
    async fn get_profile(&self, user_id: &str) -> Result<Vec<ProfileFact>, MemoryError>;

    async fn delete_fact(&self, user_id: &str, key: &str) -> Result<bool, MemoryError>;

    /// Remove every fact for a user; returns the number removed.
    async fn clear_profile(&self, user_id: &str) -> Result<usize, MemoryError>;
}

/// Outcome of adding a knowledge memory.
#[derive(Debug, Clone, PartialEq)]
pub enum AddOutcome {
    /// Newly stored memory.
    Stored(UserMemory),
    /// Existing near-duplicate returned instead of inserting.
    Duplicate(MemoryMatch),
}

impl AddOutcome {
    pub fn memory(&self) -> &UserMemory {
        match self {
            AddOutcome::Stored(memory) => memory,
            AddOutcome::Duplicate(found) => &found.memory,
        }
    }
}

/// Semantically searchable knowledge corpus.
#[async_trait]
pub trait KnowledgeMemory: Provider {
    async fn add_memory(&self, memory: NewUserMemory) -> Result<AddOutcome, MemoryError>;

    async fn search(
        &self,
        user_id: &str,
        query: &str,
        options: SearchOptions,
    ) -> Result<Vec<MemoryMatch>, MemoryError>;

    async fn get_memory(&self, user_id: &str, id: Uuid) -> Result<Option<UserMemory>, MemoryError>;

    /// Replace content and re-embed.
    async fn update_content(
        &self,
        user_id: &str,
        id: Uuid,
        content: &str,
    ) -> Result<UserMemory, MemoryError>;

    /// Exclude a memory from search without deleting it.
    async fn deactivate(&self, user_id: &str, id: Uuid) -> Result<bool, MemoryError>;

    async fn delete_memory(&self, user_id: &str, id: Uuid) -> Result<bool, MemoryError>;

    /// Recompute every embedding for a user.
    async fn rebuild(&self, user_id: &str, batch_size: usize)
    -> Result<RebuildReport, MemoryError>;
}

/// Raw object blob storage.
#[async_trait]
pub trait ObjectStorage: Provider {
    async fn put_object(
        &self,
        user_id: &str,
        key: &str,
        data: Vec<u8>,
        content_type: Option<String>,
    ) -> Result<ObjectMeta, MemoryError>;

    async fn get_object(
        &self,
        user_id: &str,
        key: &str,
    ) -> Result<(ObjectMeta, Vec<u8>), MemoryError>;

    async fn head_object(&self, user_id: &str, key: &str)
    -> Result<Option<ObjectMeta>, MemoryError>;

    async fn delete_object(&self, user_id: &str, key: &str) -> Result<bool, MemoryError>;

    /// Objects sorted by key, optionally restricted to a key prefix.
    async fn list_objects(
        &self,
        user_id: &str,
        prefix: Option<&str>,
    ) -> Result<Vec<ObjectMeta>, MemoryError>;
}

#[cfg(test)]
mod tests {
    use super::{Lifecycle, ProviderState};
    use crate::error::MemoryError;
    use crate::health::HealthState;
    use mnemo_rs_config::MemoryDomain;
    use pretty_assertions::assert_eq;
    use std::time::Instant;

    #[test]
    fn lifecycle_is_idempotent_and_terminal() {
        let lifecycle = Lifecycle::new(MemoryDomain::Working);
        assert!(lifecycle.ensure_ready().is_err());
        assert!(lifecycle.should_initialize().unwrap());
        lifecycle.mark_ready();
        assert!(!lifecycle.should_initialize().unwrap());
        assert!(lifecycle.mark_shutdown());
        assert!(!lifecycle.mark_shutdown());
        assert_eq!(lifecycle.state(), ProviderState::Shutdown);
        assert!(matches!(
            lifecycle.should_initialize(),
            Err(MemoryError::NotReady { .. })
        ));
    }

    #[test]
    fn lifecycle_health_reflects_state() {
        let lifecycle = Lifecycle::new(MemoryDomain::Profile);
        let status = lifecycle.health(Instant::now(), serde_json::json!({}));
        assert_eq!(status.status, HealthState::Unhealthy);
        lifecycle.mark_ready();
        let status = lifecycle.health(Instant::now(), serde_json::json!({}));
        assert_eq!(status.status, HealthState::Healthy);
    }
}
