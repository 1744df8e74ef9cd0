//! In-process working memory backend.

use super::{Lifecycle, Provider, WorkingMemory};
use crate::error::MemoryError;
use crate::health::HealthStatus;
use crate::model::Message;
use crate::policy::{CaptureFilter, CapturePolicy};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use log::{debug, info};
use mnemo_rs_config::{MemoryDomain, ProviderConfig};
use parking_lot::RwLock;
use std::collections::{HashMap, VecDeque};
use std::time::Instant;

/// Default number of messages kept per session.
const DEFAULT_MAX_MESSAGES: usize = 50;
/// Default idle time before a session window is dropped.
const DEFAULT_TTL_SECONDS: u64 = 3600;

#[derive(Debug)]
struct SessionWindow {
    messages: VecDeque<Message>,
    variables: HashMap<String, serde_json::Value>,
    last_access: DateTime<Utc>,
}

impl SessionWindow {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            messages: VecDeque::new(),
            variables: HashMap::new(),
            last_access: now,
        }
    }
}

type UserSessions = HashMap<String, SessionWindow>;

/// Session-scoped message windows and scratch variables held in memory.
#[derive(Debug)]
pub struct InMemoryWorkingMemory {
    lifecycle: Lifecycle,
    max_messages: usize,
    ttl: Duration,
    capture: CaptureFilter,
    users: RwLock<HashMap<String, UserSessions>>,
}

impl InMemoryWorkingMemory {
    /// Build from backend parameters (`max_messages`, `ttl_seconds`, capture keys).
    pub fn from_config(config: &ProviderConfig) -> Result<Self, MemoryError> {
        let max_messages = config
            .param_u64("max_messages")?
            .map(|n| n as usize)
            .unwrap_or(DEFAULT_MAX_MESSAGES);
        if max_messages == 0 {
            return Err(MemoryError::InvalidConfig(
                "working.max_messages must be positive".to_string(),
            ));
        }
        let ttl_seconds = config.param_u64("ttl_seconds")?.unwrap_or(DEFAULT_TTL_SECONDS);
        let policy = CapturePolicy::from_config(config)?;
        Self::new(max_messages, Duration::seconds(ttl_seconds as i64), policy)
    }

    pub fn new(
        max_messages: usize,
        ttl: Duration,
        policy: CapturePolicy,
    ) -> Result<Self, MemoryError> {
        Ok(Self {
            lifecycle: Lifecycle::new(MemoryDomain::Working),
            max_messages,
            ttl,
            capture: policy.compile()?,
            users: RwLock::new(HashMap::new()),
        })
    }

    fn is_expired(&self, window: &SessionWindow, now: DateTime<Utc>) -> bool {
        now - window.last_access > self.ttl
    }

    /// Run `f` on a live session window, creating it when `create` is set.
    fn with_session<T>(
        &self,
        user_id: &str,
        session_id: &str,
        create: bool,
        f: impl FnOnce(&mut SessionWindow) -> T,
    ) -> Result<Option<T>, MemoryError> {
        self.lifecycle.ensure_ready()?;
        let now = Utc::now();
        let mut users = self.users.write();
        let sessions = users.entry(user_id.to_string()).or_default();
        if sessions
            .get(session_id)
            .is_some_and(|window| self.is_expired(window, now))
        {
            debug!(
                "working session expired (user_id={}, session_id={})",
                user_id, session_id
            );
            sessions.remove(session_id);
        }
        let window = if create {
            Some(
                sessions
                    .entry(session_id.to_string())
                    .or_insert_with(|| SessionWindow::new(now)),
            )
        } else {
            sessions.get_mut(session_id)
        };
        Ok(window.map(|window| {
            window.last_access = now;
            f(window)
        }))
    }
}

#[async_trait]
impl Provider for InMemoryWorkingMemory {
    fn name(&self) -> &str {
        "memory"
    }

    async fn initialize(&self) -> Result<(), MemoryError> {
        if self.lifecycle.should_initialize()? {
            self.lifecycle.mark_ready();
            info!(
                "initialized working memory (max_messages={}, ttl_seconds={})",
                self.max_messages,
                self.ttl.num_seconds()
            );
        }
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), MemoryError> {
        if self.lifecycle.mark_shutdown() {
            self.users.write().clear();
            info!("working memory shutdown");
        }
        Ok(())
    }

    async fn health_check(&self) -> HealthStatus {
        let started = Instant::now();
        let users = self.users.read();
        let sessions: usize = users.values().map(HashMap::len).sum();
        self.lifecycle.health(
            started,
            serde_json::json!({ "users": users.len(), "sessions": sessions }),
        )
    }
}

#[async_trait]
impl WorkingMemory for InMemoryWorkingMemory {
    async fn append_message(
        &self,
        user_id: &str,
        session_id: &str,
        message: Message,
    ) -> Result<bool, MemoryError> {
        let Some(content) = self.capture.apply(&message.content) else {
            debug!(
                "working message denied by capture policy (user_id={}, session_id={})",
                user_id, session_id
            );
            return Ok(false);
        };
        let max_messages = self.max_messages;
        self.with_session(user_id, session_id, true, |window| {
            window.messages.push_back(Message { content, ..message });
            while window.messages.len() > max_messages {
                window.messages.pop_front();
            }
        })?;
        Ok(true)
    }

    async fn recent_messages(
        &self,
        user_id: &str,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<Message>, MemoryError> {
        let messages = self.with_session(user_id, session_id, false, |window| {
            let start = window.messages.len().saturating_sub(limit);
            window.messages.iter().skip(start).cloned().collect()
        })?;
        Ok(messages.unwrap_or_default())
    }

    async fn set_variable(
        &self,
        user_id: &str,
        session_id: &str,
        key: &str,
        value: serde_json::Value,
    ) -> Result<(), MemoryError> {
        self.with_session(user_id, session_id, true, |window| {
            window.variables.insert(key.to_string(), value);
        })?;
        Ok(())
    }

    async fn get_variable(
        &self,
        user_id: &str,
        session_id: &str,
        key: &str,
    ) -> Result<Option<serde_json::Value>, MemoryError> {
        let value = self.with_session(user_id, session_id, false, |window| {
            window.variables.get(key).cloned()
        })?;
        Ok(value.flatten())
    }

    async fn remove_variable(
        &self,
        user_id: &str,
        session_id: &str,
        key: &str,
    ) -> Result<bool, MemoryError> {
        let removed = self.with_session(user_id, session_id, false, |window| {
            window.variables.remove(key).is_some()
        })?;
        Ok(removed.unwrap_or(false))
    }

    async fn clear_session(&self, user_id: &str, session_id: &str) -> Result<bool, MemoryError> {
        self.lifecycle.ensure_ready()?;
        let mut users = self.users.write();
        let removed = users
            .get_mut(user_id)
            .and_then(|sessions| sessions.remove(session_id))
            .is_some();
        debug!(
            "working session cleared (user_id={}, session_id={}, existed={})",
            user_id, session_id, removed
        );
        Ok(removed)
    }

    async fn sessions(&self, user_id: &str) -> Result<Vec<String>, MemoryError> {
        self.lifecycle.ensure_ready()?;
        let now = Utc::now();
        let users = self.users.read();
        let mut sessions: Vec<String> = users
            .get(user_id)
            .map(|sessions| {
                sessions
                    .iter()
                    .filter(|(_, window)| !self.is_expired(window, now))
                    .map(|(id, _)| id.clone())
                    .collect()
            })
            .unwrap_or_default();
        sessions.sort();
        Ok(sessions)
    }
}
