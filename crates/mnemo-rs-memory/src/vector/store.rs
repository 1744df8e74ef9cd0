//! Persisted-store boundary for knowledge memories and its in-process backend.

use super::{UserMemory, cosine_distance};
use crate::error::MemoryError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use uuid::Uuid;

/// Row predicates applied by [`VectorStore::nearest`].
///
/// Inactive rows, rows expired at `now` and rows without an embedding are
/// always excluded.
#[derive(Debug, Clone)]
pub struct MemoryFilter {
    pub memory_type: Option<String>,
    pub category: Option<String>,
    pub now: DateTime<Utc>,
}

impl MemoryFilter {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            memory_type: None,
            category: None,
            now,
        }
    }

    pub fn matches(&self, memory: &UserMemory) -> bool {
        memory.is_live(self.now)
            && !memory.embedding.is_empty()
            && self
                .memory_type
                .as_deref()
                .is_none_or(|memory_type| memory.memory_type == memory_type)
            && self
                .category
                .as_deref()
                .is_none_or(|category| memory.category.as_deref() == Some(category))
    }
}

/// Storage for knowledge memories with nearest-neighbour queries.
///
/// Every call is scoped to one user; implementations never return rows owned
/// by another user.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Backend identifier.
    fn name(&self) -> &str;

    /// Acquire resources. Calling again is a no-op.
    async fn open(&self) -> Result<(), MemoryError>;

    async fn close(&self) -> Result<(), MemoryError>;

    /// Probe the store, returning diagnostic details.
    async fn ping(&self) -> Result<serde_json::Value, MemoryError>;

    /// Persist a new row and return it as stored.
    async fn insert(&self, memory: UserMemory) -> Result<UserMemory, MemoryError>;

    async fn get(&self, user_id: &str, id: Uuid) -> Result<Option<UserMemory>, MemoryError>;

    /// Overwrite the embedding in place; false when the row is missing.
    async fn update_embedding(
        &self,
        user_id: &str,
        id: Uuid,
        embedding: Vec<f32>,
        now: DateTime<Utc>,
    ) -> Result<bool, MemoryError>;

    /// Replace content and embedding together.
    async fn update_content(
        &self,
        user_id: &str,
        id: Uuid,
        content: &str,
        embedding: Vec<f32>,
        now: DateTime<Utc>,
    ) -> Result<Option<UserMemory>, MemoryError>;

    async fn set_active(
        &self,
        user_id: &str,
        id: Uuid,
        active: bool,
        now: DateTime<Utc>,
    ) -> Result<bool, MemoryError>;

    async fn delete(&self, user_id: &str, id: Uuid) -> Result<bool, MemoryError>;

    /// Up to `limit` filtered rows with their cosine distance, nearest first.
    async fn nearest(
        &self,
        user_id: &str,
        query: &[f32],
        filter: &MemoryFilter,
        limit: usize,
    ) -> Result<Vec<(UserMemory, f32)>, MemoryError>;

    /// A page of the user's rows ordered by creation time.
    async fn page_by_user(
        &self,
        user_id: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<UserMemory>, MemoryError>;
}

/// Sort candidate rows by distance and keep the nearest `limit`.
pub(crate) fn rank_nearest(
    rows: impl IntoIterator<Item = UserMemory>,
    query: &[f32],
    limit: usize,
) -> Vec<(UserMemory, f32)> {
    let mut ranked: Vec<(UserMemory, f32)> = rows
        .into_iter()
        .filter_map(|memory| {
            let distance = cosine_distance(&memory.embedding, query)?;
            Some((memory, distance))
        })
        .collect();
    ranked.sort_by(|(a, da), (b, db)| da.total_cmp(db).then(b.created_at.cmp(&a.created_at)));
    ranked.truncate(limit);
    ranked
}

/// Knowledge rows held in process memory, keyed by user then id.
#[derive(Debug, Default)]
pub struct InMemoryVectorStore {
    users: RwLock<HashMap<String, HashMap<Uuid, UserMemory>>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_row<T>(
        &self,
        user_id: &str,
        id: Uuid,
        f: impl FnOnce(&mut UserMemory) -> T,
    ) -> Option<T> {
        let mut users = self.users.write();
        users
            .get_mut(user_id)
            .and_then(|rows| rows.get_mut(&id))
            .map(f)
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn open(&self) -> Result<(), MemoryError> {
        Ok(())
    }

    async fn close(&self) -> Result<(), MemoryError> {
        self.users.write().clear();
        Ok(())
    }

    async fn ping(&self) -> Result<serde_json::Value, MemoryError> {
        let users = self.users.read();
        let rows: usize = users.values().map(HashMap::len).sum();
        Ok(serde_json::json!({ "users": users.len(), "rows": rows }))
    }

    async fn insert(&self, memory: UserMemory) -> Result<UserMemory, MemoryError> {
        let mut users = self.users.write();
        let rows = users.entry(memory.user_id.clone()).or_default();
        if rows.contains_key(&memory.id) {
            return Err(MemoryError::Store(format!(
                "memory {} already exists",
                memory.id
            )));
        }
        rows.insert(memory.id, memory.clone());
        Ok(memory)
    }

    async fn get(&self, user_id: &str, id: Uuid) -> Result<Option<UserMemory>, MemoryError> {
        let users = self.users.read();
        Ok(users.get(user_id).and_then(|rows| rows.get(&id)).cloned())
    }

    async fn update_embedding(
        &self,
        user_id: &str,
        id: Uuid,
        embedding: Vec<f32>,
        now: DateTime<Utc>,
    ) -> Result<bool, MemoryError> {
        Ok(self
            .with_row(user_id, id, |memory| {
                memory.embedding = embedding;
                memory.updated_at = now;
            })
            .is_some())
    }

    async fn update_content(
        &self,
        user_id: &str,
        id: Uuid,
        content: &str,
        embedding: Vec<f32>,
        now: DateTime<Utc>,
    ) -> Result<Option<UserMemory>, MemoryError> {
        Ok(self.with_row(user_id, id, |memory| {
            memory.content = content.to_string();
            memory.embedding = embedding;
            memory.updated_at = now;
            memory.clone()
        }))
    }

    async fn set_active(
        &self,
        user_id: &str,
        id: Uuid,
        active: bool,
        now: DateTime<Utc>,
    ) -> Result<bool, MemoryError> {
        Ok(self
            .with_row(user_id, id, |memory| {
                memory.is_active = active;
                memory.updated_at = now;
            })
            .is_some())
    }

    async fn delete(&self, user_id: &str, id: Uuid) -> Result<bool, MemoryError> {
        let mut users = self.users.write();
        Ok(users
            .get_mut(user_id)
            .and_then(|rows| rows.remove(&id))
            .is_some())
    }

    async fn nearest(
        &self,
        user_id: &str,
        query: &[f32],
        filter: &MemoryFilter,
        limit: usize,
    ) -> Result<Vec<(UserMemory, f32)>, MemoryError> {
        let users = self.users.read();
        let Some(rows) = users.get(user_id) else {
            return Ok(Vec::new());
        };
        let candidates = rows
            .values()
            .filter(|memory| filter.matches(memory))
            .cloned()
            .collect::<Vec<_>>();
        Ok(rank_nearest(candidates, query, limit))
    }

    async fn page_by_user(
        &self,
        user_id: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<UserMemory>, MemoryError> {
        let users = self.users.read();
        let mut rows: Vec<UserMemory> = users
            .get(user_id)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default();
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(rows.into_iter().skip(offset).take(limit).collect())
    }
}
