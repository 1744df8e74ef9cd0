//! Profile fact backends: in-process map and SQLite.

use super::{Lifecycle, ProfileMemory, Provider};
use crate::error::MemoryError;
use crate::health::HealthStatus;
use crate::model::{NewProfileFact, ProfileFact, clamp_unit};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, info};
use mnemo_rs_config::{MemoryDomain, ProviderConfig};
use parking_lot::{Mutex, RwLock};
use rusqlite::{Connection, OptionalExtension, params};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::spawn_blocking;

fn validate_key(key: &str) -> Result<(), MemoryError> {
    if key.trim().is_empty() {
        return Err(MemoryError::InvalidInput(
            "profile fact key must not be empty".to_string(),
        ));
    }
    Ok(())
}

/// Merge an upsert into the existing fact, preserving `created_at`.
fn merge_fact(existing: Option<&ProfileFact>, fact: NewProfileFact, now: DateTime<Utc>) -> ProfileFact {
    ProfileFact {
        key: fact.key,
        value: fact.value,
        confidence: clamp_unit(fact.confidence.unwrap_or(1.0)),
        source: fact.source,
        created_at: existing.map_or(now, |existing| existing.created_at),
        updated_at: now,
    }
}

/// Profile facts held in process memory.
#[derive(Debug)]
pub struct InMemoryProfileMemory {
    lifecycle: Lifecycle,
    users: RwLock<HashMap<String, BTreeMap<String, ProfileFact>>>,
}

impl Default for InMemoryProfileMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryProfileMemory {
    pub fn new() -> Self {
        Self {
            lifecycle: Lifecycle::new(MemoryDomain::Profile),
            users: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl Provider for InMemoryProfileMemory {
    fn name(&self) -> &str {
        "memory"
    }

    async fn initialize(&self) -> Result<(), MemoryError> {
        if self.lifecycle.should_initialize()? {
            self.lifecycle.mark_ready();
            info!("initialized profile memory (backend=memory)");
        }
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), MemoryError> {
        if self.lifecycle.mark_shutdown() {
            self.users.write().clear();
            info!("profile memory shutdown (backend=memory)");
        }
        Ok(())
    }

    async fn health_check(&self) -> HealthStatus {
        let started = Instant::now();
        let users = self.users.read();
        let facts: usize = users.values().map(BTreeMap::len).sum();
        self.lifecycle.health(
            started,
            serde_json::json!({ "users": users.len(), "facts": facts }),
        )
    }
}

#[async_trait]
impl ProfileMemory for InMemoryProfileMemory {
    async fn set_fact(
        &self,
        user_id: &str,
        fact: NewProfileFact,
    ) -> Result<ProfileFact, MemoryError> {
        self.lifecycle.ensure_ready()?;
        validate_key(&fact.key)?;
        let mut users = self.users.write();
        let facts = users.entry(user_id.to_string()).or_default();
        let stored = merge_fact(facts.get(&fact.key), fact, Utc::now());
        facts.insert(stored.key.clone(), stored.clone());
        debug!("profile fact set (user_id={}, key={})", user_id, stored.key);
        Ok(stored)
    }

    async fn get_fact(&self, user_id: &str, key: &str) -> Result<Option<ProfileFact>, MemoryError> {
        self.lifecycle.ensure_ready()?;
        let users = self.users.read();
        Ok(users.get(user_id).and_then(|facts| facts.get(key)).cloned())
    }

    async fn get_profile(&self, user_id: &str) -> Result<Vec<ProfileFact>, MemoryError> {
        self.lifecycle.ensure_ready()?;
        let users = self.users.read();
        Ok(users
            .get(user_id)
            .map(|facts| facts.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn delete_fact(&self, user_id: &str, key: &str) -> Result<bool, MemoryError> {
        self.lifecycle.ensure_ready()?;
        let mut users = self.users.write();
        Ok(users
            .get_mut(user_id)
            .and_then(|facts| facts.remove(key))
            .is_some())
    }

    async fn clear_profile(&self, user_id: &str) -> Result<usize, MemoryError> {
        self.lifecycle.ensure_ready()?;
        let removed = self
            .users
            .write()
            .remove(user_id)
            .map_or(0, |facts| facts.len());
        debug!("profile cleared (user_id={}, removed={})", user_id, removed);
        Ok(removed)
    }
}

const PROFILE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS profile_facts (
    user_id TEXT NOT NULL,
    key TEXT NOT NULL,
    value TEXT NOT NULL,
    confidence REAL NOT NULL,
    source TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (user_id, key)
);
"#;

struct FactRow {
    key: String,
    value: String,
    confidence: f64,
    source: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl FactRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            key: row.get(0)?,
            value: row.get(1)?,
            confidence: row.get(2)?,
            source: row.get(3)?,
            created_at: row.get(4)?,
            updated_at: row.get(5)?,
        })
    }

    fn into_fact(self) -> Result<ProfileFact, MemoryError> {
        Ok(ProfileFact {
            key: self.key,
            value: serde_json::from_str(&self.value)?,
            confidence: self.confidence as f32,
            source: self.source,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// Profile facts persisted in SQLite, one row per `(user_id, key)`.
///
/// Statements run on the blocking thread pool.
#[derive(Debug)]
pub struct SqliteProfileMemory {
    lifecycle: Lifecycle,
    path: Option<PathBuf>,
    conn: Arc<Mutex<Option<Connection>>>,
}

impl SqliteProfileMemory {
    /// Build from backend parameters; a missing `path` keeps the database in memory.
    pub fn from_config(config: &ProviderConfig) -> Result<Self, MemoryError> {
        Ok(Self::new(config.param_path("path")?))
    }

    pub fn new(path: Option<PathBuf>) -> Self {
        Self {
            lifecycle: Lifecycle::new(MemoryDomain::Profile),
            path,
            conn: Arc::new(Mutex::new(None)),
        }
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, MemoryError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, MemoryError> + Send + 'static,
    {
        self.lifecycle.ensure_ready()?;
        let conn = self.conn.clone();
        spawn_blocking(move || {
            let guard = conn.lock();
            let conn = guard
                .as_ref()
                .ok_or_else(|| MemoryError::not_ready(MemoryDomain::Profile.as_str(), "closed"))?;
            f(conn)
        })
        .await?
    }

    fn fetch(conn: &Connection, user_id: &str, key: &str) -> Result<Option<ProfileFact>, MemoryError> {
        conn.query_row(
            "SELECT key, value, confidence, source, created_at, updated_at \
             FROM profile_facts WHERE user_id = ?1 AND key = ?2",
            params![user_id, key],
            FactRow::from_row,
        )
        .optional()?
        .map(FactRow::into_fact)
        .transpose()
    }
}

#[async_trait]
impl Provider for SqliteProfileMemory {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn initialize(&self) -> Result<(), MemoryError> {
        if !self.lifecycle.should_initialize()? {
            return Ok(());
        }
        let path = self.path.clone();
        let conn = spawn_blocking(move || -> Result<Connection, MemoryError> {
            let conn = match &path {
                Some(path) => {
                    if let Some(parent) = path.parent() {
                        std::fs::create_dir_all(parent)?;
                    }
                    Connection::open(path)?
                }
                None => Connection::open_in_memory()?,
            };
            conn.execute_batch(PROFILE_SCHEMA)?;
            Ok(conn)
        })
        .await??;
        *self.conn.lock() = Some(conn);
        self.lifecycle.mark_ready();
        info!(
            "initialized profile memory (backend=sqlite, path={})",
            self.path
                .as_ref()
                .map_or_else(|| ":memory:".to_string(), |path| path.display().to_string())
        );
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), MemoryError> {
        if !self.lifecycle.mark_shutdown() {
            return Ok(());
        }
        let conn = self.conn.lock().take();
        if let Some(conn) = conn {
            spawn_blocking(move || conn.close())
                .await?
                .map_err(|(_, err)| MemoryError::Sqlite(err))?;
        }
        info!("profile memory shutdown (backend=sqlite)");
        Ok(())
    }

    async fn health_check(&self) -> HealthStatus {
        let started = Instant::now();
        let probe = self.with_conn(|conn| {
            let facts: i64 =
                conn.query_row("SELECT COUNT(*) FROM profile_facts", [], |row| row.get(0))?;
            Ok(facts)
        })
        .await;
        match probe {
            Ok(facts) => HealthStatus::healthy(started.elapsed(), serde_json::json!({ "facts": facts })),
            Err(err) => HealthStatus::from_error(started, err),
        }
    }
}

#[async_trait]
impl ProfileMemory for SqliteProfileMemory {
    async fn set_fact(
        &self,
        user_id: &str,
        fact: NewProfileFact,
    ) -> Result<ProfileFact, MemoryError> {
        validate_key(&fact.key)?;
        let owner = user_id.to_string();
        let stored = self.with_conn(move |conn| {
            let existing = Self::fetch(conn, &owner, &fact.key)?;
            let stored = merge_fact(existing.as_ref(), fact, Utc::now());
            conn.execute(
                "INSERT INTO profile_facts \
                 (user_id, key, value, confidence, source, created_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7) \
                 ON CONFLICT(user_id, key) DO UPDATE SET \
                 value = excluded.value, confidence = excluded.confidence, \
                 source = excluded.source, updated_at = excluded.updated_at",
                params![
                    owner,
                    stored.key,
                    serde_json::to_string(&stored.value)?,
                    f64::from(stored.confidence),
                    stored.source,
                    stored.created_at,
                    stored.updated_at,
                ],
            )?;
            Ok(stored)
        })
        .await?;
        debug!("profile fact set (user_id={}, key={})", user_id, stored.key);
        Ok(stored)
    }

    async fn get_fact(&self, user_id: &str, key: &str) -> Result<Option<ProfileFact>, MemoryError> {
        let (user_id, key) = (user_id.to_string(), key.to_string());
        self.with_conn(move |conn| Self::fetch(conn, &user_id, &key)).await
    }

    async fn get_profile(&self, user_id: &str) -> Result<Vec<ProfileFact>, MemoryError> {
        let user_id = user_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT key, value, confidence, source, created_at, updated_at \
                 FROM profile_facts WHERE user_id = ?1 ORDER BY key",
            )?;
            let rows = stmt.query_map(params![user_id], FactRow::from_row)?;
            let mut facts = Vec::new();
            for row in rows {
                facts.push(row?.into_fact()?);
            }
            Ok(facts)
        })
        .await
    }

    async fn delete_fact(&self, user_id: &str, key: &str) -> Result<bool, MemoryError> {
        let (user_id, key) = (user_id.to_string(), key.to_string());
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "DELETE FROM profile_facts WHERE user_id = ?1 AND key = ?2",
                params![user_id, key],
            )?;
            Ok(changed > 0)
        })
        .await
    }

    async fn clear_profile(&self, user_id: &str) -> Result<usize, MemoryError> {
        let owner = user_id.to_string();
        let removed = self
            .with_conn(move |conn| {
                Ok(conn.execute(
                    "DELETE FROM profile_facts WHERE user_id = ?1",
                    params![owner],
                )?)
            })
            .await?;
        debug!("profile cleared (user_id={}, removed={})", user_id, removed);
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::{InMemoryProfileMemory, SqliteProfileMemory};
    use crate::health::HealthState;
    use crate::model::NewProfileFact;
    use crate::provider::{ProfileMemory, Provider};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::Arc;

    async fn exercise(provider: &dyn ProfileMemory) {
        let first = provider
            .set_fact("u1", NewProfileFact::new("language", "rust"))
            .await
            .expect("set");
        let second = provider
            .set_fact(
                "u1",
                NewProfileFact {
                    confidence: Some(0.7),
                    ..NewProfileFact::new("language", "zig")
                },
            )
            .await
            .expect("upsert");
        assert_eq!(second.created_at, first.created_at);
        assert!(second.updated_at >= first.updated_at);
        assert_eq!(second.value, json!("zig"));

        provider
            .set_fact("u1", NewProfileFact::new("city", json!({ "name": "Oslo" })))
            .await
            .expect("set");
        let keys: Vec<_> = provider
            .get_profile("u1")
            .await
            .expect("profile")
            .into_iter()
            .map(|fact| fact.key)
            .collect();
        assert_eq!(keys, vec!["city", "language"]);
        assert!(provider.get_fact("u2", "city").await.expect("get").is_none());

        assert!(provider.delete_fact("u1", "city").await.expect("delete"));
        assert!(!provider.delete_fact("u1", "city").await.expect("delete"));
        assert_eq!(provider.clear_profile("u1").await.expect("clear"), 1);
        assert!(provider.get_profile("u1").await.expect("profile").is_empty());
        assert!(provider
            .set_fact("u1", NewProfileFact::new(" ", 1))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn in_memory_profile_upserts_by_key() {
        let provider = InMemoryProfileMemory::new();
        provider.initialize().await.expect("init");
        exercise(&provider).await;
    }

    #[tokio::test]
    async fn sqlite_profile_upserts_by_key() {
        let dir = tempfile::tempdir().expect("tempdir");
        let provider = SqliteProfileMemory::new(Some(dir.path().join("profile.db")));
        provider.initialize().await.expect("init");
        exercise(&provider).await;
        assert_eq!(provider.health_check().await.status, HealthState::Healthy);
        provider.shutdown().await.expect("shutdown");
        assert_eq!(provider.health_check().await.status, HealthState::Unhealthy);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn sqlite_profile_serves_concurrent_writers() {
        let dir = tempfile::tempdir().expect("tempdir");
        let provider = Arc::new(SqliteProfileMemory::new(Some(dir.path().join("profile.db"))));
        provider.initialize().await.expect("init");
        let writers: Vec<_> = (0..8)
            .map(|index| {
                let provider = provider.clone();
                tokio::spawn(async move {
                    provider
                        .set_fact("u1", NewProfileFact::new(format!("key{index}"), index))
                        .await
                })
            })
            .collect();
        for writer in writers {
            writer.await.expect("join").expect("set");
        }
        assert_eq!(provider.get_profile("u1").await.expect("profile").len(), 8);
        provider.shutdown().await.expect("shutdown");
    }
}
