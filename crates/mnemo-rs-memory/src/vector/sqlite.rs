//! SQLite-backed vector store.
//!
//! Embeddings are stored as little-endian `f32` blobs. Row predicates run in
//! SQL; cosine distance is computed over the filtered rows. Every statement
//! runs on the blocking thread pool.

use super::store::{MemoryFilter, VectorStore, rank_nearest};
use super::UserMemory;
use crate::error::MemoryError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::info;
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, ToSql, params};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::spawn_blocking;
use uuid::Uuid;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS user_memories (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    memory_type TEXT NOT NULL,
    category TEXT,
    content TEXT NOT NULL,
    summary TEXT,
    embedding BLOB,
    importance REAL NOT NULL,
    source_type TEXT,
    source_id TEXT,
    metadata TEXT NOT NULL,
    expires_at TEXT,
    is_active INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_user_memories_user_created
    ON user_memories (user_id, created_at);
"#;

const COLUMNS: &str = "id, user_id, memory_type, category, content, summary, embedding, \
    importance, source_type, source_id, metadata, expires_at, is_active, created_at, updated_at";

/// Raw row as read from SQLite.
struct MemoryRow {
    id: String,
    user_id: String,
    memory_type: String,
    category: Option<String>,
    content: String,
    summary: Option<String>,
    embedding: Option<Vec<u8>>,
    importance: f64,
    source_type: Option<String>,
    source_id: Option<String>,
    metadata: String,
    expires_at: Option<DateTime<Utc>>,
    is_active: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl MemoryRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            user_id: row.get(1)?,
            memory_type: row.get(2)?,
            category: row.get(3)?,
            content: row.get(4)?,
            summary: row.get(5)?,
            embedding: row.get(6)?,
            importance: row.get(7)?,
            source_type: row.get(8)?,
            source_id: row.get(9)?,
            metadata: row.get(10)?,
            expires_at: row.get(11)?,
            is_active: row.get(12)?,
            created_at: row.get(13)?,
            updated_at: row.get(14)?,
        })
    }

    fn into_memory(self) -> Result<UserMemory, MemoryError> {
        let id = Uuid::parse_str(&self.id)
            .map_err(|err| MemoryError::Store(format!("invalid memory id {}: {err}", self.id)))?;
        let embedding = match self.embedding {
            Some(bytes) => decode_embedding(&bytes)?,
            None => Vec::new(),
        };
        Ok(UserMemory {
            id,
            user_id: self.user_id,
            memory_type: self.memory_type,
            category: self.category,
            content: self.content,
            summary: self.summary,
            embedding,
            importance: self.importance as f32,
            source_type: self.source_type,
            source_id: self.source_id,
            metadata: serde_json::from_str(&self.metadata)?,
            expires_at: self.expires_at,
            is_active: self.is_active,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    embedding
        .iter()
        .flat_map(|value| value.to_le_bytes())
        .collect()
}

fn decode_embedding(bytes: &[u8]) -> Result<Vec<f32>, MemoryError> {
    let chunks = bytes.chunks_exact(4);
    if !chunks.remainder().is_empty() {
        return Err(MemoryError::Store(format!(
            "embedding blob length {} is not a multiple of 4",
            bytes.len()
        )));
    }
    Ok(chunks
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

/// Knowledge rows persisted in a SQLite database.
#[derive(Debug)]
pub struct SqliteVectorStore {
    /// Database file; None keeps the database in memory.
    path: Option<PathBuf>,
    conn: Arc<Mutex<Option<Connection>>>,
}

impl SqliteVectorStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            conn: Arc::new(Mutex::new(None)),
        }
    }

    pub fn in_memory() -> Self {
        Self {
            path: None,
            conn: Arc::new(Mutex::new(None)),
        }
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, MemoryError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, MemoryError> + Send + 'static,
    {
        let conn = self.conn.clone();
        spawn_blocking(move || {
            let guard = conn.lock();
            let conn = guard
                .as_ref()
                .ok_or_else(|| MemoryError::not_ready("sqlite vector store", "closed"))?;
            f(conn)
        })
        .await?
    }

    fn fetch(conn: &Connection, user_id: &str, id: Uuid) -> Result<Option<UserMemory>, MemoryError> {
        let sql = format!("SELECT {COLUMNS} FROM user_memories WHERE user_id = ?1 AND id = ?2");
        conn.query_row(&sql, params![user_id, id.to_string()], MemoryRow::from_row)
            .optional()?
            .map(MemoryRow::into_memory)
            .transpose()
    }
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn open(&self) -> Result<(), MemoryError> {
        let slot = self.conn.clone();
        let path = self.path.clone();
        spawn_blocking(move || -> Result<(), MemoryError> {
            let mut guard = slot.lock();
            if guard.is_some() {
                return Ok(());
            }
            let conn = match &path {
                Some(path) => {
                    if let Some(parent) = path.parent() {
                        std::fs::create_dir_all(parent)?;
                    }
                    Connection::open(path)?
                }
                None => Connection::open_in_memory()?,
            };
            conn.execute_batch(SCHEMA)?;
            info!(
                "opened sqlite vector store (path={})",
                path.as_ref()
                    .map_or_else(|| ":memory:".to_string(), |path| path.display().to_string())
            );
            *guard = Some(conn);
            Ok(())
        })
        .await?
    }

    async fn close(&self) -> Result<(), MemoryError> {
        let slot = self.conn.clone();
        spawn_blocking(move || -> Result<(), MemoryError> {
            if let Some(conn) = slot.lock().take() {
                conn.close().map_err(|(_, err)| MemoryError::Sqlite(err))?;
            }
            Ok(())
        })
        .await?
    }

    async fn ping(&self) -> Result<serde_json::Value, MemoryError> {
        self.with_conn(|conn| {
            let rows: i64 =
                conn.query_row("SELECT COUNT(*) FROM user_memories", [], |row| row.get(0))?;
            Ok(serde_json::json!({ "rows": rows }))
        })
        .await
    }

    async fn insert(&self, memory: UserMemory) -> Result<UserMemory, MemoryError> {
        self.with_conn(move |conn| {
            let sql = format!(
                "INSERT INTO user_memories ({COLUMNS}) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)"
            );
            conn.execute(
                &sql,
                params![
                    memory.id.to_string(),
                    memory.user_id,
                    memory.memory_type,
                    memory.category,
                    memory.content,
                    memory.summary,
                    encode_embedding(&memory.embedding),
                    f64::from(memory.importance),
                    memory.source_type,
                    memory.source_id,
                    serde_json::to_string(&memory.metadata)?,
                    memory.expires_at,
                    memory.is_active,
                    memory.created_at,
                    memory.updated_at,
                ],
            )?;
            Self::fetch(conn, &memory.user_id, memory.id)?.ok_or_else(|| {
                MemoryError::Store(format!("insert of memory {} returned no row", memory.id))
            })
        })
        .await
    }

    async fn get(&self, user_id: &str, id: Uuid) -> Result<Option<UserMemory>, MemoryError> {
        let user_id = user_id.to_string();
        self.with_conn(move |conn| Self::fetch(conn, &user_id, id)).await
    }

    async fn update_embedding(
        &self,
        user_id: &str,
        id: Uuid,
        embedding: Vec<f32>,
        now: DateTime<Utc>,
    ) -> Result<bool, MemoryError> {
        let user_id = user_id.to_string();
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "UPDATE user_memories SET embedding = ?1, updated_at = ?2 \
                 WHERE user_id = ?3 AND id = ?4",
                params![encode_embedding(&embedding), now, user_id, id.to_string()],
            )?;
            Ok(changed > 0)
        })
        .await
    }

    async fn update_content(
        &self,
        user_id: &str,
        id: Uuid,
        content: &str,
        embedding: Vec<f32>,
        now: DateTime<Utc>,
    ) -> Result<Option<UserMemory>, MemoryError> {
        let user_id = user_id.to_string();
        let content = content.to_string();
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "UPDATE user_memories SET content = ?1, embedding = ?2, updated_at = ?3 \
                 WHERE user_id = ?4 AND id = ?5",
                params![content, encode_embedding(&embedding), now, user_id, id.to_string()],
            )?;
            if changed == 0 {
                return Ok(None);
            }
            Self::fetch(conn, &user_id, id)
        })
        .await
    }

    async fn set_active(
        &self,
        user_id: &str,
        id: Uuid,
        active: bool,
        now: DateTime<Utc>,
    ) -> Result<bool, MemoryError> {
        let user_id = user_id.to_string();
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "UPDATE user_memories SET is_active = ?1, updated_at = ?2 \
                 WHERE user_id = ?3 AND id = ?4",
                params![active, now, user_id, id.to_string()],
            )?;
            Ok(changed > 0)
        })
        .await
    }

    async fn delete(&self, user_id: &str, id: Uuid) -> Result<bool, MemoryError> {
        let user_id = user_id.to_string();
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "DELETE FROM user_memories WHERE user_id = ?1 AND id = ?2",
                params![user_id, id.to_string()],
            )?;
            Ok(changed > 0)
        })
        .await
    }

    async fn nearest(
        &self,
        user_id: &str,
        query: &[f32],
        filter: &MemoryFilter,
        limit: usize,
    ) -> Result<Vec<(UserMemory, f32)>, MemoryError> {
        let user_id = user_id.to_string();
        let query = query.to_vec();
        let filter = filter.clone();
        self.with_conn(move |conn| {
            let mut sql = format!(
                "SELECT {COLUMNS} FROM user_memories \
                 WHERE user_id = ?1 AND is_active = 1 \
                 AND (expires_at IS NULL OR expires_at > ?2) \
                 AND embedding IS NOT NULL"
            );
            let mut params_vec: Vec<Box<dyn ToSql>> =
                vec![Box::new(user_id), Box::new(filter.now)];
            if let Some(memory_type) = &filter.memory_type {
                params_vec.push(Box::new(memory_type.clone()));
                sql.push_str(&format!(" AND memory_type = ?{}", params_vec.len()));
            }
            if let Some(category) = &filter.category {
                params_vec.push(Box::new(category.clone()));
                sql.push_str(&format!(" AND category = ?{}", params_vec.len()));
            }
            let mut stmt = conn.prepare(&sql)?;
            let params_refs: Vec<&dyn ToSql> = params_vec.iter().map(|p| p.as_ref()).collect();
            let rows = stmt.query_map(params_refs.as_slice(), MemoryRow::from_row)?;
            let mut memories = Vec::new();
            for row in rows {
                memories.push(row?.into_memory()?);
            }
            Ok(rank_nearest(memories, &query, limit))
        })
        .await
    }

    async fn page_by_user(
        &self,
        user_id: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<UserMemory>, MemoryError> {
        let user_id = user_id.to_string();
        self.with_conn(move |conn| {
            let sql = format!(
                "SELECT {COLUMNS} FROM user_memories WHERE user_id = ?1 \
                 ORDER BY created_at, id LIMIT ?2 OFFSET ?3"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(
                params![user_id, limit as i64, offset as i64],
                MemoryRow::from_row,
            )?;
            let mut memories = Vec::new();
            for row in rows {
                memories.push(row?.into_memory()?);
            }
            Ok(memories)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::{SqliteVectorStore, decode_embedding, encode_embedding};
    use crate::vector::{MemoryFilter, NewUserMemory, UserMemory, VectorStore};
    use chrono::{Duration, Utc};
    use pretty_assertions::assert_eq;

    #[test]
    fn embedding_blob_round_trips() {
        let embedding = vec![0.25, -1.0, 3.5];
        assert_eq!(
            decode_embedding(&encode_embedding(&embedding)).expect("decode"),
            embedding
        );
        assert!(decode_embedding(&[0, 1, 2]).is_err());
    }

    #[tokio::test]
    async fn closed_store_reports_not_ready() {
        let store = SqliteVectorStore::in_memory();
        assert!(store.ping().await.is_err());
    }

    #[tokio::test]
    async fn persists_rows_across_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("knowledge.db");
        let memory = UserMemory::from_new(
            NewUserMemory::new("u1", "fact", "likes green tea").with_category("preferences"),
            vec![1.0, 0.0],
            Utc::now(),
        );
        {
            let store = SqliteVectorStore::new(&path);
            store.open().await.expect("open");
            store.insert(memory.clone()).await.expect("insert");
            store.close().await.expect("close");
        }
        let store = SqliteVectorStore::new(&path);
        store.open().await.expect("open");
        let loaded = store.get("u1", memory.id).await.expect("get").expect("row");
        assert_eq!(loaded.content, "likes green tea");
        assert_eq!(loaded.embedding, vec![1.0, 0.0]);
        assert_eq!(loaded.category.as_deref(), Some("preferences"));
        assert!(store.get("u2", memory.id).await.expect("get").is_none());
    }

    #[tokio::test]
    async fn nearest_applies_sql_filters() {
        let store = SqliteVectorStore::in_memory();
        store.open().await.expect("open");
        let now = Utc::now();
        let keep = UserMemory::from_new(
            NewUserMemory::new("u1", "fact", "keep").with_category("a"),
            vec![1.0, 0.0],
            now,
        );
        let other_category = UserMemory::from_new(
            NewUserMemory::new("u1", "fact", "other").with_category("b"),
            vec![1.0, 0.0],
            now,
        );
        let expired = UserMemory::from_new(
            NewUserMemory::new("u1", "fact", "expired")
                .with_category("a")
                .with_expiry(now - Duration::hours(1)),
            vec![1.0, 0.0],
            now,
        );
        for memory in [keep.clone(), other_category, expired] {
            store.insert(memory).await.expect("insert");
        }
        let filter = MemoryFilter {
            category: Some("a".to_string()),
            ..MemoryFilter::new(Utc::now())
        };
        let hits = store
            .nearest("u1", &[1.0, 0.0], &filter, 10)
            .await
            .expect("nearest");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0.id, keep.id);
    }
}
