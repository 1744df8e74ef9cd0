//! Embedding and similarity search over knowledge memories.

use crate::error::MemoryError;
use crate::model::clamp_unit;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

mod embedding;
mod sqlite;
mod store;

pub use embedding::{DEFAULT_DIMENSION, Embedder, HashEmbedder, normalize};
pub use sqlite::SqliteVectorStore;
pub use store::{InMemoryVectorStore, MemoryFilter, VectorStore};

/// Default number of search results.
pub const DEFAULT_SEARCH_LIMIT: usize = 10;
/// Default similarity floor for search.
pub const DEFAULT_MIN_SIMILARITY: f32 = 0.5;
/// Similarity floor used for duplicate detection.
pub const DEFAULT_DUPLICATE_THRESHOLD: f32 = 0.95;
/// Page size for embedding rebuilds.
pub const DEFAULT_REBUILD_BATCH: usize = 100;

/// Knowledge memory row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserMemory {
    pub id: Uuid,
    pub user_id: String,
    #[serde(rename = "type")]
    pub memory_type: String,
    pub category: Option<String>,
    pub content: String,
    pub summary: Option<String>,
    /// Unit-normalized embedding of `content`.
    pub embedding: Vec<f32>,
    pub importance: f32,
    pub source_type: Option<String>,
    pub source_id: Option<String>,
    pub metadata: serde_json::Value,
    pub expires_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserMemory {
    /// Materialize a new row with a fresh id.
    pub fn from_new(memory: NewUserMemory, embedding: Vec<f32>, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: memory.user_id,
            memory_type: memory.memory_type,
            category: memory.category,
            content: memory.content,
            summary: memory.summary,
            embedding,
            importance: clamp_unit(memory.importance),
            source_type: memory.source_type,
            source_id: memory.source_id,
            metadata: memory.metadata,
            expires_at: memory.expires_at,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// Active and not expired at `now`.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.expires_at.is_none_or(|expires_at| expires_at > now)
    }
}

/// Input for storing a knowledge memory.
#[derive(Debug, Clone, PartialEq)]
pub struct NewUserMemory {
    pub user_id: String,
    pub memory_type: String,
    pub category: Option<String>,
    pub content: String,
    pub summary: Option<String>,
    pub importance: f32,
    pub source_type: Option<String>,
    pub source_id: Option<String>,
    pub metadata: serde_json::Value,
    pub expires_at: Option<DateTime<Utc>>,
}

impl NewUserMemory {
    pub fn new(
        user_id: impl Into<String>,
        memory_type: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            memory_type: memory_type.into(),
            category: None,
            content: content.into(),
            summary: None,
            importance: 0.5,
            source_type: None,
            source_id: None,
            metadata: serde_json::Value::Null,
            expires_at: None,
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_importance(mut self, importance: f32) -> Self {
        self.importance = importance;
        self
    }

    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn with_source(mut self, source_type: impl Into<String>, source_id: impl Into<String>) -> Self {
        self.source_type = Some(source_type.into());
        self.source_id = Some(source_id.into());
        self
    }
}

/// Options for similarity search.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchOptions {
    pub user_id: String,
    pub limit: usize,
    pub min_similarity: f32,
    pub memory_type: Option<String>,
    pub category: Option<String>,
}

impl SearchOptions {
    /// Defaults: limit 10, similarity floor 0.5, no type or category filter.
    pub fn for_user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            limit: DEFAULT_SEARCH_LIMIT,
            min_similarity: DEFAULT_MIN_SIMILARITY,
            memory_type: None,
            category: None,
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_min_similarity(mut self, min_similarity: f32) -> Self {
        self.min_similarity = min_similarity;
        self
    }

    pub fn with_type(mut self, memory_type: impl Into<String>) -> Self {
        self.memory_type = Some(memory_type.into());
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }
}

/// A memory with its similarity to the query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemoryMatch {
    pub memory: UserMemory,
    /// `1 - cosine distance`, in [0, 1].
    pub similarity: f32,
}

/// Counters returned by an embedding rebuild.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RebuildReport {
    pub processed: usize,
    pub failed: usize,
}

/// Cosine distance, or None for mismatched or zero vectors.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }
    let (dot, norm_a, norm_b) = a.iter().zip(b).fold((0.0f32, 0.0f32, 0.0f32), |acc, (x, y)| {
        (acc.0 + x * y, acc.1 + x * x, acc.2 + y * y)
    });
    if norm_a == 0.0 || norm_b == 0.0 {
        return None;
    }
    Some(1.0 - dot / (norm_a.sqrt() * norm_b.sqrt()))
}

/// Embeds text and runs similarity queries against a [`VectorStore`].
#[derive(Clone)]
pub struct VectorSearchEngine {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
}

impl std::fmt::Debug for VectorSearchEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorSearchEngine")
            .field("store", &self.store.name())
            .field("dimension", &self.embedder.dimension())
            .finish()
    }
}

impl VectorSearchEngine {
    pub fn new(embedder: Arc<dyn Embedder>, store: Arc<dyn VectorStore>) -> Self {
        Self { embedder, store }
    }

    pub fn store(&self) -> &Arc<dyn VectorStore> {
        &self.store
    }

    pub fn dimension(&self) -> usize {
        self.embedder.dimension()
    }

    pub async fn embed_text(&self, text: &str) -> Result<Vec<f32>, MemoryError> {
        let vector = self.embedder.embed(text).await?;
        if vector.len() != self.embedder.dimension() {
            return Err(MemoryError::Embedding(format!(
                "embedder returned {} values, expected {}",
                vector.len(),
                self.embedder.dimension()
            )));
        }
        normalize(vector)
    }

    /// Nearest live memories for the user with similarity at or above the floor.
    pub async fn search_memories(
        &self,
        query: &[f32],
        options: &SearchOptions,
    ) -> Result<Vec<MemoryMatch>, MemoryError> {
        let filter = MemoryFilter {
            memory_type: options.memory_type.clone(),
            category: options.category.clone(),
            now: Utc::now(),
        };
        let rows = self
            .store
            .nearest(&options.user_id, query, &filter, options.limit)
            .await?;
        let matches: Vec<MemoryMatch> = rows
            .into_iter()
            .map(|(memory, distance)| MemoryMatch {
                memory,
                similarity: clamp_unit(1.0 - distance),
            })
            .filter(|found| found.similarity >= options.min_similarity)
            .collect();
        debug!(
            "vector search (user_id={}, limit={}, min_similarity={}, returned={})",
            options.user_id,
            options.limit,
            options.min_similarity,
            matches.len()
        );
        Ok(matches)
    }

    pub async fn search_memories_by_text(
        &self,
        query: &str,
        options: &SearchOptions,
    ) -> Result<Vec<MemoryMatch>, MemoryError> {
        let vector = self.embed_text(query).await?;
        self.search_memories(&vector, options).await
    }

    /// Embed the content and persist the row.
    pub async fn store_memory_with_embedding(
        &self,
        memory: NewUserMemory,
    ) -> Result<UserMemory, MemoryError> {
        let embedding = self.embed_text(&memory.content).await?;
        let stored = self
            .store
            .insert(UserMemory::from_new(memory, embedding, Utc::now()))
            .await?;
        debug!(
            "stored knowledge memory (user_id={}, memory_id={}, type={})",
            stored.user_id, stored.id, stored.memory_type
        );
        Ok(stored)
    }

    /// Recompute the embedding of an existing row from `content`.
    pub async fn update_memory_embedding(
        &self,
        user_id: &str,
        id: Uuid,
        content: &str,
    ) -> Result<(), MemoryError> {
        let embedding = self.embed_text(content).await?;
        if !self
            .store
            .update_embedding(user_id, id, embedding, Utc::now())
            .await?
        {
            return Err(MemoryError::MemoryNotFound(id));
        }
        Ok(())
    }

    /// Replace content and its embedding together.
    pub async fn update_memory_content(
        &self,
        user_id: &str,
        id: Uuid,
        content: &str,
    ) -> Result<UserMemory, MemoryError> {
        let embedding = self.embed_text(content).await?;
        self.store
            .update_content(user_id, id, content, embedding, Utc::now())
            .await?
            .ok_or(MemoryError::MemoryNotFound(id))
    }

    /// Re-embed every memory for a user, page by page in creation order.
    ///
    /// Row failures are counted and logged; the run continues. A batch size of
    /// zero uses the default page size.
    pub async fn rebuild_user_memory_embeddings(
        &self,
        user_id: &str,
        batch_size: usize,
    ) -> Result<RebuildReport, MemoryError> {
        let batch_size = if batch_size == 0 {
            DEFAULT_REBUILD_BATCH
        } else {
            batch_size
        };
        let mut report = RebuildReport::default();
        let mut offset = 0;
        loop {
            let page = self.store.page_by_user(user_id, offset, batch_size).await?;
            let page_len = page.len();
            for memory in page {
                match self
                    .update_memory_embedding(user_id, memory.id, &memory.content)
                    .await
                {
                    Ok(()) => report.processed += 1,
                    Err(err) => {
                        report.failed += 1;
                        warn!(
                            "embedding rebuild failed (user_id={}, memory_id={}): {}",
                            user_id, memory.id, err
                        );
                    }
                }
            }
            offset += page_len;
            if page_len < batch_size {
                break;
            }
        }
        info!(
            "embedding rebuild complete (user_id={}, processed={}, failed={})",
            user_id, report.processed, report.failed
        );
        Ok(report)
    }

    /// Near-duplicates of `content`; `threshold` defaults to 0.95.
    pub async fn find_similar_memories(
        &self,
        content: &str,
        user_id: &str,
        threshold: Option<f32>,
    ) -> Result<Vec<MemoryMatch>, MemoryError> {
        let options = SearchOptions::for_user(user_id)
            .with_min_similarity(threshold.unwrap_or(DEFAULT_DUPLICATE_THRESHOLD));
        self.search_memories_by_text(content, &options).await
    }
}
