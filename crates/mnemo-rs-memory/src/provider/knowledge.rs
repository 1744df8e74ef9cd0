//! Knowledge memory backed by the vector search engine.

use super::{AddOutcome, KnowledgeMemory, Lifecycle, Provider, ProviderState, logged};
use crate::error::MemoryError;
use crate::health::HealthStatus;
use crate::vector::{
    DEFAULT_DIMENSION, DEFAULT_DUPLICATE_THRESHOLD, Embedder, HashEmbedder, MemoryMatch,
    NewUserMemory, RebuildReport, SearchOptions, UserMemory, VectorSearchEngine, VectorStore,
};
use async_trait::async_trait;
use chrono::Utc;
use log::{debug, info};
use mnemo_rs_config::{MemoryDomain, ProviderConfig};
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

const DOMAIN: MemoryDomain = MemoryDomain::Knowledge;

/// Knowledge provider over any [`VectorStore`].
#[derive(Debug)]
pub struct VectorKnowledgeMemory {
    lifecycle: Lifecycle,
    engine: VectorSearchEngine,
    dedup_threshold: f32,
}

impl VectorKnowledgeMemory {
    pub fn new(engine: VectorSearchEngine, dedup_threshold: f32) -> Result<Self, MemoryError> {
        if !(0.0..=1.0).contains(&dedup_threshold) {
            return Err(MemoryError::InvalidConfig(format!(
                "knowledge.dedup_threshold must be within [0, 1], got {dedup_threshold}"
            )));
        }
        Ok(Self {
            lifecycle: Lifecycle::new(DOMAIN),
            engine,
            dedup_threshold,
        })
    }

    /// Build from backend parameters (`dedup_threshold`, `dimension`).
    ///
    /// Without an explicit embedder a [`HashEmbedder`] of the configured
    /// dimension is used.
    pub fn from_config(
        config: &ProviderConfig,
        store: Arc<dyn VectorStore>,
        embedder: Option<Arc<dyn Embedder>>,
    ) -> Result<Self, MemoryError> {
        let embedder: Arc<dyn Embedder> = match embedder {
            Some(embedder) => embedder,
            None => {
                let dimension = config
                    .param_u64("dimension")?
                    .map_or(DEFAULT_DIMENSION, |n| n as usize);
                Arc::new(HashEmbedder::new(dimension)?)
            }
        };
        let dedup_threshold = config
            .param_f64("dedup_threshold")?
            .map_or(DEFAULT_DUPLICATE_THRESHOLD, |n| n as f32);
        Self::new(VectorSearchEngine::new(embedder, store), dedup_threshold)
    }

    pub fn engine(&self) -> &VectorSearchEngine {
        &self.engine
    }

    async fn add_deduplicated(&self, memory: NewUserMemory) -> Result<AddOutcome, MemoryError> {
        if memory.content.trim().is_empty() {
            return Err(MemoryError::InvalidInput(
                "knowledge memory content must not be empty".to_string(),
            ));
        }
        let duplicates = self
            .engine
            .find_similar_memories(&memory.content, &memory.user_id, Some(self.dedup_threshold))
            .await?;
        if let Some(existing) = duplicates.into_iter().next() {
            debug!(
                "knowledge duplicate skipped (user_id={}, memory_id={}, similarity={})",
                memory.user_id, existing.memory.id, existing.similarity
            );
            return Ok(AddOutcome::Duplicate(existing));
        }
        let stored = self.engine.store_memory_with_embedding(memory).await?;
        Ok(AddOutcome::Stored(stored))
    }
}

#[async_trait]
impl Provider for VectorKnowledgeMemory {
    fn name(&self) -> &str {
        self.engine.store().name()
    }

    async fn initialize(&self) -> Result<(), MemoryError> {
        if !self.lifecycle.should_initialize()? {
            return Ok(());
        }
        self.engine.store().open().await?;
        self.lifecycle.mark_ready();
        info!(
            "initialized knowledge memory (backend={}, dimension={}, dedup_threshold={})",
            self.name(),
            self.engine.dimension(),
            self.dedup_threshold
        );
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), MemoryError> {
        if !self.lifecycle.mark_shutdown() {
            return Ok(());
        }
        self.engine.store().close().await?;
        info!("knowledge memory shutdown (backend={})", self.name());
        Ok(())
    }

    async fn health_check(&self) -> HealthStatus {
        let started = Instant::now();
        if self.lifecycle.state() != ProviderState::Ready {
            return self.lifecycle.health(started, serde_json::Value::Null);
        }
        match self.engine.store().ping().await {
            Ok(store) => HealthStatus::healthy(
                started.elapsed(),
                serde_json::json!({
                    "backend": self.name(),
                    "dimension": self.engine.dimension(),
                    "store": store,
                }),
            ),
            Err(err) => HealthStatus::from_error(started, err),
        }
    }
}

#[async_trait]
impl KnowledgeMemory for VectorKnowledgeMemory {
    async fn add_memory(&self, memory: NewUserMemory) -> Result<AddOutcome, MemoryError> {
        self.lifecycle.ensure_ready()?;
        let user_id = memory.user_id.clone();
        let result = self.add_deduplicated(memory).await;
        logged(DOMAIN, "add_memory", &user_id, result)
    }

    async fn search(
        &self,
        user_id: &str,
        query: &str,
        options: SearchOptions,
    ) -> Result<Vec<MemoryMatch>, MemoryError> {
        self.lifecycle.ensure_ready()?;
        let options = SearchOptions {
            user_id: user_id.to_string(),
            ..options
        };
        let result = self.engine.search_memories_by_text(query, &options).await;
        logged(DOMAIN, "search", user_id, result)
    }

    async fn get_memory(&self, user_id: &str, id: Uuid) -> Result<Option<UserMemory>, MemoryError> {
        self.lifecycle.ensure_ready()?;
        self.engine.store().get(user_id, id).await
    }

    async fn update_content(
        &self,
        user_id: &str,
        id: Uuid,
        content: &str,
    ) -> Result<UserMemory, MemoryError> {
        self.lifecycle.ensure_ready()?;
        let result = self.engine.update_memory_content(user_id, id, content).await;
        logged(DOMAIN, "update_content", user_id, result)
    }

    async fn deactivate(&self, user_id: &str, id: Uuid) -> Result<bool, MemoryError> {
        self.lifecycle.ensure_ready()?;
        let changed = self
            .engine
            .store()
            .set_active(user_id, id, false, Utc::now())
            .await?;
        debug!(
            "knowledge memory deactivated (user_id={}, memory_id={}, existed={})",
            user_id, id, changed
        );
        Ok(changed)
    }

    async fn delete_memory(&self, user_id: &str, id: Uuid) -> Result<bool, MemoryError> {
        self.lifecycle.ensure_ready()?;
        self.engine.store().delete(user_id, id).await
    }

    async fn rebuild(&self, user_id: &str, batch_size: usize) -> Result<RebuildReport, MemoryError> {
        self.lifecycle.ensure_ready()?;
        let result = self
            .engine
            .rebuild_user_memory_embeddings(user_id, batch_size)
            .await;
        logged(DOMAIN, "rebuild", user_id, result)
    }
}
