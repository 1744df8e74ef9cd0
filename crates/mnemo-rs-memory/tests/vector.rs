//! Vector search engine tests over both stores.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use mnemo_rs_memory::{
    Embedder, HashEmbedder, InMemoryVectorStore, MemoryError, NewUserMemory, SearchOptions,
    SqliteVectorStore, VectorSearchEngine, VectorStore,
};
use mnemo_rs_test_utils::FailingEmbedder;
use pretty_assertions::assert_eq;
use std::sync::Arc;

async fn engines() -> Vec<VectorSearchEngine> {
    let embedder: Arc<dyn Embedder> = Arc::new(HashEmbedder::new(64).expect("embedder"));
    let stores: Vec<Arc<dyn VectorStore>> = vec![
        Arc::new(InMemoryVectorStore::new()),
        Arc::new(SqliteVectorStore::in_memory()),
    ];
    let mut engines = Vec::new();
    for store in stores {
        store.open().await.expect("open");
        engines.push(VectorSearchEngine::new(embedder.clone(), store));
    }
    engines
}

/// Embedder returning a fixed, unnormalized vector.
struct FixedEmbedder(Vec<f32>);

#[async_trait]
impl Embedder for FixedEmbedder {
    fn dimension(&self) -> usize {
        self.0.len()
    }

    async fn embed(&self, _text: &str) -> Result<Vec<f32>, MemoryError> {
        Ok(self.0.clone())
    }
}

/// Vectors from the embedder are scaled to unit length before storage.
#[tokio::test]
async fn embeddings_are_normalized_before_storage() {
    let store: Arc<dyn VectorStore> = Arc::new(InMemoryVectorStore::new());
    store.open().await.expect("open");
    let engine = VectorSearchEngine::new(Arc::new(FixedEmbedder(vec![3.0, 4.0, 0.0])), store);
    let stored = engine
        .store_memory_with_embedding(NewUserMemory::new("u1", "fact", "anything"))
        .await
        .expect("store");
    let norm = stored.embedding.iter().map(|v| v * v).sum::<f32>().sqrt();
    assert!((norm - 1.0).abs() < 1e-5, "norm {norm}");
    assert!((stored.embedding[0] - 0.6).abs() < 1e-5);
    assert!((stored.embedding[1] - 0.8).abs() < 1e-5);
}

/// A zero vector cannot be normalized and is rejected.
#[tokio::test]
async fn zero_embedding_is_rejected() {
    let store: Arc<dyn VectorStore> = Arc::new(InMemoryVectorStore::new());
    store.open().await.expect("open");
    let engine = VectorSearchEngine::new(Arc::new(FixedEmbedder(vec![0.0, 0.0])), store);
    let err = engine.embed_text("anything").await.expect_err("zero vector");
    assert!(matches!(err, MemoryError::Embedding(_)));
}

/// Stored text should be found again by the same text.
#[tokio::test]
async fn stored_memory_is_found_by_its_text() {
    for engine in engines().await {
        let stored = engine
            .store_memory_with_embedding(NewUserMemory::new("u1", "fact", "likes green tea"))
            .await
            .expect("store");
        engine
            .store_memory_with_embedding(NewUserMemory::new("u1", "fact", "works night shifts"))
            .await
            .expect("store");
        let hits = engine
            .search_memories_by_text("likes green tea", &SearchOptions::for_user("u1"))
            .await
            .expect("search");
        assert_eq!(hits.len(), 1, "store {}", engine.store().name());
        assert_eq!(hits[0].memory.id, stored.id);
        assert!(hits[0].similarity > 0.99);
    }
}

/// Inactive and expired rows must never be returned.
#[tokio::test]
async fn inactive_and_expired_rows_are_excluded() {
    for engine in engines().await {
        let inactive = engine
            .store_memory_with_embedding(NewUserMemory::new("u1", "fact", "old address"))
            .await
            .expect("store");
        engine
            .store()
            .set_active("u1", inactive.id, false, Utc::now())
            .await
            .expect("deactivate");
        engine
            .store_memory_with_embedding(
                NewUserMemory::new("u1", "fact", "temporary code")
                    .with_expiry(Utc::now() - Duration::hours(1)),
            )
            .await
            .expect("store");
        let options = SearchOptions::for_user("u1").with_min_similarity(0.0);
        for query in ["old address", "temporary code"] {
            let hits = engine
                .search_memories_by_text(query, &options)
                .await
                .expect("search");
            assert!(hits.is_empty(), "store {} query {query}", engine.store().name());
        }
    }
}

/// Type and category filters narrow the candidate set.
#[tokio::test]
async fn filters_restrict_matches() {
    for engine in engines().await {
        engine
            .store_memory_with_embedding(
                NewUserMemory::new("u1", "preference", "window seat").with_category("travel"),
            )
            .await
            .expect("store");
        let query = "window seat";
        let by_type = SearchOptions::for_user("u1").with_type("fact");
        assert!(
            engine
                .search_memories_by_text(query, &by_type)
                .await
                .expect("search")
                .is_empty()
        );
        let by_category = SearchOptions::for_user("u1")
            .with_type("preference")
            .with_category("travel");
        assert_eq!(
            engine
                .search_memories_by_text(query, &by_category)
                .await
                .expect("search")
                .len(),
            1
        );
    }
}

/// Updating content should move the row to the new text.
#[tokio::test]
async fn content_update_reembeds() {
    for engine in engines().await {
        let stored = engine
            .store_memory_with_embedding(NewUserMemory::new("u1", "fact", "drives a sedan"))
            .await
            .expect("store");
        let updated = engine
            .update_memory_content("u1", stored.id, "drives a pickup")
            .await
            .expect("update");
        assert_eq!(updated.content, "drives a pickup");
        let similar = engine
            .find_similar_memories("drives a pickup", "u1", None)
            .await
            .expect("similar");
        assert_eq!(similar.len(), 1);
        assert!(
            engine
                .find_similar_memories("drives a sedan", "u1", None)
                .await
                .expect("similar")
                .is_empty()
        );
    }
}

/// Rebuild should count per-row failures and keep going.
#[tokio::test]
async fn rebuild_counts_failures() {
    let embedder = Arc::new(FailingEmbedder::new("poison", 32));
    let store: Arc<dyn VectorStore> = Arc::new(SqliteVectorStore::in_memory());
    store.open().await.expect("open");
    let engine = VectorSearchEngine::new(embedder.clone(), store);
    for content in ["alpha", "poison beta", "gamma", "poison delta", "epsilon"] {
        engine
            .store_memory_with_embedding(NewUserMemory::new("u1", "fact", content))
            .await
            .expect("store");
    }
    engine
        .store_memory_with_embedding(NewUserMemory::new("u2", "fact", "poison other"))
        .await
        .expect("store");

    embedder.arm();
    let report = engine
        .rebuild_user_memory_embeddings("u1", 2)
        .await
        .expect("rebuild");
    assert_eq!(report.processed, 3);
    assert_eq!(report.failed, 2);

    let report = engine
        .rebuild_user_memory_embeddings("u2", 0)
        .await
        .expect("rebuild");
    assert_eq!(report.processed, 0);
    assert_eq!(report.failed, 1);
}
