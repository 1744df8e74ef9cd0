use async_trait::async_trait;
use mnemo_rs_memory::{Embedder, HashEmbedder, MemoryError};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Embedder that fails for text containing a marker once armed.
///
/// Unarmed, or for other text, it delegates to [`HashEmbedder`].
#[derive(Debug)]
pub struct FailingEmbedder {
    marker: String,
    inner: HashEmbedder,
    armed: AtomicBool,
    calls: AtomicUsize,
}

impl FailingEmbedder {
    pub fn new(marker: impl Into<String>, dimension: usize) -> Self {
        Self {
            marker: marker.into(),
            inner: HashEmbedder::new(dimension).unwrap_or_default(),
            armed: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn arm(&self) {
        self.armed.store(true, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Embedder for FailingEmbedder {
    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, MemoryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.armed.load(Ordering::SeqCst) && text.contains(&self.marker) {
            return Err(MemoryError::Embedding(format!(
                "refusing to embed text containing {:?}",
                self.marker
            )));
        }
        self.inner.embed(text).await
    }
}
