//! Text embedding boundary.

use crate::error::MemoryError;
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Default embedding width, matching common sentence-embedding models.
pub const DEFAULT_DIMENSION: usize = 384;

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Converts text to a unit-normalized vector.
///
/// This is the only place a real embedding model plugs in; everything else in
/// the vector engine works on the returned vectors.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Width of produced vectors.
    fn dimension(&self) -> usize;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, MemoryError>;
}

/// Deterministic placeholder embedder.
///
/// The text's FNV-1a hash seeds a pseudo-random generator, so equal text always
/// yields the same vector while unrelated text lands near-orthogonal. It carries
/// no semantic signal.
#[derive(Debug, Clone, Copy)]
pub struct HashEmbedder {
    dimension: usize,
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self {
            dimension: DEFAULT_DIMENSION,
        }
    }
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Result<Self, MemoryError> {
        if dimension == 0 {
            return Err(MemoryError::InvalidConfig(
                "embedding dimension must be positive".to_string(),
            ));
        }
        Ok(Self { dimension })
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, MemoryError> {
        let mut rng = StdRng::seed_from_u64(fnv1a(text.as_bytes()));
        let vector: Vec<f32> = (0..self.dimension)
            .map(|_| rng.random_range(-1.0f32..=1.0))
            .collect();
        normalize(vector)
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(FNV_OFFSET_BASIS, |hash, byte| {
        (hash ^ u64::from(*byte)).wrapping_mul(FNV_PRIME)
    })
}

/// Scale a vector to unit length.
pub fn normalize(mut vector: Vec<f32>) -> Result<Vec<f32>, MemoryError> {
    let norm = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
    if norm == 0.0 || !norm.is_finite() {
        return Err(MemoryError::Embedding(
            "cannot normalize a zero or non-finite vector".to_string(),
        ));
    }
    vector.iter_mut().for_each(|value| *value /= norm);
    Ok(vector)
}

#[cfg(test)]
mod tests {
    use super::{Embedder, HashEmbedder, fnv1a, normalize};
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn hash_embedding_is_deterministic_and_unit_length() {
        let embedder = HashEmbedder::default();
        let first = embedder.embed("remember the milk").await.expect("embed");
        let second = embedder.embed("remember the milk").await.expect("embed");
        assert_eq!(first, second);
        assert_eq!(first.len(), 384);
        let norm: f32 = first.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
        assert!(first.iter().all(|v| (-1.0..=1.0).contains(v)));
    }

    #[tokio::test]
    async fn different_text_gives_different_vectors() {
        let embedder = HashEmbedder::new(16).expect("embedder");
        let a = embedder.embed("alpha").await.expect("embed");
        let b = embedder.embed("beta").await.expect("embed");
        assert_ne!(a, b);
    }

    #[test]
    fn fnv_matches_reference_values() {
        assert_eq!(fnv1a(b""), 0xcbf2_9ce4_8422_2325);
        assert_eq!(fnv1a(b"a"), 0xaf63_dc4c_8601_ec8c);
    }

    #[test]
    fn zero_vector_cannot_be_normalized() {
        assert!(normalize(vec![0.0, 0.0]).is_err());
        assert!(HashEmbedder::new(0).is_err());
    }
}
