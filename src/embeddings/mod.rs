//! ONNX-based embedding generation.
//!
//! This module provides:
//! - A tokenizer adapter and batch encoder producing rectangular tensors
//! - ONNX Runtime inference via the `ort` crate
//! - Attention-masked mean pooling and L2 normalization
//! - A bounded worker pool with lazy per-slot model loading
//!
//! Texts longer than the configured `max_sequence_length` (256 tokens by
//! default) are truncated without error, matching the reference
//! all-MiniLM-L6-v2 model. Long documents should be chunked by the caller
//! if their tail matters for retrieval.

mod artifact;
mod batch;
mod model;
mod pool;
mod pooling;
mod tokenizer;
mod worker;

#[cfg(test)]
pub(crate) mod testing;

pub use artifact::{
    ModelArtifact, ARCHIVE_SHA256, ARCHIVE_URL, MODEL_FILE, MODEL_NAME, TOKENIZER_FILE,
};
pub use batch::{BatchEncoder, EncodedBatch, PaddedEncoding};
pub use model::{InferenceRunner, OnnxLoader, OnnxRunner};
pub use pool::{EmbeddingPool, PoolConfig, WorkerLease};
pub use pooling::{l2_normalize, mean_pool, pool_and_normalize, MIN_NORM, MIN_TOKEN_COUNT};
pub use tokenizer::{HfTokenizer, TextTokenizer, TokenEncoding};
pub use worker::{Worker, WorkerLoader, WorkerState};

use crate::Result;

/// Embedding dimension for all-MiniLM-L6-v2.
pub const EMBEDDING_DIM: usize = 384;

/// Maximum sequence length for the model.
pub const MAX_SEQ_LENGTH: usize = 256;

/// Texts per inference call.
pub const DEFAULT_BATCH_SIZE: usize = 32;

/// The narrow interface a vector store uses to turn documents into vectors.
pub trait EmbeddingFunction: Send + Sync {
    /// Embed `texts`, returning one vector per text in the same order.
    ///
    /// # Errors
    ///
    /// Returns an error if embedding generation fails.
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Length of every vector returned by [`EmbeddingFunction::embed`].
    fn dimension(&self) -> usize;
}

/// Cosine similarity of two vectors.
///
/// Returns 0.0 when either vector has zero length.
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}
