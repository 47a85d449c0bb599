//! Shared fakes for integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use embedpool::embeddings::{
    EncodedBatch, InferenceRunner, TextTokenizer, TokenEncoding, WorkerLoader, EMBEDDING_DIM,
};
use embedpool::{EmbeddingError, PoolConfig, Result};
use ndarray::Array3;

/// Tokenizer mapping each character to its code point, wrapped in
/// `[CLS]`/`[SEP]`.
pub struct CharTokenizer {
    max_len: usize,
}

impl TextTokenizer for CharTokenizer {
    fn encode(&self, text: &str) -> Result<TokenEncoding> {
        let mut ids = vec![101];
        ids.extend(
            text.chars()
                .take(self.max_len.saturating_sub(2))
                .map(|c| 200 + u32::from(c) % 30_000),
        );
        ids.push(102);
        Ok(TokenEncoding::from_ids(ids))
    }
}

/// Runner whose hidden state for a token depends only on its id.
pub struct ToyRunner {
    delay: Duration,
}

impl InferenceRunner for ToyRunner {
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_wrap)]
    fn run(&mut self, batch: &EncodedBatch) -> Result<Array3<f32>> {
        std::thread::sleep(self.delay);
        let shape = (batch.rows(), batch.seq_len(), EMBEDDING_DIM);
        Ok(Array3::from_shape_fn(shape, |(b, s, d)| {
            let id = batch.input_ids[[b, s]];
            ((id * 31 + d as i64 * 7) % 97) as f32 - 48.0
        }))
    }
}

/// Loader counting how many models it has built.
#[derive(Clone, Default)]
pub struct ToyLoader {
    pub loads: Arc<AtomicUsize>,
    pub delay: Duration,
    pub fail: bool,
}

impl ToyLoader {
    pub fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn broken() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

impl WorkerLoader for ToyLoader {
    type Tokenizer = CharTokenizer;
    type Runner = ToyRunner;

    fn load(&self, max_sequence_length: usize) -> Result<(CharTokenizer, ToyRunner)> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(EmbeddingError::Initialization("model.onnx not found".into()).into());
        }
        Ok((
            CharTokenizer {
                max_len: max_sequence_length,
            },
            ToyRunner { delay: self.delay },
        ))
    }
}

/// Pool config with a short checkout timeout.
pub fn pool_config(pool_size: usize) -> PoolConfig {
    PoolConfig {
        pool_size,
        checkout_timeout: Duration::from_secs(10),
        max_sequence_length: 32,
        batch_size: 4,
    }
}

/// Euclidean norm.
pub fn norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}
