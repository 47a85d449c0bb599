//! Deterministic stand-ins for the tokenizer and ONNX model.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ndarray::Array3;

use super::batch::EncodedBatch;
use super::model::InferenceRunner;
use super::tokenizer::{TextTokenizer, TokenEncoding};
use super::worker::WorkerLoader;
use crate::error::EmbeddingError;
use crate::Result;

pub const CLS: u32 = 101;
pub const SEP: u32 = 102;
/// Token the fake runner panics on.
pub const CRASH_TOKEN: u32 = 999;
/// Word mapped to [`CRASH_TOKEN`].
pub const CRASH_WORD: &str = "__crash__";

/// Whitespace tokenizer wrapping words in `[CLS]`/`[SEP]`.
pub struct WordTokenizer {
    max_len: usize,
}

impl WordTokenizer {
    pub const fn new(max_len: usize) -> Self {
        Self { max_len }
    }
}

fn word_id(word: &str) -> u32 {
    if word == CRASH_WORD {
        return CRASH_TOKEN;
    }
    let hash = word.bytes().fold(0x811c_9dc5_u32, |h, b| {
        (h ^ u32::from(b)).wrapping_mul(0x0100_0193)
    });
    1000 + hash % 20_000
}

impl TextTokenizer for WordTokenizer {
    fn encode(&self, text: &str) -> Result<TokenEncoding> {
        let budget = self.max_len.saturating_sub(2);
        let mut ids = vec![CLS];
        ids.extend(text.split_whitespace().take(budget).map(word_id));
        ids.push(SEP);
        Ok(TokenEncoding::from_ids(ids))
    }
}

/// Maps each token id to a fixed pseudo-random vector; padding rows get a
/// large constant so masking mistakes show up in the pooled output.
pub struct HashRunner {
    dim: usize,
    delay: Duration,
}

impl HashRunner {
    pub const fn new(dim: usize) -> Self {
        Self {
            dim,
            delay: Duration::ZERO,
        }
    }
}

#[allow(clippy::cast_precision_loss, clippy::cast_sign_loss)]
fn token_value(id: i64, d: usize) -> f32 {
    let mixed = (id as u64)
        .wrapping_mul(2_654_435_761)
        .wrapping_add((d as u64).wrapping_mul(40_503));
    (mixed % 1000) as f32 / 1000.0 - 0.5
}

impl InferenceRunner for HashRunner {
    fn run(&mut self, batch: &EncodedBatch) -> Result<Array3<f32>> {
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        if batch.input_ids.iter().any(|&id| id == i64::from(CRASH_TOKEN)) {
            panic!("runner crashed on poison token");
        }
        let shape = (batch.rows(), batch.seq_len(), self.dim);
        Ok(Array3::from_shape_fn(shape, |(b, s, d)| {
            if batch.attention_mask[[b, s]] == 0 {
                1000.0
            } else {
                token_value(batch.input_ids[[b, s]], d)
            }
        }))
    }
}

/// Loader producing [`WordTokenizer`] + [`HashRunner`] pairs.
#[derive(Clone, Default)]
pub struct FakeLoader {
    /// Number of successful and failed `load` calls.
    pub loads: Arc<AtomicUsize>,
    /// Fail this many loads before succeeding.
    pub failures: usize,
    /// Panic on this many loads before succeeding.
    pub panics: usize,
    /// Sleep inside every forward pass.
    pub delay: Duration,
    /// Hidden width of the runner output.
    pub dim: Option<usize>,
}

impl FakeLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(failures: usize) -> Self {
        Self {
            failures,
            ..Self::default()
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

impl WorkerLoader for FakeLoader {
    type Tokenizer = WordTokenizer;
    type Runner = HashRunner;

    fn load(&self, max_sequence_length: usize) -> Result<(WordTokenizer, HashRunner)> {
        let attempt = self.loads.fetch_add(1, Ordering::SeqCst);
        if attempt < self.panics {
            panic!("loader crashed building the session (attempt {attempt})");
        }
        if attempt < self.failures {
            return Err(EmbeddingError::Initialization(format!(
                "model artifact unavailable (attempt {attempt})"
            ))
            .into());
        }
        let mut runner = HashRunner::new(self.dim.unwrap_or(super::EMBEDDING_DIM));
        runner.delay = self.delay;
        Ok((WordTokenizer::new(max_sequence_length), runner))
    }
}
