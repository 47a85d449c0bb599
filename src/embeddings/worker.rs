//! Embedding worker: one tokenizer plus one model instance.

use std::time::Instant;

use super::batch::BatchEncoder;
use super::model::InferenceRunner;
use super::pooling::pool_and_normalize;
use super::tokenizer::TextTokenizer;
use super::EMBEDDING_DIM;
use crate::error::EmbeddingError;
use crate::metrics::INFERENCE_DURATION;
use crate::{Error, Result};

/// Builds the tokenizer and runner a worker owns.
///
/// Called once per worker on first use, and again after a failed load or a
/// crash.
pub trait WorkerLoader: Send + Sync + 'static {
    /// Tokenizer type.
    type Tokenizer: TextTokenizer;
    /// Model type.
    type Runner: InferenceRunner;

    /// Load a fresh tokenizer (truncating at `max_sequence_length`) and model.
    ///
    /// # Errors
    ///
    /// Returns an error if either cannot be loaded.
    fn load(&self, max_sequence_length: usize) -> Result<(Self::Tokenizer, Self::Runner)>;

    /// Width of the vectors the loaded model produces.
    fn dimension(&self) -> usize {
        EMBEDDING_DIM
    }
}

/// Lifecycle of a worker.
pub enum WorkerState<T, R> {
    /// Nothing loaded yet.
    Uninitialized,
    /// Model and tokenizer loaded.
    Ready {
        /// Tokenizer instance.
        tokenizer: T,
        /// Model instance.
        runner: R,
    },
}

/// One model instance and its tokenizer.
///
/// Not internally synchronized: the pool hands it to one caller at a time.
pub struct Worker<L: WorkerLoader> {
    slot: usize,
    encoder: BatchEncoder,
    dimension: usize,
    state: WorkerState<L::Tokenizer, L::Runner>,
}

impl<L: WorkerLoader> Worker<L> {
    /// Create an uninitialized worker for pool slot `slot`.
    #[must_use]
    pub const fn new(slot: usize, encoder: BatchEncoder, dimension: usize) -> Self {
        Self {
            slot,
            encoder,
            dimension,
            state: WorkerState::Uninitialized,
        }
    }

    /// Pool slot this worker occupies.
    #[must_use]
    pub const fn slot(&self) -> usize {
        self.slot
    }

    /// Whether the model is loaded.
    #[must_use]
    pub const fn is_ready(&self) -> bool {
        matches!(self.state, WorkerState::Ready { .. })
    }

    /// Load the model if not yet loaded.
    ///
    /// On failure the worker stays uninitialized so a later call can retry.
    ///
    /// # Errors
    ///
    /// Returns [`EmbeddingError::Initialization`] if loading fails.
    pub fn initialize(&mut self, loader: &L) -> Result<()> {
        if self.is_ready() {
            return Ok(());
        }

        let started = Instant::now();
        tracing::debug!(slot = self.slot, "Initializing embedding worker");

        match loader.load(self.encoder.max_len()) {
            Ok((tokenizer, runner)) => {
                self.state = WorkerState::Ready { tokenizer, runner };
                tracing::info!(
                    slot = self.slot,
                    elapsed_ms = started.elapsed().as_millis(),
                    "Embedding worker ready"
                );
                Ok(())
            }
            Err(e) => {
                tracing::error!(slot = self.slot, error = %e, "Embedding worker failed to initialize");
                Err(match e {
                    Error::Embedding(EmbeddingError::Initialization(_)) => e,
                    other => EmbeddingError::Initialization(other.to_string()).into(),
                })
            }
        }
    }

    /// Embed `texts`, returning one unit vector per text in input order.
    ///
    /// Texts are processed in sub-batches of the encoder's batch size.
    /// Output is deterministic for a given loaded model.
    ///
    /// # Errors
    ///
    /// Returns an error if the worker is not initialized, or if tokenization
    /// or inference fails.
    pub fn generate<S: AsRef<str>>(&mut self, texts: &[S]) -> Result<Vec<Vec<f32>>> {
        let WorkerState::Ready { tokenizer, runner } = &mut self.state else {
            return Err(EmbeddingError::Initialization(format!(
                "worker {} is not initialized",
                self.slot
            ))
            .into());
        };

        let mut vectors = Vec::with_capacity(texts.len());
        for batch in self.encoder.batches(&*tokenizer, texts) {
            let batch = batch?;

            let started = Instant::now();
            let hidden = runner.run(&batch)?;
            INFERENCE_DURATION.observe(started.elapsed().as_secs_f64());

            let (rows, seq_len, width) = hidden.dim();
            if rows != batch.rows() || seq_len != batch.seq_len() {
                return Err(EmbeddingError::Inference(format!(
                    "model returned ({rows}, {seq_len}, {width}) for a ({}, {}) batch",
                    batch.rows(),
                    batch.seq_len()
                ))
                .into());
            }
            if width != self.dimension {
                return Err(EmbeddingError::Inference(format!(
                    "model hidden size {width} does not match expected {}",
                    self.dimension
                ))
                .into());
            }

            vectors.extend(pool_and_normalize(hidden.view(), batch.attention_mask.view())?);
        }

        tracing::trace!(slot = self.slot, texts = texts.len(), "Generated embeddings");
        Ok(vectors)
    }
}

impl<L: WorkerLoader> std::fmt::Debug for Worker<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("slot", &self.slot)
            .field("ready", &self.is_ready())
            .field("encoder", &self.encoder)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::testing::FakeLoader;

    fn worker() -> Worker<FakeLoader> {
        Worker::new(0, BatchEncoder::new(32, 256), EMBEDDING_DIM)
    }

    fn norm(v: &[f32]) -> f32 {
        v.iter().map(|x| x * x).sum::<f32>().sqrt()
    }

    #[test]
    fn test_new_worker_is_uninitialized() {
        let w = worker();
        assert!(!w.is_ready());
        assert_eq!(w.slot(), 0);
    }

    #[test]
    fn test_generate_before_initialize_fails() {
        let mut w = worker();
        let err = w.generate(&["hello"]).unwrap_err();
        assert_eq!(err.phase(), "initialization");
    }

    #[test]
    fn test_initialize_loads_once() {
        let loader = FakeLoader::new();
        let mut w = worker();
        w.initialize(&loader).unwrap();
        w.initialize(&loader).unwrap();
        assert!(w.is_ready());
        assert_eq!(loader.load_count(), 1);
    }

    #[test]
    fn test_failed_initialize_stays_uninitialized() {
        let loader = FakeLoader::failing(1);
        let mut w = worker();

        let err = w.initialize(&loader).unwrap_err();
        assert!(matches!(
            err,
            Error::Embedding(EmbeddingError::Initialization(_))
        ));
        assert!(!w.is_ready());

        w.initialize(&loader).unwrap();
        assert!(w.is_ready());
        assert_eq!(loader.load_count(), 2);
    }

    #[test]
    fn test_generate_shapes_and_norms() {
        let loader = FakeLoader::new();
        let mut w = worker();
        w.initialize(&loader).unwrap();

        let texts = ["the cat sat on the mat", "quantum physics equations", ""];
        let vectors = w.generate(&texts).unwrap();

        assert_eq!(vectors.len(), 3);
        for v in &vectors {
            assert_eq!(v.len(), EMBEDDING_DIM);
            assert!(v.iter().all(|x| x.is_finite()));
            assert!((norm(v) - 1.0).abs() < 1e-4);
        }
    }

    #[test]
    fn test_generate_is_deterministic() {
        let loader = FakeLoader::new();
        let mut w = worker();
        w.initialize(&loader).unwrap();

        let first = w.generate(&["repeatable text"]).unwrap();
        let second = w.generate(&["repeatable text"]).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_batch_invariance_across_sub_batches() {
        let loader = FakeLoader::new();
        let mut w = worker();
        w.initialize(&loader).unwrap();

        let texts: Vec<String> = (0..40).map(|i| format!("document number {i}")).collect();
        let all = w.generate(&texts).unwrap();
        assert_eq!(all.len(), 40);

        for idx in [0, 31, 32, 39] {
            let alone = w.generate(&texts[idx..=idx]).unwrap();
            for (a, b) in all[idx].iter().zip(&alone[0]) {
                assert!((a - b).abs() < 1e-6, "text {idx} differs in batch");
            }
        }
    }

    #[test]
    fn test_hidden_size_mismatch_is_inference_error() {
        let loader = FakeLoader {
            dim: Some(8),
            ..FakeLoader::new()
        };
        let mut w = worker();
        w.initialize(&loader).unwrap();

        let err = w.generate(&["hello"]).unwrap_err();
        assert_eq!(err.phase(), "inference");
        assert!(err.to_string().contains("hidden size"));
    }
}
