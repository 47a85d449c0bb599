//! ONNX embedding model management.
//!
//! Handles loading the embedding model and running forward passes.

use std::path::{Path, PathBuf};

use ndarray::Array3;
use ort::session::builder::{GraphOptimizationLevel, SessionBuilder};
use ort::session::Session;
use ort::value::Tensor;

use super::artifact::ModelArtifact;
use super::batch::EncodedBatch;
use super::tokenizer::HfTokenizer;
use super::worker::WorkerLoader;
use crate::error::EmbeddingError;
use crate::Result;

/// Runs one forward pass over an encoded batch.
pub trait InferenceRunner: Send {
    /// Produce token-level output shaped `(rows, seq_len, hidden_dim)`.
    ///
    /// # Errors
    ///
    /// Returns an error if the forward pass fails.
    fn run(&mut self, batch: &EncodedBatch) -> Result<Array3<f32>>;
}

/// ONNX Runtime session for a BERT-style sentence encoder.
pub struct OnnxRunner {
    session: Session,
    model_path: PathBuf,
}

impl OnnxRunner {
    /// Load an ONNX embedding model from the given path.
    ///
    /// Each session runs single-threaded; parallelism comes from the pool.
    ///
    /// # Errors
    ///
    /// Returns an error if the model cannot be loaded.
    pub fn load(model_path: impl AsRef<Path>) -> Result<Self> {
        let model_path = model_path.as_ref().to_path_buf();

        if !model_path.exists() {
            return Err(EmbeddingError::Initialization(format!(
                "model file not found: {}",
                model_path.display()
            ))
            .into());
        }

        tracing::info!(path = %model_path.display(), "Loading ONNX embedding model");

        let session = SessionBuilder::new()
            .map_err(|e| {
                EmbeddingError::Initialization(format!("failed to create session builder: {e}"))
            })?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| {
                EmbeddingError::Initialization(format!("failed to set optimization level: {e}"))
            })?
            .with_intra_threads(1)
            .map_err(|e| EmbeddingError::Initialization(format!("failed to set threads: {e}")))?
            .commit_from_file(&model_path)
            .map_err(|e| EmbeddingError::Initialization(format!("failed to load model: {e}")))?;

        tracing::info!(path = %model_path.display(), "Model loaded successfully");

        Ok(Self {
            session,
            model_path,
        })
    }

    /// Get the model path.
    #[must_use]
    pub fn model_path(&self) -> &Path {
        &self.model_path
    }
}

fn input_tensor(name: &str, values: &ndarray::Array2<i64>) -> Result<Tensor<i64>> {
    let shape = [values.nrows(), values.ncols()];
    let data: Vec<i64> = values.iter().copied().collect();
    Tensor::from_array((shape, data))
        .map_err(|e| EmbeddingError::Inference(format!("failed to create {name}: {e}")).into())
}

impl InferenceRunner for OnnxRunner {
    fn run(&mut self, batch: &EncodedBatch) -> Result<Array3<f32>> {
        let input_ids = input_tensor("input_ids", &batch.input_ids)?;
        let attention_mask = input_tensor("attention_mask", &batch.attention_mask)?;
        let token_type_ids = input_tensor("token_type_ids", &batch.token_type_ids)?;

        let outputs = self
            .session
            .run(ort::inputs![
                "input_ids" => input_ids,
                "attention_mask" => attention_mask,
                "token_type_ids" => token_type_ids
            ])
            .map_err(|e| EmbeddingError::Inference(format!("forward pass failed: {e}")))?;

        // Token embeddings are the first output (`last_hidden_state`).
        let (shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| EmbeddingError::Inference(format!("failed to extract output: {e}")))?;

        let dims = shape
            .iter()
            .map(|&d| usize::try_from(d))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|_| EmbeddingError::Inference(format!("dynamic output shape {shape:?}")))?;

        let &[rows, seq_len, hidden] = dims.as_slice() else {
            return Err(EmbeddingError::Inference(format!(
                "expected (batch, seq_len, hidden) output, got {dims:?}"
            ))
            .into());
        };

        Array3::from_shape_vec((rows, seq_len, hidden), data.to_vec())
            .map_err(|e| EmbeddingError::Inference(format!("malformed output tensor: {e}")).into())
    }
}

impl std::fmt::Debug for OnnxRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnnxRunner")
            .field("model_path", &self.model_path)
            .field("session", &"<Session>")
            .finish()
    }
}

/// Loads the cached all-MiniLM-L6-v2 artifact, downloading it on first use.
#[derive(Debug, Clone)]
pub struct OnnxLoader {
    artifact: ModelArtifact,
}

impl OnnxLoader {
    /// Create a loader for `artifact`.
    #[must_use]
    pub const fn new(artifact: ModelArtifact) -> Self {
        Self { artifact }
    }

    /// The artifact this loader reads.
    #[must_use]
    pub const fn artifact(&self) -> &ModelArtifact {
        &self.artifact
    }
}

impl WorkerLoader for OnnxLoader {
    type Tokenizer = HfTokenizer;
    type Runner = OnnxRunner;

    fn load(&self, max_sequence_length: usize) -> Result<(HfTokenizer, OnnxRunner)> {
        self.artifact.ensure()?;
        let tokenizer = HfTokenizer::from_file(self.artifact.tokenizer_path(), max_sequence_length)?;
        let runner = OnnxRunner::load(self.artifact.model_path())?;
        Ok((tokenizer, runner))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_nonexistent_model() {
        let result = OnnxRunner::load("/nonexistent/model.onnx");
        let err = result.unwrap_err();
        assert!(err.to_string().contains("not found"));
        assert_eq!(err.phase(), "initialization");
    }

    #[test]
    fn test_loader_exposes_artifact() {
        let artifact = ModelArtifact::minilm("/tmp/embedpool-models");
        let loader = OnnxLoader::new(artifact);
        assert!(loader
            .artifact()
            .model_path()
            .ends_with("all-MiniLM-L6-v2/onnx/model.onnx"));
    }

    // Tests that need the real ONNX model live in tests/model_integration.rs
}
