//! Error types and Result aliases for embedpool.
//!
//! This module defines the error hierarchy used throughout the crate.
//! All public functions return `Result<T, Error>` or `Result<T>`.

use std::time::Duration;

use thiserror::Error;

/// Result type alias using embedpool's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for embedpool operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Embedding generation error.
    #[error("embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    /// Model artifact retrieval error.
    #[error("artifact error: {0}")]
    Artifact(#[from] ArtifactError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Embedding-specific errors.
///
/// Each variant maps to the phase of a `generate` call that failed, so
/// callers can tell a retryable checkout timeout apart from a broken model.
#[derive(Error, Debug)]
pub enum EmbeddingError {
    /// Worker could not load its model or tokenizer.
    #[error("worker initialization failed: {0}")]
    Initialization(String),

    /// Tokenization error.
    #[error("tokenization error: {0}")]
    Tokenization(String),

    /// ONNX runtime or tensor shape error during a forward pass.
    #[error("inference failed: {0}")]
    Inference(String),

    /// No worker slot became idle within the checkout timeout.
    #[error("timed out after {waited:?} waiting for an idle embedding worker")]
    CheckoutTimeout { waited: Duration },

    /// A worker panicked and was replaced.
    #[error("embedding worker {slot} crashed and was replaced")]
    WorkerCrashed { slot: usize },

    /// `generate` was called with no texts.
    #[error("no texts to embed")]
    EmptyInput,
}

/// Model artifact download and cache errors.
#[derive(Error, Debug)]
pub enum ArtifactError {
    /// HTTP download failed.
    #[error("failed to download '{url}': {reason}")]
    Download { url: String, reason: String },

    /// Downloaded archive does not match the pinned digest.
    #[error("checksum mismatch: expected {expected}, got {actual}")]
    Checksum { expected: String, actual: String },

    /// Archive could not be unpacked.
    #[error("failed to extract archive: {0}")]
    Extract(String),

    /// Expected file is absent after extraction.
    #[error("artifact file missing: {0}")]
    Missing(String),
}

impl Error {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Name of the phase that produced this error.
    #[must_use]
    pub const fn phase(&self) -> &'static str {
        match self {
            Self::Config(_) => "configuration",
            Self::Embedding(e) => e.phase(),
            Self::Artifact(_) | Self::Io(_) => "initialization",
            Self::Internal(_) => "internal",
        }
    }

    /// Whether this is a checkout timeout.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Embedding(EmbeddingError::CheckoutTimeout { .. }))
    }
}

impl EmbeddingError {
    /// Name of the phase that produced this error.
    #[must_use]
    pub const fn phase(&self) -> &'static str {
        match self {
            Self::Initialization(_) => "initialization",
            Self::Tokenization(_) | Self::Inference(_) | Self::WorkerCrashed { .. } => "inference",
            Self::CheckoutTimeout { .. } => "timeout",
            Self::EmptyInput => "input",
        }
    }
}
