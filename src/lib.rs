//! embedpool
//!
//! Pooled, CPU-parallel sentence embeddings for vector search clients.
//!
//! ```no_run
//! use embedpool::{Config, EmbeddingPool};
//!
//! # fn main() -> embedpool::Result<()> {
//! let pool = EmbeddingPool::from_config(&Config::default())?;
//! let vectors = pool.generate(&["The cat sat on the mat"])?;
//! assert_eq!(vectors[0].len(), 384);
//! # Ok(())
//! # }
//! ```

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod embeddings;
pub mod error;
pub mod metrics;
pub mod observability;

pub use config::Config;
pub use embeddings::{EmbeddingFunction, EmbeddingPool, PoolConfig, EMBEDDING_DIM};
pub use error::{ArtifactError, EmbeddingError, Error, Result};
