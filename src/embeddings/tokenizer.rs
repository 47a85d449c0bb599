//! Tokenizer adapter.

use std::path::Path;

use tokenizers::{Tokenizer, TruncationParams};

use crate::error::EmbeddingError;
use crate::Result;

/// Token ids and attention mask for one text, before padding.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenEncoding {
    /// Token ids, special tokens included.
    pub ids: Vec<u32>,
    /// 1 for a real token, 0 for padding. Same length as `ids`.
    pub attention_mask: Vec<u32>,
}

impl TokenEncoding {
    /// Encoding where every token is attended to.
    #[must_use]
    pub fn from_ids(ids: Vec<u32>) -> Self {
        let attention_mask = vec![1; ids.len()];
        Self {
            ids,
            attention_mask,
        }
    }

    /// Number of tokens.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Whether the encoding has no tokens.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Anything that can turn text into token ids and an attention mask.
pub trait TextTokenizer: Send {
    /// Tokenize a single text.
    ///
    /// # Errors
    ///
    /// Returns an error if the text cannot be tokenized.
    fn encode(&self, text: &str) -> Result<TokenEncoding>;
}

/// `HuggingFace` `tokenizer.json` tokenizer with truncation enabled.
pub struct HfTokenizer {
    inner: Tokenizer,
    max_length: usize,
}

impl HfTokenizer {
    /// Load a tokenizer from file and truncate at `max_length` tokens.
    ///
    /// Padding is disabled here; [`super::BatchEncoder`] pads every row itself.
    ///
    /// # Errors
    ///
    /// Returns an error if the tokenizer cannot be loaded or configured.
    pub fn from_file(path: impl AsRef<Path>, max_length: usize) -> Result<Self> {
        let path = path.as_ref();
        let mut inner = Tokenizer::from_file(path).map_err(|e| {
            EmbeddingError::Initialization(format!(
                "failed to load tokenizer {}: {e}",
                path.display()
            ))
        })?;

        inner
            .with_truncation(Some(TruncationParams {
                max_length,
                ..Default::default()
            }))
            .map_err(|e| {
                EmbeddingError::Initialization(format!("failed to set truncation: {e}"))
            })?;
        inner.with_padding(None);

        tracing::debug!(path = %path.display(), max_length, "Tokenizer loaded");

        Ok(Self { inner, max_length })
    }

    /// Truncation length.
    #[must_use]
    pub const fn max_length(&self) -> usize {
        self.max_length
    }
}

impl TextTokenizer for HfTokenizer {
    fn encode(&self, text: &str) -> Result<TokenEncoding> {
        let encoding = self
            .inner
            .encode(text, true)
            .map_err(|e| EmbeddingError::Tokenization(format!("failed to tokenize: {e}")))?;

        if !encoding.get_overflowing().is_empty() {
            tracing::trace!(
                max_length = self.max_length,
                chars = text.len(),
                "Text truncated to model sequence length"
            );
        }

        Ok(TokenEncoding {
            ids: encoding.get_ids().to_vec(),
            attention_mask: encoding.get_attention_mask().to_vec(),
        })
    }
}

impl std::fmt::Debug for HfTokenizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HfTokenizer")
            .field("max_length", &self.max_length)
            .field("vocab_size", &self.inner.get_vocab_size(true))
            .finish()
    }
}
