//! Batch encoder: texts to rectangular input tensors.

use ndarray::Array2;

use super::tokenizer::{TextTokenizer, TokenEncoding};
use crate::error::EmbeddingError;
use crate::Result;

/// Id written into padding positions.
const PAD_ID: i64 = 0;

/// A token encoding resized to exactly the model sequence length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaddedEncoding {
    ids: Vec<i64>,
    attention_mask: Vec<i64>,
}

impl PaddedEncoding {
    /// Truncate from the end or right-pad with id 0 / mask 0 to `max_len`.
    #[must_use]
    pub fn new(encoding: &TokenEncoding, max_len: usize) -> Self {
        let mut ids: Vec<i64> = encoding
            .ids
            .iter()
            .take(max_len)
            .map(|&id| i64::from(id))
            .collect();
        let mut attention_mask: Vec<i64> = encoding
            .attention_mask
            .iter()
            .take(max_len)
            .map(|&m| i64::from(m))
            .collect();

        ids.resize(max_len, PAD_ID);
        attention_mask.resize(max_len, 0);

        Self {
            ids,
            attention_mask,
        }
    }

    /// Padded token ids.
    #[must_use]
    pub fn ids(&self) -> &[i64] {
        &self.ids
    }

    /// Padded attention mask.
    #[must_use]
    pub fn attention_mask(&self) -> &[i64] {
        &self.attention_mask
    }

    /// Number of attended positions.
    #[must_use]
    pub fn attended(&self) -> usize {
        self.attention_mask.iter().filter(|&&m| m != 0).count()
    }
}

/// Input tensors for one forward pass, each shaped `(rows, seq_len)`.
#[derive(Debug, Clone)]
pub struct EncodedBatch {
    /// Token ids.
    pub input_ids: Array2<i64>,
    /// Attention mask.
    pub attention_mask: Array2<i64>,
    /// Segment ids; always zero for single-segment input.
    pub token_type_ids: Array2<i64>,
}

impl EncodedBatch {
    /// Stack padded encodings into tensors.
    ///
    /// # Errors
    ///
    /// Returns an error if the encodings differ in length.
    pub fn from_padded(rows: &[PaddedEncoding]) -> Result<Self> {
        let seq_len = rows.first().map_or(0, |r| r.ids.len());
        if let Some(bad) = rows.iter().find(|r| r.ids.len() != seq_len) {
            return Err(EmbeddingError::Inference(format!(
                "ragged batch: expected {seq_len} tokens per row, found {}",
                bad.ids.len()
            ))
            .into());
        }

        let shape = (rows.len(), seq_len);
        let ids: Vec<i64> = rows.iter().flat_map(|r| r.ids.iter().copied()).collect();
        let mask: Vec<i64> = rows
            .iter()
            .flat_map(|r| r.attention_mask.iter().copied())
            .collect();

        let input_ids = Array2::from_shape_vec(shape, ids)
            .map_err(|e| EmbeddingError::Inference(format!("failed to build input_ids: {e}")))?;
        let attention_mask = Array2::from_shape_vec(shape, mask).map_err(|e| {
            EmbeddingError::Inference(format!("failed to build attention_mask: {e}"))
        })?;

        Ok(Self {
            input_ids,
            attention_mask,
            token_type_ids: Array2::zeros(shape),
        })
    }

    /// Number of texts in the batch.
    #[must_use]
    pub fn rows(&self) -> usize {
        self.input_ids.nrows()
    }

    /// Tokens per row.
    #[must_use]
    pub fn seq_len(&self) -> usize {
        self.input_ids.ncols()
    }
}

/// Splits texts into fixed-size chunks and encodes each chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchEncoder {
    batch_size: usize,
    max_len: usize,
}

impl BatchEncoder {
    /// Create an encoder. Zero values are raised to 1.
    #[must_use]
    pub fn new(batch_size: usize, max_len: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
            max_len: max_len.max(1),
        }
    }

    /// Texts per batch.
    #[must_use]
    pub const fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Tokens per row.
    #[must_use]
    pub const fn max_len(&self) -> usize {
        self.max_len
    }

    /// Tokenize and pad one chunk of at most `batch_size` texts.
    ///
    /// # Errors
    ///
    /// Returns an error if tokenization fails.
    pub fn encode<T, S>(&self, tokenizer: &T, texts: &[S]) -> Result<EncodedBatch>
    where
        T: TextTokenizer + ?Sized,
        S: AsRef<str>,
    {
        let padded = texts
            .iter()
            .map(|text| {
                tokenizer
                    .encode(text.as_ref())
                    .map(|enc| PaddedEncoding::new(&enc, self.max_len))
            })
            .collect::<Result<Vec<_>>>()?;
        EncodedBatch::from_padded(&padded)
    }

    /// Lazily encode `texts` one chunk at a time, preserving order.
    pub fn batches<'a, T, S>(
        &'a self,
        tokenizer: &'a T,
        texts: &'a [S],
    ) -> impl Iterator<Item = Result<EncodedBatch>> + 'a
    where
        T: TextTokenizer + ?Sized,
        S: AsRef<str>,
    {
        texts
            .chunks(self.batch_size)
            .map(move |chunk| self.encode(tokenizer, chunk))
    }
}
