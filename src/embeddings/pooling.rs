//! Attention-masked mean pooling and L2 normalization.

use ndarray::{Array2, ArrayView2, ArrayView3, Axis};

use crate::error::EmbeddingError;
use crate::Result;

/// Floor for the per-row token count, so all-pad rows pool to zero.
pub const MIN_TOKEN_COUNT: f32 = 1e-9;

/// Floor for the row norm, so zero rows normalize to zero instead of NaN.
pub const MIN_NORM: f32 = 1e-12;

/// Average token vectors over attended positions.
///
/// `hidden` is `(rows, seq_len, hidden_dim)`, `mask` is `(rows, seq_len)`.
///
/// # Errors
///
/// Returns an error if the mask cannot be broadcast onto `hidden`.
#[allow(clippy::cast_precision_loss)]
pub fn mean_pool(hidden: ArrayView3<'_, f32>, mask: ArrayView2<'_, i64>) -> Result<Array2<f32>> {
    let mask = mask.mapv(|m| m as f32).insert_axis(Axis(2));
    let expanded = mask.broadcast(hidden.raw_dim()).ok_or_else(|| {
        EmbeddingError::Inference(format!(
            "attention mask {:?} does not match model output {:?}",
            mask.shape(),
            hidden.shape()
        ))
    })?;

    let summed = (&hidden * &expanded).sum_axis(Axis(1));
    let counts = expanded
        .sum_axis(Axis(1))
        .mapv(|c| c.max(MIN_TOKEN_COUNT));

    Ok(summed / counts)
}

/// Scale every row to unit Euclidean length.
#[must_use]
pub fn l2_normalize(mut rows: Array2<f32>) -> Array2<f32> {
    for mut row in rows.rows_mut() {
        let norm = row.dot(&row).sqrt().max(MIN_NORM);
        row /= norm;
    }
    rows
}

/// Pool, normalize, and split into one plain vector per row.
///
/// # Errors
///
/// Returns an error if the mask cannot be broadcast onto `hidden`.
pub fn pool_and_normalize(
    hidden: ArrayView3<'_, f32>,
    mask: ArrayView2<'_, i64>,
) -> Result<Vec<Vec<f32>>> {
    let pooled = l2_normalize(mean_pool(hidden, mask)?);
    Ok(pooled.rows().into_iter().map(|row| row.to_vec()).collect())
}
