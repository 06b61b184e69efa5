//! Size- and precision-scaled agreement between two backends' outputs.

use kb_tensor::{DType, Tensor};

use crate::error::{BenchError, Result};

/// Expected statistics of an output tensor, used to scale the tolerance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ToleranceParams {
    /// Roughly twice the expected magnitude of an element: 1 for uniform
    /// random data, `0.5·K` for a product with inner dimension `K`.
    pub average_magnitude: f64,
    /// Expected spread of an element: `√K` for a product.
    pub average_deviation: f64,
    /// Leading batch extent of the compared output. Informational: the
    /// element count passed to [`ToleranceParams::tolerance`] already covers it.
    pub batch_size: Option<usize>,
}

impl ToleranceParams {
    /// Parameters for a matrix product with inner dimension `k`.
    pub fn for_gemm(k: usize, batch_size: Option<usize>) -> Self {
        ToleranceParams {
            average_magnitude: 0.5 * k as f64,
            average_deviation: (k as f64).sqrt(),
            batch_size,
        }
    }

    /// Parameters for attention over `heads` heads. Softmax-weighted sums of
    /// uniform values stay near unit magnitude regardless of sequence length.
    pub fn for_attention(heads: usize) -> Self {
        ToleranceParams {
            average_magnitude: 1.0,
            average_deviation: 0.2,
            batch_size: Some(heads),
        }
    }

    /// Maximum Euclidean distance for `count` elements of kind `dtype`.
    ///
    /// Half-width kinds get a wider per-element allowance than f32.
    pub fn tolerance(&self, dtype: DType, count: usize) -> f64 {
        let per_element = if dtype.is_half_width() {
            f64::max(0.02 * self.average_magnitude, 1e-2 * self.average_deviation)
        } else {
            f64::max(0.002 * self.average_magnitude, 3e-7 * self.average_deviation)
        };
        count as f64 * per_element
    }
}

/// Compare `actual` with `expected` and return the distance if it is within
/// tolerance for `dtype`.
///
/// # Errors
/// `NanDistance` when the distance is NaN, `Divergence` when it is not
/// strictly below the tolerance.
pub fn check_agreement(
    config: &str,
    actual: &Tensor,
    expected: &Tensor,
    dtype: DType,
    params: &ToleranceParams,
) -> Result<f64> {
    let distance = actual.euclidean_distance(expected)?;
    if distance.is_nan() {
        return Err(BenchError::NanDistance {
            config: config.to_string(),
        });
    }
    let tolerance = params.tolerance(dtype, actual.count());
    tracing::debug!(config, distance, tolerance, "agreement check");
    if distance < tolerance {
        Ok(distance)
    } else {
        Err(BenchError::Divergence {
            config: config.to_string(),
            distance,
            tolerance,
        })
    }
}
