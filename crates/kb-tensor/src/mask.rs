//! Attention mask synthesis.
//!
//! A mask is an additive bias on the attention scores: `0` keeps a score,
//! the element kind's most negative finite value removes it.

use rand::Rng;

use crate::element::Element;
use crate::error::{Result, TensorError};

/// Structure of a synthesized attention mask.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AttentionMask {
    /// Causal mask: row `i` sees columns `0..=i`. Requires `R == C`.
    UpperTriangular,
    /// Columns split into blocks of `block_size`; for every band of
    /// `block_size` rows each block is open with probability `sparsity`.
    BlockSparse { block_size: usize, sparsity: f32 },
}

impl AttentionMask {
    pub fn validate(&self, rows: usize, columns: usize) -> Result<()> {
        match *self {
            AttentionMask::UpperTriangular if rows != columns => Err(TensorError::InvalidMask(
                format!("upper-triangular mask must be square, got {}x{}", rows, columns),
            )),
            AttentionMask::BlockSparse { block_size: 0, .. } => Err(TensorError::InvalidMask(
                "block size must be positive".to_string(),
            )),
            AttentionMask::BlockSparse { sparsity, .. } if !(0.0..=1.0).contains(&sparsity) => {
                Err(TensorError::InvalidMask(format!(
                    "sparsity must lie in [0, 1], got {}",
                    sparsity
                )))
            }
            _ => Ok(()),
        }
    }
}

/// Fill `data`, laid out as `planes` consecutive `rows × columns` planes.
///
/// Upper-triangular planes are identical. Block-sparse planes are drawn
/// independently, one uniform sample per (band, block) in row-major order.
pub fn fill_mask<T: Element, R: Rng + ?Sized>(
    mask: &AttentionMask,
    data: &mut [T],
    rows: usize,
    columns: usize,
    rng: &mut R,
) {
    let plane = rows * columns;
    assert!(
        plane > 0 && data.len() % plane == 0,
        "mask buffer of {} elements is not a whole number of {}x{} planes",
        data.len(),
        rows,
        columns
    );
    match *mask {
        AttentionMask::UpperTriangular => {
            let (first, rest) = data.split_at_mut(plane);
            for i in 0..rows {
                for j in 0..columns {
                    first[i * columns + j] = if j <= i { T::ZERO } else { T::MOST_NEGATIVE };
                }
            }
            for chunk in rest.chunks_exact_mut(plane) {
                chunk.copy_from_slice(first);
            }
        }
        AttentionMask::BlockSparse {
            block_size,
            sparsity,
        } => {
            let block_size = block_size.max(1);
            for chunk in data.chunks_exact_mut(plane) {
                for band in (0..rows).step_by(block_size) {
                    let band_end = (band + block_size).min(rows);
                    for block in (0..columns).step_by(block_size) {
                        let block_end = (block + block_size).min(columns);
                        let open = rng.gen::<f64>() < f64::from(sparsity);
                        let value = if open { T::ZERO } else { T::MOST_NEGATIVE };
                        for i in band..band_end {
                            chunk[i * columns + block..i * columns + block_end].fill(value);
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bf16::BFloat16;
    use half::f16;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn check_causal<T: Element>(rows: usize, planes: usize) {
        let mut data = vec![T::ZERO; rows * rows * planes];
        let mut rng = StdRng::seed_from_u64(0);
        fill_mask(&AttentionMask::UpperTriangular, &mut data, rows, rows, &mut rng);
        for p in 0..planes {
            for i in 0..rows {
                for j in 0..rows {
                    let v = data[p * rows * rows + i * rows + j];
                    if j <= i {
                        assert_eq!(v, T::ZERO);
                    } else {
                        assert_eq!(v, T::MOST_NEGATIVE);
                    }
                }
            }
        }
    }

    #[test]
    fn test_upper_triangular_every_kind() {
        check_causal::<f32>(7, 3);
        check_causal::<f16>(5, 2);
        check_causal::<BFloat16>(9, 1);
    }

    #[test]
    fn test_block_sparse_extremes() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut data = vec![1.0f32; 2 * 10 * 12];
        let open = AttentionMask::BlockSparse {
            block_size: 4,
            sparsity: 1.0,
        };
        fill_mask(&open, &mut data, 10, 12, &mut rng);
        assert!(data.iter().all(|&v| v == 0.0));

        let closed = AttentionMask::BlockSparse {
            block_size: 4,
            sparsity: 0.0,
        };
        fill_mask(&closed, &mut data, 10, 12, &mut rng);
        assert!(data.iter().all(|&v| v == f32::MIN));
    }

    #[test]
    fn test_block_sparse_blocks_are_uniform() {
        let mut rng = StdRng::seed_from_u64(7);
        let (rows, columns, bs) = (8, 8, 4);
        let mut data = vec![0.0f32; rows * columns];
        let mask = AttentionMask::BlockSparse {
            block_size: bs,
            sparsity: 0.5,
        };
        fill_mask(&mask, &mut data, rows, columns, &mut rng);
        for band in (0..rows).step_by(bs) {
            for block in (0..columns).step_by(bs) {
                let first = data[band * columns + block];
                for i in band..band + bs {
                    for j in block..block + bs {
                        assert_eq!(data[i * columns + j], first);
                    }
                }
            }
        }
    }

    #[test]
    fn test_block_sparse_same_pattern_across_kinds() {
        let mask = AttentionMask::BlockSparse {
            block_size: 3,
            sparsity: 0.4,
        };
        let mut wide = vec![0.0f32; 2 * 7 * 9];
        let mut narrow = vec![BFloat16::ZERO; 2 * 7 * 9];
        fill_mask(&mask, &mut wide, 7, 9, &mut StdRng::seed_from_u64(42));
        fill_mask(&mask, &mut narrow, 7, 9, &mut StdRng::seed_from_u64(42));
        for (w, n) in wide.iter().zip(&narrow) {
            assert_eq!(*w == 0.0, n.is_zero());
        }
    }

    #[test]
    fn test_validate() {
        assert!(AttentionMask::UpperTriangular.validate(4, 4).is_ok());
        assert!(AttentionMask::UpperTriangular.validate(4, 5).is_err());
        let bad = AttentionMask::BlockSparse {
            block_size: 0,
            sparsity: 0.5,
        };
        assert!(bad.validate(4, 4).is_err());
        let bad = AttentionMask::BlockSparse {
            block_size: 2,
            sparsity: 1.5,
        };
        assert!(bad.validate(4, 4).is_err());
    }
}
