//! Operand shape algebra for GEMM and attention.
//!
//! Logical dimensions are never stored independently of the tensors: they are
//! derived from the physical shapes plus transpose flags every time an
//! operation is issued. A disagreement between operands is a caller bug and
//! panics with the name of the mismatched dimension.

use crate::dtype::DType;
use crate::shape::Shape;

/// Caller-facing GEMM flags.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GemmOptions {
    pub transpose_a: bool,
    pub transpose_b: bool,
    pub transpose_d: bool,
    pub alpha: f32,
    pub beta: f32,
    pub fused_bias: bool,
}

impl Default for GemmOptions {
    fn default() -> Self {
        Self {
            transpose_a: false,
            transpose_b: false,
            transpose_d: false,
            alpha: 1.0,
            beta: 0.0,
            fused_bias: false,
        }
    }
}

/// Fully derived GEMM description handed to a backend.
///
/// Physical layouts (innermost two dimensions):
/// - A: `[M, K]`, or `[K, M]` when `a_trans`
/// - B: `[K, N]`, or `[N, K]` when `b_trans`
/// - C: `[M, N]`
/// - D (bias): `[N]`, or `[M]` when `d_trans`
#[derive(Debug, Clone, PartialEq)]
pub struct GemmParams {
    pub dtype: DType,
    pub m: usize,
    pub n: usize,
    pub k: usize,
    pub a_trans: bool,
    pub b_trans: bool,
    pub d_trans: bool,
    pub alpha: f32,
    pub beta: f32,
    pub batched: bool,
    pub fused_bias: bool,
    pub batch_dims_a: Vec<usize>,
    pub batch_dims_b: Vec<usize>,
    pub batch_dims_c: Vec<usize>,
    pub batch_dims_d: Option<Vec<usize>>,
}

impl GemmParams {
    /// Derive `M`, `N`, `K` and the batch prefixes from physical shapes.
    ///
    /// # Panics
    /// Panics on any contract violation: rank below 2, `K`/`M`/`N`
    /// disagreement, A and C disagreeing on batching, batch prefixes that do
    /// not broadcast to C's, a bias operand without `fused_bias` (or the
    /// reverse), or `alpha != 1` / `beta != 0`.
    pub fn derive(
        dtype: DType,
        a: &Shape,
        b: &Shape,
        c: &Shape,
        d: Option<&Shape>,
        options: &GemmOptions,
    ) -> Self {
        assert!(
            a.ndim() >= 2 && b.ndim() >= 2 && c.ndim() >= 2,
            "GEMM operands need rank >= 2: A {}, B {}, C {}",
            a,
            b,
            c
        );
        assert!(options.alpha == 1.0, "alpha must be 1, got {}", options.alpha);
        assert!(options.beta == 0.0, "beta must be 0, got {}", options.beta);

        let (m, a_k) = if options.transpose_a {
            (a.dim_from_end(0), a.dim_from_end(1))
        } else {
            (a.dim_from_end(1), a.dim_from_end(0))
        };
        let (b_k, n) = if options.transpose_b {
            (b.dim_from_end(0), b.dim_from_end(1))
        } else {
            (b.dim_from_end(1), b.dim_from_end(0))
        };
        assert!(a_k == b_k, "K does not match: A has K={}, B has K={}", a_k, b_k);
        let k = a_k;
        assert!(
            c.dim_from_end(1) == m,
            "M does not match: A has M={}, C has M={}",
            m,
            c.dim_from_end(1)
        );
        assert!(
            c.dim_from_end(0) == n,
            "N does not match: B has N={}, C has N={}",
            n,
            c.dim_from_end(0)
        );

        let a_batched = a.ndim() > 2;
        let c_batched = c.ndim() > 2;
        assert!(
            a_batched == c_batched,
            "batch does not match: A {} and C {} must both be batched or both unbatched",
            a,
            c
        );
        let batched = a_batched;

        let batch_dims_a = a.batch_dims(2).to_vec();
        let batch_dims_b = b.batch_dims(2).to_vec();
        let batch_dims_c = c.batch_dims(2).to_vec();
        assert!(
            batch_dims_a == batch_dims_c,
            "batch does not match: A batch {:?}, C batch {:?}",
            batch_dims_a,
            batch_dims_c
        );
        assert!(
            Shape::broadcasts_to(&batch_dims_b, &batch_dims_c),
            "batch does not match: B batch {:?} does not broadcast to C batch {:?}",
            batch_dims_b,
            batch_dims_c
        );

        let batch_dims_d = match (options.fused_bias, d) {
            (false, None) => None,
            (false, Some(_)) => panic!("bias operand given without fused_bias"),
            (true, None) => panic!("fused bias requires a D operand"),
            (true, Some(d)) => {
                let expected = if options.transpose_d { m } else { n };
                let name = if options.transpose_d { "M" } else { "N" };
                assert!(
                    d.dim_from_end(0) == expected,
                    "{} does not match: D has {}={}, expected {}",
                    name,
                    name,
                    d.dim_from_end(0),
                    expected
                );
                let dims = d.batch_dims(1).to_vec();
                assert!(
                    Shape::broadcasts_to(&dims, &batch_dims_c),
                    "batch does not match: D batch {:?} does not broadcast to C batch {:?}",
                    dims,
                    batch_dims_c
                );
                Some(dims)
            }
        };

        GemmParams {
            dtype,
            m,
            n,
            k,
            a_trans: options.transpose_a,
            b_trans: options.transpose_b,
            d_trans: options.transpose_d,
            alpha: options.alpha,
            beta: options.beta,
            batched,
            fused_bias: options.fused_bias,
            batch_dims_a,
            batch_dims_b,
            batch_dims_c,
            batch_dims_d,
        }
    }

    /// Physical `(A, B, C, D)` shapes for logical `M`, `N`, `K` under the
    /// given transposes. Inverse of [`GemmParams::derive`].
    pub fn physical_shapes(
        m: usize,
        n: usize,
        k: usize,
        options: &GemmOptions,
    ) -> (Shape, Shape, Shape, Shape) {
        let a = if options.transpose_a { vec![k, m] } else { vec![m, k] };
        let b = if options.transpose_b { vec![n, k] } else { vec![k, n] };
        let d = if options.transpose_d { vec![m] } else { vec![n] };
        (Shape::new(a), Shape::new(b), Shape::new(vec![m, n]), Shape::new(d))
    }

    /// Number of independent matrix products (product of C's batch prefix).
    pub fn batch_count(&self) -> usize {
        self.batch_dims_c.iter().product()
    }
}

/// Caller-facing attention flags. K is transposed by default, matching the
/// usual `[C, H, D]` key layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttentionOptions {
    pub transpose_q: bool,
    pub transpose_k: bool,
    pub transpose_v: bool,
    pub transpose_o: bool,
    pub block_sparse: bool,
}

impl Default for AttentionOptions {
    fn default() -> Self {
        Self {
            transpose_q: false,
            transpose_k: true,
            transpose_v: false,
            transpose_o: false,
            block_sparse: false,
        }
    }
}

/// Fully derived attention description handed to a backend.
///
/// Physical layouts (innermost three dimensions):
/// - Q, O: `[R, H, D]`, or `[H, D, R]` when transposed
/// - V: `[C, H, D]`, or `[H, D, C]` when transposed
/// - K: `[H, D, C]`, or `[C, H, D]` when transposed
/// - mask: `[H or 1, R, C]` behind its own batch prefix
#[derive(Debug, Clone, PartialEq)]
pub struct AttentionParams {
    pub dtype: DType,
    pub r: usize,
    pub c: usize,
    pub h: usize,
    pub d: usize,
    pub q_trans: bool,
    pub k_trans: bool,
    pub v_trans: bool,
    pub o_trans: bool,
    pub batched: bool,
    pub masked: bool,
    pub block_sparse: bool,
    pub batch_dims_q: Vec<usize>,
    pub batch_dims_mask: Option<Vec<usize>>,
    /// Size of the mask's head axis: 1 (shared by all heads) or `h`.
    pub mask_heads: usize,
}

/// `(rows, H, D)` read from a `[rows, H, D]` / `[H, D, rows]` operand.
fn row_major_operand(shape: &Shape, transposed: bool) -> (usize, usize, usize) {
    if transposed {
        (shape.dim_from_end(0), shape.dim_from_end(2), shape.dim_from_end(1))
    } else {
        (shape.dim_from_end(2), shape.dim_from_end(1), shape.dim_from_end(0))
    }
}

impl AttentionParams {
    /// Derive `R`, `C`, `H`, `D` from physical Q/K/V/O shapes.
    ///
    /// When Q has a batch prefix of rank `n`, the mask's batch prefix must
    /// have rank exactly `n - 1`: the mask is shared across the innermost
    /// batch axis and indexed by the outer ones. Unbatched operations take a
    /// mask with no batch prefix.
    ///
    /// # Panics
    /// Panics on any contract violation, naming the mismatched dimension.
    pub fn derive(
        dtype: DType,
        q: &Shape,
        k: &Shape,
        v: &Shape,
        o: &Shape,
        mask: Option<&Shape>,
        options: &AttentionOptions,
    ) -> Self {
        assert!(q.ndim() >= 3, "attention operands need rank >= 3, Q is {}", q);
        assert!(
            q.ndim() == k.ndim() && q.ndim() == v.ndim() && q.ndim() == o.ndim(),
            "attention operands must share a rank: Q {}, K {}, V {}, O {}",
            q,
            k,
            v,
            o
        );
        let batch_dims_q = q.batch_dims(3).to_vec();
        for (name, s) in [("K", k), ("V", v), ("O", o)] {
            assert!(
                s.batch_dims(3) == batch_dims_q.as_slice(),
                "batch does not match: Q batch {:?}, {} batch {:?}",
                batch_dims_q,
                name,
                s.batch_dims(3)
            );
        }

        let (q_r, q_h, q_d) = row_major_operand(q, options.transpose_q);
        let (o_r, o_h, o_d) = row_major_operand(o, options.transpose_o);
        let (v_c, v_h, v_d) = row_major_operand(v, options.transpose_v);
        // K's flag is inverted relative to the others.
        let (k_c, k_h, k_d) = row_major_operand(k, !options.transpose_k);

        assert!(q_r == o_r, "R does not match: Q has R={}, O has R={}", q_r, o_r);
        assert!(k_c == v_c, "C does not match: K has C={}, V has C={}", k_c, v_c);
        assert!(
            q_h == k_h && q_h == v_h && q_h == o_h,
            "H does not match: Q={}, K={}, V={}, O={}",
            q_h,
            k_h,
            v_h,
            o_h
        );
        assert!(
            q_d == k_d && q_d == v_d && q_d == o_d,
            "D does not match: Q={}, K={}, V={}, O={}",
            q_d,
            k_d,
            v_d,
            o_d
        );

        let batched = q.ndim() > 3;
        if options.block_sparse {
            assert!(mask.is_some(), "block sparsity requires a mask");
        }

        let mut mask_heads = 1;
        let batch_dims_mask = mask.map(|mask| {
            assert!(mask.ndim() >= 3, "mask needs rank >= 3, got {}", mask);
            let dims = mask.batch_dims(3).to_vec();
            let expected_rank = if batched { batch_dims_q.len() - 1 } else { 0 };
            assert!(
                dims.len() == expected_rank,
                "mask batch rank does not match: expected {}, mask {} has {}",
                expected_rank,
                mask,
                dims.len()
            );
            assert!(
                Shape::broadcasts_to(&dims, &batch_dims_q[..expected_rank]),
                "batch does not match: mask batch {:?} does not broadcast to {:?}",
                dims,
                &batch_dims_q[..expected_rank]
            );
            assert!(
                mask.dim_from_end(1) == q_r,
                "R does not match: Q has R={}, mask has R={}",
                q_r,
                mask.dim_from_end(1)
            );
            assert!(
                mask.dim_from_end(0) == k_c,
                "C does not match: K has C={}, mask has C={}",
                k_c,
                mask.dim_from_end(0)
            );
            mask_heads = mask.dim_from_end(2);
            assert!(
                mask_heads == 1 || mask_heads == q_h,
                "H does not match: mask head axis is {}, expected 1 or {}",
                mask_heads,
                q_h
            );
            dims
        });

        AttentionParams {
            dtype,
            r: q_r,
            c: k_c,
            h: q_h,
            d: q_d,
            q_trans: options.transpose_q,
            k_trans: options.transpose_k,
            v_trans: options.transpose_v,
            o_trans: options.transpose_o,
            batched,
            masked: mask.is_some(),
            block_sparse: options.block_sparse,
            batch_dims_q,
            batch_dims_mask,
            mask_heads,
        }
    }

    /// Physical `(Q, K, V, O)` shapes for logical `R`, `C`, `H`, `D`.
    /// Inverse of [`AttentionParams::derive`].
    pub fn physical_shapes(
        r: usize,
        c: usize,
        h: usize,
        d: usize,
        options: &AttentionOptions,
    ) -> (Shape, Shape, Shape, Shape) {
        let layout = |rows: usize, transposed: bool| {
            if transposed {
                Shape::new(vec![h, d, rows])
            } else {
                Shape::new(vec![rows, h, d])
            }
        };
        (
            layout(r, options.transpose_q),
            layout(c, !options.transpose_k),
            layout(c, options.transpose_v),
            layout(r, options.transpose_o),
        )
    }

    /// Number of independent attention problems (product of Q's batch prefix).
    pub fn batch_count(&self) -> usize {
        self.batch_dims_q.iter().product()
    }
}
