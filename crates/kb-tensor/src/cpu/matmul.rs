// GEMM kernels over widened f32 operands.
//
// Both kernels accumulate in f32 and return C as a flat row-major
// `[batch.., M, N]` vector; the backend narrows it into the destination.

use crate::params::GemmParams;
use crate::shape::broadcast_index;

/// Read-only view of one (possibly batched) GEMM problem.
struct GemmView<'a> {
    p: &'a GemmParams,
    a: &'a [f32],
    b: &'a [f32],
    d: Option<&'a [f32]>,
}

impl<'a> GemmView<'a> {
    /// Offsets of the A, B, and D matrices for batch element `batch`.
    fn offsets(&self, batch: usize) -> (usize, usize, usize) {
        let p = self.p;
        let a = batch * p.m * p.k;
        let b = broadcast_index(&p.batch_dims_c, &p.batch_dims_b, batch) * p.k * p.n;
        let d_len = if p.d_trans { p.m } else { p.n };
        let d = p
            .batch_dims_d
            .as_ref()
            .map(|dims| broadcast_index(&p.batch_dims_c, dims, batch) * d_len)
            .unwrap_or(0);
        (a, b, d)
    }

    #[inline]
    fn a(&self, base: usize, i: usize, k: usize) -> f32 {
        if self.p.a_trans {
            self.a[base + k * self.p.m + i]
        } else {
            self.a[base + i * self.p.k + k]
        }
    }

    #[inline]
    fn b(&self, base: usize, k: usize, j: usize) -> f32 {
        if self.p.b_trans {
            self.b[base + j * self.p.k + k]
        } else {
            self.b[base + k * self.p.n + j]
        }
    }

    #[inline]
    fn bias(&self, base: usize, i: usize, j: usize) -> f32 {
        match self.d {
            Some(d) if self.p.d_trans => d[base + i],
            Some(d) => d[base + j],
            None => 0.0,
        }
    }
}

/// Triple loop, one dot product per output element.
pub fn gemm_reference(p: &GemmParams, a: &[f32], b: &[f32], d: Option<&[f32]>) -> Vec<f32> {
    let view = GemmView { p, a, b, d };
    let (m, n, k) = (p.m, p.n, p.k);
    let mut c = vec![0.0f32; p.batch_count() * m * n];
    for (batch, out) in c.chunks_exact_mut(m * n).enumerate() {
        let (a_base, b_base, d_base) = view.offsets(batch);
        for i in 0..m {
            for j in 0..n {
                let mut sum = 0.0f32;
                for kk in 0..k {
                    sum += view.a(a_base, i, kk) * view.b(b_base, kk, j);
                }
                out[i * n + j] = sum + view.bias(d_base, i, j);
            }
        }
    }
    c
}

/// Block sizes for [`gemm_tiled`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GemmBlocks {
    pub m: usize,
    pub n: usize,
    pub k: usize,
}

/// Blocked GEMM: each `blocks.m × blocks.n` output tile is accumulated in a
/// local buffer while walking K in steps of `blocks.k`.
pub fn gemm_tiled(
    p: &GemmParams,
    a: &[f32],
    b: &[f32],
    d: Option<&[f32]>,
    blocks: GemmBlocks,
) -> Vec<f32> {
    let view = GemmView { p, a, b, d };
    let (m, n, k) = (p.m, p.n, p.k);
    let (bm, bn, bk) = (blocks.m.max(1), blocks.n.max(1), blocks.k.max(1));
    let mut c = vec![0.0f32; p.batch_count() * m * n];
    let mut acc = vec![0.0f32; bm * bn];
    let mut a_panel = vec![0.0f32; bm * bk];
    let mut b_panel = vec![0.0f32; bk * bn];

    for (batch, out) in c.chunks_exact_mut(m * n).enumerate() {
        let (a_base, b_base, d_base) = view.offsets(batch);
        for i0 in (0..m).step_by(bm) {
            let tm = bm.min(m - i0);
            for j0 in (0..n).step_by(bn) {
                let tn = bn.min(n - j0);
                acc[..tm * bn].fill(0.0);
                for k0 in (0..k).step_by(bk) {
                    let tk = bk.min(k - k0);
                    for i in 0..tm {
                        for kk in 0..tk {
                            a_panel[i * bk + kk] = view.a(a_base, i0 + i, k0 + kk);
                        }
                    }
                    for kk in 0..tk {
                        for j in 0..tn {
                            b_panel[kk * bn + j] = view.b(b_base, k0 + kk, j0 + j);
                        }
                    }
                    for i in 0..tm {
                        for kk in 0..tk {
                            let av = a_panel[i * bk + kk];
                            let row = &mut acc[i * bn..i * bn + tn];
                            let col = &b_panel[kk * bn..kk * bn + tn];
                            for (dst, &bv) in row.iter_mut().zip(col) {
                                *dst += av * bv;
                            }
                        }
                    }
                }
                for i in 0..tm {
                    for j in 0..tn {
                        out[(i0 + i) * n + j0 + j] =
                            acc[i * bn + j] + view.bias(d_base, i0 + i, j0 + j);
                    }
                }
            }
        }
    }
    c
}
