// Attention kernels over widened f32 operands.

use crate::params::AttentionParams;
use crate::shape::broadcast_index;

/// Addressing for one `[rows, H, D]` / `[H, D, rows]` operand plane.
#[derive(Debug, Clone, Copy)]
struct HeadLayout {
    rows: usize,
    heads: usize,
    dim: usize,
    transposed: bool,
}

impl HeadLayout {
    fn len(&self) -> usize {
        self.rows * self.heads * self.dim
    }

    #[inline]
    fn index(&self, row: usize, head: usize, d: usize) -> usize {
        if self.transposed {
            (head * self.dim + d) * self.rows + row
        } else {
            (row * self.heads + head) * self.dim + d
        }
    }
}

/// Read-only view of one (possibly batched) attention problem.
struct AttentionView<'a> {
    p: &'a AttentionParams,
    q: &'a [f32],
    k: &'a [f32],
    v: &'a [f32],
    mask: Option<&'a [f32]>,
    q_layout: HeadLayout,
    k_layout: HeadLayout,
    v_layout: HeadLayout,
    o_layout: HeadLayout,
    scale: f32,
}

impl<'a> AttentionView<'a> {
    fn new(
        p: &'a AttentionParams,
        q: &'a [f32],
        k: &'a [f32],
        v: &'a [f32],
        mask: Option<&'a [f32]>,
    ) -> Self {
        let layout = |rows, transposed| HeadLayout {
            rows,
            heads: p.h,
            dim: p.d,
            transposed,
        };
        AttentionView {
            p,
            q,
            k,
            v,
            mask,
            q_layout: layout(p.r, p.q_trans),
            // K's untransposed layout is the [H, D, C] one.
            k_layout: layout(p.c, !p.k_trans),
            v_layout: layout(p.c, p.v_trans),
            o_layout: layout(p.r, p.o_trans),
            scale: 1.0 / (p.d as f32).sqrt(),
        }
    }

    /// Offset of the mask plane used by batch element `batch` and `head`.
    ///
    /// The mask's batch prefix aligns with every batch axis of Q except the
    /// innermost one, which shares a plane.
    fn mask_base(&self, batch: usize, head: usize) -> usize {
        let p = self.p;
        let plane = p.r * p.c;
        let mask_batch = match &p.batch_dims_mask {
            Some(dims) if !p.batch_dims_q.is_empty() => {
                let inner = p.batch_dims_q[p.batch_dims_q.len() - 1];
                let outer_dims = &p.batch_dims_q[..p.batch_dims_q.len() - 1];
                broadcast_index(outer_dims, dims, batch / inner)
            }
            _ => 0,
        };
        let mask_head = if p.mask_heads == 1 { 0 } else { head };
        (mask_batch * p.mask_heads + mask_head) * plane
    }

    /// Scaled, masked score for query row `r` against key column `c`.
    #[inline]
    fn score(&self, q_base: usize, k_base: usize, mask_base: usize, h: usize, r: usize, c: usize) -> f32 {
        let mut dot = 0.0f32;
        for d in 0..self.p.d {
            dot += self.q[q_base + self.q_layout.index(r, h, d)]
                * self.k[k_base + self.k_layout.index(c, h, d)];
        }
        let bias = self
            .mask
            .map(|m| m[mask_base + r * self.p.c + c])
            .unwrap_or(0.0);
        dot * self.scale + bias
    }
}

/// Materializes each score row, then applies a max-subtracted softmax.
pub fn attention_reference(
    p: &AttentionParams,
    q: &[f32],
    k: &[f32],
    v: &[f32],
    mask: Option<&[f32]>,
) -> Vec<f32> {
    let view = AttentionView::new(p, q, k, v, mask);
    let mut o = vec![0.0f32; p.batch_count() * view.o_layout.len()];
    let mut scores = vec![0.0f32; p.c];
    for (batch, out) in o.chunks_exact_mut(view.o_layout.len()).enumerate() {
        let q_base = batch * view.q_layout.len();
        let kv_base = batch * view.k_layout.len();
        for h in 0..p.h {
            let mask_base = view.mask_base(batch, h);
            for r in 0..p.r {
                for (c, s) in scores.iter_mut().enumerate() {
                    *s = view.score(q_base, kv_base, mask_base, h, r, c);
                }
                let max = scores.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
                let mut denom = 0.0f32;
                for s in scores.iter_mut() {
                    *s = (*s - max).exp();
                    denom += *s;
                }
                for d in 0..p.d {
                    let mut acc = 0.0f32;
                    for (c, &s) in scores.iter().enumerate() {
                        acc += s * view.v[kv_base + view.v_layout.index(c, h, d)];
                    }
                    out[view.o_layout.index(r, h, d)] = acc / denom;
                }
            }
        }
    }
    o
}

/// Streams key/value columns in blocks of `block_c`, keeping a running
/// maximum and denominator per query row so scores are never materialized
/// beyond one block.
pub fn attention_online(
    p: &AttentionParams,
    q: &[f32],
    k: &[f32],
    v: &[f32],
    mask: Option<&[f32]>,
    block_c: usize,
) -> Vec<f32> {
    let view = AttentionView::new(p, q, k, v, mask);
    let block_c = block_c.max(1);
    let mut o = vec![0.0f32; p.batch_count() * view.o_layout.len()];
    let mut block = vec![0.0f32; block_c];
    let mut acc = vec![0.0f32; p.d];
    for (batch, out) in o.chunks_exact_mut(view.o_layout.len()).enumerate() {
        let q_base = batch * view.q_layout.len();
        let kv_base = batch * view.k_layout.len();
        for h in 0..p.h {
            let mask_base = view.mask_base(batch, h);
            for r in 0..p.r {
                let mut running_max = f32::NEG_INFINITY;
                let mut denom = 0.0f32;
                acc.fill(0.0);
                for c0 in (0..p.c).step_by(block_c) {
                    let tc = block_c.min(p.c - c0);
                    let mut block_max = f32::NEG_INFINITY;
                    for (i, s) in block[..tc].iter_mut().enumerate() {
                        *s = view.score(q_base, kv_base, mask_base, h, r, c0 + i);
                        block_max = block_max.max(*s);
                    }
                    let new_max = running_max.max(block_max);
                    let correction = (running_max - new_max).exp();
                    denom *= correction;
                    for a in acc.iter_mut() {
                        *a *= correction;
                    }
                    for (i, &s) in block[..tc].iter().enumerate() {
                        let weight = (s - new_max).exp();
                        denom += weight;
                        for (d, a) in acc.iter_mut().enumerate() {
                            *a += weight * view.v[kv_base + view.v_layout.index(c0 + i, h, d)];
                        }
                    }
                    running_max = new_max;
                }
                for (d, a) in acc.iter().enumerate() {
                    out[view.o_layout.index(r, h, d)] = a / denom;
                }
            }
        }
    }
    o
}
