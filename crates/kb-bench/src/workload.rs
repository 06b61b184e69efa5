//! The operations a benchmark sweeps: square GEMM and self-attention.

use kb_tensor::{
    AttentionMask, AttentionOptions, AttentionParams, ComputeBackend, DType, GemmOptions,
    GemmParams, Shape, Tensor,
};
use rand::rngs::StdRng;

use crate::config::{AttentionBenchOptions, GemmBenchOptions};
use crate::error::Result;
use crate::tolerance::ToleranceParams;

/// One benchmarkable operation, parameterized by a single problem size.
pub trait Workload {
    /// The tensors one dispatch reads and writes.
    type Operands;

    /// Progress-line prefix, e.g. `2x64x64x64xf16`.
    fn label(&self, size: usize, dtype: DType) -> String;

    /// Floating-point operations performed by one dispatch.
    fn flops_per_dispatch(&self, size: usize) -> f64;

    fn tolerance(&self, size: usize) -> ToleranceParams;

    /// Random inputs and a zeroed output on `backend`.
    fn generate(
        &self,
        size: usize,
        dtype: DType,
        rng: &mut StdRng,
        backend: &dyn ComputeBackend,
    ) -> Result<Self::Operands>;

    /// Copy the inputs of `source` onto `backend` as `dtype`, with a fresh
    /// zeroed output.
    fn transfer(
        &self,
        source: &Self::Operands,
        dtype: DType,
        backend: &dyn ComputeBackend,
    ) -> Result<Self::Operands>;

    fn dispatch(&self, operands: &mut Self::Operands, backend: &mut dyn ComputeBackend)
        -> Result<()>;

    fn output<'a>(&self, operands: &'a Self::Operands) -> &'a Tensor;

    fn release(&self, operands: Self::Operands, backend: &dyn ComputeBackend) -> Result<()>;
}

fn batch_prefix(batch_size: Option<usize>) -> String {
    batch_size.map(|b| format!("{}x", b)).unwrap_or_default()
}

fn prepend(batch: usize, shape: &Shape) -> Shape {
    let mut dims = Vec::with_capacity(shape.ndim() + 1);
    dims.push(batch);
    dims.extend_from_slice(shape.dims());
    Shape::new(dims)
}

/// Operands of `C = A·B (+ D)`.
#[derive(Debug)]
pub struct GemmOperandSet {
    pub a: Tensor,
    pub b: Tensor,
    pub c: Tensor,
    pub d: Option<Tensor>,
}

/// Square GEMM with `M = N = K = size`.
#[derive(Debug, Clone)]
pub struct GemmWorkload {
    options: GemmBenchOptions,
}

impl GemmWorkload {
    pub fn new(options: GemmBenchOptions) -> Self {
        GemmWorkload { options }
    }

    pub fn gemm_options(&self) -> GemmOptions {
        GemmOptions {
            transpose_a: self.options.a_trans,
            transpose_b: self.options.b_trans,
            transpose_d: self.options.d_trans,
            fused_bias: self.options.use_bias,
            ..GemmOptions::default()
        }
    }

    /// Physical `(A, B, C, D)` shapes at `size`.
    ///
    /// Batched runs give A and C a batch prefix. B gains a broadcast `[1]`
    /// prefix when `size` is a multiple of 3, and D when it is a multiple
    /// of 5, so both broadcast paths are exercised across a sweep.
    pub fn shapes(&self, size: usize) -> (Shape, Shape, Shape, Shape) {
        let (a, b, c, d) = GemmParams::physical_shapes(size, size, size, &self.gemm_options());
        match self.options.batch_size {
            None => (a, b, c, d),
            Some(batch) => {
                let b = if size % 3 == 0 { prepend(1, &b) } else { b };
                let d = if size % 5 == 0 { prepend(1, &d) } else { d };
                (prepend(batch, &a), b, prepend(batch, &c), d)
            }
        }
    }
}

impl Workload for GemmWorkload {
    type Operands = GemmOperandSet;

    fn label(&self, size: usize, dtype: DType) -> String {
        format!(
            "{}{}x{}x{}x{}",
            batch_prefix(self.options.batch_size),
            size,
            size,
            size,
            dtype
        )
    }

    fn flops_per_dispatch(&self, size: usize) -> f64 {
        let n = size as f64;
        2.0 * n * n * n * self.options.batch_size.unwrap_or(1) as f64
    }

    fn tolerance(&self, size: usize) -> ToleranceParams {
        ToleranceParams::for_gemm(size, self.options.batch_size)
    }

    fn generate(
        &self,
        size: usize,
        dtype: DType,
        rng: &mut StdRng,
        backend: &dyn ComputeBackend,
    ) -> Result<GemmOperandSet> {
        let (a, b, c, d) = self.shapes(size);
        let a = Tensor::random_uniform(a, dtype, 0.0..1.0, rng, backend)?;
        let b = Tensor::random_uniform(b, dtype, 0.0..1.0, rng, backend)?;
        let d = if self.options.use_bias {
            Some(Tensor::random_uniform(d, dtype, 0.0..1.0, rng, backend)?)
        } else {
            None
        };
        let c = Tensor::zeros(c, dtype, backend)?;
        Ok(GemmOperandSet { a, b, c, d })
    }

    fn transfer(
        &self,
        source: &GemmOperandSet,
        dtype: DType,
        backend: &dyn ComputeBackend,
    ) -> Result<GemmOperandSet> {
        Ok(GemmOperandSet {
            a: Tensor::converting(&source.a, dtype, backend)?,
            b: Tensor::converting(&source.b, dtype, backend)?,
            c: Tensor::zeros(source.c.shape().clone(), dtype, backend)?,
            d: match &source.d {
                Some(d) => Some(Tensor::converting(d, dtype, backend)?),
                None => None,
            },
        })
    }

    fn dispatch(&self, ops: &mut GemmOperandSet, backend: &mut dyn ComputeBackend) -> Result<()> {
        Tensor::matmul(
            &ops.a,
            &ops.b,
            &mut ops.c,
            ops.d.as_ref(),
            &self.gemm_options(),
            backend,
        )?;
        Ok(())
    }

    fn output<'a>(&self, operands: &'a GemmOperandSet) -> &'a Tensor {
        &operands.c
    }

    fn release(&self, operands: GemmOperandSet, backend: &dyn ComputeBackend) -> Result<()> {
        operands.a.release(backend)?;
        operands.b.release(backend)?;
        operands.c.release(backend)?;
        if let Some(d) = operands.d {
            d.release(backend)?;
        }
        Ok(())
    }
}

/// Operands of `O = softmax(Q·Kᵀ/√D + mask)·V`.
#[derive(Debug)]
pub struct AttentionOperandSet {
    pub q: Tensor,
    pub k: Tensor,
    pub v: Tensor,
    pub o: Tensor,
    pub mask: Option<Tensor>,
}

/// Self-attention with `R = C = size`.
#[derive(Debug, Clone)]
pub struct AttentionWorkload {
    options: AttentionBenchOptions,
}

impl AttentionWorkload {
    pub fn new(options: AttentionBenchOptions) -> Self {
        AttentionWorkload { options }
    }

    pub fn attention_options(&self) -> AttentionOptions {
        AttentionOptions {
            transpose_q: self.options.q_trans,
            transpose_k: self.options.k_trans,
            transpose_v: self.options.v_trans,
            transpose_o: self.options.o_trans,
            block_sparse: matches!(self.options.mask, Some(AttentionMask::BlockSparse { .. })),
        }
    }

    /// Physical `(Q, K, V, O, mask)` shapes at `size`. The mask has no batch
    /// prefix (one fewer than the operands) and a single head plane, so one
    /// mask plane is shared by every batch element.
    pub fn shapes(&self, size: usize) -> (Shape, Shape, Shape, Shape, Shape) {
        let (h, d) = (self.options.heads, self.options.head_dim);
        let (q, k, v, o) =
            AttentionParams::physical_shapes(size, size, h, d, &self.attention_options());
        let mask = Shape::new(vec![1, size, size]);
        match self.options.batch_size {
            None => (q, k, v, o, mask),
            Some(batch) => (
                prepend(batch, &q),
                prepend(batch, &k),
                prepend(batch, &v),
                prepend(batch, &o),
                mask,
            ),
        }
    }
}

impl Workload for AttentionWorkload {
    type Operands = AttentionOperandSet;

    fn label(&self, size: usize, dtype: DType) -> String {
        format!(
            "{}{}x{}x{}x{}x{}",
            batch_prefix(self.options.batch_size),
            size,
            size,
            self.options.heads,
            self.options.head_dim,
            dtype
        )
    }

    fn flops_per_dispatch(&self, size: usize) -> f64 {
        let n = size as f64;
        let batch = self.options.batch_size.unwrap_or(1) as f64;
        4.0 * n * n * self.options.heads as f64 * self.options.head_dim as f64 * batch
    }

    fn tolerance(&self, _size: usize) -> ToleranceParams {
        ToleranceParams::for_attention(self.options.heads)
    }

    fn generate(
        &self,
        size: usize,
        dtype: DType,
        rng: &mut StdRng,
        backend: &dyn ComputeBackend,
    ) -> Result<AttentionOperandSet> {
        let (q, k, v, o, mask_shape) = self.shapes(size);
        let q = Tensor::random_uniform(q, dtype, 0.0..1.0, rng, backend)?;
        let k = Tensor::random_uniform(k, dtype, 0.0..1.0, rng, backend)?;
        let v = Tensor::random_uniform(v, dtype, 0.0..1.0, rng, backend)?;
        let o = Tensor::zeros(o, dtype, backend)?;
        let mask = match &self.options.mask {
            Some(mask) => Some(Tensor::masked(mask_shape, dtype, mask, rng, backend)?),
            None => None,
        };
        Ok(AttentionOperandSet { q, k, v, o, mask })
    }

    fn transfer(
        &self,
        source: &AttentionOperandSet,
        dtype: DType,
        backend: &dyn ComputeBackend,
    ) -> Result<AttentionOperandSet> {
        Ok(AttentionOperandSet {
            q: Tensor::converting(&source.q, dtype, backend)?,
            k: Tensor::converting(&source.k, dtype, backend)?,
            v: Tensor::converting(&source.v, dtype, backend)?,
            o: Tensor::zeros(source.o.shape().clone(), dtype, backend)?,
            mask: match &source.mask {
                Some(mask) => Some(Tensor::converting(mask, dtype, backend)?),
                None => None,
            },
        })
    }

    fn dispatch(
        &self,
        ops: &mut AttentionOperandSet,
        backend: &mut dyn ComputeBackend,
    ) -> Result<()> {
        Tensor::attention(
            &ops.q,
            &ops.k,
            &ops.v,
            &mut ops.o,
            ops.mask.as_ref(),
            &self.attention_options(),
            backend,
        )?;
        Ok(())
    }

    fn output<'a>(&self, operands: &'a AttentionOperandSet) -> &'a Tensor {
        &operands.o
    }

    fn release(&self, operands: AttentionOperandSet, backend: &dyn ComputeBackend) -> Result<()> {
        operands.q.release(backend)?;
        operands.k.release(backend)?;
        operands.v.release(backend)?;
        operands.o.release(backend)?;
        if let Some(mask) = operands.mask {
            mask.release(backend)?;
        }
        Ok(())
    }
}
