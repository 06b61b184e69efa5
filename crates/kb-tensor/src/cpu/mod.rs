pub mod attention;
pub mod matmul;

use std::time::Instant;

use crate::backend::{BackendKind, ComputeBackend, Operation};
use crate::dtype::DType;
use crate::error::{Result, TensorError};

/// Wall-clock bracket for a window of eagerly executed dispatches.
#[derive(Debug, Default, Clone)]
pub struct CommandTimer {
    first: Option<Instant>,
    last: Option<Instant>,
}

impl CommandTimer {
    pub fn mark_first(&mut self) {
        self.first = Some(Instant::now());
        self.last = None;
    }

    pub fn mark_last(&mut self) {
        self.last = Some(Instant::now());
    }

    /// Seconds between the two marks, floored at one nanosecond so callers
    /// can divide by it. Consumes the window.
    pub fn elapsed(&mut self) -> Result<f64> {
        match (self.first.take(), self.last.take()) {
            (Some(first), Some(last)) => {
                Ok(last.duration_since(first).as_secs_f64().max(1e-9))
            }
            _ => Err(TensorError::Other(
                "synchronize called without a bracketed command window".to_string(),
            )),
        }
    }
}

/// Pure-Rust reference backend.
///
/// Implements every operation with straightforward loops optimized for
/// correctness rather than peak performance. It is the agreement baseline
/// the harness checks other backends against. Brain-float buffers are not
/// supported.
#[derive(Debug, Clone, Default)]
pub struct CpuBackend {
    timer: CommandTimer,
}

impl CpuBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ComputeBackend for CpuBackend {
    fn name(&self) -> &str {
        "reference"
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Reference
    }

    fn supports(&self, dtype: DType) -> bool {
        dtype != DType::BF16
    }

    fn dispatch(&mut self, op: Operation<'_>) -> Result<()> {
        match op {
            Operation::Gemm { params, operands } => {
                tracing::trace!(m = params.m, n = params.n, k = params.k, "reference gemm");
                let a = operands.a.to_f32_vec();
                let b = operands.b.to_f32_vec();
                let d = operands.d.map(|d| d.to_f32_vec());
                let c = matmul::gemm_reference(params, &a, &b, d.as_deref());
                operands.c.write_f32(&c);
            }
            Operation::Attention { params, operands } => {
                tracing::trace!(
                    r = params.r,
                    c = params.c,
                    h = params.h,
                    d = params.d,
                    "reference attention"
                );
                let q = operands.q.to_f32_vec();
                let k = operands.k.to_f32_vec();
                let v = operands.v.to_f32_vec();
                let mask = operands.mask.map(|m| m.to_f32_vec());
                let o = attention::attention_reference(params, &q, &k, &v, mask.as_deref());
                operands.o.write_f32(&o);
            }
        }
        Ok(())
    }

    fn mark_first_command(&mut self) {
        self.timer.mark_first();
    }

    fn mark_last_command(&mut self) {
        self.timer.mark_last();
    }

    fn synchronize(&mut self) -> Result<f64> {
        self.timer.elapsed()
    }
}
