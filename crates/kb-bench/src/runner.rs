//! Test cases and the runner that drives them at a chosen depth.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use kb_tensor::{AttentionMask, ComputeBackend, DType, GemmOptions, Shape, Tensor};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::backend_config::{BackendConfig, ExecutionContext};
use crate::config::{
    attention_segments, gemm_segments, validate_contiguous, AttentionBenchOptions,
    GemmBenchOptions, SegmentConfig,
};
use crate::error::{BenchError, Result};
use crate::harness::{
    effective_dtype, run_segments, verify_against_reference, Extraction, RunSettings,
};
use crate::tolerance::{check_agreement, ToleranceParams};
use crate::workload::{AttentionWorkload, GemmWorkload};

/// How much of each case to run. Every level includes the ones below it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TestSpeed {
    /// Fixed-shape agreement checks only.
    Quick,
    /// Adds the slower layout and masking checks.
    Long,
    /// Adds the full throughput sweep.
    VeryLong,
}

/// A group of checks and benchmarks for one operation and element kind.
pub trait BenchCase {
    /// Key under which the sweep results are reported.
    fn type_description(&self) -> String;

    fn run_quick_tests(&self, ctx: &mut ExecutionContext) -> Result<()>;

    fn run_long_tests(&self, _ctx: &mut ExecutionContext) -> Result<()> {
        Ok(())
    }

    fn run_very_long_tests(&self, _ctx: &mut ExecutionContext) -> Result<Vec<Extraction>> {
        Ok(Vec::new())
    }
}

/// Run `cases` up to `speed` and collect each case's sweep results.
///
/// The map only has entries when `speed` is [`TestSpeed::VeryLong`].
pub fn run_cases(
    cases: &[Box<dyn BenchCase>],
    speed: TestSpeed,
    ctx: &mut ExecutionContext,
) -> Result<HashMap<String, Vec<Extraction>>> {
    let mut results = HashMap::new();
    for case in cases {
        let description = case.type_description();
        tracing::info!(case = %description, ?speed, "running case");
        case.run_quick_tests(ctx)?;
        if speed >= TestSpeed::Long {
            case.run_long_tests(ctx)?;
        }
        if speed >= TestSpeed::VeryLong {
            let extractions = case.run_very_long_tests(ctx)?;
            results.insert(description, extractions);
        }
    }
    Ok(results)
}

/// Profile `plan` for square GEMM with every backend configuration.
pub fn run_gemm_with_plan(
    options: &GemmBenchOptions,
    dtype: DType,
    plan: &[SegmentConfig],
    ctx: &mut ExecutionContext,
) -> Result<Vec<Extraction>> {
    validate_contiguous(plan)?;
    let settings = RunSettings {
        dtype,
        granularity: options.granularity,
        trials_extension: options.trials_extension,
        trials: options.trials,
    };
    let workload = GemmWorkload::new(options.clone());
    run_segments(
        &workload,
        plan,
        &settings,
        &BackendConfig::ALL,
        ctx,
        options.seed,
    )
}

/// Square GEMM sweep over the default plan for `dtype`.
pub fn run_gemm_benchmark(
    options: &GemmBenchOptions,
    dtype: DType,
    ctx: &mut ExecutionContext,
) -> Result<Vec<Extraction>> {
    let plan = gemm_segments(
        dtype,
        options.batch_size,
        options.large,
        options.trials_extension,
    );
    run_gemm_with_plan(options, dtype, &plan, ctx)
}

/// Profile `plan` for self-attention with every backend configuration.
pub fn run_attention_with_plan(
    options: &AttentionBenchOptions,
    dtype: DType,
    plan: &[SegmentConfig],
    ctx: &mut ExecutionContext,
) -> Result<Vec<Extraction>> {
    validate_contiguous(plan)?;
    let settings = RunSettings {
        dtype,
        granularity: options.granularity,
        trials_extension: options.trials_extension,
        trials: options.trials,
    };
    let workload = AttentionWorkload::new(options.clone());
    run_segments(
        &workload,
        plan,
        &settings,
        &BackendConfig::ALL,
        ctx,
        options.seed,
    )
}

/// Self-attention sweep over sequence lengths `1..1025`.
pub fn run_attention_benchmark(
    options: &AttentionBenchOptions,
    dtype: DType,
    ctx: &mut ExecutionContext,
) -> Result<Vec<Extraction>> {
    run_attention_with_plan(options, dtype, &attention_segments(), ctx)
}

fn release_all(
    backend: &dyn ComputeBackend,
    tensors: impl IntoIterator<Item = Tensor>,
) -> Result<()> {
    for tensor in tensors {
        tensor.release(backend)?;
    }
    Ok(())
}

/// One GEMM with explicit operand shapes, run on the native backend and the
/// reference backend and compared.
struct GemmCheck {
    a: Shape,
    b: Shape,
    c: Shape,
    d: Option<Shape>,
    options: GemmOptions,
    tolerance: ToleranceParams,
}

impl GemmCheck {
    fn run(&self, ctx: &mut ExecutionContext, dtype: DType, seed: u64) -> Result<f64> {
        let config = BackendConfig::Tiled32x32;
        let (native, reference) = ctx.split_mut();
        let native_dtype = effective_dtype(native, dtype);
        let reference_dtype = effective_dtype(reference, dtype);
        let mut rng = StdRng::seed_from_u64(seed);

        let a = Tensor::random_uniform(self.a.clone(), native_dtype, 0.0..1.0, &mut rng, native)?;
        let b = Tensor::random_uniform(self.b.clone(), native_dtype, 0.0..1.0, &mut rng, native)?;
        let d = match &self.d {
            Some(shape) => Some(Tensor::random_uniform(
                shape.clone(),
                native_dtype,
                0.0..1.0,
                &mut rng,
                native,
            )?),
            None => None,
        };
        let mut c = Tensor::zeros(self.c.clone(), native_dtype, native)?;

        let a_ref = Tensor::converting(&a, reference_dtype, reference)?;
        let b_ref = Tensor::converting(&b, reference_dtype, reference)?;
        let d_ref = match &d {
            Some(d) => Some(Tensor::converting(d, reference_dtype, reference)?),
            None => None,
        };
        let mut c_ref = Tensor::zeros(self.c.clone(), reference_dtype, reference)?;

        native.mark_first_command();
        Tensor::matmul(&a, &b, &mut c, d.as_ref(), &self.options, native)?;
        native.mark_last_command();
        native.synchronize()?;

        reference.mark_first_command();
        Tensor::matmul(&a_ref, &b_ref, &mut c_ref, d_ref.as_ref(), &self.options, reference)?;
        reference.mark_last_command();
        reference.synchronize()?;

        let expected = Tensor::converting(&c_ref, native_dtype, native)?;
        let agreement =
            check_agreement(config.name(), &c, &expected, native_dtype, &self.tolerance);
        release_all(native, [a, b, c, expected].into_iter().chain(d))?;
        release_all(reference, [a_ref, b_ref, c_ref].into_iter().chain(d_ref))?;
        agreement
    }
}

/// GEMM agreement checks and throughput sweep for one element kind.
#[derive(Debug, Clone)]
pub struct GemmPerfCase {
    pub dtype: DType,
    pub options: GemmBenchOptions,
}

impl GemmPerfCase {
    pub fn new(dtype: DType) -> Self {
        GemmPerfCase {
            dtype,
            options: GemmBenchOptions::default(),
        }
    }
}

impl BenchCase for GemmPerfCase {
    fn type_description(&self) -> String {
        format!("GEMM {}", self.dtype)
    }

    /// Batched product with a transposed left operand.
    fn run_quick_tests(&self, ctx: &mut ExecutionContext) -> Result<()> {
        let (m, n, k) = (100, 50, 25);
        let check = GemmCheck {
            a: Shape::new(vec![3, 2, k, m]),
            b: Shape::new(vec![3, 2, k, n]),
            c: Shape::new(vec![3, 2, m, n]),
            d: None,
            options: GemmOptions {
                transpose_a: true,
                ..GemmOptions::default()
            },
            tolerance: ToleranceParams::for_gemm(k, Some(6)),
        };
        let distance = check.run(ctx, self.dtype, self.options.seed)?;
        tracing::debug!(distance, "transposed batched GEMM agrees");
        Ok(())
    }

    /// Fused bias against a transposed output.
    fn run_long_tests(&self, ctx: &mut ExecutionContext) -> Result<()> {
        let (m, n, k) = (48, 25, 23);
        let check = GemmCheck {
            a: Shape::new(vec![k, m]),
            b: Shape::new(vec![k, n]),
            c: Shape::new(vec![m, n]),
            d: Some(Shape::new(vec![m])),
            options: GemmOptions {
                transpose_a: true,
                transpose_d: true,
                fused_bias: true,
                ..GemmOptions::default()
            },
            tolerance: ToleranceParams::for_gemm(k, None),
        };
        let distance = check.run(ctx, self.dtype, self.options.seed.wrapping_add(1))?;
        tracing::debug!(distance, "fused bias GEMM agrees");
        Ok(())
    }

    fn run_very_long_tests(&self, ctx: &mut ExecutionContext) -> Result<Vec<Extraction>> {
        run_gemm_benchmark(&self.options, self.dtype, ctx)
    }
}

/// Attention agreement checks and throughput sweep for one element kind.
#[derive(Debug, Clone)]
pub struct AttentionPerfCase {
    pub dtype: DType,
    pub options: AttentionBenchOptions,
}

impl AttentionPerfCase {
    pub fn new(dtype: DType) -> Self {
        AttentionPerfCase {
            dtype,
            options: AttentionBenchOptions::default(),
        }
    }

    fn check(
        &self,
        ctx: &mut ExecutionContext,
        options: AttentionBenchOptions,
        size: usize,
    ) -> Result<f64> {
        let workload = AttentionWorkload::new(options);
        let mut rng = StdRng::seed_from_u64(self.options.seed);
        verify_against_reference(
            &workload,
            size,
            self.dtype,
            BackendConfig::Tiled32x32,
            ctx,
            &mut rng,
        )
    }
}

impl BenchCase for AttentionPerfCase {
    fn type_description(&self) -> String {
        format!("Attention {}", self.dtype)
    }

    /// Batched causal attention.
    fn run_quick_tests(&self, ctx: &mut ExecutionContext) -> Result<()> {
        let options = AttentionBenchOptions {
            heads: 2,
            head_dim: 16,
            batch_size: Some(2),
            mask: Some(AttentionMask::UpperTriangular),
            ..self.options.clone()
        };
        let distance = self.check(ctx, options, 33)?;
        tracing::debug!(distance, "causal attention agrees");
        Ok(())
    }

    /// Transposed layouts under a block-sparse mask.
    fn run_long_tests(&self, ctx: &mut ExecutionContext) -> Result<()> {
        let options = AttentionBenchOptions {
            heads: 3,
            head_dim: 24,
            q_trans: true,
            k_trans: false,
            v_trans: true,
            o_trans: true,
            mask: Some(AttentionMask::BlockSparse {
                block_size: 8,
                sparsity: 0.5,
            }),
            ..self.options.clone()
        };
        let distance = self.check(ctx, options, 64)?;
        tracing::debug!(distance, "block-sparse attention agrees");
        Ok(())
    }

    fn run_very_long_tests(&self, ctx: &mut ExecutionContext) -> Result<Vec<Extraction>> {
        run_attention_benchmark(&self.options, self.dtype, ctx)
    }
}

/// The operations a benchmark can be requested for by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Gemm,
    Attention,
}

impl OperationKind {
    pub fn case(&self, dtype: DType) -> Box<dyn BenchCase> {
        match self {
            OperationKind::Gemm => Box::new(GemmPerfCase::new(dtype)),
            OperationKind::Attention => Box::new(AttentionPerfCase::new(dtype)),
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationKind::Gemm => write!(f, "gemm"),
            OperationKind::Attention => write!(f, "attention"),
        }
    }
}

impl FromStr for OperationKind {
    type Err = BenchError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "gemm" => Ok(OperationKind::Gemm),
            "attention" => Ok(OperationKind::Attention),
            _ => Err(BenchError::UnknownOperation(s.to_string())),
        }
    }
}

/// Run every check for `operation` and `dtype`, then the full sweep.
pub fn run_benchmark(
    operation: OperationKind,
    dtype: DType,
    ctx: &mut ExecutionContext,
) -> Result<Vec<Extraction>> {
    run_benchmark_at(operation, dtype, TestSpeed::VeryLong, ctx)
}

/// Like [`run_benchmark`], stopping at `speed`. Only
/// [`TestSpeed::VeryLong`] produces extraction records.
pub fn run_benchmark_at(
    operation: OperationKind,
    dtype: DType,
    speed: TestSpeed,
    ctx: &mut ExecutionContext,
) -> Result<Vec<Extraction>> {
    let case = operation.case(dtype);
    let description = case.type_description();
    let mut results = run_cases(&[case], speed, ctx)?;
    Ok(results.remove(&description).unwrap_or_default())
}
