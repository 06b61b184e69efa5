//! Segmented throughput measurement with warm-up agreement checks.
//!
//! A segment is profiled in sections of [`SECTION_SIZE`] sizes. For every
//! section each backend configuration is applied, warmed up once at the
//! largest measured size (with a companion run on the reference backend
//! whose output must agree), then timed at every size divisible by the
//! granularity. Throughput is derived from the fastest of several timing
//! brackets.

use std::collections::HashMap;
use std::ops::Range;

use kb_tensor::{BackendKind, ComputeBackend, DType, Tensor};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::backend_config::{BackendConfig, ExecutionContext};
use crate::config::{validate_granularity, SegmentConfig};
use crate::error::{BenchError, Result};
use crate::tolerance::check_agreement;
use crate::workload::Workload;

/// Sizes per progress-reporting section.
pub const SECTION_SIZE: usize = 16;

/// Ceiling on back-to-back dispatches for the reference backend, whose
/// sequential issue rate is poor.
pub const REFERENCE_ITERATION_CAP: usize = 32;

/// Order extractions are reported in: reference first.
pub const EXTRACTION_ORDER: [BackendConfig; 3] = [
    BackendConfig::Reference,
    BackendConfig::Tiled32x32,
    BackendConfig::Tiled48x48,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentState {
    Idle,
    WarmUp,
    Measuring,
    Reported,
}

/// Settings shared by every segment of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSettings {
    pub dtype: DType,
    pub granularity: usize,
    pub trials_extension: usize,
    pub trials: usize,
}

/// Throughput measured at one size.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub size: usize,
    /// Floating-point operations per second.
    pub flops: f64,
}

/// Split `sizes` into reporting sections of [`SECTION_SIZE`]. The last
/// section absorbs a remainder of up to two sizes rather than standing
/// alone.
pub fn sections(sizes: &Range<usize>) -> Vec<Range<usize>> {
    let mut out = Vec::new();
    let mut start = sizes.start;
    while start < sizes.end {
        if start + SECTION_SIZE + 2 >= sizes.end {
            out.push(start..sizes.end);
            break;
        }
        out.push(start..start + SECTION_SIZE);
        start += SECTION_SIZE;
    }
    out
}

/// Element kind a backend runs `dtype` workloads in: `dtype` itself, or
/// f32 when the backend cannot hold it.
pub fn effective_dtype(backend: &dyn ComputeBackend, dtype: DType) -> DType {
    if backend.supports(dtype) {
        dtype
    } else {
        DType::F32
    }
}

/// One segment of a benchmark plan and the samples it produced.
#[derive(Debug)]
pub struct Segment {
    config: SegmentConfig,
    state: SegmentState,
    samples: HashMap<BackendConfig, Vec<Sample>>,
}

impl Segment {
    pub fn new(config: SegmentConfig) -> Self {
        Segment {
            config,
            state: SegmentState::Idle,
            samples: HashMap::new(),
        }
    }

    pub fn state(&self) -> SegmentState {
        self.state
    }

    pub fn config(&self) -> &SegmentConfig {
        &self.config
    }

    /// Samples recorded for `config`, in ascending size order.
    pub fn samples(&self, config: BackendConfig) -> &[Sample] {
        self.samples.get(&config).map(Vec::as_slice).unwrap_or(&[])
    }

    fn transition(&mut self, next: SegmentState) {
        use SegmentState::*;
        let legal = matches!(
            (self.state, next),
            (Idle, WarmUp) | (WarmUp, Measuring) | (Measuring, WarmUp) | (Measuring, Reported)
        );
        assert!(legal, "illegal segment transition {:?} -> {:?}", self.state, next);
        tracing::trace!(from = ?self.state, to = ?next, "segment state");
        self.state = next;
    }

    /// Warm up and measure every configuration over every section.
    ///
    /// # Errors
    /// Propagates allocation and dispatch failures, and aborts with
    /// `Divergence` or `NanDistance` if a warm-up output disagrees with the
    /// reference backend.
    pub fn profile<W: Workload>(
        &mut self,
        workload: &W,
        settings: &RunSettings,
        configs: &[BackendConfig],
        ctx: &mut ExecutionContext,
        rng: &mut StdRng,
    ) -> Result<()> {
        if self.state != SegmentState::Idle {
            return Err(BenchError::InvalidSegment(format!(
                "segment {:?} was already profiled",
                self.config.sizes
            )));
        }
        let granularity = self.config.granularity.unwrap_or(settings.granularity);
        validate_granularity(granularity)?;
        let trials_extension = self
            .config
            .trials_extension
            .unwrap_or(settings.trials_extension);
        if trials_extension == 0 || settings.trials == 0 || self.config.iterations == 0 {
            return Err(BenchError::InvalidSegment(format!(
                "segment {:?} needs positive iterations, trials, and trials extension",
                self.config.sizes
            )));
        }
        tracing::info!(
            sizes = ?self.config.sizes,
            iterations = self.config.iterations,
            granularity,
            "profiling segment"
        );

        for section in sections(&self.config.sizes) {
            let measured: Vec<usize> = section.filter(|s| s % granularity == 0).collect();
            for &config in configs {
                let mut guard = config.apply(ctx, settings.dtype)?;
                self.transition(SegmentState::WarmUp);
                if let Some(&largest) = measured.last() {
                    verify_against_reference(
                        workload,
                        largest,
                        settings.dtype,
                        config,
                        &mut guard,
                        rng,
                    )?;
                }
                self.transition(SegmentState::Measuring);
                let trials = settings.trials * trials_extension;
                for &size in &measured {
                    let flops = self.measure(
                        workload,
                        size,
                        settings.dtype,
                        trials,
                        config,
                        &mut guard,
                        rng,
                    )?;
                    self.samples
                        .entry(config)
                        .or_default()
                        .push(Sample { size, flops });
                }
            }
            self.log_progress(workload, settings.dtype, configs, &measured);
        }
        if self.state == SegmentState::Idle {
            // No configurations were given.
            self.transition(SegmentState::WarmUp);
            self.transition(SegmentState::Measuring);
        }
        self.transition(SegmentState::Reported);
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn measure<W: Workload>(
        &self,
        workload: &W,
        size: usize,
        dtype: DType,
        trials: usize,
        config: BackendConfig,
        ctx: &mut ExecutionContext,
        rng: &mut StdRng,
    ) -> Result<f64> {
        let iterations = match config.backend_kind() {
            BackendKind::Reference => self.config.iterations.min(REFERENCE_ITERATION_CAP),
            BackendKind::Tiled => self.config.iterations,
        };
        let backend = config.backend(ctx);
        let dtype = effective_dtype(backend, dtype);
        let mut operands = workload.generate(size, dtype, rng, backend)?;
        let mut min_time = f64::INFINITY;
        for _ in 0..trials {
            backend.mark_first_command();
            for _ in 0..iterations {
                workload.dispatch(&mut operands, backend)?;
            }
            backend.mark_last_command();
            min_time = min_time.min(backend.synchronize()?);
        }
        workload.release(operands, backend)?;
        Ok(workload.flops_per_dispatch(size) * iterations as f64 / min_time)
    }

    fn log_progress<W: Workload>(
        &self,
        workload: &W,
        dtype: DType,
        configs: &[BackendConfig],
        measured: &[usize],
    ) {
        for &size in measured {
            let mut message = workload.label(size, dtype);
            for config in configs {
                let gflops = self
                    .samples(*config)
                    .iter()
                    .find(|s| s.size == size)
                    .map(|s| s.flops / 1e9)
                    .unwrap_or(0.0);
                message.push_str(&format!(" - {} {}", config.name(), gflops as i64));
            }
            tracing::info!("{}", message);
        }
    }
}

/// Run `workload` once at `size` on `config`'s backend, then check the
/// output against a companion run on the reference backend. Returns the
/// Euclidean distance between the two.
///
/// # Errors
/// `Divergence` or `NanDistance` when the outputs disagree, plus any
/// allocation or dispatch failure.
pub fn verify_against_reference<W: Workload>(
    workload: &W,
    size: usize,
    dtype: DType,
    config: BackendConfig,
    ctx: &mut ExecutionContext,
    rng: &mut StdRng,
) -> Result<f64> {
    let backend = config.backend(ctx);
    let dtype = effective_dtype(backend, dtype);
    let mut operands = workload.generate(size, dtype, rng, backend)?;
    backend.mark_first_command();
    workload.dispatch(&mut operands, backend)?;
    backend.mark_last_command();
    backend.synchronize()?;

    let reference_dtype = effective_dtype(ctx.reference(), dtype);
    let mut companion = workload.transfer(&operands, reference_dtype, ctx.reference())?;
    let reference = ctx.reference_mut();
    reference.mark_first_command();
    workload.dispatch(&mut companion, reference)?;
    reference.mark_last_command();
    reference.synchronize()?;

    let backend = config.backend(ctx);
    let expected = Tensor::converting(workload.output(&companion), dtype, backend)?;
    let agreement = check_agreement(
        config.name(),
        workload.output(&operands),
        &expected,
        dtype,
        &workload.tolerance(size),
    );
    expected.release(backend)?;
    workload.release(operands, backend)?;
    workload.release(companion, ctx.reference())?;
    let distance = agreement?;
    tracing::info!(
        config = config.name(),
        size,
        distance,
        "agrees with reference"
    );
    Ok(distance)
}

/// Per-configuration throughput series for plotting.
#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    pub sizes: Vec<usize>,
    pub gflops: Vec<f64>,
    pub title: String,
    pub style: String,
}

impl Extraction {
    /// Concatenate `config`'s samples across `segments`, in GFLOPS.
    pub fn from_segments(segments: &[Segment], config: BackendConfig) -> Self {
        let samples = segments.iter().flat_map(|s| s.samples(config).iter());
        let (sizes, gflops) = samples.map(|s| (s.size, s.flops / 1e9)).unzip();
        Extraction {
            sizes,
            gflops,
            title: config.name().to_string(),
            style: config.style().to_string(),
        }
    }
}

/// Profile every segment of `plan` with `configs` and extract one series
/// per configuration.
pub fn run_segments<W: Workload>(
    workload: &W,
    plan: &[SegmentConfig],
    settings: &RunSettings,
    configs: &[BackendConfig],
    ctx: &mut ExecutionContext,
    seed: u64,
) -> Result<Vec<Extraction>> {
    validate_granularity(settings.granularity)?;
    let mut rng = StdRng::seed_from_u64(seed);
    let mut segments: Vec<Segment> = plan.iter().cloned().map(Segment::new).collect();
    for segment in &mut segments {
        segment.profile(workload, settings, configs, ctx, &mut rng)?;
    }
    Ok(EXTRACTION_ORDER
        .iter()
        .filter(|c| configs.contains(c))
        .map(|&c| Extraction::from_segments(&segments, c))
        .collect())
}
