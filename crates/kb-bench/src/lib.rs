//! `kb-bench` - Throughput benchmarks and correctness checks across compute backends.
//!
//! This crate provides:
//! - A precision- and size-scaled tolerance model for cross-backend agreement
//! - Segment plans and named backend configurations applied through a scope guard
//! - GEMM and attention workloads
//! - The segment state machine that warms up, verifies, and measures each size
//! - A test-case runner with quick, long, and very-long depths

pub mod backend_config;
pub mod config;
pub mod error;
pub mod harness;
pub mod runner;
pub mod tolerance;
pub mod workload;

// Re-export primary types at the crate root for convenience.
pub use backend_config::{BackendConfig, ConfigGuard, ExecutionContext};
pub use config::{AttentionBenchOptions, GemmBenchOptions, SegmentConfig};
pub use error::{BenchError, Result};
pub use harness::{Extraction, RunSettings, Sample, Segment, SegmentState};
pub use runner::{
    run_attention_benchmark, run_benchmark, run_benchmark_at, run_cases, run_gemm_benchmark,
    AttentionPerfCase, BenchCase, GemmPerfCase, OperationKind, TestSpeed,
};
pub use tolerance::ToleranceParams;
pub use workload::{AttentionWorkload, GemmWorkload, Workload};
