//! `kb-tensor` - Numeric substrate for cross-backend kernel benchmarks.
//!
//! This crate provides:
//! - A software `BFloat16` type with full floating-point semantics
//! - A backend-owned `Tensor` with masked, sliced, and converted construction
//! - Operand shape algebra for GEMM and attention (`GemmParams`, `AttentionParams`)
//! - A `ComputeBackend` trait with a reference `CpuBackend` and a tunable `TiledBackend`

pub mod backend;
pub mod bf16;
pub mod cpu;
pub mod dtype;
pub mod element;
pub mod error;
pub mod mask;
pub mod params;
pub mod shape;
pub mod storage;
pub mod tensor;
pub mod tiled;

// Re-export primary types at the crate root for convenience.
pub use backend::{AttentionOperands, BackendKind, ComputeBackend, GemmOperands, Operation};
pub use bf16::BFloat16;
pub use cpu::CpuBackend;
pub use dtype::DType;
pub use element::Element;
pub use error::{Result, TensorError};
pub use mask::AttentionMask;
pub use params::{AttentionOptions, AttentionParams, GemmOptions, GemmParams};
pub use shape::Shape;
pub use storage::Storage;
pub use tensor::Tensor;
pub use tiled::{TileConfig, TiledBackend, PARAM_K_SIMD, PARAM_M_SIMD, PARAM_N_SIMD};
