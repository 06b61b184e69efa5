use std::os::raw::c_char;

use kb_bench::{OperationKind, TestSpeed};
use kb_tensor::DType;

/// Status codes returned by all FFI functions.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum KBStatus {
    Ok = 0,
    ErrorInvalidArgument = 1,
    ErrorDivergence = 2,
    ErrorBenchmark = 3,
    ErrorOutOfMemory = 4,
    ErrorInternal = 5,
}

/// Operation selector.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub enum KBOperation {
    Gemm = 0,
    Attention = 1,
}

/// Element kind selector.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub enum KBDataType {
    F32 = 0,
    F16 = 1,
    BF16 = 2,
}

/// How far to run: checks only, or checks followed by the throughput sweep.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub enum KBTestSpeed {
    Quick = 0,
    Long = 1,
    VeryLong = 2,
}

/// Borrowed view of one throughput series. Every pointer stays valid until
/// the owning results handle is destroyed.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct KBExtraction {
    pub sizes: *const usize,
    pub gflops: *const f64,
    pub len: usize,
    pub title: *const c_char,
    pub style: *const c_char,
}

impl From<KBOperation> for OperationKind {
    fn from(op: KBOperation) -> Self {
        match op {
            KBOperation::Gemm => OperationKind::Gemm,
            KBOperation::Attention => OperationKind::Attention,
        }
    }
}

impl From<KBDataType> for DType {
    fn from(dtype: KBDataType) -> Self {
        match dtype {
            KBDataType::F32 => DType::F32,
            KBDataType::F16 => DType::F16,
            KBDataType::BF16 => DType::BF16,
        }
    }
}

impl From<KBTestSpeed> for TestSpeed {
    fn from(speed: KBTestSpeed) -> Self {
        match speed {
            KBTestSpeed::Quick => TestSpeed::Quick,
            KBTestSpeed::Long => TestSpeed::Long,
            KBTestSpeed::VeryLong => TestSpeed::VeryLong,
        }
    }
}
