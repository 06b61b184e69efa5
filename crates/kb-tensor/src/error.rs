use thiserror::Error;

use crate::backend::BackendKind;
use crate::dtype::DType;

#[derive(Error, Debug)]
pub enum TensorError {
    #[error("shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch { expected: Vec<usize>, got: Vec<usize> },
    #[error("invalid shape {0:?}: every dimension must be positive")]
    InvalidShape(Vec<usize>),
    #[error("dtype mismatch: expected {expected}, got {got}")]
    DTypeMismatch { expected: DType, got: DType },
    #[error("backend mismatch: expected {expected}, got {got}")]
    BackendMismatch {
        expected: BackendKind,
        got: BackendKind,
    },
    #[error("backend '{backend}' does not support {dtype}")]
    UnsupportedDType { backend: String, dtype: DType },
    #[error("failed to allocate {bytes} bytes")]
    AllocationFailed { bytes: usize },
    #[error("unknown backend parameter '{0}'")]
    UnknownParameter(String),
    #[error("invalid attention mask: {0}")]
    InvalidMask(String),
    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, TensorError>;
