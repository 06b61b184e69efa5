use thiserror::Error;

#[derive(Error, Debug)]
pub enum BenchError {
    #[error("tensor error: {0}")]
    TensorError(#[from] kb_tensor::TensorError),
    #[error("{config} did not match the reference: euclidean distance {distance} exceeds tolerance {tolerance}")]
    Divergence {
        config: String,
        distance: f64,
        tolerance: f64,
    },
    #[error("{config} produced a NaN distance against the reference")]
    NanDistance { config: String },
    #[error("granularity must be a power of two, got {0}")]
    InvalidGranularity(usize),
    #[error("invalid segment plan: {0}")]
    InvalidSegment(String),
    #[error("unknown operation '{0}'")]
    UnknownOperation(String),
    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, BenchError>;
