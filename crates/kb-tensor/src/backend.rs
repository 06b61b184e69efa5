use std::fmt::{self, Debug};

use crate::dtype::DType;
use crate::error::{Result, TensorError};
use crate::params::{AttentionParams, GemmParams};
use crate::shape::Shape;
use crate::storage::Storage;

/// Identifies which backend owns a tensor allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// Straightforward loops; the agreement baseline.
    Reference,
    /// Blocked kernels driven by tile-size parameters.
    Tiled,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Reference => write!(f, "reference"),
            BackendKind::Tiled => write!(f, "tiled"),
        }
    }
}

/// Buffers for one GEMM dispatch: `C = A·B (+ D)`.
#[derive(Debug)]
pub struct GemmOperands<'a> {
    pub a: &'a Storage,
    pub b: &'a Storage,
    pub c: &'a mut Storage,
    pub d: Option<&'a Storage>,
}

/// Buffers for one attention dispatch: `O = softmax(Q·Kᵀ/√D + mask)·V`.
#[derive(Debug)]
pub struct AttentionOperands<'a> {
    pub q: &'a Storage,
    pub k: &'a Storage,
    pub v: &'a Storage,
    pub o: &'a mut Storage,
    pub mask: Option<&'a Storage>,
}

/// A fully described operation ready for dispatch.
#[derive(Debug)]
pub enum Operation<'a> {
    Gemm {
        params: &'a GemmParams,
        operands: GemmOperands<'a>,
    },
    Attention {
        params: &'a AttentionParams,
        operands: AttentionOperands<'a>,
    },
}

/// Trait for interchangeable compute backends.
///
/// The harness only needs to allocate buffers, dispatch work, and time a
/// bracketed window of dispatches. A measurement looks like:
///
/// ```text
/// mark_first_command()
/// dispatch(op) × iterations
/// mark_last_command()
/// synchronize() -> elapsed seconds
/// ```
///
/// After `synchronize` returns, every destination buffer dispatched inside
/// the window holds its completed result.
pub trait ComputeBackend: Send + Debug {
    /// Returns the name of this backend (e.g., "reference", "tiled").
    fn name(&self) -> &str;

    fn kind(&self) -> BackendKind;

    /// Whether this backend can allocate and compute with `dtype`.
    fn supports(&self, _dtype: DType) -> bool {
        true
    }

    /// Allocate storage for `shape`. Contents are zeroed.
    fn allocate(&self, shape: &Shape, dtype: DType) -> Result<Storage> {
        if !self.supports(dtype) {
            return Err(TensorError::UnsupportedDType {
                backend: self.name().to_string(),
                dtype,
            });
        }
        Storage::zeros(dtype, shape.numel())
    }

    /// Return an allocation to the backend.
    fn release(&self, storage: Storage) {
        drop(storage);
    }

    /// Enqueue one operation.
    fn dispatch(&mut self, op: Operation<'_>) -> Result<()>;

    /// Open a measurement window.
    fn mark_first_command(&mut self);

    /// Close the measurement window after the final dispatch has been issued.
    fn mark_last_command(&mut self);

    /// Wait for queued work and return the wall time of the last window.
    fn synchronize(&mut self) -> Result<f64>;

    /// Set a named tuning parameter.
    fn set_parameter(&mut self, name: &str, _value: u16) -> Result<()> {
        Err(TensorError::UnknownParameter(name.to_string()))
    }

    /// Current value of a named tuning parameter, if the backend has it.
    fn parameter(&self, _name: &str) -> Option<u16> {
        None
    }

    /// Restore every tuning parameter to its default.
    fn reset_parameters(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct NullBackend;

    impl ComputeBackend for NullBackend {
        fn name(&self) -> &str {
            "null"
        }
        fn kind(&self) -> BackendKind {
            BackendKind::Reference
        }
        fn supports(&self, dtype: DType) -> bool {
            dtype == DType::F32
        }
        fn dispatch(&mut self, _op: Operation<'_>) -> Result<()> {
            Ok(())
        }
        fn mark_first_command(&mut self) {}
        fn mark_last_command(&mut self) {}
        fn synchronize(&mut self) -> Result<f64> {
            Ok(0.0)
        }
    }

    #[test]
    fn test_backend_kind_display() {
        assert_eq!(BackendKind::Reference.to_string(), "reference");
        assert_eq!(BackendKind::Tiled.to_string(), "tiled");
    }

    #[test]
    fn test_default_allocate_checks_support() {
        let backend = NullBackend;
        let s = backend.allocate(&Shape::new(vec![2, 3]), DType::F32).unwrap();
        assert_eq!(s.len(), 6);
        let err = backend.allocate(&Shape::new(vec![2]), DType::F16).unwrap_err();
        assert!(matches!(err, TensorError::UnsupportedDType { dtype: DType::F16, .. }));
    }

    #[test]
    fn test_default_parameters_unknown() {
        let mut backend = NullBackend;
        assert!(matches!(
            backend.set_parameter("M_simd", 8),
            Err(TensorError::UnknownParameter(_))
        ));
        assert_eq!(backend.parameter("M_simd"), None);
    }
}
