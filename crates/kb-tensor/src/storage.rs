use std::borrow::Cow;

use half::f16;

use crate::bf16::BFloat16;
use crate::dtype::DType;
use crate::element::Element;
use crate::error::{Result, TensorError};

/// Dense element storage for one tensor allocation.
#[derive(Debug, Clone)]
pub enum Storage {
    /// 32-bit floating point storage.
    F32(Vec<f32>),
    /// IEEE half-precision storage.
    F16(Vec<f16>),
    /// Brain-float storage.
    BF16(Vec<BFloat16>),
}

/// Allocate `n` copies of `value`, reporting allocation failure instead of
/// aborting.
fn try_filled<T: Element>(value: T, n: usize) -> Result<Vec<T>> {
    let mut v = Vec::new();
    v.try_reserve_exact(n)
        .map_err(|_| TensorError::AllocationFailed {
            bytes: n.saturating_mul(T::DTYPE.size_in_bytes()),
        })?;
    v.resize(n, value);
    Ok(v)
}

impl Storage {
    /// Create zero-filled storage for the given dtype and element count.
    ///
    /// # Errors
    /// Returns `AllocationFailed` if the memory cannot be reserved.
    pub fn zeros(dtype: DType, n: usize) -> Result<Self> {
        Ok(match dtype {
            DType::F32 => Storage::F32(try_filled(0.0f32, n)?),
            DType::F16 => Storage::F16(try_filled(f16::ZERO, n)?),
            DType::BF16 => Storage::BF16(try_filled(BFloat16::ZERO, n)?),
        })
    }

    /// Number of elements in this storage.
    pub fn len(&self) -> usize {
        match self {
            Storage::F32(v) => v.len(),
            Storage::F16(v) => v.len(),
            Storage::BF16(v) => v.len(),
        }
    }

    /// Returns true if the storage contains no elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the dtype of this storage.
    pub fn dtype(&self) -> DType {
        match self {
            Storage::F32(_) => DType::F32,
            Storage::F16(_) => DType::F16,
            Storage::BF16(_) => DType::BF16,
        }
    }

    /// Number of bytes backing the elements.
    pub fn size_in_bytes(&self) -> usize {
        self.len() * self.dtype().size_in_bytes()
    }

    /// Typed view of the elements.
    ///
    /// # Errors
    /// Returns `DTypeMismatch` if `T` is not the storage's element type.
    pub fn as_slice<T: Element>(&self) -> Result<&[T]> {
        T::slice(self).ok_or(TensorError::DTypeMismatch {
            expected: T::DTYPE,
            got: self.dtype(),
        })
    }

    /// Typed mutable view of the elements.
    ///
    /// # Errors
    /// Returns `DTypeMismatch` if `T` is not the storage's element type.
    pub fn as_slice_mut<T: Element>(&mut self) -> Result<&mut [T]> {
        let got = self.dtype();
        T::slice_mut(self).ok_or(TensorError::DTypeMismatch {
            expected: T::DTYPE,
            got,
        })
    }

    /// Returns the data as an f32 slice.
    ///
    /// # Errors
    /// Returns an error if the storage is not F32.
    pub fn as_f32_slice(&self) -> Result<&[f32]> {
        self.as_slice::<f32>()
    }

    /// Every element as f32, borrowed in place when the storage is already
    /// f32 and widened into a fresh buffer otherwise.
    pub fn f32_values(&self) -> Cow<'_, [f32]> {
        match self.as_f32_slice() {
            Ok(values) => Cow::Borrowed(values),
            Err(_) => Cow::Owned(self.to_f32_vec()),
        }
    }

    /// Widen every element to f32. Exact for all three kinds.
    pub fn to_f32_vec(&self) -> Vec<f32> {
        match self {
            Storage::F32(v) => v.clone(),
            Storage::F16(v) => v.iter().map(|x| x.to_f32()).collect(),
            Storage::BF16(v) => v.iter().map(|x| x.to_f32()).collect(),
        }
    }

    /// Overwrite every element from f32 values, narrowing with
    /// round-to-nearest-even.
    ///
    /// # Panics
    /// Panics if `values.len() != self.len()`.
    pub fn write_f32(&mut self, values: &[f32]) {
        assert_eq!(values.len(), self.len(), "write_f32: length mismatch");
        match self {
            Storage::F32(v) => v.copy_from_slice(values),
            Storage::F16(v) => {
                for (dst, &src) in v.iter_mut().zip(values) {
                    *dst = f16::from_f32(src);
                }
            }
            Storage::BF16(v) => {
                for (dst, &src) in v.iter_mut().zip(values) {
                    *dst = BFloat16::from_f32(src);
                }
            }
        }
    }

    /// Set every element to zero.
    pub fn fill_zero(&mut self) {
        match self {
            Storage::F32(v) => v.fill(0.0),
            Storage::F16(v) => v.fill(f16::ZERO),
            Storage::BF16(v) => v.fill(BFloat16::ZERO),
        }
    }

    /// Bit-for-bit copy of `self.len()` elements of `src`, starting at
    /// element `offset`.
    ///
    /// # Errors
    /// Returns `DTypeMismatch` if the element kinds differ.
    ///
    /// # Panics
    /// Panics if the source range is out of bounds.
    pub fn copy_from(&mut self, src: &Storage, offset: usize) -> Result<()> {
        let n = self.len();
        match (self, src) {
            (Storage::F32(d), Storage::F32(s)) => d.copy_from_slice(&s[offset..offset + n]),
            (Storage::F16(d), Storage::F16(s)) => d.copy_from_slice(&s[offset..offset + n]),
            (Storage::BF16(d), Storage::BF16(s)) => d.copy_from_slice(&s[offset..offset + n]),
            (dst, src) => {
                return Err(TensorError::DTypeMismatch {
                    expected: dst.dtype(),
                    got: src.dtype(),
                })
            }
        }
        Ok(())
    }

    /// Convert every element of `src` into this storage's element kind.
    /// Widening is lossless; narrowing rounds to nearest even. Bits are
    /// never reinterpreted.
    ///
    /// # Panics
    /// Panics if the lengths differ.
    pub fn convert_from(&mut self, src: &Storage) -> Result<()> {
        assert_eq!(self.len(), src.len(), "convert_from: length mismatch");
        if self.dtype() == src.dtype() {
            return self.copy_from(src, 0);
        }
        self.write_f32(&src.to_f32_vec());
        Ok(())
    }

    /// Returns true if any element is NaN.
    pub fn has_nan(&self) -> bool {
        match self {
            Storage::F32(v) => v.iter().any(|x| x.is_nan()),
            Storage::F16(v) => v.iter().any(|x| x.is_nan()),
            Storage::BF16(v) => v.iter().any(|x| x.is_nan()),
        }
    }
}
