use std::fmt::Debug;

use half::f16;

use crate::bf16::BFloat16;
use crate::dtype::DType;
use crate::storage::Storage;

/// A scalar type that can live in tensor storage.
///
/// Storage is typed per `DType`; this trait lets generic code (mask
/// synthesis, fills, conversions) reach the right variant.
pub trait Element: Copy + Debug + PartialEq + Send + Sync + 'static {
    const DTYPE: DType;
    const ZERO: Self;
    /// Most negative finite value. Masks use it in place of negative
    /// infinity so that downstream arithmetic stays finite.
    const MOST_NEGATIVE: Self;

    fn from_f32(value: f32) -> Self;
    fn to_f32(self) -> f32;

    fn slice(storage: &Storage) -> Option<&[Self]>;
    fn slice_mut(storage: &mut Storage) -> Option<&mut [Self]>;
}

impl Element for f32 {
    const DTYPE: DType = DType::F32;
    const ZERO: Self = 0.0;
    const MOST_NEGATIVE: Self = f32::MIN;

    fn from_f32(value: f32) -> Self {
        value
    }

    fn to_f32(self) -> f32 {
        self
    }

    fn slice(storage: &Storage) -> Option<&[Self]> {
        match storage {
            Storage::F32(v) => Some(v),
            _ => None,
        }
    }

    fn slice_mut(storage: &mut Storage) -> Option<&mut [Self]> {
        match storage {
            Storage::F32(v) => Some(v),
            _ => None,
        }
    }
}

impl Element for f16 {
    const DTYPE: DType = DType::F16;
    const ZERO: Self = f16::ZERO;
    const MOST_NEGATIVE: Self = f16::MIN;

    fn from_f32(value: f32) -> Self {
        f16::from_f32(value)
    }

    fn to_f32(self) -> f32 {
        f16::to_f32(self)
    }

    fn slice(storage: &Storage) -> Option<&[Self]> {
        match storage {
            Storage::F16(v) => Some(v),
            _ => None,
        }
    }

    fn slice_mut(storage: &mut Storage) -> Option<&mut [Self]> {
        match storage {
            Storage::F16(v) => Some(v),
            _ => None,
        }
    }
}

impl Element for BFloat16 {
    const DTYPE: DType = DType::BF16;
    const ZERO: Self = BFloat16::ZERO;
    const MOST_NEGATIVE: Self = BFloat16::MIN;

    fn from_f32(value: f32) -> Self {
        BFloat16::from_f32(value)
    }

    fn to_f32(self) -> f32 {
        BFloat16::to_f32(self)
    }

    fn slice(storage: &Storage) -> Option<&[Self]> {
        match storage {
            Storage::BF16(v) => Some(v),
            _ => None,
        }
    }

    fn slice_mut(storage: &mut Storage) -> Option<&mut [Self]> {
        match storage {
            Storage::BF16(v) => Some(v),
            _ => None,
        }
    }
}
