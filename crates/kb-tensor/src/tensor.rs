use std::ops::Range;

use rand::distributions::{Distribution, Uniform};
use rand::Rng;

use crate::backend::{AttentionOperands, BackendKind, ComputeBackend, GemmOperands, Operation};
use crate::bf16::BFloat16;
use crate::dtype::DType;
use crate::element::Element;
use crate::error::{Result, TensorError};
use crate::mask::{fill_mask, AttentionMask};
use crate::params::{AttentionOptions, AttentionParams, GemmOptions, GemmParams};
use crate::shape::Shape;
use crate::storage::Storage;

/// A dense, row-major buffer owned by one backend.
///
/// The shape is fixed at construction. Tensors from different backends are
/// never mixed in one operation; moving data across backends goes through
/// [`Tensor::copying`] or [`Tensor::converting`], which allocate in the
/// destination.
#[derive(Debug)]
pub struct Tensor {
    storage: Storage,
    shape: Shape,
    dtype: DType,
    backend: BackendKind,
    count: usize,
}

impl Tensor {
    /// Allocate a tensor without specifying its contents.
    ///
    /// # Errors
    /// `InvalidShape` for an empty or zero-sized shape, `UnsupportedDType`
    /// if the backend cannot hold `dtype`, `AllocationFailed` if memory is
    /// exhausted.
    pub fn uninitialized(shape: Shape, dtype: DType, backend: &dyn ComputeBackend) -> Result<Self> {
        shape.validate()?;
        let storage = backend.allocate(&shape, dtype)?;
        let count = shape.numel();
        Ok(Tensor {
            storage,
            shape,
            dtype,
            backend: backend.kind(),
            count,
        })
    }

    /// Allocate a zero-filled tensor.
    pub fn zeros(shape: Shape, dtype: DType, backend: &dyn ComputeBackend) -> Result<Self> {
        let mut t = Self::uninitialized(shape, dtype, backend)?;
        t.storage.fill_zero();
        Ok(t)
    }

    /// Allocate a tensor of values drawn uniformly from `range`, generated in
    /// f32 and narrowed to `dtype`.
    ///
    /// # Panics
    /// Panics if `range` is empty.
    pub fn random_uniform<R: Rng + ?Sized>(
        shape: Shape,
        dtype: DType,
        range: Range<f32>,
        rng: &mut R,
        backend: &dyn ComputeBackend,
    ) -> Result<Self> {
        assert!(
            range.start < range.end,
            "random range {:?} is empty",
            range
        );
        let mut t = Self::uninitialized(shape, dtype, backend)?;
        let dist = Uniform::new(range.start, range.end);
        let values: Vec<f32> = (0..t.count).map(|_| dist.sample(rng)).collect();
        t.storage.write_f32(&values);
        Ok(t)
    }

    /// Bit-for-bit copy of `other` into a new allocation on `backend`.
    pub fn copying(other: &Tensor, backend: &dyn ComputeBackend) -> Result<Self> {
        let mut t = Self::uninitialized(other.shape.clone(), other.dtype, backend)?;
        t.storage.copy_from(&other.storage, 0)?;
        Ok(t)
    }

    /// Copy `other` into a new allocation of element kind `dtype` on
    /// `backend`, widening or rounding each value.
    pub fn converting(other: &Tensor, dtype: DType, backend: &dyn ComputeBackend) -> Result<Self> {
        let mut t = Self::uninitialized(other.shape.clone(), dtype, backend)?;
        t.storage.convert_from(&other.storage)?;
        Ok(t)
    }

    /// Copy the contiguous block addressed by fixing the leading
    /// `last_sliced_dim + 1` indices of `other`.
    ///
    /// The result has shape `other.shape[last_sliced_dim + 1..]`.
    ///
    /// # Panics
    /// Panics unless `indices.len() == last_sliced_dim + 1`, at least one
    /// dimension remains, and every index is in bounds.
    pub fn slicing(
        other: &Tensor,
        indices: &[usize],
        last_sliced_dim: usize,
        backend: &dyn ComputeBackend,
    ) -> Result<Self> {
        let dims = other.shape.dims();
        assert_eq!(
            indices.len(),
            last_sliced_dim + 1,
            "slice needs {} indices, got {:?}",
            last_sliced_dim + 1,
            indices
        );
        assert!(
            last_sliced_dim + 1 < dims.len(),
            "slice would fix every dimension of {}",
            other.shape
        );
        let strides = other.shape.strides();
        let mut offset = 0;
        for (axis, &index) in indices.iter().enumerate() {
            assert!(
                index < dims[axis],
                "slice index {} out of bounds for dimension {} of size {}",
                index,
                axis,
                dims[axis]
            );
            offset += index * strides[axis];
        }
        let shape = Shape::from_slice(&dims[last_sliced_dim + 1..]);
        let mut t = Self::uninitialized(shape, other.dtype, backend)?;
        t.storage.copy_from(&other.storage, offset)?;
        Ok(t)
    }

    /// Reshape the tensor, returning a new tensor with the same data but
    /// a different shape on the same backend.
    ///
    /// The total number of elements must remain the same.
    pub fn reshape(&self, new_shape: Shape) -> Result<Tensor> {
        new_shape.validate()?;
        if self.count != new_shape.numel() {
            return Err(TensorError::ShapeMismatch {
                expected: self.shape.dims().to_vec(),
                got: new_shape.dims().to_vec(),
            });
        }
        Ok(Tensor {
            storage: self.storage.clone(),
            count: self.count,
            shape: new_shape,
            dtype: self.dtype,
            backend: self.backend,
        })
    }

    /// Synthesize an attention mask. The innermost two dimensions are
    /// `[R, C]`; every leading dimension indexes a separate plane.
    pub fn masked<R: Rng + ?Sized>(
        shape: Shape,
        dtype: DType,
        mask: &AttentionMask,
        rng: &mut R,
        backend: &dyn ComputeBackend,
    ) -> Result<Self> {
        if shape.ndim() < 2 {
            return Err(TensorError::InvalidMask(format!(
                "mask shape {} needs at least two dimensions",
                shape
            )));
        }
        let rows = shape.dim_from_end(1);
        let columns = shape.dim_from_end(0);
        mask.validate(rows, columns)?;
        let mut t = Self::uninitialized(shape, dtype, backend)?;
        match &mut t.storage {
            Storage::F32(v) => fill_mask::<f32, R>(mask, v, rows, columns, rng),
            Storage::F16(v) => fill_mask::<half::f16, R>(mask, v, rows, columns, rng),
            Storage::BF16(v) => fill_mask::<BFloat16, R>(mask, v, rows, columns, rng),
        }
        Ok(t)
    }

    /// Hand the allocation back to the backend that owns it.
    pub fn release(self, backend: &dyn ComputeBackend) -> Result<()> {
        if self.backend != backend.kind() {
            return Err(TensorError::BackendMismatch {
                expected: self.backend,
                got: backend.kind(),
            });
        }
        backend.release(self.storage);
        Ok(())
    }

    /// Returns a reference to the tensor's shape.
    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    /// Returns the tensor's data type.
    pub fn dtype(&self) -> DType {
        self.dtype
    }

    /// Returns the backend that owns this tensor.
    pub fn backend(&self) -> BackendKind {
        self.backend
    }

    /// Number of elements.
    pub fn count(&self) -> usize {
        self.count
    }

    /// Returns the underlying storage reference.
    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut Storage {
        &mut self.storage
    }

    /// Typed view of the elements.
    pub fn as_slice<T: Element>(&self) -> Result<&[T]> {
        self.storage.as_slice::<T>()
    }

    /// Every element widened to f32.
    pub fn to_f32_vec(&self) -> Vec<f32> {
        self.storage.to_f32_vec()
    }

    pub fn has_nan(&self) -> bool {
        self.storage.has_nan()
    }

    /// Euclidean (L2) distance between the two tensors' values, computed in
    /// f64 after widening. Element kinds may differ; owners may not.
    pub fn euclidean_distance(&self, other: &Tensor) -> Result<f64> {
        if self.backend != other.backend {
            return Err(TensorError::BackendMismatch {
                expected: self.backend,
                got: other.backend,
            });
        }
        if self.count != other.count {
            return Err(TensorError::ShapeMismatch {
                expected: self.shape.dims().to_vec(),
                got: other.shape.dims().to_vec(),
            });
        }
        let lhs = self.storage.f32_values();
        let rhs = other.storage.f32_values();
        let sum: f64 = lhs
            .iter()
            .zip(rhs.iter())
            .map(|(&x, &y)| {
                let delta = f64::from(x) - f64::from(y);
                delta * delta
            })
            .sum();
        Ok(sum.sqrt())
    }

    /// Dispatch `C = A·B (+ D)` on `backend`.
    ///
    /// # Errors
    /// `BackendMismatch` if an operand is owned by another backend,
    /// `DTypeMismatch` if operand element kinds differ.
    ///
    /// # Panics
    /// Panics on a shape contract violation (see [`GemmParams::derive`]).
    pub fn matmul(
        a: &Tensor,
        b: &Tensor,
        c: &mut Tensor,
        d: Option<&Tensor>,
        options: &GemmOptions,
        backend: &mut dyn ComputeBackend,
    ) -> Result<GemmParams> {
        let kind = backend.kind();
        let operands = [Some(a), Some(b), Some(&*c), d];
        check_operands(operands.iter().flatten().copied(), kind, c.dtype)?;
        let params = GemmParams::derive(
            c.dtype,
            &a.shape,
            &b.shape,
            &c.shape,
            d.map(|d| &d.shape),
            options,
        );
        backend.dispatch(Operation::Gemm {
            params: &params,
            operands: GemmOperands {
                a: &a.storage,
                b: &b.storage,
                c: &mut c.storage,
                d: d.map(|d| &d.storage),
            },
        })?;
        Ok(params)
    }

    /// Dispatch `O = softmax(Q·Kᵀ/√D + mask)·V` on `backend`.
    ///
    /// # Panics
    /// Panics on a shape contract violation (see [`AttentionParams::derive`]).
    pub fn attention(
        q: &Tensor,
        k: &Tensor,
        v: &Tensor,
        o: &mut Tensor,
        mask: Option<&Tensor>,
        options: &AttentionOptions,
        backend: &mut dyn ComputeBackend,
    ) -> Result<AttentionParams> {
        let kind = backend.kind();
        let operands = [Some(q), Some(k), Some(v), Some(&*o), mask];
        check_operands(operands.iter().flatten().copied(), kind, o.dtype)?;
        let params = AttentionParams::derive(
            o.dtype,
            &q.shape,
            &k.shape,
            &v.shape,
            &o.shape,
            mask.map(|m| &m.shape),
            options,
        );
        backend.dispatch(Operation::Attention {
            params: &params,
            operands: AttentionOperands {
                q: &q.storage,
                k: &k.storage,
                v: &v.storage,
                o: &mut o.storage,
                mask: mask.map(|m| &m.storage),
            },
        })?;
        Ok(params)
    }
}

fn check_operands<'a>(
    operands: impl Iterator<Item = &'a Tensor>,
    backend: BackendKind,
    dtype: DType,
) -> Result<()> {
    for t in operands {
        if t.backend != backend {
            return Err(TensorError::BackendMismatch {
                expected: backend,
                got: t.backend,
            });
        }
        if t.dtype != dtype {
            return Err(TensorError::DTypeMismatch {
                expected: dtype,
                got: t.dtype,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::CpuBackend;
    use crate::tiled::TiledBackend;
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn values(v: &[f32], dtype: DType, backend: &dyn ComputeBackend) -> Tensor {
        let mut t = Tensor::uninitialized(Shape::new(vec![v.len()]), dtype, backend).unwrap();
        t.storage_mut().write_f32(v);
        t
    }

    fn iota(dims: &[usize], backend: &CpuBackend) -> Tensor {
        let shape = Shape::from_slice(dims);
        let mut t = Tensor::uninitialized(shape, DType::F32, backend).unwrap();
        let values: Vec<f32> = (0..t.count()).map(|i| i as f32).collect();
        t.storage_mut().write_f32(&values);
        t
    }

    #[test]
    fn test_uninitialized_rejects_zero_dimension() {
        let cpu = CpuBackend::new();
        let err = Tensor::uninitialized(Shape::new(vec![2, 0]), DType::F32, &cpu).unwrap_err();
        assert!(matches!(err, TensorError::InvalidShape(_)));
        let err = Tensor::uninitialized(Shape::new(vec![]), DType::F32, &cpu).unwrap_err();
        assert!(matches!(err, TensorError::InvalidShape(_)));
    }

    #[test]
    fn test_count_cached() {
        let cpu = CpuBackend::new();
        let t = Tensor::zeros(Shape::new(vec![3, 4, 5]), DType::F16, &cpu).unwrap();
        assert_eq!(t.count(), 60);
        assert_eq!(t.storage().size_in_bytes(), 120);
        assert_eq!(t.backend(), BackendKind::Reference);
    }

    #[test]
    fn test_random_uniform_in_range() {
        let cpu = CpuBackend::new();
        let mut rng = StdRng::seed_from_u64(3);
        let t = Tensor::random_uniform(Shape::new(vec![64]), DType::F32, -1.0..1.0, &mut rng, &cpu)
            .unwrap();
        assert!(t.to_f32_vec().iter().all(|&v| (-1.0..1.0).contains(&v)));
        let mut rng = StdRng::seed_from_u64(3);
        let again =
            Tensor::random_uniform(Shape::new(vec![64]), DType::F32, -1.0..1.0, &mut rng, &cpu)
                .unwrap();
        assert_eq!(t.to_f32_vec(), again.to_f32_vec());
    }

    #[test]
    fn test_slicing_offset() {
        let cpu = CpuBackend::new();
        let t = iota(&[3, 2, 4, 5], &cpu);
        let s = Tensor::slicing(&t, &[1, 0], 1, &cpu).unwrap();
        assert_eq!(s.shape().dims(), &[4, 5]);
        let expected: Vec<f32> = (40..60).map(|i| i as f32).collect();
        assert_eq!(s.to_f32_vec(), expected);

        let s = Tensor::slicing(&t, &[2], 0, &cpu).unwrap();
        assert_eq!(s.shape().dims(), &[2, 4, 5]);
        assert_eq!(s.to_f32_vec()[0], 80.0);
    }

    #[test]
    #[should_panic(expected = "slice needs 2 indices")]
    fn test_slicing_arity_panics() {
        let cpu = CpuBackend::new();
        let t = iota(&[3, 2, 4, 5], &cpu);
        let _ = Tensor::slicing(&t, &[1], 1, &cpu);
    }

    #[test]
    fn test_reshape_keeps_count() {
        let cpu = CpuBackend::new();
        let t = iota(&[2, 6], &cpu);
        let r = t.reshape(Shape::new(vec![3, 4])).unwrap();
        assert_eq!(r.to_f32_vec(), t.to_f32_vec());
        assert!(t.reshape(Shape::new(vec![5])).is_err());
    }

    #[test]
    fn test_copy_and_convert_across_backends() {
        let cpu = CpuBackend::new();
        let tiled = TiledBackend::new();
        let src = values(&[1.5, -2.25, 3.0], DType::F16, &tiled);
        let copy = Tensor::copying(&src, &tiled).unwrap();
        assert_eq!(copy.dtype(), DType::F16);
        let widened = Tensor::converting(&src, DType::F32, &cpu).unwrap();
        assert_eq!(widened.backend(), BackendKind::Reference);
        assert_eq!(widened.to_f32_vec(), vec![1.5, -2.25, 3.0]);
        // Same-kind copy is bitwise.
        assert_eq!(copy.as_slice::<half::f16>().unwrap(), src.as_slice::<half::f16>().unwrap());
    }

    #[test]
    fn test_reference_backend_rejects_bf16() {
        let cpu = CpuBackend::new();
        let err = Tensor::zeros(Shape::new(vec![4]), DType::BF16, &cpu).unwrap_err();
        assert!(matches!(err, TensorError::UnsupportedDType { .. }));
    }

    #[test]
    fn test_euclidean_distance() {
        let cpu = CpuBackend::new();
        let a = values(&[0.0, 0.0], DType::F32, &cpu);
        let b = values(&[3.0, 4.0], DType::F32, &cpu);
        assert_relative_eq!(a.euclidean_distance(&b).unwrap(), 5.0);
        let tiled = TiledBackend::new();
        let c = values(&[3.0, 4.0], DType::F32, &tiled);
        assert!(matches!(
            a.euclidean_distance(&c),
            Err(TensorError::BackendMismatch { .. })
        ));
    }

    #[test]
    fn test_euclidean_distance_across_kinds() {
        let cpu = CpuBackend::new();
        let a = values(&[1.0, -2.0, 0.5], DType::F32, &cpu);
        let b = values(&[1.0, -2.0, 0.5], DType::F16, &cpu);
        assert_eq!(a.euclidean_distance(&b).unwrap(), 0.0);
        let c = values(&[1.0, 2.0, 0.5], DType::F16, &cpu);
        assert_relative_eq!(c.euclidean_distance(&a).unwrap(), 4.0);
    }

    #[test]
    fn test_matmul_rejects_foreign_operand() {
        let mut cpu = CpuBackend::new();
        let tiled = TiledBackend::new();
        let a = Tensor::zeros(Shape::new(vec![2, 2]), DType::F32, &cpu).unwrap();
        let b = Tensor::zeros(Shape::new(vec![2, 2]), DType::F32, &tiled).unwrap();
        let mut c = Tensor::zeros(Shape::new(vec![2, 2]), DType::F32, &cpu).unwrap();
        let err = Tensor::matmul(&a, &b, &mut c, None, &GemmOptions::default(), &mut cpu)
            .unwrap_err();
        assert!(matches!(err, TensorError::BackendMismatch { .. }));
    }

    #[test]
    fn test_masked_tensor() {
        let cpu = CpuBackend::new();
        let mut rng = StdRng::seed_from_u64(0);
        let t = Tensor::masked(
            Shape::new(vec![2, 3, 3]),
            DType::F32,
            &AttentionMask::UpperTriangular,
            &mut rng,
            &cpu,
        )
        .unwrap();
        let v = t.to_f32_vec();
        assert_eq!(v[1], f32::MIN);
        assert_eq!(v[9 + 3], 0.0);
    }

    #[test]
    fn test_release_checks_owner() {
        let cpu = CpuBackend::new();
        let tiled = TiledBackend::new();
        let t = Tensor::zeros(Shape::new(vec![4]), DType::F32, &cpu).unwrap();
        assert!(t.release(&tiled).is_err());
        let t = Tensor::zeros(Shape::new(vec![4]), DType::F32, &cpu).unwrap();
        assert!(t.release(&cpu).is_ok());
    }
}
