use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use kb_tensor::{
    AttentionMask, AttentionOptions, AttentionParams, BFloat16, ComputeBackend, CpuBackend, DType,
    GemmOptions, GemmParams, Shape, Tensor, TiledBackend,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn hash_of(x: BFloat16) -> u64 {
    let mut h = DefaultHasher::new();
    x.hash(&mut h);
    h.finish()
}

#[test]
fn test_bf16_round_trip_within_one_ulp() {
    let mut rng = StdRng::seed_from_u64(2024);
    for _ in 0..50_000 {
        let x = f32::from_bits(rng.gen::<u32>());
        if !x.is_finite() || x.abs() > BFloat16::MAX.to_f32() {
            continue;
        }
        let narrowed = BFloat16::from_f32(x);
        let widened = narrowed.to_f32();
        let ulp = narrowed.ulp().to_f32();
        assert!((widened - x).abs() <= ulp, "{x} -> {widened}");
        assert_eq!(BFloat16::from_f32(widened).to_bits(), narrowed.to_bits());
    }
}

#[test]
fn test_bf16_signed_zero_identity() {
    let pos = BFloat16::from_f32(0.0);
    let neg = BFloat16::from_f32(-0.0);
    assert_eq!(pos, neg);
    assert_eq!(hash_of(pos), hash_of(neg));
}

#[test]
fn test_slice_scenario() {
    let cpu = CpuBackend::new();
    let mut source = Tensor::zeros(Shape::new(vec![3, 2, 4, 5]), DType::F32, &cpu).unwrap();
    let values: Vec<f32> = (0..120).map(|i| i as f32).collect();
    source.storage_mut().write_f32(&values);

    let slice = Tensor::slicing(&source, &[1, 0], 1, &cpu).unwrap();
    assert_eq!(slice.shape().dims(), &[4, 5]);
    // Row-major over the first two axes: (1 * 2 + 0) * 20.
    let offset = 40;
    assert_eq!(slice.to_f32_vec(), &values[offset..offset + 20]);
}

#[test]
fn test_mask_scenarios_every_kind() {
    let tiled = TiledBackend::new();
    let mut rng = StdRng::seed_from_u64(8);
    for dtype in DType::ALL {
        let causal = Tensor::masked(
            Shape::new(vec![2, 3, 6, 6]),
            dtype,
            &AttentionMask::UpperTriangular,
            &mut rng,
            &tiled,
        )
        .unwrap();
        let v = causal.to_f32_vec();
        for plane in v.chunks_exact(36) {
            for i in 0..6 {
                for j in 0..6 {
                    let x = plane[i * 6 + j];
                    if j <= i {
                        assert_eq!(x, 0.0);
                    } else {
                        assert!(x < -1.0e4 && x.is_finite());
                    }
                }
            }
        }

        let open = AttentionMask::BlockSparse {
            block_size: 4,
            sparsity: 1.0,
        };
        let t = Tensor::masked(Shape::new(vec![2, 8, 12]), dtype, &open, &mut rng, &tiled).unwrap();
        assert!(t.to_f32_vec().iter().all(|&x| x == 0.0));

        let closed = AttentionMask::BlockSparse {
            block_size: 4,
            sparsity: 0.0,
        };
        let t =
            Tensor::masked(Shape::new(vec![2, 8, 12]), dtype, &closed, &mut rng, &tiled).unwrap();
        assert!(t.to_f32_vec().iter().all(|&x| x < -1.0e4));
    }
}

#[test]
fn test_gemm_shape_symmetry() {
    for &(m, n, k) in &[(1, 2, 3), (64, 64, 64), (17, 5, 128)] {
        for flags in 0..4u8 {
            let options = GemmOptions {
                transpose_a: flags & 1 != 0,
                transpose_b: flags & 2 != 0,
                ..GemmOptions::default()
            };
            let (a, b, c, _) = GemmParams::physical_shapes(m, n, k, &options);
            let p = GemmParams::derive(DType::F16, &a, &b, &c, None, &options);
            assert_eq!((p.m, p.n, p.k), (m, n, k));
        }
    }
}

#[test]
fn test_gemm_agreement_64() {
    let mut reference = CpuBackend::new();
    let mut native = TiledBackend::new();
    let mut rng = StdRng::seed_from_u64(64);
    let shape = Shape::new(vec![64, 64]);
    let options = GemmOptions::default();

    let a = Tensor::random_uniform(shape.clone(), DType::F32, 0.0..1.0, &mut rng, &native).unwrap();
    let b = Tensor::random_uniform(shape.clone(), DType::F32, 0.0..1.0, &mut rng, &native).unwrap();
    let mut c = Tensor::zeros(shape.clone(), DType::F32, &native).unwrap();

    let ra = Tensor::copying(&a, &reference).unwrap();
    let rb = Tensor::copying(&b, &reference).unwrap();
    let mut rc = Tensor::zeros(shape, DType::F32, &reference).unwrap();

    native.mark_first_command();
    Tensor::matmul(&a, &b, &mut c, None, &options, &mut native).unwrap();
    native.mark_last_command();
    let native_time = native.synchronize().unwrap();

    reference.mark_first_command();
    Tensor::matmul(&ra, &rb, &mut rc, None, &options, &mut reference).unwrap();
    reference.mark_last_command();
    let reference_time = reference.synchronize().unwrap();

    let flops = 2.0 * 64.0 * 64.0 * 64.0;
    for time in [native_time, reference_time] {
        let throughput = flops / time;
        assert!(throughput.is_finite() && throughput > 0.0);
    }

    let expected = Tensor::copying(&rc, &native).unwrap();
    let distance = c.euclidean_distance(&expected).unwrap();
    let tolerance = 4096.0 * f64::max(0.002 * 32.0, 3e-7 * 8.0);
    assert!(distance < tolerance, "distance {distance}");
}

#[test]
fn test_attention_agreement_with_causal_mask() {
    let mut reference = CpuBackend::new();
    let mut native = TiledBackend::new();
    let mut rng = StdRng::seed_from_u64(3);
    let options = AttentionOptions::default();
    let (r, c, h, d) = (24, 24, 2, 8);
    let (qs, ks, vs, os) = AttentionParams::physical_shapes(r, c, h, d, &options);
    let q = Tensor::random_uniform(qs, DType::F16, -1.0..1.0, &mut rng, &native).unwrap();
    let k = Tensor::random_uniform(ks, DType::F16, -1.0..1.0, &mut rng, &native).unwrap();
    let v = Tensor::random_uniform(vs, DType::F16, -1.0..1.0, &mut rng, &native).unwrap();
    let mask = Tensor::masked(
        Shape::new(vec![1, r, c]),
        DType::F16,
        &AttentionMask::UpperTriangular,
        &mut rng,
        &native,
    )
    .unwrap();
    let mut o = Tensor::zeros(os.clone(), DType::F16, &native).unwrap();
    Tensor::attention(&q, &k, &v, &mut o, Some(&mask), &options, &mut native).unwrap();

    let copies: Vec<Tensor> = [&q, &k, &v, &mask]
        .iter()
        .map(|t| Tensor::copying(t, &reference).unwrap())
        .collect();
    let mut ro = Tensor::zeros(os, DType::F16, &reference).unwrap();
    Tensor::attention(
        &copies[0],
        &copies[1],
        &copies[2],
        &mut ro,
        Some(&copies[3]),
        &options,
        &mut reference,
    )
    .unwrap();

    assert!(!o.has_nan());
    let expected = Tensor::copying(&ro, &native).unwrap();
    let distance = o.euclidean_distance(&expected).unwrap();
    let tolerance = (r * h * d) as f64 * f64::max(0.02 * 1.0, 1e-2 * 0.2);
    assert!(distance < tolerance, "distance {distance}");
}
