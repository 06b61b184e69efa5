//! Benchmark plans: size segments and per-operation options.

use std::ops::Range;

use kb_tensor::{AttentionMask, DType};

use crate::error::{BenchError, Result};

/// A contiguous run of problem sizes sharing iteration and trial settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentConfig {
    pub sizes: Range<usize>,
    /// Back-to-back dispatches inside one timing bracket.
    pub iterations: usize,
    /// Overrides the run's granularity for this segment.
    pub granularity: Option<usize>,
    /// Overrides the run's trials extension for this segment.
    pub trials_extension: Option<usize>,
}

impl SegmentConfig {
    pub fn new(sizes: Range<usize>, iterations: usize) -> Self {
        SegmentConfig {
            sizes,
            iterations,
            granularity: None,
            trials_extension: None,
        }
    }

    pub fn with_granularity(mut self, granularity: usize) -> Self {
        self.granularity = Some(granularity);
        self
    }

    pub fn with_trials_extension(mut self, trials_extension: usize) -> Self {
        self.trials_extension = Some(trials_extension);
        self
    }
}

/// Options for a square-matrix GEMM sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GemmBenchOptions {
    pub granularity: usize,
    pub trials_extension: usize,
    /// Timing brackets per size before the trials extension is applied.
    pub trials: usize,
    pub a_trans: bool,
    pub b_trans: bool,
    pub d_trans: bool,
    pub batch_size: Option<usize>,
    pub use_bias: bool,
    /// Sweep the large-matrix plan instead of the standard one.
    pub large: bool,
    pub seed: u64,
}

impl Default for GemmBenchOptions {
    fn default() -> Self {
        GemmBenchOptions {
            granularity: 8,
            trials_extension: 2,
            trials: 3,
            a_trans: false,
            b_trans: false,
            d_trans: false,
            batch_size: None,
            use_bias: false,
            large: false,
            seed: 0,
        }
    }
}

/// Options for a self-attention sweep where `R = C = size`.
#[derive(Debug, Clone, PartialEq)]
pub struct AttentionBenchOptions {
    pub granularity: usize,
    pub trials_extension: usize,
    pub trials: usize,
    pub heads: usize,
    pub head_dim: usize,
    pub q_trans: bool,
    pub k_trans: bool,
    pub v_trans: bool,
    pub o_trans: bool,
    pub batch_size: Option<usize>,
    pub mask: Option<AttentionMask>,
    pub seed: u64,
}

impl Default for AttentionBenchOptions {
    fn default() -> Self {
        AttentionBenchOptions {
            granularity: 8,
            trials_extension: 2,
            trials: 3,
            heads: 8,
            head_dim: 64,
            q_trans: false,
            k_trans: true,
            v_trans: false,
            o_trans: false,
            batch_size: None,
            mask: None,
            seed: 0,
        }
    }
}

/// Segment plan for a GEMM sweep.
///
/// The standard plan covers `1..2049` (`1..1537` for f32 or batched runs,
/// which saturate memory earlier). The large plan starts at 1536 or 2048 and
/// runs to 5120 with coarser per-segment granularity.
pub fn gemm_segments(
    dtype: DType,
    batch_size: Option<usize>,
    large: bool,
    trials_extension: usize,
) -> Vec<SegmentConfig> {
    let short_plan = dtype == DType::F32 || batch_size.unwrap_or(1) > 1;
    if large {
        let first = if short_plan { 1536..3072 } else { 2048..3072 };
        return vec![
            SegmentConfig::new(first, 2)
                .with_granularity(64)
                .with_trials_extension(trials_extension),
            SegmentConfig::new(3072..4096, 2)
                .with_granularity(128)
                .with_trials_extension(trials_extension),
            SegmentConfig::new(4096..5121, 2)
                .with_granularity(256)
                .with_trials_extension(trials_extension),
        ];
    }
    let mut segments = vec![
        SegmentConfig::new(1..64, 256),
        SegmentConfig::new(64..128, 256),
        SegmentConfig::new(128..192, 256),
        SegmentConfig::new(192..256, 128),
        SegmentConfig::new(256..384, 64),
        SegmentConfig::new(384..512, 32),
        SegmentConfig::new(512..768, 16),
        SegmentConfig::new(768..1024, 8),
    ];
    if short_plan {
        segments.push(SegmentConfig::new(1024..1537, 4));
    } else {
        segments.push(SegmentConfig::new(1024..1536, 4));
        segments.push(SegmentConfig::new(1536..2049, 2));
    }
    segments
}

/// Segment plan for an attention sweep over sequence lengths `1..1025`.
pub fn attention_segments() -> Vec<SegmentConfig> {
    vec![
        SegmentConfig::new(1..64, 64),
        SegmentConfig::new(64..128, 32),
        SegmentConfig::new(128..256, 16),
        SegmentConfig::new(256..512, 8),
        SegmentConfig::new(512..1025, 4),
    ]
}

/// Checks that `segments` are non-empty, ascending, and leave no gaps.
pub fn validate_contiguous(segments: &[SegmentConfig]) -> Result<()> {
    let first = segments
        .first()
        .ok_or_else(|| BenchError::InvalidSegment("plan has no segments".to_string()))?;
    let mut expected = first.sizes.start;
    for segment in segments {
        if segment.sizes.is_empty() {
            return Err(BenchError::InvalidSegment(format!(
                "segment {:?} is empty",
                segment.sizes
            )));
        }
        if segment.iterations == 0 {
            return Err(BenchError::InvalidSegment(format!(
                "segment {:?} has zero iterations",
                segment.sizes
            )));
        }
        if segment.sizes.start != expected {
            return Err(BenchError::InvalidSegment(format!(
                "segment {:?} does not start at {}",
                segment.sizes, expected
            )));
        }
        expected = segment.sizes.end;
    }
    Ok(())
}

pub fn validate_granularity(granularity: usize) -> Result<()> {
    if granularity.is_power_of_two() {
        Ok(())
    } else {
        Err(BenchError::InvalidGranularity(granularity))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_plans_are_contiguous() {
        for dtype in DType::ALL {
            for batch in [None, Some(1), Some(2)] {
                let plan = gemm_segments(dtype, batch, false, 2);
                validate_contiguous(&plan).unwrap();
                assert_eq!(plan[0].sizes.start, 1);
            }
        }
        validate_contiguous(&attention_segments()).unwrap();
    }

    #[test]
    fn test_plan_upper_bounds() {
        let last = |plan: Vec<SegmentConfig>| plan.last().unwrap().sizes.end;
        assert_eq!(last(gemm_segments(DType::F32, None, false, 2)), 1537);
        assert_eq!(last(gemm_segments(DType::F16, None, false, 2)), 2049);
        assert_eq!(last(gemm_segments(DType::BF16, Some(4), false, 2)), 1537);
        assert_eq!(last(attention_segments()), 1025);
    }

    #[test]
    fn test_large_plan() {
        let plan = gemm_segments(DType::F16, None, true, 5);
        validate_contiguous(&plan).unwrap();
        assert_eq!(plan[0].sizes, 2048..3072);
        assert_eq!(plan[2].granularity, Some(256));
        assert!(plan.iter().all(|s| s.trials_extension == Some(5)));
        let plan = gemm_segments(DType::F32, None, true, 1);
        assert_eq!(plan[0].sizes.start, 1536);
    }

    #[test]
    fn test_validate_contiguous_rejects_gap() {
        let plan = vec![SegmentConfig::new(1..10, 4), SegmentConfig::new(11..20, 4)];
        assert!(matches!(
            validate_contiguous(&plan),
            Err(BenchError::InvalidSegment(_))
        ));
        assert!(validate_contiguous(&[]).is_err());
        assert!(validate_contiguous(&[SegmentConfig::new(4..4, 1)]).is_err());
    }

    #[test]
    fn test_granularity_power_of_two() {
        for g in [1, 2, 8, 256] {
            assert!(validate_granularity(g).is_ok());
        }
        for g in [0, 3, 12] {
            assert!(matches!(
                validate_granularity(g),
                Err(BenchError::InvalidGranularity(_))
            ));
        }
    }
}
