//! Native backend with tunable tile sizes.
//!
//! GEMM output tiles are `2·M_simd × 2·N_simd` and walk K in steps of
//! `K_simd`; attention streams key columns in blocks of `K_simd`. The three
//! constants are named parameters so a benchmark configuration can set them
//! for a run and reset them afterwards.

use crate::backend::{BackendKind, ComputeBackend, Operation};
use crate::cpu::attention::attention_online;
use crate::cpu::matmul::{gemm_tiled, GemmBlocks};
use crate::cpu::CommandTimer;
use crate::error::{Result, TensorError};

pub const PARAM_M_SIMD: &str = "M_simd";
pub const PARAM_N_SIMD: &str = "N_simd";
pub const PARAM_K_SIMD: &str = "K_simd";

/// Tile constants used by [`TiledBackend`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileConfig {
    pub m_simd: u16,
    pub n_simd: u16,
    pub k_simd: u16,
}

impl Default for TileConfig {
    fn default() -> Self {
        TileConfig {
            m_simd: 16,
            n_simd: 16,
            k_simd: 32,
        }
    }
}

impl TileConfig {
    fn gemm_blocks(&self) -> GemmBlocks {
        GemmBlocks {
            m: 2 * usize::from(self.m_simd),
            n: 2 * usize::from(self.n_simd),
            k: usize::from(self.k_simd),
        }
    }
}

/// The native backend: blocked GEMM and online-softmax attention.
#[derive(Debug, Clone, Default)]
pub struct TiledBackend {
    tiles: TileConfig,
    timer: CommandTimer,
}

impl TiledBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tiles(&self) -> TileConfig {
        self.tiles
    }
}

impl ComputeBackend for TiledBackend {
    fn name(&self) -> &str {
        "tiled"
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Tiled
    }

    fn dispatch(&mut self, op: Operation<'_>) -> Result<()> {
        match op {
            Operation::Gemm { params, operands } => {
                let a = operands.a.to_f32_vec();
                let b = operands.b.to_f32_vec();
                let d = operands.d.map(|d| d.to_f32_vec());
                let c = gemm_tiled(params, &a, &b, d.as_deref(), self.tiles.gemm_blocks());
                operands.c.write_f32(&c);
            }
            Operation::Attention { params, operands } => {
                let q = operands.q.to_f32_vec();
                let k = operands.k.to_f32_vec();
                let v = operands.v.to_f32_vec();
                let mask = operands.mask.map(|m| m.to_f32_vec());
                let block_c = usize::from(self.tiles.k_simd);
                let o = attention_online(params, &q, &k, &v, mask.as_deref(), block_c);
                operands.o.write_f32(&o);
            }
        }
        Ok(())
    }

    fn mark_first_command(&mut self) {
        self.timer.mark_first();
    }

    fn mark_last_command(&mut self) {
        self.timer.mark_last();
    }

    fn synchronize(&mut self) -> Result<f64> {
        self.timer.elapsed()
    }

    fn set_parameter(&mut self, name: &str, value: u16) -> Result<()> {
        if value == 0 {
            return Err(TensorError::Other(format!(
                "parameter '{}' must be positive",
                name
            )));
        }
        let slot = match name {
            PARAM_M_SIMD => &mut self.tiles.m_simd,
            PARAM_N_SIMD => &mut self.tiles.n_simd,
            PARAM_K_SIMD => &mut self.tiles.k_simd,
            _ => return Err(TensorError::UnknownParameter(name.to_string())),
        };
        *slot = value;
        tracing::debug!(parameter = name, value, "tile parameter set");
        Ok(())
    }

    fn parameter(&self, name: &str) -> Option<u16> {
        match name {
            PARAM_M_SIMD => Some(self.tiles.m_simd),
            PARAM_N_SIMD => Some(self.tiles.n_simd),
            PARAM_K_SIMD => Some(self.tiles.k_simd),
            _ => None,
        }
    }

    fn reset_parameters(&mut self) {
        self.tiles = TileConfig::default();
        tracing::debug!("tile parameters reset");
    }
}
