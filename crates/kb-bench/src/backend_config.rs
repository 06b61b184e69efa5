//! Named backend configurations and the scope that applies them.

use std::fmt;
use std::ops::{Deref, DerefMut};

use kb_tensor::{
    BackendKind, ComputeBackend, CpuBackend, DType, TiledBackend, PARAM_K_SIMD, PARAM_M_SIMD,
    PARAM_N_SIMD,
};

use crate::error::Result;

/// The backends a benchmark run can use. Passed explicitly; there is no
/// process-wide default.
#[derive(Debug)]
pub struct ExecutionContext {
    native: Box<dyn ComputeBackend>,
    reference: Box<dyn ComputeBackend>,
}

impl ExecutionContext {
    pub fn new(native: Box<dyn ComputeBackend>, reference: Box<dyn ComputeBackend>) -> Self {
        ExecutionContext { native, reference }
    }

    pub fn native(&self) -> &dyn ComputeBackend {
        self.native.as_ref()
    }

    pub fn native_mut(&mut self) -> &mut dyn ComputeBackend {
        self.native.as_mut()
    }

    pub fn reference(&self) -> &dyn ComputeBackend {
        self.reference.as_ref()
    }

    pub fn reference_mut(&mut self) -> &mut dyn ComputeBackend {
        self.reference.as_mut()
    }

    /// Both backends at once, native first.
    pub fn split_mut(&mut self) -> (&mut dyn ComputeBackend, &mut dyn ComputeBackend) {
        (self.native.as_mut(), self.reference.as_mut())
    }
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new(Box::new(TiledBackend::new()), Box::new(CpuBackend::new()))
    }
}

/// One benchmarked configuration: a backend plus its tile settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendConfig {
    /// Native backend with 48×48 output tiles.
    Tiled48x48,
    /// Native backend at its default 32×32 output tiles.
    Tiled32x32,
    /// The reference backend.
    Reference,
}

impl BackendConfig {
    /// Run order, fastest at large sizes first.
    pub const ALL: [BackendConfig; 3] = [
        BackendConfig::Tiled48x48,
        BackendConfig::Tiled32x32,
        BackendConfig::Reference,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            BackendConfig::Tiled48x48 => "Tiled 48x48",
            BackendConfig::Tiled32x32 => "Tiled 32x32",
            BackendConfig::Reference => "Reference",
        }
    }

    /// Plot style tag for the charting front end.
    pub fn style(&self) -> &'static str {
        match self {
            BackendConfig::Tiled48x48 => "-g",
            BackendConfig::Tiled32x32 => "-b",
            BackendConfig::Reference => "-r",
        }
    }

    pub fn backend_kind(&self) -> BackendKind {
        match self {
            BackendConfig::Reference => BackendKind::Reference,
            _ => BackendKind::Tiled,
        }
    }

    /// Tile parameters this configuration sets on the native backend.
    pub fn tile_parameters(&self, dtype: DType) -> Vec<(&'static str, u16)> {
        match self {
            BackendConfig::Tiled48x48 => {
                let k_simd = if dtype == DType::F32 { 24 } else { 32 };
                vec![(PARAM_M_SIMD, 24), (PARAM_N_SIMD, 24), (PARAM_K_SIMD, k_simd)]
            }
            BackendConfig::Tiled32x32 | BackendConfig::Reference => Vec::new(),
        }
    }

    /// Apply this configuration to `ctx` for the lifetime of the returned
    /// guard. The native backend's parameters are reset when the guard
    /// drops, including on early return.
    pub fn apply(self, ctx: &mut ExecutionContext, dtype: DType) -> Result<ConfigGuard<'_>> {
        tracing::debug!(config = self.name(), %dtype, "prepare backend configuration");
        ctx.native_mut().reset_parameters();
        let guard = ConfigGuard { ctx, config: self };
        let native = guard.ctx.native.as_mut();
        for (name, value) in self.tile_parameters(dtype) {
            native.set_parameter(name, value)?;
        }
        Ok(guard)
    }

    /// Backend the configuration dispatches to.
    pub fn backend<'a>(&self, ctx: &'a mut ExecutionContext) -> &'a mut dyn ComputeBackend {
        match self.backend_kind() {
            BackendKind::Reference => ctx.reference_mut(),
            BackendKind::Tiled => ctx.native_mut(),
        }
    }
}

impl fmt::Display for BackendConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Scope during which a [`BackendConfig`] is in effect.
#[derive(Debug)]
pub struct ConfigGuard<'a> {
    ctx: &'a mut ExecutionContext,
    config: BackendConfig,
}

impl<'a> ConfigGuard<'a> {
    pub fn config(&self) -> BackendConfig {
        self.config
    }
}

impl<'a> Deref for ConfigGuard<'a> {
    type Target = ExecutionContext;

    fn deref(&self) -> &ExecutionContext {
        self.ctx
    }
}

impl<'a> DerefMut for ConfigGuard<'a> {
    fn deref_mut(&mut self) -> &mut ExecutionContext {
        self.ctx
    }
}

impl<'a> Drop for ConfigGuard<'a> {
    fn drop(&mut self) {
        self.ctx.native_mut().reset_parameters();
        tracing::debug!(config = self.config.name(), "cleanup backend configuration");
    }
}
