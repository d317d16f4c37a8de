//! Static capacity of one hardware partition

use crate::error::{LauncherError, Result};
use crate::scheduler::SchedulerKind;
use serde::{Deserialize, Serialize};

fn default_mem_fraction() -> f64 {
    1.0
}

/// Per-node capacity of a partition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemParams {
    /// CPU cores per node
    pub cores_per_node: u32,
    /// GPUs per node
    pub gpus_per_node: u32,
    /// GPU architecture tag (e.g. `sm_80`, `gfx942`)
    #[serde(default)]
    pub gpu_arch: String,
    /// Memory per node in GB
    pub mem_per_node_gb: f64,
    /// Suggested GPUs per CPU socket
    #[serde(default = "default_gpu_ratio")]
    pub gpu_to_cpu_ratio_hint: u32,
    /// Scheduler this partition is normally driven by
    pub default_scheduler_name: String,
    /// Fraction of GPU memory a process may claim
    #[serde(default = "default_mem_fraction")]
    pub gpu_mem_fraction_cap: f64,
}

fn default_gpu_ratio() -> u32 {
    1
}

impl SystemParams {
    /// Create and validate partition parameters
    pub fn new(
        cores_per_node: u32,
        gpus_per_node: u32,
        gpu_arch: impl Into<String>,
        mem_per_node_gb: f64,
        gpu_to_cpu_ratio_hint: u32,
        default_scheduler_name: impl Into<String>,
    ) -> Result<Self> {
        let params = Self {
            cores_per_node,
            gpus_per_node,
            gpu_arch: gpu_arch.into(),
            mem_per_node_gb,
            gpu_to_cpu_ratio_hint,
            default_scheduler_name: default_scheduler_name.into(),
            gpu_mem_fraction_cap: default_mem_fraction(),
        };
        params.validate()?;
        Ok(params)
    }

    /// Cap the fraction of GPU memory each process may use
    pub fn with_gpu_mem_fraction_cap(mut self, cap: f64) -> Result<Self> {
        self.gpu_mem_fraction_cap = cap;
        self.validate()?;
        Ok(self)
    }

    /// Check invariants, e.g. after deserializing
    pub fn validate(&self) -> Result<()> {
        if self.cores_per_node == 0 {
            return Err(LauncherError::InvalidSystemParams(
                "cores_per_node must be positive".into(),
            ));
        }
        if !self.mem_per_node_gb.is_finite() || self.mem_per_node_gb < 0.0 {
            return Err(LauncherError::InvalidSystemParams(format!(
                "invalid mem_per_node_gb {}",
                self.mem_per_node_gb
            )));
        }
        if !(self.gpu_mem_fraction_cap > 0.0 && self.gpu_mem_fraction_cap <= 1.0) {
            return Err(LauncherError::InvalidSystemParams(format!(
                "gpu_mem_fraction_cap must be in (0, 1], got {}",
                self.gpu_mem_fraction_cap
            )));
        }
        Ok(())
    }

    /// Scheduler hint, if it names a supported family
    pub fn scheduler_hint(&self) -> Option<SchedulerKind> {
        self.default_scheduler_name.parse().ok()
    }

    /// Whether nodes of this partition carry GPUs
    pub fn has_gpus(&self) -> bool {
        self.gpus_per_node > 0
    }
}
