//! Commodity Technology Systems

use super::{Platform, SystemDefinition, SystemParams};
use crate::scheduler::{env_pair, EnvList};

pub(super) fn environment_variables() -> EnvList {
    vec![
        env_pair("MPICH_OFI_NIC_POLICY", "GPU"),
        env_pair("OMP_NUM_THREADS", "21"),
        env_pair("OMP_PLACES", "threads"),
        env_pair("OMP_PROC_BIND", "spread"),
    ]
}

fn node(cores: u32, arch: &str, mem_gb: f64, ratio: u32) -> SystemParams {
    SystemParams {
        cores_per_node: cores,
        gpus_per_node: 2,
        gpu_arch: arch.to_string(),
        mem_per_node_gb: mem_gb,
        gpu_to_cpu_ratio_hint: ratio,
        default_scheduler_name: "slurm".to_string(),
        gpu_mem_fraction_cap: 1.0,
    }
}

pub(super) fn definitions() -> Vec<(&'static str, SystemDefinition)> {
    let ipa = SystemDefinition::new(
        Platform::Cts2,
        "a100",
        [
            ("a100", node(32, "sm_80", 40.0, 1)),
            ("aa100", node(16, "sm_80", 40.0, 2)),
            ("av100", node(32, "sm_70", 32.0, 2)),
            ("v100", node(16, "sm_70", 32.0, 2)),
        ],
    );
    vec![("ipa", ipa)]
}
