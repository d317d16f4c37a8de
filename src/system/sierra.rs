//! Sierra family (IBM Power9 + NVIDIA V100)
//!
//! `srun` on these machines is a wrapper around `lrun`, which rejects
//! several native Slurm flags; see `System::interactive_launcher_is_proxy`.

use super::{Platform, SystemDefinition, SystemParams};

pub(super) fn definitions() -> Vec<(&'static str, SystemDefinition)> {
    let node = SystemParams {
        cores_per_node: 44,
        gpus_per_node: 4,
        gpu_arch: "sm_70".to_string(),
        mem_per_node_gb: 256.0,
        gpu_to_cpu_ratio_hint: 2,
        default_scheduler_name: "slurm".to_string(),
        gpu_mem_fraction_cap: 1.0,
    };

    ["lassen", "rzansel"]
        .into_iter()
        .map(|name| {
            let def = SystemDefinition::new(
                Platform::Sierra,
                "pbatch",
                [("pbatch", node.clone()), ("pdebug", node.clone())],
            );
            (name, def)
        })
        .collect()
}
