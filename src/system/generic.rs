//! Locally detected platform for hosts missing from the registry

use super::SystemParams;
use crate::scheduler::topology::FLUX_URI;
use crate::scheduler::{HostEnv, SchedulerKind};

/// Partition name used for detected systems
pub const PARTITION: &str = "default";

const GPU_VISIBILITY_VARS: [&str; 3] = [
    "CUDA_VISIBLE_DEVICES",
    "ROCR_VISIBLE_DEVICES",
    "HIP_VISIBLE_DEVICES",
];

/// Count GPUs listed in the first non-empty visibility variable
pub fn visible_gpu_count(host: &HostEnv) -> u32 {
    GPU_VISIBILITY_VARS
        .iter()
        .find_map(|var| host.get_non_empty(var))
        .map(|list| list.split(',').filter(|id| !id.trim().is_empty()).count() as u32)
        .unwrap_or(0)
}

/// Capacity of the local node
pub fn detect_params(host: &HostEnv) -> SystemParams {
    let mut sys = sysinfo::System::new();
    sys.refresh_memory();
    let mem_gb = sys.total_memory() as f64 / (1024.0 * 1024.0 * 1024.0);

    let scheduler = if host.is_set(FLUX_URI) {
        SchedulerKind::Flux
    } else {
        SchedulerKind::Slurm
    };

    let params = SystemParams {
        cores_per_node: num_cpus::get().max(1) as u32,
        gpus_per_node: visible_gpu_count(host),
        gpu_arch: String::new(),
        mem_per_node_gb: mem_gb,
        gpu_to_cpu_ratio_hint: 1,
        default_scheduler_name: scheduler.name().to_string(),
        gpu_mem_fraction_cap: 1.0,
    };
    tracing::debug!(
        "Detected {} cores, {} GPUs, {:.1} GB",
        params.cores_per_node,
        params.gpus_per_node,
        params.mem_per_node_gb
    );
    params
}

/// Flux inside a Flux instance, otherwise the partition's hint
pub fn preferred_scheduler(host: &HostEnv, params: &SystemParams) -> SchedulerKind {
    if host.is_set(FLUX_URI) {
        return SchedulerKind::Flux;
    }
    params.scheduler_hint().unwrap_or(SchedulerKind::Slurm)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_visible_gpu_count() {
        assert_eq!(visible_gpu_count(&HostEnv::default()), 0);
        assert_eq!(
            visible_gpu_count(&HostEnv::from_pairs([("CUDA_VISIBLE_DEVICES", "0,1,2,3")])),
            4
        );
        assert_eq!(
            visible_gpu_count(&HostEnv::from_pairs([
                ("CUDA_VISIBLE_DEVICES", ""),
                ("ROCR_VISIBLE_DEVICES", "0,1")
            ])),
            2
        );
    }

    #[test]
    fn test_detect_params() {
        let params = detect_params(&HostEnv::default());
        assert!(params.cores_per_node > 0);
        assert!(params.validate().is_ok());
        assert_eq!(params.scheduler_hint(), Some(SchedulerKind::Slurm));
    }

    #[test]
    fn test_preferred_scheduler() {
        let params = detect_params(&HostEnv::default());
        assert_eq!(preferred_scheduler(&HostEnv::default(), &params), SchedulerKind::Slurm);

        let flux = HostEnv::from_pairs([(FLUX_URI, "local:///run/flux")]);
        assert_eq!(preferred_scheduler(&flux, &params), SchedulerKind::Flux);
    }
}
