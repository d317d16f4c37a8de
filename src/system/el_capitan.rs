//! El Capitan family (AMD MI250X / MI300A, HPE Slingshot)

use super::{Platform, SystemDefinition, SystemParams};
use crate::scheduler::{env_pair, EnvList, HostEnv, JobSpec, SchedulerKind};

fn prepend_library_path(env_list: &mut EnvList, dir: &str) {
    env_list.push(env_pair("LD_LIBRARY_PATH", format!("{}:${{LD_LIBRARY_PATH}}", dir)));
}

pub(super) fn environment_variables(host: &HostEnv) -> EnvList {
    let mut env_list = vec![
        // avoids hangs on Slingshot
        env_pair("NCCL_NET_GDR_LEVEL", "3"),
        env_pair("NCCL_MIN_NCHANNELS", "24"),
        env_pair("MIOPEN_DEBUG_DISABLE_FIND_DB", "0"),
        env_pair("MIOPEN_DISABLE_CACHE", "0"),
    ];

    let tmpdir = host.get_non_empty("TMPDIR").unwrap_or("/tmp");
    env_list.push(env_pair("MIOPEN_USER_DB_PATH", format!("{}/MIOpen_user_db", tmpdir)));
    env_list.push(env_pair(
        "MIOPEN_CUSTOM_CACHE_DIR",
        format!("{}/MIOpen_custom_cache", tmpdir),
    ));

    if let Some(cray) = host.get_non_empty("CRAY_LD_LIBRARY_PATH") {
        prepend_library_path(&mut env_list, cray);
    }
    if let Some(rocm) = host.get_non_empty("ROCM_PATH") {
        let llvm = format!("{}/llvm/lib", rocm.trim_end_matches('/'));
        prepend_library_path(&mut env_list, &llvm);
    }
    if let Some(plugin) = host.get_non_empty("LBANN_USE_THIS_OFI_PLUGIN") {
        prepend_library_path(&mut env_list, plugin);
    }

    env_list.extend([
        env_pair("OMP_NUM_THREADS", "21"),
        env_pair("OMP_PLACES", "threads"),
        env_pair("OMP_PROC_BIND", "spread"),
        // Cassini NIC rendezvous tuning
        env_pair("FI_CXI_RDZV_PROTO", "alt_read"),
        env_pair("FI_CXI_RDZV_THRESHOLD", "0"),
        env_pair("FI_CXI_RDZV_GET_MIN", "0"),
        env_pair("FI_CXI_RDZV_EAGER_SIZE", "0"),
        env_pair("NCCL_IGNORE_CPU_AFFINITY", "1"),
    ]);

    env_list
}

/// Forced flags go first, then the caller's flags that are not already present.
pub(super) fn customize_scheduler(kind: SchedulerKind, job: &JobSpec, host: &HostEnv) -> JobSpec {
    let mut flags = vec!["--exclusive".to_string()];
    if kind == SchedulerKind::Flux {
        flags.push("-ofastload".to_string());
        flags.push("--setattr=rdzv_get_en=0".to_string());
    }
    for flag in &job.launcher_flags {
        if !flags.contains(flag) {
            flags.push(flag.clone());
        }
    }

    let mut customized = job.clone();
    customized.launcher_flags = flags;
    if let Some(rccl) = host.get_non_empty("LBANN_USE_THIS_RCCL") {
        customized.ld_preloads = vec![rccl.to_string()];
    }
    customized
}

fn mi250x() -> SystemParams {
    SystemParams {
        cores_per_node: 64,
        gpus_per_node: 8,
        gpu_arch: "gfx90a".to_string(),
        mem_per_node_gb: 64.0,
        gpu_to_cpu_ratio_hint: 4,
        default_scheduler_name: "flux".to_string(),
        gpu_mem_fraction_cap: 1.0,
    }
}

// APUs share host memory; claiming all of it as GPU memory OOMs the node
fn mi300a() -> SystemParams {
    SystemParams {
        cores_per_node: 96,
        gpus_per_node: 4,
        gpu_arch: "gfx942".to_string(),
        mem_per_node_gb: 128.0,
        gpu_to_cpu_ratio_hint: 4,
        default_scheduler_name: "flux".to_string(),
        gpu_mem_fraction_cap: 0.8,
    }
}

pub(super) fn definitions() -> Vec<(&'static str, SystemDefinition)> {
    let mut defs = vec![(
        "tioga",
        SystemDefinition::new(
            Platform::ElCapitan,
            "pdebug",
            [("pdebug", mi250x()), ("mi300a", mi300a())],
        ),
    )];

    for name in ["tuolumne", "elcap", "rzadams", "tenaya"] {
        defs.push((
            name,
            SystemDefinition::new(
                Platform::ElCapitan,
                "pbatch",
                [("pbatch", mi300a()), ("pdebug", mi300a())],
            ),
        ));
    }
    defs
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(env: &EnvList) -> Vec<&str> {
        env.iter().map(|(k, _)| k.as_str()).collect()
    }

    #[test]
    fn test_tmpdir_derived_paths() {
        let env = environment_variables(&HostEnv::from_pairs([("TMPDIR", "/l/ssd")]));
        assert!(env.contains(&env_pair("MIOPEN_USER_DB_PATH", "/l/ssd/MIOpen_user_db")));
        assert!(env.contains(&env_pair("MIOPEN_CUSTOM_CACHE_DIR", "/l/ssd/MIOpen_custom_cache")));

        let env = environment_variables(&HostEnv::default());
        assert!(env.contains(&env_pair("MIOPEN_USER_DB_PATH", "/tmp/MIOpen_user_db")));
    }

    #[test]
    fn test_library_path_prefixes_in_order() {
        let host = HostEnv::from_pairs([
            ("CRAY_LD_LIBRARY_PATH", "/opt/cray/lib64"),
            ("ROCM_PATH", "/opt/rocm-6.2.1/"),
            ("LBANN_USE_THIS_OFI_PLUGIN", "/p/aws-ofi-rccl/lib"),
        ]);
        let env = environment_variables(&host);
        let paths: Vec<&str> = env
            .iter()
            .filter(|(k, _)| k == "LD_LIBRARY_PATH")
            .map(|(_, v)| v.as_str())
            .collect();
        assert_eq!(
            paths,
            [
                "/opt/cray/lib64:${LD_LIBRARY_PATH}",
                "/opt/rocm-6.2.1/llvm/lib:${LD_LIBRARY_PATH}",
                "/p/aws-ofi-rccl/lib:${LD_LIBRARY_PATH}"
            ]
        );

        let env = environment_variables(&HostEnv::default());
        assert!(!keys(&env).contains(&"LD_LIBRARY_PATH"));
        assert_eq!(keys(&env).last(), Some(&"NCCL_IGNORE_CPU_AFFINITY"));
    }

    #[test]
    fn test_customize_slurm_and_flux() {
        let job = JobSpec {
            launcher_flags: vec!["--exclusive".into(), "--mpibind=off".into()],
            ..JobSpec::new(2, 4)
        };
        let host = HostEnv::default();

        let slurm = customize_scheduler(SchedulerKind::Slurm, &job, &host);
        assert_eq!(slurm.launcher_flags, ["--exclusive", "--mpibind=off"]);
        assert!(slurm.ld_preloads.is_empty());

        let flux = customize_scheduler(SchedulerKind::Flux, &job, &host);
        assert_eq!(
            flux.launcher_flags,
            ["--exclusive", "-ofastload", "--setattr=rdzv_get_en=0", "--mpibind=off"]
        );
        assert_eq!(customize_scheduler(SchedulerKind::Flux, &flux, &host), flux);
    }

    #[test]
    fn test_customize_rccl_preload() {
        let host = HostEnv::from_pairs([("LBANN_USE_THIS_RCCL", "/p/rccl/librccl.so")]);
        let job = JobSpec {
            ld_preloads: vec!["/lib/other.so".into()],
            ..JobSpec::new(1, 1)
        };
        let out = customize_scheduler(SchedulerKind::Slurm, &job, &host);
        assert_eq!(out.ld_preloads, ["/p/rccl/librccl.so"]);
    }

    #[test]
    fn test_definitions_are_valid() {
        let defs = definitions();
        assert_eq!(defs.len(), 5);
        for (name, def) in &defs {
            def.validate(name).unwrap();
        }
        assert_eq!(defs[0].1.partitions["mi300a"].gpu_mem_fraction_cap, 0.8);
    }
}
