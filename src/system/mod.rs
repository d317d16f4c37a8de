//! Compute platforms
//!
//! A [`System`] is a named platform resolved to one partition. It owns the
//! platform's environment policy, the caller's auxiliary and pass-through
//! variables, and the hook that adjusts a job before it is rendered.
//!
//! Platform behavior is a closed set ([`Platform`]) dispatched by `match`;
//! the per-platform tuning lives in the `cts2`, `el_capitan`, `sierra` and
//! `generic` modules.

mod cts2;
mod el_capitan;
pub mod generic;
pub mod params;
pub mod registry;
mod sierra;

pub use params::SystemParams;
pub use registry::{system_name_from_hostname, SiteRegistry, SystemDefinition};

use crate::error::{LauncherError, Result};
use crate::scheduler::{env_pair, EnvList, HostEnv, JobSpec, SchedulerKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Variable read by the training shim to cap per-process GPU memory
pub const MAX_GPU_MEM_VAR: &str = "TORCHRUN_HPC_MAX_GPU_MEM";

/// Platform families with distinct tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Platform {
    /// Unknown host, capacities detected locally
    Generic,
    /// Commodity Technology Systems (Slurm, NVIDIA GPUs)
    Cts2,
    /// El Capitan family (Flux, AMD GPUs/APUs)
    ElCapitan,
    /// Sierra family (`srun` proxies to `lrun`)
    Sierra,
}

impl Platform {
    /// Get platform name
    pub fn name(&self) -> &'static str {
        match self {
            Platform::Generic => "generic",
            Platform::Cts2 => "cts2",
            Platform::ElCapitan => "el-capitan",
            Platform::Sierra => "sierra",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A platform resolved to one partition
#[derive(Debug, Clone)]
pub struct System {
    name: String,
    platform: Platform,
    partitions: BTreeMap<String, SystemParams>,
    default_partition: String,
    partition: String,
    aux_env: EnvList,
    task_env: EnvList,
    passthrough_names: Vec<String>,
    host_env: HostEnv,
}

impl System {
    /// Resolve `definition` to `partition`, or to its default partition
    pub fn new(
        name: impl Into<String>,
        definition: &SystemDefinition,
        partition: Option<&str>,
        host_env: HostEnv,
    ) -> Result<Self> {
        let name = name.into();
        definition.validate(&name)?;

        let partition = partition.unwrap_or(&definition.default_partition).to_string();
        if !definition.partitions.contains_key(&partition) {
            return Err(LauncherError::UnknownPartition {
                system: name,
                partition,
            });
        }

        Ok(Self {
            name,
            platform: definition.platform,
            partitions: definition.partitions.clone(),
            default_partition: definition.default_partition.clone(),
            partition,
            aux_env: Vec::new(),
            task_env: Vec::new(),
            passthrough_names: Vec::new(),
            host_env,
        })
    }

    /// A system with exactly one partition
    pub fn single_partition(
        name: impl Into<String>,
        platform: Platform,
        partition: impl Into<String>,
        params: SystemParams,
        host_env: HostEnv,
    ) -> Self {
        let partition = partition.into();
        let mut partitions = BTreeMap::new();
        partitions.insert(partition.clone(), params);
        Self {
            name: name.into(),
            platform,
            partitions,
            default_partition: partition.clone(),
            partition,
            aux_env: Vec::new(),
            task_env: Vec::new(),
            passthrough_names: Vec::new(),
            host_env,
        }
    }

    /// Fallback for hosts missing from the registry
    pub fn generic(name: impl Into<String>, host_env: HostEnv) -> Self {
        let params = generic::detect_params(&host_env);
        Self::single_partition(name, Platform::Generic, generic::PARTITION, params, host_env)
    }

    /// System name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Platform family
    pub fn platform(&self) -> Platform {
        self.platform
    }

    /// Selected partition
    pub fn partition(&self) -> &str {
        &self.partition
    }

    /// Default partition of the platform
    pub fn default_partition(&self) -> &str {
        &self.default_partition
    }

    /// All partitions of the platform
    pub fn partitions(&self) -> &BTreeMap<String, SystemParams> {
        &self.partitions
    }

    /// Capacity of the selected partition
    pub fn params(&self) -> &SystemParams {
        // `new` and `single_partition` guarantee the key exists
        &self.partitions[&self.partition]
    }

    /// Environment of the submitting process
    pub fn host_env(&self) -> &HostEnv {
        &self.host_env
    }

    /// Append one auxiliary variable
    pub fn add_env(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.aux_env.push(env_pair(key, value));
    }

    /// Append auxiliary variables, emitted after the platform defaults
    pub fn extend_environment_variables(&mut self, vars: EnvList) {
        self.aux_env.extend(vars);
    }

    /// Append variables evaluated separately by every spawned task.
    ///
    /// These are rendered into the internal script rather than the launch
    /// script, so references such as `${SLURM_PROCID}` expand per task.
    pub fn extend_task_environment_variables(&mut self, vars: EnvList) {
        self.task_env.extend(vars);
    }

    /// Variables each spawned task sources before running
    pub fn task_environment_variables(&self) -> &EnvList {
        &self.task_env
    }

    /// Copy `name` from the submitting shell into the job
    pub fn add_passthrough(&mut self, name: impl Into<String>) {
        let name = name.into();
        if !self.passthrough_names.contains(&name) {
            self.passthrough_names.push(name);
        }
    }

    /// Platform defaults followed by the auxiliary list
    pub fn environment_variables(&self) -> EnvList {
        let mut env_list = match self.platform {
            Platform::Cts2 => cts2::environment_variables(),
            Platform::ElCapitan => el_capitan::environment_variables(&self.host_env),
            Platform::Sierra | Platform::Generic => EnvList::new(),
        };
        env_list.extend(self.aux_env.iter().cloned());
        env_list
    }

    /// Pass-through names paired with their value in the submitting shell.
    ///
    /// Names unset in the submitting shell are skipped.
    pub fn passthrough_environment_variables(&self) -> EnvList {
        self.passthrough_names
            .iter()
            .filter_map(|name| match self.host_env.get(name) {
                Some(value) => Some(env_pair(name.as_str(), value)),
                None => {
                    tracing::warn!("Pass-through variable {} is not set, skipping", name);
                    None
                }
            })
            .collect()
    }

    /// Job adjusted for this platform and scheduler family
    pub fn customize_scheduler(&self, kind: SchedulerKind, job: &JobSpec) -> JobSpec {
        match self.platform {
            Platform::ElCapitan => el_capitan::customize_scheduler(kind, job, &self.host_env),
            Platform::Cts2 | Platform::Sierra | Platform::Generic => job.clone(),
        }
    }

    /// Scheduler family used when the caller does not choose one
    pub fn preferred_scheduler(&self) -> SchedulerKind {
        match self.platform {
            Platform::Cts2 | Platform::Sierra => SchedulerKind::Slurm,
            Platform::ElCapitan => SchedulerKind::Flux,
            Platform::Generic => generic::preferred_scheduler(&self.host_env, self.params()),
        }
    }

    /// Whether the interactive launcher forwards to another tool
    pub fn interactive_launcher_is_proxy(&self) -> bool {
        matches!(self.platform, Platform::Sierra)
    }

    /// Prepare the environment of a distributed training launch.
    ///
    /// Rendezvous variables depend on the task they run in and go to the
    /// per-task list; the GPU memory cap is shared by the whole job.
    pub fn configure_torchrun(&mut self, kind: SchedulerKind, protocol: &str) -> Result<()> {
        let rendezvous = kind.dynamically_configure_rendezvous_protocol(protocol)?;
        self.extend_task_environment_variables(rendezvous);
        let cap = self.params().gpu_mem_fraction_cap.to_string();
        self.add_env(MAX_GPU_MEM_VAR, cap);
        Ok(())
    }
}

impl fmt::Display for System {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}, partition {})", self.name, self.platform, self.partition)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_partitions() -> SystemDefinition {
        let mut partitions = BTreeMap::new();
        partitions.insert(
            "pbatch".to_string(),
            SystemParams::new(96, 4, "gfx942", 128.0, 4, "flux")
                .and_then(|p| p.with_gpu_mem_fraction_cap(0.8))
                .unwrap(),
        );
        partitions.insert(
            "pdebug".to_string(),
            SystemParams::new(64, 8, "gfx90a", 64.0, 4, "flux").unwrap(),
        );
        SystemDefinition {
            platform: Platform::ElCapitan,
            default_partition: "pbatch".into(),
            partitions,
        }
    }

    #[test]
    fn test_partition_resolution() {
        let def = two_partitions();
        let sys = System::new("tuolumne", &def, None, HostEnv::default()).unwrap();
        assert_eq!(sys.partition(), "pbatch");
        assert_eq!(sys.params().cores_per_node, 96);

        let sys = System::new("tuolumne", &def, Some("pdebug"), HostEnv::default()).unwrap();
        assert_eq!(sys.params().gpu_arch, "gfx90a");

        let err = System::new("tuolumne", &def, Some("pgpu"), HostEnv::default()).unwrap_err();
        assert!(matches!(err, LauncherError::UnknownPartition { .. }));
    }

    #[test]
    fn test_aux_env_follows_platform_defaults() {
        let def = two_partitions();
        let mut sys = System::new("tuolumne", &def, None, HostEnv::default()).unwrap();
        sys.add_env("OMP_NUM_THREADS", "8");

        let env = sys.environment_variables();
        let first = env.iter().position(|(k, _)| k == "OMP_NUM_THREADS").unwrap();
        let last = env.iter().rposition(|(k, _)| k == "OMP_NUM_THREADS").unwrap();
        assert_eq!(env[first].1, "21");
        assert_eq!(env[last].1, "8");
        assert_eq!(last, env.len() - 1);
    }

    #[test]
    fn test_passthrough_reads_host_env() {
        let host = HostEnv::from_pairs([("HF_HOME", "/p/hf")]);
        let mut sys = System::single_partition(
            "box",
            Platform::Generic,
            "default",
            SystemParams::new(8, 0, "", 16.0, 1, "slurm").unwrap(),
            host,
        );
        sys.add_passthrough("HF_HOME");
        sys.add_passthrough("HF_HOME");
        sys.add_passthrough("NOT_SET_ANYWHERE");
        assert_eq!(sys.passthrough_environment_variables(), vec![env_pair("HF_HOME", "/p/hf")]);
    }

    #[test]
    fn test_preferred_scheduler() {
        let def = two_partitions();
        let sys = System::new("tuolumne", &def, None, HostEnv::default()).unwrap();
        assert_eq!(sys.preferred_scheduler(), SchedulerKind::Flux);
        assert!(!sys.interactive_launcher_is_proxy());

        let sierra = System::single_partition(
            "lassen",
            Platform::Sierra,
            "pbatch",
            SystemParams::new(44, 4, "sm_70", 256.0, 2, "slurm").unwrap(),
            HostEnv::default(),
        );
        assert_eq!(sierra.preferred_scheduler(), SchedulerKind::Slurm);
        assert!(sierra.interactive_launcher_is_proxy());
    }

    #[test]
    fn test_configure_torchrun() {
        let def = two_partitions();
        let mut sys = System::new("tuolumne", &def, None, HostEnv::default()).unwrap();
        sys.configure_torchrun(SchedulerKind::Flux, "mpi").unwrap();

        assert_eq!(
            sys.task_environment_variables(),
            &vec![env_pair("RANK", "${FLUX_TASK_RANK}")]
        );
        let env = sys.environment_variables();
        assert_eq!(env.last(), Some(&env_pair(MAX_GPU_MEM_VAR, "0.8")));
        assert!(!env.iter().any(|(k, _)| k == "RANK"));

        let mut sys = System::new("tuolumne", &def, None, HostEnv::default()).unwrap();
        assert!(sys.configure_torchrun(SchedulerKind::Slurm, "ucx").is_err());
        assert!(sys.task_environment_variables().is_empty());
    }

    #[test]
    fn test_generic_customize_is_identity() {
        let sys = System::generic("laptop", HostEnv::default());
        let job = JobSpec {
            launcher_flags: vec!["--mpi=pmix".into()],
            ..JobSpec::new(1, 2)
        };
        assert_eq!(sys.customize_scheduler(SchedulerKind::Slurm, &job), job);
        assert_eq!(sys.platform(), Platform::Generic);
    }
}
