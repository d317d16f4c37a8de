//! Slurm Workload Manager renderer
//!
//! Blocking launches run `srun` directly. Batch launches write `#SBATCH`
//! directives to reserve the allocation and call `srun` inside it.

use super::env::{env_pair, export_line, literal_export_line, EnvList, HostEnv};
use super::job::JobSpec;
use super::runner::CommandRunner;
use super::script::ScriptBuilder;
use super::topology::{
    allocation_nodes, required_u32, ParallelConfig, RendezvousProtocol, MASTER_ADDR_VAR,
    MASTER_PORT, MASTER_PORT_VAR,
};
use super::{
    absolute_path, hostlist_stanza, launch_line, Scheduler, SchedulerKind, ScriptOptions,
};
use crate::error::Result;
use crate::system::System;

/// Prefix of the line `sbatch` prints on success
pub const SUBMIT_ACK: &str = "Submitted batch job";

const DIRECTIVE: &str = "#SBATCH";
const NODELIST_VAR: &str = "SLURM_JOB_NODELIST";

/// Format a time limit in minutes as Slurm's `D-HH:MM:SS`.
///
/// Negative limits clamp to zero; fractional minutes round to the
/// nearest second.
pub fn time_string(minutes: f64) -> String {
    let total = (minutes.max(0.0) * 60.0).round() as u64;
    let days = total / 86400;
    let hours = (total % 86400) / 3600;
    let mins = (total % 3600) / 60;
    let secs = total % 60;
    format!("{}-{:02}:{:02}:{:02}", days, hours, mins, secs)
}

/// Slurm-family scheduler
#[derive(Debug, Clone, PartialEq)]
pub struct SlurmScheduler {
    /// Job being rendered
    pub job: JobSpec,
}

impl SlurmScheduler {
    /// Create a Slurm scheduler for `job`
    pub fn new(job: JobSpec) -> Self {
        Self { job }
    }

    /// Build the batch header and the `srun`/`sbatch` arguments in one pass
    pub fn build_command_string_and_batch_script(
        &self,
        system: &System,
        blocking: bool,
    ) -> (String, Vec<String>) {
        let job = system.customize_scheduler(SchedulerKind::Slurm, &self.job);
        let env_vars = system.environment_variables();
        let passthrough = system.passthrough_environment_variables();

        tracing::debug!(
            "Rendering slurm job on {} (blocking={}, tasks={})",
            system.name(),
            blocking,
            job.total_tasks()
        );

        let mut b = ScriptBuilder::new(DIRECTIVE);

        if !blocking {
            if let Some(ref out) = job.out_log_file {
                b.directive(&format!("--output={}", out));
            }
            if let Some(ref err) = job.err_log_file {
                b.directive(&format!("--error={}", err));
            }
        }

        // Proxy launchers (srun -> lrun) do not understand -u
        if blocking && !system.interactive_launcher_is_proxy() {
            b.arg("-u");
        }

        b.both(format!("--nodes={}", job.nodes), blocking);
        b.both(format!("--ntasks={}", job.total_tasks()), blocking);
        b.both(format!("--ntasks-per-node={}", job.procs_per_node), blocking);

        if job.gpus_per_proc > 0 {
            b.both(format!("--gpus-per-task={}", job.gpus_per_proc), blocking);
        }

        if let Some(ref dir) = job.work_dir {
            let flag = format!("--chdir={}", absolute_path(dir).display());
            b.select_interactive_or_batch(&[flag], blocking);
        }

        if !job.ld_preloads.is_empty() {
            let flag = format!("--export=ALL,LD_PRELOAD={}", job.ld_preloads.join(":"));
            b.select_interactive_or_batch(&[flag], blocking);
        }

        if let Some(limit) = job.time_limit {
            let flag = format!("--time={}", time_string(limit));
            b.select_interactive_or_batch(&[flag], blocking);
        }

        if let Some(ref name) = job.job_name {
            b.select_interactive_or_batch(&[format!("--job-name={}", name)], blocking);
        }

        if let Some(ref queue) = job.queue {
            b.select_interactive_or_batch(&[format!("--partition={}", queue)], blocking);
        }

        if let Some(ref account) = job.account {
            b.select_interactive_or_batch(&[format!("--account={}", account)], blocking);
        }

        if let Some(ref reservation) = job.reservation {
            b.select_interactive_or_batch(&[format!("--reservation={}", reservation)], blocking);
        }

        // Launcher semantics only, never submission directives
        for flag in &job.launcher_flags {
            b.arg(flag.clone());
        }

        for (key, value) in &env_vars {
            b.header_line(&export_line(key, value));
        }

        // Pass-through values are literals from the submitting shell.
        // `--export` splits on commas, so such values are exported by the
        // script instead and inherited through ALL.
        let mut assignments = Vec::new();
        for (key, value) in &passthrough {
            if blocking || value.contains(',') {
                b.header_line(&literal_export_line(key, value));
            } else {
                assignments.push(format!("{}={}", key, value));
            }
        }
        if !assignments.is_empty() {
            b.arg(format!("--export=ALL,{}", assignments.join(",")));
        }

        b.finish()
    }
}

impl Scheduler for SlurmScheduler {
    fn kind(&self) -> SchedulerKind {
        SchedulerKind::Slurm
    }

    fn job(&self) -> &JobSpec {
        &self.job
    }

    fn launch_command(&self, system: &System, blocking: bool) -> Vec<String> {
        let (_, cmd_args) = self.build_command_string_and_batch_script(system, blocking);
        let launcher = if blocking { "srun" } else { "sbatch" };

        let mut cmd = Vec::with_capacity(cmd_args.len() + 1);
        cmd.push(launcher.to_string());
        cmd.extend(cmd_args);
        cmd
    }

    fn launcher_script(
        &self,
        system: &System,
        command: &str,
        args: &[String],
        blocking: bool,
        options: &ScriptOptions,
    ) -> String {
        let (header, cmd_args) = self.build_command_string_and_batch_script(system, blocking);

        let mut script = header;
        script.push('\n');

        if options.save_hostlist {
            let source = format!("${{{}}}", NODELIST_VAR);
            script.push_str(&hostlist_stanza(&source, &options.launch_dir));
        }

        let mut launcher = vec!["srun".to_string()];
        if !blocking && !system.interactive_launcher_is_proxy() {
            launcher.push("-u".to_string());
        }
        launcher.extend(cmd_args);

        script.push_str(&launch_line(&launcher, system, options, command, args));
        script
    }

    fn get_job_id(&self, output: &str) -> Option<String> {
        output
            .lines()
            .rev()
            .map(str::trim)
            .filter_map(|line| line.strip_prefix(SUBMIT_ACK))
            .next()
            .and_then(|rest| rest.split_whitespace().last())
            .map(str::to_string)
    }

    fn batch_submit_command(&self) -> Vec<String> {
        vec!["sbatch".to_string()]
    }
}

/// Nodes of the enclosing allocation: co-scheduler first, then
/// `SLURM_JOB_NUM_NODES`, then `LLNL_NUM_COMPUTE_NODES`
pub fn num_nodes_in_allocation(env: &HostEnv, runner: &dyn CommandRunner) -> Option<u32> {
    allocation_nodes(env, runner, &["SLURM_JOB_NUM_NODES", "LLNL_NUM_COMPUTE_NODES"])
}

/// Rank layout from the Slurm task environment
pub fn get_parallel_configuration(env: &HostEnv) -> Result<ParallelConfig> {
    let name = SchedulerKind::Slurm.name();
    // SLURM_TASKS_PER_NODE is skipped: its format is compressed, e.g. 2(x2)
    let world_size = required_u32(env, "SLURM_NTASKS", name)?;
    let rank = required_u32(env, "SLURM_PROCID", name)?;
    let local_rank = required_u32(env, "SLURM_LOCALID", name)?;
    let nodes = required_u32(env, "SLURM_NNODES", name)?;
    ParallelConfig::from_counts(world_size, rank, local_rank, nodes)
}

/// Rendezvous variables for a process launched by `srun`
pub fn dynamically_configure_rendezvous_protocol(protocol: &str) -> Result<EnvList> {
    let protocol = RendezvousProtocol::parse_for(protocol, SchedulerKind::Slurm.name())?;

    let mut env_list = vec![env_pair("RANK", "${SLURM_PROCID}")];
    if protocol == RendezvousProtocol::Tcp {
        env_list.push(env_pair(
            MASTER_ADDR_VAR,
            format!("`printenv {} | /bin/hostlist -n 1`", NODELIST_VAR),
        ));
        env_list.push(env_pair(MASTER_PORT_VAR, MASTER_PORT));
    }
    Ok(env_list)
}
