//! Flux framework renderer

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
use once_cell::sync::Lazy;
use regex::Regex;

const DIRECTIVE: &str = "# flux:";
const HOSTLIST_SOURCE: &str = "`flux hostlist local`";

/// Job id encodings printed by `flux batch`: F58 (`ƒ` or ASCII `f`
/// prefix), decimal, hex and dotted hex
static JOB_ID_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(?:[ƒf][1-9A-HJ-NP-Za-km-z]+|[0-9]+|0x[0-9a-fA-F]+|[0-9a-fA-F]{4}(?:\.[0-9a-fA-F]{4}){3})$",
    )
    .expect("valid job id regex")
});

/// Format a time limit in minutes as a Flux duration
pub fn flux_duration(minutes: f64) -> String {
    // also folds -0.0 and NaN to 0
    let minutes = if minutes > 0.0 { minutes } else { 0.0 };
    format!("{}m", minutes)
}

/// Flux scheduler
#[derive(Debug, Clone, PartialEq)]
pub struct FluxScheduler {
    /// Job being rendered
    pub job: JobSpec,
}

impl FluxScheduler {
    /// Create a Flux scheduler for `job`
    pub fn new(job: JobSpec) -> Self {
        Self { job }
    }

    /// Build the batch header and the `flux run`/`flux batch` arguments
    pub fn build_command_string_and_batch_script(
        &self,
        system: &System,
        blocking: bool,
    ) -> (String, Vec<String>) {
        let job = system.customize_scheduler(SchedulerKind::Flux, &self.job);
        let env_vars = system.environment_variables();
        let passthrough = system.passthrough_environment_variables();

        tracing::debug!(
            "Rendering flux job on {} (blocking={}, tasks={})",
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

        if blocking && !system.interactive_launcher_is_proxy() {
            b.arg("-u");
        }

        b.both(format!("--nodes={}", job.nodes), blocking);
        b.both(format!("--ntasks={}", job.total_tasks()), blocking);
        b.both(format!("--tasks-per-node={}", job.procs_per_node), blocking);

        if job.gpus_per_proc > 0 {
            b.both(format!("--gpus-per-task={}", job.gpus_per_proc), blocking);
        }

        if let Some(ref dir) = job.work_dir {
            let flag = format!("--setattr=system.cwd={}", absolute_path(dir).display());
            b.select_interactive_or_batch(&[flag], blocking);
        }

        if !job.ld_preloads.is_empty() {
            let flag = format!("--env=LD_PRELOAD={}", job.ld_preloads.join(":"));
            b.select_interactive_or_batch(&[flag], blocking);
        }

        if let Some(limit) = job.time_limit {
            let flag = format!("--time-limit={}", flux_duration(limit));
            b.select_interactive_or_batch(&[flag], blocking);
        }

        if let Some(ref name) = job.job_name {
            b.select_interactive_or_batch(&[format!("--job-name={}", name)], blocking);
        }

        if let Some(ref queue) = job.queue {
            b.select_interactive_or_batch(&[format!("--queue={}", queue)], blocking);
        }

        if let Some(ref account) = job.account {
            b.select_interactive_or_batch(&[format!("--bank={}", account)], blocking);
        }

        if let Some(ref reservation) = job.reservation {
            tracing::warn!(
                "Flux has no reservation option, ignoring reservation {}",
                reservation
            );
        }

        for flag in &job.launcher_flags {
            b.arg(flag.clone());
        }

        for (key, value) in &env_vars {
            b.header_line(&export_line(key, value));
        }

        for (key, value) in &passthrough {
            if blocking {
                b.header_line(&literal_export_line(key, value));
            } else {
                b.arg(format!("--env={}={}", key, value));
            }
        }

        b.finish()
    }
}

impl Scheduler for FluxScheduler {
    fn kind(&self) -> SchedulerKind {
        SchedulerKind::Flux
    }

    fn job(&self) -> &JobSpec {
        &self.job
    }

    fn launch_command(&self, system: &System, blocking: bool) -> Vec<String> {
        let (_, cmd_args) = self.build_command_string_and_batch_script(system, blocking);
        let verb = if blocking { "run" } else { "batch" };

        let mut cmd = vec!["flux".to_string(), verb.to_string()];
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
            script.push_str(&hostlist_stanza(HOSTLIST_SOURCE, &options.launch_dir));
        }

        let mut launcher = vec!["flux".to_string(), "run".to_string()];
        if !blocking && !system.interactive_launcher_is_proxy() {
            launcher.push("-u".to_string());
        }
        launcher.extend(cmd_args);

        script.push_str(&launch_line(&launcher, system, options, command, args));
        script
    }

    /// `flux batch` prints the bare job id (e.g. `ƒ2Ck8jXJ5`) on its own line
    fn get_job_id(&self, output: &str) -> Option<String> {
        let last = output.lines().map(str::trim).filter(|l| !l.is_empty()).last()?;
        JOB_ID_RE.is_match(last).then(|| last.to_string())
    }

    fn batch_submit_command(&self) -> Vec<String> {
        vec!["flux".to_string(), "batch".to_string()]
    }
}

/// Nodes of the enclosing Flux instance
pub fn num_nodes_in_allocation(env: &HostEnv, runner: &dyn CommandRunner) -> Option<u32> {
    allocation_nodes(env, runner, &["FLUX_JOB_NNODES", "LLNL_NUM_COMPUTE_NODES"])
}

/// Rank layout from the Flux task environment
pub fn get_parallel_configuration(env: &HostEnv) -> Result<ParallelConfig> {
    let name = SchedulerKind::Flux.name();
    let world_size = required_u32(env, "FLUX_JOB_SIZE", name)?;
    let rank = required_u32(env, "FLUX_TASK_RANK", name)?;
    let local_rank = required_u32(env, "FLUX_TASK_LOCAL_ID", name)?;
    let nodes = required_u32(env, "FLUX_JOB_NNODES", name)?;
    ParallelConfig::from_counts(world_size, rank, local_rank, nodes)
}

/// Rendezvous variables for a process launched by `flux run`
pub fn dynamically_configure_rendezvous_protocol(protocol: &str) -> Result<EnvList> {
    let protocol = RendezvousProtocol::parse_for(protocol, SchedulerKind::Flux.name())?;

    let mut env_list = vec![env_pair("RANK", "${FLUX_TASK_RANK}")];
    if protocol == RendezvousProtocol::Tcp {
        env_list.push(env_pair(MASTER_ADDR_VAR, "`flux hostlist --nth=0 local`"));
        env_list.push(env_pair(MASTER_PORT_VAR, MASTER_PORT));
    }
    Ok(env_list)
}
