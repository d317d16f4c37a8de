//! Command-line settings for HPC Launcher
//!
//! Defines the CLI, its argument parsers, and the conversion from parsed
//! arguments into a [`JobSpec`] and a resolved [`System`].

use crate::error::Result;
use crate::scheduler::{default_launch_tag, HostEnv, JobSpec, SchedulerKind};
use crate::system::{SiteRegistry, System};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// HPC Launcher - run programs through Slurm or Flux
#[derive(Parser, Debug, Clone)]
#[command(name = "hpc-launcher")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Launch programs on HPC systems through Slurm or Flux")]
#[command(long_about = r#"
HPC Launcher renders a scheduler-agnostic job description into srun/sbatch
or flux run/flux batch invocations, applying per-system environment tuning.

EXAMPLES:
    # Run interactively on 2 nodes with 4 tasks each
    hpc-launcher launch -N 2 -n 4 -- ./app --input data.bin

    # Queue a batch job with a 90 minute limit
    hpc-launcher launch --batch -N 8 -t 1h30m -J train -- python3 train.py

    # Launch a PyTorch job with TCP rendezvous
    hpc-launcher torchrun -N 4 -n 4 --rdv tcp -- train.py

    # Show what the current job looks like from inside the allocation
    hpc-launcher topology
"#)]
pub struct CliArgs {
    /// Verbose output (can be repeated: -v, -vv, -vvv)
    #[arg(short = 'v', long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Log output format
    #[arg(long, value_enum, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Subcommand
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Launch a program
    #[command(name = "launch")]
    Launch(LaunchArgs),

    /// Launch a program with distributed-training rendezvous variables
    #[command(name = "torchrun")]
    Torchrun(TorchrunArgs),

    /// Show the allocation and rank layout of the current job
    #[command(name = "topology")]
    Topology {
        /// Scheduler to read the environment of (default: detected)
        #[arg(long, value_enum)]
        scheduler: Option<SchedulerChoice>,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// List known systems
    #[command(name = "systems")]
    Systems {
        /// Additional system definitions (JSON)
        #[arg(long, value_name = "PATH")]
        registry: Option<PathBuf>,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
}

/// Arguments of `launch`
#[derive(Args, Debug, Clone)]
pub struct LaunchArgs {
    #[command(flatten)]
    pub job: JobArgs,

    #[command(flatten)]
    pub system: SystemArgs,

    #[command(flatten)]
    pub run: RunArgs,

    /// Program to run followed by its arguments.
    ///
    /// Arguments are quoted in the generated script and reach the program
    /// literally; they are not expanded by the shell.
    #[arg(
        value_name = "COMMAND",
        required = true,
        trailing_var_arg = true,
        allow_hyphen_values = true
    )]
    pub command: Vec<String>,
}

/// Arguments of `torchrun`
#[derive(Args, Debug, Clone)]
pub struct TorchrunArgs {
    #[command(flatten)]
    pub launch: LaunchArgs,

    /// Rendezvous protocol (tcp or mpi)
    #[arg(long = "rdv", default_value = "tcp", value_name = "PROTOCOL")]
    pub rdv: String,
}

/// Job description options
#[derive(Args, Debug, Clone, Default)]
pub struct JobArgs {
    /// Number of nodes (default: current allocation, else 1)
    #[arg(short = 'N', long, value_name = "NUM")]
    pub nodes: Option<u32>,

    /// Tasks per node (default: GPUs per node, else 1)
    #[arg(short = 'n', long, value_name = "NUM")]
    pub procs_per_node: Option<u32>,

    /// GPUs per task (default: 1 on GPU partitions, else 0)
    #[arg(long, value_name = "NUM")]
    pub gpus_per_proc: Option<u32>,

    /// Job name
    #[arg(short = 'J', long, value_name = "NAME")]
    pub job_name: Option<String>,

    /// Working directory of the job
    #[arg(long, value_name = "PATH")]
    pub work_dir: Option<PathBuf>,

    /// Time limit in minutes or as a duration (e.g., 90, 1h30m)
    #[arg(short = 't', long, value_name = "LIMIT", value_parser = parse_time_limit)]
    pub time_limit: Option<f64>,

    /// Queue / partition to submit to
    #[arg(short = 'q', long, value_name = "NAME")]
    pub queue: Option<String>,

    /// Account / bank to charge
    #[arg(short = 'A', long, value_name = "NAME")]
    pub account: Option<String>,

    /// Reservation to run in
    #[arg(long, value_name = "NAME")]
    pub reservation: Option<String>,

    /// Standard output file of a batch job
    #[arg(short = 'o', long = "output", value_name = "PATH")]
    pub out_log_file: Option<String>,

    /// Standard error file of a batch job
    #[arg(short = 'e', long = "error", value_name = "PATH")]
    pub err_log_file: Option<String>,

    /// Extra flag for the launcher (repeatable)
    #[arg(long = "launcher-flag", value_name = "FLAG", allow_hyphen_values = true)]
    pub launcher_flags: Vec<String>,

    /// Library to preload in every task (repeatable)
    #[arg(long = "ld-preload", value_name = "PATH")]
    pub ld_preloads: Vec<String>,
}

/// System selection options
#[derive(Args, Debug, Clone, Default)]
pub struct SystemArgs {
    /// System name (default: derived from the hostname)
    #[arg(long, value_name = "NAME")]
    pub system: Option<String>,

    /// Partition of the system (default: the system's default)
    #[arg(short = 'p', long, value_name = "NAME")]
    pub partition: Option<String>,

    /// Scheduler to use (default: the system's preferred scheduler)
    #[arg(long, value_enum)]
    pub scheduler: Option<SchedulerChoice>,

    /// Extra environment variable for the job (repeatable)
    #[arg(long = "env", value_name = "KEY=VALUE", value_parser = parse_env_assignment)]
    pub env: Vec<(String, String)>,

    /// Copy a variable from this shell into the job (repeatable)
    #[arg(long = "passthrough-env", value_name = "NAME")]
    pub passthrough_env: Vec<String>,

    /// Additional system definitions (JSON)
    #[arg(long, value_name = "PATH")]
    pub registry: Option<PathBuf>,
}

/// Launch mode options
#[derive(Args, Debug, Clone, Default)]
pub struct RunArgs {
    /// Queue the job and return instead of waiting for it
    #[arg(long)]
    pub batch: bool,

    /// Print the launch script without writing or running it
    #[arg(long)]
    pub dry_run: bool,

    /// Record the allocation's hostlist in the launch directory
    #[arg(long)]
    pub save_hostlist: bool,

    /// Directory for launch artifacts (default: launch-<job>_<timestamp>)
    #[arg(long, value_name = "PATH")]
    pub launch_dir: Option<PathBuf>,
}

/// Scheduler choices on the command line
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SchedulerChoice {
    /// Slurm (srun / sbatch)
    Slurm,
    /// Flux (flux run / flux batch)
    Flux,
}

impl From<SchedulerChoice> for SchedulerKind {
    fn from(choice: SchedulerChoice) -> Self {
        match choice {
            SchedulerChoice::Slurm => SchedulerKind::Slurm,
            SchedulerChoice::Flux => SchedulerKind::Flux,
        }
    }
}

/// Log output formats
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Text,
    /// One JSON object per event
    Json,
}

impl JobArgs {
    /// Build the job description, filling defaults from the system
    pub fn to_job_spec(&self, system: &System, allocation_nodes: Option<u32>) -> JobSpec {
        let params = system.params();
        JobSpec {
            nodes: self.nodes.or(allocation_nodes).unwrap_or(1),
            procs_per_node: self
                .procs_per_node
                .unwrap_or_else(|| params.gpus_per_node.max(1)),
            gpus_per_proc: self
                .gpus_per_proc
                .unwrap_or(if params.has_gpus() { 1 } else { 0 }),
            job_name: self.job_name.clone(),
            work_dir: self.work_dir.clone(),
            time_limit: self.time_limit,
            queue: self.queue.clone(),
            account: self.account.clone(),
            reservation: self.reservation.clone(),
            launcher_flags: self.launcher_flags.clone(),
            ld_preloads: self.ld_preloads.clone(),
            out_log_file: self.out_log_file.clone(),
            err_log_file: self.err_log_file.clone(),
        }
    }
}

impl SystemArgs {
    /// Built-in registry plus the optional registry file
    pub fn load_registry(&self) -> Result<SiteRegistry> {
        load_registry(self.registry.as_deref())
    }

    /// Resolve the system and attach the caller's variables
    pub fn resolve(
        &self,
        registry: &SiteRegistry,
        hostname: &str,
        host_env: HostEnv,
    ) -> Result<System> {
        let mut system = registry.resolve(
            self.system.as_deref(),
            hostname,
            self.partition.as_deref(),
            host_env,
        )?;
        system.extend_environment_variables(self.env.clone());
        for name in &self.passthrough_env {
            system.add_passthrough(name.clone());
        }
        Ok(system)
    }

    /// Explicit scheduler, else the system's preference
    pub fn scheduler_kind(&self, system: &System) -> SchedulerKind {
        self.scheduler
            .map(SchedulerKind::from)
            .unwrap_or_else(|| system.preferred_scheduler())
    }
}

impl RunArgs {
    /// Launch directory and the tag naming this launch
    pub fn launch_dir_and_tag(&self, job_name: Option<&str>) -> (PathBuf, String) {
        let tag = default_launch_tag(job_name);
        let dir = self
            .launch_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(format!("launch-{}", tag)));
        (dir, tag)
    }
}

/// Built-in registry, extended from `path` when given
pub fn load_registry(path: Option<&std::path::Path>) -> Result<SiteRegistry> {
    let mut registry = SiteRegistry::builtin();
    if let Some(path) = path {
        registry.extend_from_file(path)?;
    }
    Ok(registry)
}

/// Parse a time limit: plain minutes (`90`, `1.5`) or a duration (`1h30m`)
pub fn parse_time_limit(s: &str) -> std::result::Result<f64, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("Empty time limit".to_string());
    }

    if let Ok(minutes) = s.parse::<f64>() {
        if !minutes.is_finite() || minutes < 0.0 {
            return Err(format!("Invalid time limit: {}", s));
        }
        // "-0" parses as negative zero
        return Ok(if minutes <= 0.0 { 0.0 } else { minutes });
    }

    let duration: Duration =
        humantime::parse_duration(s).map_err(|e| format!("Invalid time limit '{}': {}", s, e))?;
    Ok(duration.as_secs_f64() / 60.0)
}

/// Parse `KEY=VALUE`
pub fn parse_env_assignment(s: &str) -> std::result::Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("Expected KEY=VALUE, got '{}'", s))?;

    let valid_key = !key.is_empty()
        && !key.starts_with(|c: char| c.is_ascii_digit())
        && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !valid_key {
        return Err(format!("Invalid variable name: '{}'", key));
    }

    Ok((key.to_string(), value.to_string()))
}
