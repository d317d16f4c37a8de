//! Batch scheduler integration
//!
//! A [`Scheduler`] renders a [`JobSpec`] into the command line and batch
//! script syntax of one scheduler family, and submits the result. Topology
//! helpers that only read the current process environment live on
//! [`SchedulerKind`], since they do not need a job description.
//!
//! Every render takes the [`System`] explicitly; the system's
//! `customize_scheduler` hook produces an adjusted copy of the job rather
//! than mutating the scheduler.

pub mod env;
pub mod flux;
pub mod job;
pub mod runner;
pub mod script;
pub mod slurm;
pub mod topology;

pub use env::{env_pair, export_line, literal_export_line, shell_quote, EnvList, HostEnv};
pub use flux::FluxScheduler;
pub use job::JobSpec;
pub use runner::{CommandOutput, CommandRunner, ProcessRunner};
pub use slurm::{time_string, SlurmScheduler};
pub use topology::{ParallelConfig, RendezvousProtocol, ResourceInfo};

use crate::error::{IoResultExt, LauncherError, Result};
use crate::system::System;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// File name of the generated launch script inside the launch directory
pub const LAUNCH_SCRIPT_NAME: &str = "launch.sh";

/// File name of the optional per-process script
pub const INTERNAL_SCRIPT_NAME: &str = "internal.sh";

/// File name the hostlist snapshot is written to
pub const HOSTLIST_FILE_NAME: &str = "hpc_launcher_hostlist.txt";

/// Supported scheduler families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerKind {
    /// Slurm Workload Manager
    Slurm,
    /// Flux framework
    Flux,
}

impl SchedulerKind {
    /// Get scheduler name
    pub fn name(&self) -> &'static str {
        match self {
            SchedulerKind::Slurm => "slurm",
            SchedulerKind::Flux => "flux",
        }
    }

    /// Family managing the current process, judged from its environment
    pub fn detect(env: &HostEnv) -> Self {
        if env.is_set(topology::FLUX_URI) || env.is_set("FLUX_JOB_ID") {
            SchedulerKind::Flux
        } else {
            SchedulerKind::Slurm
        }
    }

    /// Create a scheduler of this family for `job`
    pub fn instantiate(self, job: JobSpec) -> Box<dyn Scheduler> {
        match self {
            SchedulerKind::Slurm => Box::new(SlurmScheduler::new(job)),
            SchedulerKind::Flux => Box::new(FluxScheduler::new(job)),
        }
    }

    /// Number of nodes already allocated to the enclosing job, if known
    pub fn num_nodes_in_allocation(
        &self,
        env: &HostEnv,
        runner: &dyn CommandRunner,
    ) -> Option<u32> {
        match self {
            SchedulerKind::Slurm => slurm::num_nodes_in_allocation(env, runner),
            SchedulerKind::Flux => flux::num_nodes_in_allocation(env, runner),
        }
    }

    /// World size and ranks of the current task
    pub fn get_parallel_configuration(&self, env: &HostEnv) -> Result<ParallelConfig> {
        match self {
            SchedulerKind::Slurm => slurm::get_parallel_configuration(env),
            SchedulerKind::Flux => flux::get_parallel_configuration(env),
        }
    }

    /// Environment a spawned process needs to find its peers
    pub fn dynamically_configure_rendezvous_protocol(&self, protocol: &str) -> Result<EnvList> {
        match self {
            SchedulerKind::Slurm => slurm::dynamically_configure_rendezvous_protocol(protocol),
            SchedulerKind::Flux => flux::dynamically_configure_rendezvous_protocol(protocol),
        }
    }
}

impl fmt::Display for SchedulerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SchedulerKind {
    type Err = LauncherError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "slurm" => Ok(SchedulerKind::Slurm),
            "flux" => Ok(SchedulerKind::Flux),
            other => Err(LauncherError::Unsupported(format!("scheduler '{}'", other))),
        }
    }
}

/// Options affecting the generated launch script
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScriptOptions {
    /// Record the allocated hostlist before running the command
    pub save_hostlist: bool,
    /// Directory holding the launch artifacts
    pub launch_dir: PathBuf,
}

/// Options for [`Scheduler::launch`]
#[derive(Debug, Clone, Default)]
pub struct LaunchOptions {
    /// Wait for the job (interactive) instead of queueing it
    pub blocking: bool,
    /// Log the generated script
    pub verbose: bool,
    /// Script rendering options
    pub script: ScriptOptions,
    /// Identifier returned for blocking runs; generated when absent
    pub tag: Option<String>,
}

/// Capability interface implemented by each scheduler family
pub trait Scheduler: fmt::Debug {
    /// Family of this scheduler
    fn kind(&self) -> SchedulerKind;

    /// The job description being rendered
    fn job(&self) -> &JobSpec;

    /// Program and flags preceding the user's program
    fn launch_command(&self, system: &System, blocking: bool) -> Vec<String>;

    /// Complete shell script running `command args...`
    fn launcher_script(
        &self,
        system: &System,
        command: &str,
        args: &[String],
        blocking: bool,
        options: &ScriptOptions,
    ) -> String;

    /// Script each spawned process sources before running, if any.
    ///
    /// Rendered from the system's per-task variables; `None` when there
    /// are none.
    fn internal_script(&self, system: &System) -> Option<String> {
        let task_env = system.task_environment_variables();
        if task_env.is_empty() {
            return None;
        }
        let mut script = String::from("#!/bin/sh\n");
        for (key, value) in task_env {
            script.push_str(&export_line(key, value));
        }
        Some(script)
    }

    /// Extract the job id from submission output
    fn get_job_id(&self, output: &str) -> Option<String>;

    /// Command used to submit a batch script (script path is appended)
    fn batch_submit_command(&self) -> Vec<String>;

    /// Render, write and run the job.
    ///
    /// Returns the queued job id for batch submissions (`None` when the
    /// submission tool's acknowledgment could not be recognized) and the
    /// launch tag for blocking runs.
    fn launch(
        &self,
        system: &System,
        program: &str,
        args: &[String],
        options: &LaunchOptions,
        runner: &dyn CommandRunner,
    ) -> Result<Option<String>> {
        self.job().validate()?;

        let dir = &options.script.launch_dir;
        std::fs::create_dir_all(dir).with_path(dir)?;

        let script = self.launcher_script(system, program, args, options.blocking, &options.script);
        let script_path = dir.join(LAUNCH_SCRIPT_NAME);
        write_script(&script_path, &script)?;

        if let Some(internal) = self.internal_script(system) {
            write_script(&dir.join(INTERNAL_SCRIPT_NAME), &internal)?;
        }

        if options.verbose {
            tracing::info!("Launch script {}:\n{}", script_path.display(), script);
        }

        let script_arg = script_path.to_string_lossy().to_string();

        if options.blocking {
            tracing::info!("Running {} on {} ({} tasks)", program, system.name(), self.job().total_tasks());
            runner
                .run_attached("/bin/sh", &[script_arg])?
                .check("/bin/sh")?;
            let tag = options
                .tag
                .clone()
                .unwrap_or_else(|| default_launch_tag(self.job().job_name.as_deref()));
            return Ok(Some(tag));
        }

        let mut cmd = self.batch_submit_command();
        let submit = cmd.remove(0);
        cmd.push(script_arg);

        let output = runner.output(&submit, &cmd)?.check(&submit)?;
        let job_id = self.get_job_id(&output.stdout);
        match &job_id {
            Some(id) => tracing::info!("Submitted job {} via {}", id, submit),
            None => tracing::warn!(
                "Could not find a job id in {} output: {}",
                submit,
                output.stdout.trim()
            ),
        }
        Ok(job_id)
    }
}

/// Identifier for runs that get no queue-assigned id
pub fn default_launch_tag(job_name: Option<&str>) -> String {
    let stamp = chrono::Local::now().format("%Y-%m-%d_%H%M%S");
    format!("{}_{}", job_name.unwrap_or("hpc_launcher"), stamp)
}

/// Shell lines that publish the allocation's hostlist from rank 0.
///
/// `source` is a shell expression expanding to the hostlist. The launch
/// script runs once, outside any task, so an unset `RANK` counts as 0.
pub(crate) fn hostlist_stanza(source: &str, launch_dir: &Path) -> String {
    let target = launch_dir.join(HOSTLIST_FILE_NAME);
    format!(
        "export HPC_LAUNCHER_HOSTLIST={}\n\
         if [ \"${{RANK:-0}}\" = \"0\" ]; then\n    \
         echo ${{HPC_LAUNCHER_HOSTLIST}} > {}\n\
         fi\n\n",
        source,
        shell_quote(&target.to_string_lossy())
    )
}

/// Shell line running `command args...` under `launcher`.
///
/// Every word is quoted, so arguments reach the program literally. When
/// the system has per-task variables the program runs through `sh -c`,
/// sourcing the internal script inside each task first.
pub(crate) fn launch_line(
    launcher: &[String],
    system: &System,
    options: &ScriptOptions,
    command: &str,
    args: &[String],
) -> String {
    let mut words: Vec<String> = launcher.iter().map(|w| shell_quote(w)).collect();
    let program = std::iter::once(command)
        .chain(args.iter().map(String::as_str))
        .map(shell_quote)
        .collect::<Vec<_>>()
        .join(" ");

    if system.task_environment_variables().is_empty() {
        words.push(program);
    } else {
        let internal = options.launch_dir.join(INTERNAL_SCRIPT_NAME);
        let inner = format!(
            ". {} && exec {}",
            shell_quote(&internal.to_string_lossy()),
            program
        );
        words.push("sh".to_string());
        words.push("-c".to_string());
        words.push(shell_quote(&inner));
    }

    let mut line = words.join(" ");
    line.push('\n');
    line
}

/// Make a relative path absolute against the current directory
pub fn absolute_path(path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    }
}

fn write_script(path: &Path, contents: &str) -> Result<()> {
    std::fs::write(path, contents).with_path(path)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).with_path(path)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::runner::testing::FakeRunner;
    use super::*;
    use crate::system::{Platform, System, SystemParams};
    use tempfile::TempDir;

    fn test_system() -> System {
        System::single_partition(
            "testbox",
            Platform::Generic,
            "pdebug",
            SystemParams::new(16, 0, "", 64.0, 1, "slurm").unwrap(),
            HostEnv::default(),
        )
    }

    #[test]
    fn test_kind_from_str() {
        assert_eq!("Slurm".parse::<SchedulerKind>().unwrap(), SchedulerKind::Slurm);
        assert_eq!("flux".parse::<SchedulerKind>().unwrap(), SchedulerKind::Flux);
        assert!(matches!(
            "lsf".parse::<SchedulerKind>(),
            Err(LauncherError::Unsupported(_))
        ));
    }

    #[test]
    fn test_detect_kind() {
        assert_eq!(SchedulerKind::detect(&HostEnv::default()), SchedulerKind::Slurm);
        let env = HostEnv::from_pairs([("FLUX_JOB_ID", "f2Ck8jXJ5")]);
        assert_eq!(SchedulerKind::detect(&env), SchedulerKind::Flux);
    }

    #[test]
    fn test_internal_script_defaults_to_none() {
        let system = test_system();
        for kind in [SchedulerKind::Slurm, SchedulerKind::Flux] {
            let sched = kind.instantiate(JobSpec::new(1, 1));
            assert_eq!(sched.kind(), kind);
            assert!(sched.internal_script(&system).is_none());
        }
    }

    #[test]
    fn test_hostlist_stanza() {
        let stanza = hostlist_stanza("${SLURM_JOB_NODELIST}", Path::new("/w/launch"));
        assert_eq!(
            stanza,
            "export HPC_LAUNCHER_HOSTLIST=${SLURM_JOB_NODELIST}\n\
             if [ \"${RANK:-0}\" = \"0\" ]; then\n    \
             echo ${HPC_LAUNCHER_HOSTLIST} > /w/launch/hpc_launcher_hostlist.txt\n\
             fi\n\n"
        );
    }

    #[test]
    fn test_internal_script_carries_task_variables() {
        let mut system = test_system();
        system.extend_task_environment_variables(vec![env_pair("RANK", "${SLURM_PROCID}")]);
        let sched = SchedulerKind::Slurm.instantiate(JobSpec::new(2, 1));

        assert_eq!(
            sched.internal_script(&system).as_deref(),
            Some("#!/bin/sh\nexport RANK=${SLURM_PROCID}\n")
        );

        let options = ScriptOptions {
            launch_dir: PathBuf::from("/w/launch"),
            ..Default::default()
        };
        for blocking in [true, false] {
            let script = sched.launcher_script(
                &system,
                "python3",
                &["-c".into(), "print(1); print(2)".into()],
                blocking,
                &options,
            );
            // RANK must be expanded inside each task, never by the launch script
            assert!(!script.contains("RANK="));
            assert!(!script.contains("SLURM_PROCID"));
            assert!(script.trim_end().ends_with(
                r#"sh -c '. /w/launch/internal.sh && exec python3 -c '\''print(1); print(2)'\'''"#
            ));
        }
    }

    #[test]
    fn test_launch_line_quotes_arguments() {
        let system = test_system();
        let line = launch_line(
            &["srun".to_string(), "--chdir=/p/my run".to_string()],
            &system,
            &ScriptOptions::default(),
            "python",
            &["-c".into(), "import x; f()".into()],
        );
        assert_eq!(line, "srun '--chdir=/p/my run' python -c 'import x; f()'\n");
    }

    #[test]
    fn test_launch_batch_returns_job_id() {
        let dir = TempDir::new().unwrap();
        let system = test_system();
        let sched = SchedulerKind::Slurm.instantiate(JobSpec::new(2, 4));
        let runner = FakeRunner::replying("Submitted batch job 482913\n");
        let options = LaunchOptions {
            blocking: false,
            script: ScriptOptions {
                launch_dir: dir.path().join("launch-run1"),
                ..Default::default()
            },
            ..Default::default()
        };

        let id = sched
            .launch(&system, "./train", &["--epochs".into(), "3".into()], &options, &runner)
            .unwrap();
        assert_eq!(id.as_deref(), Some("482913"));

        let script_path = dir.path().join("launch-run1").join(LAUNCH_SCRIPT_NAME);
        let script = std::fs::read_to_string(&script_path).unwrap();
        assert!(script.starts_with("#!/bin/sh\n#SBATCH --nodes=2\n"));
        assert!(script.trim_end().ends_with("./train --epochs 3"));

        let calls = runner.calls.borrow();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "sbatch");
        assert_eq!(calls[0].1, vec![script_path.to_string_lossy().to_string()]);
    }

    #[test]
    fn test_launch_batch_without_ack_is_not_an_error() {
        let dir = TempDir::new().unwrap();
        let system = test_system();
        let sched = SchedulerKind::Slurm.instantiate(JobSpec::new(1, 1));
        let runner = FakeRunner::replying("sbatch: warning: something odd\n");
        let options = LaunchOptions {
            script: ScriptOptions {
                launch_dir: dir.path().to_path_buf(),
                ..Default::default()
            },
            ..Default::default()
        };
        assert_eq!(sched.launch(&system, "true", &[], &options, &runner).unwrap(), None);
    }

    #[test]
    fn test_launch_blocking_returns_tag() {
        let dir = TempDir::new().unwrap();
        let system = test_system();
        let sched = SchedulerKind::Flux.instantiate(JobSpec::new(1, 2));
        let runner = FakeRunner::replying("");
        let options = LaunchOptions {
            blocking: true,
            tag: Some("interactive-1".into()),
            script: ScriptOptions {
                launch_dir: dir.path().to_path_buf(),
                ..Default::default()
            },
            ..Default::default()
        };
        let id = sched.launch(&system, "hostname", &[], &options, &runner).unwrap();
        assert_eq!(id.as_deref(), Some("interactive-1"));
        assert_eq!(runner.calls.borrow()[0].0, "/bin/sh");
    }

    #[test]
    fn test_launch_propagates_submit_failure() {
        let dir = TempDir::new().unwrap();
        let system = test_system();
        let sched = SchedulerKind::Slurm.instantiate(JobSpec::new(1, 1));
        let runner = FakeRunner::failing(1, "sbatch: error: Batch job submission failed");
        let options = LaunchOptions {
            script: ScriptOptions {
                launch_dir: dir.path().to_path_buf(),
                ..Default::default()
            },
            ..Default::default()
        };
        let err = sched.launch(&system, "true", &[], &options, &runner).unwrap_err();
        assert!(matches!(err, LauncherError::CommandFailed { .. }));
    }

    #[test]
    fn test_launch_rejects_invalid_job() {
        let dir = TempDir::new().unwrap();
        let sched = SchedulerKind::Slurm.instantiate(JobSpec::new(0, 1));
        let runner = FakeRunner::replying("");
        let options = LaunchOptions {
            script: ScriptOptions {
                launch_dir: dir.path().to_path_buf(),
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(sched.launch(&test_system(), "true", &[], &options, &runner).is_err());
        assert!(runner.calls.borrow().is_empty());
    }

    #[test]
    fn test_default_launch_tag() {
        assert!(default_launch_tag(Some("run1")).starts_with("run1_"));
        assert!(default_launch_tag(None).starts_with("hpc_launcher_"));
    }
}
