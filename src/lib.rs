//! # HPC Launcher - Scheduler-agnostic job launching for HPC
//!
//! HPC Launcher turns a scheduler-agnostic job description into the launch
//! command or batch script of a concrete batch scheduler, applying the
//! environment tuning of the machine it runs on. Inside a running job it
//! recovers the allocation size, rank layout and rendezvous settings from
//! the scheduler's environment.
//!
//! ## Features
//!
//! - **Slurm and Flux**: `srun`/`sbatch` and `flux run`/`flux batch` rendering
//! - **Blocking and batch modes**: one description, two output shapes
//! - **Per-system tuning**: site registry with platform-specific environment
//! - **Topology discovery**: world size, ranks and node count of the current job
//! - **Rendezvous helpers**: TCP or MPI peer discovery for distributed training
//!
//! ## Quick Start
//!
//! ```no_run
//! use hpc_launcher::prelude::*;
//!
//! let registry = SiteRegistry::builtin();
//! let system = registry
//!     .resolve(Some("tuolumne"), "", None, HostEnv::capture())
//!     .unwrap();
//!
//! let job = JobSpec {
//!     job_name: Some("train".into()),
//!     time_limit: Some(90.0),
//!     ..JobSpec::new(2, 4)
//! };
//! let scheduler = system.preferred_scheduler().instantiate(job);
//!
//! let script = scheduler.launcher_script(
//!     &system,
//!     "python3",
//!     &["train.py".to_string()],
//!     false,
//!     &ScriptOptions::default(),
//! );
//! println!("{}", script);
//! ```
//!
//! ## Inside a Job
//!
//! ```no_run
//! use hpc_launcher::prelude::*;
//!
//! let env = HostEnv::capture();
//! let config = SchedulerKind::Slurm.get_parallel_configuration(&env).unwrap();
//! println!("rank {} of {}", config.rank, config.world_size);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod scheduler;
pub mod system;

// Re-export commonly used types
pub use error::{LauncherError, Result};
pub use scheduler::{JobSpec, Scheduler, SchedulerKind};
pub use system::{SiteRegistry, System};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for convenient imports
pub mod prelude {
    //! Convenient re-exports for common usage
    //!
    //! ```no_run
    //! use hpc_launcher::prelude::*;
    //! ```

    pub use crate::error::{LauncherError, Result};
    pub use crate::scheduler::{
        CommandRunner, EnvList, FluxScheduler, HostEnv, JobSpec, LaunchOptions, ParallelConfig,
        ProcessRunner, RendezvousProtocol, Scheduler, SchedulerKind, ScriptOptions,
        SlurmScheduler,
    };
    pub use crate::system::{Platform, SiteRegistry, System, SystemParams};
}
