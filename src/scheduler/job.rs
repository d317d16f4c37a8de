//! Scheduler-agnostic job description

use crate::error::{LauncherError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Description of one job request, independent of the scheduler that
/// will eventually render it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSpec {
    /// Number of nodes
    pub nodes: u32,
    /// Processes (tasks) per node
    pub procs_per_node: u32,
    /// GPUs per process (0 = do not request GPUs)
    pub gpus_per_proc: u32,
    /// Job name
    pub job_name: Option<String>,
    /// Working directory
    pub work_dir: Option<PathBuf>,
    /// Time limit in minutes
    pub time_limit: Option<f64>,
    /// Partition or queue
    pub queue: Option<String>,
    /// Account / bank
    pub account: Option<String>,
    /// Reservation name
    pub reservation: Option<String>,
    /// Extra flags passed to the launcher only
    pub launcher_flags: Vec<String>,
    /// Libraries to preload in every process
    pub ld_preloads: Vec<String>,
    /// Standard output log file
    pub out_log_file: Option<String>,
    /// Standard error log file
    pub err_log_file: Option<String>,
}

impl Default for JobSpec {
    fn default() -> Self {
        Self {
            nodes: 1,
            procs_per_node: 1,
            gpus_per_proc: 0,
            job_name: None,
            work_dir: None,
            time_limit: None,
            queue: None,
            account: None,
            reservation: None,
            launcher_flags: Vec::new(),
            ld_preloads: Vec::new(),
            out_log_file: None,
            err_log_file: None,
        }
    }
}

impl JobSpec {
    /// Create a job for `nodes` nodes with `procs_per_node` tasks each
    pub fn new(nodes: u32, procs_per_node: u32) -> Self {
        Self {
            nodes,
            procs_per_node,
            ..Default::default()
        }
    }

    /// Total number of tasks across the allocation
    pub fn total_tasks(&self) -> u64 {
        u64::from(self.nodes) * u64::from(self.procs_per_node)
    }

    /// Check the record's invariants
    pub fn validate(&self) -> Result<()> {
        if self.nodes == 0 {
            return Err(LauncherError::InvalidJob("nodes must be positive".into()));
        }
        if self.procs_per_node == 0 {
            return Err(LauncherError::InvalidJob(
                "procs_per_node must be positive".into(),
            ));
        }
        if let Some(limit) = self.time_limit {
            if !limit.is_finite() || limit < 0.0 {
                return Err(LauncherError::InvalidJob(format!(
                    "time limit must be a non-negative number of minutes, got {}",
                    limit
                )));
            }
        }
        Ok(())
    }
}
