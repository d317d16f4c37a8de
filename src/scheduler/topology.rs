//! Runtime topology discovery
//!
//! Helpers that inspect the environment of the *current* process, i.e. a
//! process already running inside an allocation, to report allocation size,
//! per-task ranks and rendezvous settings.

use super::env::HostEnv;
use super::runner::CommandRunner;
use crate::error::{LauncherError, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Co-scheduler marker: set when running under a Flux instance
pub const FLUX_URI: &str = "FLUX_URI";

/// Fixed port used for TCP rendezvous
pub const MASTER_PORT: &str = "23456";

/// Variable carrying the rendezvous master address
pub const MASTER_ADDR_VAR: &str = "TORCHRUN_HPC_MASTER_ADDR";

/// Variable carrying the rendezvous master port
pub const MASTER_PORT_VAR: &str = "TORCHRUN_HPC_MASTER_PORT";

static RESOURCE_INFO_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^(\d+) Nodes, (\d+) Cores, (\d+) GPUs$").expect("valid resource regex")
});

/// Summary line reported by `flux resource info`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceInfo {
    /// Nodes in the instance
    pub nodes: u32,
    /// Cores in the instance
    pub cores: u32,
    /// GPUs in the instance
    pub gpus: u32,
}

impl ResourceInfo {
    /// Parse the first line matching `N Nodes, C Cores, G GPUs`
    pub fn parse(output: &str) -> Option<Self> {
        let caps = RESOURCE_INFO_RE.captures(output)?;
        Some(Self {
            nodes: caps[1].parse().ok()?,
            cores: caps[2].parse().ok()?,
            gpus: caps[3].parse().ok()?,
        })
    }

    /// Ask the co-scheduler for its resources
    pub fn query(runner: &dyn CommandRunner) -> Option<Self> {
        let args = ["resource".to_string(), "info".to_string()];
        match runner.output("flux", &args) {
            Ok(out) if out.success => Self::parse(&out.stdout),
            Ok(out) => {
                tracing::warn!("flux resource info exited with {:?}", out.code);
                None
            }
            Err(e) => {
                tracing::warn!("Unable to query flux resources: {}", e);
                None
            }
        }
    }
}

/// Node count from the co-scheduler if one is present, else from the
/// given variables in order. Unparseable values count as absent.
pub fn allocation_nodes(
    env: &HostEnv,
    runner: &dyn CommandRunner,
    node_vars: &[&str],
) -> Option<u32> {
    if env.is_set(FLUX_URI) {
        return ResourceInfo::query(runner).map(|info| info.nodes);
    }

    node_vars
        .iter()
        .find_map(|var| env.get_non_empty(var))
        .and_then(|value| value.trim().parse().ok())
}

/// Per-task distributed configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParallelConfig {
    /// Total number of tasks
    pub world_size: u32,
    /// Global rank of this task
    pub rank: u32,
    /// Tasks on this node
    pub local_world_size: u32,
    /// Rank of this task within its node
    pub local_rank: u32,
}

impl ParallelConfig {
    /// Build from the four raw values, deriving the local world size
    pub fn from_counts(world_size: u32, rank: u32, local_rank: u32, nodes: u32) -> Result<Self> {
        if nodes == 0 {
            return Err(LauncherError::InvalidEnvironment {
                variable: "node count".into(),
                value: "0".into(),
            });
        }
        Ok(Self {
            world_size,
            rank,
            local_world_size: world_size / nodes,
            local_rank,
        })
    }
}

impl fmt::Display for ParallelConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "world_size={} rank={} local_world_size={} local_rank={}",
            self.world_size, self.rank, self.local_world_size, self.local_rank
        )
    }
}

/// Read a required integer variable
pub fn required_u32(env: &HostEnv, variable: &str, scheduler: &str) -> Result<u32> {
    let value = env
        .get_non_empty(variable)
        .ok_or_else(|| LauncherError::missing_env(variable, scheduler))?;
    value
        .trim()
        .parse()
        .map_err(|_| LauncherError::InvalidEnvironment {
            variable: variable.to_string(),
            value: value.to_string(),
        })
}

/// Strategy used by distributed processes to find each other
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RendezvousProtocol {
    /// Explicit master address and port
    Tcp,
    /// Discovery handled by the MPI runtime
    Mpi,
}

impl FromStr for RendezvousProtocol {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" => Ok(Self::Tcp),
            "mpi" => Ok(Self::Mpi),
            other => Err(other.to_string()),
        }
    }
}

impl RendezvousProtocol {
    /// Parse a protocol name for `scheduler`, case-insensitively
    pub fn parse_for(protocol: &str, scheduler: &str) -> Result<Self> {
        protocol
            .parse()
            .map_err(|_| LauncherError::UnsupportedProtocol {
                protocol: protocol.to_string(),
                scheduler: scheduler.to_string(),
            })
    }
}
