//! Error types for HPC Launcher
//!
//! Fatal conditions (unsupported capabilities, missing per-task environment,
//! unsupported configuration values) are variants of [`LauncherError`].
//! Soft lookup misses such as an unknown allocation size or an unparseable
//! job id are represented as `Option::None` by the callers instead.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for launcher operations
#[derive(Error, Debug)]
pub enum LauncherError {
    /// An operation this scheduler or system cannot provide
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// A required per-task environment variable is not defined
    #[error("Unable to launch on {scheduler} scheduler - {variable} not defined")]
    MissingEnvironment { variable: String, scheduler: String },

    /// An environment variable is defined but not usable
    #[error("Environment variable {variable} has invalid value '{value}'")]
    InvalidEnvironment { variable: String, value: String },

    /// Unknown rendezvous protocol
    #[error("Unsupported rendezvous protocol {protocol} for scheduler {scheduler}")]
    UnsupportedProtocol { protocol: String, scheduler: String },

    /// System name not present in the site registry
    #[error("Unknown system: {0}")]
    UnknownSystem(String),

    /// Partition name not present for the system
    #[error("Unknown partition '{partition}' on system '{system}'")]
    UnknownPartition { system: String, partition: String },

    /// Job description violates an invariant
    #[error("Invalid job description: {0}")]
    InvalidJob(String),

    /// System parameters violate an invariant
    #[error("Invalid system parameters: {0}")]
    InvalidSystemParams(String),

    /// I/O error with path context
    #[error("I/O error at '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// External program could not be started
    #[error("Failed to run '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// External program exited unsuccessfully
    #[error("'{program}' failed (exit code {code:?}): {stderr}")]
    CommandFailed {
        program: String,
        code: Option<i32>,
        stderr: String,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl LauncherError {
    /// Create an I/O error with path context
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::ConfigError(message.into())
    }

    /// Create a missing-environment error
    pub fn missing_env(variable: impl Into<String>, scheduler: impl Into<String>) -> Self {
        Self::MissingEnvironment {
            variable: variable.into(),
            scheduler: scheduler.into(),
        }
    }

    /// Check if this error comes from the job's runtime environment
    /// rather than from the caller's configuration
    pub fn is_environment_error(&self) -> bool {
        matches!(
            self,
            Self::MissingEnvironment { .. } | Self::InvalidEnvironment { .. }
        )
    }

    /// Get the path associated with this error, if any
    pub fn path(&self) -> Option<&PathBuf> {
        match self {
            Self::Io { path, .. } => Some(path),
            _ => None,
        }
    }
}

/// Result type alias for launcher operations
pub type Result<T> = std::result::Result<T, LauncherError>;

impl From<std::io::Error> for LauncherError {
    fn from(err: std::io::Error) -> Self {
        LauncherError::Io {
            path: PathBuf::new(),
            source: err,
        }
    }
}

impl From<serde_json::Error> for LauncherError {
    fn from(err: serde_json::Error) -> Self {
        LauncherError::ConfigError(err.to_string())
    }
}

/// Extension trait for adding path context to std::io::Result
pub trait IoResultExt<T> {
    /// Add path context to an I/O error
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T>;
}

impl<T> IoResultExt<T> for std::io::Result<T> {
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T> {
        self.map_err(|e| LauncherError::io(path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_with_path() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err = LauncherError::io("/launch/dir", io_err);
        assert_eq!(err.path().unwrap(), &PathBuf::from("/launch/dir"));
    }

    #[test]
    fn test_missing_env_message_names_variable() {
        let err = LauncherError::missing_env("SLURM_PROCID", "slurm");
        assert!(err.is_environment_error());
        let msg = err.to_string();
        assert!(msg.contains("SLURM_PROCID"));
        assert!(msg.contains("slurm"));
    }

    #[test]
    fn test_unsupported_protocol_message() {
        let err = LauncherError::UnsupportedProtocol {
            protocol: "gloo".into(),
            scheduler: "flux".into(),
        };
        assert!(!err.is_environment_error());
        assert_eq!(
            err.to_string(),
            "Unsupported rendezvous protocol gloo for scheduler flux"
        );
    }

    #[test]
    fn test_with_path() {
        let res: std::io::Result<()> =
            Err(std::io::Error::new(std::io::ErrorKind::Other, "boom"));
        let err = res.with_path("/tmp/launch.sh").unwrap_err();
        assert_eq!(err.path().unwrap(), &PathBuf::from("/tmp/launch.sh"));
    }
}
