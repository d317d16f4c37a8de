//! Subprocess boundary
//!
//! The launcher talks to scheduler tools (`sbatch`, `flux`, ...) only through
//! [`CommandRunner`], so tests can substitute canned tool output.

use crate::error::{LauncherError, Result};
use std::process::{Command, Stdio};

/// Result of running an external program
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, if the process exited normally
    pub code: Option<i32>,
    /// Whether the process reported success
    pub success: bool,
    /// Captured standard output (empty when stdio was inherited)
    pub stdout: String,
    /// Captured standard error (empty when stdio was inherited)
    pub stderr: String,
}

impl CommandOutput {
    /// Turn an unsuccessful run into a [`LauncherError::CommandFailed`]
    pub fn check(self, program: &str) -> Result<Self> {
        if self.success {
            Ok(self)
        } else {
            Err(LauncherError::CommandFailed {
                program: program.to_string(),
                code: self.code,
                stderr: self.stderr.trim().to_string(),
            })
        }
    }
}

/// Runs external programs to completion
pub trait CommandRunner {
    /// Run and capture stdout/stderr
    fn output(&self, program: &str, args: &[String]) -> Result<CommandOutput>;

    /// Run attached to the caller's terminal
    fn run_attached(&self, program: &str, args: &[String]) -> Result<CommandOutput>;
}

/// [`CommandRunner`] backed by `std::process`
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

impl CommandRunner for ProcessRunner {
    fn output(&self, program: &str, args: &[String]) -> Result<CommandOutput> {
        tracing::debug!("Running {} {}", program, args.join(" "));
        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .map_err(|source| LauncherError::Spawn {
                program: program.to_string(),
                source,
            })?;

        Ok(CommandOutput {
            code: output.status.code(),
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }

    fn run_attached(&self, program: &str, args: &[String]) -> Result<CommandOutput> {
        tracing::debug!("Running attached {} {}", program, args.join(" "));
        let status = Command::new(program)
            .args(args)
            .status()
            .map_err(|source| LauncherError::Spawn {
                program: program.to_string(),
                source,
            })?;

        Ok(CommandOutput {
            code: status.code(),
            success: status.success(),
            ..Default::default()
        })
    }
}
