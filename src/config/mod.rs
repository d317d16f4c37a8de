//! Configuration module for HPC Launcher
//!
//! Provides the CLI definition and the conversion of parsed arguments
//! into job descriptions and resolved systems.

mod settings;

pub use settings::*;
