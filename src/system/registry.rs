//! Site registry
//!
//! An immutable table of known systems, built once at startup from the
//! built-in site definitions and optional JSON files, then passed by
//! reference to whatever needs to resolve a system.

use super::{cts2, el_capitan, sierra, Platform, System, SystemParams};
use crate::error::{IoResultExt, LauncherError, Result};
use crate::scheduler::HostEnv;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Partitions of one named system
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemDefinition {
    /// Platform family providing tuning
    pub platform: Platform,
    /// Partition used when none is requested
    pub default_partition: String,
    /// Partition name to capacity
    pub partitions: BTreeMap<String, SystemParams>,
}

impl SystemDefinition {
    /// Build from `(partition, params)` pairs
    pub fn new<'a>(
        platform: Platform,
        default_partition: &str,
        partitions: impl IntoIterator<Item = (&'a str, SystemParams)>,
    ) -> Self {
        Self {
            platform,
            default_partition: default_partition.to_string(),
            partitions: partitions
                .into_iter()
                .map(|(name, params)| (name.to_string(), params))
                .collect(),
        }
    }

    /// Check the default partition exists and every partition is valid
    pub fn validate(&self, name: &str) -> Result<()> {
        if !self.partitions.contains_key(&self.default_partition) {
            return Err(LauncherError::InvalidSystemParams(format!(
                "default partition '{}' of system '{}' is not defined",
                self.default_partition, name
            )));
        }
        for (partition, params) in &self.partitions {
            params.validate().map_err(|e| {
                LauncherError::InvalidSystemParams(format!("{}/{}: {}", name, partition, e))
            })?;
        }
        Ok(())
    }
}

/// Strip the domain and node number from a hostname.
///
/// `tuolumne1023.llnl.gov` becomes `tuolumne`.
pub fn system_name_from_hostname(hostname: &str) -> String {
    let short = hostname.split('.').next().unwrap_or(hostname);
    short
        .trim_end_matches(|c: char| c.is_ascii_digit())
        .to_ascii_lowercase()
}

/// Known systems by name
#[derive(Debug, Clone, Default)]
pub struct SiteRegistry {
    systems: BTreeMap<String, SystemDefinition>,
}

impl SiteRegistry {
    /// Registry with no systems
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registry of the built-in sites
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        let defs = cts2::definitions()
            .into_iter()
            .chain(el_capitan::definitions())
            .chain(sierra::definitions());
        for (name, def) in defs {
            registry.systems.insert(name.to_string(), def);
        }
        registry
    }

    /// Add or replace a system
    pub fn insert(&mut self, name: impl Into<String>, definition: SystemDefinition) -> Result<()> {
        let name = name.into();
        definition.validate(&name)?;
        if self.systems.insert(name.clone(), definition).is_some() {
            tracing::info!("Replacing registry entry for {}", name);
        }
        Ok(())
    }

    /// Merge systems from a JSON object of `name -> definition`.
    ///
    /// Returns the number of systems read.
    pub fn extend_from_file(&mut self, path: &Path) -> Result<usize> {
        let content = std::fs::read_to_string(path).with_path(path)?;
        let systems: BTreeMap<String, SystemDefinition> = serde_json::from_str(&content)
            .map_err(|e| LauncherError::config(format!("{}: {}", path.display(), e)))?;

        let count = systems.len();
        for (name, def) in systems {
            self.insert(name, def)?;
        }
        tracing::debug!("Loaded {} systems from {}", count, path.display());
        Ok(count)
    }

    /// Look up a system definition
    pub fn get(&self, name: &str) -> Option<&SystemDefinition> {
        self.systems.get(name)
    }

    /// Iterate systems in name order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &SystemDefinition)> {
        self.systems.iter().map(|(name, def)| (name.as_str(), def))
    }

    /// Number of systems
    pub fn len(&self) -> usize {
        self.systems.len()
    }

    /// Whether the registry has no systems
    pub fn is_empty(&self) -> bool {
        self.systems.is_empty()
    }

    /// Resolve a system by explicit name, or by hostname when `name` is `None`.
    ///
    /// An explicit name must be registered. A hostname that matches no
    /// entry resolves to a locally detected generic system.
    pub fn resolve(
        &self,
        name: Option<&str>,
        hostname: &str,
        partition: Option<&str>,
        host_env: HostEnv,
    ) -> Result<System> {
        if let Some(name) = name {
            let def = self
                .get(name)
                .ok_or_else(|| LauncherError::UnknownSystem(name.to_string()))?;
            return System::new(name, def, partition, host_env);
        }

        let detected = system_name_from_hostname(hostname);
        match self.get(&detected) {
            Some(def) => System::new(detected, def, partition, host_env),
            None => {
                tracing::info!(
                    "Host {} is not a known system, using local detection",
                    hostname
                );
                let system = System::generic(detected, host_env);
                if let Some(p) = partition {
                    if p != system.partition() {
                        tracing::warn!("Ignoring partition {} on a generic system", p);
                    }
                }
                Ok(system)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_hostname_normalization() {
        assert_eq!(system_name_from_hostname("tuolumne1023.llnl.gov"), "tuolumne");
        assert_eq!(system_name_from_hostname("rzadams1001"), "rzadams");
        assert_eq!(system_name_from_hostname("IPA15"), "ipa");
        assert_eq!(system_name_from_hostname("laptop"), "laptop");
    }

    #[test]
    fn test_builtin_registry() {
        let registry = SiteRegistry::builtin();
        for name in ["ipa", "tioga", "tuolumne", "elcap", "rzadams", "tenaya", "lassen", "rzansel"] {
            let def = registry.get(name).unwrap_or_else(|| panic!("{} missing", name));
            def.validate(name).unwrap();
        }
        assert_eq!(registry.len(), 8);
        assert_eq!(registry.get("tioga").unwrap().default_partition, "pdebug");
    }

    #[test]
    fn test_resolve() {
        let registry = SiteRegistry::builtin();

        let sys = registry
            .resolve(None, "tuolumne1001.llnl.gov", None, HostEnv::default())
            .unwrap();
        assert_eq!(sys.name(), "tuolumne");
        assert_eq!(sys.platform(), Platform::ElCapitan);
        assert_eq!(sys.partition(), "pbatch");

        let sys = registry
            .resolve(Some("ipa"), "ignored", Some("v100"), HostEnv::default())
            .unwrap();
        assert_eq!(sys.params().cores_per_node, 16);

        assert!(matches!(
            registry.resolve(Some("frontier"), "x", None, HostEnv::default()),
            Err(LauncherError::UnknownSystem(_))
        ));

        let sys = registry
            .resolve(None, "workstation7", None, HostEnv::default())
            .unwrap();
        assert_eq!(sys.platform(), Platform::Generic);
        assert_eq!(sys.name(), "workstation");
    }

    #[test]
    fn test_extend_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "matrix": {{
                    "platform": "cts2",
                    "default_partition": "pgpu",
                    "partitions": {{
                        "pgpu": {{
                            "cores_per_node": 48,
                            "gpus_per_node": 4,
                            "gpu_arch": "sm_90",
                            "mem_per_node_gb": 80.0,
                            "default_scheduler_name": "slurm"
                        }}
                    }}
                }}
            }}"#
        )
        .unwrap();

        let mut registry = SiteRegistry::builtin();
        assert_eq!(registry.extend_from_file(file.path()).unwrap(), 1);
        let def = registry.get("matrix").unwrap();
        assert_eq!(def.platform, Platform::Cts2);
        assert_eq!(def.partitions["pgpu"].gpu_mem_fraction_cap, 1.0);
    }

    #[test]
    fn test_extend_from_file_rejects_bad_default() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"bad": {{"platform": "generic", "default_partition": "nope", "partitions": {{}}}}}}"#
        )
        .unwrap();

        let mut registry = SiteRegistry::empty();
        let err = registry.extend_from_file(file.path()).unwrap_err();
        assert!(matches!(err, LauncherError::InvalidSystemParams(_)));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_extend_from_missing_file() {
        let mut registry = SiteRegistry::empty();
        let err = registry
            .extend_from_file(Path::new("/nonexistent/systems.json"))
            .unwrap_err();
        assert!(err.path().is_some());
    }
}
