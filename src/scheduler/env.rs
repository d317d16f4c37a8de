//! Environment variable lists and host environment snapshots
//!
//! An [`EnvList`] is an ordered list of `(key, value)` pairs. Keys may repeat:
//! later entries are emitted later and can build on earlier ones through
//! shell expansion (e.g. `LD_LIBRARY_PATH=/a:${LD_LIBRARY_PATH}`).

use std::collections::BTreeMap;
use std::ffi::OsString;

/// Ordered environment variable assignments, duplicates allowed
pub type EnvList = Vec<(String, String)>;

/// Build a single list entry
pub fn env_pair(key: impl Into<String>, value: impl Into<String>) -> (String, String) {
    (key.into(), value.into())
}

/// Render one assignment as a shell export statement.
///
/// The value is emitted verbatim so backticks and `${VAR}` references
/// expand in the generated script.
pub fn export_line(key: &str, value: &str) -> String {
    format!("export {}={}\n", key, value)
}

/// Quote `s` as a single POSIX shell word.
///
/// Words made only of characters the shell treats literally are returned
/// unchanged; everything else is wrapped in single quotes.
pub fn shell_quote(s: &str) -> String {
    if s.is_empty() {
        return "''".to_string();
    }
    if s
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "-_./:@=,+%".contains(c))
    {
        return s.to_string();
    }
    format!("'{}'", s.replace('\'', "'\\''"))
}

/// Render an assignment whose value is a literal string
pub fn literal_export_line(key: &str, value: &str) -> String {
    export_line(key, &shell_quote(value))
}

/// Snapshot of the invoking process environment.
///
/// Everything that reads the environment of the *current* process
/// (topology discovery, derived cache paths, pass-through values) goes
/// through this type so the lookups are explicit and testable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostEnv {
    vars: BTreeMap<String, String>,
}

impl HostEnv {
    /// Capture the environment of the running process.
    ///
    /// Variables whose name or value is not valid UTF-8 are skipped.
    pub fn capture() -> Self {
        Self::from_os_vars(std::env::vars_os())
    }

    /// Build from raw OS pairs, skipping entries that are not valid UTF-8
    pub fn from_os_vars(vars: impl IntoIterator<Item = (OsString, OsString)>) -> Self {
        let vars = vars
            .into_iter()
            .filter_map(|(key, value)| match (key.into_string(), value.into_string()) {
                (Ok(key), Ok(value)) => Some((key, value)),
                (Ok(key), Err(_)) => {
                    tracing::debug!("Skipping {}: value is not valid UTF-8", key);
                    None
                }
                (Err(key), _) => {
                    tracing::debug!("Skipping variable {:?}: name is not valid UTF-8", key);
                    None
                }
            })
            .collect();
        Self { vars }
    }

    /// Build from explicit pairs
    pub fn from_pairs<K, V, I>(pairs: I) -> Self
    where
        K: Into<String>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        Self {
            vars: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Look up a variable
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    /// Look up a variable, treating an empty value as unset
    pub fn get_non_empty(&self, key: &str) -> Option<&str> {
        self.get(key).filter(|v| !v.is_empty())
    }

    /// Whether a variable is set to a non-empty value
    pub fn is_set(&self, key: &str) -> bool {
        self.get_non_empty(key).is_some()
    }

    /// Set or replace a variable in the snapshot
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(key.into(), value.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_export_line_is_verbatim() {
        assert_eq!(
            export_line("LD_LIBRARY_PATH", "/opt/rocm/llvm/lib:${LD_LIBRARY_PATH}"),
            "export LD_LIBRARY_PATH=/opt/rocm/llvm/lib:${LD_LIBRARY_PATH}\n"
        );
    }

    #[test]
    fn test_env_list_keeps_duplicates_in_order() {
        let list: EnvList = vec![
            env_pair("LD_LIBRARY_PATH", "/a:${LD_LIBRARY_PATH}"),
            env_pair("OMP_NUM_THREADS", "8"),
            env_pair("LD_LIBRARY_PATH", "/b:${LD_LIBRARY_PATH}"),
        ];
        let keys: Vec<&str> = list.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, ["LD_LIBRARY_PATH", "OMP_NUM_THREADS", "LD_LIBRARY_PATH"]);
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("train.py"), "train.py");
        assert_eq!(shell_quote("--export=ALL,A=0,1"), "--export=ALL,A=0,1");
        assert_eq!(shell_quote("hello world"), "'hello world'");
        assert_eq!(shell_quote("import x; f()"), "'import x; f()'");
        assert_eq!(shell_quote("it's"), "'it'\\''s'");
        assert_eq!(shell_quote("${HOME}"), "'${HOME}'");
        assert_eq!(shell_quote(""), "''");
    }

    #[test]
    fn test_literal_export_line() {
        assert_eq!(
            literal_export_line("MYMSG", "hello world"),
            "export MYMSG='hello world'\n"
        );
        assert_eq!(literal_export_line("CUDA_VISIBLE_DEVICES", "0,1"), "export CUDA_VISIBLE_DEVICES=0,1\n");
    }

    #[cfg(unix)]
    #[test]
    fn test_from_os_vars_skips_non_utf8() {
        use std::os::unix::ffi::OsStringExt;

        let env = HostEnv::from_os_vars([
            (OsString::from("GOOD"), OsString::from("1")),
            (OsString::from("BAD_VALUE"), OsString::from_vec(b"f\xffo".to_vec())),
            (OsString::from_vec(b"BAD\xffNAME".to_vec()), OsString::from("2")),
        ]);
        assert_eq!(env, HostEnv::from_pairs([("GOOD", "1")]));
    }

    #[cfg(unix)]
    #[test]
    fn test_capture_with_non_utf8_variable() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        const CHILD_MARKER: &str = "HPC_LAUNCHER_CAPTURE_CHILD";
        if std::env::var_os(CHILD_MARKER).is_some() {
            let env = HostEnv::capture();
            assert_eq!(env.get(CHILD_MARKER), Some("1"));
            assert!(env.get("HPC_LAUNCHER_BAD_VALUE").is_none());
            return;
        }

        let status = std::process::Command::new(std::env::current_exe().unwrap())
            .args([
                "--exact",
                "scheduler::env::tests::test_capture_with_non_utf8_variable",
                "--test-threads=1",
            ])
            .env(CHILD_MARKER, "1")
            .env("HPC_LAUNCHER_BAD_VALUE", OsStr::from_bytes(b"f\xffo"))
            .status()
            .unwrap();
        assert!(status.success());
    }

    #[test]
    fn test_host_env_empty_values() {
        let env = HostEnv::from_pairs([("FLUX_URI", ""), ("TMPDIR", "/scratch")]);
        assert_eq!(env.get("FLUX_URI"), Some(""));
        assert!(!env.is_set("FLUX_URI"));
        assert!(env.is_set("TMPDIR"));
        assert!(env.get("MISSING").is_none());
    }
}
