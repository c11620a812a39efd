//! Task registry: the compiled task scripts available in a workspace.
//!
//! The registry is rebuilt from disk on every menu iteration so scripts
//! written by the compile task show up without a restart.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::error::BridgeError;

use super::runner::ScriptTask;
use super::script::parse_task_script;

/// Compiled task scripts keyed by file stem, in name order.
#[derive(Debug, Clone, Default)]
pub struct TaskRegistry {
    entries: BTreeMap<String, PathBuf>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Collect every `*.toml` file directly inside `dir`.
    ///
    /// A missing directory yields an empty registry.
    pub fn discover(dir: &Path) -> Result<Self> {
        let mut registry = Self::new();
        if !dir.exists() {
            return Ok(registry);
        }

        let entries =
            std::fs::read_dir(dir).with_context(|| format!("failed to read {}", dir.display()))?;
        for entry in entries {
            let path = entry
                .with_context(|| format!("failed to read entry in {}", dir.display()))?
                .path();
            if !path.is_file() || path.extension().is_none_or(|ext| ext != "toml") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                registry.register(stem, path.clone());
            }
        }

        tracing::debug!(dir = %dir.display(), count = registry.len(), "discovered task scripts");
        Ok(registry)
    }

    /// Register `path` under `name`, replacing and returning any previous path.
    pub fn register(&mut self, name: impl Into<String>, path: PathBuf) -> Option<PathBuf> {
        self.entries.insert(name.into(), path)
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).collect()
    }

    pub fn path(&self, name: &str) -> Option<&Path> {
        self.entries.get(name).map(PathBuf::as_path)
    }

    /// Load and validate the script registered under `name`.
    pub fn load(&self, name: &str) -> Result<ScriptTask, BridgeError> {
        let not_found = |reason: String| BridgeError::TaskNotFound {
            name: name.to_string(),
            reason,
        };

        let path = self
            .entries
            .get(name)
            .ok_or_else(|| not_found("no such task".to_string()))?;
        let content = std::fs::read_to_string(path)
            .map_err(|e| not_found(format!("failed to read {}: {e}", path.display())))?;
        let script = parse_task_script(&content)
            .map_err(|e| not_found(format!("{} is invalid: {e}", path.display())))?;
        Ok(ScriptTask::new(script))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskUnit;

    const HELLO: &str = r#"
[task]
name = "hello"
description = "Say hello"

[[steps]]
kind = "print"
message = "hello"
"#;

    #[test]
    fn missing_directory_is_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let registry = TaskRegistry::discover(&tmp.path().join("nope")).unwrap();
        assert!(registry.is_empty());
    }

    #[test]
    fn discovers_only_toml_files_sorted() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("zeta.toml"), HELLO).unwrap();
        std::fs::write(tmp.path().join("alpha.toml"), HELLO).unwrap();
        std::fs::write(tmp.path().join("notes.md"), "# not a script").unwrap();
        std::fs::create_dir(tmp.path().join("dir.toml")).unwrap();

        let registry = TaskRegistry::discover(tmp.path()).unwrap();
        assert_eq!(registry.names(), vec!["alpha", "zeta"]);
        assert_eq!(registry.path("alpha"), Some(tmp.path().join("alpha.toml").as_path()));
    }

    #[test]
    fn load_returns_runnable_task() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("hello.toml"), HELLO).unwrap();
        let registry = TaskRegistry::discover(tmp.path()).unwrap();

        let task = registry.load("hello").unwrap();
        assert_eq!(task.name(), "hello");
        assert_eq!(task.description(), "Say hello");
    }

    #[test]
    fn unknown_name_is_task_not_found() {
        let registry = TaskRegistry::new();
        let err = registry.load("ghost").unwrap_err();
        assert!(matches!(err, BridgeError::TaskNotFound { ref name, .. } if name == "ghost"));
    }

    #[test]
    fn invalid_script_is_task_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("broken.toml"), "[task]\nname = \"broken\"\n").unwrap();
        let registry = TaskRegistry::discover(tmp.path()).unwrap();

        match registry.load("broken").unwrap_err() {
            BridgeError::TaskNotFound { name, reason } => {
                assert_eq!(name, "broken");
                assert!(reason.contains("at least one step"), "got {reason}");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
