//! Resolved worker settings shared across crates.
//!
//! Raw TOML deserialization happens through a private struct; the validated
//! [`WorkerSettings`] is only reachable through `#[serde(try_from)]` or the
//! checked constructor, so holding one proves the script path is usable.

use std::path::{Path, PathBuf};

use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SettingsError {
    #[error("worker script path must not be empty")]
    EmptyScript,
    #[error("interpreter path must not be empty when set")]
    EmptyInterpreter,
}

/// Memory ceiling enforced by the resource watchdog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryLimit {
    Disabled,
    Megabytes(u64),
}

impl MemoryLimit {
    pub const MIN_MB: u64 = 1024;
    pub const MAX_MB: u64 = 8192;

    /// Interpret the user setting: negative disables, anything else is
    /// clamped into `[MIN_MB, MAX_MB]`.
    #[must_use]
    pub fn from_setting(value: i64) -> Self {
        match u64::try_from(value) {
            Ok(mb) => Self::Megabytes(mb.clamp(Self::MIN_MB, Self::MAX_MB)),
            Err(_) => Self::Disabled,
        }
    }

    #[must_use]
    pub fn megabytes(self) -> Option<u64> {
        match self {
            Self::Disabled => None,
            Self::Megabytes(mb) => Some(mb),
        }
    }
}

impl Default for MemoryLimit {
    fn default() -> Self {
        Self::from_setting(0)
    }
}

#[derive(Deserialize)]
struct RawWorkerSettings {
    #[serde(default)]
    interpreter: Option<String>,
    script: String,
    #[serde(default)]
    worker_path: Option<String>,
    #[serde(default)]
    memory_limit_mb: i64,
    #[serde(default)]
    extra_paths: Vec<String>,
}

/// Validated worker settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RawWorkerSettings")]
pub struct WorkerSettings {
    interpreter: Option<PathBuf>,
    script: PathBuf,
    worker_path: Option<PathBuf>,
    memory_limit: MemoryLimit,
    extra_paths: Vec<String>,
}

impl TryFrom<RawWorkerSettings> for WorkerSettings {
    type Error = SettingsError;

    fn try_from(raw: RawWorkerSettings) -> Result<Self, Self::Error> {
        let mut settings = Self::new(raw.script)?;
        if let Some(interpreter) = raw.interpreter {
            if interpreter.trim().is_empty() {
                return Err(SettingsError::EmptyInterpreter);
            }
            settings.interpreter = Some(PathBuf::from(interpreter));
        }
        settings.worker_path = raw
            .worker_path
            .filter(|p| !p.trim().is_empty())
            .map(PathBuf::from);
        settings.memory_limit = MemoryLimit::from_setting(raw.memory_limit_mb);
        settings.extra_paths = raw.extra_paths;
        Ok(settings)
    }
}

impl WorkerSettings {
    pub fn new(script: impl Into<PathBuf>) -> Result<Self, SettingsError> {
        let script = script.into();
        if script.as_os_str().is_empty() || script.to_string_lossy().trim().is_empty() {
            return Err(SettingsError::EmptyScript);
        }
        Ok(Self {
            interpreter: None,
            script,
            worker_path: None,
            memory_limit: MemoryLimit::default(),
            extra_paths: Vec::new(),
        })
    }

    #[must_use]
    pub fn with_interpreter(mut self, interpreter: impl Into<PathBuf>) -> Self {
        self.interpreter = Some(interpreter.into());
        self
    }

    #[must_use]
    pub fn with_worker_path(mut self, worker_path: impl Into<PathBuf>) -> Self {
        self.worker_path = Some(worker_path.into());
        self
    }

    #[must_use]
    pub fn with_memory_limit(mut self, limit: MemoryLimit) -> Self {
        self.memory_limit = limit;
        self
    }

    #[must_use]
    pub fn with_extra_paths(mut self, paths: Vec<String>) -> Self {
        self.extra_paths = paths;
        self
    }

    #[must_use]
    pub fn interpreter(&self) -> Option<&Path> {
        self.interpreter.as_deref()
    }

    #[must_use]
    pub fn script(&self) -> &Path {
        &self.script
    }

    #[must_use]
    pub fn worker_path(&self) -> Option<&Path> {
        self.worker_path.as_deref()
    }

    #[must_use]
    pub fn memory_limit(&self) -> MemoryLimit {
        self.memory_limit
    }

    #[must_use]
    pub fn extra_paths(&self) -> &[String] {
        &self.extra_paths
    }

    /// Whether moving from `self` to `next` invalidates the running worker.
    #[must_use]
    pub fn requires_restart(&self, next: &Self) -> bool {
        self.interpreter != next.interpreter
            || self.script != next.script
            || self.worker_path != next.worker_path
    }

    /// Rewrite `extra_paths` in place, e.g. after variable expansion.
    pub fn map_extra_paths(&mut self, f: impl FnMut(&String) -> String) {
        self.extra_paths = self.extra_paths.iter().map(f).collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_limit_clamps_into_range() {
        assert_eq!(MemoryLimit::from_setting(0), MemoryLimit::Megabytes(1024));
        assert_eq!(MemoryLimit::from_setting(2048), MemoryLimit::Megabytes(2048));
        assert_eq!(
            MemoryLimit::from_setting(100_000),
            MemoryLimit::Megabytes(8192)
        );
    }

    #[test]
    fn negative_memory_limit_disables() {
        assert_eq!(MemoryLimit::from_setting(-1), MemoryLimit::Disabled);
        assert_eq!(MemoryLimit::Disabled.megabytes(), None);
    }

    #[test]
    fn worker_settings_valid() {
        let json = serde_json::json!({
            "interpreter": "/usr/bin/python3",
            "script": "/opt/sidekick/completion.py",
            "memory_limit_mb": -1,
            "extra_paths": ["src"]
        });
        let settings: WorkerSettings = serde_json::from_value(json).unwrap();
        assert_eq!(settings.interpreter(), Some(Path::new("/usr/bin/python3")));
        assert_eq!(settings.script(), Path::new("/opt/sidekick/completion.py"));
        assert_eq!(settings.memory_limit(), MemoryLimit::Disabled);
        assert_eq!(settings.extra_paths(), ["src"]);
        assert!(settings.worker_path().is_none());
    }

    #[test]
    fn worker_settings_rejects_empty_script() {
        let json = serde_json::json!({ "script": "  " });
        assert!(serde_json::from_value::<WorkerSettings>(json).is_err());
    }

    #[test]
    fn worker_settings_rejects_empty_interpreter() {
        let json = serde_json::json!({ "script": "c.py", "interpreter": "" });
        assert!(serde_json::from_value::<WorkerSettings>(json).is_err());
    }

    #[test]
    fn restart_only_for_process_shaping_fields() {
        let base = WorkerSettings::new("c.py").unwrap();
        let paths = base.clone().with_extra_paths(vec!["lib".to_string()]);
        assert!(!base.requires_restart(&paths));
        let limit = base.clone().with_memory_limit(MemoryLimit::Disabled);
        assert!(!base.requires_restart(&limit));
        let interp = base.clone().with_interpreter("/usr/bin/python3");
        assert!(base.requires_restart(&interp));
        let jedi = base.clone().with_worker_path("/opt/jedi");
        assert!(base.requires_restart(&jedi));
    }
}
