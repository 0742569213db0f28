//! Module search paths handed to the worker.
//!
//! The set is an ordered, de-duplicated union of configured extra paths, the
//! workspace environment's `PYTHONPATH`, and the interpreter's own `sys.path`.
//! Each source is optional; a failing source is logged and skipped.

use std::collections::{HashMap, HashSet};
use std::env;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::sync::watch;

use sidekick_types::WorkerSettings;

use crate::launcher::{ProcessLauncher, SpawnSpec};
use crate::middleware::swallow_errors;

pub const PYTHONPATH: &str = "PYTHONPATH";

const SYS_PATH_SCRIPT: &str = "import json,sys;print(json.dumps(sys.path))";

/// Source of the workspace's environment variables.
pub trait EnvironmentProvider: Send + Sync + 'static {
    fn variables(&self, workspace: &Path) -> HashMap<String, String>;

    /// Fires whenever the variables may have changed.
    fn subscribe(&self) -> watch::Receiver<()>;
}

/// The current process environment.
#[derive(Debug)]
pub struct ProcessEnvironment {
    changed: watch::Sender<()>,
}

impl Default for ProcessEnvironment {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessEnvironment {
    #[must_use]
    pub fn new() -> Self {
        let (changed, _) = watch::channel(());
        Self { changed }
    }

    /// Tell subscribers to re-read the environment.
    pub fn notify_changed(&self) {
        self.changed.send_replace(());
    }
}

impl EnvironmentProvider for ProcessEnvironment {
    fn variables(&self, _workspace: &Path) -> HashMap<String, String> {
        env::vars().collect()
    }

    fn subscribe(&self) -> watch::Receiver<()> {
        self.changed.subscribe()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchPaths {
    paths: Vec<String>,
}

impl SearchPaths {
    /// Keep the first occurrence of every entry, dropping blanks.
    pub fn from_ordered(entries: impl IntoIterator<Item = String>) -> Self {
        let mut seen = HashSet::new();
        let paths = entries
            .into_iter()
            .filter(|p| !p.trim().is_empty())
            .filter(|p| seen.insert(p.clone()))
            .collect();
        Self { paths }
    }

    #[must_use]
    pub fn as_slice(&self) -> &[String] {
        &self.paths
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// The entries joined with the platform separator, for `PYTHONPATH`.
    #[must_use]
    pub fn joined(&self) -> Option<OsString> {
        if self.paths.is_empty() {
            return None;
        }
        match env::join_paths(&self.paths) {
            Ok(joined) => Some(joined),
            Err(e) => {
                tracing::warn!("Search paths cannot be joined into {PYTHONPATH}: {e}");
                None
            }
        }
    }
}

/// Build the search-path set for `workspace`.
pub async fn build<L, E>(
    settings: &WorkerSettings,
    workspace: &Path,
    launcher: &L,
    environment: &E,
) -> SearchPaths
where
    L: ProcessLauncher,
    E: EnvironmentProvider + ?Sized,
{
    let mut entries: Vec<String> = settings
        .extra_paths()
        .iter()
        .map(|p| resolve_against(workspace, p))
        .collect();

    if let Some(python_path) = environment.variables(workspace).get(PYTHONPATH) {
        entries.extend(
            env::split_paths(python_path).map(|p| resolve_against(workspace, &p.to_string_lossy())),
        );
    }

    let sys_path = swallow_errors(
        "Could not read interpreter sys.path",
        interpreter_sys_path(settings, launcher),
    )
    .await;
    entries.extend(sys_path.unwrap_or_default());

    let paths = SearchPaths::from_ordered(entries);
    tracing::debug!(count = paths.as_slice().len(), "Search paths built");
    paths
}

fn resolve_against(workspace: &Path, entry: &str) -> String {
    let path = PathBuf::from(entry);
    if path.is_absolute() || entry.trim().is_empty() {
        return entry.to_string();
    }
    workspace.join(path).to_string_lossy().into_owned()
}

async fn interpreter_sys_path<L: ProcessLauncher>(
    settings: &WorkerSettings,
    launcher: &L,
) -> Result<Vec<String>> {
    let interpreter = launcher
        .executable_path(settings.interpreter())
        .context("resolving interpreter")?;
    let spec = SpawnSpec::new(&interpreter).arg("-c").arg(SYS_PATH_SCRIPT);
    let stdout = launcher
        .exec(&spec)
        .await
        .with_context(|| format!("running {}", interpreter.display()))?;
    let paths: Vec<String> =
        serde_json::from_str(stdout.trim()).context("parsing sys.path output")?;
    Ok(paths)
}
