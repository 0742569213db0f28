//! Sidekick configuration: `~/.sidekick/config.toml` and the settings
//! registry the worker proxy subscribes to.

mod registry;

use std::path::{Path, PathBuf};
use std::{env, fs, io};

use serde::Deserialize;

use sidekick_types::WorkerSettings;

pub use registry::SettingsRegistry;

/// Placeholder for the workspace root inside path settings.
pub const WORKSPACE_FOLDER_VAR: &str = "workspaceFolder";

#[derive(Debug, Default, Clone, Deserialize)]
pub struct SidekickConfig {
    /// Worker process settings. Required to run queries.
    pub worker: Option<WorkerSettings>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Read { path: PathBuf, source: io::Error },
    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid configuration in {}: {reason}", path.display())]
    Invalid { path: PathBuf, reason: String },
}

impl ConfigError {
    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            ConfigError::Read { path, .. }
            | ConfigError::Parse { path, .. }
            | ConfigError::Invalid { path, .. } => path,
        }
    }
}

impl SidekickConfig {
    /// Load the user config. `Ok(None)` when there is no config file.
    pub fn load() -> Result<Option<Self>, ConfigError> {
        let Some(path) = config_path() else {
            return Ok(None);
        };
        if !path.exists() {
            return Ok(None);
        }
        Self::load_from(&path).map(Some)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) => {
                tracing::warn!("Failed to read config at {:?}: {}", path, err);
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source: err,
                });
            }
        };
        Self::parse(&content).map_err(|err| {
            tracing::warn!("Failed to parse config at {:?}: {}", path, err);
            ConfigError::Parse {
                path: path.to_path_buf(),
                source: err,
            }
        })
    }

    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    #[must_use]
    pub fn path() -> Option<PathBuf> {
        config_path()
    }

    /// Worker settings for `workspace`, with path variables expanded.
    ///
    /// `origin` names the file the config came from, for error reporting.
    pub fn worker_settings(
        &self,
        workspace: &Path,
        origin: &Path,
    ) -> Result<WorkerSettings, ConfigError> {
        let Some(worker) = &self.worker else {
            return Err(ConfigError::Invalid {
                path: origin.to_path_buf(),
                reason: "missing [worker] section".to_string(),
            });
        };
        Ok(resolve_for_workspace(worker, workspace))
    }
}

/// Expand variables in the path-valued settings and anchor relative extra
/// paths at `workspace`.
#[must_use]
pub fn resolve_for_workspace(settings: &WorkerSettings, workspace: &Path) -> WorkerSettings {
    let mut resolved = settings.clone();
    resolved.map_extra_paths(|raw| {
        let expanded = expand_vars(raw, Some(workspace));
        let path = Path::new(&expanded);
        if expanded.is_empty() || path.is_absolute() {
            expanded
        } else {
            workspace.join(path).to_string_lossy().into_owned()
        }
    });
    resolved
}

/// Expand `${VAR}` references from the process environment.
///
/// Missing variables expand to the empty string; an unclosed `${` is kept
/// verbatim.
#[must_use]
pub fn expand_env_vars(value: &str) -> String {
    expand_vars(value, None)
}

/// Like [`expand_env_vars`], also resolving `${workspaceFolder}`.
#[must_use]
pub fn expand_vars(value: &str, workspace: Option<&Path>) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            out.push_str(&rest[start..]);
            return out;
        };
        let var = &after[..end];
        match (var, workspace) {
            ("", _) => {}
            (WORKSPACE_FOLDER_VAR, Some(workspace)) => {
                out.push_str(&workspace.to_string_lossy());
            }
            _ => out.push_str(&env::var(var).unwrap_or_default()),
        }
        rest = &after[end + 1..];
    }

    out.push_str(rest);
    out
}

#[must_use]
pub fn sidekick_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".sidekick"))
}

#[must_use]
pub fn config_path() -> Option<PathBuf> {
    sidekick_dir().map(|dir| dir.join("config.toml"))
}
