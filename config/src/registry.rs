//! Per-workspace settings with change notification.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use tokio::sync::watch;

use sidekick_types::WorkerSettings;

use crate::resolve_for_workspace;

/// Resolved worker settings per workspace.
///
/// Each workspace gets its own watch channel; subscribers see a new value
/// only when the resolved settings actually changed.
pub struct SettingsRegistry {
    base: Mutex<WorkerSettings>,
    workspaces: Mutex<HashMap<PathBuf, watch::Sender<WorkerSettings>>>,
}

impl SettingsRegistry {
    #[must_use]
    pub fn new(base: WorkerSettings) -> Self {
        Self {
            base: Mutex::new(base),
            workspaces: Mutex::new(HashMap::new()),
        }
    }

    /// Subscribe to the settings of `workspace`, registering it on first use.
    pub fn subscribe(&self, workspace: &Path) -> watch::Receiver<WorkerSettings> {
        let mut workspaces = self.workspaces.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(sender) = workspaces.get(workspace) {
            return sender.subscribe();
        }
        let base = self.base.lock().unwrap_or_else(PoisonError::into_inner);
        let (sender, receiver) = watch::channel(resolve_for_workspace(&base, workspace));
        workspaces.insert(workspace.to_path_buf(), sender);
        receiver
    }

    #[must_use]
    pub fn current(&self, workspace: &Path) -> Option<WorkerSettings> {
        let workspaces = self.workspaces.lock().unwrap_or_else(PoisonError::into_inner);
        workspaces.get(workspace).map(|sender| sender.borrow().clone())
    }

    /// Edit the settings of one workspace. Returns whether anything changed.
    pub fn update(&self, workspace: &Path, edit: impl FnOnce(&mut WorkerSettings)) -> bool {
        let workspaces = self.workspaces.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(sender) = workspaces.get(workspace) else {
            return false;
        };
        let changed = sender.send_if_modified(|settings| {
            let before = settings.clone();
            edit(settings);
            *settings != before
        });
        if changed {
            tracing::debug!(workspace = %workspace.display(), "Worker settings changed");
        }
        changed
    }

    /// Replace the base settings and re-resolve every registered workspace.
    ///
    /// Returns the number of workspaces whose settings changed.
    pub fn reload(&self, base: WorkerSettings) -> usize {
        let workspaces = self.workspaces.lock().unwrap_or_else(PoisonError::into_inner);
        let mut changed = 0;
        for (workspace, sender) in workspaces.iter() {
            let next = resolve_for_workspace(&base, workspace);
            if sender.send_if_modified(|settings| {
                if *settings == next {
                    return false;
                }
                *settings = next;
                true
            }) {
                changed += 1;
            }
        }
        *self.base.lock().unwrap_or_else(PoisonError::into_inner) = base;
        tracing::debug!(changed, "Reloaded worker settings");
        changed
    }

    /// Forget `workspace`. Its subscribers see the channel close.
    pub fn remove(&self, workspace: &Path) -> bool {
        self.workspaces
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(workspace)
            .is_some()
    }
}
