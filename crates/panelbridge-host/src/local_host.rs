//! Headless implementation of the panel command set.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use panelbridge::{HandlerError, HostHandler, StateStore};
use serde_json::Value;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Scaffolder used when `PANELBRIDGE_SCAFFOLD` is unset.
pub const DEFAULT_SCAFFOLD: &[&str] = &["npm", "create", "vite@latest"];

pub struct LocalHost {
    state: StateStore,
    default_folder: Option<PathBuf>,
    scaffold: Vec<String>,
}

impl LocalHost {
    pub fn new(
        state: StateStore,
        default_folder: Option<PathBuf>,
        scaffold: Vec<String>,
    ) -> Self {
        Self {
            state,
            default_folder,
            scaffold,
        }
    }
}

/// Split a scaffold command line on whitespace; falls back to [`DEFAULT_SCAFFOLD`].
pub fn scaffold_command(raw: Option<&str>) -> Vec<String> {
    let parts: Vec<String> = raw
        .unwrap_or_default()
        .split_whitespace()
        .map(str::to_string)
        .collect();
    if parts.is_empty() {
        DEFAULT_SCAFFOLD.iter().map(|s| s.to_string()).collect()
    } else {
        parts
    }
}

#[async_trait]
impl HostHandler for LocalHost {
    async fn get_state(&self, key: String) -> Result<Value, HandlerError> {
        Ok(self.state.get_value(&key)?.unwrap_or(Value::Null))
    }

    /// `null` clears the key.
    async fn set_state(&self, key: String, value: Value) -> Result<(), HandlerError> {
        if value.is_null() {
            self.state.remove(&key)?;
        } else {
            self.state.set(&key, &value)?;
        }
        Ok(())
    }

    async fn hello(&self, text: String) -> Result<(), HandlerError> {
        info!(%text, "Panel says hello");
        Ok(())
    }

    async fn select_folder(&self) -> Result<Option<PathBuf>, HandlerError> {
        Ok(self.default_folder.clone())
    }

    async fn create_project(
        &self,
        name: String,
        parent: PathBuf,
    ) -> Result<PathBuf, HandlerError> {
        if matches!(name.as_str(), "" | "." | "..") || name.contains(['/', '\\']) {
            return Err(HandlerError::new(format!("invalid project name '{name}'")));
        }
        if !parent.is_dir() {
            return Err(HandlerError::new(format!(
                "{} is not a directory",
                parent.display()
            )));
        }
        let (program, args) = self
            .scaffold
            .split_first()
            .ok_or_else(|| HandlerError::new("no scaffold command configured"))?;

        info!(%program, %name, parent = %parent.display(), "Scaffolding project");
        // stdout carries the bridge; the scaffolder's output must not leak into it.
        let output = Command::new(program)
            .args(args)
            .arg(&name)
            .current_dir(&parent)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;

        for line in String::from_utf8_lossy(&output.stdout).lines() {
            debug!(target: "panelbridge_host::scaffold", "{line}");
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(status = %output.status, "Scaffold command failed");
            return Err(HandlerError::new(format!(
                "{program} exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        Ok(parent.join(name))
    }

    async fn open_folder(&self, path: PathBuf) -> Result<bool, HandlerError> {
        let exists = path.is_dir();
        if exists {
            info!(path = %path.display(), "Opening folder");
        } else {
            warn!(path = %path.display(), "Folder does not exist");
        }
        Ok(exists)
    }
}
