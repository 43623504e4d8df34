#[cfg(any(target_os = "macos", test))]
mod macos;
#[cfg(any(not(target_os = "macos"), test))]
mod linux;

use anyhow::Result;
use std::{path::Path, time::Duration};

#[cfg(target_os = "macos")]
pub use macos::LaunchAgent as BackupStatusAgent;
#[cfg(not(target_os = "macos"))]
pub use linux::SystemdAgent as BackupStatusAgent;

/// Trait defining the interface for running `sync` at login and periodically
/// afterwards. Implemented with launchd on macOS and systemd user units elsewhere.
pub trait LoginAgent {
    /// Installs and starts the agent, replacing any previous installation.
    fn install(interval: Duration, config: Option<&Path>) -> Result<()>;

    /// Stops and removes the agent. Succeeds when none is installed.
    fn remove() -> Result<()>;
}

/// Arguments passed to the executable on every agent run.
fn sync_arguments(config: Option<&Path>) -> Vec<String> {
    let mut args = Vec::new();
    if let Some(path) = config {
        args.push("--config".to_string());
        args.push(path.display().to_string());
    }
    args.push("sync".to_string());
    args
}
