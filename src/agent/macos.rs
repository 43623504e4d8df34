use anyhow::{Context as _, Ok, Result};
use plist::{Dictionary, Integer, Value};
use std::{
    env, fs,
    path::{Path, PathBuf},
    process::Command,
    time::Duration,
};

use super::{LoginAgent, sync_arguments};

const AGENT_LABEL: &str = "com.backup-status.sync";
const AGENT_LOG_PATH: &str = "/tmp/backup-status/sync.log";

pub struct LaunchAgent;

impl LoginAgent for LaunchAgent {
    fn install(interval: Duration, config: Option<&Path>) -> Result<()> {
        let plist_path = Self::get_plist_path()?;
        if let Some(parent) = plist_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let current_exe = env::current_exe().context("Failed to get current executable path")?;
        let plist_content =
            Self::generate_plist(AGENT_LABEL, &current_exe, &sync_arguments(config), interval)?;

        // replacing a previous installation, failure just means none was loaded
        let _ = Self::launchctl("bootout", &plist_path);

        fs::write(&plist_path, plist_content)
            .with_context(|| format!("Failed to write plist file to {}", plist_path.display()))?;
        fs::create_dir_all("/tmp/backup-status")?;

        let output = Self::launchctl("bootstrap", &plist_path)
            .context("Failed to execute launchctl bootstrap command")?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("launchctl bootstrap failed: {}", stderr);
        }

        eprintln!("Installed login agent `{}`", AGENT_LABEL);
        Ok(())
    }

    fn remove() -> Result<()> {
        let plist_path = Self::get_plist_path()?;
        if !plist_path.exists() {
            return Ok(());
        }

        let output = Self::launchctl("bootout", &plist_path)
            .context("Failed to execute launchctl bootout command")?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            log::warn!("launchctl bootout failed: {}", stderr);
        }

        fs::remove_file(&plist_path)
            .with_context(|| format!("Failed to remove plist file {}", plist_path.display()))?;

        eprintln!("Removed login agent `{}`", AGENT_LABEL);
        Ok(())
    }
}

impl LaunchAgent {
    fn launchctl(action: &str, plist_path: &Path) -> std::io::Result<std::process::Output> {
        Command::new("launchctl")
            .arg(action)
            .arg(format!("gui/{}", Self::current_uid()))
            .arg(plist_path)
            .output()
    }

    fn current_uid() -> String {
        Command::new("id")
            .arg("-u")
            .output()
            .ok()
            .filter(|output| output.status.success())
            .map(|output| String::from_utf8_lossy(&output.stdout).trim().to_string())
            .unwrap_or_else(|| "501".to_string())
    }

    fn get_plist_path() -> Result<PathBuf> {
        let home = env::var("HOME").context("Failed to get HOME environment variable")?;
        Ok(Path::new(&home)
            .join("Library/LaunchAgents")
            .join(format!("{}.plist", AGENT_LABEL)))
    }

    fn generate_plist(
        label: &str,
        executable_path: &Path,
        arguments: &[String],
        interval: Duration,
    ) -> Result<Vec<u8>> {
        let program_arguments = std::iter::once(executable_path.display().to_string())
            .chain(arguments.iter().cloned())
            .map(Value::String)
            .collect();

        let mut agent = Dictionary::new();
        agent.insert("Label".to_string(), Value::String(label.to_string()));
        agent.insert(
            "ProgramArguments".to_string(),
            Value::Array(program_arguments),
        );
        agent.insert(
            "StartInterval".to_string(),
            Value::Integer(Integer::from(interval.as_secs())),
        );
        agent.insert("RunAtLoad".to_string(), Value::Boolean(true));
        agent.insert(
            "StandardOutPath".to_string(),
            Value::String(AGENT_LOG_PATH.to_string()),
        );
        agent.insert(
            "StandardErrorPath".to_string(),
            Value::String(AGENT_LOG_PATH.to_string()),
        );

        let mut content = Vec::new();
        Value::Dictionary(agent)
            .to_writer_xml(&mut content)
            .context("Failed to serialize launch agent plist")?;
        Ok(content)
    }
}
