use anyhow::{Context as _, Ok, Result};
use std::{
    env, fs,
    path::{Path, PathBuf},
    process::Command,
    time::Duration,
};

use super::{LoginAgent, sync_arguments};

const UNIT_NAME: &str = "backup-status-sync";

pub struct SystemdAgent;

impl LoginAgent for SystemdAgent {
    fn install(interval: Duration, config: Option<&Path>) -> Result<()> {
        let unit_dir = Self::get_unit_dir()?;
        let current_exe = env::current_exe().context("Failed to get current executable path")?;

        let service_path = unit_dir.join(format!("{}.service", UNIT_NAME));
        fs::write(
            &service_path,
            Self::generate_service(&current_exe, &sync_arguments(config)),
        )
        .with_context(|| format!("Failed to write service file to {}", service_path.display()))?;

        let timer_path = unit_dir.join(format!("{}.timer", UNIT_NAME));
        fs::write(&timer_path, Self::generate_timer(interval))
            .with_context(|| format!("Failed to write timer file to {}", timer_path.display()))?;

        Self::systemctl(&["daemon-reload"])?;
        Self::systemctl(&["enable", "--now", &format!("{}.timer", UNIT_NAME)])?;

        eprintln!("Installed login agent `{}`", UNIT_NAME);
        Ok(())
    }

    fn remove() -> Result<()> {
        let unit_dir = Self::get_unit_dir()?;
        let service_path = unit_dir.join(format!("{}.service", UNIT_NAME));
        let timer_path = unit_dir.join(format!("{}.timer", UNIT_NAME));

        if !timer_path.exists() && !service_path.exists() {
            return Ok(());
        }

        if let Err(e) = Self::systemctl(&["disable", "--now", &format!("{}.timer", UNIT_NAME)]) {
            log::warn!("{:#}", e);
        }

        for path in [&timer_path, &service_path] {
            if path.exists() {
                fs::remove_file(path)
                    .with_context(|| format!("Failed to remove unit file {}", path.display()))?;
            }
        }

        Self::systemctl(&["daemon-reload"])?;

        eprintln!("Removed login agent `{}`", UNIT_NAME);
        Ok(())
    }
}

impl SystemdAgent {
    fn systemctl(args: &[&str]) -> Result<()> {
        let output = Command::new("systemctl")
            .arg("--user")
            .args(args)
            .output()
            .with_context(|| format!("Failed to execute systemctl {}", args.join(" ")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("systemctl {} failed: {}", args.join(" "), stderr);
        }

        Ok(())
    }

    fn get_unit_dir() -> Result<PathBuf> {
        let home_dir = env::var("HOME").context("Failed to get HOME environment variable")?;
        let unit_dir = Path::new(&home_dir).join(".config/systemd/user");
        fs::create_dir_all(&unit_dir)
            .with_context(|| format!("Failed to create directory {}", unit_dir.display()))?;
        Ok(unit_dir)
    }

    fn generate_service(exec_path: &Path, arguments: &[String]) -> String {
        let command = std::iter::once(exec_path.display().to_string())
            .chain(arguments.iter().cloned())
            .map(|arg| quote_arg(&arg))
            .collect::<Vec<_>>()
            .join(" ");

        format!(
            "[Unit]
Description=Backup Status sync

[Service]
Type=oneshot
ExecStart={}
",
            command
        )
    }

    fn generate_timer(interval: Duration) -> String {
        format!(
            "[Unit]
Description=Periodic Backup Status sync

[Timer]
OnBootSec=1min
OnUnitActiveSec={}s
Unit={}.service

[Install]
WantedBy=timers.target
",
            interval.as_secs(),
            UNIT_NAME
        )
    }
}

fn quote_arg(arg: &str) -> String {
    if arg.contains(|c: char| c.is_whitespace() || c == '"' || c == '\\') {
        format!("\"{}\"", arg.replace('\\', "\\\\").replace('"', "\\\""))
    } else {
        arg.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_runs_sync_with_config() {
        let service = SystemdAgent::generate_service(
            Path::new("/usr/bin/backup-status"),
            &sync_arguments(Some(Path::new("/home/me/my config.yaml"))),
        );
        assert!(service.contains(
            "ExecStart=/usr/bin/backup-status --config \"/home/me/my config.yaml\" sync\n"
        ));
        assert!(service.contains("Type=oneshot"));
    }

    #[test]
    fn timer_uses_sync_interval() {
        let timer = SystemdAgent::generate_timer(Duration::from_secs(900));
        assert!(timer.contains("OnUnitActiveSec=900s"));
        assert!(timer.contains("Unit=backup-status-sync.service"));
        assert!(timer.contains("WantedBy=timers.target"));
    }
}
