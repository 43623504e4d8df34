use anyhow::{Context, Ok, Result};
use config::{Config, File};
use humantime_serde::re::humantime::format_duration;
use serde::{Deserialize, Serialize};
use std::{env, fmt::Display, fs, path::PathBuf, time::Duration};

const DEFAULT_PREFERENCES_FILE: &str = "/Library/Preferences/com.apple.TimeMachine.plist";
const DEFAULT_WIDGET_KIND: &str = "BackupStatusWidget";
const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(15 * 60);
const MIN_SYNC_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct BackupStatusConfig {
    /// Time Machine preferences file offered when granting access
    pub preferences_file: PathBuf,
    /// Directory shared by the syncing and displaying processes
    pub container_dir: PathBuf,
    /// Kind of display surface refreshed after every sync
    pub widget_kind: String,
    /// How often the login agent syncs
    #[serde(with = "humantime_serde")]
    pub sync_interval: Duration,
}

impl Default for BackupStatusConfig {
    fn default() -> Self {
        Self {
            preferences_file: PathBuf::from(DEFAULT_PREFERENCES_FILE),
            container_dir: Self::default_container_dir(),
            widget_kind: DEFAULT_WIDGET_KIND.to_string(),
            sync_interval: DEFAULT_SYNC_INTERVAL,
        }
    }
}

impl BackupStatusConfig {
    /// Loads the config file, falling back to defaults when none exists.
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let mut builder = Config::builder();

        match path {
            Some(config_path) => {
                if !config_path.exists() {
                    anyhow::bail!(
                        "Config file `{}` does not exist",
                        config_path.to_string_lossy()
                    );
                }
                builder = builder.add_source(File::from(config_path));
            }
            None => match Self::find_config_file() {
                Some(config_path) => {
                    log::debug!("Using config file `{}`", config_path.display());
                    builder = builder.add_source(File::from(config_path));
                }
                None => log::debug!("No config file found, using defaults"),
            },
        }

        let config = builder
            .build()?
            .try_deserialize::<Self>()
            .with_context(|| "Invalid configuration")?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.widget_kind.trim().is_empty() {
            anyhow::bail!("`widget-kind` must not be empty");
        }

        if self.widget_kind.contains(['/', '\\']) {
            anyhow::bail!(
                "`widget-kind` must not contain path separators, found `{}`",
                self.widget_kind
            );
        }

        if self.sync_interval < MIN_SYNC_INTERVAL {
            anyhow::bail!(
                "`sync-interval` must be at least {}, found {}",
                format_duration(MIN_SYNC_INTERVAL),
                format_duration(self.sync_interval)
            );
        }

        Ok(())
    }

    fn find_config_file() -> Option<PathBuf> {
        let home = env::var("HOME").ok();
        Self::config_candidates(home.as_deref())
            .into_iter()
            .find(|path| path.exists())
    }

    /// The working directory first, then the home locations when `$HOME` is set.
    fn config_candidates(home: Option<&str>) -> Vec<PathBuf> {
        let mut possible_paths = vec![PathBuf::from("backup-status.yaml")];
        if let Some(home) = home {
            possible_paths.push(PathBuf::from(home).join(".config/backup-status/backup-status.yaml"));
            possible_paths.push(PathBuf::from(home).join(".config/backup-status.yaml"));
        }

        possible_paths
    }

    fn default_config_path() -> Result<PathBuf> {
        let home = env::var("HOME").with_context(|| "$HOME environment variable not set")?;

        Ok(PathBuf::from(home).join(".config/backup-status/backup-status.yaml"))
    }

    fn default_container_dir() -> PathBuf {
        let Some(home) = env::var("HOME").ok() else {
            return env::temp_dir().join("backup-status");
        };

        if cfg!(target_os = "macos") {
            PathBuf::from(home).join("Library/Group Containers/group.backup-status")
        } else {
            PathBuf::from(home).join(".local/share/backup-status")
        }
    }

    pub fn generate_sample(output_path: Option<PathBuf>) -> Result<String> {
        let config_path = match output_path {
            Some(path) => path,
            None => Self::default_config_path()?,
        };

        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let yaml_content = serde_yml::to_string(&Self::default())?;
        fs::write(&config_path, &yaml_content)?;

        eprintln!(
            "Sample config file created at `{}`",
            config_path.to_string_lossy()
        );

        Ok(yaml_content)
    }
}

impl Display for BackupStatusConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let w_key = 18;

        writeln!(
            f,
            "  {:<w_key$} {}",
            "preferences-file",
            self.preferences_file.display()
        )?;
        writeln!(
            f,
            "  {:<w_key$} {}",
            "container-dir",
            self.container_dir.display()
        )?;
        writeln!(f, "  {:<w_key$} {}", "widget-kind", self.widget_kind)?;
        write!(
            f,
            "  {:<w_key$} {}",
            "sync-interval",
            format_duration(self.sync_interval)
        )
    }
}
