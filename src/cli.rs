use anyhow::{Context, Ok, Result};
use chrono::{Local, Utc};
use clap::{ArgAction, CommandFactory as _, Parser, Subcommand};
use std::{io, path::PathBuf};

use crate::access::{FileGrantResource, Grant};
use crate::agent::{BackupStatusAgent, LoginAgent};
use crate::config::BackupStatusConfig;
use crate::preferences::Preferences;
use crate::presenter::{StatusView, next_refresh_points};
use crate::store::{ContainerStore, PreferencesStore, TimelineReloader};

type SharedPreferences = PreferencesStore<ContainerStore, TimelineReloader>;

/// Time Machine backup status for your desktop and terminal
#[derive(Debug, Parser)]
#[clap(
    version,
    about,
    author,
    long_about=None,
    after_help="Reading the Time Machine configuration requires Full Disk Access for your terminal",
)]
pub struct BackupStatusCLI {
    /// Path to the config file to use
    #[clap(short, long, global = true)]
    config: Option<PathBuf>,
    /// Print more diagnostics (-v info, -vv debug)
    #[clap(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,
    #[clap(subcommand)]
    command: BackupStatusOptions,
}

impl BackupStatusCLI {
    /// Log filter used when `RUST_LOG` is not set.
    pub fn log_filter(&self) -> &'static str {
        match self.verbose {
            0 => "warn",
            1 => "info",
            _ => "debug",
        }
    }

    pub fn run(self) -> Result<()> {
        self.command.parse(self.config)
    }
}

#[derive(Debug, Subcommand)]
#[clap(rename_all = "kebab-case")]
enum BackupStatusOptions {
    /// Initialize by creating a sample config file
    Init {
        /// Path to the config file
        #[clap(short, long)]
        output: Option<PathBuf>,
    },
    /// Grant read access to the Time Machine configuration and sync it
    Grant {
        /// Preferences file to grant, defaults to the configured one
        #[clap(short, long)]
        path: Option<PathBuf>,
    },
    /// Revoke access and forget the synced status
    Revoke,
    /// Read the Time Machine configuration and share it with display surfaces
    Sync,
    /// Show the backup status
    Status {
        /// Print as JSON
        #[clap(long)]
        json: bool,
        /// Show sample data instead of the synced status
        #[clap(long)]
        demo: bool,
    },
    /// Forget the synced status
    Clear,
    /// Show when display surfaces should refresh next
    Schedule,
    /// Manage the agent syncing at login and periodically afterwards
    Agent {
        #[clap(subcommand)]
        action: AgentAction,
    },
    /// Show the effective configuration
    Config,
    /// Generate shell completions
    Completions {
        /// The shell to generate the completions for
        shell: clap_complete::Shell,
    },
}

#[derive(Debug, Subcommand)]
enum AgentAction {
    /// Sync at login and every `sync-interval`
    Install,
    /// Stop syncing automatically
    Remove,
}

impl BackupStatusOptions {
    fn parse(self, config: Option<PathBuf>) -> Result<()> {
        match self {
            Self::Init { output } => {
                BackupStatusConfig::generate_sample(output)
                    .with_context(|| "Failed to create config sample file")?;
            }
            Self::Grant { path } => {
                let conf = BackupStatusConfig::load(config)?;
                let store = open_store(&conf);

                let path = path.unwrap_or_else(|| conf.preferences_file.clone());
                let grant = Grant::create(&path)?;
                grant.save(store.slots())?;
                eprintln!("Access granted to `{}`", grant.path.display());

                sync(&store)?;
            }
            Self::Revoke => {
                let conf = BackupStatusConfig::load(config)?;
                let store = open_store(&conf);

                if Grant::revoke(store.slots())? {
                    eprintln!("Access revoked");
                } else {
                    eprintln!("No access was granted");
                }
                store.clear();
            }
            Self::Sync => {
                let conf = BackupStatusConfig::load(config)?;
                sync(&open_store(&conf))?;
            }
            Self::Status { json, demo } => {
                let now = Utc::now();
                let preferences = if demo {
                    Some(Preferences::demo(now))
                } else {
                    let conf = BackupStatusConfig::load(config)?;
                    open_store(&conf).load()
                };

                let view = StatusView::build(preferences.as_ref(), now);
                if json {
                    println!("{}", serde_json::to_string_pretty(&view)?);
                } else {
                    println!("{}", view);
                }
            }
            Self::Clear => {
                let conf = BackupStatusConfig::load(config)?;
                open_store(&conf).clear();
                eprintln!("Synced status cleared");
            }
            Self::Schedule => {
                for point in next_refresh_points(&Local::now()) {
                    println!("• {}", point.format("%Y-%m-%d %H:%M:%S %Z"));
                }
            }
            Self::Agent { action } => match action {
                AgentAction::Install => {
                    let conf = BackupStatusConfig::load(config.clone())?;
                    let config_path = config.map(|path| path.canonicalize()).transpose()?;
                    BackupStatusAgent::install(conf.sync_interval, config_path.as_deref())?;
                }
                AgentAction::Remove => BackupStatusAgent::remove()?,
            },
            Self::Config => {
                let conf = BackupStatusConfig::load(config)?;
                println!("{}", conf);
            }
            Self::Completions { shell } => {
                let mut cmd = BackupStatusCLI::command();
                let name = cmd.get_name().to_string();

                clap_complete::generate(shell, &mut cmd, name, &mut io::stdout());
            }
        }

        Ok(())
    }
}

fn open_store(conf: &BackupStatusConfig) -> SharedPreferences {
    PreferencesStore::new(
        ContainerStore::new(&conf.container_dir),
        TimelineReloader::new(&conf.container_dir),
        conf.widget_kind.clone(),
    )
}

/// Reads the granted preferences file into the shared slot.
fn sync(store: &SharedPreferences) -> Result<()> {
    let grant = Grant::load(store.slots())?
        .with_context(|| "No access granted, run `backup-status grant` first")?;

    let preferences = Preferences::read(&FileGrantResource::new(&grant)).with_context(|| {
        format!(
            "Failed reading Time Machine configuration from `{}`",
            grant.path.display()
        )
    })?;

    if !store.store(&preferences) {
        anyhow::bail!("Failed sharing the Time Machine configuration");
    }

    eprintln!(
        "Synced {} destination(s) from `{}`",
        preferences.destinations().len(),
        grant.path.display()
    );
    Ok(())
}
