mod access;
mod agent;
mod cli;
mod config;
mod error;
mod preferences;
mod presenter;
mod store;

use clap::Parser as _;
use std::process::ExitCode;

use crate::cli::BackupStatusCLI;

fn main() -> ExitCode {
    let cli = BackupStatusCLI::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(cli.log_filter()))
        .init();

    if let Err(e) = cli.run() {
        eprintln!("{:#}", e);
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}
