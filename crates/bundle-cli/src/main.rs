//! Bundle updater CLI.

use std::io::{self, IsTerminal};

use bundle_cli::logging::{LogConfig, LogFormat, init_logging};
use bundle_updater::UpdateError;
use clap::{ColorChoice, Parser};
use tracing::level_filters::LevelFilter;

mod cli;
mod commands;
mod progress;

use crate::cli::{Cli, Command, LogFormatArg, LogLevelArg};
use crate::commands::{
    open_session, run_check, run_closest, run_install, run_recover, run_skip, run_status,
    run_update,
};

fn main() {
    let cli = Cli::parse();
    cli.color.write_global();
    let log_config = log_config_from_cli(&cli);
    if let Err(error) = init_logging(&log_config) {
        eprintln!("error: failed to initialize logging: {error}");
        std::process::exit(1);
    }

    let exit_code = match run(cli) {
        Ok(()) => 0,
        Err(error) => {
            eprintln!("error: {error:#}");
            exit_code_for(&error)
        }
    };
    std::process::exit(exit_code);
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let quiet = matches!(cli.command, Command::Check { scheduled: true });
    match cli.command {
        Command::Closest { target, versions } => run_closest(&target, &versions),
        command => {
            let mut session = open_session(&cli.bundle, quiet)?;
            match command {
                Command::Status { json } => run_status(&session, json),
                Command::Check { scheduled } => run_check(&mut session, scheduled),
                Command::Update { force } => run_update(&session, force),
                Command::Install => run_install(&session),
                Command::Recover => run_recover(&session),
                Command::Skip { version, clear } => run_skip(&mut session, version, clear),
                Command::Closest { target, versions } => run_closest(&target, &versions),
            }
        }
    }
}

/// 2 when the operation did not run to completion because of another
/// operation or the user; 1 for every other failure.
fn exit_code_for(error: &anyhow::Error) -> i32 {
    match error.downcast_ref::<UpdateError>() {
        Some(UpdateError::Busy | UpdateError::Canceled) => 2,
        _ => 1,
    }
}

/// Build logging configuration from CLI flags with consistent precedence.
fn log_config_from_cli(cli: &Cli) -> LogConfig {
    let mut config = LogConfig {
        level_filter: cli.verbosity.tracing_level_filter(),
        ..LogConfig::default()
    };
    config.use_env_filter = !(cli.verbosity.is_present() || cli.log_level.is_some());
    if let Some(level) = cli.log_level {
        config.level_filter = match level {
            LogLevelArg::Error => LevelFilter::ERROR,
            LogLevelArg::Warn => LevelFilter::WARN,
            LogLevelArg::Info => LevelFilter::INFO,
            LogLevelArg::Debug => LevelFilter::DEBUG,
            LogLevelArg::Trace => LevelFilter::TRACE,
        };
    }
    config.format = match cli.log_format {
        LogFormatArg::Pretty => LogFormat::Pretty,
        LogFormatArg::Compact => LogFormat::Compact,
        LogFormatArg::Json => LogFormat::Json,
    };
    config.log_file = cli.log_file.clone();
    config.with_ansi = match cli.color.color {
        ColorChoice::Always => true,
        ColorChoice::Never => false,
        ColorChoice::Auto => cli.log_file.is_none() && io::stderr().is_terminal(),
    };
    config
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_exit_codes() {
        let busy: anyhow::Result<()> = Err(UpdateError::Busy).context("update");
        assert_eq!(exit_code_for(&busy.unwrap_err()), 2);

        let canceled = anyhow::Error::new(UpdateError::Canceled);
        assert_eq!(exit_code_for(&canceled), 2);

        let other = anyhow::anyhow!("no release location configured");
        assert_eq!(exit_code_for(&other), 1);
    }

    #[test]
    fn test_log_level_flag_disables_env_filter() {
        let cli = Cli::parse_from(["bundle-updater", "--log-level", "debug", "recover"]);
        let config = log_config_from_cli(&cli);
        assert_eq!(config.level_filter, LevelFilter::DEBUG);
        assert!(!config.use_env_filter);

        let cli = Cli::parse_from(["bundle-updater", "status"]);
        assert!(log_config_from_cli(&cli).use_env_filter);
    }
}
