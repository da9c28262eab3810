//! CLI argument definitions for the bundle updater.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use clap_verbosity_flag::{Verbosity, WarnLevel};
use colorchoice_clap::Color;

#[derive(Parser)]
#[command(
    name = "bundle-updater",
    version,
    about = "Install and update a platform bundle",
    long_about = "Install and update an externally distributed platform bundle.\n\n\
                  Releases are described by <base-url>/<platform>/<arch>/meta.json;\n\
                  archives are installed with a crash-safe directory swap."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[command(flatten)]
    pub bundle: BundleArgs,

    /// Adjust log verbosity (-v for info, -vv for debug, -q for errors only).
    #[command(flatten)]
    pub verbosity: Verbosity<WarnLevel>,

    /// Control ANSI color output (auto, always, never).
    #[command(flatten)]
    pub color: Color,

    /// Explicit log level (overrides -v/-q flags).
    #[arg(long = "log-level", value_enum, global = true)]
    pub log_level: Option<LogLevelArg>,

    /// Log output format (pretty for human, json for machine parsing).
    #[arg(
        long = "log-format",
        value_enum,
        default_value = "pretty",
        global = true
    )]
    pub log_format: LogFormatArg,

    /// Write logs to a file instead of stderr.
    #[arg(long = "log-file", value_name = "PATH", global = true)]
    pub log_file: Option<PathBuf>,
}

/// Where the bundle comes from and where it goes. Flags override the
/// configuration file.
#[derive(Args)]
pub struct BundleArgs {
    /// Configuration file.
    #[arg(
        long = "config",
        value_name = "PATH",
        default_value = "bundle-updater.json",
        global = true
    )]
    pub config: PathBuf,

    /// Base URL releases are published under.
    #[arg(long = "base-url", value_name = "URL", global = true)]
    pub base_url: Option<String>,

    /// Use an S3 bucket as the release location.
    #[arg(long = "s3-bucket", value_name = "BUCKET", global = true, conflicts_with = "base_url")]
    pub s3_bucket: Option<String>,

    /// Folder inside the S3 bucket.
    #[arg(long = "s3-folder", value_name = "FOLDER", global = true, requires = "s3_bucket")]
    pub s3_folder: Option<String>,

    /// Directory the bundle is installed under.
    #[arg(long = "root", value_name = "DIR", global = true)]
    pub root: Option<PathBuf>,

    /// Bundle name; also the executable name.
    #[arg(long = "name", global = true)]
    pub name: Option<String>,

    /// Name shown in messages.
    #[arg(long = "display-name", global = true)]
    pub display_name: Option<String>,

    /// Architecture directory on the server.
    #[arg(long = "arch", global = true)]
    pub arch: Option<String>,

    /// Host application version used when a release does not name one.
    #[arg(long = "plugin-version", global = true)]
    pub plugin_version: Option<String>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Show the installed bundle and where releases are fetched from.
    Status {
        /// Print machine-readable JSON.
        #[arg(long)]
        json: bool,
    },

    /// Check whether a newer release is available.
    Check {
        /// Only check when the configured interval has passed, and stay
        /// quiet unless an update is found.
        #[arg(long)]
        scheduled: bool,
    },

    /// Download and install the newest release if it is newer.
    Update {
        /// Install the remote release even if it is not newer.
        #[arg(long)]
        force: bool,
    },

    /// Download and install the remote release (first download).
    Install,

    /// Repair an installation left behind by an interrupted update.
    Recover,

    /// Skip a release in scheduled checks.
    Skip {
        /// Version to skip (default: the current remote release).
        #[arg(value_name = "VERSION", conflicts_with = "clear")]
        version: Option<String>,

        /// Stop skipping any version.
        #[arg(long)]
        clear: bool,
    },

    /// Pick the release closest to a target version.
    Closest {
        /// Version to match.
        #[arg(value_name = "TARGET")]
        target: String,

        /// Available versions.
        #[arg(value_name = "VERSIONS", required = true)]
        versions: Vec<String>,
    },
}

/// CLI log level choices.
#[derive(Clone, Copy, ValueEnum)]
pub enum LogLevelArg {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// CLI log format choices.
#[derive(Clone, Copy, ValueEnum)]
pub enum LogFormatArg {
    Pretty,
    Compact,
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "bundle-updater",
            "update",
            "--force",
            "--base-url",
            "https://example.com/tool/",
            "--root",
            "/opt/tools",
        ])
        .unwrap();
        assert!(matches!(cli.command, Command::Update { force: true }));
        assert_eq!(
            cli.bundle.base_url.as_deref(),
            Some("https://example.com/tool/")
        );
        assert_eq!(cli.bundle.root, Some(PathBuf::from("/opt/tools")));
    }

    #[test]
    fn test_closest_requires_versions() {
        assert!(Cli::try_parse_from(["bundle-updater", "closest", "1.0"]).is_err());
        let cli =
            Cli::try_parse_from(["bundle-updater", "closest", "1.5", "1.0", "2.0"]).unwrap();
        match cli.command {
            Command::Closest { target, versions } => {
                assert_eq!(target, "1.5");
                assert_eq!(versions, vec!["1.0", "2.0"]);
            }
            _ => panic!("expected closest"),
        }
    }

    #[test]
    fn test_s3_conflicts_with_base_url() {
        assert!(
            Cli::try_parse_from([
                "bundle-updater",
                "status",
                "--base-url",
                "https://example.com/",
                "--s3-bucket",
                "b",
            ])
            .is_err()
        );
    }
}
