//! CLI argument definitions for logweave-daemon.
//!
//! Uses `clap` v4 derive macros to parse command-line arguments.

use std::path::PathBuf;

use clap::Parser;

/// logweave log pipeline daemon.
///
/// Captures logs from the configured sources, parses, filters and
/// aggregates them, and streams the results to the configured destinations.
#[derive(Parser, Debug)]
#[command(name = "logweave-daemon")]
#[command(version, about, long_about = None)]
pub struct DaemonCli {
    /// Path to logweave.toml configuration file.
    #[arg(short, long, default_value = "/etc/logweave/logweave.toml")]
    pub config: PathBuf,

    /// Override log level (trace, debug, info, warn, error).
    ///
    /// Takes precedence over the config file and environment variables.
    #[arg(long)]
    pub log_level: Option<String>,

    /// Override log format (json, pretty).
    ///
    /// Takes precedence over the config file and environment variables.
    #[arg(long)]
    pub log_format: Option<String>,

    /// Validate configuration file and exit without starting the daemon.
    #[arg(long)]
    pub validate: bool,

    /// Write the daemon PID to this file while running.
    #[arg(long)]
    pub pid_file: Option<PathBuf>,

    /// Seconds between health reports (0 disables them).
    #[arg(long, default_value_t = 30)]
    pub health_interval_secs: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        DaemonCli::command().debug_assert();
    }

    #[test]
    fn defaults() {
        let cli = DaemonCli::parse_from(["logweave-daemon"]);
        assert_eq!(cli.config, PathBuf::from("/etc/logweave/logweave.toml"));
        assert!(cli.log_level.is_none());
        assert!(!cli.validate);
        assert!(cli.pid_file.is_none());
        assert_eq!(cli.health_interval_secs, 30);
    }

    #[test]
    fn overrides() {
        let cli = DaemonCli::parse_from([
            "logweave-daemon",
            "-c",
            "./logweave.toml",
            "--log-level",
            "debug",
            "--log-format",
            "pretty",
            "--validate",
            "--pid-file",
            "/tmp/logweave.pid",
            "--health-interval-secs",
            "0",
        ]);
        assert_eq!(cli.config, PathBuf::from("./logweave.toml"));
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
        assert_eq!(cli.log_format.as_deref(), Some("pretty"));
        assert!(cli.validate);
        assert_eq!(cli.pid_file, Some(PathBuf::from("/tmp/logweave.pid")));
        assert_eq!(cli.health_interval_secs, 0);
    }
}
