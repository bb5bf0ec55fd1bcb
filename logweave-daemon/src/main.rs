use std::time::Duration;

use anyhow::Result;
use clap::Parser;

use logweave_core::config::LogweaveConfig;
use logweave_daemon::cli::DaemonCli;
use logweave_daemon::logging;
use logweave_daemon::{Daemon, RunOptions};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = DaemonCli::parse();

    let mut config = LogweaveConfig::load(&cli.config)
        .await
        .map_err(|e| anyhow::anyhow!("failed to load config {}: {}", cli.config.display(), e))?;

    // CLI overrides win over file and environment
    if let Some(level) = cli.log_level {
        config.general.log_level = level;
    }
    if let Some(format) = cli.log_format {
        config.general.log_format = format;
    }

    if cli.validate {
        config
            .validate()
            .map_err(|e| anyhow::anyhow!("config validation failed: {}", e))?;
        logweave_pipeline::PipelineConfig::from_core(&config.pipeline)
            .and_then(|pipeline| pipeline.validate())
            .map_err(|e| anyhow::anyhow!("invalid pipeline config: {}", e))?;
        println!("configuration OK: {}", cli.config.display());
        return Ok(());
    }

    logging::init_tracing(&config.general)?;
    logweave_core::metrics::describe_all();

    tracing::info!(
        config = %cli.config.display(),
        version = env!("CARGO_PKG_VERSION"),
        "logweave-daemon starting"
    );

    let mut daemon = Daemon::build_from_config(config)?;
    let options = RunOptions {
        pid_file: cli.pid_file,
        health_interval: (cli.health_interval_secs > 0)
            .then(|| Duration::from_secs(cli.health_interval_secs)),
    };
    daemon.run(&options).await?;

    tracing::info!("logweave-daemon shut down");
    Ok(())
}
