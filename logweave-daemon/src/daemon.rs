//! Daemon lifecycle -- pipeline assembly, PID file, main loop and shutdown.
//!
//! The [`Daemon`] loads configuration, builds the [`LogPipeline`] when it is
//! enabled, starts it, reports health periodically and stops it when a
//! shutdown signal arrives. Stopping the pipeline drains in-flight records
//! and streams the final aggregate before destinations are closed.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::Result;
use tokio::sync::{broadcast, mpsc};
use tokio::time::Interval;

use logweave_core::config::LogweaveConfig;
use logweave_core::metrics as m;
use logweave_core::pipeline::Pipeline;
use logweave_pipeline::{CaptureEvent, LogPipeline, LogPipelineBuilder, PipelineConfig};

use crate::health::{self, DaemonHealth, PipelineHealth};

/// Capture event channel capacity.
const CAPTURE_EVENT_CAPACITY: usize = 256;

/// Options for [`Daemon::run`].
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// PID file written on start and removed on exit.
    pub pid_file: Option<PathBuf>,
    /// Interval between health reports. `None` disables them.
    pub health_interval: Option<Duration>,
}

/// The daemon.
pub struct Daemon {
    /// Loaded and validated configuration.
    config: LogweaveConfig,
    /// Log pipeline (`None` when disabled in configuration).
    pipeline: Option<LogPipeline>,
    /// Capture lifecycle events, logged while running.
    capture_rx: Option<mpsc::Receiver<CaptureEvent>>,
    /// Build time (for uptime reporting).
    start_time: Instant,
}

impl Daemon {
    /// Load `logweave.toml`, apply environment overrides and build the daemon.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file cannot be read, parsed or
    /// validated, or if the pipeline cannot be built from it.
    pub async fn build(config_path: &Path) -> Result<Self> {
        let config = LogweaveConfig::load(config_path)
            .await
            .map_err(|e| anyhow::anyhow!("failed to load config: {}", e))?;
        Self::build_from_config(config)
    }

    /// Build from an already-loaded configuration.
    pub fn build_from_config(config: LogweaveConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|e| anyhow::anyhow!("config validation failed: {}", e))?;

        let (pipeline, capture_rx) = if config.pipeline.enabled {
            tracing::info!("initializing log pipeline");
            let pipeline_config = PipelineConfig::from_core(&config.pipeline)
                .map_err(|e| anyhow::anyhow!("invalid pipeline config: {}", e))?;
            let (capture_tx, capture_rx) = mpsc::channel(CAPTURE_EVENT_CAPACITY);
            let pipeline = LogPipelineBuilder::new()
                .config(pipeline_config)
                .capture_events(capture_tx)
                .build()
                .map_err(|e| anyhow::anyhow!("failed to build log pipeline: {}", e))?;
            (Some(pipeline), Some(capture_rx))
        } else {
            tracing::info!("log pipeline disabled in configuration");
            (None, None)
        };

        record_daemon_metrics();

        Ok(Self {
            config,
            pipeline,
            capture_rx,
            start_time: Instant::now(),
        })
    }

    /// Start the pipeline, if enabled.
    pub async fn start(&mut self) -> Result<()> {
        if let Some(pipeline) = &mut self.pipeline {
            pipeline
                .start()
                .await
                .map_err(|e| anyhow::anyhow!("failed to start log pipeline: {}", e))?;
            tracing::info!(
                sources = pipeline.config().capture.sources.len(),
                destinations = pipeline.config().streamer.destinations.len(),
                "log pipeline started"
            );
        }
        Ok(())
    }

    /// Stop the pipeline, draining in-flight records.
    pub async fn stop(&mut self) -> Result<()> {
        if let Some(pipeline) = &mut self.pipeline {
            tracing::info!("stopping log pipeline");
            pipeline
                .stop()
                .await
                .map_err(|e| anyhow::anyhow!("failed to stop log pipeline: {}", e))?;
        }
        Ok(())
    }

    /// Run until SIGTERM or SIGINT (Ctrl-C).
    pub async fn run(&mut self, options: &RunOptions) -> Result<()> {
        let signal = shutdown_signal()?;
        self.run_until(options, signal).await
    }

    /// Run until `shutdown` resolves, then stop gracefully.
    ///
    /// The PID file, if configured, exists exactly while this method runs.
    pub async fn run_until<F>(&mut self, options: &RunOptions, shutdown: F) -> Result<()>
    where
        F: Future<Output = &'static str>,
    {
        if let Some(path) = &options.pid_file {
            write_pid_file(path)?;
        }

        let result = self.serve(options, shutdown).await;

        if let Some(path) = &options.pid_file {
            remove_pid_file(path);
        }
        result
    }

    async fn serve<F>(&mut self, options: &RunOptions, shutdown: F) -> Result<()>
    where
        F: Future<Output = &'static str>,
    {
        self.start().await?;

        let (shutdown_tx, _) = broadcast::channel(4);
        let capture_logger = self
            .capture_rx
            .take()
            .map(|rx| spawn_capture_logger(rx, shutdown_tx.subscribe()));

        let mut ticker = options.health_interval.map(|period| {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            interval
        });

        tracing::info!("entering main event loop");
        tokio::pin!(shutdown);
        let signal = loop {
            tokio::select! {
                signal = &mut shutdown => break signal,
                _ = tick(&mut ticker) => {
                    let snapshot = self.health().await;
                    health::report(&snapshot);
                }
            }
        };
        tracing::info!(signal, "shutdown signal received");

        let _ = shutdown_tx.send(());
        if let Some(task) = capture_logger {
            let _ = task.await;
        }

        self.stop().await
    }

    /// Current health snapshot.
    pub async fn health(&self) -> DaemonHealth {
        let uptime_secs = self.start_time.elapsed().as_secs();
        #[allow(clippy::cast_precision_loss)]
        metrics::gauge!(m::DAEMON_UPTIME_SECONDS).set(uptime_secs as f64);

        let pipeline = match &self.pipeline {
            Some(pipeline) => Some(PipelineHealth::collect(pipeline).await),
            None => None,
        };
        DaemonHealth::new(uptime_secs, pipeline)
    }

    /// The loaded configuration.
    pub fn config(&self) -> &LogweaveConfig {
        &self.config
    }

    /// The log pipeline, if enabled.
    pub fn pipeline(&self) -> Option<&LogPipeline> {
        self.pipeline.as_ref()
    }
}

/// Resolve on the next tick, or never when health reporting is disabled.
async fn tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Install SIGTERM and SIGINT handlers.
///
/// Returns a future resolving to the name of the signal received.
#[cfg(unix)]
fn shutdown_signal() -> Result<impl Future<Output = &'static str>> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("failed to install SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("failed to install SIGINT handler: {}", e))?;

    Ok(async move {
        tokio::select! {
            _ = sigterm.recv() => "SIGTERM",
            _ = sigint.recv() => "SIGINT",
        }
    })
}

#[cfg(not(unix))]
fn shutdown_signal() -> Result<impl Future<Output = &'static str>> {
    Ok(async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl-C");
        }
        "ctrl-c"
    })
}

/// Write the current process PID to a file.
///
/// Fails if the file already exists, so two daemons never share one.
fn write_pid_file(path: &Path) -> Result<()> {
    use std::fs::{self, OpenOptions};
    use std::io::{ErrorKind, Write};

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            fs::DirBuilder::new()
                .mode(0o700)
                .recursive(true)
                .create(parent)?;
        }
        #[cfg(not(unix))]
        {
            fs::create_dir_all(parent)?;
        }
    }

    let pid = std::process::id();

    let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            let existing_pid = fs::read_to_string(path).unwrap_or_else(|_| "unknown".to_owned());
            return Err(anyhow::anyhow!(
                "PID file {} already exists with PID: {}. Is another instance running?",
                path.display(),
                existing_pid.trim()
            ));
        }
        Err(e) => return Err(e.into()),
    };

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(fs::Permissions::from_mode(0o600))?;
    }

    writeln!(file, "{}", pid)?;

    tracing::info!(pid, path = %path.display(), "PID file written");
    Ok(())
}

/// Remove the PID file. Logs a warning but does not fail.
fn remove_pid_file(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        tracing::warn!(
            path = %path.display(),
            error = %e,
            "failed to remove PID file"
        );
    } else {
        tracing::info!(path = %path.display(), "PID file removed");
    }
}

/// Spawn a task that logs capture source lifecycle events.
fn spawn_capture_logger(
    mut capture_rx: mpsc::Receiver<CaptureEvent>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                event = capture_rx.recv() => {
                    match event {
                        Some(event) => log_capture_event(&event),
                        None => {
                            tracing::debug!("capture event channel closed, exiting logger");
                            break;
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    tracing::debug!("capture event logger shutting down");
                    break;
                }
            }
        }
    })
}

fn log_capture_event(event: &CaptureEvent) {
    match event {
        CaptureEvent::SourceStarted { source_id } => {
            tracing::info!(source = %source_id, "capture source started");
        }
        CaptureEvent::SourceCompleted { source_id, lines } => {
            tracing::info!(source = %source_id, lines, "capture source completed");
        }
        CaptureEvent::SourceRetry {
            source_id,
            attempt,
            error,
        } => {
            tracing::warn!(source = %source_id, attempt, error = %error, "capture source retrying");
        }
        CaptureEvent::SourceFailed { source_id, error } => {
            tracing::error!(source = %source_id, error = %error, "capture source failed");
        }
        CaptureEvent::ProcessExited { source_id, code } => {
            tracing::info!(source = %source_id, code = ?code, "captured process exited");
        }
    }
}

/// Record daemon-level metrics (build info).
fn record_daemon_metrics() {
    metrics::gauge!(m::DAEMON_BUILD_INFO, "version" => env!("CARGO_PKG_VERSION")).set(1.0);
    tracing::debug!(version = env!("CARGO_PKG_VERSION"), "daemon metrics recorded");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pid_file_is_exclusive() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run").join("logweave.pid");

        write_pid_file(&path).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.trim(), std::process::id().to_string());

        let err = write_pid_file(&path).unwrap_err();
        assert!(err.to_string().contains("already exists"));

        remove_pid_file(&path);
        assert!(!path.exists());
        // second removal only warns
        remove_pid_file(&path);
    }

    #[tokio::test]
    async fn disabled_ticker_never_fires() {
        let mut ticker = None;
        let fired = tokio::time::timeout(Duration::from_millis(20), tick(&mut ticker)).await;
        assert!(fired.is_err());
    }

    #[test]
    fn capture_events_are_logged_without_panicking() {
        for event in [
            CaptureEvent::SourceStarted {
                source_id: "file:/a".to_owned(),
            },
            CaptureEvent::SourceCompleted {
                source_id: "file:/a".to_owned(),
                lines: 3,
            },
            CaptureEvent::SourceRetry {
                source_id: "tail:/b".to_owned(),
                attempt: 1,
                error: "missing".to_owned(),
            },
            CaptureEvent::SourceFailed {
                source_id: "tail:/b".to_owned(),
                error: "missing".to_owned(),
            },
            CaptureEvent::ProcessExited {
                source_id: "process:ls".to_owned(),
                code: Some(0),
            },
        ] {
            log_capture_event(&event);
        }
    }
}
