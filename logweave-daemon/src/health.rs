//! Health reporting.
//!
//! Collects the pipeline's `health_check()` together with its counters
//! into a [`DaemonHealth`] snapshot, and logs it at a level matching
//! the status.
//!
//! # Status Rule
//!
//! - Pipeline disabled -> Healthy
//! - Otherwise the pipeline's own status (Healthy, Degraded or Unhealthy)

use logweave_core::pipeline::{HealthStatus, Pipeline};
use logweave_pipeline::LogPipeline;

/// Health snapshot for the entire daemon.
#[derive(Debug, Clone, PartialEq)]
pub struct DaemonHealth {
    /// Overall daemon health status.
    pub status: HealthStatus,
    /// Daemon uptime in seconds since build.
    pub uptime_secs: u64,
    /// Pipeline details, `None` when the pipeline is disabled.
    pub pipeline: Option<PipelineHealth>,
}

/// Health and throughput counters of the log pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineHealth {
    /// Result of the pipeline's health check.
    pub status: HealthStatus,
    /// Lifecycle state name (initialized, running, stopped).
    pub state: &'static str,
    /// Records produced by the parser.
    pub processed: u64,
    /// Records that passed the filter.
    pub filtered: u64,
    /// Records delivered to destinations.
    pub streamed: u64,
    /// Records dropped by stream backpressure.
    pub dropped: u64,
    /// Capture sources that exhausted their retries.
    pub failed_sources: Vec<String>,
}

impl PipelineHealth {
    /// Collect the current health of `pipeline`.
    pub async fn collect(pipeline: &LogPipeline) -> Self {
        let stats = pipeline.streamer_stats();
        Self {
            status: pipeline.health_check().await,
            state: pipeline.state_name(),
            processed: pipeline.processed_count(),
            filtered: pipeline.filtered_count(),
            streamed: stats.flushed_logs,
            dropped: stats.dropped_logs,
            failed_sources: pipeline.failed_sources(),
        }
    }
}

impl DaemonHealth {
    /// Build a snapshot from optional pipeline health.
    pub fn new(uptime_secs: u64, pipeline: Option<PipelineHealth>) -> Self {
        let status = pipeline
            .as_ref()
            .map_or(HealthStatus::Healthy, |p| p.status.clone());
        Self {
            status,
            uptime_secs,
            pipeline,
        }
    }
}

/// Log a health snapshot. Healthy reports go to `info`, degraded to `warn`,
/// unhealthy to `error`.
pub fn report(health: &DaemonHealth) {
    let (processed, filtered, streamed, dropped) = health.pipeline.as_ref().map_or(
        (0, 0, 0, 0),
        |p| (p.processed, p.filtered, p.streamed, p.dropped),
    );

    match &health.status {
        HealthStatus::Healthy => tracing::info!(
            uptime_secs = health.uptime_secs,
            processed,
            filtered,
            streamed,
            dropped,
            "daemon healthy"
        ),
        HealthStatus::Degraded(reason) => tracing::warn!(
            uptime_secs = health.uptime_secs,
            reason = %reason,
            processed,
            dropped,
            "daemon degraded"
        ),
        HealthStatus::Unhealthy(reason) => tracing::error!(
            uptime_secs = health.uptime_secs,
            reason = %reason,
            "daemon unhealthy"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pipeline_health(status: HealthStatus) -> PipelineHealth {
        PipelineHealth {
            status,
            state: "running",
            processed: 10,
            filtered: 4,
            streamed: 4,
            dropped: 0,
            failed_sources: Vec::new(),
        }
    }

    #[test]
    fn disabled_pipeline_is_healthy() {
        let health = DaemonHealth::new(5, None);
        assert!(health.status.is_healthy());
        assert_eq!(health.uptime_secs, 5);
        report(&health);
    }

    #[test]
    fn status_follows_pipeline() {
        let degraded = HealthStatus::Degraded("capture sources failed: tail:/x".to_owned());
        let health = DaemonHealth::new(1, Some(pipeline_health(degraded.clone())));
        assert_eq!(health.status, degraded);
        report(&health);

        let unhealthy = HealthStatus::Unhealthy("stopped".to_owned());
        let health = DaemonHealth::new(1, Some(pipeline_health(unhealthy.clone())));
        assert_eq!(health.status, unhealthy);
        report(&health);
    }
}
