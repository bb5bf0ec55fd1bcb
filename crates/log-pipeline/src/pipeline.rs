//! 파이프라인 오케스트레이션 -- 수집/파싱/필터/집계/스트리밍의 전체 흐름을 관리합니다.
//!
//! [`LogPipeline`]은 core의 [`Pipeline`](logweave_core::pipeline::Pipeline) trait을 구현하여
//! `logweave-daemon`에서 start/stop/health_check 생명주기로 관리됩니다.
//!
//! # 내부 아키텍처
//! ```text
//! LogCapture -> mpsc -> [소스별 LogParser -> LogFilter] -> LogAggregator -> LogStreamer
//!      |                         ^                              |
//!   CaptureEvent ----------------+ (SourceCompleted: flush)     +-- AggregatorEvent (timer)
//! ```
//!
//! 처리 스테이지는 하나의 태스크에서 라인과 이벤트를 순서대로 다룹니다.
//! 라인 채널을 먼저 폴링하므로 `SourceCompleted`를 받았을 때 그 소스의 라인은
//! 이미 모두 처리된 상태입니다.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use logweave_core::error::{LogweaveError, PipelineError};
use logweave_core::pipeline::{HealthStatus, Pipeline};
use logweave_core::types::{ParsedLog, RawLine};

use crate::aggregator::{AggregatedResult, AggregatorEvent, LogAggregator, ProcessInfo};
use crate::capture::{CaptureEvent, LogCapture};
use crate::config::PipelineConfig;
use crate::error::LogPipelineError;
use crate::filter::LogFilter;
use crate::parser::{LogParser, ParserConfig};
use crate::streamer::{LogStreamer, StreamerEvent, StreamerStats};

/// 집계 타이머 이벤트 채널 용량
const AGGREGATOR_EVENT_CAPACITY: usize = 16;

/// 스트림 버퍼 사용률이 이 값을 넘으면 Degraded
const DEGRADED_UTILIZATION: f64 = 0.9;

/// 파이프라인 실행 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PipelineState {
    /// 초기화됨, 아직 시작하지 않음
    Initialized,
    /// 실행 중
    Running,
    /// 정지됨
    Stopped,
}

/// 처리 스테이지가 소유하는 상태. 정지 시 태스크에서 돌려받아 재시작에 씁니다.
struct Stage {
    parser_config: ParserConfig,
    filter: LogFilter,
    aggregator_rx: mpsc::Receiver<AggregatorEvent>,
}

#[derive(Default)]
struct Counters {
    processed: AtomicU64,
    filtered: AtomicU64,
}

/// 스테이지 태스크가 공유하는 하위 컴포넌트
#[derive(Clone)]
struct Links {
    aggregator: Arc<LogAggregator>,
    streamer: Arc<LogStreamer>,
    counters: Arc<Counters>,
    stream_logs: bool,
    capture_events: Option<mpsc::Sender<CaptureEvent>>,
}

struct Running {
    capture: LogCapture,
    cancel: CancellationToken,
    stage: JoinHandle<Stage>,
}

/// 로그 파이프라인
///
/// # 사용 예시
/// ```ignore
/// use logweave_pipeline::{LogPipeline, LogPipelineBuilder};
///
/// let mut pipeline = LogPipelineBuilder::new()
///     .config(config)
///     .capture_events(capture_tx)
///     .build()?;
///
/// pipeline.start().await?;
/// // ...
/// pipeline.stop().await?;
/// ```
pub struct LogPipeline {
    config: PipelineConfig,
    state: PipelineState,
    links: Links,
    stage: Option<Stage>,
    running: Option<Running>,
}

impl LogPipeline {
    /// 현재 상태 이름
    pub fn state_name(&self) -> &'static str {
        match self.state {
            PipelineState::Initialized => "initialized",
            PipelineState::Running => "running",
            PipelineState::Stopped => "stopped",
        }
    }

    /// 파서가 만든 레코드 수
    pub fn processed_count(&self) -> u64 {
        self.links.counters.processed.load(Ordering::Relaxed)
    }

    /// 필터를 통과해 집계기로 전달된 레코드 수
    pub fn filtered_count(&self) -> u64 {
        self.links.counters.filtered.load(Ordering::Relaxed)
    }

    /// 현재 집계 스냅샷
    pub fn aggregate(&self) -> AggregatedResult {
        self.links.aggregator.aggregate()
    }

    /// 스트리머 통계
    pub fn streamer_stats(&self) -> StreamerStats {
        self.links.streamer.get_stats()
    }

    /// 실패한 수집 소스 (정렬됨). 실행 중이 아니면 비어 있습니다.
    pub fn failed_sources(&self) -> Vec<String> {
        self.running
            .as_ref()
            .map(|r| r.capture.failed_sources())
            .unwrap_or_default()
    }

    /// 집계기
    pub fn aggregator(&self) -> &LogAggregator {
        &self.links.aggregator
    }

    /// 스트리머
    pub fn streamer(&self) -> &LogStreamer {
        &self.links.streamer
    }

    /// 파이프라인 설정
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    async fn start_inner(&mut self) -> Result<(), LogPipelineError> {
        let (line_tx, line_rx) = mpsc::channel(self.config.channel_capacity);
        let (event_tx, event_rx) = mpsc::channel(self.config.channel_capacity);
        let mut capture =
            LogCapture::new(self.config.capture.clone(), line_tx)?.with_event_sender(event_tx);

        let Some(stage) = self.stage.take() else {
            return Err(LogPipelineError::Channel(
                "processing stage was lost by a previous run".to_owned(),
            ));
        };

        if let Err(e) = self.links.streamer.start().await {
            self.stage = Some(stage);
            return Err(e);
        }
        if let Err(e) = self.links.aggregator.start() {
            self.links.streamer.stop().await;
            self.stage = Some(stage);
            return Err(e);
        }
        if let Err(e) = capture.start() {
            self.links.aggregator.stop();
            self.links.streamer.stop().await;
            self.stage = Some(stage);
            return Err(e);
        }

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_stage(
            stage,
            self.links.clone(),
            line_rx,
            event_rx,
            cancel.clone(),
        ));
        self.running = Some(Running {
            capture,
            cancel,
            stage: handle,
        });
        Ok(())
    }
}

impl Pipeline for LogPipeline {
    async fn start(&mut self) -> Result<(), LogweaveError> {
        if self.state == PipelineState::Running {
            return Err(PipelineError::AlreadyRunning.into());
        }

        info!(
            sources = self.config.capture.sources.len(),
            destinations = self.config.streamer.destinations.len(),
            strategy = %self.config.aggregator.strategy,
            "starting log pipeline"
        );
        self.start_inner().await?;

        self.state = PipelineState::Running;
        info!("log pipeline started");
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), LogweaveError> {
        if self.state != PipelineState::Running {
            return Err(PipelineError::NotRunning.into());
        }
        let Some(mut running) = self.running.take() else {
            return Err(PipelineError::NotRunning.into());
        };

        info!("stopping log pipeline");

        // 1. 새 라인 유입 중단
        running.capture.stop().await;
        // 2. 주기 집계 중단 (이후 남은 로그는 마지막 결과로 한 번 보냄)
        self.links.aggregator.stop();

        // 3. 스테이지가 채널에 남은 라인을 처리하고 종료
        running.cancel.cancel();
        match running.stage.await {
            Ok(mut stage) => {
                while let Ok(AggregatorEvent::Aggregated(result)) = stage.aggregator_rx.try_recv() {
                    self.links.streamer.stream(result);
                }
                self.stage = Some(stage);
            }
            Err(e) => error!(error = %e, "processing stage terminated abnormally"),
        }

        // 4. 남은 집계 결과 전송 후 스트리머 정지 (최종 플러시)
        if self.links.aggregator.total_logs() > 0 {
            let result = self.links.aggregator.aggregate();
            debug!(count = result.count, "streaming final aggregation");
            self.links.streamer.stream(result);
            if self.links.aggregator.config().reset_after_emit {
                self.links.aggregator.clear_process_logs();
            }
        }
        self.links.streamer.stop().await;

        self.state = PipelineState::Stopped;
        info!(
            processed = self.processed_count(),
            filtered = self.filtered_count(),
            "log pipeline stopped"
        );
        Ok(())
    }

    async fn health_check(&self) -> HealthStatus {
        match self.state {
            PipelineState::Running => {
                let failed = self.failed_sources();
                if !failed.is_empty() {
                    return HealthStatus::Degraded(format!(
                        "capture sources failed: {}",
                        failed.join(", ")
                    ));
                }
                let utilization = self.links.streamer.buffer_utilization();
                if utilization > DEGRADED_UTILIZATION {
                    HealthStatus::Degraded(format!(
                        "stream buffer utilization high: {:.1}%",
                        utilization * 100.0
                    ))
                } else {
                    HealthStatus::Healthy
                }
            }
            PipelineState::Initialized => HealthStatus::Unhealthy("not started".to_owned()),
            PipelineState::Stopped => HealthStatus::Unhealthy("stopped".to_owned()),
        }
    }
}

/// 처리 스테이지 루프
async fn run_stage(
    mut stage: Stage,
    links: Links,
    mut line_rx: mpsc::Receiver<RawLine>,
    mut event_rx: mpsc::Receiver<CaptureEvent>,
    cancel: CancellationToken,
) -> Stage {
    let mut worker = Worker {
        parsers: HashMap::new(),
        rejected_sources: HashSet::new(),
        links,
    };

    loop {
        tokio::select! {
            biased;
            Some(raw) = line_rx.recv() => {
                worker.handle_line(&mut stage, &raw);
            }
            Some(event) = event_rx.recv() => {
                worker.handle_capture_event(&mut stage, event);
            }
            Some(AggregatorEvent::Aggregated(result)) = stage.aggregator_rx.recv() => {
                worker.links.streamer.stream(result);
            }
            () = cancel.cancelled() => break,
        }
    }

    // 수집이 멈춘 뒤 채널에 남은 라인과 multiline 블록을 마저 처리
    while let Ok(raw) = line_rx.try_recv() {
        worker.handle_line(&mut stage, &raw);
    }
    while let Ok(event) = event_rx.try_recv() {
        worker.handle_capture_event(&mut stage, event);
    }
    let sources: Vec<String> = worker.parsers.keys().cloned().collect();
    for source in sources {
        worker.flush_source(&mut stage, &source);
    }

    debug!("processing stage finished");
    stage
}

struct Worker {
    /// 소스별 파서 (multiline 상태 격리)
    parsers: HashMap<String, LogParser>,
    /// 용량 초과로 집계기 등록에 실패한 소스 (경고 1회)
    rejected_sources: HashSet<String>,
    links: Links,
}

impl Worker {
    fn handle_line(&mut self, stage: &mut Stage, raw: &RawLine) {
        if !self.parsers.contains_key(&raw.source) {
            match LogParser::new(stage.parser_config.clone()) {
                Ok(parser) => {
                    self.parsers.insert(raw.source.clone(), parser);
                }
                Err(e) => {
                    warn!(source = %raw.source, error = %e, "failed to create parser");
                    return;
                }
            }
        }
        let Some(parser) = self.parsers.get_mut(&raw.source) else {
            return;
        };
        let logs = parser.parse_raw(raw);
        for log in logs {
            self.handle_record(stage, &raw.source, log);
        }
    }

    fn handle_capture_event(&mut self, stage: &mut Stage, event: CaptureEvent) {
        match &event {
            CaptureEvent::SourceCompleted { source_id, lines } => {
                debug!(source = %source_id, lines, "source completed, flushing parser");
                self.flush_source(stage, source_id);
            }
            CaptureEvent::SourceFailed { source_id, error } => {
                warn!(source = %source_id, error = %error, "capture source failed");
            }
            _ => {}
        }

        if let Some(tx) = &self.links.capture_events
            && let Err(mpsc::error::TrySendError::Full(_)) = tx.try_send(event)
        {
            debug!("capture event channel full, event dropped");
        }
    }

    fn flush_source(&mut self, stage: &mut Stage, source: &str) {
        let flushed = self.parsers.get_mut(source).and_then(LogParser::flush);
        if let Some(log) = flushed {
            self.handle_record(stage, source, log);
        }
    }

    fn handle_record(&mut self, stage: &mut Stage, source: &str, log: ParsedLog) {
        let counters = &self.links.counters;
        counters.processed.fetch_add(1, Ordering::Relaxed);
        if !stage.filter.filter(&log) {
            return;
        }
        counters.filtered.fetch_add(1, Ordering::Relaxed);

        if self.links.stream_logs {
            self.links.streamer.stream(log.clone());
        }

        let aggregator = &self.links.aggregator;
        if !aggregator.has_process(source) {
            if self.rejected_sources.contains(source) {
                return;
            }
            if let Err(e) = aggregator.add_process(source, ProcessInfo::named(source)) {
                warn!(source, error = %e, "cannot track source in aggregator");
                self.rejected_sources.insert(source.to_owned());
                return;
            }
        }
        if let Err(e) = aggregator.add_log(source, log) {
            warn!(source, error = %e, "failed to add record to aggregator");
        }
    }
}

/// 로그 파이프라인 빌더
///
/// 구성 요소를 생성하고 선택적 외부 이벤트 채널을 연결합니다.
pub struct LogPipelineBuilder {
    config: PipelineConfig,
    capture_events: Option<mpsc::Sender<CaptureEvent>>,
    streamer_events: Option<mpsc::Sender<StreamerEvent>>,
}

impl LogPipelineBuilder {
    /// 새 빌더를 생성합니다.
    pub fn new() -> Self {
        Self {
            config: PipelineConfig::default(),
            capture_events: None,
            streamer_events: None,
        }
    }

    /// 파이프라인 설정을 지정합니다.
    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// 수집 이벤트(`SourceFailed` 등)를 받을 외부 채널을 설정합니다.
    ///
    /// 채널이 가득 차면 이벤트는 버려집니다.
    pub fn capture_events(mut self, tx: mpsc::Sender<CaptureEvent>) -> Self {
        self.capture_events = Some(tx);
        self
    }

    /// 스트리머 이벤트를 받을 외부 채널을 설정합니다.
    pub fn streamer_events(mut self, tx: mpsc::Sender<StreamerEvent>) -> Self {
        self.streamer_events = Some(tx);
        self
    }

    /// 파이프라인을 빌드합니다. 모든 컴포넌트 설정을 이 시점에 검증합니다.
    pub fn build(self) -> Result<LogPipeline, LogPipelineError> {
        self.config.validate()?;

        // 소스별 파서는 실행 중에 만들어지므로 설정 오류를 여기서 드러냄
        LogParser::new(self.config.parser.clone())?;
        let filter = LogFilter::new(self.config.filter.clone())?;

        let (aggregator_tx, aggregator_rx) = mpsc::channel(AGGREGATOR_EVENT_CAPACITY);
        let aggregator =
            LogAggregator::new(self.config.aggregator.clone())?.with_event_sender(aggregator_tx);

        let streamer = match self.streamer_events {
            Some(tx) => LogStreamer::with_events(self.config.streamer.clone(), tx)?,
            None => LogStreamer::new(self.config.streamer.clone())?,
        };

        Ok(LogPipeline {
            links: Links {
                aggregator: Arc::new(aggregator),
                streamer: Arc::new(streamer),
                counters: Arc::new(Counters::default()),
                stream_logs: self.config.stream_logs,
                capture_events: self.capture_events,
            },
            stage: Some(Stage {
                parser_config: self.config.parser.clone(),
                filter,
                aggregator_rx,
            }),
            config: self.config,
            state: PipelineState::Initialized,
            running: None,
        })
    }
}

impl Default for LogPipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}
