//! 스트리머 모듈 -- 레코드를 여러 목적지로 배치 전송합니다.
//!
//! [`LogStreamer::stream`]은 레코드를 유한 버퍼에 넣고 수락 여부를 반환합니다.
//! 플러시는 `batch_size`개가 쌓이거나 `flush_interval`이 지나면 일어나며,
//! 배치를 모든 목적지에 병렬로 씁니다. 목적지 에러는 해당 목적지에만
//! 영향을 주고, 다른 목적지로 가는 데이터는 그대로 전달됩니다.
//!
//! # 사용 예시
//! ```ignore
//! let streamer = LogStreamer::new(StreamerConfig {
//!     destinations: vec![Destination::console()],
//!     ..StreamerConfig::default()
//! })?;
//! streamer.start().await?;
//! streamer.stream(StreamRecord::Log(log));
//! streamer.stop().await;
//! ```

mod buffer;
pub mod destination;

pub use buffer::{Admission, BackpressureStrategy, StreamBuffer, StreamBufferSnapshot};
pub use destination::{
    ConsoleTarget, Destination, DestinationHandle, FileEncoding, LineFormat, LogSink,
};

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, SecondsFormat, Utc};
use metrics::{counter, gauge, histogram};
use serde::Serialize;
use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use logweave_core::metrics as m;
use logweave_core::types::{LogLevel, ParsedLog, RawLine};

use crate::aggregator::AggregatedResult;
use crate::error::LogPipelineError;

/// 스트리밍 가능한 레코드
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum StreamRecord {
    /// 파싱된 로그
    Log(ParsedLog),
    /// 원시 라인
    Raw(RawLine),
    /// 집계 결과
    Aggregated(AggregatedResult),
}

impl StreamRecord {
    /// 레코드의 레벨. 원시 라인과 집계 결과는 `None`입니다.
    pub fn level(&self) -> Option<LogLevel> {
        match self {
            Self::Log(log) => log.level,
            Self::Raw(_) | Self::Aggregated(_) => None,
        }
    }

    /// 레코드 시각
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Log(log) => log.timestamp,
            Self::Raw(raw) => Some(raw.timestamp),
            Self::Aggregated(result) => Some(result.timestamp),
        }
    }

    /// 한 줄 텍스트 표현
    pub fn to_text(&self) -> String {
        match self {
            Self::Log(log) => log.to_string(),
            Self::Raw(raw) => format!(
                "{} {}: {}",
                raw.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
                raw.source,
                raw.content
            ),
            Self::Aggregated(result) => format!(
                "{} [aggregated:{}] {} logs from {} processes",
                result.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
                result.strategy,
                result.count,
                result.processes.len()
            ),
        }
    }
}

impl From<ParsedLog> for StreamRecord {
    fn from(log: ParsedLog) -> Self {
        Self::Log(log)
    }
}

impl From<RawLine> for StreamRecord {
    fn from(raw: RawLine) -> Self {
        Self::Raw(raw)
    }
}

impl From<AggregatedResult> for StreamRecord {
    fn from(result: AggregatedResult) -> Self {
        Self::Aggregated(result)
    }
}

/// 스트리머 설정
#[derive(Debug, Clone)]
pub struct StreamerConfig {
    /// 목적지 목록
    pub destinations: Vec<Destination>,
    /// 배치 크기
    pub batch_size: usize,
    /// 최대 플러시 간격
    pub flush_interval: Duration,
    /// 버퍼 명목 용량
    pub buffer_size: usize,
    /// 버퍼가 찼을 때의 정책
    pub backpressure: BackpressureStrategy,
    /// `Buffer` 정책의 절대 상한
    pub max_buffer_ceiling: usize,
}

impl Default for StreamerConfig {
    fn default() -> Self {
        Self {
            destinations: Vec::new(),
            batch_size: 100,
            flush_interval: Duration::from_secs(1),
            buffer_size: 10_000,
            backpressure: BackpressureStrategy::Drop,
            max_buffer_ceiling: 100_000,
        }
    }
}

impl StreamerConfig {
    /// 설정 값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), LogPipelineError> {
        if self.batch_size == 0 {
            return Err(LogPipelineError::config(
                "streamer.batch_size",
                "must be greater than 0",
            ));
        }
        if self.buffer_size == 0 {
            return Err(LogPipelineError::config(
                "streamer.buffer_size",
                "must be greater than 0",
            ));
        }
        if self.flush_interval.is_zero() {
            return Err(LogPipelineError::config(
                "streamer.flush_interval",
                "must be greater than 0",
            ));
        }
        if self.max_buffer_ceiling < self.buffer_size {
            return Err(LogPipelineError::config(
                "streamer.max_buffer_ceiling",
                format!(
                    "ceiling ({}) must be at least buffer_size ({})",
                    self.max_buffer_ceiling, self.buffer_size
                ),
            ));
        }
        for destination in &self.destinations {
            destination.validate()?;
        }
        Ok(())
    }
}

/// 스트리머 통계
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StreamerStats {
    /// 버퍼에 수락된 레코드 수
    pub total_logs: u64,
    /// 버퍼가 가득 차 버려진 레코드 수
    pub dropped_logs: u64,
    /// `pause` 정책으로 거부된 레코드 수
    pub rejected_logs: u64,
    /// 목적지로 플러시된 레코드 수
    pub flushed_logs: u64,
    /// 목적지에 기록된 바이트 합계
    pub bytes_streamed: u64,
    /// 플러시 횟수
    pub flushes: u64,
    /// 목적지 에러 횟수
    pub destination_errors: u64,
    /// 이벤트 채널이 가득 차 버려진 이벤트 수
    pub dropped_events: u64,
    /// 현재 버퍼에 있는 레코드 수
    pub buffered: usize,
    /// 시작 이후 초당 플러시 레코드 수
    pub logs_per_second: f64,
    /// 시작 이후 초당 기록 바이트 수
    pub bytes_per_second: f64,
}

/// 스트리머 이벤트
#[derive(Debug, Clone, PartialEq)]
pub enum StreamerEvent {
    /// 배치 하나를 플러시함
    Flushed { records: usize, bytes: u64 },
    /// 목적지 쓰기 또는 열기 실패
    DestinationError { destination: String, error: String },
}

#[derive(Debug, Default)]
struct Counters {
    accepted: AtomicU64,
    dropped: AtomicU64,
    rejected: AtomicU64,
    flushed: AtomicU64,
    bytes: AtomicU64,
    flushes: AtomicU64,
    destination_errors: AtomicU64,
    dropped_events: AtomicU64,
}

/// 플러시 태스크와 공유하는 상태
struct Shared {
    config: StreamerConfig,
    buffer: Mutex<StreamBuffer>,
    /// 열린 목적지. 플러시는 이 잠금으로 직렬화됩니다.
    handles: tokio::sync::Mutex<Vec<(String, DestinationHandle)>>,
    flush_needed: Notify,
    counters: Counters,
    running: AtomicBool,
    started_at: Mutex<Option<Instant>>,
    event_tx: Option<mpsc::Sender<StreamerEvent>>,
}

impl Shared {
    fn buffer(&self) -> MutexGuard<'_, StreamBuffer> {
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 이벤트를 보냅니다. 채널이 가득 찼으면 이벤트를 버립니다.
    /// 플러시는 `handles` 잠금을 쥔 채 호출하므로 여기서 기다리면 안 됩니다.
    fn emit(&self, event: StreamerEvent) {
        let Some(tx) = &self.event_tx else {
            return;
        };
        match tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.counters.dropped_events.fetch_add(1, Ordering::Relaxed);
                debug!("streamer event channel full, event dropped");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("streamer event receiver dropped");
            }
        }
    }

    /// 버퍼를 비울 때까지 배치 단위로 씁니다. 플러시한 레코드 수를 반환합니다.
    async fn flush(&self) -> usize {
        let mut handles = self.handles.lock().await;
        let mut total = 0;

        loop {
            let batch = {
                let mut buffer = self.buffer();
                let batch = buffer.drain_batch(self.config.batch_size);
                gauge!(m::STREAMER_BUFFER_SIZE).set(buffer.len() as f64);
                batch
            };
            if batch.is_empty() {
                break;
            }
            total += batch.len();
            self.write_batch(&mut handles, &batch).await;
        }
        total
    }

    async fn write_batch(&self, handles: &mut [(String, DestinationHandle)], batch: &[StreamRecord]) {
        let started = Instant::now();
        let results = futures::future::join_all(
            handles
                .iter_mut()
                .map(|(name, handle)| handle.write(name, batch)),
        )
        .await;

        let mut bytes = 0;
        for ((name, _), result) in handles.iter().zip(results) {
            match result {
                Ok(written) => bytes += written,
                Err(e) => {
                    self.counters
                        .destination_errors
                        .fetch_add(1, Ordering::Relaxed);
                    counter!(m::STREAMER_DESTINATION_ERRORS_TOTAL, m::LABEL_DESTINATION => name.clone())
                        .increment(1);
                    warn!(destination = %name, error = %e, "destination write failed");
                    self.emit(StreamerEvent::DestinationError {
                        destination: name.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        let records = batch.len();
        self.counters
            .flushed
            .fetch_add(records as u64, Ordering::Relaxed);
        self.counters.bytes.fetch_add(bytes, Ordering::Relaxed);
        self.counters.flushes.fetch_add(1, Ordering::Relaxed);
        counter!(m::STREAMER_RECORDS_TOTAL).increment(records as u64);
        counter!(m::STREAMER_BYTES_TOTAL).increment(bytes);
        histogram!(m::STREAMER_FLUSH_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
        debug!(records, bytes, destinations = handles.len(), "batch flushed");

        self.emit(StreamerEvent::Flushed { records, bytes });
    }
}

/// 배치 스트리머
pub struct LogStreamer {
    shared: Arc<Shared>,
    flusher: Mutex<Option<Flusher>>,
}

struct Flusher {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl LogStreamer {
    /// 설정을 검증하고 스트리머를 생성합니다. 목적지는 `start()`에서 열립니다.
    pub fn new(config: StreamerConfig) -> Result<Self, LogPipelineError> {
        Self::build(config, None)
    }

    /// 이벤트 채널을 지정해 생성합니다.
    pub fn with_events(
        config: StreamerConfig,
        event_tx: mpsc::Sender<StreamerEvent>,
    ) -> Result<Self, LogPipelineError> {
        Self::build(config, Some(event_tx))
    }

    fn build(
        config: StreamerConfig,
        event_tx: Option<mpsc::Sender<StreamerEvent>>,
    ) -> Result<Self, LogPipelineError> {
        config.validate()?;
        let buffer = StreamBuffer::new(
            config.buffer_size,
            config.max_buffer_ceiling,
            config.backpressure,
        );
        Ok(Self {
            shared: Arc::new(Shared {
                config,
                buffer: Mutex::new(buffer),
                handles: tokio::sync::Mutex::new(Vec::new()),
                flush_needed: Notify::new(),
                counters: Counters::default(),
                running: AtomicBool::new(false),
                started_at: Mutex::new(None),
                event_tx,
            }),
            flusher: Mutex::new(None),
        })
    }

    /// 현재 설정
    pub fn config(&self) -> &StreamerConfig {
        &self.shared.config
    }

    /// 목적지를 열고 플러시 타이머를 시작합니다.
    ///
    /// 열기에 실패한 목적지는 건너뛰고 나머지로 동작합니다.
    pub async fn start(&self) -> Result<(), LogPipelineError> {
        if self.shared.running.swap(true, Ordering::SeqCst) {
            return Err(LogPipelineError::AlreadyRunning("streamer"));
        }

        let mut opened = Vec::with_capacity(self.shared.config.destinations.len());
        for destination in &self.shared.config.destinations {
            let name = destination.name();
            match destination.open().await {
                Ok(handle) => opened.push((name, handle)),
                Err(e) => {
                    self.shared
                        .counters
                        .destination_errors
                        .fetch_add(1, Ordering::Relaxed);
                    warn!(destination = %name, error = %e, "destination failed to open, skipping");
                    self.shared.emit(StreamerEvent::DestinationError {
                        destination: name,
                        error: e.to_string(),
                    });
                }
            }
        }
        let open_count = opened.len();
        *self.shared.handles.lock().await = opened;
        *self
            .shared
            .started_at
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Instant::now());

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_flusher(Arc::clone(&self.shared), cancel.clone()));
        *self.flusher.lock().unwrap_or_else(PoisonError::into_inner) =
            Some(Flusher { cancel, handle });

        info!(
            destinations = open_count,
            configured = self.shared.config.destinations.len(),
            batch_size = self.shared.config.batch_size,
            "streamer started"
        );
        Ok(())
    }

    /// 플러시 타이머를 멈추고 남은 레코드를 플러시한 뒤 목적지를 닫습니다.
    ///
    /// 여러 번 호출해도 안전합니다. 진행 중인 쓰기는 끝까지 완료됩니다.
    pub async fn stop(&self) {
        let flusher = self
            .flusher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(flusher) = flusher else {
            return;
        };
        flusher.cancel.cancel();
        if let Err(e) = flusher.handle.await
            && e.is_panic()
        {
            warn!(error = %e, "streamer flush task panicked");
        }

        let remaining = self.shared.flush().await;
        let mut handles = self.shared.handles.lock().await;
        for (name, handle) in handles.iter_mut() {
            handle.close(name).await;
        }
        handles.clear();
        self.shared.running.store(false, Ordering::SeqCst);
        info!(remaining, "streamer stopped");
    }

    /// 실행 중인지 확인합니다.
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// 레코드를 버퍼에 넣습니다. 수락되면 `true`입니다.
    pub fn stream(&self, record: impl Into<StreamRecord>) -> bool {
        self.admit(record.into()) == Admission::Accepted
    }

    /// [`stream`](Self::stream)과 같지만 거부 시 `Capacity` 에러를 반환합니다.
    pub fn try_stream(&self, record: impl Into<StreamRecord>) -> Result<(), LogPipelineError> {
        match self.admit(record.into()) {
            Admission::Accepted => Ok(()),
            Admission::Dropped | Admission::Rejected => Err(LogPipelineError::Capacity {
                resource: "stream buffer".to_owned(),
                limit: self.shared.buffer().limit(),
            }),
        }
    }

    fn admit(&self, record: StreamRecord) -> Admission {
        let (admission, should_flush, len) = {
            let mut buffer = self.shared.buffer();
            let admission = buffer.push(record);
            (
                admission,
                buffer.should_flush(self.shared.config.batch_size),
                buffer.len(),
            )
        };

        let counters = &self.shared.counters;
        match admission {
            Admission::Accepted => {
                counters.accepted.fetch_add(1, Ordering::Relaxed);
                gauge!(m::STREAMER_BUFFER_SIZE).set(len as f64);
            }
            Admission::Dropped => {
                let dropped = counters.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                counter!(m::STREAMER_DROPPED_TOTAL).increment(1);
                if dropped.is_power_of_two() {
                    warn!(dropped, capacity = len, "stream buffer full, dropping records");
                }
            }
            Admission::Rejected => {
                counters.rejected.fetch_add(1, Ordering::Relaxed);
                counter!(m::STREAMER_REJECTED_TOTAL).increment(1);
            }
        }

        if should_flush && self.is_running() {
            self.shared.flush_needed.notify_one();
        }
        admission
    }

    /// 버퍼를 즉시 플러시합니다. 실행 중이 아니면 버퍼를 그대로 두고 0을 반환합니다.
    pub async fn flush(&self) -> usize {
        if !self.is_running() {
            return 0;
        }
        self.shared.flush().await
    }

    /// 버퍼를 드레인하지 않고 스냅샷을 반환합니다.
    pub fn get_buffer(&self) -> StreamBufferSnapshot {
        self.shared.buffer().snapshot()
    }

    /// 명목 용량 대비 버퍼 사용률
    pub fn buffer_utilization(&self) -> f64 {
        self.shared.buffer().utilization()
    }

    /// 누적 통계와 처리량
    pub fn get_stats(&self) -> StreamerStats {
        let c = &self.shared.counters;
        let flushed = c.flushed.load(Ordering::Relaxed);
        let bytes = c.bytes.load(Ordering::Relaxed);
        let started_at = *self
            .shared
            .started_at
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let elapsed = started_at.map_or(0.0, |t| t.elapsed().as_secs_f64());
        let rate = |n: u64| if elapsed > 0.0 { n as f64 / elapsed } else { 0.0 };

        StreamerStats {
            total_logs: c.accepted.load(Ordering::Relaxed),
            dropped_logs: c.dropped.load(Ordering::Relaxed),
            rejected_logs: c.rejected.load(Ordering::Relaxed),
            flushed_logs: flushed,
            bytes_streamed: bytes,
            flushes: c.flushes.load(Ordering::Relaxed),
            destination_errors: c.destination_errors.load(Ordering::Relaxed),
            dropped_events: c.dropped_events.load(Ordering::Relaxed),
            buffered: self.shared.buffer().len(),
            logs_per_second: rate(flushed),
            bytes_per_second: rate(bytes),
        }
    }
}

impl Drop for LogStreamer {
    fn drop(&mut self) {
        if let Some(flusher) = self
            .flusher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            flusher.cancel.cancel();
            flusher.handle.abort();
        }
    }
}

impl std::fmt::Debug for LogStreamer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogStreamer")
            .field("destinations", &self.shared.config.destinations.len())
            .field("running", &self.is_running())
            .field("buffered", &self.shared.buffer().len())
            .finish()
    }
}

/// `flush_interval`마다 또는 배치가 찼다는 알림을 받으면 플러시합니다.
async fn run_flusher(shared: Arc<Shared>, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(shared.config.flush_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {}
            _ = shared.flush_needed.notified() => {}
        }
        shared.flush().await;
    }
    debug!("streamer flush task exited");
}
