//! 로그 수집 모듈 -- 여러 이종 소스에서 [`RawLine`]을 수집합니다.
//!
//! # 수집 소스
//! - [`FileSource`]: 파일을 끝까지 읽고 종료
//! - [`TailSource`]: 파일 감시 (`tail -f` 방식, 로테이션 감지)
//! - [`ProcessSource`]: 외부 프로세스의 stdout/stderr 캡처
//! - [`ByteStreamSource`]: 임의의 `AsyncRead` 어댑터 (1회용)
//! - [`SocketSource`]: TCP/UDP 수신
//!
//! # 아키텍처
//! 각 소스는 자체 tokio 태스크에서 실행되며, 수집한 라인을
//! `tokio::mpsc::Sender<RawLine>` 채널로 전달합니다. 소스 하나의 실패는
//! 다른 소스에 영향을 주지 않습니다. 재시도 가능한 실패는 `max_retries`까지
//! `retry_delay` 간격으로 재시도하고, 소진되면 [`CaptureEvent::SourceFailed`]를 보냅니다.
//!
//! 내부 버퍼는 최근 라인 `max_buffer_size`개만 보관합니다 (FIFO 축출).
//! 유실 없이 받으려면 라인 채널을 구독해야 합니다.

mod file;
mod lines;
mod process;
mod socket;
mod stream;
mod tail;

pub use file::FileSource;
pub use process::ProcessSource;
pub use socket::{SocketProtocol, SocketSource};
pub use stream::ByteStreamSource;
pub use tail::TailSource;

use std::collections::{BTreeSet, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use metrics::{counter, gauge};
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use logweave_core::metrics as m;
use logweave_core::types::RawLine;

use crate::error::LogPipelineError;

/// 기본 버퍼 크기 (라인 수)
pub const DEFAULT_MAX_BUFFER_SIZE: usize = 10_000;

/// 기본 최대 라인 길이 (바이트)
pub const DEFAULT_MAX_LINE_LENGTH: usize = 64 * 1024;

/// `stop()`이 소스 태스크 종료를 기다리는 최대 시간
const STOP_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// 수집 소스 종류
#[derive(Debug, Clone)]
pub enum SourceKind {
    /// 파일 끝까지 읽기
    File(FileSource),
    /// 외부 프로세스 출력
    Process(ProcessSource),
    /// 임의의 바이트 스트림
    Stream(ByteStreamSource),
    /// 파일 tail
    Tail(TailSource),
    /// TCP/UDP 소켓
    Socket(SocketSource),
}

impl SourceKind {
    /// 종류 이름
    pub fn name(&self) -> &'static str {
        match self {
            Self::File(_) => "file",
            Self::Process(_) => "process",
            Self::Stream(_) => "stream",
            Self::Tail(_) => "tail",
            Self::Socket(_) => "socket",
        }
    }
}

/// 수집 소스 -- 식별자와 종류
#[derive(Debug, Clone)]
pub struct CaptureSource {
    /// 소스 식별자 (`RawLine::source`에 기록됨, 수집기 내에서 유일)
    pub id: String,
    /// 소스 종류
    pub kind: SourceKind,
}

impl CaptureSource {
    /// 새 소스를 생성합니다.
    pub fn new(id: impl Into<String>, kind: SourceKind) -> Self {
        Self {
            id: id.into(),
            kind,
        }
    }

    /// `file:<path>` 식별자로 파일 소스를 생성합니다.
    pub fn file(path: impl Into<std::path::PathBuf>) -> Self {
        let source = FileSource::new(path);
        Self::new(format!("file:{}", source.path.display()), SourceKind::File(source))
    }

    /// `tail:<path>` 식별자로 tail 소스를 생성합니다.
    pub fn tail(path: impl Into<std::path::PathBuf>) -> Self {
        let source = TailSource::new(path);
        Self::new(format!("tail:{}", source.path.display()), SourceKind::Tail(source))
    }

    /// `process:<command>` 식별자로 프로세스 소스를 생성합니다.
    pub fn process(source: ProcessSource) -> Self {
        Self::new(format!("process:{}", source.command), SourceKind::Process(source))
    }

    /// `<protocol>:<addr>` 식별자로 소켓 소스를 생성합니다.
    pub fn socket(source: SocketSource) -> Self {
        Self::new(
            format!("{}:{}", source.protocol.as_str(), source.bind_addr),
            SourceKind::Socket(source),
        )
    }

    /// 바이트 스트림 소스를 생성합니다.
    pub fn stream(id: impl Into<String>, source: ByteStreamSource) -> Self {
        Self::new(id, SourceKind::Stream(source))
    }
}

/// 수집기 설정
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// 수집 소스 목록
    pub sources: Vec<CaptureSource>,
    /// 내부 버퍼 최대 라인 수
    pub max_buffer_size: usize,
    /// 소스별 최대 재시도 횟수
    pub max_retries: u32,
    /// 재시도 간격
    pub retry_delay: Duration,
    /// 최대 라인 길이 (초과분은 다음 라인으로 분할)
    pub max_line_length: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sources: Vec::new(),
            max_buffer_size: DEFAULT_MAX_BUFFER_SIZE,
            max_retries: 3,
            retry_delay: Duration::from_secs(1),
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
        }
    }
}

impl CaptureConfig {
    /// 설정을 검증합니다.
    pub fn validate(&self) -> Result<(), LogPipelineError> {
        if self.max_buffer_size == 0 {
            return Err(LogPipelineError::config(
                "capture.max_buffer_size",
                "must be greater than 0",
            ));
        }
        if self.max_line_length == 0 {
            return Err(LogPipelineError::config(
                "capture.max_line_length",
                "must be greater than 0",
            ));
        }

        let mut ids = HashSet::new();
        for source in &self.sources {
            if source.id.trim().is_empty() {
                return Err(LogPipelineError::config(
                    "capture.sources",
                    "source id must not be empty",
                ));
            }
            if !ids.insert(source.id.as_str()) {
                return Err(LogPipelineError::config(
                    "capture.sources",
                    format!("duplicate source id '{}'", source.id),
                ));
            }
            match &source.kind {
                SourceKind::Process(p) => p.validate()?,
                SourceKind::Socket(s) => s.validate()?,
                SourceKind::Tail(t) => t.validate()?,
                SourceKind::File(_) | SourceKind::Stream(_) => {}
            }
        }
        Ok(())
    }
}

/// 수집 이벤트
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureEvent {
    /// 소스 시작
    SourceStarted {
        /// 소스 식별자
        source_id: String,
    },
    /// 소스가 끝까지 읽고 정상 종료
    SourceCompleted {
        /// 소스 식별자
        source_id: String,
        /// 수집한 라인 수
        lines: u64,
    },
    /// 재시도 예정
    SourceRetry {
        /// 소스 식별자
        source_id: String,
        /// 재시도 회차 (1부터)
        attempt: u32,
        /// 실패 사유
        error: String,
    },
    /// 재시도 소진 또는 재시도 불가 실패
    SourceFailed {
        /// 소스 식별자
        source_id: String,
        /// 실패 사유
        error: String,
    },
    /// 프로세스 종료
    ProcessExited {
        /// 소스 식별자
        source_id: String,
        /// 종료 코드 (시그널 종료면 `None`)
        code: Option<i32>,
    },
}

impl CaptureEvent {
    /// 이벤트의 소스 식별자
    pub fn source_id(&self) -> &str {
        match self {
            Self::SourceStarted { source_id }
            | Self::SourceCompleted { source_id, .. }
            | Self::SourceRetry { source_id, .. }
            | Self::SourceFailed { source_id, .. }
            | Self::ProcessExited { source_id, .. } => source_id,
        }
    }
}

/// 소스 실행 종료 사유
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SourceExit {
    Completed,
    Cancelled,
}

/// 소스 실행 실패
#[derive(Debug)]
pub(crate) struct SourceFailure {
    pub(crate) reason: String,
    pub(crate) retryable: bool,
}

impl SourceFailure {
    pub(crate) fn retryable(reason: impl std::fmt::Display) -> Self {
        Self {
            reason: reason.to_string(),
            retryable: true,
        }
    }

    pub(crate) fn fatal(reason: impl std::fmt::Display) -> Self {
        Self {
            reason: reason.to_string(),
            retryable: false,
        }
    }
}

#[derive(Debug, Default)]
struct CaptureState {
    buffer: VecDeque<RawLine>,
    active: BTreeSet<String>,
    failed: BTreeSet<String>,
}

#[derive(Debug)]
struct Shared {
    state: Mutex<CaptureState>,
    max_buffer_size: usize,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, CaptureState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn push(&self, line: RawLine) {
        let mut state = self.lock();
        if state.buffer.len() >= self.max_buffer_size {
            state.buffer.pop_front();
            counter!(m::CAPTURE_BUFFER_EVICTED_TOTAL).increment(1);
        }
        state.buffer.push_back(line);
    }

    fn set_active(&self, id: &str, active: bool) {
        let mut state = self.lock();
        if active {
            state.active.insert(id.to_owned());
        } else {
            state.active.remove(id);
        }
        gauge!(m::CAPTURE_ACTIVE_SOURCES).set(state.active.len() as f64);
    }
}

/// 소스 태스크 실행 컨텍스트
///
/// TCP 연결 태스크처럼 한 소스가 여러 태스크로 나뉠 수 있어 `Clone`입니다.
#[derive(Clone)]
pub(crate) struct SourceContext {
    pub(crate) id: String,
    pub(crate) cancel: CancellationToken,
    pub(crate) max_line_length: usize,
    line_tx: mpsc::Sender<RawLine>,
    event_tx: Option<mpsc::Sender<CaptureEvent>>,
    shared: Arc<Shared>,
    lines: Arc<AtomicU64>,
}

impl SourceContext {
    /// 라인 하나를 버퍼와 채널로 내보냅니다.
    ///
    /// 취소되었거나 수신 측이 닫혔으면 `false`를 반환하며, 소스는 중단해야 합니다.
    pub(crate) async fn emit(&self, content: String, metadata: Map<String, Value>) -> bool {
        let mut line = RawLine::new(self.id.clone(), content);
        line.metadata = metadata;

        self.shared.push(line.clone());
        self.lines.fetch_add(1, Ordering::Relaxed);
        counter!(m::CAPTURE_LINES_TOTAL, m::LABEL_SOURCE => self.id.clone()).increment(1);

        tokio::select! {
            sent = self.line_tx.send(line) => sent.is_ok(),
            _ = self.cancel.cancelled() => false,
        }
    }

    /// 이벤트를 보냅니다. 이벤트 채널이 없거나 닫혔으면 무시합니다.
    ///
    /// 채널이 가득 차 있어도 취소되면 즉시 포기합니다.
    pub(crate) async fn event(&self, event: CaptureEvent) {
        let Some(tx) = &self.event_tx else {
            return;
        };
        tokio::select! {
            sent = tx.send(event) => {
                if sent.is_err() {
                    debug!(source = %self.id, "capture event receiver dropped");
                }
            }
            _ = self.cancel.cancelled() => {
                debug!(source = %self.id, "capture event abandoned on stop");
            }
        }
    }

    pub(crate) fn lines(&self) -> u64 {
        self.lines.load(Ordering::Relaxed)
    }
}

/// 재시도 사이에 유지되는 소스별 진행 상태
#[derive(Debug, Default)]
struct SourceProgress {
    file_offset: u64,
    tail: tail::TailProgress,
}

/// 로그 수집기
///
/// # 사용 예시
/// ```ignore
/// let (tx, mut rx) = mpsc::channel(1024);
/// let mut capture = LogCapture::new(config, tx)?;
/// capture.start()?;
/// while let Some(line) = rx.recv().await { /* ... */ }
/// capture.stop().await;
/// ```
pub struct LogCapture {
    config: CaptureConfig,
    line_tx: mpsc::Sender<RawLine>,
    event_tx: Option<mpsc::Sender<CaptureEvent>>,
    shared: Arc<Shared>,
    cancel: Option<CancellationToken>,
    tasks: Vec<JoinHandle<()>>,
}

impl LogCapture {
    /// 설정을 검증하고 수집기를 생성합니다.
    pub fn new(
        config: CaptureConfig,
        line_tx: mpsc::Sender<RawLine>,
    ) -> Result<Self, LogPipelineError> {
        config.validate()?;
        let shared = Arc::new(Shared {
            state: Mutex::new(CaptureState::default()),
            max_buffer_size: config.max_buffer_size,
        });
        Ok(Self {
            config,
            line_tx,
            event_tx: None,
            shared,
            cancel: None,
            tasks: Vec::new(),
        })
    }

    /// 이벤트 채널을 설정합니다.
    pub fn with_event_sender(mut self, event_tx: mpsc::Sender<CaptureEvent>) -> Self {
        self.event_tx = Some(event_tx);
        self
    }

    /// 모든 소스를 동시에 시작합니다.
    pub fn start(&mut self) -> Result<(), LogPipelineError> {
        if self.cancel.is_some() {
            return Err(LogPipelineError::AlreadyRunning("capture"));
        }

        let cancel = CancellationToken::new();
        {
            let mut state = self.shared.lock();
            state.failed.clear();
        }

        for source in &self.config.sources {
            let ctx = SourceContext {
                id: source.id.clone(),
                cancel: cancel.child_token(),
                max_line_length: self.config.max_line_length,
                line_tx: self.line_tx.clone(),
                event_tx: self.event_tx.clone(),
                shared: Arc::clone(&self.shared),
                lines: Arc::new(AtomicU64::new(0)),
            };
            // 태스크가 스케줄되기 전에도 is_active()가 참이어야 함
            self.shared.set_active(&source.id, true);

            let kind = source.kind.clone();
            let max_retries = self.config.max_retries;
            let retry_delay = self.config.retry_delay;
            self.tasks.push(tokio::spawn(run_source(
                ctx,
                kind,
                max_retries,
                retry_delay,
            )));
        }

        info!(sources = self.config.sources.len(), "capture started");
        self.cancel = Some(cancel);
        Ok(())
    }

    /// 모든 소스를 중지합니다. 실행 중이 아니면 아무 일도 하지 않습니다.
    ///
    /// 파일 핸들, 소켓, 자식 프로세스를 해제하며, 제한 시간 안에
    /// 끝나지 않는 태스크는 강제 중단합니다.
    pub async fn stop(&mut self) {
        let Some(cancel) = self.cancel.take() else {
            return;
        };
        cancel.cancel();

        for mut handle in self.tasks.drain(..) {
            if tokio::time::timeout(STOP_GRACE_PERIOD, &mut handle)
                .await
                .is_err()
            {
                warn!("capture source did not stop in time, aborting");
                handle.abort();
            }
        }

        let mut state = self.shared.lock();
        state.active.clear();
        gauge!(m::CAPTURE_ACTIVE_SOURCES).set(0.0);
        info!("capture stopped");
    }

    /// 하나 이상의 소스가 수집 중인지 확인합니다.
    pub fn is_active(&self) -> bool {
        !self.shared.lock().active.is_empty()
    }

    /// 수집 중인 소스 식별자 목록 (정렬됨)
    pub fn get_active_captures(&self) -> Vec<String> {
        self.shared.lock().active.iter().cloned().collect()
    }

    /// 재시도를 소진해 실패한 소스 식별자 목록 (정렬됨)
    pub fn failed_sources(&self) -> Vec<String> {
        self.shared.lock().failed.iter().cloned().collect()
    }

    /// 버퍼에 남아 있는 최근 라인의 복사본
    pub fn get_buffer(&self) -> Vec<RawLine> {
        self.shared.lock().buffer.iter().cloned().collect()
    }

    /// 버퍼를 비웁니다.
    pub fn clear_buffer(&self) {
        self.shared.lock().buffer.clear();
    }

    /// 버퍼의 라인 수
    pub fn buffer_len(&self) -> usize {
        self.shared.lock().buffer.len()
    }

    /// 설정된 소스 목록
    pub fn sources(&self) -> &[CaptureSource] {
        &self.config.sources
    }
}

impl Drop for LogCapture {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
    }
}

/// 소스 하나를 재시도 정책과 함께 실행합니다.
async fn run_source(ctx: SourceContext, kind: SourceKind, max_retries: u32, retry_delay: Duration) {
    ctx.event(CaptureEvent::SourceStarted {
        source_id: ctx.id.clone(),
    })
    .await;
    debug!(source = %ctx.id, kind = kind.name(), "capture source started");

    let mut progress = SourceProgress::default();
    let mut attempt = 0u32;

    loop {
        let result = match &kind {
            SourceKind::File(source) => file::run(source, &ctx, &mut progress.file_offset).await,
            SourceKind::Tail(source) => tail::run(source, &ctx, &mut progress.tail).await,
            SourceKind::Process(source) => process::run(source, &ctx).await,
            SourceKind::Stream(source) => stream::run(source, &ctx).await,
            SourceKind::Socket(source) => socket::run(source, &ctx).await,
        };

        match result {
            Ok(SourceExit::Completed) => {
                info!(source = %ctx.id, lines = ctx.lines(), "capture source completed");
                ctx.event(CaptureEvent::SourceCompleted {
                    source_id: ctx.id.clone(),
                    lines: ctx.lines(),
                })
                .await;
                break;
            }
            Ok(SourceExit::Cancelled) => {
                debug!(source = %ctx.id, "capture source cancelled");
                break;
            }
            Err(failure) if failure.retryable && attempt < max_retries => {
                attempt += 1;
                warn!(
                    source = %ctx.id,
                    attempt,
                    max_retries,
                    error = %failure.reason,
                    "capture source failed, retrying"
                );
                ctx.event(CaptureEvent::SourceRetry {
                    source_id: ctx.id.clone(),
                    attempt,
                    error: failure.reason,
                })
                .await;

                tokio::select! {
                    _ = tokio::time::sleep(retry_delay) => {}
                    _ = ctx.cancel.cancelled() => break,
                }
            }
            Err(failure) => {
                let error = LogPipelineError::Source {
                    source_id: ctx.id.clone(),
                    reason: failure.reason,
                }
                .to_string();
                warn!(source = %ctx.id, attempts = attempt + 1, error = %error, "capture source failed");
                counter!(m::CAPTURE_SOURCE_FAILURES_TOTAL).increment(1);
                ctx.shared.lock().failed.insert(ctx.id.clone());
                ctx.event(CaptureEvent::SourceFailed {
                    source_id: ctx.id.clone(),
                    error,
                })
                .await;
                break;
            }
        }
    }

    ctx.shared.set_active(&ctx.id, false);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn config(sources: Vec<CaptureSource>) -> CaptureConfig {
        CaptureConfig {
            sources,
            retry_delay: Duration::from_millis(10),
            ..CaptureConfig::default()
        }
    }

    async fn collect_events(rx: &mut mpsc::Receiver<CaptureEvent>, until: impl Fn(&CaptureEvent) -> bool) -> Vec<CaptureEvent> {
        let mut events = Vec::new();
        while let Ok(Some(event)) = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await {
            let done = until(&event);
            events.push(event);
            if done {
                break;
            }
        }
        events
    }

    #[test]
    fn duplicate_source_ids_rejected() {
        let (tx, _rx) = mpsc::channel(8);
        let config = config(vec![
            CaptureSource::file("/tmp/a.log"),
            CaptureSource::file("/tmp/a.log"),
        ]);
        assert!(matches!(
            LogCapture::new(config, tx),
            Err(LogPipelineError::Config { .. })
        ));
    }

    #[test]
    fn zero_buffer_rejected() {
        let (tx, _rx) = mpsc::channel(8);
        let config = CaptureConfig {
            max_buffer_size: 0,
            ..CaptureConfig::default()
        };
        assert!(LogCapture::new(config, tx).is_err());
    }

    #[tokio::test]
    async fn file_source_reads_to_eof() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "first\nsecond\nthird").unwrap();

        let (tx, mut rx) = mpsc::channel(16);
        let (etx, mut erx) = mpsc::channel(16);
        let mut capture = LogCapture::new(config(vec![CaptureSource::file(file.path())]), tx)
            .unwrap()
            .with_event_sender(etx);
        capture.start().unwrap();
        assert!(capture.is_active());

        let mut lines = Vec::new();
        for _ in 0..3 {
            lines.push(rx.recv().await.unwrap().content);
        }
        assert_eq!(lines, vec!["first", "second", "third"]);

        let events = collect_events(&mut erx, |e| matches!(e, CaptureEvent::SourceCompleted { .. })).await;
        assert!(matches!(events.first(), Some(CaptureEvent::SourceStarted { .. })));
        assert!(matches!(
            events.last(),
            Some(CaptureEvent::SourceCompleted { lines: 3, .. })
        ));

        assert_eq!(capture.buffer_len(), 3);
        capture.stop().await;
        assert!(!capture.is_active());
        assert!(capture.get_active_captures().is_empty());
    }

    #[tokio::test]
    async fn missing_file_retries_then_fails_without_stopping_others() {
        let mut good = tempfile::NamedTempFile::new().unwrap();
        writeln!(good, "still here").unwrap();

        let (tx, mut rx) = mpsc::channel(16);
        let (etx, mut erx) = mpsc::channel(32);
        let mut cfg = config(vec![
            CaptureSource::file("/nonexistent/logweave/missing.log"),
            CaptureSource::file(good.path()),
        ]);
        cfg.max_retries = 2;
        let mut capture = LogCapture::new(cfg, tx).unwrap().with_event_sender(etx);
        capture.start().unwrap();

        assert_eq!(rx.recv().await.unwrap().content, "still here");

        let events = collect_events(&mut erx, |e| matches!(e, CaptureEvent::SourceFailed { .. })).await;
        let retries = events
            .iter()
            .filter(|e| matches!(e, CaptureEvent::SourceRetry { .. }))
            .count();
        assert_eq!(retries, 2);
        assert!(matches!(events.last(), Some(CaptureEvent::SourceFailed { .. })));
        assert_eq!(
            capture.failed_sources(),
            vec!["file:/nonexistent/logweave/missing.log".to_owned()]
        );
        capture.stop().await;
    }

    #[tokio::test]
    async fn full_event_channel_does_not_delay_stop() {
        let (tx, _rx) = mpsc::channel(8);
        let (etx, _erx) = mpsc::channel(1);
        let mut cfg = config(vec![CaptureSource::file("/nonexistent/logweave/missing.log")]);
        cfg.max_retries = 50;
        let mut capture = LogCapture::new(cfg, tx).unwrap().with_event_sender(etx);
        capture.start().unwrap();

        // SourceStarted fills the channel, the first SourceRetry blocks
        tokio::time::sleep(Duration::from_millis(100)).await;

        tokio::time::timeout(Duration::from_secs(1), capture.stop())
            .await
            .expect("stop() must not wait on a full event channel");
        assert!(!capture.is_active());
    }

    #[tokio::test]
    async fn buffer_evicts_oldest() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        for i in 0..10 {
            writeln!(file, "line {i}").unwrap();
        }

        let (tx, mut rx) = mpsc::channel(16);
        let mut cfg = config(vec![CaptureSource::file(file.path())]);
        cfg.max_buffer_size = 4;
        let mut capture = LogCapture::new(cfg, tx).unwrap();
        capture.start().unwrap();
        for _ in 0..10 {
            rx.recv().await.unwrap();
        }

        let buffered: Vec<_> = capture.get_buffer().into_iter().map(|l| l.content).collect();
        assert_eq!(buffered, vec!["line 6", "line 7", "line 8", "line 9"]);
        capture.clear_buffer();
        assert_eq!(capture.buffer_len(), 0);
        capture.stop().await;
    }

    #[tokio::test]
    async fn stop_is_idempotent_and_start_twice_fails() {
        let (tx, _rx) = mpsc::channel(8);
        let mut capture = LogCapture::new(CaptureConfig::default(), tx).unwrap();
        capture.stop().await;
        capture.start().unwrap();
        assert!(matches!(
            capture.start(),
            Err(LogPipelineError::AlreadyRunning(_))
        ));
        capture.stop().await;
        capture.stop().await;
    }

    #[tokio::test]
    async fn stream_source_is_single_use() {
        let reader = std::io::Cursor::new(b"a\nb\n".to_vec());
        let source = ByteStreamSource::new(reader);
        let (tx, mut rx) = mpsc::channel(16);
        let (etx, mut erx) = mpsc::channel(16);
        let mut capture = LogCapture::new(
            config(vec![CaptureSource::stream("stream:test", source)]),
            tx,
        )
        .unwrap()
        .with_event_sender(etx);

        capture.start().unwrap();
        assert_eq!(rx.recv().await.unwrap().content, "a");
        assert_eq!(rx.recv().await.unwrap().content, "b");
        collect_events(&mut erx, |e| matches!(e, CaptureEvent::SourceCompleted { .. })).await;
        capture.stop().await;

        capture.start().unwrap();
        let events = collect_events(&mut erx, |e| matches!(e, CaptureEvent::SourceFailed { .. })).await;
        assert!(matches!(events.last(), Some(CaptureEvent::SourceFailed { .. })));
        capture.stop().await;
    }
}
