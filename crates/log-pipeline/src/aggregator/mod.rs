//! 집계 모듈 -- 여러 프로세스의 로그를 하나의 뷰로 결합합니다.
//!
//! # 전략
//! - `merge`: 시간순 병합 (선택적 중복 제거)
//! - `group`: 프로세스별 버킷
//! - `correlate`: 상관 필드 값이 같은 로그를 프로세스 간에 묶음
//! - `window`: 고정 크기 시간 윈도우 (겹침 가능)
//! - `sample`: 레코드별 베르누이 샘플
//!
//! [`LogAggregator::aggregate`]는 상태를 바꾸지 않는 동기 스냅샷입니다.
//! `buffer_timeout`이 설정되면 [`LogAggregator::start`]가 주기 타이머를 띄우고
//! 결과를 [`AggregatorEvent::Aggregated`]로 보냅니다.
//!
//! # 사용 예시
//! ```ignore
//! let aggregator = LogAggregator::new(AggregatorConfig::new(AggregationStrategy::Merge))?;
//! aggregator.add_process("api", ProcessInfo::named("api-server"))?;
//! aggregator.add_log("api", log)?;
//! let result = aggregator.aggregate();
//! ```

mod state;
pub mod types;

pub use types::{
    AggregatedData, AggregatedLog, AggregatedResult, AggregationStrategy, AggregatorConfig,
    AggregatorEvent, Correlation, DEFAULT_DEDUP_FIELDS, DEFAULT_MAX_PROCESSES, ProcessInfo,
    ProcessLog, TimeWindow, WindowConfig,
};

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use metrics::{counter, gauge};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use logweave_core::metrics as m;
use logweave_core::types::ParsedLog;

use self::state::State;
use crate::error::LogPipelineError;

/// 로그 집계기
///
/// 상태는 내부 뮤텍스로 보호되므로 `&self`로 로그를 추가할 수 있고,
/// 주기 타이머 태스크와 상태를 공유합니다.
pub struct LogAggregator {
    config: Arc<AggregatorConfig>,
    state: Arc<Mutex<State>>,
    event_tx: Option<mpsc::Sender<AggregatorEvent>>,
    timer: Mutex<Option<Timer>>,
}

struct Timer {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl LogAggregator {
    /// 설정을 검증하고 집계기를 생성합니다.
    pub fn new(config: AggregatorConfig) -> Result<Self, LogPipelineError> {
        config.validate()?;
        let state = State::new(&config);
        Ok(Self {
            config: Arc::new(config),
            state: Arc::new(Mutex::new(state)),
            event_tx: None,
            timer: Mutex::new(None),
        })
    }

    /// 주기 집계 결과를 받을 채널을 설정합니다.
    pub fn with_event_sender(mut self, tx: mpsc::Sender<AggregatorEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    /// 현재 설정
    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // --- 프로세스 관리 ---

    /// 빈 프로세스 로그를 등록합니다.
    ///
    /// 이미 있으면 `DuplicateProcess`, `max_processes`에 도달했으면 `Capacity` 에러입니다.
    /// 기존 프로세스를 축출하지 않습니다.
    pub fn add_process(&self, id: &str, info: ProcessInfo) -> Result<(), LogPipelineError> {
        let mut state = self.lock();
        state.add_process(id, info, self.config.max_processes)?;
        gauge!(m::AGGREGATOR_PROCESSES).set(state.process_count() as f64);
        debug!(process = id, "process registered");
        Ok(())
    }

    /// 프로세스와 그 로그를 완전히 제거합니다.
    pub fn remove_process(&self, id: &str) -> Option<ProcessLog> {
        let mut state = self.lock();
        let removed = state.remove_process(id);
        if removed.is_some() {
            gauge!(m::AGGREGATOR_PROCESSES).set(state.process_count() as f64);
            debug!(process = id, "process removed");
        }
        removed
    }

    /// 등록 여부
    pub fn has_process(&self, id: &str) -> bool {
        self.lock().has_process(id)
    }

    /// 등록된 프로세스 ID (정렬됨)
    pub fn process_ids(&self) -> Vec<String> {
        self.lock().process_ids()
    }

    /// 프로세스 로그 스냅샷
    pub fn get_process(&self, id: &str) -> Option<ProcessLog> {
        self.lock().get_process(id)
    }

    /// 등록된 프로세스 수
    pub fn process_count(&self) -> usize {
        self.lock().process_count()
    }

    /// 보관 중인 전체 로그 수
    pub fn total_logs(&self) -> usize {
        self.lock().total_logs()
    }

    // --- 로그 추가 ---

    /// 프로세스에 로그를 추가합니다. 미등록 프로세스면 `ProcessNotFound`입니다.
    pub fn add_log(&self, id: &str, log: ParsedLog) -> Result<(), LogPipelineError> {
        let evicted = self.lock().add_log(id, log, &self.config)?;
        counter!(m::AGGREGATOR_LOGS_TOTAL).increment(1);
        if evicted > 0 {
            debug!(process = id, evicted, "process log limit reached, evicted oldest");
        }
        Ok(())
    }

    /// 여러 로그를 한 번의 잠금으로 추가합니다. 추가된 수를 반환합니다.
    pub fn add_logs(
        &self,
        id: &str,
        logs: impl IntoIterator<Item = ParsedLog>,
    ) -> Result<usize, LogPipelineError> {
        let mut state = self.lock();
        let mut added = 0;
        for log in logs {
            state.add_log(id, log, &self.config)?;
            added += 1;
        }
        counter!(m::AGGREGATOR_LOGS_TOTAL).increment(added as u64);
        Ok(added)
    }

    // --- 집계 ---

    /// 현재 상태로 집계 결과를 계산합니다. 상태는 변경하지 않습니다.
    pub fn aggregate(&self) -> AggregatedResult {
        let result = self.lock().aggregate(&self.config);
        counter!(m::AGGREGATOR_AGGREGATIONS_TOTAL, m::LABEL_STRATEGY => self.config.strategy.as_str())
            .increment(1);
        result
    }

    /// 프로세스 등록은 유지하고 모든 로그와 인덱스를 비웁니다.
    pub fn clear_process_logs(&self) {
        self.lock().clear_logs();
    }

    /// 프로세스까지 포함해 모든 상태를 초기화합니다. 설정은 유지됩니다.
    pub fn clear(&self) {
        self.lock().clear();
        gauge!(m::AGGREGATOR_PROCESSES).set(0.0);
    }

    // --- 주기 타이머 ---

    /// `buffer_timeout` 주기 타이머를 시작합니다.
    ///
    /// 타이머가 설정되지 않았으면 아무 일도 하지 않습니다.
    /// 이미 실행 중이면 `AlreadyRunning` 에러입니다.
    pub fn start(&self) -> Result<(), LogPipelineError> {
        let mut timer = self.timer.lock().unwrap_or_else(PoisonError::into_inner);
        if timer.is_some() {
            return Err(LogPipelineError::AlreadyRunning("aggregator"));
        }
        let Some(period) = self.config.buffer_timeout else {
            debug!("aggregator has no buffer timeout, timer not started");
            return Ok(());
        };

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_timer(
            period,
            Arc::clone(&self.config),
            Arc::clone(&self.state),
            self.event_tx.clone(),
            cancel.clone(),
        ));
        *timer = Some(Timer { cancel, handle });
        info!(
            strategy = %self.config.strategy,
            period_ms = period.as_millis() as u64,
            "aggregator timer started"
        );
        Ok(())
    }

    /// 타이머를 즉시 멈춥니다. 여러 번 호출해도 안전합니다.
    pub fn stop(&self) {
        let taken = self
            .timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(timer) = taken {
            timer.cancel.cancel();
            timer.handle.abort();
            info!("aggregator timer stopped");
        }
    }

    /// 타이머 실행 여부
    pub fn is_running(&self) -> bool {
        self.timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

impl Drop for LogAggregator {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for LogAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogAggregator")
            .field("strategy", &self.config.strategy)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

/// 주기마다 집계해 이벤트로 보냅니다.
///
/// 마지막 전송 이후 상태가 바뀌지 않았으면 건너뜁니다.
async fn run_timer(
    period: Duration,
    config: Arc<AggregatorConfig>,
    state: Arc<Mutex<State>>,
    event_tx: Option<mpsc::Sender<AggregatorEvent>>,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // 첫 tick은 즉시 완료되므로 소비
    interval.tick().await;

    let mut last_version = None;
    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = cancel.cancelled() => break,
        }

        let result = {
            let mut guard = state.lock().unwrap_or_else(PoisonError::into_inner);
            if guard.total_logs() == 0 || last_version == Some(guard.version()) {
                continue;
            }
            let result = guard.aggregate(&config);
            if config.reset_after_emit {
                guard.clear_logs();
            }
            last_version = Some(guard.version());
            result
        };
        counter!(m::AGGREGATOR_AGGREGATIONS_TOTAL, m::LABEL_STRATEGY => config.strategy.as_str())
            .increment(1);

        let Some(tx) = &event_tx else {
            continue;
        };
        tokio::select! {
            sent = tx.send(AggregatorEvent::Aggregated(result)) => {
                if sent.is_err() {
                    warn!("aggregator event receiver dropped, stopping timer");
                    break;
                }
            }
            _ = cancel.cancelled() => break,
        }
    }
    debug!("aggregator timer exited");
}
