//! 집계 설정과 결과 타입

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use logweave_core::types::ParsedLog;

use crate::error::LogPipelineError;

/// 기본 최대 프로세스 수
pub const DEFAULT_MAX_PROCESSES: usize = 100;

/// 기본 중복 제거 필드
pub const DEFAULT_DEDUP_FIELDS: [&str; 4] = ["timestamp", "level", "source", "message"];

/// 집계 전략
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregationStrategy {
    /// 모든 프로세스의 로그를 하나의 시간순 시퀀스로 병합
    #[default]
    Merge,
    /// 프로세스별 버킷
    Group,
    /// 상관 필드 값이 같은 로그끼리 묶음
    Correlate,
    /// 고정 크기 시간 윈도우
    Window,
    /// 무작위 샘플
    Sample,
}

impl AggregationStrategy {
    /// 소문자 전략 이름
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Merge => "merge",
            Self::Group => "group",
            Self::Correlate => "correlate",
            Self::Window => "window",
            Self::Sample => "sample",
        }
    }
}

impl fmt::Display for AggregationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AggregationStrategy {
    type Err = LogPipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "merge" => Ok(Self::Merge),
            "group" => Ok(Self::Group),
            "correlate" => Ok(Self::Correlate),
            "window" => Ok(Self::Window),
            "sample" => Ok(Self::Sample),
            other => Err(LogPipelineError::config(
                "aggregator.strategy",
                format!("unknown strategy '{other}'"),
            )),
        }
    }
}

/// 시간 윈도우 설정
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowConfig {
    /// 윈도우 크기
    pub size: Duration,
    /// 연속 윈도우 사이의 겹침. `size`보다 작아야 합니다.
    pub overlap: Duration,
}

impl WindowConfig {
    /// 겹침 없는 윈도우
    pub fn tumbling(size: Duration) -> Self {
        Self {
            size,
            overlap: Duration::ZERO,
        }
    }

    /// 겹치는 윈도우
    pub fn sliding(size: Duration, overlap: Duration) -> Self {
        Self { size, overlap }
    }

    /// 윈도우 시작 간격 (`size - overlap`)
    pub fn step(&self) -> Duration {
        self.size.saturating_sub(self.overlap)
    }
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self::tumbling(Duration::from_secs(5))
    }
}

/// 집계기 설정
#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    /// 집계 전략
    pub strategy: AggregationStrategy,
    /// `correlate` 전략의 상관 필드 경로 (예: `fields.request_id`)
    pub correlation_field: Option<String>,
    /// `window` 전략의 윈도우 설정
    pub window: WindowConfig,
    /// `merge`/`sample` 결과에서 중복 제거 여부
    pub deduplication: bool,
    /// 중복 판정에 사용할 필드 경로
    pub dedup_fields: Vec<String>,
    /// 샘플 비율 [0, 1]
    pub sample_rate: f64,
    /// 샘플 시드. 지정하면 같은 상태에서 같은 결과를 냅니다.
    pub sample_seed: Option<u64>,
    /// 최대 동시 추적 프로세스 수
    pub max_processes: usize,
    /// 프로세스당 보관 로그 상한 (초과 시 오래된 것부터 축출)
    pub max_logs_per_process: Option<usize>,
    /// 주기적 집계 간격
    pub buffer_timeout: Option<Duration>,
    /// 주기적 집계 후 프로세스 로그를 비울지 여부
    pub reset_after_emit: bool,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            strategy: AggregationStrategy::Merge,
            correlation_field: None,
            window: WindowConfig::default(),
            deduplication: false,
            dedup_fields: DEFAULT_DEDUP_FIELDS.iter().map(|s| (*s).to_owned()).collect(),
            sample_rate: 1.0,
            sample_seed: None,
            max_processes: DEFAULT_MAX_PROCESSES,
            max_logs_per_process: None,
            buffer_timeout: None,
            reset_after_emit: false,
        }
    }
}

impl AggregatorConfig {
    /// 전략만 지정한 기본 설정
    pub fn new(strategy: AggregationStrategy) -> Self {
        Self {
            strategy,
            ..Self::default()
        }
    }

    /// 설정 값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), LogPipelineError> {
        if self.strategy == AggregationStrategy::Correlate
            && self
                .correlation_field
                .as_deref()
                .is_none_or(|f| f.trim().is_empty())
        {
            return Err(LogPipelineError::config(
                "aggregator.correlation_field",
                "correlate strategy requires a correlation field",
            ));
        }

        if self.window.size.is_zero() {
            return Err(LogPipelineError::config(
                "aggregator.window.size",
                "must be greater than 0",
            ));
        }
        if self.window.overlap >= self.window.size {
            return Err(LogPipelineError::config(
                "aggregator.window.overlap",
                format!(
                    "overlap ({:?}) must be smaller than window size ({:?})",
                    self.window.overlap, self.window.size
                ),
            ));
        }

        if !(0.0..=1.0).contains(&self.sample_rate) {
            return Err(LogPipelineError::config(
                "aggregator.sample_rate",
                format!("must be within [0, 1], got {}", self.sample_rate),
            ));
        }

        if self.deduplication && self.dedup_fields.is_empty() {
            return Err(LogPipelineError::config(
                "aggregator.dedup_fields",
                "deduplication requires at least one field",
            ));
        }

        if self.max_processes == 0 {
            return Err(LogPipelineError::config(
                "aggregator.max_processes",
                "must be greater than 0",
            ));
        }
        if self.max_logs_per_process == Some(0) {
            return Err(LogPipelineError::config(
                "aggregator.max_logs_per_process",
                "must be greater than 0",
            ));
        }
        if self.buffer_timeout.is_some_and(|t| t.is_zero()) {
            return Err(LogPipelineError::config(
                "aggregator.buffer_timeout",
                "must be greater than 0",
            ));
        }

        Ok(())
    }
}

/// 프로세스 등록 정보
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessInfo {
    /// 프로세스 이름
    pub name: Option<String>,
    /// PID
    pub pid: Option<u32>,
    /// 부가 메타데이터
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl ProcessInfo {
    /// 이름만 지정합니다.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    /// PID를 지정합니다.
    pub fn with_pid(mut self, pid: u32) -> Self {
        self.pid = Some(pid);
        self
    }
}

/// 프로세스별 누적 로그 스냅샷
#[derive(Debug, Clone, Serialize)]
pub struct ProcessLog {
    pub process_id: String,
    pub process_name: Option<String>,
    pub pid: Option<u32>,
    pub start_time: DateTime<Utc>,
    /// 추가된 순서의 로그
    pub logs: Vec<ParsedLog>,
    pub metadata: Map<String, Value>,
}

/// 출처 프로세스가 표시된 로그
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregatedLog {
    pub process_id: String,
    pub log: ParsedLog,
}

/// 상관 필드 값이 같은 로그 묶음
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Correlation {
    /// 상관 필드 값
    pub key: String,
    /// 이 묶음에 참여한 프로세스 (정렬됨)
    pub processes: Vec<String>,
    /// 시간순 로그
    pub logs: Vec<AggregatedLog>,
}

/// 시간 윈도우 하나
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimeWindow {
    /// 원점 기준 윈도우 번호 (원점 이전이면 음수)
    pub index: i64,
    /// 포함 시작 시각
    pub start: DateTime<Utc>,
    /// 미포함 끝 시각
    pub end: DateTime<Utc>,
    /// 시간순 로그
    pub logs: Vec<AggregatedLog>,
}

/// 전략별 집계 데이터
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "items", rename_all = "lowercase")]
pub enum AggregatedData {
    Merged(Vec<AggregatedLog>),
    Grouped(BTreeMap<String, Vec<ParsedLog>>),
    Correlated(Vec<Correlation>),
    Windowed(Vec<TimeWindow>),
    Sampled(Vec<AggregatedLog>),
}

/// 집계 결과 스냅샷
#[derive(Debug, Clone, Serialize)]
pub struct AggregatedResult {
    pub strategy: AggregationStrategy,
    /// 집계 시각
    pub timestamp: DateTime<Utc>,
    /// 결과에 포함된 로그 수
    pub count: usize,
    /// 집계 시점의 등록 프로세스 ID (정렬됨)
    pub processes: Vec<String>,
    pub data: AggregatedData,
    pub metadata: Map<String, Value>,
}

impl AggregatedResult {
    /// 결과에 포함된 로그를 순서대로 순회합니다.
    ///
    /// 겹치는 윈도우에서는 같은 로그가 여러 번 나올 수 있습니다.
    pub fn logs(&self) -> Box<dyn Iterator<Item = &ParsedLog> + '_> {
        match &self.data {
            AggregatedData::Merged(logs) | AggregatedData::Sampled(logs) => {
                Box::new(logs.iter().map(|l| &l.log))
            }
            AggregatedData::Grouped(groups) => Box::new(groups.values().flatten()),
            AggregatedData::Correlated(clusters) => {
                Box::new(clusters.iter().flat_map(|c| c.logs.iter().map(|l| &l.log)))
            }
            AggregatedData::Windowed(windows) => {
                Box::new(windows.iter().flat_map(|w| w.logs.iter().map(|l| &l.log)))
            }
        }
    }
}

/// 집계기 이벤트
#[derive(Debug, Clone)]
pub enum AggregatorEvent {
    /// 주기적 집계 결과
    Aggregated(AggregatedResult),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(AggregatorConfig::default().validate().is_ok());
    }

    #[test]
    fn correlate_requires_field() {
        let mut config = AggregatorConfig::new(AggregationStrategy::Correlate);
        assert!(config.validate().is_err());
        config.correlation_field = Some("request_id".to_owned());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn overlap_must_be_smaller_than_size() {
        let mut config = AggregatorConfig::new(AggregationStrategy::Window);
        config.window = WindowConfig::sliding(Duration::from_secs(5), Duration::from_secs(5));
        assert!(config.validate().is_err());
        config.window = WindowConfig::sliding(Duration::from_secs(5), Duration::from_secs(2));
        assert!(config.validate().is_ok());
        assert_eq!(config.window.step(), Duration::from_secs(3));
    }

    #[test]
    fn sample_rate_bounds() {
        for rate in [-0.1, 1.5, f64::NAN] {
            let config = AggregatorConfig {
                sample_rate: rate,
                ..AggregatorConfig::new(AggregationStrategy::Sample)
            };
            assert!(config.validate().is_err(), "rate {rate} should be rejected");
        }
        for rate in [0.0, 0.5, 1.0] {
            let config = AggregatorConfig {
                sample_rate: rate,
                ..AggregatorConfig::new(AggregationStrategy::Sample)
            };
            assert!(config.validate().is_ok());
        }
    }

    #[test]
    fn strategy_from_str() {
        assert_eq!(
            "Window".parse::<AggregationStrategy>().unwrap(),
            AggregationStrategy::Window
        );
        assert!("bogus".parse::<AggregationStrategy>().is_err());
        assert_eq!(AggregationStrategy::Correlate.to_string(), "correlate");
    }
}
