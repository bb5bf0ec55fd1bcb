//! 설정 관리 -- logweave.toml 파싱 및 런타임 설정
//!
//! [`LogweaveConfig`]는 데몬이 읽는 최상위 구조체입니다.
//! 라이브러리 컴포넌트는 이 구조체를 직접 읽지 않고,
//! `logweave-pipeline`의 `PipelineConfig::from_core`가 타입 있는 설정으로 변환합니다.
//!
//! # 설정 로딩 우선순위
//! 1. CLI 인자 (최고 우선)
//! 2. 환경변수 (`LOGWEAVE_PIPELINE_BATCH_SIZE=200` 형식)
//! 3. 설정 파일 (`logweave.toml`)
//! 4. 기본값 (`Default` 구현)
//!
//! # 사용 예시
//! ```no_run
//! # async fn example() -> Result<(), logweave_core::error::LogweaveError> {
//! use logweave_core::config::LogweaveConfig;
//!
//! // 파일에서 로드 + 환경변수 오버라이드
//! let config = LogweaveConfig::load("logweave.toml").await?;
//!
//! // TOML 문자열에서 직접 파싱
//! let config = LogweaveConfig::parse("[general]\nlog_level = \"debug\"")?;
//! # Ok(())
//! # }
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ConfigError, LogweaveError};
use crate::types::LogFormat;

/// logweave 통합 설정
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogweaveConfig {
    /// 일반 설정
    #[serde(default)]
    pub general: GeneralConfig,
    /// 로그 파이프라인 설정
    #[serde(default)]
    pub pipeline: LogPipelineConfig,
}

impl LogweaveConfig {
    /// TOML 파일에서 설정을 로드하고 환경변수 오버라이드를 적용합니다.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, LogweaveError> {
        let mut config = Self::from_file(path).await?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// TOML 파일에서 설정을 로드합니다 (환경변수 오버라이드 없음).
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, LogweaveError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                LogweaveError::Config(ConfigError::FileNotFound {
                    path: path.display().to_string(),
                })
            } else {
                LogweaveError::Io(e)
            }
        })?;
        let config = Self::parse(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// TOML 문자열에서 설정을 파싱합니다.
    pub fn parse(toml_str: &str) -> Result<Self, LogweaveError> {
        toml::from_str(toml_str).map_err(|e| {
            LogweaveError::Config(ConfigError::ParseFailed {
                reason: e.to_string(),
            })
        })
    }

    /// 환경변수로 설정값을 오버라이드합니다.
    ///
    /// 환경변수 네이밍 규칙: `LOGWEAVE_{SECTION}_{FIELD}`
    /// 예: `LOGWEAVE_PIPELINE_SOURCES=file:/var/log/a.log,tcp:0.0.0.0:601`
    pub fn apply_env_overrides(&mut self) {
        // General
        override_string(&mut self.general.log_level, "LOGWEAVE_GENERAL_LOG_LEVEL");
        override_string(&mut self.general.log_format, "LOGWEAVE_GENERAL_LOG_FORMAT");

        // Pipeline
        let p = &mut self.pipeline;
        override_bool(&mut p.enabled, "LOGWEAVE_PIPELINE_ENABLED");
        override_csv(&mut p.sources, "LOGWEAVE_PIPELINE_SOURCES");
        override_string(&mut p.format, "LOGWEAVE_PIPELINE_FORMAT");
        override_string(&mut p.multiline_start, "LOGWEAVE_PIPELINE_MULTILINE_START");
        override_string(&mut p.multiline_end, "LOGWEAVE_PIPELINE_MULTILINE_END");
        override_string(&mut p.min_level, "LOGWEAVE_PIPELINE_MIN_LEVEL");
        override_string(&mut p.strategy, "LOGWEAVE_PIPELINE_STRATEGY");
        override_string(
            &mut p.correlation_field,
            "LOGWEAVE_PIPELINE_CORRELATION_FIELD",
        );
        override_string(&mut p.window_size, "LOGWEAVE_PIPELINE_WINDOW_SIZE");
        override_string(&mut p.window_overlap, "LOGWEAVE_PIPELINE_WINDOW_OVERLAP");
        override_bool(&mut p.deduplication, "LOGWEAVE_PIPELINE_DEDUPLICATION");
        override_f64(&mut p.sample_rate, "LOGWEAVE_PIPELINE_SAMPLE_RATE");
        override_usize(&mut p.max_processes, "LOGWEAVE_PIPELINE_MAX_PROCESSES");
        override_string(
            &mut p.aggregate_interval,
            "LOGWEAVE_PIPELINE_AGGREGATE_INTERVAL",
        );
        override_csv(&mut p.destinations, "LOGWEAVE_PIPELINE_DESTINATIONS");
        override_usize(&mut p.batch_size, "LOGWEAVE_PIPELINE_BATCH_SIZE");
        override_u64(
            &mut p.flush_interval_ms,
            "LOGWEAVE_PIPELINE_FLUSH_INTERVAL_MS",
        );
        override_usize(&mut p.buffer_size, "LOGWEAVE_PIPELINE_BUFFER_SIZE");
        override_string(&mut p.backpressure, "LOGWEAVE_PIPELINE_BACKPRESSURE");
        override_u32(&mut p.max_retries, "LOGWEAVE_PIPELINE_MAX_RETRIES");
        override_u64(&mut p.retry_delay_ms, "LOGWEAVE_PIPELINE_RETRY_DELAY_MS");
        override_usize(
            &mut p.capture_buffer_size,
            "LOGWEAVE_PIPELINE_CAPTURE_BUFFER_SIZE",
        );
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), LogweaveError> {
        // log_level 검증
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.general.log_level.as_str()) {
            return Err(invalid(
                "general.log_level",
                format!("must be one of: {}", valid_levels.join(", ")),
            ));
        }

        // log_format 검증
        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.general.log_format.as_str()) {
            return Err(invalid(
                "general.log_format",
                format!("must be one of: {}", valid_formats.join(", ")),
            ));
        }

        self.pipeline.validate()
    }
}

/// 일반 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// 로그 레벨 (trace, debug, info, warn, error)
    pub log_level: String,
    /// 로그 형식 (json, pretty)
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_owned(),
            log_format: "json".to_owned(),
        }
    }
}

/// 로그 파이프라인 설정
///
/// 문자열 기반의 평평한 구조입니다. 소스/목적지 명세 문법:
/// - 소스: `file:<path>`, `tail:<path>`, `process:<cmd> [args]`, `tcp:<addr>`, `udp:<addr>`
/// - 목적지: `console`, `file:<path>`, `http(s)://...`, `ws(s)://...`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogPipelineConfig {
    /// 활성화 여부
    pub enabled: bool,
    /// 수집 소스 명세 목록
    pub sources: Vec<String>,
    /// 파서 형식 (json, plain, structured, syslog, ...)
    pub format: String,
    /// multiline 시작 패턴 (빈 문자열이면 비활성)
    pub multiline_start: String,
    /// multiline 종료 패턴 (빈 문자열이면 continuation 규칙 사용)
    pub multiline_end: String,
    /// 최소 레벨 필터 (빈 문자열이면 필터 없음)
    pub min_level: String,
    /// 집계 전략 (merge, group, correlate, window, sample)
    pub strategy: String,
    /// correlate 전략의 상관 필드
    pub correlation_field: String,
    /// window 전략의 윈도우 크기 (예: "5s")
    pub window_size: String,
    /// 연속 윈도우 간 겹침 (예: "1s")
    pub window_overlap: String,
    /// merge 전략 중복 제거 여부
    pub deduplication: bool,
    /// sample 전략 샘플링 비율 (0.0-1.0)
    pub sample_rate: f64,
    /// 동시에 추적할 최대 프로세스(소스) 수
    pub max_processes: usize,
    /// 주기적 집계 간격 (빈 문자열이면 비활성)
    pub aggregate_interval: String,
    /// 스트리밍 목적지 명세 목록
    pub destinations: Vec<String>,
    /// 배치 크기 (이 개수만큼 모이면 플러시)
    pub batch_size: usize,
    /// 플러시 간격 (밀리초)
    pub flush_interval_ms: u64,
    /// 스트림 버퍼 용량
    pub buffer_size: usize,
    /// 백프레셔 전략 (drop, buffer, pause)
    pub backpressure: String,
    /// 소스 재시도 횟수
    pub max_retries: u32,
    /// 재시도 간격 (밀리초)
    pub retry_delay_ms: u64,
    /// 수집 버퍼 최대 라인 수
    pub capture_buffer_size: usize,
}

impl Default for LogPipelineConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sources: vec!["tail:/var/log/syslog".to_owned()],
            format: "syslog".to_owned(),
            multiline_start: String::new(),
            multiline_end: String::new(),
            min_level: String::new(),
            strategy: "merge".to_owned(),
            correlation_field: String::new(),
            window_size: "5s".to_owned(),
            window_overlap: "0s".to_owned(),
            deduplication: false,
            sample_rate: 1.0,
            max_processes: 64,
            aggregate_interval: String::new(),
            destinations: vec!["console".to_owned()],
            batch_size: 100,
            flush_interval_ms: 1000,
            buffer_size: 10_000,
            backpressure: "drop".to_owned(),
            max_retries: 3,
            retry_delay_ms: 1000,
            capture_buffer_size: 10_000,
        }
    }
}

impl LogPipelineConfig {
    /// 파이프라인 섹션의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), LogweaveError> {
        if self.format.parse::<LogFormat>().is_err() {
            return Err(invalid(
                "pipeline.format",
                format!("unknown log format '{}'", self.format),
            ));
        }

        let strategies = ["merge", "group", "correlate", "window", "sample"];
        if !strategies.contains(&self.strategy.as_str()) {
            return Err(invalid(
                "pipeline.strategy",
                format!("must be one of: {}", strategies.join(", ")),
            ));
        }

        if self.strategy == "correlate" && self.correlation_field.is_empty() {
            return Err(invalid(
                "pipeline.correlation_field",
                "required when strategy is 'correlate'".to_owned(),
            ));
        }

        let backpressure = ["drop", "buffer", "pause"];
        if !backpressure.contains(&self.backpressure.as_str()) {
            return Err(invalid(
                "pipeline.backpressure",
                format!("must be one of: {}", backpressure.join(", ")),
            ));
        }

        if !(0.0..=1.0).contains(&self.sample_rate) {
            return Err(invalid(
                "pipeline.sample_rate",
                "must be within 0.0-1.0".to_owned(),
            ));
        }

        if self.batch_size == 0 {
            return Err(invalid(
                "pipeline.batch_size",
                "must be greater than 0".to_owned(),
            ));
        }

        if self.buffer_size == 0 {
            return Err(invalid(
                "pipeline.buffer_size",
                "must be greater than 0".to_owned(),
            ));
        }

        if self.max_processes == 0 {
            return Err(invalid(
                "pipeline.max_processes",
                "must be greater than 0".to_owned(),
            ));
        }

        for (field, value) in [
            ("pipeline.window_size", &self.window_size),
            ("pipeline.window_overlap", &self.window_overlap),
        ] {
            parse_duration(value).map_err(|reason| invalid(field, reason))?;
        }

        if !self.aggregate_interval.is_empty() {
            parse_duration(&self.aggregate_interval)
                .map_err(|reason| invalid("pipeline.aggregate_interval", reason))?;
        }

        if self.enabled && self.sources.is_empty() {
            return Err(invalid(
                "pipeline.sources",
                "at least one source must be configured when enabled".to_owned(),
            ));
        }

        Ok(())
    }
}

/// `500ms`, `5s`, `2m`, `1h` 형식의 기간 문자열을 파싱합니다.
///
/// 단위가 없으면 초로 해석합니다.
pub fn parse_duration(input: &str) -> Result<Duration, String> {
    let s = input.trim();
    if s.is_empty() {
        return Err("duration must not be empty".to_owned());
    }

    let split = s
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .unwrap_or(s.len());
    let (number, unit) = s.split_at(split);
    let value: f64 = number
        .parse()
        .map_err(|_| format!("invalid duration '{input}'"))?;

    let millis = match unit.trim() {
        "ms" => value,
        "" | "s" | "sec" | "secs" => value * 1_000.0,
        "m" | "min" | "mins" => value * 60_000.0,
        "h" | "hr" | "hrs" => value * 3_600_000.0,
        other => return Err(format!("unknown duration unit '{other}' in '{input}'")),
    };

    if !millis.is_finite() || millis < 0.0 {
        return Err(format!("invalid duration '{input}'"));
    }

    Ok(Duration::from_millis(millis.round() as u64))
}

fn invalid(field: &str, reason: String) -> LogweaveError {
    ConfigError::InvalidValue {
        field: field.to_owned(),
        reason,
    }
    .into()
}

// --- 환경변수 오버라이드 헬퍼 ---

fn override_string(target: &mut String, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val;
    }
}

fn override_bool(target: &mut bool, env_key: &str) {
    override_parsed(target, env_key, "bool");
}

fn override_usize(target: &mut usize, env_key: &str) {
    override_parsed(target, env_key, "usize");
}

fn override_u32(target: &mut u32, env_key: &str) {
    override_parsed(target, env_key, "u32");
}

fn override_u64(target: &mut u64, env_key: &str) {
    override_parsed(target, env_key, "u64");
}

fn override_f64(target: &mut f64, env_key: &str) {
    override_parsed(target, env_key, "f64");
}

fn override_parsed<T: std::str::FromStr>(target: &mut T, env_key: &str, type_name: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<T>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                expected = type_name,
                "failed to parse env var, ignoring"
            ),
        }
    }
}

fn override_csv(target: &mut Vec<String>, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val
            .split(',')
            .map(|s| s.trim().to_owned())
            .filter(|s| !s.is_empty())
            .collect();
    }
}
