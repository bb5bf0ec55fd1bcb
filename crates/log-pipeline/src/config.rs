//! 로그 파이프라인 설정
//!
//! [`PipelineConfig`]는 core의 평면적인
//! [`LogPipelineConfig`](logweave_core::config::LogPipelineConfig)를
//! 컴포넌트별 설정으로 변환합니다.
//!
//! # 소스 명세
//! - `file:<path>`: 파일을 끝까지 읽기
//! - `tail:<path>`: 파일 tail
//! - `process:<command> [args...]`: 외부 프로세스 출력
//! - `tcp:<addr>`, `udp:<addr>`: 소켓 수신
//!
//! # 목적지 명세
//! - `console`, `console:stderr`
//! - `file:<path>`
//! - `http://...`, `https://...`
//! - `ws://...`, `wss://...`
//!
//! # 사용 예시
//! ```ignore
//! use logweave_core::config::LogweaveConfig;
//! use logweave_pipeline::config::PipelineConfig;
//!
//! let core_config = LogweaveConfig::default();
//! let config = PipelineConfig::from_core(&core_config.pipeline)?;
//! ```

use std::time::Duration;

use logweave_core::config::{LogPipelineConfig, parse_duration};
use logweave_core::types::{LogFormat, LogLevel};

use crate::aggregator::{AggregationStrategy, AggregatorConfig, WindowConfig};
use crate::capture::{CaptureConfig, CaptureSource, ProcessSource, SocketSource};
use crate::error::LogPipelineError;
use crate::filter::{FilterConfig, FilterOperator, FilterRule};
use crate::parser::{MultilineConfig, ParserConfig};
use crate::streamer::{BackpressureStrategy, ConsoleTarget, Destination, StreamerConfig};

/// 스테이지 간 채널 기본 용량
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// 로그 파이프라인 설정
///
/// 컴포넌트 설정을 그대로 담으며, 각 컴포넌트가 자신의 `validate()`를 가집니다.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// 활성화 여부
    pub enabled: bool,
    /// 수집 설정
    pub capture: CaptureConfig,
    /// 파서 설정 (소스마다 별도 인스턴스를 만듭니다)
    pub parser: ParserConfig,
    /// 필터 설정
    pub filter: FilterConfig,
    /// 집계 설정
    pub aggregator: AggregatorConfig,
    /// 스트리밍 설정
    pub streamer: StreamerConfig,
    /// 스테이지 간 채널 용량
    pub channel_capacity: usize,
    /// 필터를 통과한 개별 레코드도 스트리밍할지 여부
    pub stream_logs: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let mut aggregator = AggregatorConfig::default();
        // 주기 집계 결과가 같은 레코드를 반복 전송하지 않도록 함
        aggregator.reset_after_emit = true;
        Self {
            enabled: true,
            capture: CaptureConfig::default(),
            parser: ParserConfig::default(),
            filter: FilterConfig::default(),
            aggregator,
            streamer: StreamerConfig {
                destinations: vec![Destination::console()],
                ..StreamerConfig::default()
            },
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            stream_logs: false,
        }
    }
}

impl PipelineConfig {
    /// core의 `LogPipelineConfig`에서 파이프라인 설정을 생성합니다.
    ///
    /// 소스/목적지 명세, 기간 문자열, 열거형 이름을 해석하며
    /// 잘못된 값은 `Config` 에러입니다.
    pub fn from_core(core: &LogPipelineConfig) -> Result<Self, LogPipelineError> {
        let sources = core
            .sources
            .iter()
            .map(|spec| parse_source(spec))
            .collect::<Result<Vec<_>, _>>()?;
        let destinations = core
            .destinations
            .iter()
            .map(|spec| parse_destination(spec))
            .collect::<Result<Vec<_>, _>>()?;

        let capture = CaptureConfig {
            sources,
            max_buffer_size: core.capture_buffer_size,
            max_retries: core.max_retries,
            retry_delay: Duration::from_millis(core.retry_delay_ms),
            ..CaptureConfig::default()
        };

        let format: LogFormat = core
            .format
            .parse()
            .map_err(|_| LogPipelineError::config("pipeline.format", format!("unknown log format '{}'", core.format)))?;
        let mut parser = ParserConfig::new(format);
        if !core.multiline_start.is_empty() {
            let mut multiline = MultilineConfig::new(&core.multiline_start);
            if !core.multiline_end.is_empty() {
                multiline = multiline.with_end(&core.multiline_end);
            }
            parser = parser.with_multiline(multiline);
        } else if !core.multiline_end.is_empty() {
            return Err(LogPipelineError::config(
                "pipeline.multiline_end",
                "requires multiline_start",
            ));
        }

        let mut filter = FilterConfig::default();
        if !core.min_level.is_empty() {
            let level = LogLevel::from_str_loose(&core.min_level).ok_or_else(|| {
                LogPipelineError::config(
                    "pipeline.min_level",
                    format!("unknown level '{}'", core.min_level),
                )
            })?;
            filter
                .rules
                .push(FilterRule::new("level", FilterOperator::Gte, level.as_str()).into());
        }

        let strategy: AggregationStrategy = core.strategy.parse()?;
        let aggregator = AggregatorConfig {
            correlation_field: (!core.correlation_field.is_empty())
                .then(|| core.correlation_field.clone()),
            window: WindowConfig::sliding(
                duration("pipeline.window_size", &core.window_size)?,
                duration("pipeline.window_overlap", &core.window_overlap)?,
            ),
            deduplication: core.deduplication,
            sample_rate: core.sample_rate,
            max_processes: core.max_processes,
            buffer_timeout: if core.aggregate_interval.is_empty() {
                None
            } else {
                Some(duration("pipeline.aggregate_interval", &core.aggregate_interval)?)
            },
            reset_after_emit: true,
            ..AggregatorConfig::new(strategy)
        };

        let streamer = StreamerConfig {
            destinations,
            batch_size: core.batch_size,
            flush_interval: Duration::from_millis(core.flush_interval_ms),
            buffer_size: core.buffer_size,
            backpressure: core.backpressure.parse::<BackpressureStrategy>()?,
            ..StreamerConfig::default()
        };

        Ok(Self {
            enabled: core.enabled,
            capture,
            parser,
            filter,
            aggregator,
            streamer,
            ..Self::default()
        })
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), LogPipelineError> {
        if self.channel_capacity == 0 {
            return Err(LogPipelineError::config(
                "pipeline.channel_capacity",
                "must be greater than 0",
            ));
        }
        if self.enabled && self.capture.sources.is_empty() {
            return Err(LogPipelineError::config(
                "pipeline.sources",
                "at least one source must be configured when enabled",
            ));
        }
        self.capture.validate()?;
        self.filter.validate()?;
        self.aggregator.validate()?;
        self.streamer.validate()?;
        Ok(())
    }
}

fn duration(field: &str, value: &str) -> Result<Duration, LogPipelineError> {
    parse_duration(value).map_err(|reason| LogPipelineError::config(field, reason))
}

/// 소스 명세를 해석합니다.
pub fn parse_source(spec: &str) -> Result<CaptureSource, LogPipelineError> {
    let invalid = |reason: &str| {
        LogPipelineError::config("pipeline.sources", format!("'{spec}': {reason}"))
    };
    let (kind, rest) = spec
        .split_once(':')
        .ok_or_else(|| invalid("expected <kind>:<target>"))?;
    let rest = rest.trim();
    if rest.is_empty() {
        return Err(invalid("missing target"));
    }

    match kind.trim() {
        "file" => Ok(CaptureSource::file(rest)),
        "tail" => Ok(CaptureSource::tail(rest)),
        "process" => {
            let mut parts = rest.split_whitespace();
            let command = parts.next().ok_or_else(|| invalid("missing command"))?;
            Ok(CaptureSource::process(ProcessSource::new(command, parts)))
        }
        "tcp" => Ok(CaptureSource::socket(SocketSource::tcp(rest))),
        "udp" => Ok(CaptureSource::socket(SocketSource::udp(rest))),
        other => Err(invalid(&format!("unknown source kind '{other}'"))),
    }
}

/// 목적지 명세를 해석합니다.
pub fn parse_destination(spec: &str) -> Result<Destination, LogPipelineError> {
    let spec = spec.trim();
    if spec.starts_with("http://") || spec.starts_with("https://") {
        return Ok(Destination::http(spec));
    }
    if spec.starts_with("ws://") || spec.starts_with("wss://") {
        return Ok(Destination::websocket(spec));
    }

    match spec.split_once(':') {
        None if spec == "console" => Ok(Destination::console()),
        Some(("console", "stdout")) => Ok(Destination::console()),
        Some(("console", "stderr")) => Ok(Destination::Console {
            colorize: true,
            target: ConsoleTarget::Stderr,
        }),
        Some(("file", path)) if !path.trim().is_empty() => Ok(Destination::file(path.trim())),
        _ => Err(LogPipelineError::config(
            "pipeline.destinations",
            format!("unknown destination '{spec}'"),
        )),
    }
}

/// 파이프라인 설정 빌더
///
/// 3개 이상의 설정 필드가 있으므로 빌더 패턴을 사용합니다.
#[derive(Default)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    /// 새 빌더를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// 활성화 여부를 설정합니다.
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.config.enabled = enabled;
        self
    }

    /// 수집 소스를 추가합니다.
    pub fn source(mut self, source: CaptureSource) -> Self {
        self.config.capture.sources.push(source);
        self
    }

    /// 수집 설정을 교체합니다.
    pub fn capture(mut self, capture: CaptureConfig) -> Self {
        self.config.capture = capture;
        self
    }

    /// 파서 설정을 교체합니다.
    pub fn parser(mut self, parser: ParserConfig) -> Self {
        self.config.parser = parser;
        self
    }

    /// 필터 설정을 교체합니다.
    pub fn filter(mut self, filter: FilterConfig) -> Self {
        self.config.filter = filter;
        self
    }

    /// 집계 설정을 교체합니다.
    pub fn aggregator(mut self, aggregator: AggregatorConfig) -> Self {
        self.config.aggregator = aggregator;
        self
    }

    /// 스트리밍 설정을 교체합니다.
    pub fn streamer(mut self, streamer: StreamerConfig) -> Self {
        self.config.streamer = streamer;
        self
    }

    /// 목적지 목록을 교체합니다.
    pub fn destinations(mut self, destinations: Vec<Destination>) -> Self {
        self.config.streamer.destinations = destinations;
        self
    }

    /// 채널 용량을 설정합니다.
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.config.channel_capacity = capacity;
        self
    }

    /// 개별 레코드 스트리밍 여부를 설정합니다.
    pub fn stream_logs(mut self, stream_logs: bool) -> Self {
        self.config.stream_logs = stream_logs;
        self
    }

    /// 설정을 검증하고 `PipelineConfig`를 생성합니다.
    pub fn build(self) -> Result<PipelineConfig, LogPipelineError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::SourceKind;
    use crate::filter::FilterNode;

    #[test]
    fn default_core_config_converts() {
        let config = PipelineConfig::from_core(&LogPipelineConfig::default()).unwrap();
        config.validate().unwrap();
        assert_eq!(config.capture.sources.len(), 1);
        assert_eq!(config.capture.sources[0].id, "tail:/var/log/syslog");
        assert_eq!(config.parser.format, LogFormat::Syslog);
        assert!(config.filter.rules.is_empty());
        assert_eq!(config.aggregator.strategy, AggregationStrategy::Merge);
        assert!(config.aggregator.buffer_timeout.is_none());
        assert!(config.aggregator.reset_after_emit);
        assert_eq!(config.streamer.destinations.len(), 1);
        assert_eq!(config.streamer.flush_interval, Duration::from_secs(1));
    }

    #[test]
    fn from_core_maps_component_fields() {
        let core = LogPipelineConfig {
            sources: vec![
                "file:/tmp/app.log".to_owned(),
                "process:journalctl -f -o json".to_owned(),
                "udp:127.0.0.1:5140".to_owned(),
            ],
            format: "json".to_owned(),
            multiline_start: r"^\d{4}-".to_owned(),
            min_level: "warning".to_owned(),
            strategy: "window".to_owned(),
            window_size: "10s".to_owned(),
            window_overlap: "2s".to_owned(),
            aggregate_interval: "500ms".to_owned(),
            destinations: vec![
                "console:stderr".to_owned(),
                "file:/tmp/out.jsonl".to_owned(),
                "https://collector.example.com/logs".to_owned(),
                "ws://localhost:9000/stream".to_owned(),
            ],
            backpressure: "pause".to_owned(),
            retry_delay_ms: 250,
            ..LogPipelineConfig::default()
        };
        let config = PipelineConfig::from_core(&core).unwrap();

        let ids: Vec<&str> = config.capture.sources.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(
            ids,
            vec!["file:/tmp/app.log", "process:journalctl", "udp:127.0.0.1:5140"]
        );
        match &config.capture.sources[1].kind {
            SourceKind::Process(p) => assert_eq!(p.args, vec!["-f", "-o", "json"]),
            other => panic!("unexpected kind {other:?}"),
        }
        assert_eq!(config.capture.retry_delay, Duration::from_millis(250));

        assert_eq!(config.parser.format, LogFormat::Json);
        assert!(config.parser.multiline.is_some());

        match &config.filter.rules[0] {
            FilterNode::Rule(rule) => {
                assert_eq!(rule.field, "level");
                assert_eq!(rule.operator, FilterOperator::Gte);
                assert_eq!(rule.value, serde_json::json!("warn"));
            }
            other => panic!("unexpected node {other:?}"),
        }

        assert_eq!(config.aggregator.window.size, Duration::from_secs(10));
        assert_eq!(config.aggregator.window.overlap, Duration::from_secs(2));
        assert_eq!(
            config.aggregator.buffer_timeout,
            Some(Duration::from_millis(500))
        );

        let names: Vec<String> = config.streamer.destinations.iter().map(Destination::name).collect();
        assert_eq!(names[0], "console:stderr");
        assert!(names[1].starts_with("file:"));
        assert!(names[2].starts_with("http:"));
        assert!(names[3].starts_with("websocket:"));
        assert_eq!(config.streamer.backpressure, BackpressureStrategy::Pause);
    }

    #[test]
    fn from_core_rejects_bad_values() {
        let bad_source = LogPipelineConfig {
            sources: vec!["ftp:/x".to_owned()],
            ..LogPipelineConfig::default()
        };
        assert!(PipelineConfig::from_core(&bad_source).is_err());

        let bad_level = LogPipelineConfig {
            min_level: "loud".to_owned(),
            ..LogPipelineConfig::default()
        };
        assert!(PipelineConfig::from_core(&bad_level).is_err());

        let end_without_start = LogPipelineConfig {
            multiline_end: "^END".to_owned(),
            ..LogPipelineConfig::default()
        };
        assert!(PipelineConfig::from_core(&end_without_start).is_err());

        let bad_window = LogPipelineConfig {
            window_size: "forever".to_owned(),
            ..LogPipelineConfig::default()
        };
        assert!(PipelineConfig::from_core(&bad_window).is_err());
    }

    #[test]
    fn source_specs() {
        assert!(matches!(parse_source("tail:/var/log/auth.log").unwrap().kind, SourceKind::Tail(_)));
        assert_eq!(parse_source("tcp:0.0.0.0:601").unwrap().id, "tcp:0.0.0.0:601");
        assert!(parse_source("file:").is_err());
        assert!(parse_source("no-colon").is_err());
    }

    #[test]
    fn destination_specs() {
        assert!(matches!(parse_destination("console").unwrap(), Destination::Console { .. }));
        assert!(matches!(parse_destination("wss://h/x").unwrap(), Destination::WebSocket { .. }));
        assert!(parse_destination("smtp://mail").is_err());
        assert!(parse_destination("file:").is_err());
    }

    #[test]
    fn builder_creates_valid_config() {
        let config = PipelineConfigBuilder::new()
            .source(CaptureSource::file("/tmp/a.log"))
            .channel_capacity(16)
            .stream_logs(true)
            .build()
            .unwrap();
        assert_eq!(config.channel_capacity, 16);
        assert!(config.stream_logs);
    }

    #[test]
    fn builder_rejects_invalid_config() {
        assert!(PipelineConfigBuilder::new().build().is_err(), "no sources");
        let result = PipelineConfigBuilder::new()
            .source(CaptureSource::file("/tmp/a.log"))
            .channel_capacity(0)
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn disabled_pipeline_needs_no_sources() {
        PipelineConfigBuilder::new().enabled(false).build().unwrap();
    }
}
