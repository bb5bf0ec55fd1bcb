//! 로그 파싱 모듈 -- 한 줄(또는 multiline 블록)을 [`ParsedLog`]로 변환
//!
//! [`LogParser`]는 설정된 형식 하나로 라인을 파싱하는 상태 기계입니다.
//! multiline 설정이 있으면 `idle`/`accumulating` 두 상태를 오가며 블록을 모읍니다.
//!
//! # 지원 형식
//! - `json`: 한 줄 JSON 객체 ([`JsonFieldMapping`]으로 키 매핑)
//! - `syslog`: RFC 5424, RFC 3164, `TIMESTAMP LEVEL message`
//! - `apache` / `nginx`: access(common/combined) 및 error 로그
//! - `python` / `java`: 각 로깅 프레임워크의 기본 레이아웃
//! - `structured`: `key=value` 쌍
//! - `plain`: 선택적 타임스탬프/레벨 토큰
//! - `custom`: 필드 추출기만 사용
//!
//! # 실패 정책
//! 파서는 에러를 반환하지 않습니다. 형식에 맞지 않는 라인은 레벨 없는
//! plain 레코드로 강등되며, 원본은 항상 `raw`에 보존됩니다.
//!
//! # 사용 예시
//! ```ignore
//! use logweave_pipeline::parser::{LogParser, ParserConfig};
//! use logweave_core::types::LogFormat;
//!
//! let mut parser = LogParser::new(ParserConfig::new(LogFormat::Syslog))?;
//! let logs = parser.parse("2024-01-01T00:00:00Z ERROR boom");
//! assert_eq!(logs[0].message, "boom");
//! ```

mod access;
pub mod json;
mod level;
mod syslog;
mod text;
mod timestamp;

pub use json::JsonFieldMapping;

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use metrics::counter;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use logweave_core::metrics as m;
use logweave_core::types::{LogFormat, LogLevel, ParsedLog, RawLine};

use crate::error::LogPipelineError;

use self::access::AccessLogParser;
use self::syslog::SyslogParser;
use self::text::TextParser;

/// 기본 최대 라인 길이 (바이트)
const DEFAULT_MAX_LINE_LENGTH: usize = 64 * 1024;

/// multiline 블록 기본 최대 라인 수
const DEFAULT_MAX_BLOCK_LINES: usize = 500;

/// 필드 추출기 -- 정규식 매치를 필드 하나에 바인딩
///
/// 값은 이름 있는 그룹 `value`, 없으면 첫 번째 캡처 그룹, 그것도 없으면 전체 매치입니다.
/// `timestamp`, `level`, `message`, `source`, `category` 이름은 레코드 필드를 덮어쓰고,
/// 그 외 이름은 `fields`에 들어갑니다.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldExtractor {
    /// 대상 필드 이름 (점 경로 허용)
    pub field: String,
    /// 정규식 패턴
    pub pattern: String,
}

impl FieldExtractor {
    /// 새 추출기를 생성합니다.
    pub fn new(field: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            pattern: pattern.into(),
        }
    }
}

/// multiline 블록 설정
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultilineConfig {
    /// 블록 시작 패턴
    pub start_pattern: String,
    /// 블록 종료 패턴 (없으면 continuation 규칙으로 블록 끝을 판단)
    #[serde(default)]
    pub end_pattern: Option<String>,
    /// 종료 패턴이 없을 때 블록을 이어가는 라인 패턴 (기본: 공백으로 시작)
    #[serde(default = "default_continuation")]
    pub continuation_pattern: String,
    /// 블록 최대 라인 수 (도달하면 강제로 블록을 닫음)
    #[serde(default = "default_max_lines")]
    pub max_lines: usize,
}

fn default_continuation() -> String {
    r"^\s".to_owned()
}

fn default_max_lines() -> usize {
    DEFAULT_MAX_BLOCK_LINES
}

impl MultilineConfig {
    /// 시작 패턴만으로 설정을 생성합니다.
    pub fn new(start_pattern: impl Into<String>) -> Self {
        Self {
            start_pattern: start_pattern.into(),
            end_pattern: None,
            continuation_pattern: default_continuation(),
            max_lines: DEFAULT_MAX_BLOCK_LINES,
        }
    }

    /// 종료 패턴을 설정합니다.
    pub fn with_end(mut self, end_pattern: impl Into<String>) -> Self {
        self.end_pattern = Some(end_pattern.into());
        self
    }
}

/// 파서 설정
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParserConfig {
    /// 로그 형식
    pub format: LogFormat,
    /// 사용자 지정 타임스탬프 형식 (chrono strftime 문법)
    pub timestamp_format: Option<String>,
    /// 레벨 이름 재매핑 (대소문자 무시)
    pub level_mapping: HashMap<String, LogLevel>,
    /// 필드 추출기 (순서대로 적용)
    pub field_extractors: Vec<FieldExtractor>,
    /// multiline 설정
    pub multiline: Option<MultilineConfig>,
    /// 최대 라인 길이. 초과하는 라인은 정규식 없이 plain 레코드가 됩니다.
    pub max_line_length: usize,
    /// JSON 키 매핑
    pub json_mapping: JsonFieldMapping,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Plain,
            timestamp_format: None,
            level_mapping: HashMap::new(),
            field_extractors: Vec::new(),
            multiline: None,
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
            json_mapping: JsonFieldMapping::default(),
        }
    }
}

impl ParserConfig {
    /// 형식만 지정한 기본 설정을 생성합니다.
    pub fn new(format: LogFormat) -> Self {
        Self {
            format,
            ..Self::default()
        }
    }

    /// multiline 설정을 추가합니다.
    pub fn with_multiline(mut self, multiline: MultilineConfig) -> Self {
        self.multiline = Some(multiline);
        self
    }

    /// 필드 추출기를 추가합니다.
    pub fn with_extractor(mut self, extractor: FieldExtractor) -> Self {
        self.field_extractors.push(extractor);
        self
    }

    /// 레벨 재매핑을 추가합니다.
    pub fn with_level_mapping(mut self, name: impl Into<String>, level: LogLevel) -> Self {
        self.level_mapping.insert(name.into(), level);
        self
    }

    /// 타임스탬프 형식을 설정합니다.
    pub fn with_timestamp_format(mut self, format: impl Into<String>) -> Self {
        self.timestamp_format = Some(format.into());
        self
    }
}

/// 형식별 파서가 추출한 중간 결과
#[derive(Debug, Default)]
pub(crate) struct Extracted {
    pub(crate) timestamp: Option<DateTime<Utc>>,
    /// 정규화 전 레벨 문자열
    pub(crate) level: Option<String>,
    pub(crate) message: String,
    pub(crate) source: Option<String>,
    pub(crate) category: Option<String>,
    pub(crate) fields: Map<String, Value>,
}

struct CompiledExtractor {
    field: String,
    regex: Regex,
}

struct CompiledMultiline {
    start: Regex,
    end: Option<Regex>,
    continuation: Regex,
    max_lines: usize,
}

enum MultilineState {
    Idle,
    Accumulating(Vec<String>),
}

/// 상태 있는 로그 파서
///
/// multiline 블록 상태를 가지므로 소스마다 별도 인스턴스를 사용하거나,
/// 소스를 바꿀 때 [`reset()`](Self::reset)을 호출해야 합니다.
pub struct LogParser {
    format: LogFormat,
    timestamp_format: Option<String>,
    level_mapping: HashMap<String, LogLevel>,
    json_mapping: JsonFieldMapping,
    max_line_length: usize,
    extractors: Vec<CompiledExtractor>,
    multiline: Option<CompiledMultiline>,
    state: MultilineState,
    syslog: SyslogParser,
    access: AccessLogParser,
    text: TextParser,
}

impl LogParser {
    /// 설정을 검증하고 정규식을 컴파일하여 파서를 생성합니다.
    ///
    /// 잘못된 정규식이나 빈 multiline 시작 패턴은 `Config` 에러입니다.
    pub fn new(config: ParserConfig) -> Result<Self, LogPipelineError> {
        if config.max_line_length == 0 {
            return Err(LogPipelineError::config(
                "parser.max_line_length",
                "must be greater than 0",
            ));
        }

        let extractors = config
            .field_extractors
            .iter()
            .map(|extractor| {
                if extractor.field.trim().is_empty() {
                    return Err(LogPipelineError::config(
                        "parser.field_extractors",
                        "extractor field name must not be empty",
                    ));
                }
                let regex = Regex::new(&extractor.pattern).map_err(|e| {
                    LogPipelineError::config(
                        "parser.field_extractors",
                        format!("invalid pattern for '{}': {e}", extractor.field),
                    )
                })?;
                Ok(CompiledExtractor {
                    field: extractor.field.clone(),
                    regex,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let multiline = config
            .multiline
            .as_ref()
            .map(compile_multiline)
            .transpose()?;

        let level_mapping = config
            .level_mapping
            .into_iter()
            .map(|(name, level)| (name.trim().to_ascii_lowercase(), level))
            .collect();

        Ok(Self {
            format: config.format,
            timestamp_format: config.timestamp_format,
            level_mapping,
            json_mapping: config.json_mapping,
            max_line_length: config.max_line_length,
            extractors,
            multiline,
            state: MultilineState::Idle,
            syslog: SyslogParser::new()?,
            access: AccessLogParser::new()?,
            text: TextParser::new()?,
        })
    }

    /// 파서의 로그 형식을 반환합니다.
    pub fn format(&self) -> LogFormat {
        self.format
    }

    /// 한 줄을 파싱합니다.
    ///
    /// - multiline 블록을 모으는 중이면 빈 벡터를 반환합니다 (실패가 아님).
    /// - 일반 라인은 레코드 하나를 반환합니다.
    /// - 종료 패턴 없는 블록이 이어지지 않는 라인을 만나 닫히면
    ///   블록 레코드와 그 라인의 레코드를 순서대로 함께 반환합니다.
    pub fn parse(&mut self, line: &str) -> Vec<ParsedLog> {
        let line = line.trim_end_matches(['\r', '\n']);

        let Some(multiline) = &self.multiline else {
            return vec![self.parse_single(line)];
        };

        match std::mem::replace(&mut self.state, MultilineState::Idle) {
            MultilineState::Accumulating(mut lines) => {
                let continues = match &multiline.end {
                    Some(_) => true,
                    None => multiline.continuation.is_match(line),
                };

                if continues {
                    lines.push(line.to_owned());
                    let ended = multiline
                        .end
                        .as_ref()
                        .is_some_and(|end| end.is_match(line));
                    if ended || lines.len() >= multiline.max_lines {
                        return vec![self.parse_block(&lines)];
                    }
                    self.state = MultilineState::Accumulating(lines);
                    return Vec::new();
                }

                let mut out = vec![self.parse_block(&lines)];
                out.extend(self.parse_idle(line));
                out
            }
            MultilineState::Idle => self.parse_idle(line),
        }
    }

    /// 수집 소스 정보를 포함하여 [`RawLine`]을 파싱합니다.
    ///
    /// 레코드에 소스가 없으면 수집 소스 식별자를 채우고,
    /// 수집 메타데이터는 레코드의 `metadata`에 병합됩니다.
    pub fn parse_raw(&mut self, raw: &RawLine) -> Vec<ParsedLog> {
        let mut logs = self.parse(&raw.content);
        for log in &mut logs {
            stamp_raw(log, raw);
        }
        logs
    }

    /// 모으던 multiline 블록을 즉시 레코드로 만듭니다. (스트림 종료 시)
    pub fn flush(&mut self) -> Option<ParsedLog> {
        match std::mem::replace(&mut self.state, MultilineState::Idle) {
            MultilineState::Accumulating(lines) => Some(self.parse_block(&lines)),
            MultilineState::Idle => None,
        }
    }

    /// multiline 상태를 버립니다. 소스를 바꿀 때 호출해야 합니다.
    pub fn reset(&mut self) {
        if let MultilineState::Accumulating(lines) = &self.state {
            debug!(lines = lines.len(), "discarding partial multiline block");
        }
        self.state = MultilineState::Idle;
    }

    /// multiline 블록을 모으는 중인지 확인합니다.
    pub fn is_accumulating(&self) -> bool {
        matches!(self.state, MultilineState::Accumulating(_))
    }

    fn parse_idle(&mut self, line: &str) -> Vec<ParsedLog> {
        if let Some(multiline) = &self.multiline
            && multiline.start.is_match(line)
        {
            if multiline.max_lines <= 1 {
                return vec![self.parse_single(line)];
            }
            self.state = MultilineState::Accumulating(vec![line.to_owned()]);
            return Vec::new();
        }
        vec![self.parse_single(line)]
    }

    fn parse_single(&self, line: &str) -> ParsedLog {
        let extracted = self.extract(line);
        self.build(line, extracted)
    }

    /// 블록의 첫 줄을 형식대로 파싱하고 나머지 줄은 메시지에 덧붙입니다.
    /// JSON은 블록 전체를 하나의 문서로 먼저 시도합니다.
    fn parse_block(&self, lines: &[String]) -> ParsedLog {
        let joined = lines.join("\n");

        if self.format == LogFormat::Json
            && let Some(extracted) = self.extract(&joined)
        {
            return self.build(&joined, Some(extracted));
        }

        let (first, rest) = match lines.split_first() {
            Some(split) => split,
            None => return ParsedLog::plain(joined),
        };

        let extracted = self.extract(first).map(|mut e| {
            if !rest.is_empty() {
                e.message.push('\n');
                e.message.push_str(&rest.join("\n"));
            }
            e
        });
        self.build(&joined, extracted)
    }

    fn extract(&self, line: &str) -> Option<Extracted> {
        if line.len() > self.max_line_length {
            return None;
        }
        let ts_format = self.timestamp_format.as_deref();
        match self.format {
            LogFormat::Json => json::parse(line, &self.json_mapping, ts_format),
            LogFormat::Syslog => self.syslog.parse(line, ts_format),
            LogFormat::Apache => self.access.parse_apache(line, ts_format),
            LogFormat::Nginx => self.access.parse_nginx(line, ts_format),
            LogFormat::Python => self.text.parse_python(line, ts_format),
            LogFormat::Java => self.text.parse_java(line, ts_format),
            LogFormat::Structured => text::parse_structured(line, ts_format),
            LogFormat::Plain => Some(self.text.parse_plain(line, ts_format)),
            LogFormat::Custom => Some(Extracted {
                message: line.to_owned(),
                ..Extracted::default()
            }),
        }
    }

    fn build(&self, raw: &str, extracted: Option<Extracted>) -> ParsedLog {
        let mut log = match extracted {
            Some(e) => {
                counter!(m::PARSER_RECORDS_TOTAL, m::LABEL_FORMAT => self.format.as_str())
                    .increment(1);
                ParsedLog {
                    timestamp: e.timestamp,
                    level: e
                        .level
                        .map(|token| level::normalize(&token, self.format, &self.level_mapping)),
                    message: e.message,
                    source: e.source,
                    category: e.category,
                    fields: e.fields,
                    raw: raw.to_owned(),
                    format: self.format,
                    metadata: Map::new(),
                }
            }
            None => {
                counter!(m::PARSER_DEGRADED_TOTAL, m::LABEL_FORMAT => self.format.as_str())
                    .increment(1);
                ParsedLog::plain(raw)
            }
        };

        if raw.len() <= self.max_line_length {
            self.apply_extractors(&mut log, raw);
        }
        log
    }

    fn apply_extractors(&self, log: &mut ParsedLog, raw: &str) {
        for extractor in &self.extractors {
            let Some(caps) = extractor.regex.captures(raw) else {
                continue;
            };
            let matched = caps
                .name("value")
                .or_else(|| caps.get(1))
                .or_else(|| caps.get(0))
                .map_or("", |m| m.as_str());

            match extractor.field.as_str() {
                "timestamp" => {
                    if let Some(ts) =
                        timestamp::parse_timestamp(matched, self.timestamp_format.as_deref())
                    {
                        log.timestamp = Some(ts);
                    }
                }
                "level" => {
                    log.level = Some(level::normalize(matched, self.format, &self.level_mapping));
                }
                "message" => log.message = matched.to_owned(),
                "source" => log.source = Some(matched.to_owned()),
                "category" => log.category = Some(matched.to_owned()),
                field => text::insert_path(&mut log.fields, field, text::coerce_scalar(matched)),
            }
        }
    }
}

impl std::fmt::Debug for LogParser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogParser")
            .field("format", &self.format)
            .field("extractors", &self.extractors.len())
            .field("multiline", &self.multiline.is_some())
            .field("accumulating", &self.is_accumulating())
            .finish()
    }
}

fn compile_multiline(config: &MultilineConfig) -> Result<CompiledMultiline, LogPipelineError> {
    if config.start_pattern.trim().is_empty() {
        return Err(LogPipelineError::config(
            "parser.multiline.start_pattern",
            "must not be empty",
        ));
    }
    if config.max_lines == 0 {
        return Err(LogPipelineError::config(
            "parser.multiline.max_lines",
            "must be greater than 0",
        ));
    }

    let compile = |field: &str, pattern: &str| {
        Regex::new(pattern).map_err(|e| LogPipelineError::config(field, e.to_string()))
    };

    let end = match config.end_pattern.as_deref() {
        Some(pattern) if pattern.trim().is_empty() => {
            return Err(LogPipelineError::config(
                "parser.multiline.end_pattern",
                "must not be empty when set",
            ));
        }
        Some(pattern) => Some(compile("parser.multiline.end_pattern", pattern)?),
        None => None,
    };

    Ok(CompiledMultiline {
        start: compile("parser.multiline.start_pattern", &config.start_pattern)?,
        end,
        continuation: compile(
            "parser.multiline.continuation_pattern",
            &config.continuation_pattern,
        )?,
        max_lines: config.max_lines,
    })
}

fn stamp_raw(log: &mut ParsedLog, raw: &RawLine) {
    if log.source.is_none() {
        log.source = Some(raw.source.clone());
    }
    for (key, value) in &raw.metadata {
        log.metadata.insert(key.clone(), value.clone());
    }
    log.metadata
        .insert("capture_source".to_owned(), Value::from(raw.source.as_str()));
    log.metadata.insert(
        "captured_at".to_owned(),
        Value::from(raw.timestamp.to_rfc3339()),
    );
}

// --- 파싱 결과 보조 함수 ---

/// 필드 값(점 경로)으로 레코드를 묶습니다. 값이 없는 레코드는 제외됩니다.
///
/// 키는 값의 문자열 표현입니다 (문자열은 따옴표 없이).
pub fn group_by_field<'a>(
    logs: &'a [ParsedLog],
    path: &str,
) -> BTreeMap<String, Vec<&'a ParsedLog>> {
    let mut groups: BTreeMap<String, Vec<&ParsedLog>> = BTreeMap::new();
    for log in logs {
        if let Some(value) = log.field(path) {
            groups.entry(value_key(value)).or_default().push(log);
        }
    }
    groups
}

/// 필드 값(점 경로)을 순서대로 모읍니다. 값이 없는 레코드는 건너뜁니다.
pub fn extract_field_values<'a>(logs: &'a [ParsedLog], path: &str) -> Vec<&'a Value> {
    logs.iter().filter_map(|log| log.field(path)).collect()
}

/// 필드 값(점 경로)이 주어진 값과 같은 레코드만 남깁니다.
pub fn filter_by_field<'a>(logs: &'a [ParsedLog], path: &str, expected: &Value) -> Vec<&'a ParsedLog> {
    logs.iter()
        .filter(|log| log.field(path) == Some(expected))
        .collect()
}

fn value_key(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parser(format: LogFormat) -> LogParser {
        LogParser::new(ParserConfig::new(format)).unwrap()
    }

    #[test]
    fn syslog_iso_level_line() {
        let mut p = parser(LogFormat::Syslog);
        let logs = p.parse("2024-01-01T00:00:00Z ERROR boom");
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].level, Some(LogLevel::Error));
        assert_eq!(logs[0].message, "boom");
        assert_eq!(logs[0].format, LogFormat::Syslog);
        assert_eq!(logs[0].raw, "2024-01-01T00:00:00Z ERROR boom");
    }

    #[test]
    fn unparseable_line_degrades_to_plain() {
        let mut p = parser(LogFormat::Json);
        let logs = p.parse("not json at all");
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].format, LogFormat::Plain);
        assert_eq!(logs[0].message, "not json at all");
        assert!(logs[0].level.is_none());
    }

    #[test]
    fn unknown_level_defaults_to_info() {
        let mut p = parser(LogFormat::Json);
        let logs = p.parse(r#"{"level":"verbose","msg":"x"}"#);
        assert_eq!(logs[0].level, Some(LogLevel::Info));
    }

    #[test]
    fn level_mapping_overrides_table() {
        let config = ParserConfig::new(LogFormat::Json).with_level_mapping("AUDIT", LogLevel::Warn);
        let mut p = LogParser::new(config).unwrap();
        let logs = p.parse(r#"{"level":"audit","msg":"x"}"#);
        assert_eq!(logs[0].level, Some(LogLevel::Warn));
    }

    #[test]
    fn trailing_newline_is_stripped() {
        let mut p = parser(LogFormat::Plain);
        let logs = p.parse("hello\r\n");
        assert_eq!(logs[0].raw, "hello");
    }

    #[test]
    fn overlong_line_degrades_without_regex() {
        let config = ParserConfig {
            max_line_length: 8,
            ..ParserConfig::new(LogFormat::Syslog)
        };
        let mut p = LogParser::new(config).unwrap();
        let logs = p.parse("2024-01-01T00:00:00Z ERROR boom");
        assert_eq!(logs[0].format, LogFormat::Plain);
    }

    #[test]
    fn multiline_with_end_pattern() {
        let config = ParserConfig::new(LogFormat::Plain)
            .with_multiline(MultilineConfig::new(r"^BEGIN").with_end(r"^END"));
        let mut p = LogParser::new(config).unwrap();

        assert!(p.parse("before").len() == 1);
        assert!(p.parse("BEGIN txn").is_empty());
        assert!(p.is_accumulating());
        assert!(p.parse("no indentation needed").is_empty());
        let logs = p.parse("END txn");
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].raw, "BEGIN txn\nno indentation needed\nEND txn");
        assert!(!p.is_accumulating());
    }

    #[test]
    fn multiline_continuation_closes_on_next_line() {
        let config = ParserConfig::new(LogFormat::Java)
            .with_multiline(MultilineConfig::new(r"^\d{4}-\d{2}-\d{2}"));
        let mut p = LogParser::new(config).unwrap();

        assert!(
            p.parse("2024-01-15 12:00:00.123 [main] ERROR com.example.App - failed")
                .is_empty()
        );
        assert!(p.parse("\tat com.example.App.run(App.java:10)").is_empty());
        assert!(p.parse("\tat com.example.App.main(App.java:3)").is_empty());

        let logs = p.parse("2024-01-15 12:00:01.000 [main] INFO com.example.App - retrying");
        // 블록은 닫히고, 새 라인은 다음 블록을 시작함
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].level, Some(LogLevel::Error));
        assert!(logs[0].message.starts_with("failed\n\tat com.example.App.run"));
        assert_eq!(logs[0].raw.lines().count(), 3);
        assert!(p.is_accumulating());

        let tail = p.flush().unwrap();
        assert_eq!(tail.message, "retrying");
    }

    #[test]
    fn block_closed_by_ordinary_line_returns_both() {
        let config = ParserConfig::new(LogFormat::Plain)
            .with_multiline(MultilineConfig::new(r"^Traceback"));
        let mut p = LogParser::new(config).unwrap();

        assert!(p.parse("Traceback (most recent call last):").is_empty());
        assert!(p.parse("  File \"a.py\", line 1").is_empty());
        let logs = p.parse("next ordinary line");
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].raw, "Traceback (most recent call last):\n  File \"a.py\", line 1");
        assert_eq!(logs[1].raw, "next ordinary line");
    }

    #[test]
    fn max_lines_forces_block_close() {
        let mut multiline = MultilineConfig::new(r"^START");
        multiline.max_lines = 3;
        let mut p =
            LogParser::new(ParserConfig::new(LogFormat::Plain).with_multiline(multiline)).unwrap();
        assert!(p.parse("START").is_empty());
        assert!(p.parse(" a").is_empty());
        let logs = p.parse(" b");
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].raw, "START\n a\n b");
    }

    #[test]
    fn reset_discards_partial_block() {
        let config = ParserConfig::new(LogFormat::Plain)
            .with_multiline(MultilineConfig::new(r"^START").with_end(r"^END"));
        let mut p = LogParser::new(config).unwrap();
        assert!(p.parse("START").is_empty());
        p.reset();
        assert!(!p.is_accumulating());
        assert!(p.flush().is_none());
        assert_eq!(p.parse("END").len(), 1);
    }

    #[test]
    fn json_block_parses_as_document() {
        let config = ParserConfig::new(LogFormat::Json)
            .with_multiline(MultilineConfig::new(r"^\{$").with_end(r"^\}$"));
        let mut p = LogParser::new(config).unwrap();
        assert!(p.parse("{").is_empty());
        assert!(p.parse(r#"  "level": "error","#).is_empty());
        assert!(p.parse(r#"  "msg": "pretty""#).is_empty());
        let logs = p.parse("}");
        assert_eq!(logs[0].format, LogFormat::Json);
        assert_eq!(logs[0].message, "pretty");
        assert_eq!(logs[0].level, Some(LogLevel::Error));
    }

    #[test]
    fn invalid_multiline_config_is_rejected() {
        let empty = ParserConfig::new(LogFormat::Plain).with_multiline(MultilineConfig::new(""));
        assert!(matches!(
            LogParser::new(empty),
            Err(LogPipelineError::Config { .. })
        ));

        let bad_regex =
            ParserConfig::new(LogFormat::Plain).with_multiline(MultilineConfig::new("(unclosed"));
        assert!(LogParser::new(bad_regex).is_err());

        let bad_end = ParserConfig::new(LogFormat::Plain)
            .with_multiline(MultilineConfig::new("^A").with_end("[z-a]"));
        assert!(LogParser::new(bad_end).is_err());
    }

    #[test]
    fn field_extractors_populate_record() {
        let config = ParserConfig::new(LogFormat::Custom)
            .with_extractor(FieldExtractor::new("level", r"\[(?P<value>\w+)\]"))
            .with_extractor(FieldExtractor::new("request.id", r"req=(\w+)"))
            .with_extractor(FieldExtractor::new("latency_ms", r"took (\d+)ms"))
            .with_extractor(FieldExtractor::new("source", r"svc=\w+"));
        let mut p = LogParser::new(config).unwrap();
        let logs = p.parse("[WARN] req=abc123 took 45ms svc=billing");
        let log = &logs[0];
        assert_eq!(log.format, LogFormat::Custom);
        assert_eq!(log.level, Some(LogLevel::Warn));
        assert_eq!(log.field("request.id"), Some(&json!("abc123")));
        assert_eq!(log.field("latency_ms"), Some(&json!(45)));
        assert_eq!(log.source.as_deref(), Some("svc=billing"));
    }

    #[test]
    fn invalid_extractor_is_config_error() {
        let config =
            ParserConfig::new(LogFormat::Plain).with_extractor(FieldExtractor::new("x", "(["));
        assert!(matches!(
            LogParser::new(config),
            Err(LogPipelineError::Config { .. })
        ));
    }

    #[test]
    fn parse_raw_stamps_source_and_metadata() {
        let mut p = parser(LogFormat::Plain);
        let raw = RawLine::new("process:worker", "hello").with_metadata("stream", "stderr");
        let logs = p.parse_raw(&raw);
        assert_eq!(logs[0].source.as_deref(), Some("process:worker"));
        assert_eq!(logs[0].metadata.get("stream"), Some(&json!("stderr")));
        assert_eq!(
            logs[0].metadata.get("capture_source"),
            Some(&json!("process:worker"))
        );
    }

    #[test]
    fn grouping_helpers() {
        let mut p = parser(LogFormat::Structured);
        let logs: Vec<ParsedLog> = [
            "msg=a user=alice status=200",
            "msg=b user=bob status=500",
            "msg=c user=alice status=200",
            "msg=d",
        ]
        .iter()
        .flat_map(|line| p.parse(line))
        .collect();

        let groups = group_by_field(&logs, "user");
        assert_eq!(groups.len(), 2);
        assert_eq!(groups["alice"].len(), 2);
        assert_eq!(groups["bob"].len(), 1);

        let statuses = extract_field_values(&logs, "status");
        assert_eq!(statuses, vec![&json!(200), &json!(500), &json!(200)]);

        let ok = filter_by_field(&logs, "status", &json!(200));
        assert_eq!(ok.len(), 2);
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn single_lines_round_trip_raw(line in "[^\r\n]{0,200}") {
                for format in [LogFormat::Json, LogFormat::Syslog, LogFormat::Plain, LogFormat::Structured, LogFormat::Nginx] {
                    let mut p = parser(format);
                    let logs = p.parse(&line);
                    prop_assert_eq!(logs.len(), 1);
                    prop_assert_eq!(&logs[0].raw, &line);
                }
            }

            #[test]
            fn block_raw_is_joined_lines(body in prop::collection::vec("[a-z ]{0,20}", 0..10)) {
                let config = ParserConfig::new(LogFormat::Plain)
                    .with_multiline(MultilineConfig::new("^BEGIN").with_end("^END"));
                let mut p = LogParser::new(config).unwrap();

                let mut lines = vec!["BEGIN".to_owned()];
                lines.extend(body.iter().map(|l| format!("| {l}")));
                lines.push("END".to_owned());

                let mut out = Vec::new();
                for line in &lines {
                    out.extend(p.parse(line));
                }
                prop_assert_eq!(out.len(), 1);
                prop_assert_eq!(&out[0].raw, &lines.join("\n"));
            }
        }
    }
}
