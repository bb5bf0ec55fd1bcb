//! 도메인 타입 -- 파이프라인 전역에서 사용되는 공통 레코드
//!
//! 수집기가 만드는 [`RawLine`]과 파서가 만드는 [`ParsedLog`]는
//! 이후 모든 단계(필터, 집계, 스트리밍, 스토리 리포트)가 공유합니다.
//! 두 레코드 모두 생성 이후에는 변경하지 않습니다.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// 로그 레벨
///
/// `Ord` 구현으로 심각도 비교가 가능합니다
/// (`Trace < Debug < Info < Warn < Error < Fatal`).
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// 추적
    Trace,
    /// 디버그
    Debug,
    /// 정보 (기본값)
    #[default]
    Info,
    /// 경고
    Warn,
    /// 에러
    Error,
    /// 치명적 -- 프로세스 지속 불가
    Fatal,
}

impl LogLevel {
    /// 모든 레벨 (심각도 오름차순)
    pub const ALL: [LogLevel; 6] = [
        Self::Trace,
        Self::Debug,
        Self::Info,
        Self::Warn,
        Self::Error,
        Self::Fatal,
    ];

    /// 문자열에서 정규 레벨명을 파싱합니다.
    ///
    /// 대소문자를 구분하지 않으며, 정규 이름 여섯 개와
    /// 흔한 축약형(`warning`, `err`, `crit` 등)만 인식합니다.
    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "trace" => Some(Self::Trace),
            "debug" => Some(Self::Debug),
            "info" => Some(Self::Info),
            "warn" | "warning" => Some(Self::Warn),
            "error" | "err" => Some(Self::Error),
            "fatal" | "crit" | "critical" => Some(Self::Fatal),
            _ => None,
        }
    }

    /// 소문자 정규 이름을 반환합니다.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
            Self::Fatal => "fatal",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 로그 형식
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// 구조화 JSON 한 줄
    Json,
    /// 구조 없는 텍스트 (기본값, 파싱 실패 시 대체 형식)
    #[default]
    Plain,
    /// `key=value` 쌍
    Structured,
    /// RFC 5424 / RFC 3164 syslog
    Syslog,
    /// Apache access/error 로그
    Apache,
    /// Nginx access/error 로그
    Nginx,
    /// Python `logging` 기본 형식
    Python,
    /// log4j / logback / Spring Boot 형식
    Java,
    /// 사용자 정의 필드 추출기 전용
    Custom,
}

impl LogFormat {
    /// 소문자 형식 이름을 반환합니다.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Plain => "plain",
            Self::Structured => "structured",
            Self::Syslog => "syslog",
            Self::Apache => "apache",
            Self::Nginx => "nginx",
            Self::Python => "python",
            Self::Java => "java",
            Self::Custom => "custom",
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "plain" | "text" => Ok(Self::Plain),
            "structured" | "kv" | "logfmt" => Ok(Self::Structured),
            "syslog" => Ok(Self::Syslog),
            "apache" => Ok(Self::Apache),
            "nginx" => Ok(Self::Nginx),
            "python" => Ok(Self::Python),
            "java" => Ok(Self::Java),
            "custom" => Ok(Self::Custom),
            other => Err(format!("unknown log format '{other}'")),
        }
    }
}

/// 수집된 원시 로그 라인
///
/// 수집기가 생성하고, 파서와 필터가 소비합니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawLine {
    /// 수집 소스 식별자 (예: "file:/var/log/app.log")
    pub source: String,
    /// 수집 시각
    pub timestamp: DateTime<Utc>,
    /// 라인 내용 (개행 문자 제외)
    pub content: String,
    /// 소스별 부가 정보 (stream, pid, peer 등)
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl RawLine {
    /// 현재 시각으로 새 RawLine을 생성합니다.
    pub fn new(source: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            timestamp: Utc::now(),
            content: content.into(),
            metadata: Map::new(),
        }
    }

    /// 메타데이터 항목을 추가합니다.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// 파싱된 로그 레코드
///
/// 파서가 한 줄(또는 multiline 블록)에서 생성합니다.
/// `raw`에는 항상 원본 텍스트가 보존됩니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedLog {
    /// 로그 자체의 타임스탬프 (있을 경우)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    /// 정규화된 레벨 (있을 경우)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<LogLevel>,
    /// 메시지 본문
    pub message: String,
    /// 소스 (수집 소스 또는 로그가 명시한 서비스명)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// 분류 (로거명, 모듈명 등)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// 형식별로 추출된 중첩 필드
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub fields: Map<String, Value>,
    /// 원본 텍스트
    pub raw: String,
    /// 파싱에 사용된 형식
    pub format: LogFormat,
    /// 수집 단계에서 전달된 메타데이터
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl ParsedLog {
    /// 구조 없는 plain 레코드를 생성합니다.
    ///
    /// 파싱 실패 시의 대체 결과이기도 합니다: 레벨 없이 전체 라인이 메시지가 됩니다.
    pub fn plain(line: impl Into<String>) -> Self {
        let raw = line.into();
        Self {
            timestamp: None,
            level: None,
            message: raw.clone(),
            source: None,
            category: None,
            fields: Map::new(),
            raw,
            format: LogFormat::Plain,
            metadata: Map::new(),
        }
    }

    /// 레벨이 주어진 레벨 이상인지 확인합니다. 레벨이 없으면 `false`입니다.
    pub fn is_at_least(&self, level: LogLevel) -> bool {
        self.level.is_some_and(|l| l >= level)
    }

    /// 추출 필드를 점(`.`) 경로로 조회합니다.
    pub fn field(&self, path: &str) -> Option<&Value> {
        lookup_path(&self.fields, path)
    }
}

impl fmt::Display for ParsedLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ts) = self.timestamp {
            write!(f, "{} ", ts.to_rfc3339())?;
        }
        match self.level {
            Some(level) => write!(f, "[{}] ", level.as_str().to_ascii_uppercase())?,
            None => write!(f, "[-] ")?,
        }
        if let Some(ref source) = self.source {
            write!(f, "{source}: ")?;
        }
        f.write_str(&self.message)
    }
}

/// JSON 객체에서 점(`.`) 경로로 값을 찾습니다.
///
/// 중간 경로가 없거나 객체가 아니면 `None`을 반환합니다.
pub fn lookup_path<'a>(map: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let first = segments.next()?;
    let mut current = map.get(first)?;
    for segment in segments {
        current = match current {
            Value::Object(obj) => obj.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}
