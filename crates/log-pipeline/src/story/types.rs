//! 스토리 데이터 구조

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::error::LogPipelineError;

/// 스토리 이벤트 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoryEventType {
    Start,
    Action,
    Error,
    Warning,
    Success,
    End,
}

impl StoryEventType {
    /// 소문자 이름
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Action => "action",
            Self::Error => "error",
            Self::Warning => "warning",
            Self::Success => "success",
            Self::End => "end",
        }
    }

    /// 텍스트/타임라인 출력용 기호
    pub fn marker(&self) -> &'static str {
        match self {
            Self::Start => ">>",
            Self::Action => "--",
            Self::Error => "!!",
            Self::Warning => "! ",
            Self::Success => "ok",
            Self::End => "<<",
        }
    }
}

impl fmt::Display for StoryEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 스토리 이벤트
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoryEvent {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: StoryEventType,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
    #[serde(
        rename = "duration_ms",
        serialize_with = "serialize_millis",
        skip_serializing_if = "Option::is_none"
    )]
    pub duration: Option<Duration>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub related_events: Vec<String>,
}

impl StoryEvent {
    /// 현재 시각의 새 이벤트
    pub fn new(event_type: StoryEventType, title: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type,
            title: title.into(),
            description: None,
            metadata: Map::new(),
            duration: None,
            related_events: Vec::new(),
        }
    }

    /// 시각을 지정합니다.
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// 설명을 지정합니다.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// 소요 시간을 지정합니다.
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    /// 메타데이터 항목을 추가합니다.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// 이벤트 종류별 집계
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StorySummary {
    pub total_events: usize,
    pub errors: usize,
    pub warnings: usize,
    pub successes: usize,
    pub actions: usize,
    /// 소요 시간이 있는 이벤트들의 평균 (ms)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub average_duration_ms: Option<f64>,
}

impl StorySummary {
    /// 이벤트 목록에서 계산합니다.
    pub fn from_events<'a>(events: impl IntoIterator<Item = &'a StoryEvent>) -> Self {
        let mut summary = Self::default();
        let mut duration_total = 0.0;
        let mut with_duration = 0usize;

        for event in events {
            summary.total_events += 1;
            match event.event_type {
                StoryEventType::Error => summary.errors += 1,
                StoryEventType::Warning => summary.warnings += 1,
                StoryEventType::Success => summary.successes += 1,
                StoryEventType::Action => summary.actions += 1,
                StoryEventType::Start | StoryEventType::End => {}
            }
            if let Some(d) = event.duration {
                duration_total += d.as_secs_f64() * 1_000.0;
                with_duration += 1;
            }
        }

        if with_duration > 0 {
            summary.average_duration_ms = Some(duration_total / with_duration as f64);
        }
        summary
    }
}

/// 스토리 리포트
///
/// `end_time`이 없으면 진행 중인 스토리입니다.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoryReport {
    pub id: String,
    pub title: String,
    pub start_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(
        rename = "duration_ms",
        serialize_with = "serialize_millis",
        skip_serializing_if = "Option::is_none"
    )]
    pub duration: Option<Duration>,
    /// 시간순 이벤트
    pub events: Vec<StoryEvent>,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
    pub summary: StorySummary,
}

impl StoryReport {
    /// 진행 중인지 확인합니다.
    pub fn is_in_progress(&self) -> bool {
        self.end_time.is_none()
    }
}

/// 리포트 출력 형식
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    #[default]
    Markdown,
    Html,
    Json,
    Text,
    Timeline,
    Summary,
}

impl ReportFormat {
    /// 모든 형식
    pub const ALL: [ReportFormat; 6] = [
        Self::Markdown,
        Self::Html,
        Self::Json,
        Self::Text,
        Self::Timeline,
        Self::Summary,
    ];

    /// 소문자 이름
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Markdown => "markdown",
            Self::Html => "html",
            Self::Json => "json",
            Self::Text => "text",
            Self::Timeline => "timeline",
            Self::Summary => "summary",
        }
    }
}

impl fmt::Display for ReportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReportFormat {
    type Err = LogPipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "markdown" | "md" => Ok(Self::Markdown),
            "html" => Ok(Self::Html),
            "json" => Ok(Self::Json),
            "text" | "txt" => Ok(Self::Text),
            "timeline" => Ok(Self::Timeline),
            "summary" => Ok(Self::Summary),
            other => Err(LogPipelineError::config(
                "story.format",
                format!("unknown report format '{other}'"),
            )),
        }
    }
}

/// 헤더/이벤트/푸터 템플릿
///
/// `{{placeholder}}` 형식의 자리표시자를 치환합니다.
/// 헤더와 푸터는 스토리 값(`title`, `id`, `start`, `end`, `duration`, `status`,
/// `total`, `errors`, `warnings`, `successes`, `actions`, `average_duration`)을,
/// 이벤트 템플릿은 이벤트 값(`timestamp`, `offset`, `type`, `TYPE`, `marker`,
/// `title`, `description`, `duration`, `id`)을 사용합니다.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportTemplates {
    pub header: String,
    pub event: String,
    pub footer: String,
}

/// 로그 그룹핑 기준
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupBy {
    /// 세션 ID 필드
    Session,
    /// 요청 ID 필드
    Request,
    /// 프로세스(PID, 소스)
    Process,
    /// 에러 이벤트끼리
    Error,
}

impl FromStr for GroupBy {
    type Err = LogPipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "session" => Ok(Self::Session),
            "request" => Ok(Self::Request),
            "process" => Ok(Self::Process),
            "error" => Ok(Self::Error),
            other => Err(LogPipelineError::config(
                "story.group_by",
                format!("unknown grouping '{other}'"),
            )),
        }
    }
}

/// `parse_logs_to_story` 옵션
#[derive(Debug, Clone, Default)]
pub struct StoryParseOptions {
    /// 스토리 ID. 없으면 UUID를 생성합니다.
    pub id: Option<String>,
    /// 제목. 없으면 로그 수로 만듭니다.
    pub title: Option<String>,
    pub group_by: Option<GroupBy>,
}

/// `generate_report` 옵션
#[derive(Debug, Clone, Default)]
pub struct ReportOptions {
    pub format: ReportFormat,
    /// 포함할 이벤트의 시각 범위 (양 끝 포함)
    pub time_range: Option<(DateTime<Utc>, DateTime<Utc>)>,
    /// 최대 이벤트 수 (앞에서부터)
    pub max_events: Option<usize>,
    /// 이 호출에만 적용할 템플릿
    pub templates: Option<ReportTemplates>,
}

impl ReportOptions {
    /// 형식만 지정한 옵션
    pub fn new(format: ReportFormat) -> Self {
        Self {
            format,
            ..Self::default()
        }
    }
}

fn serialize_millis<S: Serializer>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
    match value {
        Some(d) => serializer.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
        None => serializer.serialize_none(),
    }
}
