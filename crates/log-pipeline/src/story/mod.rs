//! 스토리 리포터 -- 로그/이벤트 흐름을 사람이 읽을 수 있는 서사로 변환합니다.
//!
//! 스토리는 ID로 구분되는 [`StoryReport`]이며, 인메모리 레지스트리에
//! [`StoryReporter::clear_stories`] 전까지 유지됩니다.
//! 동시에 여러 스토리가 존재할 수 있지만, [`StoryReporter::add_event`]가
//! 사용하는 "현재" 스토리는 하나뿐입니다.
//!
//! # 렌더링 형식
//! `markdown`, `html`, `json`, `text`, `timeline`, `summary`.
//! JSON을 제외한 형식은 `{{placeholder}}` 템플릿(헤더/이벤트/푸터)으로 렌더링하며,
//! 인스턴스별 또는 호출별로 교체할 수 있습니다.
//!
//! # 사용 예시
//! ```ignore
//! let mut reporter = StoryReporter::new(ReporterConfig::default())?;
//! reporter.start_story("deploy-42", "Deploy v42", Map::new())?;
//! reporter.add_event(StoryEvent::new(StoryEventType::Action, "migrate database"))?;
//! reporter.end_story(None)?;
//! let md = reporter.generate_report("deploy-42", &ReportOptions::default())?;
//! ```

mod render;
pub mod types;

pub use types::{
    GroupBy, ReportFormat, ReportOptions, ReportTemplates, StoryEvent, StoryEventType,
    StoryParseOptions, StoryReport, StorySummary,
};

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use logweave_core::metrics as m;
use logweave_core::types::{LogLevel, ParsedLog};

use crate::error::LogPipelineError;

/// 이벤트 제목 최대 길이 기본값 (문자 수)
pub const DEFAULT_TITLE_MAX_LEN: usize = 120;

/// 에러 그룹핑 시 사용하는 그룹 키
const ERROR_GROUP: &str = "errors";

/// 스토리 리포터 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReporterConfig {
    /// 로그에서 만든 이벤트 제목의 최대 문자 수
    pub title_max_len: usize,
    /// 기본 템플릿을 대체할 형식별 템플릿
    pub templates: BTreeMap<ReportFormat, ReportTemplates>,
}

impl Default for ReporterConfig {
    fn default() -> Self {
        Self {
            title_max_len: DEFAULT_TITLE_MAX_LEN,
            templates: BTreeMap::new(),
        }
    }
}

impl ReporterConfig {
    /// 설정 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), LogPipelineError> {
        if self.title_max_len == 0 {
            return Err(LogPipelineError::config(
                "story.title_max_len",
                "must be greater than 0",
            ));
        }
        if self.templates.contains_key(&ReportFormat::Json) {
            return Err(LogPipelineError::config(
                "story.templates",
                "json reports do not use templates",
            ));
        }
        Ok(())
    }
}

/// 스토리 리포터
pub struct StoryReporter {
    config: ReporterConfig,
    stories: BTreeMap<String, StoryReport>,
    current: Option<String>,
    templates: HashMap<ReportFormat, ReportTemplates>,
}

impl StoryReporter {
    /// 기본 템플릿을 복사하고 설정의 템플릿으로 덮어씁니다.
    pub fn new(config: ReporterConfig) -> Result<Self, LogPipelineError> {
        config.validate()?;
        let mut templates = render::default_templates();
        for (format, template) in &config.templates {
            templates.insert(*format, template.clone());
        }
        Ok(Self {
            config,
            stories: BTreeMap::new(),
            current: None,
            templates,
        })
    }

    /// 형식의 템플릿을 교체합니다. 이 인스턴스에만 적용됩니다.
    pub fn set_template(
        &mut self,
        format: ReportFormat,
        templates: ReportTemplates,
    ) -> Result<(), LogPipelineError> {
        if format == ReportFormat::Json {
            return Err(LogPipelineError::config(
                "story.templates",
                "json reports do not use templates",
            ));
        }
        self.templates.insert(format, templates);
        Ok(())
    }

    /// 새 스토리를 시작하고 현재 스토리로 지정합니다.
    ///
    /// 같은 ID가 있으면 `DuplicateStory` 에러입니다.
    pub fn start_story(
        &mut self,
        id: impl Into<String>,
        title: impl Into<String>,
        metadata: Map<String, Value>,
    ) -> Result<&StoryReport, LogPipelineError> {
        let id = id.into();
        if self.stories.contains_key(&id) {
            return Err(LogPipelineError::DuplicateStory(id));
        }

        let report = StoryReport {
            id: id.clone(),
            title: title.into(),
            start_time: Utc::now(),
            end_time: None,
            duration: None,
            events: Vec::new(),
            metadata,
            summary: StorySummary::default(),
        };

        debug!(story = %id, "story started");
        self.current = Some(id.clone());
        Ok(self.stories.entry(id).or_insert(report))
    }

    /// 현재 스토리에 이벤트를 추가합니다.
    pub fn add_event(&mut self, event: StoryEvent) -> Result<(), LogPipelineError> {
        let Some(id) = self.current.clone() else {
            return Err(LogPipelineError::StoryNotFound("no current story".to_owned()));
        };
        self.add_event_to(&id, event)
    }

    /// 지정한 스토리에 이벤트를 추가합니다. 이벤트는 시각 순서로 삽입됩니다.
    pub fn add_event_to(&mut self, id: &str, event: StoryEvent) -> Result<(), LogPipelineError> {
        let story = self
            .stories
            .get_mut(id)
            .ok_or_else(|| LogPipelineError::StoryNotFound(id.to_owned()))?;

        let at = story
            .events
            .partition_point(|e| e.timestamp <= event.timestamp);
        story.events.insert(at, event);
        story.summary = StorySummary::from_events(&story.events);
        Ok(())
    }

    /// 스토리를 종료합니다. `id`가 없으면 현재 스토리를 종료합니다.
    ///
    /// 종료 시각, 소요 시간, 요약을 확정합니다. 종료 시각은 마지막 이벤트보다
    /// 앞서지 않습니다. 이미 종료된 스토리는 그대로 반환합니다.
    pub fn end_story(&mut self, id: Option<&str>) -> Result<&StoryReport, LogPipelineError> {
        let id = match id {
            Some(id) => id.to_owned(),
            None => self
                .current
                .clone()
                .ok_or_else(|| LogPipelineError::StoryNotFound("no current story".to_owned()))?,
        };
        if self.current.as_deref() == Some(id.as_str()) {
            self.current = None;
        }

        let story = self
            .stories
            .get_mut(&id)
            .ok_or_else(|| LogPipelineError::StoryNotFound(id.clone()))?;

        if story.end_time.is_none() {
            let last = story.events.last().map_or(story.start_time, |e| e.timestamp);
            finalize(story, Utc::now().max(last));
            debug!(story = %id, events = story.events.len(), "story ended");
        }
        Ok(story)
    }

    /// 스토리 조회
    pub fn get_story(&self, id: &str) -> Option<&StoryReport> {
        self.stories.get(id)
    }

    /// 등록된 스토리 ID (정렬됨)
    pub fn story_ids(&self) -> Vec<String> {
        self.stories.keys().cloned().collect()
    }

    /// 현재 스토리 ID
    pub fn current_story_id(&self) -> Option<&str> {
        self.current.as_deref()
    }

    /// 모든 스토리를 제거합니다.
    pub fn clear_stories(&mut self) {
        self.stories.clear();
        self.current = None;
    }

    /// 로그 묶음에서 완료된 스토리를 만듭니다.
    ///
    /// 이벤트 종류는 레벨과 메시지 키워드로 추론합니다. 타임스탬프가 없는 로그는
    /// 직전 로그의 시각(첫 로그라면 현재 시각)을 사용합니다.
    /// 현재 스토리는 바뀌지 않습니다.
    pub fn parse_logs_to_story(
        &mut self,
        logs: &[ParsedLog],
        options: StoryParseOptions,
    ) -> Result<&StoryReport, LogPipelineError> {
        let id = options
            .id
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        if self.stories.contains_key(&id) {
            return Err(LogPipelineError::DuplicateStory(id));
        }
        let title = options
            .title
            .unwrap_or_else(|| format!("Story from {} logs", logs.len()));

        let title_max_len = self.config.title_max_len;
        let mut last_seen: Option<DateTime<Utc>> = None;
        let mut paired: Vec<(StoryEvent, &ParsedLog)> = logs
            .iter()
            .map(|log| {
                let at = log.timestamp.or(last_seen).unwrap_or_else(Utc::now);
                last_seen = Some(at);
                (event_from_log(log, at, title_max_len), log)
            })
            .collect();
        // 안정 정렬이므로 같은 시각의 로그는 입력 순서를 유지함
        paired.sort_by_key(|(event, _)| event.timestamp);

        if let Some(group_by) = options.group_by {
            link_groups(&mut paired, group_by);
        }
        let events: Vec<StoryEvent> = paired.into_iter().map(|(event, _)| event).collect();

        let start = events.first().map_or_else(Utc::now, |e| e.timestamp);
        let end = events.last().map_or(start, |e| e.timestamp);

        let mut metadata = Map::new();
        metadata.insert("log_count".to_owned(), Value::from(logs.len()));
        if let Some(group_by) = options.group_by {
            metadata.insert("group_by".to_owned(), Value::from(group_by_name(group_by)));
        }

        let mut report = StoryReport {
            id: id.clone(),
            title,
            start_time: start,
            end_time: None,
            duration: None,
            events,
            metadata,
            summary: StorySummary::default(),
        };
        finalize(&mut report, end);

        debug!(story = %id, logs = logs.len(), "story built from logs");
        Ok(self.stories.entry(id).or_insert(report))
    }

    /// 스토리를 지정 형식으로 렌더링합니다.
    ///
    /// 진행 중인 스토리도 렌더링할 수 있습니다. 요약은 범위/개수 제한이
    /// 적용된 이벤트로 다시 계산합니다.
    pub fn generate_report(
        &self,
        id: &str,
        options: &ReportOptions,
    ) -> Result<String, LogPipelineError> {
        let story = self
            .stories
            .get(id)
            .ok_or_else(|| LogPipelineError::StoryNotFound(id.to_owned()))?;

        let events: Vec<&StoryEvent> = story
            .events
            .iter()
            .filter(|e| {
                options
                    .time_range
                    .is_none_or(|(from, to)| e.timestamp >= from && e.timestamp <= to)
            })
            .take(options.max_events.unwrap_or(usize::MAX))
            .collect();

        let templates = options
            .templates
            .as_ref()
            .or_else(|| self.templates.get(&options.format));
        let out = render::render(story, &events, options.format, templates)?;

        counter!(m::STORY_REPORTS_RENDERED_TOTAL, m::LABEL_FORMAT => options.format.as_str())
            .increment(1);
        Ok(out)
    }
}

/// 종료 시각을 기록하고 요약을 다시 계산합니다.
fn finalize(story: &mut StoryReport, end: DateTime<Utc>) {
    story.end_time = Some(end);
    story.duration = Some((end - story.start_time).to_std().unwrap_or(Duration::ZERO));
    story.summary = StorySummary::from_events(&story.events);
}

fn group_by_name(group_by: GroupBy) -> &'static str {
    match group_by {
        GroupBy::Session => "session",
        GroupBy::Request => "request",
        GroupBy::Process => "process",
        GroupBy::Error => "error",
    }
}

// --- 로그 -> 이벤트 변환 ---

fn event_from_log(log: &ParsedLog, at: DateTime<Utc>, title_max_len: usize) -> StoryEvent {
    let mut lines = log.message.lines();
    let first = lines.next().unwrap_or_default().trim();
    let rest: Vec<&str> = lines.map(str::trim_end).filter(|l| !l.is_empty()).collect();

    let mut event = StoryEvent::new(infer_event_type(log), truncate(first, title_max_len)).at(at);
    if !rest.is_empty() {
        event.description = Some(rest.join("\n"));
    }
    event.duration = duration_of(log);
    if let Some(level) = log.level {
        event.metadata.insert("level".to_owned(), Value::from(level.as_str()));
    }
    if let Some(ref source) = log.source {
        event.metadata.insert("source".to_owned(), Value::from(source.as_str()));
    }
    event
}

const ERROR_WORDS: &[&str] = &[
    "error", "errors", "failed", "failure", "fail", "exception", "fatal", "panic", "crash",
    "crashed",
];
const WARNING_WORDS: &[&str] = &[
    "warn", "warning", "deprecated", "retry", "retrying", "timeout", "slow",
];
const SUCCESS_WORDS: &[&str] = &[
    "success", "successful", "successfully", "succeeded", "completed", "complete", "done",
];
const START_WORDS: &[&str] = &[
    "start", "started", "starting", "begin", "beginning", "init", "initializing",
];
const END_WORDS: &[&str] = &[
    "end", "ended", "stop", "stopped", "stopping", "finish", "finished", "shutdown",
];

/// 레벨을 먼저 보고, 그 다음 메시지 키워드를 우선순위대로 봅니다.
fn infer_event_type(log: &ParsedLog) -> StoryEventType {
    match log.level {
        Some(LogLevel::Error | LogLevel::Fatal) => return StoryEventType::Error,
        Some(LogLevel::Warn) => return StoryEventType::Warning,
        _ => {}
    }

    let message = log.message.to_lowercase();
    let words: Vec<&str> = message
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();
    let has_any = |vocab: &[&str]| words.iter().any(|w| vocab.contains(w));

    if has_any(ERROR_WORDS) {
        StoryEventType::Error
    } else if has_any(WARNING_WORDS) {
        StoryEventType::Warning
    } else if has_any(SUCCESS_WORDS) {
        StoryEventType::Success
    } else if has_any(START_WORDS) {
        StoryEventType::Start
    } else if has_any(END_WORDS) {
        StoryEventType::End
    } else {
        StoryEventType::Action
    }
}

/// `duration_ms` 또는 `duration` 필드 (밀리초)
fn duration_of(log: &ParsedLog) -> Option<Duration> {
    ["duration_ms", "duration"]
        .iter()
        .find_map(|key| log.fields.get(*key).and_then(Value::as_f64))
        .and_then(|ms| Duration::try_from_secs_f64(ms / 1_000.0).ok())
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_owned(),
    }
}

// --- 그룹핑 ---

fn group_key(log: &ParsedLog, event: &StoryEvent, group_by: GroupBy) -> Option<String> {
    let first_of = |keys: &[&str]| {
        keys.iter()
            .find_map(|k| log.fields.get(*k).or_else(|| log.metadata.get(*k)))
            .map(value_key)
    };
    match group_by {
        GroupBy::Session => first_of(&["session_id", "sessionId", "session"]),
        GroupBy::Request => first_of(&["request_id", "requestId", "request", "trace_id"]),
        GroupBy::Process => first_of(&["pid", "process"]).or_else(|| log.source.clone()),
        GroupBy::Error => {
            (event.event_type == StoryEventType::Error).then(|| ERROR_GROUP.to_owned())
        }
    }
}

fn value_key(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// 같은 그룹의 이벤트를 `related_events`로 연결하고 `metadata.group`에 키를 남깁니다.
fn link_groups(paired: &mut [(StoryEvent, &ParsedLog)], group_by: GroupBy) {
    let mut groups: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    for (i, (event, log)) in paired.iter().enumerate() {
        if let Some(key) = group_key(log, event, group_by) {
            groups.entry(key).or_default().push(i);
        }
    }

    for (key, members) in groups {
        let ids: Vec<String> = members.iter().map(|&i| paired[i].0.id.clone()).collect();
        for &i in &members {
            let event = &mut paired[i].0;
            event.related_events = ids.iter().filter(|id| **id != event.id).cloned().collect();
            event
                .metadata
                .insert("group".to_owned(), Value::from(key.as_str()));
        }
    }
}
