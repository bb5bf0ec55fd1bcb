//! 규칙 트리 컴파일 및 평가
//!
//! [`CompiledNode`]는 필드 경로를 미리 분해하고 정규식과 소문자 비교 값을
//! 한 번만 준비해 둔 평가용 트리입니다. 평가는 단락(short-circuit)됩니다.

use std::borrow::Cow;
use std::cmp::Ordering;

use chrono::{DateTime, FixedOffset, SecondsFormat};
use regex::{Regex, RegexBuilder};
use serde_json::Value;

use logweave_core::types::{LogLevel, ParsedLog, lookup_path};

use super::types::{FilterGroup, FilterNode, FilterOperator, FilterRule, GroupOperator};
use crate::error::LogPipelineError;

/// 레코드의 필드 경로
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum FieldPath {
    Level,
    Message,
    Source,
    Category,
    Raw,
    Format,
    Timestamp,
    Fields(String),
    Metadata(String),
}

impl FieldPath {
    /// 경로 문자열을 분해합니다. 알 수 없는 이름은 `fields.<name>`으로 취급합니다.
    pub(crate) fn parse(path: &str) -> Self {
        match path {
            "level" => Self::Level,
            "message" => Self::Message,
            "source" => Self::Source,
            "category" => Self::Category,
            "raw" => Self::Raw,
            "format" => Self::Format,
            "timestamp" => Self::Timestamp,
            other => {
                if let Some(rest) = other.strip_prefix("fields.") {
                    Self::Fields(rest.to_owned())
                } else if let Some(rest) = other.strip_prefix("metadata.") {
                    Self::Metadata(rest.to_owned())
                } else {
                    Self::Fields(other.to_owned())
                }
            }
        }
    }

    /// [`ParsedLog`]에서 값을 찾습니다. 없으면 `None`입니다.
    pub(crate) fn resolve<'a>(&self, log: &'a ParsedLog) -> Option<Cow<'a, Value>> {
        match self {
            Self::Level => log.level.map(|l| Cow::Owned(Value::from(l.as_str()))),
            Self::Message => Some(Cow::Owned(Value::from(log.message.as_str()))),
            Self::Source => log.source.as_deref().map(|s| Cow::Owned(Value::from(s))),
            Self::Category => log.category.as_deref().map(|s| Cow::Owned(Value::from(s))),
            Self::Raw => Some(Cow::Owned(Value::from(log.raw.as_str()))),
            Self::Format => Some(Cow::Owned(Value::from(log.format.as_str()))),
            Self::Timestamp => log.timestamp.map(|t| {
                Cow::Owned(Value::from(t.to_rfc3339_opts(SecondsFormat::AutoSi, true)))
            }),
            Self::Fields(path) => lookup_path(&log.fields, path).map(Cow::Borrowed),
            Self::Metadata(path) => lookup_path(&log.metadata, path).map(Cow::Borrowed),
        }
    }
}

/// 평가 대상 -- 파싱된 레코드 또는 임의의 JSON 값
pub(crate) enum Subject<'a> {
    Log(&'a ParsedLog),
    Value(&'a Value),
}

impl<'a> Subject<'a> {
    fn resolve(&self, rule: &CompiledRule) -> Option<Cow<'a, Value>> {
        match *self {
            Self::Log(log) => rule.path.resolve(log),
            Self::Value(value) => {
                let Value::Object(map) = value else {
                    return None;
                };
                lookup_path(map, &rule.raw_path).map(Cow::Borrowed)
            }
        }
    }
}

/// 컴파일된 규칙 트리 노드
#[derive(Debug)]
pub(crate) enum CompiledNode {
    Rule(CompiledRule),
    Group {
        operator: GroupOperator,
        children: Vec<CompiledNode>,
    },
}

#[derive(Debug)]
pub(crate) struct CompiledRule {
    raw_path: String,
    path: FieldPath,
    operator: FilterOperator,
    value: Value,
    case_sensitive: bool,
    /// 대소문자 무시 비교용 소문자 문자열 값
    folded: Option<String>,
    regex: Option<Regex>,
}

impl CompiledNode {
    /// 규칙 트리를 컴파일합니다.
    pub(crate) fn compile(node: &FilterNode) -> Result<Self, LogPipelineError> {
        match node {
            FilterNode::Rule(rule) => Ok(Self::Rule(CompiledRule::compile(rule)?)),
            FilterNode::Group(group) => Self::compile_group(group),
        }
    }

    pub(crate) fn compile_group(group: &FilterGroup) -> Result<Self, LogPipelineError> {
        let children = group
            .rules
            .iter()
            .map(Self::compile)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::Group {
            operator: group.operator,
            children,
        })
    }

    /// 노드를 평가합니다. 빈 AND 그룹은 참, 빈 OR 그룹은 거짓입니다.
    pub(crate) fn eval(&self, subject: &Subject<'_>) -> bool {
        match self {
            Self::Rule(rule) => rule.eval(subject),
            Self::Group { operator, children } => match operator {
                GroupOperator::And => children.iter().all(|c| c.eval(subject)),
                GroupOperator::Or => children.iter().any(|c| c.eval(subject)),
            },
        }
    }
}

impl CompiledRule {
    fn compile(rule: &FilterRule) -> Result<Self, LogPipelineError> {
        rule.validate()?;
        let case_sensitive = rule.case_sensitive.unwrap_or(true);

        let regex = if rule.operator == FilterOperator::Regex {
            let pattern = rule.value.as_str().unwrap_or_default();
            let regex = RegexBuilder::new(pattern)
                .case_insensitive(!case_sensitive)
                .build()
                .map_err(|e| {
                    LogPipelineError::config(
                        "filter.rule.value",
                        format!("invalid regex for field '{}': {e}", rule.field),
                    )
                })?;
            Some(regex)
        } else {
            None
        };

        let folded = match (&rule.value, case_sensitive) {
            (Value::String(s), false) => Some(s.to_lowercase()),
            _ => None,
        };

        Ok(Self {
            raw_path: rule.field.clone(),
            path: FieldPath::parse(&rule.field),
            operator: rule.operator,
            value: rule.value.clone(),
            case_sensitive,
            folded,
            regex,
        })
    }

    fn eval(&self, subject: &Subject<'_>) -> bool {
        let actual = subject.resolve(self);
        let actual = actual.as_deref();

        match self.operator {
            FilterOperator::Exists => actual.is_some(),
            FilterOperator::NotExists => actual.is_none(),
            FilterOperator::Equals => actual.is_some_and(|v| self.equals(v, &self.value)),
            FilterOperator::NotEquals => !actual.is_some_and(|v| self.equals(v, &self.value)),
            FilterOperator::In => actual.is_some_and(|v| self.member(v)),
            FilterOperator::NotIn => !actual.is_some_and(|v| self.member(v)),
            FilterOperator::Contains => self.with_str(actual, |hay, needle| hay.contains(needle)),
            FilterOperator::NotContains => {
                self.with_str(actual, |hay, needle| !hay.contains(needle))
            }
            FilterOperator::StartsWith => {
                self.with_str(actual, |hay, needle| hay.starts_with(needle))
            }
            FilterOperator::EndsWith => self.with_str(actual, |hay, needle| hay.ends_with(needle)),
            FilterOperator::Regex => match (actual, &self.regex) {
                (Some(Value::String(s)), Some(regex)) => regex.is_match(s),
                _ => false,
            },
            FilterOperator::Gt => self.compare(actual).is_some_and(Ordering::is_gt),
            FilterOperator::Gte => self.compare(actual).is_some_and(Ordering::is_ge),
            FilterOperator::Lt => self.compare(actual).is_some_and(Ordering::is_lt),
            FilterOperator::Lte => self.compare(actual).is_some_and(Ordering::is_le),
        }
    }

    fn equals(&self, actual: &Value, expected: &Value) -> bool {
        match (actual, expected) {
            (Value::String(a), Value::String(b)) => {
                if self.case_sensitive {
                    a == b
                } else {
                    a.to_lowercase() == b.to_lowercase()
                }
            }
            (Value::Number(a), Value::Number(b)) => match (a.as_f64(), b.as_f64()) {
                (Some(a), Some(b)) => a == b,
                _ => a == b,
            },
            _ => actual == expected,
        }
    }

    fn member(&self, actual: &Value) -> bool {
        self.value
            .as_array()
            .is_some_and(|set| set.iter().any(|candidate| self.equals(actual, candidate)))
    }

    /// 문자열 연산자 공통 처리. 필드가 없거나 문자열이 아니면 거짓입니다.
    fn with_str(&self, actual: Option<&Value>, op: impl Fn(&str, &str) -> bool) -> bool {
        let (Some(Value::String(hay)), Some(needle)) = (actual, self.value.as_str()) else {
            return false;
        };
        match &self.folded {
            Some(folded) => op(&hay.to_lowercase(), folded),
            None => op(hay, needle),
        }
    }

    /// 숫자 비교, 레벨 비교, 날짜 비교 순으로 시도합니다. 모두 안 되면 `None`입니다.
    fn compare(&self, actual: Option<&Value>) -> Option<Ordering> {
        let actual = actual?;

        if let (Some(a), Some(b)) = (actual.as_f64(), self.value.as_f64()) {
            return a.partial_cmp(&b);
        }

        let (a, b) = (actual.as_str()?, self.value.as_str()?);
        if self.path == FieldPath::Level
            && let (Some(a), Some(b)) = (LogLevel::from_str_loose(a), LogLevel::from_str_loose(b))
        {
            return Some(a.cmp(&b));
        }

        let a = DateTime::<FixedOffset>::parse_from_rfc3339(a).ok()?;
        let b = DateTime::<FixedOffset>::parse_from_rfc3339(b).ok()?;
        Some(a.cmp(&b))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use logweave_core::types::LogFormat;
    use serde_json::json;

    fn log() -> ParsedLog {
        let mut log = ParsedLog::plain("raw line");
        log.level = Some(LogLevel::Warn);
        log.message = "Connection Timeout to db".to_owned();
        log.source = Some("api".to_owned());
        log.format = LogFormat::Json;
        log.timestamp = Some("2024-01-01T12:00:00Z".parse().unwrap());
        log.fields = json!({"status": 503, "user": {"id": "u-1"}, "tags": ["a", "b"], "nothing": null})
            .as_object()
            .cloned()
            .unwrap();
        log.metadata.insert("stream".to_owned(), json!("stderr"));
        log
    }

    fn eval(rule: FilterRule) -> bool {
        let node = CompiledNode::compile(&rule.into()).unwrap();
        node.eval(&Subject::Log(&log()))
    }

    #[test]
    fn field_path_parsing() {
        assert_eq!(FieldPath::parse("level"), FieldPath::Level);
        assert_eq!(FieldPath::parse("fields.a.b"), FieldPath::Fields("a.b".to_owned()));
        assert_eq!(FieldPath::parse("metadata.x"), FieldPath::Metadata("x".to_owned()));
        assert_eq!(FieldPath::parse("status"), FieldPath::Fields("status".to_owned()));
    }

    #[test]
    fn equality_operators() {
        assert!(eval(FilterRule::new("level", FilterOperator::Equals, "warn")));
        assert!(!eval(FilterRule::new("level", FilterOperator::Equals, "WARN")));
        assert!(eval(FilterRule::new("level", FilterOperator::Equals, "WARN").case_insensitive()));
        assert!(eval(FilterRule::new("status", FilterOperator::Equals, 503.0)));
        assert!(eval(FilterRule::new("fields.user.id", FilterOperator::NotEquals, "u-2")));
        // 부정 연산자는 필드가 없으면 참
        assert!(eval(FilterRule::new("fields.missing", FilterOperator::NotEquals, "x")));
        assert!(eval(FilterRule::new("category", FilterOperator::NotIn, json!(["a"]))));
    }

    #[test]
    fn string_operators() {
        assert!(eval(FilterRule::new("message", FilterOperator::Contains, "Timeout")));
        assert!(!eval(FilterRule::new("message", FilterOperator::Contains, "timeout")));
        assert!(eval(
            FilterRule::new("message", FilterOperator::Contains, "timeout").case_insensitive()
        ));
        assert!(eval(FilterRule::new("message", FilterOperator::StartsWith, "Conn")));
        assert!(eval(FilterRule::new("message", FilterOperator::EndsWith, "db")));
        assert!(eval(FilterRule::new("message", FilterOperator::NotContains, "ok")));
        // 비문자열, 부재 필드는 문자열 연산자에서 거짓
        assert!(!eval(FilterRule::new("status", FilterOperator::Contains, "50")));
        assert!(!eval(FilterRule::new("missing", FilterOperator::NotContains, "x")));
    }

    #[test]
    fn regex_operator() {
        assert!(eval(FilterRule::new("message", FilterOperator::Regex, r"^Conn\w+ Time")));
        assert!(eval(
            FilterRule::new("message", FilterOperator::Regex, "timeout").case_insensitive()
        ));
        let bad = FilterRule::new("message", FilterOperator::Regex, "(");
        assert!(CompiledNode::compile(&bad.into()).is_err());
    }

    #[test]
    fn comparison_operators() {
        assert!(eval(FilterRule::new("status", FilterOperator::Gte, 500)));
        assert!(eval(FilterRule::new("status", FilterOperator::Lt, 600)));
        assert!(!eval(FilterRule::new("status", FilterOperator::Gt, 503)));
        assert!(eval(FilterRule::new("level", FilterOperator::Gte, "warn")));
        assert!(!eval(FilterRule::new("level", FilterOperator::Gte, "error")));
        assert!(eval(FilterRule::new(
            "timestamp",
            FilterOperator::Lte,
            "2024-01-01T12:00:00+00:00"
        )));
        assert!(eval(FilterRule::new(
            "timestamp",
            FilterOperator::Gt,
            "2023-12-31T23:59:59Z"
        )));
        // 비교할 수 없으면 거짓
        assert!(!eval(FilterRule::new("message", FilterOperator::Gt, "a")));
        assert!(!eval(FilterRule::new("missing", FilterOperator::Lt, 1)));
    }

    #[test]
    fn membership_and_presence() {
        assert!(eval(FilterRule::new("source", FilterOperator::In, json!(["api", "web"]))));
        assert!(!eval(FilterRule::new("source", FilterOperator::NotIn, json!(["api"]))));
        assert!(eval(FilterRule::new("fields.tags.1", FilterOperator::Equals, "b")));
        assert!(eval(FilterRule::new("nothing", FilterOperator::Exists, Value::Null)));
        assert!(eval(FilterRule::new("fields.user.name", FilterOperator::NotExists, Value::Null)));
        assert!(eval(FilterRule::new("metadata.stream", FilterOperator::Equals, "stderr")));
    }

    #[test]
    fn groups_short_circuit() {
        let tree: FilterNode = FilterGroup::any(vec![
            FilterRule::new("level", FilterOperator::Equals, "error").into(),
            FilterGroup::all(vec![
                FilterRule::new("source", FilterOperator::Equals, "api").into(),
                FilterRule::new("status", FilterOperator::Gte, 500).into(),
            ])
            .into(),
        ])
        .into();
        let node = CompiledNode::compile(&tree).unwrap();
        assert!(node.eval(&Subject::Log(&log())));

        let empty_or = CompiledNode::compile(&FilterGroup::any(vec![]).into()).unwrap();
        assert!(!empty_or.eval(&Subject::Log(&log())));
    }

    #[test]
    fn value_subject_uses_raw_path() {
        let value = json!({"level": "error", "http": {"status": 500}});
        let rule: FilterNode = FilterRule::new("http.status", FilterOperator::Gte, 500).into();
        let node = CompiledNode::compile(&rule).unwrap();
        assert!(node.eval(&Subject::Value(&value)));
        assert!(!node.eval(&Subject::Value(&json!("not an object"))));
    }
}
