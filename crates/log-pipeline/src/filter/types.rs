//! 필터 규칙 데이터 타입
//!
//! YAML/TOML/JSON 설정에서 역직렬화되는 규칙 트리 구조체들을 정의합니다.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::LogPipelineError;

/// 기본 최대 중첩 깊이
pub const DEFAULT_MAX_DEPTH: usize = 10;

/// 규칙 연산자
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOperator {
    /// 값이 같음
    Equals,
    /// 값이 다름 (필드가 없으면 참)
    NotEquals,
    /// 부분 문자열 포함
    Contains,
    /// 부분 문자열 미포함
    NotContains,
    /// 접두사 일치
    StartsWith,
    /// 접미사 일치
    EndsWith,
    /// 정규식 매칭
    Regex,
    /// 초과 (숫자 또는 날짜)
    Gt,
    /// 이상
    Gte,
    /// 미만
    Lt,
    /// 이하
    Lte,
    /// 집합에 포함
    In,
    /// 집합에 미포함 (필드가 없으면 참)
    NotIn,
    /// 필드 존재 (값과 무관, null도 존재로 봄)
    Exists,
    /// 필드 부재
    NotExists,
}

impl FilterOperator {
    /// 문자열 전용 연산자인지 확인합니다. 비문자열 필드에서는 항상 거짓입니다.
    pub fn is_string_op(self) -> bool {
        matches!(
            self,
            Self::Contains | Self::NotContains | Self::StartsWith | Self::EndsWith | Self::Regex
        )
    }

    /// 비교 연산자인지 확인합니다.
    pub fn is_comparison(self) -> bool {
        matches!(self, Self::Gt | Self::Gte | Self::Lt | Self::Lte)
    }

    /// 값을 요구하지 않는 연산자인지 확인합니다.
    pub fn is_presence(self) -> bool {
        matches!(self, Self::Exists | Self::NotExists)
    }
}

/// 단일 필드 규칙
///
/// # YAML 예시
/// ```yaml
/// field: fields.status
/// operator: gte
/// value: 500
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterRule {
    /// 대상 필드 경로 (`level`, `message`, `fields.user.id` 등)
    pub field: String,
    /// 연산자
    pub operator: FilterOperator,
    /// 비교 값 (`exists`/`not_exists`는 무시)
    #[serde(default)]
    pub value: Value,
    /// 대소문자 구분 여부 (기본: 구분)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub case_sensitive: Option<bool>,
}

impl FilterRule {
    /// 새 규칙을 생성합니다.
    pub fn new(field: impl Into<String>, operator: FilterOperator, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            operator,
            value: value.into(),
            case_sensitive: None,
        }
    }

    /// 대소문자 구분을 끕니다.
    pub fn case_insensitive(mut self) -> Self {
        self.case_sensitive = Some(false);
        self
    }

    /// 연산자와 값의 형태를 검증합니다.
    pub fn validate(&self) -> Result<(), LogPipelineError> {
        if self.field.trim().is_empty() {
            return Err(LogPipelineError::config(
                "filter.rule.field",
                "field must not be empty",
            ));
        }

        let op = self.operator;
        if op.is_string_op() && !self.value.is_string() {
            return Err(LogPipelineError::config(
                "filter.rule.value",
                format!("operator {op:?} on '{}' requires a string value", self.field),
            ));
        }
        if matches!(op, FilterOperator::In | FilterOperator::NotIn) && !self.value.is_array() {
            return Err(LogPipelineError::config(
                "filter.rule.value",
                format!("operator {op:?} on '{}' requires an array value", self.field),
            ));
        }
        if op.is_comparison() && !(self.value.is_number() || self.value.is_string()) {
            return Err(LogPipelineError::config(
                "filter.rule.value",
                format!(
                    "operator {op:?} on '{}' requires a number or date value",
                    self.field
                ),
            ));
        }
        Ok(())
    }
}

/// 그룹 결합 연산자
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupOperator {
    /// 모두 참 (기본값, 첫 거짓에서 중단)
    #[default]
    And,
    /// 하나라도 참 (첫 참에서 중단)
    Or,
}

/// 규칙 그룹
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterGroup {
    /// 결합 연산자
    #[serde(default)]
    pub operator: GroupOperator,
    /// 하위 규칙/그룹
    #[serde(default)]
    pub rules: Vec<FilterNode>,
}

impl FilterGroup {
    /// AND 그룹을 생성합니다.
    pub fn all(rules: Vec<FilterNode>) -> Self {
        Self {
            operator: GroupOperator::And,
            rules,
        }
    }

    /// OR 그룹을 생성합니다.
    pub fn any(rules: Vec<FilterNode>) -> Self {
        Self {
            operator: GroupOperator::Or,
            rules,
        }
    }
}

/// 규칙 트리 노드
///
/// 직렬화 형태에 태그가 없습니다. `field`가 있으면 규칙, `rules`가 있으면 그룹입니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterNode {
    /// 단일 규칙
    Rule(FilterRule),
    /// 중첩 그룹
    Group(FilterGroup),
}

impl FilterNode {
    /// 노드의 깊이를 계산합니다. 규칙은 1, 그룹은 1 + 가장 깊은 자식입니다.
    pub fn depth(&self) -> usize {
        match self {
            Self::Rule(_) => 1,
            Self::Group(group) => 1 + group.rules.iter().map(Self::depth).max().unwrap_or(0),
        }
    }

    /// 트리의 모든 규칙을 검증하고 깊이 상한을 확인합니다.
    pub fn validate(&self, max_depth: usize) -> Result<(), LogPipelineError> {
        let depth = self.depth();
        if depth > max_depth {
            return Err(LogPipelineError::config(
                "filter.max_depth",
                format!("rule tree depth {depth} exceeds max_depth {max_depth}"),
            ));
        }
        self.validate_rules()
    }

    fn validate_rules(&self) -> Result<(), LogPipelineError> {
        match self {
            Self::Rule(rule) => rule.validate(),
            Self::Group(group) => group.rules.iter().try_for_each(Self::validate_rules),
        }
    }
}

impl From<FilterRule> for FilterNode {
    fn from(rule: FilterRule) -> Self {
        Self::Rule(rule)
    }
}

impl From<FilterGroup> for FilterNode {
    fn from(group: FilterGroup) -> Self {
        Self::Group(group)
    }
}

/// 이름 있는 재사용 규칙 그룹
///
/// # YAML 예시
/// ```yaml
/// name: errors
/// description: error 이상 레벨만 통과
/// enabled: true
/// group:
///   operator: and
///   rules:
///     - field: level
///       operator: gte
///       value: error
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterPreset {
    /// 프리셋 이름 (필터 내에서 유일)
    pub name: String,
    /// 설명
    #[serde(default)]
    pub description: String,
    /// 활성화 여부
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// 규칙 그룹
    pub group: FilterGroup,
}

fn default_enabled() -> bool {
    true
}

impl FilterPreset {
    /// 새 프리셋을 생성합니다.
    pub fn new(name: impl Into<String>, group: FilterGroup) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            enabled: true,
            group,
        }
    }

    /// 설명을 설정합니다.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// error 이상 레벨만 통과시키는 프리셋
    pub fn error_level() -> Self {
        Self::new(
            "error_level",
            FilterGroup::all(vec![
                FilterRule::new("level", FilterOperator::Gte, "error").into(),
            ]),
        )
        .with_description("records at error level or above")
    }

    /// 타임스탬프가 `[start, end]` 안에 있는 레코드만 통과시키는 프리셋 (양끝 포함)
    pub fn time_range(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        let format = |t: DateTime<Utc>| t.to_rfc3339_opts(SecondsFormat::AutoSi, true);
        Self::new(
            "time_range",
            FilterGroup::all(vec![
                FilterRule::new("timestamp", FilterOperator::Gte, format(start)).into(),
                FilterRule::new("timestamp", FilterOperator::Lte, format(end)).into(),
            ]),
        )
        .with_description(format!("records between {} and {}", format(start), format(end)))
    }

    /// 주어진 소스 목록에 속한 레코드만 통과시키는 프리셋
    pub fn sources<I, S>(sources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let allowed: Vec<Value> = sources
            .into_iter()
            .map(|s| Value::String(s.into()))
            .collect();
        Self::new(
            "sources",
            FilterGroup::all(vec![
                FilterRule::new("source", FilterOperator::In, allowed).into(),
            ]),
        )
        .with_description("records from an allow-listed source")
    }

    /// 프리셋을 검증합니다.
    pub fn validate(&self, max_depth: usize) -> Result<(), LogPipelineError> {
        if self.name.trim().is_empty() {
            return Err(LogPipelineError::config(
                "filter.preset.name",
                "preset name must not be empty",
            ));
        }
        FilterNode::Group(self.group.clone()).validate(max_depth)
    }
}

/// 필터 설정
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// 최상위 규칙/그룹
    pub rules: Vec<FilterNode>,
    /// 최상위 결합 연산자 (규칙과 활성 프리셋에 공통 적용)
    pub operator: GroupOperator,
    /// 최대 중첩 깊이
    pub max_depth: usize,
    /// 프리셋 목록
    pub presets: Vec<FilterPreset>,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            rules: Vec::new(),
            operator: GroupOperator::And,
            max_depth: DEFAULT_MAX_DEPTH,
            presets: Vec::new(),
        }
    }
}

impl FilterConfig {
    /// 설정 전체를 검증합니다.
    pub fn validate(&self) -> Result<(), LogPipelineError> {
        if self.max_depth == 0 {
            return Err(LogPipelineError::config(
                "filter.max_depth",
                "must be greater than 0",
            ));
        }
        for node in &self.rules {
            node.validate(self.max_depth)?;
        }
        let mut names = std::collections::HashSet::new();
        for preset in &self.presets {
            preset.validate(self.max_depth)?;
            if !names.insert(preset.name.as_str()) {
                return Err(LogPipelineError::config(
                    "filter.presets",
                    format!("duplicate preset name '{}'", preset.name),
                ));
            }
        }
        Ok(())
    }
}
