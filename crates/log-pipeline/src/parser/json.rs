//! JSON 로그 파서
//!
//! 한 줄짜리 JSON 객체를 파싱합니다. 필드 이름 매핑을 통해
//! 다양한 JSON 로그 형식(tracing, bunyan, pino, logstash 등)을 지원합니다.
//!
//! 매핑된 필드를 제외한 나머지 키는 중첩 구조 그대로 `fields`에 보존됩니다.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::Extracted;
use super::timestamp::{from_epoch, parse_timestamp};

/// JSON 로그 필드 매핑 설정
///
/// 레코드 필드마다 후보 키를 순서대로 시도합니다. 먼저 발견된 키가 사용됩니다.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JsonFieldMapping {
    /// 타임스탬프 후보 키
    pub timestamp_keys: Vec<String>,
    /// 레벨 후보 키
    pub level_keys: Vec<String>,
    /// 메시지 후보 키
    pub message_keys: Vec<String>,
    /// 소스 후보 키
    pub source_keys: Vec<String>,
    /// 분류 후보 키
    pub category_keys: Vec<String>,
}

impl Default for JsonFieldMapping {
    fn default() -> Self {
        fn keys(names: &[&str]) -> Vec<String> {
            names.iter().map(|s| (*s).to_owned()).collect()
        }
        Self {
            timestamp_keys: keys(&["timestamp", "@timestamp", "time", "ts", "datetime"]),
            level_keys: keys(&["level", "severity", "lvl", "log_level"]),
            message_keys: keys(&["message", "msg", "@message", "text"]),
            source_keys: keys(&["source", "service", "app"]),
            category_keys: keys(&["category", "logger", "module", "component"]),
        }
    }
}

/// JSON 한 줄(또는 multiline 블록)을 파싱합니다.
///
/// 최상위가 객체가 아니면 `None`을 반환합니다.
pub(crate) fn parse(
    text: &str,
    mapping: &JsonFieldMapping,
    timestamp_format: Option<&str>,
) -> Option<Extracted> {
    let value: Value = serde_json::from_str(text.trim()).ok()?;
    let Value::Object(mut object) = value else {
        return None;
    };

    let timestamp = take(&mut object, &mapping.timestamp_keys).and_then(|v| match v {
        Value::String(s) => parse_timestamp(&s, timestamp_format),
        Value::Number(n) => n.as_f64().and_then(from_epoch),
        _ => None,
    });

    let level = take(&mut object, &mapping.level_keys).and_then(scalar_to_string);
    let message = take(&mut object, &mapping.message_keys)
        .and_then(scalar_to_string)
        .unwrap_or_else(|| text.trim().to_owned());
    let source = take(&mut object, &mapping.source_keys).and_then(scalar_to_string);
    let category = take(&mut object, &mapping.category_keys).and_then(scalar_to_string);

    Some(Extracted {
        timestamp,
        level,
        message,
        source,
        category,
        fields: object,
    })
}

/// 후보 키 중 처음 발견된 항목을 꺼냅니다.
fn take(object: &mut Map<String, Value>, keys: &[String]) -> Option<Value> {
    keys.iter().find_map(|key| object.remove(key))
}

fn scalar_to_string(value: Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
