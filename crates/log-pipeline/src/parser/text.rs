//! 텍스트 계열 파서 -- python, java, structured(`key=value`), plain
//!
//! ```text
//! 2024-01-15 12:00:00,123 - app.db - ERROR - connection lost        (python asctime 형식)
//! ERROR:app.db:connection lost                                      (python basicConfig 기본)
//! 2024-01-15 12:00:00.123 [main] ERROR com.example.App - failed     (log4j/logback)
//! 2024-01-15T12:00:00.123Z  INFO 4242 --- [main] c.e.App : started  (Spring Boot)
//! ts=2024-01-15T12:00:00Z level=info msg="user login" user.id=7     (structured)
//! ```

use regex::Regex;
use serde_json::{Map, Value};

use logweave_core::types::LogFormat;

use super::Extracted;
use super::level;
use super::timestamp::parse_timestamp;

/// 날짜 시각 부분 정규식 (python/java 공용)
const DATETIME: &str =
    r"\d{4}-\d{2}-\d{2}[ T]\d{2}:\d{2}:\d{2}(?:[.,]\d+)?(?:Z|[+-]\d{2}:?\d{2})?";

/// python/java/plain 형식 정규식 모음
pub(crate) struct TextParser {
    python_asctime: Regex,
    python_basic: Regex,
    python_bracketed: Regex,
    java_log4j: Regex,
    java_spring: Regex,
    java_simple: Regex,
    leading_timestamp: Regex,
}

impl TextParser {
    pub(crate) fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            python_asctime: Regex::new(&format!(
                r"^({DATETIME}) - (\S+) - ([A-Za-z]+) - (.*)$"
            ))?,
            python_basic: Regex::new(r"^([A-Z]+):([^:\s]+):(.*)$")?,
            python_bracketed: Regex::new(&format!(
                r"^\[?({DATETIME})\]? \[?([A-Za-z]+)\]? (?:\[?([\w.]+)\]?:? )?(.*)$"
            ))?,
            java_log4j: Regex::new(&format!(
                r"^({DATETIME})\s+\[([^\]]+)\]\s+([A-Za-z]+)\s+(\S+)\s+-\s+(.*)$"
            ))?,
            java_spring: Regex::new(&format!(
                r"^({DATETIME})\s+([A-Za-z]+)\s+(\d+)\s+---\s+\[\s*([^\]]+)\]\s+(\S+)\s*:\s+(.*)$"
            ))?,
            java_simple: Regex::new(&format!(
                r"^({DATETIME})\s+([A-Za-z]+)\s+(\S+)\s+-\s+(.*)$"
            ))?,
            leading_timestamp: Regex::new(&format!(r"^\[?({DATETIME})\]?\s*(.*)$"))?,
        })
    }

    /// Python `logging` 형식을 파싱합니다.
    pub(crate) fn parse_python(&self, line: &str, timestamp_format: Option<&str>) -> Option<Extracted> {
        if let Some(caps) = self.python_asctime.captures(line) {
            return Some(Extracted {
                timestamp: parse_timestamp(&caps[1], timestamp_format),
                level: Some(caps[3].to_owned()),
                message: caps[4].to_owned(),
                category: Some(caps[2].to_owned()),
                ..Extracted::default()
            });
        }

        if let Some(caps) = self.python_basic.captures(line)
            && level::recognize(&caps[1], LogFormat::Python).is_some()
        {
            return Some(Extracted {
                level: Some(caps[1].to_owned()),
                message: caps[3].to_owned(),
                category: Some(caps[2].to_owned()),
                ..Extracted::default()
            });
        }

        let caps = self.python_bracketed.captures(line)?;
        level::recognize(&caps[2], LogFormat::Python)?;
        Some(Extracted {
            timestamp: parse_timestamp(&caps[1], timestamp_format),
            level: Some(caps[2].to_owned()),
            message: caps[4].to_owned(),
            category: caps.get(3).map(|m| m.as_str().to_owned()),
            ..Extracted::default()
        })
    }

    /// log4j / logback / Spring Boot 형식을 파싱합니다.
    pub(crate) fn parse_java(&self, line: &str, timestamp_format: Option<&str>) -> Option<Extracted> {
        if let Some(caps) = self.java_spring.captures(line) {
            let mut fields = Map::new();
            fields.insert("pid".to_owned(), coerce_scalar(&caps[3]));
            fields.insert("thread".to_owned(), Value::from(caps[4].trim()));
            return Some(Extracted {
                timestamp: parse_timestamp(&caps[1], timestamp_format),
                level: Some(caps[2].to_owned()),
                message: caps[6].to_owned(),
                category: Some(caps[5].to_owned()),
                fields,
                ..Extracted::default()
            });
        }

        if let Some(caps) = self.java_log4j.captures(line) {
            let mut fields = Map::new();
            fields.insert("thread".to_owned(), Value::from(&caps[2]));
            return Some(Extracted {
                timestamp: parse_timestamp(&caps[1], timestamp_format),
                level: Some(caps[3].to_owned()),
                message: caps[5].to_owned(),
                category: Some(caps[4].to_owned()),
                fields,
                ..Extracted::default()
            });
        }

        let caps = self.java_simple.captures(line)?;
        Some(Extracted {
            timestamp: parse_timestamp(&caps[1], timestamp_format),
            level: Some(caps[2].to_owned()),
            message: caps[4].to_owned(),
            category: Some(caps[3].to_owned()),
            ..Extracted::default()
        })
    }

    /// 평문 라인을 파싱합니다.
    ///
    /// 앞머리의 타임스탬프와 레벨 토큰만 인식하며, 실패하지 않습니다.
    /// 둘 다 없으면 레벨 없는 메시지가 됩니다.
    pub(crate) fn parse_plain(&self, line: &str, timestamp_format: Option<&str>) -> Extracted {
        let (timestamp, rest) = match self.leading_timestamp.captures(line) {
            Some(caps) => match parse_timestamp(&caps[1], timestamp_format) {
                Some(ts) => (Some(ts), caps.get(2).map_or("", |m| m.as_str())),
                None => (None, line),
            },
            None => (None, line),
        };

        let (level, message) = super::syslog::split_level_token(rest);
        let message = if timestamp.is_none() && level.is_none() {
            line.to_owned()
        } else {
            message.to_owned()
        };
        Extracted {
            timestamp,
            level,
            message,
            ..Extracted::default()
        }
    }
}

/// 예약 키 (structured 형식에서 레코드 필드로 승격되는 키)
const TIMESTAMP_KEYS: &[&str] = &["timestamp", "time", "ts", "@timestamp"];
const LEVEL_KEYS: &[&str] = &["level", "lvl", "severity"];
const MESSAGE_KEYS: &[&str] = &["msg", "message"];
const SOURCE_KEYS: &[&str] = &["source", "service", "app"];
const CATEGORY_KEYS: &[&str] = &["category", "logger", "module", "component"];

/// `key=value` 쌍으로 이루어진 라인을 파싱합니다.
///
/// 값은 큰따옴표로 감쌀 수 있고(`\"` 이스케이프 지원), 따옴표 없는 값은
/// 정수/실수/불리언으로 변환을 시도합니다. 점이 들어간 키(`user.id`)는 중첩 객체가 됩니다.
/// 쌍이 하나도 없으면 `None`입니다.
pub(crate) fn parse_structured(line: &str, timestamp_format: Option<&str>) -> Option<Extracted> {
    let pairs = tokenize_pairs(line);
    if pairs.is_empty() {
        return None;
    }

    let mut extracted = Extracted::default();
    let mut message = None;

    for (key, raw_value, quoted) in pairs {
        let lowered = key.to_ascii_lowercase();
        if TIMESTAMP_KEYS.contains(&lowered.as_str()) && extracted.timestamp.is_none() {
            extracted.timestamp = parse_timestamp(&raw_value, timestamp_format);
            if extracted.timestamp.is_some() {
                continue;
            }
        } else if LEVEL_KEYS.contains(&lowered.as_str()) && extracted.level.is_none() {
            extracted.level = Some(raw_value);
            continue;
        } else if MESSAGE_KEYS.contains(&lowered.as_str()) && message.is_none() {
            message = Some(raw_value);
            continue;
        } else if SOURCE_KEYS.contains(&lowered.as_str()) && extracted.source.is_none() {
            extracted.source = Some(raw_value);
            continue;
        } else if CATEGORY_KEYS.contains(&lowered.as_str()) && extracted.category.is_none() {
            extracted.category = Some(raw_value);
            continue;
        }

        let value = if quoted {
            Value::String(raw_value)
        } else {
            coerce_scalar(&raw_value)
        };
        insert_path(&mut extracted.fields, &key, value);
    }

    extracted.message = message.unwrap_or_else(|| line.to_owned());
    Some(extracted)
}

/// 따옴표 없는 값을 정수/실수/불리언/문자열로 변환합니다.
pub(crate) fn coerce_scalar(text: &str) -> Value {
    if let Ok(int) = text.parse::<i64>() {
        return Value::from(int);
    }
    if let Ok(float) = text.parse::<f64>()
        && float.is_finite()
    {
        return Value::from(float);
    }
    match text {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => Value::String(text.to_owned()),
    }
}

/// 점(`.`) 경로로 중첩 객체에 값을 넣습니다.
///
/// 중간 경로에 객체가 아닌 값이 있으면 전체 키를 평탄하게 저장합니다.
pub(crate) fn insert_path(map: &mut Map<String, Value>, path: &str, value: Value) {
    let segments: Vec<&str> = path.split('.').collect();
    let Some((last, parents)) = segments.split_last() else {
        return;
    };
    if parents.is_empty() || segments.iter().any(|s| s.is_empty()) || blocked(map, parents) {
        map.insert(path.to_owned(), value);
        return;
    }

    let mut current = map;
    for segment in parents {
        let entry = current
            .entry((*segment).to_owned())
            .or_insert_with(|| Value::Object(Map::new()));
        let Value::Object(obj) = entry else {
            return;
        };
        current = obj;
    }
    current.insert((*last).to_owned(), value);
}

/// 중간 경로에 객체가 아닌 값이 있는지 확인합니다.
fn blocked(map: &Map<String, Value>, parents: &[&str]) -> bool {
    let mut current = map;
    for segment in parents {
        match current.get(*segment) {
            None => return false,
            Some(Value::Object(obj)) => current = obj,
            Some(_) => return true,
        }
    }
    false
}

/// `key=value` 토큰을 추출합니다. (key, value, 따옴표 여부)
fn tokenize_pairs(line: &str) -> Vec<(String, String, bool)> {
    let mut pairs = Vec::new();
    let mut chars = line.chars().peekable();

    loop {
        while chars.peek().is_some_and(|c| c.is_whitespace()) {
            chars.next();
        }
        if chars.peek().is_none() {
            break;
        }

        let mut key = String::new();
        while let Some(&ch) = chars.peek() {
            if ch == '=' || ch.is_whitespace() {
                break;
            }
            key.push(ch);
            chars.next();
        }

        if chars.peek() != Some(&'=') || key.is_empty() || !is_valid_key(&key) {
            // key=value가 아닌 단어는 건너뜀
            while chars.peek().is_some_and(|c| !c.is_whitespace()) {
                chars.next();
            }
            continue;
        }
        chars.next(); // '='

        let (value, quoted) = if chars.peek() == Some(&'"') {
            chars.next();
            let mut value = String::new();
            let mut escaped = false;
            for ch in chars.by_ref() {
                if escaped {
                    value.push(ch);
                    escaped = false;
                } else if ch == '\\' {
                    escaped = true;
                } else if ch == '"' {
                    break;
                } else {
                    value.push(ch);
                }
            }
            (value, true)
        } else {
            let mut value = String::new();
            while let Some(&ch) = chars.peek() {
                if ch.is_whitespace() {
                    break;
                }
                value.push(ch);
                chars.next();
            }
            (value, false)
        };

        pairs.push((key, value, quoted));
    }

    pairs
}

fn is_valid_key(key: &str) -> bool {
    key.chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-' | '@'))
}
