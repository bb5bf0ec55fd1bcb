//! Syslog 파서 -- RFC 5424, RFC 3164, ISO 타임스탬프 + 레벨 형식
//!
//! # 지원 형식
//! ```text
//! <PRI>1 TIMESTAMP HOSTNAME APP-NAME PROCID MSGID STRUCTURED-DATA MSG   (RFC 5424)
//! <PRI>MMM DD HH:MM:SS hostname tag[pid]: message                       (RFC 3164)
//! MMM DD HH:MM:SS hostname tag[pid]: message                            (PRI 없는 BSD)
//! <PRI>message
//! 2024-01-01T00:00:00Z ERROR message                                    (ISO + 레벨)
//! ```
//!
//! PRI의 severity는 레벨 이름(`emerg` .. `debug`)으로 바뀐 뒤 레벨 테이블로 정규화됩니다.

use regex::Regex;
use serde_json::{Map, Value};

use logweave_core::types::LogFormat;

use super::Extracted;
use super::level;
use super::timestamp::{parse_bsd, parse_timestamp};

/// RFC 5424에서 유효한 최대 PRI 값
/// facility 최댓값 23 * 8 + severity 최댓값 7 = 191
const MAX_SYSLOG_PRI: u16 = 191;

/// severity 코드(0-7)에 대응하는 이름
const SEVERITY_NAMES: [&str; 8] = [
    "emerg", "alert", "crit", "error", "warning", "notice", "info", "debug",
];

/// Syslog 파서
///
/// 정규식은 생성 시 한 번만 컴파일됩니다.
pub(crate) struct SyslogParser {
    rfc5424: Regex,
    rfc3164: Regex,
    pri_only: Regex,
    iso: Regex,
}

impl SyslogParser {
    pub(crate) fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            rfc5424: Regex::new(r"^<(\d{1,3})>1 (\S+) (\S+) (\S+) (\S+) (\S+)(?: (.*))?$")?,
            rfc3164: Regex::new(
                r"^(?:<(\d{1,3})>)?([A-Z][a-z]{2} +\d{1,2} \d{2}:\d{2}:\d{2}) (\S+) (?:([^:\[\s]+)(?:\[(\d+)\])?: ?)?(.*)$",
            )?,
            pri_only: Regex::new(r"^<(\d{1,3})>\s*(.*)$")?,
            iso: Regex::new(
                r"^(\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}:\d{2}(?:[.,]\d+)?(?:Z|[+-]\d{2}:?\d{2})?)\s+(.*)$",
            )?,
        })
    }

    /// 한 줄을 파싱합니다. 어떤 변형에도 맞지 않으면 `None`입니다.
    pub(crate) fn parse(&self, line: &str, timestamp_format: Option<&str>) -> Option<Extracted> {
        let line = line.trim_end();

        if let Some(caps) = self.rfc5424.captures(line) {
            let pri = parse_pri(&caps[1])?;
            return Some(self.rfc5424_body(pri, &caps, timestamp_format));
        }

        if let Some(caps) = self.rfc3164.captures(line) {
            let pri = match caps.get(1) {
                Some(m) => Some(parse_pri(m.as_str())?),
                None => None,
            };
            let mut fields = Map::new();
            let level = pri.map(|pri| {
                let (facility, severity) = decode_pri(pri);
                fields.insert("facility".to_owned(), Value::from(facility));
                fields.insert("severity".to_owned(), Value::from(severity));
                SEVERITY_NAMES[usize::from(severity)].to_owned()
            });
            fields.insert("hostname".to_owned(), Value::from(&caps[3]));
            if let Some(pid) = caps.get(5) {
                fields.insert("procid".to_owned(), Value::from(pid.as_str()));
            }
            return Some(Extracted {
                timestamp: parse_bsd(&caps[2]),
                level,
                message: caps[6].to_owned(),
                source: caps.get(4).map(|m| m.as_str().to_owned()),
                category: None,
                fields,
            });
        }

        if let Some(caps) = self.pri_only.captures(line) {
            let (facility, severity) = decode_pri(parse_pri(&caps[1])?);
            let mut fields = Map::new();
            fields.insert("facility".to_owned(), Value::from(facility));
            fields.insert("severity".to_owned(), Value::from(severity));
            return Some(Extracted {
                level: Some(SEVERITY_NAMES[usize::from(severity)].to_owned()),
                message: caps[2].to_owned(),
                fields,
                ..Extracted::default()
            });
        }

        if let Some(caps) = self.iso.captures(line) {
            let timestamp = parse_timestamp(&caps[1], timestamp_format)?;
            let rest = caps.get(2).map_or("", |m| m.as_str());
            let (level, message) = split_level_token(rest);
            return Some(Extracted {
                timestamp: Some(timestamp),
                level,
                message: message.to_owned(),
                ..Extracted::default()
            });
        }

        None
    }

    fn rfc5424_body(
        &self,
        pri: u16,
        caps: &regex::Captures<'_>,
        timestamp_format: Option<&str>,
    ) -> Extracted {
        let (facility, severity) = decode_pri(pri);
        let mut fields = Map::new();
        fields.insert("facility".to_owned(), Value::from(facility));
        fields.insert("severity".to_owned(), Value::from(severity));

        let hostname = nilvalue(&caps[3]);
        let app_name = nilvalue(&caps[4]);
        if let Some(hostname) = hostname {
            fields.insert("hostname".to_owned(), Value::from(hostname));
        }
        if let Some(proc_id) = nilvalue(&caps[5]) {
            fields.insert("procid".to_owned(), Value::from(proc_id));
        }
        if let Some(msg_id) = nilvalue(&caps[6]) {
            fields.insert("msgid".to_owned(), Value::from(msg_id));
        }

        let sd_and_msg = caps.get(7).map_or("", |m| m.as_str());
        let message = if sd_and_msg.starts_with('[') {
            let (sd_part, msg_part) = split_sd_and_message(sd_and_msg);
            match parse_structured_data(&sd_part) {
                Some(sd) => {
                    fields.insert("structured_data".to_owned(), Value::Object(sd));
                    msg_part
                }
                // 깨진 SD는 메시지의 일부로 남김
                None => sd_and_msg.to_owned(),
            }
        } else if let Some(msg) = sd_and_msg.strip_prefix("- ") {
            msg.to_owned()
        } else if sd_and_msg == "-" {
            String::new()
        } else {
            sd_and_msg.to_owned()
        };

        Extracted {
            timestamp: nilvalue(&caps[2]).and_then(|ts| parse_timestamp(ts, timestamp_format)),
            level: Some(SEVERITY_NAMES[usize::from(severity)].to_owned()),
            message,
            source: app_name.map(str::to_owned),
            category: None,
            fields,
        }
    }
}

/// 메시지 앞머리의 레벨 토큰(`ERROR`, `[warn]`, `INFO:`)을 분리합니다.
///
/// 첫 토큰이 알려진 레벨 이름이 아니면 레벨 없이 전체가 메시지입니다.
pub(crate) fn split_level_token(rest: &str) -> (Option<String>, &str) {
    let rest = rest.trim_start();
    let (token, remainder) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
    let bare = token
        .trim_start_matches('[')
        .trim_end_matches(':')
        .trim_end_matches(']');
    match level::recognize(bare, LogFormat::Syslog) {
        Some(_) => (Some(bare.to_owned()), remainder.trim_start()),
        None => (None, rest),
    }
}

fn parse_pri(text: &str) -> Option<u16> {
    text.parse::<u16>().ok().filter(|pri| *pri <= MAX_SYSLOG_PRI)
}

/// PRI 값에서 facility와 severity를 분리합니다.
///
/// PRI = facility * 8 + severity
fn decode_pri(pri: u16) -> (u8, u8) {
    // MAX_SYSLOG_PRI 이하이므로 u8 범위
    ((pri / 8) as u8, (pri % 8) as u8)
}

/// NILVALUE (`-`)를 `None`으로 변환합니다.
fn nilvalue(value: &str) -> Option<&str> {
    if value == "-" { None } else { Some(value) }
}

/// Structured Data 부분과 메시지 부분을 분리합니다.
///
/// SD는 하나 이상의 `[...]` 블록으로 구성되며, 그 이후가 메시지입니다.
fn split_sd_and_message(input: &str) -> (String, String) {
    let mut depth = 0usize;
    let mut in_quote = false;
    let mut escaped = false;

    for (idx, ch) in input.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_quote => escaped = true,
            '"' => in_quote = !in_quote,
            '[' if !in_quote => depth += 1,
            ']' if !in_quote => {
                depth = depth.saturating_sub(1);
                // 연속된 SD 요소([a][b])는 이어서 읽음
                if depth == 0 && !input[idx + 1..].starts_with('[') {
                    let (sd, rest) = input.split_at(idx + 1);
                    return (sd.to_owned(), rest.trim_start().to_owned());
                }
            }
            _ => {}
        }
    }

    // 닫히지 않은 SD가 있으면 전체를 SD로 간주
    (input.to_owned(), String::new())
}

/// RFC 5424 Structured Data를 `{sd-id: {param: value}}` 객체로 파싱합니다.
///
/// 형식이 깨졌으면 `None`을 반환합니다.
fn parse_structured_data(sd: &str) -> Option<Map<String, Value>> {
    let mut elements = Map::new();
    let mut chars = sd.chars().peekable();

    while chars.peek().is_some() {
        if chars.next() != Some('[') {
            return None;
        }

        let mut sd_id = String::new();
        while let Some(&ch) = chars.peek() {
            if ch == ']' || ch == ' ' {
                break;
            }
            sd_id.push(ch);
            chars.next();
        }
        if sd_id.is_empty() {
            return None;
        }

        let mut params = Map::new();
        loop {
            match chars.peek() {
                Some(']') => {
                    chars.next();
                    break;
                }
                Some(' ') => {
                    chars.next();
                }
                Some(_) => {
                    let mut name = String::new();
                    while let Some(&ch) = chars.peek() {
                        if ch == '=' {
                            break;
                        }
                        name.push(ch);
                        chars.next();
                    }
                    if chars.next() != Some('=') || chars.next() != Some('"') {
                        return None;
                    }

                    let mut value = String::new();
                    let mut escaped = false;
                    let mut closed = false;
                    for ch in chars.by_ref() {
                        if escaped {
                            value.push(ch);
                            escaped = false;
                        } else if ch == '\\' {
                            escaped = true;
                        } else if ch == '"' {
                            closed = true;
                            break;
                        } else {
                            value.push(ch);
                        }
                    }
                    if !closed {
                        return None;
                    }
                    params.insert(name, Value::String(value));
                }
                None => return None,
            }
        }

        elements.insert(sd_id, Value::Object(params));
    }

    Some(elements)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parser() -> SyslogParser {
        SyslogParser::new().unwrap()
    }

    #[test]
    fn decode_pri_values() {
        assert_eq!(decode_pri(34), (4, 2));
        assert_eq!(decode_pri(0), (0, 0));
        assert_eq!(decode_pri(191), (23, 7));
    }

    #[test]
    fn parse_rfc5424_basic() {
        let e = parser()
            .parse(
                "<34>1 2024-01-15T12:00:00Z host sshd 1234 - - Failed password",
                None,
            )
            .unwrap();
        assert_eq!(e.source.as_deref(), Some("sshd"));
        assert_eq!(e.message, "Failed password");
        assert_eq!(e.level.as_deref(), Some("crit"));
        assert_eq!(e.fields.get("procid"), Some(&json!("1234")));
        assert_eq!(e.fields.get("hostname"), Some(&json!("host")));
        assert!(e.timestamp.is_some());
    }

    #[test]
    fn parse_rfc5424_with_structured_data() {
        let e = parser()
            .parse(
                r#"<165>1 2024-01-15T12:00:00Z host app - ID47 [exampleSDID@32473 iut="3" eventSource="App"][meta seq="1"] An application event"#,
                None,
            )
            .unwrap();
        assert_eq!(e.message, "An application event");
        assert_eq!(e.level.as_deref(), Some("notice"));
        assert_eq!(
            e.fields.get("structured_data"),
            Some(&json!({
                "exampleSDID@32473": {"iut": "3", "eventSource": "App"},
                "meta": {"seq": "1"}
            }))
        );
    }

    #[test]
    fn parse_rfc5424_nilvalue_fields() {
        let e = parser().parse("<14>1 - - - - - -", None).unwrap();
        assert!(e.timestamp.is_none());
        assert!(e.source.is_none());
        assert_eq!(e.message, "");
    }

    #[test]
    fn parse_rfc3164_with_pid() {
        let e = parser()
            .parse("<13>Jan 15 12:00:00 web-01 nginx[4321]: upstream timed out", None)
            .unwrap();
        assert_eq!(e.source.as_deref(), Some("nginx"));
        assert_eq!(e.message, "upstream timed out");
        assert_eq!(e.level.as_deref(), Some("notice"));
        assert_eq!(e.fields.get("procid"), Some(&json!("4321")));
    }

    #[test]
    fn parse_bsd_without_pri() {
        let e = parser()
            .parse("Mar  3 08:15:00 db-01 postgres: checkpoint complete", None)
            .unwrap();
        assert!(e.level.is_none());
        assert_eq!(e.source.as_deref(), Some("postgres"));
        assert_eq!(e.message, "checkpoint complete");
    }

    #[test]
    fn parse_iso_level_line() {
        let e = parser()
            .parse("2024-01-01T00:00:00Z ERROR boom", None)
            .unwrap();
        assert_eq!(e.level.as_deref(), Some("ERROR"));
        assert_eq!(e.message, "boom");
        assert_eq!(
            e.timestamp.map(|t| t.to_rfc3339()),
            Some("2024-01-01T00:00:00+00:00".to_owned())
        );
    }

    #[test]
    fn parse_iso_without_level_keeps_message() {
        let e = parser()
            .parse("2024-01-01T00:00:00Z server started on :8080", None)
            .unwrap();
        assert!(e.level.is_none());
        assert_eq!(e.message, "server started on :8080");
    }

    #[test]
    fn parse_pri_only() {
        let e = parser().parse("<11>disk failure", None).unwrap();
        assert_eq!(e.level.as_deref(), Some("error"));
        assert_eq!(e.message, "disk failure");
    }

    #[test]
    fn invalid_pri_is_none() {
        assert!(parser().parse("<192>1 - - - - - - msg", None).is_none());
        assert!(parser().parse("<999>oops", None).is_none());
    }

    #[test]
    fn unrecognized_line_is_none() {
        assert!(parser().parse("just some words", None).is_none());
        assert!(parser().parse("", None).is_none());
    }

    #[test]
    fn broken_structured_data_stays_in_message() {
        let e = parser()
            .parse(r#"<14>1 - h a - - [id key="unterminated msg"#, None)
            .unwrap();
        assert!(e.fields.get("structured_data").is_none());
        assert!(e.message.starts_with("[id"));
    }

    #[test]
    fn split_level_token_variants() {
        assert_eq!(split_level_token("[WARN] low disk"), (Some("WARN".to_owned()), "low disk"));
        assert_eq!(split_level_token("info: ready"), (Some("info".to_owned()), "ready"));
        assert_eq!(split_level_token("hello world"), (None, "hello world"));
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn parse_arbitrary_text_does_not_panic(text in ".{0,300}") {
                let _ = parser().parse(&text, None);
            }

            #[test]
            fn valid_priority_range_parses(pri in 0u16..=191) {
                let line = format!("<{pri}>1 2024-01-15T12:00:00Z host app - - - message");
                prop_assert!(parser().parse(&line, None).is_some());
            }
        }
    }
}
