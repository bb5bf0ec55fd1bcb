//! Apache / Nginx 로그 파서
//!
//! access 로그(common/combined)와 각 서버의 error 로그를 지원합니다.
//! access 로그의 레벨은 상태 코드에서 유도합니다: 5xx -> error, 4xx -> warn, 나머지 -> info.
//!
//! ```text
//! 127.0.0.1 - frank [10/Oct/2000:13:55:36 -0700] "GET /a.gif HTTP/1.0" 200 2326 "-" "curl/8"
//! [Wed Oct 11 14:32:52.123456 2000] [core:error] [pid 35708:tid 4328636416] [client 1.2.3.4:80] msg
//! 2024/01/15 12:00:00 [error] 123#0: *456 connect() failed
//! ```

use regex::{Captures, Regex};
use serde_json::{Map, Value};

use super::Extracted;
use super::timestamp::parse_timestamp;

/// access/error 로그 정규식 모음
pub(crate) struct AccessLogParser {
    access: Regex,
    apache_error: Regex,
    nginx_error: Regex,
}

impl AccessLogParser {
    pub(crate) fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            access: Regex::new(
                r#"^(\S+) (\S+) (\S+) \[([^\]]+)\] "([^"]*)" (\d{3}) (\d+|-)(?: "([^"]*)" "([^"]*)")?"#,
            )?,
            apache_error: Regex::new(
                r"^\[([^\]]+)\] \[(?:([\w-]+):)?(\w+)\](?: \[pid (\d+)(?::tid (\d+))?\])?(?: \[client ([^\]]+)\])? ?(.*)$",
            )?,
            nginx_error: Regex::new(
                r"^(\d{4}/\d{2}/\d{2} \d{2}:\d{2}:\d{2}) \[(\w+)\] (\d+)#(\d+): (?:\*(\d+) )?(.*)$",
            )?,
        })
    }

    /// Apache access 또는 error 로그를 파싱합니다.
    pub(crate) fn parse_apache(&self, line: &str, timestamp_format: Option<&str>) -> Option<Extracted> {
        self.parse_access(line, timestamp_format).or_else(|| {
            let caps = self.apache_error.captures(line)?;
            let mut fields = Map::new();
            insert_opt(&mut fields, "pid", caps.get(4).map(|m| number_or_string(m.as_str())));
            insert_opt(&mut fields, "tid", caps.get(5).map(|m| number_or_string(m.as_str())));
            insert_opt(&mut fields, "client", caps.get(6).map(|m| Value::from(m.as_str())));
            Some(Extracted {
                timestamp: parse_timestamp(&caps[1], timestamp_format),
                level: Some(caps[3].to_owned()),
                message: caps[7].to_owned(),
                source: None,
                category: caps.get(2).map(|m| m.as_str().to_owned()),
                fields,
            })
        })
    }

    /// Nginx access 또는 error 로그를 파싱합니다.
    pub(crate) fn parse_nginx(&self, line: &str, timestamp_format: Option<&str>) -> Option<Extracted> {
        self.parse_access(line, timestamp_format).or_else(|| {
            let caps = self.nginx_error.captures(line)?;
            let mut fields = Map::new();
            fields.insert("pid".to_owned(), number_or_string(&caps[3]));
            fields.insert("tid".to_owned(), number_or_string(&caps[4]));
            insert_opt(
                &mut fields,
                "connection",
                caps.get(5).map(|m| number_or_string(m.as_str())),
            );
            Some(Extracted {
                timestamp: parse_timestamp(&caps[1], timestamp_format),
                level: Some(caps[2].to_owned()),
                message: caps[6].to_owned(),
                fields,
                ..Extracted::default()
            })
        })
    }

    fn parse_access(&self, line: &str, timestamp_format: Option<&str>) -> Option<Extracted> {
        let caps = self.access.captures(line)?;
        let status: u16 = caps[6].parse().ok()?;
        let fields = access_fields(&caps, status);

        let level = match status {
            400..=499 => "warn",
            500..=599 => "error",
            _ => "info",
        };

        Some(Extracted {
            timestamp: parse_timestamp(&caps[4], timestamp_format),
            level: Some(level.to_owned()),
            message: caps[5].to_owned(),
            fields,
            ..Extracted::default()
        })
    }
}

fn access_fields(caps: &Captures<'_>, status: u16) -> Map<String, Value> {
    let mut fields = Map::new();
    fields.insert("remote_addr".to_owned(), Value::from(&caps[1]));
    insert_opt(&mut fields, "ident", dash_to_none(&caps[2]).map(Value::from));
    insert_opt(&mut fields, "user", dash_to_none(&caps[3]).map(Value::from));

    // "GET /path HTTP/1.1"
    let mut request = caps[5].splitn(3, ' ');
    if let (Some(method), Some(path)) = (request.next(), request.next()) {
        fields.insert("method".to_owned(), Value::from(method));
        fields.insert("path".to_owned(), Value::from(path));
        insert_opt(&mut fields, "protocol", request.next().map(Value::from));
    }

    fields.insert("status".to_owned(), Value::from(status));
    let bytes = caps[7].parse::<u64>().unwrap_or(0);
    fields.insert("bytes".to_owned(), Value::from(bytes));
    insert_opt(
        &mut fields,
        "referer",
        caps.get(8).and_then(|m| dash_to_none(m.as_str())).map(Value::from),
    );
    insert_opt(
        &mut fields,
        "user_agent",
        caps.get(9).and_then(|m| dash_to_none(m.as_str())).map(Value::from),
    );
    fields
}

fn insert_opt(fields: &mut Map<String, Value>, key: &str, value: Option<Value>) {
    if let Some(value) = value {
        fields.insert(key.to_owned(), value);
    }
}

fn dash_to_none(value: &str) -> Option<&str> {
    if value == "-" { None } else { Some(value) }
}

fn number_or_string(text: &str) -> Value {
    text.parse::<u64>()
        .map(Value::from)
        .unwrap_or_else(|_| Value::from(text))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parser() -> AccessLogParser {
        AccessLogParser::new().unwrap()
    }

    #[test]
    fn combined_access_log() {
        let e = parser()
            .parse_nginx(
                r#"192.168.1.100 - - [01/Jan/2024:12:00:00 +0000] "GET /api/health HTTP/1.1" 200 1024 "-" "curl/7.68.0""#,
                None,
            )
            .unwrap();
        assert_eq!(e.level.as_deref(), Some("info"));
        assert_eq!(e.message, "GET /api/health HTTP/1.1");
        assert_eq!(e.fields.get("status"), Some(&json!(200)));
        assert_eq!(e.fields.get("path"), Some(&json!("/api/health")));
        assert_eq!(e.fields.get("user_agent"), Some(&json!("curl/7.68.0")));
        assert!(e.fields.get("referer").is_none());
        assert!(e.timestamp.is_some());
    }

    #[test]
    fn common_access_log_status_levels() {
        let p = parser();
        let server_error = p
            .parse_apache(
                r#"127.0.0.1 - frank [10/Oct/2000:13:55:36 -0700] "POST /x HTTP/1.0" 503 -"#,
                None,
            )
            .unwrap();
        assert_eq!(server_error.level.as_deref(), Some("error"));
        assert_eq!(server_error.fields.get("bytes"), Some(&json!(0)));
        assert_eq!(server_error.fields.get("user"), Some(&json!("frank")));

        let not_found = p
            .parse_apache(
                r#"127.0.0.1 - - [10/Oct/2000:13:55:36 -0700] "GET /missing HTTP/1.0" 404 12"#,
                None,
            )
            .unwrap();
        assert_eq!(not_found.level.as_deref(), Some("warn"));
    }

    #[test]
    fn apache_error_log() {
        let e = parser()
            .parse_apache(
                "[Wed Oct 11 14:32:52.123456 2000] [core:error] [pid 35708:tid 4328636416] [client 10.0.0.1:5050] File does not exist: /var/www/favicon.ico",
                None,
            )
            .unwrap();
        assert_eq!(e.level.as_deref(), Some("error"));
        assert_eq!(e.category.as_deref(), Some("core"));
        assert_eq!(e.fields.get("pid"), Some(&json!(35708)));
        assert_eq!(e.fields.get("client"), Some(&json!("10.0.0.1:5050")));
        assert_eq!(e.message, "File does not exist: /var/www/favicon.ico");
    }

    #[test]
    fn nginx_error_log() {
        let e = parser()
            .parse_nginx(
                "2024/01/01 12:00:00 [error] 123#0: *456 connect() failed (111: Connection refused)",
                None,
            )
            .unwrap();
        assert_eq!(e.level.as_deref(), Some("error"));
        assert_eq!(e.fields.get("connection"), Some(&json!(456)));
        assert_eq!(e.message, "connect() failed (111: Connection refused)");
    }

    #[test]
    fn garbage_is_none() {
        assert!(parser().parse_nginx("hello", None).is_none());
        assert!(parser().parse_apache("[bad", None).is_none());
    }
}
