//! 레벨 문자열 정규화
//!
//! 형식마다 레벨 표기가 다르므로(`WARNING`, `SEVERE`, `notice`, `crit` 등)
//! 공통 테이블과 형식별 테이블을 순서대로 조회해 여섯 단계 [`LogLevel`]로 변환합니다.

use std::collections::HashMap;

use logweave_core::types::{LogFormat, LogLevel};

/// 모든 형식에 공통으로 적용되는 레벨 테이블
const COMMON: &[(&str, LogLevel)] = &[
    ("trace", LogLevel::Trace),
    ("debug", LogLevel::Debug),
    ("dbg", LogLevel::Debug),
    ("info", LogLevel::Info),
    ("inf", LogLevel::Info),
    ("information", LogLevel::Info),
    ("warn", LogLevel::Warn),
    ("warning", LogLevel::Warn),
    ("wrn", LogLevel::Warn),
    ("error", LogLevel::Error),
    ("err", LogLevel::Error),
    ("fatal", LogLevel::Fatal),
    ("critical", LogLevel::Fatal),
    ("crit", LogLevel::Fatal),
    ("panic", LogLevel::Fatal),
];

/// syslog / apache / nginx (syslog severity 이름 계열)
const SYSLOG: &[(&str, LogLevel)] = &[
    ("emerg", LogLevel::Fatal),
    ("emergency", LogLevel::Fatal),
    ("alert", LogLevel::Fatal),
    ("notice", LogLevel::Info),
];

/// java.util.logging / log4j
const JAVA: &[(&str, LogLevel)] = &[
    ("severe", LogLevel::Error),
    ("config", LogLevel::Debug),
    ("fine", LogLevel::Debug),
    ("finer", LogLevel::Trace),
    ("finest", LogLevel::Trace),
];

/// bunyan/pino 숫자 레벨
const NUMERIC: &[(&str, LogLevel)] = &[
    ("10", LogLevel::Trace),
    ("20", LogLevel::Debug),
    ("30", LogLevel::Info),
    ("40", LogLevel::Warn),
    ("50", LogLevel::Error),
    ("60", LogLevel::Fatal),
];

fn format_table(format: LogFormat) -> &'static [(&'static str, LogLevel)] {
    match format {
        LogFormat::Syslog | LogFormat::Apache | LogFormat::Nginx => SYSLOG,
        LogFormat::Java => JAVA,
        LogFormat::Json => NUMERIC,
        LogFormat::Python
        | LogFormat::Plain
        | LogFormat::Structured
        | LogFormat::Custom => &[],
    }
}

/// 알려진 레벨 이름이면 정규 레벨을 반환합니다. 모르는 이름이면 `None`입니다.
///
/// 평문 라인에서 첫 토큰이 레벨인지 판별할 때 사용합니다.
pub(crate) fn recognize(token: &str, format: LogFormat) -> Option<LogLevel> {
    let lowered = token.trim().to_ascii_lowercase();
    lookup(COMMON, &lowered)
        .or_else(|| lookup(format_table(format), &lowered))
        .or_else(|| apache_trace_level(&lowered))
}

/// 레벨 문자열을 정규화합니다.
///
/// 사용자 매핑(`overrides`, 소문자 키)이 먼저 적용되고,
/// 어느 테이블에도 없는 이름은 `Info`로 간주합니다.
pub(crate) fn normalize(
    token: &str,
    format: LogFormat,
    overrides: &HashMap<String, LogLevel>,
) -> LogLevel {
    let lowered = token.trim().to_ascii_lowercase();
    if let Some(level) = overrides.get(&lowered) {
        return *level;
    }
    recognize(&lowered, format).unwrap_or_default()
}

fn lookup(table: &[(&str, LogLevel)], lowered: &str) -> Option<LogLevel> {
    table
        .iter()
        .find(|(name, _)| *name == lowered)
        .map(|(_, level)| *level)
}

// apache 2.4의 trace1..trace8
fn apache_trace_level(lowered: &str) -> Option<LogLevel> {
    let digits = lowered.strip_prefix("trace")?;
    (!digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit())).then_some(LogLevel::Trace)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn norm(token: &str, format: LogFormat) -> LogLevel {
        normalize(token, format, &HashMap::new())
    }

    #[test]
    fn common_names_are_case_insensitive() {
        assert_eq!(norm("ERROR", LogFormat::Plain), LogLevel::Error);
        assert_eq!(norm("Warning", LogFormat::Python), LogLevel::Warn);
        assert_eq!(norm("CRITICAL", LogFormat::Python), LogLevel::Fatal);
    }

    #[test]
    fn format_specific_names() {
        assert_eq!(norm("notice", LogFormat::Syslog), LogLevel::Info);
        assert_eq!(norm("emerg", LogFormat::Nginx), LogLevel::Fatal);
        assert_eq!(norm("SEVERE", LogFormat::Java), LogLevel::Error);
        assert_eq!(norm("FINEST", LogFormat::Java), LogLevel::Trace);
        assert_eq!(norm("50", LogFormat::Json), LogLevel::Error);
        assert_eq!(norm("trace3", LogFormat::Apache), LogLevel::Trace);
    }

    #[test]
    fn unknown_defaults_to_info() {
        assert_eq!(norm("verbose", LogFormat::Plain), LogLevel::Info);
        // java 전용 이름은 다른 형식에서 인식되지 않음
        assert_eq!(norm("severe", LogFormat::Syslog), LogLevel::Info);
    }

    #[test]
    fn overrides_take_precedence() {
        let mut overrides = HashMap::new();
        overrides.insert("notice".to_owned(), LogLevel::Warn);
        overrides.insert("error".to_owned(), LogLevel::Fatal);
        assert_eq!(
            normalize("NOTICE", LogFormat::Syslog, &overrides),
            LogLevel::Warn
        );
        assert_eq!(
            normalize("error", LogFormat::Syslog, &overrides),
            LogLevel::Fatal
        );
    }

    #[test]
    fn recognize_rejects_unknown() {
        assert_eq!(recognize("boom", LogFormat::Plain), None);
        assert_eq!(recognize("INFO", LogFormat::Plain), Some(LogLevel::Info));
    }
}
