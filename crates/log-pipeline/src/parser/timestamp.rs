//! 타임스탬프 파싱
//!
//! 사용자 지정 형식(`timestamp_format`, chrono strftime 문법)을 먼저 시도하고,
//! 실패하면 흔한 로그 타임스탬프 형식을 순서대로 시도합니다.
//! 타임존 정보가 없는 시각은 UTC로 간주합니다.

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, TimeZone, Utc};

/// 타임존을 포함하는 형식
const ZONED_FORMATS: &[&str] = &[
    // apache/nginx access: 10/Oct/2000:13:55:36 -0700
    "%d/%b/%Y:%H:%M:%S %z",
    "%Y-%m-%d %H:%M:%S%.f %z",
    "%Y-%m-%dT%H:%M:%S%.f%z",
];

/// 타임존이 없는 형식 (UTC로 간주)
const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    // python/log4j: 2024-01-15 12:00:00,123
    "%Y-%m-%d %H:%M:%S,%3f",
    "%Y-%m-%dT%H:%M:%S,%3f",
    // nginx error: 2024/01/15 12:00:00
    "%Y/%m/%d %H:%M:%S",
    // apache error: Wed Oct 11 14:32:52.123456 2000
    "%a %b %d %H:%M:%S%.f %Y",
    "%a %b %e %H:%M:%S%.f %Y",
];

/// 문자열을 UTC 시각으로 파싱합니다.
pub(crate) fn parse_timestamp(text: &str, custom_format: Option<&str>) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    if let Some(format) = custom_format
        && let Some(ts) = parse_with_format(text, format)
    {
        return Some(ts);
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }

    for format in ZONED_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(text, format) {
            return Some(dt.with_timezone(&Utc));
        }
    }

    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }

    parse_bsd(text).or_else(|| {
        text.parse::<f64>().ok().and_then(from_epoch)
    })
}

/// BSD syslog 타임스탬프(`Jan 15 12:00:00`)를 파싱합니다.
///
/// 연도 정보가 없으므로 현재 연도를 가정합니다.
pub(crate) fn parse_bsd(text: &str) -> Option<DateTime<Utc>> {
    let current_year = Utc::now().year();
    // 한 자리 날짜는 공백 두 개로 정렬됨 (Jan  5)
    let normalized = text.split_whitespace().collect::<Vec<_>>().join(" ");
    let with_year = format!("{current_year} {normalized}");
    NaiveDateTime::parse_from_str(&with_year, "%Y %b %d %H:%M:%S")
        .ok()
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// 유닉스 epoch 값을 시각으로 변환합니다.
///
/// 1e12 이상이면 밀리초, 그 미만이면 초로 해석합니다.
pub(crate) fn from_epoch(value: f64) -> Option<DateTime<Utc>> {
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    let millis = if value >= 1e12 { value } else { value * 1000.0 };
    DateTime::from_timestamp_millis(millis.round() as i64)
}

fn parse_with_format(text: &str, format: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_str(text, format) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
        return Some(Utc.from_utc_datetime(&naive));
    }
    NaiveDate::parse_from_str(text, format)
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    fn utc(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn rfc3339_variants() {
        assert_eq!(
            parse_timestamp("2024-01-01T00:00:00Z", None),
            Some(utc("2024-01-01T00:00:00Z"))
        );
        assert_eq!(
            parse_timestamp("2024-01-15T12:00:00.123+09:00", None),
            Some(utc("2024-01-15T03:00:00.123Z"))
        );
    }

    #[test]
    fn access_log_timestamp() {
        assert_eq!(
            parse_timestamp("10/Oct/2000:13:55:36 -0700", None),
            Some(utc("2000-10-10T20:55:36Z"))
        );
    }

    #[test]
    fn python_comma_millis() {
        let ts = parse_timestamp("2024-01-15 12:00:00,250", None).unwrap();
        assert_eq!(ts, utc("2024-01-15T12:00:00.250Z"));
    }

    #[test]
    fn nginx_error_and_apache_error() {
        assert_eq!(
            parse_timestamp("2024/01/15 12:00:00", None),
            Some(utc("2024-01-15T12:00:00Z"))
        );
        assert_eq!(
            parse_timestamp("Wed Oct 11 14:32:52.123456 2000", None).map(|t| t.second()),
            Some(52)
        );
    }

    #[test]
    fn bsd_timestamp_assumes_current_year() {
        let ts = parse_bsd("Jan  5 08:15:00").unwrap();
        assert_eq!(ts.year(), Utc::now().year());
        assert_eq!(ts.day(), 5);
    }

    #[test]
    fn custom_format_wins() {
        let ts = parse_timestamp("15.01.2024 12:30", Some("%d.%m.%Y %H:%M")).unwrap();
        assert_eq!(ts, utc("2024-01-15T12:30:00Z"));
    }

    #[test]
    fn epoch_seconds_and_millis() {
        assert_eq!(from_epoch(1_700_000_000.0), Some(utc("2023-11-14T22:13:20Z")));
        assert_eq!(
            from_epoch(1_700_000_000_000.0),
            Some(utc("2023-11-14T22:13:20Z"))
        );
        assert_eq!(from_epoch(-1.0), None);
    }

    #[test]
    fn garbage_is_none() {
        assert_eq!(parse_timestamp("not a time", None), None);
        assert_eq!(parse_timestamp("", None), None);
    }
}
