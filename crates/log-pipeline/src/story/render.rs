//! 리포트 렌더링 -- `{{placeholder}}` 템플릿 치환

use std::borrow::Cow;
use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};

use super::types::{ReportFormat, ReportTemplates, StoryEvent, StoryReport, StorySummary};
use crate::error::LogPipelineError;

/// 형식별 기본 템플릿. JSON은 템플릿을 쓰지 않습니다.
pub(super) fn default_templates() -> HashMap<ReportFormat, ReportTemplates> {
    let mut templates = HashMap::new();
    templates.insert(
        ReportFormat::Markdown,
        ReportTemplates {
            header: "# {{title}}\n\n\
                     - **ID**: {{id}}\n\
                     - **Status**: {{status}}\n\
                     - **Start**: {{start}}\n\
                     - **End**: {{end}}\n\
                     - **Duration**: {{duration}}\n\n\
                     ## Events\n\n"
                .to_owned(),
            event: "- `{{timestamp}}` **{{TYPE}}** {{title}}{{description}}\n".to_owned(),
            footer: "\n## Summary\n\n\
                     | Total | Errors | Warnings | Successes | Actions |\n\
                     |-------|--------|----------|-----------|---------|\n\
                     | {{total}} | {{errors}} | {{warnings}} | {{successes}} | {{actions}} |\n"
                .to_owned(),
        },
    );
    templates.insert(
        ReportFormat::Html,
        ReportTemplates {
            header: "<!DOCTYPE html>\n<html>\n<head><meta charset=\"utf-8\"><title>{{title}}</title></head>\n\
                     <body>\n<h1>{{title}}</h1>\n\
                     <p class=\"meta\">{{id}} &middot; {{status}} &middot; {{start}} &ndash; {{end}} ({{duration}})</p>\n\
                     <ul class=\"events\">\n"
                .to_owned(),
            event: "<li class=\"event {{type}}\"><time>{{timestamp}}</time> <strong>{{TYPE}}</strong> {{title}}{{description}}</li>\n"
                .to_owned(),
            footer: "</ul>\n<p class=\"summary\">{{total}} events, {{errors}} errors, {{warnings}} warnings, {{successes}} successes</p>\n\
                     </body>\n</html>\n"
                .to_owned(),
        },
    );
    templates.insert(
        ReportFormat::Text,
        ReportTemplates {
            header: "{{title}} [{{id}}]\n\
                     Status:   {{status}}\n\
                     Started:  {{start}}\n\
                     Ended:    {{end}}\n\
                     Duration: {{duration}}\n\n"
                .to_owned(),
            event: "[{{timestamp}}] {{TYPE}}: {{title}}{{description}}\n".to_owned(),
            footer: "\nTotal: {{total}}, errors: {{errors}}, warnings: {{warnings}}, successes: {{successes}}\n"
                .to_owned(),
        },
    );
    templates.insert(
        ReportFormat::Timeline,
        ReportTemplates {
            header: "{{title}}\n{{start}}\n".to_owned(),
            event: "{{offset}} {{marker}} {{title}}\n".to_owned(),
            footer: "{{end}} ({{duration}})\n".to_owned(),
        },
    );
    templates.insert(
        ReportFormat::Summary,
        ReportTemplates {
            header: "{{title}} ({{status}}, {{duration}})\n".to_owned(),
            event: String::new(),
            footer: "events={{total}} errors={{errors}} warnings={{warnings}} \
                     successes={{successes}} actions={{actions}} avg_duration={{average_duration}}\n"
                .to_owned(),
        },
    );
    templates
}

/// 리포트를 렌더링합니다. `events`는 이미 범위/개수 제한이 적용된 목록입니다.
pub(super) fn render(
    story: &StoryReport,
    events: &[&StoryEvent],
    format: ReportFormat,
    templates: Option<&ReportTemplates>,
) -> Result<String, LogPipelineError> {
    let summary = StorySummary::from_events(events.iter().copied());

    if format == ReportFormat::Json {
        let report = serde_json::json!({
            "id": story.id,
            "title": story.title,
            "start_time": story.start_time,
            "end_time": story.end_time,
            "duration_ms": story.duration.map(millis),
            "status": status(story),
            "metadata": story.metadata,
            "events": events,
            "summary": summary,
        });
        return Ok(serde_json::to_string_pretty(&report)?);
    }

    let Some(templates) = templates else {
        return Err(LogPipelineError::config(
            "story.templates",
            format!("no templates for format '{format}'"),
        ));
    };
    let html = format == ReportFormat::Html;

    let story_values = story_values(story, &summary);
    let mut out = substitute(&templates.header, &story_values, html);
    if !templates.event.is_empty() {
        for event in events {
            let values = event_values(story.start_time, event, format);
            out.push_str(&substitute(&templates.event, &values, html));
        }
    }
    out.push_str(&substitute(&templates.footer, &story_values, html));
    Ok(out)
}

fn story_values<'a>(story: &'a StoryReport, summary: &StorySummary) -> HashMap<&'static str, Cow<'a, str>> {
    let mut values = HashMap::new();
    values.insert("title", Cow::Borrowed(story.title.as_str()));
    values.insert("id", Cow::Borrowed(story.id.as_str()));
    values.insert("status", Cow::Borrowed(status(story)));
    values.insert("start", Cow::Owned(timestamp(story.start_time)));
    values.insert(
        "end",
        Cow::Owned(story.end_time.map_or_else(|| "-".to_owned(), timestamp)),
    );
    values.insert(
        "duration",
        Cow::Owned(story.duration.map_or_else(|| "-".to_owned(), human_duration)),
    );
    values.insert("total", Cow::Owned(summary.total_events.to_string()));
    values.insert("errors", Cow::Owned(summary.errors.to_string()));
    values.insert("warnings", Cow::Owned(summary.warnings.to_string()));
    values.insert("successes", Cow::Owned(summary.successes.to_string()));
    values.insert("actions", Cow::Owned(summary.actions.to_string()));
    values.insert(
        "average_duration",
        Cow::Owned(
            summary
                .average_duration_ms
                .map_or_else(|| "-".to_owned(), |ms| format!("{ms:.1}ms")),
        ),
    );
    values
}

fn event_values<'a>(
    start: DateTime<Utc>,
    event: &'a StoryEvent,
    format: ReportFormat,
) -> HashMap<&'static str, Cow<'a, str>> {
    let mut values = HashMap::new();
    values.insert("id", Cow::Borrowed(event.id.as_str()));
    values.insert("timestamp", Cow::Owned(timestamp(event.timestamp)));
    values.insert("offset", Cow::Owned(offset(start, event.timestamp)));
    values.insert("type", Cow::Borrowed(event.event_type.as_str()));
    values.insert(
        "TYPE",
        Cow::Owned(event.event_type.as_str().to_ascii_uppercase()),
    );
    values.insert("marker", Cow::Borrowed(event.event_type.marker()));
    values.insert("title", Cow::Borrowed(event.title.as_str()));
    values.insert(
        "description",
        Cow::Owned(match &event.description {
            Some(d) if format == ReportFormat::Markdown => format!(" - {d}"),
            Some(d) => format!(": {d}"),
            None => String::new(),
        }),
    );
    values.insert(
        "duration",
        Cow::Owned(event.duration.map_or_else(String::new, human_duration)),
    );
    values
}

/// `{{name}}`을 값으로 치환합니다. 알 수 없는 자리표시자는 그대로 둡니다.
fn substitute(template: &str, values: &HashMap<&'static str, Cow<'_, str>>, html: bool) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find("{{") {
        out.push_str(&rest[..open]);
        let after = &rest[open + 2..];
        let Some(close) = after.find("}}") else {
            out.push_str(&rest[open..]);
            return out;
        };
        let key = after[..close].trim();
        match values.get(key) {
            Some(value) if html => out.push_str(&escape_html(value)),
            Some(value) => out.push_str(value),
            None => out.push_str(&rest[open..open + 2 + close + 2]),
        }
        rest = &after[close + 2..];
    }
    out.push_str(rest);
    out
}

fn escape_html(value: &str) -> Cow<'_, str> {
    if !value.contains(['&', '<', '>', '"', '\'']) {
        return Cow::Borrowed(value);
    }
    let mut out = String::with_capacity(value.len() + 8);
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    Cow::Owned(out)
}

fn status(story: &StoryReport) -> &'static str {
    if story.is_in_progress() {
        "in progress"
    } else {
        "completed"
    }
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// 스토리 시작 기준 상대 시각 (`+1.250s`)
fn offset(start: DateTime<Utc>, at: DateTime<Utc>) -> String {
    let ms = (at - start).num_milliseconds();
    let sign = if ms < 0 { "-" } else { "+" };
    let ms = ms.unsigned_abs();
    format!("{sign}{}.{:03}s", ms / 1_000, ms % 1_000)
}

fn human_duration(d: Duration) -> String {
    let ms = millis(d);
    if ms < 1_000 {
        format!("{ms}ms")
    } else if ms < 60_000 {
        format!("{:.2}s", ms as f64 / 1_000.0)
    } else {
        let secs = ms / 1_000;
        format!("{}m{:02}s", secs / 60, secs % 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(pairs: &[(&'static str, &'static str)]) -> HashMap<&'static str, Cow<'static, str>> {
        pairs.iter().map(|(k, v)| (*k, Cow::Borrowed(*v))).collect()
    }

    #[test]
    fn substitute_known_and_unknown_placeholders() {
        let v = values(&[("title", "Deploy"), ("id", "s1")]);
        assert_eq!(
            substitute("{{title}} ({{ id }}) {{missing}}", &v, false),
            "Deploy (s1) {{missing}}"
        );
        assert_eq!(substitute("open {{title", &v, false), "open {{title");
    }

    #[test]
    fn html_values_are_escaped() {
        let v = values(&[("title", "<b>&\"x\"")]);
        assert_eq!(
            substitute("<h1>{{title}}</h1>", &v, true),
            "<h1>&lt;b&gt;&amp;&quot;x&quot;</h1>"
        );
    }

    #[test]
    fn durations_and_offsets() {
        assert_eq!(human_duration(Duration::from_millis(250)), "250ms");
        assert_eq!(human_duration(Duration::from_millis(1_500)), "1.50s");
        assert_eq!(human_duration(Duration::from_secs(125)), "2m05s");

        let start = DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let later = start + chrono::TimeDelta::milliseconds(1_250);
        assert_eq!(offset(start, later), "+1.250s");
        assert_eq!(offset(later, start), "-1.250s");
    }

    #[test]
    fn every_text_format_has_default_templates() {
        let templates = default_templates();
        for format in ReportFormat::ALL {
            if format != ReportFormat::Json {
                assert!(templates.contains_key(&format), "missing {format}");
            }
        }
    }
}
