//! 로그 파서 벤치마크
//!
//! 형식별 파서의 단건 처리량과 multiline 블록 조립 비용을 측정합니다.

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use logweave_core::types::LogFormat;
use logweave_pipeline::parser::MultilineConfig;
use logweave_pipeline::{LogParser, ParserConfig};

/// Syslog RFC5424 짧은 메시지 (structured data 없음)
const SYSLOG_5424_SHORT: &str =
    "<34>1 2024-01-15T12:00:00Z myhost sshd 1234 - - Failed password for root";

/// Syslog RFC5424 긴 메시지 (structured data 포함)
const SYSLOG_5424_LONG: &str = "<34>1 2024-01-15T12:00:00.123456Z web-server-01 nginx 5678 ID123 [request user=\"admin\" path=\"/api/v1/users\" method=\"POST\" status=\"403\"][performance time=\"125ms\" cpu=\"45%\"] Unauthorized API access attempt from 192.168.1.100 to restricted endpoint /api/v1/users";

/// Syslog RFC3164 메시지
const SYSLOG_3164: &str = "<34>Jan 15 12:00:00 myhost sshd[1234]: Failed password for root";

/// ISO 타임스탬프 + 레벨 형식
const SYSLOG_ISO: &str = "2024-01-15T12:00:00Z ERROR payment gateway timeout";

/// JSON 짧은 메시지
const JSON_SHORT: &str = r#"{"timestamp":"2024-01-15T12:00:00Z","host":"web-01","message":"request processed","level":"info"}"#;

/// JSON 긴 메시지 (중첩 객체 포함)
const JSON_LONG: &str = r#"{"timestamp":"2024-01-15T12:00:00.123456Z","service":"api-gateway","message":"API request completed","level":"info","request_id":"550e8400-e29b-41d4-a716-446655440000","duration_ms":245,"http":{"method":"POST","path":"/api/v1/users/create","status":201},"metadata":{"region":"us-east-1","environment":"production"}}"#;

/// Nginx combined 로그
const NGINX: &str = r#"192.168.1.10 - - [15/Jan/2024:12:00:00 +0000] "GET /index.html HTTP/1.1" 200 1024 "-" "curl/8.0""#;

/// key=value 구조화 로그
const STRUCTURED: &str =
    r#"ts=2024-01-15T12:00:00Z level=warn msg="cache miss" key=user:42 latency_ms=12"#;

fn parser(format: LogFormat) -> LogParser {
    LogParser::new(ParserConfig::new(format)).expect("valid parser config")
}

fn bench_syslog(c: &mut Criterion) {
    let mut p = parser(LogFormat::Syslog);
    let mut group = c.benchmark_group("syslog");
    group.throughput(Throughput::Elements(1));

    for (name, line) in [
        ("rfc5424_short", SYSLOG_5424_SHORT),
        ("rfc5424_long", SYSLOG_5424_LONG),
        ("rfc3164", SYSLOG_3164),
        ("iso_level", SYSLOG_ISO),
    ] {
        group.bench_function(name, |b| b.iter(|| p.parse(black_box(line))));
    }

    group.finish();
}

fn bench_json(c: &mut Criterion) {
    let mut p = parser(LogFormat::Json);
    let mut group = c.benchmark_group("json");
    group.throughput(Throughput::Elements(1));

    group.bench_function("short", |b| b.iter(|| p.parse(black_box(JSON_SHORT))));
    group.bench_function("long_nested", |b| b.iter(|| p.parse(black_box(JSON_LONG))));

    // 1000건 반복 처리량
    group.throughput(Throughput::Elements(1000));
    group.bench_function("throughput_1000", |b| {
        b.iter(|| {
            for _ in 0..1000 {
                p.parse(black_box(JSON_SHORT));
            }
        })
    });

    group.finish();
}

fn bench_parser_comparison(c: &mut Criterion) {
    let mut group = c.benchmark_group("parser_comparison");
    group.throughput(Throughput::Elements(1000));

    for (format, line) in [
        (LogFormat::Syslog, SYSLOG_5424_SHORT),
        (LogFormat::Json, JSON_SHORT),
        (LogFormat::Nginx, NGINX),
        (LogFormat::Structured, STRUCTURED),
        (LogFormat::Plain, SYSLOG_ISO),
    ] {
        let mut p = parser(format);
        group.bench_with_input(
            BenchmarkId::new("format", format.as_str()),
            &line,
            |b, &input| {
                b.iter(|| {
                    for _ in 0..1000 {
                        p.parse(black_box(input));
                    }
                })
            },
        );
    }

    group.finish();
}

fn bench_multiline(c: &mut Criterion) {
    let mut group = c.benchmark_group("multiline");

    for frames in [5usize, 50] {
        let mut lines = vec!["Traceback (most recent call last):".to_owned()];
        lines.extend((0..frames).map(|i| format!("  File \"mod{i}.py\", line {i}, in handler")));
        lines.push("next record".to_owned());

        let config =
            ParserConfig::new(LogFormat::Plain).with_multiline(MultilineConfig::new("^Traceback"));
        let mut p = LogParser::new(config).expect("valid multiline config");

        group.throughput(Throughput::Elements(lines.len() as u64));
        group.bench_with_input(BenchmarkId::new("stack_frames", frames), &lines, |b, lines| {
            b.iter(|| {
                let mut emitted = 0usize;
                for line in lines {
                    emitted += p.parse(black_box(line)).len();
                }
                emitted
            })
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_syslog,
    bench_json,
    bench_parser_comparison,
    bench_multiline
);
criterion_main!(benches);
