//! 메트릭 상수 및 설명 등록
//!
//! 모든 메트릭의 이름과 설명을 중앙에서 정의합니다.
//! 각 모듈은 이 상수를 사용하여 `metrics::counter!()`, `metrics::gauge!()`,
//! `metrics::histogram!()` 매크로를 호출합니다.
//! 레코더(exporter)는 설치하지 않습니다. 임베딩 애플리케이션이 필요하면 설치합니다.
//!
//! # 네이밍 컨벤션
//!
//! - 접두어: `logweave_`
//! - 컴포넌트명: `capture_`, `parser_`, `filter_`, `aggregator_`, `streamer_`, `story_`
//! - 접미어: `_total` (counter), `_seconds` (histogram/latency), 없음 (gauge)
//!
//! # 사용 예시
//!
//! ```ignore
//! use metrics::counter;
//!
//! counter!(logweave_core::metrics::CAPTURE_LINES_TOTAL).increment(1);
//! ```

// ─── 레이블 키 상수 ────────────────────────────────────────────────

/// 수집 소스 레이블 키
pub const LABEL_SOURCE: &str = "source";

/// 로그 형식 레이블 키 (json, syslog, ...)
pub const LABEL_FORMAT: &str = "format";

/// 스트리밍 목적지 레이블 키 (console, file, http, websocket, custom)
pub const LABEL_DESTINATION: &str = "destination";

/// 집계 전략 레이블 키 (merge, group, correlate, window, sample)
pub const LABEL_STRATEGY: &str = "strategy";

// ─── Capture 메트릭 ─────────────────────────────────────────────────

/// Capture: 수집된 전체 라인 수 (counter, label: source)
pub const CAPTURE_LINES_TOTAL: &str = "logweave_capture_lines_total";

/// Capture: 재시도 소진으로 실패한 소스 수 (counter)
pub const CAPTURE_SOURCE_FAILURES_TOTAL: &str = "logweave_capture_source_failures_total";

/// Capture: 버퍼 상한으로 밀려난 라인 수 (counter)
pub const CAPTURE_BUFFER_EVICTED_TOTAL: &str = "logweave_capture_buffer_evicted_total";

/// Capture: 현재 실행 중인 소스 수 (gauge)
pub const CAPTURE_ACTIVE_SOURCES: &str = "logweave_capture_active_sources";

// ─── Parser 메트릭 ──────────────────────────────────────────────────

/// Parser: 생성된 레코드 수 (counter, label: format)
pub const PARSER_RECORDS_TOTAL: &str = "logweave_parser_records_total";

/// Parser: plain 레코드로 강등된 라인 수 (counter, label: format)
pub const PARSER_DEGRADED_TOTAL: &str = "logweave_parser_degraded_total";

// ─── Filter 메트릭 ──────────────────────────────────────────────────

/// Filter: 통과한 레코드 수 (counter)
pub const FILTER_MATCHED_TOTAL: &str = "logweave_filter_matched_total";

/// Filter: 거부된 레코드 수 (counter)
pub const FILTER_REJECTED_TOTAL: &str = "logweave_filter_rejected_total";

// ─── Aggregator 메트릭 ──────────────────────────────────────────────

/// Aggregator: 추가된 로그 수 (counter)
pub const AGGREGATOR_LOGS_TOTAL: &str = "logweave_aggregator_logs_total";

/// Aggregator: 추적 중인 프로세스 수 (gauge)
pub const AGGREGATOR_PROCESSES: &str = "logweave_aggregator_processes";

/// Aggregator: 실행된 집계 수 (counter, label: strategy)
pub const AGGREGATOR_AGGREGATIONS_TOTAL: &str = "logweave_aggregator_aggregations_total";

// ─── Streamer 메트릭 ────────────────────────────────────────────────

/// Streamer: 수락된 레코드 수 (counter)
pub const STREAMER_RECORDS_TOTAL: &str = "logweave_streamer_records_total";

/// Streamer: drop 전략으로 버려진 레코드 수 (counter)
pub const STREAMER_DROPPED_TOTAL: &str = "logweave_streamer_dropped_total";

/// Streamer: pause/ceiling으로 거부된 레코드 수 (counter)
pub const STREAMER_REJECTED_TOTAL: &str = "logweave_streamer_rejected_total";

/// Streamer: 목적지로 전송된 바이트 수 (counter)
pub const STREAMER_BYTES_TOTAL: &str = "logweave_streamer_bytes_total";

/// Streamer: 목적지별 쓰기 실패 수 (counter, label: destination)
pub const STREAMER_DESTINATION_ERRORS_TOTAL: &str = "logweave_streamer_destination_errors_total";

/// Streamer: 배치 플러시 소요 시간 (histogram, 초)
pub const STREAMER_FLUSH_DURATION_SECONDS: &str = "logweave_streamer_flush_duration_seconds";

/// Streamer: 버퍼 내 대기 레코드 수 (gauge)
pub const STREAMER_BUFFER_SIZE: &str = "logweave_streamer_buffer_size";

// ─── StoryReporter 메트릭 ───────────────────────────────────────────

/// StoryReporter: 렌더링된 리포트 수 (counter, label: format)
pub const STORY_REPORTS_RENDERED_TOTAL: &str = "logweave_story_reports_rendered_total";

// ─── Daemon 메트릭 ──────────────────────────────────────────────────

/// Daemon: 빌드 정보 (gauge, 항상 1, label: version)
pub const DAEMON_BUILD_INFO: &str = "logweave_daemon_build_info";

/// Daemon: 시작 이후 경과 시간 (gauge, 초)
pub const DAEMON_UPTIME_SECONDS: &str = "logweave_daemon_uptime_seconds";

// ─── 히스토그램 버킷 정의 ────────────────────────────────────────────

/// 플러시 소요 시간 히스토그램 버킷 (초)
///
/// 100us ~ 10s 범위 (HTTP/WebSocket 목적지는 네트워크 I/O 포함)
pub const FLUSH_DURATION_BUCKETS: [f64; 10] = [
    0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 10.0,
];

// ─── 설명 등록 함수 ─────────────────────────────────────────────────

/// 모든 메트릭의 설명(description)을 등록합니다.
///
/// 레코더가 설치되지 않았으면 아무 효과가 없습니다.
pub fn describe_all() {
    use metrics::{describe_counter, describe_gauge, describe_histogram};

    // Capture
    describe_counter!(
        CAPTURE_LINES_TOTAL,
        "Total number of raw lines captured from all sources"
    );
    describe_counter!(
        CAPTURE_SOURCE_FAILURES_TOTAL,
        "Total number of capture sources that failed after exhausting retries"
    );
    describe_counter!(
        CAPTURE_BUFFER_EVICTED_TOTAL,
        "Total number of lines evicted from the capture buffer"
    );
    describe_gauge!(
        CAPTURE_ACTIVE_SOURCES,
        "Number of capture sources currently running"
    );

    // Parser
    describe_counter!(
        PARSER_RECORDS_TOTAL,
        "Total number of structured records produced by the parser"
    );
    describe_counter!(
        PARSER_DEGRADED_TOTAL,
        "Total number of lines that degraded to plain records"
    );

    // Filter
    describe_counter!(FILTER_MATCHED_TOTAL, "Total number of records passing the filter");
    describe_counter!(
        FILTER_REJECTED_TOTAL,
        "Total number of records rejected by the filter"
    );

    // Aggregator
    describe_counter!(
        AGGREGATOR_LOGS_TOTAL,
        "Total number of records added to the aggregator"
    );
    describe_gauge!(
        AGGREGATOR_PROCESSES,
        "Number of processes currently tracked by the aggregator"
    );
    describe_counter!(
        AGGREGATOR_AGGREGATIONS_TOTAL,
        "Total number of aggregation snapshots computed"
    );

    // Streamer
    describe_counter!(
        STREAMER_RECORDS_TOTAL,
        "Total number of records accepted by the streamer"
    );
    describe_counter!(
        STREAMER_DROPPED_TOTAL,
        "Total number of records dropped under the drop backpressure strategy"
    );
    describe_counter!(
        STREAMER_REJECTED_TOTAL,
        "Total number of records rejected under pause or the buffer ceiling"
    );
    describe_counter!(STREAMER_BYTES_TOTAL, "Total bytes written to destinations");
    describe_counter!(
        STREAMER_DESTINATION_ERRORS_TOTAL,
        "Total number of failed destination writes"
    );
    describe_histogram!(
        STREAMER_FLUSH_DURATION_SECONDS,
        "Time to flush a single batch to all destinations in seconds"
    );
    describe_gauge!(
        STREAMER_BUFFER_SIZE,
        "Current number of records waiting in the stream buffer"
    );

    // StoryReporter
    describe_counter!(
        STORY_REPORTS_RENDERED_TOTAL,
        "Total number of story reports rendered"
    );

    // Daemon
    describe_gauge!(DAEMON_BUILD_INFO, "Daemon build information (always 1)");
    describe_gauge!(DAEMON_UPTIME_SECONDS, "Seconds since the daemon started");
}
