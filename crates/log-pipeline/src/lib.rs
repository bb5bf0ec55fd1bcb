#![doc = include_str!("../README.md")]
//!
//! # 모듈 구성
//!
//! - [`capture`]: 파일, tail, 프로세스 출력, 바이트 스트림, 소켓에서 원시 라인 수집
//! - [`parser`]: 형식별 파서와 multiline 블록 처리
//! - [`filter`]: 중첩 규칙 트리와 프리셋 기반 필터
//! - [`aggregator`]: 여러 프로세스의 로그 집계 (merge/group/correlate/window/sample)
//! - [`streamer`]: 백프레셔를 고려한 배치 스트리밍
//! - [`story`]: 로그를 서사형 리포트로 렌더링
//! - [`pipeline`]: 전체 파이프라인 오케스트레이션 (Pipeline trait 구현)
//! - [`config`]: 파이프라인 설정 (core 설정 변환)
//! - [`error`]: 도메인 에러 타입

pub mod aggregator;
pub mod capture;
pub mod config;
pub mod error;
pub mod filter;
pub mod parser;
pub mod pipeline;
pub mod story;
pub mod streamer;

// --- 주요 타입 re-export ---

// 파이프라인
pub use pipeline::{LogPipeline, LogPipelineBuilder};

// 설정
pub use config::{PipelineConfig, PipelineConfigBuilder};

// 에러
pub use error::LogPipelineError;

// 수집
pub use capture::{CaptureConfig, CaptureEvent, CaptureSource, LogCapture};

// 파서
pub use parser::{LogParser, ParserConfig};

// 필터
pub use filter::{FilterConfig, FilterPreset, LogFilter};

// 집계
pub use aggregator::{AggregatedResult, AggregationStrategy, AggregatorConfig, LogAggregator};

// 스트리밍
pub use streamer::{Destination, LogStreamer, StreamRecord, StreamerConfig};

// 스토리
pub use story::{ReportFormat, StoryReporter};
