//! 로그 파이프라인 에러 타입
//!
//! [`LogPipelineError`]는 로그 파이프라인 내부에서 발생하는 모든 에러를 표현합니다.
//! `From<LogPipelineError> for LogweaveError` 변환이 구현되어 있어
//! 상위 레이어에서 `?` 연산자로 자연스럽게 전파할 수 있습니다.
//!
//! 파싱 실패는 에러가 아닙니다. 파싱할 수 없는 라인은 plain 레코드로 강등됩니다.

use logweave_core::error::{ConfigError, LogweaveError, PipelineError};

/// 로그 파이프라인 도메인 에러
#[derive(Debug, thiserror::Error)]
pub enum LogPipelineError {
    /// 설정 에러 (필터 깊이 초과, 잘못된 multiline 패턴 등). 생성 시점에 발생합니다.
    #[error("config error: {field}: {reason}")]
    Config {
        /// 설정 필드명
        field: String,
        /// 에러 사유
        reason: String,
    },

    /// 수집 소스 에러 (파일 열기/읽기, 프로세스 실행, 소켓 바인드 등)
    #[error("source error: {source_id}: {reason}")]
    Source {
        /// 소스 식별자
        source_id: String,
        /// 에러 사유
        reason: String,
    },

    /// 용량 초과 (프로세스 수 상한, 스트림 버퍼 상한)
    #[error("capacity exceeded: {resource}: limit {limit}")]
    Capacity {
        /// 자원 이름
        resource: String,
        /// 상한
        limit: usize,
    },

    /// 스트리밍 목적지 에러
    #[error("destination error: {destination}: {reason}")]
    Destination {
        /// 목적지 이름
        destination: String,
        /// 에러 사유
        reason: String,
    },

    /// 등록되지 않은 프로세스
    #[error("process not found: {0}")]
    ProcessNotFound(String),

    /// 이미 등록된 프로세스
    #[error("process already registered: {0}")]
    DuplicateProcess(String),

    /// 존재하지 않는 스토리
    #[error("story not found: {0}")]
    StoryNotFound(String),

    /// 이미 존재하는 스토리
    #[error("story already exists: {0}")]
    DuplicateStory(String),

    /// 필터 프리셋 파일 로딩 실패
    #[error("preset load error: {path}: {reason}")]
    PresetLoad {
        /// 프리셋 파일 경로
        path: String,
        /// 로딩 실패 사유
        reason: String,
    },

    /// 이미 실행 중인 컴포넌트를 다시 시작함
    #[error("{0} is already running")]
    AlreadyRunning(&'static str),

    /// 채널 통신 에러
    #[error("channel error: {0}")]
    Channel(String),

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// 정규식 컴파일 에러
    #[error("regex error: {0}")]
    Regex(#[from] regex::Error),

    /// JSON 직렬화 에러
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl LogPipelineError {
    /// 설정 에러를 생성합니다.
    pub(crate) fn config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Config {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

impl From<LogPipelineError> for LogweaveError {
    fn from(err: LogPipelineError) -> Self {
        match err {
            LogPipelineError::Config { field, reason } => {
                LogweaveError::Config(ConfigError::InvalidValue { field, reason })
            }
            LogPipelineError::Io(e) => LogweaveError::Io(e),
            LogPipelineError::AlreadyRunning(_) => {
                LogweaveError::Pipeline(PipelineError::AlreadyRunning)
            }
            LogPipelineError::Channel(reason) => {
                LogweaveError::Pipeline(PipelineError::ChannelSend(reason))
            }
            other => LogweaveError::Pipeline(PipelineError::InitFailed(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_error_display() {
        let err = LogPipelineError::Source {
            source_id: "file:/var/log/app.log".to_owned(),
            reason: "permission denied".to_owned(),
        };
        let msg = err.to_string();
        assert!(msg.contains("/var/log/app.log"));
        assert!(msg.contains("permission denied"));
    }

    #[test]
    fn capacity_error_display() {
        let err = LogPipelineError::Capacity {
            resource: "processes".to_owned(),
            limit: 64,
        };
        assert!(err.to_string().contains("64"));
    }

    #[test]
    fn config_error_converts_to_config_variant() {
        let err = LogPipelineError::config("filter.max_depth", "depth 12 exceeds 10");
        let top: LogweaveError = err.into();
        assert!(matches!(top, LogweaveError::Config(_)));
    }

    #[test]
    fn other_errors_convert_to_pipeline_variant() {
        let err = LogPipelineError::ProcessNotFound("worker-1".to_owned());
        let top: LogweaveError = err.into();
        assert!(matches!(top, LogweaveError::Pipeline(_)));
        assert!(top.to_string().contains("worker-1"));
    }
}
