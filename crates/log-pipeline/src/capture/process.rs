//! 프로세스 소스 -- 외부 프로세스의 stdout/stderr를 라인 단위로 캡처합니다.
//!
//! 두 스트림은 동시에 읽으며, 각 라인의 `metadata.stream`에 출처를 기록합니다.
//! 중지 시 자식 프로세스를 종료합니다.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;

use serde_json::{Map, Value};
use tokio::io::AsyncRead;
use tokio::process::Command;
use tracing::{debug, warn};

use super::lines::{LineSplitter, Pump, pump};
use super::{CaptureEvent, SourceContext, SourceExit, SourceFailure};
use crate::error::LogPipelineError;

/// 프로세스 소스 설정
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSource {
    /// 실행할 명령
    pub command: String,
    /// 인자
    pub args: Vec<String>,
    /// 작업 디렉토리
    pub cwd: Option<PathBuf>,
    /// 추가 환경 변수
    pub env: BTreeMap<String, String>,
    /// stderr도 캡처할지 여부
    pub capture_stderr: bool,
}

impl ProcessSource {
    /// 새 프로세스 소스를 생성합니다.
    pub fn new<I, S>(command: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            command: command.into(),
            args: args.into_iter().map(Into::into).collect(),
            cwd: None,
            env: BTreeMap::new(),
            capture_stderr: true,
        }
    }

    pub(super) fn validate(&self) -> Result<(), LogPipelineError> {
        if self.command.trim().is_empty() {
            return Err(LogPipelineError::config(
                "capture.process.command",
                "command must not be empty",
            ));
        }
        Ok(())
    }
}

pub(super) async fn run(
    source: &ProcessSource,
    ctx: &SourceContext,
) -> Result<SourceExit, SourceFailure> {
    let mut command = Command::new(&source.command);
    command
        .args(&source.args)
        .envs(&source.env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(if source.capture_stderr {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .kill_on_drop(true);
    if let Some(cwd) = &source.cwd {
        command.current_dir(cwd);
    }

    let mut child = command
        .spawn()
        .map_err(|e| SourceFailure::retryable(format!("failed to spawn '{}': {e}", source.command)))?;
    let pid = child.id();
    debug!(source = %ctx.id, pid, "process spawned");

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let (out, err) = tokio::join!(
        capture_stream(stdout, "stdout", pid, ctx),
        capture_stream(stderr, "stderr", pid, ctx),
    );

    let stopped = [out, err].contains(&Pump::Stopped);
    if stopped {
        if let Err(e) = child.kill().await {
            warn!(source = %ctx.id, error = %e, "failed to kill child process");
        }
        return Ok(SourceExit::Cancelled);
    }

    let status = tokio::select! {
        status = child.wait() => status.map_err(SourceFailure::fatal)?,
        _ = ctx.cancel.cancelled() => {
            if let Err(e) = child.kill().await {
                warn!(source = %ctx.id, error = %e, "failed to kill child process");
            }
            return Ok(SourceExit::Cancelled);
        }
    };

    debug!(source = %ctx.id, code = status.code(), "process exited");
    ctx.event(CaptureEvent::ProcessExited {
        source_id: ctx.id.clone(),
        code: status.code(),
    })
    .await;
    Ok(SourceExit::Completed)
}

/// 스트림 하나를 끝까지 읽습니다. 읽기 에러는 해당 스트림만 끝냅니다.
async fn capture_stream<R>(
    reader: Option<R>,
    name: &'static str,
    pid: Option<u32>,
    ctx: &SourceContext,
) -> Pump
where
    R: AsyncRead + Unpin,
{
    let Some(mut reader) = reader else {
        return Pump::Eof;
    };

    let mut metadata = Map::new();
    metadata.insert("stream".to_owned(), Value::from(name));
    if let Some(pid) = pid {
        metadata.insert("pid".to_owned(), Value::from(pid));
    }

    let mut splitter = LineSplitter::new(ctx.max_line_length);
    match pump(&mut reader, &mut splitter, ctx, &metadata, None).await {
        Ok(Pump::Eof) => {
            if let Some(rest) = splitter.finish()
                && !ctx.emit(rest, metadata).await
            {
                return Pump::Stopped;
            }
            Pump::Eof
        }
        Ok(other) => other,
        Err(e) => {
            warn!(source = %ctx.id, stream = name, error = %e, "failed to read process output");
            Pump::Eof
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::super::{CaptureConfig, CaptureEvent, CaptureSource, LogCapture};
    use super::*;
    use std::time::Duration;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn captures_stdout_and_stderr_with_exit_code() {
        let source = ProcessSource::new("sh", ["-c", "echo out; echo err 1>&2; exit 3"]);
        let (tx, mut rx) = mpsc::channel(16);
        let (etx, mut erx) = mpsc::channel(16);
        let mut capture = LogCapture::new(
            CaptureConfig {
                sources: vec![CaptureSource::process(source)],
                ..CaptureConfig::default()
            },
            tx,
        )
        .unwrap()
        .with_event_sender(etx);
        capture.start().unwrap();

        let mut lines = Vec::new();
        for _ in 0..2 {
            let line = rx.recv().await.unwrap();
            assert_eq!(line.source, "process:sh");
            lines.push((
                line.metadata["stream"].as_str().unwrap().to_owned(),
                line.content,
            ));
        }
        lines.sort();
        assert_eq!(
            lines,
            vec![
                ("stderr".to_owned(), "err".to_owned()),
                ("stdout".to_owned(), "out".to_owned()),
            ]
        );

        let mut exit_code = None;
        while let Ok(Some(event)) = tokio::time::timeout(Duration::from_secs(5), erx.recv()).await {
            match event {
                CaptureEvent::ProcessExited { code, .. } => exit_code = code,
                CaptureEvent::SourceCompleted { lines, .. } => {
                    assert_eq!(lines, 2);
                    break;
                }
                _ => {}
            }
        }
        assert_eq!(exit_code, Some(3));
        capture.stop().await;
    }

    #[tokio::test]
    async fn stop_kills_long_running_child() {
        let source = ProcessSource::new("sh", ["-c", "echo ready; sleep 30"]);
        let (tx, mut rx) = mpsc::channel(16);
        let mut capture = LogCapture::new(
            CaptureConfig {
                sources: vec![CaptureSource::process(source)],
                ..CaptureConfig::default()
            },
            tx,
        )
        .unwrap();
        capture.start().unwrap();
        assert_eq!(rx.recv().await.unwrap().content, "ready");

        tokio::time::timeout(Duration::from_secs(3), capture.stop())
            .await
            .unwrap();
        assert!(!capture.is_active());
    }
}
