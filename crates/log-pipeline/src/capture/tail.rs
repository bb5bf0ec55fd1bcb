//! tail 소스 -- 파일 끝에 추가되는 라인을 따라갑니다.
//!
//! # 로테이션 감지
//! - inode 변경 감지 (logrotate 등, Unix 전용)
//! - 파일 크기 축소 감지 (truncation)
//! - 새 파일을 처음부터 다시 열기

use std::io::SeekFrom;
use std::path::PathBuf;
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::fs::File;
use tokio::io::AsyncSeekExt;
use tracing::{debug, info};

use super::lines::{LineSplitter, Pump, pump};
use super::{SourceContext, SourceExit, SourceFailure};
use crate::error::LogPipelineError;

/// tail 소스 설정
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TailSource {
    /// 감시할 파일 경로
    pub path: PathBuf,
    /// EOF 이후에도 새 쓰기를 계속 따라갈지 여부
    pub follow: bool,
    /// 처음부터 읽을지 여부 (`false`면 현재 끝에서 시작)
    pub from_beginning: bool,
    /// 파일 상태 체크 주기
    pub poll_interval: Duration,
}

impl TailSource {
    /// 기본 설정(follow, 끝에서 시작, 250ms 폴링)으로 생성합니다.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            follow: true,
            from_beginning: false,
            poll_interval: Duration::from_millis(250),
        }
    }

    /// 처음부터 읽도록 설정합니다.
    pub fn from_beginning(mut self) -> Self {
        self.from_beginning = true;
        self
    }

    /// follow 여부를 설정합니다.
    pub fn follow(mut self, follow: bool) -> Self {
        self.follow = follow;
        self
    }

    pub(super) fn validate(&self) -> Result<(), LogPipelineError> {
        if self.poll_interval.is_zero() {
            return Err(LogPipelineError::config(
                "capture.tail.poll_interval",
                "must be greater than 0",
            ));
        }
        Ok(())
    }
}

/// 재시도 사이에 유지되는 tail 위치
#[derive(Debug, Default)]
pub(super) struct TailProgress {
    /// 다음에 읽을 바이트 오프셋. `None`이면 아직 파일을 연 적 없음
    position: Option<u64>,
    inode: Option<u64>,
}

pub(super) async fn run(
    source: &TailSource,
    ctx: &SourceContext,
    progress: &mut TailProgress,
) -> Result<SourceExit, SourceFailure> {
    let mut metadata = Map::new();
    metadata.insert(
        "path".to_owned(),
        Value::from(source.path.display().to_string()),
    );

    let (mut file, mut position) = open_at(source, progress).await?;
    let mut splitter = LineSplitter::new(ctx.max_line_length);

    loop {
        let read_before = splitter.read_total();
        let result = pump(&mut file, &mut splitter, ctx, &metadata, None).await;
        position += splitter.read_total() - read_before;
        progress.position = Some(position);

        match result {
            Ok(Pump::Eof) => {}
            Ok(Pump::Stopped | Pump::Idle) => return Ok(SourceExit::Cancelled),
            Err(e) => {
                // 부분 라인은 재시도에서 다시 읽음
                progress.position = Some(position - pending(&splitter));
                return Err(SourceFailure::retryable(format!(
                    "failed to read {}: {e}",
                    source.path.display()
                )));
            }
        }

        if !source.follow {
            if let Some(rest) = splitter.finish()
                && !ctx.emit(rest, metadata).await
            {
                return Ok(SourceExit::Cancelled);
            }
            return Ok(SourceExit::Completed);
        }

        tokio::select! {
            _ = tokio::time::sleep(source.poll_interval) => {}
            _ = ctx.cancel.cancelled() => return Ok(SourceExit::Cancelled),
        }

        let meta = match tokio::fs::metadata(&source.path).await {
            Ok(meta) => meta,
            Err(e) => {
                // 로테이션 도중에는 잠시 파일이 없을 수 있음
                debug!(path = %source.path.display(), error = %e, "tail target unavailable");
                continue;
            }
        };

        let rotated = inode_of(&meta).is_some_and(|ino| Some(ino) != progress.inode);
        let truncated = meta.len() < position;
        if rotated || truncated {
            info!(
                path = %source.path.display(),
                rotated,
                truncated,
                "tail target rotated, reopening from start"
            );
            if let Some(rest) = splitter.finish()
                && !ctx.emit(rest, metadata.clone()).await
            {
                return Ok(SourceExit::Cancelled);
            }
            progress.position = Some(0);
            let (reopened, start) = open_at(source, progress).await?;
            file = reopened;
            position = start;
        }
    }
}

/// 파일을 열고 이어 읽을 위치로 이동합니다.
async fn open_at(
    source: &TailSource,
    progress: &mut TailProgress,
) -> Result<(File, u64), SourceFailure> {
    let mut file = File::open(&source.path).await.map_err(|e| {
        SourceFailure::retryable(format!("failed to open {}: {e}", source.path.display()))
    })?;
    let meta = file.metadata().await.map_err(SourceFailure::retryable)?;
    let inode = inode_of(&meta);

    let start = match progress.position {
        // 다른 파일로 바뀌었거나 잘렸으면 처음부터
        Some(pos) if inode == progress.inode && pos <= meta.len() => pos,
        Some(_) => 0,
        None if source.from_beginning => 0,
        None => meta.len(),
    };

    file.seek(SeekFrom::Start(start))
        .await
        .map_err(SourceFailure::retryable)?;
    progress.inode = inode;
    progress.position = Some(start);
    Ok((file, start))
}

fn pending(splitter: &LineSplitter) -> u64 {
    splitter.read_total() - splitter.consumed()
}

#[cfg(unix)]
fn inode_of(meta: &std::fs::Metadata) -> Option<u64> {
    use std::os::unix::fs::MetadataExt;
    Some(meta.ino())
}

#[cfg(not(unix))]
fn inode_of(_meta: &std::fs::Metadata) -> Option<u64> {
    None
}

#[cfg(test)]
mod tests {
    use super::super::{CaptureConfig, CaptureSource, LogCapture, SourceKind};
    use super::*;
    use std::io::Write;
    use tokio::sync::mpsc;

    fn capture_for(source: TailSource, tx: mpsc::Sender<logweave_core::types::RawLine>) -> LogCapture {
        let config = CaptureConfig {
            sources: vec![CaptureSource::new("tail:test", SourceKind::Tail(source))],
            ..CaptureConfig::default()
        };
        LogCapture::new(config, tx).unwrap()
    }

    async fn next(rx: &mut mpsc::Receiver<logweave_core::types::RawLine>) -> String {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap()
            .content
    }

    fn fast(path: &std::path::Path) -> TailSource {
        TailSource {
            poll_interval: Duration::from_millis(20),
            ..TailSource::new(path)
        }
    }

    #[tokio::test]
    async fn follows_appended_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(&path, "old line\n").unwrap();

        let (tx, mut rx) = mpsc::channel(16);
        let mut capture = capture_for(fast(&path), tx);
        capture.start().unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(file, "new line").unwrap();
        write!(file, "partial").unwrap();
        file.flush().unwrap();

        assert_eq!(next(&mut rx).await, "new line");
        writeln!(file, " done").unwrap();
        assert_eq!(next(&mut rx).await, "partial done");
        capture.stop().await;
    }

    #[tokio::test]
    async fn from_beginning_without_follow_completes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(&path, "a\nb").unwrap();

        let (tx, mut rx) = mpsc::channel(16);
        let mut capture = capture_for(fast(&path).from_beginning().follow(false), tx);
        capture.start().unwrap();
        assert_eq!(next(&mut rx).await, "a");
        assert_eq!(next(&mut rx).await, "b");
        capture.stop().await;
    }

    #[tokio::test]
    async fn truncation_restarts_from_beginning() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(&path, "").unwrap();

        let (tx, mut rx) = mpsc::channel(16);
        let mut capture = capture_for(fast(&path).from_beginning(), tx);
        capture.start().unwrap();

        std::fs::write(&path, "a fairly long first line\n").unwrap();
        assert_eq!(next(&mut rx).await, "a fairly long first line");

        tokio::time::sleep(Duration::from_millis(100)).await;
        std::fs::write(&path, "short\n").unwrap();
        assert_eq!(next(&mut rx).await, "short");
        capture.stop().await;
    }
}
