//! 파일 소스 -- 파일을 끝까지 읽고 종료합니다.
//!
//! 읽기 도중 실패하면 이미 내보낸 위치부터 다시 읽으므로
//! 재시도해도 라인이 중복되지 않습니다.

use std::io::SeekFrom;
use std::path::PathBuf;

use serde_json::{Map, Value};
use tokio::fs::File;
use tokio::io::AsyncSeekExt;

use super::lines::{LineSplitter, Pump, pump};
use super::{SourceContext, SourceExit, SourceFailure};

/// 파일 소스 설정
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSource {
    /// 읽을 파일 경로
    pub path: PathBuf,
}

impl FileSource {
    /// 새 파일 소스를 생성합니다.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

pub(super) async fn run(
    source: &FileSource,
    ctx: &SourceContext,
    offset: &mut u64,
) -> Result<SourceExit, SourceFailure> {
    let mut file = File::open(&source.path)
        .await
        .map_err(|e| SourceFailure::retryable(format!("failed to open {}: {e}", source.path.display())))?;
    if *offset > 0 {
        file.seek(SeekFrom::Start(*offset))
            .await
            .map_err(SourceFailure::retryable)?;
    }

    let mut metadata = Map::new();
    metadata.insert(
        "path".to_owned(),
        Value::from(source.path.display().to_string()),
    );

    let mut splitter = LineSplitter::new(ctx.max_line_length);
    let result = pump(&mut file, &mut splitter, ctx, &metadata, None).await;
    *offset += splitter.consumed();

    match result {
        Ok(Pump::Eof) => {
            if let Some(rest) = splitter.finish() {
                if !ctx.emit(rest, metadata).await {
                    return Ok(SourceExit::Cancelled);
                }
            }
            Ok(SourceExit::Completed)
        }
        Ok(Pump::Stopped | Pump::Idle) => Ok(SourceExit::Cancelled),
        Err(e) => Err(SourceFailure::retryable(format!(
            "failed to read {}: {e}",
            source.path.display()
        ))),
    }
}
