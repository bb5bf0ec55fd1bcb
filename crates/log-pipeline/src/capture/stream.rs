//! 바이트 스트림 소스 -- 임의의 `AsyncRead`를 라인 소스로 어댑트합니다.
//!
//! 스트림은 한 번만 소비할 수 있습니다. 두 번째 실행은 재시도 없이 실패합니다.

use std::fmt;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Map;
use tokio::io::AsyncRead;

use super::lines::{LineSplitter, Pump, pump};
use super::{SourceContext, SourceExit, SourceFailure};

type BoxedReader = Pin<Box<dyn AsyncRead + Send>>;

/// 바이트 스트림 소스
#[derive(Clone)]
pub struct ByteStreamSource {
    reader: Arc<Mutex<Option<BoxedReader>>>,
}

impl ByteStreamSource {
    /// 리더를 감싸 새 소스를 생성합니다.
    pub fn new(reader: impl AsyncRead + Send + 'static) -> Self {
        Self {
            reader: Arc::new(Mutex::new(Some(Box::pin(reader)))),
        }
    }

    /// 아직 소비되지 않았는지 확인합니다.
    pub fn is_available(&self) -> bool {
        self.reader
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    fn take(&self) -> Option<BoxedReader> {
        self.reader
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

impl fmt::Debug for ByteStreamSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ByteStreamSource")
            .field("available", &self.is_available())
            .finish()
    }
}

pub(super) async fn run(
    source: &ByteStreamSource,
    ctx: &SourceContext,
) -> Result<SourceExit, SourceFailure> {
    let mut reader = source
        .take()
        .ok_or_else(|| SourceFailure::fatal("byte stream already consumed"))?;

    let metadata = Map::new();
    let mut splitter = LineSplitter::new(ctx.max_line_length);
    match pump(&mut reader, &mut splitter, ctx, &metadata, None).await {
        Ok(Pump::Eof) => {
            if let Some(rest) = splitter.finish()
                && !ctx.emit(rest, metadata).await
            {
                return Ok(SourceExit::Cancelled);
            }
            Ok(SourceExit::Completed)
        }
        Ok(Pump::Stopped | Pump::Idle) => Ok(SourceExit::Cancelled),
        Err(e) => Err(SourceFailure::fatal(format!("failed to read byte stream: {e}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_consumes_once() {
        let source = ByteStreamSource::new(tokio::io::empty());
        let clone = source.clone();
        assert!(source.is_available());
        assert!(clone.take().is_some());
        assert!(!source.is_available());
        assert!(source.take().is_none());
        assert!(format!("{source:?}").contains("available: false"));
    }
}
