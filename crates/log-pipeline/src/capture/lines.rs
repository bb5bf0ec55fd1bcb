//! 바이트 스트림을 라인으로 분할
//!
//! 모든 스트림 기반 소스(파일, tail, 프로세스, 바이트 스트림, TCP)가 공유합니다.
//! 개행이 없는 채로 `max_line_length`를 넘는 데이터는 그 길이에서 잘라 한 줄로 냅니다.

use std::time::Duration;

use bytes::{Buf, BytesMut};
use serde_json::{Map, Value};
use tokio::io::{AsyncRead, AsyncReadExt};

use super::SourceContext;

const READ_CHUNK: usize = 8 * 1024;

/// `\n` 기준 라인 분할기 (`\r\n`도 허용)
#[derive(Debug)]
pub(crate) struct LineSplitter {
    buf: BytesMut,
    max_line_length: usize,
    /// 라인으로 내보낸 바이트 수 (개행 포함)
    consumed: u64,
    /// 읽어 들인 전체 바이트 수
    read_total: u64,
}

impl LineSplitter {
    pub(crate) fn new(max_line_length: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(READ_CHUNK),
            max_line_length: max_line_length.max(1),
            consumed: 0,
            read_total: 0,
        }
    }

    /// 다음 완성된 라인을 꺼냅니다.
    pub(crate) fn next_line(&mut self) -> Option<String> {
        if let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            if pos <= self.max_line_length {
                let line = self.buf.split_to(pos);
                self.buf.advance(1);
                self.consumed += pos as u64 + 1;
                return Some(decode(&line));
            }
        } else if self.buf.len() < self.max_line_length {
            return None;
        }

        let line = self.buf.split_to(self.max_line_length);
        self.consumed += line.len() as u64;
        Some(decode(&line))
    }

    /// 개행 없이 남은 데이터를 마지막 라인으로 꺼냅니다.
    pub(crate) fn finish(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            return None;
        }
        let rest = self.buf.split();
        self.consumed += rest.len() as u64;
        Some(decode(&rest))
    }

    pub(crate) fn consumed(&self) -> u64 {
        self.consumed
    }

    pub(crate) fn read_total(&self) -> u64 {
        self.read_total
    }

    fn buffer_mut(&mut self) -> &mut BytesMut {
        self.buf.reserve(READ_CHUNK);
        &mut self.buf
    }
}

fn decode(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}

/// [`pump`] 종료 사유
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Pump {
    /// 스트림 끝
    Eof,
    /// 취소되었거나 수신 채널이 닫힘
    Stopped,
    /// 유휴 타임아웃
    Idle,
}

/// 리더에서 라인을 읽어 소스 컨텍스트로 내보냅니다.
///
/// EOF에서 남은 부분 라인은 분할기에 그대로 둡니다. 호출자가 `finish()`로
/// 내보낼지(파일, 프로세스) 다음 폴링까지 보관할지(tail) 결정합니다.
pub(crate) async fn pump<R>(
    reader: &mut R,
    splitter: &mut LineSplitter,
    ctx: &SourceContext,
    metadata: &Map<String, Value>,
    idle_timeout: Option<Duration>,
) -> std::io::Result<Pump>
where
    R: AsyncRead + Unpin,
{
    loop {
        while let Some(line) = splitter.next_line() {
            if !ctx.emit(line, metadata.clone()).await {
                return Ok(Pump::Stopped);
            }
        }

        let read = async {
            match idle_timeout {
                Some(limit) => tokio::time::timeout(limit, reader.read_buf(splitter.buffer_mut()))
                    .await
                    .ok(),
                None => Some(reader.read_buf(splitter.buffer_mut()).await),
            }
        };

        let n = tokio::select! {
            _ = ctx.cancel.cancelled() => return Ok(Pump::Stopped),
            read = read => match read {
                Some(result) => result?,
                None => return Ok(Pump::Idle),
            },
        };

        if n == 0 {
            return Ok(Pump::Eof);
        }
        splitter.read_total += n as u64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(splitter: &mut LineSplitter, data: &[u8]) {
        splitter.buf.extend_from_slice(data);
    }

    #[test]
    fn splits_on_newline_and_strips_cr() {
        let mut s = LineSplitter::new(1024);
        feed(&mut s, b"one\r\ntwo\nthr");
        assert_eq!(s.next_line().as_deref(), Some("one"));
        assert_eq!(s.next_line().as_deref(), Some("two"));
        assert_eq!(s.next_line(), None);
        feed(&mut s, b"ee\n");
        assert_eq!(s.next_line().as_deref(), Some("three"));
        assert_eq!(s.consumed(), 15);
    }

    #[test]
    fn empty_lines_are_kept() {
        let mut s = LineSplitter::new(16);
        feed(&mut s, b"\n\n");
        assert_eq!(s.next_line().as_deref(), Some(""));
        assert_eq!(s.next_line().as_deref(), Some(""));
    }

    #[test]
    fn overlong_line_is_split() {
        let mut s = LineSplitter::new(4);
        feed(&mut s, b"abcdefghij");
        assert_eq!(s.next_line().as_deref(), Some("abcd"));
        assert_eq!(s.next_line().as_deref(), Some("efgh"));
        assert_eq!(s.next_line(), None);
        assert_eq!(s.finish().as_deref(), Some("ij"));
        assert_eq!(s.finish(), None);
    }

    #[test]
    fn invalid_utf8_is_replaced() {
        let mut s = LineSplitter::new(64);
        feed(&mut s, b"ok \xff\xfe\n");
        let line = s.next_line().unwrap();
        assert!(line.starts_with("ok "));
        assert!(line.contains('\u{FFFD}'));
    }
}
