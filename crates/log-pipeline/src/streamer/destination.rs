//! 스트림 목적지 -- 콘솔, 파일, HTTP, WebSocket, 사용자 정의 싱크
//!
//! [`Destination`]은 설정이고, `start()` 시점에 [`DestinationHandle`]로 열려
//! 실제 연결(파일 핸들, HTTP 클라이언트, 소켓)을 소유합니다.
//! 전달은 at-most-once이며 재시도하지 않습니다.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use colored::Colorize;
use futures::SinkExt;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::debug;

use logweave_core::pipeline::BoxFuture;
use logweave_core::types::LogLevel;

use super::StreamRecord;
use crate::error::LogPipelineError;

/// 사용자 정의 싱크
///
/// 배치를 받아 전달합니다. 에러는 해당 싱크에만 영향을 줍니다.
pub trait LogSink: Send + Sync + fmt::Debug {
    /// 싱크 이름 (통계/이벤트용)
    fn name(&self) -> &str;

    /// 배치를 전달합니다.
    fn write_batch<'a>(
        &'a self,
        batch: &'a [StreamRecord],
    ) -> BoxFuture<'a, Result<(), LogPipelineError>>;

    /// 스트리머 정지 시 호출됩니다.
    fn close(&self) -> BoxFuture<'_, ()> {
        Box::pin(async {})
    }
}

/// 콘솔 출력 대상
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConsoleTarget {
    #[default]
    Stdout,
    Stderr,
}

/// 파일 인코딩
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileEncoding {
    #[default]
    Utf8,
    /// BOM 없는 UTF-16 little endian
    Utf16le,
    /// ISO-8859-1. 표현할 수 없는 문자는 `?`로 대체
    Latin1,
}

impl FileEncoding {
    fn encode(self, text: &str) -> Vec<u8> {
        match self {
            Self::Utf8 => text.as_bytes().to_vec(),
            Self::Utf16le => text.encode_utf16().flat_map(u16::to_le_bytes).collect(),
            Self::Latin1 => text
                .chars()
                .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
                .collect(),
        }
    }
}

impl FromStr for FileEncoding {
    type Err = LogPipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace(['-', '_'], "").as_str() {
            "utf8" => Ok(Self::Utf8),
            "utf16le" => Ok(Self::Utf16le),
            "latin1" | "iso88591" => Ok(Self::Latin1),
            other => Err(LogPipelineError::config(
                "streamer.file.encoding",
                format!("unsupported encoding '{other}'"),
            )),
        }
    }
}

/// 파일 라인 형식
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineFormat {
    /// 레코드당 JSON 한 줄
    #[default]
    Json,
    /// 사람이 읽는 텍스트 한 줄
    Text,
}

/// 스트림 목적지 설정
#[derive(Debug, Clone)]
pub enum Destination {
    /// 표준 출력/에러
    Console {
        colorize: bool,
        target: ConsoleTarget,
    },
    /// 파일 (추가 모드)
    File {
        path: PathBuf,
        encoding: FileEncoding,
        format: LineFormat,
    },
    /// 배치를 JSON 배열로 POST
    Http {
        url: String,
        headers: BTreeMap<String, String>,
        timeout: Duration,
    },
    /// 배치마다 JSON 텍스트 프레임 하나
    WebSocket { url: String },
    /// 사용자 정의 싱크
    Custom(Arc<dyn LogSink>),
}

impl Destination {
    /// 색상 있는 stdout
    pub fn console() -> Self {
        Self::Console {
            colorize: true,
            target: ConsoleTarget::Stdout,
        }
    }

    /// UTF-8 JSON 라인 파일
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::File {
            path: path.into(),
            encoding: FileEncoding::Utf8,
            format: LineFormat::Json,
        }
    }

    /// 기본 헤더, 10초 타임아웃의 HTTP 목적지
    pub fn http(url: impl Into<String>) -> Self {
        Self::Http {
            url: url.into(),
            headers: BTreeMap::new(),
            timeout: Duration::from_secs(10),
        }
    }

    /// WebSocket 목적지
    pub fn websocket(url: impl Into<String>) -> Self {
        Self::WebSocket { url: url.into() }
    }

    /// 사용자 정의 싱크
    pub fn custom(sink: impl LogSink + 'static) -> Self {
        Self::Custom(Arc::new(sink))
    }

    /// 통계와 이벤트에 쓰는 이름
    pub fn name(&self) -> String {
        match self {
            Self::Console { target, .. } => match target {
                ConsoleTarget::Stdout => "console:stdout".to_owned(),
                ConsoleTarget::Stderr => "console:stderr".to_owned(),
            },
            Self::File { path, .. } => format!("file:{}", path.display()),
            Self::Http { url, .. } => format!("http:{url}"),
            Self::WebSocket { url } => format!("websocket:{url}"),
            Self::Custom(sink) => format!("custom:{}", sink.name()),
        }
    }

    pub(super) fn validate(&self) -> Result<(), LogPipelineError> {
        match self {
            Self::File { path, .. } if path.as_os_str().is_empty() => Err(
                LogPipelineError::config("streamer.file.path", "path must not be empty"),
            ),
            Self::Http { url, timeout, .. } => {
                if !(url.starts_with("http://") || url.starts_with("https://")) {
                    return Err(LogPipelineError::config(
                        "streamer.http.url",
                        format!("'{url}' is not an http(s) url"),
                    ));
                }
                if timeout.is_zero() {
                    return Err(LogPipelineError::config(
                        "streamer.http.timeout",
                        "must be greater than 0",
                    ));
                }
                Ok(())
            }
            Self::WebSocket { url } if !(url.starts_with("ws://") || url.starts_with("wss://")) => {
                Err(LogPipelineError::config(
                    "streamer.websocket.url",
                    format!("'{url}' is not a ws(s) url"),
                ))
            }
            _ => Ok(()),
        }
    }

    /// 연결을 엽니다.
    pub(super) async fn open(&self) -> Result<DestinationHandle, LogPipelineError> {
        let name = self.name();
        let fail = |reason: String| LogPipelineError::Destination {
            destination: name.clone(),
            reason,
        };

        let handle = match self {
            Self::Console { colorize, target } => DestinationHandle::Console {
                colorize: *colorize,
                target: *target,
            },
            Self::File {
                path,
                encoding,
                format,
            } => {
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .await
                    .map_err(|e| fail(format!("failed to open: {e}")))?;
                DestinationHandle::File {
                    file,
                    encoding: *encoding,
                    format: *format,
                }
            }
            Self::Http {
                url,
                headers,
                timeout,
            } => {
                let mut header_map = HeaderMap::new();
                for (key, value) in headers {
                    let header_name = HeaderName::from_bytes(key.as_bytes())
                        .map_err(|e| fail(format!("invalid header name '{key}': {e}")))?;
                    let value = HeaderValue::from_str(value)
                        .map_err(|e| fail(format!("invalid header value for '{key}': {e}")))?;
                    header_map.insert(header_name, value);
                }
                let client = reqwest::Client::builder()
                    .timeout(*timeout)
                    .build()
                    .map_err(|e| fail(format!("failed to build http client: {e}")))?;
                DestinationHandle::Http {
                    client,
                    url: url.clone(),
                    headers: header_map,
                }
            }
            Self::WebSocket { url } => {
                let (socket, _) = tokio_tungstenite::connect_async(url.as_str())
                    .await
                    .map_err(|e| fail(format!("failed to connect: {e}")))?;
                DestinationHandle::WebSocket {
                    socket: Box::new(socket),
                }
            }
            Self::Custom(sink) => DestinationHandle::Custom(Arc::clone(sink)),
        };
        debug!(destination = %name, "destination opened");
        Ok(handle)
    }
}

/// 열린 목적지 연결
pub enum DestinationHandle {
    Console {
        colorize: bool,
        target: ConsoleTarget,
    },
    File {
        file: tokio::fs::File,
        encoding: FileEncoding,
        format: LineFormat,
    },
    Http {
        client: reqwest::Client,
        url: String,
        headers: HeaderMap,
    },
    WebSocket {
        socket: Box<WebSocketStream<MaybeTlsStream<TcpStream>>>,
    },
    Custom(Arc<dyn LogSink>),
}

impl fmt::Debug for DestinationHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            Self::Console { .. } => "console",
            Self::File { .. } => "file",
            Self::Http { .. } => "http",
            Self::WebSocket { .. } => "websocket",
            Self::Custom(_) => "custom",
        };
        f.debug_tuple("DestinationHandle").field(&kind).finish()
    }
}

impl DestinationHandle {
    /// 배치를 전달하고 기록한 바이트 수를 반환합니다.
    pub(super) async fn write(
        &mut self,
        name: &str,
        batch: &[StreamRecord],
    ) -> Result<u64, LogPipelineError> {
        let fail = |reason: String| LogPipelineError::Destination {
            destination: name.to_owned(),
            reason,
        };

        match self {
            Self::Console { colorize, target } => {
                let mut out = String::new();
                for record in batch {
                    out.push_str(&console_line(record, *colorize));
                    out.push('\n');
                }
                let result = match target {
                    ConsoleTarget::Stdout => {
                        write_flush(&mut tokio::io::stdout(), out.as_bytes()).await
                    }
                    ConsoleTarget::Stderr => {
                        write_flush(&mut tokio::io::stderr(), out.as_bytes()).await
                    }
                };
                result.map_err(|e| fail(e.to_string()))?;
                Ok(out.len() as u64)
            }
            Self::File {
                file,
                encoding,
                format,
            } => {
                let mut text = String::new();
                for record in batch {
                    match format {
                        LineFormat::Json => text.push_str(&serde_json::to_string(record)?),
                        LineFormat::Text => text.push_str(&record.to_text()),
                    }
                    text.push('\n');
                }
                let bytes = encoding.encode(&text);
                write_flush(file, &bytes)
                    .await
                    .map_err(|e| fail(format!("write failed: {e}")))?;
                Ok(bytes.len() as u64)
            }
            Self::Http {
                client,
                url,
                headers,
            } => {
                let body = serde_json::to_vec(batch)?;
                let len = body.len() as u64;
                client
                    .post(url.as_str())
                    .headers(headers.clone())
                    .header(CONTENT_TYPE, "application/json")
                    .body(body)
                    .send()
                    .await
                    .and_then(reqwest::Response::error_for_status)
                    .map_err(|e| fail(e.to_string()))?;
                Ok(len)
            }
            Self::WebSocket { socket } => {
                let payload = serde_json::to_string(batch)?;
                let len = payload.len() as u64;
                socket
                    .send(Message::text(payload))
                    .await
                    .map_err(|e| fail(e.to_string()))?;
                Ok(len)
            }
            Self::Custom(sink) => {
                sink.write_batch(batch).await?;
                Ok(batch
                    .iter()
                    .map(|r| serde_json::to_vec(r).map_or(0, |v| v.len() as u64))
                    .sum())
            }
        }
    }

    /// 연결을 닫습니다. 에러는 무시합니다.
    pub(super) async fn close(&mut self, name: &str) {
        match self {
            Self::File { file, .. } => {
                if let Err(e) = file.flush().await {
                    debug!(destination = name, error = %e, "file flush on close failed");
                }
            }
            Self::WebSocket { socket } => {
                if let Err(e) = WebSocketStream::close(socket, None).await {
                    debug!(destination = name, error = %e, "websocket close failed");
                }
            }
            Self::Custom(sink) => sink.close().await,
            Self::Console { .. } | Self::Http { .. } => {}
        }
    }
}

async fn write_flush<W>(writer: &mut W, bytes: &[u8]) -> std::io::Result<()>
where
    W: tokio::io::AsyncWrite + Unpin,
{
    writer.write_all(bytes).await?;
    writer.flush().await
}

/// 레벨별 색상을 입힌 콘솔 라인
fn console_line(record: &StreamRecord, colorize: bool) -> String {
    let text = record.to_text();
    if !colorize {
        return text;
    }
    match record.level() {
        Some(LogLevel::Fatal) => text.red().bold().to_string(),
        Some(LogLevel::Error) => text.red().to_string(),
        Some(LogLevel::Warn) => text.yellow().to_string(),
        Some(LogLevel::Info) => text.green().to_string(),
        Some(LogLevel::Debug) => text.blue().to_string(),
        Some(LogLevel::Trace) => text.dimmed().to_string(),
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use logweave_core::types::{ParsedLog, RawLine};

    #[test]
    fn encodings() {
        assert_eq!(FileEncoding::Utf8.encode("é"), "é".as_bytes());
        assert_eq!(FileEncoding::Utf16le.encode("A"), vec![0x41, 0x00]);
        assert_eq!(FileEncoding::Latin1.encode("é€"), vec![0xE9, b'?']);
        assert_eq!("UTF-16LE".parse::<FileEncoding>().unwrap(), FileEncoding::Utf16le);
        assert_eq!("iso-8859-1".parse::<FileEncoding>().unwrap(), FileEncoding::Latin1);
        assert!("ebcdic".parse::<FileEncoding>().is_err());
    }

    #[test]
    fn names_and_validation() {
        assert_eq!(Destination::console().name(), "console:stdout");
        assert_eq!(Destination::file("/tmp/x.log").name(), "file:/tmp/x.log");
        assert!(Destination::http("ftp://nope").validate().is_err());
        assert!(Destination::http("https://logs.example.com").validate().is_ok());
        assert!(Destination::websocket("http://nope").validate().is_err());
        assert!(Destination::file("").validate().is_err());
    }

    #[test]
    fn console_line_without_colour_is_plain_text() {
        let mut log = ParsedLog::plain("disk full");
        log.level = Some(LogLevel::Error);
        let line = console_line(&StreamRecord::Log(log), false);
        assert_eq!(line, "[ERROR] disk full");
    }

    #[tokio::test]
    async fn file_destination_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.log");
        let dest = Destination::File {
            path: path.clone(),
            encoding: FileEncoding::Utf8,
            format: LineFormat::Text,
        };

        let mut handle = dest.open().await.unwrap();
        let batch = vec![
            StreamRecord::Raw(RawLine::new("src", "hello")),
            StreamRecord::Log(ParsedLog::plain("world")),
        ];
        let written = handle.write(&dest.name(), &batch).await.unwrap();
        handle.close(&dest.name()).await;

        let content = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(written as usize, content.len());
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("src: hello"));
        assert_eq!(lines[1], "[-] world");
    }

    #[tokio::test]
    async fn file_destination_json_utf16() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.jsonl");
        let dest = Destination::File {
            path: path.clone(),
            encoding: FileEncoding::Utf16le,
            format: LineFormat::Json,
        };
        let mut handle = dest.open().await.unwrap();
        handle
            .write("file", &[StreamRecord::Log(ParsedLog::plain("hi"))])
            .await
            .unwrap();

        let bytes = tokio::fs::read(&path).await.unwrap();
        let units: Vec<u16> = bytes
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .collect();
        let text = String::from_utf16(&units).unwrap();
        let value: serde_json::Value = serde_json::from_str(text.trim_end()).unwrap();
        assert_eq!(value["message"], "hi");
    }

    #[tokio::test]
    async fn unreachable_websocket_fails_to_open() {
        // 포트 1은 닫혀 있다고 가정
        let dest = Destination::websocket("ws://127.0.0.1:1/logs");
        let err = dest.open().await.unwrap_err();
        assert!(matches!(err, LogPipelineError::Destination { .. }));
    }
}
