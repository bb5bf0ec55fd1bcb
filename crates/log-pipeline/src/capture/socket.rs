//! 소켓 소스 -- TCP/UDP로 로그 라인을 수신합니다.
//!
//! TCP는 연결마다 별도 태스크에서 개행 단위로 프레이밍하며, 동시 연결 수는
//! 세마포어로 제한합니다. UDP는 데이터그램 하나에 여러 라인이 있을 수 있습니다.
//! 인증은 하지 않습니다.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use super::lines::{LineSplitter, Pump, pump};
use super::{SourceContext, SourceExit, SourceFailure};
use crate::error::LogPipelineError;

/// 소켓 프로토콜
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketProtocol {
    /// TCP (개행 프레이밍)
    Tcp,
    /// UDP (데이터그램)
    Udp,
}

impl SocketProtocol {
    /// 소문자 프로토콜 이름
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Udp => "udp",
        }
    }
}

/// 소켓 소스 설정
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketSource {
    /// 프로토콜
    pub protocol: SocketProtocol,
    /// 바인드 주소 (예: "0.0.0.0:5140")
    pub bind_addr: String,
    /// 최대 동시 TCP 연결 수
    pub max_connections: usize,
    /// 최대 메시지 크기 (바이트). TCP는 라인, UDP는 데이터그램 단위
    pub max_message_size: usize,
    /// TCP 유휴 연결 타임아웃
    pub connection_timeout: Duration,
}

impl SocketSource {
    /// TCP 소스를 생성합니다.
    pub fn tcp(bind_addr: impl Into<String>) -> Self {
        Self::new(SocketProtocol::Tcp, bind_addr)
    }

    /// UDP 소스를 생성합니다.
    pub fn udp(bind_addr: impl Into<String>) -> Self {
        Self::new(SocketProtocol::Udp, bind_addr)
    }

    fn new(protocol: SocketProtocol, bind_addr: impl Into<String>) -> Self {
        Self {
            protocol,
            bind_addr: bind_addr.into(),
            max_connections: 256,
            max_message_size: 64 * 1024,
            connection_timeout: Duration::from_secs(300),
        }
    }

    pub(super) fn validate(&self) -> Result<(), LogPipelineError> {
        if self.bind_addr.trim().is_empty() {
            return Err(LogPipelineError::config(
                "capture.socket.bind_addr",
                "bind address must not be empty",
            ));
        }
        if self.max_connections == 0 {
            return Err(LogPipelineError::config(
                "capture.socket.max_connections",
                "must be greater than 0",
            ));
        }
        if self.max_message_size == 0 {
            return Err(LogPipelineError::config(
                "capture.socket.max_message_size",
                "must be greater than 0",
            ));
        }
        Ok(())
    }
}

pub(super) async fn run(
    source: &SocketSource,
    ctx: &SourceContext,
) -> Result<SourceExit, SourceFailure> {
    match source.protocol {
        SocketProtocol::Tcp => run_tcp(source, ctx).await,
        SocketProtocol::Udp => run_udp(source, ctx).await,
    }
}

async fn run_tcp(source: &SocketSource, ctx: &SourceContext) -> Result<SourceExit, SourceFailure> {
    let listener = TcpListener::bind(&source.bind_addr).await.map_err(|e| {
        SourceFailure::retryable(format!("failed to bind to {}: {e}", source.bind_addr))
    })?;
    info!(source = %ctx.id, addr = %source.bind_addr, "tcp capture listening");

    let connection_semaphore = Arc::new(Semaphore::new(source.max_connections));

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        warn!(source = %ctx.id, error = %e, "accept error");
                        continue;
                    }
                };

                let Ok(permit) = Arc::clone(&connection_semaphore).try_acquire_owned() else {
                    warn!(source = %ctx.id, %peer, "max connections reached, rejecting connection");
                    continue;
                };

                debug!(source = %ctx.id, %peer, "accepted connection");
                let ctx = ctx.clone();
                let source = source.clone();
                tokio::spawn(async move {
                    handle_connection(stream, peer, &source, &ctx).await;
                    drop(permit);
                });
            }
            _ = ctx.cancel.cancelled() => {
                info!(source = %ctx.id, "tcp capture received shutdown signal");
                return Ok(SourceExit::Cancelled);
            }
        }
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    source: &SocketSource,
    ctx: &SourceContext,
) {
    let metadata = peer_metadata(SocketProtocol::Tcp, peer);
    let max = source.max_message_size.min(ctx.max_line_length);
    let mut splitter = LineSplitter::new(max);

    match pump(
        &mut stream,
        &mut splitter,
        ctx,
        &metadata,
        Some(source.connection_timeout),
    )
    .await
    {
        Ok(Pump::Eof) => {
            if let Some(rest) = splitter.finish() {
                ctx.emit(rest, metadata).await;
            }
            debug!(source = %ctx.id, %peer, "connection closed by peer");
        }
        Ok(Pump::Idle) => debug!(source = %ctx.id, %peer, "connection idle timeout"),
        Ok(Pump::Stopped) => {}
        Err(e) => debug!(source = %ctx.id, %peer, error = %e, "connection read error"),
    }
}

async fn run_udp(source: &SocketSource, ctx: &SourceContext) -> Result<SourceExit, SourceFailure> {
    let socket = UdpSocket::bind(&source.bind_addr).await.map_err(|e| {
        SourceFailure::retryable(format!("failed to bind to {}: {e}", source.bind_addr))
    })?;
    info!(source = %ctx.id, addr = %source.bind_addr, "udp capture listening");

    let mut buf = vec![0u8; source.max_message_size];
    loop {
        let (len, peer) = tokio::select! {
            received = socket.recv_from(&mut buf) => match received {
                Ok(pair) => pair,
                Err(e) => {
                    warn!(source = %ctx.id, error = %e, "udp receive error");
                    continue;
                }
            },
            _ = ctx.cancel.cancelled() => return Ok(SourceExit::Cancelled),
        };

        let metadata = peer_metadata(SocketProtocol::Udp, peer);
        let datagram = String::from_utf8_lossy(&buf[..len]);
        for line in datagram.split('\n') {
            let line = line.strip_suffix('\r').unwrap_or(line);
            if line.trim().is_empty() {
                continue;
            }
            if !ctx.emit(line.to_owned(), metadata.clone()).await {
                return Ok(SourceExit::Cancelled);
            }
        }
    }
}

fn peer_metadata(protocol: SocketProtocol, peer: SocketAddr) -> Map<String, Value> {
    let mut metadata = Map::new();
    metadata.insert("protocol".to_owned(), Value::from(protocol.as_str()));
    metadata.insert("peer".to_owned(), Value::from(peer.to_string()));
    metadata
}

#[cfg(test)]
mod tests {
    use super::super::{CaptureConfig, CaptureSource, LogCapture};
    use super::*;
    use tokio::io::AsyncWriteExt;
    use tokio::sync::mpsc;

    /// 빈 포트를 하나 골라 주소를 반환합니다.
    fn free_tcp_addr() -> String {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().to_string()
    }

    fn free_udp_addr() -> String {
        let socket = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        socket.local_addr().unwrap().to_string()
    }

    fn capture(source: SocketSource, tx: mpsc::Sender<logweave_core::types::RawLine>) -> LogCapture {
        LogCapture::new(
            CaptureConfig {
                sources: vec![CaptureSource::socket(source)],
                retry_delay: Duration::from_millis(20),
                ..CaptureConfig::default()
            },
            tx,
        )
        .unwrap()
    }

    #[test]
    fn validation() {
        assert!(SocketSource::tcp("").validate().is_err());
        let mut source = SocketSource::udp("127.0.0.1:0");
        source.max_message_size = 0;
        assert!(source.validate().is_err());
        assert!(SocketSource::tcp("127.0.0.1:0").validate().is_ok());
    }

    #[tokio::test]
    async fn tcp_lines_are_framed_by_newline() {
        let addr = free_tcp_addr();
        let (tx, mut rx) = mpsc::channel(16);
        let mut capture = capture(SocketSource::tcp(addr.clone()), tx);
        capture.start().unwrap();

        let mut stream = None;
        for _ in 0..50 {
            if let Ok(s) = TcpStream::connect(&addr).await {
                stream = Some(s);
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        let mut stream = stream.expect("listener should come up");
        stream.write_all(b"first\nsecond\r\nthi").await.unwrap();
        stream.write_all(b"rd\n").await.unwrap();

        let mut got = Vec::new();
        for _ in 0..3 {
            let line = rx.recv().await.unwrap();
            assert_eq!(line.metadata["protocol"], "tcp");
            got.push(line.content);
        }
        assert_eq!(got, vec!["first", "second", "third"]);
        capture.stop().await;
    }

    #[tokio::test]
    async fn udp_datagram_with_several_lines() {
        let addr = free_udp_addr();
        let (tx, mut rx) = mpsc::channel(16);
        let mut capture = capture(SocketSource::udp(addr.clone()), tx);
        capture.start().unwrap();

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let first = loop {
            client.send_to(b"one\ntwo\n\n", &addr).await.unwrap();
            if let Ok(Some(line)) =
                tokio::time::timeout(Duration::from_millis(100), rx.recv()).await
            {
                break line;
            }
        };
        assert_eq!(first.content, "one");
        assert_eq!(rx.recv().await.unwrap().content, "two");
        capture.stop().await;
    }
}
