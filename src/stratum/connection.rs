//! TCP connection management with line-delimited I/O.
//!
//! The protocol is newline-delimited JSON over TCP. The stream is split at
//! connect time: the read half feeds the session's single reader task, the
//! write half is owned by the writer task that serializes all outbound
//! requests. The [`ReadTransport`]/[`WriteTransport`] traits abstract
//! message I/O, allowing channel-based mocks for deterministic testing.

use async_trait::async_trait;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::{debug, trace};

use super::error::{StratumError, StratumResult};
use super::messages::{RawMessage, Request};

/// Inbound message stream.
#[async_trait]
pub trait ReadTransport: Send + 'static {
    /// Read one complete message.
    ///
    /// Returns `None` on clean connection close (EOF). A malformed line
    /// surfaces as [`StratumError::InvalidMessage`], which the caller may
    /// treat as recoverable.
    async fn read_message(&mut self) -> StratumResult<Option<RawMessage>>;
}

/// Outbound message sink.
#[async_trait]
pub trait WriteTransport: Send + 'static {
    /// Write one request as a single line.
    async fn write_message(&mut self, req: &Request) -> StratumResult<()>;
}

/// Buffered read half of a pool connection.
pub struct ReadConnection {
    reader: BufReader<OwnedReadHalf>,
    line_buf: String,
}

/// Buffered write half of a pool connection.
pub struct WriteConnection {
    writer: BufWriter<OwnedWriteHalf>,
}

/// Connect to a pool and split the stream into transport halves.
pub async fn connect(host: &str, port: u16) -> StratumResult<(ReadConnection, WriteConnection)> {
    debug!(host, port, "Connecting to pool");

    let stream = TcpStream::connect((host, port))
        .await
        .map_err(|e| StratumError::ConnectionFailed(e.to_string()))?;

    debug!("Connected to pool");
    Ok(split(stream))
}

/// Split an established stream into transport halves.
pub fn split(stream: TcpStream) -> (ReadConnection, WriteConnection) {
    let (read_half, write_half) = stream.into_split();
    (
        ReadConnection {
            reader: BufReader::new(read_half),
            line_buf: String::with_capacity(4096),
        },
        WriteConnection {
            writer: BufWriter::new(write_half),
        },
    )
}

#[async_trait]
impl ReadTransport for ReadConnection {
    async fn read_message(&mut self) -> StratumResult<Option<RawMessage>> {
        loop {
            self.line_buf.clear();

            let n = self
                .reader
                .read_line(&mut self.line_buf)
                .await
                .map_err(StratumError::Io)?;

            if n == 0 {
                // EOF - connection closed
                return Ok(None);
            }

            let line = self.line_buf.trim();
            if line.is_empty() {
                // Empty line, skip and read next
                continue;
            }

            trace!(rx = %line, "Received message");

            let msg = serde_json::from_str(line).map_err(|e| {
                StratumError::InvalidMessage(format!("failed to parse JSON: {e}, line: {line}"))
            })?;

            return Ok(Some(msg));
        }
    }
}

#[async_trait]
impl WriteTransport for WriteConnection {
    async fn write_message(&mut self, req: &Request) -> StratumResult<()> {
        let json = serde_json::to_string(req)?;
        trace!(tx = %json, "Sending message");

        self.writer.write_all(json.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;

        Ok(())
    }
}

/// Channel-based transports for deterministic testing.
///
/// Backed by tokio mpsc channels rather than TCP. Create a triple with
/// [`mock_pair()`]; the reader/writer are the client's side, the handle is
/// the test's side.
#[cfg(test)]
pub(crate) struct MockReader {
    rx: tokio::sync::mpsc::UnboundedReceiver<StratumResult<Option<RawMessage>>>,
}

#[cfg(test)]
pub(crate) struct MockWriter {
    tx: tokio::sync::mpsc::UnboundedSender<Request>,
}

/// Test-side handle feeding the mock reader and draining the mock writer.
#[cfg(test)]
pub(crate) struct MockHandle {
    tx: tokio::sync::mpsc::UnboundedSender<StratumResult<Option<RawMessage>>>,
    rx: tokio::sync::mpsc::UnboundedReceiver<Request>,
}

#[cfg(test)]
pub(crate) fn mock_pair() -> (MockReader, MockWriter, MockHandle) {
    let (in_tx, in_rx) = tokio::sync::mpsc::unbounded_channel();
    let (out_tx, out_rx) = tokio::sync::mpsc::unbounded_channel();

    (
        MockReader { rx: in_rx },
        MockWriter { tx: out_tx },
        MockHandle {
            tx: in_tx,
            rx: out_rx,
        },
    )
}

#[cfg(test)]
#[async_trait]
impl ReadTransport for MockReader {
    async fn read_message(&mut self) -> StratumResult<Option<RawMessage>> {
        match self.rx.recv().await {
            Some(item) => item,
            // Handle dropped: behave like EOF
            None => Ok(None),
        }
    }
}

#[cfg(test)]
#[async_trait]
impl WriteTransport for MockWriter {
    async fn write_message(&mut self, req: &Request) -> StratumResult<()> {
        self.tx
            .send(req.clone())
            .map_err(|_| StratumError::Disconnected)
    }
}

#[cfg(test)]
impl MockHandle {
    /// Feed one inbound message to the client.
    pub fn send_json(&self, value: serde_json::Value) {
        let raw: RawMessage = serde_json::from_value(value).expect("invalid test message");
        self.tx.send(Ok(Some(raw))).expect("reader dropped");
    }

    /// Feed a malformed-line error to the client.
    pub fn send_decode_error(&self, text: &str) {
        self.tx
            .send(Err(StratumError::InvalidMessage(text.to_string())))
            .expect("reader dropped");
    }

    /// Signal EOF to the client.
    pub fn send_eof(&self) {
        self.tx.send(Ok(None)).expect("reader dropped");
    }

    /// Receive a request the client wrote.
    pub async fn recv(&mut self) -> Request {
        self.rx.recv().await.expect("writer dropped")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_request_roundtrip_over_tcp() {
        // Echo server that decodes requests and answers with a response
        // echoing the id.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let (mut read, mut write) = split(socket);

            while let Ok(Some(msg)) = read.read_message().await {
                let req = Request {
                    id: match msg.id {
                        Some(serde_json::Value::String(s)) => s,
                        other => panic!("unexpected id: {other:?}"),
                    },
                    method: msg.method.unwrap(),
                    params: vec![],
                };
                write.write_message(&req).await.unwrap();
            }
        });

        let stream = TcpStream::connect(addr).await.unwrap();
        let (mut read, mut write) = split(stream);

        let request = Request::new(1, "test.method", vec!["param1".to_string()]);
        write.write_message(&request).await.unwrap();

        let echoed = read.read_message().await.unwrap().unwrap();
        assert_eq!(echoed.id, Some(serde_json::Value::String("1".into())));
        assert_eq!(echoed.method.as_deref(), Some("test.method"));
    }

    #[tokio::test]
    async fn test_malformed_line_is_recoverable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            use tokio::io::AsyncWriteExt;
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(b"this is not json\n").await.unwrap();
            socket
                .write_all(b"{\"id\":\"1\",\"result\":true}\n")
                .await
                .unwrap();
        });

        let stream = TcpStream::connect(addr).await.unwrap();
        let (mut read, _write) = split(stream);

        // First line fails to parse but leaves the stream usable.
        assert!(matches!(
            read.read_message().await,
            Err(StratumError::InvalidMessage(_))
        ));

        // Second line parses fine.
        let msg = read.read_message().await.unwrap().unwrap();
        assert_eq!(msg.result, Some(serde_json::Value::Bool(true)));
    }
}
