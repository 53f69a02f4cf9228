//! Transport between the session loop and the remote controller.
//!
//! The loop only needs one primitive: hand over the pending result and wait
//! (boundedly) for the next command. [`PeerExchange`] abstracts it so the loop
//! can run against any transport; [`TcpPeer`] is the newline-delimited JSON
//! implementation used by the server.
//!
//! # Wire format
//!
//! One request line per exchange:
//!
//! ```json
//! {"op": "send_result_and_get_next", "result": {"id": null, "result": "BootstrapStandBy", "error": null}, "timeout": 10}
//! ```
//!
//! answered by one reply line, either
//!
//! ```json
//! {"command": {"id": "1", "method": "uia.target.get_rect", "params": []}}
//! ```
//!
//! (`"command": null` when nothing is queued), or a failure status with
//! diagnostics:
//!
//! ```json
//! {"status": 2, "output": "controller queue unavailable"}
//! ```
//!
//! Final deliveries use `"op": "send_result"` and expect no reply.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, debug_span, trace, warn, Instrument};

use crate::protocol::ResultEnvelope;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Timeout for establishing a TCP connection.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Added to the exchange timeout when waiting for the reply line, so the
/// controller's own timeout fires first.
const READ_GRACE: Duration = Duration::from_secs(3);

/// Pause after a failed connection attempt.
const RECONNECT_DELAY: Duration = Duration::from_millis(500);

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors from one exchange with the controller.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PeerError {
    /// No reply within the wait. Recoverable.
    #[error("exchange timed out")]
    Timeout,

    /// The controller could not be reached. Recoverable.
    #[error("peer unreachable: {0}")]
    Unreachable(String),

    /// The controller reported a failure with diagnostics. Recoverable.
    #[error("peer failed with status {code}: {output}")]
    Status { code: i64, output: String },

    /// The established connection is gone. Fatal.
    #[error("peer connection broken: {0}")]
    Broken(String),
}

impl PeerError {
    /// Returns `true` if the session cannot continue after this error.
    pub fn is_fatal(&self) -> bool {
        matches!(self, PeerError::Broken(_))
    }
}

// ---------------------------------------------------------------------------
// PeerExchange trait
// ---------------------------------------------------------------------------

/// The controller side of the session.
#[async_trait]
pub trait PeerExchange: Send {
    /// Hands over `result` and waits up to `wait` for the next command.
    ///
    /// Returns the raw command text, or `None` when the controller had
    /// nothing queued.
    async fn exchange(&mut self, result: &ResultEnvelope, wait: Duration) -> Result<Option<String>, PeerError>;

    /// Hands over a final `result` without asking for another command.
    async fn deliver(&mut self, result: &ResultEnvelope, wait: Duration) -> Result<(), PeerError>;
}

// ---------------------------------------------------------------------------
// TcpPeer
// ---------------------------------------------------------------------------

/// JSON-lines peer over TCP.
///
/// The connection is opened lazily and re-opened after a timeout, so a late
/// reply to an abandoned exchange is never mistaken for the next command.
pub struct TcpPeer {
    addr: String,
    stream: Option<BufReader<TcpStream>>,
}

impl TcpPeer {
    /// Create a peer targeting `addr` (`host:port`).
    ///
    /// No connection is established until the first exchange.
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            stream: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    async fn ensure_connected(&mut self) -> Result<&mut BufReader<TcpStream>, PeerError> {
        if self.stream.is_none() {
            debug!(addr = %self.addr, "connecting to controller");
            let connected = timeout(CONNECT_TIMEOUT, TcpStream::connect(&self.addr)).await;
            let stream = match connected {
                Ok(Ok(stream)) => stream,
                Ok(Err(e)) => {
                    tokio::time::sleep(RECONNECT_DELAY).await;
                    return Err(PeerError::Unreachable(e.to_string()));
                }
                Err(_) => return Err(PeerError::Unreachable("connect timed out".into())),
            };
            self.stream = Some(BufReader::new(stream));
            debug!("connected to controller");
        }
        self.stream
            .as_mut()
            .ok_or_else(|| PeerError::Broken("no connection".into()))
    }

    async fn write_line(&mut self, op: &str, result: &ResultEnvelope, wait: Duration) -> Result<(), PeerError> {
        let request = json!({"op": op, "result": result, "timeout": wait.as_secs()});
        let line = format!("{request}\n");
        let stream = self.ensure_connected().await?;
        trace!(bytes = line.len(), "writing request line");
        let written = async {
            stream.get_mut().write_all(line.as_bytes()).await?;
            stream.get_mut().flush().await
        }
        .await;
        if let Err(e) = written {
            self.stream.take();
            return Err(PeerError::Broken(e.to_string()));
        }
        Ok(())
    }

    async fn read_reply(&mut self, wait: Duration) -> Result<Option<String>, PeerError> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| PeerError::Broken("no connection".into()))?;

        let mut line = Vec::new();
        let read = timeout(wait.saturating_add(READ_GRACE), stream.read_until(b'\n', &mut line)).await;
        match read {
            Ok(Ok(0)) => {
                self.stream.take();
                Err(PeerError::Broken("controller closed the connection".into()))
            }
            // Bytes that are not UTF-8 fail to parse like any other garbage.
            Ok(Ok(_)) => parse_reply(String::from_utf8_lossy(&line).trim()),
            Ok(Err(e)) => {
                // I/O error: the stream is likely broken, drop it to prevent reuse.
                self.stream.take();
                Err(PeerError::Broken(e.to_string()))
            }
            Err(_) => {
                // The controller may still answer later; drop the stream so
                // that answer is never read as the reply to the next exchange.
                self.stream.take();
                Err(PeerError::Timeout)
            }
        }
    }
}

/// Interprets one reply line.
///
/// A line that is not a reply object is reported as a failure status
/// carrying the line itself.
fn parse_reply(line: &str) -> Result<Option<String>, PeerError> {
    let garbage = || PeerError::Status {
        code: -1,
        output: line.to_string(),
    };
    let reply: Value = serde_json::from_str(line).map_err(|_| garbage())?;

    if let Some(code) = reply.get("status").and_then(Value::as_i64) {
        if code != 0 {
            let output = reply
                .get("output")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            return Err(PeerError::Status { code, output });
        }
    }

    match reply.get("command") {
        Some(Value::Null) => Ok(None),
        Some(Value::String(text)) => Ok(Some(text.clone())),
        Some(command) => Ok(Some(command.to_string())),
        None if reply.get("status").is_some() => Ok(None),
        None => Err(garbage()),
    }
}

#[async_trait]
impl PeerExchange for TcpPeer {
    async fn exchange(&mut self, result: &ResultEnvelope, wait: Duration) -> Result<Option<String>, PeerError> {
        let span = debug_span!("peer_exchange", addr = %self.addr);
        async {
            self.write_line("send_result_and_get_next", result, wait).await?;
            let reply = self.read_reply(wait).await;
            if let Err(e) = &reply {
                if !e.is_fatal() {
                    debug!(error = %e, "exchange yielded no command");
                }
            }
            reply
        }
        .instrument(span)
        .await
    }

    async fn deliver(&mut self, result: &ResultEnvelope, wait: Duration) -> Result<(), PeerError> {
        let outcome = self.write_line("send_result", result, wait).await;
        if let Err(e) = &outcome {
            warn!(error = %e, "final delivery failed");
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_creates_disconnected_peer() {
        let peer = TcpPeer::new("127.0.0.1:0");
        assert!(!peer.is_connected());
    }

    #[test]
    fn only_broken_is_fatal() {
        assert!(PeerError::Broken("x".into()).is_fatal());
        assert!(!PeerError::Timeout.is_fatal());
        assert!(!PeerError::Unreachable("x".into()).is_fatal());
        assert!(!PeerError::Status { code: 1, output: String::new() }.is_fatal());
    }

    #[test]
    fn reply_with_command_object() {
        let text = parse_reply(r#"{"command": {"id": "1", "method": "m", "params": []}}"#)
            .unwrap()
            .unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["method"], "m");
    }

    #[test]
    fn reply_with_raw_command_text() {
        assert_eq!(parse_reply(r#"{"command": "{oops"}"#).unwrap().as_deref(), Some("{oops"));
    }

    #[test]
    fn reply_without_command() {
        assert_eq!(parse_reply(r#"{"command": null}"#).unwrap(), None);
        assert_eq!(parse_reply(r#"{"status": 0}"#).unwrap(), None);
    }

    #[test]
    fn reply_with_failure_status() {
        assert_eq!(
            parse_reply(r#"{"status": 2, "output": "boom"}"#),
            Err(PeerError::Status { code: 2, output: "boom".into() })
        );
    }

    #[test]
    fn garbage_reply_is_a_status_failure() {
        assert!(matches!(parse_reply("\u{1}garbage"), Err(PeerError::Status { code: -1, .. })));
        assert!(matches!(parse_reply(r#"{"unexpected": true}"#), Err(PeerError::Status { code: -1, .. })));
        let lossy = String::from_utf8_lossy(b"\xff\xfe garbage");
        assert!(matches!(parse_reply(&lossy), Err(PeerError::Status { code: -1, .. })));
    }

    #[tokio::test]
    async fn huge_wait_does_not_overflow_read_deadline() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut reader = BufReader::new(stream);
            let mut line = String::new();
            reader.read_line(&mut line).await.unwrap();
            reader.get_mut().write_all(b"{\"command\": null}\n").await.unwrap();
        });
        let mut peer = TcpPeer::new(addr.to_string());

        let reply = peer.exchange(&ResultEnvelope::standby(), Duration::from_secs(u64::MAX)).await;

        assert_eq!(reply, Ok(None));
    }
}
