//! Out-of-band payload delivery.
//!
//! Some results are too large, or arrive too late, to travel in the result
//! envelope: locator searches, element trees and screenshots. Their handlers
//! write a tagged line instead and answer the command with `DoNotReturn`.
//! The controller scrapes the host log for two line formats:
//!
//! ```text
//! TORPC: {"id":"4","result":{...}}
//! ScreenshotCaptured: {"name":"1700000000000.png","path":"/tmp/shots/1700000000000.png"}
//! ```
//!
//! [`PayloadChannel`] writes those lines to a line sink (stdout in the server)
//! and broadcasts each payload to in-process subscribers.

use std::io::Write;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, warn};

/// Tag of command results delivered out-of-band.
pub const RPC_TAG: &str = "TORPC: ";

/// Tag of screenshot notifications.
pub const SCREENSHOT_TAG: &str = "ScreenshotCaptured: ";

/// A payload delivered outside the result envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Payload {
    /// The real result of the command with the given correlation id.
    Rpc { id: Value, result: Value },
    /// A screenshot file was written.
    Screenshot { name: String, path: String },
}

impl Payload {
    /// The tagged log line for this payload.
    pub fn line(&self) -> String {
        match self {
            Payload::Rpc { id, result } => format!("{RPC_TAG}{}", json!({"id": id, "result": result})),
            Payload::Screenshot { name, path } => {
                format!("{SCREENSHOT_TAG}{}", json!({"name": name, "path": path}))
            }
        }
    }

    /// Parses a tagged line back into a payload. Untagged lines yield `None`.
    ///
    /// Used by whatever reads the bridge's output stream to pick the
    /// payloads out of the surrounding text.
    pub fn parse_line(line: &str) -> Option<Self> {
        if let Some(body) = line.strip_prefix(RPC_TAG) {
            let v: Value = serde_json::from_str(body).ok()?;
            return Some(Payload::Rpc {
                id: v.get("id").cloned().unwrap_or(Value::Null),
                result: v.get("result").cloned().unwrap_or(Value::Null),
            });
        }
        let body = line.strip_prefix(SCREENSHOT_TAG)?;
        let v: Value = serde_json::from_str(body).ok()?;
        Some(Payload::Screenshot {
            name: v.get("name")?.as_str()?.to_string(),
            path: v.get("path")?.as_str()?.to_string(),
        })
    }
}

type Sink = Box<dyn Write + Send>;

/// Cloneable handle to the out-of-band channel.
#[derive(Clone)]
pub struct PayloadChannel {
    tx: broadcast::Sender<Payload>,
    sink: Option<Arc<Mutex<Sink>>>,
}

impl PayloadChannel {
    /// A channel that only broadcasts.
    pub fn silent() -> Self {
        let (tx, _) = broadcast::channel(100);
        Self { tx, sink: None }
    }

    /// A channel that also writes each line to `writer`.
    pub fn with_writer(writer: impl Write + Send + 'static) -> Self {
        let mut channel = Self::silent();
        channel.sink = Some(Arc::new(Mutex::new(Box::new(writer))));
        channel
    }

    /// A channel writing to the process's standard output.
    pub fn stdout() -> Self {
        Self::with_writer(std::io::stdout())
    }

    /// Subscribes to payloads emitted from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Payload> {
        self.tx.subscribe()
    }

    /// Delivers a payload. Sink failures are logged, never returned.
    pub async fn emit(&self, payload: Payload) {
        let line = payload.line();
        debug!(line = %line, "out-of-band payload");

        if let Some(sink) = &self.sink {
            let mut sink = sink.lock().await;
            let written = writeln!(sink, "{line}").and_then(|_| sink.flush());
            if let Err(e) = written {
                warn!(error = %e, "failed to write payload line");
            }
        }

        // No subscribers is fine.
        let _ = self.tx.send(payload);
    }

    pub async fn rpc(&self, id: Value, result: Value) {
        self.emit(Payload::Rpc { id, result }).await;
    }

    pub async fn screenshot(&self, name: impl Into<String>, path: impl Into<String>) {
        self.emit(Payload::Screenshot {
            name: name.into(),
            path: path.into(),
        })
        .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<StdMutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn rpc_line_format() {
        let line = Payload::Rpc { id: json!("4"), result: json!({"find_count": 0}) }.line();
        assert_eq!(line, r#"TORPC: {"id":"4","result":{"find_count":0}}"#);
    }

    #[test]
    fn screenshot_line_round_trip() {
        let payload = Payload::Screenshot { name: "a.png".into(), path: "/tmp/a.png".into() };
        let line = payload.line();
        assert!(line.starts_with("ScreenshotCaptured: "));
        assert_eq!(Payload::parse_line(&line), Some(payload));
        assert_eq!(Payload::parse_line("plain log line"), None);
    }

    #[tokio::test]
    async fn emit_writes_and_broadcasts() {
        let buf = SharedBuf::default();
        let channel = PayloadChannel::with_writer(buf.clone());
        let mut rx = channel.subscribe();

        channel.rpc(json!(1), json!("x")).await;

        let written = String::from_utf8(buf.0.lock().unwrap().clone()).unwrap();
        assert_eq!(written, "TORPC: {\"id\":1,\"result\":\"x\"}\n");
        assert_eq!(rx.recv().await.unwrap(), Payload::Rpc { id: json!(1), result: json!("x") });
    }

    #[tokio::test]
    async fn emit_without_subscribers_is_harmless() {
        let channel = PayloadChannel::silent();
        channel.screenshot("n.png", "/p/n.png").await;
    }
}
