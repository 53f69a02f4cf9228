//! Shared test helpers for uiabridge-core integration tests.
//!
//! Provides a sample UI tree, a scripted in-process controller for driving
//! the session loop, and a programmable mock TCP controller for the peer
//! transport.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::Mutex;

use uiabridge_core::alert::{AlertState, SharedAlertState};
use uiabridge_core::config::BridgeConfig;
use uiabridge_core::element::{ElementSnapshot, Rect};
use uiabridge_core::memory::{HostSnapshot, MemoryHost};
use uiabridge_core::peer::{PeerError, PeerExchange};
use uiabridge_core::protocol::{Command, ResultEnvelope};
use uiabridge_core::registry::{Registry, SessionControl};

// ---------------------------------------------------------------------------
// Sample UI
// ---------------------------------------------------------------------------

/// A login screen: two text fields, a button, a slider and a two-row table.
pub fn login_tree() -> ElementSnapshot {
    ElementSnapshot::new("UIAApplication")
        .with_name("Demo")
        .with_rect(Rect::new(0.0, 0.0, 375.0, 667.0))
        .with_child(
            ElementSnapshot::new("UIAWindow")
                .with_rect(Rect::new(0.0, 0.0, 375.0, 667.0))
                .with_child(
                    ElementSnapshot::new("UIATextField")
                        .with_name("user")
                        .with_rect(Rect::new(20.0, 100.0, 335.0, 40.0)),
                )
                .with_child(
                    ElementSnapshot::new("UIASecureTextField")
                        .with_name("password")
                        .with_rect(Rect::new(20.0, 160.0, 335.0, 40.0)),
                )
                .with_child(
                    ElementSnapshot::new("UIAButton")
                        .with_name("Login")
                        .with_label("Log in")
                        .with_rect(Rect::new(100.0, 220.0, 200.0, 50.0)),
                )
                .with_child(
                    ElementSnapshot::new("UIASlider")
                        .with_name("volume")
                        .with_value("50%")
                        .with_rect(Rect::new(20.0, 300.0, 335.0, 30.0)),
                )
                .with_child(
                    ElementSnapshot::new("UIATableView")
                        .with_name("rows")
                        .with_child(ElementSnapshot::new("UIATableCell").with_name("Row 1"))
                        .with_child(ElementSnapshot::new("UIATableCell").with_name("Row 2")),
                ),
        )
}

pub fn login_host() -> Arc<MemoryHost> {
    Arc::new(MemoryHost::new(HostSnapshot::with_tree(login_tree())))
}

/// A host whose application has no children yet.
pub fn empty_host() -> Arc<MemoryHost> {
    Arc::new(MemoryHost::new(HostSnapshot::with_tree(ElementSnapshot::new("UIAApplication"))))
}

/// Unique scratch directory under the system temp dir.
pub fn scratch_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("uiabridge_test_{}_{}", tag, uuid::Uuid::new_v4().simple()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

pub async fn registry_for(host: Arc<MemoryHost>) -> Registry {
    registry_with_alerts(host, AlertState::default().shared()).await
}

pub async fn registry_with_alerts(host: Arc<MemoryHost>, alerts: SharedAlertState) -> Registry {
    Registry::new(host, alerts, scratch_dir("shots")).await.unwrap()
}

pub fn control() -> SessionControl {
    SessionControl {
        exchange_timeout: Duration::from_secs(10),
    }
}

pub fn cmd(id: impl Into<Value>, method: &str, params: Vec<Value>) -> Command {
    Command::new(id, method, params)
}

/// Session settings with quick initialisation and a private screenshot dir.
pub fn quick_config() -> BridgeConfig {
    BridgeConfig {
        idle_timeout_secs: 60,
        exchange_timeout_secs: 5,
        init_attempts: 2,
        init_interval_ms: 10,
        screenshot_dir: Some(scratch_dir("session")),
        ..Default::default()
    }
}

// ---------------------------------------------------------------------------
// Scripted controller
// ---------------------------------------------------------------------------

/// One reply of the scripted controller.
#[derive(Debug, Clone)]
pub enum Step {
    /// Hand out this command text.
    Command(String),
    /// Nothing queued.
    Nothing,
    /// Sit out the wait, then report a timeout.
    Timeout,
    /// Report a failure status.
    Status(i64, String),
    /// The connection is gone.
    Broken,
}

impl Step {
    pub fn command(id: impl Into<Value>, method: &str, params: Vec<Value>) -> Self {
        Step::Command(serde_json::to_string(&Command::new(id, method, params)).unwrap())
    }
}

/// What the scripted controller has seen so far.
#[derive(Debug, Default)]
pub struct PeerLog {
    /// Envelopes offered with a request for the next command.
    pub exchanged: Vec<ResultEnvelope>,
    /// Waits requested for each exchange.
    pub waits: Vec<Duration>,
    /// Final deliveries.
    pub delivered: Vec<ResultEnvelope>,
}

/// In-process controller replaying a fixed script. Once the script is
/// exhausted it behaves like a silent controller: every exchange times out.
pub struct ScriptedPeer {
    steps: VecDeque<Step>,
    log: Arc<StdMutex<PeerLog>>,
    deliveries_fail: bool,
}

impl ScriptedPeer {
    pub fn new(steps: Vec<Step>) -> (Self, Arc<StdMutex<PeerLog>>) {
        let log = Arc::new(StdMutex::new(PeerLog::default()));
        (
            Self {
                steps: steps.into(),
                log: log.clone(),
                deliveries_fail: false,
            },
            log,
        )
    }

    /// Records final deliveries but reports each one as failed.
    pub fn with_failing_deliveries(mut self) -> Self {
        self.deliveries_fail = true;
        self
    }
}

#[async_trait]
impl PeerExchange for ScriptedPeer {
    async fn exchange(&mut self, result: &ResultEnvelope, wait: Duration) -> Result<Option<String>, PeerError> {
        {
            let mut log = self.log.lock().unwrap();
            log.exchanged.push(result.clone());
            log.waits.push(wait);
        }
        match self.steps.pop_front() {
            Some(Step::Command(text)) => Ok(Some(text)),
            Some(Step::Nothing) => Ok(None),
            Some(Step::Status(code, output)) => Err(PeerError::Status { code, output }),
            Some(Step::Broken) => Err(PeerError::Broken("scripted".into())),
            Some(Step::Timeout) | None => {
                tokio::time::sleep(wait).await;
                Err(PeerError::Timeout)
            }
        }
    }

    async fn deliver(&mut self, result: &ResultEnvelope, _wait: Duration) -> Result<(), PeerError> {
        self.log.lock().unwrap().delivered.push(result.clone());
        if self.deliveries_fail {
            return Err(PeerError::Broken("delivery refused".into()));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Programmable mock TCP controller
// ---------------------------------------------------------------------------

/// Behavior of the mock controller for one request line.
pub enum MockBehavior {
    /// Read one request line and answer with this reply object.
    Respond(Value),
    /// Read one request line, sleep, then answer.
    Delay(Duration, Value),
    /// Read one request line and close the connection.
    Drop,
    /// Read one request line and answer with a non-JSON line.
    SendGarbage,
    /// Read one request line and expect no reply to be needed.
    Swallow,
    /// Read one request line and answer with these exact bytes.
    Raw(Vec<u8>),
}

/// Start a mock controller that accepts one connection and plays
/// `behaviors` in order. Every request line it reads is recorded.
pub async fn mock_controller(behaviors: Vec<MockBehavior>) -> (SocketAddr, Arc<Mutex<Vec<Value>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let requests = Arc::new(Mutex::new(Vec::new()));
    let seen = requests.clone();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut stream = BufReader::new(stream);

        for behavior in behaviors {
            let mut line = String::new();
            match stream.read_line(&mut line).await {
                Ok(0) | Err(_) => return,
                Ok(_) => {}
            }
            if let Ok(request) = serde_json::from_str::<Value>(line.trim()) {
                seen.lock().await.push(request);
            }

            let reply = match behavior {
                MockBehavior::Respond(reply) => format!("{reply}\n").into_bytes(),
                MockBehavior::Delay(duration, reply) => {
                    tokio::time::sleep(duration).await;
                    format!("{reply}\n").into_bytes()
                }
                MockBehavior::Drop => return,
                MockBehavior::SendGarbage => b"\x01not a reply\n".to_vec(),
                MockBehavior::Swallow => continue,
                MockBehavior::Raw(bytes) => bytes,
            };
            let _ = stream.get_mut().write_all(&reply).await;
            let _ = stream.get_mut().flush().await;
        }

        // Keep the connection open until the client goes away.
        let mut rest = String::new();
        let _ = stream.read_line(&mut rest).await;
    });

    (addr, requests)
}
