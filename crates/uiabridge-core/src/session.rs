//! The session loop: results out, commands in, until the session ends.
//!
//! A [`SessionLoop`] owns the [`Registry`] and the controller connection for
//! one test session. It moves through three phases:
//!
//! - **Initializing** waits (boundedly) for the foreground application to
//!   populate, then installs the alert handler on the host
//! - **Running** exchanges the pending result for the next command, dispatches
//!   it and makes its envelope the new pending result
//! - **Released** is terminal; [`SessionLoop::run`] returns a
//!   [`SessionSummary`] saying why
//!
//! Peer timeouts and failure statuses never end the session. The idle timeout
//! does, as does a `release` request and, with escalation enabled, the first
//! command error. A broken controller connection is the only way `run` fails.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use uiabridge_core::alert::AlertState;
//! use uiabridge_core::config::BridgeConfig;
//! use uiabridge_core::memory::{HostSnapshot, MemoryHost};
//! use uiabridge_core::element::ElementSnapshot;
//! use uiabridge_core::peer::TcpPeer;
//! use uiabridge_core::registry::Registry;
//! use uiabridge_core::session::SessionLoop;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = BridgeConfig::load();
//!     let host = Arc::new(MemoryHost::new(HostSnapshot::with_tree(ElementSnapshot::new("UIAApplication"))));
//!     let registry = Registry::new(host, AlertState::default().shared(), config.screenshot_dir()).await?;
//!
//!     let mut session = SessionLoop::new(registry, TcpPeer::new(&config.peer_addr), &config);
//!     let summary = session.run().await?;
//!     println!("{} commands, ended: {}", summary.commands, summary.reason.name());
//!     Ok(())
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::alert::AlertHandler;
use crate::config::BridgeConfig;
use crate::peer::{PeerError, PeerExchange};
use crate::protocol::{Command, Reply, ResultEnvelope, RELEASE_METHOD};
use crate::registry::{Registry, SessionControl};

/// Screenshot taken when the controller reports a failure or a command
/// error ends the session.
pub const DIAGNOSTIC_SCREENSHOT: &str = "cmd_fetch_delegate_error";

/// Pause before re-offering a result the controller answered with no command.
pub const EMPTY_REPLY_PAUSE: Duration = Duration::from_millis(100);

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionError {
    /// The controller connection is gone; the session cannot continue.
    #[error("controller connection broken: {0}")]
    PeerBroken(String),
}

/// Identity of one test session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Session {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
}

impl Session {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Initializing,
    Running,
    Released,
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ReleaseReason {
    /// The controller asked for it.
    Released,
    /// No command arrived within the idle timeout.
    IdleTimeout,
    /// A command failed while escalation was enabled.
    CommandError,
}

impl ReleaseReason {
    pub fn name(&self) -> &'static str {
        match self {
            ReleaseReason::Released => "released",
            ReleaseReason::IdleTimeout => "BootstrapTimeout",
            ReleaseReason::CommandError => "command_error",
        }
    }
}

/// Outcome of a completed session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSummary {
    pub session_id: Uuid,
    /// Commands received, malformed ones included.
    pub commands: u64,
    /// Commands answered with an error.
    pub errors: u64,
    pub reason: ReleaseReason,
}

/// What one received command turned into.
enum Outcome {
    Reply(ResultEnvelope),
    Release(Value),
}

/// Drives one session against a controller.
pub struct SessionLoop<P: PeerExchange> {
    session: Session,
    registry: Registry,
    peer: P,
    control: SessionControl,
    idle_timeout: Duration,
    escalate_errors: bool,
    init_attempts: u32,
    init_interval: Duration,
    phase: Phase,
    commands: u64,
    errors: u64,
}

impl<P: PeerExchange> SessionLoop<P> {
    pub fn new(registry: Registry, peer: P, config: &BridgeConfig) -> Self {
        Self {
            session: Session::new(),
            registry,
            peer,
            control: SessionControl {
                exchange_timeout: config.exchange_timeout(),
            },
            idle_timeout: config.idle_timeout(),
            escalate_errors: config.escalate_errors,
            init_attempts: config.init_attempts,
            init_interval: config.init_interval(),
            phase: Phase::Initializing,
            commands: 0,
            errors: 0,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Current exchange timeout, as last set by the controller.
    pub fn exchange_timeout(&self) -> Duration {
        self.control.exchange_timeout
    }

    /// Runs the session to completion.
    pub async fn run(&mut self) -> Result<SessionSummary, SessionError> {
        let span = info_span!("session", id = %self.session.id);
        async {
            info!(created_at = %self.session.created_at, "session starting");
            self.initialize().await;
            self.phase = Phase::Running;

            let outcome = self.serve().await;
            self.phase = Phase::Released;
            match &outcome {
                Ok(summary) => info!(
                    reason = summary.reason.name(),
                    commands = summary.commands,
                    errors = summary.errors,
                    "session released"
                ),
                Err(e) => warn!(error = %e, "session aborted"),
            }
            outcome
        }
        .instrument(span)
        .await
    }

    /// Waits for the foreground application to report children, then
    /// installs the alert handler. Proceeds either way.
    async fn initialize(&mut self) {
        let target = self.registry.target().clone();
        for attempt in 1..=self.init_attempts {
            match target.front_most_app().await {
                Ok(app) => match app.root().children().await {
                    Ok(children) if !children.is_empty() => {
                        debug!(attempt, "foreground application ready");
                        break;
                    }
                    Ok(_) => debug!(attempt, "foreground application has no children yet"),
                    Err(e) => debug!(attempt, error = %e, "foreground application not ready"),
                },
                Err(e) => debug!(attempt, error = %e, "no foreground application"),
            }
            target.delay(self.init_interval).await;
        }

        let handler = AlertHandler::new(self.registry.alerts().clone());
        target.install_alert_handler(Arc::new(handler));
        info!("alert handler installed");
    }

    async fn serve(&mut self) -> Result<SessionSummary, SessionError> {
        let mut pending = ResultEnvelope::standby();
        let mut last_activity = Instant::now();

        loop {
            let text = match self.peer.exchange(&pending, self.control.exchange_timeout).await {
                Ok(None) => {
                    tokio::time::sleep(EMPTY_REPLY_PAUSE).await;
                    None
                }
                Ok(text) => text,
                Err(PeerError::Broken(reason)) => return Err(SessionError::PeerBroken(reason)),
                Err(e @ PeerError::Status { .. }) => {
                    warn!(error = %e, "controller reported a failure");
                    self.diagnostic_screenshot().await;
                    None
                }
                Err(e) => {
                    debug!(error = %e, "no command");
                    None
                }
            };

            let Some(text) = text else {
                if last_activity.elapsed() > self.idle_timeout {
                    info!(idle_secs = self.idle_timeout.as_secs(), "no command within the idle timeout");
                    return Ok(self.summary(ReleaseReason::IdleTimeout));
                }
                continue;
            };

            self.commands += 1;
            let envelope = match self.handle(&text).await {
                Outcome::Release(id) => {
                    let wait = self.control.exchange_timeout;
                    if let Err(e) = self.peer.deliver(&ResultEnvelope::released(id), wait).await {
                        debug!(error = %e, "release delivery failed");
                    }
                    return Ok(self.summary(ReleaseReason::Released));
                }
                Outcome::Reply(envelope) => envelope,
            };
            last_activity = Instant::now();

            if envelope.is_error() {
                self.errors += 1;
                if self.escalate_errors {
                    warn!(error = envelope.error.as_deref().unwrap_or_default(), "command error ends the session");
                    let wait = self.control.exchange_timeout;
                    if let Err(e) = self.peer.deliver(&envelope, wait).await {
                        debug!(error = %e, "error delivery failed");
                    }
                    self.diagnostic_screenshot().await;
                    return Ok(self.summary(ReleaseReason::CommandError));
                }
            }
            pending = envelope;
        }
    }

    async fn handle(&mut self, text: &str) -> Outcome {
        let command = match Command::parse(text) {
            Ok(command) => command,
            Err(e) => {
                debug!(error = %e, "malformed command");
                return Outcome::Reply(ResultEnvelope::err(Value::Null, e.to_string()));
            }
        };
        debug!(id = %command.id, method = %command.method, "command received");
        if command.method == RELEASE_METHOD {
            return Outcome::Release(command.id);
        }

        match self.registry.dispatch(&command, &mut self.control).await {
            Ok(Reply::Value(result)) => Outcome::Reply(ResultEnvelope::ok(command.id, result)),
            Ok(Reply::DoNotReturn) => Outcome::Reply(ResultEnvelope::empty()),
            Ok(Reply::Release) => Outcome::Release(command.id),
            Err(e) => Outcome::Reply(ResultEnvelope::err(command.id, e.to_string())),
        }
    }

    async fn diagnostic_screenshot(&self) {
        if let Err(e) = self.registry.capture(None, Some(DIAGNOSTIC_SCREENSHOT)).await {
            warn!(error = %e, "diagnostic screenshot failed");
        }
    }

    fn summary(&self, reason: ReleaseReason) -> SessionSummary {
        SessionSummary {
            session_id: self.session.id,
            commands: self.commands,
            errors: self.errors,
            reason,
        }
    }
}
