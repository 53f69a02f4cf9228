//! # uiabridge-core
//!
//! Command bridge between a remote test controller and a UI automation host.
//!
//! The controller sends named operations with positional arguments; the
//! bridge executes them against live UI objects and reports the results
//! back, one exchange at a time, for the duration of a test session.
//!
//! ## Modules
//!
//! - [`session`] - The session loop: exchange, dispatch, idle and error policy
//! - [`registry`] - Method table mapping wire names to host operations
//! - [`handle`] - Integer handles for live host elements
//! - [`alert`] - Rule-based handling of spontaneous host alerts
//! - [`host`] - Capability traits a UI automation host implements
//! - [`memory`] - In-memory host over a serialised element tree
//! - [`qpath`] - Structural element locators
//! - [`peer`] - Controller transport (JSON lines over TCP)
//! - [`protocol`] - Command and result envelope types
//! - [`channel`] - Out-of-band payload and screenshot announcements
//! - [`config`] - Persistent configuration under `~/.uiabridge/`
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use uiabridge_core::alert::AlertState;
//! use uiabridge_core::config::BridgeConfig;
//! use uiabridge_core::memory::MemoryHost;
//! use uiabridge_core::peer::TcpPeer;
//! use uiabridge_core::registry::Registry;
//! use uiabridge_core::session::SessionLoop;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = BridgeConfig::load();
//! let host = Arc::new(MemoryHost::from_json(&std::fs::read_to_string("tree.json")?)?);
//! let registry = Registry::new(host, AlertState::default().shared(), config.prepare_screenshot_dir()?).await?;
//! SessionLoop::new(registry, TcpPeer::new(&config.peer_addr), &config).run().await?;
//! # Ok(())
//! # }
//! ```

pub mod alert;
pub mod channel;
pub mod config;
pub mod element;
pub mod encode;
pub mod error;
pub mod handle;
pub mod host;
pub mod memory;
pub mod peer;
pub mod predicate;
pub mod protocol;
pub mod qpath;
pub mod registry;
pub mod session;
