use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::builder::BoolishValueParser;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::EnvFilter;

use uiabridge_core::alert::{AlertRule, AlertState};
use uiabridge_core::channel::PayloadChannel;
use uiabridge_core::config::{logs_dir, BridgeConfig};
use uiabridge_core::memory::MemoryHost;
use uiabridge_core::peer::TcpPeer;
use uiabridge_core::registry::Registry;
use uiabridge_core::session::SessionLoop;

#[derive(Parser)]
#[command(name = "uiabridge")]
#[command(about = "Serve UI automation commands from a remote controller against a UI host")]
struct Args {
    /// Controller command endpoint (host:port)
    #[arg(long, env = "UIABRIDGE_PEER")]
    peer: Option<String>,

    /// JSON snapshot of the host's device and application tree
    #[arg(long, env = "UIABRIDGE_TREE")]
    tree: PathBuf,

    /// Seconds without a command before the session ends
    #[arg(long, env = "UIABRIDGE_IDLE_TIMEOUT")]
    idle_timeout: Option<u64>,

    /// Seconds one result-for-command exchange may take
    #[arg(long, env = "UIABRIDGE_EXCHANGE_TIMEOUT")]
    exchange_timeout: Option<u64>,

    /// Directory for screenshots (cleared at session start)
    #[arg(long, env = "UIABRIDGE_SCREENSHOT_DIR")]
    screenshot_dir: Option<PathBuf>,

    /// End the session on the first command error [true/false, 1/0, yes/no, on/off]
    #[arg(
        long,
        env = "UIABRIDGE_ESCALATE_ERRORS",
        num_args = 0..=1,
        default_missing_value = "true",
        value_parser = BoolishValueParser::new()
    )]
    escalate_errors: Option<bool>,

    /// JSON file with the initial alert rules
    #[arg(long, env = "UIABRIDGE_ALERT_RULES")]
    alert_rules: Option<PathBuf>,

    /// Report alerts no rule matches as handled [true/false, 1/0, yes/no, on/off]
    #[arg(
        long,
        env = "UIABRIDGE_ALERT_AUTO_HANDLED",
        num_args = 0..=1,
        default_missing_value = "true",
        value_parser = BoolishValueParser::new()
    )]
    alert_auto_handled: Option<bool>,

    /// Log to stderr instead of the log file
    #[arg(long)]
    log_stderr: bool,
}

impl Args {
    /// Layers the command line over the saved config.
    fn apply(&self, config: &mut BridgeConfig) -> Result<(), Box<dyn std::error::Error>> {
        if let Some(peer) = &self.peer {
            config.peer_addr = peer.clone();
        }
        if let Some(secs) = self.idle_timeout {
            config.idle_timeout_secs = secs;
        }
        if let Some(secs) = self.exchange_timeout {
            config.exchange_timeout_secs = secs;
        }
        if let Some(dir) = &self.screenshot_dir {
            config.screenshot_dir = Some(dir.clone());
        }
        if let Some(path) = &self.alert_rules {
            config.alert_rules = read_rules(path)?;
        }
        if let Some(escalate) = self.escalate_errors {
            config.escalate_errors = escalate;
        }
        if let Some(auto_handled) = self.alert_auto_handled {
            config.alert_auto_handled = auto_handled;
        }
        Ok(())
    }
}

fn read_rules(path: &Path) -> Result<Vec<AlertRule>, Box<dyn std::error::Error>> {
    let text = std::fs::read_to_string(path).map_err(|e| format!("reading alert rules {}: {e}", path.display()))?;
    let rules = serde_json::from_str(&text).map_err(|e| format!("parsing alert rules {}: {e}", path.display()))?;
    Ok(rules)
}

fn init_logging(to_stderr: bool) {
    let writer = if to_stderr {
        BoxMakeWriter::new(std::io::stderr)
    } else {
        BoxMakeWriter::new(tracing_appender::rolling::never(logs_dir(), "uiabridge.log"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(writer)
        .with_ansi(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_logging(args.log_stderr);

    let mut config = BridgeConfig::load();
    args.apply(&mut config)?;

    let tree = std::fs::read_to_string(&args.tree)
        .map_err(|e| format!("reading tree {}: {e}", args.tree.display()))?;
    let host = Arc::new(MemoryHost::from_json(&tree).map_err(|e| format!("parsing tree {}: {e}", args.tree.display()))?);

    let screenshot_dir = config.prepare_screenshot_dir()?;
    info!(peer = %config.peer_addr, screenshots = %screenshot_dir.display(), "Starting uiabridge");

    let alerts = AlertState::new(config.alert_rules.clone(), config.alert_auto_handled).shared();
    let registry = Registry::new(host, alerts, screenshot_dir)
        .await?
        .with_channel(PayloadChannel::stdout());
    let peer = TcpPeer::new(config.peer_addr.clone());
    let mut session = SessionLoop::new(registry, peer, &config);

    #[cfg(unix)]
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    #[cfg(unix)]
    let terminate = sigterm.recv();
    #[cfg(not(unix))]
    let terminate = std::future::pending::<Option<()>>();

    tokio::select! {
        outcome = session.run() => {
            let summary = outcome?;
            info!(
                session = %summary.session_id,
                reason = summary.reason.name(),
                commands = summary.commands,
                errors = summary.errors,
                "Session finished"
            );
        }
        _ = tokio::signal::ctrl_c() => {
            warn!("Received SIGINT");
        }
        _ = terminate => {
            warn!("Received SIGTERM");
        }
    }

    info!("uiabridge stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_saved_config() {
        let args = Args::parse_from([
            "uiabridge",
            "--tree",
            "tree.json",
            "--peer",
            "10.0.0.2:7000",
            "--idle-timeout",
            "30",
            "--escalate-errors",
        ]);
        let mut config = BridgeConfig {
            exchange_timeout_secs: 4,
            ..BridgeConfig::default()
        };

        args.apply(&mut config).unwrap();

        assert_eq!(config.peer_addr, "10.0.0.2:7000");
        assert_eq!(config.idle_timeout_secs, 30);
        assert_eq!(config.exchange_timeout_secs, 4);
        assert!(config.escalate_errors);
        assert!(!config.alert_auto_handled);
    }

    #[test]
    fn switches_can_turn_saved_settings_off() {
        let args = Args::parse_from([
            "uiabridge",
            "--tree",
            "tree.json",
            "--escalate-errors",
            "false",
            "--alert-auto-handled=0",
        ]);
        let mut config = BridgeConfig {
            escalate_errors: true,
            alert_auto_handled: true,
            ..BridgeConfig::default()
        };

        args.apply(&mut config).unwrap();

        assert!(!config.escalate_errors);
        assert!(!config.alert_auto_handled);
    }

    #[test]
    fn absent_switches_keep_saved_settings() {
        let args = Args::parse_from(["uiabridge", "--tree", "tree.json"]);
        let mut config = BridgeConfig {
            escalate_errors: true,
            ..BridgeConfig::default()
        };

        args.apply(&mut config).unwrap();

        assert!(config.escalate_errors);
    }

    #[test]
    fn alert_rules_file_replaces_configured_rules() {
        let path = std::env::temp_dir().join(format!("uiabridge-rules-{}.json", std::process::id()));
        std::fs::write(&path, r#"[{"message_text": "Location", "button_text": "Allow"}]"#).unwrap();
        let args = Args::parse_from(["uiabridge", "--tree", "t.json", "--alert-rules", path.to_str().unwrap()]);
        let mut config = BridgeConfig {
            alert_rules: vec![AlertRule::new("old", None)],
            ..BridgeConfig::default()
        };

        args.apply(&mut config).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(config.alert_rules, [AlertRule::new("Location", Some("Allow".into()))]);
    }
}
