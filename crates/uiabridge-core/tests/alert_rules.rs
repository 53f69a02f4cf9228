//! Alert rule tests: rule management commands and the installed handler.

mod common;

use std::sync::Arc;

use percent_encoding::percent_decode_str;
use serde_json::{json, Value};

use common::{cmd, control, login_host, registry_with_alerts};

use uiabridge_core::alert::{AlertHandler, AlertRule, AlertState, SharedAlertState};
use uiabridge_core::element::ElementSnapshot;
use uiabridge_core::host::UiTarget;
use uiabridge_core::memory::MemoryHost;
use uiabridge_core::protocol::Reply;
use uiabridge_core::registry::Registry;

fn alert(message: &str, buttons: &[&str]) -> ElementSnapshot {
    let mut alert = ElementSnapshot::new("UIAAlert")
        .with_child(ElementSnapshot::new("UIAStaticText").with_name("Notice"))
        .with_child(ElementSnapshot::new("UIAStaticText").with_label(message));
    for button in buttons {
        alert = alert.with_child(ElementSnapshot::new("UIAButton").with_name(*button));
    }
    alert
}

fn armed(rules: Vec<AlertRule>, auto_handled: bool) -> (Arc<MemoryHost>, SharedAlertState) {
    let host = login_host();
    let state = AlertState::new(rules, auto_handled).shared();
    host.install_alert_handler(Arc::new(AlertHandler::new(state.clone())));
    (host, state)
}

async fn tapped(host: &MemoryHost) -> Vec<String> {
    host.events()
        .await
        .into_iter()
        .filter(|e| e.action == "tap")
        .filter_map(|e| e.target)
        .collect()
}

async fn run(registry: &mut Registry, method: &str, params: Vec<Value>) -> Value {
    match registry.dispatch(&cmd(1, method, params), &mut control()).await.unwrap() {
        Reply::Value(v) => v,
        other => panic!("{method}: unexpected reply {other:?}"),
    }
}

// ---------------------------------------------------------------------------
// 1. Matching
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_first_matching_rule_taps_its_button() {
    let (host, state) = armed(
        vec![
            AlertRule::new("Location", Some("Allow".into())),
            AlertRule::new("Notifications", Some("Don't Allow".into())),
        ],
        false,
    );

    let handled = host
        .raise_alert(alert("\"Demo\" Would Like to Send You Notifications", &["Don't Allow", "OK"]))
        .await;

    assert!(handled);
    assert_eq!(tapped(&host).await, ["Don't Allow"]);
    assert_eq!(
        state.read().await.last_texts,
        ["Notice", "\"Demo\" Would Like to Send You Notifications", "Don't Allow", "OK"]
    );
}

#[tokio::test]
async fn test_pattern_rules() {
    let (host, _state) = armed(vec![AlertRule::new("^Allow .* access", Some("^O[Kk]$".into()))], false);

    assert!(host.raise_alert(alert("Allow camera access?", &["Cancel", "Ok"])).await);

    assert_eq!(tapped(&host).await, ["Ok"]);
}

#[tokio::test]
async fn test_matching_message_without_matching_button_still_handles() {
    let (host, _state) = armed(
        vec![
            AlertRule::new("Update", Some("Later".into())),
            AlertRule::new("Update", Some("Install".into())),
        ],
        false,
    );

    assert!(host.raise_alert(alert("Update available", &["Install"])).await);

    assert!(tapped(&host).await.is_empty(), "the first matching rule decides");
}

#[tokio::test]
async fn test_invalid_pattern_matches_literally() {
    let (host, _state) = armed(vec![AlertRule::new("Sign in (", Some("OK".into()))], false);

    assert!(!host.raise_alert(alert("Sign in (required)", &["OK"])).await);
    assert!(host.raise_alert(alert("Sign in (", &["OK"])).await);
}

#[tokio::test]
async fn test_unmatched_alert_reports_auto_handled_flag() {
    let (host, _state) = armed(vec![AlertRule::new("Location", None)], false);
    assert!(!host.raise_alert(alert("Low battery", &["Close"])).await);
    assert_eq!(host.events().await.last().unwrap().action, "alert_default_dismiss");

    let (host, _state) = armed(vec![], true);
    assert!(host.raise_alert(alert("Low battery", &["Close"])).await);
    assert!(tapped(&host).await.is_empty());
}

#[tokio::test]
async fn test_cells_are_candidates_when_there_are_no_buttons() {
    let (host, _state) = armed(vec![AlertRule::new("Choose", Some("Photo".into()))], false);
    let sheet = ElementSnapshot::new("UIAActionSheet")
        .with_child(ElementSnapshot::new("UIAStaticText").with_name("Choose a source"))
        .with_child(
            ElementSnapshot::new("UIATableView")
                .with_child(ElementSnapshot::new("UIATableCell").with_name("Camera"))
                .with_child(ElementSnapshot::new("UIATableCell").with_name("Photo Library")),
        );

    assert!(host.raise_alert(sheet).await);

    assert_eq!(tapped(&host).await, ["Photo Library"]);
}

// ---------------------------------------------------------------------------
// 2. Rule management commands
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_rule_commands_edit_shared_state() {
    let (host, state) = armed(vec![], false);
    let mut registry = registry_with_alerts(host.clone(), state.clone()).await;

    run(
        &mut registry,
        "uia.target.set_rules_of_alert_auto_handle",
        vec![json!([{"message_text": "Location", "button_text": "Allow"}])],
    )
    .await;
    run(&mut registry, "uia.target.add_rule_of_alert_auto_handle", vec![json!("Update"), json!("Later")]).await;

    let encoded = run(&mut registry, "uia.target.get_rules_of_alert_auto_handle", vec![]).await;
    let decoded = percent_decode_str(encoded.as_str().unwrap()).decode_utf8().unwrap();
    let rules: Vec<AlertRule> = serde_json::from_str(&decoded).unwrap();
    assert_eq!(
        rules,
        [
            AlertRule::new("Location", Some("Allow".into())),
            AlertRule::new("Update", Some("Later".into()))
        ]
    );

    assert!(host.raise_alert(alert("Update ready", &["Later"])).await);
    assert_eq!(tapped(&host).await, ["Later"]);

    run(&mut registry, "uia.target.clean_rules_of_alert_auto_handle", vec![]).await;
    assert!(state.read().await.rules.is_empty());
}

#[tokio::test]
async fn test_null_rule_list_clears_rules() {
    let (host, state) = armed(vec![AlertRule::new("x", None)], false);
    let mut registry = registry_with_alerts(host, state.clone()).await;

    run(&mut registry, "uia.target.set_rules_of_alert_auto_handle", vec![json!(null)]).await;

    assert!(state.read().await.rules.is_empty());
}

#[tokio::test]
async fn test_auto_close_switches() {
    let (host, state) = armed(vec![], false);
    let mut registry = registry_with_alerts(host.clone(), state.clone()).await;

    run(&mut registry, "uia.target.turn_off_auto_close_alert", vec![]).await;
    assert!(state.read().await.auto_handled);
    assert!(host.raise_alert(alert("Whatever", &["OK"])).await);

    run(&mut registry, "uia.target.turn_on_auto_close_alert", vec![]).await;
    assert!(!state.read().await.auto_handled);
    assert!(!host.raise_alert(alert("Whatever", &["OK"])).await);
}

#[tokio::test]
async fn test_last_alert_message() {
    let (host, state) = armed(vec![], false);
    let mut registry = registry_with_alerts(host.clone(), state).await;
    assert_eq!(run(&mut registry, "uia.target.get_last_alert_msg", vec![]).await, json!([]));

    host.raise_alert(alert("Storage almost full", &["OK"])).await;

    assert_eq!(
        run(&mut registry, "uia.target.get_last_alert_msg", vec![]).await,
        json!(["Notice", "Storage almost full", "OK"])
    );
}
