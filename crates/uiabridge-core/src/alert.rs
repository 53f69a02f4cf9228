//! Automatic handling of host alerts.
//!
//! The host raises modal alerts at arbitrary points, outside the command
//! sequence. [`AlertHandler`] is installed as the host's alert callback and
//! decides, from an ordered rule list, whether to tap one of the alert's
//! controls:
//!
//! 1. Every text of the alert is recorded as the last alert message.
//! 2. Rules are tried in order. A rule matches when one of the texts equals
//!    its `message_text` or the pattern finds a match in it.
//! 3. The first matching rule wins. If it names a `button_text`, the first
//!    candidate control whose texts match is tapped.
//! 4. A matching rule reports the alert as handled even when no control
//!    matched its button text.
//! 5. With no matching rule, the handler reports the session's
//!    `auto_handled` flag, which decides whether the host's default dismissal
//!    also runs.
//!
//! Candidate controls are the alert's buttons, or, if it has none, its
//! collection cells, or, failing that, its table cells.
//!
//! The rule state is shared with the command registry through
//! [`SharedAlertState`]. The handler copies what it needs and releases the
//! lock before touching any control.

use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::host::{AlertCallback, ElementRef};

/// Control classes searched for a rule's button, in order of preference.
pub const CONTROL_CLASSES: [&str; 3] = ["UIAButton", "UIACollectionCell", "UIATableCell"];

/// One automatic-handling rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRule {
    /// Literal text or regular expression matched against the alert's texts.
    pub message_text: String,

    /// Literal text or regular expression selecting the control to tap.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub button_text: Option<String>,
}

impl AlertRule {
    pub fn new(message_text: impl Into<String>, button_text: Option<String>) -> Self {
        Self {
            message_text: message_text.into(),
            button_text,
        }
    }
}

/// Alert-related session state.
#[derive(Debug, Clone, Default)]
pub struct AlertState {
    pub rules: Vec<AlertRule>,
    /// Returned for alerts no rule matches.
    pub auto_handled: bool,
    /// Texts of the most recent alert.
    pub last_texts: Vec<String>,
}

impl AlertState {
    pub fn new(rules: Vec<AlertRule>, auto_handled: bool) -> Self {
        Self {
            rules,
            auto_handled,
            last_texts: Vec::new(),
        }
    }

    pub fn shared(self) -> SharedAlertState {
        Arc::new(RwLock::new(self))
    }
}

/// Alert state shared between the registry and the host callback.
pub type SharedAlertState = Arc<RwLock<AlertState>>;

/// Equality-or-pattern test for one rule text.
struct TextMatcher {
    literal: String,
    pattern: Option<Regex>,
}

impl TextMatcher {
    fn new(text: &str) -> Self {
        let pattern = match Regex::new(text) {
            Ok(re) => Some(re),
            Err(e) => {
                warn!(pattern = text, error = %e, "alert rule text is not a valid pattern, matching literally");
                None
            }
        };
        Self {
            literal: text.to_string(),
            pattern,
        }
    }

    fn matches(&self, text: &str) -> bool {
        self.literal == text || self.pattern.as_ref().is_some_and(|re| re.is_match(text))
    }
}

struct CompiledRule {
    message: TextMatcher,
    button: Option<TextMatcher>,
}

impl From<&AlertRule> for CompiledRule {
    fn from(rule: &AlertRule) -> Self {
        Self {
            message: TextMatcher::new(&rule.message_text),
            button: rule
                .button_text
                .as_deref()
                .filter(|b| !b.is_empty())
                .map(TextMatcher::new),
        }
    }
}

/// All descendants of `root` whose class is exactly `class`, depth-first.
async fn descendants_of_class(root: &ElementRef, class: &str) -> Vec<ElementRef> {
    let mut found = Vec::new();
    let mut stack = match root.children().await {
        Ok(children) => children.into_iter().rev().collect::<Vec<_>>(),
        Err(_) => return found,
    };
    while let Some(element) = stack.pop() {
        if let Ok(dict) = element.element_dict().await {
            if dict.classname == class {
                found.push(element.clone());
            }
        }
        if let Ok(children) = element.children().await {
            stack.extend(children.into_iter().rev());
        }
    }
    found
}

/// The alert's candidate controls, by class preference.
async fn candidate_controls(alert: &ElementRef) -> Vec<ElementRef> {
    for class in CONTROL_CLASSES {
        let controls = descendants_of_class(alert, class).await;
        if !controls.is_empty() {
            return controls;
        }
    }
    Vec::new()
}

/// The host alert callback.
#[derive(Clone)]
pub struct AlertHandler {
    state: SharedAlertState,
}

impl AlertHandler {
    pub fn new(state: SharedAlertState) -> Self {
        Self { state }
    }

    /// Applies the rule list to `alert`.
    pub async fn handle(&self, alert: &ElementRef) -> bool {
        let texts = match alert.all_texts().await {
            Ok(texts) => texts,
            Err(e) => {
                warn!(error = %e, "could not read alert texts");
                Vec::new()
            }
        };
        info!(texts = ?texts, "alert raised");

        let (rules, auto_handled) = {
            let mut state = self.state.write().await;
            state.last_texts = texts.clone();
            (state.rules.clone(), state.auto_handled)
        };

        let mut controls: Option<Vec<ElementRef>> = None;
        for rule in &rules {
            let compiled = CompiledRule::from(rule);
            let Some(text) = texts.iter().find(|t| compiled.message.matches(t)) else {
                continue;
            };
            debug!(rule = %rule.message_text, text = %text, "alert rule matched");

            if let Some(button) = &compiled.button {
                if controls.is_none() {
                    controls = Some(candidate_controls(alert).await);
                }
                for control in controls.iter().flatten() {
                    let control_texts = control.all_texts().await.unwrap_or_default();
                    if control_texts.iter().any(|t| button.matches(t)) {
                        match control.tap(None).await {
                            Ok(()) => info!(button = %button.literal, "alert control tapped"),
                            Err(e) => warn!(button = %button.literal, error = %e, "alert control tap failed"),
                        }
                        return true;
                    }
                }
                debug!(button = %button.literal, "no alert control matched");
            }
            return true;
        }

        debug!(auto_handled, "no alert rule matched");
        auto_handled
    }
}

#[async_trait]
impl AlertCallback for AlertHandler {
    async fn on_alert(&self, alert: ElementRef) -> bool {
        self.handle(&alert).await
    }
}
