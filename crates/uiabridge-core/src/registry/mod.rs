//! Command registry: method name to handler.
//!
//! Every wire method is a variant of [`Method`]. [`Registry::dispatch`] looks
//! the name up, then routes to the handler group for its namespace
//! (`uia.element.*`, `uia.application.*`, `uia.target.*` and the session and
//! cache methods). Handlers resolve handle arguments through the
//! [`HandleCache`], call into the host and turn the outcome into a [`Reply`].
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use uiabridge_core::alert::AlertState;
//! use uiabridge_core::element::ElementSnapshot;
//! use uiabridge_core::memory::{HostSnapshot, MemoryHost};
//! use uiabridge_core::protocol::{Command, Reply};
//! use uiabridge_core::registry::{Registry, SessionControl};
//!
//! #[tokio::main]
//! async fn main() {
//!     let host = Arc::new(MemoryHost::new(HostSnapshot::with_tree(ElementSnapshot::new("UIAApplication"))));
//!     let mut registry = Registry::new(host, AlertState::default().shared(), std::env::temp_dir())
//!         .await
//!         .unwrap();
//!     let mut control = SessionControl { exchange_timeout: std::time::Duration::from_secs(10) };
//!
//!     let cmd = Command::new("1", "uia.target.get_model", vec![]);
//!     let reply = registry.dispatch(&cmd, &mut control).await.unwrap();
//!     assert_eq!(reply, Reply::value("iPhone"));
//! }
//! ```

mod application;
mod element;
mod screenshot;
mod target;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, debug_span, Instrument};

use crate::alert::SharedAlertState;
use crate::channel::PayloadChannel;
use crate::error::BridgeError;
use crate::handle::{Handle, HandleCache, HandleRef};
use crate::host::{ElementRef, UiTarget};
use crate::protocol::{Command, Params, Reply};

pub use screenshot::{screenshot_location, ScreenshotLocation};

macro_rules! methods {
    ($($variant:ident => $name:literal,)*) => {
        /// Every method the controller may invoke.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum Method {
            $($variant,)*
        }

        impl Method {
            pub const ALL: &'static [Method] = &[$(Method::$variant,)*];

            /// The wire name.
            pub fn name(&self) -> &'static str {
                match self {
                    $(Method::$variant => $name,)*
                }
            }

            pub fn from_name(name: &str) -> Option<Self> {
                match name {
                    $($name => Some(Method::$variant),)*
                    _ => None,
                }
            }
        }
    };
}

methods! {
    Release => "release",
    UiaRelease => "uia.release",
    SetExchangeTimeout => "uia.set_cmd_fetch_delegate_timeout",
    GetExchangeTimeout => "uia.get_cmd_fetch_delegate_timeout",
    FrontMostApp => "uia.front_most_app",
    CacheReleaseAll => "uia.uia_elements_cache.release_all",
    CacheReleaseInvalid => "uia.uia_elements_cache.release_invalid",
    CacheReleaseElement => "uia.uia_elements_cache.release_element",

    ElementFunction => "uia.element.function",
    ElementIsValid => "uia.element.is_valid",
    ElementFind => "uia.element.find",
    ElementFindElements => "uia.element.find_elements",
    ElementFirstWithName => "uia.element.first_with_name",
    ElementWithName => "uia.element.with_name",
    ElementFirstWithPredicate => "uia.element.first_with_predicate",
    ElementWithPredicate => "uia.element.with_predicate",
    ElementFirstWithValueForKey => "uia.element.first_with_value_for_key",
    ElementWithValueForKey => "uia.element.with_value_for_key",
    ElementGetParent => "uia.element.get_parent",
    ElementGetChildren => "uia.element.get_children",
    ElementGetAttr => "uia.element.get_attr",
    ElementGetRect => "uia.element.get_rect",
    ElementCapture => "uia.element.capture",
    ElementTap => "uia.element.tap",
    ElementDoubleTap => "uia.element.double_tap",
    ElementTapWithOptions => "uia.element.tap_with_options",
    ElementClick => "uia.element.click",
    ElementDoubleClick => "uia.element.double_click",
    ElementDragInsideWithOptions => "uia.element.drag_inside_with_options",
    ElementDragInsideRightToLeft => "uia.element.drag_inside_right_to_left",
    ElementDragInsideLeftToRight => "uia.element.drag_inside_left_to_right",
    ElementDragInsideUpToDown => "uia.element.drag_inside_up_to_down",
    ElementDragInsideDownToUp => "uia.element.drag_inside_down_to_up",
    ElementFlickInsideWithOptions => "uia.element.flick_inside_with_options",
    ElementFlickInsideRightToLeft => "uia.element.flick_inside_right_to_left",
    ElementFlickInsideLeftToRight => "uia.element.flick_inside_left_to_right",
    ElementFlickInsideUpToDown => "uia.element.flick_inside_up_to_down",
    ElementFlickInsideDownToUp => "uia.element.flick_inside_down_to_up",
    ElementRotateWithOptions => "uia.element.rotate_with_options",
    ElementScrollToVisible => "uia.element.scroll_to_visible",
    ElementTouchAndHold => "uia.element.touch_and_hold",
    ElementTwoFingerTap => "uia.element.two_finger_tap",
    ElementWaitForInvalid => "uia.element.wait_for_invalid",
    ElementSetValue => "uia.element.set_value",
    ElementDragToValue => "uia.element.drag_to_value",
    ElementSentKeys => "uia.element.sent_keys",
    ElementGetElementDict => "uia.element.get_element_dict",
    ElementLogElementDict => "uia.element.log_element_dict",
    ElementGetElementTree => "uia.element.get_element_tree",
    ElementLogElementTreeExt => "uia.element.log_element_tree_ext",

    ApplicationFunction => "uia.application.function",
    ApplicationGetMainWindow => "uia.application.get_main_window",
    ApplicationGetInterfaceOrientation => "uia.application.get_interface_orientation",
    ApplicationGetBundleId => "uia.application.get_app_bundle_id",
    ApplicationGetVersion => "uia.application.get_app_version",

    TargetFunction => "uia.target.function",
    TargetGetRect => "uia.target.get_rect",
    TargetGetModel => "uia.target.get_model",
    TargetGetName => "uia.target.get_name",
    TargetGetSystemName => "uia.target.get_system_name",
    TargetGetSystemVersion => "uia.target.get_system_version",
    TargetCaptureRect => "uia.target.capture_rect",
    TargetCaptureScreen => "uia.target.capture_screen",
    TargetGetElementTreeAndCaptureScreen => "uia.target.get_element_tree_and_capture_screen",
    TargetSetAlertRules => "uia.target.set_rules_of_alert_auto_handle",
    TargetGetAlertRules => "uia.target.get_rules_of_alert_auto_handle",
    TargetAddAlertRule => "uia.target.add_rule_of_alert_auto_handle",
    TargetCleanAlertRules => "uia.target.clean_rules_of_alert_auto_handle",
    TargetTurnOnAutoCloseAlert => "uia.target.turn_on_auto_close_alert",
    TargetTurnOffAutoCloseAlert => "uia.target.turn_off_auto_close_alert",
    TargetGetLastAlertMsg => "uia.target.get_last_alert_msg",
    TargetDelay => "uia.target.delay",
    TargetGetElementTree => "uia.target.get_element_tree",
    TargetLogElementTreeExt => "uia.target.log_element_tree_ext",
    TargetClickVolumeDown => "uia.target.click_volume_down",
    TargetClickVolumeUp => "uia.target.click_volume_up",
    TargetHoldVolumeDown => "uia.target.hold_volume_down",
    TargetHoldVolumeUp => "uia.target.hold_volume_up",
    TargetDeactivateAppForDuration => "uia.target.deactivate_app_ror_duration",
    TargetGetDeviceOrientation => "uia.target.get_device_orientation",
    TargetTap => "uia.target.tap",
    TargetDoubleTap => "uia.target.double_tap",
    TargetTapWithOptions => "uia.target.tap_with_options",
    TargetTouchAndHold => "uia.target.touch_and_hold",
    TargetDragFromToForDuration => "uia.target.drag_from_to_for_duration",
    TargetDragRightToLeft => "uia.target.drag_right_to_left",
    TargetDragLeftToRight => "uia.target.drag_left_to_right",
    TargetDragUpToDown => "uia.target.drag_up_to_down",
    TargetDragDownToUp => "uia.target.drag_down_to_up",
    TargetFlickFromTo => "uia.target.flick_from_to",
    TargetFlickRightToLeft => "uia.target.flick_right_to_left",
    TargetFlickLeftToRight => "uia.target.flick_left_to_right",
    TargetFlickUpToDown => "uia.target.flick_up_to_down",
    TargetFlickDownToUp => "uia.target.flick_down_to_up",
    TargetLockForDuration => "uia.target.lock_for_duration",
    TargetPinchCloseFromToForDuration => "uia.target.pinch_close_from_to_for_duration",
    TargetPinchOpenFromToForDuration => "uia.target.pinch_open_from_to_for_duration",
    TargetRotateWithOptions => "uia.target.rotate_with_options",
    TargetSetDeviceOrientation => "uia.target.set_device_orientation",
    TargetSetLocation => "uia.target.set_location",
    TargetSetLocationWithOptions => "uia.target.set_location_with_options",
    TargetShake => "uia.target.shake",
    TargetUnlock => "uia.target.unlock",
    TargetLock => "uia.target.lock",

    KeyboardSentKeys => "uia.keyboard.sent_keys",
}

/// Handler group of a method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Namespace {
    Session,
    Element,
    Application,
    Target,
}

impl Method {
    fn namespace(&self) -> Namespace {
        let name = self.name();
        if name.starts_with("uia.element.") {
            Namespace::Element
        } else if name.starts_with("uia.application.") {
            Namespace::Application
        } else if name.starts_with("uia.target.") || name.starts_with("uia.keyboard.") {
            Namespace::Target
        } else {
            Namespace::Session
        }
    }
}

/// Session settings commands may change.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionControl {
    pub exchange_timeout: Duration,
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Executes commands against a host target.
pub struct Registry {
    target: Arc<dyn UiTarget>,
    cache: HandleCache,
    alerts: SharedAlertState,
    channel: PayloadChannel,
    screenshot_dir: PathBuf,
}

impl Registry {
    /// Creates a registry with handle `1` bound to the target's foreground
    /// application. Out-of-band payloads go to a [`PayloadChannel::silent`]
    /// channel until [`with_channel`](Self::with_channel) replaces it.
    pub async fn new(
        target: Arc<dyn UiTarget>,
        alerts: SharedAlertState,
        screenshot_dir: impl Into<PathBuf>,
    ) -> Result<Self, BridgeError> {
        let app = target.front_most_app().await?;
        Ok(Self {
            cache: HandleCache::new(app.root()),
            target,
            alerts,
            channel: PayloadChannel::silent(),
            screenshot_dir: screenshot_dir.into(),
        })
    }

    pub fn with_channel(mut self, channel: PayloadChannel) -> Self {
        self.channel = channel;
        self
    }

    pub fn target(&self) -> &Arc<dyn UiTarget> {
        &self.target
    }

    pub fn cache(&self) -> &HandleCache {
        &self.cache
    }

    pub fn channel(&self) -> &PayloadChannel {
        &self.channel
    }

    pub fn alerts(&self) -> &SharedAlertState {
        &self.alerts
    }

    pub fn screenshot_dir(&self) -> &Path {
        &self.screenshot_dir
    }

    /// Executes one command.
    pub async fn dispatch(&mut self, command: &Command, control: &mut SessionControl) -> Result<Reply, BridgeError> {
        let method = Method::from_name(&command.method)
            .ok_or_else(|| BridgeError::UnknownMethod(command.method.clone()))?;
        let span = debug_span!("dispatch", method = method.name());
        async {
            let params = Params::new(&command.params);
            let reply = match method.namespace() {
                Namespace::Session => self.session_method(method, params, control).await,
                Namespace::Element => self.element_method(method, &command.id, params).await,
                Namespace::Application => self.application_method(method, params).await,
                Namespace::Target => self.target_method(method, &command.id, params).await,
            };
            if let Err(e) = &reply {
                debug!(error = %e, "handler failed");
            }
            reply
        }
        .instrument(span)
        .await
    }

    async fn session_method(
        &mut self,
        method: Method,
        p: Params<'_>,
        control: &mut SessionControl,
    ) -> Result<Reply, BridgeError> {
        match method {
            Method::Release | Method::UiaRelease => Ok(Reply::Release),
            Method::SetExchangeTimeout => {
                if let Some(seconds) = p.get(0).and_then(leading_integer).filter(|s| *s > 0) {
                    control.exchange_timeout = Duration::from_secs(seconds as u64);
                    debug!(seconds, "exchange timeout changed");
                }
                Ok(Reply::none())
            }
            Method::GetExchangeTimeout => Ok(Reply::value(control.exchange_timeout.as_secs())),
            Method::FrontMostApp => {
                let app = self.target.front_most_app().await?;
                Ok(Reply::value(self.cache.put(app.root())))
            }
            Method::CacheReleaseAll => {
                self.cache.release_all();
                Ok(Reply::none())
            }
            Method::CacheReleaseInvalid => {
                self.cache.release_invalid().await;
                Ok(Reply::none())
            }
            Method::CacheReleaseElement => {
                if let HandleRef::Id(id) = HandleRef::from_value(p.required(0)?) {
                    self.cache.release(id);
                }
                Ok(Reply::none())
            }
            other => Err(BridgeError::UnknownMethod(other.name().to_string())),
        }
    }

    // -----------------------------------------------------------------------
    // Shared helpers
    // -----------------------------------------------------------------------

    /// Resolves the handle reference at `index`. A missing one is invalid.
    async fn element_at(&mut self, p: &Params<'_>, index: usize) -> Result<ElementRef, BridgeError> {
        let reference = HandleRef::from_value(p.get(index).unwrap_or(&Value::Null));
        self.cache.resolve(self.target.as_ref(), &reference).await
    }

    fn put(&mut self, element: ElementRef) -> Option<Handle> {
        self.cache.put(element)
    }

    fn put_all(&mut self, elements: Vec<ElementRef>) -> Vec<Handle> {
        self.cache.put_many(elements).into_iter().flatten().collect()
    }

    /// Pause after one repetition of a repeated gesture.
    async fn repeat_pause(&self, repeat: u32, interval: f64) -> Result<(), BridgeError> {
        if repeat > 1 && interval > 0.0 {
            self.target.delay(seconds(interval, 0)?).await;
        }
        Ok(())
    }
}

/// A non-negative number of seconds as a duration.
fn seconds(value: f64, index: usize) -> Result<Duration, BridgeError> {
    Duration::try_from_secs_f64(value)
        .map_err(|_| BridgeError::invalid_argument(index, format!("{value} is not a valid duration")))
}

/// The integer a loosely-typed timeout value starts with: `12`, `12.7` and
/// `"12s"` all give 12.
fn leading_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.trunc() as i64)),
        Value::String(s) => {
            let s = s.trim_start();
            let end = s
                .char_indices()
                .find(|(i, c)| !(c.is_ascii_digit() || (*i == 0 && (*c == '-' || *c == '+'))))
                .map_or(s.len(), |(i, _)| i);
            s[..end].parse().ok()
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn method_names_round_trip() {
        for method in Method::ALL {
            assert_eq!(Method::from_name(method.name()), Some(*method));
        }
        assert_eq!(Method::from_name("uia.element.fly"), None);
    }

    #[test]
    fn method_table_is_complete() {
        assert_eq!(Method::ALL.len(), 105);
        assert!(Method::from_name("uia.target.deactivate_app_ror_duration").is_some());
        assert!(Method::from_name("uia.keyboard.sent_keys").is_some());
    }

    #[test]
    fn namespaces() {
        assert_eq!(Method::ElementTap.namespace(), Namespace::Element);
        assert_eq!(Method::KeyboardSentKeys.namespace(), Namespace::Target);
        assert_eq!(Method::ApplicationGetVersion.namespace(), Namespace::Application);
        assert_eq!(Method::CacheReleaseAll.namespace(), Namespace::Session);
        assert_eq!(Method::Release.namespace(), Namespace::Session);
    }

    #[test]
    fn timeout_values() {
        assert_eq!(leading_integer(&json!(12)), Some(12));
        assert_eq!(leading_integer(&json!(12.7)), Some(12));
        assert_eq!(leading_integer(&json!("30s")), Some(30));
        assert_eq!(leading_integer(&json!("abc")), None);
        assert_eq!(leading_integer(&json!(true)), None);
    }

    #[test]
    fn negative_seconds_are_rejected() {
        assert!(seconds(-1.0, 3).is_err());
        assert_eq!(seconds(1.5, 0).unwrap(), Duration::from_millis(1500));
    }
}
