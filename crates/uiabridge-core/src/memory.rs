//! In-memory host built from an element snapshot.
//!
//! [`MemoryHost`] implements the full host capability interface over a
//! serialisable tree, records every gesture it receives as a [`HostEvent`],
//! and offers the controls a test (or a replay session) needs to drive the
//! bridge: relaunching the application, invalidating elements and raising
//! alerts through the installed alert callback.
//!
//! # Example
//!
//! ```no_run
//! use uiabridge_core::element::ElementSnapshot;
//! use uiabridge_core::memory::{HostSnapshot, MemoryHost};
//!
//! let tree = ElementSnapshot::new("UIAApplication")
//!     .with_child(ElementSnapshot::new("UIAWindow").with_child(
//!         ElementSnapshot::new("UIAButton").with_name("Login"),
//!     ));
//! let host = MemoryHost::new(HostSnapshot::with_tree(tree));
//! assert!(host.find("Login").is_some());
//! ```

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, Weak};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use crate::element::{ElementSnapshot, Point, Rect};
use crate::host::{
    AlertCallback, AppRef, Coordinates, ElementRef, GestureOptions, HostError, LocationOptions, RotateOptions,
    TapOptions, UiApplication, UiElement, UiTarget, VolumeButton,
};

/// Interval at which `wait_for_invalid` re-checks validity.
const INVALID_POLL: Duration = Duration::from_millis(100);

/// Classes that take keyboard focus when tapped.
const TEXT_INPUT_CLASSES: [&str; 4] = ["UIATextField", "UIASecureTextField", "UIASearchBar", "UIATextView"];

// ---------------------------------------------------------------------------
// Snapshot format
// ---------------------------------------------------------------------------

/// Static device properties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub model: String,
    pub name: String,
    pub system_name: String,
    pub system_version: String,
    pub rect: Rect,
}

impl Default for DeviceInfo {
    fn default() -> Self {
        Self {
            model: "iPhone".to_string(),
            name: "iPhone Simulator".to_string(),
            system_name: "iOS".to_string(),
            system_version: "9.3".to_string(),
            rect: Rect::new(0.0, 0.0, 375.0, 667.0),
        }
    }
}

/// The foreground application of a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppInfo {
    #[serde(default = "default_bundle_id")]
    pub bundle_id: String,
    #[serde(default = "default_version")]
    pub version: String,
    pub tree: ElementSnapshot,
}

fn default_bundle_id() -> String {
    "com.example.app".to_string()
}

fn default_version() -> String {
    "1.0".to_string()
}

/// Everything needed to build a [`MemoryHost`]; the `--tree` file format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostSnapshot {
    #[serde(default)]
    pub device: DeviceInfo,
    pub app: AppInfo,
}

impl HostSnapshot {
    /// A default device running an app with the given tree.
    pub fn with_tree(tree: ElementSnapshot) -> Self {
        Self {
            device: DeviceInfo::default(),
            app: AppInfo {
                bundle_id: default_bundle_id(),
                version: default_version(),
                tree,
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Event log
// ---------------------------------------------------------------------------

/// One operation the host carried out.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HostEvent {
    pub action: String,
    /// Name, label or class of the element acted on; `None` for screen-level
    /// operations.
    pub target: Option<String>,
    pub args: Value,
}

type EventLog = Arc<Mutex<Vec<HostEvent>>>;

async fn record(events: &EventLog, action: &str, target: Option<&str>, args: Value) {
    debug!(action, element = ?target, "host operation");
    events.lock().await.push(HostEvent {
        action: action.to_string(),
        target: target.map(str::to_string),
        args,
    });
}

fn secs(d: Duration) -> f64 {
    d.as_secs_f64()
}

// ---------------------------------------------------------------------------
// MemoryNode
// ---------------------------------------------------------------------------

/// One element of the in-memory tree.
pub struct MemoryNode {
    base: ElementSnapshot,
    describe: String,
    value: RwLock<Option<String>>,
    focus: AtomicBool,
    valid: AtomicBool,
    children: Vec<Arc<MemoryNode>>,
    parent: Weak<MemoryNode>,
    events: EventLog,
}

impl MemoryNode {
    fn build(snapshot: &ElementSnapshot, parent: Weak<MemoryNode>, events: &EventLog) -> Arc<Self> {
        Arc::new_cyclic(|me| MemoryNode {
            base: snapshot.node(),
            describe: snapshot
                .name
                .clone()
                .or_else(|| snapshot.label.clone())
                .unwrap_or_else(|| snapshot.classname.clone()),
            value: RwLock::new(snapshot.value.clone()),
            focus: AtomicBool::new(snapshot.focus),
            valid: AtomicBool::new(snapshot.valid),
            children: snapshot
                .children
                .iter()
                .map(|child| MemoryNode::build(child, me.clone(), events))
                .collect(),
            parent,
            events: events.clone(),
        })
    }

    pub fn classname(&self) -> &str {
        &self.base.classname
    }

    pub fn name(&self) -> Option<&str> {
        self.base.name.as_deref()
    }

    /// Marks this element and its whole subtree as gone from the UI.
    pub fn invalidate(&self) {
        self.valid.store(false, Ordering::SeqCst);
        for child in &self.children {
            child.invalidate();
        }
    }

    /// Depth-first search by name or label, including this node.
    pub fn find(self: &Arc<Self>, text: &str) -> Option<Arc<MemoryNode>> {
        if self.base.name.as_deref() == Some(text) || self.base.label.as_deref() == Some(text) {
            return Some(self.clone());
        }
        self.children.iter().find_map(|c| c.find(text))
    }

    fn focused(self: &Arc<Self>) -> Option<Arc<MemoryNode>> {
        if self.focus.load(Ordering::SeqCst) {
            return Some(self.clone());
        }
        self.children.iter().find_map(|c| c.focused())
    }

    fn check_valid(&self) -> Result<(), HostError> {
        if self.valid.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(HostError::Invalidated)
        }
    }

    async fn gesture(&self, action: &str, args: Value) -> Result<(), HostError> {
        self.check_valid()?;
        record(&self.events, action, Some(self.describe.as_str()), args).await;
        Ok(())
    }

    pub async fn current_value(&self) -> Option<String> {
        self.value.read().await.clone()
    }
}

#[async_trait]
impl UiElement for MemoryNode {
    async fn is_valid(&self) -> bool {
        self.valid.load(Ordering::SeqCst)
    }

    async fn element_dict(&self) -> Result<ElementSnapshot, HostError> {
        self.check_valid()?;
        let mut dict = self.base.clone();
        dict.value = self.value.read().await.clone();
        dict.focus = self.focus.load(Ordering::SeqCst);
        Ok(dict)
    }

    async fn children(&self) -> Result<Vec<ElementRef>, HostError> {
        self.check_valid()?;
        Ok(self.children.iter().map(|c| c.clone() as ElementRef).collect())
    }

    async fn parent(&self) -> Result<Option<ElementRef>, HostError> {
        self.check_valid()?;
        Ok(self.parent.upgrade().map(|p| p as ElementRef))
    }

    async fn tap(&self, offset: Option<Point>) -> Result<(), HostError> {
        self.gesture("tap", json!({"offset": offset})).await?;
        if TEXT_INPUT_CLASSES.contains(&self.base.classname.as_str()) {
            self.focus.store(true, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn double_tap(&self) -> Result<(), HostError> {
        self.gesture("double_tap", Value::Null).await
    }

    async fn tap_with_options(&self, options: &TapOptions) -> Result<(), HostError> {
        self.gesture("tap_with_options", json!(options)).await
    }

    async fn drag_inside(&self, options: &GestureOptions) -> Result<(), HostError> {
        self.gesture("drag_inside", json!(options)).await
    }

    async fn flick_inside(&self, options: &GestureOptions) -> Result<(), HostError> {
        self.gesture("flick_inside", json!(options)).await
    }

    async fn rotate(&self, options: &RotateOptions) -> Result<(), HostError> {
        self.gesture("rotate", json!(options)).await
    }

    async fn scroll_to_visible(&self) -> Result<(), HostError> {
        self.gesture("scroll_to_visible", Value::Null).await
    }

    async fn touch_and_hold(&self, duration: Duration) -> Result<(), HostError> {
        self.gesture("touch_and_hold", json!({"duration": secs(duration)})).await
    }

    async fn two_finger_tap(&self) -> Result<(), HostError> {
        self.gesture("two_finger_tap", Value::Null).await
    }

    async fn wait_for_invalid(&self, timeout: Duration) -> Result<bool, HostError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if !self.valid.load(Ordering::SeqCst) {
                return Ok(true);
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(INVALID_POLL).await;
        }
    }

    async fn set_value(&self, value: &str) -> Result<(), HostError> {
        self.gesture("set_value", json!({"value": value})).await?;
        *self.value.write().await = Some(value.to_string());
        Ok(())
    }

    async fn drag_to_value(&self, value: f64) -> Result<(), HostError> {
        if !(0.0..=1.0).contains(&value) {
            return Err(HostError::Failed(format!("value {value} is outside 0..1")));
        }
        self.gesture("drag_to_value", json!({"value": value})).await?;
        *self.value.write().await = Some(format!("{}%", (value * 100.0).round()));
        Ok(())
    }

    async fn type_string(&self, text: &str) -> Result<(), HostError> {
        self.check_valid()?;
        if !self.focus.load(Ordering::SeqCst) {
            return Err(HostError::Failed(format!("{} does not have keyboard focus", self.describe)));
        }
        self.gesture("type_string", json!({"text": text})).await?;
        let mut value = self.value.write().await;
        value.get_or_insert_with(String::new).push_str(text);
        Ok(())
    }
}

/// The host's null-object sentinel.
pub struct NilElement;

#[async_trait]
impl UiElement for NilElement {
    fn is_nil(&self) -> bool {
        true
    }

    async fn is_valid(&self) -> bool {
        false
    }

    async fn element_dict(&self) -> Result<ElementSnapshot, HostError> {
        Err(HostError::Invalidated)
    }

    async fn children(&self) -> Result<Vec<ElementRef>, HostError> {
        Ok(Vec::new())
    }

    async fn parent(&self) -> Result<Option<ElementRef>, HostError> {
        Ok(None)
    }

    async fn tap(&self, _offset: Option<Point>) -> Result<(), HostError> {
        Err(HostError::Invalidated)
    }

    async fn double_tap(&self) -> Result<(), HostError> {
        Err(HostError::Invalidated)
    }

    async fn tap_with_options(&self, _options: &TapOptions) -> Result<(), HostError> {
        Err(HostError::Invalidated)
    }

    async fn drag_inside(&self, _options: &GestureOptions) -> Result<(), HostError> {
        Err(HostError::Invalidated)
    }

    async fn flick_inside(&self, _options: &GestureOptions) -> Result<(), HostError> {
        Err(HostError::Invalidated)
    }

    async fn rotate(&self, _options: &RotateOptions) -> Result<(), HostError> {
        Err(HostError::Invalidated)
    }

    async fn scroll_to_visible(&self) -> Result<(), HostError> {
        Err(HostError::Invalidated)
    }

    async fn touch_and_hold(&self, _duration: Duration) -> Result<(), HostError> {
        Err(HostError::Invalidated)
    }

    async fn two_finger_tap(&self) -> Result<(), HostError> {
        Err(HostError::Invalidated)
    }

    async fn wait_for_invalid(&self, _timeout: Duration) -> Result<bool, HostError> {
        Ok(true)
    }

    async fn set_value(&self, _value: &str) -> Result<(), HostError> {
        Err(HostError::Invalidated)
    }

    async fn drag_to_value(&self, _value: f64) -> Result<(), HostError> {
        Err(HostError::Invalidated)
    }

    async fn type_string(&self, _text: &str) -> Result<(), HostError> {
        Err(HostError::Invalidated)
    }
}

// ---------------------------------------------------------------------------
// MemoryApp
// ---------------------------------------------------------------------------

/// An application instance. A relaunch creates a new one.
pub struct MemoryApp {
    root: Arc<MemoryNode>,
    bundle_id: String,
    version: String,
    orientation: AtomicI64,
    events: EventLog,
}

impl MemoryApp {
    fn launch(info: &AppInfo, events: &EventLog) -> Arc<Self> {
        Arc::new(Self {
            root: MemoryNode::build(&info.tree, Weak::new(), events),
            bundle_id: info.bundle_id.clone(),
            version: info.version.clone(),
            orientation: AtomicI64::new(1),
            events: events.clone(),
        })
    }

    pub fn node(&self) -> &Arc<MemoryNode> {
        &self.root
    }
}

#[async_trait]
impl UiApplication for MemoryApp {
    fn root(&self) -> ElementRef {
        self.root.clone()
    }

    async fn bundle_id(&self) -> Result<String, HostError> {
        Ok(self.bundle_id.clone())
    }

    async fn version(&self) -> Result<String, HostError> {
        Ok(self.version.clone())
    }

    async fn interface_orientation(&self) -> Result<i64, HostError> {
        Ok(self.orientation.load(Ordering::SeqCst))
    }

    async fn main_window(&self) -> Result<Option<ElementRef>, HostError> {
        Ok(self
            .root
            .children
            .iter()
            .find(|c| c.classname() == "UIAWindow")
            .map(|c| c.clone() as ElementRef))
    }

    async fn type_keys(&self, text: &str) -> Result<(), HostError> {
        let focused = self
            .root
            .focused()
            .ok_or_else(|| HostError::Failed("no element has keyboard focus".into()))?;
        record(&self.events, "keyboard_type", Some(focused.describe.as_str()), json!({"text": text})).await;
        let mut value = focused.value.write().await;
        value.get_or_insert_with(String::new).push_str(text);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MemoryHost
// ---------------------------------------------------------------------------

/// A device whose UI is an in-memory element tree.
pub struct MemoryHost {
    snapshot: HostSnapshot,
    app: RwLock<Arc<MemoryApp>>,
    orientation: AtomicI64,
    alert_handler: StdMutex<Option<Arc<dyn AlertCallback>>>,
    events: EventLog,
}

impl MemoryHost {
    pub fn new(snapshot: HostSnapshot) -> Self {
        let events: EventLog = Arc::new(Mutex::new(Vec::new()));
        let app = MemoryApp::launch(&snapshot.app, &events);
        Self {
            snapshot,
            app: RwLock::new(app),
            orientation: AtomicI64::new(1),
            alert_handler: StdMutex::new(None),
            events,
        }
    }

    /// Builds a host from the JSON form of a [`HostSnapshot`].
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        Ok(Self::new(serde_json::from_str(text)?))
    }

    /// The current application instance.
    pub async fn app(&self) -> Arc<MemoryApp> {
        self.app.read().await.clone()
    }

    /// Replaces the foreground application with a fresh instance of the same
    /// tree. Elements of the previous instance become invalid.
    pub async fn relaunch(&self) {
        let fresh = MemoryApp::launch(&self.snapshot.app, &self.events);
        let previous = std::mem::replace(&mut *self.app.write().await, fresh);
        previous.root.invalidate();
        info!(bundle_id = %self.snapshot.app.bundle_id, "application relaunched");
    }

    /// Looks up an element of the current application by name or label.
    pub fn find(&self, text: &str) -> Option<Arc<MemoryNode>> {
        let app = self.app.try_read().ok()?.clone();
        app.root.find(text)
    }

    /// Raises a modal alert built from `alert`.
    ///
    /// Calls the installed alert callback; when it reports the alert as
    /// unhandled (or none is installed) the host dismisses it itself, which
    /// is recorded as an `alert_default_dismiss` event. Returns the
    /// callback's verdict.
    pub async fn raise_alert(&self, alert: ElementSnapshot) -> bool {
        let node: ElementRef = MemoryNode::build(&alert, Weak::new(), &self.events);
        let handler = match self.alert_handler.lock() {
            Ok(slot) => slot.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        let handled = match handler {
            Some(handler) => handler.on_alert(node).await,
            None => false,
        };
        if !handled {
            record(&self.events, "alert_default_dismiss", None, Value::Null).await;
        }
        handled
    }

    /// Every operation carried out so far.
    pub async fn events(&self) -> Vec<HostEvent> {
        self.events.lock().await.clone()
    }

    pub async fn clear_events(&self) {
        self.events.lock().await.clear();
    }

    async fn screen(&self, action: &str, args: Value) -> Result<(), HostError> {
        record(&self.events, action, None, args).await;
        Ok(())
    }
}

#[async_trait]
impl UiTarget for MemoryHost {
    async fn front_most_app(&self) -> Result<AppRef, HostError> {
        Ok(self.app().await)
    }

    async fn rect(&self) -> Result<Rect, HostError> {
        Ok(self.snapshot.device.rect)
    }

    async fn model(&self) -> Result<String, HostError> {
        Ok(self.snapshot.device.model.clone())
    }

    async fn name(&self) -> Result<String, HostError> {
        Ok(self.snapshot.device.name.clone())
    }

    async fn system_name(&self) -> Result<String, HostError> {
        Ok(self.snapshot.device.system_name.clone())
    }

    async fn system_version(&self) -> Result<String, HostError> {
        Ok(self.snapshot.device.system_version.clone())
    }

    async fn device_orientation(&self) -> Result<i64, HostError> {
        Ok(self.orientation.load(Ordering::SeqCst))
    }

    async fn set_device_orientation(&self, orientation: i64) -> Result<(), HostError> {
        self.orientation.store(orientation, Ordering::SeqCst);
        self.app().await.orientation.store(orientation, Ordering::SeqCst);
        self.screen("set_device_orientation", json!({"orientation": orientation})).await
    }

    async fn capture_screen_with_name(&self, name: &str) -> Result<(), HostError> {
        self.screen("capture_screen", json!({"name": name})).await
    }

    async fn capture_rect_with_name(&self, rect: Rect, name: &str) -> Result<(), HostError> {
        self.screen("capture_rect", json!({"name": name, "rect": rect})).await
    }

    async fn delay(&self, duration: Duration) {
        record(&self.events, "delay", None, json!({"duration": secs(duration)})).await;
        tokio::time::sleep(duration).await;
    }

    async fn tap(&self, point: Point) -> Result<(), HostError> {
        self.screen("screen_tap", json!({"point": point})).await
    }

    async fn double_tap(&self, point: Point) -> Result<(), HostError> {
        self.screen("screen_double_tap", json!({"point": point})).await
    }

    async fn tap_with_options(&self, point: Point, options: &TapOptions) -> Result<(), HostError> {
        self.screen("screen_tap_with_options", json!({"point": point, "options": options})).await
    }

    async fn touch_and_hold(&self, point: Point, duration: Duration) -> Result<(), HostError> {
        self.screen("screen_touch_and_hold", json!({"point": point, "duration": secs(duration)}))
            .await
    }

    async fn drag_from_to(&self, from: Point, to: Point, duration: Duration) -> Result<(), HostError> {
        self.screen("drag", json!({"from": from, "to": to, "duration": secs(duration)})).await
    }

    async fn flick_from_to(&self, from: Point, to: Point) -> Result<(), HostError> {
        self.screen("flick", json!({"from": from, "to": to})).await
    }

    async fn pinch_close(&self, from: Point, to: Point, duration: Duration) -> Result<(), HostError> {
        self.screen("pinch_close", json!({"from": from, "to": to, "duration": secs(duration)}))
            .await
    }

    async fn pinch_open(&self, from: Point, to: Point, duration: Duration) -> Result<(), HostError> {
        self.screen("pinch_open", json!({"from": from, "to": to, "duration": secs(duration)}))
            .await
    }

    async fn rotate(&self, location: Point, options: &RotateOptions) -> Result<(), HostError> {
        self.screen("screen_rotate", json!({"location": location, "options": options})).await
    }

    async fn click_volume(&self, button: VolumeButton) -> Result<(), HostError> {
        self.screen("click_volume", json!({"button": button.name()})).await
    }

    async fn hold_volume(&self, button: VolumeButton, duration: Duration) -> Result<(), HostError> {
        self.screen("hold_volume", json!({"button": button.name(), "duration": secs(duration)}))
            .await?;
        tokio::time::sleep(duration).await;
        Ok(())
    }

    async fn deactivate_app_for_duration(&self, duration: Duration) -> Result<bool, HostError> {
        self.screen("deactivate_app", json!({"duration": secs(duration)})).await?;
        tokio::time::sleep(duration).await;
        Ok(true)
    }

    async fn lock_for_duration(&self, duration: Duration) -> Result<(), HostError> {
        self.screen("lock_for_duration", json!({"duration": secs(duration)})).await?;
        tokio::time::sleep(duration).await;
        Ok(())
    }

    async fn lock(&self) -> Result<(), HostError> {
        self.screen("lock", Value::Null).await
    }

    async fn unlock(&self) -> Result<(), HostError> {
        self.screen("unlock", Value::Null).await
    }

    async fn shake(&self) -> Result<(), HostError> {
        self.screen("shake", Value::Null).await
    }

    async fn set_location(
        &self,
        coordinates: &Coordinates,
        options: Option<&LocationOptions>,
    ) -> Result<(), HostError> {
        self.screen("set_location", json!({"coordinates": coordinates, "options": options}))
            .await
    }

    fn install_alert_handler(&self, handler: Arc<dyn AlertCallback>) {
        match self.alert_handler.lock() {
            Ok(mut slot) => *slot = Some(handler),
            Err(poisoned) => *poisoned.into_inner() = Some(handler),
        }
    }
}
