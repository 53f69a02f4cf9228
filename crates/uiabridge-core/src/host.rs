//! Capability interface of the UI automation host.
//!
//! The bridge never reaches into host objects by name. Everything a command can
//! do to the host is one of the methods declared here, split across three
//! object kinds:
//!
//! - [`UiTarget`] - the device: screen geometry, screen-level gestures,
//!   hardware buttons, screenshots and the alert hook
//! - [`UiApplication`] - the foreground application
//! - [`UiElement`] - a single node of the accessibility tree
//!
//! Implementations must be `Send + Sync` so they can be shared between the
//! session loop and the alert callback, which the host invokes on its own
//! schedule.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::element::{ElementSnapshot, Point, Rect};

/// Shared reference to a live host element.
pub type ElementRef = Arc<dyn UiElement>;

/// Shared reference to the foreground application.
pub type AppRef = Arc<dyn UiApplication>;

/// Errors surfaced by the host when an operation cannot be carried out.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum HostError {
    /// The element is no longer part of the UI.
    #[error("element is no longer valid")]
    Invalidated,

    /// The host does not implement the requested capability.
    #[error("operation not supported by host: {0}")]
    Unsupported(String),

    /// The host attempted the operation and it failed.
    #[error("{0}")]
    Failed(String),
}

// ---------------------------------------------------------------------------
// Gesture options
// ---------------------------------------------------------------------------

/// Options for a customised tap.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TapOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tap_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub touch_count: Option<u32>,
    /// Seconds the touch is held.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    /// Fractional offset inside the element.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tap_offset: Option<Point>,
}

/// Options for a drag or flick inside an element.
///
/// `repeat` and `interval` are consumed by the bridge, which replays the
/// gesture sequentially; the host only sees one gesture per call.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GestureOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub touch_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_offset: Option<Point>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_offset: Option<Point>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repeat: Option<u32>,
    /// Seconds between repeats.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<f64>,
}

impl GestureOptions {
    /// Single-finger gesture from the element centre to `end`.
    pub fn from_center(end: Point, duration: Option<f64>) -> Self {
        Self {
            touch_count: Some(1),
            duration,
            start_offset: Some(Point::new(0.5, 0.5)),
            end_offset: Some(end),
            ..Default::default()
        }
    }
}

/// Options for a rotation gesture.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RotateOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub center_offset: Option<Point>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub radius: Option<f64>,
    /// Radians.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotation: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub touch_count: Option<u32>,
}

/// A simulated GPS fix.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

/// Extra parameters for a simulated location fix.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LocationOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub altitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub course: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "horizontalAccuracy")]
    pub horizontal_accuracy: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "verticalAccuracy")]
    pub vertical_accuracy: Option<f64>,
}

/// Hardware volume buttons.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeButton {
    Up,
    Down,
}

impl VolumeButton {
    pub fn name(&self) -> &'static str {
        match self {
            VolumeButton::Up => "volume_up",
            VolumeButton::Down => "volume_down",
        }
    }
}

// ---------------------------------------------------------------------------
// Element
// ---------------------------------------------------------------------------

/// A node of the host's accessibility tree.
///
/// Geometry arguments are absolute points relative to the element's own
/// origin; the bridge converts fractional offsets before calling in.
#[async_trait]
pub trait UiElement: Send + Sync {
    /// Returns `true` for the host's null-object sentinel.
    ///
    /// Hosts that never return sentinel objects can keep the default.
    fn is_nil(&self) -> bool {
        false
    }

    /// Returns `false` once the element has left the UI.
    async fn is_valid(&self) -> bool;

    /// The attributes of this element, without its subtree.
    async fn element_dict(&self) -> Result<ElementSnapshot, HostError>;

    /// Direct children in display order.
    async fn children(&self) -> Result<Vec<ElementRef>, HostError>;

    /// The parent element, or `None` for the root.
    async fn parent(&self) -> Result<Option<ElementRef>, HostError>;

    /// The element's frame in screen coordinates.
    async fn rect(&self) -> Result<Rect, HostError> {
        Ok(self.element_dict().await?.rect)
    }

    /// The attributes of this element and its whole subtree.
    async fn element_tree(&self) -> Result<ElementSnapshot, HostError> {
        let mut node = self.element_dict().await?;
        for child in self.children().await? {
            node.children.push(child.element_tree().await?);
        }
        Ok(node)
    }

    /// Every non-empty text in the subtree, depth-first.
    async fn all_texts(&self) -> Result<Vec<String>, HostError> {
        Ok(self.element_tree().await?.texts())
    }

    /// Taps the element, at `offset` when given or at its centre otherwise.
    async fn tap(&self, offset: Option<Point>) -> Result<(), HostError>;

    async fn double_tap(&self) -> Result<(), HostError>;

    async fn tap_with_options(&self, options: &TapOptions) -> Result<(), HostError>;

    async fn drag_inside(&self, options: &GestureOptions) -> Result<(), HostError>;

    async fn flick_inside(&self, options: &GestureOptions) -> Result<(), HostError>;

    async fn rotate(&self, options: &RotateOptions) -> Result<(), HostError>;

    async fn scroll_to_visible(&self) -> Result<(), HostError>;

    async fn touch_and_hold(&self, duration: Duration) -> Result<(), HostError>;

    async fn two_finger_tap(&self) -> Result<(), HostError>;

    /// Waits up to `timeout` for the element to become invalid.
    ///
    /// Returns whether it did.
    async fn wait_for_invalid(&self, timeout: Duration) -> Result<bool, HostError>;

    async fn set_value(&self, value: &str) -> Result<(), HostError>;

    /// Drags a slider-like element to the fractional position `value`.
    async fn drag_to_value(&self, value: f64) -> Result<(), HostError>;

    /// Types `text` into the element, which must hold keyboard focus.
    async fn type_string(&self, text: &str) -> Result<(), HostError>;
}

// ---------------------------------------------------------------------------
// Application
// ---------------------------------------------------------------------------

/// The foreground application.
#[async_trait]
pub trait UiApplication: Send + Sync {
    /// The application as an element (the root of its accessibility tree).
    fn root(&self) -> ElementRef;

    async fn bundle_id(&self) -> Result<String, HostError>;

    async fn version(&self) -> Result<String, HostError>;

    /// Host interface orientation code.
    async fn interface_orientation(&self) -> Result<i64, HostError>;

    async fn main_window(&self) -> Result<Option<ElementRef>, HostError>;

    /// Types on the application keyboard, wherever focus currently is.
    async fn type_keys(&self, text: &str) -> Result<(), HostError>;
}

// ---------------------------------------------------------------------------
// Target
// ---------------------------------------------------------------------------

/// Receives modal interruptions raised by the host.
///
/// The return value tells the host whether the alert was handled; `false`
/// lets the host apply its own default dismissal. Implementations must not
/// wait on the session loop.
#[async_trait]
pub trait AlertCallback: Send + Sync {
    async fn on_alert(&self, alert: ElementRef) -> bool;
}

/// The device under automation.
///
/// Points passed to screen-level gestures are absolute screen coordinates.
#[async_trait]
pub trait UiTarget: Send + Sync {
    /// The application currently in the foreground.
    ///
    /// May return a different object on every call (e.g. after a relaunch).
    async fn front_most_app(&self) -> Result<AppRef, HostError>;

    async fn rect(&self) -> Result<Rect, HostError>;

    async fn model(&self) -> Result<String, HostError>;

    async fn name(&self) -> Result<String, HostError>;

    async fn system_name(&self) -> Result<String, HostError>;

    async fn system_version(&self) -> Result<String, HostError>;

    async fn device_orientation(&self) -> Result<i64, HostError>;

    async fn set_device_orientation(&self, orientation: i64) -> Result<(), HostError>;

    /// Captures the whole screen under `name` in the host's screenshot area.
    async fn capture_screen_with_name(&self, name: &str) -> Result<(), HostError>;

    /// Captures `rect` under `name` in the host's screenshot area.
    async fn capture_rect_with_name(&self, rect: Rect, name: &str) -> Result<(), HostError>;

    /// Pauses the host for `duration`. Also used by the bridge between
    /// repeated gestures.
    async fn delay(&self, duration: Duration);

    /// The attribute tree of the whole screen.
    async fn element_tree(&self) -> Result<ElementSnapshot, HostError> {
        self.front_most_app().await?.root().element_tree().await
    }

    async fn tap(&self, point: Point) -> Result<(), HostError>;

    async fn double_tap(&self, point: Point) -> Result<(), HostError>;

    async fn tap_with_options(&self, point: Point, options: &TapOptions) -> Result<(), HostError>;

    async fn touch_and_hold(&self, point: Point, duration: Duration) -> Result<(), HostError>;

    async fn drag_from_to(&self, from: Point, to: Point, duration: Duration) -> Result<(), HostError>;

    async fn flick_from_to(&self, from: Point, to: Point) -> Result<(), HostError>;

    async fn pinch_close(&self, from: Point, to: Point, duration: Duration) -> Result<(), HostError>;

    async fn pinch_open(&self, from: Point, to: Point, duration: Duration) -> Result<(), HostError>;

    async fn rotate(&self, location: Point, options: &RotateOptions) -> Result<(), HostError>;

    async fn click_volume(&self, button: VolumeButton) -> Result<(), HostError>;

    async fn hold_volume(&self, button: VolumeButton, duration: Duration) -> Result<(), HostError>;

    /// Sends the application to the background for `duration`.
    ///
    /// Returns whether it came back to the foreground.
    async fn deactivate_app_for_duration(&self, duration: Duration) -> Result<bool, HostError>;

    async fn lock_for_duration(&self, duration: Duration) -> Result<(), HostError>;

    async fn lock(&self) -> Result<(), HostError>;

    async fn unlock(&self) -> Result<(), HostError>;

    async fn shake(&self) -> Result<(), HostError>;

    async fn set_location(
        &self,
        coordinates: &Coordinates,
        options: Option<&LocationOptions>,
    ) -> Result<(), HostError>;

    /// Registers the handler the host invokes for every modal interruption.
    ///
    /// Replaces any previously installed handler.
    fn install_alert_handler(&self, handler: Arc<dyn AlertCallback>);
}
