//! Geometry and attribute types shared by every host backend.
//!
//! These are the shapes that cross the wire: rects are reported to the
//! controller as `{"origin": {"x", "y"}, "size": {"width", "height"}}`, and
//! element dictionaries and trees are serialized [`ElementSnapshot`]s. The same
//! snapshot format is the input of the in-memory host.

use serde::{Deserialize, Serialize};

/// A point in screen coordinates, or a fractional offset when used as one.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Width and height in screen points.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

/// The frame of an element or of the device screen.
///
/// Coordinates are in screen points, with the origin at the top-left corner
/// of the screen.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub origin: Point,
    pub size: Size,
}

impl Rect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            origin: Point { x, y },
            size: Size { width, height },
        }
    }

    /// Converts a fractional offset into an absolute point relative to the
    /// rect's own origin (`{0.5, 0.5}` is the centre of the rect's size).
    pub fn scale(&self, fraction: Point) -> Point {
        Point {
            x: self.size.width * fraction.x,
            y: self.size.height * fraction.y,
        }
    }

    /// Like [`scale`](Self::scale) but truncates to whole points.
    pub fn scale_floor(&self, fraction: Point) -> Point {
        let p = self.scale(fraction);
        Point {
            x: p.x.floor(),
            y: p.y.floor(),
        }
    }
}

/// Serializable attributes of a UI element, optionally with its subtree.
///
/// Used both as the element dictionary reported to the controller and as the
/// input format for [`MemoryHost`](crate::memory::MemoryHost).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ElementSnapshot {
    /// Host class of the element (e.g. `UIAButton`, `UIAWindow`).
    pub classname: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,

    #[serde(default)]
    pub rect: Rect,

    #[serde(default = "default_true")]
    pub visible: bool,

    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_true")]
    pub valid: bool,

    #[serde(default)]
    pub focus: bool,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ElementSnapshot>,
}

fn default_true() -> bool {
    true
}

impl ElementSnapshot {
    /// Creates a visible, enabled snapshot with only a class name.
    pub fn new(classname: impl Into<String>) -> Self {
        Self {
            classname: classname.into(),
            visible: true,
            enabled: true,
            valid: true,
            ..Default::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn with_rect(mut self, rect: Rect) -> Self {
        self.rect = rect;
        self
    }

    pub fn with_child(mut self, child: ElementSnapshot) -> Self {
        self.children.push(child);
        self
    }

    /// A copy of this node without its subtree.
    pub fn node(&self) -> Self {
        Self {
            children: Vec::new(),
            ..self.clone()
        }
    }

    /// Returns the attribute named `key` as a string, if it exists.
    ///
    /// Keys are matched case-insensitively. Boolean attributes render as
    /// `"true"`/`"false"`.
    pub fn attribute(&self, key: &str) -> Option<String> {
        match key.to_ascii_lowercase().as_str() {
            "classname" | "type" => Some(self.classname.clone()),
            "name" => self.name.clone(),
            "label" => self.label.clone(),
            "value" => self.value.clone(),
            "visible" | "isvisible" => Some(self.visible.to_string()),
            "enabled" | "isenabled" => Some(self.enabled.to_string()),
            "valid" | "isvalid" => Some(self.valid.to_string()),
            "focus" | "haskeyboardfocus" => Some(self.focus.to_string()),
            _ => None,
        }
    }

    /// Every non-empty label, name and value in this subtree, depth-first.
    pub fn texts(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_texts(&mut out);
        out
    }

    fn collect_texts(&self, out: &mut Vec<String>) {
        for text in [&self.label, &self.name, &self.value].into_iter().flatten() {
            if !text.is_empty() && !out.contains(text) {
                out.push(text.clone());
            }
        }
        for child in &self.children {
            child.collect_texts(out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rect_serializes_as_origin_and_size() {
        let rect = Rect::new(0.0, 0.0, 375.0, 667.0);
        let json = serde_json::to_value(rect).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"origin": {"x": 0.0, "y": 0.0}, "size": {"width": 375.0, "height": 667.0}})
        );
    }

    #[test]
    fn scale_uses_size_only() {
        let rect = Rect::new(100.0, 200.0, 50.0, 20.0);
        assert_eq!(rect.scale(Point::new(0.5, 0.5)), Point::new(25.0, 10.0));
        assert_eq!(rect.scale_floor(Point::new(0.33, 0.33)), Point::new(16.0, 6.0));
    }

    #[test]
    fn snapshot_defaults_from_minimal_json() {
        let snap: ElementSnapshot = serde_json::from_str(r#"{"classname":"UIAButton"}"#).unwrap();
        assert!(snap.visible);
        assert!(snap.enabled);
        assert!(snap.valid);
        assert!(!snap.focus);
        assert!(snap.children.is_empty());
    }

    #[test]
    fn attribute_lookup_is_case_insensitive() {
        let snap = ElementSnapshot::new("UIAButton").with_name("OK");
        assert_eq!(snap.attribute("ClassName").as_deref(), Some("UIAButton"));
        assert_eq!(snap.attribute("NAME").as_deref(), Some("OK"));
        assert_eq!(snap.attribute("isVisible").as_deref(), Some("true"));
        assert_eq!(snap.attribute("label"), None);
        assert_eq!(snap.attribute("bogus"), None);
    }

    #[test]
    fn texts_are_depth_first_and_deduplicated() {
        let snap = ElementSnapshot::new("UIAAlert")
            .with_name("Allow access?")
            .with_child(ElementSnapshot::new("UIAStaticText").with_label("Allow access?"))
            .with_child(ElementSnapshot::new("UIAButton").with_label("OK").with_name("OK"));
        assert_eq!(snap.texts(), vec!["Allow access?", "OK"]);
    }
}
