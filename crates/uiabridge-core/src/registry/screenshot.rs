//! Screenshot naming and capture.

use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use tracing::info;

use super::Registry;
use crate::element::Rect;
use crate::error::BridgeError;

/// A trailing image extension, e.g. `.png` or `.jpeg`.
fn extension_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\.\w{3,4} *$").expect("extension pattern"))
}

/// Where a screenshot goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScreenshotLocation {
    /// Name handed to the host capture call, without extension.
    pub capture_name: String,
    /// Reported file name (`<capture_name>.png`).
    pub name: String,
    /// Reported file path, ending in `.png`.
    pub path: String,
}

/// Derives the screenshot name and path from an optional requested path.
///
/// The name defaults to `now_ms`. A requested path contributes its last
/// segment, minus any 3-4 character extension, as the name. Relative or
/// missing paths resolve under `dir`; an absolute path ending in `/` gets the
/// name appended. `.png` is added to both name and path.
pub fn screenshot_location(requested: Option<&str>, dir: &Path, now_ms: i64) -> ScreenshotLocation {
    let mut name = now_ms.to_string();
    let mut path = None;

    if let Some(requested) = requested.filter(|p| !p.is_empty()) {
        let (parent, last) = match requested.rfind('/') {
            Some(i) => (&requested[..=i], &requested[i + 1..]),
            None => ("", requested),
        };
        if !last.is_empty() {
            name = extension_regex().replace(last, "").into_owned();
        }
        if requested.starts_with('/') {
            path = Some(format!("{parent}{name}"));
        }
    }

    let path = path.unwrap_or_else(|| dir.join(&name).to_string_lossy().into_owned());
    ScreenshotLocation {
        name: format!("{name}.png"),
        path: format!("{path}.png"),
        capture_name: name,
    }
}

impl Registry {
    /// Captures the screen, or `rect` of it, and announces the file.
    ///
    /// Returns the reported path.
    pub async fn capture(&self, rect: Option<Rect>, requested: Option<&str>) -> Result<String, BridgeError> {
        let now_ms = chrono::Utc::now().timestamp_millis();
        let location = screenshot_location(requested, &self.screenshot_dir, now_ms);

        match rect {
            Some(rect) => self.target.capture_rect_with_name(rect, &location.capture_name).await?,
            None => self.target.capture_screen_with_name(&location.capture_name).await?,
        }
        info!(path = %location.path, "screenshot captured");
        self.channel.screenshot(location.name, location.path.clone()).await;
        Ok(location.path)
    }
}
