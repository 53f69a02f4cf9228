//! Integer handles for live host elements.
//!
//! The wire protocol is stateless, but host elements are not addressable by
//! value. [`HandleCache`] hands out small integers for elements the controller
//! has seen and resolves them back on later commands.
//!
//! Handle `1` is reserved for the foreground application and is re-bound to
//! the host's current foreground application on every integer resolve, so a
//! relaunch never leaves it pointing at a dead object. It is never released.

use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use serde_json::Value;
use tracing::{debug, trace};

use crate::error::BridgeError;
use crate::host::{ElementRef, UiTarget};
use crate::qpath::QPath;

/// An issued element handle.
pub type Handle = u64;

/// The handle permanently bound to the foreground application.
pub const APP_HANDLE: Handle = 1;

/// Locator strings accepted in place of a handle: a QPath starting with a
/// class-name selector.
const LOCATOR_PATTERN: &str = r#"(?i)^/classname *= *('|")\w+('|").*$"#;

fn locator_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(LOCATOR_PATTERN).expect("locator pattern"))
}

/// What a command passes where an element is expected.
#[derive(Debug, Clone, PartialEq)]
pub enum HandleRef {
    Id(Handle),
    Locator(String),
    /// Anything else; rejected at resolve time.
    Invalid(String),
}

impl HandleRef {
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::Number(n) => match n.as_u64() {
                Some(id) => HandleRef::Id(id),
                None => HandleRef::Invalid(n.to_string()),
            },
            Value::String(s) => HandleRef::Locator(s.clone()),
            other => HandleRef::Invalid(other.to_string()),
        }
    }
}

impl fmt::Display for HandleRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandleRef::Id(id) => write!(f, "{id}"),
            HandleRef::Locator(s) | HandleRef::Invalid(s) => f.write_str(s),
        }
    }
}

/// Cache of elements reachable by handle.
pub struct HandleCache {
    entries: HashMap<Handle, ElementRef>,
    next: Handle,
}

impl HandleCache {
    /// Creates a cache with `application` bound to [`APP_HANDLE`].
    pub fn new(application: ElementRef) -> Self {
        let mut entries = HashMap::new();
        entries.insert(APP_HANDLE, application);
        Self {
            entries,
            next: APP_HANDLE + 1,
        }
    }

    /// Issues a handle for `element`.
    ///
    /// Returns `None` for the host's null-object sentinel, without consuming
    /// an id.
    pub fn put(&mut self, element: ElementRef) -> Option<Handle> {
        if element.is_nil() {
            return None;
        }
        let id = self.next;
        self.next += 1;
        self.entries.insert(id, element);
        trace!(handle = id, "handle issued");
        Some(id)
    }

    /// [`put`](Self::put) for each element, preserving order.
    pub fn put_many(&mut self, elements: impl IntoIterator<Item = ElementRef>) -> Vec<Option<Handle>> {
        elements.into_iter().map(|e| self.put(e)).collect()
    }

    /// Replaces the element behind an existing handle.
    ///
    /// Returns `false` (and does nothing) if the handle was never issued.
    pub fn set(&mut self, id: Handle, element: ElementRef) -> bool {
        match self.entries.get_mut(&id) {
            Some(slot) => {
                *slot = element;
                true
            }
            None => false,
        }
    }

    /// Looks up an integer handle without re-binding the application.
    pub fn get(&self, id: Handle) -> Option<ElementRef> {
        self.entries.get(&id).cloned()
    }

    pub fn contains(&self, id: Handle) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns whether `text` is accepted as a locator handle.
    pub fn is_locator(text: &str) -> bool {
        locator_regex().is_match(text)
    }

    /// Resolves a handle reference to a live element.
    ///
    /// Integer references first re-bind [`APP_HANDLE`] to the target's current
    /// foreground application. Locator references are evaluated once against
    /// the whole application tree.
    pub async fn resolve(&mut self, target: &dyn UiTarget, reference: &HandleRef) -> Result<ElementRef, BridgeError> {
        match reference {
            HandleRef::Id(id) => {
                let app = target.front_most_app().await?;
                self.set(APP_HANDLE, app.root());
                self.get(*id).ok_or(BridgeError::UnknownHandle(*id))
            }
            HandleRef::Locator(text) if Self::is_locator(text) => {
                let path = QPath::parse(text)?;
                let root = target.front_most_app().await?.root();
                let outcome = path.find(&root, Duration::ZERO, Duration::ZERO).await;
                outcome
                    .elements
                    .into_iter()
                    .next()
                    .ok_or_else(|| BridgeError::ElementNotFound(text.clone()))
            }
            other => Err(BridgeError::InvalidHandle(other.to_string())),
        }
    }

    /// Drops one handle. The application handle is kept.
    pub fn release(&mut self, id: Handle) -> bool {
        if id == APP_HANDLE {
            return false;
        }
        self.entries.remove(&id).is_some()
    }

    /// Drops every handle except the application handle.
    ///
    /// Ids are never reused, so stale handles held by the controller keep
    /// failing with `UnknownHandle`.
    pub fn release_all(&mut self) {
        self.entries.retain(|id, _| *id == APP_HANDLE);
        debug!("all element handles released");
    }

    /// Drops handles whose element has left the UI. Returns how many.
    pub async fn release_invalid(&mut self) -> usize {
        let mut stale = Vec::new();
        for (id, element) in &self.entries {
            if *id != APP_HANDLE && !element.is_valid().await {
                stale.push(*id);
            }
        }
        for id in &stale {
            self.entries.remove(id);
        }
        debug!(released = stale.len(), "invalid element handles released");
        stale.len()
    }
}
