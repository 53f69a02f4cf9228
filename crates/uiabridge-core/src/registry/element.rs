//! `uia.element.*` handlers.

use std::time::Duration;

use serde_json::{json, Value};
use tracing::debug;

use super::{seconds, Method, Registry};
use crate::element::{ElementSnapshot, Point};
use crate::encode::{json_component, uri_component};
use crate::error::BridgeError;
use crate::host::{ElementRef, GestureOptions, RotateOptions, TapOptions};
use crate::predicate::Predicate;
use crate::protocol::{Params, Reply};
use crate::qpath::QPath;

/// Time the find handlers reserve for their own dispatch.
const FIND_OVERHEAD: Duration = Duration::from_millis(80);
const FIND_ELEMENTS_OVERHEAD: Duration = Duration::from_millis(100);

/// Polling interval when a find names none.
const DEFAULT_FIND_INTERVAL: Duration = Duration::from_millis(10);

const DEFAULT_WAIT_FOR_INVALID: f64 = 5.0;

/// The only locator strategy.
const QPATH_STRATEGY: &str = "qpath";

/// Element functions callable through `uia.element.function`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ElementFunction {
    Name,
    Label,
    Value,
    IsEnabled,
    IsValid,
    IsVisible,
    HasKeyboardFocus,
    Rect,
    Tap,
    DoubleTap,
    TwoFingerTap,
    ScrollToVisible,
    TouchAndHold,
    SetValue,
    DragToValue,
    WaitForInvalid,
}

impl ElementFunction {
    fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "name" => Self::Name,
            "label" => Self::Label,
            "value" => Self::Value,
            "isEnabled" => Self::IsEnabled,
            "isValid" | "checkIsValid" => Self::IsValid,
            "isVisible" => Self::IsVisible,
            "hasKeyboardFocus" => Self::HasKeyboardFocus,
            "rect" => Self::Rect,
            "tap" => Self::Tap,
            "doubleTap" => Self::DoubleTap,
            "twoFingerTap" => Self::TwoFingerTap,
            "scrollToVisible" => Self::ScrollToVisible,
            "touchAndHold" => Self::TouchAndHold,
            "setValue" => Self::SetValue,
            "dragToValue" => Self::DragToValue,
            "waitForInvalid" => Self::WaitForInvalid,
            _ => return None,
        })
    }
}

/// Maps `get_attr` names onto element function names.
fn attribute_function(name: &str) -> String {
    let lower = name.to_lowercase();
    match lower.as_str() {
        "isenabled" | "enabled" => "isEnabled".to_string(),
        "isvalid" | "valid" => "isValid".to_string(),
        "isvisible" | "visible" => "isVisible".to_string(),
        "haskeyboardfocus" | "focus" => "hasKeyboardFocus".to_string(),
        _ => lower,
    }
}

/// End offsets of the directional gestures, all starting at the centre.
fn direction_end(method: Method) -> Point {
    match method {
        Method::ElementDragInsideRightToLeft | Method::ElementFlickInsideRightToLeft => Point::new(0.1, 0.5),
        Method::ElementDragInsideLeftToRight | Method::ElementFlickInsideLeftToRight => Point::new(0.9, 0.5),
        Method::ElementDragInsideUpToDown | Method::ElementFlickInsideUpToDown => Point::new(0.5, 0.9),
        _ => Point::new(0.5, 0.1),
    }
}

/// Duration of the directional drags, in seconds.
const DIRECTIONAL_DRAG_DURATION: f64 = 1.5;

/// A value to type or assign: strings as is, anything else as JSON text.
pub(super) fn text_of(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl Registry {
    pub(super) async fn element_method(
        &mut self,
        method: Method,
        id: &Value,
        p: Params<'_>,
    ) -> Result<Reply, BridgeError> {
        match method {
            Method::ElementFunction => {
                let element = self.element_at(&p, 0).await?;
                let name = p.str(1)?;
                let args = p.list(2)?;
                self.call_element_function(&element, name, Params::new(args)).await
            }
            Method::ElementIsValid => {
                let valid = self.element_at(&p, 0).await.is_ok();
                Ok(Reply::value(valid))
            }
            Method::ElementFind => self.find(id, p, false).await,
            Method::ElementFindElements => self.find(id, p, true).await,

            Method::ElementFirstWithName | Method::ElementWithName => {
                let element = self.element_at(&p, 0).await?;
                let name = p.str(1)?;
                let found = matching_children(&element, |dict| dict.name.as_deref() == Some(name)).await?;
                Ok(self.child_reply(found, method == Method::ElementFirstWithName))
            }
            Method::ElementFirstWithPredicate | Method::ElementWithPredicate => {
                let element = self.element_at(&p, 0).await?;
                let predicate = Predicate::parse(p.str(1)?)?;
                let found = matching_children(&element, |dict| predicate.matches(dict)).await?;
                Ok(self.child_reply(found, method == Method::ElementFirstWithPredicate))
            }
            Method::ElementFirstWithValueForKey | Method::ElementWithValueForKey => {
                let element = self.element_at(&p, 0).await?;
                let key = p.str(1)?;
                let expected = text_of(p.required(2)?);
                let found =
                    matching_children(&element, |dict| dict.attribute(key).as_deref() == Some(expected.as_str()))
                        .await?;
                Ok(self.child_reply(found, method == Method::ElementFirstWithValueForKey))
            }
            Method::ElementGetParent => {
                let element = self.element_at(&p, 0).await?;
                let parent = element.parent().await?;
                Ok(Reply::value(parent.and_then(|e| self.put(e))))
            }
            Method::ElementGetChildren => {
                let element = self.element_at(&p, 0).await?;
                let children = element.children().await?;
                Ok(Reply::value(self.put_all(children)))
            }
            Method::ElementGetAttr => {
                let element = self.element_at(&p, 0).await?;
                let name = attribute_function(p.str(1)?);
                self.call_element_function(&element, &name, Params::new(&[])).await
            }
            Method::ElementGetRect => {
                let element = self.element_at(&p, 0).await?;
                Ok(Reply::value(element.rect().await?))
            }
            Method::ElementCapture => {
                let element = self.element_at(&p, 0).await?;
                let rect = element.rect().await?;
                let path = self.capture(Some(rect), p.truthy_str(1)?).await?;
                Ok(Reply::value(path))
            }

            Method::ElementTap | Method::ElementClick => {
                let element = self.element_at(&p, 0).await?;
                tap_at(&element, p.opt_f64(1)?, p.opt_f64(2)?).await?;
                Ok(Reply::none())
            }
            Method::ElementDoubleTap | Method::ElementDoubleClick => {
                let element = self.element_at(&p, 0).await?;
                match (p.truthy_f64(1)?, p.truthy_f64(2)?) {
                    (Some(x), Some(y)) => {
                        tap_at(&element, Some(x), Some(y)).await?;
                        tap_at(&element, Some(x), Some(y)).await?;
                    }
                    _ => element.double_tap().await?,
                }
                Ok(Reply::none())
            }
            Method::ElementTapWithOptions => {
                let element = self.element_at(&p, 0).await?;
                let options: TapOptions = p.opt_deserialize(1)?.unwrap_or_default();
                element.tap_with_options(&options).await?;
                Ok(Reply::none())
            }

            Method::ElementDragInsideWithOptions | Method::ElementFlickInsideWithOptions => {
                let element = self.element_at(&p, 0).await?;
                let options: GestureOptions = p.opt_deserialize(1)?.unwrap_or_default();
                let repeat = options.repeat.filter(|r| *r > 0).unwrap_or(1);
                let interval = options.interval.unwrap_or(0.0);
                for _ in 0..repeat {
                    if method == Method::ElementDragInsideWithOptions {
                        element.drag_inside(&options).await?;
                    } else {
                        element.flick_inside(&options).await?;
                    }
                    self.repeat_pause(repeat, interval).await?;
                }
                Ok(Reply::none())
            }
            Method::ElementDragInsideRightToLeft
            | Method::ElementDragInsideLeftToRight
            | Method::ElementDragInsideUpToDown
            | Method::ElementDragInsideDownToUp => {
                let element = self.element_at(&p, 0).await?;
                let options = GestureOptions::from_center(direction_end(method), Some(DIRECTIONAL_DRAG_DURATION));
                element.drag_inside(&options).await?;
                Ok(Reply::none())
            }
            Method::ElementFlickInsideRightToLeft
            | Method::ElementFlickInsideLeftToRight
            | Method::ElementFlickInsideUpToDown
            | Method::ElementFlickInsideDownToUp => {
                let element = self.element_at(&p, 0).await?;
                let options = GestureOptions::from_center(direction_end(method), None);
                element.flick_inside(&options).await?;
                Ok(Reply::none())
            }
            Method::ElementRotateWithOptions => {
                let element = self.element_at(&p, 0).await?;
                let options: RotateOptions = p.opt_deserialize(1)?.unwrap_or_default();
                element.rotate(&options).await?;
                Ok(Reply::none())
            }
            Method::ElementScrollToVisible => {
                self.element_at(&p, 0).await?.scroll_to_visible().await?;
                Ok(Reply::none())
            }
            Method::ElementTouchAndHold => {
                let element = self.element_at(&p, 0).await?;
                element.touch_and_hold(seconds(p.f64(1)?, 1)?).await?;
                Ok(Reply::none())
            }
            Method::ElementTwoFingerTap => {
                self.element_at(&p, 0).await?.two_finger_tap().await?;
                Ok(Reply::none())
            }
            Method::ElementWaitForInvalid => {
                let element = self.element_at(&p, 0).await?;
                let timeout = p.truthy_f64(1)?.unwrap_or(DEFAULT_WAIT_FOR_INVALID);
                Ok(Reply::value(element.wait_for_invalid(seconds(timeout, 1)?).await?))
            }
            Method::ElementSetValue => {
                let element = self.element_at(&p, 0).await?;
                element.set_value(&text_of(p.required(1)?)).await?;
                Ok(Reply::none())
            }
            Method::ElementDragToValue => {
                let element = self.element_at(&p, 0).await?;
                element.drag_to_value(p.f64(1)?).await?;
                Ok(Reply::none())
            }
            Method::ElementSentKeys => {
                let element = self.element_at(&p, 0).await?;
                let keys = text_of(p.required(1)?);
                element.tap(None).await?;
                element.type_string(&keys).await?;
                Ok(Reply::none())
            }

            Method::ElementGetElementDict | Method::ElementLogElementDict => {
                let dict = self.element_at(&p, 0).await?.element_dict().await?;
                self.deliver(id, Value::String(json_component(&dict))).await
            }
            Method::ElementGetElementTree | Method::ElementLogElementTreeExt => {
                let tree = self.element_at(&p, 0).await?.element_tree().await?;
                self.deliver(id, Value::String(json_component(&tree))).await
            }

            other => Err(BridgeError::UnknownMethod(other.name().to_string())),
        }
    }

    /// Sends `result` out-of-band for the command `id`.
    pub(super) async fn deliver(&self, id: &Value, result: Value) -> Result<Reply, BridgeError> {
        self.channel.rpc(id.clone(), result).await;
        Ok(Reply::DoNotReturn)
    }

    fn child_reply(&mut self, found: Vec<ElementRef>, first_only: bool) -> Reply {
        if first_only {
            let first = found.into_iter().next();
            Reply::value(first.and_then(|e| self.put(e)))
        } else {
            Reply::value(self.put_all(found))
        }
    }

    async fn call_element_function(
        &mut self,
        element: &ElementRef,
        name: &str,
        args: Params<'_>,
    ) -> Result<Reply, BridgeError> {
        let function = ElementFunction::from_name(name).ok_or_else(|| {
            BridgeError::UnsupportedOperation(format!("uia.element.function \"func: {name}\" is invalid."))
        })?;
        debug!(function = name, "element function");

        let attribute = |dict: ElementSnapshot| -> Reply {
            match function {
                ElementFunction::Name => Reply::value(dict.name),
                ElementFunction::Label => Reply::value(dict.label),
                ElementFunction::Value => Reply::value(dict.value),
                ElementFunction::IsEnabled => Reply::value(dict.enabled),
                ElementFunction::IsVisible => Reply::value(dict.visible),
                ElementFunction::HasKeyboardFocus => Reply::value(dict.focus),
                _ => Reply::value(dict.rect),
            }
        };

        match function {
            ElementFunction::Name
            | ElementFunction::Label
            | ElementFunction::Value
            | ElementFunction::IsEnabled
            | ElementFunction::IsVisible
            | ElementFunction::HasKeyboardFocus
            | ElementFunction::Rect => Ok(attribute(element.element_dict().await?)),
            ElementFunction::IsValid => Ok(Reply::value(element.is_valid().await)),
            ElementFunction::Tap => {
                element.tap(None).await?;
                Ok(Reply::none())
            }
            ElementFunction::DoubleTap => {
                element.double_tap().await?;
                Ok(Reply::none())
            }
            ElementFunction::TwoFingerTap => {
                element.two_finger_tap().await?;
                Ok(Reply::none())
            }
            ElementFunction::ScrollToVisible => {
                element.scroll_to_visible().await?;
                Ok(Reply::none())
            }
            ElementFunction::TouchAndHold => {
                element.touch_and_hold(seconds(args.f64(0)?, 0)?).await?;
                Ok(Reply::none())
            }
            ElementFunction::SetValue => {
                element.set_value(&text_of(args.required(0)?)).await?;
                Ok(Reply::none())
            }
            ElementFunction::DragToValue => {
                element.drag_to_value(args.f64(0)?).await?;
                Ok(Reply::none())
            }
            ElementFunction::WaitForInvalid => {
                let timeout = args.truthy_f64(0)?.unwrap_or(DEFAULT_WAIT_FOR_INVALID);
                Ok(Reply::value(element.wait_for_invalid(seconds(timeout, 0)?).await?))
            }
        }
    }

    /// `find` / `find_elements`: `(locator, timeout, interval, strategy, parent)`.
    async fn find(&mut self, id: &Value, p: Params<'_>, multiple: bool) -> Result<Reply, BridgeError> {
        let locator = p.str(0)?;
        let strategy = p.truthy_str(3)?.unwrap_or(QPATH_STRATEGY);
        if strategy != QPATH_STRATEGY {
            return Err(BridgeError::UnsupportedOperation(format!(
                "locator strategy \"{strategy}\" is not supported"
            )));
        }
        let path = QPath::parse(locator)?;

        let parent = match p.truthy(4) {
            Some(_) => self.element_at(&p, 4).await?,
            None => self.target.front_most_app().await?.root(),
        };
        let overhead = if multiple { FIND_ELEMENTS_OVERHEAD } else { FIND_OVERHEAD };
        let timeout = match p.truthy_f64(1)? {
            Some(secs) => seconds(secs.max(0.0), 1)?.saturating_sub(overhead),
            None => Duration::ZERO,
        };
        let interval = match p.truthy_f64(2)? {
            Some(secs) => seconds(secs, 2)?,
            None => DEFAULT_FIND_INTERVAL,
        };

        let outcome = path.find(&parent, timeout, interval).await;
        let mut result = json!({
            "path": uri_component(path.as_str()),
            "valid_path_part": uri_component(&outcome.valid_path_part),
            "invalid_path_part": uri_component(&outcome.invalid_path_part),
            "find_count": outcome.elements.len(),
            "find_time": outcome.elapsed.as_millis() as u64,
            "attempts": outcome.attempts,
        });

        if multiple {
            let mut entries = Vec::with_capacity(outcome.elements.len());
            for element in outcome.elements {
                let attributes = json_component(&element.element_dict().await?);
                if let Some(handle) = self.put(element) {
                    entries.push(json!({"element": handle, "attributes": attributes}));
                }
            }
            result["elements"] = Value::Array(entries);
        } else {
            let handle = outcome.elements.into_iter().next().and_then(|e| self.put(e));
            result["element"] = json!(handle);
        }
        self.deliver(id, result).await
    }
}

/// Taps `element` at fractional `(x, y)` of its own size, or at its centre
/// when either is missing.
async fn tap_at(element: &ElementRef, x: Option<f64>, y: Option<f64>) -> Result<(), BridgeError> {
    let offset = match (x, y) {
        (Some(x), Some(y)) => {
            let size = element.rect().await?.size;
            Some(Point::new(size.width * x, size.height * y))
        }
        _ => None,
    };
    element.tap(offset).await?;
    Ok(())
}

/// Direct children of `element` whose attributes satisfy `accept`.
async fn matching_children<F>(element: &ElementRef, accept: F) -> Result<Vec<ElementRef>, BridgeError>
where
    F: Fn(&ElementSnapshot) -> bool,
{
    let mut found = Vec::new();
    for child in element.children().await? {
        if let Ok(dict) = child.element_dict().await {
            if accept(&dict) {
                found.push(child);
            }
        }
    }
    Ok(found)
}
