//! `uia.target.*` and `uia.keyboard.*` handlers.

use std::time::Duration;

use serde_json::{json, Value};
use tracing::{debug, info};

use super::element::text_of;
use super::{seconds, Method, Registry};
use crate::alert::AlertRule;
use crate::element::{Point, Rect};
use crate::encode::json_component;
use crate::error::BridgeError;
use crate::host::{Coordinates, LocationOptions, RotateOptions, TapOptions, VolumeButton};
use crate::protocol::{Params, Reply};

const DEFAULT_DRAG_DURATION: f64 = 0.5;
const DEFAULT_HOLD_VOLUME: f64 = 1.0;
const DEFAULT_DEACTIVATE: f64 = 3.0;

/// Target functions callable through `uia.target.function`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TargetFunction {
    Model,
    Name,
    SystemName,
    SystemVersion,
    Rect,
    DeviceOrientation,
    SetDeviceOrientation,
    Delay,
    Shake,
    Lock,
    Unlock,
    LockForDuration,
    ClickVolumeUp,
    ClickVolumeDown,
    HoldVolumeUp,
    HoldVolumeDown,
    DeactivateAppForDuration,
    CaptureScreenWithName,
    CaptureRectWithName,
    Tap,
    DoubleTap,
    TouchAndHold,
    DragFromToForDuration,
    FlickFromTo,
    PinchCloseFromToForDuration,
    PinchOpenFromToForDuration,
    SetLocation,
}

impl TargetFunction {
    fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "model" => Self::Model,
            "name" => Self::Name,
            "systemName" => Self::SystemName,
            "systemVersion" => Self::SystemVersion,
            "rect" => Self::Rect,
            "deviceOrientation" => Self::DeviceOrientation,
            "setDeviceOrientation" => Self::SetDeviceOrientation,
            "delay" => Self::Delay,
            "shake" => Self::Shake,
            "lock" => Self::Lock,
            "unlock" => Self::Unlock,
            "lockForDuration" => Self::LockForDuration,
            "clickVolumeUp" => Self::ClickVolumeUp,
            "clickVolumeDown" => Self::ClickVolumeDown,
            "holdVolumeUp" => Self::HoldVolumeUp,
            "holdVolumeDown" => Self::HoldVolumeDown,
            "deactivateAppForDuration" => Self::DeactivateAppForDuration,
            "captureScreenWithName" => Self::CaptureScreenWithName,
            "captureRectWithName" => Self::CaptureRectWithName,
            "tap" => Self::Tap,
            "doubleTap" => Self::DoubleTap,
            "touchAndHold" => Self::TouchAndHold,
            "dragFromToForDuration" => Self::DragFromToForDuration,
            "flickFromTo" => Self::FlickFromTo,
            "pinchCloseFromToForDuration" => Self::PinchCloseFromToForDuration,
            "pinchOpenFromToForDuration" => Self::PinchOpenFromToForDuration,
            "setLocation" => Self::SetLocation,
            _ => return None,
        })
    }
}

/// Screen point for a fractional `{x, y}`; unset or zero axes use the centre.
fn fraction_of_screen(rect: &Rect, requested: Option<&Value>) -> Point {
    let axis = |key: &str| {
        requested
            .and_then(|v| v.get(key))
            .and_then(Value::as_f64)
            .filter(|f| *f != 0.0)
            .unwrap_or(0.5)
    };
    rect.scale(Point::new(axis("x"), axis("y")))
}

/// Start and end fractions of the directional screen gestures.
fn direction(method: Method) -> (Point, Point) {
    let end = match method {
        Method::TargetDragRightToLeft | Method::TargetFlickRightToLeft => Point::new(0.1, 0.5),
        Method::TargetDragLeftToRight | Method::TargetFlickLeftToRight => Point::new(0.9, 0.5),
        Method::TargetDragUpToDown | Method::TargetFlickUpToDown => Point::new(0.5, 0.9),
        _ => Point::new(0.5, 0.1),
    };
    (Point::new(0.5, 0.5), end)
}

/// A truthy repeat count, defaulting to one.
fn repeat_count(p: &Params<'_>, index: usize) -> Result<u32, BridgeError> {
    Ok(p.truthy_f64(index)?.map_or(1, |r| r.max(1.0) as u32))
}

impl Registry {
    pub(super) async fn target_method(
        &mut self,
        method: Method,
        id: &Value,
        p: Params<'_>,
    ) -> Result<Reply, BridgeError> {
        let target = self.target.clone();
        match method {
            Method::TargetFunction => {
                let name = p.str(0)?;
                let args = p.list(1)?;
                self.call_target_function(name, Params::new(args)).await
            }
            Method::TargetGetRect => Ok(Reply::value(target.rect().await?)),
            Method::TargetGetModel => Ok(Reply::value(target.model().await?)),
            Method::TargetGetName => Ok(Reply::value(target.name().await?)),
            Method::TargetGetSystemName => Ok(Reply::value(target.system_name().await?)),
            Method::TargetGetSystemVersion => Ok(Reply::value(target.system_version().await?)),
            Method::TargetGetDeviceOrientation => Ok(Reply::value(target.device_orientation().await?)),

            Method::TargetCaptureRect => {
                let rect: Rect = p.deserialize(0)?;
                Ok(Reply::value(self.capture(Some(rect), p.truthy_str(1)?).await?))
            }
            Method::TargetCaptureScreen => Ok(Reply::value(self.capture(None, p.truthy_str(0)?).await?)),
            Method::TargetGetElementTreeAndCaptureScreen => {
                let tree = target.element_tree().await?;
                let path = self.capture(None, p.truthy_str(0)?).await?;
                let payload = json!({"element_tree": tree, "capture_screen": path});
                self.deliver(id, Value::String(json_component(&payload))).await
            }
            Method::TargetGetElementTree | Method::TargetLogElementTreeExt => {
                let tree = target.element_tree().await?;
                self.deliver(id, Value::String(json_component(&tree))).await
            }

            Method::TargetSetAlertRules => {
                let rules: Vec<AlertRule> = p.opt_deserialize(0)?.unwrap_or_default();
                info!(rules = rules.len(), "alert rules replaced");
                self.alerts.write().await.rules = rules;
                Ok(Reply::none())
            }
            Method::TargetGetAlertRules => {
                let state = self.alerts.read().await;
                Ok(Reply::value(json_component(&state.rules)))
            }
            Method::TargetAddAlertRule => {
                let rule = AlertRule::new(p.str(0)?, p.opt_str(1)?.map(str::to_string));
                debug!(message_text = %rule.message_text, "alert rule added");
                self.alerts.write().await.rules.push(rule);
                Ok(Reply::none())
            }
            Method::TargetCleanAlertRules => {
                self.alerts.write().await.rules.clear();
                Ok(Reply::none())
            }
            Method::TargetTurnOnAutoCloseAlert => {
                self.alerts.write().await.auto_handled = false;
                Ok(Reply::none())
            }
            Method::TargetTurnOffAutoCloseAlert => {
                self.alerts.write().await.auto_handled = true;
                Ok(Reply::none())
            }
            Method::TargetGetLastAlertMsg => Ok(Reply::value(self.alerts.read().await.last_texts.clone())),

            Method::TargetDelay => {
                target.delay(seconds(p.f64(0)?, 0)?).await;
                Ok(Reply::none())
            }
            Method::TargetClickVolumeDown => {
                target.click_volume(VolumeButton::Down).await?;
                Ok(Reply::none())
            }
            Method::TargetClickVolumeUp => {
                target.click_volume(VolumeButton::Up).await?;
                Ok(Reply::none())
            }
            Method::TargetHoldVolumeDown | Method::TargetHoldVolumeUp => {
                let button = if method == Method::TargetHoldVolumeUp { VolumeButton::Up } else { VolumeButton::Down };
                let duration = seconds(p.truthy_f64(0)?.unwrap_or(DEFAULT_HOLD_VOLUME), 0)?;
                target.hold_volume(button, duration).await?;
                Ok(Reply::none())
            }
            Method::TargetDeactivateAppForDuration => {
                let duration = seconds(p.truthy_f64(0)?.unwrap_or(DEFAULT_DEACTIVATE), 0)?;
                Ok(Reply::value(target.deactivate_app_for_duration(duration).await?))
            }

            Method::TargetTap | Method::TargetDoubleTap => {
                let point = fraction_of_screen(&target.rect().await?, p.get(0));
                if method == Method::TargetTap {
                    target.tap(point).await?;
                } else {
                    target.double_tap(point).await?;
                }
                Ok(Reply::none())
            }
            Method::TargetTapWithOptions => {
                let options: TapOptions = p.opt_deserialize(1)?.unwrap_or_default();
                target.tap_with_options(p.point(0)?, &options).await?;
                Ok(Reply::none())
            }
            Method::TargetTouchAndHold => {
                target.touch_and_hold(p.point(0)?, seconds(p.f64(1)?, 1)?).await?;
                Ok(Reply::none())
            }

            Method::TargetDragFromToForDuration => {
                let duration = p.truthy_f64(2)?.unwrap_or(DEFAULT_DRAG_DURATION);
                let interval = p.truthy_f64(4)?.unwrap_or(0.0);
                self.drag_screen(p.point(0)?, p.point(1)?, duration, repeat_count(&p, 3)?, interval)
                    .await?;
                Ok(Reply::none())
            }
            Method::TargetDragRightToLeft
            | Method::TargetDragLeftToRight
            | Method::TargetDragUpToDown
            | Method::TargetDragDownToUp => {
                let (from, to) = direction(method);
                self.drag_screen(from, to, DEFAULT_DRAG_DURATION, 1, 0.0).await?;
                Ok(Reply::none())
            }
            Method::TargetFlickFromTo => {
                let interval = p.truthy_f64(3)?.unwrap_or(0.0);
                self.flick_screen(p.point(0)?, p.point(1)?, repeat_count(&p, 2)?, interval).await?;
                Ok(Reply::none())
            }
            Method::TargetFlickRightToLeft
            | Method::TargetFlickLeftToRight
            | Method::TargetFlickUpToDown
            | Method::TargetFlickDownToUp => {
                let (from, to) = direction(method);
                self.flick_screen(from, to, 1, 0.0).await?;
                Ok(Reply::none())
            }

            Method::TargetLockForDuration => {
                target.lock_for_duration(seconds(p.f64(0)?, 0)?).await?;
                Ok(Reply::none())
            }
            Method::TargetPinchCloseFromToForDuration => {
                target.pinch_close(p.point(0)?, p.point(1)?, seconds(p.f64(2)?, 2)?).await?;
                Ok(Reply::none())
            }
            Method::TargetPinchOpenFromToForDuration => {
                target.pinch_open(p.point(0)?, p.point(1)?, seconds(p.f64(2)?, 2)?).await?;
                Ok(Reply::none())
            }
            Method::TargetRotateWithOptions => {
                let options: RotateOptions = p.opt_deserialize(1)?.unwrap_or_default();
                target.rotate(p.point(0)?, &options).await?;
                Ok(Reply::none())
            }
            Method::TargetSetDeviceOrientation => {
                target.set_device_orientation(p.i64(0)?).await?;
                Ok(Reply::none())
            }
            Method::TargetSetLocation => {
                let coordinates: Coordinates = p.deserialize(0)?;
                target.set_location(&coordinates, None).await?;
                Ok(Reply::none())
            }
            Method::TargetSetLocationWithOptions => {
                let coordinates: Coordinates = p.deserialize(0)?;
                let options: LocationOptions = p.opt_deserialize(1)?.unwrap_or_default();
                target.set_location(&coordinates, Some(&options)).await?;
                Ok(Reply::none())
            }
            Method::TargetShake => {
                target.shake().await?;
                Ok(Reply::none())
            }
            Method::TargetUnlock => {
                target.unlock().await?;
                Ok(Reply::none())
            }
            Method::TargetLock => {
                target.lock().await?;
                Ok(Reply::none())
            }

            Method::KeyboardSentKeys => {
                let keys = text_of(p.required(0)?);
                target.front_most_app().await?.type_keys(&keys).await?;
                Ok(Reply::none())
            }

            other => Err(BridgeError::UnknownMethod(other.name().to_string())),
        }
    }

    /// Drags between two fractional screen points, `repeat` times.
    async fn drag_screen(
        &self,
        from: Point,
        to: Point,
        duration: f64,
        repeat: u32,
        interval: f64,
    ) -> Result<(), BridgeError> {
        let rect = self.target.rect().await?;
        let (from, to) = (rect.scale_floor(from), rect.scale_floor(to));
        let duration = seconds(duration, 2)?;
        for _ in 0..repeat {
            self.target.drag_from_to(from, to, duration).await?;
            self.repeat_pause(repeat, interval).await?;
        }
        Ok(())
    }

    /// Flicks between two fractional screen points, `repeat` times.
    async fn flick_screen(&self, from: Point, to: Point, repeat: u32, interval: f64) -> Result<(), BridgeError> {
        let rect = self.target.rect().await?;
        let (from, to) = (rect.scale_floor(from), rect.scale_floor(to));
        for _ in 0..repeat {
            self.target.flick_from_to(from, to).await?;
            self.repeat_pause(repeat, interval).await?;
        }
        Ok(())
    }

    async fn call_target_function(&mut self, name: &str, args: Params<'_>) -> Result<Reply, BridgeError> {
        let function = TargetFunction::from_name(name).ok_or_else(|| {
            BridgeError::UnsupportedOperation(format!("uia.target.function \"func: {name}\" is invalid."))
        })?;
        debug!(function = name, "target function");
        let target = self.target.clone();
        let duration = |index: usize| -> Result<Duration, BridgeError> { seconds(args.f64(index)?, index) };

        match function {
            TargetFunction::Model => return Ok(Reply::value(target.model().await?)),
            TargetFunction::Name => return Ok(Reply::value(target.name().await?)),
            TargetFunction::SystemName => return Ok(Reply::value(target.system_name().await?)),
            TargetFunction::SystemVersion => return Ok(Reply::value(target.system_version().await?)),
            TargetFunction::Rect => return Ok(Reply::value(target.rect().await?)),
            TargetFunction::DeviceOrientation => return Ok(Reply::value(target.device_orientation().await?)),
            TargetFunction::DeactivateAppForDuration => {
                return Ok(Reply::value(target.deactivate_app_for_duration(duration(0)?).await?))
            }
            TargetFunction::SetDeviceOrientation => target.set_device_orientation(args.i64(0)?).await?,
            TargetFunction::Delay => target.delay(duration(0)?).await,
            TargetFunction::Shake => target.shake().await?,
            TargetFunction::Lock => target.lock().await?,
            TargetFunction::Unlock => target.unlock().await?,
            TargetFunction::LockForDuration => target.lock_for_duration(duration(0)?).await?,
            TargetFunction::ClickVolumeUp => target.click_volume(VolumeButton::Up).await?,
            TargetFunction::ClickVolumeDown => target.click_volume(VolumeButton::Down).await?,
            TargetFunction::HoldVolumeUp => target.hold_volume(VolumeButton::Up, duration(0)?).await?,
            TargetFunction::HoldVolumeDown => target.hold_volume(VolumeButton::Down, duration(0)?).await?,
            TargetFunction::CaptureScreenWithName => target.capture_screen_with_name(args.str(0)?).await?,
            TargetFunction::CaptureRectWithName => {
                target.capture_rect_with_name(args.deserialize(0)?, args.str(1)?).await?
            }
            TargetFunction::Tap => target.tap(args.point(0)?).await?,
            TargetFunction::DoubleTap => target.double_tap(args.point(0)?).await?,
            TargetFunction::TouchAndHold => target.touch_and_hold(args.point(0)?, duration(1)?).await?,
            TargetFunction::DragFromToForDuration => {
                target.drag_from_to(args.point(0)?, args.point(1)?, duration(2)?).await?
            }
            TargetFunction::FlickFromTo => target.flick_from_to(args.point(0)?, args.point(1)?).await?,
            TargetFunction::PinchCloseFromToForDuration => {
                target.pinch_close(args.point(0)?, args.point(1)?, duration(2)?).await?
            }
            TargetFunction::PinchOpenFromToForDuration => {
                target.pinch_open(args.point(0)?, args.point(1)?, duration(2)?).await?
            }
            TargetFunction::SetLocation => {
                let coordinates: Coordinates = args.deserialize(0)?;
                target.set_location(&coordinates, None).await?
            }
        }
        Ok(Reply::none())
    }
}
