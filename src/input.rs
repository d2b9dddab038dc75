//! Normalized input events.
//!
//! Every mutating operation a session can perform on the remote surface is
//! expressed as one `InputEvent`. The union is discriminated by a `type`
//! tag; payloads that do not match a known variant fail deserialization and
//! are rejected before they reach a driver.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Press direction for keys and mouse buttons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyAction {
    Down,
    Up,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MouseButton {
    Left,
    Middle,
    Right,
}

impl fmt::Display for MouseButton {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MouseButton::Left => write!(f, "left"),
            MouseButton::Middle => write!(f, "middle"),
            MouseButton::Right => write!(f, "right"),
        }
    }
}

/// One normalized input event, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InputEvent {
    /// Single key transition, with optional modifier keys held around it.
    Key {
        key: String,
        action: KeyAction,
        #[serde(default)]
        modifiers: Vec<String>,
    },
    /// Literal text, typed as-is.
    Text { text: String },
    /// Absolute pointer position in logical viewport pixels.
    MouseMove { x: i32, y: i32 },
    /// Button transition, optionally preceded by a move to (x, y).
    MouseButton {
        button: MouseButton,
        action: KeyAction,
        #[serde(default)]
        x: Option<i32>,
        #[serde(default)]
        y: Option<i32>,
    },
    /// Wheel scroll in notches; positive y scrolls up.
    MouseScroll {
        #[serde(default)]
        delta_x: Option<i32>,
        #[serde(default)]
        delta_y: Option<i32>,
    },
    /// Replace the remote clipboard contents.
    Clipboard { text: String },
}

impl InputEvent {
    /// Short label for logs and retry messages.
    pub fn label(&self) -> &'static str {
        match self {
            InputEvent::Key { .. } => "key",
            InputEvent::Text { .. } => "text",
            InputEvent::MouseMove { .. } => "mouse_move",
            InputEvent::MouseButton { .. } => "mouse_button",
            InputEvent::MouseScroll { .. } => "mouse_scroll",
            InputEvent::Clipboard { .. } => "clipboard",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_event_deserializes() {
        let event: InputEvent = serde_json::from_str(r#"{"type":"text","text":"hi"}"#).unwrap();
        assert_eq!(event, InputEvent::Text { text: "hi".into() });
    }

    #[test]
    fn key_event_defaults_modifiers() {
        let event: InputEvent =
            serde_json::from_str(r#"{"type":"key","key":"enter","action":"down"}"#).unwrap();
        match event {
            InputEvent::Key { key, action, modifiers } => {
                assert_eq!(key, "enter");
                assert_eq!(action, KeyAction::Down);
                assert!(modifiers.is_empty());
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn unknown_type_is_rejected() {
        let result = serde_json::from_str::<InputEvent>(r#"{"type":"teleport","x":1}"#);
        assert!(result.is_err());
    }

    #[test]
    fn malformed_payload_is_rejected() {
        // mouse_move without coordinates is invalid
        let result = serde_json::from_str::<InputEvent>(r#"{"type":"mouse_move"}"#);
        assert!(result.is_err());
    }
}
