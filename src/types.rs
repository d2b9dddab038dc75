//! Core value types: backend kinds, session status, viewports, frames.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The closed set of backends a session can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Mock,
    Vnc,
    Rdp,
    Spice,
    Webrtc,
    Custom,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Mock => write!(f, "mock"),
            BackendKind::Vnc => write!(f, "vnc"),
            BackendKind::Rdp => write!(f, "rdp"),
            BackendKind::Spice => write!(f, "spice"),
            BackendKind::Webrtc => write!(f, "webrtc"),
            BackendKind::Custom => write!(f, "custom"),
        }
    }
}

/// Session lifecycle status.
///
/// Transitions are one-directional: connecting → connected →
/// {disconnected, error}. A session never re-enters connected; callers
/// must create a new session instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Connecting,
    Connected,
    Disconnected,
    Error,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionStatus::Connecting => write!(f, "connecting"),
            SessionStatus::Connected => write!(f, "connected"),
            SessionStatus::Disconnected => write!(f, "disconnected"),
            SessionStatus::Error => write!(f, "error"),
        }
    }
}

/// Logical pixel dimensions a session/driver operates against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl Default for Viewport {
    fn default() -> Self {
        Self { width: 1280, height: 800 }
    }
}

/// One captured still of the remote display. Immutable once produced.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Encoded pixel buffer.
    pub data: Vec<u8>,
    /// Mime type of `data`, e.g. "image/png".
    pub content_type: String,
    pub width: u32,
    pub height: u32,
    pub captured_at: DateTime<Utc>,
}

impl Frame {
    pub fn new(data: Vec<u8>, content_type: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            data,
            content_type: content_type.into(),
            width,
            height,
            captured_at: Utc::now(),
        }
    }

    pub fn viewport(&self) -> Viewport {
        Viewport::new(self.width, self.height)
    }
}
