//! Session, backend, and vision-planner configuration.
//!
//! Config is an opaque input to driver/planner construction: the crate reads
//! it, validates the parameters a given backend requires, and never mutates
//! it afterward. TOML load/save helpers are provided for hosts that keep
//! session definitions on disk.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::{Error, Result};
use crate::types::{BackendKind, Viewport};

/// Everything needed to start one session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub kind: BackendKind,
    #[serde(default)]
    pub label: Option<String>,
    /// Read-only sessions accept frames and queries but drop all input.
    #[serde(default)]
    pub read_only: bool,
    /// Requested viewport; drivers may override with their native size.
    #[serde(default)]
    pub viewport: Option<Viewport>,
    /// Frame loop cadence.
    #[serde(default = "default_frame_interval_ms")]
    pub frame_interval_ms: u64,
    /// External OCR engine command.
    #[serde(default = "default_ocr_command")]
    pub ocr_command: String,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub vision: VisionConfig,
}

fn default_frame_interval_ms() -> u64 {
    1000
}

fn default_ocr_command() -> String {
    "tesseract".into()
}

impl SessionConfig {
    pub fn new(kind: BackendKind) -> Self {
        Self {
            kind,
            label: None,
            read_only: false,
            viewport: None,
            frame_interval_ms: default_frame_interval_ms(),
            ocr_command: default_ocr_command(),
            backend: BackendConfig::default(),
            vision: VisionConfig::default(),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| Error::Config(format!("invalid config: {}", e)))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("serialize config: {}", e)))?;
        fs::write(path, content)?;
        Ok(())
    }
}

/// Per-backend connection parameters. Fields irrelevant to the selected
/// backend kind are ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    // Hypervisor backend (spice): external control command + target domain.
    #[serde(default = "default_control_command")]
    pub control_command: String,
    #[serde(default)]
    pub domain: Option<String>,
    /// Route capture/clipboard through the in-guest agent when available.
    #[serde(default)]
    pub use_guest_agent: bool,
    /// Screenshot helper executed inside the guest via the agent.
    #[serde(default = "default_guest_screenshot_command")]
    pub guest_screenshot_command: String,
    /// Guest-side path the screenshot helper writes to.
    #[serde(default = "default_guest_screenshot_path")]
    pub guest_screenshot_path: String,
    /// Absolute pointer addressing; relative deltas when false.
    #[serde(default = "default_true")]
    pub mouse_absolute: bool,

    // Framebuffer backend (vnc): two external helper commands.
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default = "default_vnc_port")]
    pub port: u16,
    #[serde(default = "default_snapshot_command")]
    pub snapshot_command: String,
    #[serde(default = "default_input_command")]
    pub input_command: String,
}

fn default_control_command() -> String {
    "virsh".into()
}

fn default_guest_screenshot_command() -> String {
    "vmscope-guest-shot".into()
}

fn default_guest_screenshot_path() -> String {
    "/tmp/vmscope-screenshot.png".into()
}

fn default_true() -> bool {
    true
}

fn default_vnc_port() -> u16 {
    5900
}

fn default_snapshot_command() -> String {
    "vncsnapshot".into()
}

fn default_input_command() -> String {
    "vncdo".into()
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            control_command: default_control_command(),
            domain: None,
            use_guest_agent: false,
            guest_screenshot_command: default_guest_screenshot_command(),
            guest_screenshot_path: default_guest_screenshot_path(),
            mouse_absolute: true,
            host: None,
            port: default_vnc_port(),
            snapshot_command: default_snapshot_command(),
            input_command: default_input_command(),
        }
    }
}

/// Vision-model service parameters (local-first, Ollama-style endpoint).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisionConfig {
    #[serde(default = "default_vision_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_vision_model")]
    pub model: String,
    /// Frames wider than this are downscaled before encoding.
    #[serde(default = "default_max_image_width")]
    pub max_image_width: u32,
    #[serde(default = "default_vision_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_vision_endpoint() -> String {
    "http://localhost:11434".into()
}

fn default_vision_model() -> String {
    "llava".into()
}

fn default_max_image_width() -> u32 {
    1280
}

fn default_vision_timeout_secs() -> u64 {
    120
}

fn default_temperature() -> f32 {
    0.2
}

fn default_max_tokens() -> u32 {
    1000
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            endpoint: default_vision_endpoint(),
            model: default_vision_model(),
            max_image_width: default_max_image_width(),
            timeout_secs: default_vision_timeout_secs(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_toml_fills_defaults() {
        let config: SessionConfig = toml::from_str("kind = \"mock\"").unwrap();
        assert_eq!(config.kind, BackendKind::Mock);
        assert_eq!(config.frame_interval_ms, 1000);
        assert_eq!(config.backend.port, 5900);
        assert!(!config.read_only);
        assert_eq!(config.vision.model, "llava");
    }

    #[test]
    fn toml_roundtrip() {
        let mut config = SessionConfig::new(BackendKind::Vnc);
        config.backend.host = Some("vmhost.local".into());
        config.read_only = true;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.toml");
        config.save(&path).unwrap();
        let loaded = SessionConfig::load(&path).unwrap();

        assert_eq!(loaded.kind, BackendKind::Vnc);
        assert_eq!(loaded.backend.host.as_deref(), Some("vmhost.local"));
        assert!(loaded.read_only);
    }
}
