//! Hypervisor backend: drives a QEMU domain's display and input subsystem
//! through an external control command (monitor + guest-agent JSON), with an
//! optional in-guest screenshot path over the agent's file primitives.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

use super::Driver;
use crate::config::BackendConfig;
use crate::error::{Error, Result};
use crate::input::{InputEvent, KeyAction, MouseButton};
use crate::keymap::{self, QEMU_ABS_MAX};
use crate::retry::{with_retry, DEFAULT_EXTRA_ATTEMPTS, DEFAULT_RETRY_DELAY};
use crate::types::{BackendKind, Frame, Viewport};

const GUEST_READ_CHUNK: u64 = 65536;
const GUEST_EXEC_POLLS: u32 = 40;
const GUEST_EXEC_POLL_DELAY: Duration = Duration::from_millis(250);

pub struct QemuDriver {
    control_command: String,
    domain: String,
    use_guest_agent: bool,
    /// Cleared when the agent fails to answer a ping at connect time.
    guest_agent_ok: bool,
    guest_screenshot_command: String,
    guest_screenshot_path: String,
    mouse_absolute: bool,
    viewport: Viewport,
    // Protocol state, strictly per-instance.
    cursor: (i32, i32),
    button_mask: u8,
}

impl QemuDriver {
    pub fn new(domain: String, config: &BackendConfig) -> Self {
        Self {
            control_command: config.control_command.clone(),
            domain,
            use_guest_agent: config.use_guest_agent,
            guest_agent_ok: false,
            guest_screenshot_command: config.guest_screenshot_command.clone(),
            guest_screenshot_path: config.guest_screenshot_path.clone(),
            mouse_absolute: config.mouse_absolute,
            viewport: Viewport::default(),
            cursor: (0, 0),
            button_mask: 0,
        }
    }

    // ========== External control command plumbing ==========

    async fn run_control(&self, args: &[&str]) -> std::result::Result<String, String> {
        let output = Command::new(&self.control_command)
            .args(args)
            .output()
            .await
            .map_err(|e| format!("failed to run {}: {}", self.control_command, e))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(format!(
                "{} {} exited with {}: {}",
                self.control_command,
                args.first().unwrap_or(&""),
                output.status,
                stderr.trim()
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn monitor_command(&self, payload: &Value) -> std::result::Result<Value, String> {
        let body = payload.to_string();
        let stdout = self
            .run_control(&["qemu-monitor-command", &self.domain, &body])
            .await?;
        serde_json::from_str(stdout.trim()).map_err(|e| format!("bad monitor response: {}", e))
    }

    async fn agent_command(&self, payload: &Value) -> std::result::Result<Value, String> {
        let body = payload.to_string();
        let stdout = self
            .run_control(&["qemu-agent-command", &self.domain, &body])
            .await?;
        serde_json::from_str(stdout.trim()).map_err(|e| format!("bad agent response: {}", e))
    }

    // ========== Capture paths ==========

    async fn capture_host(&self) -> Result<Vec<u8>> {
        let staging = tempfile::tempdir().map_err(|e| Error::Capture(e.to_string()))?;
        let path = staging.path().join("screenshot");
        let path_str = path.to_string_lossy().into_owned();
        self.run_control(&["screenshot", &self.domain, &path_str])
            .await
            .map_err(Error::Capture)?;
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| Error::Capture(format!("read screenshot: {}", e)))?;
        // staging dir removed on drop, on every exit path
        Ok(bytes)
    }

    /// Trigger the in-guest screenshot helper, then pull the file back over
    /// the agent: chunked guest-file-read until a zero-byte read, then close.
    async fn capture_guest(&self) -> Result<Vec<u8>> {
        let exec = self
            .agent_command(&json!({
                "execute": "guest-exec",
                "arguments": {
                    "path": "/bin/sh",
                    "arg": ["-c", format!("{} {}", self.guest_screenshot_command, self.guest_screenshot_path)],
                    "capture-output": false
                }
            }))
            .await
            .map_err(Error::Capture)?;
        let pid = exec["return"]["pid"]
            .as_i64()
            .ok_or_else(|| Error::Capture("guest-exec returned no pid".into()))?;

        let mut exited = false;
        for _ in 0..GUEST_EXEC_POLLS {
            let status = self
                .agent_command(&json!({
                    "execute": "guest-exec-status",
                    "arguments": {"pid": pid}
                }))
                .await
                .map_err(Error::Capture)?;
            if status["return"]["exited"].as_bool().unwrap_or(false) {
                exited = true;
                break;
            }
            tokio::time::sleep(GUEST_EXEC_POLL_DELAY).await;
        }
        if !exited {
            return Err(Error::Capture(
                "guest screenshot helper did not finish".into(),
            ));
        }

        let open = self
            .agent_command(&json!({
                "execute": "guest-file-open",
                "arguments": {"path": self.guest_screenshot_path, "mode": "r"}
            }))
            .await
            .map_err(Error::Capture)?;
        let handle = open["return"]
            .as_i64()
            .ok_or_else(|| Error::Capture("guest-file-open returned no handle".into()))?;

        let mut data = Vec::new();
        let read_result: Result<()> = async {
            loop {
                let chunk = self
                    .agent_command(&json!({
                        "execute": "guest-file-read",
                        "arguments": {"handle": handle, "count": GUEST_READ_CHUNK}
                    }))
                    .await
                    .map_err(Error::Capture)?;
                let ret = &chunk["return"];
                let count = ret["count"].as_u64().unwrap_or(0);
                if count == 0 {
                    break;
                }
                let buf = ret["buf-b64"].as_str().unwrap_or("");
                let decoded = BASE64
                    .decode(buf)
                    .map_err(|e| Error::Capture(format!("bad chunk encoding: {}", e)))?;
                data.extend_from_slice(&decoded);
                if ret["eof"].as_bool().unwrap_or(false) {
                    break;
                }
            }
            Ok(())
        }
        .await;

        // Close the handle on every exit path before surfacing read errors.
        if let Err(e) = self
            .agent_command(&json!({
                "execute": "guest-file-close",
                "arguments": {"handle": handle}
            }))
            .await
        {
            warn!("guest-file-close failed: {}", e);
        }
        read_result?;
        Ok(data)
    }

    fn frame_from_bytes(&mut self, bytes: Vec<u8>) -> Result<Frame> {
        let decoded = image::load_from_memory(&bytes)
            .map_err(|e| Error::Capture(format!("undecodable screenshot: {}", e)))?;
        let content_type = match image::guess_format(&bytes) {
            Ok(image::ImageFormat::Png) => "image/png",
            Ok(image::ImageFormat::Jpeg) => "image/jpeg",
            Ok(image::ImageFormat::Pnm) => "image/x-portable-anymap",
            _ => "application/octet-stream",
        };
        // Driver-reported size wins over any requested viewport.
        self.viewport = Viewport::new(decoded.width(), decoded.height());
        Ok(Frame::new(bytes, content_type, decoded.width(), decoded.height()))
    }

    // ========== Input paths ==========

    /// Structured event injection (preferred), with bounded retry.
    async fn send_events(&self, events: Vec<Value>) -> Result<()> {
        let payload = json!({
            "execute": "input-send-event",
            "arguments": {"events": events}
        });
        let payload = &payload;
        with_retry(
            "input-send-event",
            DEFAULT_EXTRA_ATTEMPTS,
            DEFAULT_RETRY_DELAY,
            move || async move {
                self.monitor_command(payload)
                    .await
                    .map(|_| ())
                    .map_err(Error::Input)
            },
        )
        .await
    }

    /// Legacy single-key-name path (fallback, down-events only).
    async fn send_legacy_key(&self, qcode: &str) -> Result<()> {
        let payload = json!({
            "execute": "human-monitor-command",
            "arguments": {"command-line": format!("sendkey {}", qcode)}
        });
        let payload = &payload;
        with_retry(
            "sendkey",
            DEFAULT_EXTRA_ATTEMPTS,
            DEFAULT_RETRY_DELAY,
            move || async move {
                self.monitor_command(payload)
                    .await
                    .map(|_| ())
                    .map_err(Error::Input)
            },
        )
        .await
    }

    fn key_event(qcode: &str, down: bool) -> Value {
        json!({
            "type": "key",
            "data": {"down": down, "key": {"type": "qcode", "data": qcode}}
        })
    }

    fn button_event(button: MouseButton, down: bool) -> Value {
        json!({"type": "btn", "data": {"down": down, "button": button.to_string()}})
    }

    fn move_events(&self, x: i32, y: i32) -> Vec<Value> {
        if self.mouse_absolute {
            let sx = keymap::scale_coordinate(x, self.viewport.width, QEMU_ABS_MAX);
            let sy = keymap::scale_coordinate(y, self.viewport.height, QEMU_ABS_MAX);
            vec![
                json!({"type": "abs", "data": {"axis": "x", "value": sx}}),
                json!({"type": "abs", "data": {"axis": "y", "value": sy}}),
            ]
        } else {
            let (dx, dy) = (x - self.cursor.0, y - self.cursor.1);
            vec![
                json!({"type": "rel", "data": {"axis": "x", "value": dx}}),
                json!({"type": "rel", "data": {"axis": "y", "value": dy}}),
            ]
        }
    }

    /// Events to type one character, shifting uppercase letters and
    /// shifted-symbol punctuation.
    fn char_events(c: char) -> Option<Vec<Value>> {
        let (base, needs_shift) = match keymap::shifted_base(c) {
            Some(base) => (base, true),
            None => (c, c.is_ascii_uppercase()),
        };
        let qcode = keymap::qemu_key(&base.to_string())?;
        let mut events = Vec::new();
        if needs_shift {
            events.push(Self::key_event("shift", true));
        }
        events.push(Self::key_event(&qcode, true));
        events.push(Self::key_event(&qcode, false));
        if needs_shift {
            events.push(Self::key_event("shift", false));
        }
        Some(events)
    }

    async fn send_key(&self, key: &str, action: KeyAction, modifiers: &[String]) -> Result<()> {
        let Some(qcode) = keymap::qemu_key(key) else {
            warn!("dropping unmapped key '{}'", key);
            return Ok(());
        };
        let mod_codes: Vec<String> = modifiers
            .iter()
            .filter_map(|m| {
                let code = keymap::qemu_key(m);
                if code.is_none() {
                    warn!("dropping unmapped modifier '{}'", m);
                }
                code
            })
            .collect();

        let mut events = Vec::new();
        match action {
            KeyAction::Down => {
                for code in &mod_codes {
                    events.push(Self::key_event(code, true));
                }
                events.push(Self::key_event(&qcode, true));
            }
            KeyAction::Up => {
                events.push(Self::key_event(&qcode, false));
                for code in mod_codes.iter().rev() {
                    events.push(Self::key_event(code, false));
                }
            }
        }

        match self.send_events(events).await {
            Ok(()) => Ok(()),
            Err(e) if action == KeyAction::Down && modifiers.is_empty() => {
                warn!("structured key injection failed ({}), trying legacy sendkey", e);
                self.send_legacy_key(&qcode).await
            }
            Err(e) => Err(e),
        }
    }

    async fn type_text(&self, text: &str) -> Result<()> {
        let mut events = Vec::new();
        for c in text.chars() {
            match Self::char_events(c) {
                Some(mut chunk) => events.append(&mut chunk),
                None => warn!("dropping untypeable character {:?}", c),
            }
        }
        if events.is_empty() {
            return Ok(());
        }
        self.send_events(events).await
    }

    fn mask_bit(button: MouseButton) -> u8 {
        match button {
            MouseButton::Left => 1,
            MouseButton::Middle => 2,
            MouseButton::Right => 4,
        }
    }
}

#[async_trait]
impl Driver for QemuDriver {
    fn kind(&self) -> BackendKind {
        BackendKind::Spice
    }

    async fn connect(&mut self) -> Result<()> {
        let state = self
            .run_control(&["domstate", &self.domain])
            .await
            .map_err(Error::Connection)?;
        if !state.contains("running") {
            return Err(Error::Connection(format!(
                "domain '{}' is not running ({})",
                self.domain,
                state.trim()
            )));
        }
        if self.use_guest_agent {
            match self.agent_command(&json!({"execute": "guest-ping"})).await {
                Ok(_) => self.guest_agent_ok = true,
                Err(e) => {
                    warn!("guest agent unavailable, using host-side capture: {}", e);
                    self.guest_agent_ok = false;
                }
            }
        }
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        if self.button_mask != 0 {
            debug!("disconnecting with buttons still down (mask {:#x})", self.button_mask);
        }
        // No persistent connection to tear down; just drop protocol state.
        self.cursor = (0, 0);
        self.button_mask = 0;
        self.guest_agent_ok = false;
        Ok(())
    }

    async fn capture_frame(&mut self, _hint: Option<Viewport>) -> Result<Frame> {
        let bytes = if self.guest_agent_ok {
            match self.capture_guest().await {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!("guest capture failed ({}), falling back to host path", e);
                    self.capture_host().await?
                }
            }
        } else {
            self.capture_host().await?
        };
        self.frame_from_bytes(bytes)
    }

    async fn send_input(&mut self, event: &InputEvent) -> Result<()> {
        match event {
            InputEvent::Key { key, action, modifiers } => {
                self.send_key(key, *action, modifiers).await
            }
            InputEvent::Text { text } => self.type_text(text).await,
            InputEvent::MouseMove { x, y } => {
                let events = self.move_events(*x, *y);
                self.send_events(events).await?;
                self.cursor = (*x, *y);
                Ok(())
            }
            InputEvent::MouseButton { button, action, x, y } => {
                let mut events = Vec::new();
                if let (Some(x), Some(y)) = (x, y) {
                    events.extend(self.move_events(*x, *y));
                }
                let down = *action == KeyAction::Down;
                events.push(Self::button_event(*button, down));
                self.send_events(events).await?;
                if let (Some(x), Some(y)) = (x, y) {
                    self.cursor = (*x, *y);
                }
                let bit = Self::mask_bit(*button);
                if down {
                    self.button_mask |= bit;
                } else {
                    self.button_mask &= !bit;
                }
                Ok(())
            }
            InputEvent::MouseScroll { delta_x, delta_y } => {
                let mut events = Vec::new();
                if let Some(dy) = delta_y {
                    let button = if *dy > 0 { "wheel-up" } else { "wheel-down" };
                    for _ in 0..dy.unsigned_abs() {
                        events.push(json!({"type": "btn", "data": {"down": true, "button": button}}));
                        events.push(json!({"type": "btn", "data": {"down": false, "button": button}}));
                    }
                }
                if let Some(dx) = delta_x {
                    let button = if *dx > 0 { "wheel-right" } else { "wheel-left" };
                    for _ in 0..dx.unsigned_abs() {
                        events.push(json!({"type": "btn", "data": {"down": true, "button": button}}));
                        events.push(json!({"type": "btn", "data": {"down": false, "button": button}}));
                    }
                }
                if events.is_empty() {
                    debug!("scroll event with no deltas, nothing to send");
                    return Ok(());
                }
                self.send_events(events).await
            }
            InputEvent::Clipboard { text } => self.set_clipboard(text).await,
        }
    }

    async fn set_clipboard(&mut self, text: &str) -> Result<()> {
        if self.guest_agent_ok {
            let payload = json!({
                "execute": "guest-set-clipboard",
                "arguments": {"type": "text", "data": BASE64.encode(text)}
            });
            match self.agent_command(&payload).await {
                Ok(_) => return Ok(()),
                Err(e) => {
                    warn!("guest clipboard call failed ({}), degrading to keystroke injection", e);
                }
            }
        } else {
            warn!("no guest agent clipboard, degrading to keystroke injection");
        }
        self.type_text(text).await
    }

    async fn set_viewport(&mut self, viewport: Viewport) -> Result<()> {
        // The hypervisor decides the real output size; remember the request
        // so absolute scaling stays consistent until the next capture.
        self.viewport = viewport;
        Ok(())
    }

    async fn health_check(&mut self) -> bool {
        match self.run_control(&["domstate", &self.domain]).await {
            Ok(state) => state.contains("running"),
            Err(e) => {
                warn!("health check failed: {}", e);
                false
            }
        }
    }
}
