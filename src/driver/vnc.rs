//! Framebuffer backend: drives a VNC server through two external helpers,
//! one that snapshots the framebuffer to an image and one that injects
//! key/mouse/scroll events. Clipboard has no native path and is synthesized
//! via typed-text injection.

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use super::Driver;
use crate::config::BackendConfig;
use crate::error::{Error, Result};
use crate::input::{InputEvent, KeyAction, MouseButton};
use crate::keymap;
use crate::retry::{with_retry, DEFAULT_EXTRA_ATTEMPTS, DEFAULT_RETRY_DELAY};
use crate::types::{BackendKind, Frame, Viewport};

pub struct VncDriver {
    host: String,
    port: u16,
    snapshot_command: String,
    input_command: String,
    viewport: Viewport,
}

impl VncDriver {
    pub fn new(host: String, config: &BackendConfig) -> Self {
        Self {
            host,
            port: config.port,
            snapshot_command: config.snapshot_command.clone(),
            input_command: config.input_command.clone(),
            viewport: Viewport::default(),
        }
    }

    fn server(&self) -> String {
        format!("{}::{}", self.host, self.port)
    }

    async fn run_helper(&self, command: &str, args: &[String]) -> std::result::Result<String, String> {
        let output = Command::new(command)
            .args(args)
            .output()
            .await
            .map_err(|e| format!("failed to run {}: {}", command, e))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(format!(
                "{} exited with {}: {}",
                command,
                output.status,
                stderr.trim()
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Inject a chained command sequence through the input helper, retried.
    async fn inject(&self, label: &str, commands: Vec<String>) -> Result<()> {
        let mut args = vec!["-s".to_string(), self.server()];
        args.extend(commands);
        let args = &args;
        with_retry(
            label,
            DEFAULT_EXTRA_ATTEMPTS,
            DEFAULT_RETRY_DELAY,
            move || async move {
                self.run_helper(&self.input_command, args)
                    .await
                    .map(|_| ())
                    .map_err(Error::Input)
            },
        )
        .await
    }

    async fn snapshot_bytes(&self) -> Result<Vec<u8>> {
        let staging = tempfile::tempdir().map_err(|e| Error::Capture(e.to_string()))?;
        let path = staging.path().join("framebuffer.png");
        let path_str = path.to_string_lossy().into_owned();
        self.run_helper(&self.snapshot_command, &[self.server(), path_str])
            .await
            .map_err(Error::Capture)?;
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| Error::Capture(format!("read snapshot: {}", e)))?;
        // staging dir removed on drop, on every exit path
        Ok(bytes)
    }

    fn frame_from_bytes(&mut self, bytes: Vec<u8>) -> Result<Frame> {
        let decoded = image::load_from_memory(&bytes)
            .map_err(|e| Error::Capture(format!("undecodable snapshot: {}", e)))?;
        let content_type = match image::guess_format(&bytes) {
            Ok(image::ImageFormat::Png) => "image/png",
            Ok(image::ImageFormat::Jpeg) => "image/jpeg",
            _ => "application/octet-stream",
        };
        self.viewport = Viewport::new(decoded.width(), decoded.height());
        Ok(Frame::new(bytes, content_type, decoded.width(), decoded.height()))
    }

    fn button_number(button: MouseButton) -> u8 {
        match button {
            MouseButton::Left => 1,
            MouseButton::Middle => 2,
            MouseButton::Right => 3,
        }
    }

    /// Scroll wheel notches map to the X11 wheel button convention.
    fn scroll_commands(delta_x: Option<i32>, delta_y: Option<i32>) -> Vec<String> {
        let mut commands = Vec::new();
        if let Some(dy) = delta_y {
            let button = if dy > 0 { "4" } else { "5" };
            for _ in 0..dy.unsigned_abs() {
                commands.push("click".to_string());
                commands.push(button.to_string());
            }
        }
        if let Some(dx) = delta_x {
            let button = if dx > 0 { "7" } else { "6" };
            for _ in 0..dx.unsigned_abs() {
                commands.push("click".to_string());
                commands.push(button.to_string());
            }
        }
        commands
    }
}

#[async_trait]
impl Driver for VncDriver {
    fn kind(&self) -> BackendKind {
        BackendKind::Vnc
    }

    async fn connect(&mut self) -> Result<()> {
        // A snapshot doubles as a reachability probe and seeds the viewport.
        let bytes = self
            .snapshot_bytes()
            .await
            .map_err(|e| Error::Connection(e.to_string()))?;
        self.frame_from_bytes(bytes)
            .map_err(|e| Error::Connection(e.to_string()))?;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        // Helpers are one-shot processes; nothing to release.
        Ok(())
    }

    async fn capture_frame(&mut self, _hint: Option<Viewport>) -> Result<Frame> {
        let bytes = self.snapshot_bytes().await?;
        self.frame_from_bytes(bytes)
    }

    async fn send_input(&mut self, event: &InputEvent) -> Result<()> {
        match event {
            InputEvent::Key { key, action, modifiers } => {
                let Some(keysym) = keymap::vnc_key(key) else {
                    warn!("dropping unmapped key '{}'", key);
                    return Ok(());
                };
                let mod_syms: Vec<String> = modifiers
                    .iter()
                    .filter_map(|m| {
                        let sym = keymap::vnc_key(m);
                        if sym.is_none() {
                            warn!("dropping unmapped modifier '{}'", m);
                        }
                        sym
                    })
                    .collect();
                let mut commands = Vec::new();
                match action {
                    KeyAction::Down => {
                        for sym in &mod_syms {
                            commands.push("keydown".to_string());
                            commands.push(sym.clone());
                        }
                        commands.push("keydown".to_string());
                        commands.push(keysym);
                    }
                    KeyAction::Up => {
                        commands.push("keyup".to_string());
                        commands.push(keysym);
                        for sym in mod_syms.iter().rev() {
                            commands.push("keyup".to_string());
                            commands.push(sym.clone());
                        }
                    }
                }
                self.inject("key", commands).await
            }
            InputEvent::Text { text } => {
                self.inject("type", vec!["type".to_string(), text.clone()])
                    .await
            }
            InputEvent::MouseMove { x, y } => {
                self.inject("move", vec!["move".to_string(), x.to_string(), y.to_string()])
                    .await
            }
            InputEvent::MouseButton { button, action, x, y } => {
                let mut commands = Vec::new();
                if let (Some(x), Some(y)) = (x, y) {
                    commands.push("move".to_string());
                    commands.push(x.to_string());
                    commands.push(y.to_string());
                }
                let subcommand = match action {
                    KeyAction::Down => "mousedown",
                    KeyAction::Up => "mouseup",
                };
                commands.push(subcommand.to_string());
                commands.push(Self::button_number(*button).to_string());
                self.inject("button", commands).await
            }
            InputEvent::MouseScroll { delta_x, delta_y } => {
                let commands = Self::scroll_commands(*delta_x, *delta_y);
                if commands.is_empty() {
                    debug!("scroll event with no deltas, nothing to send");
                    return Ok(());
                }
                self.inject("scroll", commands).await
            }
            InputEvent::Clipboard { text } => self.set_clipboard(text).await,
        }
    }

    async fn set_clipboard(&mut self, text: &str) -> Result<()> {
        warn!("vnc has no native clipboard path, synthesizing via typed text");
        self.inject("clipboard", vec!["type".to_string(), text.to_string()])
            .await
    }

    async fn set_viewport(&mut self, viewport: Viewport) -> Result<()> {
        // The server owns the framebuffer geometry; remember the request only.
        self.viewport = viewport;
        Ok(())
    }

    async fn health_check(&mut self) -> bool {
        match self.snapshot_bytes().await {
            Ok(_) => true,
            Err(e) => {
                warn!("health check failed: {}", e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_string_uses_double_colon_port() {
        let driver = VncDriver::new("vmhost".into(), &BackendConfig::default());
        assert_eq!(driver.server(), "vmhost::5900");
    }

    #[test]
    fn scroll_maps_to_wheel_buttons() {
        let commands = VncDriver::scroll_commands(None, Some(2));
        assert_eq!(commands, vec!["click", "4", "click", "4"]);
        let commands = VncDriver::scroll_commands(None, Some(-1));
        assert_eq!(commands, vec!["click", "5"]);
        let commands = VncDriver::scroll_commands(Some(1), None);
        assert_eq!(commands, vec!["click", "7"]);
    }

    #[test]
    fn button_numbers_follow_x11_convention() {
        assert_eq!(VncDriver::button_number(MouseButton::Left), 1);
        assert_eq!(VncDriver::button_number(MouseButton::Middle), 2);
        assert_eq!(VncDriver::button_number(MouseButton::Right), 3);
    }
}
