//! Mock driver for testing the session engine without a real backend.

use async_trait::async_trait;
use image::{Rgba, RgbaImage};
use std::io::Cursor;
use tracing::{debug, info};

use super::Driver;
use crate::error::{Error, Result};
use crate::input::InputEvent;
use crate::types::{BackendKind, Frame, Viewport};

/// Log-only driver: connect/disconnect are no-ops, `capture_frame` returns a
/// fixed placeholder image scaled to the requested viewport, input and
/// clipboard calls are logged and dropped, health checks always pass.
pub struct MockDriver {
    viewport: Viewport,
}

impl MockDriver {
    pub fn new(viewport: Viewport) -> Self {
        Self { viewport }
    }

    fn placeholder_png(viewport: Viewport) -> Result<Vec<u8>> {
        let width = viewport.width.max(1);
        let height = viewport.height.max(1);
        let image = RgbaImage::from_pixel(width, height, Rgba([32, 32, 48, 255]));
        let mut buffer = Cursor::new(Vec::new());
        image
            .write_to(&mut buffer, image::ImageFormat::Png)
            .map_err(|e| Error::Capture(format!("placeholder encode: {}", e)))?;
        Ok(buffer.into_inner())
    }
}

#[async_trait]
impl Driver for MockDriver {
    fn kind(&self) -> BackendKind {
        BackendKind::Mock
    }

    async fn connect(&mut self) -> Result<()> {
        info!("mock driver connected");
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        info!("mock driver disconnected");
        Ok(())
    }

    async fn capture_frame(&mut self, hint: Option<Viewport>) -> Result<Frame> {
        if let Some(viewport) = hint {
            self.viewport = viewport;
        }
        let data = Self::placeholder_png(self.viewport)?;
        Ok(Frame::new(
            data,
            "image/png",
            self.viewport.width.max(1),
            self.viewport.height.max(1),
        ))
    }

    async fn send_input(&mut self, event: &InputEvent) -> Result<()> {
        debug!("mock driver dropping input event: {}", event.label());
        Ok(())
    }

    async fn set_clipboard(&mut self, text: &str) -> Result<()> {
        debug!("mock driver dropping clipboard update ({} chars)", text.len());
        Ok(())
    }

    async fn set_viewport(&mut self, viewport: Viewport) -> Result<()> {
        debug!("mock driver viewport set to {}x{}", viewport.width, viewport.height);
        self.viewport = viewport;
        Ok(())
    }

    async fn health_check(&mut self) -> bool {
        true
    }
}
