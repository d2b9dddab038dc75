//! Backend driver abstraction.
//!
//! One driver implementation per backend kind, selected once at session
//! creation. Drivers own their protocol state (cursor position, button
//! mask, cached viewport); nothing is shared between sessions.

pub mod mock;
pub mod qemu;
pub mod vnc;

use async_trait::async_trait;

use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::input::InputEvent;
use crate::types::{BackendKind, Frame, Viewport};

pub use mock::MockDriver;
pub use qemu::QemuDriver;
pub use vnc::VncDriver;

/// Contract every backend implements.
///
/// `disconnect` must be safe to call even if `connect` never succeeded.
/// `capture_frame` may ignore the viewport hint and report the backend's
/// native resolution instead; sessions adopt whatever the driver reports.
#[async_trait]
pub trait Driver: Send + Sync {
    fn kind(&self) -> BackendKind;

    async fn connect(&mut self) -> Result<()>;

    async fn disconnect(&mut self) -> Result<()>;

    async fn capture_frame(&mut self, hint: Option<Viewport>) -> Result<Frame>;

    async fn send_input(&mut self, event: &InputEvent) -> Result<()>;

    async fn set_clipboard(&mut self, text: &str) -> Result<()>;

    async fn set_viewport(&mut self, viewport: Viewport) -> Result<()>;

    async fn health_check(&mut self) -> bool;
}

/// Construct the driver for a session config.
///
/// Fails with `Error::Config` when a required backend parameter is missing.
/// Kinds without an implementation get an [`UnsupportedDriver`] whose every
/// operation fails immediately naming the kind.
pub fn create_driver(config: &SessionConfig) -> Result<Box<dyn Driver>> {
    match config.kind {
        BackendKind::Mock => Ok(Box::new(MockDriver::new(
            config.viewport.unwrap_or_default(),
        ))),
        BackendKind::Spice => {
            let domain = config.backend.domain.clone().ok_or_else(|| {
                Error::Config("spice backend requires a target domain".into())
            })?;
            Ok(Box::new(QemuDriver::new(domain, &config.backend)))
        }
        BackendKind::Vnc => {
            let host = config.backend.host.clone().ok_or_else(|| {
                Error::Config("vnc backend requires a host".into())
            })?;
            Ok(Box::new(VncDriver::new(host, &config.backend)))
        }
        kind => Ok(Box::new(UnsupportedDriver { kind })),
    }
}

/// Catch-all for backend kinds with no implementation.
pub struct UnsupportedDriver {
    kind: BackendKind,
}

impl UnsupportedDriver {
    fn fail<T>(&self) -> Result<T> {
        Err(Error::UnsupportedBackend(self.kind))
    }
}

#[async_trait]
impl Driver for UnsupportedDriver {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    async fn connect(&mut self) -> Result<()> {
        self.fail()
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.fail()
    }

    async fn capture_frame(&mut self, _hint: Option<Viewport>) -> Result<Frame> {
        self.fail()
    }

    async fn send_input(&mut self, _event: &InputEvent) -> Result<()> {
        self.fail()
    }

    async fn set_clipboard(&mut self, _text: &str) -> Result<()> {
        self.fail()
    }

    async fn set_viewport(&mut self, _viewport: Viewport) -> Result<()> {
        self.fail()
    }

    async fn health_check(&mut self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_kinds_get_the_catch_all() {
        let config = SessionConfig::new(BackendKind::Rdp);
        let driver = create_driver(&config).unwrap();
        assert_eq!(driver.kind(), BackendKind::Rdp);
    }

    #[tokio::test]
    async fn unsupported_operations_name_the_kind() {
        let config = SessionConfig::new(BackendKind::Webrtc);
        let mut driver = create_driver(&config).unwrap();
        let err = driver.connect().await.unwrap_err();
        assert!(err.to_string().contains("webrtc"));
    }

    #[test]
    fn spice_maps_to_the_hypervisor_driver() {
        let mut config = SessionConfig::new(BackendKind::Spice);
        config.backend.domain = Some("vm1".into());
        let driver = create_driver(&config).unwrap();
        assert_eq!(driver.kind(), BackendKind::Spice);
    }

    #[tokio::test]
    async fn custom_kind_is_unsupported() {
        let config = SessionConfig::new(BackendKind::Custom);
        let mut driver = create_driver(&config).unwrap();
        let err = driver.connect().await.unwrap_err();
        assert!(matches!(err, Error::UnsupportedBackend(BackendKind::Custom)));
    }

    #[test]
    fn spice_requires_a_domain() {
        let config = SessionConfig::new(BackendKind::Spice);
        assert!(matches!(create_driver(&config), Err(Error::Config(_))));
    }

    #[test]
    fn vnc_requires_a_host() {
        let config = SessionConfig::new(BackendKind::Vnc);
        assert!(matches!(create_driver(&config), Err(Error::Config(_))));
    }
}
