//! vmscope
//!
//! Remotely observes and controls a virtual machine's display and input
//! surface through per-backend drivers, and layers two interpretive
//! pipelines on top of raw frames: OCR aggregation with text search, and
//! vision-model action planning.
//!
//! The moving parts:
//! - a polymorphic [`driver::Driver`] per backend kind (hypervisor monitor,
//!   framebuffer helpers, mock);
//! - a [`session::Session`] owning one driver, running the periodic frame
//!   loop, and enforcing read-only policy;
//! - [`ocr`] for reconstructing lines from an external engine's word table;
//! - [`vision`] for turning a frame plus a goal into validated input events.

pub mod config;
pub mod driver;
pub mod error;
pub mod input;
pub mod keymap;
pub mod ocr;
pub mod provider;
pub mod retry;
pub mod session;
pub mod types;
pub mod vision;

pub use config::{BackendConfig, SessionConfig, VisionConfig};
pub use driver::{create_driver, Driver, MockDriver, QemuDriver, UnsupportedDriver, VncDriver};
pub use error::{Error, Result};
pub use input::{InputEvent, KeyAction, MouseButton};
pub use ocr::{
    find_text, parse_tsv, BoundingBox, FindOptions, FindScope, MatchLevel, OcrEngine, OcrLine,
    OcrResult, OcrWord, TextMatch,
};
pub use provider::Provider;
pub use retry::with_retry;
pub use session::{Session, SessionEvent};
pub use types::{BackendKind, Frame, SessionStatus, Viewport};
pub use vision::{VisionPlan, VisionPlanner};
