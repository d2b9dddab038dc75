//! Error taxonomy for vmscope.
//!
//! Recovery policy:
//! - Connection/Config failures are fatal to session start and never retried.
//! - Capture failures are tolerated indefinitely by the frame loop.
//! - Input failures are retried a bounded number of times before surfacing.
//! - Read-only rejections are not errors at all; they are logged no-ops.

use thiserror::Error;

use crate::types::BackendKind;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("capture failed: {0}")]
    Capture(String),

    #[error("input dispatch failed: {0}")]
    Input(String),

    #[error("backend '{0}' is not implemented")]
    UnsupportedBackend(BackendKind),

    #[error("vision response unparsable: {message}")]
    Parse {
        message: String,
        /// Raw model output, kept for diagnostics.
        raw: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
