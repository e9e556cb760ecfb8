//! Error types for Darklock Shield

use thiserror::Error;

/// Errors surfaced by configuration and buffer entry points.
///
/// The protection path itself never returns these to the host: detectors,
/// the heartbeat and the orchestrator degrade to "not applied" instead.
#[derive(Debug, Error)]
pub enum ShieldError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid watermark payload: {0}")]
    InvalidPayload(String),

    #[error("Pixel buffer size mismatch: expected {expected} bytes, got {actual}")]
    BufferSize { expected: usize, actual: usize },

    #[error("Raster of {width}x{height} pixels exceeds {limit} bytes")]
    RasterTooLarge { width: u32, height: u32, limit: usize },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ShieldError>;
