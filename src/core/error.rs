//! Error types for the hillshade pipeline

use thiserror::Error;

/// Main error type for the crate
#[derive(Debug, Error)]
pub enum Error {
    #[error("GPU error: {0}")]
    Gpu(String),

    /// The backend rejected a texture or framebuffer allocation
    #[error("Resource allocation failed: {0}")]
    ResourceAllocation(String),

    #[error("Invalid DEM: {0}")]
    InvalidDem(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}
