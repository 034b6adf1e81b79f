//! Error types for the render pipeline

use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while rendering a scene document
#[derive(Error, Debug)]
pub enum Error {
    /// The input document is missing or carries no attributes at all
    #[error("Document is empty")]
    EmptyDocument,

    /// The document is present but structurally unusable
    #[error("Invalid document: {0}")]
    DocumentError(String),

    /// Building the scene tree from the document failed
    #[error("Scene construction failed: {0}")]
    SceneError(String),

    /// Font directory lookup or font download failed
    #[error("Font resolution failed: {0}")]
    FontError(String),

    /// Remote image fetch or decode failed
    #[error("Image hydration failed: {0}")]
    ImageError(String),

    /// Producing the final bitmap failed
    #[error("Rasterization failed: {0}")]
    RenderError(String),

    /// Network error
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    /// Filesystem error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// HTTP status the pipeline reports for this error: 400 for an empty
    /// document, 401 for everything else.
    pub fn status(&self) -> u16 {
        match self {
            Error::EmptyDocument => 400,
            _ => 401,
        }
    }
}
