//! Scenepress
//!
//! A scene-document rasterization pipeline for Rust: takes a declarative
//! JSON scene (shapes, text runs, images), resolves its remote resources
//! (web fonts selected by family/style, remote images), repairs known text
//! layout defects, and produces a single encoded PNG plus a per-request
//! diagnostic log.
//!
//! # Features
//!
//! - **Remote font resolution**: families are looked up in a font directory
//!   service, downloaded once per request, and registered with the raster
//!   backend; unresolved fonts degrade to a substitute face.
//! - **Tolerant hydration**: a broken font or image never fails a render.
//! - **Transport-agnostic**: the pipeline returns a status code, a content
//!   type and a body; any HTTP frontend (or the bundled CLI) can wrap it.
//!
//! # Example
//!
//! ```no_run
//! use scenepress::{RenderConfig, RenderPipeline};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = RenderConfig {
//!     api_key: "directory-api-key".to_string(),
//!     ..Default::default()
//! };
//!
//! let pipeline = RenderPipeline::new(config)?;
//! let document: serde_json::Value = serde_json::from_str(r#"{
//!     "attrs": { "width": 640, "height": 480 },
//!     "className": "Stage",
//!     "children": [{ "attrs": {}, "className": "Layer", "children": [] }]
//! }"#)?;
//!
//! let response = pipeline.render(&document).await;
//! assert_eq!(response.status, 200);
//! # Ok(())
//! # }
//! ```

use std::path::PathBuf;

pub mod error;
pub use error::{Error, Result};

pub mod diagnostics;
pub use diagnostics::DiagnosticLog;

pub mod document;
pub mod fonts;
pub mod images;
pub mod stage;
pub mod textfix;

pub mod pipeline;
pub use pipeline::{RenderPipeline, RenderResponse};

pub use stage::{FontBook, Stage};

/// Selects where fonts are persisted and which paths a deployment uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeMode {
    /// Fonts go to the process temp directory.
    Production,
    /// Fonts go to `{base_path}/fonts`.
    Test,
}

impl std::fmt::Display for RuntimeMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RuntimeMode::Production => write!(f, "production"),
            RuntimeMode::Test => write!(f, "test"),
        }
    }
}

/// How the success body is shaped for the transport layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseShape {
    /// Raw PNG bytes with an `image/png` content type.
    RawImage,
    /// A JSON body wrapping the base64 image together with the log.
    Structured,
}

/// Configuration for the render pipeline
///
/// The defaults are production-shaped: fonts persist to the process temp
/// directory, the success body is raw PNG bytes, and the settle delay
/// between hydration and text correction is 500ms.
///
/// # Examples
///
/// ```
/// let cfg = scenepress::RenderConfig::default();
/// assert_eq!(cfg.settle_delay_ms, 500);
/// ```
#[derive(Debug, Clone)]
pub struct RenderConfig {
    /// API key for the font directory service
    pub api_key: String,
    /// Runtime mode selecting font persistence paths
    pub mode: RuntimeMode,
    /// Root for test-mode font persistence (`{base_path}/fonts`)
    pub base_path: PathBuf,
    /// Shape of the success response body
    pub response_shape: ResponseShape,
    /// Base URL of the font directory lookup service
    pub font_directory_url: String,
    /// Delay between hydration and text correction in milliseconds
    pub settle_delay_ms: u64,
    /// Timeout for remote font/image fetches in milliseconds
    pub timeout_ms: u64,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            mode: RuntimeMode::Production,
            base_path: PathBuf::from("."),
            response_shape: ResponseShape::RawImage,
            font_directory_url: "https://www.googleapis.com/webfonts/v1/webfonts".to_string(),
            settle_delay_ms: 500,
            timeout_ms: 30000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RenderConfig::default();
        assert_eq!(config.mode, RuntimeMode::Production);
        assert_eq!(config.response_shape, ResponseShape::RawImage);
        assert_eq!(config.settle_delay_ms, 500);
        assert_eq!(config.timeout_ms, 30000);
        assert!(config.api_key.is_empty());
        assert!(config.font_directory_url.contains("webfonts"));
    }

    #[test]
    fn test_runtime_mode_display() {
        assert_eq!(RuntimeMode::Production.to_string(), "production");
        assert_eq!(RuntimeMode::Test.to_string(), "test");
    }
}
