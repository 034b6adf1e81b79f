//! The render pipeline: one request in, one response out.
//!
//! States run in a fixed order, each gated on the previous one:
//! validate, inject background, build stage, resolve fonts, hydrate images,
//! settle, correct text, rasterize. Resource failures (fonts, images) are
//! logged and degrade; everything else maps to an error response carrying
//! the log collected so far.

use crate::diagnostics::DiagnosticLog;
use crate::fonts::{self, FontResolver};
use crate::images::ImageHydrator;
use crate::stage::{FontBook, Stage};
use crate::{document, textfix, Error, RenderConfig, ResponseShape, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde_json::{json, Value};
use std::time::Duration;

static USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// What the pipeline hands back to the transport layer.
#[derive(Debug, Clone)]
pub struct RenderResponse {
    /// 200 on success, 400 for an empty document, 401 for any other failure.
    pub status: u16,
    pub content_type: String,
    pub body: Vec<u8>,
    /// The full diagnostic log, also embedded in structured bodies.
    pub log: Vec<String>,
}

/// Renders scene documents. One instance can serve many requests; all
/// per-request state (log, stage, font cache) lives inside `render`.
pub struct RenderPipeline {
    config: RenderConfig,
    client: reqwest::Client,
}

impl RenderPipeline {
    pub fn new(config: RenderConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| Error::ConfigError(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self { config, client })
    }

    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    /// Render one scene document.
    pub async fn render(&self, document: &Value) -> RenderResponse {
        let log = DiagnosticLog::new();
        log.push(format!("Runtime: {USER_AGENT}"));
        log.push_kv("mode", self.config.mode);

        if let Err(err) = document::validate(document) {
            log.push("ERROR: Document is empty!");
            return self.error_response(&err, log);
        }

        match self.run(document.clone(), &log).await {
            Ok(png) => self.success_response(png, log),
            Err(err) => {
                log.push(format!("ERROR: {err}"));
                self.error_response(&err, log)
            }
        }
    }

    async fn run(&self, mut document: Value, log: &DiagnosticLog) -> Result<Vec<u8>> {
        log.push("Adding background layer to document...");
        document::inject_background(&mut document, log);
        log.push("... done adding background layer");

        log.push("Building stage from document...");
        let mut fonts = FontBook::new();
        let mut stage = Stage::build(&document, &fonts)?;
        log.push("... done building stage");

        log.push("Resolving fonts...");
        let requests = fonts::collect_requests(&stage);
        let resolver = FontResolver::new(&self.client, &self.config);
        let resolved = resolver.resolve_batch(&requests, log).await;
        for font in resolved {
            log.push(format!(
                "Registering font family:{} weight:{} style:{} from [{}]",
                font.family,
                font.spec.weight,
                font.spec.style.as_deref().unwrap_or("normal"),
                font.path.display()
            ));
            if fonts.register_file(&font.path).is_err() {
                // The persisted file may be unreadable; the bytes still are.
                fonts.register_data(font.bytes);
            }
        }
        log.push("... done resolving fonts");

        log.push("Hydrating images...");
        ImageHydrator::new(&self.client)
            .hydrate_stage(&mut stage, log)
            .await;
        log.push("... done hydrating images");

        // The hydration batches above are awaited jointly, but the raster
        // backend may still re-layout asynchronously after font
        // registration; the settle delay stays as a documented workaround.
        log.push(format!("Settling for {}ms", self.config.settle_delay_ms));
        tokio::time::sleep(Duration::from_millis(self.config.settle_delay_ms)).await;

        log.push("Correcting text layout...");
        textfix::correct_text_layout(&mut stage, &fonts);
        log.push("... done correcting text layout");

        log.push("Rasterizing...");
        let png = stage.rasterize(&fonts)?;
        log.push("... done rasterizing");

        Ok(png)
    }

    fn success_response(&self, png: Vec<u8>, log: DiagnosticLog) -> RenderResponse {
        let log = log.into_entries();
        match self.config.response_shape {
            ResponseShape::RawImage => RenderResponse {
                status: 200,
                content_type: "image/png".to_string(),
                body: png,
                log,
            },
            ResponseShape::Structured => {
                let body = json!({
                    "error": false,
                    "image": BASE64.encode(&png),
                    "log": log,
                });
                RenderResponse {
                    status: 200,
                    content_type: "application/json".to_string(),
                    body: body.to_string().into_bytes(),
                    log,
                }
            }
        }
    }

    fn error_response(&self, err: &Error, log: DiagnosticLog) -> RenderResponse {
        let log = log.into_entries();
        let body = json!({
            "error": true,
            "log": log,
        });
        RenderResponse {
            status: err.status(),
            content_type: "application/json".to_string(),
            body: body.to_string().into_bytes(),
            log,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RuntimeMode;

    fn test_config() -> RenderConfig {
        RenderConfig {
            settle_delay_ms: 0,
            mode: RuntimeMode::Test,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn empty_document_is_rejected_before_any_state() {
        let pipeline = RenderPipeline::new(test_config()).expect("pipeline");
        let response = pipeline.render(&json!({})).await;

        assert_eq!(response.status, 400);
        assert_eq!(response.content_type, "application/json");
        assert!(response.log.iter().any(|e| e.contains("ERROR")));
        assert!(!response.log.iter().any(|e| e.contains("Building stage")));

        let body: Value = serde_json::from_slice(&response.body).expect("json body");
        assert_eq!(body["error"], json!(true));
    }

    #[tokio::test]
    async fn structural_failure_maps_to_401_with_partial_log() {
        let pipeline = RenderPipeline::new(test_config()).expect("pipeline");
        // Non-empty document without usable stage dimensions.
        let response = pipeline.render(&json!({ "attrs": { "foo": 1 } })).await;

        assert_eq!(response.status, 401);
        assert!(response.log.iter().any(|e| e.contains("Building stage")));
        assert!(response.log.iter().any(|e| e.contains("ERROR")));
    }
}
