//! Remote image hydration for image nodes.
//!
//! An image node carries a media descriptor with the URL of the original
//! asset. Known origins are rewritten to their mirror before fetching.
//! Fetch and decode failures are logged and swallowed; the node then renders
//! as an empty area instead of failing the request.

use crate::diagnostics::DiagnosticLog;
use crate::stage::Stage;
use futures::future::join_all;
use serde_json::Value;
use std::collections::HashMap;

/// Origins with a known mirror host. Consulted for every media URL.
pub const MEDIA_ORIGIN_REWRITES: &[(&str, &str)] = &[(
    "nyc3.cdn.digitaloceanspaces.com",
    "collateral-plus.nyc3.cdn.digitaloceanspaces.com",
)];

/// Rewrite a media URL's host through the origin rewrite table. URLs that
/// fail to parse or match no rule pass through unchanged.
pub fn rewrite_media_url(raw: &str) -> String {
    let Ok(mut parsed) = url::Url::parse(raw) else {
        return raw.to_string();
    };
    let Some(host) = parsed.host_str() else {
        return raw.to_string();
    };
    if let Some((_, mirror)) = MEDIA_ORIGIN_REWRITES
        .iter()
        .find(|(origin, _)| host == *origin)
    {
        if parsed.set_host(Some(mirror)).is_ok() {
            return parsed.to_string();
        }
    }
    raw.to_string()
}

/// The original-asset URL nested inside a media descriptor, if any.
pub fn media_source(media: &Value) -> Option<&str> {
    media.get("urls")?.get("original")?.get("url")?.as_str()
}

/// Fetches and binds remote bitmaps for one render request.
pub struct ImageHydrator<'a> {
    client: &'a reqwest::Client,
}

impl<'a> ImageHydrator<'a> {
    pub fn new(client: &'a reqwest::Client) -> Self {
        Self { client }
    }

    /// Hydrate every image node on the stage. One fetch task per node with a
    /// media source, issued as a batch and awaited jointly; nodes without a
    /// media descriptor are skipped without any fetch.
    pub async fn hydrate_stage(&self, stage: &mut Stage, log: &DiagnosticLog) {
        let mut sources: Vec<(usize, String)> = Vec::new();
        let mut index = 0usize;
        stage.for_each_image(&mut |node| {
            if let Some(src) = node.media.as_ref().and_then(media_source) {
                sources.push((index, rewrite_media_url(src)));
            }
            index += 1;
        });

        let tasks = sources.iter().map(|(index, src)| async move {
            (*index, self.fetch_bitmap(src, log).await)
        });
        let mut bitmaps: HashMap<usize, image::DynamicImage> = join_all(tasks)
            .await
            .into_iter()
            .filter_map(|(index, bitmap)| bitmap.map(|b| (index, b)))
            .collect();

        let mut index = 0usize;
        stage.for_each_image_mut(&mut |node| {
            if let Some(bitmap) = bitmaps.remove(&index) {
                node.bitmap = Some(bitmap);
            }
            index += 1;
        });
    }

    async fn fetch_bitmap(&self, src: &str, log: &DiagnosticLog) -> Option<image::DynamicImage> {
        log.push(format!("Loading image: {src}"));

        let response = match self.client.get(src).send().await {
            Ok(response) => response,
            Err(err) => {
                log.push(format!("ERROR: Failed to load image {src}: {err}"));
                return None;
            }
        };
        if !response.status().is_success() {
            log.push(format!(
                "ERROR: Failed to load image {src}: status {}",
                response.status()
            ));
            return None;
        }

        let bytes = match response.bytes().await {
            Ok(bytes) => bytes,
            Err(err) => {
                log.push(format!("ERROR: Failed to read image {src}: {err}"));
                return None;
            }
        };

        match image::load_from_memory(&bytes) {
            Ok(bitmap) => Some(bitmap),
            Err(err) => {
                log.push(format!("ERROR: Failed to decode image {src}: {err}"));
                None
            }
        }
    }
}
