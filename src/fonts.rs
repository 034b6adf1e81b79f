//! Remote font resolution and the per-request download cache.
//!
//! Text nodes reference arbitrary web fonts by family name, so fonts are
//! resolved through a remote font directory rather than bundled: the
//! directory is queried by family, the style token selects a downloadable
//! file, and the file is fetched, persisted and registered with the raster
//! backend. A request-scoped cache keyed by the record's version and
//! last-modified stamp avoids re-downloading a pair that several text nodes
//! share. An unresolved font never fails the request; the node falls back to
//! whatever substitute face the backend picks.

use crate::diagnostics::DiagnosticLog;
use crate::stage::Stage;
use crate::{RenderConfig, RuntimeMode};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Mutex;

/// Known legacy family names mapped to their current directory equivalents.
pub const FAMILY_ALIASES: &[(&str, &str)] = &[("Source Sans Pro", "Source Sans 3")];

/// Apply the family alias table.
pub fn canonical_family(family: &str) -> String {
    let mut family = family.to_string();
    for (legacy, current) in FAMILY_ALIASES {
        family = family.replace(legacy, current);
    }
    family
}

/// Parsed form of a `fontStyle` token.
///
/// A single token is a weight (`"400"` normalizes to the directory's
/// `regular` selector); two tokens are a style/weight pair whose selector is
/// the weight (empty for 400) followed by `italic`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StyleSpec {
    pub style: Option<String>,
    pub weight: String,
    pub file_key: String,
}

impl StyleSpec {
    pub fn parse(font_style: &str) -> Self {
        let parts: Vec<&str> = font_style.split_whitespace().collect();
        match parts.as_slice() {
            [] => Self {
                style: None,
                weight: "regular".to_string(),
                file_key: "regular".to_string(),
            },
            [weight] => {
                let weight = if *weight == "400" { "regular" } else { weight };
                Self {
                    style: None,
                    weight: weight.to_string(),
                    file_key: weight.to_string(),
                }
            }
            [style, weight, ..] => {
                let weight = if *weight == "400" { "" } else { weight };
                Self {
                    style: Some((*style).to_string()),
                    weight: weight.to_string(),
                    file_key: format!("{weight}italic"),
                }
            }
        }
    }

    /// Numeric weight for face queries; `regular` and the empty string are 400.
    pub fn weight_value(&self) -> u16 {
        self.weight.parse().unwrap_or(400)
    }

    pub fn is_italic(&self) -> bool {
        self.style.as_deref() == Some("italic")
    }
}

/// One family record returned by the font directory.
#[derive(Debug, Clone, Deserialize)]
pub struct FontRecord {
    pub family: String,
    #[serde(default)]
    pub files: HashMap<String, String>,
    #[serde(default)]
    pub version: String,
    #[serde(rename = "lastModified", default)]
    pub last_modified: String,
}

#[derive(Debug, Default, Deserialize)]
struct DirectoryListing {
    #[serde(default)]
    items: Vec<FontRecord>,
}

/// A font a text node asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FontRequest {
    pub family: String,
    pub style: String,
}

/// Collect one request per text node, in document discovery order.
pub fn collect_requests(stage: &Stage) -> Vec<FontRequest> {
    let mut requests = Vec::new();
    stage.for_each_text(&mut |node| {
        requests.push(FontRequest {
            family: node.font_family.clone(),
            style: node.font_style.clone(),
        });
    });
    requests
}

/// A font that resolved and downloaded successfully.
#[derive(Debug, Clone)]
pub struct ResolvedFont {
    pub family: String,
    pub spec: StyleSpec,
    pub path: PathBuf,
    pub bytes: Vec<u8>,
}

/// Resolves fonts for one render request.
///
/// The cache is the request's membership set of resolved cache keys: a key is
/// claimed before its download starts, so concurrent nodes asking for the
/// same pair skip the fetch.
pub struct FontResolver<'a> {
    client: &'a reqwest::Client,
    config: &'a RenderConfig,
    cache: Mutex<HashSet<String>>,
}

impl<'a> FontResolver<'a> {
    pub fn new(client: &'a reqwest::Client, config: &'a RenderConfig) -> Self {
        Self {
            client,
            config,
            cache: Mutex::new(HashSet::new()),
        }
    }

    /// Resolve a batch of per-node requests. Every task is issued up front
    /// and the batch is awaited jointly; the next pipeline state must not
    /// start until all of them finished.
    pub async fn resolve_batch(
        &self,
        requests: &[FontRequest],
        log: &DiagnosticLog,
    ) -> Vec<ResolvedFont> {
        let tasks = requests.iter().map(|request| self.resolve_one(request, log));
        futures::future::join_all(tasks)
            .await
            .into_iter()
            .flatten()
            .collect()
    }

    async fn resolve_one(
        &self,
        request: &FontRequest,
        log: &DiagnosticLog,
    ) -> Option<ResolvedFont> {
        let family = canonical_family(&request.family);
        log.push(format!("Searching font directory for family: {family}"));

        let record = match self.lookup_family(&family, log).await {
            Some(record) => record,
            None => {
                log.push(format!(
                    "Font not found! {family} is a system font or does not exist"
                ));
                return None;
            }
        };

        let spec = StyleSpec::parse(&request.style);
        log.push_kv("fileKey", &spec.file_key);

        let Some(file_url) = record.files.get(&spec.file_key) else {
            log.push(format!(
                "No downloadable file for {family} matching {}",
                spec.file_key
            ));
            return None;
        };

        let cache_key = cache_key(&family, &spec.file_key, &record.version, &record.last_modified);
        log.push_kv("cacheKey", &cache_key);

        // Claim the key before downloading; a second node with the same pair
        // sees the claim and skips, even while this download is in flight.
        {
            let mut claimed = self.cache.lock().expect("font cache poisoned");
            if !claimed.insert(cache_key.clone()) {
                log.push(format!("No need to load font {family}. Exists in cache"));
                return None;
            }
        }

        log.push(format!("Downloading font from {file_url}"));
        let bytes = match self.download(file_url).await {
            Ok(bytes) => bytes,
            Err(message) => {
                log.push(format!("ERROR: {message}"));
                return None;
            }
        };

        let path = self.font_path(&family, &spec, &cache_key);
        match std::fs::write(&path, &bytes) {
            Ok(()) => log.push(format!("Saved font to [{}]", path.display())),
            // The file may already exist from an earlier request; not fatal.
            Err(err) => log.push(format!(
                "Could not persist font to [{}]: {err}",
                path.display()
            )),
        }

        Some(ResolvedFont {
            family,
            spec,
            path,
            bytes,
        })
    }

    async fn lookup_family(&self, family: &str, log: &DiagnosticLog) -> Option<FontRecord> {
        let mut url = match url::Url::parse(&self.config.font_directory_url) {
            Ok(url) => url,
            Err(err) => {
                log.push(format!("Invalid font directory URL: {err}"));
                return None;
            }
        };
        url.query_pairs_mut()
            .append_pair("key", &self.config.api_key)
            .append_pair("family", family);

        let response = match self.client.get(url).send().await {
            Ok(response) => response,
            Err(err) => {
                log.push(format!("Font directory request failed: {err}"));
                return None;
            }
        };
        if !response.status().is_success() {
            return None;
        }

        let listing: DirectoryListing = response.json().await.unwrap_or_default();
        listing.items.into_iter().next()
    }

    async fn download(&self, url: &str) -> std::result::Result<Vec<u8>, String> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|err| format!("Error downloading font {url}: {err}"))?;
        if !response.status().is_success() {
            return Err(format!(
                "Error downloading font {url}: status {}",
                response.status()
            ));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|err| format!("Error reading font body {url}: {err}"))?;
        Ok(bytes.to_vec())
    }

    fn font_path(&self, family: &str, spec: &StyleSpec, cache_key: &str) -> PathBuf {
        let dir = match self.config.mode {
            RuntimeMode::Test => self.config.base_path.join("fonts"),
            RuntimeMode::Production => std::env::temp_dir(),
        };
        // Create lazily; a failure shows up as a persist error on write.
        let _ = std::fs::create_dir_all(&dir);
        dir.join(font_filename(family, spec, cache_key))
    }
}

/// Derived identity for one downloadable font within a request.
pub fn cache_key(family: &str, file_key: &str, version: &str, last_modified: &str) -> String {
    format!("{}-{file_key}-{version}-{last_modified}", slug(family))
}

/// Deterministic on-disk filename for a cache key.
pub fn font_filename(family: &str, spec: &StyleSpec, cache_key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(cache_key.as_bytes());
    let digest = hex::encode(hasher.finalize());
    format!("{}-{}-{}.ttf", slug(family), spec.file_key, &digest[..16])
}

fn slug(family: &str) -> String {
    family.to_lowercase().replace(' ', "-")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_token_styles_are_weights() {
        let spec = StyleSpec::parse("400");
        assert_eq!(spec.style, None);
        assert_eq!(spec.weight, "regular");
        assert_eq!(spec.file_key, "regular");
        assert_eq!(spec.weight_value(), 400);
        assert!(!spec.is_italic());

        let bold = StyleSpec::parse("700");
        assert_eq!(bold.file_key, "700");
        assert_eq!(bold.weight_value(), 700);
    }

    #[test]
    fn two_token_styles_select_italic_files() {
        let spec = StyleSpec::parse("italic 700");
        assert_eq!(spec.style.as_deref(), Some("italic"));
        assert_eq!(spec.weight, "700");
        assert_eq!(spec.file_key, "700italic");
        assert!(spec.is_italic());

        let regular_italic = StyleSpec::parse("italic 400");
        assert_eq!(regular_italic.weight, "");
        assert_eq!(regular_italic.file_key, "italic");
        assert_eq!(regular_italic.weight_value(), 400);
    }

    #[test]
    fn empty_style_defaults_to_regular() {
        assert_eq!(StyleSpec::parse("").file_key, "regular");
    }

    #[test]
    fn legacy_families_are_aliased() {
        assert_eq!(canonical_family("Source Sans Pro"), "Source Sans 3");
        assert_eq!(canonical_family("Roboto"), "Roboto");
    }

    #[test]
    fn cache_key_carries_version_and_stamp() {
        let key = cache_key("Open Sans", "700italic", "v36", "2023-05-02");
        assert_eq!(key, "open-sans-700italic-v36-2023-05-02");
    }

    #[test]
    fn font_filename_is_deterministic() {
        let spec = StyleSpec::parse("700");
        let key = cache_key("Roboto", &spec.file_key, "v30", "2024-03-01");
        let a = font_filename("Roboto", &spec, &key);
        let b = font_filename("Roboto", &spec, &key);
        assert_eq!(a, b);
        assert!(a.starts_with("roboto-700-"));
        assert!(a.ends_with(".ttf"));
    }

    #[test]
    fn directory_listing_tolerates_missing_fields() {
        let listing: DirectoryListing = serde_json::from_str(r#"{}"#).expect("parse");
        assert!(listing.items.is_empty());

        let listing: DirectoryListing = serde_json::from_str(
            r#"{"items":[{"family":"Roboto","files":{"regular":"https://example.com/r.ttf"}}]}"#,
        )
        .expect("parse");
        assert_eq!(listing.items[0].family, "Roboto");
        assert_eq!(listing.items[0].version, "");
    }
}
