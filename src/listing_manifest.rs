//! Saved manifests: a local JSON array of `{id, name, url}` objects, the
//! shape an earlier crawl wrote to `Nezams_IDs.<date>.json`.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;

use crate::config::ManifestSourceConfig;
use crate::error::Result;
use crate::fetcher::{make_source_id, unavailable, Listing, Page};
use crate::listing_json::field_string;
use crate::models::DocumentReference;

pub struct ManifestListing {
    name: String,
    config: ManifestSourceConfig,
}

impl ManifestListing {
    pub fn new(name: &str, config: ManifestSourceConfig) -> Self {
        Self {
            name: name.to_string(),
            config,
        }
    }
}

#[async_trait]
impl Listing for ManifestListing {
    fn source(&self) -> &str {
        &self.name
    }

    async fn page(&self, _cursor: u32) -> Result<Page> {
        let content = tokio::fs::read_to_string(&self.config.path)
            .await
            .map_err(|e| unavailable(&self.name, format!("{}: {}", self.config.path.display(), e)))?;
        Ok(Page {
            references: parse_manifest(&self.name, &content)?,
            next_cursor: None,
        })
    }
}

pub fn parse_manifest(source: &str, content: &str) -> Result<Vec<DocumentReference>> {
    let json: Value = serde_json::from_str(content)
        .map_err(|e| unavailable(source, format!("invalid manifest: {}", e)))?;
    let items = json
        .as_array()
        .ok_or_else(|| unavailable(source, "manifest must be a JSON array"))?;

    let now = Utc::now();
    Ok(items
        .iter()
        .filter_map(|item| {
            let url = field_string(item, "url")?;
            let id = field_string(item, "id");
            Some(DocumentReference {
                source: source.to_string(),
                source_id: make_source_id(source, id.as_deref(), &url),
                title: field_string(item, "name"),
                url,
                discovered_at: now,
            })
        })
        .collect())
}
