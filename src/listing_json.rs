//! JSON listing endpoints.
//!
//! Covers plain `GET` APIs and WordPress-style `admin-ajax.php` actions that
//! expect a form-encoded `POST`. The item array is located with a JSON
//! pointer; each item's id, URL and title are read from configurable
//! fields.
//!
//! ```toml
//! [sources.nezams]
//! kind = "json"
//! url = "https://nezams.com/wp-admin/admin-ajax.php"
//! method = "post"
//! form = { action = "get_systems" }
//! items_pointer = "/data"
//! url_field = "link"
//! title_field = "text"
//! ```

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;

use crate::config::{HttpMethod, JsonSourceConfig};
use crate::error::Result;
use crate::fetcher::{make_source_id, next_page, read_body, unavailable, with_page_param, Listing, Page};
use crate::models::DocumentReference;

pub struct JsonListing {
    name: String,
    config: JsonSourceConfig,
    client: reqwest::Client,
}

impl JsonListing {
    pub fn new(name: &str, config: JsonSourceConfig, client: reqwest::Client) -> Self {
        Self {
            name: name.to_string(),
            config,
            client,
        }
    }

    fn request(&self, cursor: u32) -> Result<(url::Url, reqwest::RequestBuilder)> {
        let mut url = url::Url::parse(&self.config.url).map_err(|e| unavailable(&self.name, e))?;
        let mut form: Vec<(String, String)> = self
            .config
            .form
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let request = match self.config.method {
            HttpMethod::Get => {
                if !form.is_empty() {
                    url.query_pairs_mut().extend_pairs(&form);
                }
                if let Some(p) = &self.config.pagination {
                    url = with_page_param(&url, &p.param, cursor);
                }
                self.client.get(url.clone())
            }
            HttpMethod::Post => {
                if let Some(p) = &self.config.pagination {
                    form.retain(|(k, _)| k != &p.param);
                    form.push((p.param.clone(), cursor.to_string()));
                }
                self.client.post(url.clone()).form(&form)
            }
        };
        Ok((url, request))
    }
}

#[async_trait]
impl Listing for JsonListing {
    fn source(&self) -> &str {
        &self.name
    }

    fn first_cursor(&self) -> u32 {
        self.config.pagination.as_ref().map(|p| p.start).unwrap_or(1)
    }

    async fn page(&self, cursor: u32) -> Result<Page> {
        let (url, request) = self.request(cursor)?;
        let body = read_body(&self.name, request).await?;
        let json: Value = serde_json::from_str(body.trim_start_matches('\u{feff}'))
            .map_err(|e| unavailable(&self.name, format!("invalid JSON listing: {}", e)))?;
        let (references, items) = parse_items(&self.name, &self.config, &json, &url)?;
        Ok(Page {
            references,
            next_cursor: next_page(self.config.pagination.as_ref(), cursor, items),
        })
    }
}

/// Map the item array of a listing response to references.
///
/// Returns the references and the raw item count (pagination stops on an
/// empty page even when every item was skipped).
pub fn parse_items(
    source: &str,
    config: &JsonSourceConfig,
    json: &Value,
    endpoint: &url::Url,
) -> Result<(Vec<DocumentReference>, usize)> {
    let items = json
        .pointer(&config.items_pointer)
        .and_then(Value::as_array)
        .ok_or_else(|| {
            unavailable(
                source,
                format!("response has no array at '{}'", config.items_pointer),
            )
        })?;

    let now = Utc::now();
    let mut references = Vec::with_capacity(items.len());
    for item in items {
        let Some(raw_url) = field_string(item, &config.url_field) else {
            continue;
        };
        let Ok(url) = endpoint.join(raw_url.trim()) else {
            continue;
        };
        let id = field_string(item, &config.id_field);
        let title = field_string(item, &config.title_field)
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());
        references.push(DocumentReference {
            source: source.to_string(),
            source_id: make_source_id(source, id.as_deref(), url.as_str()),
            url: url.to_string(),
            title,
            discovered_at: now,
        });
    }
    Ok((references, items.len()))
}

/// String or number field, as a string.
pub(crate) fn field_string(item: &Value, field: &str) -> Option<String> {
    match item.get(field)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config() -> JsonSourceConfig {
        JsonSourceConfig {
            url: "https://nezams.test/wp-admin/admin-ajax.php".into(),
            method: HttpMethod::Post,
            form: [("action".to_string(), "get_systems".to_string())]
                .into_iter()
                .collect(),
            items_pointer: "/data".into(),
            id_field: "id".into(),
            url_field: "link".into(),
            title_field: "text".into(),
            pagination: None,
            html: Default::default(),
        }
    }

    #[test]
    fn maps_configured_fields() {
        let body = json!({
            "success": true,
            "data": [
                {"id": 101, "text": "نظام العمل", "link": "https://nezams.test/labor/"},
                {"id": "102", "text": "  ", "link": "/civil/"},
                {"id": 103, "text": "no link"},
            ]
        });
        let endpoint = url::Url::parse(&config().url).unwrap();
        let (refs, items) = parse_items("nezams", &config(), &body, &endpoint).unwrap();
        assert_eq!(items, 3);
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].source_id, "nezams:101");
        assert_eq!(refs[0].title.as_deref(), Some("نظام العمل"));
        assert_eq!(refs[1].source_id, "nezams:102");
        assert_eq!(refs[1].url, "https://nezams.test/civil/");
        assert_eq!(refs[1].title, None);
    }

    #[test]
    fn missing_item_array_is_source_unavailable() {
        let endpoint = url::Url::parse(&config().url).unwrap();
        let err = parse_items("nezams", &config(), &json!({"data": null}), &endpoint).unwrap_err();
        assert!(matches!(
            err,
            crate::error::HarvestError::SourceUnavailable { .. }
        ));
    }

    #[test]
    fn root_pointer_reads_a_bare_array() {
        let mut cfg = config();
        cfg.items_pointer = String::new();
        let endpoint = url::Url::parse(&cfg.url).unwrap();
        let body = json!([{"link": "https://nezams.test/a.pdf"}]);
        let (refs, _) = parse_items("nezams", &cfg, &body, &endpoint).unwrap();
        assert_eq!(
            refs[0].source_id,
            crate::fetcher::make_source_id("nezams", None, "https://nezams.test/a.pdf")
        );
        assert!(refs[0].source_id.starts_with("nezams:a-"));
    }
}
