//! HTML index pages.
//!
//! GETs the configured page (with the pagination parameter when one is
//! set), selects document links with `link_selector`, and resolves each
//! `href` against the page URL.
//!
//! ```toml
//! [sources.gosi]
//! kind = "html"
//! url = "https://www.gosi.gov.sa/ar/SystemsAndRegulations"
//! link_selector = "#mediaCenterElements li a"
//! exclude_titles = ["كتيبات الأنظمة"]
//! ```

use async_trait::async_trait;
use chrono::Utc;
use scraper::{Html, Selector};

use crate::config::HtmlSourceConfig;
use crate::error::Result;
use crate::fetcher::{make_source_id, next_page, read_body, unavailable, with_page_param, Listing, Page};
use crate::models::DocumentReference;

pub struct HtmlListing {
    name: String,
    config: HtmlSourceConfig,
    client: reqwest::Client,
}

impl HtmlListing {
    pub fn new(name: &str, config: HtmlSourceConfig, client: reqwest::Client) -> Self {
        Self {
            name: name.to_string(),
            config,
            client,
        }
    }

    fn page_url(&self, cursor: u32) -> Result<url::Url> {
        let base = url::Url::parse(&self.config.url).map_err(|e| unavailable(&self.name, e))?;
        Ok(match &self.config.pagination {
            Some(p) => with_page_param(&base, &p.param, cursor),
            None => base,
        })
    }
}

#[async_trait]
impl Listing for HtmlListing {
    fn source(&self) -> &str {
        &self.name
    }

    fn first_cursor(&self) -> u32 {
        self.config.pagination.as_ref().map(|p| p.start).unwrap_or(1)
    }

    async fn page(&self, cursor: u32) -> Result<Page> {
        let url = self.page_url(cursor)?;
        let body = read_body(&self.name, self.client.get(url.clone())).await?;
        let references = parse_links(&self.name, &self.config, &body, &url)?;
        let next_cursor = next_page(self.config.pagination.as_ref(), cursor, references.len());
        Ok(Page {
            references,
            next_cursor,
        })
    }
}

/// Extract document references from one listing page.
pub fn parse_links(
    source: &str,
    config: &HtmlSourceConfig,
    body: &str,
    page_url: &url::Url,
) -> Result<Vec<DocumentReference>> {
    let selector = Selector::parse(&config.link_selector).map_err(|e| {
        unavailable(
            source,
            format!("invalid link_selector '{}': {:?}", config.link_selector, e),
        )
    })?;
    let document = Html::parse_document(body);
    let now = Utc::now();

    let mut references = Vec::new();
    for element in document.select(&selector) {
        let Some(href) = element.value().attr("href") else {
            continue;
        };
        let Ok(url) = page_url.join(href.trim()) else {
            continue;
        };
        if !matches!(url.scheme(), "http" | "https") {
            continue;
        }

        let text = collapse_whitespace(&element.text().collect::<String>());
        let title = if text.is_empty() {
            element.value().attr("title").map(collapse_whitespace)
        } else {
            Some(text)
        };
        if let Some(t) = &title {
            if config.exclude_titles.iter().any(|x| x == t) {
                continue;
            }
        }

        let explicit = config
            .id_attribute
            .as_deref()
            .and_then(|attr| element.value().attr(attr));
        references.push(DocumentReference {
            source: source.to_string(),
            source_id: make_source_id(source, explicit, url.as_str()),
            url: url.to_string(),
            title: title.filter(|t| !t.is_empty()),
            discovered_at: now,
        });
    }
    Ok(references)
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> HtmlSourceConfig {
        HtmlSourceConfig {
            url: "https://portal.test/ar/regs".into(),
            link_selector: "#list li a".into(),
            id_attribute: Some("data-id".into()),
            exclude_titles: vec!["كتيبات الأنظمة".into()],
            pagination: None,
            html: Default::default(),
        }
    }

    const PAGE: &str = r#"
        <html><body>
          <ul id="list">
            <li><a href="/files/labor.pdf" data-id="17">نظام   العمل</a></li>
            <li><a href="docs/social.pdf">Social
                Insurance</a></li>
            <li><a href="/files/booklet.pdf">كتيبات الأنظمة</a></li>
            <li><a href="mailto:info@portal.test">contact</a></li>
            <li><a>no href</a></li>
          </ul>
          <a href="/outside.pdf">outside the list</a>
        </body></html>
    "#;

    #[test]
    fn selects_links_and_resolves_relative_urls() {
        let base = url::Url::parse("https://portal.test/ar/regs").unwrap();
        let refs = parse_links("gosi", &config(), PAGE, &base).unwrap();
        assert_eq!(refs.len(), 2);

        assert_eq!(refs[0].source_id, "gosi:17");
        assert_eq!(refs[0].url, "https://portal.test/files/labor.pdf");
        assert_eq!(refs[0].title.as_deref(), Some("نظام العمل"));

        assert!(refs[1].source_id.starts_with("gosi:social-"));
        assert_eq!(refs[1].url, "https://portal.test/ar/docs/social.pdf");
        assert_eq!(refs[1].title.as_deref(), Some("Social Insurance"));
    }

    #[test]
    fn page_url_carries_the_cursor() {
        let mut cfg = config();
        cfg.pagination = Some(crate::config::Pagination {
            param: "p".into(),
            start: 0,
            max_pages: 5,
        });
        let listing = HtmlListing::new("gosi", cfg, reqwest::Client::new());
        assert_eq!(listing.first_cursor(), 0);
        assert_eq!(
            listing.page_url(2).unwrap().as_str(),
            "https://portal.test/ar/regs?p=2"
        );
    }
}
