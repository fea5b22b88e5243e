// src/render/http.rs
//! Plain HTTP renderer: no script execution, the fetched body is the
//! document. A locator is a regular expression over the raw body; the first
//! capture group (or the whole match) is taken, then tags are stripped,
//! entities decoded and whitespace collapsed.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Client;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use super::{Document, RenderError, Renderer, RendererFactory};

static RE_TAGS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)</?[^>]+>").expect("tag regex"));
static RE_WS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t\r\n]+").expect("ws regex"));

#[derive(Debug, Clone)]
pub struct HttpRendererFactory {
    timeout: Duration,
    user_agent: String,
}

impl Default for HttpRendererFactory {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            user_agent: format!("feed-freshness-monitor/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl HttpRendererFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = Duration::from_secs(secs);
        self
    }

    pub fn with_user_agent(mut self, ua: impl Into<String>) -> Self {
        self.user_agent = ua.into();
        self
    }
}

#[async_trait]
impl RendererFactory for HttpRendererFactory {
    async fn create(&self) -> Result<Box<dyn Renderer>, RenderError> {
        let client = Client::builder()
            .timeout(self.timeout)
            .user_agent(self.user_agent.clone())
            .build()
            .map_err(|e| RenderError::Session(e.to_string()))?;
        Ok(Box::new(HttpRenderer {
            client,
            timeout: self.timeout,
            locators: LocatorCache::default(),
        }))
    }
}

pub struct HttpRenderer {
    client: Client,
    timeout: Duration,
    locators: LocatorCache,
}

/// Compiled locator patterns, shared by every document one renderer
/// produces. Invalid patterns are remembered as `None` and logged once.
#[derive(Debug, Clone, Default)]
pub struct LocatorCache {
    compiled: Arc<Mutex<HashMap<String, Option<Regex>>>>,
}

impl LocatorCache {
    pub fn get(&self, locator: &str) -> Option<Regex> {
        let mut map = self.compiled.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(re) = map.get(locator) {
            return re.clone();
        }
        let re = match Regex::new(locator) {
            Ok(re) => Some(re),
            Err(e) => {
                tracing::warn!(target: "monitor", locator, error = %e, "invalid locator pattern");
                None
            }
        };
        map.insert(locator.to_string(), re.clone());
        re
    }

    pub fn len(&self) -> usize {
        self.compiled.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl Renderer for HttpRenderer {
    async fn fetch(&self, url: &str) -> Result<Box<dyn Document>, RenderError> {
        let to_render_error = |e: reqwest::Error| {
            if e.is_timeout() {
                RenderError::Timeout(self.timeout)
            } else {
                RenderError::Navigation(e.to_string())
            }
        };
        let rsp = self.client.get(url).send().await.map_err(to_render_error)?;
        let rsp = rsp.error_for_status().map_err(to_render_error)?;
        let body = rsp.text().await.map_err(to_render_error)?;
        Ok(Box::new(HtmlDocument::with_cache(body, self.locators.clone())))
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

pub struct HtmlDocument {
    body: String,
    locators: LocatorCache,
}

impl HtmlDocument {
    pub fn new(body: impl Into<String>) -> Self {
        Self::with_cache(body, LocatorCache::default())
    }

    pub fn with_cache(body: impl Into<String>, locators: LocatorCache) -> Self {
        Self {
            body: body.into(),
            locators,
        }
    }

    fn matches(&self, locator: &str) -> Vec<String> {
        let Some(re) = self.locators.get(locator) else {
            return Vec::new();
        };
        re.captures_iter(&self.body)
            .filter_map(|c| c.get(1).or_else(|| c.get(0)))
            .map(|m| visible_text(m.as_str()))
            .collect()
    }
}

#[async_trait]
impl Document for HtmlDocument {
    async fn extract_text(&self, locator: &str) -> Option<String> {
        self.matches(locator).into_iter().find(|s| !s.is_empty())
    }

    async fn extract_all(&self, locator: &str) -> Vec<String> {
        self.matches(locator)
    }
}

/// Strip tags, decode entities, collapse ASCII whitespace. Non-breaking
/// spaces are kept; the timestamp normalizer handles them.
pub fn visible_text(fragment: &str) -> String {
    let no_tags = RE_TAGS.replace_all(fragment, " ");
    let decoded = html_escape::decode_html_entities(&no_tags);
    RE_WS.replace_all(&decoded, " ").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"
<html><body>
  <div id="asOn">As on <b>19 Nov 2025</b> | 12:05</div>
  <span class="px">24,350.20</span>
  <span class="px">81,200.55</span>
</body></html>"#;

    #[tokio::test]
    async fn capture_group_is_extracted_as_visible_text() {
        let doc = HtmlDocument::new(PAGE);
        assert_eq!(
            doc.extract_text(r#"(?s)<div id="asOn">(.*?)</div>"#).await,
            Some("As on 19 Nov 2025 | 12:05".to_string())
        );
    }

    #[tokio::test]
    async fn all_matches_in_order() {
        let doc = HtmlDocument::new(PAGE);
        assert_eq!(
            doc.extract_all(r#"<span class="px">(.*?)</span>"#).await,
            vec!["24,350.20".to_string(), "81,200.55".to_string()]
        );
    }

    #[tokio::test]
    async fn bad_or_missing_locators_yield_nothing() {
        let doc = HtmlDocument::new(PAGE);
        assert_eq!(doc.extract_text("(unclosed").await, None);
        assert_eq!(doc.extract_text(r#"<p class="nope">(.*)</p>"#).await, None);
    }

    #[tokio::test]
    async fn locators_compile_once_per_cache() {
        let cache = LocatorCache::default();
        let first = HtmlDocument::with_cache(PAGE, cache.clone());
        let second = HtmlDocument::with_cache(PAGE, cache.clone());
        let loc = r#"<span class="px">(.*?)</span>"#;
        for _ in 0..3 {
            assert_eq!(first.extract_text(loc).await.as_deref(), Some("24,350.20"));
        }
        assert_eq!(second.extract_all(loc).await.len(), 2);
        assert_eq!(cache.len(), 1);

        assert_eq!(first.extract_text("(unclosed").await, None);
        assert_eq!(second.extract_text("(unclosed").await, None);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn visible_text_decodes_entities() {
        assert_eq!(visible_text("<i>a</i>&amp;\n  b"), "a & b");
    }
}
