// src/render/mod.rs
//! Renderer collaborator contract.
//!
//! The monitor never looks inside a document: it asks a [`Renderer`] to
//! fetch a URL and then asks the resulting [`Document`] for the text at a
//! locator. Renderers are created through a [`RendererFactory`] so a broken
//! session can be thrown away and rebuilt.

pub mod http;
pub mod mock;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use crate::registry::{ExtractKind, SourceConfig};
use crate::state::SampleValue;

/// Fetch-level failures. Empty extractions are not errors.
#[derive(Debug, Error)]
pub enum RenderError {
    /// Navigation failed (network error, non-2xx, bad URL).
    #[error("navigation failed: {0}")]
    Navigation(String),

    /// No answer within the fetch timeout.
    #[error("fetch timed out after {0:?}")]
    Timeout(Duration),

    /// The underlying session could not be created or is broken.
    #[error("renderer session unavailable: {0}")]
    Session(String),
}

#[async_trait]
pub trait Document: Send + Sync {
    /// Text at `locator`, if any.
    async fn extract_text(&self, locator: &str) -> Option<String>;
    /// Text of every element matching `locator`, in document order.
    async fn extract_all(&self, locator: &str) -> Vec<String>;
}

#[async_trait]
pub trait Renderer: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Box<dyn Document>, RenderError>;
    fn name(&self) -> &'static str;
}

#[async_trait]
pub trait RendererFactory: Send + Sync {
    async fn create(&self) -> Result<Box<dyn Renderer>, RenderError>;
}

/// One extraction attempt for `source`: first locator that yields something
/// non-blank wins.
pub async fn extract_value(doc: &dyn Document, source: &SourceConfig) -> Option<SampleValue> {
    for locator in source.locator.candidates() {
        match source.kind {
            ExtractKind::Text => {
                if let Some(txt) = doc.extract_text(locator).await {
                    let txt = txt.trim();
                    if !txt.is_empty() {
                        return Some(SampleValue::Text(txt.to_string()));
                    }
                }
            }
            ExtractKind::List => {
                let vals: Vec<String> = doc
                    .extract_all(locator)
                    .await
                    .into_iter()
                    .map(|v| v.trim().to_string())
                    .collect();
                if vals.iter().any(|v| !v.is_empty()) {
                    return Some(SampleValue::List(vals));
                }
            }
        }
    }
    None
}
