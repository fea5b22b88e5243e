// src/registry.rs
//! # Source Registry
//!
//! The fixed set of monitored sources, loaded once at startup from JSON or
//! TOML. Accepted shapes:
//! - JSON array of source objects,
//! - JSON object keyed by source id (ids taken from the keys, sorted),
//! - TOML with a `[[sources]]` table array.
//!
//! A missing or malformed registry is fatal: the caller gets an error and
//! the process must not start.

use anyhow::{anyhow, bail, Context, Result};
use chrono::NaiveTime;
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

pub const ENV_REGISTRY_PATH: &str = "SOURCE_REGISTRY_PATH";
pub const DEFAULT_CADENCE_SECS: u64 = 60;
pub const DEFAULT_GROUP: &str = "default";

/// How a source's representative value is pulled out of the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractKind {
    /// First non-empty match of the locators, as one string.
    #[default]
    #[serde(alias = "timestamp")]
    Text,
    /// Every match of the locator, in document order.
    #[serde(alias = "tickervalue")]
    List,
}

/// Opaque locator(s), meaningful only to the renderer. Tried in order.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum Locator {
    Single(String),
    Fallbacks(Vec<String>),
}

impl Locator {
    pub fn candidates(&self) -> Vec<&str> {
        match self {
            Locator::Single(s) => vec![s.as_str()],
            Locator::Fallbacks(v) => v.iter().map(String::as_str).collect(),
        }
    }

    fn is_empty(&self) -> bool {
        self.candidates().iter().all(|c| c.trim().is_empty())
    }
}

/// Daily local time range in which a source is sampled at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ActiveWindow {
    pub start: Option<NaiveTime>,
    pub end: Option<NaiveTime>,
}

impl ActiveWindow {
    pub fn before_start(&self, t: NaiveTime) -> bool {
        self.start.is_some_and(|s| t < s)
    }

    pub fn at_or_after_end(&self, t: NaiveTime) -> bool {
        self.end.is_some_and(|e| t >= e)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SourceConfig {
    pub id: String,
    pub display_name: String,
    pub url: String,
    pub locator: Locator,
    pub kind: ExtractKind,
    pub cadence_secs: u64,
    pub window: Option<ActiveWindow>,
    pub group: String,
}

#[derive(Debug, Clone, Default)]
pub struct SourceRegistry {
    sources: Vec<SourceConfig>,
}

impl SourceRegistry {
    pub fn new(sources: Vec<SourceConfig>) -> Result<Self> {
        if sources.is_empty() {
            bail!("source registry is empty");
        }
        let mut seen = HashSet::new();
        for s in &sources {
            if !seen.insert(s.id.as_str()) {
                bail!("duplicate source id `{}`", s.id);
            }
        }
        Ok(Self { sources })
    }

    pub fn sources(&self) -> &[SourceConfig] {
        &self.sources
    }

    pub fn get(&self, id: &str) -> Option<&SourceConfig> {
        self.sources.iter().find(|s| s.id == id)
    }

    pub fn ids(&self) -> Vec<String> {
        self.sources.iter().map(|s| s.id.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

/// Load the registry from an explicit path. Format follows the extension,
/// with a content sniff for anything else.
pub fn load_registry_from(path: &Path) -> Result<SourceRegistry> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading source registry from {}", path.display()))?;
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    let registry = parse_registry(&content, &ext)
        .with_context(|| format!("parsing source registry {}", path.display()))?;
    tracing::info!(
        target: "registry",
        path = %path.display(),
        sources = registry.len(),
        "source registry loaded"
    );
    Ok(registry)
}

/// Load the registry using env var + fallbacks:
/// 1) $SOURCE_REGISTRY_PATH
/// 2) config/sources.toml
/// 3) config/sources.json
///
/// Finding none of them is an error.
pub fn load_registry_default() -> Result<SourceRegistry> {
    if let Ok(p) = std::env::var(ENV_REGISTRY_PATH) {
        let pb = PathBuf::from(p);
        if pb.exists() {
            return load_registry_from(&pb);
        }
        bail!("{ENV_REGISTRY_PATH} points to non-existent path {}", pb.display());
    }
    for candidate in ["config/sources.toml", "config/sources.json"] {
        let p = PathBuf::from(candidate);
        if p.exists() {
            return load_registry_from(&p);
        }
    }
    Err(anyhow!(
        "no source registry found (set {ENV_REGISTRY_PATH} or add config/sources.toml)"
    ))
}

pub fn parse_registry(s: &str, hint_ext: &str) -> Result<SourceRegistry> {
    let raw = if hint_ext == "toml" {
        parse_toml(s)?
    } else if hint_ext == "json" {
        parse_json(s)?
    } else {
        parse_json(s).or_else(|_| parse_toml(s))?
    };
    let sources = raw
        .into_iter()
        .map(RawSource::validate)
        .collect::<Result<Vec<_>>>()?;
    SourceRegistry::new(sources)
}

fn parse_toml(s: &str) -> Result<Vec<RawSource>> {
    #[derive(Deserialize)]
    struct TomlRegistry {
        sources: Vec<RawSource>,
    }
    let v: TomlRegistry = toml::from_str(s)?;
    Ok(v.sources)
}

fn parse_json(s: &str) -> Result<Vec<RawSource>> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum JsonRegistry {
        List(Vec<RawSource>),
        Wrapped { sources: Vec<RawSource> },
        Keyed(BTreeMap<String, RawSource>),
    }
    let v: JsonRegistry = serde_json::from_str(s)?;
    Ok(match v {
        JsonRegistry::List(v) | JsonRegistry::Wrapped { sources: v } => v,
        JsonRegistry::Keyed(map) => map
            .into_iter()
            .map(|(k, mut src)| {
                src.id.get_or_insert(k);
                src
            })
            .collect(),
    })
}

#[derive(Debug, Deserialize)]
struct RawWindow {
    start: Option<String>,
    end: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawSource {
    id: Option<String>,
    #[serde(alias = "name")]
    display_name: Option<String>,
    url: String,
    #[serde(alias = "selector")]
    locator: Locator,
    #[serde(default, alias = "type")]
    kind: ExtractKind,
    #[serde(alias = "interval")]
    cadence_secs: Option<u64>,
    window: Option<RawWindow>,
    start: Option<String>,
    end: Option<String>,
    #[serde(alias = "tab")]
    group: Option<String>,
}

impl RawSource {
    fn validate(self) -> Result<SourceConfig> {
        let id = self
            .id
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| anyhow!("source without id"))?;
        if self.url.trim().is_empty() {
            bail!("source `{id}` has an empty url");
        }
        if self.locator.is_empty() {
            bail!("source `{id}` has no locator");
        }
        let cadence_secs = self.cadence_secs.unwrap_or(DEFAULT_CADENCE_SECS);
        if cadence_secs == 0 {
            bail!("source `{id}` has a zero cadence");
        }

        let (start, end) = match self.window {
            Some(w) => (w.start, w.end),
            None => (self.start, self.end),
        };
        let window = match (start, end) {
            (None, None) => None,
            (start, end) => {
                let w = ActiveWindow {
                    start: start.as_deref().map(parse_hm).transpose()?,
                    end: end.as_deref().map(parse_hm).transpose()?,
                };
                if let (Some(s), Some(e)) = (w.start, w.end) {
                    if s >= e {
                        bail!("source `{id}` window start {s} is not before end {e}");
                    }
                }
                Some(w)
            }
        };

        Ok(SourceConfig {
            display_name: self
                .display_name
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| id.clone()),
            url: self.url.trim().to_string(),
            locator: self.locator,
            kind: self.kind,
            cadence_secs,
            window,
            group: self
                .group
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_GROUP.to_string()),
            id,
        })
    }
}

/// Parse "HH:MM" into a time of day.
pub fn parse_hm(s: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(s.trim(), "%H:%M")
        .with_context(|| format!("invalid time of day `{s}` (expected HH:MM)"))
}
