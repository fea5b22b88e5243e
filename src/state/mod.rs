//! # Source state
//! Per-source record and the per-day snapshot that holds them.
//!
//! The snapshot file is the plain `{ source_id: record }` map, pretty-printed
//! JSON with local `YYYY-MM-DD HH:MM:SS` timestamps so it stays readable by
//! hand. The day lives in the file name, not in the body.

pub mod shared;
pub mod store;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub use shared::SharedState;
pub use store::StateStore;

pub const TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// Never classified yet. Persisted, never published.
    #[default]
    #[serde(alias = "not-started")]
    NotStarted,
    Ok,
    Stale,
    #[serde(alias = "invalid format")]
    Invalid,
    Error,
    Completed,
    #[serde(alias = "skip")]
    Skipped,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Status::NotStarted => "not_started",
            Status::Ok => "ok",
            Status::Stale => "stale",
            Status::Invalid => "invalid",
            Status::Error => "error",
            Status::Completed => "completed",
            Status::Skipped => "skipped",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Representative value of one sample: a single string, or an ordered list
/// for multi-element sources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SampleValue {
    Text(String),
    List(Vec<String>),
}

impl SampleValue {
    /// Text available to the timestamp normalizer. Lists have none.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            SampleValue::Text(s) => Some(s),
            SampleValue::List(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceState {
    pub last_value: Option<SampleValue>,
    pub stale_count: u32,
    #[serde(with = "local_ts::option")]
    pub last_changed: Option<NaiveDateTime>,
    pub status: Status,
    pub completed: bool,
    #[serde(with = "local_ts::list")]
    pub stale_events: Vec<NaiveDateTime>,
    /// Per-process only: COMPLETED already published in this run.
    #[serde(skip)]
    pub emitted_completed: bool,
}

/// All source records for exactly one calendar day.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub day: NaiveDate,
    pub sources: BTreeMap<String, SourceState>,
}

impl Snapshot {
    pub fn empty(day: NaiveDate) -> Self {
        Self {
            day,
            sources: BTreeMap::new(),
        }
    }

    /// Fresh-default records for every id.
    pub fn with_defaults<I, S>(day: NaiveDate, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut snap = Self::empty(day);
        snap.ensure_sources(ids);
        snap
    }

    /// Add default records for missing ids; existing records are untouched.
    pub fn ensure_sources<I, S>(&mut self, ids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for id in ids {
            self.sources.entry(id.into()).or_default();
        }
    }

    pub fn get(&self, id: &str) -> Option<&SourceState> {
        self.sources.get(id)
    }

    /// Record for `id`, created with defaults on first reference.
    pub fn entry(&mut self, id: &str) -> &mut SourceState {
        self.sources.entry(id.to_string()).or_default()
    }
}

/// Serde helpers for local second-precision timestamps. Empty strings (as
/// written by older state files) read back as "absent".
pub(crate) mod local_ts {
    use super::TS_FORMAT;
    use chrono::NaiveDateTime;

    fn parse<E: serde::de::Error>(s: &str) -> Result<Option<NaiveDateTime>, E> {
        let s = s.trim();
        if s.is_empty() {
            return Ok(None);
        }
        NaiveDateTime::parse_from_str(s, TS_FORMAT)
            .map(Some)
            .map_err(|e| E::custom(format!("bad timestamp `{s}`: {e}")))
    }

    pub mod option {
        use super::{parse, TS_FORMAT};
        use chrono::NaiveDateTime;
        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(v: &Option<NaiveDateTime>, s: S) -> Result<S::Ok, S::Error> {
            match v {
                Some(t) => s.collect_str(&t.format(TS_FORMAT)),
                None => s.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<NaiveDateTime>, D::Error> {
            match Option::<String>::deserialize(d)? {
                Some(s) => parse(&s),
                None => Ok(None),
            }
        }
    }

    pub mod list {
        use super::{parse, TS_FORMAT};
        use chrono::NaiveDateTime;
        use serde::ser::SerializeSeq;
        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(v: &[NaiveDateTime], s: S) -> Result<S::Ok, S::Error> {
            let mut seq = s.serialize_seq(Some(v.len()))?;
            for t in v {
                seq.serialize_element(&t.format(TS_FORMAT).to_string())?;
            }
            seq.end()
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<NaiveDateTime>, D::Error> {
            let raw = Vec::<String>::deserialize(d)?;
            let mut out = Vec::with_capacity(raw.len());
            for s in raw {
                match parse::<D::Error>(&s)? {
                    Some(t) => out.push(t),
                    None => {
                        return Err(<D::Error as serde::de::Error>::custom(
                            "empty timestamp in list",
                        ))
                    }
                }
            }
            Ok(out)
        }
    }
}
