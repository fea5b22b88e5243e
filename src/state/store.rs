// src/state/store.rs
//! Day-keyed snapshot files: `<dir>/<prefix>_<YYYY-MM-DD>.json`.
//!
//! Writes go to a sibling `.tmp` file which is fsynced and then renamed over
//! the day's file, so a crash leaves either the old or the new snapshot on
//! disk, never a torn one. Loading never fails: a missing or unreadable file
//! yields an empty snapshot and a log line.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use super::{Snapshot, SourceState};
use crate::config::MonitorConfig;

#[derive(Debug, Clone)]
pub struct StateStore {
    dir: PathBuf,
    prefix: String,
}

impl StateStore {
    pub fn new(dir: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            prefix: prefix.into(),
        }
    }

    pub fn from_config(cfg: &MonitorConfig) -> Self {
        Self::new(cfg.state_dir.clone(), cfg.state_prefix.clone())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, day: NaiveDate) -> PathBuf {
        self.dir
            .join(format!("{}_{}.json", self.prefix, day.format("%Y-%m-%d")))
    }

    fn tmp_path_for(&self, day: NaiveDate) -> PathBuf {
        let mut p = self.path_for(day).into_os_string();
        p.push(".tmp");
        PathBuf::from(p)
    }

    /// Snapshot for `day`, or an empty one if the file is absent or corrupt.
    pub fn load(&self, day: NaiveDate) -> Snapshot {
        let path = self.path_for(day);
        let content = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(target: "state", path = %path.display(), "no snapshot yet");
                return Snapshot::empty(day);
            }
            Err(e) => {
                tracing::warn!(target: "state", path = %path.display(), error = %e, "snapshot unreadable, starting empty");
                return Snapshot::empty(day);
            }
        };
        match serde_json::from_str::<BTreeMap<String, SourceState>>(&content) {
            Ok(sources) => Snapshot { day, sources },
            Err(e) => {
                tracing::warn!(target: "state", path = %path.display(), error = %e, "snapshot corrupt, starting empty");
                Snapshot::empty(day)
            }
        }
    }

    /// Atomically replace the file for `snapshot.day`.
    pub fn save(&self, snapshot: &Snapshot) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("creating state dir {}", self.dir.display()))?;
        let path = self.path_for(snapshot.day);
        let tmp = self.tmp_path_for(snapshot.day);

        let body = serde_json::to_vec_pretty(&snapshot.sources).context("serializing snapshot")?;
        {
            let mut f = fs::File::create(&tmp)
                .with_context(|| format!("creating {}", tmp.display()))?;
            f.write_all(&body)
                .with_context(|| format!("writing {}", tmp.display()))?;
            f.sync_all()
                .with_context(|| format!("syncing {}", tmp.display()))?;
        }
        fs::rename(&tmp, &path)
            .with_context(|| format!("replacing {} with {}", path.display(), tmp.display()))?;
        Ok(())
    }

    /// Fresh-default snapshot for `new_day`, persisted right away. The old
    /// day's file is not touched.
    pub fn rotate<I, S>(&self, old_day: NaiveDate, new_day: NaiveDate, ids: I) -> Snapshot
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        tracing::info!(target: "state", from = %old_day, to = %new_day, "rotating snapshot");
        let snap = Snapshot::with_defaults(new_day, ids);
        if let Err(e) = self.save(&snap) {
            tracing::warn!(target: "state", error = %format!("{e:#}"), "saving rotated snapshot failed");
        }
        snap
    }
}
