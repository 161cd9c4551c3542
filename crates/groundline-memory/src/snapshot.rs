//! Warm-start persistence of collections.
//!
//! Each collection is written to `<dir>/<name>.collection.json` as parallel
//! `ids` / `texts` / `vectors` / `metadata` arrays. Loading is best effort:
//! anything missing or malformed is skipped with a warning and the store
//! simply starts (partially) empty.

use chrono::{DateTime, Utc};
use groundline_core::GroundingResult;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::store::{AccessStats, Record, VectorStore};

const SNAPSHOT_SUFFIX: &str = ".collection.json";

/// Serialized form of one collection.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct CollectionSnapshot {
    pub name: String,
    pub ids: Vec<String>,
    pub texts: Vec<String>,
    pub vectors: Vec<Vec<f32>>,
    pub metadata: Vec<HashMap<String, serde_json::Value>>,
    #[serde(default)]
    pub created_at: Vec<DateTime<Utc>>,
    #[serde(default)]
    pub access_counts: Vec<u64>,
    #[serde(default)]
    pub last_accessed: Vec<Option<DateTime<Utc>>>,
}

impl CollectionSnapshot {
    /// The four required arrays must line up.
    fn is_consistent(&self) -> bool {
        let n = self.ids.len();
        self.texts.len() == n && self.vectors.len() == n && self.metadata.len() == n
    }

    /// Rebuild record `i` with its counters. Optional arrays that are too
    /// short fall back to defaults.
    fn record_at(&self, i: usize) -> (Record, AccessStats) {
        let record = Record {
            id: self.ids[i].clone(),
            text: self.texts[i].clone(),
            vector: self.vectors[i].clone(),
            metadata: self.metadata[i].clone(),
            created_at: self.created_at.get(i).copied().unwrap_or_else(Utc::now),
        };
        let stats = AccessStats {
            access_count: self.access_counts.get(i).copied().unwrap_or(0),
            last_accessed: self.last_accessed.get(i).copied().flatten(),
        };
        (record, stats)
    }
}

fn snapshot_path(dir: &Path, name: &str) -> PathBuf {
    let file: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    dir.join(format!("{file}{SNAPSHOT_SUFFIX}"))
}

impl VectorStore {
    /// Write every collection to `dir`. Returns the number of files written.
    pub async fn save_snapshot(&self, dir: &Path) -> GroundingResult<usize> {
        tokio::fs::create_dir_all(dir).await?;

        let mut written = 0;
        for name in self.collection_names() {
            let Some(collection) = self.get_collection(&name) else {
                continue;
            };
            let mut snapshot = CollectionSnapshot {
                name: name.clone(),
                ..Default::default()
            };
            for (record, stats) in collection.records_with_stats().await {
                snapshot.ids.push(record.id.clone());
                snapshot.texts.push(record.text.clone());
                snapshot.vectors.push(record.vector.clone());
                snapshot.metadata.push(record.metadata.clone());
                snapshot.created_at.push(record.created_at);
                snapshot.access_counts.push(stats.access_count);
                snapshot.last_accessed.push(stats.last_accessed);
            }

            let data = serde_json::to_vec(&snapshot)?;
            tokio::fs::write(snapshot_path(dir, &name), data).await?;
            debug!(collection = %name, records = snapshot.ids.len(), "Collection snapshot written");
            written += 1;
        }
        Ok(written)
    }

    /// Load every snapshot file found in `dir`. Never fails; returns the
    /// number of records restored.
    pub async fn load_snapshot(&self, dir: &Path) -> usize {
        let mut read_dir = match tokio::fs::read_dir(dir).await {
            Ok(rd) => rd,
            Err(e) => {
                debug!(dir = %dir.display(), error = %e, "No snapshot directory, starting empty");
                return 0;
            }
        };

        let mut restored = 0;
        loop {
            let entry = match read_dir.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "Failed to list snapshot directory");
                    break;
                }
            };
            let path = entry.path();
            let is_snapshot = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(SNAPSHOT_SUFFIX));
            if !is_snapshot {
                continue;
            }
            restored += self.load_snapshot_file(&path).await;
        }

        if restored > 0 {
            info!(records = restored, dir = %dir.display(), "Vector store warm-started");
        }
        restored
    }

    async fn load_snapshot_file(&self, path: &Path) -> usize {
        let data = match tokio::fs::read(path).await {
            Ok(data) => data,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Skipping unreadable snapshot");
                return 0;
            }
        };
        let snapshot: CollectionSnapshot = match serde_json::from_slice(&data) {
            Ok(s) => s,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Skipping malformed snapshot");
                return 0;
            }
        };
        if !snapshot.is_consistent() {
            warn!(path = %path.display(), "Skipping snapshot with mismatched arrays");
            return 0;
        }

        let collection = self.collection(&snapshot.name);
        let mut restored = 0;
        for i in 0..snapshot.ids.len() {
            let (record, stats) = snapshot.record_at(i);
            match collection.insert_with_stats(record, stats).await {
                Ok(()) => restored += 1,
                Err(e) => warn!(collection = %snapshot.name, error = %e, "Skipping snapshot record"),
            }
        }
        restored
    }
}
