//! Durable trace storage: a narrow trait plus one JSONL-backed
//! implementation, a flat append-only file rather than day-bucketed.

use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::ids::RunId;
use crate::log::TraceEvent;

#[derive(Debug, thiserror::Error)]
pub enum TraceError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// External, append-only collaborator a [`crate::log::TraceRegistry`] can
/// forward events to so they survive past the in-memory TTL sweep.
#[async_trait]
pub trait DurableStore: Send + Sync {
    async fn insert(&self, event: TraceEvent) -> Result<(), TraceError>;
    async fn events_for(&self, run_id: &RunId) -> Result<Vec<TraceEvent>, TraceError>;
    async fn run_ids(&self) -> Result<Vec<RunId>, TraceError>;
    async fn delete_before(&self, cutoff: DateTime<Utc>) -> Result<(), TraceError>;
}

/// Single append-only JSONL file; `delete_before` rewrites the file keeping
/// only events newer than the cutoff (this store has no per-event wall
/// clock of its own, so it trusts the event's own `timestamp_us` compared
/// against a process-start reference recorded at open time).
pub struct JsonlDurableStore {
    path: PathBuf,
    opened_at: DateTime<Utc>,
    writer: Mutex<BufWriter<fs::File>>,
}

impl JsonlDurableStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, TraceError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            opened_at: Utc::now(),
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    fn read_all(&self) -> Result<Vec<TraceEvent>, TraceError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&self.path)?;
        content
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| serde_json::from_str(l).map_err(TraceError::from))
            .collect()
    }
}

#[async_trait]
impl DurableStore for JsonlDurableStore {
    async fn insert(&self, event: TraceEvent) -> Result<(), TraceError> {
        let line = serde_json::to_string(&event)?;
        let mut writer = self.writer.lock().unwrap();
        writeln!(writer, "{line}")?;
        writer.flush()?;
        Ok(())
    }

    async fn events_for(&self, run_id: &RunId) -> Result<Vec<TraceEvent>, TraceError> {
        Ok(self
            .read_all()?
            .into_iter()
            .filter(|e| &e.run_id == run_id)
            .collect())
    }

    async fn run_ids(&self) -> Result<Vec<RunId>, TraceError> {
        let mut seen = HashSet::new();
        let mut ids = Vec::new();
        for event in self.read_all()? {
            if seen.insert(event.run_id.clone()) {
                ids.push(event.run_id);
            }
        }
        Ok(ids)
    }

    async fn delete_before(&self, cutoff: DateTime<Utc>) -> Result<(), TraceError> {
        let age_budget_us = (cutoff - self.opened_at).num_microseconds().unwrap_or(i64::MIN);
        let kept: Vec<TraceEvent> = self
            .read_all()?
            .into_iter()
            .filter(|e| e.timestamp_us >= age_budget_us)
            .collect();

        let mut writer = self.writer.lock().unwrap();
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)?;
        let mut fresh = BufWriter::new(file);
        for event in &kept {
            let line = serde_json::to_string(event)?;
            writeln!(fresh, "{line}")?;
        }
        fresh.flush()?;
        *writer = fresh;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::SpanId;
    use crate::log::TraceEventKind;
    use tempfile::tempdir;

    fn sample(run_id: &RunId, timestamp_us: i64) -> TraceEvent {
        TraceEvent {
            kind: TraceEventKind::NodeStart,
            timestamp_us,
            run_id: run_id.clone(),
            span_id: SpanId::new(),
            parent_span_id: None,
            depth: 0,
            payload: serde_json::json!({}),
        }
    }

    #[tokio::test]
    async fn insert_and_read_round_trip() {
        let dir = tempdir().unwrap();
        let store = JsonlDurableStore::open(dir.path().join("traces.jsonl")).unwrap();
        let run_id = RunId::new();
        store.insert(sample(&run_id, 0)).await.unwrap();
        store.insert(sample(&run_id, 1)).await.unwrap();

        let events = store.events_for(&run_id).await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(store.run_ids().await.unwrap(), vec![run_id]);
    }

    #[tokio::test]
    async fn delete_before_prunes_old_events() {
        let dir = tempdir().unwrap();
        let store = JsonlDurableStore::open(dir.path().join("traces.jsonl")).unwrap();
        let run_id = RunId::new();
        store.insert(sample(&run_id, 0)).await.unwrap();

        // cutoff in the far future prunes everything
        store
            .delete_before(Utc::now() + chrono::Duration::days(1))
            .await
            .unwrap();
        assert!(store.events_for(&run_id).await.unwrap().is_empty());
    }
}
