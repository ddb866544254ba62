//! Run-record bookkeeping: a small JSON file per one-shot `run` invocation,
//! written under `.rlm/runs/<run_id>.json` so a terminal session has a
//! durable record of what it asked and what came back.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use rlm_core::RunOutcome;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: String,
    pub span_id: String,
    pub query: String,
    pub answer: serde_json::Value,
    pub started_at: DateTime<Utc>,
}

impl RunRecord {
    pub fn from_outcome(query: &str, outcome: &RunOutcome, started_at: DateTime<Utc>) -> Self {
        Self {
            run_id: outcome.run_id.clone(),
            span_id: outcome.span_id.clone(),
            query: query.to_string(),
            answer: outcome.answer.clone(),
            started_at,
        }
    }

    /// Write this record to `<rlm_dir>/runs/<run_id>.json`, creating the
    /// `runs` subdirectory if needed.
    pub fn write(&self, rlm_dir: &Path) -> Result<PathBuf> {
        let runs_dir = rlm_dir.join("runs");
        std::fs::create_dir_all(&runs_dir)
            .with_context(|| format!("failed to create run records directory: {}", runs_dir.display()))?;
        let path = runs_dir.join(format!("{}.json", self.run_id));
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, content).with_context(|| format!("failed to write run record: {}", path.display()))?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_outcome() -> RunOutcome {
        RunOutcome {
            answer: serde_json::json!(42),
            run_id: "run_test123".to_string(),
            span_id: "span_test123".to_string(),
        }
    }

    #[test]
    fn writes_a_record_file_named_after_the_run_id() {
        let dir = tempfile::tempdir().unwrap();
        let record = RunRecord::from_outcome("what is six times seven", &sample_outcome(), Utc::now());
        let path = record.write(dir.path()).unwrap();
        assert!(path.exists());
        assert_eq!(path.file_name().unwrap(), "run_test123.json");

        let content = std::fs::read_to_string(&path).unwrap();
        let parsed: RunRecord = serde_json::from_str(&content).unwrap();
        assert_eq!(parsed.answer, serde_json::json!(42));
    }
}
