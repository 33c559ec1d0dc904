//! Session lifecycle and per-run bookkeeping.
//!
//! A session is one end-to-end run's isolated namespace: a short random
//! identifier, the caller's inputs, per-stage statuses, and the error ledger.
//! Sessions own disjoint result directories and share no mutable state, so
//! independent runs may execute fully in parallel.

use crate::error::{ErrorEntry, PapercastError, Result};
use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Execution status of one pipeline stage within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    Running,
    Done,
    Failed,
    Skipped,
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageStatus::Pending => write!(f, "pending"),
            StageStatus::Running => write!(f, "running"),
            StageStatus::Done => write!(f, "done"),
            StageStatus::Failed => write!(f, "failed"),
            StageStatus::Skipped => write!(f, "skipped"),
        }
    }
}

/// Caller-provided inputs for one run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionInputs {
    pub query: String,
    pub topics: Vec<String>,
    pub pdf_paths: Vec<PathBuf>,
    pub urls: Vec<String>,
    pub dois: Vec<String>,
    pub max_results: usize,
}

/// One pipeline run's state. All downstream entities are scoped under it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Short random token, claimed by creating its result directory.
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub inputs: SessionInputs,
    pub stage_statuses: BTreeMap<String, StageStatus>,
    /// This session's own result directory (`<result_root>/<id>`).
    pub result_root: PathBuf,
    pub errors: Vec<ErrorEntry>,
}

impl Session {
    /// Create a session with a fresh token. The session directory is
    /// created here, claiming the token atomically: a colliding token
    /// fails the `create_dir` and a new one is drawn, so concurrent
    /// creations can never share a directory.
    pub fn create(inputs: SessionInputs, result_root: &Path) -> Result<Self> {
        std::fs::create_dir_all(result_root).map_err(|e| {
            PapercastError::SessionFatal(format!(
                "cannot create result root {}: {e}",
                result_root.display()
            ))
        })?;
        let id = loop {
            let token = random_token();
            match std::fs::create_dir(result_root.join(&token)) {
                Ok(()) => break token,
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(e) => {
                    return Err(PapercastError::SessionFatal(format!(
                        "cannot create session directory under {}: {e}",
                        result_root.display()
                    )));
                }
            }
        };
        let result_root = result_root.join(&id);
        Ok(Self {
            id,
            created_at: Utc::now(),
            inputs,
            stage_statuses: BTreeMap::new(),
            result_root,
            errors: Vec::new(),
        })
    }

    /// This session's result directory.
    pub fn dir(&self) -> &Path {
        &self.result_root
    }

    pub fn set_status(&mut self, stage: &str, status: StageStatus) {
        self.stage_statuses.insert(stage.to_string(), status);
    }

    pub fn status(&self, stage: &str) -> Option<StageStatus> {
        self.stage_statuses.get(stage).copied()
    }

    /// Record a per-item failure without halting the stage.
    pub fn record_error(&mut self, entry: ErrorEntry) {
        warn!(
            stage = %entry.stage,
            item = entry.item_id.as_deref().unwrap_or("-"),
            kind = %entry.kind,
            "{}",
            entry.message
        );
        self.errors.push(entry);
    }
}

/// Short random session token: 8 lowercase hex characters.
fn random_token() -> String {
    format!("{:08x}", rand::thread_rng().next_u32())
}
