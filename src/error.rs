//! Error types for the papercast pipeline core.
//!
//! Uses `thiserror` for the public error surface. Per-item failures (one
//! paper, one topic, one ingestion channel) are not errors in the `Result`
//! sense — they are recorded as [`ErrorEntry`] values on the session so a
//! stage can complete with a partial result set.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Top-level error type for the papercast library.
#[derive(Debug, thiserror::Error)]
pub enum PapercastError {
    /// The session cannot proceed at all (e.g. result storage unusable).
    #[error("session fatal: {0}")]
    SessionFatal(String),

    #[error("stage '{stage}' depends on unknown stage '{dependency}'")]
    UnknownDependency { stage: String, dependency: String },

    #[error("dependency cycle among stages: {stages:?}")]
    DependencyCycle { stages: Vec<String> },

    #[error("duplicate stage id: {0}")]
    DuplicateStage(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Convenience alias used across the crate.
pub type Result<T> = std::result::Result<T, PapercastError>;

/// Failure raised by a stage while the executor is driving it.
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    /// The stage produced no usable output. The executor marks it `failed`
    /// and skips everything that depends on it; the session itself survives.
    #[error("{0}")]
    Failed(String),

    /// The whole session must abort immediately.
    #[error("session fatal: {0}")]
    Fatal(String),
}

/// Error returned by a pluggable capability implementation.
///
/// Capabilities are external collaborators (search clients, extractors,
/// model inference, TTS); the core only needs a message to record against
/// the offending item.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct CapabilityError {
    pub message: String,
}

impl CapabilityError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// A capability call that exceeded its deadline.
    pub fn timeout(secs: u64) -> Self {
        Self::new(format!("timed out after {secs}s"))
    }
}

impl From<String> for CapabilityError {
    fn from(message: String) -> Self {
        Self { message }
    }
}

impl From<&str> for CapabilityError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

/// Category of a recorded per-item failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// An ingestion channel was unreachable or returned a malformed response.
    SourceFetch,
    /// Document text/metadata could not be parsed.
    Extraction,
    /// A DOI lookup failed.
    Resolution,
    /// The classification capability failed for a paper.
    Scoring,
    /// A summarization or synthesis call failed.
    Generation,
    /// The audio capability failed.
    Render,
    /// Result storage could not be initialized or written.
    SessionFatal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::SourceFetch => write!(f, "source_fetch"),
            ErrorKind::Extraction => write!(f, "extraction"),
            ErrorKind::Resolution => write!(f, "resolution"),
            ErrorKind::Scoring => write!(f, "scoring"),
            ErrorKind::Generation => write!(f, "generation"),
            ErrorKind::Render => write!(f, "render"),
            ErrorKind::SessionFatal => write!(f, "session_fatal"),
        }
    }
}

/// One failure recorded against a session: which stage, which item, what kind.
///
/// Surfaced in `results.json` and in the `process_query` return value so a
/// caller can distinguish "no papers found" from "some sources failed".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEntry {
    pub stage: String,
    pub item_id: Option<String>,
    pub kind: ErrorKind,
    pub message: String,
}

impl ErrorEntry {
    pub fn new(
        stage: impl Into<String>,
        item_id: Option<String>,
        kind: ErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            stage: stage.into(),
            item_id,
            kind,
            message: message.into(),
        }
    }
}
