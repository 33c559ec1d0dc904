//! Session-scoped result persistence.
//!
//! Each session owns one directory under the configured result root:
//!
//! ```text
//! results/<session_id>/
//!   results.json
//!   summaries/<paper_id>.md
//!   syntheses/<topic_slug>.md
//!   audio_files/<token>.mp3
//! ```
//!
//! JSON and markdown writes go through a temp-file-plus-rename so a crash
//! never leaves a half-written artifact behind.

use crate::error::{PapercastError, Result};
use crate::session::Session;
use crate::types::{
    topic_slug, AudioArtifact, ClassificationResult, Paper, SummaryRecord, SynthesisRecord,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const RESULTS_FILE: &str = "results.json";
const SUMMARIES_DIR: &str = "summaries";
const SYNTHESES_DIR: &str = "syntheses";
const AUDIO_DIR: &str = "audio_files";

/// Everything a finished session produced, as serialized to `results.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionResults {
    pub session: Session,
    pub papers: Vec<Paper>,
    pub classifications: BTreeMap<String, ClassificationResult>,
    pub summaries: Vec<SummaryRecord>,
    pub syntheses: Vec<SynthesisRecord>,
    pub audio_artifacts: Vec<AudioArtifact>,
}

/// Handle on one session's result directory.
#[derive(Debug)]
pub struct SessionStore {
    dir: PathBuf,
}

impl SessionStore {
    /// Create the session directory tree. Failure here is fatal for the
    /// session since nothing downstream can be persisted.
    pub async fn init(session_dir: &Path) -> Result<Self> {
        for sub in [SUMMARIES_DIR, SYNTHESES_DIR, AUDIO_DIR] {
            tokio::fs::create_dir_all(session_dir.join(sub))
                .await
                .map_err(|e| {
                    PapercastError::SessionFatal(format!(
                        "cannot create result directory {}: {e}",
                        session_dir.join(sub).display()
                    ))
                })?;
        }
        debug!(dir = %session_dir.display(), "session store initialized");
        Ok(Self {
            dir: session_dir.to_path_buf(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Directory the audio coordinator renders into.
    pub fn audio_dir(&self) -> PathBuf {
        self.dir.join(AUDIO_DIR)
    }

    /// Write one summary as markdown: the text, a rule, the citation.
    pub async fn write_summary(&self, summary: &SummaryRecord) -> Result<PathBuf> {
        let path = self
            .dir
            .join(SUMMARIES_DIR)
            .join(format!("{}.md", summary.paper_id));
        let content = format!("{}\n\n---\n\n{}\n", summary.text, summary.citation);
        atomic_write(&path, content.as_bytes()).await?;
        Ok(path)
    }

    /// Write one synthesis as markdown with its four named sections.
    pub async fn write_synthesis(&self, synthesis: &SynthesisRecord) -> Result<PathBuf> {
        let path = self
            .dir
            .join(SYNTHESES_DIR)
            .join(format!("{}.md", topic_slug(&synthesis.topic)));
        let mut content = format!("# {}\n", synthesis.topic);
        for (heading, body) in [
            ("Overview", &synthesis.overview),
            ("Themes", &synthesis.themes),
            ("Contradictions", &synthesis.contradictions),
            ("Gaps", &synthesis.gaps),
        ] {
            if !body.is_empty() {
                content.push_str(&format!("\n## {heading}\n\n{body}\n"));
            }
        }
        if !synthesis.cited_paper_ids.is_empty() {
            content.push_str(&format!(
                "\n## Papers\n\n{}\n",
                synthesis
                    .cited_paper_ids
                    .iter()
                    .map(|id| format!("- {id}"))
                    .collect::<Vec<_>>()
                    .join("\n")
            ));
        }
        atomic_write(&path, content.as_bytes()).await?;
        Ok(path)
    }

    /// Persist the consolidated `results.json`.
    pub async fn finalize(&self, results: &SessionResults) -> Result<PathBuf> {
        let path = self.dir.join(RESULTS_FILE);
        let json = serde_json::to_vec_pretty(results)?;
        atomic_write(&path, &json).await?;
        info!(
            session = %results.session.id,
            path = %path.display(),
            "session results persisted"
        );
        Ok(path)
    }

    /// Re-open a completed session's results from disk.
    pub async fn open(result_root: &Path, session_id: &str) -> Result<SessionResults> {
        let path = result_root.join(session_id).join(RESULTS_FILE);
        let bytes = tokio::fs::read(&path).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// Write to `<path>.tmp` then rename into place.
async fn atomic_write(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}
