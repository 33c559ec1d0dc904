//! Per-paper summary generation.
//!
//! Each paper's body text is windowed to a fixed character budget before
//! being handed to the summarization capability, and the capability's
//! output is capped on the way back. Papers run through a bounded worker
//! pool; a failure on one paper never blocks the rest.

use crate::capabilities::CapabilityRegistry;
use crate::citation::format_citation;
use crate::config::PipelineConfig;
use crate::error::{ErrorEntry, ErrorKind, StageError};
use crate::text::truncate_chars;
use crate::types::{Paper, SummaryRecord};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};

#[derive(Debug, Default)]
pub struct SummarizeOutcome {
    pub summaries: Vec<SummaryRecord>,
    pub errors: Vec<ErrorEntry>,
}

pub struct SummaryCoordinator {
    registry: CapabilityRegistry,
    config: Arc<PipelineConfig>,
}

impl SummaryCoordinator {
    pub fn new(registry: CapabilityRegistry, config: Arc<PipelineConfig>) -> Self {
        Self { registry, config }
    }

    /// Summarize every paper with text. Papers without text are skipped
    /// with a recorded error. The stage fails only when summarizable input
    /// existed and not a single summary came back.
    pub async fn summarize_all(&self, papers: &[Paper]) -> Result<SummarizeOutcome, StageError> {
        let deadline = Duration::from_secs(self.config.capability_timeout_secs);

        // Futures are built eagerly so the pool iterates owned values.
        let jobs: Vec<_> = papers
            .iter()
            .map(|paper| {
                let summarizer = Arc::clone(&self.registry.summarizer);
                async move {
                    let body = paper.body_text();
                    if body.trim().is_empty() {
                        debug!(paper = %paper.id, "no text to summarize");
                        return Err(ErrorEntry::new(
                            "summarize",
                            Some(paper.id.clone()),
                            ErrorKind::Generation,
                            "paper has no text to summarize",
                        ));
                    }
                    let window = truncate_chars(body, self.config.summary_input_max_chars);
                    let generated = timeout(
                        deadline,
                        summarizer.summarize(
                            window,
                            self.config.summary_min_chars,
                            self.config.summary_max_chars,
                        ),
                    )
                    .await;
                    let text = match generated {
                        Ok(Ok(text)) => text,
                        Ok(Err(err)) => {
                            return Err(ErrorEntry::new(
                                "summarize",
                                Some(paper.id.clone()),
                                ErrorKind::Generation,
                                err.to_string(),
                            ));
                        }
                        Err(_) => {
                            return Err(ErrorEntry::new(
                                "summarize",
                                Some(paper.id.clone()),
                                ErrorKind::Generation,
                                format!(
                                    "summarization timed out after {}s",
                                    self.config.capability_timeout_secs
                                ),
                            ));
                        }
                    };
                    let text = truncate_chars(&text, self.config.summary_max_chars).to_string();
                    if text.trim().is_empty() {
                        return Err(ErrorEntry::new(
                            "summarize",
                            Some(paper.id.clone()),
                            ErrorKind::Generation,
                            "summarizer returned empty text",
                        ));
                    }
                    Ok(SummaryRecord {
                        paper_id: paper.id.clone(),
                        text,
                        citation: format_citation(paper),
                        sections_covered: paper.sections.keys().cloned().collect(),
                    })
                }
            })
            .collect();
        let produced: Vec<Result<SummaryRecord, ErrorEntry>> =
            futures::stream::iter(jobs)
                .buffered(self.config.max_concurrency.max(1))
                .collect()
                .await;

        let had_text = papers.iter().any(|p| !p.body_text().trim().is_empty());
        let mut outcome = SummarizeOutcome::default();
        for result in produced {
            match result {
                Ok(record) => outcome.summaries.push(record),
                Err(entry) => {
                    warn!(paper = ?entry.item_id, error = %entry.message, "summary skipped");
                    outcome.errors.push(entry);
                }
            }
        }

        if outcome.summaries.is_empty() && had_text {
            return Err(StageError::Failed(
                "summarization produced no output for any paper".into(),
            ));
        }
        Ok(outcome)
    }
}
