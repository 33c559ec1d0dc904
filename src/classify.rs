//! Threshold-based multi-label topic classification.
//!
//! Every paper is scored against the caller's topic list by the scoring
//! capability. The highest score names the primary topic; every other
//! topic strictly above the secondary threshold becomes a secondary
//! label. Scoring runs per paper inside a bounded worker pool.

use crate::capabilities::CapabilityRegistry;
use crate::config::PipelineConfig;
use crate::error::{ErrorEntry, ErrorKind, StageError};
use crate::types::{ClassificationResult, Paper};
use futures::StreamExt;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};

#[derive(Debug, Default)]
pub struct ClassifyOutcome {
    /// paper id -> classification, for every paper that was scored.
    pub results: BTreeMap<String, ClassificationResult>,
    pub errors: Vec<ErrorEntry>,
}

pub struct TopicClassifier {
    registry: CapabilityRegistry,
    config: Arc<PipelineConfig>,
}

impl TopicClassifier {
    pub fn new(registry: CapabilityRegistry, config: Arc<PipelineConfig>) -> Self {
        Self { registry, config }
    }

    /// Classify every paper against `topics`. Individual scoring failures
    /// are recorded and skipped; the stage fails only when no paper could
    /// be classified at all.
    pub async fn classify(
        &self,
        papers: &[Paper],
        topics: &[String],
    ) -> Result<ClassifyOutcome, StageError> {
        if topics.is_empty() {
            return Err(StageError::Failed("no topics configured".into()));
        }

        let deadline = Duration::from_secs(self.config.capability_timeout_secs);
        // Futures are built eagerly so the pool iterates owned values.
        let jobs: Vec<_> = papers
            .iter()
            .map(|paper| {
                let scorer = Arc::clone(&self.registry.scorer);
                async move {
                    let body = paper.body_text();
                    if body.trim().is_empty() {
                        debug!(paper = %paper.id, "no text to score, using fallback");
                        return (paper.id.clone(), Ok(empty_text_fallback(paper, topics)));
                    }
                    let scores = match timeout(deadline, scorer.score(body, topics)).await {
                        Ok(Ok(scores)) => scores,
                        Ok(Err(err)) => {
                            return (
                                paper.id.clone(),
                                Err(ErrorEntry::new(
                                    "classify",
                                    Some(paper.id.clone()),
                                    ErrorKind::Scoring,
                                    err.to_string(),
                                )),
                            );
                        }
                        Err(_) => {
                            return (
                                paper.id.clone(),
                                Err(ErrorEntry::new(
                                    "classify",
                                    Some(paper.id.clone()),
                                    ErrorKind::Scoring,
                                    format!(
                                        "scoring timed out after {}s",
                                        self.config.capability_timeout_secs
                                    ),
                                )),
                            );
                        }
                    };
                    (paper.id.clone(), Ok(self.build_result(paper, topics, scores)))
                }
            })
            .collect();
        let scored: Vec<(String, Result<ClassificationResult, ErrorEntry>)> =
            futures::stream::iter(jobs)
                .buffered(self.config.max_concurrency.max(1))
                .collect()
                .await;

        let mut outcome = ClassifyOutcome::default();
        for (paper_id, result) in scored {
            match result {
                Ok(classification) => {
                    outcome.results.insert(paper_id, classification);
                }
                Err(entry) => {
                    warn!(paper = %paper_id, error = %entry.message, "scoring failed");
                    outcome.errors.push(entry);
                }
            }
        }

        if outcome.results.is_empty() && !papers.is_empty() {
            return Err(StageError::Failed(
                "scoring capability produced no classifications".into(),
            ));
        }
        Ok(outcome)
    }

    /// Derive primary and secondary labels from raw scores. Scores are
    /// clamped into [0.0, 1.0]; the argmax scan uses strict comparison so
    /// ties keep the earliest topic in caller order.
    fn build_result(
        &self,
        paper: &Paper,
        topics: &[String],
        raw: HashMap<String, f64>,
    ) -> ClassificationResult {
        let mut scores = BTreeMap::new();
        for topic in topics {
            let score = raw.get(topic).copied().unwrap_or(0.0).clamp(0.0, 1.0);
            scores.insert(topic.clone(), score);
        }

        let mut primary = topics[0].clone();
        let mut best = scores[&primary];
        for topic in &topics[1..] {
            let score = scores[topic];
            if score > best {
                best = score;
                primary = topic.clone();
            }
        }

        let secondary = topics
            .iter()
            .filter(|t| **t != primary && scores[*t] > self.config.secondary_threshold)
            .cloned()
            .collect();

        ClassificationResult {
            paper_id: paper.id.clone(),
            scores,
            primary_topic: primary,
            secondary_topics: secondary,
            // Only the empty-text fallback sets this flag.
            low_confidence: false,
        }
    }
}

/// A paper with no scoreable text still gets a deterministic placement:
/// all-zero scores, the first topic as primary, flagged low confidence.
fn empty_text_fallback(paper: &Paper, topics: &[String]) -> ClassificationResult {
    ClassificationResult {
        paper_id: paper.id.clone(),
        scores: topics.iter().map(|t| (t.clone(), 0.0)).collect(),
        primary_topic: topics[0].clone(),
        secondary_topics: Vec::new(),
        low_confidence: true,
    }
}

/// Group paper ids by primary topic, keeping `topics` order for groups and
/// classification iteration order within each group.
pub fn group_by_primary(
    results: &BTreeMap<String, ClassificationResult>,
    topics: &[String],
) -> Vec<(String, Vec<String>)> {
    topics
        .iter()
        .map(|topic| {
            let members = results
                .values()
                .filter(|r| r.primary_topic == *topic)
                .map(|r| r.paper_id.clone())
                .collect();
            (topic.clone(), members)
        })
        .collect()
}

/// Like [`group_by_primary`] but a paper also joins every topic it carries
/// as a secondary label. Papers are never duplicated within one group.
pub fn group_by_any_label(
    results: &BTreeMap<String, ClassificationResult>,
    topics: &[String],
) -> Vec<(String, Vec<String>)> {
    topics
        .iter()
        .map(|topic| {
            let members = results
                .values()
                .filter(|r| {
                    r.primary_topic == *topic || r.secondary_topics.iter().any(|t| t == topic)
                })
                .map(|r| r.paper_id.clone())
                .collect();
            (topic.clone(), members)
        })
        .collect()
}
