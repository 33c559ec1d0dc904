//! Cross-paper synthesis per topic.
//!
//! Papers are grouped by their classification labels, each group's
//! summaries are stitched into a title/summary context block, and the
//! synthesis capability turns the block into a narrative. The narrative is
//! parsed back into overview, themes, contradictions, and gaps sections;
//! free-form output lands wholesale in the overview.

use crate::capabilities::CapabilityRegistry;
use crate::classify::{group_by_any_label, group_by_primary};
use crate::config::{PipelineConfig, SynthesisScope};
use crate::error::{ErrorEntry, ErrorKind, StageError};
use crate::types::{ClassificationResult, Paper, SummaryRecord, SynthesisRecord};
use futures::StreamExt;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};

#[derive(Debug, Default)]
pub struct SynthesizeOutcome {
    pub syntheses: Vec<SynthesisRecord>,
    pub errors: Vec<ErrorEntry>,
}

pub struct SynthesisCoordinator {
    registry: CapabilityRegistry,
    config: Arc<PipelineConfig>,
}

impl SynthesisCoordinator {
    pub fn new(registry: CapabilityRegistry, config: Arc<PipelineConfig>) -> Self {
        Self { registry, config }
    }

    /// Produce one synthesis per topic that has at least one paper.
    /// Topics with empty groups are skipped silently; a capability failure
    /// on one topic records an error and moves on.
    pub async fn synthesize_all(
        &self,
        papers: &[Paper],
        classifications: &BTreeMap<String, ClassificationResult>,
        summaries: &[SummaryRecord],
        topics: &[String],
    ) -> Result<SynthesizeOutcome, StageError> {
        let groups = match self.config.synthesis_scope {
            SynthesisScope::Primary => group_by_primary(classifications, topics),
            SynthesisScope::PrimaryAndSecondary => group_by_any_label(classifications, topics),
        };

        let papers_by_id: BTreeMap<&str, &Paper> =
            papers.iter().map(|p| (p.id.as_str(), p)).collect();
        let summaries_by_id: BTreeMap<&str, &SummaryRecord> =
            summaries.iter().map(|s| (s.paper_id.as_str(), s)).collect();

        let deadline = Duration::from_secs(self.config.capability_timeout_secs);

        // Futures are built eagerly so the pool iterates owned values.
        let jobs: Vec<_> = groups
            .into_iter()
            .map(|(topic, member_ids)| {
                let synthesizer = Arc::clone(&self.registry.synthesizer);
                let papers_by_id = &papers_by_id;
                let summaries_by_id = &summaries_by_id;
                async move {
                    if member_ids.is_empty() {
                        debug!(topic = %topic, "no papers for topic, skipping synthesis");
                        return Ok(None);
                    }
                    let context =
                        build_context(&member_ids, papers_by_id, summaries_by_id);
                    let narrative =
                        match timeout(deadline, synthesizer.synthesize(&topic, &context)).await {
                            Ok(Ok(text)) => text,
                            Ok(Err(err)) => {
                                return Err(ErrorEntry::new(
                                    "synthesize",
                                    Some(topic),
                                    ErrorKind::Generation,
                                    err.to_string(),
                                ));
                            }
                            Err(_) => {
                                return Err(ErrorEntry::new(
                                    "synthesize",
                                    Some(topic),
                                    ErrorKind::Generation,
                                    format!(
                                        "synthesis timed out after {}s",
                                        self.config.capability_timeout_secs
                                    ),
                                ));
                            }
                        };
                    let sections = split_sections(&narrative);
                    Ok(Some(SynthesisRecord {
                        topic,
                        overview: sections.overview,
                        themes: sections.themes,
                        contradictions: sections.contradictions,
                        gaps: sections.gaps,
                        cited_paper_ids: member_ids,
                    }))
                }
            })
            .collect();
        let produced: Vec<Result<Option<SynthesisRecord>, ErrorEntry>> =
            futures::stream::iter(jobs)
                .buffered(self.config.max_concurrency.max(1))
                .collect()
                .await;

        let mut outcome = SynthesizeOutcome::default();
        for result in produced {
            match result {
                Ok(Some(record)) => outcome.syntheses.push(record),
                Ok(None) => {}
                Err(entry) => {
                    warn!(topic = ?entry.item_id, error = %entry.message, "synthesis failed");
                    outcome.errors.push(entry);
                }
            }
        }
        Ok(outcome)
    }
}

/// One `Title: ...\nSummary: ...` block per paper, joined by blank lines.
/// The paper's abstract stands in when no summary was produced.
fn build_context(
    member_ids: &[String],
    papers_by_id: &BTreeMap<&str, &Paper>,
    summaries_by_id: &BTreeMap<&str, &SummaryRecord>,
) -> String {
    let blocks: Vec<String> = member_ids
        .iter()
        .filter_map(|id| {
            let paper = papers_by_id.get(id.as_str())?;
            let text = summaries_by_id
                .get(id.as_str())
                .map(|s| s.text.as_str())
                .unwrap_or(paper.abstract_or_summary.as_str());
            Some(format!("Title: {}\nSummary: {}", paper.title, text))
        })
        .collect();
    blocks.join("\n\n")
}

#[derive(Debug, Default)]
struct Sections {
    overview: String,
    themes: String,
    contradictions: String,
    gaps: String,
}

/// Parse a narrative into named sections by heading lines. A heading is a
/// line whose text, after stripping markdown markers and a trailing colon,
/// case-insensitively equals one of the section names. Text before any
/// heading, and the whole narrative when no heading matches, is overview.
fn split_sections(narrative: &str) -> Sections {
    let mut sections = Sections::default();
    let mut current = "overview";
    let mut buffers: BTreeMap<&str, Vec<&str>> = BTreeMap::new();

    for line in narrative.lines() {
        let heading = line
            .trim()
            .trim_start_matches(['#', '*', ' '])
            .trim_end_matches(['*', ':', ' '])
            .to_lowercase();
        match heading.as_str() {
            "overview" => current = "overview",
            "themes" | "common themes" => current = "themes",
            "contradictions" => current = "contradictions",
            "gaps" | "open gaps" => current = "gaps",
            _ => buffers.entry(current).or_default().push(line),
        }
    }

    let take = |buffers: &BTreeMap<&str, Vec<&str>>, name: &str| {
        buffers
            .get(name)
            .map(|lines| lines.join("\n").trim().to_string())
            .unwrap_or_default()
    };
    sections.overview = take(&buffers, "overview");
    sections.themes = take(&buffers, "themes");
    sections.contradictions = take(&buffers, "contradictions");
    sections.gaps = take(&buffers, "gaps");
    sections
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::MockCrossPaperSynthesizer;
    use crate::types::SourceChannel;
    use pretty_assertions::assert_eq;

    fn paper(id: &str, title: &str) -> Paper {
        Paper {
            id: id.into(),
            title: title.into(),
            authors: vec!["Jane Doe".into()],
            abstract_or_summary: format!("Abstract of {title}"),
            year: Some(2023),
            venue: None,
            publisher: None,
            url: None,
            doi: None,
            source_channel: SourceChannel::Search,
            full_text: None,
            sections: BTreeMap::new(),
        }
    }

    fn classification(id: &str, primary: &str, secondary: &[&str]) -> ClassificationResult {
        ClassificationResult {
            paper_id: id.into(),
            scores: BTreeMap::new(),
            primary_topic: primary.into(),
            secondary_topics: secondary.iter().map(|s| s.to_string()).collect(),
            low_confidence: false,
        }
    }

    fn summary(id: &str, text: &str) -> SummaryRecord {
        SummaryRecord {
            paper_id: id.into(),
            text: text.into(),
            citation: String::new(),
            sections_covered: Vec::new(),
        }
    }

    fn coordinator(scope: SynthesisScope) -> SynthesisCoordinator {
        let config = PipelineConfig {
            synthesis_scope: scope,
            ..PipelineConfig::default()
        };
        SynthesisCoordinator::new(CapabilityRegistry::mock(), Arc::new(config))
    }

    #[tokio::test]
    async fn test_one_synthesis_per_populated_topic() {
        let papers = vec![paper("p1", "First"), paper("p2", "Second")];
        let mut classifications = BTreeMap::new();
        classifications.insert("p1".to_string(), classification("p1", "NLP", &[]));
        classifications.insert("p2".to_string(), classification("p2", "NLP", &[]));
        let summaries = vec![summary("p1", "sum one"), summary("p2", "sum two")];
        let topics = vec!["NLP".to_string(), "Hardware".to_string()];

        let outcome = coordinator(SynthesisScope::Primary)
            .synthesize_all(&papers, &classifications, &summaries, &topics)
            .await
            .unwrap();

        // Hardware has no papers, so only NLP is synthesized.
        assert_eq!(outcome.syntheses.len(), 1);
        let record = &outcome.syntheses[0];
        assert_eq!(record.topic, "NLP");
        assert_eq!(
            record.cited_paper_ids,
            vec!["p1".to_string(), "p2".to_string()]
        );
        assert!(record.overview.contains("2 papers"));
        assert!(!record.themes.is_empty());
        assert!(outcome.errors.is_empty());
    }

    #[tokio::test]
    async fn test_secondary_scope_widens_groups() {
        let papers = vec![paper("p1", "First")];
        let mut classifications = BTreeMap::new();
        classifications.insert(
            "p1".to_string(),
            classification("p1", "NLP", &["Efficiency"]),
        );
        let summaries = vec![summary("p1", "sum one")];
        let topics = vec!["NLP".to_string(), "Efficiency".to_string()];

        let outcome = coordinator(SynthesisScope::PrimaryAndSecondary)
            .synthesize_all(&papers, &classifications, &summaries, &topics)
            .await
            .unwrap();
        assert_eq!(outcome.syntheses.len(), 2);
        assert_eq!(outcome.syntheses[0].cited_paper_ids, vec!["p1".to_string()]);
        assert_eq!(outcome.syntheses[1].cited_paper_ids, vec!["p1".to_string()]);
    }

    #[tokio::test]
    async fn test_abstract_stands_in_for_missing_summary() {
        let papers = vec![paper("p1", "Solo")];
        let mut classifications = BTreeMap::new();
        classifications.insert("p1".to_string(), classification("p1", "NLP", &[]));
        let topics = vec!["NLP".to_string()];

        // No summaries at all; context falls back to the abstract, and
        // synthesis still runs.
        let outcome = coordinator(SynthesisScope::Primary)
            .synthesize_all(&papers, &classifications, &[], &topics)
            .await
            .unwrap();
        assert_eq!(outcome.syntheses.len(), 1);
    }

    #[tokio::test]
    async fn test_failure_on_one_topic_recorded() {
        let registry = CapabilityRegistry {
            synthesizer: Arc::new(MockCrossPaperSynthesizer::failing("generation error")),
            ..CapabilityRegistry::mock()
        };
        let coordinator =
            SynthesisCoordinator::new(registry, Arc::new(PipelineConfig::default()));

        let papers = vec![paper("p1", "First")];
        let mut classifications = BTreeMap::new();
        classifications.insert("p1".to_string(), classification("p1", "NLP", &[]));
        let topics = vec!["NLP".to_string()];

        let outcome = coordinator
            .synthesize_all(&papers, &classifications, &[], &topics)
            .await
            .unwrap();
        assert!(outcome.syntheses.is_empty());
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.errors[0].kind, ErrorKind::Generation);
        assert_eq!(outcome.errors[0].item_id.as_deref(), Some("NLP"));
    }

    #[tokio::test]
    async fn test_unstructured_narrative_lands_in_overview() {
        let registry = CapabilityRegistry {
            synthesizer: Arc::new(MockCrossPaperSynthesizer::unstructured()),
            ..CapabilityRegistry::mock()
        };
        let coordinator =
            SynthesisCoordinator::new(registry, Arc::new(PipelineConfig::default()));

        let papers = vec![paper("p1", "First")];
        let mut classifications = BTreeMap::new();
        classifications.insert("p1".to_string(), classification("p1", "NLP", &[]));

        let outcome = coordinator
            .synthesize_all(&papers, &classifications, &[], &["NLP".to_string()])
            .await
            .unwrap();
        let record = &outcome.syntheses[0];
        assert!(record.overview.contains("flat narrative"));
        assert!(record.themes.is_empty());
        assert!(record.contradictions.is_empty());
        assert!(record.gaps.is_empty());
    }

    #[test]
    fn test_build_context_format() {
        let p = paper("p1", "A Paper");
        let papers_by_id: BTreeMap<&str, &Paper> = [("p1", &p)].into_iter().collect();
        let s = summary("p1", "Its summary.");
        let summaries_by_id: BTreeMap<&str, &SummaryRecord> =
            [("p1", &s)].into_iter().collect();

        let context = build_context(&["p1".to_string()], &papers_by_id, &summaries_by_id);
        assert_eq!(context, "Title: A Paper\nSummary: Its summary.");
    }

    #[test]
    fn test_split_sections_headings() {
        let narrative = "Overview:\nBig picture.\n## Themes\nTheme text.\nContradictions:\nDisagreement.\nGaps:\nMissing work.";
        let sections = split_sections(narrative);
        assert_eq!(sections.overview, "Big picture.");
        assert_eq!(sections.themes, "Theme text.");
        assert_eq!(sections.contradictions, "Disagreement.");
        assert_eq!(sections.gaps, "Missing work.");
    }
}
