//! Pluggable capability interfaces the pipeline core calls but does not
//! implement.
//!
//! Concrete academic search clients, document extractors, DOI registries,
//! model inference, and TTS backends live outside this crate and plug in
//! through these traits. A [`CapabilityRegistry`] is constructed once per
//! process and shared by reference across sessions, preserving the
//! "load once, reuse many times" property without global mutable state.
//!
//! Mock implementations are exported (not test-gated) so callers can run
//! the pipeline offline and tests can script capability behavior.

use crate::error::CapabilityError;
use crate::types::RawPaperRecord;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// Sort order requested from the search capability. Unknown keys on the
/// wire deserialize as `Relevance` via `Default`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SortKey {
    #[default]
    Relevance,
    LastUpdatedDate,
    SubmittedDate,
}

/// Keyword search over an academic index.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(
        &self,
        query: &str,
        max_results: usize,
        sort: SortKey,
    ) -> Result<Vec<RawPaperRecord>, CapabilityError>;
}

/// Text and metadata extraction from an uploaded file or a fetched URL.
/// Implementations branch on content type internally.
#[async_trait]
pub trait DocumentExtractor: Send + Sync {
    async fn extract(&self, file_or_url: &str) -> Result<RawPaperRecord, CapabilityError>;
}

/// DOI registry lookup.
#[async_trait]
pub trait DoiResolver: Send + Sync {
    async fn resolve(&self, doi: &str) -> Result<RawPaperRecord, CapabilityError>;
}

/// Similarity scoring of a text against a topic list.
#[async_trait]
pub trait TopicScorer: Send + Sync {
    /// Returns topic -> score, each score in [0.0, 1.0].
    async fn score(
        &self,
        text: &str,
        topics: &[String],
    ) -> Result<HashMap<String, f64>, CapabilityError>;
}

/// Bounded-length text summarization.
#[async_trait]
pub trait TextSummarizer: Send + Sync {
    async fn summarize(
        &self,
        text: &str,
        min_chars: usize,
        max_chars: usize,
    ) -> Result<String, CapabilityError>;
}

/// Free-text synthesis across several papers' summaries for one topic.
#[async_trait]
pub trait CrossPaperSynthesizer: Send + Sync {
    async fn synthesize(&self, topic: &str, context: &str) -> Result<String, CapabilityError>;
}

/// Text-to-speech rendering into a caller-chosen file.
#[async_trait]
pub trait AudioRenderer: Send + Sync {
    /// Render `text` into `out_path`. Returns the duration in seconds when
    /// the backend reports one; `None` means unknown.
    async fn render(&self, text: &str, out_path: &Path)
        -> Result<Option<f64>, CapabilityError>;
}

/// All capabilities the pipeline needs, constructed once and shared.
#[derive(Clone)]
pub struct CapabilityRegistry {
    pub search: Arc<dyn SearchProvider>,
    pub extractor: Arc<dyn DocumentExtractor>,
    pub doi_resolver: Arc<dyn DoiResolver>,
    pub scorer: Arc<dyn TopicScorer>,
    pub summarizer: Arc<dyn TextSummarizer>,
    pub synthesizer: Arc<dyn CrossPaperSynthesizer>,
    pub audio: Arc<dyn AudioRenderer>,
}

impl CapabilityRegistry {
    /// A registry wired entirely to mock capabilities, for tests and
    /// offline runs.
    pub fn mock() -> Self {
        Self {
            search: Arc::new(MockSearchProvider::with_records(Vec::new())),
            extractor: Arc::new(MockDocumentExtractor::with_text("")),
            doi_resolver: Arc::new(MockDoiResolver::default()),
            scorer: Arc::new(MockTopicScorer::new()),
            summarizer: Arc::new(MockTextSummarizer),
            synthesizer: Arc::new(MockCrossPaperSynthesizer::structured()),
            audio: Arc::new(MockAudioRenderer::new()),
        }
    }
}

// ---------------------------------------------------------------------------
// Mock capabilities
// ---------------------------------------------------------------------------

/// Canned search provider.
pub struct MockSearchProvider {
    records: Vec<RawPaperRecord>,
    error: Option<String>,
}

impl MockSearchProvider {
    pub fn with_records(records: Vec<RawPaperRecord>) -> Self {
        Self {
            records,
            error: None,
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            records: Vec::new(),
            error: Some(message.to_string()),
        }
    }
}

#[async_trait]
impl SearchProvider for MockSearchProvider {
    async fn search(
        &self,
        _query: &str,
        max_results: usize,
        _sort: SortKey,
    ) -> Result<Vec<RawPaperRecord>, CapabilityError> {
        if let Some(ref message) = self.error {
            return Err(CapabilityError::new(message));
        }
        Ok(self.records.iter().take(max_results).cloned().collect())
    }
}

/// Extractor that derives a title from the file stem (underscores become
/// spaces, matching how URL-fetched PDFs are titled) and returns canned text.
pub struct MockDocumentExtractor {
    text: String,
    error: Option<String>,
}

impl MockDocumentExtractor {
    pub fn with_text(text: &str) -> Self {
        Self {
            text: text.to_string(),
            error: None,
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            text: String::new(),
            error: Some(message.to_string()),
        }
    }
}

#[async_trait]
impl DocumentExtractor for MockDocumentExtractor {
    async fn extract(&self, file_or_url: &str) -> Result<RawPaperRecord, CapabilityError> {
        if let Some(ref message) = self.error {
            return Err(CapabilityError::new(message));
        }
        let stem = Path::new(file_or_url)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("Untitled")
            .replace('_', " ");
        Ok(RawPaperRecord {
            title: Some(stem),
            url: Some(file_or_url.to_string()),
            full_text: Some(self.text.clone()),
            ..Default::default()
        })
    }
}

/// Resolver backed by a map of normalized DOI -> record.
#[derive(Default)]
pub struct MockDoiResolver {
    records: HashMap<String, RawPaperRecord>,
    error: Option<String>,
}

impl MockDoiResolver {
    pub fn with_records(records: HashMap<String, RawPaperRecord>) -> Self {
        Self {
            records,
            error: None,
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            records: HashMap::new(),
            error: Some(message.to_string()),
        }
    }
}

#[async_trait]
impl DoiResolver for MockDoiResolver {
    async fn resolve(&self, doi: &str) -> Result<RawPaperRecord, CapabilityError> {
        if let Some(ref message) = self.error {
            return Err(CapabilityError::new(message));
        }
        let key = crate::types::normalize_doi(doi);
        self.records
            .get(&key)
            .cloned()
            .ok_or_else(|| CapabilityError::new(format!("DOI not found: {doi}")))
    }
}

/// Scorer with an optional queue of scripted responses; when the queue is
/// empty it falls back to keyword containment (0.9 when the text mentions
/// the topic, 0.1 otherwise), which is deterministic and order-free.
pub struct MockTopicScorer {
    queued: std::sync::Mutex<Vec<HashMap<String, f64>>>,
    error: Option<String>,
}

impl MockTopicScorer {
    pub fn new() -> Self {
        Self {
            queued: std::sync::Mutex::new(Vec::new()),
            error: None,
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            queued: std::sync::Mutex::new(Vec::new()),
            error: Some(message.to_string()),
        }
    }

    /// Queue a response for the next `score` call.
    pub fn queue_scores(&self, scores: HashMap<String, f64>) {
        self.queued.lock().unwrap().push(scores);
    }
}

impl Default for MockTopicScorer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TopicScorer for MockTopicScorer {
    async fn score(
        &self,
        text: &str,
        topics: &[String],
    ) -> Result<HashMap<String, f64>, CapabilityError> {
        if let Some(ref message) = self.error {
            return Err(CapabilityError::new(message));
        }
        {
            let mut queued = self.queued.lock().unwrap();
            if !queued.is_empty() {
                return Ok(queued.remove(0));
            }
        }
        let lower = text.to_lowercase();
        Ok(topics
            .iter()
            .map(|topic| {
                let score = if lower.contains(&topic.to_lowercase()) {
                    0.9
                } else {
                    0.1
                };
                (topic.clone(), score)
            })
            .collect())
    }
}

/// Summarizer that returns the leading window of the input.
pub struct MockTextSummarizer;

#[async_trait]
impl TextSummarizer for MockTextSummarizer {
    async fn summarize(
        &self,
        text: &str,
        _min_chars: usize,
        max_chars: usize,
    ) -> Result<String, CapabilityError> {
        Ok(text.chars().take(max_chars).collect())
    }
}

/// Synthesizer producing either a section-structured narrative or one flat
/// paragraph, to exercise both parsing paths downstream.
pub struct MockCrossPaperSynthesizer {
    structured: bool,
    error: Option<String>,
}

impl MockCrossPaperSynthesizer {
    pub fn structured() -> Self {
        Self {
            structured: true,
            error: None,
        }
    }

    pub fn unstructured() -> Self {
        Self {
            structured: false,
            error: None,
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            structured: true,
            error: Some(message.to_string()),
        }
    }
}

#[async_trait]
impl CrossPaperSynthesizer for MockCrossPaperSynthesizer {
    async fn synthesize(&self, topic: &str, context: &str) -> Result<String, CapabilityError> {
        if let Some(ref message) = self.error {
            return Err(CapabilityError::new(message));
        }
        let paper_count = context.matches("Title:").count();
        if self.structured {
            Ok(format!(
                "Overview:\nAcross {paper_count} papers on {topic}, methods converge.\n\
                 Themes:\nShared focus on {topic}.\n\
                 Contradictions:\nReported gains vary between studies.\n\
                 Gaps:\nLong-horizon evaluation is missing."
            ))
        } else {
            Ok(format!(
                "A flat narrative covering {paper_count} papers on {topic}."
            ))
        }
    }
}

/// Renderer that writes the text bytes to the target path and reports a
/// duration proportional to the text length.
pub struct MockAudioRenderer {
    report_duration: bool,
    error: Option<String>,
}

impl MockAudioRenderer {
    pub fn new() -> Self {
        Self {
            report_duration: true,
            error: None,
        }
    }

    /// A backend that cannot measure duration.
    pub fn without_duration() -> Self {
        Self {
            report_duration: false,
            error: None,
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            report_duration: true,
            error: Some(message.to_string()),
        }
    }
}

impl Default for MockAudioRenderer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AudioRenderer for MockAudioRenderer {
    async fn render(
        &self,
        text: &str,
        out_path: &Path,
    ) -> Result<Option<f64>, CapabilityError> {
        if let Some(ref message) = self.error {
            return Err(CapabilityError::new(message));
        }
        tokio::fs::write(out_path, text.as_bytes())
            .await
            .map_err(|e| CapabilityError::new(format!("write failed: {e}")))?;
        if self.report_duration {
            // Rough speaking rate: ~15 characters per second.
            Ok(Some(text.chars().count() as f64 / 15.0))
        } else {
            Ok(None)
        }
    }
}
