//! Canonical record model shared across pipeline stages.
//!
//! Identity rules live here: two ingested records describe the same work when
//! their dedup keys match — normalized DOI when one exists, otherwise
//! normalized title plus first-author surname.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// Which ingestion channel first produced a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceChannel {
    Search,
    Upload,
    Url,
    Doi,
}

impl SourceChannel {
    /// Fixed merge priority: search results first, DOI lookups last.
    /// Keeps output ordering deterministic for identical inputs.
    pub const PRIORITY: [SourceChannel; 4] = [
        SourceChannel::Search,
        SourceChannel::Upload,
        SourceChannel::Url,
        SourceChannel::Doi,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceChannel::Search => "search",
            SourceChannel::Upload => "upload",
            SourceChannel::Url => "url",
            SourceChannel::Doi => "doi",
        }
    }
}

impl fmt::Display for SourceChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A raw record as produced by one source channel, before normalization.
///
/// Channels return wildly inconsistent field sets; everything here is
/// optional and missing fields normalize to empty rather than failing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawPaperRecord {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default)]
    pub abstract_text: Option<String>,
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default)]
    pub venue: Option<String>,
    #[serde(default)]
    pub publisher: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub doi: Option<String>,
    #[serde(default)]
    pub full_text: Option<String>,
    #[serde(default)]
    pub sections: BTreeMap<String, String>,
}

/// Canonical unit of the corpus: exactly one per distinct work per session.
///
/// Created by the ingestion aggregator when a dedup key is first seen,
/// mutated by field union while ingestion runs, immutable afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Paper {
    pub id: String,
    pub title: String,
    pub authors: Vec<String>,
    pub abstract_or_summary: String,
    pub year: Option<i32>,
    pub venue: Option<String>,
    pub publisher: Option<String>,
    pub url: Option<String>,
    pub doi: Option<String>,
    pub source_channel: SourceChannel,
    pub full_text: Option<String>,
    pub sections: BTreeMap<String, String>,
}

impl Paper {
    /// Text used for scoring and summarization: full text when available,
    /// else the abstract.
    pub fn body_text(&self) -> &str {
        match self.full_text.as_deref() {
            Some(text) if !text.trim().is_empty() => text,
            _ => &self.abstract_or_summary,
        }
    }

    /// Identity key for cross-channel deduplication.
    pub fn dedup_key(&self) -> String {
        dedup_key(self.doi.as_deref(), &self.title, &self.authors)
    }
}

/// Strip `doi:` / `https://doi.org/` prefixes, trim, lowercase.
pub fn normalize_doi(doi: &str) -> String {
    doi.trim()
        .trim_start_matches("https://doi.org/")
        .trim_start_matches("doi:")
        .trim()
        .to_lowercase()
}

/// Lowercase and collapse all whitespace runs to single spaces.
pub fn normalize_title(title: &str) -> String {
    title
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Surname heuristic: last whitespace-separated token of the first author.
pub fn first_author_surname(authors: &[String]) -> Option<String> {
    authors
        .first()
        .and_then(|name| name.split_whitespace().last())
        .map(|surname| surname.to_lowercase())
}

/// Compute the dedup key for a record: normalized DOI when present,
/// otherwise normalized title plus first-author surname.
pub fn dedup_key(doi: Option<&str>, title: &str, authors: &[String]) -> String {
    if let Some(doi) = doi {
        let normalized = normalize_doi(doi);
        if !normalized.is_empty() {
            return format!("doi:{normalized}");
        }
    }
    let surname = first_author_surname(authors).unwrap_or_default();
    format!("title:{}|{surname}", normalize_title(title))
}

/// One classification per paper, immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub paper_id: String,
    /// Topic → similarity score in [0.0, 1.0].
    pub scores: BTreeMap<String, f64>,
    /// Highest-scoring topic; ties broken by topic list order.
    pub primary_topic: String,
    /// Topics above the secondary threshold, primary excluded,
    /// in topic list order.
    pub secondary_topics: Vec<String>,
    /// Set when the paper had no scorable text and received the
    /// deterministic fallback assignment.
    pub low_confidence: bool,
}

/// One summary per paper, with a formatted citation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryRecord {
    pub paper_id: String,
    pub text: String,
    pub citation: String,
    pub sections_covered: Vec<String>,
}

/// One synthesis per topic that has at least one paper in scope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisRecord {
    pub topic: String,
    pub overview: String,
    pub themes: String,
    pub contradictions: String,
    pub gaps: String,
    /// All papers consulted, in group order.
    pub cited_paper_ids: Vec<String>,
}

/// What a rendered audio file narrates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioKind {
    Summary,
    Synthesis,
}

/// A rendered audio file. The association to its source artifact lives in
/// `associated_id` (paper id or topic), never in the filename.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioArtifact {
    pub id: String,
    pub kind: AudioKind,
    pub associated_id: String,
    pub file_path: PathBuf,
    /// Reported by the audio backend, or `None` when unknown. Never fabricated.
    pub duration_seconds: Option<f64>,
}

/// Filesystem slug for a topic: lowercase, spaces → underscores.
pub fn topic_slug(topic: &str) -> String {
    topic.to_lowercase().replace(' ', "_")
}
