//! Ingestion aggregator — fans out source channels, normalizes raw records
//! into canonical papers, and dedup-merges across channels.
//!
//! Channels are independent and run concurrently, each under its own
//! timeout. A failing channel records an error and never aborts ingestion;
//! the merge happens only after every channel has completed or timed out,
//! in fixed channel priority order so identical inputs yield identical
//! corpora.

use crate::capabilities::{CapabilityRegistry, SortKey};
use crate::config::PipelineConfig;
use crate::error::{CapabilityError, ErrorEntry, ErrorKind};
use crate::session::SessionInputs;
use crate::types::{dedup_key, normalize_doi, Paper, RawPaperRecord, SourceChannel};
use futures::future::join_all;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info};

/// Papers plus the per-channel failures recorded along the way.
#[derive(Debug, Default)]
pub struct IngestOutcome {
    pub papers: Vec<Paper>,
    pub errors: Vec<ErrorEntry>,
}

/// Result of one channel item call (a search query, one upload, one URL,
/// one DOI), tagged for error attribution.
struct ChannelFetch {
    channel: SourceChannel,
    item_id: String,
    records: Result<Vec<RawPaperRecord>, CapabilityError>,
}

type FetchFuture<'a> = Pin<Box<dyn Future<Output = ChannelFetch> + Send + 'a>>;

pub struct IngestionAggregator {
    registry: CapabilityRegistry,
    config: Arc<PipelineConfig>,
}

impl IngestionAggregator {
    pub fn new(registry: CapabilityRegistry, config: Arc<PipelineConfig>) -> Self {
        Self { registry, config }
    }

    /// Run all channels concurrently and merge their records into canonical
    /// papers. Never fails as a whole; a session with zero papers is the
    /// caller's terminal condition to enforce.
    pub async fn ingest(&self, inputs: &SessionInputs) -> IngestOutcome {
        let deadline = Duration::from_secs(self.config.channel_timeout_secs);
        let mut fetches: Vec<FetchFuture<'_>> = Vec::new();

        // Futures are pushed in channel priority order; `join_all` preserves
        // that order in its output, which fixes the merge order.
        if !inputs.query.trim().is_empty() {
            let query = inputs.query.clone();
            let max_results = inputs.max_results;
            fetches.push(Box::pin(async move {
                let records = bounded(deadline, self.config.channel_timeout_secs, async {
                    self.registry
                        .search
                        .search(&query, max_results, SortKey::default())
                        .await
                })
                .await;
                ChannelFetch {
                    channel: SourceChannel::Search,
                    item_id: query,
                    records,
                }
            }));
        }

        for path in &inputs.pdf_paths {
            let item = path.display().to_string();
            fetches.push(Box::pin(async move {
                let records = bounded(deadline, self.config.channel_timeout_secs, async {
                    self.registry
                        .extractor
                        .extract(&item)
                        .await
                        .map(|record| vec![record])
                })
                .await;
                ChannelFetch {
                    channel: SourceChannel::Upload,
                    item_id: path.display().to_string(),
                    records,
                }
            }));
        }

        for url in &inputs.urls {
            fetches.push(Box::pin(async move {
                let records = bounded(deadline, self.config.channel_timeout_secs, async {
                    self.registry
                        .extractor
                        .extract(url)
                        .await
                        .map(|record| vec![record])
                })
                .await;
                ChannelFetch {
                    channel: SourceChannel::Url,
                    item_id: url.clone(),
                    records,
                }
            }));
        }

        for doi in &inputs.dois {
            fetches.push(Box::pin(async move {
                let records = bounded(deadline, self.config.channel_timeout_secs, async {
                    self.registry
                        .doi_resolver
                        .resolve(doi)
                        .await
                        .map(|record| vec![record])
                })
                .await;
                ChannelFetch {
                    channel: SourceChannel::Doi,
                    item_id: doi.clone(),
                    records,
                }
            }));
        }

        let outcomes = join_all(fetches).await;

        let mut merger = PaperMerger::new();
        let mut errors = Vec::new();
        for fetch in outcomes {
            match fetch.records {
                Ok(records) => {
                    debug!(
                        channel = %fetch.channel,
                        item = %fetch.item_id,
                        count = records.len(),
                        "channel produced records"
                    );
                    for raw in records {
                        merger.absorb(raw, fetch.channel);
                    }
                }
                Err(err) => {
                    errors.push(ErrorEntry::new(
                        "ingest",
                        Some(fetch.item_id),
                        error_kind_for(fetch.channel),
                        err.to_string(),
                    ));
                }
            }
        }

        let papers = merger.into_papers();
        info!(
            papers = papers.len(),
            channel_errors = errors.len(),
            "ingestion complete"
        );
        IngestOutcome { papers, errors }
    }
}

/// Wrap a channel call with its timeout.
async fn bounded<T>(
    deadline: Duration,
    secs: u64,
    fut: impl Future<Output = Result<T, CapabilityError>>,
) -> Result<T, CapabilityError> {
    match timeout(deadline, fut).await {
        Ok(result) => result,
        Err(_) => Err(CapabilityError::timeout(secs)),
    }
}

fn error_kind_for(channel: SourceChannel) -> ErrorKind {
    match channel {
        SourceChannel::Search | SourceChannel::Url => ErrorKind::SourceFetch,
        SourceChannel::Upload => ErrorKind::Extraction,
        SourceChannel::Doi => ErrorKind::Resolution,
    }
}

/// Accumulates normalized records, merging by dedup key. First-seen order
/// is preserved across the fixed channel priority.
///
/// Each paper is indexed under both identities it can be recognized by:
/// its normalized DOI key and its title-plus-surname key. A DOI-bearing
/// record and a DOI-less record of the same work therefore still land in
/// one Paper regardless of which channel produced which.
struct PaperMerger {
    papers: Vec<Paper>,
    index: HashMap<String, usize>,
}

impl PaperMerger {
    fn new() -> Self {
        Self {
            papers: Vec::new(),
            index: HashMap::new(),
        }
    }

    fn absorb(&mut self, raw: RawPaperRecord, channel: SourceChannel) {
        let incoming = normalize(raw, channel, self.papers.len() + 1);
        let (doi_key, title_key) = identity_keys(&incoming);

        let found = doi_key
            .as_ref()
            .and_then(|k| self.index.get(k))
            .or_else(|| title_key.as_ref().and_then(|k| self.index.get(k)))
            .copied();

        let slot = match found {
            Some(i) => {
                merge_into(&mut self.papers[i], incoming);
                i
            }
            None => {
                self.papers.push(incoming);
                self.papers.len() - 1
            }
        };
        // Register both identities so either key finds the same paper later.
        if let Some(k) = doi_key {
            self.index.insert(k, slot);
        }
        if let Some(k) = title_key {
            self.index.insert(k, slot);
        }
    }

    fn into_papers(self) -> Vec<Paper> {
        self.papers
    }
}

/// The keys a paper can be recognized under. The title key is omitted for
/// an untitled DOI-only record so unrelated untitled records never collide.
fn identity_keys(paper: &Paper) -> (Option<String>, Option<String>) {
    let doi_key = paper
        .doi
        .as_deref()
        .filter(|d| !d.is_empty())
        .map(|d| format!("doi:{d}"));
    let title_key = if !paper.title.is_empty() || doi_key.is_none() {
        Some(dedup_key(None, &paper.title, &paper.authors))
    } else {
        None
    };
    (doi_key, title_key)
}

/// Map a raw channel record onto the canonical shape, filling missing
/// optional fields with empty values rather than failing.
fn normalize(raw: RawPaperRecord, channel: SourceChannel, seq: usize) -> Paper {
    Paper {
        id: format!("paper_{seq:03}"),
        title: raw.title.map(|t| t.trim().to_string()).unwrap_or_default(),
        authors: raw.authors,
        abstract_or_summary: raw.abstract_text.unwrap_or_default(),
        year: raw.year,
        venue: clean(raw.venue),
        publisher: clean(raw.publisher),
        url: clean(raw.url),
        doi: clean(raw.doi).map(|d| normalize_doi(&d)),
        source_channel: channel,
        full_text: raw.full_text.filter(|t| !t.trim().is_empty()),
        sections: raw.sections,
    }
}

fn clean(field: Option<String>) -> Option<String> {
    field
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Field-union merge: longer text wins for abstract and full text,
/// first-seen wins for scalar identity fields unless the existing value
/// is empty. Nothing is ever deleted.
fn merge_into(existing: &mut Paper, incoming: Paper) {
    if existing.title.is_empty() && !incoming.title.is_empty() {
        existing.title = incoming.title;
    }
    if existing.authors.is_empty() {
        existing.authors = incoming.authors;
    }
    if incoming.abstract_or_summary.len() > existing.abstract_or_summary.len() {
        existing.abstract_or_summary = incoming.abstract_or_summary;
    }
    let existing_len = existing.full_text.as_deref().map_or(0, str::len);
    if incoming.full_text.as_deref().map_or(0, str::len) > existing_len {
        existing.full_text = incoming.full_text;
    }
    if existing.year.is_none() {
        existing.year = incoming.year;
    }
    if existing.venue.is_none() {
        existing.venue = incoming.venue;
    }
    if existing.publisher.is_none() {
        existing.publisher = incoming.publisher;
    }
    if existing.url.is_none() {
        existing.url = incoming.url;
    }
    if existing.doi.is_none() {
        existing.doi = incoming.doi;
    }
    for (name, text) in incoming.sections {
        existing.sections.entry(name).or_insert(text);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::{
        MockDocumentExtractor, MockDoiResolver, MockSearchProvider, SearchProvider,
    };
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;

    fn registry_with_search(records: Vec<RawPaperRecord>) -> CapabilityRegistry {
        CapabilityRegistry {
            search: Arc::new(MockSearchProvider::with_records(records)),
            ..CapabilityRegistry::mock()
        }
    }

    fn aggregator(registry: CapabilityRegistry) -> IngestionAggregator {
        IngestionAggregator::new(registry, Arc::new(PipelineConfig::default()))
    }

    fn search_inputs(max_results: usize) -> SessionInputs {
        SessionInputs {
            query: "transformer efficiency".into(),
            max_results,
            ..Default::default()
        }
    }

    fn record(title: &str) -> RawPaperRecord {
        RawPaperRecord {
            title: Some(title.into()),
            authors: vec!["Jane Doe".into()],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_search_channel_normalized() {
        let agg = aggregator(registry_with_search(vec![record("Paper A")]));
        let outcome = agg.ingest(&search_inputs(5)).await;
        assert_eq!(outcome.papers.len(), 1);
        assert_eq!(outcome.papers[0].id, "paper_001");
        assert_eq!(outcome.papers[0].title, "Paper A");
        assert_eq!(outcome.papers[0].source_channel, SourceChannel::Search);
        assert!(outcome.errors.is_empty());
    }

    #[tokio::test]
    async fn test_dedup_union_across_channels() {
        // Search knows the abstract, the DOI channel knows the DOI and year.
        let mut search_record = record("Shared Work");
        search_record.abstract_text = Some("An abstract from search.".into());

        let mut doi_record = record("Shared Work");
        doi_record.doi = Some("10.1234/shared".into());
        doi_record.year = Some(2022);

        let mut resolver_map = HashMap::new();
        resolver_map.insert("10.1234/shared".to_string(), doi_record);

        let registry = CapabilityRegistry {
            search: Arc::new(MockSearchProvider::with_records(vec![search_record])),
            doi_resolver: Arc::new(MockDoiResolver::with_records(resolver_map)),
            ..CapabilityRegistry::mock()
        };

        let mut inputs = search_inputs(5);
        inputs.dois = vec!["doi:10.1234/shared".into()];

        let outcome = aggregator(registry).ingest(&inputs).await;
        assert_eq!(outcome.papers.len(), 1);
        let paper = &outcome.papers[0];
        assert_eq!(paper.abstract_or_summary, "An abstract from search.");
        assert_eq!(paper.doi.as_deref(), Some("10.1234/shared"));
        assert_eq!(paper.year, Some(2022));
        // First seen via search; identity fields stay first-seen.
        assert_eq!(paper.source_channel, SourceChannel::Search);
    }

    #[tokio::test]
    async fn test_doi_bearing_and_doiless_records_are_one_paper() {
        // Same work twice from the same channel: once with a DOI, once
        // without. The title identity must bridge the two.
        let mut with_doi = record("Shared Work");
        with_doi.doi = Some("10.1234/shared".into());
        let without_doi = record("Shared Work");

        let agg = aggregator(registry_with_search(vec![with_doi, without_doi]));
        let outcome = agg.ingest(&search_inputs(5)).await;
        assert_eq!(outcome.papers.len(), 1);
        assert_eq!(outcome.papers[0].doi.as_deref(), Some("10.1234/shared"));

        // And in the opposite order.
        let without_doi = record("Shared Work");
        let mut with_doi = record("Shared Work");
        with_doi.doi = Some("10.1234/shared".into());

        let agg = aggregator(registry_with_search(vec![without_doi, with_doi]));
        let outcome = agg.ingest(&search_inputs(5)).await;
        assert_eq!(outcome.papers.len(), 1);
        assert_eq!(outcome.papers[0].doi.as_deref(), Some("10.1234/shared"));
    }

    #[tokio::test]
    async fn test_same_doi_different_title_casing_is_one_paper() {
        let mut a = record("Attention Is All You Need");
        a.doi = Some("10.5555/attn".into());
        let mut b = record("ATTENTION  IS ALL  YOU NEED");
        b.doi = Some("https://doi.org/10.5555/ATTN".into());

        let agg = aggregator(registry_with_search(vec![a, b]));
        let outcome = agg.ingest(&search_inputs(5)).await;
        assert_eq!(outcome.papers.len(), 1);
    }

    #[tokio::test]
    async fn test_channel_failure_does_not_abort() {
        let registry = CapabilityRegistry {
            search: Arc::new(MockSearchProvider::with_records(vec![record("Kept")])),
            doi_resolver: Arc::new(MockDoiResolver::failing("registry down")),
            ..CapabilityRegistry::mock()
        };
        let mut inputs = search_inputs(5);
        inputs.dois = vec!["10.1/a".into(), "10.1/b".into()];

        let outcome = aggregator(registry).ingest(&inputs).await;
        assert_eq!(outcome.papers.len(), 1);
        assert_eq!(outcome.errors.len(), 2);
        assert!(outcome
            .errors
            .iter()
            .all(|e| e.kind == ErrorKind::Resolution));
    }

    #[tokio::test]
    async fn test_channel_priority_ordering() {
        let mut doi_record = record("From DOI");
        doi_record.doi = Some("10.1/z".into());
        let mut resolver_map = HashMap::new();
        resolver_map.insert("10.1/z".to_string(), doi_record);

        let registry = CapabilityRegistry {
            search: Arc::new(MockSearchProvider::with_records(vec![record("From Search")])),
            extractor: Arc::new(MockDocumentExtractor::with_text("uploaded text")),
            doi_resolver: Arc::new(MockDoiResolver::with_records(resolver_map)),
            ..CapabilityRegistry::mock()
        };
        let mut inputs = search_inputs(5);
        inputs.pdf_paths = vec!["uploads/from_upload.pdf".into()];
        inputs.dois = vec!["10.1/z".into()];

        let outcome = aggregator(registry).ingest(&inputs).await;
        let titles: Vec<&str> = outcome.papers.iter().map(|p| p.title.as_str()).collect();
        assert_eq!(titles, vec!["From Search", "from upload", "From DOI"]);
        assert_eq!(outcome.papers[1].source_channel, SourceChannel::Upload);
    }

    #[tokio::test]
    async fn test_longer_abstract_wins() {
        let mut short = record("Same Work");
        short.abstract_text = Some("short".into());
        let mut long = record("Same Work");
        long.abstract_text = Some("a much longer abstract with detail".into());

        let agg = aggregator(registry_with_search(vec![short, long]));
        let outcome = agg.ingest(&search_inputs(5)).await;
        assert_eq!(outcome.papers.len(), 1);
        assert_eq!(
            outcome.papers[0].abstract_or_summary,
            "a much longer abstract with detail"
        );
    }

    struct StalledSearch;

    #[async_trait]
    impl SearchProvider for StalledSearch {
        async fn search(
            &self,
            _query: &str,
            _max_results: usize,
            _sort: SortKey,
        ) -> Result<Vec<RawPaperRecord>, CapabilityError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(Vec::new())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_channel_timeout_recorded() {
        let registry = CapabilityRegistry {
            search: Arc::new(StalledSearch),
            ..CapabilityRegistry::mock()
        };
        let outcome = aggregator(registry).ingest(&search_inputs(5)).await;
        assert!(outcome.papers.is_empty());
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.errors[0].kind, ErrorKind::SourceFetch);
        assert!(outcome.errors[0].message.contains("timed out"));
    }

    #[tokio::test]
    async fn test_empty_query_skips_search_channel() {
        let agg = aggregator(registry_with_search(vec![record("ignored")]));
        let outcome = agg
            .ingest(&SessionInputs {
                query: "  ".into(),
                max_results: 5,
                ..Default::default()
            })
            .await;
        assert!(outcome.papers.is_empty());
        assert!(outcome.errors.is_empty());
    }
}
