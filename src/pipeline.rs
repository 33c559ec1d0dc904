//! End-to-end pipeline assembly.
//!
//! Wires the coordinators into executor stages, runs one session from
//! inputs to persisted results, and reports what was produced. The
//! pipeline itself is stateless across sessions; config and capabilities
//! are shared read-only.

use crate::audio::{AudioCoordinator, RenderRequest};
use crate::capabilities::CapabilityRegistry;
use crate::classify::{ClassifyOutcome, TopicClassifier};
use crate::config::PipelineConfig;
use crate::error::{ErrorEntry, ErrorKind, Result as PipelineResult, StageError};
use crate::executor::{PipelineExecutor, Stage, StageContext};
use crate::ingest::IngestionAggregator;
use crate::session::{Session, SessionInputs};
use crate::store::{SessionResults, SessionStore};
use crate::summarize::SummaryCoordinator;
use crate::synthesize::SynthesisCoordinator;
use crate::types::{
    AudioArtifact, AudioKind, ClassificationResult, Paper, SummaryRecord, SynthesisRecord,
};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub const STAGE_INGEST: &str = "ingest";
pub const STAGE_CLASSIFY: &str = "classify";
pub const STAGE_SUMMARIZE: &str = "summarize";
pub const STAGE_SYNTHESIZE: &str = "synthesize";
pub const STAGE_RENDER: &str = "render";

const CTX_PAPERS: &str = "papers";
const CTX_CLASSIFICATIONS: &str = "classifications";
const CTX_SUMMARIES: &str = "summaries";
const CTX_SYNTHESES: &str = "syntheses";
const CTX_AUDIO: &str = "audio";

/// What one run produced, by count.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessCounts {
    pub papers: usize,
    pub summaries: usize,
    pub syntheses: usize,
    pub audio_files: usize,
}

/// Return value of [`PaperPipeline::process_query`].
#[derive(Debug)]
pub struct ProcessOutcome {
    pub session_id: String,
    pub counts: ProcessCounts,
    /// Per-item failures recorded along the way. Empty means a clean run.
    pub errors: Vec<ErrorEntry>,
}

struct IngestStage {
    aggregator: IngestionAggregator,
}

#[async_trait]
impl Stage for IngestStage {
    fn id(&self) -> &str {
        STAGE_INGEST
    }

    async fn run(
        &self,
        session: &mut Session,
        ctx: &mut StageContext,
    ) -> Result<(), StageError> {
        let outcome = self.aggregator.ingest(&session.inputs).await;
        for entry in outcome.errors {
            session.record_error(entry);
        }
        if outcome.papers.is_empty() {
            return Err(StageError::Failed(
                "no papers could be ingested from any source".into(),
            ));
        }
        ctx.insert(CTX_PAPERS, outcome.papers);
        Ok(())
    }
}

struct ClassifyStage {
    classifier: TopicClassifier,
}

#[async_trait]
impl Stage for ClassifyStage {
    fn id(&self) -> &str {
        STAGE_CLASSIFY
    }

    fn depends_on(&self) -> Vec<String> {
        vec![STAGE_INGEST.to_string()]
    }

    async fn run(
        &self,
        session: &mut Session,
        ctx: &mut StageContext,
    ) -> Result<(), StageError> {
        let topics = session.inputs.topics.clone();
        let papers: &Vec<Paper> = ctx.require(CTX_PAPERS)?;
        let outcome = self.classifier.classify(papers, &topics).await?;
        let ClassifyOutcome { results, errors } = outcome;
        for entry in errors {
            session.record_error(entry);
        }
        ctx.insert(CTX_CLASSIFICATIONS, results);
        Ok(())
    }
}

struct SummarizeStage {
    coordinator: SummaryCoordinator,
    store: Arc<SessionStore>,
}

#[async_trait]
impl Stage for SummarizeStage {
    fn id(&self) -> &str {
        STAGE_SUMMARIZE
    }

    fn depends_on(&self) -> Vec<String> {
        vec![STAGE_INGEST.to_string(), STAGE_CLASSIFY.to_string()]
    }

    async fn run(
        &self,
        session: &mut Session,
        ctx: &mut StageContext,
    ) -> Result<(), StageError> {
        let papers: &Vec<Paper> = ctx.require(CTX_PAPERS)?;
        let outcome = self.coordinator.summarize_all(papers).await?;
        for entry in outcome.errors {
            session.record_error(entry);
        }
        for summary in &outcome.summaries {
            if let Err(e) = self.store.write_summary(summary).await {
                session.record_error(ErrorEntry::new(
                    STAGE_SUMMARIZE,
                    Some(summary.paper_id.clone()),
                    ErrorKind::Generation,
                    format!("could not persist summary: {e}"),
                ));
            }
        }
        ctx.insert(CTX_SUMMARIES, outcome.summaries);
        Ok(())
    }
}

struct SynthesizeStage {
    coordinator: SynthesisCoordinator,
    store: Arc<SessionStore>,
}

#[async_trait]
impl Stage for SynthesizeStage {
    fn id(&self) -> &str {
        STAGE_SYNTHESIZE
    }

    fn depends_on(&self) -> Vec<String> {
        vec![
            STAGE_INGEST.to_string(),
            STAGE_CLASSIFY.to_string(),
            STAGE_SUMMARIZE.to_string(),
        ]
    }

    async fn run(
        &self,
        session: &mut Session,
        ctx: &mut StageContext,
    ) -> Result<(), StageError> {
        let topics = session.inputs.topics.clone();
        let papers: &Vec<Paper> = ctx.require(CTX_PAPERS)?;
        let classifications: &BTreeMap<String, ClassificationResult> =
            ctx.require(CTX_CLASSIFICATIONS)?;
        let summaries: &Vec<SummaryRecord> = ctx.require(CTX_SUMMARIES)?;
        let outcome = self
            .coordinator
            .synthesize_all(papers, classifications, summaries, &topics)
            .await?;
        for entry in outcome.errors {
            session.record_error(entry);
        }
        for synthesis in &outcome.syntheses {
            if let Err(e) = self.store.write_synthesis(synthesis).await {
                session.record_error(ErrorEntry::new(
                    STAGE_SYNTHESIZE,
                    Some(synthesis.topic.clone()),
                    ErrorKind::Generation,
                    format!("could not persist synthesis: {e}"),
                ));
            }
        }
        ctx.insert(CTX_SYNTHESES, outcome.syntheses);
        Ok(())
    }
}

struct RenderStage {
    coordinator: AudioCoordinator,
    store: Arc<SessionStore>,
}

#[async_trait]
impl Stage for RenderStage {
    fn id(&self) -> &str {
        STAGE_RENDER
    }

    fn depends_on(&self) -> Vec<String> {
        vec![STAGE_SUMMARIZE.to_string(), STAGE_SYNTHESIZE.to_string()]
    }

    async fn run(
        &self,
        session: &mut Session,
        ctx: &mut StageContext,
    ) -> Result<(), StageError> {
        let summaries: &Vec<SummaryRecord> = ctx.require(CTX_SUMMARIES)?;
        let syntheses: &Vec<SynthesisRecord> = ctx.require(CTX_SYNTHESES)?;

        let mut requests = Vec::with_capacity(summaries.len() + syntheses.len());
        for summary in summaries {
            requests.push(RenderRequest {
                kind: AudioKind::Summary,
                associated_id: summary.paper_id.clone(),
                text: summary.text.clone(),
            });
        }
        for synthesis in syntheses {
            requests.push(RenderRequest {
                kind: AudioKind::Synthesis,
                associated_id: synthesis.topic.clone(),
                text: synthesis_narration(synthesis),
            });
        }

        let outcome = self
            .coordinator
            .render_all(&requests, &self.store.audio_dir())
            .await?;
        for entry in outcome.errors {
            session.record_error(entry);
        }
        ctx.insert(CTX_AUDIO, outcome.artifacts);
        Ok(())
    }
}

/// Flatten a synthesis record back into one narration.
fn synthesis_narration(synthesis: &SynthesisRecord) -> String {
    [
        synthesis.overview.as_str(),
        synthesis.themes.as_str(),
        synthesis.contradictions.as_str(),
        synthesis.gaps.as_str(),
    ]
    .iter()
    .filter(|part| !part.is_empty())
    .cloned()
    .collect::<Vec<_>>()
    .join("\n\n")
}

/// The digest pipeline: ingest, classify, summarize, synthesize, render.
pub struct PaperPipeline {
    config: Arc<PipelineConfig>,
    registry: CapabilityRegistry,
}

impl PaperPipeline {
    pub fn new(config: PipelineConfig, registry: CapabilityRegistry) -> Self {
        Self {
            config: Arc::new(config),
            registry,
        }
    }

    /// Run one complete session. Returns `Ok` for partial and degraded
    /// runs; `Err` only when the session itself could not proceed.
    pub async fn process_query(&self, inputs: SessionInputs) -> PipelineResult<ProcessOutcome> {
        self.process_query_with_cancel(inputs, &CancellationToken::new())
            .await
    }

    /// Like [`process_query`](Self::process_query) but observes a
    /// cancellation token between stages.
    pub async fn process_query_with_cancel(
        &self,
        inputs: SessionInputs,
        cancel: &CancellationToken,
    ) -> PipelineResult<ProcessOutcome> {
        let mut session = Session::create(inputs, &self.config.result_root)?;
        info!(session = %session.id, "session created");

        let store = Arc::new(SessionStore::init(session.dir()).await?);

        let executor = PipelineExecutor::new(vec![
            Arc::new(IngestStage {
                aggregator: IngestionAggregator::new(
                    self.registry.clone(),
                    Arc::clone(&self.config),
                ),
            }) as Arc<dyn Stage>,
            Arc::new(ClassifyStage {
                classifier: TopicClassifier::new(
                    self.registry.clone(),
                    Arc::clone(&self.config),
                ),
            }),
            Arc::new(SummarizeStage {
                coordinator: SummaryCoordinator::new(
                    self.registry.clone(),
                    Arc::clone(&self.config),
                ),
                store: Arc::clone(&store),
            }),
            Arc::new(SynthesizeStage {
                coordinator: SynthesisCoordinator::new(
                    self.registry.clone(),
                    Arc::clone(&self.config),
                ),
                store: Arc::clone(&store),
            }),
            Arc::new(RenderStage {
                coordinator: AudioCoordinator::new(
                    self.registry.clone(),
                    Arc::clone(&self.config),
                ),
                store: Arc::clone(&store),
            }),
        ])?;

        let mut ctx = StageContext::new();
        executor.run(&mut session, &mut ctx, cancel).await?;

        let papers = ctx
            .get::<Vec<Paper>>(CTX_PAPERS)
            .cloned()
            .unwrap_or_default();
        let classifications = ctx
            .get::<BTreeMap<String, ClassificationResult>>(CTX_CLASSIFICATIONS)
            .cloned()
            .unwrap_or_default();
        let summaries = ctx
            .get::<Vec<SummaryRecord>>(CTX_SUMMARIES)
            .cloned()
            .unwrap_or_default();
        let syntheses = ctx
            .get::<Vec<SynthesisRecord>>(CTX_SYNTHESES)
            .cloned()
            .unwrap_or_default();
        let audio_artifacts = ctx
            .get::<Vec<AudioArtifact>>(CTX_AUDIO)
            .cloned()
            .unwrap_or_default();

        let counts = ProcessCounts {
            papers: papers.len(),
            summaries: summaries.len(),
            syntheses: syntheses.len(),
            audio_files: audio_artifacts.len(),
        };
        let errors = session.errors.clone();
        let session_id = session.id.clone();

        let results = SessionResults {
            session,
            papers,
            classifications,
            summaries,
            syntheses,
            audio_artifacts,
        };
        store.finalize(&results).await?;

        info!(
            session = %session_id,
            papers = counts.papers,
            summaries = counts.summaries,
            syntheses = counts.syntheses,
            audio_files = counts.audio_files,
            "session complete"
        );
        Ok(ProcessOutcome {
            session_id,
            counts,
            errors,
        })
    }
}
