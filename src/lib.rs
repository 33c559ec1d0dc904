//! papercast: a research-paper digest pipeline.
//!
//! One session takes a query plus optional PDFs, URLs, and DOIs, and turns
//! them into a deduplicated paper corpus, per-topic classifications,
//! per-paper summaries, cross-paper syntheses, and rendered audio, all
//! persisted under a session-scoped result directory.
//!
//! External capabilities (search, extraction, DOI resolution, scoring,
//! generation, text-to-speech) plug in through the traits in
//! [`capabilities`]; the crate ships mock implementations so the whole
//! pipeline runs offline.
//!
//! ```no_run
//! use papercast::{CapabilityRegistry, PaperPipeline, PipelineConfig, SessionInputs};
//!
//! # async fn run() -> Result<(), papercast::PapercastError> {
//! let pipeline = PaperPipeline::new(PipelineConfig::load()?, CapabilityRegistry::mock());
//! let outcome = pipeline
//!     .process_query(SessionInputs {
//!         query: "efficient transformers".into(),
//!         topics: vec!["NLP".into(), "Efficiency".into()],
//!         max_results: 10,
//!         ..Default::default()
//!     })
//!     .await?;
//! println!("session {} produced {} papers", outcome.session_id, outcome.counts.papers);
//! # Ok(())
//! # }
//! ```

pub mod audio;
pub mod capabilities;
pub mod citation;
pub mod classify;
pub mod config;
pub mod error;
pub mod executor;
pub mod ingest;
pub mod pipeline;
pub mod session;
pub mod store;
pub mod summarize;
pub mod synthesize;
pub mod text;
pub mod types;

pub use capabilities::{CapabilityRegistry, SortKey};
pub use config::{PipelineConfig, SynthesisScope};
pub use error::{CapabilityError, ErrorEntry, ErrorKind, PapercastError, Result, StageError};
pub use executor::{PipelineExecutor, Stage, StageContext};
pub use pipeline::{PaperPipeline, ProcessCounts, ProcessOutcome};
pub use session::{Session, SessionInputs, StageStatus};
pub use store::{SessionResults, SessionStore};
pub use types::{
    AudioArtifact, AudioKind, ClassificationResult, Paper, RawPaperRecord, SourceChannel,
    SummaryRecord, SynthesisRecord,
};
