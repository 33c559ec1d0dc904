//! Pipeline configuration.
//!
//! Uses `figment` for layered loading: defaults -> `papercast.toml` ->
//! `PAPERCAST_`-prefixed environment variables.

use crate::error::PapercastError;
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Which papers feed a topic's synthesis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SynthesisScope {
    /// Papers whose primary topic matches the synthesis topic.
    Primary,
    /// Papers whose primary or any secondary topic matches.
    PrimaryAndSecondary,
}

/// Tunables for one pipeline instance. Shared read-only across sessions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Root directory under which per-session results live.
    pub result_root: PathBuf,
    /// Score above which a non-primary topic counts as secondary
    /// (strict comparison).
    pub secondary_threshold: f64,
    /// Character window handed to the summarization capability.
    pub summary_input_max_chars: usize,
    /// Minimum summary length requested from the capability. Output may
    /// still be shorter when the source text itself is shorter.
    pub summary_min_chars: usize,
    /// Hard cap on summary length; longer capability output is truncated.
    pub summary_max_chars: usize,
    /// Character bound on text handed to the audio renderer.
    pub audio_input_max_chars: usize,
    /// Timeout for a single ingestion channel call.
    pub channel_timeout_secs: u64,
    /// Timeout for one capability call (scoring, generation, rendering).
    pub capability_timeout_secs: u64,
    /// Bounded worker pool size for per-item fan-out within a stage.
    pub max_concurrency: usize,
    /// Which papers feed each topic synthesis.
    pub synthesis_scope: SynthesisScope,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            result_root: PathBuf::from("results"),
            secondary_threshold: 0.5,
            summary_input_max_chars: 1024,
            summary_min_chars: 50,
            summary_max_chars: 2000,
            audio_input_max_chars: 5000,
            channel_timeout_secs: 30,
            capability_timeout_secs: 60,
            max_concurrency: 4,
            synthesis_scope: SynthesisScope::Primary,
        }
    }
}

impl PipelineConfig {
    /// Load configuration from defaults, `papercast.toml`, and environment.
    pub fn load() -> Result<Self, PapercastError> {
        Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file("papercast.toml"))
            .merge(Env::prefixed("PAPERCAST_").split("__"))
            .extract()
            .map_err(|e| PapercastError::Config(e.to_string()))
    }
}
