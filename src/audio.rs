//! Audio rendering coordination.
//!
//! Turns summaries and syntheses into spoken-delivery text, assigns each
//! artifact a collision-resistant file name under the session's audio
//! directory, and drives the rendering capability through a bounded pool.

use crate::capabilities::CapabilityRegistry;
use crate::config::PipelineConfig;
use crate::error::{ErrorEntry, ErrorKind, StageError};
use crate::text::{truncate_chars, SpeechFormatter};
use crate::types::{AudioArtifact, AudioKind};
use futures::StreamExt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};
use uuid::Uuid;

/// One piece of narrative queued for rendering.
#[derive(Debug, Clone)]
pub struct RenderRequest {
    pub kind: AudioKind,
    /// Paper id for summaries, topic for syntheses.
    pub associated_id: String,
    pub text: String,
}

#[derive(Debug, Default)]
pub struct RenderOutcome {
    pub artifacts: Vec<AudioArtifact>,
    pub errors: Vec<ErrorEntry>,
}

pub struct AudioCoordinator {
    registry: CapabilityRegistry,
    config: Arc<PipelineConfig>,
    formatter: SpeechFormatter,
}

impl AudioCoordinator {
    pub fn new(registry: CapabilityRegistry, config: Arc<PipelineConfig>) -> Self {
        Self {
            registry,
            config,
            formatter: SpeechFormatter::new(),
        }
    }

    /// Render every request into `audio_dir`. Failed renders are recorded
    /// and skipped; an all-failed batch with nonempty input fails the stage.
    pub async fn render_all(
        &self,
        requests: &[RenderRequest],
        audio_dir: &Path,
    ) -> Result<RenderOutcome, StageError> {
        let deadline = Duration::from_secs(self.config.capability_timeout_secs);

        // Futures are built eagerly so the pool iterates owned values.
        let jobs: Vec<_> = requests
            .iter()
            .map(|request| {
                let renderer = Arc::clone(&self.registry.audio);
                async move {
                    let spoken = self.formatter.format(&request.text);
                    let spoken = truncate_chars(&spoken, self.config.audio_input_max_chars);
                    if spoken.is_empty() {
                        debug!(item = %request.associated_id, "nothing to render");
                        return Ok(None);
                    }
                    let token = audio_token();
                    let path = audio_dir.join(format!("{token}.mp3"));
                    match timeout(deadline, renderer.render(spoken, &path)).await {
                        Ok(Ok(duration)) => Ok(Some(AudioArtifact {
                            id: token,
                            kind: request.kind,
                            associated_id: request.associated_id.clone(),
                            file_path: path,
                            duration_seconds: duration,
                        })),
                        Ok(Err(err)) => Err(ErrorEntry::new(
                            "render",
                            Some(request.associated_id.clone()),
                            ErrorKind::Render,
                            err.to_string(),
                        )),
                        Err(_) => Err(ErrorEntry::new(
                            "render",
                            Some(request.associated_id.clone()),
                            ErrorKind::Render,
                            format!(
                                "rendering timed out after {}s",
                                self.config.capability_timeout_secs
                            ),
                        )),
                    }
                }
            })
            .collect();
        let produced: Vec<Result<Option<AudioArtifact>, ErrorEntry>> =
            futures::stream::iter(jobs)
                .buffered(self.config.max_concurrency.max(1))
                .collect()
                .await;

        let mut outcome = RenderOutcome::default();
        for result in produced {
            match result {
                Ok(Some(artifact)) => outcome.artifacts.push(artifact),
                Ok(None) => {}
                Err(entry) => {
                    warn!(item = ?entry.item_id, error = %entry.message, "render failed");
                    outcome.errors.push(entry);
                }
            }
        }

        if outcome.artifacts.is_empty() && !outcome.errors.is_empty() {
            return Err(StageError::Failed(
                "audio rendering produced no artifacts".into(),
            ));
        }
        Ok(outcome)
    }
}

/// `audio_` plus the first 8 hex digits of a fresh UUID.
fn audio_token() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("audio_{}", &hex[..8])
}
