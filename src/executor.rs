//! Dependency-ordered stage execution.
//!
//! Stages declare their ids and upstream dependencies; the executor
//! validates the graph once at construction (duplicates, unknown
//! dependencies, cycles) and then runs stages sequentially in declaration
//! order, each only after all of its dependencies completed. A failed
//! stage skips its transitive dependents; a fatal failure or cancellation
//! stops the session.

use crate::error::{PapercastError, StageError};
use crate::session::{Session, StageStatus};
use async_trait::async_trait;
use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Typed blackboard for passing stage outputs downstream. Values are
/// inserted by the producing stage and read back by type plus key.
#[derive(Default)]
pub struct StageContext {
    values: HashMap<String, Arc<dyn Any + Send + Sync>>,
}

impl StageContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<T: Any + Send + Sync>(&mut self, key: &str, value: T) {
        self.values.insert(key.to_string(), Arc::new(value));
    }

    pub fn get<T: Any + Send + Sync>(&self, key: &str) -> Option<&T> {
        self.values.get(key).and_then(|v| v.downcast_ref::<T>())
    }

    /// Like [`get`](Self::get) but a missing or mistyped value is a stage
    /// failure, for dependencies the graph guarantees were produced.
    pub fn require<T: Any + Send + Sync>(&self, key: &str) -> Result<&T, StageError> {
        self.get(key)
            .ok_or_else(|| StageError::Failed(format!("missing stage output: {key}")))
    }
}

/// One unit of pipeline work.
#[async_trait]
pub trait Stage: Send + Sync {
    fn id(&self) -> &str;

    /// Ids of stages that must complete before this one runs.
    fn depends_on(&self) -> Vec<String> {
        Vec::new()
    }

    async fn run(
        &self,
        session: &mut Session,
        ctx: &mut StageContext,
    ) -> Result<(), StageError>;
}

pub struct PipelineExecutor {
    stages: Vec<Arc<dyn Stage>>,
}

impl fmt::Debug for PipelineExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ids: Vec<&str> = self.stages.iter().map(|s| s.id()).collect();
        f.debug_struct("PipelineExecutor")
            .field("stages", &ids)
            .finish()
    }
}

impl PipelineExecutor {
    /// Validate the stage graph. Fails on duplicate ids, dependencies on
    /// unknown stages, and cycles.
    pub fn new(stages: Vec<Arc<dyn Stage>>) -> Result<Self, PapercastError> {
        let mut ids = HashSet::new();
        for stage in &stages {
            if !ids.insert(stage.id().to_string()) {
                return Err(PapercastError::DuplicateStage(stage.id().to_string()));
            }
        }
        for stage in &stages {
            for dep in stage.depends_on() {
                if !ids.contains(&dep) {
                    return Err(PapercastError::UnknownDependency {
                        stage: stage.id().to_string(),
                        dependency: dep,
                    });
                }
            }
        }
        let stages = topological_order(stages)?;
        Ok(Self { stages })
    }

    /// Run every stage for one session. Returns `Ok` for completed,
    /// partially-failed, and cancelled sessions alike; only a fatal stage
    /// error surfaces as `Err`.
    pub async fn run(
        &self,
        session: &mut Session,
        ctx: &mut StageContext,
        cancel: &CancellationToken,
    ) -> Result<(), PapercastError> {
        for stage in &self.stages {
            session.set_status(stage.id(), StageStatus::Pending);
        }

        let mut done: HashSet<String> = HashSet::new();

        for stage in &self.stages {
            let id = stage.id().to_string();

            if cancel.is_cancelled() {
                info!(session = %session.id, stage = %id, "cancelled, skipping remaining stages");
                skip_remaining(session, &self.stages, &done);
                return Ok(());
            }

            let blocked = stage
                .depends_on()
                .iter()
                .any(|dep| !done.contains(dep));
            if blocked {
                warn!(session = %session.id, stage = %id, "dependency failed, skipping");
                session.set_status(&id, StageStatus::Skipped);
                continue;
            }

            session.set_status(&id, StageStatus::Running);
            info!(session = %session.id, stage = %id, "stage starting");
            match stage.run(session, ctx).await {
                Ok(()) => {
                    session.set_status(&id, StageStatus::Done);
                    info!(session = %session.id, stage = %id, "stage done");
                    done.insert(id);
                }
                Err(StageError::Failed(message)) => {
                    warn!(session = %session.id, stage = %id, error = %message, "stage failed");
                    session.set_status(&id, StageStatus::Failed);
                }
                Err(StageError::Fatal(message)) => {
                    warn!(session = %session.id, stage = %id, error = %message, "fatal stage error");
                    session.set_status(&id, StageStatus::Failed);
                    skip_remaining(session, &self.stages, &done);
                    return Err(PapercastError::SessionFatal(message));
                }
            }
        }
        Ok(())
    }
}

/// Mark every stage that has not finished as skipped.
fn skip_remaining(session: &mut Session, stages: &[Arc<dyn Stage>], done: &HashSet<String>) {
    for stage in stages {
        let id = stage.id();
        let untouched = matches!(
            session.status(id),
            Some(StageStatus::Pending) | Some(StageStatus::Running) | None
        );
        if untouched && !done.contains(id) {
            session.set_status(id, StageStatus::Skipped);
        }
    }
}

/// Stable topological sort: repeatedly take the first stage in declaration
/// order whose dependencies are all placed. Leftover stages form a cycle.
fn topological_order(
    stages: Vec<Arc<dyn Stage>>,
) -> Result<Vec<Arc<dyn Stage>>, PapercastError> {
    let mut remaining = stages;
    let mut ordered: Vec<Arc<dyn Stage>> = Vec::with_capacity(remaining.len());
    let mut placed: HashSet<String> = HashSet::new();

    while !remaining.is_empty() {
        let next = remaining.iter().position(|stage| {
            stage.depends_on().iter().all(|dep| placed.contains(dep))
        });
        match next {
            Some(i) => {
                let stage = remaining.remove(i);
                placed.insert(stage.id().to_string());
                ordered.push(stage);
            }
            None => {
                let mut cyclic: Vec<String> =
                    remaining.iter().map(|s| s.id().to_string()).collect();
                cyclic.sort();
                return Err(PapercastError::DependencyCycle { stages: cyclic });
            }
        }
    }
    Ok(ordered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionInputs;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;
    use tempfile::TempDir;

    struct RecordingStage {
        id: String,
        deps: Vec<String>,
        log: Arc<Mutex<Vec<String>>>,
        outcome: Option<StageError>,
    }

    impl RecordingStage {
        fn ok(id: &str, deps: &[&str], log: Arc<Mutex<Vec<String>>>) -> Arc<dyn Stage> {
            Arc::new(Self {
                id: id.to_string(),
                deps: deps.iter().map(|s| s.to_string()).collect(),
                log,
                outcome: None,
            })
        }

        fn failing(id: &str, deps: &[&str], log: Arc<Mutex<Vec<String>>>) -> Arc<dyn Stage> {
            Arc::new(Self {
                id: id.to_string(),
                deps: deps.iter().map(|s| s.to_string()).collect(),
                log,
                outcome: Some(StageError::Failed("boom".into())),
            })
        }

        fn fatal(id: &str, deps: &[&str], log: Arc<Mutex<Vec<String>>>) -> Arc<dyn Stage> {
            Arc::new(Self {
                id: id.to_string(),
                deps: deps.iter().map(|s| s.to_string()).collect(),
                log,
                outcome: Some(StageError::Fatal("cannot continue".into())),
            })
        }
    }

    #[async_trait]
    impl Stage for RecordingStage {
        fn id(&self) -> &str {
            &self.id
        }

        fn depends_on(&self) -> Vec<String> {
            self.deps.clone()
        }

        async fn run(
            &self,
            _session: &mut Session,
            _ctx: &mut StageContext,
        ) -> Result<(), StageError> {
            self.log.lock().unwrap().push(self.id.clone());
            match &self.outcome {
                None => Ok(()),
                Some(StageError::Failed(m)) => Err(StageError::Failed(m.clone())),
                Some(StageError::Fatal(m)) => Err(StageError::Fatal(m.clone())),
            }
        }
    }

    fn session(dir: &TempDir) -> Session {
        Session::create(SessionInputs::default(), dir.path()).unwrap()
    }

    #[tokio::test]
    async fn test_runs_in_dependency_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let executor = PipelineExecutor::new(vec![
            RecordingStage::ok("a", &[], Arc::clone(&log)),
            RecordingStage::ok("b", &["a"], Arc::clone(&log)),
            RecordingStage::ok("c", &["a", "b"], Arc::clone(&log)),
        ])
        .unwrap();

        let dir = TempDir::new().unwrap();
        let mut session = session(&dir);
        let mut ctx = StageContext::new();
        executor
            .run(&mut session, &mut ctx, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(*log.lock().unwrap(), vec!["a", "b", "c"]);
        for id in ["a", "b", "c"] {
            assert_eq!(session.status(id), Some(StageStatus::Done));
        }
    }

    #[tokio::test]
    async fn test_failure_cascades_to_transitive_dependents() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let executor = PipelineExecutor::new(vec![
            RecordingStage::ok("a", &[], Arc::clone(&log)),
            RecordingStage::failing("b", &["a"], Arc::clone(&log)),
            RecordingStage::ok("c", &["b"], Arc::clone(&log)),
            RecordingStage::ok("d", &["c"], Arc::clone(&log)),
            RecordingStage::ok("e", &["a"], Arc::clone(&log)),
        ])
        .unwrap();

        let dir = TempDir::new().unwrap();
        let mut session = session(&dir);
        let mut ctx = StageContext::new();
        executor
            .run(&mut session, &mut ctx, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(session.status("a"), Some(StageStatus::Done));
        assert_eq!(session.status("b"), Some(StageStatus::Failed));
        assert_eq!(session.status("c"), Some(StageStatus::Skipped));
        assert_eq!(session.status("d"), Some(StageStatus::Skipped));
        // Independent branch still runs.
        assert_eq!(session.status("e"), Some(StageStatus::Done));
        assert_eq!(*log.lock().unwrap(), vec!["a", "b", "e"]);
    }

    #[tokio::test]
    async fn test_fatal_stops_session() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let executor = PipelineExecutor::new(vec![
            RecordingStage::fatal("a", &[], Arc::clone(&log)),
            RecordingStage::ok("b", &[], Arc::clone(&log)),
        ])
        .unwrap();

        let dir = TempDir::new().unwrap();
        let mut session = session(&dir);
        let mut ctx = StageContext::new();
        let err = executor
            .run(&mut session, &mut ctx, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, PapercastError::SessionFatal(_)));
        assert_eq!(session.status("a"), Some(StageStatus::Failed));
        assert_eq!(session.status("b"), Some(StageStatus::Skipped));
    }

    #[tokio::test]
    async fn test_cancellation_skips_remaining() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let executor = PipelineExecutor::new(vec![
            RecordingStage::ok("a", &[], Arc::clone(&log)),
            RecordingStage::ok("b", &["a"], Arc::clone(&log)),
        ])
        .unwrap();

        let dir = TempDir::new().unwrap();
        let mut session = session(&dir);
        let mut ctx = StageContext::new();
        let cancel = CancellationToken::new();
        cancel.cancel();
        executor.run(&mut session, &mut ctx, &cancel).await.unwrap();

        assert!(log.lock().unwrap().is_empty());
        assert_eq!(session.status("a"), Some(StageStatus::Skipped));
        assert_eq!(session.status("b"), Some(StageStatus::Skipped));
    }

    #[tokio::test]
    async fn test_debug_lists_stage_ids() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let executor = PipelineExecutor::new(vec![
            RecordingStage::ok("a", &[], Arc::clone(&log)),
            RecordingStage::ok("b", &["a"], Arc::clone(&log)),
        ])
        .unwrap();
        let rendered = format!("{executor:?}");
        assert!(rendered.contains("\"a\""));
        assert!(rendered.contains("\"b\""));
    }

    #[tokio::test]
    async fn test_duplicate_stage_rejected() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let err = PipelineExecutor::new(vec![
            RecordingStage::ok("a", &[], Arc::clone(&log)),
            RecordingStage::ok("a", &[], Arc::clone(&log)),
        ])
        .unwrap_err();
        assert!(matches!(err, PapercastError::DuplicateStage(_)));
    }

    #[tokio::test]
    async fn test_unknown_dependency_rejected() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let err = PipelineExecutor::new(vec![RecordingStage::ok(
            "a",
            &["ghost"],
            Arc::clone(&log),
        )])
        .unwrap_err();
        assert!(matches!(err, PapercastError::UnknownDependency { .. }));
    }

    #[tokio::test]
    async fn test_cycle_rejected() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let err = PipelineExecutor::new(vec![
            RecordingStage::ok("a", &["b"], Arc::clone(&log)),
            RecordingStage::ok("b", &["a"], Arc::clone(&log)),
        ])
        .unwrap_err();
        assert!(matches!(err, PapercastError::DependencyCycle { .. }));
    }

    #[tokio::test]
    async fn test_executor_reusable_across_sessions() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let executor = PipelineExecutor::new(vec![
            RecordingStage::ok("a", &[], Arc::clone(&log)),
            RecordingStage::ok("b", &["a"], Arc::clone(&log)),
        ])
        .unwrap();

        let dir = TempDir::new().unwrap();
        for _ in 0..2 {
            let mut session = session(&dir);
            let mut ctx = StageContext::new();
            executor
                .run(&mut session, &mut ctx, &CancellationToken::new())
                .await
                .unwrap();
        }
        assert_eq!(*log.lock().unwrap(), vec!["a", "b", "a", "b"]);
    }

    #[tokio::test]
    async fn test_context_passes_typed_values() {
        struct Producer;
        struct Consumer {
            seen: Arc<Mutex<Option<usize>>>,
        }

        #[async_trait]
        impl Stage for Producer {
            fn id(&self) -> &str {
                "producer"
            }
            async fn run(
                &self,
                _session: &mut Session,
                ctx: &mut StageContext,
            ) -> Result<(), StageError> {
                ctx.insert("count", 7usize);
                Ok(())
            }
        }

        #[async_trait]
        impl Stage for Consumer {
            fn id(&self) -> &str {
                "consumer"
            }
            fn depends_on(&self) -> Vec<String> {
                vec!["producer".to_string()]
            }
            async fn run(
                &self,
                _session: &mut Session,
                ctx: &mut StageContext,
            ) -> Result<(), StageError> {
                let count: &usize = ctx.require("count")?;
                *self.seen.lock().unwrap() = Some(*count);
                Ok(())
            }
        }

        let seen = Arc::new(Mutex::new(None));
        let executor = PipelineExecutor::new(vec![
            Arc::new(Producer) as Arc<dyn Stage>,
            Arc::new(Consumer {
                seen: Arc::clone(&seen),
            }),
        ])
        .unwrap();

        let dir = TempDir::new().unwrap();
        let mut session = session(&dir);
        let mut ctx = StageContext::new();
        executor
            .run(&mut session, &mut ctx, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(*seen.lock().unwrap(), Some(7));
    }
}
