//! Sequential execution of a plan's workers.
//!
//! Workers run strictly one at a time in plan order. Each call is bounded by
//! a deadline, its events are relayed to the caller while it runs, and its
//! output is checkpointed to the artifact and session stores before the next
//! worker starts. Persistence failures are logged and never end the run.

use super::plan::{
    CheckpointMarker, ExecutionPlan, PLAN_KEY, WorkerStatus, worker_artifact_name,
};
use super::worker::{AnalysisRequest, EventSink, Synthesizer, WorkerRegistry};
use crate::artifacts::{ArtifactContent, ArtifactScope, ArtifactStore};
use crate::clock::{Clock, SystemClock};
use crate::errors::PipelineError;
use crate::review::{WorkerKind, WorkerOutput, render_fallback_report};
use crate::session::{Event, Role, Session, SessionStore};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Author of executor-generated state events.
const EXECUTOR_AUTHOR: &str = "executor";
/// Author of synthesizer events.
pub const SYNTHESIZER_AUTHOR: &str = "synthesizer";

/// What to do when a worker fails or times out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Record a failed placeholder and keep going.
    #[default]
    ContinueOnError,
    /// Stop the pipeline at the first failure.
    AbortOnError,
}

impl std::fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ContinueOnError => write!(f, "continue_on_error"),
            Self::AbortOnError => write!(f, "abort_on_error"),
        }
    }
}

impl FromStr for FailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "continue_on_error" | "continue" => Ok(Self::ContinueOnError),
            "abort_on_error" | "abort" => Ok(Self::AbortOnError),
            other => Err(format!(
                "Unknown failure policy '{}'. Valid values: continue_on_error, abort_on_error",
                other
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    /// Delay between consecutive workers.
    pub pacing: Duration,
    /// Deadline for each worker and for the synthesizer.
    pub worker_timeout: Duration,
    pub failure_policy: FailurePolicy,
    /// Capacity of each collaborator's event channel.
    pub event_buffer: usize,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            pacing: Duration::from_millis(1000),
            worker_timeout: Duration::from_secs(300),
            failure_policy: FailurePolicy::default(),
            event_buffer: 64,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub plan: ExecutionPlan,
    /// One entry per selected worker, in plan order; failures are placeholders.
    pub outputs: Vec<WorkerOutput>,
    pub report: String,
    /// `false` when the report was rendered locally.
    pub synthesized: bool,
}

#[derive(Debug)]
enum CallError {
    Failed(anyhow::Error),
    TimedOut(Duration),
}

impl CallError {
    fn message(&self) -> String {
        match self {
            Self::Failed(e) => format!("{:#}", e),
            Self::TimedOut(limit) => format!("timed out after {}s", limit.as_secs()),
        }
    }

    fn into_pipeline_error(self, kind: WorkerKind) -> PipelineError {
        match self {
            Self::Failed(e) => PipelineError::WorkerFailed {
                worker: kind.worker_id().to_string(),
                message: format!("{:#}", e),
            },
            Self::TimedOut(limit) => PipelineError::WorkerTimedOut {
                worker: kind.worker_id().to_string(),
                secs: limit.as_secs(),
            },
        }
    }
}

/// Append `event` to the session journal and forward it to the caller.
///
/// Neither step can fail the run: a failed append is logged, and a caller
/// that stopped listening only loses the live stream.
pub(crate) async fn publish(
    sessions: &dyn SessionStore,
    session: &mut Session,
    event: Event,
    tx: &mpsc::Sender<Event>,
) {
    let event = match sessions.append_event(session, event.clone()).await {
        Ok(stamped) => stamped,
        Err(e) => {
            tracing::warn!(
                session_id = %session.id,
                author = %event.author,
                error = %e,
                "failed to persist event"
            );
            session
                .events()
                .last()
                .filter(|last| last.id == event.id)
                .cloned()
                .unwrap_or(event)
        }
    };
    if tx.send(event).await.is_err() {
        tracing::debug!(
            session_id = %session.id,
            "event consumer gone; continuing without live stream"
        );
    }
}

pub struct SequentialExecutor {
    workers: WorkerRegistry,
    synthesizer: Arc<dyn Synthesizer>,
    sessions: Arc<dyn SessionStore>,
    artifacts: Arc<dyn ArtifactStore>,
    clock: Arc<dyn Clock>,
    settings: ExecutorSettings,
}

impl SequentialExecutor {
    pub fn new(
        workers: WorkerRegistry,
        synthesizer: Arc<dyn Synthesizer>,
        sessions: Arc<dyn SessionStore>,
        artifacts: Arc<dyn ArtifactStore>,
        settings: ExecutorSettings,
    ) -> Self {
        Self {
            workers,
            synthesizer,
            sessions,
            artifacts,
            clock: Arc::new(SystemClock),
            settings,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn workers(&self) -> &WorkerRegistry {
        &self.workers
    }

    pub fn settings(&self) -> &ExecutorSettings {
        &self.settings
    }

    /// Run every selected worker, then synthesize.
    ///
    /// Returns an error only under [`FailurePolicy::AbortOnError`].
    pub async fn run(
        &self,
        session: &mut Session,
        mut plan: ExecutionPlan,
        request: &AnalysisRequest,
        tx: &mpsc::Sender<Event>,
    ) -> Result<ExecutionOutcome, PipelineError> {
        let scope = ArtifactScope::new(&session.application, &session.owner);
        let kinds = plan.selected_workers.clone();
        let mut outputs = Vec::with_capacity(kinds.len());

        for (idx, kind) in kinds.iter().copied().enumerate() {
            plan.set_status(kind, WorkerStatus::Running, self.clock.now());
            self.save_plan(session, &plan).await;
            tracing::info!(analysis_id = %plan.analysis_id, worker = %kind, "worker started");

            let (output, failure) = match self.invoke_worker(kind, session, request, tx).await {
                Ok(output) => (output, None),
                Err(err) => {
                    tracing::warn!(
                        analysis_id = %plan.analysis_id,
                        worker = %kind,
                        error = %err.message(),
                        "worker failed"
                    );
                    (WorkerOutput::failed(kind, err.message()), Some(err))
                }
            };

            let status = if failure.is_none() {
                WorkerStatus::Completed
            } else {
                WorkerStatus::Failed
            };
            plan.set_status(kind, status, self.clock.now());
            let artifact = self.save_output(&scope, &plan.analysis_id, &output).await;
            if let Some(name) = &artifact {
                plan.record_artifact(kind.worker_id(), name.clone());
            }
            self.checkpoint(session, &plan, kind, status, artifact, output.error.clone())
                .await;
            tracing::info!(
                analysis_id = %plan.analysis_id,
                worker = %kind,
                %status,
                "worker finished"
            );

            if let Some(err) = failure {
                let notice = Event::text(
                    kind.worker_id(),
                    Role::System,
                    format!("{} analysis failed: {}", kind.display_name(), err.message()),
                );
                publish(self.sessions.as_ref(), session, notice, tx).await;
                if self.settings.failure_policy == FailurePolicy::AbortOnError {
                    return Err(err.into_pipeline_error(kind));
                }
            }
            outputs.push(output);

            if idx + 1 < kinds.len() && !self.settings.pacing.is_zero() {
                tracing::debug!(
                    pacing_ms = self.settings.pacing.as_millis() as u64,
                    "pacing before next worker"
                );
                tokio::time::sleep(self.settings.pacing).await;
            }
        }

        let (report, synthesized) = self.synthesize(session, request, &outputs, tx).await;
        Ok(ExecutionOutcome {
            plan,
            outputs,
            report,
            synthesized,
        })
    }

    /// Drive a collaborator call under the deadline while relaying its events.
    async fn relay_call<T, F>(
        &self,
        call: F,
        mut rx: mpsc::Receiver<Event>,
        session: &mut Session,
        tx: &mpsc::Sender<Event>,
    ) -> Result<T, CallError>
    where
        F: Future<Output = anyhow::Result<T>>,
    {
        let limit = self.settings.worker_timeout;
        let sessions = self.sessions.as_ref();
        let call = async move { tokio::time::timeout(limit, call).await };
        let relay = async {
            while let Some(event) = rx.recv().await {
                publish(sessions, session, event, tx).await;
            }
        };
        let (result, ()) = tokio::join!(call, relay);
        match result {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(CallError::Failed(e)),
            Err(_) => Err(CallError::TimedOut(limit)),
        }
    }

    async fn invoke_worker(
        &self,
        kind: WorkerKind,
        session: &mut Session,
        request: &AnalysisRequest,
        tx: &mpsc::Sender<Event>,
    ) -> Result<WorkerOutput, CallError> {
        let worker = self.workers.get(kind).ok_or_else(|| {
            CallError::Failed(anyhow::anyhow!("no worker registered for {}", kind))
        })?;

        let mut request = request.clone();
        request.state = session.state().clone();
        let (sink, rx) = EventSink::channel(kind.worker_id(), self.settings.event_buffer);
        let value = self
            .relay_call(worker.analyze(&request, sink), rx, session, tx)
            .await?;

        let mut delta = Map::new();
        delta.insert(kind.output_key().to_string(), value);
        if let Err(e) = self
            .sessions
            .update_state(session, kind.worker_id(), delta)
            .await
        {
            tracing::warn!(
                analysis_id = %request.analysis_id,
                worker = %kind,
                key = kind.output_key(),
                error = %e,
                "failed to persist worker output to session"
            );
        }

        WorkerOutput::from_state(kind, session.get_state(kind.output_key()))
            .map_err(|e| CallError::Failed(e.into()))
    }

    async fn synthesize(
        &self,
        session: &mut Session,
        request: &AnalysisRequest,
        outputs: &[WorkerOutput],
        tx: &mpsc::Sender<Event>,
    ) -> (String, bool) {
        let mut request = request.clone();
        request.state = session.state().clone();
        let (sink, rx) = EventSink::channel(SYNTHESIZER_AUTHOR, self.settings.event_buffer);
        let result = self
            .relay_call(
                self.synthesizer.synthesize(&request, outputs, sink),
                rx,
                session,
                tx,
            )
            .await;

        match result {
            Ok(text) if !text.trim().is_empty() => (text, true),
            Ok(_) => {
                tracing::info!(
                    analysis_id = %request.analysis_id,
                    "synthesizer returned nothing; rendering fallback report"
                );
                (render_fallback_report(&request.analysis_id, outputs), false)
            }
            Err(e) => {
                tracing::warn!(
                    analysis_id = %request.analysis_id,
                    error = %e.message(),
                    "synthesis failed; rendering fallback report"
                );
                (render_fallback_report(&request.analysis_id, outputs), false)
            }
        }
    }

    async fn save_output(
        &self,
        scope: &ArtifactScope,
        analysis_id: &str,
        output: &WorkerOutput,
    ) -> Option<String> {
        let name = worker_artifact_name(analysis_id, output.worker);
        let body = match serde_json::to_string_pretty(output) {
            Ok(body) => body,
            Err(e) => {
                tracing::warn!(
                    analysis_id,
                    worker = %output.worker,
                    error = %e,
                    "failed to encode worker output"
                );
                return None;
            }
        };
        let mut custom = Map::new();
        custom.insert("analysis_id".to_string(), json!(analysis_id));
        custom.insert("worker_id".to_string(), json!(output.worker.worker_id()));
        custom.insert("status".to_string(), json!(output.status.to_string()));

        match self
            .artifacts
            .save(scope, &name, ArtifactContent::Text(body), custom)
            .await
        {
            Ok(_) => Some(name),
            Err(e) => {
                tracing::warn!(
                    analysis_id,
                    worker = %output.worker,
                    artifact = %name,
                    error = %e,
                    "failed to save worker artifact"
                );
                None
            }
        }
    }

    async fn checkpoint(
        &self,
        session: &mut Session,
        plan: &ExecutionPlan,
        kind: WorkerKind,
        status: WorkerStatus,
        artifact: Option<String>,
        error: Option<String>,
    ) {
        let marker = CheckpointMarker {
            timestamp: self.clock.now(),
            analysis_id: plan.analysis_id.clone(),
            worker_id: kind.worker_id().to_string(),
            status,
            artifact,
            error,
        };
        let mut delta = Map::new();
        delta.insert(
            kind.checkpoint_key(),
            serde_json::to_value(&marker).unwrap_or(Value::Null),
        );
        delta.insert(PLAN_KEY.to_string(), plan.to_value());
        if let Err(e) = self
            .sessions
            .update_state(session, EXECUTOR_AUTHOR, delta)
            .await
        {
            tracing::warn!(
                analysis_id = %plan.analysis_id,
                worker = %kind,
                key = %kind.checkpoint_key(),
                error = %e,
                "failed to write checkpoint"
            );
        }
    }

    async fn save_plan(&self, session: &mut Session, plan: &ExecutionPlan) {
        let mut delta = Map::new();
        delta.insert(PLAN_KEY.to_string(), plan.to_value());
        if let Err(e) = self
            .sessions
            .update_state(session, EXECUTOR_AUTHOR, delta)
            .await
        {
            tracing::warn!(
                analysis_id = %plan.analysis_id,
                key = PLAN_KEY,
                error = %e,
                "failed to save execution plan"
            );
        }
    }
}
