//! Top-level request flow.
//!
//! One [`Orchestrator::run`] call handles one user message: it loads or
//! creates the session, classifies the message, routes it, serves the result
//! from the cache when it can, and otherwise drives the
//! [`SequentialExecutor`] and records the outcome in every store.
//!
//! Only two branches are visible to the user as early terminations: a
//! classification failure (an error event) and missing content (a prompt).
//! Store failures are logged and the report is delivered regardless.

use super::classification::Classification;
use super::executor::{ExecutorSettings, SequentialExecutor, publish};
use super::plan::{
    AnalysisHistoryRecord, CachedAnalysis, ExecutionPlan, INPUT_REF, PLAN_KEY, REPORT_REF,
    input_artifact_name, report_artifact_name,
};
use super::router::{Route, Router};
use super::worker::{AnalysisRequest, Classifier, Synthesizer, WorkerRegistry};
use crate::artifacts::{ArtifactContent, ArtifactScope, ArtifactStore};
use crate::cache::ResultCache;
use crate::clock::{Clock, SystemClock};
use crate::errors::{PipelineError, StoreError};
use crate::review::{AnalysisMetrics, WorkerKind};
use crate::session::{
    Content, Event, HISTORY_KEY, Part, Role, Session, SessionStore, default_state_template,
};
use crate::util::first_fenced_block;
use serde_json::{Map, Value, json};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

pub const ORCHESTRATOR_AUTHOR: &str = "orchestrator";
pub const USER_AUTHOR: &str = "user";

const MISSING_CONTENT_PROMPT: &str = "Please share the code you'd like analysed, \
     ideally inside a fenced code block (```), along with what you want reviewed.";

/// One user message to process.
#[derive(Debug, Clone)]
pub struct AnalysisInput {
    pub application: String,
    pub owner: String,
    /// Continue this session; a new one is created when absent or unknown.
    pub session_id: Option<String>,
    pub message: String,
}

impl AnalysisInput {
    pub fn new(
        application: impl Into<String>,
        owner: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            application: application.into(),
            owner: owner.into(),
            session_id: None,
            message: message.into(),
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisSummary {
    pub analysis_id: String,
    pub request_type: String,
    pub selected_workers: Vec<WorkerKind>,
    pub failed_workers: Vec<WorkerKind>,
    pub report: String,
    pub metrics: AnalysisMetrics,
    pub artifact_refs: BTreeMap<String, String>,
    pub cached: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// Answered with the capability description.
    GeneralQuery,
    /// Asked the user for content.
    MissingContent,
    ClassificationFailed { reason: String },
    Completed(AnalysisSummary),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunResult {
    pub session_id: String,
    pub outcome: RunOutcome,
}

/// The analysed content: the first fenced block if there is a non-empty one,
/// else the whole message.
pub fn extract_content(message: &str) -> String {
    match first_fenced_block(message) {
        Some(block) if !block.trim().is_empty() => block.trim().to_string(),
        _ => message.trim().to_string(),
    }
}

pub struct Orchestrator {
    sessions: Arc<dyn SessionStore>,
    artifacts: Arc<dyn ArtifactStore>,
    cache: Option<Arc<ResultCache>>,
    classifier: Arc<dyn Classifier>,
    executor: SequentialExecutor,
    router: Router,
    clock: Arc<dyn Clock>,
    classify_timeout: Duration,
}

impl Orchestrator {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        artifacts: Arc<dyn ArtifactStore>,
        cache: Arc<ResultCache>,
        classifier: Arc<dyn Classifier>,
        synthesizer: Arc<dyn Synthesizer>,
        workers: WorkerRegistry,
        settings: ExecutorSettings,
    ) -> Self {
        let router = Router::for_kinds(&workers.kinds(), &HashMap::new());
        let classify_timeout = settings.worker_timeout;
        let executor = SequentialExecutor::new(
            workers,
            synthesizer,
            sessions.clone(),
            artifacts.clone(),
            settings,
        );
        Self {
            sessions,
            artifacts,
            cache: Some(cache),
            classifier,
            executor,
            router,
            clock: Arc::new(SystemClock),
            classify_timeout,
        }
    }

    /// Replace the default routing keywords per worker kind.
    pub fn with_keywords(mut self, overrides: &HashMap<WorkerKind, Vec<String>>) -> Self {
        self.router = Router::for_kinds(&self.executor.workers().kinds(), overrides);
        self
    }

    /// Never read or write the result cache.
    pub fn without_cache(mut self) -> Self {
        self.cache = None;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.executor = self.executor.with_clock(clock.clone());
        self.clock = clock;
        self
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Run the pipeline on a background task and stream its events.
    pub fn spawn(
        self: Arc<Self>,
        input: AnalysisInput,
        buffer: usize,
    ) -> (
        mpsc::Receiver<Event>,
        JoinHandle<Result<RunResult, PipelineError>>,
    ) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let handle = tokio::spawn(async move { self.run(input, tx).await });
        (rx, handle)
    }

    /// Process one message, sending every event to `tx` as it happens.
    ///
    /// `tx` is bounded: the receiving side must be drained concurrently. The
    /// last event sent is always terminal.
    pub async fn run(
        &self,
        input: AnalysisInput,
        tx: mpsc::Sender<Event>,
    ) -> Result<RunResult, PipelineError> {
        let mut session = self.open_session(&input).await?;
        tracing::info!(
            session_id = %session.id,
            application = %session.application,
            owner = %session.owner,
            "request received"
        );
        self.persist(
            &mut session,
            Event::text(USER_AUTHOR, Role::User, input.message.clone()),
        )
        .await;

        let decision = match self.classify(&input.message).await {
            Ok(decision) => decision,
            Err(e) => {
                let reason = e.to_string();
                tracing::warn!(session_id = %session.id, error = %reason, "classification failed");
                self.finish(
                    &mut session,
                    &tx,
                    format!(
                        "Sorry, I couldn't work out what you're asking for ({}). \
                         Please rephrase your request.",
                        reason
                    ),
                    None,
                )
                .await;
                return Ok(RunResult {
                    session_id: session.id,
                    outcome: RunOutcome::ClassificationFailed { reason },
                });
            }
        };
        tracing::info!(
            session_id = %session.id,
            request_type = %decision.request_type,
            has_content = decision.has_content,
            confidence = decision.confidence,
            "request classified"
        );

        // Routing is pure, so resolving it before the cache lookup changes nothing.
        let outcome = match self.router.route(&decision) {
            Route::GeneralQuery => {
                let text = self.capabilities();
                self.finish(&mut session, &tx, text, None).await;
                RunOutcome::GeneralQuery
            }
            Route::MissingContent => {
                self.finish(&mut session, &tx, MISSING_CONTENT_PROMPT.to_string(), None)
                    .await;
                RunOutcome::MissingContent
            }
            Route::Workers(kinds) => {
                let content = extract_content(&input.message);
                if content.is_empty() {
                    self.finish(&mut session, &tx, MISSING_CONTENT_PROMPT.to_string(), None)
                        .await;
                    RunOutcome::MissingContent
                } else {
                    let summary = self
                        .analyze(&mut session, &decision, kinds, content, &tx)
                        .await?;
                    RunOutcome::Completed(summary)
                }
            }
        };

        Ok(RunResult {
            session_id: session.id,
            outcome,
        })
    }

    async fn analyze(
        &self,
        session: &mut Session,
        decision: &Classification,
        kinds: Vec<WorkerKind>,
        content: String,
        tx: &mpsc::Sender<Event>,
    ) -> Result<AnalysisSummary, PipelineError> {
        let analysis_id = Uuid::new_v4().to_string();
        let request_type = decision.request_type.as_str();
        let scope = ArtifactScope::new(&session.application, &session.owner);
        tracing::info!(
            analysis_id = %analysis_id,
            request_type = %request_type,
            workers = ?kinds,
            "analysis started"
        );

        let input_ref = self.save_input(&scope, &analysis_id, &content).await;

        if let Some(cached) = self.cache_lookup(&content, &request_type).await {
            return Ok(self
                .replay_cached(session, analysis_id, cached, input_ref, tx)
                .await);
        }

        let plan = ExecutionPlan::new(&analysis_id, kinds.clone(), decision, self.clock.now());
        self.update_state(session, PLAN_KEY, plan.to_value(), &analysis_id)
            .await;
        let announcement = if kinds.is_empty() {
            "No analysis matched the requested focus areas.".to_string()
        } else {
            let names: Vec<&str> = kinds.iter().map(|k| k.display_name()).collect();
            format!("Running {}", names.join(", then "))
        };
        publish(
            self.sessions.as_ref(),
            session,
            Event::text(ORCHESTRATOR_AUTHOR, Role::Model, announcement),
            tx,
        )
        .await;

        let request = AnalysisRequest {
            analysis_id: analysis_id.clone(),
            request_type: request_type.clone(),
            content: content.clone(),
            focus_areas: decision.focus_areas.clone(),
            state: Map::new(),
        };
        let outcome = match self.executor.run(session, plan, &request, tx).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(analysis_id = %analysis_id, error = %e, "analysis aborted");
                self.finish(
                    session,
                    tx,
                    format!("Analysis {} stopped: {}", analysis_id, e),
                    None,
                )
                .await;
                return Err(e);
            }
        };

        let mut artifact_refs = outcome.plan.artifact_refs.clone();
        if let Some(name) = input_ref {
            artifact_refs.insert(INPUT_REF.to_string(), name);
        }
        if let Some(name) = self.save_report(&scope, &analysis_id, &outcome.report).await {
            artifact_refs.insert(REPORT_REF.to_string(), name);
        }

        let metrics = AnalysisMetrics::from_outputs(&outcome.outputs);
        let failed_workers: Vec<WorkerKind> = outcome
            .outputs
            .iter()
            .filter(|o| !o.is_completed())
            .map(|o| o.worker)
            .collect();

        let record = AnalysisHistoryRecord {
            analysis_id: analysis_id.clone(),
            timestamp: self.clock.now(),
            request_type: request_type.clone(),
            selected_workers: kinds.clone(),
            metrics: metrics.clone(),
            artifact_refs: artifact_refs.clone(),
            cached: false,
            source_analysis_id: None,
        };
        self.append_history(session, &record).await;

        if let Some(cache) = &self.cache
            && failed_workers.is_empty()
        {
            let payload = CachedAnalysis {
                analysis_id: analysis_id.clone(),
                request_type: request_type.clone(),
                selected_workers: kinds.clone(),
                report: outcome.report.clone(),
                metrics: metrics.clone(),
                artifact_refs: artifact_refs.clone(),
                created_at: self.clock.now(),
            };
            match serde_json::to_value(&payload) {
                Ok(value) => {
                    if let Err(e) = cache.set(&content, &request_type, value).await {
                        tracing::warn!(
                            analysis_id = %analysis_id,
                            error = %e,
                            "failed to write result cache"
                        );
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        analysis_id = %analysis_id,
                        error = %e,
                        "failed to encode cache payload"
                    )
                }
            }
        } else if !failed_workers.is_empty() {
            tracing::info!(
                analysis_id = %analysis_id,
                failed = ?failed_workers,
                "not caching a partially failed analysis"
            );
        }

        let summary = AnalysisSummary {
            analysis_id,
            request_type,
            selected_workers: kinds,
            failed_workers,
            report: outcome.report,
            metrics,
            artifact_refs,
            cached: false,
        };
        self.finish_with_summary(session, tx, &summary).await;
        tracing::info!(
            analysis_id = %summary.analysis_id,
            total_issues = summary.metrics.total_issues,
            synthesized = outcome.synthesized,
            "analysis completed"
        );
        Ok(summary)
    }

    async fn replay_cached(
        &self,
        session: &mut Session,
        analysis_id: String,
        cached: CachedAnalysis,
        input_ref: Option<String>,
        tx: &mpsc::Sender<Event>,
    ) -> AnalysisSummary {
        tracing::info!(
            analysis_id = %analysis_id,
            source_analysis_id = %cached.analysis_id,
            "serving analysis from cache"
        );
        let mut artifact_refs = cached.artifact_refs;
        if let Some(name) = input_ref {
            artifact_refs.insert(INPUT_REF.to_string(), name);
        }
        let record = AnalysisHistoryRecord {
            analysis_id: analysis_id.clone(),
            timestamp: self.clock.now(),
            request_type: cached.request_type.clone(),
            selected_workers: cached.selected_workers.clone(),
            metrics: cached.metrics.clone(),
            artifact_refs: artifact_refs.clone(),
            cached: true,
            source_analysis_id: Some(cached.analysis_id),
        };
        self.append_history(session, &record).await;

        let summary = AnalysisSummary {
            analysis_id,
            request_type: cached.request_type,
            selected_workers: cached.selected_workers,
            failed_workers: Vec::new(),
            report: cached.report,
            metrics: cached.metrics,
            artifact_refs,
            cached: true,
        };
        self.finish_with_summary(session, tx, &summary).await;
        summary
    }

    async fn classify(&self, message: &str) -> Result<Classification, PipelineError> {
        let call = self.classifier.classify(message);
        let raw = match tokio::time::timeout(self.classify_timeout, call).await {
            Ok(Ok(raw)) => raw,
            Ok(Err(e)) => return Err(PipelineError::Classification(format!("{:#}", e))),
            Err(_) => {
                return Err(PipelineError::Classification(format!(
                    "classifier timed out after {}s",
                    self.classify_timeout.as_secs()
                )));
            }
        };
        Classification::parse(&raw)
    }

    /// Load the requested session, or create one.
    ///
    /// An unknown id is created under that id. A session that exists but
    /// cannot be read is left alone and the request moves to a fresh id; if
    /// the store cannot create anything it continues on an unsaved in-memory
    /// session, also under a fresh id.
    async fn open_session(&self, input: &AnalysisInput) -> Result<Session, PipelineError> {
        let mut requested = input.session_id.as_deref();
        if let Some(id) = requested {
            match self.sessions.get(&input.application, &input.owner, id).await {
                Ok(Some(session)) => return Ok(session),
                Ok(None) => {}
                Err(e @ StoreError::InvalidName { .. }) => return Err(e.into()),
                Err(e) => {
                    tracing::warn!(
                        session_id = %id,
                        error = %e,
                        "failed to load session; starting a new one"
                    );
                    requested = None;
                }
            }
        }

        match self
            .sessions
            .create(&input.application, &input.owner, requested)
            .await
        {
            Ok(session) => Ok(session),
            Err(e @ StoreError::InvalidName { .. }) => Err(e.into()),
            Err(e) => {
                tracing::warn!(
                    application = %input.application,
                    owner = %input.owner,
                    error = %e,
                    "session store unavailable; continuing with an unsaved session"
                );
                Ok(Session::new(
                    Uuid::new_v4().to_string(),
                    &input.application,
                    &input.owner,
                    default_state_template(),
                    self.clock.now(),
                ))
            }
        }
    }

    fn capabilities(&self) -> String {
        let names: Vec<&str> = self
            .router
            .profiles()
            .iter()
            .map(|p| p.kind.display_name())
            .collect();
        let available = if names.is_empty() {
            "no analysis workers are currently registered".to_string()
        } else {
            names.join(", ")
        };
        format!(
            "I review code by running specialised analyses one after another: {}. \
             Paste your code (ideally in a fenced block) and ask for a full review, \
             a single area such as a security review, or a review focused on the \
             concerns you care about.",
            available
        )
    }

    async fn cache_lookup(&self, content: &str, request_type: &str) -> Option<CachedAnalysis> {
        let value = self.cache.as_ref()?.get(content, request_type).await?;
        match serde_json::from_value(value) {
            Ok(cached) => Some(cached),
            Err(e) => {
                tracing::warn!(
                    request_type,
                    error = %e,
                    "unusable cache payload; treating as miss"
                );
                None
            }
        }
    }

    async fn save_input(
        &self,
        scope: &ArtifactScope,
        analysis_id: &str,
        content: &str,
    ) -> Option<String> {
        let name = input_artifact_name(analysis_id);
        let mut custom = Map::new();
        custom.insert("analysis_id".to_string(), json!(analysis_id));
        match self
            .artifacts
            .save(scope, &name, ArtifactContent::from(content), custom)
            .await
        {
            Ok(_) => Some(name),
            Err(e) => {
                tracing::warn!(
                    analysis_id,
                    artifact = %name,
                    error = %e,
                    "failed to save input artifact"
                );
                None
            }
        }
    }

    async fn save_report(
        &self,
        scope: &ArtifactScope,
        analysis_id: &str,
        report: &str,
    ) -> Option<String> {
        let name = report_artifact_name(analysis_id);
        let mut custom = Map::new();
        custom.insert("analysis_id".to_string(), json!(analysis_id));
        match self
            .artifacts
            .save(scope, &name, ArtifactContent::from(report), custom)
            .await
        {
            Ok(_) => Some(name),
            Err(e) => {
                tracing::warn!(
                    analysis_id,
                    artifact = %name,
                    error = %e,
                    "failed to save report artifact"
                );
                None
            }
        }
    }

    /// Push one record onto the history list; the journal carries only the record.
    async fn append_history(&self, session: &mut Session, record: &AnalysisHistoryRecord) {
        let value = match serde_json::to_value(record) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(
                    analysis_id = %record.analysis_id,
                    error = %e,
                    "failed to encode history record"
                );
                return;
            }
        };
        let event =
            Event::state_only(ORCHESTRATOR_AUTHOR, Map::new()).with_appended(HISTORY_KEY, value);
        if let Err(e) = self.sessions.append_event(session, event).await {
            tracing::warn!(
                analysis_id = %record.analysis_id,
                key = HISTORY_KEY,
                error = %e,
                "failed to update session state"
            );
        }
    }

    async fn update_state(
        &self,
        session: &mut Session,
        key: &str,
        value: Value,
        analysis_id: &str,
    ) {
        let mut delta = Map::new();
        delta.insert(key.to_string(), value);
        if let Err(e) = self
            .sessions
            .update_state(session, ORCHESTRATOR_AUTHOR, delta)
            .await
        {
            tracing::warn!(analysis_id, key, error = %e, "failed to update session state");
        }
    }

    async fn persist(&self, session: &mut Session, event: Event) {
        if let Err(e) = self.sessions.append_event(session, event).await {
            tracing::warn!(session_id = %session.id, error = %e, "failed to persist event");
        }
    }

    async fn finish_with_summary(
        &self,
        session: &mut Session,
        tx: &mpsc::Sender<Event>,
        summary: &AnalysisSummary,
    ) {
        let data = json!({
            "analysis_id": summary.analysis_id,
            "request_type": summary.request_type,
            "selected_workers": summary.selected_workers,
            "metrics": summary.metrics,
            "artifact_refs": summary.artifact_refs,
            "cached": summary.cached,
        });
        self.finish(session, tx, summary.report.clone(), Some(data))
            .await;
    }

    /// Send the terminal event for this request.
    async fn finish(
        &self,
        session: &mut Session,
        tx: &mpsc::Sender<Event>,
        text: String,
        data: Option<Value>,
    ) {
        let mut content = Content::text(Role::Model, text);
        if let Some(data) = data {
            content.parts.push(Part::Data { data });
        }
        let event = Event::new(ORCHESTRATOR_AUTHOR, content).into_terminal();
        publish(self.sessions.as_ref(), session, event, tx).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_content_prefers_fenced_block() {
        let message = "Please review this:\n```python\nimport os\nos.system(x)\n```\nthanks";
        assert_eq!(extract_content(message), "import os\nos.system(x)");
    }

    #[test]
    fn test_extract_content_falls_back_to_message() {
        assert_eq!(extract_content("  fn main() {}  "), "fn main() {}");
        assert_eq!(extract_content("```\n\n```"), "```\n\n```");
    }

    #[test]
    fn test_input_builder() {
        let input = AnalysisInput::new("app", "alice", "hi").with_session("s1");
        assert_eq!(input.session_id.as_deref(), Some("s1"));
    }
}
