//! Contracts for the external collaborators the pipeline drives.
//!
//! Workers, the classifier and the synthesizer are opaque, slow and
//! fallible. They report progress by emitting [`Event`]s through an
//! [`EventSink`]; the executor relays those to the caller as they arrive.

use crate::errors::PipelineError;
use crate::review::{WorkerKind, WorkerOutput, render_fallback_report};
use crate::session::{Event, Role};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Everything a worker or synthesizer gets to look at.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisRequest {
    pub analysis_id: String,
    pub request_type: String,
    pub content: String,
    pub focus_areas: Vec<String>,
    /// Snapshot of session state taken when the call started.
    #[serde(skip)]
    pub state: Map<String, Value>,
}

/// Sending half of a collaborator's event stream.
///
/// A sink must not outlive the call it was handed to: the executor stops
/// relaying once every clone has been dropped.
#[derive(Debug, Clone)]
pub struct EventSink {
    author: String,
    tx: mpsc::Sender<Event>,
}

impl EventSink {
    pub fn new(author: impl Into<String>, tx: mpsc::Sender<Event>) -> Self {
        Self {
            author: author.into(),
            tx,
        }
    }

    /// A sink together with the receiver its events arrive on.
    pub fn channel(author: impl Into<String>, buffer: usize) -> (Self, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Self::new(author, tx), rx)
    }

    pub fn author(&self) -> &str {
        &self.author
    }

    pub async fn emit(&self, event: Event) -> Result<(), PipelineError> {
        self.tx
            .send(event)
            .await
            .map_err(|_| PipelineError::ConsumerGone)
    }

    /// Emit a model-authored text event.
    pub async fn text(&self, text: impl Into<String>) -> Result<(), PipelineError> {
        self.emit(Event::text(self.author.clone(), Role::Model, text))
            .await
    }
}

/// One analysis domain.
#[async_trait]
pub trait Worker: Send + Sync {
    fn kind(&self) -> WorkerKind;

    /// Run the analysis and return its structured result.
    ///
    /// The executor stores the returned value in session state under
    /// `kind().output_key()`.
    async fn analyze(&self, request: &AnalysisRequest, sink: EventSink) -> anyhow::Result<Value>;
}

/// Produces the raw routing decision for a user message.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, message: &str) -> anyhow::Result<String>;
}

/// Combines worker outputs into the final report text.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    async fn synthesize(
        &self,
        request: &AnalysisRequest,
        outputs: &[WorkerOutput],
        sink: EventSink,
    ) -> anyhow::Result<String>;
}

/// Renders the report locally from the worker outputs.
///
/// Used when no external synthesizer is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalSynthesizer;

#[async_trait]
impl Synthesizer for LocalSynthesizer {
    async fn synthesize(
        &self,
        request: &AnalysisRequest,
        outputs: &[WorkerOutput],
        _sink: EventSink,
    ) -> anyhow::Result<String> {
        Ok(render_fallback_report(&request.analysis_id, outputs))
    }
}

/// Workers in registration order, at most one per kind.
#[derive(Default, Clone)]
pub struct WorkerRegistry {
    workers: Vec<Arc<dyn Worker>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a worker. Re-registering a kind replaces the earlier worker
    /// but keeps its original position.
    pub fn register(&mut self, worker: Arc<dyn Worker>) -> &mut Self {
        match self.workers.iter_mut().find(|w| w.kind() == worker.kind()) {
            Some(slot) => *slot = worker,
            None => self.workers.push(worker),
        }
        self
    }

    pub fn with(mut self, worker: Arc<dyn Worker>) -> Self {
        self.register(worker);
        self
    }

    pub fn get(&self, kind: WorkerKind) -> Option<Arc<dyn Worker>> {
        self.workers.iter().find(|w| w.kind() == kind).cloned()
    }

    pub fn kinds(&self) -> Vec<WorkerKind> {
        self.workers.iter().map(|w| w.kind()).collect()
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }
}
