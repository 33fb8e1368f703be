//! Routing and execution of analysis requests.
//!
//! ## Components
//!
//! - [`classification`]: parsing the classifier's routing decision
//! - [`router`]: choosing the worker set for a decision
//! - [`worker`]: collaborator traits and the event sink they report through
//! - [`plan`]: execution plan, checkpoint and history records
//! - [`executor`]: sequential, paced, checkpointed worker execution
//! - [`pipeline`]: the [`Orchestrator`] tying it all together
//! - [`runner`]: collaborators backed by external commands

pub mod classification;
pub mod executor;
pub mod pipeline;
pub mod plan;
pub mod router;
pub mod runner;
pub mod worker;

pub use classification::{Classification, RequestType};
pub use executor::{ExecutionOutcome, ExecutorSettings, FailurePolicy, SequentialExecutor};
pub use pipeline::{
    AnalysisInput, AnalysisSummary, Orchestrator, RunOutcome, RunResult, extract_content,
};
pub use plan::{
    AnalysisHistoryRecord, CachedAnalysis, CheckpointMarker, ExecutionPlan, PLAN_KEY,
    WorkerStatus,
};
pub use router::{Route, Router, WorkerProfile};
pub use runner::{CommandSpec, ProcessClassifier, ProcessSynthesizer, ProcessWorker};
pub use worker::{
    AnalysisRequest, Classifier, EventSink, LocalSynthesizer, Synthesizer, Worker, WorkerRegistry,
};
