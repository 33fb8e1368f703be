use super::classification::Classification;
use crate::review::{AnalysisMetrics, WorkerKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Session-state key of the current [`ExecutionPlan`].
pub const PLAN_KEY: &str = "execution_plan";

/// Artifact-ref key of the synthesized report.
pub const REPORT_REF: &str = "report";
/// Artifact-ref key of the saved input.
pub const INPUT_REF: &str = "input";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
}

impl WorkerStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// Classification fields recorded with a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanClassification {
    #[serde(rename = "type")]
    pub request_type: String,
    #[serde(default)]
    pub focus_areas: Vec<String>,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub reasoning: String,
}

impl From<&Classification> for PlanClassification {
    fn from(decision: &Classification) -> Self {
        Self {
            request_type: decision.request_type.as_str(),
            focus_areas: decision.focus_areas.clone(),
            confidence: decision.confidence,
            reasoning: decision.reasoning.clone(),
        }
    }
}

/// Which workers one analysis runs, and how far it has got.
///
/// `selected_workers` is fixed at construction. Status and artifact maps are
/// keyed by worker id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub analysis_id: String,
    pub selected_workers: Vec<WorkerKind>,
    pub classification: PlanClassification,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub artifact_refs: BTreeMap<String, String>,
    #[serde(default)]
    pub worker_status: BTreeMap<String, WorkerStatus>,
}

impl ExecutionPlan {
    pub fn new(
        analysis_id: impl Into<String>,
        selected_workers: Vec<WorkerKind>,
        decision: &Classification,
        now: DateTime<Utc>,
    ) -> Self {
        let worker_status = selected_workers
            .iter()
            .map(|k| (k.worker_id().to_string(), WorkerStatus::Pending))
            .collect();
        Self {
            analysis_id: analysis_id.into(),
            selected_workers,
            classification: decision.into(),
            created_at: now,
            updated_at: now,
            artifact_refs: BTreeMap::new(),
            worker_status,
        }
    }

    pub fn status(&self, kind: WorkerKind) -> WorkerStatus {
        self.worker_status
            .get(kind.worker_id())
            .copied()
            .unwrap_or_default()
    }

    pub fn set_status(&mut self, kind: WorkerKind, status: WorkerStatus, now: DateTime<Utc>) {
        self.worker_status
            .insert(kind.worker_id().to_string(), status);
        self.touch(now);
    }

    pub fn record_artifact(&mut self, key: impl Into<String>, name: impl Into<String>) {
        self.artifact_refs.insert(key.into(), name.into());
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        if now > self.updated_at {
            self.updated_at = now;
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Name of the per-worker output artifact.
pub fn worker_artifact_name(analysis_id: &str, kind: WorkerKind) -> String {
    format!("analysis_{}_{}.json", analysis_id, kind.worker_id())
}

pub fn report_artifact_name(analysis_id: &str) -> String {
    format!("report_{}.md", analysis_id)
}

pub fn input_artifact_name(analysis_id: &str) -> String {
    format!("code_input_{}.txt", analysis_id)
}

/// Written into session state under `checkpoint_<worker_id>` once a worker
/// reaches a terminal status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMarker {
    pub timestamp: DateTime<Utc>,
    pub analysis_id: String,
    pub worker_id: String,
    pub status: WorkerStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One entry of `state["analysis_history"]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisHistoryRecord {
    pub analysis_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub request_type: String,
    pub selected_workers: Vec<WorkerKind>,
    pub metrics: AnalysisMetrics,
    #[serde(default)]
    pub artifact_refs: BTreeMap<String, String>,
    /// Served from the result cache rather than recomputed.
    #[serde(default)]
    pub cached: bool,
    /// The analysis whose results were reused, for cached entries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_analysis_id: Option<String>,
}

/// Payload stored in the result cache for a completed analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedAnalysis {
    pub analysis_id: String,
    pub request_type: String,
    pub selected_workers: Vec<WorkerKind>,
    pub report: String,
    pub metrics: AnalysisMetrics,
    #[serde(default)]
    pub artifact_refs: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
}
