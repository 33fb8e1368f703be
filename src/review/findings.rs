//! Typed worker outputs.
//!
//! Workers hand back loosely shaped JSON. At the checkpoint boundary the
//! executor validates it into a [`WorkerOutput`]: a record tagged with the
//! producing [`WorkerKind`] that carries an [`AnalysisReport`] of
//! [`Finding`]s. Failed workers get a placeholder output so the rest of the
//! pipeline (synthesis, metrics, history) can treat every selected worker
//! uniformly.
//!
//! ## Example
//!
//! ```
//! use reviewflow::review::{AnalysisReport, Finding, Severity, WorkerKind, WorkerOutput};
//!
//! let report = AnalysisReport::new("One injection risk")
//!     .add_finding(Finding::new(Severity::High, "SQL built from user input"));
//! let output = WorkerOutput::completed(WorkerKind::Security, report);
//! assert!(output.is_completed());
//! assert_eq!(output.report.findings.len(), 1);
//! ```

use super::WorkerKind;
use crate::util::strip_code_fence;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Severity level for individual findings, most severe first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    High,
    #[default]
    Medium,
    Low,
    Info,
}

impl Severity {
    pub fn all() -> [Self; 5] {
        [
            Self::Critical,
            Self::High,
            Self::Medium,
            Self::Low,
            Self::Info,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
            Self::Info => "info",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Severity {
    type Err = std::convert::Infallible;

    /// Lenient parse: common aliases map onto the five levels and anything
    /// unrecognised becomes `Info`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_lowercase().as_str() {
            "critical" | "blocker" => Self::Critical,
            "high" | "error" | "major" => Self::High,
            "medium" | "moderate" | "warning" | "warn" => Self::Medium,
            "low" | "minor" => Self::Low,
            _ => Self::Info,
        })
    }
}

impl<'de> Deserialize<'de> for Severity {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Severity::from_str(&raw).unwrap_or_default())
    }
}

/// A single issue reported by a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    #[serde(default)]
    pub severity: Severity,
    #[serde(alias = "issue")]
    pub title: String,
    #[serde(default, skip_serializing_if = "String::is_empty", alias = "description")]
    pub detail: String,
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "line")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "suggestion")]
    pub recommendation: Option<String>,
}

impl Finding {
    pub fn new(severity: Severity, title: impl Into<String>) -> Self {
        Self {
            severity,
            title: title.into(),
            detail: String::new(),
            location: None,
            recommendation: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = detail.into();
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn with_recommendation(mut self, recommendation: impl Into<String>) -> Self {
        self.recommendation = Some(recommendation.into());
        self
    }
}

/// The structured result of one worker.
///
/// Unknown fields are kept in `extra` so domain-specific data survives the
/// round trip through the artifact store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    #[serde(default)]
    pub summary: String,
    #[serde(default, alias = "issues")]
    pub findings: Vec<Finding>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl AnalysisReport {
    pub fn new(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            ..Self::default()
        }
    }

    pub fn add_finding(mut self, finding: Finding) -> Self {
        self.findings.push(finding);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputStatus {
    Completed,
    Failed,
}

impl fmt::Display for OutputStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Why a worker's raw state value could not be turned into a [`WorkerOutput`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OutputError {
    #[error("no output found under state key '{key}'")]
    Missing { key: &'static str },
    #[error("output under '{key}' is not a report: {message}")]
    Malformed { key: &'static str, message: String },
}

/// A worker's validated output, tagged by the worker that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerOutput {
    pub worker: WorkerKind,
    pub status: OutputStatus,
    #[serde(default)]
    pub report: AnalysisReport,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WorkerOutput {
    pub fn completed(worker: WorkerKind, report: AnalysisReport) -> Self {
        Self {
            worker,
            status: OutputStatus::Completed,
            report,
            error: None,
        }
    }

    /// Placeholder recorded when a worker fails.
    pub fn failed(worker: WorkerKind, error: impl Into<String>) -> Self {
        let error = error.into();
        Self {
            worker,
            status: OutputStatus::Failed,
            report: AnalysisReport::new(format!(
                "{} analysis failed: {}",
                worker.display_name(),
                error
            )),
            error: Some(error),
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == OutputStatus::Completed
    }

    /// Validate the value a worker left in session state under its output key.
    ///
    /// Accepts a JSON object, or a string holding JSON (optionally fenced); a
    /// string that is not JSON is taken as a plain-text summary.
    pub fn from_state(worker: WorkerKind, value: Option<&Value>) -> Result<Self, OutputError> {
        let key = worker.output_key();
        let value = value.ok_or(OutputError::Missing { key })?;
        let report = match value {
            Value::Object(_) => serde_json::from_value::<AnalysisReport>(value.clone()).map_err(
                |e| OutputError::Malformed {
                    key,
                    message: e.to_string(),
                },
            )?,
            Value::String(text) => {
                let body = strip_code_fence(text);
                match serde_json::from_str::<Value>(body) {
                    Ok(inner @ Value::Object(_)) => serde_json::from_value::<AnalysisReport>(inner)
                        .map_err(|e| OutputError::Malformed {
                            key,
                            message: e.to_string(),
                        })?,
                    _ => AnalysisReport::new(text.trim()),
                }
            }
            Value::Null => return Err(OutputError::Missing { key }),
            other => {
                return Err(OutputError::Malformed {
                    key,
                    message: format!("expected an object or string, got {}", other),
                });
            }
        };
        Ok(Self::completed(worker, report))
    }
}

/// Issue counts across all worker outputs of one analysis.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisMetrics {
    pub total_issues: usize,
    pub severity_breakdown: BTreeMap<Severity, usize>,
}

impl AnalysisMetrics {
    pub fn from_outputs(outputs: &[WorkerOutput]) -> Self {
        let mut metrics = Self::default();
        for finding in outputs.iter().flat_map(|o| o.report.findings.iter()) {
            metrics.total_issues += 1;
            *metrics.severity_breakdown.entry(finding.severity).or_insert(0) += 1;
        }
        metrics
    }
}

/// Render a markdown report locally, used when the synthesizer produced nothing.
pub fn render_fallback_report(analysis_id: &str, outputs: &[WorkerOutput]) -> String {
    if outputs.is_empty() {
        return format!(
            "# Analysis Report\n\nAnalysis `{}`: No analysis performed. None of the available \
             workers matched the requested focus areas.\n",
            analysis_id
        );
    }

    let metrics = AnalysisMetrics::from_outputs(outputs);
    let mut out = format!(
        "# Analysis Report\n\nAnalysis `{}`: {} issue(s) across {} worker(s).\n",
        analysis_id,
        metrics.total_issues,
        outputs.len()
    );
    for output in outputs {
        out.push_str(&format!(
            "\n## {} ({})\n\n{}\n",
            output.worker.display_name(),
            output.status,
            output.report.summary
        ));
        for finding in &output.report.findings {
            out.push_str(&format!("- **{}** {}", finding.severity, finding.title));
            if let Some(location) = &finding.location {
                out.push_str(&format!(" (`{}`)", location));
            }
            out.push('\n');
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_severity_lenient_parse() {
        assert_eq!(Severity::from_str("HIGH").unwrap(), Severity::High);
        assert_eq!(Severity::from_str("warning").unwrap(), Severity::Medium);
        assert_eq!(Severity::from_str("whatever").unwrap(), Severity::Info);
        let parsed: Severity = serde_json::from_value(json!("Critical")).unwrap();
        assert_eq!(parsed, Severity::Critical);
    }

    #[test]
    fn test_from_state_object() {
        let value = json!({
            "summary": "two issues",
            "findings": [
                {"severity": "high", "title": "eval on input", "location": "app.py:3"},
                {"severity": "low", "issue": "verbose logging"}
            ],
            "score": 7
        });
        let output = WorkerOutput::from_state(WorkerKind::Security, Some(&value)).unwrap();
        assert!(output.is_completed());
        assert_eq!(output.report.findings.len(), 2);
        assert_eq!(output.report.findings[1].title, "verbose logging");
        assert_eq!(output.report.extra["score"], json!(7));
    }

    #[test]
    fn test_from_state_fenced_json_string() {
        let value = json!("```json\n{\"summary\": \"fine\", \"findings\": []}\n```");
        let output = WorkerOutput::from_state(WorkerKind::Quality, Some(&value)).unwrap();
        assert_eq!(output.report.summary, "fine");
    }

    #[test]
    fn test_from_state_plain_text() {
        let value = json!("Looks clean overall.");
        let output = WorkerOutput::from_state(WorkerKind::Carbon, Some(&value)).unwrap();
        assert_eq!(output.report.summary, "Looks clean overall.");
        assert!(output.report.findings.is_empty());
    }

    #[test]
    fn test_from_state_missing_and_malformed() {
        assert_eq!(
            WorkerOutput::from_state(WorkerKind::Quality, None),
            Err(OutputError::Missing {
                key: "quality_analysis"
            })
        );
        assert!(matches!(
            WorkerOutput::from_state(WorkerKind::Quality, Some(&json!(42))),
            Err(OutputError::Malformed { .. })
        ));
        assert!(matches!(
            WorkerOutput::from_state(WorkerKind::Quality, Some(&json!({"findings": "nope"}))),
            Err(OutputError::Malformed { .. })
        ));
    }

    #[test]
    fn test_failed_placeholder() {
        let output = WorkerOutput::failed(WorkerKind::Security, "timeout");
        assert_eq!(output.status, OutputStatus::Failed);
        assert_eq!(output.error.as_deref(), Some("timeout"));
        assert!(output.report.summary.contains("timeout"));
    }

    #[test]
    fn test_metrics() {
        let outputs = vec![
            WorkerOutput::completed(
                WorkerKind::Quality,
                AnalysisReport::new("q")
                    .add_finding(Finding::new(Severity::Low, "a"))
                    .add_finding(Finding::new(Severity::High, "b")),
            ),
            WorkerOutput::completed(
                WorkerKind::Security,
                AnalysisReport::new("s").add_finding(Finding::new(Severity::High, "c")),
            ),
            WorkerOutput::failed(WorkerKind::Carbon, "boom"),
        ];
        let metrics = AnalysisMetrics::from_outputs(&outputs);
        assert_eq!(metrics.total_issues, 3);
        assert_eq!(metrics.severity_breakdown[&Severity::High], 2);
        assert_eq!(metrics.severity_breakdown[&Severity::Low], 1);
        assert!(!metrics.severity_breakdown.contains_key(&Severity::Critical));

        let json = serde_json::to_value(&metrics).unwrap();
        assert_eq!(json["severity_breakdown"]["high"], json!(2));
    }

    #[test]
    fn test_fallback_report_empty() {
        let report = render_fallback_report("abc", &[]);
        assert!(report.contains("No analysis performed"));
    }

    #[test]
    fn test_fallback_report_lists_findings() {
        let outputs = vec![WorkerOutput::completed(
            WorkerKind::Security,
            AnalysisReport::new("one issue").add_finding(
                Finding::new(Severity::Critical, "hardcoded key").with_location("cfg.py:1"),
            ),
        )];
        let report = render_fallback_report("abc", &outputs);
        assert!(report.contains("## Security (completed)"));
        assert!(report.contains("**critical** hardcoded key (`cfg.py:1`)"));
    }
}
