//! Analysis domains and their typed results.
//!
//! ## Components
//!
//! - [`specialists`]: the closed set of worker kinds and their identifiers
//! - [`findings`]: validated worker outputs, severities and metrics
//!
//! ## Example
//!
//! ```
//! use reviewflow::review::{AnalysisMetrics, WorkerKind, WorkerOutput};
//! use serde_json::json;
//!
//! let raw = json!({
//!     "summary": "Found an injection risk",
//!     "findings": [{"severity": "critical", "title": "SQL built with format!"}]
//! });
//! let output = WorkerOutput::from_state(WorkerKind::Security, Some(&raw)).unwrap();
//! let metrics = AnalysisMetrics::from_outputs(&[output]);
//! assert_eq!(metrics.total_issues, 1);
//! ```

pub mod findings;
pub mod specialists;

pub use findings::{
    AnalysisMetrics, AnalysisReport, Finding, OutputError, OutputStatus, Severity, WorkerOutput,
    render_fallback_report,
};
pub use specialists::WorkerKind;
