//! The closed set of analysis workers.
//!
//! Each [`WorkerKind`] names one analysis domain and fixes the identifiers the
//! rest of the pipeline keys on: the worker id used in plans and artifact
//! names, the session-state key the worker's output lands under, and the
//! default keywords the router matches custom focus areas against.
//!
//! ## Worker Kinds (registration order)
//!
//! - [`WorkerKind::Quality`]: code quality and complexity
//! - [`WorkerKind::Security`]: vulnerabilities and unsafe patterns
//! - [`WorkerKind::Practices`]: engineering practices (SOLID, patterns)
//! - [`WorkerKind::Carbon`]: carbon footprint and performance
//!
//! ## Example
//!
//! ```
//! use reviewflow::review::WorkerKind;
//!
//! let security = WorkerKind::Security;
//! assert_eq!(security.worker_id(), "security_worker");
//! assert_eq!(security.output_key(), "security_analysis");
//! assert!(security.default_keywords().contains(&"vulnerability"));
//! ```

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Type of analysis worker.
///
/// Serialized as the worker id (`"quality_worker"`, ...). Parsing via
/// [`FromStr`] also accepts the bare domain (`"security"`) and a few aliases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum WorkerKind {
    /// Code quality: readability, complexity, duplication.
    #[serde(rename = "quality_worker")]
    Quality,
    /// Security: injection, secrets, unsafe input handling.
    #[serde(rename = "security_worker")]
    Security,
    /// Engineering practices: SOLID, design patterns, testability.
    #[serde(rename = "practices_worker")]
    Practices,
    /// Carbon footprint: energy and performance efficiency.
    #[serde(rename = "carbon_worker")]
    Carbon,
}

impl WorkerKind {
    /// All worker kinds in their fixed registration order.
    pub fn all() -> [Self; 4] {
        [Self::Quality, Self::Security, Self::Practices, Self::Carbon]
    }

    /// The domain name, as used in `review_<domain>` request types.
    pub fn domain(&self) -> &'static str {
        match self {
            Self::Quality => "quality",
            Self::Security => "security",
            Self::Practices => "practices",
            Self::Carbon => "carbon",
        }
    }

    /// Identifier used in plans, checkpoints and artifact names.
    pub fn worker_id(&self) -> &'static str {
        match self {
            Self::Quality => "quality_worker",
            Self::Security => "security_worker",
            Self::Practices => "practices_worker",
            Self::Carbon => "carbon_worker",
        }
    }

    /// Session-state key the worker's structured result is stored under.
    pub fn output_key(&self) -> &'static str {
        match self {
            Self::Quality => "quality_analysis",
            Self::Security => "security_analysis",
            Self::Practices => "practices_analysis",
            Self::Carbon => "carbon_analysis",
        }
    }

    /// Session-state key of the checkpoint marker for this worker.
    pub fn checkpoint_key(&self) -> String {
        format!("checkpoint_{}", self.worker_id())
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Quality => "Code Quality",
            Self::Security => "Security",
            Self::Practices => "Engineering Practices",
            Self::Carbon => "Carbon Footprint",
        }
    }

    /// Keywords matched (case-sensitively, as substrings) against custom focus areas.
    pub fn default_keywords(&self) -> &'static [&'static str] {
        match self {
            Self::Quality => &["quality", "complexity"],
            Self::Security => &["security", "vulnerability"],
            Self::Practices => &["solid", "patterns"],
            Self::Carbon => &["carbon", "performance"],
        }
    }

    /// Resolve a domain name or worker id to a kind.
    pub fn from_domain(name: &str) -> Option<Self> {
        Self::from_str(name).ok()
    }
}

impl std::fmt::Display for WorkerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.worker_id())
    }
}

impl FromStr for WorkerKind {
    type Err = String;

    /// Parse a worker kind from a domain, worker id or alias.
    ///
    /// # Examples
    ///
    /// ```
    /// use reviewflow::review::WorkerKind;
    /// use std::str::FromStr;
    ///
    /// assert_eq!(WorkerKind::from_str("security").unwrap(), WorkerKind::Security);
    /// assert_eq!(WorkerKind::from_str("carbon_worker").unwrap(), WorkerKind::Carbon);
    /// assert!(WorkerKind::from_str("unknown").is_err());
    /// ```
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "quality" | "quality_worker" | "quality-worker" | "code_quality" => Ok(Self::Quality),
            "security" | "security_worker" | "security-worker" | "sec" => Ok(Self::Security),
            "practices" | "practices_worker" | "practices-worker" | "best_practices"
            | "engineering_practices" => Ok(Self::Practices),
            "carbon" | "carbon_worker" | "carbon-worker" | "carbon_footprint" => Ok(Self::Carbon),
            other => Err(format!(
                "Unknown worker '{}'. Valid values: quality, security, practices, carbon",
                other
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registration_order() {
        assert_eq!(
            WorkerKind::all(),
            [
                WorkerKind::Quality,
                WorkerKind::Security,
                WorkerKind::Practices,
                WorkerKind::Carbon
            ]
        );
    }

    #[test]
    fn test_identifiers_are_consistent() {
        for kind in WorkerKind::all() {
            assert_eq!(kind.worker_id(), format!("{}_worker", kind.domain()));
            assert_eq!(kind.output_key(), format!("{}_analysis", kind.domain()));
            assert_eq!(kind.to_string(), kind.worker_id());
            assert_eq!(WorkerKind::from_domain(kind.domain()), Some(kind));
            assert_eq!(WorkerKind::from_domain(kind.worker_id()), Some(kind));
        }
    }

    #[test]
    fn test_serde_uses_worker_id() {
        let json = serde_json::to_string(&WorkerKind::Practices).unwrap();
        assert_eq!(json, "\"practices_worker\"");
        let back: WorkerKind = serde_json::from_str(&json).unwrap();
        assert_eq!(back, WorkerKind::Practices);
    }

    #[test]
    fn test_from_str_is_case_insensitive() {
        assert_eq!(WorkerKind::from_str("SECURITY").unwrap(), WorkerKind::Security);
    }

    #[test]
    fn test_checkpoint_key() {
        assert_eq!(
            WorkerKind::Security.checkpoint_key(),
            "checkpoint_security_worker"
        );
    }
}
