//! Parsing of the classifier's routing decision.

use crate::errors::PipelineError;
use crate::util::{extract_json_object, strip_code_fence};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// What the user asked for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum RequestType {
    GeneralQuery,
    FullReview,
    /// `review_<domain>`: a single-domain review.
    Review(String),
    Custom,
}

impl RequestType {
    /// Wire form, also used as the cache discriminator.
    pub fn as_str(&self) -> String {
        match self {
            Self::GeneralQuery => "general_query".to_string(),
            Self::FullReview => "full_review".to_string(),
            Self::Review(domain) => format!("review_{}", domain),
            Self::Custom => "custom".to_string(),
        }
    }
}

impl fmt::Display for RequestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<String> for RequestType {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.trim() {
            "general_query" => Ok(Self::GeneralQuery),
            "full_review" => Ok(Self::FullReview),
            "custom" => Ok(Self::Custom),
            other => match other.strip_prefix("review_") {
                Some(domain) if !domain.is_empty() => Ok(Self::Review(domain.to_string())),
                _ => Err(format!("unknown request type '{}'", other)),
            },
        }
    }
}

impl From<RequestType> for String {
    fn from(value: RequestType) -> Self {
        value.as_str()
    }
}

fn default_true() -> bool {
    true
}

/// Accept a number, a numeric string, or nothing.
fn lenient_confidence<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::Number(n) => n.as_f64().unwrap_or(0.0),
        serde_json::Value::String(s) => s.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    })
}

/// A parsed routing decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    #[serde(rename = "type")]
    pub request_type: RequestType,
    /// A missing flag is read as "content present".
    #[serde(default = "default_true")]
    pub has_content: bool,
    #[serde(default)]
    pub focus_areas: Vec<String>,
    #[serde(default, deserialize_with = "lenient_confidence")]
    pub confidence: f64,
    #[serde(default)]
    pub reasoning: String,
}

impl Classification {
    pub fn new(request_type: RequestType) -> Self {
        Self {
            request_type,
            has_content: true,
            focus_areas: Vec::new(),
            confidence: 1.0,
            reasoning: String::new(),
        }
    }

    pub fn with_focus_areas<I, S>(mut self, areas: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.focus_areas = areas.into_iter().map(Into::into).collect();
        self
    }

    pub fn without_content(mut self) -> Self {
        self.has_content = false;
        self
    }

    /// Parse a raw classifier response.
    ///
    /// A surrounding fenced code block is stripped first; if the remainder is
    /// not JSON, the outermost `{...}` in it is tried. Anything that still
    /// does not parse is a classification failure.
    pub fn parse(raw: &str) -> Result<Self, PipelineError> {
        let body = strip_code_fence(raw);
        if body.is_empty() {
            return Err(PipelineError::Classification(
                "classifier returned an empty decision".to_string(),
            ));
        }

        match serde_json::from_str::<Self>(body) {
            Ok(decision) => Ok(decision),
            Err(first) => {
                let embedded = extract_json_object(body).ok_or_else(|| {
                    PipelineError::Classification(format!("decision is not JSON: {}", first))
                })?;
                serde_json::from_str::<Self>(&embedded).map_err(|e| {
                    PipelineError::Classification(format!("malformed decision: {}", e))
                })
            }
        }
    }
}
