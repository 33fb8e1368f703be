//! Named, versioned blobs with a metadata sidecar.
//!
//! Artifacts are scoped to an `(application, owner)` pair and filed into a
//! category directory chosen by the artifact name's prefix:
//!
//! | Prefix | Category |
//! |--------|----------|
//! | `input_`, `code_input_` | `inputs` |
//! | `report_` | `reports` |
//! | `analysis_` | `sub_agent_outputs` |
//! | anything else | `other` |
//!
//! Callers rely on this naming convention; the orchestrator writes
//! `code_input_<id>.txt`, `analysis_<id>_<worker>.json` and `report_<id>.md`.
//!
//! Versioning is exposed as an interface but only one version (`1`) is ever
//! kept; saving again overwrites it.

pub mod store;

pub use store::FileArtifactStore;

use crate::errors::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// The only version a saved artifact ever has.
pub const CURRENT_VERSION: u32 = 1;

/// Owner scope of an artifact.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactScope {
    pub application: String,
    pub owner: String,
}

impl ArtifactScope {
    pub fn new(application: impl Into<String>, owner: impl Into<String>) -> Self {
        Self {
            application: application.into(),
            owner: owner.into(),
        }
    }
}

impl fmt::Display for ArtifactScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.application, self.owner)
    }
}

/// Storage subdirectory for an artifact, derived from its name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactCategory {
    Inputs,
    Reports,
    SubAgentOutputs,
    Other,
}

impl ArtifactCategory {
    /// Route an artifact name to its category by prefix.
    ///
    /// # Examples
    ///
    /// ```
    /// use reviewflow::artifacts::ArtifactCategory;
    ///
    /// assert_eq!(ArtifactCategory::for_name("report_abc.md"), ArtifactCategory::Reports);
    /// assert_eq!(ArtifactCategory::for_name("code_input_1.txt"), ArtifactCategory::Inputs);
    /// assert_eq!(ArtifactCategory::for_name("notes.txt"), ArtifactCategory::Other);
    /// ```
    pub fn for_name(name: &str) -> Self {
        if name.starts_with("input_") || name.starts_with("code_input_") {
            Self::Inputs
        } else if name.starts_with("report_") {
            Self::Reports
        } else if name.starts_with("analysis_") {
            Self::SubAgentOutputs
        } else {
            Self::Other
        }
    }

    pub fn dir_name(&self) -> &'static str {
        match self {
            Self::Inputs => "inputs",
            Self::Reports => "reports",
            Self::SubAgentOutputs => "sub_agent_outputs",
            Self::Other => "other",
        }
    }

    pub fn all() -> [Self; 4] {
        [
            Self::Inputs,
            Self::Reports,
            Self::SubAgentOutputs,
            Self::Other,
        ]
    }
}

impl fmt::Display for ArtifactCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.dir_name())
    }
}

/// Artifact payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactContent {
    Text(String),
    Binary(Vec<u8>),
}

impl ArtifactContent {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Text(text) => text.as_bytes(),
            Self::Binary(bytes) => bytes,
        }
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_text(&self) -> bool {
        matches!(self, Self::Text(_))
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Binary(_) => None,
        }
    }
}

impl From<String> for ArtifactContent {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for ArtifactContent {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<Vec<u8>> for ArtifactContent {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Binary(bytes)
    }
}

/// Sidecar record written next to every artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactMetadata {
    pub application: String,
    pub owner: String,
    pub name: String,
    pub category: ArtifactCategory,
    pub content_type: String,
    pub size_bytes: u64,
    /// Whether the content was saved as text.
    #[serde(default)]
    pub is_text: bool,
    pub created_at: DateTime<Utc>,
    pub version: u32,
    #[serde(default)]
    pub custom: Map<String, Value>,
}

/// Storage port for artifacts.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Save content and its metadata sidecar; returns the stored version.
    async fn save(
        &self,
        scope: &ArtifactScope,
        name: &str,
        content: ArtifactContent,
        custom: Map<String, Value>,
    ) -> Result<u32, StoreError>;

    /// Full overwrite of an existing artifact.
    async fn replace(
        &self,
        scope: &ArtifactScope,
        name: &str,
        content: ArtifactContent,
        custom: Map<String, Value>,
    ) -> Result<u32, StoreError> {
        self.save(scope, name, content, custom).await
    }

    /// Load content; `version` of `None` means latest.
    async fn load(
        &self,
        scope: &ArtifactScope,
        name: &str,
        version: Option<u32>,
    ) -> Result<Option<ArtifactContent>, StoreError>;

    /// The metadata sidecar, if it has been written.
    async fn load_metadata(
        &self,
        scope: &ArtifactScope,
        name: &str,
    ) -> Result<Option<ArtifactMetadata>, StoreError>;

    /// All artifact names in the scope, sorted.
    async fn list_keys(&self, scope: &ArtifactScope) -> Result<Vec<String>, StoreError>;

    async fn list_versions(&self, scope: &ArtifactScope, name: &str)
    -> Result<Vec<u32>, StoreError>;

    /// Returns `true` if something was removed.
    async fn delete(&self, scope: &ArtifactScope, name: &str) -> Result<bool, StoreError>;

    async fn delete_version(
        &self,
        scope: &ArtifactScope,
        name: &str,
        version: u32,
    ) -> Result<bool, StoreError> {
        if version != CURRENT_VERSION {
            return Ok(false);
        }
        self.delete(scope, name).await
    }
}
