//! Deterministic worker selection from a classification.

use super::classification::{Classification, RequestType};
use crate::review::WorkerKind;
use std::collections::HashMap;

/// A registered worker as the router sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerProfile {
    pub kind: WorkerKind,
    pub keywords: Vec<String>,
}

impl WorkerProfile {
    pub fn new(kind: WorkerKind) -> Self {
        Self {
            kind,
            keywords: kind
                .default_keywords()
                .iter()
                .map(|k| k.to_string())
                .collect(),
        }
    }

    pub fn with_keywords(mut self, keywords: Vec<String>) -> Self {
        self.keywords = keywords;
        self
    }

    /// Any keyword appearing (case-sensitively) inside any focus area.
    fn matches(&self, focus_areas: &[String]) -> bool {
        self.keywords
            .iter()
            .any(|keyword| focus_areas.iter().any(|area| area.contains(keyword.as_str())))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Answer with the capability description; no pipeline run.
    GeneralQuery,
    /// Ask the user to supply content; no pipeline run.
    MissingContent,
    /// Run these workers in order. May be empty.
    Workers(Vec<WorkerKind>),
}

#[derive(Debug, Clone)]
pub struct Router {
    profiles: Vec<WorkerProfile>,
}

impl Router {
    /// Profiles are kept in the order given, which is the registration order.
    pub fn new(profiles: Vec<WorkerProfile>) -> Self {
        Self { profiles }
    }

    /// Profiles with default keywords, with per-kind keyword overrides.
    pub fn for_kinds(kinds: &[WorkerKind], overrides: &HashMap<WorkerKind, Vec<String>>) -> Self {
        let profiles = kinds
            .iter()
            .map(|&kind| match overrides.get(&kind) {
                Some(keywords) if !keywords.is_empty() => {
                    WorkerProfile::new(kind).with_keywords(keywords.clone())
                }
                _ => WorkerProfile::new(kind),
            })
            .collect();
        Self::new(profiles)
    }

    pub fn profiles(&self) -> &[WorkerProfile] {
        &self.profiles
    }

    pub fn route(&self, decision: &Classification) -> Route {
        if decision.request_type == RequestType::GeneralQuery {
            return Route::GeneralQuery;
        }
        if !decision.has_content {
            return Route::MissingContent;
        }
        let selected = match &decision.request_type {
            RequestType::GeneralQuery => Vec::new(),
            RequestType::FullReview => self.all(),
            RequestType::Review(domain) => self
                .profiles
                .iter()
                .filter(|p| p.kind.domain() == domain.as_str())
                .map(|p| p.kind)
                .collect(),
            RequestType::Custom if decision.focus_areas.is_empty() => self.all(),
            RequestType::Custom => self
                .profiles
                .iter()
                .filter(|p| p.matches(&decision.focus_areas))
                .map(|p| p.kind)
                .collect(),
        };
        Route::Workers(selected)
    }

    /// The worker set for a decision; empty for the terminal branches.
    pub fn select(&self, decision: &Classification) -> Vec<WorkerKind> {
        match self.route(decision) {
            Route::Workers(kinds) => kinds,
            Route::GeneralQuery | Route::MissingContent => Vec::new(),
        }
    }

    fn all(&self) -> Vec<WorkerKind> {
        self.profiles.iter().map(|p| p.kind).collect()
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::for_kinds(&WorkerKind::all(), &HashMap::new())
    }
}
