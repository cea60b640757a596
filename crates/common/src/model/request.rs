//! Research request, case context and sub-queries

use crate::config::ResearchConfig;
use crate::errors::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use validator::Validate;

/// Where sources come from for a session
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SourceMode {
    /// Retriever + Fetcher only
    #[default]
    Web,
    /// Local document directory only
    Local,
    /// Both
    Hybrid,
}

impl SourceMode {
    pub fn uses_web(&self) -> bool {
        matches!(self, SourceMode::Web | SourceMode::Hybrid)
    }

    pub fn uses_local(&self) -> bool {
        matches!(self, SourceMode::Local | SourceMode::Hybrid)
    }
}

/// Structured case facts used to bias sub-query generation.
///
/// Read-only: the planner folds it into its prompt and nothing downstream
/// mutates it.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CaseContext {
    /// Role -> name, e.g. "plaintiff" -> "Ian Bruce"
    #[serde(default)]
    pub parties: BTreeMap<String, String>,

    #[serde(default)]
    pub jurisdiction: Option<String>,

    #[serde(default)]
    pub claims: Vec<String>,

    #[serde(default)]
    pub opposing_argument: Option<String>,

    #[serde(default)]
    pub key_statutes: Vec<String>,

    #[serde(default)]
    pub our_position: Option<String>,

    #[serde(default)]
    pub key_facts: Option<String>,
}

impl CaseContext {
    /// True when no field carries any non-blank content
    pub fn is_empty(&self) -> bool {
        fn blank(s: &Option<String>) -> bool {
            s.as_deref().map(|v| v.trim().is_empty()).unwrap_or(true)
        }

        self.parties.values().all(|v| v.trim().is_empty())
            && blank(&self.jurisdiction)
            && self.claims.iter().all(|c| c.trim().is_empty())
            && blank(&self.opposing_argument)
            && self.key_statutes.iter().all(|s| s.trim().is_empty())
            && blank(&self.our_position)
            && blank(&self.key_facts)
    }
}

/// A research request; spawns exactly one session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchRequest {
    pub query: String,

    #[serde(default)]
    pub case_context: Option<CaseContext>,

    #[serde(default)]
    pub config: ResearchConfig,

    /// Label -> path of local case documents passed to synthesis untouched
    #[serde(default)]
    pub case_documents: BTreeMap<String, PathBuf>,
}

impl ResearchRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            case_context: None,
            config: ResearchConfig::default(),
            case_documents: BTreeMap::new(),
        }
    }

    pub fn with_case_context(mut self, case_context: CaseContext) -> Self {
        self.case_context = Some(case_context);
        self
    }

    pub fn with_config(mut self, config: ResearchConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_case_document(mut self, label: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.case_documents.insert(label.into(), path.into());
        self
    }

    /// Check the request before a session is started
    pub fn validate(&self) -> Result<()> {
        if self.query.trim().is_empty() {
            return Err(AppError::Configuration {
                message: "research query must not be blank".to_string(),
            });
        }
        self.config.validate()?;
        if self.config.source_mode.uses_local() && self.config.local_documents_path.is_none() {
            return Err(AppError::Configuration {
                message: format!(
                    "source mode {:?} requires research.local_documents_path",
                    self.config.source_mode
                ),
            });
        }
        Ok(())
    }
}

/// Stable identifier of a sub-query within one session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubQueryId(pub u32);

impl fmt::Display for SubQueryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sq-{}", self.0)
    }
}

/// A focused search question derived from the main query; immutable once planned
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubQuery {
    pub id: SubQueryId,
    pub text: String,
}

impl SubQuery {
    pub fn new(id: u32, text: impl Into<String>) -> Self {
        Self {
            id: SubQueryId(id),
            text: text.into(),
        }
    }
}
