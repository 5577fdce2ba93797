//! Append-only decision trail.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::component::ComponentId;
use super::run::Phase;

/// Kind of decision recorded in the audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Init,
    AuthorContract,
    AuthorTests,
    Validate,
    Dispatch,
    Resolve,
    Promote,
    Integrate,
    Diagnose,
    Exhausted,
    Pause,
    Resume,
    Budget,
    TargetBuild,
    Complete,
    Fail,
    /// In-flight work found on load and requeued.
    Recover,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::AuthorContract => "author_contract",
            Self::AuthorTests => "author_tests",
            Self::Validate => "validate",
            Self::Dispatch => "dispatch",
            Self::Resolve => "resolve",
            Self::Promote => "promote",
            Self::Integrate => "integrate",
            Self::Diagnose => "diagnose",
            Self::Exhausted => "exhausted",
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::Budget => "budget",
            Self::TargetBuild => "target_build",
            Self::Complete => "complete",
            Self::Fail => "fail",
            Self::Recover => "recover",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s {
            "init" => Some(Self::Init),
            "author_contract" => Some(Self::AuthorContract),
            "author_tests" => Some(Self::AuthorTests),
            "validate" => Some(Self::Validate),
            "dispatch" => Some(Self::Dispatch),
            "resolve" => Some(Self::Resolve),
            "promote" => Some(Self::Promote),
            "integrate" => Some(Self::Integrate),
            "diagnose" => Some(Self::Diagnose),
            "exhausted" => Some(Self::Exhausted),
            "pause" => Some(Self::Pause),
            "resume" => Some(Self::Resume),
            "budget" => Some(Self::Budget),
            "target_build" => Some(Self::TargetBuild),
            "complete" => Some(Self::Complete),
            "fail" => Some(Self::Fail),
            "recover" => Some(Self::Recover),
            _ => None,
        }
    }
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One write-once record of the decision trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Store-assigned sequence number; `None` until persisted.
    #[serde(default)]
    pub seq: Option<i64>,
    pub run_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub phase: Phase,
    #[serde(default)]
    pub component_id: Option<ComponentId>,
    pub action: AuditAction,
    pub decision: String,
    #[serde(default)]
    pub detail: String,
}

impl AuditEntry {
    pub fn new(run_id: Uuid, phase: Phase, action: AuditAction, decision: impl Into<String>) -> Self {
        Self {
            seq: None,
            run_id,
            timestamp: Utc::now(),
            phase,
            component_id: None,
            action,
            decision: decision.into(),
            detail: String::new(),
        }
    }

    #[must_use]
    pub fn component(mut self, id: impl Into<String>) -> Self {
        self.component_id = Some(id.into());
        self
    }

    #[must_use]
    pub fn detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = detail.into();
        self
    }
}
