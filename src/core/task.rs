//! Task data model for the compiled DAG.
//!
//! A task node is the graph-resident form of one recommendation: resolved
//! dependencies, execution guidance, and the policy gate that decides
//! whether it may be dispatched.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::identity::{derive_identity, IdentityNamespace};

/// Identifier of a task within a DAG.
///
/// Compiled tasks get a hash-derived id (see [`TaskId::for_recommendation`]);
/// ids read back from artifacts are taken verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl TaskId {
    /// The stable task id for a recommendation id.
    pub fn for_recommendation(recommendation_id: &str) -> Self {
        Self(derive_identity(IdentityNamespace::Task, recommendation_id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TaskId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for TaskId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Recommendation priority; lower is more urgent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub enum Priority {
    P0,
    P1,
    #[default]
    P2,
    P3,
}

impl Priority {
    pub fn score(&self) -> u8 {
        match self {
            Priority::P0 => 0,
            Priority::P1 => 1,
            Priority::P2 => 2,
            Priority::P3 => 3,
        }
    }

    /// Bucket a numeric priority: `<=0` P0, `<=1` P1, `<=2` P2, else P3.
    pub fn from_number(value: f64) -> Self {
        if value <= 0.0 {
            Priority::P0
        } else if value <= 1.0 {
            Priority::P1
        } else if value <= 2.0 {
            Priority::P2
        } else {
            Priority::P3
        }
    }

    /// Parse a priority label or synonym. Unrecognized labels are `None`.
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_lowercase().as_str() {
            "p0" | "critical" => Some(Priority::P0),
            "p1" | "high" => Some(Priority::P1),
            "p2" | "medium" | "normal" => Some(Priority::P2),
            "p3" | "low" => Some(Priority::P3),
            _ => None,
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "P{}", self.score())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskTier {
    Low,
    Medium,
    High,
    Critical,
    #[default]
    Unknown,
}

impl RiskTier {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "low" => RiskTier::Low,
            "medium" => RiskTier::Medium,
            "high" => RiskTier::High,
            "critical" => RiskTier::Critical,
            _ => RiskTier::Unknown,
        }
    }

    /// High and critical tiers need a human approver unless told otherwise.
    pub fn is_high_risk(&self) -> bool {
        matches!(self, RiskTier::High | RiskTier::Critical)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskTier::Low => "low",
            RiskTier::Medium => "medium",
            RiskTier::High => "high",
            RiskTier::Critical => "critical",
            RiskTier::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for RiskTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical approval status.
///
/// Serialized as a plain string; unknown statuses pass through lowercased.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ApprovalStatus {
    Approved,
    Pending,
    Denied,
    NotRequired,
    Other(String),
}

impl ApprovalStatus {
    /// Canonicalize a raw status through the synonym table.
    /// Blank input is `None`.
    pub fn normalize(raw: &str) -> Option<Self> {
        let normalized = raw.trim().to_lowercase();
        let status = match normalized.as_str() {
            "" => return None,
            "approved" | "granted" | "accepted" => ApprovalStatus::Approved,
            "pending" | "required" | "requested" | "awaiting_approval" => ApprovalStatus::Pending,
            "denied" | "rejected" => ApprovalStatus::Denied,
            "not_required" | "none" | "n_a" | "n/a" => ApprovalStatus::NotRequired,
            _ => ApprovalStatus::Other(normalized),
        };
        Some(status)
    }

    /// Canonicalize an optional JSON value; non-strings are `None`.
    pub fn from_value(value: Option<&Value>) -> Option<Self> {
        value.and_then(Value::as_str).and_then(Self::normalize)
    }

    pub fn as_str(&self) -> &str {
        match self {
            ApprovalStatus::Approved => "approved",
            ApprovalStatus::Pending => "pending",
            ApprovalStatus::Denied => "denied",
            ApprovalStatus::NotRequired => "not_required",
            ApprovalStatus::Other(other) => other,
        }
    }
}

impl From<String> for ApprovalStatus {
    fn from(value: String) -> Self {
        Self::normalize(&value).unwrap_or(ApprovalStatus::Other(value))
    }
}

impl From<ApprovalStatus> for String {
    fn from(value: ApprovalStatus) -> Self {
        value.as_str().to_string()
    }
}

impl std::fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackPlan {
    #[serde(default)]
    pub trigger: String,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub steps: Vec<String>,
    #[serde(default)]
    pub data_recovery: Option<String>,
}

/// Approval requirement, approval state and pass/fail verdict for a task.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyGate {
    #[serde(default)]
    pub risk_tier: RiskTier,
    #[serde(default)]
    pub requires_human_approval: bool,
    #[serde(default)]
    pub approval_status: Option<ApprovalStatus>,
    #[serde(default)]
    pub approval_marker_present: bool,
    #[serde(default)]
    pub gate_passed: bool,
    #[serde(default)]
    pub passthrough: Option<Map<String, Value>>,
}

impl PolicyGate {
    /// Derive the marker and verdict from the approval inputs.
    ///
    /// The gate passes iff approval is not required, or the status is
    /// `approved` / `not_required`.
    pub fn evaluate(
        risk_tier: RiskTier,
        requires_human_approval: bool,
        approval_status: Option<ApprovalStatus>,
        passthrough: Option<Map<String, Value>>,
    ) -> Self {
        let gate_passed = !requires_human_approval
            || matches!(
                approval_status,
                Some(ApprovalStatus::Approved) | Some(ApprovalStatus::NotRequired)
            );
        Self {
            risk_tier,
            requires_human_approval,
            approval_marker_present: approval_status.is_some(),
            approval_status,
            gate_passed,
            passthrough,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.approval_status == Some(ApprovalStatus::Pending)
    }
}

/// A single task in the compiled DAG.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskNode {
    #[serde(default)]
    pub task_id: TaskId,
    #[serde(default)]
    pub recommendation_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub priority_score: u8,
    #[serde(default)]
    pub risk_tier: RiskTier,
    #[serde(default)]
    pub owner: Option<String>,
    /// Task ids this task depends on.
    #[serde(default)]
    pub dependencies: Vec<TaskId>,
    #[serde(default)]
    pub dependency_recommendation_ids: Vec<String>,
    #[serde(default)]
    pub actions: Vec<String>,
    #[serde(default)]
    pub success_criteria: Vec<String>,
    #[serde(default)]
    pub rollback_plan: RollbackPlan,
    #[serde(default)]
    pub policy_gate: PolicyGate,
    #[serde(default)]
    pub source: Map<String, Value>,
}

impl TaskNode {
    pub fn is_root(&self) -> bool {
        self.dependencies.is_empty()
    }

    /// Short human-readable request text: `[P1] Title. First action`.
    pub fn task_text(&self) -> String {
        let primary = self
            .actions
            .first()
            .cloned()
            .unwrap_or_else(|| format!("Execute {}", self.title));
        format!("[{}] {}. {}", self.priority, self.title, primary)
    }
}
