//! Task-request wire shape and the request-builder seam.
//!
//! Dispatch requests are produced by an external task protocol. This core
//! reads and writes only `id` and `context`; every other field, including
//! ones it does not know about, is carried through untouched.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::core::task::{Priority, RiskTier};
use crate::{Error, Result};

pub const TASK_REQUEST_KIND: &str = "task_request";

/// Agent every generated request is sent from unless a template says otherwise.
pub const DEFAULT_FROM_AGENT: &str = "agent:cognition-core";
pub const DEFAULT_TARGET: &str = "agent:ops";
pub const HIGH_RISK_TARGET: &str = "agent:ops:high-risk";
pub const CRITICAL_TARGET: &str = "agent:ops:critical";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestPriority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

impl RequestPriority {
    /// P0 critical, P1 high, P2 normal, anything else low.
    pub fn from_task_priority(priority: Option<Priority>) -> Self {
        match priority {
            Some(Priority::P0) => RequestPriority::Critical,
            Some(Priority::P1) => RequestPriority::High,
            Some(Priority::P2) => RequestPriority::Normal,
            _ => RequestPriority::Low,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RequestPriority::Low => "low",
            RequestPriority::Normal => "normal",
            RequestPriority::High => "high",
            RequestPriority::Critical => "critical",
        }
    }
}

impl std::fmt::Display for RequestPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Default target agent for a risk tier.
pub fn target_for_risk(risk_tier: RiskTier) -> &'static str {
    match risk_tier {
        RiskTier::Critical => CRITICAL_TARGET,
        RiskTier::High => HIGH_RISK_TARGET,
        _ => DEFAULT_TARGET,
    }
}

fn task_request_kind() -> String {
    TASK_REQUEST_KIND.to_string()
}

/// A task request as it appears in packages and in the journal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchRequest {
    #[serde(default = "task_request_kind")]
    pub kind: String,
    pub id: String,
    #[serde(default)]
    pub from: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default)]
    pub priority: RequestPriority,
    #[serde(default)]
    pub task: String,
    #[serde(default)]
    pub context: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraints: Option<Vec<String>>,
    #[serde(default)]
    pub created_at: i64,
    /// Fields owned by the task protocol that this core does not interpret.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Input to [`TaskRequestBuilder::build_task_request`].
#[derive(Debug, Clone, PartialEq)]
pub struct TaskRequestSpec {
    /// Omitted ids are filled with a fresh identity by the builder.
    pub id: Option<String>,
    pub from: String,
    pub target: Option<String>,
    pub priority: RequestPriority,
    pub task: String,
    pub context: Map<String, Value>,
    pub constraints: Option<Vec<String>>,
    pub created_at: i64,
}

/// Builds protocol-conformant task requests.
pub trait TaskRequestBuilder {
    fn build_task_request(&self, spec: TaskRequestSpec) -> Result<DispatchRequest>;
}

/// Default builder: stamps `kind`, assigns a UUID v4 when no id is given and
/// rejects blank `from`, `task` or `id`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProtocolTaskRequestBuilder;

impl TaskRequestBuilder for ProtocolTaskRequestBuilder {
    fn build_task_request(&self, spec: TaskRequestSpec) -> Result<DispatchRequest> {
        if spec.from.trim().is_empty() {
            return Err(Error::Validation("task request is missing from".to_string()));
        }
        if spec.task.trim().is_empty() {
            return Err(Error::Validation("task request is missing task".to_string()));
        }

        let id = match spec.id {
            Some(id) if id.trim().is_empty() => {
                return Err(Error::Validation("task request id is blank".to_string()))
            }
            Some(id) => id,
            None => Uuid::new_v4().to_string(),
        };

        Ok(DispatchRequest {
            kind: task_request_kind(),
            id,
            from: spec.from,
            target: spec.target,
            priority: spec.priority,
            task: spec.task,
            context: spec.context,
            constraints: spec.constraints.filter(|c| !c.is_empty()),
            created_at: spec.created_at,
            extra: Map::new(),
        })
    }
}
