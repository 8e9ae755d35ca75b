//! Task package artifact produced by the external packager.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::protocol::{DispatchRequest, RequestPriority};
use crate::core::task::TaskId;
use crate::{Error, Result};

/// Flat list of ready requests and pre-blocked items for one DAG.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskPackage {
    #[serde(default)]
    pub version: u32,
    #[serde(default)]
    pub generated_at: Option<String>,
    pub requests: Vec<DispatchRequest>,
    pub blocked: Vec<BlockedPackageItem>,
    #[serde(default)]
    pub stats: Value,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockedPackageItem {
    pub task_id: TaskId,
    #[serde(default)]
    pub recommendation_id: Option<String>,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub policy_gate: Option<Map<String, Value>>,
    #[serde(default)]
    pub dependencies: Vec<TaskId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<BlockedMetadata>,
}

impl BlockedPackageItem {
    pub fn follow_up(&self) -> Option<&FollowUpMetadata> {
        self.metadata.as_ref().and_then(|m| m.follow_up.as_ref())
    }

    pub fn traceability(&self) -> Option<&TraceabilityMetadata> {
        self.metadata.as_ref().and_then(|m| m.traceability.as_ref())
    }

    pub fn release_template(&self) -> Option<&ReleaseTemplate> {
        self.metadata.as_ref().and_then(|m| m.release_template.as_ref())
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockedMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub follow_up: Option<FollowUpMetadata>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub traceability: Option<TraceabilityMetadata>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_template: Option<ReleaseTemplate>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FollowUpMetadata {
    #[serde(default)]
    pub required_approvers: Vec<String>,
    #[serde(default)]
    pub approver_targets: Vec<String>,
    #[serde(default)]
    pub ticket: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceabilityMetadata {
    #[serde(default)]
    pub blocked_trace_id: Option<String>,
    #[serde(default)]
    pub release_key: Option<String>,
    #[serde(default)]
    pub release_ready: Option<bool>,
}

/// Request skeleton used to release a blocked item once approval lands.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseTemplate {
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub priority: Option<RequestPriority>,
    #[serde(default)]
    pub task: Option<String>,
    #[serde(default)]
    pub context: Map<String, Value>,
    #[serde(default)]
    pub constraints: Option<Vec<String>>,
}

impl TaskPackage {
    pub fn from_json_value(value: Value) -> Result<Self> {
        let has_lists = value.get("requests").is_some_and(Value::is_array)
            && value.get("blocked").is_some_and(Value::is_array);
        if !has_lists {
            return Err(Error::InvalidInput(
                "Task package is missing requests[]/blocked[]".to_string(),
            ));
        }
        Ok(serde_json::from_value(value)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::ArtifactNotFound(path.to_path_buf()));
        }
        Self::from_slice(&fs::read(path)?)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        Self::from_json_value(serde_json::from_slice(bytes)?)
    }

    pub fn item_count(&self) -> usize {
        self.requests.len() + self.blocked.len()
    }
}
