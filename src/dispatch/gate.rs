//! Read-only view over a policy gate as it appears in dispatch inputs.
//!
//! Gates reaching dispatch are loose JSON records (from request context,
//! packaged blocked items, or a DAG task), so every accessor tolerates
//! missing or mistyped fields.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::protocol::DEFAULT_TARGET;
use crate::core::recommendation::{string_list, unique_sorted};
use crate::core::task::{ApprovalStatus, RiskTier};

static SLUG_INVALID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-z0-9:_-]+").unwrap());

static SLUG_REPEAT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"-+").unwrap());

/// Raw statuses that always mean the item is waiting on a human.
const PENDING_STATUSES: &[&str] = &["pending", "required", "awaiting_approval"];

#[derive(Debug, Clone, Copy, Default)]
pub struct GateView<'a> {
    gate: Option<&'a Map<String, Value>>,
}

impl<'a> GateView<'a> {
    /// Wrap a gate record; `None` behaves as a gate that asks for nothing.
    pub fn new(gate: Option<&'a Map<String, Value>>) -> Self {
        Self { gate }
    }

    fn field(&self, key: &str) -> Option<&'a Value> {
        self.gate.and_then(|gate| gate.get(key))
    }

    /// True only for a literal `true`.
    pub fn requires_human_approval(&self) -> bool {
        self.field("requiresHumanApproval") == Some(&Value::Bool(true))
    }

    /// True only for a literal `true`.
    pub fn gate_passed(&self) -> bool {
        self.field("gatePassed") == Some(&Value::Bool(true))
    }

    /// Trimmed, lowercased status exactly as supplied.
    pub fn raw_status(&self) -> Option<String> {
        self.field("approvalStatus")
            .and_then(Value::as_str)
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
    }

    /// Status folded through the approval synonym table.
    pub fn approval_status(&self) -> Option<ApprovalStatus> {
        ApprovalStatus::from_value(self.field("approvalStatus"))
    }

    /// The gate's own marker, or `None` when it does not state one.
    pub fn approval_marker_present(&self) -> Option<bool> {
        self.field("approvalMarkerPresent").and_then(Value::as_bool)
    }

    /// Gate risk tier; `Unknown` when absent or unrecognized.
    pub fn risk_tier(&self) -> RiskTier {
        self.field("riskTier")
            .and_then(Value::as_str)
            .map(RiskTier::parse)
            .unwrap_or_default()
    }

    /// Upstream gate fields carried through compilation untouched.
    pub fn passthrough(&self) -> Option<&'a Map<String, Value>> {
        self.field("passthrough").and_then(Value::as_object)
    }

    /// `passthrough.requiredApprovers`, deduplicated and sorted. Non-array
    /// values yield no approvers.
    pub fn required_approvers(&self) -> Vec<String> {
        let approvers = match self.passthrough().and_then(|p| p.get("requiredApprovers")) {
            Some(list @ Value::Array(_)) => string_list(Some(list)),
            _ => Vec::new(),
        };
        unique_sorted(approvers)
    }

    /// Non-blank `passthrough.ticket`.
    pub fn ticket(&self) -> Option<String> {
        self.passthrough()
            .and_then(|p| p.get("ticket"))
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    }

    /// Approval is required and has not been granted yet.
    pub fn is_pending_approval(&self) -> bool {
        if !self.requires_human_approval() {
            return false;
        }
        let status = self.raw_status();
        let status = status.as_deref();
        if status.is_some_and(|s| PENDING_STATUSES.contains(&s)) {
            return true;
        }
        !self.gate_passed() && !matches!(status, Some("approved") | Some("not_required"))
    }

    /// Approval was required, granted, and the gate now passes.
    pub fn is_release_ready(&self) -> bool {
        self.requires_human_approval()
            && self.gate_passed()
            && self.approval_status() == Some(ApprovalStatus::Approved)
    }

    /// Snapshot of the gate as recorded on blocked journal entries.
    pub fn approval_flow(&self) -> ApprovalFlow {
        ApprovalFlow {
            requires_human_approval: self.requires_human_approval(),
            approval_status: self.approval_status().map(String::from),
            gate_passed: self.gate_passed(),
            approval_marker_present: self.approval_marker_present(),
            risk_tier: self.risk_tier(),
            required_approvers: self.required_approvers(),
        }
    }
}

/// Approval state carried on blocked entries and follow-up requests.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalFlow {
    pub requires_human_approval: bool,
    pub approval_status: Option<String>,
    pub gate_passed: bool,
    pub approval_marker_present: Option<bool>,
    pub risk_tier: RiskTier,
    pub required_approvers: Vec<String>,
}

impl ApprovalFlow {
    pub fn is_pending(&self) -> bool {
        self.approval_status.as_deref() == Some(ApprovalStatus::Pending.as_str())
    }
}

/// Canonical `agent:<slug>` target for an approver name.
pub fn normalize_approver_target(approver: &str) -> String {
    let trimmed = approver.trim();
    if trimmed.is_empty() {
        return DEFAULT_TARGET.to_string();
    }
    if trimmed.starts_with("agent:") {
        return trimmed.to_string();
    }

    let lowered = trimmed.to_lowercase();
    let slug = SLUG_INVALID_RE.replace_all(&lowered, "-");
    let slug = SLUG_REPEAT_RE.replace_all(&slug, "-");
    let slug = slug.trim_matches('-');

    if slug.starts_with("agent:") {
        slug.to_string()
    } else if slug.is_empty() {
        DEFAULT_TARGET.to_string()
    } else {
        format!("agent:{slug}")
    }
}
