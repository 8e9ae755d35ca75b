//! Recommendation normalization.
//!
//! Recommendations arrive as loosely shaped JSON records with several alias
//! keys per field. [`normalize_recommendations`] is the only place untyped
//! recommendation data is read; everything downstream works on
//! [`NormalizedRecommendation`].

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::task::{ApprovalStatus, Priority, RiskTier, RollbackPlan};
use crate::{clog_debug, Error, Result};

const DEFAULT_ROLLBACK_TRIGGER: &str = "Regression, policy breach, or failed verification";
const DEFAULT_ROLLBACK_STEPS: [&str; 3] = [
    "Disable or revert the change",
    "Restore the last known good state",
    "Re-run verification checks",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedRecommendation {
    pub recommendation_id: String,
    pub title: String,
    pub priority: Priority,
    pub priority_score: u8,
    pub risk_tier: RiskTier,
    pub requires_human_approval: bool,
    pub approval_status: Option<ApprovalStatus>,
    pub policy_passthrough: Option<Map<String, Value>>,
    pub owner: Option<String>,
    /// Recommendation ids, deduplicated and sorted.
    pub dependencies: Vec<String>,
    pub actions: Vec<String>,
    pub success_criteria: Vec<String>,
    pub rollback_plan: RollbackPlan,
    pub source: Map<String, Value>,
    pub original_index: usize,
}

/// Normalize a JSON list of raw recommendations.
///
/// Output is sorted by `(priority_score, recommendation_id, original_index)`.
///
/// # Errors
/// Returns [`Error::InvalidInput`] if `input` is not a JSON array.
pub fn normalize_recommendations(input: &Value) -> Result<Vec<NormalizedRecommendation>> {
    let items = input
        .as_array()
        .ok_or_else(|| Error::InvalidInput("recommendations must be an array".to_string()))?;

    let mut normalized: Vec<NormalizedRecommendation> = items
        .iter()
        .enumerate()
        .map(|(index, candidate)| normalize_one(candidate, index))
        .collect();

    normalized.sort_by(|a, b| {
        a.priority_score
            .cmp(&b.priority_score)
            .then_with(|| a.recommendation_id.cmp(&b.recommendation_id))
            .then_with(|| a.original_index.cmp(&b.original_index))
    });

    clog_debug!("{} records", normalized.len());
    Ok(normalized)
}

fn normalize_one(candidate: &Value, index: usize) -> NormalizedRecommendation {
    let empty = Map::new();
    let record = candidate.as_object().unwrap_or(&empty);
    let fallback_id = format!("rec-{}", index + 1);

    let recommendation_id = first_present(record, &["recommendationId", "id"])
        .and_then(scalar_string)
        .filter(|id| !id.is_empty())
        .unwrap_or(fallback_id);

    let title = first_present(record, &["title", "summary"])
        .and_then(scalar_string)
        .filter(|title| !title.is_empty())
        .unwrap_or_else(|| recommendation_id.clone());

    let priority = to_priority(record.get("priority"));

    let risk = as_record(record.get("risk"));
    let risk_tier = record
        .get("riskTier")
        .filter(|v| !v.is_null())
        .or_else(|| risk.and_then(|r| first_present(r, &["tier", "level"])))
        .and_then(scalar_string)
        .map(|tier| RiskTier::parse(&tier))
        .unwrap_or(RiskTier::Unknown);

    let approval = as_record(record.get("approval"));
    let approval_status = ApprovalStatus::from_value(
        record
            .get("approvalStatus")
            .filter(|v| !v.is_null())
            .or_else(|| approval.and_then(|a| a.get("status"))),
    );

    let requires_human_approval = record
        .get("requiresHumanApproval")
        .and_then(Value::as_bool)
        .unwrap_or_else(|| risk_tier.is_high_risk());

    let owner = first_present(record, &["owner", "ownerSuggestion", "routeTo"])
        .or_else(|| as_record(record.get("routing")).and_then(|r| r.get("owner")))
        .and_then(non_blank_string);

    let dependencies = extract_dependencies(record, &recommendation_id);
    let actions = extract_actions(record, &title);
    let success_criteria = extract_success_criteria(record, &recommendation_id);
    let rollback_plan = extract_rollback_plan(record, owner.as_deref());

    let policy_passthrough = as_record(record.get("policyGate"))
        .filter(|gate| !gate.is_empty())
        .or_else(|| approval.filter(|a| !a.is_empty()))
        .cloned();

    NormalizedRecommendation {
        recommendation_id,
        title,
        priority,
        priority_score: priority.score(),
        risk_tier,
        requires_human_approval,
        approval_status,
        policy_passthrough,
        owner,
        dependencies,
        actions,
        success_criteria,
        rollback_plan,
        source: record.clone(),
        original_index: index,
    }
}

fn to_priority(value: Option<&Value>) -> Priority {
    match value {
        Some(Value::Number(n)) => n.as_f64().map(Priority::from_number).unwrap_or_default(),
        Some(Value::String(label)) => Priority::from_label(label).unwrap_or_default(),
        _ => Priority::default(),
    }
}

fn extract_dependencies(record: &Map<String, Value>, recommendation_id: &str) -> Vec<String> {
    let merged: Vec<String> = ["dependencies", "dependsOn", "prerequisiteIds", "blockedBy"]
        .iter()
        .flat_map(|key| string_list(record.get(*key)))
        .collect();

    let (own, others): (Vec<String>, Vec<String>) =
        merged.into_iter().partition(|dep| dep == recommendation_id);
    if !own.is_empty() {
        clog_debug!("dropping self reference on recommendation {}", recommendation_id);
    }

    unique_sorted(others)
}

fn extract_actions(record: &Map<String, Value>, title: &str) -> Vec<String> {
    let mut merged: Vec<String> = ["actions", "commands", "command"]
        .iter()
        .flat_map(|key| string_list(record.get(*key)))
        .collect();
    if let Some(execution) = as_record(record.get("execution")) {
        merged.extend(string_list(execution.get("actions")));
    }

    let deduped = unique_sorted(merged);
    if deduped.is_empty() {
        vec![format!("Execute recommendation: {}", title)]
    } else {
        deduped
    }
}

fn extract_success_criteria(record: &Map<String, Value>, recommendation_id: &str) -> Vec<String> {
    let direct = string_list(record.get("successCriteria"));
    if !direct.is_empty() {
        return unique_sorted(direct);
    }

    let from_plan = match record.get("verificationPlan") {
        Some(Value::String(_)) | Some(Value::Array(_)) => {
            unique_sorted(string_list(record.get("verificationPlan")))
        }
        Some(Value::Object(plan)) => unique_sorted(
            ["successCriteria", "criteria", "checks"]
                .iter()
                .flat_map(|key| string_list(plan.get(*key)))
                .collect(),
        ),
        _ => Vec::new(),
    };

    if from_plan.is_empty() {
        vec![format!("Verify {} meets expected outcome", recommendation_id)]
    } else {
        from_plan
    }
}

fn extract_rollback_plan(record: &Map<String, Value>, owner: Option<&str>) -> RollbackPlan {
    // `rollbackPlan` keys override `rollback` keys.
    let mut merged = as_record(record.get("rollback")).cloned().unwrap_or_default();
    if let Some(plan) = as_record(record.get("rollbackPlan")) {
        for (key, value) in plan {
            merged.insert(key.clone(), value.clone());
        }
    }

    let trigger = merged
        .get("trigger")
        .and_then(non_blank_string)
        .unwrap_or_else(|| DEFAULT_ROLLBACK_TRIGGER.to_string());

    let plan_owner = merged
        .get("owner")
        .and_then(non_blank_string)
        .or_else(|| owner.map(str::to_string));

    let mut steps = string_list(merged.get("steps"));
    steps.extend(string_list(merged.get("actions")));
    let steps = unique_sorted(steps);
    let steps = if steps.is_empty() {
        DEFAULT_ROLLBACK_STEPS.iter().map(|s| s.to_string()).collect()
    } else {
        steps
    };

    RollbackPlan {
        trigger,
        owner: plan_owner,
        steps,
        data_recovery: merged.get("dataRecovery").and_then(non_blank_string),
    }
}

/// First key whose value is present and not null.
fn first_present<'a>(record: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|key| record.get(*key))
        .find(|value| !value.is_null())
}

fn as_record(value: Option<&Value>) -> Option<&Map<String, Value>> {
    value.and_then(Value::as_object)
}

/// Stringify a scalar, trimmed. Objects, arrays and null yield `None`.
fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn non_blank_string(value: &Value) -> Option<String> {
    value
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// A list or single string as trimmed, non-blank strings.
pub(crate) fn string_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(scalar_string)
            .filter(|s| !s.is_empty())
            .collect(),
        Some(Value::String(s)) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                Vec::new()
            } else {
                vec![trimmed.to_string()]
            }
        }
        _ => Vec::new(),
    }
}

pub(crate) fn unique_sorted(values: Vec<String>) -> Vec<String> {
    values
        .into_iter()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}
