//! Approval follow-up requests for blocked tasks that are waiting on a human.

use std::collections::HashSet;

use serde_json::{json, Map, Value};

use super::gate::normalize_approver_target;
use super::protocol::{
    DispatchRequest, RequestPriority, TaskRequestBuilder, TaskRequestSpec, DEFAULT_FROM_AGENT,
};
use super::reconciler::BlockedJournalEntry;
use crate::clock::Clock;
use crate::identity::{derive_identity, IdentityNamespace};
use crate::{clog_debug, Result};

pub const FOLLOW_UP_PLANNER: &str = "cognition-core/approval-follow-up";
pub const FOLLOW_UP_CONSTRAINTS: [&str; 2] =
    ["approval-review-only", "no-execution-without-approval"];

/// Assignee used when a blocked entry names no approver at all.
pub const DEFAULT_APPROVER: &str = "team-lead";

/// One approver and the agent that should receive the request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ApproverAssignment {
    pub approver: String,
    pub target: String,
}

/// Resolve (approver, target) pairs for a blocked entry.
///
/// Approvers and targets are paired by position; an approver without a
/// target gets its canonical `agent:` form. Duplicate pairs are dropped.
pub fn approver_assignments(entry: &BlockedJournalEntry) -> Vec<ApproverAssignment> {
    let follow_up = &entry.follow_up;
    let approvers = if follow_up.required_approvers.is_empty() {
        &entry.approval_flow.required_approvers
    } else {
        &follow_up.required_approvers
    };

    let mut pairs: Vec<ApproverAssignment> = Vec::new();
    let count = approvers.len().max(follow_up.approver_targets.len());
    for index in 0..count {
        let approver = approvers.get(index).map(|a| a.trim()).filter(|a| !a.is_empty());
        let target = follow_up
            .approver_targets
            .get(index)
            .map(|t| t.trim())
            .filter(|t| !t.is_empty());

        let pair = match (approver, target) {
            (Some(approver), Some(target)) => ApproverAssignment {
                approver: approver.to_string(),
                target: target.to_string(),
            },
            (Some(approver), None) => ApproverAssignment {
                approver: approver.to_string(),
                target: normalize_approver_target(approver),
            },
            (None, Some(target)) => ApproverAssignment {
                approver: target.to_string(),
                target: target.to_string(),
            },
            (None, None) => continue,
        };
        if !pairs.contains(&pair) {
            pairs.push(pair);
        }
    }

    if pairs.is_empty() {
        pairs.push(ApproverAssignment {
            approver: DEFAULT_APPROVER.to_string(),
            target: normalize_approver_target(DEFAULT_APPROVER),
        });
    }
    pairs
}

/// Build follow-up requests for every blocked entry awaiting approval.
///
/// At most one request is emitted per (blocked task, target) pair.
pub fn build_approval_follow_ups(
    blocked_entries: &[BlockedJournalEntry],
    clock: &dyn Clock,
    builder: &dyn TaskRequestBuilder,
) -> Result<Vec<DispatchRequest>> {
    let base = clock.now_millis();
    let mut seen: HashSet<(String, String)> = HashSet::new();
    let mut follow_ups = Vec::new();

    for entry in blocked_entries {
        let flow = &entry.approval_flow;
        if !flow.requires_human_approval || !flow.is_pending() {
            continue;
        }

        for assignment in approver_assignments(entry) {
            if !seen.insert((entry.task_id.0.clone(), assignment.target.clone())) {
                continue;
            }

            let request = builder.build_task_request(TaskRequestSpec {
                id: Some(derive_identity(
                    IdentityNamespace::ApprovalFollowUp,
                    &format!("{}:{}", entry.task_id, assignment.target),
                )),
                from: DEFAULT_FROM_AGENT.to_string(),
                target: Some(assignment.target.clone()),
                priority: if flow.risk_tier.is_high_risk() {
                    RequestPriority::High
                } else {
                    RequestPriority::Normal
                },
                task: follow_up_task_text(entry, &assignment),
                context: follow_up_context(entry, &assignment),
                constraints: Some(FOLLOW_UP_CONSTRAINTS.iter().map(|c| c.to_string()).collect()),
                created_at: base + follow_ups.len() as i64,
            })?;
            clog_debug!(
                "{} -> {} for blocked task {}",
                request.id,
                assignment.target,
                entry.task_id
            );
            follow_ups.push(request);
        }
    }

    Ok(follow_ups)
}

fn follow_up_task_text(entry: &BlockedJournalEntry, assignment: &ApproverAssignment) -> String {
    let recommendation = entry.recommendation_id.as_deref().unwrap_or("unknown");
    let mut text = format!(
        "Approval needed from {} for recommendation {} (blocked task {}).",
        assignment.approver, recommendation, entry.task_id
    );
    if let Some(ticket) = &entry.follow_up.ticket {
        text.push_str(&format!(" Ticket: {ticket}."));
    }
    text
}

fn follow_up_context(entry: &BlockedJournalEntry, assignment: &ApproverAssignment) -> Map<String, Value> {
    let mut context = Map::new();
    context.insert("planner".to_string(), json!(FOLLOW_UP_PLANNER));
    context.insert("blockedTaskId".to_string(), json!(entry.task_id));
    context.insert("recommendationId".to_string(), json!(entry.recommendation_id));
    context.insert("blockedReason".to_string(), json!(entry.reason));
    context.insert(
        "approver".to_string(),
        json!({"name": assignment.approver, "target": assignment.target}),
    );
    context.insert("approvalFlow".to_string(), json!(entry.approval_flow));
    context.insert("traceability".to_string(), json!(entry.traceability));
    context.insert("followUp".to_string(), json!(entry.follow_up));
    context
}
