//! Reconcile a validated task DAG against a packaged request/blocked list.
//!
//! Every packaged request and blocked item lands in exactly one of the
//! dispatch or blocked sets. Blocked items whose approval has since been
//! granted are released back into dispatch through their release template.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use super::gate::{normalize_approver_target, ApprovalFlow, GateView};
use super::package::{BlockedPackageItem, ReleaseTemplate, TaskPackage};
use super::protocol::{
    target_for_risk, DispatchRequest, RequestPriority, TaskRequestBuilder, TaskRequestSpec,
    DEFAULT_FROM_AGENT,
};
use crate::clock::Clock;
use crate::core::dag::TaskDag;
use crate::core::task::{PolicyGate, RiskTier, TaskId, TaskNode};
use crate::identity::{derive_identity, IdentityNamespace};
use crate::{clog_debug, clog_warn, Result};

pub const AWAITING_HUMAN_APPROVAL: &str = "awaiting_human_approval";
pub const TASK_BLOCKED_KIND: &str = "task_blocked";
const DISPATCH_PLANNER: &str = "cognition-core/dispatch";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockedSource {
    DispatchRequest,
    TaskPackageBlocked,
}

impl BlockedSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockedSource::DispatchRequest => "dispatch_request",
            BlockedSource::TaskPackageBlocked => "task_package_blocked",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FollowUp {
    pub required_approvers: Vec<String>,
    pub approver_targets: Vec<String>,
    pub ticket: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Traceability {
    pub blocked_trace_id: String,
    pub release_key: String,
    pub release_ready: bool,
    pub release_template_present: bool,
    pub release_request_id: String,
}

/// A task withheld from dispatch this run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockedJournalEntry {
    pub kind: String,
    pub task_id: TaskId,
    pub recommendation_id: Option<String>,
    pub from: String,
    pub target: Option<String>,
    pub reason: String,
    pub blocked_source: BlockedSource,
    pub approval_flow: ApprovalFlow,
    pub follow_up: FollowUp,
    pub traceability: Traceability,
    pub policy_gate: Option<Map<String, Value>>,
    pub context: Map<String, Value>,
    pub created_at: i64,
}

impl BlockedJournalEntry {
    pub fn is_awaiting_approval(&self) -> bool {
        self.reason == AWAITING_HUMAN_APPROVAL
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchStats {
    pub request_count: usize,
    pub package_blocked_count: usize,
    pub dispatch_count: usize,
    pub blocked_count: usize,
    pub blocked_pending_count: usize,
    pub blocked_approval_required_count: usize,
    pub released_after_approval_count: usize,
    pub blocked_by_reason: BTreeMap<String, usize>,
    pub blocked_by_source: BTreeMap<String, usize>,
    pub blocked_by_approval_status: BTreeMap<String, usize>,
}

impl DispatchStats {
    fn collect(
        package: &TaskPackage,
        dispatch_entries: &[DispatchRequest],
        blocked_entries: &[BlockedJournalEntry],
        released: &[TaskId],
    ) -> Self {
        let mut stats = DispatchStats {
            request_count: package.requests.len(),
            package_blocked_count: package.blocked.len(),
            dispatch_count: dispatch_entries.len(),
            blocked_count: blocked_entries.len(),
            released_after_approval_count: released.len(),
            ..Default::default()
        };

        for entry in blocked_entries {
            if entry.is_awaiting_approval() {
                stats.blocked_pending_count += 1;
            }
            if entry.approval_flow.requires_human_approval {
                stats.blocked_approval_required_count += 1;
            }
            *stats.blocked_by_reason.entry(entry.reason.clone()).or_default() += 1;
            *stats
                .blocked_by_source
                .entry(entry.blocked_source.as_str().to_string())
                .or_default() += 1;
            let status = entry
                .approval_flow
                .approval_status
                .clone()
                .unwrap_or_else(|| "none".to_string());
            *stats.blocked_by_approval_status.entry(status).or_default() += 1;
        }

        stats
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct DispatchOutcome {
    pub dispatch_entries: Vec<DispatchRequest>,
    pub blocked_entries: Vec<BlockedJournalEntry>,
    pub released_after_approval_task_ids: Vec<TaskId>,
    pub stats: DispatchStats,
}

/// Everything a blocked entry is assembled from.
struct BlockedInput<'a> {
    task_id: TaskId,
    recommendation_id: Option<String>,
    from: String,
    target: Option<String>,
    reason: String,
    source: BlockedSource,
    gate: Option<Map<String, Value>>,
    task: Option<&'a TaskNode>,
    item: Option<&'a BlockedPackageItem>,
    request_context: Option<&'a Map<String, Value>>,
}

pub struct DispatchReconciler<'a> {
    tasks: HashMap<&'a TaskId, &'a TaskNode>,
    clock: &'a dyn Clock,
    builder: &'a dyn TaskRequestBuilder,
    from_agent: String,
}

impl<'a> DispatchReconciler<'a> {
    /// Fails if the DAG does not validate; an invalid graph never reaches dispatch.
    pub fn new(
        dag: &'a TaskDag,
        clock: &'a dyn Clock,
        builder: &'a dyn TaskRequestBuilder,
    ) -> Result<Self> {
        dag.assert_valid()?;
        Ok(Self {
            tasks: dag.tasks_by_id(),
            clock,
            builder,
            from_agent: DEFAULT_FROM_AGENT.to_string(),
        })
    }

    /// Agent used as `from` on released and package-blocked entries when the
    /// item does not name one.
    pub fn with_from_agent(mut self, from_agent: impl Into<String>) -> Self {
        self.from_agent = from_agent.into();
        self
    }

    pub fn reconcile(&self, package: &TaskPackage) -> Result<DispatchOutcome> {
        let base = self.clock.now_millis();
        let mut processed: HashSet<String> = HashSet::new();
        let mut dispatch_entries = Vec::new();
        let mut blocked_entries: Vec<BlockedJournalEntry> = Vec::new();
        let mut released = Vec::new();

        for request in &package.requests {
            if !processed.insert(request.id.clone()) {
                clog_debug!("skipping repeated request {}", request.id);
                continue;
            }

            let task_id = TaskId::from(request.id.as_str());
            let task = self.tasks.get(&task_id).copied();
            if task.is_none() {
                clog_warn!("request {} has no task in the DAG", request.id);
            }

            let context = enrich_request_context(request, task)?;
            let gate = context.get("policyGate").and_then(Value::as_object).cloned();

            if GateView::new(gate.as_ref()).is_pending_approval() {
                let recommendation_id = context
                    .get("recommendationId")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .or_else(|| task.map(|t| t.recommendation_id.clone()));
                let entry = self.blocked_entry(
                    BlockedInput {
                        task_id,
                        recommendation_id,
                        from: request.from.clone(),
                        target: request.target.clone(),
                        reason: AWAITING_HUMAN_APPROVAL.to_string(),
                        source: BlockedSource::DispatchRequest,
                        gate,
                        task,
                        item: None,
                        request_context: Some(&context),
                    },
                    base + blocked_entries.len() as i64,
                );
                blocked_entries.push(entry);
                continue;
            }

            let mut entry = request.clone();
            entry.context = context;
            dispatch_entries.push(entry);
        }

        for item in &package.blocked {
            if !processed.insert(item.task_id.0.clone()) {
                clog_debug!("blocked item {} already handled", item.task_id);
                continue;
            }

            let task = self.tasks.get(&item.task_id).copied();
            let gate = match (&item.policy_gate, task) {
                (Some(gate), _) => Some(gate.clone()),
                (None, Some(task)) => Some(gate_record(&task.policy_gate)?),
                (None, None) => None,
            };

            let view = GateView::new(gate.as_ref());
            if let (true, Some(template)) = (view.is_release_ready(), item.release_template()) {
                let at = base + released.len() as i64;
                let request = self.release_request(item, template, gate.as_ref(), task, at)?;
                clog_debug!("released {} after approval", item.task_id);
                released.push(item.task_id.clone());
                dispatch_entries.push(request);
                continue;
            }

            let template = item.release_template();
            let entry = self.blocked_entry(
                BlockedInput {
                    task_id: item.task_id.clone(),
                    recommendation_id: item
                        .recommendation_id
                        .clone()
                        .or_else(|| task.map(|t| t.recommendation_id.clone())),
                    from: template
                        .and_then(|t| non_blank(t.from.as_deref()))
                        .unwrap_or_else(|| self.from_agent.clone()),
                    target: template.and_then(|t| non_blank(t.target.as_deref())),
                    reason: item.reason.clone(),
                    source: BlockedSource::TaskPackageBlocked,
                    gate,
                    task,
                    item: Some(item),
                    request_context: None,
                },
                base + blocked_entries.len() as i64,
            );
            blocked_entries.push(entry);
        }

        let stats = DispatchStats::collect(package, &dispatch_entries, &blocked_entries, &released);
        Ok(DispatchOutcome {
            dispatch_entries,
            blocked_entries,
            released_after_approval_task_ids: released,
            stats,
        })
    }

    fn release_request(
        &self,
        item: &BlockedPackageItem,
        template: &ReleaseTemplate,
        gate: Option<&Map<String, Value>>,
        task: Option<&TaskNode>,
        created_at: i64,
    ) -> Result<DispatchRequest> {
        let view = GateView::new(gate);
        let risk_tier = match (view.risk_tier(), task) {
            (RiskTier::Unknown, Some(task)) => task.risk_tier,
            (tier, _) => tier,
        };
        let recommendation_id = item
            .recommendation_id
            .clone()
            .or_else(|| task.map(|t| t.recommendation_id.clone()));
        let traceability = traceability_for(&item.task_id, recommendation_id.as_deref(), Some(item), &view);

        let mut context = template.context.clone();
        if let Some(gate) = gate {
            context.insert("policyGate".to_string(), Value::Object(gate.clone()));
        }
        context.insert(
            "approvalRelease".to_string(),
            json!({
                "blockedReason": item.reason,
                "blockedTraceId": traceability.blocked_trace_id,
                "releaseKey": traceability.release_key,
                "releaseTraceId": format!("release-trace:{}", item.task_id),
                "releaseRequestId": traceability.release_request_id,
                "releasedAt": self.clock.now_millis(),
            }),
        );

        let task_text = non_blank(template.task.as_deref())
            .or_else(|| task.map(TaskNode::task_text))
            .unwrap_or_else(|| format!("Release blocked task {}", item.task_id));

        self.builder.build_task_request(TaskRequestSpec {
            id: Some(item.task_id.0.clone()),
            from: non_blank(template.from.as_deref()).unwrap_or_else(|| self.from_agent.clone()),
            target: Some(
                non_blank(template.target.as_deref())
                    .unwrap_or_else(|| target_for_risk(risk_tier).to_string()),
            ),
            priority: template
                .priority
                .unwrap_or_else(|| RequestPriority::from_task_priority(task.map(|t| t.priority))),
            task: task_text,
            context,
            constraints: template.constraints.clone(),
            created_at,
        })
    }

    fn blocked_entry(&self, input: BlockedInput<'_>, created_at: i64) -> BlockedJournalEntry {
        let view = GateView::new(input.gate.as_ref());
        let approval_flow = view.approval_flow();
        let follow_up = follow_up_for(input.item, &view);
        let traceability = traceability_for(
            &input.task_id,
            input.recommendation_id.as_deref(),
            input.item,
            &view,
        );

        let dependencies = match (input.task, input.item) {
            (Some(task), _) => ids_value(&task.dependencies),
            (None, Some(item)) => ids_value(&item.dependencies),
            (None, None) => Value::Array(Vec::new()),
        };
        let success_criteria = input
            .task
            .map(|t| json!(t.success_criteria))
            .or_else(|| input.request_context.and_then(|c| c.get("successCriteria").cloned()))
            .unwrap_or_else(|| Value::Array(Vec::new()));
        let rollback_plan = input
            .task
            .map(|t| json!(t.rollback_plan))
            .or_else(|| input.request_context.and_then(|c| c.get("rollbackPlan").cloned()))
            .unwrap_or(Value::Null);
        let gate_value = input.gate.clone().map(Value::Object).unwrap_or(Value::Null);

        let mut context = Map::new();
        context.insert("planner".to_string(), json!(DISPATCH_PLANNER));
        context.insert("recommendationId".to_string(), json!(input.recommendation_id));
        context.insert("dependencies".to_string(), dependencies);
        context.insert("successCriteria".to_string(), success_criteria);
        context.insert("rollbackPlan".to_string(), rollback_plan);
        context.insert("policyGate".to_string(), gate_value);
        context.insert("approvalFlow".to_string(), json!(approval_flow));
        context.insert("followUp".to_string(), json!(follow_up));
        context.insert("traceability".to_string(), json!(traceability));

        BlockedJournalEntry {
            kind: TASK_BLOCKED_KIND.to_string(),
            task_id: input.task_id,
            recommendation_id: input.recommendation_id,
            from: input.from,
            target: input.target,
            reason: input.reason,
            blocked_source: input.source,
            approval_flow,
            follow_up,
            traceability,
            policy_gate: input.gate,
            context,
            created_at,
        }
    }
}

/// Request context with DAG-sourced fields filled in. Request values win.
fn enrich_request_context(
    request: &DispatchRequest,
    task: Option<&TaskNode>,
) -> Result<Map<String, Value>> {
    let mut context = request.context.clone();

    let recommendation_id = match context.get("recommendationId") {
        Some(Value::String(id)) => json!(id),
        _ => task
            .map(|t| json!(t.recommendation_id))
            .unwrap_or(Value::Null),
    };
    context.insert("recommendationId".to_string(), recommendation_id);

    if !context.get("successCriteria").is_some_and(Value::is_array) {
        let criteria = task.map(|t| json!(t.success_criteria)).unwrap_or_else(|| json!([]));
        context.insert("successCriteria".to_string(), criteria);
    }

    if !context.get("rollbackPlan").is_some_and(Value::is_object) {
        let plan = task.map(|t| json!(t.rollback_plan)).unwrap_or(Value::Null);
        context.insert("rollbackPlan".to_string(), plan);
    }

    let mut gate = match task {
        Some(task) => Some(gate_record(&task.policy_gate)?),
        None => None,
    };
    if let Some(overrides) = context.get("policyGate").and_then(Value::as_object) {
        let merged = gate.get_or_insert_with(Map::new);
        for (key, value) in overrides {
            merged.insert(key.clone(), value.clone());
        }
    }
    context.insert(
        "policyGate".to_string(),
        gate.map(Value::Object).unwrap_or(Value::Null),
    );

    Ok(context)
}

fn follow_up_for(item: Option<&BlockedPackageItem>, view: &GateView<'_>) -> FollowUp {
    let metadata = item.and_then(BlockedPackageItem::follow_up);

    let required_approvers = match metadata {
        Some(follow_up) => follow_up.required_approvers.clone(),
        None => view.required_approvers(),
    };
    let approver_targets = match metadata {
        Some(follow_up) if !follow_up.approver_targets.is_empty() => {
            follow_up.approver_targets.clone()
        }
        _ => required_approvers
            .iter()
            .map(|approver| normalize_approver_target(approver))
            .collect(),
    };
    let ticket = metadata
        .and_then(|follow_up| non_blank(follow_up.ticket.as_deref()))
        .or_else(|| view.ticket());

    FollowUp {
        required_approvers,
        approver_targets,
        ticket,
    }
}

fn traceability_for(
    task_id: &TaskId,
    recommendation_id: Option<&str>,
    item: Option<&BlockedPackageItem>,
    view: &GateView<'_>,
) -> Traceability {
    let metadata = item.and_then(BlockedPackageItem::traceability);

    let release_key = metadata
        .and_then(|t| non_blank(t.release_key.as_deref()))
        .unwrap_or_else(|| {
            format!("release:{}:{}", task_id, recommendation_id.unwrap_or("unknown"))
        });
    let blocked_trace_id = metadata
        .and_then(|t| non_blank(t.blocked_trace_id.as_deref()))
        .unwrap_or_else(|| format!("blocked:{task_id}"));
    let release_ready = metadata
        .and_then(|t| t.release_ready)
        .unwrap_or_else(|| view.is_release_ready());

    Traceability {
        release_request_id: derive_identity(IdentityNamespace::Release, &release_key),
        blocked_trace_id,
        release_key,
        release_ready,
        release_template_present: item.and_then(BlockedPackageItem::release_template).is_some(),
    }
}

fn gate_record(gate: &PolicyGate) -> Result<Map<String, Value>> {
    match serde_json::to_value(gate)? {
        Value::Object(map) => Ok(map),
        _ => Ok(Map::new()),
    }
}

fn ids_value(ids: &[TaskId]) -> Value {
    Value::Array(ids.iter().map(|id| json!(id.as_str())).collect())
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}
