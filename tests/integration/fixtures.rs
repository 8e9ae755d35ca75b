//! Test fixtures for integration tests.
//!
//! Provides helpers for:
//! - A temporary workspace for artifacts
//! - Predefined recommendation sets
//! - Packaging a compiled DAG the way the external packager does

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::{json, Value};
use tempfile::TempDir;

use cognition_dispatch::core::{compile_recommendation_dag, CompileOptions, TaskDag, TaskNode};
use cognition_dispatch::dispatch::protocol::{target_for_risk, RequestPriority, DEFAULT_FROM_AGENT};
use cognition_dispatch::dispatch::{normalize_approver_target, DispatchPaths, GateView};
use cognition_dispatch::FixedClock;

pub const NOW_MS: i64 = 1_772_259_730_592;

/// A scratch directory holding one pipeline's artifacts.
pub struct TestWorkspace {
    pub temp_dir: TempDir,
    pub path: PathBuf,
}

impl TestWorkspace {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let path = temp_dir.path().to_path_buf();
        Self { temp_dir, path }
    }

    pub fn write_json(&self, relative: &str, value: &Value) -> PathBuf {
        let path = self.path.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, format!("{}\n", serde_json::to_string_pretty(value).unwrap())).unwrap();
        path
    }

    /// Paths nested a few levels deep so directory creation is exercised.
    pub fn dispatch_paths(&self) -> DispatchPaths {
        DispatchPaths {
            task_dag: self.path.join("state").join("task-dag.json"),
            task_package: self.path.join("reports").join("task-package.json"),
            journal: self.path.join("swarm").join("state").join("tasks.journal.jsonl"),
            report: self.path.join("reports").join("out").join("dispatch.report.json"),
        }
    }
}

pub fn fixed_clock() -> FixedClock {
    FixedClock::from_millis(NOW_MS)
}

pub fn read_json(path: &Path) -> Value {
    serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap()
}

pub fn read_journal(path: &Path) -> Vec<Value> {
    fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

/// A low-risk baseline and a high-risk follow-on waiting on security review.
pub fn sample_recommendations() -> Value {
    json!([
        {
            "recommendationId": "rec-observability-baseline",
            "title": "Establish cognition execution baseline telemetry",
            "priority": "P1",
            "riskTier": "medium",
            "owner": "agent:observability",
            "actions": ["enable planner telemetry counters"],
            "successCriteria": ["planner telemetry appears in daily report"]
        },
        {
            "recommendationId": "rec-policy-gating-hardening",
            "title": "Enforce policy gate propagation for high-risk tasks",
            "priority": "P1",
            "riskTier": "high",
            "approvalStatus": "pending",
            "dependencies": ["rec-observability-baseline"],
            "actions": ["propagate approval metadata into packaged swarm tasks"],
            "policyGate": {
                "requiredApprovers": ["security-ops"],
                "ticket": "SEC-101"
            }
        }
    ])
}

pub fn compile(recommendations: &Value) -> TaskDag {
    compile_recommendation_dag(recommendations, &CompileOptions::default(), &fixed_clock())
        .expect("recommendations should compile")
}

pub fn task_by_recommendation<'a>(dag: &'a TaskDag, recommendation_id: &str) -> &'a TaskNode {
    dag.tasks
        .iter()
        .find(|task| task.recommendation_id == recommendation_id)
        .expect("task for recommendation")
}

/// Package a DAG into ready requests and approval-blocked items.
pub fn package_dag(dag: &TaskDag) -> Value {
    let mut requests = Vec::new();
    let mut blocked = Vec::new();

    for (index, task) in dag.tasks.iter().enumerate() {
        let gate = serde_json::to_value(&task.policy_gate).unwrap();
        let target = target_for_risk(task.risk_tier);
        let priority = RequestPriority::from_task_priority(Some(task.priority));
        let context = json!({
            "planner": "cognition-core/task-packager",
            "recommendationId": task.recommendation_id,
            "dependencies": task.dependencies,
        });

        if task.policy_gate.requires_human_approval && !task.policy_gate.gate_passed {
            let view = GateView::new(gate.as_object());
            let approvers = view.required_approvers();
            let targets: Vec<String> = approvers.iter().map(|a| normalize_approver_target(a)).collect();
            blocked.push(json!({
                "taskId": task.task_id,
                "recommendationId": task.recommendation_id,
                "reason": "awaiting_human_approval",
                "policyGate": gate,
                "dependencies": task.dependencies,
                "metadata": {
                    "followUp": {
                        "requiredApprovers": approvers,
                        "approverTargets": targets,
                        "ticket": view.ticket()
                    },
                    "traceability": {
                        "blockedTraceId": format!("blocked:{}", task.task_id),
                        "releaseKey": format!("release:{}:{}", task.task_id, task.recommendation_id),
                        "releaseReady": false
                    },
                    "releaseTemplate": {
                        "from": DEFAULT_FROM_AGENT,
                        "target": target,
                        "priority": priority,
                        "task": task.task_text(),
                        "context": context,
                        "constraints": ["human-approval-required"]
                    }
                }
            }));
            continue;
        }

        requests.push(json!({
            "kind": "task_request",
            "id": task.task_id,
            "from": DEFAULT_FROM_AGENT,
            "target": target,
            "priority": priority,
            "task": task.task_text(),
            "context": context,
            "createdAt": NOW_MS + index as i64
        }));
    }

    json!({
        "version": 1,
        "generatedAt": dag.generated_at,
        "requests": requests,
        "blocked": blocked,
        "stats": {"totalTasks": dag.tasks.len()}
    })
}

/// Mark a packaged blocked item as approved by the external gate.
pub fn approve_blocked(package: &mut Value, task_id: &str) {
    let items = package["blocked"].as_array_mut().unwrap();
    for item in items.iter_mut().filter(|item| item["taskId"] == json!(task_id)) {
        item["policyGate"]["approvalStatus"] = json!("approved");
        item["policyGate"]["gatePassed"] = json!(true);
    }
}
