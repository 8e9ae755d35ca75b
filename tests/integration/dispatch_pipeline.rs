//! Reconciliation runs end to end: DAG + package in, journal + report out.

use std::fs;

use serde_json::{json, Value};

use cognition_dispatch::dispatch::protocol::DEFAULT_FROM_AGENT;
use cognition_dispatch::dispatch::{
    dispatch_artifacts, DispatchReconciler, ProtocolTaskRequestBuilder, TaskPackage,
};
use cognition_dispatch::identity::{derive_identity, sha256_hex, IdentityNamespace};
use cognition_dispatch::Error;

use crate::fixtures::{
    approve_blocked, compile, fixed_clock, package_dag, read_journal, read_json,
    sample_recommendations, task_by_recommendation, TestWorkspace, NOW_MS,
};

struct Prepared {
    workspace: TestWorkspace,
    baseline_id: String,
    gated_id: String,
}

fn prepare(approve: bool) -> Prepared {
    let workspace = TestWorkspace::new();
    let paths = workspace.dispatch_paths();
    let dag = compile(&sample_recommendations());
    dag.save(&paths.task_dag).unwrap();

    let baseline_id = task_by_recommendation(&dag, "rec-observability-baseline").task_id.0.clone();
    let gated_id = task_by_recommendation(&dag, "rec-policy-gating-hardening").task_id.0.clone();

    let mut package = package_dag(&dag);
    if approve {
        approve_blocked(&mut package, &gated_id);
    }
    fs::create_dir_all(paths.task_package.parent().unwrap()).unwrap();
    fs::write(&paths.task_package, serde_json::to_string_pretty(&package).unwrap()).unwrap();

    Prepared {
        workspace,
        baseline_id,
        gated_id,
    }
}

#[test]
fn test_pending_approval_run() {
    let prepared = prepare(false);
    let paths = prepared.workspace.dispatch_paths();

    let result =
        dispatch_artifacts(&paths, DEFAULT_FROM_AGENT, &fixed_clock(), &ProtocolTaskRequestBuilder)
            .unwrap();
    assert_eq!(result.dispatch_count, 1);
    assert_eq!(result.blocked_count, 1);
    assert_eq!(result.follow_up_count, 1);
    assert_eq!(result.released_count, 0);
    assert_eq!(result.appended_entries, 3);

    let journal = read_journal(&paths.journal);
    let kinds: Vec<&str> = journal.iter().map(|e| e["kind"].as_str().unwrap()).collect();
    assert_eq!(kinds, vec!["task_request", "task_request", "task_blocked"]);

    let dispatched = &journal[0];
    assert_eq!(dispatched["id"], json!(prepared.baseline_id));
    assert_eq!(
        dispatched["context"]["successCriteria"],
        json!(["planner telemetry appears in daily report"])
    );
    assert_eq!(dispatched["context"]["policyGate"]["gatePassed"], json!(true));

    let follow_up = &journal[1];
    assert_eq!(follow_up["target"], json!("agent:security-ops"));
    assert_eq!(follow_up["priority"], json!("high"));
    assert_eq!(
        follow_up["id"],
        json!(derive_identity(
            IdentityNamespace::ApprovalFollowUp,
            &format!("{}:agent:security-ops", prepared.gated_id)
        ))
    );
    assert_eq!(
        follow_up["constraints"],
        json!(["approval-review-only", "no-execution-without-approval"])
    );
    assert_eq!(follow_up["context"]["followUp"]["ticket"], json!("SEC-101"));

    let blocked = &journal[2];
    assert_eq!(blocked["taskId"], json!(prepared.gated_id));
    assert_eq!(blocked["blockedSource"], json!("task_package_blocked"));
    assert_eq!(blocked["reason"], json!("awaiting_human_approval"));
    assert_eq!(blocked["target"], json!("agent:ops:high-risk"));
    assert_eq!(blocked["approvalFlow"]["approvalStatus"], json!("pending"));
    assert_eq!(blocked["approvalFlow"]["requiredApprovers"], json!(["security-ops"]));
    assert_eq!(blocked["traceability"]["releaseTemplatePresent"], json!(true));
    assert_eq!(blocked["traceability"]["releaseReady"], json!(false));
    assert_eq!(blocked["context"]["approvalFlow"], blocked["approvalFlow"]);
    assert_eq!(blocked["createdAt"], json!(NOW_MS));

    let report = read_json(&paths.report);
    assert_eq!(report["generatedAt"], json!("2026-02-28T06:22:10.592Z"));
    assert_eq!(report["stats"]["dagTaskCount"], json!(2));
    assert_eq!(report["stats"]["appendedEntries"], json!(3));
    assert_eq!(report["stats"]["blockedApprovalRequiredCount"], json!(1));
    assert_eq!(report["stats"]["blockedByReason"], json!({"awaiting_human_approval": 1}));
    assert_eq!(report["stats"]["blockedBySource"], json!({"task_package_blocked": 1}));
    assert_eq!(report["stats"]["blockedByApprovalStatus"], json!({"pending": 1}));
    assert_eq!(report["dispatchedTaskIds"], json!([prepared.baseline_id]));
    assert_eq!(report["blockedTaskIds"], json!([prepared.gated_id]));
    assert_eq!(report["approvalFlow"]["pendingCount"], json!(1));
    assert_eq!(report["approvalFlow"]["pendingTaskIds"], json!([prepared.gated_id]));
    assert_eq!(
        report["approvalFlow"]["requiredApprovers"],
        json!([{"approver": "security-ops", "blockedTaskCount": 1}])
    );
    assert_eq!(
        report["approvalFlow"]["followUpTargets"],
        json!([{"target": "agent:security-ops", "followUpCount": 1}])
    );
    assert_eq!(report["followUpRequestIds"], json!([follow_up["id"]]));
    assert_eq!(
        report["inputs"]["taskDagSha256"],
        json!(sha256_hex(&fs::read(&paths.task_dag).unwrap()))
    );
    assert_eq!(
        report["inputs"]["taskPackageSha256"],
        json!(sha256_hex(&fs::read(&paths.task_package).unwrap()))
    );
    assert_eq!(report["blockedEntries"][0]["blockedSource"], json!("task_package_blocked"));
}

#[test]
fn test_approved_item_is_released() {
    let prepared = prepare(true);
    let paths = prepared.workspace.dispatch_paths();

    let result =
        dispatch_artifacts(&paths, DEFAULT_FROM_AGENT, &fixed_clock(), &ProtocolTaskRequestBuilder)
            .unwrap();
    assert_eq!(result.dispatch_count, 2);
    assert_eq!(result.blocked_count, 0);
    assert_eq!(result.follow_up_count, 0);
    assert_eq!(result.released_count, 1);

    let journal = read_journal(&paths.journal);
    let released = &journal[1];
    assert_eq!(released["id"], json!(prepared.gated_id));
    assert_eq!(released["target"], json!("agent:ops:high-risk"));
    assert_eq!(released["priority"], json!("high"));
    assert_eq!(released["constraints"], json!(["human-approval-required"]));

    let release = &released["context"]["approvalRelease"];
    let release_key = format!("release:{}:rec-policy-gating-hardening", prepared.gated_id);
    assert_eq!(release["blockedReason"], json!("awaiting_human_approval"));
    assert_eq!(release["releaseKey"], json!(release_key));
    assert_eq!(
        release["releaseRequestId"],
        json!(derive_identity(IdentityNamespace::Release, &release_key))
    );
    assert_eq!(release["releaseTraceId"], json!(format!("release-trace:{}", prepared.gated_id)));

    let report = read_json(&paths.report);
    assert_eq!(report["releasedAfterApprovalTaskIds"], json!([prepared.gated_id]));
    assert_eq!(report["stats"]["releasedAfterApprovalCount"], json!(1));
}

#[test]
fn test_repeated_runs_are_deterministic_and_append_only() {
    let prepared = prepare(false);
    let paths = prepared.workspace.dispatch_paths();

    dispatch_artifacts(&paths, DEFAULT_FROM_AGENT, &fixed_clock(), &ProtocolTaskRequestBuilder)
        .unwrap();
    let first_report = fs::read(&paths.report).unwrap();
    dispatch_artifacts(&paths, DEFAULT_FROM_AGENT, &fixed_clock(), &ProtocolTaskRequestBuilder)
        .unwrap();
    let second_report = fs::read(&paths.report).unwrap();

    assert_eq!(first_report, second_report);

    let journal = read_journal(&paths.journal);
    assert_eq!(journal.len(), 6);
    assert_eq!(journal[..3], journal[3..]);
}

#[test]
fn test_partition_counts_shared_ids_once() {
    let dag = compile(&sample_recommendations());
    let mut package = package_dag(&dag);
    let gated_id = task_by_recommendation(&dag, "rec-policy-gating-hardening").task_id.0.clone();
    let baseline_id = task_by_recommendation(&dag, "rec-observability-baseline").task_id.0.clone();

    // The baseline also shows up as a packaged blocked item.
    package["blocked"]
        .as_array_mut()
        .unwrap()
        .push(json!({"taskId": baseline_id, "reason": "manual_hold"}));
    let package = TaskPackage::from_json_value(package).unwrap();

    let clock = fixed_clock();
    let outcome = DispatchReconciler::new(&dag, &clock, &ProtocolTaskRequestBuilder)
        .unwrap()
        .reconcile(&package)
        .unwrap();

    assert_eq!(
        outcome.dispatch_entries.len() + outcome.blocked_entries.len(),
        package.item_count() - 1
    );
    let dispatched: Vec<&str> = outcome.dispatch_entries.iter().map(|e| e.id.as_str()).collect();
    let blocked: Vec<&str> = outcome.blocked_entries.iter().map(|e| e.task_id.as_str()).collect();
    assert_eq!(dispatched, vec![baseline_id.as_str()]);
    assert_eq!(blocked, vec![gated_id.as_str()]);
}

#[test]
fn test_approval_not_required_is_never_blocked() {
    let dag = compile(&sample_recommendations());
    let baseline_id = task_by_recommendation(&dag, "rec-observability-baseline").task_id.0.clone();
    let package = TaskPackage::from_json_value(json!({
        "requests": [{
            "id": baseline_id,
            "from": DEFAULT_FROM_AGENT,
            "task": "x",
            "context": {"policyGate": {"approvalStatus": "pending", "gatePassed": false}}
        }],
        "blocked": []
    }))
    .unwrap();

    let clock = fixed_clock();
    let outcome = DispatchReconciler::new(&dag, &clock, &ProtocolTaskRequestBuilder)
        .unwrap()
        .reconcile(&package)
        .unwrap();
    assert_eq!(outcome.dispatch_entries.len(), 1);
    assert!(outcome.blocked_entries.is_empty());
}

#[test]
fn test_missing_package_writes_nothing() {
    let prepared = prepare(false);
    let paths = prepared.workspace.dispatch_paths();
    fs::remove_file(&paths.task_package).unwrap();

    let err = dispatch_artifacts(&paths, DEFAULT_FROM_AGENT, &fixed_clock(), &ProtocolTaskRequestBuilder)
        .unwrap_err();
    assert!(matches!(err, Error::ArtifactNotFound(ref p) if p == &paths.task_package));
    assert!(!paths.journal.exists());
    assert!(!paths.report.exists());
}

#[test]
fn test_package_without_lists_is_rejected() {
    let prepared = prepare(false);
    let paths = prepared.workspace.dispatch_paths();
    fs::write(&paths.task_package, json!({"requests": []}).to_string()).unwrap();

    let err = dispatch_artifacts(&paths, DEFAULT_FROM_AGENT, &fixed_clock(), &ProtocolTaskRequestBuilder)
        .unwrap_err();
    assert!(err.to_string().contains("requests[]/blocked[]"));
}

#[test]
fn test_custom_from_agent_applies_to_package_blocked_entries() {
    let prepared = prepare(false);
    let paths = prepared.workspace.dispatch_paths();

    // Strip the release template so the configured agent is used.
    let mut package: Value = read_json(&paths.task_package);
    package["blocked"][0]["metadata"]
        .as_object_mut()
        .unwrap()
        .remove("releaseTemplate");
    fs::write(&paths.task_package, package.to_string()).unwrap();

    dispatch_artifacts(&paths, "agent:planner", &fixed_clock(), &ProtocolTaskRequestBuilder).unwrap();
    let journal = read_journal(&paths.journal);
    let blocked = journal.iter().find(|e| e["kind"] == json!("task_blocked")).unwrap();
    assert_eq!(blocked["from"], json!("agent:planner"));
    assert_eq!(blocked["target"], Value::Null);
    assert_eq!(blocked["traceability"]["releaseTemplatePresent"], json!(false));
}

#[test]
fn test_unwritable_report_leaves_journal_untouched() {
    let prepared = prepare(false);
    let mut paths = prepared.workspace.dispatch_paths();
    let blocker = prepared.workspace.path.join("not-a-dir");
    fs::write(&blocker, "").unwrap();
    paths.report = blocker.join("dispatch.report.json");

    for _ in 0..2 {
        let result =
            dispatch_artifacts(&paths, DEFAULT_FROM_AGENT, &fixed_clock(), &ProtocolTaskRequestBuilder);
        assert!(result.is_err());
    }
    assert!(!paths.journal.exists());
}

#[test]
fn test_failed_append_discards_staged_report() {
    let prepared = prepare(false);
    let mut paths = prepared.workspace.dispatch_paths();
    let blocker = prepared.workspace.path.join("journal-blocker");
    fs::write(&blocker, "").unwrap();
    paths.journal = blocker.join("tasks.journal.jsonl");

    let result =
        dispatch_artifacts(&paths, DEFAULT_FROM_AGENT, &fixed_clock(), &ProtocolTaskRequestBuilder);
    assert!(matches!(result, Err(Error::Io(_))));
    assert!(!paths.report.exists());
    let leftovers: Vec<_> = fs::read_dir(paths.report.parent().unwrap()).unwrap().collect();
    assert!(leftovers.is_empty());
}
