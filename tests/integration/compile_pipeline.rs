//! DAG compilation through artifacts on disk.

use serde_json::json;

use cognition_dispatch::core::{
    compile_recommendation_dag, validate_dag, CompileOptions, TaskDag, TaskId,
};
use cognition_dispatch::Error;

use crate::fixtures::{compile, fixed_clock, sample_recommendations, task_by_recommendation, TestWorkspace};

#[test]
fn test_two_recommendation_scenario() {
    let dag = compile(&json!([
        {"id": "r1", "priority": "P1", "riskTier": "medium"},
        {"id": "r2", "priority": "P1", "riskTier": "high", "dependencies": ["r1"]}
    ]));

    assert_eq!(dag.tasks.len(), 2);
    assert_eq!(dag.edges.len(), 1);
    assert_eq!(dag.summary.max_depth, 1);
    assert_eq!(dag.summary.root_task_count, 1);

    let r2 = task_by_recommendation(&dag, "r2");
    assert!(r2.policy_gate.requires_human_approval);
    assert!(!r2.policy_gate.gate_passed);
    assert!(r2.policy_gate.approval_status.is_none());
    assert_eq!(r2.dependencies, vec![TaskId::for_recommendation("r1")]);
    assert_eq!(r2.dependency_recommendation_ids, vec!["r1"]);
}

#[test]
fn test_task_ids_are_pinned_to_recommendation_ids() {
    let dag = compile(&sample_recommendations());
    let baseline = task_by_recommendation(&dag, "rec-observability-baseline");
    assert_eq!(baseline.task_id.as_str(), "1264ba6f-0181-8082-b13b-96f0488837e2");

    let reversed = json!([
        sample_recommendations()[1].clone(),
        sample_recommendations()[0].clone()
    ]);
    let again = compile(&reversed);
    assert_eq!(
        task_by_recommendation(&again, "rec-observability-baseline").task_id,
        baseline.task_id
    );
}

#[test]
fn test_artifact_round_trip_is_byte_stable() {
    let workspace = TestWorkspace::new();
    let first = workspace.path.join("a").join("task-dag.json");
    let second = workspace.path.join("b").join("task-dag.json");

    compile(&sample_recommendations()).save(&first).unwrap();
    compile(&sample_recommendations()).save(&second).unwrap();
    assert_eq!(
        std::fs::read(&first).unwrap(),
        std::fs::read(&second).unwrap()
    );

    let loaded = TaskDag::load(&first).unwrap();
    assert!(loaded.validate().valid);
    assert_eq!(loaded.generated_at, "2026-02-28T06:22:10.592Z");
    assert_eq!(loaded, compile(&sample_recommendations()));
}

#[test]
fn test_chain_depths_on_compiled_dag() {
    let dag = compile(&json!([
        {"id": "c", "dependencies": ["b"]},
        {"id": "a"},
        {"id": "b", "dependencies": ["a"]}
    ]));

    let depths = dag.task_depths();
    let depth_of = |rec: &str| depths[&task_by_recommendation(&dag, rec).task_id];
    assert_eq!(depth_of("a"), 0);
    assert_eq!(depth_of("b"), 1);
    assert_eq!(depth_of("c"), 2);
    assert_eq!(dag.summary.max_depth, 2);
    assert_eq!(dag.max_depth(), 2);

    let reloaded = TaskDag::from_slice(&serde_json::to_vec(&dag).unwrap()).unwrap();
    assert_eq!(reloaded.task_depths(), depths);
}

/// Dependency lists drawn from a small LCG so each seed gives a different
/// shape, including back references that close cycles.
fn generated_recommendations(seed: u64, count: usize) -> serde_json::Value {
    let mut state = seed;
    let mut next = move || {
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        (state >> 33) as usize
    };

    let records: Vec<serde_json::Value> = (0..count)
        .map(|i| {
            let deps: Vec<String> = (0..next() % 3)
                .map(|_| format!("rec-{}", next() % count))
                .filter(|dep| *dep != format!("rec-{i}"))
                .collect();
            json!({
                "id": format!("rec-{i}"),
                "priority": format!("P{}", next() % 4),
                "riskTier": (["low", "medium", "high"][next() % 3]),
                "dependencies": deps
            })
        })
        .collect();
    json!(records)
}

#[test]
fn test_compiled_dags_are_acyclic_or_rejected() {
    let mut compiled = 0;
    let mut rejected = 0;

    let mut inputs: Vec<serde_json::Value> = (0..40u64)
        .map(|seed| generated_recommendations(seed, 2 + (seed as usize % 7)))
        .collect();
    inputs.push(json!([{"id": "x"}, {"id": "y", "dependencies": ["x"]}]));
    inputs.push(json!([
        {"id": "x", "dependencies": ["y"]},
        {"id": "y", "dependencies": ["x"]}
    ]));

    for (case, raw) in inputs.iter().enumerate() {
        match compile_recommendation_dag(raw, &CompileOptions::default(), &fixed_clock()) {
            Ok(dag) => {
                compiled += 1;
                let validation = validate_dag(&dag);
                assert!(validation.valid, "case {case}: {:?}", validation.errors);
                let depths = dag.task_depths();
                for task in &dag.tasks {
                    for dep in &task.dependencies {
                        assert!(depths[dep] < depths[&task.task_id], "case {case}");
                    }
                }
            }
            Err(Error::InvalidDag { errors }) => {
                rejected += 1;
                assert!(errors.iter().any(|e| e.starts_with("Cycle detected:")), "case {case}");
            }
            Err(other) => panic!("case {case}: unexpected error {other:?}"),
        }
    }

    assert!(compiled > 0);
    assert!(rejected > 0);
}

#[test]
fn test_cycle_never_reaches_an_artifact() {
    let result = compile_recommendation_dag(
        &json!([
            {"id": "a", "dependencies": ["c"]},
            {"id": "b", "dependencies": ["a"]},
            {"id": "c", "dependencies": ["b"]}
        ]),
        &CompileOptions::default(),
        &fixed_clock(),
    );

    match result {
        Err(Error::InvalidDag { errors }) => {
            assert!(errors.iter().any(|e| e.starts_with("Cycle detected:")));
        }
        other => panic!("expected InvalidDag, got {other:?}"),
    }
}

#[test]
fn test_dependency_closure() {
    let raw = json!([
        {"id": "a"},
        {"id": "b", "dependencies": ["a", "ghost"]}
    ]);

    let strict = compile_recommendation_dag(&raw, &CompileOptions::default(), &fixed_clock());
    assert!(matches!(strict, Err(Error::InvalidDependencies(_))));

    let lenient = compile_recommendation_dag(
        &raw,
        &CompileOptions {
            fail_on_invalid_dependencies: false,
            ..Default::default()
        },
        &fixed_clock(),
    )
    .unwrap();
    let ids: Vec<&TaskId> = lenient.tasks.iter().map(|t| &t.task_id).collect();
    for task in &lenient.tasks {
        assert!(task.dependencies.iter().all(|dep| ids.contains(&dep)));
    }
    assert!(validate_dag(&lenient).valid);
}

#[test]
fn test_tampered_artifact_fails_validation() {
    let workspace = TestWorkspace::new();
    let mut raw = serde_json::to_value(compile(&sample_recommendations())).unwrap();
    let first_id = raw["tasks"][0]["taskId"].clone();
    raw["tasks"][0]["dependencies"] = json!([first_id]);
    let path = workspace.write_json("task-dag.json", &raw);

    let dag = TaskDag::load(&path).unwrap();
    let validation = dag.validate();
    assert!(!validation.valid);
    assert!(validation
        .errors
        .iter()
        .any(|e| e.ends_with("cannot depend on itself")));
    assert!(matches!(dag.assert_valid(), Err(Error::DagValidation { .. })));
}

#[test]
fn test_missing_artifact_names_the_path() {
    let workspace = TestWorkspace::new();
    let path = workspace.path.join("nope.json");
    let err = TaskDag::load(&path).unwrap_err();
    assert!(err.to_string().contains("nope.json"));
}

#[test]
fn test_non_string_task_id_is_a_listed_violation() {
    let workspace = TestWorkspace::new();
    let mut raw = serde_json::to_value(compile(&sample_recommendations())).unwrap();
    raw["tasks"][0]["taskId"] = json!(5);
    let path = workspace.write_json("task-dag.json", &raw);

    match TaskDag::load(&path) {
        Err(Error::DagValidation { errors }) => {
            assert_eq!(errors, vec!["Task entry 0 taskId must be a string".to_string()]);
        }
        other => panic!("expected DagValidation, got {other:?}"),
    }
}
