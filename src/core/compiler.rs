//! Recommendation-to-DAG compilation.
//!
//! Compilation is all-or-nothing: duplicate ids, bad dependencies and any
//! structural violation abort the whole run and no partial DAG is returned.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::clock::{format_timestamp, Clock};
use crate::core::dag::{validate_dag, DagEdge, DagSummary, TaskDag, DAG_VERSION};
use crate::core::recommendation::{normalize_recommendations, unique_sorted, NormalizedRecommendation};
use crate::core::task::{PolicyGate, TaskId, TaskNode};
use crate::{clog_debug, clog_warn, Error, Result};

#[derive(Debug, Clone)]
pub struct CompileOptions {
    /// Overrides the clock for the artifact's `generatedAt`.
    pub generated_at: Option<DateTime<Utc>>,
    /// When false, invalid dependencies are dropped instead of failing.
    pub fail_on_invalid_dependencies: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            generated_at: None,
            fail_on_invalid_dependencies: true,
        }
    }
}

/// Normalize raw recommendation records and compile them.
///
/// # Errors
/// See [`compile_normalized`]; additionally [`Error::InvalidInput`] if `raw`
/// is not a JSON array.
pub fn compile_recommendation_dag(
    raw: &Value,
    options: &CompileOptions,
    clock: &dyn Clock,
) -> Result<TaskDag> {
    let normalized = normalize_recommendations(raw)?;
    compile_normalized(normalized, options, clock)
}

/// Compile normalized recommendations into a validated DAG.
///
/// # Errors
/// - [`Error::DuplicateRecommendation`] on a repeated recommendation id
/// - [`Error::InvalidDependencies`] on self or unknown dependencies, unless
///   `fail_on_invalid_dependencies` is false
/// - [`Error::InvalidDag`] if the assembled graph fails validation (cycles)
pub fn compile_normalized(
    mut recommendations: Vec<NormalizedRecommendation>,
    options: &CompileOptions,
    clock: &dyn Clock,
) -> Result<TaskDag> {
    recommendations.sort_by(|a, b| {
        a.priority_score
            .cmp(&b.priority_score)
            .then_with(|| a.recommendation_id.cmp(&b.recommendation_id))
            .then_with(|| a.original_index.cmp(&b.original_index))
    });

    let mut known: HashSet<&str> = HashSet::with_capacity(recommendations.len());
    for recommendation in &recommendations {
        if !known.insert(recommendation.recommendation_id.as_str()) {
            clog_warn!(
                "duplicate recommendation {}",
                recommendation.recommendation_id
            );
            return Err(Error::DuplicateRecommendation(
                recommendation.recommendation_id.clone(),
            ));
        }
    }

    let task_ids: HashMap<&str, TaskId> = recommendations
        .iter()
        .map(|r| {
            (
                r.recommendation_id.as_str(),
                TaskId::for_recommendation(&r.recommendation_id),
            )
        })
        .collect();

    let mut dependency_errors = Vec::new();
    let mut tasks = Vec::with_capacity(recommendations.len());

    for recommendation in &recommendations {
        let own_id = recommendation.recommendation_id.as_str();
        let mut resolved_recommendations = Vec::new();

        for dependency in &recommendation.dependencies {
            if dependency == own_id {
                dependency_errors.push(format!("Self dependency detected for {}", own_id));
                continue;
            }
            if !task_ids.contains_key(dependency.as_str()) {
                dependency_errors.push(format!(
                    "Unknown dependency \"{}\" referenced by {}",
                    dependency, own_id
                ));
                continue;
            }
            resolved_recommendations.push(dependency.clone());
        }

        let mut dependencies: Vec<TaskId> = resolved_recommendations
            .iter()
            .filter_map(|dep| task_ids.get(dep.as_str()).cloned())
            .collect();
        dependencies.sort();
        dependencies.dedup();

        tasks.push(build_task_node(
            recommendation,
            task_ids[own_id].clone(),
            dependencies,
            unique_sorted(resolved_recommendations),
        ));
    }

    if !dependency_errors.is_empty() {
        if options.fail_on_invalid_dependencies {
            clog_warn!("{} invalid dependencies", dependency_errors.len());
            return Err(Error::InvalidDependencies(dependency_errors));
        }
        clog_warn!(
            "dropping {} invalid dependencies: {}",
            dependency_errors.len(),
            dependency_errors.join("; ")
        );
    }

    let mut edges: Vec<DagEdge> = tasks
        .iter()
        .flat_map(|task| {
            task.dependencies
                .iter()
                .map(move |dep| DagEdge::depends_on(dep.clone(), task.task_id.clone()))
        })
        .collect();
    edges.sort_by(|a, b| a.id.cmp(&b.id));

    let generated_at = options
        .generated_at
        .as_ref()
        .map(format_timestamp)
        .unwrap_or_else(|| clock.now_rfc3339());

    let summary = DagSummary::count(&tasks, &edges);
    let mut dag = TaskDag {
        version: DAG_VERSION,
        generated_at,
        tasks,
        edges,
        summary,
    };

    let validation = validate_dag(&dag);
    if !validation.valid {
        clog_warn!("DAG failed validation: {}", validation.errors.join("; "));
        return Err(Error::InvalidDag {
            errors: validation.errors,
        });
    }

    dag.summary.max_depth = dag.max_depth();
    clog_debug!(
        "tasks={} edges={} max_depth={}",
        dag.summary.task_count,
        dag.summary.edge_count,
        dag.summary.max_depth
    );
    Ok(dag)
}

fn build_task_node(
    recommendation: &NormalizedRecommendation,
    task_id: TaskId,
    dependencies: Vec<TaskId>,
    dependency_recommendation_ids: Vec<String>,
) -> TaskNode {
    TaskNode {
        task_id,
        recommendation_id: recommendation.recommendation_id.clone(),
        title: recommendation.title.clone(),
        priority: recommendation.priority,
        priority_score: recommendation.priority_score,
        risk_tier: recommendation.risk_tier,
        owner: recommendation.owner.clone(),
        dependencies,
        dependency_recommendation_ids,
        actions: recommendation.actions.clone(),
        success_criteria: recommendation.success_criteria.clone(),
        rollback_plan: recommendation.rollback_plan.clone(),
        policy_gate: PolicyGate::evaluate(
            recommendation.risk_tier,
            recommendation.requires_human_approval,
            recommendation.approval_status.clone(),
            recommendation.policy_passthrough.clone(),
        ),
        source: recommendation.source.clone(),
    }
}
