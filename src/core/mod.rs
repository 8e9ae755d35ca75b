//! Core domain models: normalized recommendations, task nodes and the
//! compiled task DAG.

pub mod compiler;
pub mod dag;
pub mod recommendation;
pub mod task;

pub use compiler::{compile_normalized, compile_recommendation_dag, CompileOptions};
pub use dag::{assert_valid_dag, validate_dag, DagEdge, DagSummary, DagValidation, DependencyGraph, TaskDag};
pub use recommendation::{normalize_recommendations, NormalizedRecommendation};
pub use task::{ApprovalStatus, PolicyGate, Priority, RiskTier, RollbackPlan, TaskId, TaskNode};
