//! Task DAG artifact, dependency graph and structural validation.
//!
//! [`TaskDag`] is the serialized artifact (`version = 1`). Graph algorithms
//! run on a [`DependencyGraph`], a petgraph view built once from the task
//! list and indexed by task id.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::Path;

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::task::{TaskId, TaskNode};
use crate::{clog_debug, Error, Result};

pub const DAG_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    #[default]
    DependsOn,
}

/// `from` must complete before `to`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DagEdge {
    pub id: String,
    pub from: TaskId,
    pub to: TaskId,
    #[serde(default)]
    pub kind: EdgeKind,
}

impl DagEdge {
    pub fn depends_on(from: TaskId, to: TaskId) -> Self {
        Self {
            id: format!("{}->{}", from, to),
            from,
            to,
            kind: EdgeKind::DependsOn,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DagSummary {
    pub task_count: usize,
    pub edge_count: usize,
    pub approval_required_count: usize,
    pub approval_pending_count: usize,
    pub gate_blocked_count: usize,
    pub root_task_count: usize,
    pub max_depth: usize,
}

impl DagSummary {
    /// Counts over a task and edge list. `max_depth` is left at zero.
    pub fn count(tasks: &[TaskNode], edges: &[DagEdge]) -> Self {
        Self {
            task_count: tasks.len(),
            edge_count: edges.len(),
            approval_required_count: tasks
                .iter()
                .filter(|t| t.policy_gate.requires_human_approval)
                .count(),
            approval_pending_count: tasks.iter().filter(|t| t.policy_gate.is_pending()).count(),
            gate_blocked_count: tasks.iter().filter(|t| !t.policy_gate.gate_passed).count(),
            root_task_count: tasks.iter().filter(|t| t.is_root()).count(),
            max_depth: 0,
        }
    }
}

/// The compiled task graph artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDag {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub generated_at: String,
    pub tasks: Vec<TaskNode>,
    #[serde(default)]
    pub edges: Vec<DagEdge>,
    #[serde(default)]
    pub summary: DagSummary,
}

fn default_version() -> u32 {
    DAG_VERSION
}

impl TaskDag {
    /// Parse an artifact, reporting malformed task entries together.
    ///
    /// Entries that are not objects, non-string task ids and malformed
    /// dependency lists are all collected before any typed parsing.
    ///
    /// # Errors
    /// [`Error::DagValidation`] listing every malformed entry;
    /// [`Error::Json`] for any other shape mismatch.
    pub fn from_json_value(value: Value) -> Result<Self> {
        let Some(tasks) = value.get("tasks") else {
            return Err(Error::DagValidation {
                errors: vec!["DAG tasks must be an array".to_string()],
            });
        };
        let Some(entries) = tasks.as_array() else {
            return Err(Error::DagValidation {
                errors: vec!["DAG tasks must be an array".to_string()],
            });
        };

        let mut errors = Vec::new();
        for (index, entry) in entries.iter().enumerate() {
            if !entry.is_object() {
                errors.push("Task entry is not an object".to_string());
                continue;
            }

            let task_id = entry.get("taskId");
            if task_id.is_some_and(|id| !id.is_string()) {
                errors.push(format!("Task entry {} taskId must be a string", index));
            }
            let label = task_id
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| format!("#{}", index));

            match entry.get("dependencies") {
                None | Some(Value::Null) => {}
                Some(Value::Array(deps)) => {
                    if deps.iter().any(|dep| !dep.is_string()) {
                        errors.push(format!("Task {} dependencies must be task id strings", label));
                    }
                }
                Some(_) => errors.push(format!("Task {} dependencies must be an array", label)),
            }
        }
        if !errors.is_empty() {
            return Err(Error::DagValidation { errors });
        }

        Ok(serde_json::from_value(value)?)
    }

    /// Read an artifact from disk.
    ///
    /// # Errors
    /// [`Error::ArtifactNotFound`] if the file does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::ArtifactNotFound(path.to_path_buf()));
        }
        let dag = Self::from_slice(&fs::read(path)?)?;
        clog_debug!("TaskDag::load path={} tasks={}", path.display(), dag.tasks.len());
        Ok(dag)
    }

    /// Parse artifact bytes already read from disk.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        Self::from_json_value(serde_json::from_slice(bytes)?)
    }

    /// Write the artifact as pretty JSON, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, format!("{}\n", serde_json::to_string_pretty(self)?))?;
        clog_debug!("TaskDag::save path={}", path.display());
        Ok(())
    }

    /// Lookup table by task id. The first entry wins on duplicates.
    pub fn tasks_by_id(&self) -> HashMap<&TaskId, &TaskNode> {
        let mut index = HashMap::with_capacity(self.tasks.len());
        for task in &self.tasks {
            index.entry(&task.task_id).or_insert(task);
        }
        index
    }

    /// Petgraph view of the task list.
    pub fn dependency_graph(&self) -> DependencyGraph {
        DependencyGraph::from_tasks(&self.tasks)
    }

    /// Depth of every task (roots are 0).
    pub fn task_depths(&self) -> BTreeMap<TaskId, usize> {
        self.dependency_graph().depths()
    }

    /// Longest dependency chain below a root; 0 for an empty or flat DAG.
    pub fn max_depth(&self) -> usize {
        self.task_depths().into_values().max().unwrap_or(0)
    }

    /// Collect every structural violation; see [`validate_dag`].
    pub fn validate(&self) -> DagValidation {
        validate_dag(self)
    }

    /// # Errors
    /// [`Error::DagValidation`] listing every violation.
    pub fn assert_valid(&self) -> Result<()> {
        assert_valid_dag(self)
    }
}

/// Dependency structure of a task list.
///
/// Nodes are task ids; an edge `a -> b` means `b` depends on `a`. Dependencies
/// on ids that are not in the list are left out (validation reports them).
pub struct DependencyGraph {
    graph: DiGraph<TaskId, ()>,
    task_index: HashMap<TaskId, NodeIndex>,
}

impl DependencyGraph {
    pub fn from_tasks(tasks: &[TaskNode]) -> Self {
        let mut graph = DiGraph::new();
        let mut task_index = HashMap::new();

        for task in tasks {
            if task.task_id.is_blank() || task_index.contains_key(&task.task_id) {
                continue;
            }
            let index = graph.add_node(task.task_id.clone());
            task_index.insert(task.task_id.clone(), index);
        }

        for task in tasks {
            let Some(&to) = task_index.get(&task.task_id) else {
                continue;
            };
            for dependency in &task.dependencies {
                if let Some(&from) = task_index.get(dependency) {
                    graph.update_edge(from, to, ());
                }
            }
        }

        Self { graph, task_index }
    }

    /// Number of distinct non-blank task ids.
    pub fn task_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Number of distinct resolved dependencies.
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    fn id(&self, index: NodeIndex) -> &TaskId {
        &self.graph[index]
    }

    fn sorted_neighbors(&self, index: NodeIndex, direction: Direction) -> Vec<NodeIndex> {
        let mut neighbors: Vec<NodeIndex> = self.graph.neighbors_directed(index, direction).collect();
        neighbors.sort_by(|a, b| self.id(*a).cmp(self.id(*b)));
        neighbors.dedup();
        neighbors
    }

    /// First dependency cycle found by depth-first search over dependencies.
    ///
    /// Tasks are visited in insertion order and dependencies in id order. The
    /// returned path runs from the first occurrence of the repeated task on
    /// the active stack through the current task and back to it.
    pub fn find_cycle(&self) -> Option<Vec<TaskId>> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Unvisited,
            Active,
            Done,
        }

        let mut marks = vec![Mark::Unvisited; self.graph.node_count()];

        for start in self.graph.node_indices() {
            if marks[start.index()] != Mark::Unvisited {
                continue;
            }

            // (node, its dependencies, next dependency to visit)
            let mut stack: Vec<(NodeIndex, Vec<NodeIndex>, usize)> = Vec::new();
            marks[start.index()] = Mark::Active;
            stack.push((start, self.sorted_neighbors(start, Direction::Incoming), 0));

            while let Some((node, dependencies, cursor)) = stack.last_mut() {
                if *cursor >= dependencies.len() {
                    marks[node.index()] = Mark::Done;
                    stack.pop();
                    continue;
                }

                let next = dependencies[*cursor];
                *cursor += 1;

                match marks[next.index()] {
                    Mark::Done => {}
                    Mark::Active => {
                        let from = stack.iter().position(|(n, _, _)| *n == next).unwrap_or(0);
                        let mut path: Vec<TaskId> = stack[from..]
                            .iter()
                            .map(|(n, _, _)| self.id(*n).clone())
                            .collect();
                        path.push(self.id(next).clone());
                        return Some(path);
                    }
                    Mark::Unvisited => {
                        marks[next.index()] = Mark::Active;
                        let deps = self.sorted_neighbors(next, Direction::Incoming);
                        stack.push((next, deps, 0));
                    }
                }
            }
        }

        None
    }

    /// Depth of every task via Kahn-style traversal.
    ///
    /// Zero in-degree tasks start at depth 0 and are processed in id order;
    /// a dependent's depth is the maximum over its dependencies plus one.
    /// Tasks on a cycle are never released and keep depth 0.
    pub fn depths(&self) -> BTreeMap<TaskId, usize> {
        let count = self.graph.node_count();
        let mut in_degree: Vec<usize> = self
            .graph
            .node_indices()
            .map(|n| self.graph.neighbors_directed(n, Direction::Incoming).count())
            .collect();
        let mut depth = vec![0usize; count];

        let mut queue: Vec<NodeIndex> = self
            .graph
            .node_indices()
            .filter(|n| in_degree[n.index()] == 0)
            .collect();
        queue.sort_by(|a, b| self.id(*a).cmp(self.id(*b)));

        let mut cursor = 0;
        while cursor < queue.len() {
            let current = queue[cursor];
            cursor += 1;
            let current_depth = depth[current.index()];

            for next in self.sorted_neighbors(current, Direction::Outgoing) {
                let slot = next.index();
                depth[slot] = depth[slot].max(current_depth + 1);
                in_degree[slot] = in_degree[slot].saturating_sub(1);
                if in_degree[slot] == 0 {
                    queue.push(next);
                }
            }
        }

        self.graph
            .node_indices()
            .map(|n| (self.id(n).clone(), depth[n.index()]))
            .collect()
    }
}

impl std::fmt::Debug for DependencyGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DependencyGraph")
            .field("tasks", &self.task_count())
            .field("dependencies", &self.edge_count())
            .finish()
    }
}

/// Outcome of [`validate_dag`]: every violation, in discovery order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DagValidation {
    pub valid: bool,
    pub errors: Vec<String>,
}

/// Check a DAG for blank or duplicate ids, unknown or self dependencies and
/// cycles. All violations are collected.
pub fn validate_dag(dag: &TaskDag) -> DagValidation {
    let mut errors = Vec::new();
    let mut task_ids: HashSet<&TaskId> = HashSet::new();

    for task in &dag.tasks {
        if task.task_id.is_blank() {
            errors.push("Task is missing taskId".to_string());
            continue;
        }
        if !task_ids.insert(&task.task_id) {
            errors.push(format!("Duplicate taskId: {}", task.task_id));
        }
    }

    for task in &dag.tasks {
        if task.task_id.is_blank() {
            continue;
        }
        for dependency in &task.dependencies {
            if !task_ids.contains(dependency) {
                errors.push(format!(
                    "Task {} has unknown dependency {}",
                    task.task_id, dependency
                ));
            }
            if dependency == &task.task_id {
                errors.push(format!("Task {} cannot depend on itself", task.task_id));
            }
        }
    }

    if let Some(path) = DependencyGraph::from_tasks(&dag.tasks).find_cycle() {
        let rendered: Vec<&str> = path.iter().map(TaskId::as_str).collect();
        errors.push(format!("Cycle detected: {}", rendered.join(" -> ")));
    }

    DagValidation {
        valid: errors.is_empty(),
        errors,
    }
}

/// # Errors
/// [`Error::DagValidation`] listing every violation.
pub fn assert_valid_dag(dag: &TaskDag) -> Result<()> {
    let validation = validate_dag(dag);
    if validation.valid {
        Ok(())
    } else {
        Err(Error::DagValidation {
            errors: validation.errors,
        })
    }
}
