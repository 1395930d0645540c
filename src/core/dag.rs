//! Task DAG (Directed Acyclic Graph) for dependency management.
//!
//! This module provides the TaskDAG structure that represents task dependencies
//! as a directed acyclic graph. It answers which tasks are ready, guards task
//! state transitions, and propagates failures to downstream tasks.

use crate::core::task::{Task, TaskId, TaskState};
use crate::error::{Error, Result};
use crate::wlog_debug;
use petgraph::algo::{is_cyclic_directed, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Bfs;
use petgraph::Direction;
use std::collections::HashMap;

/// The task dependency graph.
///
/// TaskDAG uses petgraph's DiGraph to represent task dependencies.
/// Nodes are tasks; an edge `a -> b` means `b` depends on `a`.
pub struct TaskDAG {
    /// The underlying directed graph.
    graph: DiGraph<Task, ()>,
    /// Index mapping from TaskId to NodeIndex for fast lookups.
    task_index: HashMap<TaskId, NodeIndex>,
    /// Index mapping from task name to TaskId.
    name_index: HashMap<String, TaskId>,
}

impl TaskDAG {
    /// Create a new empty TaskDAG.
    pub fn new() -> Self {
        Self {
            graph: DiGraph::new(),
            task_index: HashMap::new(),
            name_index: HashMap::new(),
        }
    }

    /// Add a task to the DAG.
    ///
    /// # Errors
    /// Returns an error if another task already uses the same name.
    pub fn add_task(&mut self, task: Task) -> Result<TaskId> {
        if let Some(&index) = self.task_index.get(&task.id) {
            return Ok(self.graph[index].id);
        }
        if self.name_index.contains_key(&task.name) {
            return Err(Error::Validation(format!(
                "Duplicate task name: {}",
                task.name
            )));
        }

        let id = task.id;
        self.name_index.insert(task.name.clone(), id);
        let index = self.graph.add_node(task);
        self.task_index.insert(id, index);
        Ok(id)
    }

    /// Add a dependency between two tasks.
    ///
    /// The dependency indicates that `from` must complete before `to` can start.
    ///
    /// # Errors
    /// Returns an error if:
    /// - Either task is not found in the DAG
    /// - Adding the edge would create a cycle
    pub fn add_dependency(&mut self, from: &TaskId, to: &TaskId) -> Result<()> {
        let from_index = self.node(from)?;
        let to_index = self.node(to)?;

        if self.graph.find_edge(from_index, to_index).is_some() {
            return Ok(());
        }

        // Temporarily add the edge to check for cycles
        let edge = self.graph.add_edge(from_index, to_index, ());
        if is_cyclic_directed(&self.graph) {
            self.graph.remove_edge(edge);
            return Err(Error::Validation(format!(
                "Adding dependency from {} to {} would create a cycle",
                self.graph[from_index].name, self.graph[to_index].name
            )));
        }

        Ok(())
    }

    fn node(&self, id: &TaskId) -> Result<NodeIndex> {
        self.task_index
            .get(id)
            .copied()
            .ok_or_else(|| Error::TaskNotFound(id.to_string()))
    }

    /// Get a reference to a task by its ID.
    pub fn get_task(&self, id: &TaskId) -> Option<&Task> {
        self.task_index
            .get(id)
            .and_then(|&index| self.graph.node_weight(index))
    }

    /// Look a task up by name.
    pub fn task_by_name(&self, name: &str) -> Option<&Task> {
        self.name_index.get(name).and_then(|id| self.get_task(id))
    }

    /// Get the number of tasks in the DAG.
    pub fn task_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Get the number of dependencies (edges) in the DAG.
    pub fn dependency_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Check if a dependency exists between two tasks.
    pub fn has_dependency(&self, from: &TaskId, to: &TaskId) -> bool {
        match (self.task_index.get(from), self.task_index.get(to)) {
            (Some(&from_idx), Some(&to_idx)) => self.graph.find_edge(from_idx, to_idx).is_some(),
            _ => false,
        }
    }

    /// IDs of the tasks `id` depends on.
    pub fn dependency_ids(&self, id: &TaskId) -> Vec<TaskId> {
        self.neighbor_ids(id, Direction::Incoming)
    }

    /// IDs of the tasks that depend directly on `id`.
    pub fn dependent_ids(&self, id: &TaskId) -> Vec<TaskId> {
        self.neighbor_ids(id, Direction::Outgoing)
    }

    fn neighbor_ids(&self, id: &TaskId, direction: Direction) -> Vec<TaskId> {
        let Some(&index) = self.task_index.get(id) else {
            return Vec::new();
        };
        let mut ids: Vec<TaskId> = self
            .graph
            .neighbors_directed(index, direction)
            .map(|n| self.graph[n].id)
            .collect();
        // petgraph yields neighbors newest-edge first
        ids.reverse();
        ids
    }

    /// Get all tasks in insertion order.
    pub fn all_tasks(&self) -> Vec<&Task> {
        self.graph.node_weights().collect()
    }

    /// Check if the DAG is empty.
    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Check if the DAG contains a task.
    pub fn contains_task(&self, id: &TaskId) -> bool {
        self.task_index.contains_key(id)
    }

    // ========== Scheduling Operations ==========

    /// Get all tasks ready to execute.
    ///
    /// A task is ready iff it is PENDING and every task it depends on is
    /// COMPLETED. Results follow insertion order.
    pub fn ready_tasks(&self) -> Vec<&Task> {
        self.graph
            .node_indices()
            .filter_map(|index| {
                let task = self.graph.node_weight(index)?;
                if task.state != TaskState::Pending {
                    return None;
                }

                let deps_satisfied = self
                    .graph
                    .neighbors_directed(index, Direction::Incoming)
                    .all(|dep| self.graph[dep].state == TaskState::Completed);

                deps_satisfied.then_some(task)
            })
            .collect()
    }

    /// Transition a task to `state`, returning its previous state.
    ///
    /// # Errors
    /// Returns `Error::TaskNotFound` for an unknown id and
    /// `Error::InvalidTransition` for a non-monotonic move.
    pub fn set_task_state(&mut self, id: &TaskId, state: TaskState) -> Result<TaskState> {
        let index = self.node(id)?;
        let task = &mut self.graph[index];
        let previous = task.state;
        task.transition(state)?;
        if previous != state {
            wlog_debug!("task {} {} -> {}", task.name, previous, state);
        }
        Ok(previous)
    }

    /// All tasks reachable downstream of `id`, excluding `id` itself.
    pub fn descendants(&self, id: &TaskId) -> Vec<TaskId> {
        let Some(&start) = self.task_index.get(id) else {
            return Vec::new();
        };
        let mut bfs = Bfs::new(&self.graph, start);
        let mut found = Vec::new();
        while let Some(index) = bfs.next(&self.graph) {
            if index != start {
                found.push(self.graph[index].id);
            }
        }
        found
    }

    /// Cancel every not-yet-started descendant of a FAILED or CANCELLED task.
    ///
    /// Returns the IDs of the tasks that were moved to CANCELLED.
    ///
    /// # Errors
    /// Returns an error if the task is unknown or has not failed or been cancelled.
    pub fn cancel_descendants(&mut self, id: &TaskId) -> Result<Vec<TaskId>> {
        let index = self.node(id)?;
        let origin = &self.graph[index];
        if !matches!(origin.state, TaskState::Failed | TaskState::Cancelled) {
            return Err(Error::Validation(format!(
                "Cannot cascade from task {} in state {}",
                origin.name, origin.state
            )));
        }

        let mut cancelled = Vec::new();
        for descendant in self.descendants(id) {
            if self
                .get_task(&descendant)
                .is_some_and(|t| t.state == TaskState::Pending)
            {
                self.set_task_state(&descendant, TaskState::Cancelled)?;
                cancelled.push(descendant);
            }
        }
        Ok(cancelled)
    }

    /// Get tasks in topological order (respecting dependencies).
    ///
    /// # Errors
    /// Returns an error if the graph contains a cycle (should never happen
    /// since add_dependency validates against cycles).
    pub fn topological_order(&self) -> Result<Vec<&Task>> {
        let sorted = toposort(&self.graph, None).map_err(|cycle| {
            let task_name = self
                .graph
                .node_weight(cycle.node_id())
                .map(|t| t.name.as_str())
                .unwrap_or("unknown");
            Error::Validation(format!("Cycle detected at task: {}", task_name))
        })?;

        Ok(sorted
            .into_iter()
            .filter_map(|index| self.graph.node_weight(index))
            .collect())
    }

    /// Current state of every task, in insertion order.
    pub fn states(&self) -> Vec<TaskState> {
        self.graph.node_weights().map(|t| t.state).collect()
    }
}

impl Default for TaskDAG {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TaskDAG {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskDAG")
            .field("tasks", &self.task_count())
            .field("dependencies", &self.dependency_count())
            .finish()
    }
}
