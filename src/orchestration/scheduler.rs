//! Affinity list scheduler.
//!
//! Places each ready task on a resource and a time slot. A task whose
//! dependencies already ran somewhere goes to the least-used of those
//! resources; a task with no such history uses its affinity hint or a
//! random resource. Slots batch tasks on a resource by its node count.

use std::collections::{BTreeMap, HashMap};

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::core::dag::TaskDAG;
use crate::core::resource::{Allocation, AllocationMap, Resource, ResourceId};
use crate::core::task::{Task, TaskId};
use crate::error::{Error, Result};
use crate::wlog_debug;

/// Scheduler with its own placement history.
///
/// One instance per workflow; the history is never shared between workflows.
pub struct Scheduler {
    /// Resource each task was last placed on.
    history: HashMap<TaskId, ResourceId>,
    rng: StdRng,
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            history: HashMap::new(),
            rng: StdRng::from_entropy(),
        }
    }

    /// Scheduler whose cold-start choices are reproducible.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            history: HashMap::new(),
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Resource `task_id` was last placed on, if any.
    pub fn placement(&self, task_id: &TaskId) -> Option<&ResourceId> {
        self.history.get(task_id)
    }

    /// Place every task in `ready` on one of `resources`.
    ///
    /// Tasks are handled in the order given. Resources with zero nodes are
    /// ignored; if none remain the pass fails with `SchedulingFailure` and
    /// nothing is placed or recorded.
    pub fn schedule(
        &mut self,
        dag: &TaskDAG,
        ready: &[&Task],
        resources: &[Resource],
    ) -> Result<AllocationMap> {
        let mut allocations = AllocationMap::new();
        if ready.is_empty() {
            return Ok(allocations);
        }

        let usable: Vec<&Resource> = resources.iter().filter(|r| r.nodes > 0).collect();
        if usable.is_empty() {
            return Err(Error::SchedulingFailure(format!(
                "no usable resources for {} ready tasks",
                ready.len()
            )));
        }

        let mut placed: HashMap<&ResourceId, u32> = HashMap::new();
        for task in ready {
            let candidates = candidates_for(task, &usable);
            let resource = match self.dependency_preference(dag, task, &candidates) {
                Some(resource) => resource,
                None => self.cold_start(task, &candidates)?,
            };

            let count = placed.entry(&resource.id).or_insert(0);
            *count += 1;
            let slot = *count / resource.nodes;

            wlog_debug!(
                "scheduled {} on {} slot {}",
                task.name,
                resource.id,
                slot
            );
            self.history.insert(task.id, resource.id.clone());
            allocations.insert(
                task.id,
                Allocation {
                    task_id: task.id,
                    resource_id: resource.id.clone(),
                    slot,
                },
            );
        }
        Ok(allocations)
    }

    /// Least-used resource among those the task's dependencies ran on.
    ///
    /// Ties go to the lowest resource id.
    fn dependency_preference<'a>(
        &self,
        dag: &TaskDAG,
        task: &Task,
        candidates: &[&'a Resource],
    ) -> Option<&'a Resource> {
        let mut counts: BTreeMap<&ResourceId, usize> = BTreeMap::new();
        for dep in dag.dependency_ids(&task.id) {
            if let Some(resource_id) = self.history.get(&dep) {
                if candidates.iter().any(|r| &r.id == resource_id) {
                    *counts.entry(resource_id).or_insert(0) += 1;
                }
            }
        }

        // min_by_key keeps the first minimum, and BTreeMap iterates in id order
        let (chosen, _) = counts.into_iter().min_by_key(|(_, count)| *count)?;
        candidates.iter().copied().find(|r| &r.id == chosen)
    }

    fn cold_start<'a>(&mut self, task: &Task, candidates: &[&'a Resource]) -> Result<&'a Resource> {
        if let Some(affinity) = &task.requirements.affinity {
            if let Some(resource) = candidates.iter().copied().find(|r| &r.id == affinity) {
                return Ok(resource);
            }
            wlog_debug!(
                "affinity {} of {} not available, picking at random",
                affinity,
                task.name
            );
        }
        candidates
            .choose(&mut self.rng)
            .copied()
            .ok_or_else(|| Error::SchedulingFailure(format!("no resource for {}", task.name)))
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

/// Resources matching the task's resource class, or all of them when the
/// task names no class or no resource matches it.
fn candidates_for<'a>(task: &Task, usable: &[&'a Resource]) -> Vec<&'a Resource> {
    if let Some(class) = &task.requirements.resource_class {
        let matching: Vec<&Resource> = usable
            .iter()
            .copied()
            .filter(|r| r.partition.as_deref() == Some(class.as_str()) || r.id.as_str() == class)
            .collect();
        if !matching.is_empty() {
            return matching;
        }
    }
    usable.to_vec()
}
