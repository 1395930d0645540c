//! Compute resources and the allocations the scheduler places on them.

use crate::core::task::TaskId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Identifier of a compute resource (a partition, cluster or node group).
///
/// Ordered lexically so scheduler tie-breaks are deterministic.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(pub String);

impl ResourceId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ResourceId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ResourceId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::fmt::Display for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A compute resource as reported by the resource monitor.
///
/// Read-only for the duration of a scheduling pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub id: ResourceId,
    /// Number of nodes; bounds how many tasks share one time slot.
    pub nodes: u32,
    #[serde(default)]
    pub cores_per_node: u32,
    #[serde(default)]
    pub ram_per_core_mb: u64,
    #[serde(default)]
    pub partition: Option<String>,
    #[serde(default)]
    pub reservation: Option<String>,
    #[serde(default)]
    pub qos: Option<String>,
}

impl Resource {
    /// Create a resource with the given id and node count and no extra attributes.
    pub fn new(id: &str, nodes: u32) -> Self {
        Self {
            id: ResourceId::from(id),
            nodes,
            cores_per_node: 0,
            ram_per_core_mb: 0,
            partition: None,
            reservation: None,
            qos: None,
        }
    }

    pub fn with_partition(mut self, partition: &str) -> Self {
        self.partition = Some(partition.to_string());
        self
    }
}

/// Placement of one task: a resource and a time slot on it.
///
/// Never mutated after the scheduler creates it; a later pass supersedes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    pub task_id: TaskId,
    pub resource_id: ResourceId,
    pub slot: u32,
}

/// Result of a scheduling pass, keyed by task.
pub type AllocationMap = BTreeMap<TaskId, Allocation>;
