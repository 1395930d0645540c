//! Append-only record of task state changes and scheduling decisions.
//!
//! One record per workflow run, written as `<workflow-id>.json` once the
//! workflow reaches a terminal state.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::resource::{Allocation, Resource};
use crate::core::task::{TaskId, TaskState};
use crate::util::blocking;
use crate::workflow::WorkflowId;
use crate::{wlog_debug, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateChangeRecord {
    pub task_id: TaskId,
    pub task_name: String,
    pub next_state: TaskState,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulingRecord {
    pub resources: Vec<Resource>,
    pub allocations: Vec<Allocation>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Profile {
    pub state_changes: Vec<StateChangeRecord>,
    pub schedules: Vec<SchedulingRecord>,
}

#[derive(Debug, Default)]
pub struct Profiler {
    profile: Profile,
}

impl Profiler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_state_change(&mut self, task_id: TaskId, task_name: &str, next_state: TaskState) {
        self.profile.state_changes.push(StateChangeRecord {
            task_id,
            task_name: task_name.to_string(),
            next_state,
            timestamp: Utc::now(),
        });
    }

    pub fn record_schedule(&mut self, resources: &[Resource], allocations: Vec<Allocation>) {
        self.profile.schedules.push(SchedulingRecord {
            resources: resources.to_vec(),
            allocations,
            timestamp: Utc::now(),
        });
    }

    pub fn profile(&self) -> &Profile {
        &self.profile
    }

    /// Write the record to `<dir>/<workflow_id>.json`, creating `dir`.
    pub async fn save(&self, dir: &Path, workflow_id: &WorkflowId) -> Result<PathBuf> {
        let path = dir.join(format!("{}.json", workflow_id));
        let json = serde_json::to_string_pretty(&self.profile)?;
        let dir = dir.to_path_buf();
        let target = path.clone();
        blocking(move || {
            std::fs::create_dir_all(&dir)?;
            std::fs::write(&target, json)?;
            Ok(())
        })
        .await?;
        wlog_debug!(
            "profile with {} state changes written to {}",
            self.profile.state_changes.len(),
            path.display()
        );
        Ok(path)
    }

    /// Read a record written by `save`.
    pub fn load(path: &Path) -> Result<Profile> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}
