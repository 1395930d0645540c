//! Job script rendering.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::core::resource::{Allocation, Resource};
use crate::core::task::{Task, TaskId};
use crate::util::shell_quote;

/// Directive syntax understood by a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptDialect {
    Slurm,
    Pbs,
    Shell,
}

/// A rendered, self-contained job script for one task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobScript {
    /// Name the job carries inside the workload manager.
    pub job_name: String,
    pub task_id: TaskId,
    pub task_name: String,
    pub body: String,
}

/// Characters not allowed in a job name by every backend.
static UNSAFE_NAME_CHARS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9_.-]").unwrap());

/// Job name for a task: sanitized task name plus the short task id.
fn job_name_for(task: &Task) -> String {
    let name = UNSAFE_NAME_CHARS_RE.replace_all(&task.name, "_");
    format!("{}-{}", name, task.id.short())
}

impl JobScript {
    /// Render the script for `task` placed by `allocation` on `resource`.
    pub fn render(
        dialect: ScriptDialect,
        task: &Task,
        allocation: &Allocation,
        resource: Option<&Resource>,
        account: Option<&str>,
    ) -> Self {
        let job_name = job_name_for(task);
        let mut lines = vec!["#!/bin/bash".to_string()];

        match dialect {
            ScriptDialect::Slurm => {
                lines.push(format!("#SBATCH --job-name={}", job_name));
                lines.push("#SBATCH --nodes=1".to_string());
                if let Some(r) = resource {
                    if let Some(p) = &r.partition {
                        lines.push(format!("#SBATCH --partition={}", p));
                    }
                    if let Some(res) = &r.reservation {
                        lines.push(format!("#SBATCH --reservation={}", res));
                    }
                    if let Some(q) = &r.qos {
                        lines.push(format!("#SBATCH --qos={}", q));
                    }
                }
                if let Some(a) = account {
                    lines.push(format!("#SBATCH --account={}", a));
                }
            }
            ScriptDialect::Pbs => {
                lines.push(format!("#PBS -N {}", job_name));
                lines.push("#PBS -l nodes=1".to_string());
                if let Some(p) = resource.and_then(|r| r.partition.as_ref()) {
                    lines.push(format!("#PBS -q {}", p));
                }
                if let Some(a) = account {
                    lines.push(format!("#PBS -A {}", a));
                }
            }
            ScriptDialect::Shell => {}
        }

        lines.push(format!(
            "# resource={} slot={}",
            allocation.resource_id, allocation.slot
        ));

        let mut command = vec![task.command.clone()];
        command.extend(task.args.iter().map(|a| shell_quote(a)));
        lines.push(command.join(" "));

        Self {
            job_name,
            task_id: task.id,
            task_name: task.name.clone(),
            body: lines.join("\n") + "\n",
        }
    }
}
