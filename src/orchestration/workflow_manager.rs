//! Workflow orchestration loop.
//!
//! Each tick computes the ready set, schedules and submits it (unless the
//! workflow is paused), applies job updates from the coordinator, cascades
//! failures, and re-derives the workflow status. [`drive`] runs ticks on a
//! fixed interval until the workflow is terminal.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::core::task::{Task, TaskId, TaskState};
use crate::error::{Error, Result};
use crate::monitor::{self, ResourceMonitor};
use crate::orchestration::scheduler::Scheduler;
use crate::orchestration::task_manager::{task_state_for, TaskManager, TaskUpdate};
use crate::profiler::Profiler;
use crate::util::with_timeout;
use crate::worker;
use crate::workflow::{derive_status, Workflow, WorkflowId, WorkflowStatus};
use crate::{wlog, wlog_debug, wlog_error, wlog_warn};

/// What one tick did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickReport {
    /// Tasks submitted this tick.
    pub submitted: Vec<TaskId>,
    /// Tasks whose submission failed for good, with the error.
    pub failed_submissions: Vec<(TaskId, String)>,
    /// Job updates applied to the task graph.
    pub updates: Vec<TaskUpdate>,
    /// Tasks cancelled by failure cascades.
    pub cascaded: Vec<TaskId>,
    /// Set when ready tasks could not be placed; they stay PENDING.
    pub scheduling_failure: Option<String>,
    /// Workflow status after the tick.
    pub status: WorkflowStatus,
}

impl TickReport {
    fn new(status: WorkflowStatus) -> Self {
        Self {
            submitted: Vec::new(),
            failed_submissions: Vec::new(),
            updates: Vec::new(),
            cascaded: Vec::new(),
            scheduling_failure: None,
            status,
        }
    }
}

pub struct WorkflowManager {
    workflow: Workflow,
    scheduler: Scheduler,
    tasks: TaskManager,
    monitor: Arc<dyn ResourceMonitor>,
    profiler: Profiler,
    resource_timeout: Duration,
    tick_interval: Duration,
    profile_dir: Option<PathBuf>,
    profile_path: Option<PathBuf>,
    cancel_requested: bool,
    failure_reasons: HashMap<TaskId, String>,
}

impl WorkflowManager {
    pub fn new(workflow: Workflow, tasks: TaskManager, monitor: Arc<dyn ResourceMonitor>) -> Self {
        Self {
            workflow,
            scheduler: Scheduler::new(),
            tasks,
            monitor,
            profiler: Profiler::new(),
            resource_timeout: Duration::from_secs(10),
            tick_interval: Duration::from_secs(1),
            profile_dir: None,
            profile_path: None,
            cancel_requested: false,
            failure_reasons: HashMap::new(),
        }
    }

    /// Manager wired to the worker, resource monitor and settings in `config`.
    pub fn from_config(workflow: Workflow, config: &Config) -> Result<Self> {
        let tasks = TaskManager::new(worker::from_config(&config.worker), config.retry.clone())
            .with_account(config.worker.account.clone());
        Ok(Self::new(workflow, tasks, monitor::from_config(config))
            .with_resource_timeout(config.engine.resource_timeout())
            .with_tick_interval(config.engine.tick_interval())
            .with_profile_dir(Some(config.engine.profile_dir()?)))
    }

    pub fn with_scheduler(mut self, scheduler: Scheduler) -> Self {
        self.scheduler = scheduler;
        self
    }

    pub fn with_resource_timeout(mut self, timeout: Duration) -> Self {
        self.resource_timeout = timeout;
        self
    }

    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    /// Directory the profile is written to on completion; `None` disables it.
    pub fn with_profile_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.profile_dir = dir;
        self
    }

    pub fn id(&self) -> WorkflowId {
        self.workflow.id
    }

    pub fn workflow(&self) -> &Workflow {
        &self.workflow
    }

    pub fn status(&self) -> WorkflowStatus {
        self.workflow.status()
    }

    pub fn task_manager(&self) -> &TaskManager {
        &self.tasks
    }

    pub fn profiler(&self) -> &Profiler {
        &self.profiler
    }

    pub fn tick_interval(&self) -> Duration {
        self.tick_interval
    }

    /// Where the profile was written, once the workflow finished.
    pub fn profile_path(&self) -> Option<&PathBuf> {
        self.profile_path.as_ref()
    }

    /// Why `task_id` failed, when the job itself did not say.
    pub fn failure_reason(&self, task_id: &TaskId) -> Option<&str> {
        self.failure_reasons.get(task_id).map(String::as_str)
    }

    /// Begin execution: PENDING -> RUNNING.
    pub fn start(&mut self) -> Result<()> {
        self.workflow.transition(WorkflowStatus::Running)?;
        wlog!(
            "workflow {} ({}) started with {} tasks",
            self.workflow.name,
            self.workflow.id.short(),
            self.workflow.dag.task_count()
        );
        Ok(())
    }

    /// Stop submitting new tasks; jobs already submitted keep running.
    ///
    /// # Errors
    /// `Error::InvalidTransition` unless the workflow is RUNNING.
    pub fn pause(&mut self) -> Result<()> {
        self.require(WorkflowStatus::Running, WorkflowStatus::Paused)?;
        self.workflow.transition(WorkflowStatus::Paused)?;
        for id in self.task_ids_in(TaskState::Running) {
            self.set_task_state(&id, TaskState::Paused)?;
        }
        wlog!("workflow {} paused", self.workflow.id.short());
        Ok(())
    }

    /// Re-enable submissions after `pause`.
    ///
    /// # Errors
    /// `Error::InvalidTransition` unless the workflow is PAUSED.
    pub fn resume(&mut self) -> Result<()> {
        self.require(WorkflowStatus::Paused, WorkflowStatus::Running)?;
        self.workflow.transition(WorkflowStatus::Running)?;
        for id in self.task_ids_in(TaskState::Paused) {
            self.set_task_state(&id, TaskState::Running)?;
        }
        wlog!("workflow {} resumed", self.workflow.id.short());
        Ok(())
    }

    /// Cancel the workflow and every non-terminal task.
    ///
    /// Tasks with a live job get a cancel request; the rest are cancelled
    /// directly. Returns the tasks moved to CANCELLED.
    pub async fn cancel(&mut self) -> Result<Vec<TaskId>> {
        self.workflow.transition(WorkflowStatus::Cancelled)?;
        self.cancel_requested = true;

        let pending: Vec<TaskId> = self
            .workflow
            .dag
            .all_tasks()
            .into_iter()
            .filter(|t| !t.is_finished())
            .map(|t| t.id)
            .collect();

        for id in &pending {
            if let Err(e) = self.tasks.cancel(id).await {
                // Reissued by later ticks until the worker accepts it
                wlog_warn!("cancel of task {} failed: {}", id.short(), e);
            }
            self.set_task_state(id, TaskState::Cancelled)?;
        }

        wlog!(
            "workflow {} cancelled ({} tasks)",
            self.workflow.id.short(),
            pending.len()
        );
        self.save_profile().await;
        Ok(pending)
    }

    /// Run one orchestration step.
    ///
    /// A CANCELLED workflow only reissues failed cancel requests and
    /// observes job teardown. Other states than RUNNING or PAUSED are left
    /// alone.
    pub async fn tick(&mut self) -> Result<TickReport> {
        let status = self.workflow.status();
        let mut report = TickReport::new(status);
        if status == WorkflowStatus::Cancelled {
            self.reap_cancelled_jobs().await;
            return Ok(report);
        }
        if !matches!(status, WorkflowStatus::Running | WorkflowStatus::Paused) {
            return Ok(report);
        }

        let paused = status == WorkflowStatus::Paused;
        if !paused {
            self.submit_ready(&mut report).await?;
        }

        for update in self.tasks.poll().await {
            self.apply_update(update, &mut report)?;
        }

        let derived = derive_status(&self.workflow.dag.states(), self.cancel_requested, paused);
        if derived != status {
            self.workflow.transition(derived)?;
            wlog!(
                "workflow {} {} -> {}",
                self.workflow.id.short(),
                status,
                derived
            );
        }
        report.status = derived;

        if derived.is_terminal() {
            self.save_profile().await;
        }
        Ok(report)
    }

    async fn submit_ready(&mut self, report: &mut TickReport) -> Result<()> {
        let ready: Vec<Task> = self
            .workflow
            .dag
            .ready_tasks()
            .into_iter()
            .cloned()
            .collect();
        if ready.is_empty() {
            return Ok(());
        }

        let resources = match with_timeout(self.resource_timeout, self.monitor.resources()).await {
            Ok(resources) => resources,
            Err(e) => {
                wlog_warn!("resource snapshot unavailable: {}", e);
                report.scheduling_failure = Some(e.to_string());
                return Ok(());
            }
        };

        let refs: Vec<&Task> = ready.iter().collect();
        let allocations = match self.scheduler.schedule(&self.workflow.dag, &refs, &resources) {
            Ok(allocations) => allocations,
            Err(e @ Error::SchedulingFailure(_)) => {
                wlog_warn!("{}; {} tasks stay pending", e, ready.len());
                report.scheduling_failure = Some(e.to_string());
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        self.profiler
            .record_schedule(&resources, allocations.values().cloned().collect());

        let tasks = &self.tasks;
        let results = join_all(ready.iter().filter_map(|task| {
            let allocation = allocations.get(&task.id)?;
            let resource = resources.iter().find(|r| r.id == allocation.resource_id);
            Some(async move { (task.id, tasks.submit(task, allocation, resource).await) })
        }))
        .await;

        for (task_id, result) in results {
            match result {
                Ok(job) => {
                    self.set_task_state(&task_id, TaskState::Running)?;
                    report.submitted.push(task_id);
                    if job.state.is_terminal() {
                        let name = self.task_name(&task_id);
                        let update = TaskUpdate {
                            task_id,
                            task_name: name,
                            job_state: job.state,
                            state: task_state_for(job.state),
                            reason: None,
                        };
                        self.apply_update(update, report)?;
                    }
                }
                Err(Error::JobAlreadyLive { task }) => {
                    wlog_warn!("{} already has a live job; not resubmitting", task);
                }
                Err(e) => {
                    let reason = e.to_string();
                    self.set_task_state(&task_id, TaskState::Failed)?;
                    self.failure_reasons.insert(task_id, reason.clone());
                    report.cascaded.extend(self.cascade(&task_id)?);
                    report.failed_submissions.push((task_id, reason));
                }
            }
        }
        Ok(())
    }

    /// Whether every live job has accepted its cancel request.
    pub async fn cancel_settled(&self) -> bool {
        self.tasks.uncancelled_jobs().await.is_empty()
    }

    async fn reap_cancelled_jobs(&mut self) {
        for id in self.tasks.uncancelled_jobs().await {
            if let Err(e) = self.tasks.cancel(&id).await {
                wlog_warn!("cancel of task {} still failing: {}", id.short(), e);
            }
        }
        if self.tasks.live_jobs().await > 0 {
            // Updates only feed the coordinator; the tasks are already CANCELLED
            let updates = self.tasks.poll().await;
            wlog_debug!("{} jobs torn down after cancel", updates.len());
        }
    }

    fn apply_update(&mut self, update: TaskUpdate, report: &mut TickReport) -> Result<()> {
        let Some(current) = self.workflow.dag.get_task(&update.task_id).map(|t| t.state) else {
            return Ok(());
        };
        if current.is_terminal() {
            // e.g. a job finishing after its task was cancelled
            wlog_debug!(
                "ignoring job {} for finished task {}",
                update.job_state,
                update.task_name
            );
            return Ok(());
        }
        if update.state == TaskState::Running {
            // Paused tasks stay paused while their job runs
            return Ok(());
        }

        self.set_task_state(&update.task_id, update.state)?;
        if let Some(reason) = &update.reason {
            self.failure_reasons.insert(update.task_id, reason.clone());
        }
        if matches!(update.state, TaskState::Failed | TaskState::Cancelled) {
            report.cascaded.extend(self.cascade(&update.task_id)?);
        }
        report.updates.push(update);
        Ok(())
    }

    fn cascade(&mut self, task_id: &TaskId) -> Result<Vec<TaskId>> {
        let cancelled = self.workflow.dag.cancel_descendants(task_id)?;
        for id in &cancelled {
            let name = self.task_name(id);
            self.profiler
                .record_state_change(*id, &name, TaskState::Cancelled);
        }
        if !cancelled.is_empty() {
            wlog_warn!(
                "{} failed; cancelled {} dependent tasks",
                self.task_name(task_id),
                cancelled.len()
            );
        }
        Ok(cancelled)
    }

    fn set_task_state(&mut self, id: &TaskId, state: TaskState) -> Result<()> {
        let previous = self.workflow.dag.set_task_state(id, state)?;
        if previous != state {
            let name = self.task_name(id);
            self.profiler.record_state_change(*id, &name, state);
        }
        Ok(())
    }

    fn task_name(&self, id: &TaskId) -> String {
        self.workflow
            .dag
            .get_task(id)
            .map(|t| t.name.clone())
            .unwrap_or_else(|| id.short())
    }

    fn task_ids_in(&self, state: TaskState) -> Vec<TaskId> {
        self.workflow
            .dag
            .all_tasks()
            .into_iter()
            .filter(|t| t.state == state)
            .map(|t| t.id)
            .collect()
    }

    fn require(&self, expected: WorkflowStatus, target: WorkflowStatus) -> Result<()> {
        let status = self.workflow.status();
        if status != expected {
            return Err(Error::InvalidTransition {
                entity: "workflow",
                from: status.to_string(),
                to: target.to_string(),
            });
        }
        Ok(())
    }

    async fn save_profile(&mut self) {
        if self.profile_path.is_some() {
            return;
        }
        let Some(dir) = self.profile_dir.clone() else {
            return;
        };
        match self.profiler.save(&dir, &self.workflow.id).await {
            Ok(path) => self.profile_path = Some(path),
            Err(e) => wlog_error!("could not write profile for {}: {}", self.workflow.id, e),
        }
    }
}

/// A workflow manager shared between its driver and control requests.
pub type SharedWorkflow = Arc<Mutex<WorkflowManager>>;

/// Tick `manager` on its interval until the workflow is terminal or `token` fires.
///
/// A cancelled workflow keeps ticking until every cancel request went
/// through. The lock is released between ticks so pause, resume and cancel
/// requests interleave with the loop.
pub async fn drive(manager: SharedWorkflow, token: CancellationToken) -> Result<WorkflowStatus> {
    let period = manager.lock().await.tick_interval();
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => {
                let status = manager.lock().await.status();
                wlog_debug!("driver stopped at {}", status);
                return Ok(status);
            }
            _ = interval.tick() => {}
        }

        let mut guard = manager.lock().await;
        let report = guard.tick().await.inspect_err(|e| {
            wlog_error!("workflow {} tick failed: {}", guard.id().short(), e);
        })?;
        if report.status.is_terminal()
            && (report.status != WorkflowStatus::Cancelled || guard.cancel_settled().await)
        {
            return Ok(report.status);
        }
    }
}
