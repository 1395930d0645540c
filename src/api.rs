//! Endpoint contracts for workflow control.
//!
//! `WorkflowService` implements what the REST layer exposes:
//!
//! | Endpoint | Method | Service call |
//! |---|---|---|
//! | `/workflows` | POST | [`WorkflowService::submit`] |
//! | `/workflows/{id}` | POST | [`WorkflowService::start`] |
//! | `/workflows/{id}` | GET | [`WorkflowService::status`] |
//! | `/workflows/{id}` | DELETE | [`WorkflowService::cancel`] |
//! | `/workflows/{id}` | PATCH | [`WorkflowService::patch`] |
//!
//! The HTTP server itself lives elsewhere; ids arrive as path strings.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::orchestration::{drive, SharedWorkflow, WorkflowManager};
use crate::workflow::{Workflow, WorkflowId, WorkflowSpec, WorkflowStatus};
use crate::{wlog, Error, Result};

/// Body of `PATCH /workflows/{id}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchOption {
    Pause,
    Resume,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatchRequest {
    pub option: PatchOption,
}

/// Builds the manager for a freshly submitted workflow.
pub type ManagerFactory = Box<dyn Fn(Workflow) -> Result<WorkflowManager> + Send + Sync>;

struct Entry {
    manager: SharedWorkflow,
    token: CancellationToken,
    driver: Option<JoinHandle<Result<WorkflowStatus>>>,
}

pub struct WorkflowService {
    factory: ManagerFactory,
    workflows: Mutex<HashMap<WorkflowId, Entry>>,
}

impl WorkflowService {
    /// Service whose workflows use the worker and resources in `config`.
    pub fn new(config: Config) -> Self {
        Self::with_factory(Box::new(move |workflow| {
            WorkflowManager::from_config(workflow, &config)
        }))
    }

    pub fn with_factory(factory: ManagerFactory) -> Self {
        Self {
            factory,
            workflows: Mutex::new(HashMap::new()),
        }
    }

    fn parse_id(id: &str) -> Result<WorkflowId> {
        id.parse()
            .map_err(|_| Error::WrongWorkflowId(id.to_string()))
    }

    async fn manager(&self, id: &str) -> Result<SharedWorkflow> {
        let workflow_id = Self::parse_id(id)?;
        self.workflows
            .lock()
            .await
            .get(&workflow_id)
            .map(|entry| entry.manager.clone())
            .ok_or_else(|| Error::WrongWorkflowId(id.to_string()))
    }

    /// `POST /workflows`: validate the graph and register the workflow.
    pub async fn submit(&self, spec: WorkflowSpec) -> Result<WorkflowId> {
        let workflow = Workflow::from_spec(spec)?;
        let id = workflow.id;
        let manager = (self.factory)(workflow)?;
        self.workflows.lock().await.insert(
            id,
            Entry {
                manager: Arc::new(Mutex::new(manager)),
                token: CancellationToken::new(),
                driver: None,
            },
        );
        wlog!("workflow {} submitted", id.short());
        Ok(id)
    }

    /// `POST /workflows/{id}`: start the orchestration loop.
    ///
    /// Starting a running workflow again is accepted and changes nothing.
    ///
    /// # Errors
    /// `Error::InvalidTransition` once the workflow is terminal.
    pub async fn start(&self, id: &str) -> Result<String> {
        let workflow_id = Self::parse_id(id)?;
        let mut workflows = self.workflows.lock().await;
        let entry = workflows
            .get_mut(&workflow_id)
            .ok_or_else(|| Error::WrongWorkflowId(id.to_string()))?;

        let mut manager = entry.manager.lock().await;
        let status = manager.status();
        if status.is_terminal() {
            return Err(Error::InvalidTransition {
                entity: "workflow",
                from: status.to_string(),
                to: WorkflowStatus::Running.to_string(),
            });
        }
        if entry.driver.is_none() {
            manager.start()?;
            drop(manager);
            entry.driver = Some(tokio::spawn(drive(
                entry.manager.clone(),
                entry.token.clone(),
            )));
        }
        Ok("Started".to_string())
    }

    /// `GET /workflows/{id}`: one `name: STATE` line per task.
    pub async fn status(&self, id: &str) -> Result<String> {
        let manager = self.manager(id).await?;
        let manager = manager.lock().await;
        let lines: Vec<String> = manager
            .workflow()
            .dag
            .topological_order()?
            .into_iter()
            .map(|task| format!("{}: {}", task.name, task.state))
            .collect();
        Ok(lines.join("\n"))
    }

    /// Current status of the workflow itself.
    pub async fn workflow_status(&self, id: &str) -> Result<WorkflowStatus> {
        let manager = self.manager(id).await?;
        let status = manager.lock().await.status();
        Ok(status)
    }

    /// `DELETE /workflows/{id}`: cancel the workflow and its tasks.
    pub async fn cancel(&self, id: &str) -> Result<String> {
        let manager = self.manager(id).await?;
        let settled = {
            let mut manager = manager.lock().await;
            manager.cancel().await?;
            manager.cancel_settled().await
        };
        // Otherwise the driver keeps reissuing the failed cancel requests
        if settled {
            if let Some(entry) = self.workflows.lock().await.get(&Self::parse_id(id)?) {
                entry.token.cancel();
            }
        }
        Ok("cancelled".to_string())
    }

    /// `PATCH /workflows/{id}`: pause or resume; returns the new status.
    pub async fn patch(&self, id: &str, option: PatchOption) -> Result<String> {
        let manager = self.manager(id).await?;
        let mut manager = manager.lock().await;
        match option {
            PatchOption::Pause => manager.pause()?,
            PatchOption::Resume => manager.resume()?,
        }
        Ok(manager.status().to_string())
    }

    /// Wait for the driver of `id` to stop and return the final status.
    pub async fn wait(&self, id: &str) -> Result<WorkflowStatus> {
        let workflow_id = Self::parse_id(id)?;
        let driver = self
            .workflows
            .lock()
            .await
            .get_mut(&workflow_id)
            .ok_or_else(|| Error::WrongWorkflowId(id.to_string()))?
            .driver
            .take();
        match driver {
            Some(handle) => handle.await.map_err(|e| Error::TaskJoin(e.to_string()))?,
            None => self.workflow_status(id).await,
        }
    }

    /// Stop every driver without cancelling the workflows.
    pub async fn shutdown(&self) {
        for entry in self.workflows.lock().await.values() {
            entry.token.cancel();
        }
    }

    pub async fn workflow_ids(&self) -> Vec<WorkflowId> {
        self.workflows.lock().await.keys().copied().collect()
    }
}
