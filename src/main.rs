use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};

use wfengine::api::WorkflowService;
use wfengine::config::Config;
use wfengine::monitor;
use wfengine::worker;
use wfengine::workflow::{Workflow, WorkflowSpec, WorkflowStatus};
use wfengine::{wlog, wlog_warn, Error, Result};

/// wfengine - run task graphs on HPC workload managers
#[derive(Parser, Debug)]
#[command(name = "wfengine")]
#[command(version, about, long_about = None)]
#[command(after_help = "ENVIRONMENT:\n    WFENGINE_LOG=<level>   Log threshold (error, warn, info, debug, trace)")]
pub struct Cli {
    /// Enable debug logging (writes to ~/.wfengine/wfengine.log)
    #[arg(short = 'd', long)]
    pub debug: bool,

    /// Config file (default: ~/.wfengine/wfengine.toml)
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Submit a workflow, run it to completion and print task states
    Run {
        /// Workflow description (JSON)
        workflow: PathBuf,
    },

    /// Check a workflow description and print its tasks in execution order
    Validate {
        /// Workflow description (JSON)
        workflow: PathBuf,
    },

    /// Print the resources the scheduler would see
    Resources,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    wfengine::log::init(&config.log, cli.debug);

    match cli.command {
        Command::Run { workflow } => run_workflow(config, &workflow),
        Command::Validate { workflow } => run_validate(&workflow),
        Command::Resources => run_resources(&config),
    }
}

fn read_spec(path: &Path) -> Result<WorkflowSpec> {
    WorkflowSpec::from_json(&std::fs::read_to_string(path)?)
}

fn run_workflow(config: Config, path: &Path) -> Result<()> {
    let spec = read_spec(path)?;
    wlog!("Run command: {} ({} tasks)", path.display(), spec.tasks.len());

    if !worker::backend_available(config.worker.backend) {
        return Err(Error::WorkerUnavailable(format!(
            "{} tools not found on PATH",
            config.worker.backend
        )));
    }

    let rt = tokio::runtime::Runtime::new()?;
    let (status, report) = rt.block_on(async {
        let service = WorkflowService::new(config);
        let id = service.submit(spec).await?.to_string();
        println!("Workflow {}", id);
        service.start(&id).await?;

        let status = tokio::select! {
            status = service.wait(&id) => status?,
            _ = tokio::signal::ctrl_c() => {
                wlog_warn!("interrupted, cancelling workflow {}", id);
                service.cancel(&id).await?;
                WorkflowStatus::Cancelled
            }
        };
        let report = service.status(&id).await?;
        Ok::<_, Error>((status, report))
    })?;

    println!("{}", report);
    println!("Workflow status: {}", status);
    if status == WorkflowStatus::Completed {
        Ok(())
    } else {
        std::process::exit(1)
    }
}

fn run_validate(path: &Path) -> Result<()> {
    let workflow = Workflow::from_spec(read_spec(path)?)?;
    println!(
        "{}: {} tasks, {} dependencies",
        workflow.name,
        workflow.dag.task_count(),
        workflow.dag.dependency_count()
    );
    for (i, task) in workflow.dag.topological_order()?.into_iter().enumerate() {
        println!("  {:>3}. {}", i + 1, task.name);
    }
    Ok(())
}

fn run_resources(config: &Config) -> Result<()> {
    let rt = tokio::runtime::Runtime::new()?;
    let resources = rt.block_on(monitor::from_config(config).resources())?;
    if resources.is_empty() {
        println!("No resources available");
    }
    for r in resources {
        println!(
            "{:<16} nodes={:<5} cores/node={:<4} ram/core={}MB{}",
            r.id,
            r.nodes,
            r.cores_per_node,
            r.ram_per_core_mb,
            r.partition
                .map(|p| format!(" partition={}", p))
                .unwrap_or_default()
        );
    }
    Ok(())
}
