//! Resource snapshots for the scheduler.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::{Config, ResourceSource};
use crate::core::resource::{Resource, ResourceId};
use crate::worker::command;
use crate::{wlog_debug, Result};

/// Read-only source of the resources a scheduling pass may use.
#[async_trait]
pub trait ResourceMonitor: Send + Sync {
    async fn resources(&self) -> Result<Vec<Resource>>;
}

/// Fixed resource list, usually from `[[resources.nodes]]`.
pub struct StaticResourceMonitor {
    resources: Vec<Resource>,
}

impl StaticResourceMonitor {
    pub fn new(resources: Vec<Resource>) -> Self {
        Self { resources }
    }
}

#[async_trait]
impl ResourceMonitor for StaticResourceMonitor {
    async fn resources(&self) -> Result<Vec<Resource>> {
        Ok(self.resources.clone())
    }
}

/// Partitions reported by Slurm's `sinfo`.
pub struct SinfoResourceMonitor {
    program: String,
    timeout: Duration,
}

impl SinfoResourceMonitor {
    pub fn new(timeout: Duration) -> Self {
        Self::with_program("sinfo", timeout)
    }

    /// Monitor calling `program` instead of `sinfo` from `PATH`.
    pub fn with_program(program: &str, timeout: Duration) -> Self {
        Self {
            program: program.to_string(),
            timeout,
        }
    }
}

/// Parse `sinfo -h -o "%P|%D|%c|%m"` output, one resource per partition.
///
/// `%m` is memory per node in MB. The default partition carries a `*`
/// suffix, and `%c`/`%m` carry a `+` when the nodes differ; both are
/// stripped, keeping the smallest value sinfo reports. Partitions listed on several lines (one per
/// node state) are merged by summing their node counts.
pub fn parse_sinfo(stdout: &str) -> Vec<Resource> {
    let mut resources: Vec<Resource> = Vec::new();
    for line in stdout.lines() {
        let fields: Vec<&str> = line.trim().split('|').collect();
        if fields.len() != 4 {
            continue;
        }
        let partition = fields[0].trim_end_matches('*');
        let cores = fields[2].trim_end_matches('+');
        let (Ok(nodes), Ok(cores)) = (fields[1].parse::<u32>(), cores.parse::<u32>()) else {
            continue;
        };
        let memory: u64 = fields[3].trim_end_matches('+').parse().unwrap_or(0);

        if let Some(existing) = resources
            .iter_mut()
            .find(|r| r.id.as_str() == partition)
        {
            existing.nodes += nodes;
            continue;
        }

        let mut resource = Resource::new(partition, nodes).with_partition(partition);
        resource.cores_per_node = cores;
        resource.ram_per_core_mb = if cores > 0 { memory / u64::from(cores) } else { 0 };
        resources.push(resource);
    }
    resources
}

#[async_trait]
impl ResourceMonitor for SinfoResourceMonitor {
    async fn resources(&self) -> Result<Vec<Resource>> {
        let output = command::run(
            &self.program,
            &["-h", "-o", "%P|%D|%c|%m"],
            None,
            self.timeout,
        )
        .await?;
        if !output.success {
            return Err(command::failure(&self.program, &output));
        }
        let resources = parse_sinfo(&output.stdout);
        wlog_debug!(
            "sinfo reported {} partitions: {:?}",
            resources.len(),
            resources.iter().map(|r| &r.id).collect::<Vec<&ResourceId>>()
        );
        Ok(resources)
    }
}

/// Build the monitor selected by `[resources] source`.
pub fn from_config(config: &Config) -> Arc<dyn ResourceMonitor> {
    match config.resources.source {
        ResourceSource::Static => {
            Arc::new(StaticResourceMonitor::new(config.resources.nodes.clone()))
        }
        ResourceSource::Sinfo => {
            Arc::new(SinfoResourceMonitor::new(config.engine.resource_timeout()))
        }
    }
}
