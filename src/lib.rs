pub mod config;
pub mod error;
/// Lanza - provisions and bootstraps MongoDB topologies
///
/// Lanza reads a declarative description of a MongoDB deployment
/// (standalone processes, replica sets, sharded clusters) placed across
/// cloud instances and pre-existing machines, then:
/// 1. resolves all placement up front (notably config-server colocation),
/// 2. provisions compute with generated bootstrap payloads,
/// 3. drives each topology through its startup protocol, polling every
///    dependency until it is observably ready.
///
/// The compute provider and the database wire client are injected
/// collaborators; in-crate simulated implementations back the rehearsal
/// mode and the test suite.
pub mod driver;
pub mod poll;
pub mod provision;
pub mod record;
pub mod topology;

use std::time::Instant;

use crate::error::LanzaResult;
use crate::record::LaunchRecord;
use crate::topology::{LaunchContext, StartTarget, Topology};

/// What one completed launch looked like
#[derive(Debug, Clone)]
pub struct LaunchSummary {
    /// Host id and resolved hostname for every host in the topology
    pub hosts: Vec<(String, String)>,
    /// Seconds the whole setup took
    pub elapsed_secs: f64,
}

/// Top-level orchestrator for one launch
pub struct Launcher {
    topology: Topology,
    context: LaunchContext,
}

impl Launcher {
    pub fn new(topology: Topology, context: LaunchContext) -> Self {
        Self { topology, context }
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    /// Start every top-level entity in declaration order: sharded
    /// clusters, then replica sets not claimed as shards, then processes
    /// not claimed by anything.
    ///
    /// Runs to completion or fails fatally; already-provisioned
    /// resources are left in place either way, teardown is a separate
    /// operation driven by the launch record.
    pub async fn launch(&self) -> LanzaResult<LaunchSummary> {
        let started = Instant::now();

        for target in self.topology.top_level() {
            match target {
                StartTarget::Cluster(cluster) => {
                    tracing::info!("starting sharded cluster {}", cluster.id());
                    cluster.start(&self.context, &self.topology).await?;
                }
                StartTarget::ReplicaSet(rs) => {
                    tracing::info!("starting replica set {}", rs.name());
                    rs.start(&self.context, &self.topology).await?;
                }
                StartTarget::Process(process) => {
                    tracing::info!("starting standalone {}", process.id());
                    process.start(&self.context, &self.topology).await?;
                }
            }
        }

        if let Some(path) = &self.context.record_path {
            LaunchRecord::new(self.topology.provisioned_handles()).save(path)?;
        }

        let summary = LaunchSummary {
            hosts: self
                .topology
                .hosts()
                .map(|host| {
                    let hostname = host.hostname().unwrap_or_default();
                    (host.id().to_string(), hostname)
                })
                .collect(),
            elapsed_secs: started.elapsed().as_secs_f64(),
        };
        tracing::info!("done. Setup took {:.1} seconds", summary.elapsed_secs);
        Ok(summary)
    }
}
