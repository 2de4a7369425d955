/// Topology model: hosts, processes and clusters
///
/// Entities reference each other by id through a shared registry rather
/// than holding pointers at each other, which keeps ownership flat: the
/// `Topology` owns every entity, a process knows its host only by id, a
/// cluster knows its members only by id. All placement is decided by the
/// builder before anything starts.
pub mod builder;
pub mod cluster;
pub mod host;
pub mod process;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::ProvisionConfig;
use crate::driver::{MongoDriver, RemoteProbe};
use crate::error::{LanzaError, LanzaResult};
use crate::poll::RetryPolicy;
use crate::provision::payload::PayloadRenderer;
use crate::provision::{InstanceHandle, Provisioner};

pub use cluster::{ReplicaSet, Shard, ShardedCluster};
pub use host::{Host, HostKind, HostState};
pub use process::{MongoProcess, ProcessState};

pub type HostId = String;
pub type ProcessId = String;
pub type ClusterId = String;

/// Address used between processes that share a host
pub const LOOPBACK: &str = "localhost";

/// Collaborators and settings one launch runs with
pub struct LaunchContext {
    pub provisioner: Arc<dyn Provisioner>,
    pub probe: Arc<dyn RemoteProbe>,
    pub driver: Arc<dyn MongoDriver>,
    pub renderer: Arc<dyn PayloadRenderer>,
    pub retry: RetryPolicy,
    pub provision: ProvisionConfig,
    /// Where to persist the launch record; `None` skips the record
    pub record_path: Option<PathBuf>,
}

impl LaunchContext {
    /// Context wired entirely against the in-crate simulated
    /// collaborators; used by the CLI rehearsal mode and tests
    pub fn simulated(provision: ProvisionConfig) -> Self {
        Self {
            provisioner: Arc::new(crate::provision::SimulatedProvisioner::new()),
            probe: Arc::new(crate::driver::SimulatedProbe),
            driver: Arc::new(crate::driver::SimulatedDriver::new()),
            renderer: Arc::new(crate::provision::payload::ScriptRenderer),
            retry: RetryPolicy::default(),
            provision,
            record_path: None,
        }
    }

    /// Value of the owner tag attached to provisioned resources
    pub fn owner_tag(&self) -> String {
        if let Some(owner) = &self.provision.owner {
            return owner.clone();
        }
        let user = std::env::var("USER")
            .or_else(|_| std::env::var("USERNAME"))
            .unwrap_or_else(|_| "unknown".to_string());
        let machine = std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string());
        format!("{}@{}", user, machine)
    }
}

/// A startable top-level entity: not claimed as a member, shard, router
/// or config server of anything else
pub enum StartTarget {
    Cluster(Arc<ShardedCluster>),
    ReplicaSet(Arc<ReplicaSet>),
    Process(Arc<MongoProcess>),
}

/// The fully resolved entity graph for one launch
#[derive(Debug, Default)]
pub struct Topology {
    hosts: HashMap<HostId, Arc<Host>>,
    host_order: Vec<HostId>,
    processes: HashMap<ProcessId, Arc<MongoProcess>>,
    process_order: Vec<ProcessId>,
    replica_sets: Vec<Arc<ReplicaSet>>,
    clusters: Vec<Arc<ShardedCluster>>,
}

impl Topology {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert_host(&mut self, host: Host) -> LanzaResult<Arc<Host>> {
        let id = host.id().to_string();
        if self.hosts.contains_key(&id) {
            return Err(LanzaError::config(format!("duplicate host id: {}", id)));
        }
        let host = Arc::new(host);
        self.hosts.insert(id.clone(), Arc::clone(&host));
        self.host_order.push(id);
        Ok(host)
    }

    pub(crate) fn insert_process(&mut self, process: MongoProcess) -> LanzaResult<Arc<MongoProcess>> {
        let id = process.id().to_string();
        if self.processes.contains_key(&id) {
            return Err(LanzaError::config(format!("duplicate process id: {}", id)));
        }
        let process = Arc::new(process);
        self.processes.insert(id.clone(), Arc::clone(&process));
        self.process_order.push(id);
        Ok(process)
    }

    pub(crate) fn push_replica_set(&mut self, rs: ReplicaSet) -> Arc<ReplicaSet> {
        let rs = Arc::new(rs);
        self.replica_sets.push(Arc::clone(&rs));
        rs
    }

    pub(crate) fn push_cluster(&mut self, cluster: ShardedCluster) -> Arc<ShardedCluster> {
        let cluster = Arc::new(cluster);
        self.clusters.push(Arc::clone(&cluster));
        cluster
    }

    /// Look up a host by id
    pub fn host(&self, id: &str) -> LanzaResult<Arc<Host>> {
        self.hosts
            .get(id)
            .cloned()
            .ok_or_else(|| LanzaError::config(format!("unknown host id: {}", id)))
    }

    /// Look up a process by id
    pub fn process(&self, id: &str) -> LanzaResult<Arc<MongoProcess>> {
        self.processes
            .get(id)
            .cloned()
            .ok_or_else(|| LanzaError::config(format!("unknown process id: {}", id)))
    }

    /// Look up a replica set by id
    pub fn replica_set(&self, id: &str) -> Option<Arc<ReplicaSet>> {
        self.replica_sets.iter().find(|rs| rs.id() == id).cloned()
    }

    /// Hosts in declaration order
    pub fn hosts(&self) -> impl Iterator<Item = Arc<Host>> + '_ {
        self.host_order.iter().map(|id| Arc::clone(&self.hosts[id]))
    }

    /// Processes in declaration order
    pub fn processes(&self) -> impl Iterator<Item = Arc<MongoProcess>> + '_ {
        self.process_order
            .iter()
            .map(|id| Arc::clone(&self.processes[id]))
    }

    pub fn replica_sets(&self) -> &[Arc<ReplicaSet>] {
        &self.replica_sets
    }

    pub fn clusters(&self) -> &[Arc<ShardedCluster>] {
        &self.clusters
    }

    /// Handles of every provisioned host, in host declaration order
    pub fn provisioned_handles(&self) -> Vec<InstanceHandle> {
        self.hosts()
            .filter_map(|host| host.instance_handle())
            .collect()
    }

    /// Entities the orchestrator starts directly: sharded clusters first,
    /// then replica sets not claimed as shards, then processes not
    /// claimed by any cluster, replica set or router.
    pub fn top_level(&self) -> Vec<StartTarget> {
        let mut claimed_processes: std::collections::HashSet<&str> = std::collections::HashSet::new();
        let mut claimed_sets: std::collections::HashSet<&str> = std::collections::HashSet::new();

        for rs in &self.replica_sets {
            claimed_processes.extend(rs.members().iter().map(|id| id.as_str()));
        }
        for cluster in &self.clusters {
            claimed_processes.insert(cluster.router());
            for shard in cluster.shards() {
                match shard {
                    Shard::Standalone(id) => {
                        claimed_processes.insert(id.as_str());
                    }
                    Shard::ReplicaSet(id) => {
                        claimed_sets.insert(id.as_str());
                    }
                }
            }
        }
        for id in &self.process_order {
            for cs in self.processes[id].config_servers() {
                claimed_processes.insert(cs.as_str());
            }
        }

        let mut targets = Vec::new();
        for cluster in &self.clusters {
            targets.push(StartTarget::Cluster(Arc::clone(cluster)));
        }
        for rs in &self.replica_sets {
            if !claimed_sets.contains(rs.id()) {
                targets.push(StartTarget::ReplicaSet(Arc::clone(rs)));
            }
        }
        for id in &self.process_order {
            if !claimed_processes.contains(id.as_str()) {
                targets.push(StartTarget::Process(Arc::clone(&self.processes[id])));
            }
        }
        targets
    }
}
