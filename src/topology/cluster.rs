/// Cluster startup protocols
///
/// A replica set is a named group of mongod processes tied together by a
/// single replSetInitiate command; a sharded cluster is a router plus an
/// ordered list of shards registered one addShard at a time over a single
/// connection. Both are idempotent: the initiation commands are issued
/// exactly once per launch.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::json;

use crate::error::{LanzaError, LanzaResult};
use crate::topology::process::MongoProcess;
use crate::topology::{ClusterId, LaunchContext, ProcessId, Topology, LOOPBACK};

fn resolved_hostname(topo: &Topology, process: &MongoProcess) -> LanzaResult<String> {
    let host = topo.host(process.host_id())?;
    host.hostname().ok_or_else(|| {
        LanzaError::connection(
            format!("host {}", host.id()),
            "hostname not resolved after startup",
        )
    })
}

/// A named replica set over declared member processes
#[derive(Debug)]
pub struct ReplicaSet {
    id: ClusterId,
    name: String,
    members: Vec<ProcessId>,
    initialized: AtomicBool,
}

impl ReplicaSet {
    pub fn new(id: ClusterId, name: String, members: Vec<ProcessId>) -> Self {
        Self {
            id,
            name,
            members,
            initialized: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Member process ids in declaration order
    pub fn members(&self) -> &[ProcessId] {
        &self.members
    }

    pub fn initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    /// Start every member in declared order, then initiate the set.
    ///
    /// Members that all share one host address each other over loopback;
    /// otherwise each entry carries its resolved hostname. Member ids are
    /// assigned 0..n-1 in declaration order. The initiation command goes
    /// over one connection to the first member and a failure there is
    /// fatal, with no retry.
    pub async fn start(&self, ctx: &LaunchContext, topo: &Topology) -> LanzaResult<()> {
        if self.initialized() {
            return Ok(());
        }

        for member_id in &self.members {
            topo.process(member_id)?.start(ctx, topo).await?;
        }

        let members: Vec<Arc<MongoProcess>> = self
            .members
            .iter()
            .map(|id| topo.process(id))
            .collect::<LanzaResult<_>>()?;
        let one_host = members
            .iter()
            .all(|m| m.host_id() == members[0].host_id());

        let mut member_docs = Vec::new();
        for (i, member) in members.iter().enumerate() {
            let address = if one_host {
                LOOPBACK.to_string()
            } else {
                resolved_hostname(topo, member)?
            };
            member_docs.push(json!({
                "_id": i,
                "host": format!("{}:{}", address, member.port()),
            }));
        }

        let subject = format!("replica set {}", self.name);
        let first = &members[0];
        let connect_address = resolved_hostname(topo, first)?;
        tracing::info!("initiating replica set {}...", self.name);

        let mut conn = ctx
            .driver
            .connect(&connect_address, first.port())
            .await
            .map_err(|e| LanzaError::connection(subject.clone(), e.to_string()))?;
        conn.run_admin_command(
            "replSetInitiate",
            json!({ "_id": self.name, "members": member_docs }),
        )
        .await
        .map_err(|e| LanzaError::connection(subject, e.to_string()))?;
        conn.close().await;

        self.initialized.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Connection string under which this set registers as a shard.
    /// Members colocated with the router's host are addressed over
    /// loopback.
    pub fn registration_string(&self, topo: &Topology, router_host: &str) -> LanzaResult<String> {
        let mut addresses = Vec::new();
        for member_id in &self.members {
            let member = topo.process(member_id)?;
            let address = if member.host_id() == router_host {
                LOOPBACK.to_string()
            } else {
                resolved_hostname(topo, &member)?
            };
            addresses.push(format!("{}:{}", address, member.port()));
        }
        Ok(format!("{}/{}", self.name, addresses.join(",")))
    }
}

/// One shard of a sharded cluster
#[derive(Debug)]
pub enum Shard {
    Standalone(ProcessId),
    ReplicaSet(ClusterId),
}

impl Shard {
    pub async fn start(&self, ctx: &LaunchContext, topo: &Topology) -> LanzaResult<()> {
        match self {
            Shard::Standalone(id) => topo.process(id)?.start(ctx, topo).await,
            Shard::ReplicaSet(id) => {
                let rs = topo
                    .replica_set(id)
                    .ok_or_else(|| LanzaError::config(format!("unknown replica set id: {}", id)))?;
                rs.start(ctx, topo).await
            }
        }
    }

    /// Address string passed to addShard for this shard
    pub fn registration_string(&self, topo: &Topology, router_host: &str) -> LanzaResult<String> {
        match self {
            Shard::Standalone(id) => {
                let process = topo.process(id)?;
                let address = if process.host_id() == router_host {
                    LOOPBACK.to_string()
                } else {
                    resolved_hostname(topo, &process)?
                };
                Ok(format!("{}:{}", address, process.port()))
            }
            Shard::ReplicaSet(id) => {
                let rs = topo
                    .replica_set(id)
                    .ok_or_else(|| LanzaError::config(format!("unknown replica set id: {}", id)))?;
                rs.registration_string(topo, router_host)
            }
        }
    }
}

/// A router plus an ordered list of shards
#[derive(Debug)]
pub struct ShardedCluster {
    id: ClusterId,
    router: ProcessId,
    shards: Vec<Shard>,
    initialized: AtomicBool,
}

impl ShardedCluster {
    pub fn new(id: ClusterId, router: ProcessId, shards: Vec<Shard>) -> Self {
        Self {
            id,
            router,
            shards,
            initialized: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn router(&self) -> &str {
        &self.router
    }

    pub fn shards(&self) -> &[Shard] {
        &self.shards
    }

    pub fn initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    /// Start the router (and through it the config servers), start every
    /// shard in declared order, then register the shards one by one over
    /// a single connection to the router.
    ///
    /// Registration stays sequential and single-connection: the router
    /// has only just become reachable.
    pub async fn start(&self, ctx: &LaunchContext, topo: &Topology) -> LanzaResult<()> {
        if self.initialized() {
            return Ok(());
        }

        let router = topo.process(&self.router)?;
        tracing::info!("starting router {} for cluster {}", router.id(), self.id);
        router.start(ctx, topo).await?;

        for shard in &self.shards {
            shard.start(ctx, topo).await?;
        }

        let subject = format!("sharded cluster {}", self.id);
        let router_address = resolved_hostname(topo, &router)?;
        let mut conn = ctx
            .driver
            .connect(&router_address, router.port())
            .await
            .map_err(|e| LanzaError::connection(subject.clone(), e.to_string()))?;

        for shard in &self.shards {
            // Cheap re-entry: confirms the shard is started before it is
            // registered
            shard.start(ctx, topo).await?;
            let registration = shard.registration_string(topo, router.host_id())?;
            tracing::info!("adding shard {}...", registration);
            conn.run_admin_command("addShard", json!(registration))
                .await
                .map_err(|e| LanzaError::connection(subject.clone(), e.to_string()))?;
        }
        conn.close().await;

        self.initialized.store(true, Ordering::SeqCst);
        Ok(())
    }
}
