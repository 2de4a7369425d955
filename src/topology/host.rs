/// Hosts: where database processes run
///
/// A host is either a cloud instance that lanza provisions itself or a
/// machine that already exists and only needs to be reachable. Processes
/// are attached while the host is still unprovisioned; once provisioning
/// begins the placement is frozen, because a cloud instance receives its
/// entire bootstrap payload at creation time.
use std::sync::{Arc, RwLock};

use crate::config::{Credentials, OsFamily, Role};
use crate::error::{LanzaError, LanzaResult};
use crate::provision::payload::join_fragments;
use crate::provision::{InstanceHandle, InstanceRequest, InstanceState, SOURCE_TAG};
use crate::topology::process::MongoProcess;
use crate::topology::{HostId, LaunchContext, ProcessId, Topology, LOOPBACK};

/// Lifecycle of a host within one launch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostState {
    Unprovisioned,
    Provisioning,
    Running,
}

/// What kind of compute backs a host
#[derive(Debug, Clone)]
pub enum HostKind {
    /// Provisioned through the compute provider at launch time
    CloudInstance {
        image: String,
        instance_type: String,
        os: OsFamily,
    },
    /// Already exists; only reachability is checked
    ExistingMachine {
        address: String,
        credentials: Credentials,
    },
}

#[derive(Debug)]
struct HostRuntime {
    state: HostState,
    handle: Option<InstanceHandle>,
    /// Resolved public address, cached once the provider reports one
    address: Option<String>,
}

/// A compute target capable of running database processes
#[derive(Debug)]
pub struct Host {
    id: HostId,
    kind: HostKind,
    processes: RwLock<Vec<ProcessId>>,
    runtime: RwLock<HostRuntime>,
}

impl Host {
    pub fn new_cloud(id: HostId, image: String, instance_type: String, os: OsFamily) -> Self {
        Self {
            id,
            kind: HostKind::CloudInstance {
                image,
                instance_type,
                os,
            },
            processes: RwLock::new(Vec::new()),
            runtime: RwLock::new(HostRuntime {
                state: HostState::Unprovisioned,
                handle: None,
                address: None,
            }),
        }
    }

    pub fn new_existing(id: HostId, address: String, credentials: Credentials) -> Self {
        Self {
            id,
            kind: HostKind::ExistingMachine {
                address,
                credentials,
            },
            processes: RwLock::new(Vec::new()),
            runtime: RwLock::new(HostRuntime {
                state: HostState::Unprovisioned,
                handle: None,
                address: None,
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> &HostKind {
        &self.kind
    }

    pub fn is_cloud(&self) -> bool {
        matches!(self.kind, HostKind::CloudInstance { .. })
    }

    pub fn state(&self) -> HostState {
        self.runtime.read().unwrap().state
    }

    /// Ids of attached processes, in attachment order
    pub fn processes(&self) -> Vec<ProcessId> {
        self.processes.read().unwrap().clone()
    }

    /// Provider handle, present once a cloud host has been provisioned
    pub fn instance_handle(&self) -> Option<InstanceHandle> {
        self.runtime.read().unwrap().handle.clone()
    }

    /// Attach a process to this host. Placement is frozen once
    /// provisioning has begun.
    pub fn attach_process(&self, process: &MongoProcess) -> LanzaResult<()> {
        if self.state() != HostState::Unprovisioned {
            return Err(LanzaError::config(format!(
                "cannot attach process {} to host {}: provisioning has already begun",
                process.id(),
                self.id
            )));
        }
        if process.host_id() != self.id {
            return Err(LanzaError::config(format!(
                "process {} is placed on host {}, not {}",
                process.id(),
                process.host_id(),
                self.id
            )));
        }
        self.processes
            .write()
            .unwrap()
            .push(process.id().to_string());
        Ok(())
    }

    /// Bring the underlying compute resource into existence.
    ///
    /// Idempotent: a second call is a no-op. For an existing machine
    /// there is nothing to do; for a cloud instance the full bootstrap
    /// payload is generated here, so every attached process must already
    /// be in place.
    pub async fn provision(&self, ctx: &LaunchContext, topo: &Topology) -> LanzaResult<()> {
        {
            let mut runtime = self.runtime.write().unwrap();
            if runtime.state != HostState::Unprovisioned {
                return Ok(());
            }
            runtime.state = HostState::Provisioning;
        }

        match &self.kind {
            HostKind::ExistingMachine { .. } => Ok(()),
            HostKind::CloudInstance {
                image,
                instance_type,
                os,
            } => {
                let payload = self.bootstrap_payload(ctx, topo, *os)?;
                tracing::debug!("bootstrap payload for host {}:\n{}", self.id, payload);
                tracing::info!("starting instance {}...", self.id);

                let request = InstanceRequest {
                    image: image.clone(),
                    keypair: ctx.provision.keypair.clone(),
                    security_group: ctx.provision.security_group.clone(),
                    instance_type: instance_type.clone(),
                    payload,
                };
                let handle = ctx.provisioner.create_instance(request).await?;

                let expire_on = (chrono::Local::now()
                    + chrono::Duration::days(i64::from(ctx.provision.expiration_days)))
                .format("%Y-%m-%d")
                .to_string();
                ctx.provisioner
                    .tag_resource(&handle, "expire-on", &expire_on)
                    .await?;
                ctx.provisioner
                    .tag_resource(&handle, "owner", &ctx.owner_tag())
                    .await?;
                ctx.provisioner
                    .tag_resource(&handle, "source", SOURCE_TAG)
                    .await?;

                self.runtime.write().unwrap().handle = Some(handle);
                Ok(())
            }
        }
    }

    /// Concatenated bootstrap payload for every attached process, all
    /// mongod fragments first, then all mongos fragments.
    ///
    /// A router whose config servers sit on this same host gets its
    /// configdb option rewritten to loopback addresses before rendering:
    /// the host's external name does not exist yet at payload time.
    fn bootstrap_payload(
        &self,
        ctx: &LaunchContext,
        topo: &Topology,
        os: OsFamily,
    ) -> LanzaResult<String> {
        let ids = self.processes();
        let mut mongods: Vec<Arc<MongoProcess>> = Vec::new();
        let mut mongoses: Vec<Arc<MongoProcess>> = Vec::new();
        for id in &ids {
            let process = topo.process(id)?;
            match process.role() {
                Role::Mongod => mongods.push(process),
                Role::Mongos => mongoses.push(process),
            }
        }

        for router in &mongoses {
            let config_servers: Vec<Arc<MongoProcess>> = router
                .config_servers()
                .iter()
                .map(|id| topo.process(id))
                .collect::<LanzaResult<_>>()?;
            let colocated = config_servers.iter().any(|cs| cs.host_id() == self.id);
            if colocated {
                let configdb = config_servers
                    .iter()
                    .map(|cs| format!("{}:{}", LOOPBACK, cs.port()))
                    .collect::<Vec<_>>()
                    .join(",");
                router.set_configdb(configdb);
            }
        }

        let mut fragments = Vec::new();
        for process in mongods.iter().chain(mongoses.iter()) {
            fragments.push(ctx.renderer.render(&process.render_spec(), os));
        }
        Ok(join_fragments(&fragments, os))
    }

    /// Resolvable network address. `None` while a cloud instance is still
    /// coming up; callers treat that as "not yet", not as an error.
    pub fn hostname(&self) -> Option<String> {
        match &self.kind {
            HostKind::ExistingMachine { address, .. } => Some(address.clone()),
            HostKind::CloudInstance { .. } => self.runtime.read().unwrap().address.clone(),
        }
    }

    /// True once the resource reports running and has a resolvable
    /// address. Probe and provider errors count as "not yet".
    pub async fn running(&self, ctx: &LaunchContext) -> bool {
        match &self.kind {
            HostKind::ExistingMachine {
                address,
                credentials,
            } => {
                let reachable = ctx.probe.can_reach(address, credentials).await;
                if reachable {
                    self.runtime.write().unwrap().state = HostState::Running;
                }
                reachable
            }
            HostKind::CloudInstance { .. } => {
                let handle = self.instance_handle();
                let Some(handle) = handle else {
                    return false;
                };
                match ctx.provisioner.describe_instance(&handle).await {
                    Ok(status) => {
                        let up = status.state == InstanceState::Running
                            && status.public_address.as_deref().is_some_and(|a| !a.is_empty());
                        if up {
                            let mut runtime = self.runtime.write().unwrap();
                            runtime.address = status.public_address;
                            runtime.state = HostState::Running;
                        }
                        up
                    }
                    Err(e) => {
                        tracing::debug!("describe of instance {} failed: {}", self.id, e);
                        false
                    }
                }
            }
        }
    }

    /// Poll until the host is running; exhausting the budget is fatal.
    pub async fn wait_for_running(&self, ctx: &LaunchContext) -> LanzaResult<()> {
        let subject = format!("host {}", self.id);
        ctx.retry.wait_until(&subject, || self.running(ctx)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigServerTopology, ProcessConfig, ProvisionConfig};
    use crate::provision::SimulatedProvisioner;

    fn process_config(id: &str, role: Role, host: &str) -> ProcessConfig {
        ProcessConfig {
            id: id.to_string(),
            role,
            host: host.to_string(),
            port: None,
            options: None,
            dbpath: None,
            logpath: None,
            config_servers: match role {
                Role::Mongos => Some(ConfigServerTopology::Single),
                Role::Mongod => None,
            },
        }
    }

    fn cloud_host(id: &str) -> Host {
        Host::new_cloud(
            id.to_string(),
            "ami-123456".to_string(),
            "t1.micro".to_string(),
            OsFamily::Linux,
        )
    }

    /// Topology with one cloud host carrying a mongod, a config server
    /// and a router that uses it.
    fn colocated_topology() -> (Topology, Arc<Host>) {
        let mut topo = Topology::new();
        let host = topo.insert_host(cloud_host("box0")).unwrap();

        let shard = MongoProcess::new(
            &process_config("shard0", Role::Mongod, "box0"),
            27018,
            Vec::new(),
        );
        let cfg = MongoProcess::new(
            &process_config("mongos0-cfg0", Role::Mongod, "box0"),
            27019,
            Vec::new(),
        );
        let router = MongoProcess::new(
            &process_config("mongos0", Role::Mongos, "box0"),
            27017,
            vec!["mongos0-cfg0".to_string()],
        );

        // Router attached before the config server on purpose: payload
        // order must come from roles, not attachment order.
        for process in [shard, router, cfg] {
            let process = topo.insert_process(process).unwrap();
            host.attach_process(&process).unwrap();
        }
        (topo, host)
    }

    #[tokio::test]
    async fn test_payload_orders_mongod_before_mongos() {
        let (topo, host) = colocated_topology();
        let ctx = LaunchContext::simulated(ProvisionConfig::default());

        let payload = host
            .bootstrap_payload(&ctx, &topo, OsFamily::Linux)
            .unwrap();

        let mongod_at = payload.find("/bin/mongod").unwrap();
        let mongos_at = payload.find("/bin/mongos").unwrap();
        assert!(mongod_at < mongos_at);
    }

    #[tokio::test]
    async fn test_colocated_config_servers_use_loopback_in_payload() {
        let (topo, host) = colocated_topology();
        let ctx = LaunchContext::simulated(ProvisionConfig::default());

        let payload = host
            .bootstrap_payload(&ctx, &topo, OsFamily::Linux)
            .unwrap();

        assert!(payload.contains("--configdb localhost:27019"));
    }

    #[tokio::test]
    async fn test_provision_is_idempotent_and_tags() {
        let (topo, host) = colocated_topology();
        let provisioner = Arc::new(SimulatedProvisioner::new());
        let mut ctx = LaunchContext::simulated(ProvisionConfig::default());
        ctx.provisioner = provisioner.clone();

        host.provision(&ctx, &topo).await.unwrap();
        host.provision(&ctx, &topo).await.unwrap();

        let handles = provisioner.handles();
        assert_eq!(handles.len(), 1, "second provision must be a no-op");

        let tags = provisioner.tags_for(&handles[0]);
        let keys: Vec<&str> = tags.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, ["expire-on", "owner", "source"]);
        let expire = &tags[0].1;
        assert_eq!(expire.len(), 10, "expire-on is a calendar date: {}", expire);
    }

    #[tokio::test]
    async fn test_attach_after_provision_fails() {
        let (topo, host) = colocated_topology();
        let ctx = LaunchContext::simulated(ProvisionConfig::default());

        host.provision(&ctx, &topo).await.unwrap();

        let late = MongoProcess::new(
            &process_config("late", Role::Mongod, "box0"),
            27020,
            Vec::new(),
        );
        let err = host.attach_process(&late).unwrap_err();
        assert!(err.is_configuration());
    }

    #[tokio::test]
    async fn test_existing_machine_has_immediate_hostname() {
        let host = Host::new_existing(
            "m0".to_string(),
            "db0.example.com".to_string(),
            Credentials::default(),
        );
        assert_eq!(host.hostname().as_deref(), Some("db0.example.com"));

        // Nothing to create; provisioning an existing machine is a no-op
        let topo = Topology::new();
        let provisioner = Arc::new(SimulatedProvisioner::new());
        let mut ctx = LaunchContext::simulated(ProvisionConfig::default());
        ctx.provisioner = provisioner.clone();
        host.provision(&ctx, &topo).await.unwrap();
        assert!(provisioner.handles().is_empty());
    }

    #[tokio::test]
    async fn test_existing_machine_runs_once_reachable() {
        let host = Host::new_existing(
            "m0".to_string(),
            "db0.example.com".to_string(),
            Credentials::default(),
        );
        let ctx = LaunchContext::simulated(ProvisionConfig::default());

        assert!(host.running(&ctx).await);
        assert_eq!(host.state(), HostState::Running);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_running_resolves_hostname() {
        let (topo, host) = colocated_topology();
        let ctx = LaunchContext::simulated(ProvisionConfig::default());

        host.provision(&ctx, &topo).await.unwrap();
        assert!(host.hostname().is_none());

        host.wait_for_running(&ctx).await.unwrap();
        assert_eq!(host.state(), HostState::Running);
        assert!(host.hostname().unwrap().ends_with(".compute.example.com"));
    }
}
