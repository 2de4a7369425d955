/// Database processes: mongod and mongos
///
/// A process is bound to one host and one port for the lifetime of a
/// launch. Construction normalizes the declared configuration; `start()`
/// provisions the host if needed and polls until the process accepts
/// connections. A mongos additionally owns the startup of its config
/// servers, which must all be reachable before the router itself counts
/// as available.
use std::sync::RwLock;

use crate::config::{ProcessConfig, Role};
use crate::error::{LanzaError, LanzaResult};
use crate::provision::payload::RenderSpec;
use crate::topology::{HostId, LaunchContext, ProcessId, Topology};

/// Lifecycle of a process within one launch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Unstarted,
    Starting,
    Available,
}

/// Normalized launch options for one process
#[derive(Debug, Clone)]
pub struct ProcessOptions {
    /// Command-line option string, always carrying exactly one --port
    pub options: String,
    pub dbpath: String,
    pub logpath: String,
    /// Config-server connection string (mongos only); derived at start
    /// time, or rewritten to loopback at payload time when colocated
    pub configdb: Option<String>,
}

/// A single mongod or mongos bound to a host and port
#[derive(Debug)]
pub struct MongoProcess {
    id: ProcessId,
    role: Role,
    port: u16,
    host: HostId,
    /// Config-server processes this router depends on, in start order
    config_servers: Vec<ProcessId>,
    options: RwLock<ProcessOptions>,
    state: RwLock<ProcessState>,
}

impl MongoProcess {
    /// Build a process from its declared configuration.
    ///
    /// Normalization is idempotent: a --port already present in the
    /// option string is preserved, as are declared dbpath/logpath;
    /// absent values get deterministic per-process defaults.
    pub fn new(config: &ProcessConfig, port: u16, config_servers: Vec<ProcessId>) -> Self {
        let mut options = config.options.clone().unwrap_or_default();
        if !options.contains("--port") {
            if !options.is_empty() {
                options.push(' ');
            }
            options.push_str(&format!("--port {}", port));
        }
        let dbpath = config
            .dbpath
            .clone()
            .unwrap_or_else(|| format!("/data/{}", config.id));
        let logpath = config
            .logpath
            .clone()
            .unwrap_or_else(|| format!("/var/log/{}.log", config.id));

        Self {
            id: config.id.clone(),
            role: config.role,
            port,
            host: config.host.clone(),
            config_servers,
            options: RwLock::new(ProcessOptions {
                options,
                dbpath,
                logpath,
                configdb: None,
            }),
            state: RwLock::new(ProcessState::Unstarted),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn host_id(&self) -> &str {
        &self.host
    }

    pub fn config_servers(&self) -> &[ProcessId] {
        &self.config_servers
    }

    pub fn state(&self) -> ProcessState {
        *self.state.read().unwrap()
    }

    /// Snapshot of the normalized options
    pub fn options(&self) -> ProcessOptions {
        self.options.read().unwrap().clone()
    }

    pub fn set_configdb(&self, value: String) {
        self.options.write().unwrap().configdb = Some(value);
    }

    /// What the payload renderer needs to emit this process's fragment
    pub fn render_spec(&self) -> RenderSpec {
        let options = self.options();
        RenderSpec {
            role: self.role,
            options: options.options,
            dbpath: options.dbpath,
            logpath: options.logpath,
            configdb: options.configdb,
        }
    }

    /// Polling subject for diagnostics
    fn subject(&self) -> String {
        format!("{} {} on {}:{}", self.role.bin(), self.id, self.host, self.port)
    }

    /// One probe: host running, address resolved, connection accepted.
    /// Any failure along the way is "not yet", never an error.
    async fn reachable(&self, ctx: &LaunchContext, topo: &Topology) -> bool {
        let Ok(host) = topo.host(&self.host) else {
            return false;
        };
        if !host.running(ctx).await {
            return false;
        }
        let Some(address) = host.hostname() else {
            return false;
        };
        match ctx.driver.connect(&address, self.port).await {
            Ok(conn) => {
                conn.close().await;
                true
            }
            Err(e) => {
                tracing::debug!("{} not yet available: {}", self.subject(), e);
                false
            }
        }
    }

    /// True when this process accepts connections. A router is only
    /// available once every one of its config servers is, too.
    pub async fn available(&self, ctx: &LaunchContext, topo: &Topology) -> bool {
        if self.role == Role::Mongos {
            for cs_id in &self.config_servers {
                let Ok(cs) = topo.process(cs_id) else {
                    return false;
                };
                if !cs.reachable(ctx, topo).await {
                    return false;
                }
            }
        }
        self.reachable(ctx, topo).await
    }

    /// Poll until available; exhausting the budget is fatal.
    pub async fn wait_for_available(&self, ctx: &LaunchContext, topo: &Topology) -> LanzaResult<()> {
        let subject = self.subject();
        ctx.retry
            .wait_until(&subject, || self.available(ctx, topo))
            .await
    }

    /// Provision the host (idempotent) and wait until this process
    /// accepts connections. Re-entry on an available process is a no-op.
    async fn start_standalone(&self, ctx: &LaunchContext, topo: &Topology) -> LanzaResult<()> {
        if self.state() == ProcessState::Available {
            return Ok(());
        }
        *self.state.write().unwrap() = ProcessState::Starting;

        let host = topo.host(&self.host)?;
        host.provision(ctx, topo).await?;
        self.wait_for_available(ctx, topo).await?;

        *self.state.write().unwrap() = ProcessState::Available;
        Ok(())
    }

    /// Start this process.
    ///
    /// A mongos first starts every config server fully, in declared
    /// order, then derives its configdb string from their resolved
    /// addresses; resolution is only possible once each config server's
    /// host is confirmed running.
    pub async fn start(&self, ctx: &LaunchContext, topo: &Topology) -> LanzaResult<()> {
        if self.state() == ProcessState::Available {
            return Ok(());
        }

        if self.role == Role::Mongos {
            for cs_id in &self.config_servers {
                let cs = topo.process(cs_id)?;
                tracing::info!("starting config server {} on port {}", cs.id(), cs.port());
                cs.start_standalone(ctx, topo).await?;
            }

            if !self.config_servers.is_empty() {
                let mut parts = Vec::new();
                for cs_id in &self.config_servers {
                    let cs = topo.process(cs_id)?;
                    let host = topo.host(cs.host_id())?;
                    let address = host.hostname().ok_or_else(|| {
                        LanzaError::connection(
                            format!("config server {}", cs.id()),
                            "hostname not resolved after startup",
                        )
                    })?;
                    parts.push(format!("{}:{}", address, cs.port()));
                }
                let configdb = parts.join(",");
                tracing::info!("configdb for {}: {}", self.id, configdb);
                self.set_configdb(configdb);
            }
        }

        self.start_standalone(ctx, topo).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigServerTopology, OsFamily, ProvisionConfig};
    use crate::driver::SimulatedDriver;
    use crate::provision::SimulatedProvisioner;
    use crate::topology::host::Host;
    use std::sync::Arc;

    fn process_config(id: &str, host: &str, role: Role) -> ProcessConfig {
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

    fn simulated_context() -> (LaunchContext, Arc<SimulatedProvisioner>, SimulatedDriver) {
        let provisioner = Arc::new(SimulatedProvisioner::new());
        let driver = SimulatedDriver::new();
        let mut ctx = LaunchContext::simulated(ProvisionConfig::default());
        ctx.provisioner = provisioner.clone();
        ctx.driver = Arc::new(driver.clone());
        (ctx, provisioner, driver)
    }

    #[test]
    fn test_port_injected_when_absent() {
        let process = MongoProcess::new(&process_config("p0", "h0", Role::Mongod), 27017, vec![]);
        let options = process.options();
        assert_eq!(options.options.matches("--port").count(), 1);
        assert!(options.options.contains("--port 27017"));
    }

    #[test]
    fn test_declared_port_option_preserved() {
        let mut config = process_config("p0", "h0", Role::Mongod);
        config.options = Some("--port 27018 --smallfiles".to_string());
        let process = MongoProcess::new(&config, 27018, vec![]);
        let options = process.options();
        assert_eq!(options.options.matches("--port").count(), 1);
        assert!(options.options.contains("--smallfiles"));
    }

    #[test]
    fn test_default_paths_are_per_process() {
        let a = MongoProcess::new(&process_config("p0", "h0", Role::Mongod), 27017, vec![]);
        let b = MongoProcess::new(&process_config("p1", "h0", Role::Mongod), 27018, vec![]);
        assert_eq!(a.options().dbpath, "/data/p0");
        assert_eq!(b.options().dbpath, "/data/p1");
        assert_eq!(a.options().logpath, "/var/log/p0.log");
        assert_ne!(a.options().logpath, b.options().logpath);
    }

    #[test]
    fn test_normalization_is_idempotent() {
        let mut config = process_config("p0", "h0", Role::Mongod);
        config.dbpath = Some("/mnt/data".to_string());
        let first = MongoProcess::new(&config, 27017, vec![]);

        // Re-declare from the normalized result
        config.options = Some(first.options().options);
        config.logpath = Some(first.options().logpath);
        let second = MongoProcess::new(&config, 27017, vec![]);

        assert_eq!(first.options().options, second.options().options);
        assert_eq!(second.options().dbpath, "/mnt/data");
        assert_eq!(first.options().logpath, second.options().logpath);
    }

    #[tokio::test]
    async fn test_not_available_before_host_runs() {
        let mut topo = Topology::new();
        let host = topo.insert_host(cloud_host("h0")).unwrap();
        let process = topo
            .insert_process(MongoProcess::new(
                &process_config("p0", "h0", Role::Mongod),
                27017,
                vec![],
            ))
            .unwrap();
        host.attach_process(&process).unwrap();

        let (ctx, _, _) = simulated_context();
        // Host is unprovisioned: no address to probe, not an error
        assert!(!process.available(&ctx, &topo).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_is_idempotent() {
        let mut topo = Topology::new();
        let host = topo.insert_host(cloud_host("h0")).unwrap();
        let process = topo
            .insert_process(MongoProcess::new(
                &process_config("p0", "h0", Role::Mongod),
                27017,
                vec![],
            ))
            .unwrap();
        host.attach_process(&process).unwrap();

        let (ctx, provisioner, _) = simulated_context();
        process.start(&ctx, &topo).await.unwrap();
        assert_eq!(process.state(), ProcessState::Available);

        process.start(&ctx, &topo).await.unwrap();
        assert_eq!(provisioner.handles().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_refusals_are_polled_through() {
        let mut topo = Topology::new();
        let host = topo.insert_host(cloud_host("h0")).unwrap();
        let process = topo
            .insert_process(MongoProcess::new(
                &process_config("p0", "h0", Role::Mongod),
                27017,
                vec![],
            ))
            .unwrap();
        host.attach_process(&process).unwrap();

        let (ctx, _, driver) = simulated_context();
        host.provision(&ctx, &topo).await.unwrap();
        host.wait_for_running(&ctx).await.unwrap();
        let address = host.hostname().unwrap();
        driver.refuse_first(&address, 27017, 3);

        process.start(&ctx, &topo).await.unwrap();
        assert_eq!(process.state(), ProcessState::Available);
    }

    #[tokio::test(start_paused = true)]
    async fn test_router_starts_config_servers_and_derives_configdb() {
        let mut topo = Topology::new();
        let router_host = topo.insert_host(cloud_host("rbox")).unwrap();
        let cfg_host = topo.insert_host(cloud_host("cfgbox")).unwrap();

        let cfg = topo
            .insert_process(MongoProcess::new(
                &process_config("mongos0-cfg0", "cfgbox", Role::Mongod),
                27019,
                vec![],
            ))
            .unwrap();
        cfg_host.attach_process(&cfg).unwrap();

        let router = topo
            .insert_process(MongoProcess::new(
                &process_config("mongos0", "rbox", Role::Mongos),
                27017,
                vec!["mongos0-cfg0".to_string()],
            ))
            .unwrap();
        router_host.attach_process(&router).unwrap();

        let (ctx, _, _) = simulated_context();
        router.start(&ctx, &topo).await.unwrap();

        assert_eq!(cfg.state(), ProcessState::Available);
        let configdb = router.options().configdb.unwrap();
        let expected = format!("{}:27019", cfg_host.hostname().unwrap());
        assert_eq!(configdb, expected);
    }
}
