/// Topology building and placement resolution
///
/// The builder turns a validated configuration into the entity graph,
/// deciding all placement up front, before anything is provisioned. The
/// one non-obvious placement decision is config servers: when every
/// shard of a cluster, recursively through replica-set members, sits on
/// the router's own host, the config servers join that host too and the
/// whole cluster can address itself over loopback; otherwise every
/// config server gets a dedicated instance.
use std::collections::HashSet;

use crate::config::{Config, OsFamily, ProcessConfig, Role};
use crate::error::{LanzaError, LanzaResult};
use crate::topology::cluster::{ReplicaSet, Shard, ShardedCluster};
use crate::topology::host::Host;
use crate::topology::process::MongoProcess;
use crate::topology::Topology;

/// Port used when a process does not declare one
pub const DEFAULT_PORT: u16 = 27017;

/// First port assigned to config servers; colocated groups count up
pub const CONFIG_SERVER_BASE_PORT: u16 = 27019;

/// Resolves a configuration into a startable topology
pub struct TopologyBuilder {
    config: Config,
}

impl TopologyBuilder {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub fn build(self) -> LanzaResult<Topology> {
        self.config.validate()?;
        let mut topo = Topology::new();

        for machine in &self.config.machines {
            topo.insert_host(Host::new_existing(
                machine.id.clone(),
                machine.address.clone(),
                machine.credentials.clone(),
            ))?;
        }
        for instance in &self.config.instances {
            let instance_type = instance
                .instance_type
                .clone()
                .unwrap_or_else(|| self.config.provision.instance_type.clone());
            topo.insert_host(Host::new_cloud(
                instance.id.clone(),
                instance.image.clone(),
                instance_type,
                instance.os,
            ))?;
        }

        for declared in &self.config.processes {
            topo.host(&declared.host).map_err(|_| {
                LanzaError::config(format!(
                    "process {} references unknown host {}",
                    declared.id, declared.host
                ))
            })?;
            let port = declared.port.unwrap_or(DEFAULT_PORT);

            let mut config_servers = Vec::new();
            if declared.role == Role::Mongos {
                let colocated = self.router_fully_colocated(declared)?;
                let count = declared.config_servers.unwrap_or_default().count();
                for i in 0..count {
                    let cs_id = format!("{}-cfg{}", declared.id, i);
                    let (cs_host, cs_port) = if colocated {
                        (declared.host.clone(), CONFIG_SERVER_BASE_PORT + i as u16)
                    } else {
                        let host_id = format!("{}-host", cs_id);
                        topo.insert_host(Host::new_cloud(
                            host_id.clone(),
                            self.config.provision.config_image.clone(),
                            self.config.provision.instance_type.clone(),
                            OsFamily::Linux,
                        ))?;
                        (host_id, CONFIG_SERVER_BASE_PORT)
                    };
                    let cs_config = ProcessConfig {
                        id: cs_id.clone(),
                        role: Role::Mongod,
                        host: cs_host,
                        port: Some(cs_port),
                        options: Some("--configsvr".to_string()),
                        dbpath: None,
                        logpath: None,
                        config_servers: None,
                    };
                    let cs = topo.insert_process(MongoProcess::new(&cs_config, cs_port, Vec::new()))?;
                    topo.host(cs.host_id())?.attach_process(&cs)?;
                    config_servers.push(cs_id);
                }
            }

            let process = topo.insert_process(MongoProcess::new(declared, port, config_servers))?;
            topo.host(&declared.host)?.attach_process(&process)?;
        }

        let mut assigned: HashSet<(String, u16)> = HashSet::new();
        for process in topo.processes() {
            if !assigned.insert((process.host_id().to_string(), process.port())) {
                return Err(LanzaError::config(format!(
                    "port {} on host {} is assigned twice",
                    process.port(),
                    process.host_id()
                )));
            }
        }

        for declared in &self.config.replica_sets {
            for member_id in &declared.members {
                let member = topo.process(member_id).map_err(|_| {
                    LanzaError::config(format!(
                        "replica set {} references unknown process {}",
                        declared.id, member_id
                    ))
                })?;
                if member.role() != Role::Mongod {
                    return Err(LanzaError::config(format!(
                        "replica set {} member {} must be a mongod",
                        declared.id, member_id
                    )));
                }
            }
            topo.push_replica_set(ReplicaSet::new(
                declared.id.clone(),
                declared.name.clone(),
                declared.members.clone(),
            ));
        }

        for declared in &self.config.clusters {
            let router = topo.process(&declared.router).map_err(|_| {
                LanzaError::config(format!(
                    "cluster {} references unknown router {}",
                    declared.id, declared.router
                ))
            })?;
            if router.role() != Role::Mongos {
                return Err(LanzaError::config(format!(
                    "cluster {} router {} must be a mongos",
                    declared.id, declared.router
                )));
            }

            let mut shards = Vec::new();
            for shard_id in &declared.shards {
                if let Ok(process) = topo.process(shard_id) {
                    if process.role() != Role::Mongod {
                        return Err(LanzaError::config(format!(
                            "cluster {} shard {} must be a mongod",
                            declared.id, shard_id
                        )));
                    }
                    shards.push(Shard::Standalone(shard_id.clone()));
                } else if topo.replica_set(shard_id).is_some() {
                    shards.push(Shard::ReplicaSet(shard_id.clone()));
                } else {
                    return Err(LanzaError::config(format!(
                        "cluster {} references unknown shard {}",
                        declared.id, shard_id
                    )));
                }
            }
            topo.push_cluster(ShardedCluster::new(
                declared.id.clone(),
                declared.router.clone(),
                shards,
            ));
        }

        Ok(topo)
    }

    /// True when every shard of the router's cluster, recursively through
    /// replica-set members, is declared on the router's host. Decided
    /// purely from configuration; nothing is provisioned yet.
    fn router_fully_colocated(&self, router: &ProcessConfig) -> LanzaResult<bool> {
        let Some(cluster) = self.config.clusters.iter().find(|c| c.router == router.id) else {
            // A router with no declared cluster has nothing placed
            // elsewhere; its config servers stay on its own host.
            return Ok(true);
        };
        for shard_id in &cluster.shards {
            for host in self.declared_shard_hosts(shard_id)? {
                if host != router.host {
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    fn declared_shard_hosts(&self, shard_id: &str) -> LanzaResult<Vec<String>> {
        if let Some(process) = self.config.processes.iter().find(|p| p.id == shard_id) {
            return Ok(vec![process.host.clone()]);
        }
        if let Some(rs) = self.config.replica_sets.iter().find(|r| r.id == shard_id) {
            let mut hosts = Vec::new();
            for member_id in &rs.members {
                let member = self
                    .config
                    .processes
                    .iter()
                    .find(|p| p.id == *member_id)
                    .ok_or_else(|| {
                        LanzaError::config(format!(
                            "replica set {} references unknown process {}",
                            rs.id, member_id
                        ))
                    })?;
                hosts.push(member.host.clone());
            }
            return Ok(hosts);
        }
        Err(LanzaError::config(format!("unknown shard id: {}", shard_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        ClusterConfig, ConfigServerTopology, InstanceConfig, ReplicaSetConfig,
    };
    use crate::topology::HostState;

    fn instance(id: &str) -> InstanceConfig {
        InstanceConfig {
            id: id.to_string(),
            image: "ami-123456".to_string(),
            instance_type: None,
            os: OsFamily::Linux,
        }
    }

    fn process(id: &str, role: Role, host: &str, port: Option<u16>) -> ProcessConfig {
        ProcessConfig {
            id: id.to_string(),
            role,
            host: host.to_string(),
            port,
            options: None,
            dbpath: None,
            logpath: None,
            config_servers: match role {
                Role::Mongos => Some(ConfigServerTopology::Triple),
                Role::Mongod => None,
            },
        }
    }

    /// Router and both shards on distinct hosts
    fn spread_cluster_config() -> Config {
        Config {
            instances: vec![instance("router-box"), instance("s0-box"), instance("s1-box")],
            processes: vec![
                process("mongos0", Role::Mongos, "router-box", Some(27017)),
                process("shard0", Role::Mongod, "s0-box", Some(27018)),
                process("shard1", Role::Mongod, "s1-box", Some(27018)),
            ],
            clusters: vec![ClusterConfig {
                id: "c0".to_string(),
                router: "mongos0".to_string(),
                shards: vec!["shard0".to_string(), "shard1".to_string()],
            }],
            ..Default::default()
        }
    }

    /// Router and every shard on one host
    fn colocated_cluster_config() -> Config {
        Config {
            instances: vec![instance("box")],
            processes: vec![
                process("mongos0", Role::Mongos, "box", Some(27017)),
                process("shard0", Role::Mongod, "box", Some(27025)),
                process("shard1", Role::Mongod, "box", Some(27026)),
            ],
            clusters: vec![ClusterConfig {
                id: "c0".to_string(),
                router: "mongos0".to_string(),
                shards: vec!["shard0".to_string(), "shard1".to_string()],
            }],
            ..Default::default()
        }
    }

    #[test]
    fn test_dangling_host_reference_is_rejected() {
        let mut config = spread_cluster_config();
        config.processes[1].host = "missing-box".to_string();
        let err = TopologyBuilder::new(config).build().unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_spread_cluster_gets_dedicated_config_server_hosts() {
        let topo = TopologyBuilder::new(spread_cluster_config()).build().unwrap();

        // 3 declared hosts plus one per config server
        let hosts: Vec<String> = topo.hosts().map(|h| h.id().to_string()).collect();
        assert_eq!(hosts.len(), 6);
        for i in 0..3 {
            let host_id = format!("mongos0-cfg{}-host", i);
            assert!(hosts.contains(&host_id), "missing {}", host_id);
            let cs = topo.process(&format!("mongos0-cfg{}", i)).unwrap();
            assert_eq!(cs.host_id(), host_id);
            assert_eq!(cs.port(), CONFIG_SERVER_BASE_PORT);
        }

        let router = topo.process("mongos0").unwrap();
        let config_servers: Vec<&str> = router
            .config_servers()
            .iter()
            .map(|id| id.as_str())
            .collect();
        assert_eq!(config_servers, ["mongos0-cfg0", "mongos0-cfg1", "mongos0-cfg2"]);
    }

    #[test]
    fn test_colocated_cluster_attaches_config_servers_to_router_host() {
        let topo = TopologyBuilder::new(colocated_cluster_config()).build().unwrap();

        let hosts: Vec<String> = topo.hosts().map(|h| h.id().to_string()).collect();
        assert_eq!(hosts, ["box"]);

        // A colocated triple counts up from the base port
        for i in 0..3u16 {
            let cs = topo.process(&format!("mongos0-cfg{}", i)).unwrap();
            assert_eq!(cs.host_id(), "box");
            assert_eq!(cs.port(), CONFIG_SERVER_BASE_PORT + i);
        }

        let attached = topo.host("box").unwrap().processes();
        assert!(attached.contains(&"mongos0-cfg0".to_string()));
    }

    #[test]
    fn test_replica_set_shard_spread_forces_dedicated_hosts() {
        let config = Config {
            instances: vec![instance("box"), instance("other")],
            processes: vec![
                process("mongos0", Role::Mongos, "box", Some(27017)),
                process("m0", Role::Mongod, "box", Some(27021)),
                process("m1", Role::Mongod, "other", Some(27021)),
            ],
            replica_sets: vec![ReplicaSetConfig {
                id: "rs0".to_string(),
                name: "rs0".to_string(),
                members: vec!["m0".to_string(), "m1".to_string()],
            }],
            clusters: vec![ClusterConfig {
                id: "c0".to_string(),
                router: "mongos0".to_string(),
                shards: vec!["rs0".to_string()],
            }],
            ..Default::default()
        };

        let topo = TopologyBuilder::new(config).build().unwrap();
        // m1 lives elsewhere, so no config server may join the router host
        assert!(topo
            .hosts()
            .any(|h| h.id() == "mongos0-cfg0-host"));
        assert_eq!(topo.process("mongos0-cfg0").unwrap().host_id(), "mongos0-cfg0-host");
    }

    #[test]
    fn test_mongos_cannot_be_a_replica_set_member() {
        let mut config = spread_cluster_config();
        config.replica_sets.push(ReplicaSetConfig {
            id: "rs0".to_string(),
            name: "rs0".to_string(),
            members: vec!["mongos0".to_string()],
        });
        let err = TopologyBuilder::new(config).build().unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_mongod_cannot_be_a_router() {
        let mut config = spread_cluster_config();
        config.clusters[0].router = "shard0".to_string();
        let err = TopologyBuilder::new(config).build().unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_unknown_shard_is_rejected() {
        let mut config = spread_cluster_config();
        config.clusters[0].shards.push("ghost".to_string());
        let err = TopologyBuilder::new(config).build().unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_colliding_ports_on_one_host_are_rejected() {
        let mut config = colocated_cluster_config();
        config.processes[2].port = Some(27021);
        config.processes[1].port = Some(27021);
        let err = TopologyBuilder::new(config).build().unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_default_port_is_applied() {
        let config = Config {
            instances: vec![instance("box")],
            processes: vec![process("p0", Role::Mongod, "box", None)],
            ..Default::default()
        };
        let topo = TopologyBuilder::new(config).build().unwrap();
        assert_eq!(topo.process("p0").unwrap().port(), DEFAULT_PORT);
    }

    #[test]
    fn test_built_hosts_start_unprovisioned() {
        let topo = TopologyBuilder::new(spread_cluster_config()).build().unwrap();
        assert!(topo.hosts().all(|h| h.state() == HostState::Unprovisioned));
    }
}
