/// Configuration management for lanza
///
/// A launch is described declaratively in a TOML file: the machines and
/// cloud instances that make up the fleet, the mongod/mongos processes to
/// place on them, and the replica sets and sharded clusters to assemble
/// out of those processes. Referential checks (dangling ids, colliding
/// ports, contradictory roles) happen in the topology builder; this module
/// only validates what a single section can know about itself.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Main launch configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Compute provisioning defaults
    #[serde(default)]
    pub provision: ProvisionConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Pre-existing machines that can run processes
    #[serde(default)]
    pub machines: Vec<MachineConfig>,
    /// Cloud instances to provision
    #[serde(default)]
    pub instances: Vec<InstanceConfig>,
    /// Database processes to place on hosts
    #[serde(default)]
    pub processes: Vec<ProcessConfig>,
    /// Replica sets assembled from mongod processes
    #[serde(default)]
    pub replica_sets: Vec<ReplicaSetConfig>,
    /// Sharded clusters assembled from a router plus shards
    #[serde(default)]
    pub clusters: Vec<ClusterConfig>,
}

/// Compute provisioning defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisionConfig {
    /// Provider region
    pub region: String,
    /// Key pair name used for new instances
    pub keypair: String,
    /// Security group name used for new instances
    pub security_group: String,
    /// Instance type used when an instance does not declare one
    pub instance_type: String,
    /// Image used for dedicated config-server hosts
    pub config_image: String,
    /// Days until the expire-on tag on provisioned resources
    pub expiration_days: u32,
    /// Owner tag; defaults to user@hostname from the environment
    pub owner: Option<String>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace)
    pub level: String,
    /// Log to stdout
    pub stdout: bool,
    /// Log file path (optional)
    pub file: Option<String>,
}

/// A machine that already exists and is reachable over the network
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachineConfig {
    pub id: String,
    /// Resolvable network address
    pub address: String,
    /// Remote login credentials
    #[serde(flatten)]
    pub credentials: Credentials,
}

/// Credentials for reaching a pre-existing machine
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Credentials {
    pub user: Option<String>,
    pub password: Option<String>,
    pub key_file: Option<String>,
}

/// A cloud instance to be provisioned
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceConfig {
    pub id: String,
    /// Provider image id
    pub image: String,
    /// Instance type; falls back to the provisioning default
    pub instance_type: Option<String>,
    /// Operating system family of the image
    #[serde(default)]
    pub os: OsFamily,
}

/// Operating system family of an instance image
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OsFamily {
    #[default]
    Linux,
    Windows,
}

/// Role of a database process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Mongod,
    Mongos,
}

impl Role {
    /// Binary name for this role
    pub fn bin(&self) -> &'static str {
        match self {
            Role::Mongod => "mongod",
            Role::Mongos => "mongos",
        }
    }
}

/// How many config servers back a router
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigServerTopology {
    #[default]
    Single,
    Triple,
}

impl ConfigServerTopology {
    pub fn count(&self) -> usize {
        match self {
            ConfigServerTopology::Single => 1,
            ConfigServerTopology::Triple => 3,
        }
    }
}

/// A mongod or mongos process bound to a host and port
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessConfig {
    pub id: String,
    pub role: Role,
    /// Id of the machine or instance this process runs on
    pub host: String,
    /// Listening port; defaults to 27017
    pub port: Option<u16>,
    /// Extra command-line options
    pub options: Option<String>,
    /// Data directory; defaults to a per-process path
    pub dbpath: Option<String>,
    /// Log file path; defaults to a per-process path
    pub logpath: Option<String>,
    /// Config-server topology (mongos only)
    pub config_servers: Option<ConfigServerTopology>,
}

/// A named replica set over declared mongod processes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicaSetConfig {
    pub id: String,
    /// Replica set name passed to the initiation command
    pub name: String,
    /// Member process ids, in declaration order
    pub members: Vec<String>,
}

/// A sharded cluster over a router and declared shards
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    pub id: String,
    /// Id of the mongos process that fronts the cluster
    pub router: String,
    /// Shard ids, each a mongod process id or a replica set id, in
    /// registration order
    pub shards: Vec<String>,
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        Self {
            region: "us-west-1".to_string(),
            keypair: "lanza".to_string(),
            security_group: "lanza".to_string(),
            instance_type: "t1.micro".to_string(),
            config_image: "ami-a43909e1".to_string(),
            expiration_days: 7,
            owner: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            stdout: true,
            file: None,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            provision: ProvisionConfig::default(),
            logging: LoggingConfig::default(),
            machines: Vec::new(),
            instances: Vec::new(),
            processes: Vec::new(),
            replica_sets: Vec::new(),
            clusters: Vec::new(),
        }
    }
}

impl Config {
    /// Load configuration from TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;

        let config: Config =
            toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content =
            toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))?;

        fs::write(path, content).map_err(|e| ConfigError::Io(e.to_string()))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.provision.expiration_days == 0 {
            return Err(ConfigError::Validation(
                "expiration_days must be greater than 0".to_string(),
            ));
        }

        if self.machines.is_empty() && self.instances.is_empty() {
            return Err(ConfigError::Validation(
                "at least one machine or instance is required".to_string(),
            ));
        }

        let mut host_ids = std::collections::HashSet::new();
        for machine in &self.machines {
            if machine.id.trim().is_empty() {
                return Err(ConfigError::Validation(
                    "machine id cannot be empty".to_string(),
                ));
            }
            if machine.address.trim().is_empty() {
                return Err(ConfigError::Validation(format!(
                    "machine {} has an empty address",
                    machine.id
                )));
            }
            if !host_ids.insert(machine.id.clone()) {
                return Err(ConfigError::Validation(format!(
                    "duplicate host id: {}",
                    machine.id
                )));
            }
        }
        for instance in &self.instances {
            if instance.id.trim().is_empty() {
                return Err(ConfigError::Validation(
                    "instance id cannot be empty".to_string(),
                ));
            }
            if instance.image.trim().is_empty() {
                return Err(ConfigError::Validation(format!(
                    "instance {} has an empty image",
                    instance.id
                )));
            }
            if !host_ids.insert(instance.id.clone()) {
                return Err(ConfigError::Validation(format!(
                    "duplicate host id: {}",
                    instance.id
                )));
            }
        }

        let mut process_ids = std::collections::HashSet::new();
        for process in &self.processes {
            if process.id.trim().is_empty() {
                return Err(ConfigError::Validation(
                    "process id cannot be empty".to_string(),
                ));
            }
            if !process_ids.insert(process.id.clone()) {
                return Err(ConfigError::Validation(format!(
                    "duplicate process id: {}",
                    process.id
                )));
            }
            if let Some(port) = process.port {
                if port == 0 {
                    return Err(ConfigError::Validation(format!(
                        "process {} declares port 0",
                        process.id
                    )));
                }
            }
            if process.config_servers.is_some() && process.role != Role::Mongos {
                return Err(ConfigError::Validation(format!(
                    "process {} declares config servers but is not a mongos",
                    process.id
                )));
            }
        }

        let mut cluster_ids = std::collections::HashSet::new();
        for rs in &self.replica_sets {
            if rs.name.trim().is_empty() {
                return Err(ConfigError::Validation(format!(
                    "replica set {} has an empty name",
                    rs.id
                )));
            }
            if rs.members.is_empty() {
                return Err(ConfigError::Validation(format!(
                    "replica set {} has no members",
                    rs.id
                )));
            }
            if !cluster_ids.insert(rs.id.clone()) {
                return Err(ConfigError::Validation(format!(
                    "duplicate cluster id: {}",
                    rs.id
                )));
            }
        }
        for cluster in &self.clusters {
            if cluster.shards.is_empty() {
                return Err(ConfigError::Validation(format!(
                    "cluster {} has no shards",
                    cluster.id
                )));
            }
            if !cluster_ids.insert(cluster.id.clone()) {
                return Err(ConfigError::Validation(format!(
                    "duplicate cluster id: {}",
                    cluster.id
                )));
            }
        }

        match self.logging.level.as_str() {
            "error" | "warn" | "info" | "debug" | "trace" => {}
            _ => {
                return Err(ConfigError::Validation(format!(
                    "Invalid log level: {}",
                    self.logging.level
                )))
            }
        }

        Ok(())
    }

    /// Create example configuration file
    pub fn create_example_config<P: AsRef<Path>>(path: P, mode: &str) -> Result<(), ConfigError> {
        let config = match mode {
            "standalone" => Config {
                instances: vec![InstanceConfig {
                    id: "db0".to_string(),
                    image: "ami-123456".to_string(),
                    instance_type: None,
                    os: OsFamily::Linux,
                }],
                processes: vec![ProcessConfig {
                    id: "mongod0".to_string(),
                    role: Role::Mongod,
                    host: "db0".to_string(),
                    port: Some(27017),
                    options: None,
                    dbpath: None,
                    logpath: None,
                    config_servers: None,
                }],
                ..Default::default()
            },
            "replicaset" => {
                let members: Vec<ProcessConfig> = (0..3)
                    .map(|i| ProcessConfig {
                        id: format!("member{}", i),
                        role: Role::Mongod,
                        host: format!("db{}", i),
                        port: Some(27017),
                        options: None,
                        dbpath: None,
                        logpath: None,
                        config_servers: None,
                    })
                    .collect();
                Config {
                    instances: (0..3)
                        .map(|i| InstanceConfig {
                            id: format!("db{}", i),
                            image: "ami-123456".to_string(),
                            instance_type: None,
                            os: OsFamily::Linux,
                        })
                        .collect(),
                    replica_sets: vec![ReplicaSetConfig {
                        id: "rs0".to_string(),
                        name: "rs0".to_string(),
                        members: members.iter().map(|m| m.id.clone()).collect(),
                    }],
                    processes: members,
                    ..Default::default()
                }
            }
            "sharded" => Config {
                instances: vec![
                    InstanceConfig {
                        id: "router0".to_string(),
                        image: "ami-123456".to_string(),
                        instance_type: None,
                        os: OsFamily::Linux,
                    },
                    InstanceConfig {
                        id: "db0".to_string(),
                        image: "ami-123456".to_string(),
                        instance_type: None,
                        os: OsFamily::Linux,
                    },
                    InstanceConfig {
                        id: "db1".to_string(),
                        image: "ami-123456".to_string(),
                        instance_type: None,
                        os: OsFamily::Linux,
                    },
                ],
                processes: vec![
                    ProcessConfig {
                        id: "mongos0".to_string(),
                        role: Role::Mongos,
                        host: "router0".to_string(),
                        port: Some(27017),
                        options: None,
                        dbpath: None,
                        logpath: None,
                        config_servers: Some(ConfigServerTopology::Triple),
                    },
                    ProcessConfig {
                        id: "shard0".to_string(),
                        role: Role::Mongod,
                        host: "db0".to_string(),
                        port: Some(27018),
                        options: None,
                        dbpath: None,
                        logpath: None,
                        config_servers: None,
                    },
                    ProcessConfig {
                        id: "shard1".to_string(),
                        role: Role::Mongod,
                        host: "db1".to_string(),
                        port: Some(27018),
                        options: None,
                        dbpath: None,
                        logpath: None,
                        config_servers: None,
                    },
                ],
                clusters: vec![ClusterConfig {
                    id: "cluster0".to_string(),
                    router: "mongos0".to_string(),
                    shards: vec!["shard0".to_string(), "shard1".to_string()],
                }],
                ..Default::default()
            },
            _ => {
                return Err(ConfigError::Validation(
                    "Mode must be 'standalone', 'replicaset' or 'sharded'".to_string(),
                ))
            }
        };

        config.save_to_file(path)
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Serialize error: {0}")]
    Serialize(String),

    #[error("Validation error: {0}")]
    Validation(String),
}
