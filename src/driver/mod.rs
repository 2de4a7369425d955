/// Database driver and remote reachability interfaces
///
/// The wire-protocol client is an injected collaborator: lanza needs to
/// probe whether a process accepts connections and to issue a handful of
/// admin commands (replSetInitiate, addShard), nothing more. A probe
/// failure is the normal "not yet ready" state, never an error by itself.
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;

use crate::config::Credentials;

/// Driver-level failures
#[derive(Debug, Error)]
pub enum DriverError {
    /// The endpoint did not accept a connection; treated as "not yet
    /// available" by polling callers
    #[error("probe failure: {0}")]
    Probe(String),

    /// An admin command was rejected; always fatal for the launch
    #[error("command {command} failed: {message}")]
    Command { command: String, message: String },
}

/// One open connection to a database process
#[async_trait]
pub trait MongoConnection: Send {
    /// Run a command against the admin database
    async fn run_admin_command(&mut self, name: &str, args: Value) -> Result<Value, DriverError>;

    async fn close(self: Box<Self>);
}

/// Database wire-protocol client interface
#[async_trait]
pub trait MongoDriver: Send + Sync {
    /// Open a connection, or report a probe failure if the process is not
    /// accepting connections yet
    async fn connect(&self, address: &str, port: u16)
        -> Result<Box<dyn MongoConnection>, DriverError>;
}

/// Reachability probe for pre-existing machines
#[async_trait]
pub trait RemoteProbe: Send + Sync {
    async fn can_reach(&self, address: &str, credentials: &Credentials) -> bool;
}

/// TCP reachability probe against the remote login port
pub struct TcpProbe {
    port: u16,
    timeout: Duration,
}

impl TcpProbe {
    pub fn new() -> Self {
        Self {
            port: 22,
            timeout: Duration::from_secs(5),
        }
    }
}

impl Default for TcpProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteProbe for TcpProbe {
    async fn can_reach(&self, address: &str, _credentials: &Credentials) -> bool {
        let target = format!("{}:{}", address, self.port);
        match tokio::time::timeout(self.timeout, TcpStream::connect(&target)).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                tracing::debug!("machine {} not reachable: {}", target, e);
                false
            }
            Err(_) => {
                tracing::debug!("machine {} probe timed out", target);
                false
            }
        }
    }
}

/// Simulated probe: every machine is immediately reachable
pub struct SimulatedProbe;

#[async_trait]
impl RemoteProbe for SimulatedProbe {
    async fn can_reach(&self, _address: &str, _credentials: &Credentials) -> bool {
        true
    }
}

/// One admin command as issued through the simulated driver
#[derive(Debug, Clone)]
pub struct IssuedCommand {
    pub address: String,
    pub port: u16,
    pub name: String,
    pub args: Value,
}

#[derive(Default)]
struct SimulatedState {
    /// Remaining connect refusals per "address:port" endpoint
    refusals: HashMap<String, u32>,
    log: Vec<IssuedCommand>,
    fail_commands: bool,
}

/// Simulated driver: accepts every connection and records every command.
///
/// Endpoints can be told to refuse their first N connection attempts to
/// exercise availability polling, and command execution can be failed
/// wholesale to exercise fatal-error paths.
#[derive(Clone, Default)]
pub struct SimulatedDriver {
    state: Arc<Mutex<SimulatedState>>,
}

impl SimulatedDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse the first `attempts` connections to `address:port`
    pub fn refuse_first(&self, address: &str, port: u16, attempts: u32) {
        let mut state = self.state.lock().unwrap();
        state.refusals.insert(format!("{}:{}", address, port), attempts);
    }

    /// Make every admin command fail from now on
    pub fn fail_commands(&self) {
        self.state.lock().unwrap().fail_commands = true;
    }

    /// Every admin command issued so far, in order
    pub fn commands(&self) -> Vec<IssuedCommand> {
        self.state.lock().unwrap().log.clone()
    }
}

#[async_trait]
impl MongoDriver for SimulatedDriver {
    async fn connect(
        &self,
        address: &str,
        port: u16,
    ) -> Result<Box<dyn MongoConnection>, DriverError> {
        let endpoint = format!("{}:{}", address, port);
        {
            let mut state = self.state.lock().unwrap();
            if let Some(remaining) = state.refusals.get_mut(&endpoint) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(DriverError::Probe(format!("{} refused connection", endpoint)));
                }
            }
        }
        Ok(Box::new(SimulatedConnection {
            address: address.to_string(),
            port,
            state: Arc::clone(&self.state),
        }))
    }
}

struct SimulatedConnection {
    address: String,
    port: u16,
    state: Arc<Mutex<SimulatedState>>,
}

#[async_trait]
impl MongoConnection for SimulatedConnection {
    async fn run_admin_command(&mut self, name: &str, args: Value) -> Result<Value, DriverError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_commands {
            return Err(DriverError::Command {
                command: name.to_string(),
                message: "simulated command failure".to_string(),
            });
        }
        tracing::info!("admin command {} on {}:{}", name, self.address, self.port);
        state.log.push(IssuedCommand {
            address: self.address.clone(),
            port: self.port,
            name: name.to_string(),
            args,
        });
        Ok(serde_json::json!({ "ok": 1 }))
    }

    async fn close(self: Box<Self>) {}
}
