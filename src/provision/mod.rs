/// Compute provisioning for launch targets
///
/// The actual provider client (EC2 or otherwise) is an injected
/// collaborator behind the `Provisioner` trait; lanza only decides what to
/// create, in what order, and with which bootstrap payload and tags. The
/// in-crate `SimulatedProvisioner` backs the CLI rehearsal mode and the
/// test suite.
pub mod payload;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use crate::error::{LanzaError, LanzaResult};

/// Tag marking provisioned resources as lanza-owned
pub const SOURCE_TAG: &str = "lanza";

/// Opaque provider handle for a provisioned instance
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceHandle(pub String);

impl std::fmt::Display for InstanceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Everything the provider needs to create one instance
#[derive(Debug, Clone)]
pub struct InstanceRequest {
    pub image: String,
    pub keypair: String,
    pub security_group: String,
    pub instance_type: String,
    /// Opaque bootstrap payload passed as user data
    pub payload: String,
}

/// Provider-reported lifecycle state of an instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceState {
    Pending,
    Running,
    Terminated,
}

/// Snapshot of an instance as reported by the provider
#[derive(Debug, Clone)]
pub struct InstanceStatus {
    pub state: InstanceState,
    /// Externally resolvable address; absent until the provider assigns one
    pub public_address: Option<String>,
}

/// Compute provider client interface
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Create one instance and return its handle
    async fn create_instance(&self, request: InstanceRequest) -> LanzaResult<InstanceHandle>;

    /// Report the current state of a previously created instance
    async fn describe_instance(&self, handle: &InstanceHandle) -> LanzaResult<InstanceStatus>;

    /// Attach a key/value tag to a provisioned resource
    async fn tag_resource(&self, handle: &InstanceHandle, key: &str, value: &str)
        -> LanzaResult<()>;

    /// Bulk-terminate previously created instances
    async fn terminate_instances(&self, handles: &[InstanceHandle]) -> LanzaResult<()>;
}

struct SimInstance {
    handle: InstanceHandle,
    request: InstanceRequest,
    tags: Vec<(String, String)>,
    describes: u32,
    terminated: bool,
}

/// Simulated provider for rehearsals and tests.
///
/// Instances report `Pending` for a configurable number of describe calls
/// before coming up `Running` with a synthesized public address, which
/// exercises the same polling paths a real provider would.
pub struct SimulatedProvisioner {
    instances: Mutex<Vec<SimInstance>>,
    counter: AtomicU32,
    warmup_describes: u32,
}

impl SimulatedProvisioner {
    pub fn new() -> Self {
        Self::with_warmup(2)
    }

    /// Number of describe calls an instance stays pending for
    pub fn with_warmup(warmup_describes: u32) -> Self {
        Self {
            instances: Mutex::new(Vec::new()),
            counter: AtomicU32::new(0),
            warmup_describes,
        }
    }

    /// Handles of all created instances, in creation order
    pub fn handles(&self) -> Vec<InstanceHandle> {
        let instances = self.instances.lock().unwrap();
        instances.iter().map(|i| i.handle.clone()).collect()
    }

    /// Tags attached to an instance, in attachment order
    pub fn tags_for(&self, handle: &InstanceHandle) -> Vec<(String, String)> {
        let instances = self.instances.lock().unwrap();
        instances
            .iter()
            .find(|i| &i.handle == handle)
            .map(|i| i.tags.clone())
            .unwrap_or_default()
    }

    /// Bootstrap payload an instance was created with
    pub fn payload_for(&self, handle: &InstanceHandle) -> Option<String> {
        let instances = self.instances.lock().unwrap();
        instances
            .iter()
            .find(|i| &i.handle == handle)
            .map(|i| i.request.payload.clone())
    }

    pub fn terminated(&self, handle: &InstanceHandle) -> bool {
        let instances = self.instances.lock().unwrap();
        instances
            .iter()
            .find(|i| &i.handle == handle)
            .map(|i| i.terminated)
            .unwrap_or(false)
    }
}

impl Default for SimulatedProvisioner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Provisioner for SimulatedProvisioner {
    async fn create_instance(&self, request: InstanceRequest) -> LanzaResult<InstanceHandle> {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        let handle = InstanceHandle(format!("sim-{:04}-{:04x}", n, rand::random::<u16>()));
        tracing::info!("simulated instance {} created from {}", handle, request.image);
        let mut instances = self.instances.lock().unwrap();
        instances.push(SimInstance {
            handle: handle.clone(),
            request,
            tags: Vec::new(),
            describes: 0,
            terminated: false,
        });
        Ok(handle)
    }

    async fn describe_instance(&self, handle: &InstanceHandle) -> LanzaResult<InstanceStatus> {
        let mut instances = self.instances.lock().unwrap();
        let instance = instances
            .iter_mut()
            .find(|i| &i.handle == handle)
            .ok_or_else(|| LanzaError::provision(format!("unknown instance {}", handle)))?;
        if instance.terminated {
            return Ok(InstanceStatus {
                state: InstanceState::Terminated,
                public_address: None,
            });
        }
        instance.describes += 1;
        if instance.describes > self.warmup_describes {
            Ok(InstanceStatus {
                state: InstanceState::Running,
                public_address: Some(format!("{}.compute.example.com", instance.handle)),
            })
        } else {
            Ok(InstanceStatus {
                state: InstanceState::Pending,
                public_address: None,
            })
        }
    }

    async fn tag_resource(
        &self,
        handle: &InstanceHandle,
        key: &str,
        value: &str,
    ) -> LanzaResult<()> {
        let mut instances = self.instances.lock().unwrap();
        let instance = instances
            .iter_mut()
            .find(|i| &i.handle == handle)
            .ok_or_else(|| LanzaError::provision(format!("unknown instance {}", handle)))?;
        instance.tags.push((key.to_string(), value.to_string()));
        Ok(())
    }

    async fn terminate_instances(&self, handles: &[InstanceHandle]) -> LanzaResult<()> {
        let mut instances = self.instances.lock().unwrap();
        for handle in handles {
            if let Some(instance) = instances.iter_mut().find(|i| &i.handle == handle) {
                instance.terminated = true;
            }
        }
        Ok(())
    }
}
