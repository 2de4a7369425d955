/// Persisted record of provisioned instances
///
/// A successful launch leaves behind the ordered list of provider
/// handles it created, so a later terminate run can ask the provider to
/// bulk-terminate exactly those instances. Failures leave no record;
/// teardown of a partial launch is the operator's call.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{LanzaError, LanzaResult};
use crate::provision::{InstanceHandle, Provisioner};

/// Record file name under the lanza home directory
const RECORD_FILE: &str = "launched.json";

/// Where the launch record lives by default
pub fn default_path() -> PathBuf {
    let home = std::env::var_os("HOME").unwrap_or_else(|| ".".into());
    PathBuf::from(home).join(".lanza").join(RECORD_FILE)
}

/// The ordered list of instances one launch provisioned
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaunchRecord {
    pub created_at: String,
    pub handles: Vec<InstanceHandle>,
}

impl LaunchRecord {
    pub fn new(handles: Vec<InstanceHandle>) -> Self {
        Self {
            created_at: chrono::Local::now().to_rfc3339(),
            handles,
        }
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> LanzaResult<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| LanzaError::Record(e.to_string()))?;
        fs::write(path, content)?;
        tracing::info!("launch record written to {}", path.display());
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> LanzaResult<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|_| {
            LanzaError::Record(format!(
                "could not read {}. Perhaps you didn't launch anything?",
                path.display()
            ))
        })?;
        serde_json::from_str(&content).map_err(|e| LanzaError::Record(e.to_string()))
    }

    /// Request bulk termination of every recorded instance
    pub async fn terminate(&self, provisioner: &dyn Provisioner) -> LanzaResult<()> {
        let names: Vec<String> = self.handles.iter().map(|h| h.to_string()).collect();
        tracing::info!("terminating instances: {}", names.join(","));
        provisioner.terminate_instances(&self.handles).await
    }
}
