/// Unified error handling for lanza
///
/// Two classes of failure matter during a launch: configuration problems,
/// which are caught while the topology is being built and abort the run
/// before anything is provisioned, and connection problems, which surface
/// when a host or process never becomes reachable or a cluster command
/// fails. Transient unreachability during polling is not an error; it only
/// becomes one once the retry budget is exhausted.
use std::io;
use thiserror::Error;

use crate::config::ConfigError;

/// Main error type for lanza operations
#[derive(Debug, Error)]
pub enum LanzaError {
    /// Configuration errors, fatal before any provisioning occurs
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A subject never became reachable, or a cluster command failed
    #[error("Connection error: {subject}: {message}")]
    Connection { subject: String, message: String },

    /// The compute provider rejected a provisioning request
    #[error("Provisioning error: {message}")]
    Provision { message: String },

    /// Launch record could not be read or written
    #[error("Launch record error: {0}")]
    Record(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Result type alias for lanza operations
pub type LanzaResult<T> = Result<T, LanzaError>;

impl LanzaError {
    /// Create a connection error naming the subject that failed
    pub fn connection<S: Into<String>, M: Into<String>>(subject: S, message: M) -> Self {
        LanzaError::Connection {
            subject: subject.into(),
            message: message.into(),
        }
    }

    /// Create a provisioning error
    pub fn provision<S: Into<String>>(message: S) -> Self {
        LanzaError::Provision {
            message: message.into(),
        }
    }

    /// Create a configuration error from a validation message
    pub fn config<S: Into<String>>(message: S) -> Self {
        LanzaError::Config(ConfigError::Validation(message.into()))
    }

    /// True when the error was detected before any resource was provisioned
    pub fn is_configuration(&self) -> bool {
        matches!(self, LanzaError::Config(_))
    }
}
