//! Error types for provisioning

use thiserror::Error;
use userforge_cluster::ClusterError;

use crate::session::SessionError;

/// Errors from individual provisioning steps
#[derive(Error, Debug)]
pub enum ProvisionError {
    /// The OS entropy source failed
    #[error("entropy source unavailable: {0}")]
    Entropy(#[from] rand::Error),

    /// Hashing the credential failed
    #[error("credential hashing failed: {0}")]
    Hash(#[from] bcrypt::BcryptError),

    /// A cluster operation failed
    #[error("cluster operation failed: {0}")]
    Cluster(#[from] ClusterError),

    /// A patch payload could not be serialized
    #[error("patch serialization failed: {0}")]
    Encode(#[from] serde_json::Error),

    /// Login / session acquisition failed
    #[error("session acquisition failed: {0}")]
    Session(#[from] SessionError),

    /// Filesystem error on the session config file
    #[error("session config file: {0}")]
    Io(#[from] std::io::Error),
}

/// Aggregate of every failure a teardown pass hit.
///
/// Teardown attempts every step regardless of earlier failures, so one value
/// reports the complete picture instead of the first casualty.
#[derive(Debug, Error)]
#[error("teardown failed: {}", join(.errors))]
pub struct TeardownError {
    pub errors: Vec<ProvisionError>,
}

impl TeardownError {
    /// `None` when no step failed.
    pub fn from_errors(errors: Vec<ProvisionError>) -> Option<Self> {
        if errors.is_empty() {
            None
        } else {
            Some(Self { errors })
        }
    }
}

fn join(errors: &[ProvisionError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_errors_means_no_teardown_error() {
        assert!(TeardownError::from_errors(Vec::new()).is_none());
    }

    #[test]
    fn display_joins_every_error() {
        let errors = vec![
            ProvisionError::Cluster(ClusterError::Conflict("oauth".to_string())),
            ProvisionError::Cluster(ClusterError::Malformed("binding".to_string())),
        ];
        let aggregated = TeardownError::from_errors(errors).unwrap();
        let message = aggregated.to_string();
        assert!(message.contains("conflict: oauth"));
        assert!(message.contains("malformed object: binding"));
    }
}
