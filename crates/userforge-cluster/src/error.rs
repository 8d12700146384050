//! Error types for cluster access

use thiserror::Error;

/// Errors surfaced by a [`ClusterStore`](crate::store::ClusterStore)
#[derive(Error, Debug)]
pub enum ClusterError {
    /// The object does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// An object of that name already exists
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// The object changed underneath a read-modify-patch sequence
    #[error("conflict: {0}")]
    Conflict(String),

    /// The stored object does not match the expected schema
    #[error("malformed object: {0}")]
    Malformed(String),

    /// The backend refused to apply the patch
    #[error("patch rejected: {0}")]
    PatchRejected(String),

    /// Any other Kubernetes API error
    #[error("kubernetes API error: {0}")]
    Api(#[from] kube::Error),
}

impl ClusterError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClusterError::NotFound(_))
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, ClusterError::AlreadyExists(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, ClusterError::Conflict(_))
    }
}
