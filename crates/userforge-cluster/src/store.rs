//! The repository capability the provisioning logic is handed.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::api::rbac::v1::{ClusterRoleBinding, RoleBinding};
use serde_json::Value;

use crate::error::ClusterError;
use crate::objects::OAuth;

/// A patch against a stored object, in one of the two strategies the API
/// supports for these objects.
///
/// The two are not interchangeable: a merge patch (RFC 7386) replaces list
/// fields wholesale, while a JSON patch (RFC 6902) addresses list elements
/// by index and is rejected when the addressed path does not exist. Callers
/// pick the strategy at each call site; implementations only execute it.
#[derive(Clone, Debug, PartialEq)]
pub enum ObjectPatch {
    /// Structural merge patch (`application/merge-patch+json`).
    Merge(Value),
    /// Operation-list patch (`application/json-patch+json`).
    Json(json_patch::Patch),
}

/// Handle to the cluster objects the provisioning logic touches.
///
/// The shared OAuth registry and role bindings are externally shared mutable
/// state; this trait makes the handle explicit so callers inject either a
/// live cluster or an in-memory fake. Implementations return the raw error
/// taxonomy; tolerating `NotFound` or `AlreadyExists` where that means
/// "already satisfied" is the caller's decision, not the store's.
#[async_trait]
pub trait ClusterStore: Send + Sync {
    async fn create_secret(&self, namespace: &str, secret: &Secret) -> Result<(), ClusterError>;
    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<(), ClusterError>;

    /// Fetch the singleton OAuth configuration.
    async fn get_oauth(&self) -> Result<OAuth, ClusterError>;
    async fn patch_oauth(&self, patch: &ObjectPatch) -> Result<(), ClusterError>;

    async fn get_cluster_role_binding(&self, name: &str)
    -> Result<ClusterRoleBinding, ClusterError>;
    async fn create_cluster_role_binding(
        &self,
        binding: &ClusterRoleBinding,
    ) -> Result<(), ClusterError>;
    async fn patch_cluster_role_binding(
        &self,
        name: &str,
        patch: &ObjectPatch,
    ) -> Result<(), ClusterError>;
    async fn delete_cluster_role_binding(&self, name: &str) -> Result<(), ClusterError>;

    async fn create_role_binding(
        &self,
        namespace: &str,
        binding: &RoleBinding,
    ) -> Result<(), ClusterError>;
    async fn delete_role_binding(&self, namespace: &str, name: &str) -> Result<(), ClusterError>;

    /// Delete a platform-materialized User object.
    async fn delete_user(&self, name: &str) -> Result<(), ClusterError>;

    /// Delete a platform-materialized Identity object.
    async fn delete_identity(&self, name: &str) -> Result<(), ClusterError>;
}
