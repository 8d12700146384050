//! [`ClusterStore`] backed by a live cluster.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::api::rbac::v1::{ClusterRoleBinding, RoleBinding};
use kube::Client;
use kube::api::{Api, DeleteParams, DynamicObject, Patch, PatchParams, PostParams};
use kube::core::{ApiResource, GroupVersionKind};

use crate::error::ClusterError;
use crate::objects::{OAUTH_NAME, OAuth};
use crate::store::{ClusterStore, ObjectPatch};

const USER_API_GROUP: &str = "user.openshift.io";

/// Cluster access through a [`kube::Client`].
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Connect using the ambient kubeconfig or in-cluster environment.
    pub async fn try_default() -> Result<Self, ClusterError> {
        Ok(Self::new(Client::try_default().await?))
    }

    fn oauth_api(&self) -> Api<OAuth> {
        Api::all(self.client.clone())
    }

    // User and Identity are OpenShift API types without k8s-openapi
    // definitions; they are only ever deleted by name, so a dynamic API
    // handle is all that is needed.
    fn dynamic_api(&self, kind: &str) -> Api<DynamicObject> {
        let gvk = GroupVersionKind::gvk(USER_API_GROUP, "v1", kind);
        Api::all_with(self.client.clone(), &ApiResource::from_gvk(&gvk))
    }
}

#[async_trait]
impl ClusterStore for KubeStore {
    async fn create_secret(&self, namespace: &str, secret: &Secret) -> Result<(), ClusterError> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        api.create(&PostParams::default(), secret)
            .await
            .map_err(map_api_error)?;
        Ok(())
    }

    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<(), ClusterError> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        api.delete(name, &DeleteParams::default())
            .await
            .map_err(map_api_error)?;
        Ok(())
    }

    async fn get_oauth(&self) -> Result<OAuth, ClusterError> {
        self.oauth_api().get(OAUTH_NAME).await.map_err(map_api_error)
    }

    async fn patch_oauth(&self, patch: &ObjectPatch) -> Result<(), ClusterError> {
        apply_patch(&self.oauth_api(), OAUTH_NAME, patch).await
    }

    async fn get_cluster_role_binding(
        &self,
        name: &str,
    ) -> Result<ClusterRoleBinding, ClusterError> {
        let api: Api<ClusterRoleBinding> = Api::all(self.client.clone());
        api.get(name).await.map_err(map_api_error)
    }

    async fn create_cluster_role_binding(
        &self,
        binding: &ClusterRoleBinding,
    ) -> Result<(), ClusterError> {
        let api: Api<ClusterRoleBinding> = Api::all(self.client.clone());
        api.create(&PostParams::default(), binding)
            .await
            .map_err(map_api_error)?;
        Ok(())
    }

    async fn patch_cluster_role_binding(
        &self,
        name: &str,
        patch: &ObjectPatch,
    ) -> Result<(), ClusterError> {
        let api: Api<ClusterRoleBinding> = Api::all(self.client.clone());
        apply_patch(&api, name, patch).await
    }

    async fn delete_cluster_role_binding(&self, name: &str) -> Result<(), ClusterError> {
        let api: Api<ClusterRoleBinding> = Api::all(self.client.clone());
        api.delete(name, &DeleteParams::default())
            .await
            .map_err(map_api_error)?;
        Ok(())
    }

    async fn create_role_binding(
        &self,
        namespace: &str,
        binding: &RoleBinding,
    ) -> Result<(), ClusterError> {
        let api: Api<RoleBinding> = Api::namespaced(self.client.clone(), namespace);
        api.create(&PostParams::default(), binding)
            .await
            .map_err(map_api_error)?;
        Ok(())
    }

    async fn delete_role_binding(&self, namespace: &str, name: &str) -> Result<(), ClusterError> {
        let api: Api<RoleBinding> = Api::namespaced(self.client.clone(), namespace);
        api.delete(name, &DeleteParams::default())
            .await
            .map_err(map_api_error)?;
        Ok(())
    }

    async fn delete_user(&self, name: &str) -> Result<(), ClusterError> {
        self.dynamic_api("User")
            .delete(name, &DeleteParams::default())
            .await
            .map_err(map_api_error)?;
        Ok(())
    }

    async fn delete_identity(&self, name: &str) -> Result<(), ClusterError> {
        self.dynamic_api("Identity")
            .delete(name, &DeleteParams::default())
            .await
            .map_err(map_api_error)?;
        Ok(())
    }
}

async fn apply_patch<K>(api: &Api<K>, name: &str, patch: &ObjectPatch) -> Result<(), ClusterError>
where
    K: Clone + serde::de::DeserializeOwned + std::fmt::Debug,
{
    match patch {
        ObjectPatch::Merge(value) => {
            api.patch(name, &PatchParams::default(), &Patch::Merge(value))
                .await
                .map_err(map_api_error)?;
        }
        ObjectPatch::Json(operations) => {
            api.patch(
                name,
                &PatchParams::default(),
                &Patch::Json::<()>(operations.clone()),
            )
            .await
            .map_err(map_api_error)?;
        }
    }
    Ok(())
}

/// Fold API status codes into the error taxonomy. Create-conflicts and
/// patch-conflicts share code 409 and are told apart by reason.
fn map_api_error(err: kube::Error) -> ClusterError {
    match err {
        kube::Error::Api(e) if e.code == 404 => ClusterError::NotFound(e.message),
        kube::Error::Api(e) if e.code == 409 && e.reason == "AlreadyExists" => {
            ClusterError::AlreadyExists(e.message)
        }
        kube::Error::Api(e) if e.code == 409 => ClusterError::Conflict(e.message),
        other => ClusterError::Api(other),
    }
}
