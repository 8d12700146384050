//! In-memory [`ClusterStore`] for tests and offline runs.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::api::rbac::v1::{ClusterRoleBinding, RoleBinding};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::ClusterError;
use crate::objects::{OAUTH_NAME, OAuth};
use crate::store::{ClusterStore, ObjectPatch};

/// Object kinds tracked by [`MemoryCluster`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Kind {
    Secret,
    OAuth,
    ClusterRoleBinding,
    RoleBinding,
    User,
    Identity,
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
struct ObjectKey {
    kind: Kind,
    namespace: Option<String>,
    name: String,
}

impl ObjectKey {
    fn new(kind: Kind, namespace: Option<&str>, name: &str) -> Self {
        Self {
            kind,
            namespace: namespace.map(str::to_string),
            name: name.to_string(),
        }
    }

    fn describe(&self) -> String {
        format!("{:?} {}", self.kind, self.name)
    }
}

/// Stores objects as JSON documents and applies [`ObjectPatch`] with real
/// RFC 7386 / RFC 6902 semantics, so the strategy differences the services
/// branch on behave exactly as against the live API: a merge patch replaces
/// list fields wholesale, and a JSON patch addressing an element of an
/// absent list is rejected.
#[derive(Clone, Debug, Default)]
pub struct MemoryCluster {
    objects: Arc<Mutex<BTreeMap<ObjectKey, Value>>>,
}

impl MemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert the singleton OAuth object the registrar expects to exist.
    pub fn seed_oauth(&self, oauth: &OAuth) -> Result<(), ClusterError> {
        self.create(Kind::OAuth, None, OAUTH_NAME, oauth)
    }

    /// Insert an arbitrary object, e.g. the User/Identity records a login
    /// would have materialized.
    pub fn seed(
        &self,
        kind: Kind,
        namespace: Option<&str>,
        name: &str,
        value: Value,
    ) -> Result<(), ClusterError> {
        self.create(kind, namespace, name, &value)
    }

    pub fn contains(&self, kind: Kind, namespace: Option<&str>, name: &str) -> bool {
        self.lock().contains_key(&ObjectKey::new(kind, namespace, name))
    }

    /// The stored document, for assertions on raw fields.
    pub fn object(&self, kind: Kind, namespace: Option<&str>, name: &str) -> Option<Value> {
        self.lock().get(&ObjectKey::new(kind, namespace, name)).cloned()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<ObjectKey, Value>> {
        match self.objects.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn create<T: Serialize>(
        &self,
        kind: Kind,
        namespace: Option<&str>,
        name: &str,
        object: &T,
    ) -> Result<(), ClusterError> {
        let value =
            serde_json::to_value(object).map_err(|e| ClusterError::Malformed(e.to_string()))?;
        let key = ObjectKey::new(kind, namespace, name);
        let mut objects = self.lock();
        if objects.contains_key(&key) {
            return Err(ClusterError::AlreadyExists(key.describe()));
        }
        objects.insert(key, value);
        Ok(())
    }

    fn get<T: DeserializeOwned>(
        &self,
        kind: Kind,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<T, ClusterError> {
        let key = ObjectKey::new(kind, namespace, name);
        let objects = self.lock();
        let value = objects
            .get(&key)
            .ok_or_else(|| ClusterError::NotFound(key.describe()))?;
        serde_json::from_value(value.clone()).map_err(|e| ClusterError::Malformed(e.to_string()))
    }

    fn apply(
        &self,
        kind: Kind,
        namespace: Option<&str>,
        name: &str,
        patch: &ObjectPatch,
    ) -> Result<(), ClusterError> {
        let key = ObjectKey::new(kind, namespace, name);
        let mut objects = self.lock();
        let document = objects
            .get_mut(&key)
            .ok_or_else(|| ClusterError::NotFound(key.describe()))?;
        match patch {
            ObjectPatch::Merge(value) => json_patch::merge(document, value),
            ObjectPatch::Json(operations) => json_patch::patch(document, operations)
                .map_err(|e| ClusterError::PatchRejected(e.to_string()))?,
        }
        Ok(())
    }

    fn remove(
        &self,
        kind: Kind,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<(), ClusterError> {
        let key = ObjectKey::new(kind, namespace, name);
        let mut objects = self.lock();
        objects
            .remove(&key)
            .map(|_| ())
            .ok_or_else(|| ClusterError::NotFound(key.describe()))
    }
}

fn metadata_name(metadata: &ObjectMeta) -> Result<&str, ClusterError> {
    metadata
        .name
        .as_deref()
        .ok_or_else(|| ClusterError::Malformed("object has no name".to_string()))
}

#[async_trait::async_trait]
impl ClusterStore for MemoryCluster {
    async fn create_secret(&self, namespace: &str, secret: &Secret) -> Result<(), ClusterError> {
        let name = metadata_name(&secret.metadata)?;
        self.create(Kind::Secret, Some(namespace), name, secret)
    }

    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<(), ClusterError> {
        self.remove(Kind::Secret, Some(namespace), name)
    }

    async fn get_oauth(&self) -> Result<OAuth, ClusterError> {
        self.get(Kind::OAuth, None, OAUTH_NAME)
    }

    async fn patch_oauth(&self, patch: &ObjectPatch) -> Result<(), ClusterError> {
        self.apply(Kind::OAuth, None, OAUTH_NAME, patch)
    }

    async fn get_cluster_role_binding(
        &self,
        name: &str,
    ) -> Result<ClusterRoleBinding, ClusterError> {
        self.get(Kind::ClusterRoleBinding, None, name)
    }

    async fn create_cluster_role_binding(
        &self,
        binding: &ClusterRoleBinding,
    ) -> Result<(), ClusterError> {
        let name = metadata_name(&binding.metadata)?;
        self.create(Kind::ClusterRoleBinding, None, name, binding)
    }

    async fn patch_cluster_role_binding(
        &self,
        name: &str,
        patch: &ObjectPatch,
    ) -> Result<(), ClusterError> {
        self.apply(Kind::ClusterRoleBinding, None, name, patch)
    }

    async fn delete_cluster_role_binding(&self, name: &str) -> Result<(), ClusterError> {
        self.remove(Kind::ClusterRoleBinding, None, name)
    }

    async fn create_role_binding(
        &self,
        namespace: &str,
        binding: &RoleBinding,
    ) -> Result<(), ClusterError> {
        let name = metadata_name(&binding.metadata)?;
        self.create(Kind::RoleBinding, Some(namespace), name, binding)
    }

    async fn delete_role_binding(&self, namespace: &str, name: &str) -> Result<(), ClusterError> {
        self.remove(Kind::RoleBinding, Some(namespace), name)
    }

    async fn delete_user(&self, name: &str) -> Result<(), ClusterError> {
        self.remove(Kind::User, None, name)
    }

    async fn delete_identity(&self, name: &str) -> Result<(), ClusterError> {
        self.remove(Kind::Identity, None, name)
    }
}
