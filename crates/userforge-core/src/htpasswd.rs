//! Credential storage as htpasswd Secret records.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use tracing::{debug, info};
use userforge_cluster::ClusterStore;

use crate::error::ProvisionError;
use crate::types::Password;

/// Namespace the platform reads identity-provider file data from.
pub const CREDENTIALS_NAMESPACE: &str = "openshift-config";

/// Secret key holding the htpasswd file contents.
pub const HTPASSWD_KEY: &str = "htpasswd";

/// Fixed bcrypt cost for credential hashing.
const HASH_COST: u32 = bcrypt::DEFAULT_COST;

/// Writes and removes htpasswd credential Secrets.
pub struct CredentialSecrets<'a, S> {
    store: &'a S,
}

impl<'a, S: ClusterStore> CredentialSecrets<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Create the credential Secret `name` holding a single htpasswd record.
    ///
    /// An existing Secret of the same name is an error, not a skip: names
    /// are unique per test run, so a collision means a previous user was
    /// never torn down.
    pub async fn create(
        &self,
        name: &str,
        username: &str,
        password: &Password,
    ) -> Result<(), ProvisionError> {
        let hash = bcrypt::hash(password.expose(), HASH_COST)?;
        let record = format!("{username}:{hash}\n");
        let secret = Secret {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(CREDENTIALS_NAMESPACE.to_string()),
                ..Default::default()
            },
            string_data: Some(BTreeMap::from([(HTPASSWD_KEY.to_string(), record)])),
            ..Default::default()
        };
        self.store.create_secret(CREDENTIALS_NAMESPACE, &secret).await?;
        info!(secret = name, username, "created credential secret");
        Ok(())
    }

    /// Delete the credential Secret; a missing Secret counts as done.
    pub async fn delete(&self, name: &str) -> Result<(), ProvisionError> {
        match self.store.delete_secret(CREDENTIALS_NAMESPACE, name).await {
            Ok(()) => {
                info!(secret = name, "deleted credential secret");
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                debug!(secret = name, "credential secret already gone");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use userforge_cluster::{ClusterError, Kind, MemoryCluster};

    use crate::error::ProvisionError;

    fn password() -> Password {
        Password::new("6c6f6e6765737470617373776f7264".to_string())
    }

    #[tokio::test]
    async fn create_writes_verifiable_htpasswd_record() {
        let cluster = MemoryCluster::new();
        let secrets = CredentialSecrets::new(&cluster);
        secrets
            .create("alice-htpasswd", "alice", &password())
            .await
            .unwrap();

        let stored = cluster
            .object(Kind::Secret, Some(CREDENTIALS_NAMESPACE), "alice-htpasswd")
            .unwrap();
        let record = stored["stringData"][HTPASSWD_KEY].as_str().unwrap();
        let (user, hash) = record.trim_end().split_once(':').unwrap();
        assert_eq!(user, "alice");
        assert!(bcrypt::verify(password().expose(), hash).unwrap());
    }

    #[tokio::test]
    async fn duplicate_create_surfaces_already_exists() {
        let cluster = MemoryCluster::new();
        let secrets = CredentialSecrets::new(&cluster);
        secrets
            .create("alice-htpasswd", "alice", &password())
            .await
            .unwrap();

        let err = secrets
            .create("alice-htpasswd", "alice", &password())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ProvisionError::Cluster(ClusterError::AlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn delete_tolerates_missing_secret() {
        let cluster = MemoryCluster::new();
        let secrets = CredentialSecrets::new(&cluster);
        secrets.delete("alice-htpasswd").await.unwrap();

        secrets
            .create("alice-htpasswd", "alice", &password())
            .await
            .unwrap();
        secrets.delete("alice-htpasswd").await.unwrap();
        secrets.delete("alice-htpasswd").await.unwrap();
        assert!(!cluster.contains(Kind::Secret, Some(CREDENTIALS_NAMESPACE), "alice-htpasswd"));
    }
}
