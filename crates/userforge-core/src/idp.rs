//! Identity-provider registration on the cluster OAuth config.
//!
//! The OAuth object is shared, cluster-wide state; every mutation here is a
//! targeted patch so concurrent entries are never rewritten. No retries at
//! this layer; conflicts propagate to the caller.

use json_patch::{AddOperation, Patch, PatchOperation, RemoveOperation};
use jsonptr::PointerBuf;
use tracing::{debug, info};
use userforge_cluster::{ClusterStore, IdentityProvider, ObjectPatch};

use crate::error::ProvisionError;
use crate::types::EphemeralUser;

/// Registers and removes htpasswd identity-provider entries.
pub struct IdpRegistrar<'a, S> {
    store: &'a S,
}

impl<'a, S: ClusterStore> IdpRegistrar<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Ensure an entry referencing the credential Secret `secret_name`
    /// exists; the entry shares the Secret's name. Safe to call when the
    /// entry is already present.
    pub async fn ensure_registered(&self, secret_name: &str) -> Result<(), ProvisionError> {
        let oauth = self.store.get_oauth().await?;
        let entry = IdentityProvider::htpasswd(secret_name, secret_name);
        let entry_value = serde_json::to_value(&entry)?;

        let append = PatchOperation::Add(AddOperation {
            path: PointerBuf::from_tokens(["spec", "identityProviders", "-"]),
            value: entry_value,
        });

        let patch = match oauth.spec.identity_providers.as_deref() {
            None => {
                // Appending with a "-" index is rejected while the list
                // field does not exist, so the same atomic patch first
                // creates it as an empty list.
                Patch(vec![
                    PatchOperation::Add(AddOperation {
                        path: PointerBuf::from_tokens(["spec", "identityProviders"]),
                        value: serde_json::Value::Array(Vec::new()),
                    }),
                    append,
                ])
            }
            Some(providers) => {
                if providers.iter().any(|p| p.name == secret_name) {
                    // Already registered. Trust the existing entry rather
                    // than rewriting it.
                    debug!(provider = secret_name, "identity provider already registered");
                    return Ok(());
                }
                Patch(vec![append])
            }
        };

        self.store.patch_oauth(&ObjectPatch::Json(patch)).await?;
        info!(provider = secret_name, "registered identity provider");
        Ok(())
    }

    /// Remove the user's provider entry and the User/Identity records the
    /// platform derived from logins through it. Safe to call when nothing
    /// is registered.
    pub async fn ensure_deregistered(&self, user: &EphemeralUser) -> Result<(), ProvisionError> {
        let secret_name = user.secret_name();
        let oauth = self.store.get_oauth().await?;

        if let Some(providers) = oauth.spec.identity_providers.as_deref() {
            if let Some(index) = providers.iter().position(|p| p.name == secret_name) {
                // Index-based removal assumes nothing reordered the list
                // since the read above; this subsystem runs single-writer
                // per test run.
                let patch = Patch(vec![PatchOperation::Remove(RemoveOperation {
                    path: PointerBuf::from_tokens([
                        "spec".to_string(),
                        "identityProviders".to_string(),
                        index.to_string(),
                    ]),
                })]);
                self.store.patch_oauth(&ObjectPatch::Json(patch)).await?;
                info!(provider = %secret_name, "deregistered identity provider");
            } else {
                debug!(provider = %secret_name, "identity provider not registered");
            }
        }

        // Logging in materializes Identity and User objects; they outlive
        // the provider entry and need their own cleanup.
        match self.store.delete_identity(&user.identity_name()).await {
            Ok(()) => info!(identity = %user.identity_name(), "deleted identity"),
            Err(e) if e.is_not_found() => {
                debug!(identity = %user.identity_name(), "identity never materialized");
            }
            Err(e) => return Err(e.into()),
        }
        match self.store.delete_user(&user.username).await {
            Ok(()) => info!(username = %user.username, "deleted user object"),
            Err(e) if e.is_not_found() => {
                debug!(username = %user.username, "user object never materialized");
            }
            Err(e) => return Err(e.into()),
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use userforge_cluster::{Kind, MemoryCluster, OAuth, OAuthSpec};

    use crate::types::{Password, username_for};

    fn empty_oauth() -> OAuth {
        OAuth::new("cluster", OAuthSpec::default())
    }

    fn oauth_with_providers(names: &[&str]) -> OAuth {
        OAuth::new(
            "cluster",
            OAuthSpec {
                identity_providers: Some(
                    names
                        .iter()
                        .map(|n| IdentityProvider::htpasswd(n, n))
                        .collect(),
                ),
            },
        )
    }

    fn user(suffix: &str) -> EphemeralUser {
        EphemeralUser {
            username: username_for(suffix),
            password: Password::default(),
            cluster_roles: Vec::new(),
            cluster_role_binding_names: Vec::new(),
            session_config: None,
        }
    }

    async fn provider_names(cluster: &MemoryCluster) -> Vec<String> {
        cluster
            .get_oauth()
            .await
            .unwrap()
            .spec
            .identity_providers
            .unwrap_or_default()
            .into_iter()
            .map(|p| p.name)
            .collect()
    }

    #[tokio::test]
    async fn registering_on_absent_list_creates_it() {
        let cluster = MemoryCluster::new();
        cluster.seed_oauth(&empty_oauth()).unwrap();

        IdpRegistrar::new(&cluster)
            .ensure_registered("alice-htpasswd")
            .await
            .unwrap();

        assert_eq!(provider_names(&cluster).await, vec!["alice-htpasswd"]);
    }

    #[tokio::test]
    async fn registering_twice_keeps_one_entry() {
        let cluster = MemoryCluster::new();
        cluster.seed_oauth(&empty_oauth()).unwrap();
        let registrar = IdpRegistrar::new(&cluster);

        registrar.ensure_registered("alice-htpasswd").await.unwrap();
        registrar.ensure_registered("alice-htpasswd").await.unwrap();

        assert_eq!(provider_names(&cluster).await, vec!["alice-htpasswd"]);
    }

    #[tokio::test]
    async fn registering_preserves_concurrent_entries() {
        let cluster = MemoryCluster::new();
        cluster
            .seed_oauth(&oauth_with_providers(&["corp-ldap", "github"]))
            .unwrap();

        IdpRegistrar::new(&cluster)
            .ensure_registered("alice-htpasswd")
            .await
            .unwrap();

        assert_eq!(
            provider_names(&cluster).await,
            vec!["corp-ldap", "github", "alice-htpasswd"]
        );
    }

    #[tokio::test]
    async fn registering_without_oauth_object_is_fatal() {
        let cluster = MemoryCluster::new();
        let err = IdpRegistrar::new(&cluster)
            .ensure_registered("alice-htpasswd")
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::Cluster(e) if e.is_not_found()));
    }

    #[tokio::test]
    async fn deregistering_missing_entry_is_a_noop() {
        let cluster = MemoryCluster::new();
        cluster
            .seed_oauth(&oauth_with_providers(&["corp-ldap"]))
            .unwrap();

        IdpRegistrar::new(&cluster)
            .ensure_deregistered(&user("alice"))
            .await
            .unwrap();

        assert_eq!(provider_names(&cluster).await, vec!["corp-ldap"]);
    }

    #[tokio::test]
    async fn deregistering_on_absent_list_is_a_noop() {
        let cluster = MemoryCluster::new();
        cluster.seed_oauth(&empty_oauth()).unwrap();

        IdpRegistrar::new(&cluster)
            .ensure_deregistered(&user("alice"))
            .await
            .unwrap();

        assert!(
            cluster
                .get_oauth()
                .await
                .unwrap()
                .spec
                .identity_providers
                .is_none()
        );
    }

    #[tokio::test]
    async fn deregistering_removes_only_the_target_entry() {
        let alice = user("alice");
        let cluster = MemoryCluster::new();
        cluster
            .seed_oauth(&oauth_with_providers(&[
                "corp-ldap",
                &alice.secret_name(),
                "github",
            ]))
            .unwrap();

        IdpRegistrar::new(&cluster)
            .ensure_deregistered(&alice)
            .await
            .unwrap();

        assert_eq!(provider_names(&cluster).await, vec!["corp-ldap", "github"]);
    }

    #[tokio::test]
    async fn deregistering_deletes_materialized_user_and_identity() {
        let alice = user("alice");
        let cluster = MemoryCluster::new();
        cluster
            .seed_oauth(&oauth_with_providers(&[&alice.secret_name()]))
            .unwrap();
        cluster
            .seed(Kind::User, None, &alice.username, json!({}))
            .unwrap();
        cluster
            .seed(Kind::Identity, None, &alice.identity_name(), json!({}))
            .unwrap();

        IdpRegistrar::new(&cluster)
            .ensure_deregistered(&alice)
            .await
            .unwrap();

        assert!(!cluster.contains(Kind::User, None, &alice.username));
        assert!(!cluster.contains(Kind::Identity, None, &alice.identity_name()));
    }
}
