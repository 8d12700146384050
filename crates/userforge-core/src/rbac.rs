//! Role-binding management for ephemeral users.
//!
//! Two kinds of binding are handled: bindings generated for the user (owned
//! outright, deleted on revoke) and pre-existing shared bindings the user
//! only ever joins as one subject among others.

use json_patch::{AddOperation, Patch, PatchOperation, RemoveOperation};
use jsonptr::PointerBuf;
use k8s_openapi::api::rbac::v1::{ClusterRoleBinding, RoleBinding, RoleRef, Subject};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde_json::json;
use tracing::{debug, info, warn};
use userforge_cluster::{ClusterStore, ObjectPatch};

use crate::error::{ProvisionError, TeardownError};
use crate::types::{EphemeralUser, RoleGrant};

const RBAC_API_GROUP: &str = "rbac.authorization.k8s.io";
const SUBJECT_KIND_USER: &str = "User";
const ROLE_REF_KIND: &str = "ClusterRole";

/// Grants and revokes role bindings.
pub struct RoleBindings<'a, S> {
    store: &'a S,
}

impl<'a, S: ClusterStore> RoleBindings<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Create an owned binding for every grant and add the user as a subject
    /// to every shared binding. Already-granted pieces are skipped.
    pub async fn grant(&self, user: &EphemeralUser) -> Result<(), ProvisionError> {
        for grant in &user.cluster_roles {
            self.create_owned_binding(user, grant).await?;
        }
        for name in &user.cluster_role_binding_names {
            self.add_subject(name, user).await?;
        }
        Ok(())
    }

    /// Remove everything [`grant`](Self::grant) added: owned bindings are
    /// deleted, shared bindings keep every other subject. Every step is
    /// attempted; failures are aggregated.
    pub async fn revoke(&self, user: &EphemeralUser) -> Result<(), TeardownError> {
        let mut errors = Vec::new();
        for grant in &user.cluster_roles {
            if let Err(e) = self.delete_owned_binding(user, grant).await {
                errors.push(e);
            }
        }
        for name in &user.cluster_role_binding_names {
            if let Err(e) = self.remove_subject(name, user).await {
                errors.push(e);
            }
        }
        match TeardownError::from_errors(errors) {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn create_owned_binding(
        &self,
        user: &EphemeralUser,
        grant: &RoleGrant,
    ) -> Result<(), ProvisionError> {
        let name = user.binding_name(&grant.role);
        let result = match grant.namespace.as_deref() {
            None => {
                let binding = ClusterRoleBinding {
                    metadata: ObjectMeta {
                        name: Some(name.clone()),
                        ..Default::default()
                    },
                    role_ref: role_ref(&grant.role),
                    subjects: Some(vec![user_subject(&user.username)]),
                };
                self.store.create_cluster_role_binding(&binding).await
            }
            Some(namespace) => {
                let binding = RoleBinding {
                    metadata: ObjectMeta {
                        name: Some(name.clone()),
                        namespace: Some(namespace.to_string()),
                        ..Default::default()
                    },
                    role_ref: role_ref(&grant.role),
                    subjects: Some(vec![user_subject(&user.username)]),
                };
                self.store.create_role_binding(namespace, &binding).await
            }
        };
        match result {
            Ok(()) => {
                info!(binding = %name, role = %grant.role, "created role binding");
                Ok(())
            }
            Err(e) if e.is_already_exists() => {
                debug!(binding = %name, "role binding already present");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn add_subject(
        &self,
        binding_name: &str,
        user: &EphemeralUser,
    ) -> Result<(), ProvisionError> {
        let binding = self.store.get_cluster_role_binding(binding_name).await?;
        let subjects = binding.subjects.as_deref().unwrap_or_default();
        if subjects.iter().any(|s| subject_matches(s, &user.username)) {
            debug!(binding = binding_name, username = %user.username, "already a subject");
            return Ok(());
        }

        let subject_value = serde_json::to_value(user_subject(&user.username))?;
        let patch = if subjects.is_empty() {
            // A JSON patch indexing into `subjects` is rejected while the
            // field is empty or unset; seeding the list takes a merge patch.
            ObjectPatch::Merge(json!({ "subjects": [subject_value] }))
        } else {
            // A merge patch here would replace the whole subject list and
            // drop the existing subjects; appending takes a JSON patch.
            ObjectPatch::Json(Patch(vec![PatchOperation::Add(AddOperation {
                path: PointerBuf::from_tokens(["subjects", "-"]),
                value: subject_value,
            })]))
        };
        self.store
            .patch_cluster_role_binding(binding_name, &patch)
            .await?;
        info!(binding = binding_name, username = %user.username, "added subject to shared binding");
        Ok(())
    }

    async fn delete_owned_binding(
        &self,
        user: &EphemeralUser,
        grant: &RoleGrant,
    ) -> Result<(), ProvisionError> {
        let name = user.binding_name(&grant.role);
        let result = match grant.namespace.as_deref() {
            None => self.store.delete_cluster_role_binding(&name).await,
            Some(namespace) => self.store.delete_role_binding(namespace, &name).await,
        };
        match result {
            Ok(()) => {
                info!(binding = %name, "deleted role binding");
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                debug!(binding = %name, "role binding already gone");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn remove_subject(
        &self,
        binding_name: &str,
        user: &EphemeralUser,
    ) -> Result<(), ProvisionError> {
        let binding = match self.store.get_cluster_role_binding(binding_name).await {
            Ok(binding) => binding,
            Err(e) if e.is_not_found() => {
                warn!(binding = binding_name, "shared binding missing on revoke");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };
        let subjects = binding.subjects.as_deref().unwrap_or_default();
        let Some(index) = subjects
            .iter()
            .position(|s| subject_matches(s, &user.username))
        else {
            debug!(binding = binding_name, username = %user.username, "subject already removed");
            return Ok(());
        };

        // Removal is always a JSON patch by index; a merge patch carrying
        // the remaining subjects would rewrite entries this user does not
        // own.
        let patch = ObjectPatch::Json(Patch(vec![PatchOperation::Remove(RemoveOperation {
            path: PointerBuf::from_tokens(["subjects".to_string(), index.to_string()]),
        })]));
        self.store
            .patch_cluster_role_binding(binding_name, &patch)
            .await?;
        info!(binding = binding_name, username = %user.username, "removed subject from shared binding");
        Ok(())
    }
}

fn role_ref(role: &str) -> RoleRef {
    RoleRef {
        api_group: RBAC_API_GROUP.to_string(),
        kind: ROLE_REF_KIND.to_string(),
        name: role.to_string(),
    }
}

fn user_subject(username: &str) -> Subject {
    Subject {
        api_group: Some(RBAC_API_GROUP.to_string()),
        kind: SUBJECT_KIND_USER.to_string(),
        name: username.to_string(),
        namespace: None,
    }
}

fn subject_matches(subject: &Subject, username: &str) -> bool {
    subject.kind == SUBJECT_KIND_USER
        && subject.name == username
        && subject.api_group.as_deref() == Some(RBAC_API_GROUP)
}

#[cfg(test)]
mod tests {
    use super::*;
    use userforge_cluster::{Kind, MemoryCluster};

    use crate::types::{Password, username_for};

    fn user(suffix: &str, roles: Vec<RoleGrant>, shared: Vec<String>) -> EphemeralUser {
        EphemeralUser {
            username: username_for(suffix),
            password: Password::default(),
            cluster_roles: roles,
            cluster_role_binding_names: shared,
            session_config: None,
        }
    }

    fn shared_binding(name: &str, subject_names: &[&str]) -> ClusterRoleBinding {
        ClusterRoleBinding {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            role_ref: role_ref("admin"),
            subjects: if subject_names.is_empty() {
                None
            } else {
                Some(subject_names.iter().map(|n| user_subject(n)).collect())
            },
        }
    }

    async fn subject_names(cluster: &MemoryCluster, binding: &str) -> Vec<String> {
        cluster
            .get_cluster_role_binding(binding)
            .await
            .unwrap()
            .subjects
            .unwrap_or_default()
            .into_iter()
            .map(|s| s.name)
            .collect()
    }

    #[tokio::test]
    async fn grant_creates_owned_bindings_in_both_scopes() {
        let cluster = MemoryCluster::new();
        let alice = user(
            "alice",
            vec![
                RoleGrant::cluster("view"),
                RoleGrant::namespaced("admin", "ns1"),
            ],
            Vec::new(),
        );

        RoleBindings::new(&cluster).grant(&alice).await.unwrap();

        let cluster_scoped = cluster
            .get_cluster_role_binding("e2e-user-alice-view")
            .await
            .unwrap();
        assert_eq!(cluster_scoped.role_ref.name, "view");
        assert_eq!(
            cluster_scoped.subjects,
            Some(vec![user_subject("e2e-user-alice")])
        );
        assert!(cluster.contains(Kind::RoleBinding, Some("ns1"), "e2e-user-alice-admin"));
    }

    #[tokio::test]
    async fn grant_twice_is_idempotent() {
        let cluster = MemoryCluster::new();
        let alice = user("alice", vec![RoleGrant::cluster("view")], Vec::new());
        let bindings = RoleBindings::new(&cluster);

        bindings.grant(&alice).await.unwrap();
        bindings.grant(&alice).await.unwrap();

        assert_eq!(
            subject_names(&cluster, "e2e-user-alice-view").await,
            vec!["e2e-user-alice"]
        );
    }

    #[tokio::test]
    async fn grant_appends_to_populated_shared_binding() {
        let cluster = MemoryCluster::new();
        cluster
            .create_cluster_role_binding(&shared_binding("admin-binding", &["bob", "carol"]))
            .await
            .unwrap();
        let alice = user("alice", Vec::new(), vec!["admin-binding".to_string()]);

        RoleBindings::new(&cluster).grant(&alice).await.unwrap();

        assert_eq!(
            subject_names(&cluster, "admin-binding").await,
            vec!["bob", "carol", "e2e-user-alice"]
        );
    }

    #[tokio::test]
    async fn grant_seeds_empty_shared_binding() {
        let cluster = MemoryCluster::new();
        cluster
            .create_cluster_role_binding(&shared_binding("admin-binding", &[]))
            .await
            .unwrap();
        let alice = user("alice", Vec::new(), vec!["admin-binding".to_string()]);

        RoleBindings::new(&cluster).grant(&alice).await.unwrap();

        assert_eq!(
            subject_names(&cluster, "admin-binding").await,
            vec!["e2e-user-alice"]
        );
    }

    #[tokio::test]
    async fn grant_skips_when_already_a_subject() {
        let cluster = MemoryCluster::new();
        cluster
            .create_cluster_role_binding(&shared_binding(
                "admin-binding",
                &["e2e-user-alice", "bob"],
            ))
            .await
            .unwrap();
        let alice = user("alice", Vec::new(), vec!["admin-binding".to_string()]);

        RoleBindings::new(&cluster).grant(&alice).await.unwrap();

        assert_eq!(
            subject_names(&cluster, "admin-binding").await,
            vec!["e2e-user-alice", "bob"]
        );
    }

    #[tokio::test]
    async fn revoke_removes_only_the_user_subject() {
        let cluster = MemoryCluster::new();
        cluster
            .create_cluster_role_binding(&shared_binding(
                "admin-binding",
                &["bob", "e2e-user-alice", "carol"],
            ))
            .await
            .unwrap();
        let alice = user("alice", Vec::new(), vec!["admin-binding".to_string()]);

        RoleBindings::new(&cluster).revoke(&alice).await.unwrap();

        assert_eq!(
            subject_names(&cluster, "admin-binding").await,
            vec!["bob", "carol"]
        );
    }

    #[tokio::test]
    async fn revoke_deletes_owned_bindings() {
        let cluster = MemoryCluster::new();
        let alice = user(
            "alice",
            vec![
                RoleGrant::cluster("view"),
                RoleGrant::namespaced("admin", "ns1"),
            ],
            Vec::new(),
        );
        let bindings = RoleBindings::new(&cluster);
        bindings.grant(&alice).await.unwrap();

        bindings.revoke(&alice).await.unwrap();

        assert!(!cluster.contains(Kind::ClusterRoleBinding, None, "e2e-user-alice-view"));
        assert!(!cluster.contains(Kind::RoleBinding, Some("ns1"), "e2e-user-alice-admin"));
    }

    #[tokio::test]
    async fn revoke_tolerates_everything_already_gone() {
        let cluster = MemoryCluster::new();
        let alice = user(
            "alice",
            vec![RoleGrant::cluster("view")],
            vec!["admin-binding".to_string()],
        );

        RoleBindings::new(&cluster).revoke(&alice).await.unwrap();
    }

    #[tokio::test]
    async fn revoke_ignores_subjects_that_match_only_by_name() {
        let cluster = MemoryCluster::new();
        let mut impostor = user_subject("e2e-user-alice");
        impostor.kind = "ServiceAccount".to_string();
        cluster
            .create_cluster_role_binding(&ClusterRoleBinding {
                metadata: ObjectMeta {
                    name: Some("admin-binding".to_string()),
                    ..Default::default()
                },
                role_ref: role_ref("admin"),
                subjects: Some(vec![impostor.clone()]),
            })
            .await
            .unwrap();
        let alice = user("alice", Vec::new(), vec!["admin-binding".to_string()]);

        RoleBindings::new(&cluster).revoke(&alice).await.unwrap();

        let stored = cluster
            .get_cluster_role_binding("admin-binding")
            .await
            .unwrap();
        assert_eq!(stored.subjects, Some(vec![impostor]));
    }
}
