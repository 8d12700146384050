//! Orchestration of ephemeral-user setup and teardown.

use std::path::Path;

use tracing::{info, warn};
use userforge_cluster::ClusterStore;

use crate::credential::generate_password;
use crate::error::{ProvisionError, TeardownError};
use crate::htpasswd::CredentialSecrets;
use crate::idp::IdpRegistrar;
use crate::rbac::RoleBindings;
use crate::session::SessionAcquirer;
use crate::types::{EphemeralUser, Password, RoleGrant, username_for};

/// Role granted in the working namespace of every provisioned user.
const BASE_ROLE: &str = "admin";

/// Runs the provisioning steps in dependency order and teardown in reverse.
pub struct Provisioner<S, L> {
    store: S,
    login: L,
    shared_bindings: Vec<String>,
}

impl<S: ClusterStore, L: SessionAcquirer> Provisioner<S, L> {
    pub fn new(store: S, login: L) -> Self {
        Self {
            store,
            login,
            shared_bindings: Vec::new(),
        }
    }

    /// Shared bindings every provisioned user joins as a subject.
    pub fn with_shared_bindings(mut self, names: Vec<String>) -> Self {
        self.shared_bindings = names;
        self
    }

    /// The user record [`setup`](Self::setup) would operate on, without
    /// provisioning anything. Lets a caller rebuild the record to tear down
    /// a user whose setup happened in an earlier process or failed midway.
    pub fn user(&self, namespace: &str, suffix: &str, extra_roles: &[RoleGrant]) -> EphemeralUser {
        let mut cluster_roles = vec![RoleGrant::namespaced(BASE_ROLE, namespace)];
        cluster_roles.extend(extra_roles.iter().cloned());
        EphemeralUser {
            username: username_for(suffix),
            password: Password::default(),
            cluster_roles,
            cluster_role_binding_names: self.shared_bindings.clone(),
            session_config: None,
        }
    }

    /// Provision a user: credential Secret, identity-provider entry, role
    /// bindings, then an interactive login.
    ///
    /// Short-circuits on the first failure and leaves earlier resources in
    /// place. There is no automatic rollback; cleanup is always the
    /// caller's explicit [`teardown`](Self::teardown).
    pub async fn setup(
        &self,
        namespace: &str,
        suffix: &str,
        extra_roles: &[RoleGrant],
    ) -> Result<EphemeralUser, ProvisionError> {
        let mut user = self.user(namespace, suffix, extra_roles);
        user.password = generate_password()?;
        info!(username = %user.username, namespace, "provisioning ephemeral user");

        CredentialSecrets::new(&self.store)
            .create(&user.secret_name(), &user.username, &user.password)
            .await?;
        IdpRegistrar::new(&self.store)
            .ensure_registered(&user.secret_name())
            .await?;
        RoleBindings::new(&self.store).grant(&user).await?;
        user.session_config = Some(self.login.login(&user).await?);

        info!(username = %user.username, "ephemeral user ready");
        Ok(user)
    }

    /// Tear down everything [`setup`](Self::setup) created, in reverse
    /// order, attempting every step regardless of earlier failures and of
    /// how far the matching setup got.
    pub async fn teardown(&self, user: &EphemeralUser) -> Result<(), TeardownError> {
        info!(username = %user.username, "tearing down ephemeral user");
        let mut errors = Vec::new();

        if let Err(e) = RoleBindings::new(&self.store).revoke(user).await {
            errors.extend(e.errors);
        }
        if let Err(e) = IdpRegistrar::new(&self.store).ensure_deregistered(user).await {
            errors.push(e);
        }
        if let Err(e) = CredentialSecrets::new(&self.store)
            .delete(&user.secret_name())
            .await
        {
            errors.push(e);
        }
        if let Some(path) = &user.session_config {
            if let Err(e) = remove_session_config(path) {
                errors.push(e);
            }
        }

        match TeardownError::from_errors(errors) {
            None => {
                info!(username = %user.username, "ephemeral user removed");
                Ok(())
            }
            Some(e) => {
                warn!(username = %user.username, error = %e, "teardown incomplete");
                Err(e)
            }
        }
    }
}

fn remove_session_config(path: &Path) -> Result<(), ProvisionError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
