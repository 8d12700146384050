//! Domain types for ephemeral cluster users.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Prefix for every generated username; the suffix is caller-supplied.
pub const USERNAME_PREFIX: &str = "e2e-user-";

/// Derive the deterministic username for a test-run suffix.
pub fn username_for(suffix: &str) -> String {
    format!("{USERNAME_PREFIX}{suffix}")
}

/// A generated credential. Lives in memory and in the credential Secret;
/// all formatting output is redacted so it cannot end up in logs.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Password(String);

impl Password {
    pub fn new(value: String) -> Self {
        Self(value)
    }

    /// The secret value itself.
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Password {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Password(<redacted>)")
    }
}

impl fmt::Display for Password {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<redacted>")
    }
}

/// A role the user should hold.
///
/// No namespace produces a ClusterRoleBinding; a namespace produces a
/// RoleBinding there. The referenced role is a ClusterRole either way.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleGrant {
    pub role: String,
    pub namespace: Option<String>,
}

impl RoleGrant {
    pub fn cluster(role: &str) -> Self {
        Self {
            role: role.to_string(),
            namespace: None,
        }
    }

    pub fn namespaced(role: &str, namespace: &str) -> Self {
        Self {
            role: role.to_string(),
            namespace: Some(namespace.to_string()),
        }
    }
}

impl FromStr for RoleGrant {
    type Err = String;

    /// Parses `ROLE` (cluster scope) or `ROLE:NAMESPACE`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some((role, namespace)) if !role.is_empty() && !namespace.is_empty() => {
                Ok(RoleGrant::namespaced(role, namespace))
            }
            None if !s.is_empty() => Ok(RoleGrant::cluster(s)),
            _ => Err(format!(
                "invalid role grant {s:?}, expected ROLE or ROLE:NAMESPACE"
            )),
        }
    }
}

impl fmt::Display for RoleGrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(namespace) => write!(f, "{}:{}", self.role, namespace),
            None => write!(f, "{}", self.role),
        }
    }
}

/// A disposable cluster user and everything provisioned for it.
#[derive(Debug, Clone)]
pub struct EphemeralUser {
    pub username: String,
    pub password: Password,
    pub cluster_roles: Vec<RoleGrant>,
    /// Pre-existing shared bindings the user joins as a subject only; the
    /// bindings themselves are never owned or deleted.
    pub cluster_role_binding_names: Vec<String>,
    /// Kubeconfig produced by login; removed on teardown.
    pub session_config: Option<PathBuf>,
}

impl EphemeralUser {
    /// Name shared by the credential Secret and the identity-provider entry.
    pub fn secret_name(&self) -> String {
        format!("{}-htpasswd", self.username)
    }

    /// Name of the Identity object the platform materializes on first login:
    /// provider name and provider username joined by a colon.
    pub fn identity_name(&self) -> String {
        format!("{}:{}", self.secret_name(), self.username)
    }

    /// Name of the generated binding for `role`.
    pub fn binding_name(&self, role: &str) -> String {
        format!("{}-{}", self.username, role)
    }
}
