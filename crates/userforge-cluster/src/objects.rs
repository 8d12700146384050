//! API object types for the identity-provider registry.
//!
//! The OAuth config and its identity-provider entries are OpenShift types
//! that `k8s-openapi` does not carry, so the fields this crate touches are
//! modeled here. Unknown spec fields are ignored on read and never written
//! back; all writes are targeted patches.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Name of the singleton OAuth configuration object.
pub const OAUTH_NAME: &str = "cluster";

/// Mapping method for provider identities; `claim` maps each provider
/// identity to exactly one cluster user.
pub const MAPPING_METHOD_CLAIM: &str = "claim";

/// Provider type for htpasswd-file-backed identity providers.
pub const PROVIDER_TYPE_HTPASSWD: &str = "HTPasswd";

/// Cluster-wide OAuth configuration (`config.openshift.io/v1`, cluster
/// scoped). Carries the ordered identity-provider list.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "config.openshift.io",
    version = "v1",
    kind = "OAuth",
    plural = "oauths"
)]
#[serde(rename_all = "camelCase")]
pub struct OAuthSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity_providers: Option<Vec<IdentityProvider>>,
}

/// One entry in `spec.identityProviders`, unique by `name`.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IdentityProvider {
    pub name: String,
    pub mapping_method: String,
    #[serde(rename = "type")]
    pub provider_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub htpasswd: Option<HtpasswdProvider>,
}

/// htpasswd-specific provider configuration.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HtpasswdProvider {
    pub file_data: SecretNameReference,
}

/// Reference to a Secret in the platform configuration namespace.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct SecretNameReference {
    pub name: String,
}

impl IdentityProvider {
    /// Entry for an htpasswd provider backed by the named credential Secret,
    /// with claim-based identity mapping.
    pub fn htpasswd(name: &str, secret_name: &str) -> Self {
        Self {
            name: name.to_string(),
            mapping_method: MAPPING_METHOD_CLAIM.to_string(),
            provider_type: PROVIDER_TYPE_HTPASSWD.to_string(),
            htpasswd: Some(HtpasswdProvider {
                file_data: SecretNameReference {
                    name: secret_name.to_string(),
                },
            }),
        }
    }
}
