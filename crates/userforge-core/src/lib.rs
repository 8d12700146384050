//! Ephemeral cluster-user provisioning.
//!
//! Sets up disposable users for e2e test scenarios (credential Secret,
//! identity-provider entry on the shared OAuth config, role bindings and a
//! logged-in kubeconfig) and tears every piece down again. All cluster
//! access goes through the [`ClusterStore`](userforge_cluster::ClusterStore)
//! handle, so the same logic runs against a live cluster or an in-memory
//! fake.

pub mod credential;
pub mod error;
pub mod htpasswd;
pub mod idp;
pub mod provision;
pub mod rbac;
pub mod session;
pub mod types;

pub use error::{ProvisionError, TeardownError};
pub use provision::Provisioner;
pub use session::{OcLogin, SessionAcquirer, SessionError};
pub use types::{EphemeralUser, Password, RoleGrant};
