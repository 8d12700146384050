//! Session acquisition: interactive login producing a kubeconfig.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::info;

use crate::types::EphemeralUser;

/// Errors from acquiring a logged-in session
#[derive(Error, Debug)]
pub enum SessionError {
    /// The login command could not be run
    #[error("failed to run {command}: {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },

    /// The login command exited unsuccessfully
    #[error("login failed for {username}: {stderr}")]
    LoginFailed { username: String, stderr: String },

    /// The produced kubeconfig could not be read
    #[error("session config unreadable: {0}")]
    Io(#[from] std::io::Error),

    /// The produced file does not parse as a kubeconfig
    #[error("invalid kubeconfig: {0}")]
    InvalidKubeconfig(#[from] serde_yaml::Error),
}

/// Performs the interactive login for a provisioned user and materializes a
/// client configuration file.
///
/// One attempt per call. A freshly registered identity provider takes a
/// while to start serving logins; callers that need to wait that out poll
/// around this.
#[async_trait]
pub trait SessionAcquirer: Send + Sync {
    async fn login(&self, user: &EphemeralUser) -> Result<PathBuf, SessionError>;
}

/// Default location for a user's session kubeconfig.
pub fn default_config_path(username: &str) -> PathBuf {
    std::env::temp_dir().join(format!("{username}.kubeconfig"))
}

/// Logs in by shelling out to the cluster CLI.
///
/// The platform's challenge-based OAuth flow is what `oc login` implements;
/// running it against a throwaway kubeconfig path keeps the session isolated
/// from the operator's own configuration.
pub struct OcLogin {
    binary: PathBuf,
    server: String,
    output_dir: PathBuf,
}

impl OcLogin {
    /// Log in against `server` with the `oc` binary from PATH, writing
    /// kubeconfigs to the platform temp directory.
    pub fn new(server: &str) -> Self {
        Self {
            binary: PathBuf::from("oc"),
            server: server.to_string(),
            output_dir: std::env::temp_dir(),
        }
    }

    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = binary.into();
        self
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    fn config_path(&self, username: &str) -> PathBuf {
        self.output_dir.join(format!("{username}.kubeconfig"))
    }
}

#[async_trait]
impl SessionAcquirer for OcLogin {
    async fn login(&self, user: &EphemeralUser) -> Result<PathBuf, SessionError> {
        let path = self.config_path(&user.username);
        let output = Command::new(&self.binary)
            .arg("login")
            .arg("--server")
            .arg(&self.server)
            .arg("--username")
            .arg(&user.username)
            .arg("--password")
            .arg(user.password.expose())
            .arg("--kubeconfig")
            .arg(&path)
            .arg("--insecure-skip-tls-verify=true")
            .output()
            .await
            .map_err(|source| SessionError::Spawn {
                command: self.binary.display().to_string(),
                source,
            })?;

        if !output.status.success() {
            return Err(SessionError::LoginFailed {
                username: user.username.clone(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        validate_kubeconfig(&path)?;
        info!(username = %user.username, path = %path.display(), "acquired session kubeconfig");
        Ok(path)
    }
}

/// Check the written file parses as a kubeconfig before handing it out.
fn validate_kubeconfig(path: &Path) -> Result<(), SessionError> {
    let contents = std::fs::read_to_string(path)?;
    serde_yaml::from_str::<kube::config::Kubeconfig>(&contents)?;
    Ok(())
}
