//! userforge: provision disposable OpenShift users for e2e test suites

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use clap::{Args, Parser, Subcommand};
use color_eyre::Result;
use tokio::time::Instant;
use tracing::Level;
use tracing_subscriber::{EnvFilter, prelude::*};
use userforge_cluster::KubeStore;
use userforge_core::session::default_config_path;
use userforge_core::{EphemeralUser, OcLogin, Provisioner, RoleGrant, SessionAcquirer, SessionError};

/// userforge: ephemeral cluster users for test runs
#[derive(Parser, Debug)]
#[command(name = "userforge")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Provision an ephemeral user and log it in
    Setup {
        #[command(flatten)]
        user: UserArgs,

        /// Public API endpoint to log in against
        #[arg(long)]
        server: String,

        /// Cluster CLI binary used for the login step
        #[arg(long, default_value = "oc")]
        cli: PathBuf,

        /// Give up on login after this many seconds
        #[arg(long, default_value = "180")]
        login_timeout: u64,
    },
    /// Remove everything a previous setup created
    Teardown {
        #[command(flatten)]
        user: UserArgs,
    },
}

#[derive(Args, Debug)]
struct UserArgs {
    /// Username suffix; the full username is e2e-user-<suffix>
    #[arg(short, long)]
    suffix: String,

    /// Working namespace the user gets admin in
    #[arg(short, long)]
    namespace: String,

    /// Extra role grants: ROLE for cluster scope, ROLE:NAMESPACE otherwise
    #[arg(short, long = "role")]
    roles: Vec<RoleGrant>,

    /// Existing shared ClusterRoleBindings to join as a subject
    #[arg(long = "shared-binding")]
    shared_bindings: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize error handling
    color_eyre::install()?;

    // Logging goes to stderr; stdout carries the username and kubeconfig
    // path for scripted callers.
    let filter = if cli.debug {
        EnvFilter::from_default_env().add_directive(Level::DEBUG.into())
    } else {
        EnvFilter::from_default_env().add_directive(Level::INFO.into())
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .with(filter)
        .init();

    let store = KubeStore::try_default().await?;

    match cli.command {
        Command::Setup {
            user,
            server,
            cli: cli_binary,
            login_timeout,
        } => {
            let login = PollingLogin {
                inner: OcLogin::new(&server).with_binary(cli_binary),
                interval: Duration::from_secs(10),
                timeout: Duration::from_secs(login_timeout),
            };
            let provisioner = Provisioner::new(store, login)
                .with_shared_bindings(user.shared_bindings.clone());

            let provisioned = provisioner
                .setup(&user.namespace, &user.suffix, &user.roles)
                .await?;

            println!("username: {}", provisioned.username);
            if let Some(path) = &provisioned.session_config {
                println!("kubeconfig: {}", path.display());
            }
        }
        Command::Teardown { user } => {
            let provisioner = Provisioner::new(store, NoLogin)
                .with_shared_bindings(user.shared_bindings.clone());

            let mut record = provisioner.user(&user.namespace, &user.suffix, &user.roles);
            record.session_config = Some(default_config_path(&record.username));
            provisioner.teardown(&record).await?;

            println!("removed: {}", record.username);
        }
    }

    Ok(())
}

/// Caller-side bounded polling around the library's single-attempt login:
/// a freshly registered identity provider takes a while to serve logins
/// after the OAuth patch lands.
struct PollingLogin<L> {
    inner: L,
    interval: Duration,
    timeout: Duration,
}

#[async_trait]
impl<L: SessionAcquirer> SessionAcquirer for PollingLogin<L> {
    async fn login(&self, user: &EphemeralUser) -> Result<PathBuf, SessionError> {
        let deadline = Instant::now() + self.timeout;
        loop {
            match self.inner.login(user).await {
                Ok(path) => return Ok(path),
                Err(e) if Instant::now() + self.interval > deadline => return Err(e),
                Err(e) => {
                    tracing::debug!(username = %user.username, error = %e, "login not ready, retrying");
                    tokio::time::sleep(self.interval).await;
                }
            }
        }
    }
}

/// Teardown never logs in; this only satisfies the type parameter.
struct NoLogin;

#[async_trait]
impl SessionAcquirer for NoLogin {
    async fn login(&self, user: &EphemeralUser) -> Result<PathBuf, SessionError> {
        Err(SessionError::LoginFailed {
            username: user.username.clone(),
            stderr: "login is not available during teardown".to_string(),
        })
    }
}
