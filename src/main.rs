//! Zentinel Auth Dispatch
//!
//! Command-line front end for the login dispatcher: configuration checks,
//! account provisioning, and local or SAML logins against the redb store.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};

use zentinel_auth_dispatch::local::SecretHasher;
use zentinel_auth_dispatch::saml::SamlProvider;
use zentinel_auth_dispatch::store::{spawn_replay_cleanup, RedbStore};
use zentinel_auth_dispatch::{
    AuthCoordinator, AuthFailure, AuthMethod, AuthenticatedIdentity, Classification,
    DispatchConfig, FederatedAssertion, LoginProof, StoredIdentityRecord,
};

/// Command line arguments
#[derive(Parser, Debug)]
#[command(name = "zentinel-auth-dispatch")]
#[command(about = "Routes logins to local credentials or SAML federation")]
struct Args {
    /// Path to the JSON configuration file
    #[arg(
        long,
        default_value = "/etc/zentinel/auth-dispatch.json",
        env = "DISPATCH_CONFIG"
    )]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long, env = "DISPATCH_VERBOSE")]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load and validate the configuration, including IdP metadata
    CheckConfig,

    /// Read a secret from stdin and print its Argon2id hash
    HashSecret,

    /// Create or replace an account in the identity store
    AddUser {
        #[arg(long)]
        username: String,

        /// Provision a federated account (no secret)
        #[arg(long)]
        federated: bool,
    },

    /// Print the IdP redirect URL that starts a federated login
    BeginSso {
        #[arg(long)]
        relay_state: Option<String>,
    },

    /// Local login; the secret is read from stdin
    Login {
        #[arg(long)]
        username: String,
    },

    /// Verify the query string of an ACS callback
    Acs {
        #[arg(long)]
        query: String,

        /// Username submitted with the assertion
        #[arg(long)]
        username: Option<String>,
    },

    /// Evict expired replay records
    Prune {
        /// Keep running and evict on the configured interval until interrupted
        #[arg(long)]
        watch: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    // Parse command line arguments
    let args = Args::parse();

    // Initialize tracing
    let log_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(format!(
            "{}={},audit=info",
            env!("CARGO_CRATE_NAME"),
            log_level
        ))
        .json()
        .with_writer(std::io::stderr)
        .init();

    match run(args).await {
        Ok(code) => code,
        Err(e) => {
            error!(error = %format!("{:#}", e), "Command failed");
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<ExitCode> {
    match args.command {
        Command::CheckConfig => {
            let config = load_resolved(&args.config).await?;
            let provider = SamlProvider::new(config.saml.clone())?;
            let policy = config.policy()?;

            let summary = serde_json::json!({
                "local-domain-marker": policy.local_marker(),
                "federated-domain-marker": policy.federated_marker(),
                "entity-id": config.saml.entity_id,
                "idp-issuer": provider.idp_issuer(),
                "idp-sso-url": config.saml.idp_sso_url,
                "allowed-signature-algorithms": config.saml.allowed_signature_algorithms,
                "upstream-timeout-ms": config.upstream_timeout_ms,
                "store-path": config.store_path,
            });
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(ExitCode::SUCCESS)
        }

        Command::HashSecret => {
            let secret = read_secret()?;
            println!("{}", SecretHasher::default().hash(&secret)?);
            Ok(ExitCode::SUCCESS)
        }

        Command::AddUser {
            username,
            federated,
        } => {
            let config = DispatchConfig::from_file(&args.config)?;
            let expected = if federated {
                Classification::Federated
            } else {
                Classification::Local
            };
            let classification = config.policy()?.classify(&username);
            if classification != expected {
                anyhow::bail!(
                    "username {} is classified as {}, not {}",
                    username,
                    classification,
                    expected
                );
            }

            let record = match classification.method() {
                Some(AuthMethod::Federated) => StoredIdentityRecord::federated(username.trim()),
                _ => {
                    let secret = read_secret()?;
                    if secret.is_empty() {
                        anyhow::bail!("secret must not be empty");
                    }
                    StoredIdentityRecord::local(username.trim(), SecretHasher::default().hash(&secret)?)
                }
            };

            let store = open_store(&config)?;
            store.upsert_identity(&record)?;
            info!(username = %record.username, method = %record.method, "Identity stored");
            Ok(ExitCode::SUCCESS)
        }

        Command::BeginSso { relay_state } => {
            let coordinator = build_coordinator(&args.config).await?;
            let redirect = coordinator.begin_federated_login(relay_state.as_deref())?;
            println!("{}", redirect.url);
            Ok(ExitCode::SUCCESS)
        }

        Command::Login { username } => {
            let coordinator = build_coordinator(&args.config).await?;
            let secret = read_secret()?;
            let result = coordinator
                .authenticate(&username, LoginProof::Secret(secret))
                .await;
            report(result)
        }

        Command::Acs { query, username } => {
            let coordinator = build_coordinator(&args.config).await?;
            let result = match FederatedAssertion::from_query(&query) {
                Ok(package) => match username {
                    Some(username) => {
                        coordinator
                            .authenticate(&username, LoginProof::Assertion(package))
                            .await
                    }
                    None => coordinator.verify_federated(&package).await,
                },
                Err(failure) => Err(failure),
            };
            report(result)
        }

        Command::Prune { watch } => {
            let config = DispatchConfig::from_file(&args.config)?;
            let store = open_store(&config)?;

            if watch {
                info!(
                    interval_secs = config.replay_cleanup_interval_secs,
                    "Starting replay cleanup task"
                );
                let cleanup = spawn_replay_cleanup(store, config.replay_cleanup_interval_secs);
                tokio::signal::ctrl_c()
                    .await
                    .context("Failed to listen for shutdown signal")?;
                cleanup.abort();
                info!("Replay cleanup stopped");
                return Ok(ExitCode::SUCCESS);
            }

            let evicted = store.evict_expired_assertions()?;
            info!(evicted, remaining = store.assertion_count()?, "Replay records pruned");
            println!("{}", evicted);
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn load_resolved(path: &Path) -> Result<Arc<DispatchConfig>> {
    let config = DispatchConfig::from_file(path)?.resolve_metadata().await?;
    info!(path = %path.display(), "Configuration loaded");
    Ok(Arc::new(config))
}

fn open_store(config: &DispatchConfig) -> Result<Arc<RedbStore>> {
    let store = RedbStore::open(PathBuf::from(&config.store_path))
        .with_context(|| format!("Failed to open identity store at {}", config.store_path))?;
    Ok(Arc::new(store))
}

async fn build_coordinator(path: &Path) -> Result<AuthCoordinator> {
    let config = load_resolved(path).await?;
    let store = open_store(&config)?;
    let coordinator = AuthCoordinator::new(config, store.clone(), store)?;
    Ok(coordinator)
}

/// Print the identity, or only the generic message for a rejection.
fn report(result: std::result::Result<AuthenticatedIdentity, AuthFailure>) -> Result<ExitCode> {
    match result {
        Ok(identity) => {
            println!("{}", serde_json::to_string_pretty(&identity)?);
            Ok(ExitCode::SUCCESS)
        }
        Err(failure) => {
            println!("{}", failure.public_message());
            Ok(ExitCode::FAILURE)
        }
    }
}

fn read_secret() -> Result<String> {
    let mut line = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut line)
        .context("Failed to read secret from stdin")?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}
