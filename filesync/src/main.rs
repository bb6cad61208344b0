//! filesync - main entry point

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use filesync::config::SyncConfig;
use filesync::remote::{self, RemoteSession};
use filesync::sync::{manifest::ManifestStore, refresh_manifest};
use filesync::utils::prompt::{Prompter, TerminalPrompter};
use filesync::{utils, Protocol, TransferExecutor, TrustVerifier};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Directory to synchronize
    #[arg(short, long, value_name = "DIR", default_value = ".")]
    root: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write a configuration and record the current state of the tree
    Init {
        #[arg(long, default_value = "localhost")]
        host: String,

        #[arg(long, default_value_t = 22)]
        port: u16,

        #[arg(long, default_value = "test")]
        user: String,

        #[arg(long, default_value_t = 3)]
        max_connections: usize,

        /// Root folder on the server
        #[arg(long, default_value = ".")]
        folder: String,

        /// SFTP, FTP, FTPS-IMPLICIT or FTPS-EXPLICIT
        #[arg(long, default_value = "SFTP")]
        protocol: String,
    },

    /// Upload local changes made since the last publish
    Publish,

    /// Download the whole remote folder into the local directory
    Clone,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config_path = SyncConfig::path_in(&args.root);

    match args.command {
        Command::Init {
            host,
            port,
            user,
            max_connections,
            folder,
            protocol,
        } => {
            utils::logger::init(args.log_level.as_deref().unwrap_or("info"))?;
            protocol.parse::<Protocol>()?;

            let config = SyncConfig {
                host,
                port,
                username: user,
                max_connections,
                server_folder: folder,
                protocol,
                ..SyncConfig::default()
            };
            config.validate()?;
            config.save(&config_path)?;
            tracing::info!("Wrote {}", config_path.display());

            refresh_manifest(&args.root, &ManifestStore::in_root(&args.root))?;
        }

        Command::Publish => {
            let mut config = load_config(&config_path, args.log_level.as_deref())?;
            let session = open_session(&config).await?;
            let executor = TransferExecutor::new(Arc::clone(&session), &config)?;

            let result = executor.push(&args.root, &mut config, &config_path).await;
            close_session(session).await;
            result?;
        }

        Command::Clone => {
            let config = load_config(&config_path, args.log_level.as_deref())?;
            let session = open_session(&config).await?;
            let executor = TransferExecutor::new(Arc::clone(&session), &config)?;

            let result = executor.clone_tree(&args.root).await;
            close_session(session).await;
            result?;
        }
    }

    Ok(())
}

/// Load and validate the configuration, then start logging at its level.
fn load_config(path: &Path, log_level: Option<&str>) -> Result<SyncConfig> {
    let config = SyncConfig::from_file(path)
        .with_context(|| format!("run `filesync init` first to create {}", path.display()))?;
    config.validate()?;

    utils::logger::init(log_level.unwrap_or(&config.log.level))?;
    tracing::info!(
        "Starting filesync v{} against {}@{}:{}",
        env!("CARGO_PKG_VERSION"),
        config.username,
        config.host,
        config.port
    );
    Ok(config)
}

/// Ask for the password and connect; host key prompts happen in here too.
async fn open_session(config: &SyncConfig) -> Result<Arc<dyn RemoteSession>> {
    let config = config.clone();
    let session = tokio::task::spawn_blocking(move || {
        let prompter = TerminalPrompter;
        let secret = prompter.secret(&format!("Password for {}@{}", config.username, config.host))?;
        let verifier = TrustVerifier::new(config.known_hosts_path());
        remote::connect(&config, &secret, &verifier, &prompter)
    })
    .await??;
    Ok(session)
}

async fn close_session(session: Arc<dyn RemoteSession>) {
    match tokio::task::spawn_blocking(move || session.close()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!("Closing the session failed: {}", e),
        Err(e) => tracing::warn!("Closing the session panicked: {}", e),
    }
}
