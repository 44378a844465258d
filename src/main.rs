//! # Compiler Log Index CLI (`cindex`)
//!
//! ## Usage
//!
//! ```bash
//! cindex --config ./config/cindex.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `cindex serve` | Poll sources forever and run the status server until Ctrl-C |
//! | `cindex poll` | Run exactly one poll round and exit |
//! | `cindex sources` | List configured sources and their stored version keys |
//!
//! Logging goes to stderr and is controlled by `RUST_LOG`
//! (default `complog_index=info`).

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use complog_index::config::{load_config, Config};
use complog_index::coordinator::IngestionCoordinator;
use complog_index::generator::CommandGenerator;
use complog_index::poll::PollLoop;
use complog_index::publish::PublicationManager;
use complog_index::server::{run_server, AppState};
use complog_index::sources::{build_sources, list_sources, Source};
use complog_index::store::ContentStore;

/// Keeps a browsable source index fresh from compiler-log artifacts.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/cindex.example.toml` for a full example.
#[derive(Parser)]
#[command(name = "cindex", version)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/cindex.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll sources on the configured interval and serve the status API.
    ///
    /// Runs until interrupted with Ctrl-C; the current round is abandoned
    /// and the server drains before exit.
    Serve,

    /// Run a single poll round, regenerating the index if anything changed.
    Poll,

    /// List configured sources with their stored version keys.
    Sources,
}

/// Everything the commands share, built from one configuration.
struct Engine {
    config: Config,
    sources: Arc<Vec<Source>>,
    coordinator: Arc<IngestionCoordinator>,
    publisher: Arc<PublicationManager>,
}

impl Engine {
    async fn open(config: Config) -> Result<Self> {
        let store = ContentStore::open(&config.storage.root).await?;
        let sources = build_sources(&config)?;
        let names: Vec<String> = sources.iter().map(|s| s.name().to_string()).collect();
        let coordinator = IngestionCoordinator::load(store.clone(), &names).await?;
        let publisher = PublicationManager::open(store).await?;

        Ok(Self {
            config,
            sources: Arc::new(sources),
            coordinator: Arc::new(coordinator),
            publisher: Arc::new(publisher),
        })
    }

    fn poll_loop(&self) -> PollLoop {
        let generator = CommandGenerator::new(&self.config.generator, self.coordinator.store().root());
        PollLoop::new(
            self.sources.clone(),
            self.coordinator.clone(),
            Arc::new(generator),
            self.publisher.clone(),
            &self.config.poll,
        )
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("complog_index=info,cindex=info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Cancel `token` on Ctrl-C.
fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("shutdown requested"),
            Err(e) => tracing::warn!(error = %e, "failed to listen for Ctrl-C"),
        }
        token.cancel();
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;
    let engine = Engine::open(config).await?;

    match cli.command {
        Commands::Serve => {
            let cancel = CancellationToken::new();
            cancel_on_ctrl_c(cancel.clone());

            let mut poll = engine.poll_loop();
            let poller = tokio::spawn({
                let cancel = cancel.clone();
                async move { poll.run(cancel).await }
            });

            let state = AppState {
                sources: engine.sources.clone(),
                coordinator: engine.coordinator.clone(),
                publisher: engine.publisher.clone(),
            };
            let served = run_server(&engine.config.server.bind, state, cancel.clone()).await;
            cancel.cancel();
            poller.await?;
            served?;
        }
        Commands::Poll => {
            let cancel = CancellationToken::new();
            cancel_on_ctrl_c(cancel.clone());

            let outcome = engine.poll_loop().run_round(&cancel).await;
            println!("changed:   {}", join_or_dash(&outcome.changed));
            println!("failed:    {}", join_or_dash(&outcome.failed));
            match (&outcome.published, outcome.generation_failed) {
                (Some(name), _) => println!("published: {}", name),
                (None, true) => println!("published: - (generation failed)"),
                (None, false) => println!("published: -"),
            }
        }
        Commands::Sources => {
            list_sources(&engine.sources, &engine.coordinator).await;
        }
    }

    Ok(())
}

fn join_or_dash(names: &[String]) -> String {
    if names.is_empty() {
        "-".to_string()
    } else {
        names.join(", ")
    }
}
