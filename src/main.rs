mod bus;
mod config;
mod environment;
mod error;
mod event;
mod listeners;
mod persistence;
mod runner;
mod server;
mod session;
mod transcript;

use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use dotenvy::dotenv;
use tokio::net::TcpListener;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::listeners::client_hub::ClientHub;
use crate::persistence::file_adapter::FilePersistenceAdapter;
use crate::persistence::PersistenceAdapter;
use crate::server::AppState;
use crate::session::coordinator::LocalEnvironmentFactory;
use crate::session::host::SessionHost;

#[derive(Parser)]
#[command(name = "sessiond", about = "Runs and persists coding-agent sessions over a stable HTTP surface")]
enum Cli {
    /// Start the HTTP server (default when no subcommand is given)
    #[command(alias = "run")]
    Serve {
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    dotenv().ok();

    let args: Vec<String> = std::env::args().collect();
    let cli = if args.len() <= 1 {
        Cli::Serve { config: None }
    } else {
        Cli::parse()
    };

    let Cli::Serve { config } = cli;
    run_server(config).await
}

async fn run_server(config_path: Option<PathBuf>) -> Result<(), Box<dyn Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("sessiond=info,tower_http=warn"));
    tracing_subscriber::registry().with(filter).with(tracing_subscriber::fmt::layer()).init();

    let config_path = config_path.unwrap_or_else(|| PathBuf::from("sessiond.toml"));
    let config = config::Config::load_or_default(&config_path)?;

    let file_adapter = FilePersistenceAdapter::new(&config.storage.root);
    file_adapter
        .load_all()
        .await
        .map_err(|e| format!("failed to load persisted sessions: {e}"))?;
    let adapter: Arc<dyn PersistenceAdapter> = Arc::new(file_adapter);

    let environment_factory = Arc::new(LocalEnvironmentFactory {
        workspace_root: config.storage.root.join("workspaces"),
        env_allowlist: vec!["PATH".to_string(), "HOME".to_string()],
    });
    let client_hub = Arc::new(ClientHub::new());
    let host = Arc::new(SessionHost::new(adapter, environment_factory, client_hub));

    let app = server::build_router(AppState { host });
    let addr = format!("{}:{}", config.server.bind, config.server.port);
    tracing::info!(%addr, "starting sessiond");
    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
