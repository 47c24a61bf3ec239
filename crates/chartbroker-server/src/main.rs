use chartbroker_core::{Broker, BrokerConfig, IdStrategy};
use chartbroker_release::{ManagerConfig, ManagerEndpoint};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "chartbroker", about = "Service broker over chart repositories")]
struct Cli {
    /// Port to listen on.
    #[arg(long, default_value_t = 8080)]
    port: u16,

    /// Address to bind.
    #[arg(long, default_value = "0.0.0.0")]
    bind: String,

    /// TOML config file. A missing file means defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Repository home, overriding the config file.
    #[arg(long)]
    home: Option<PathBuf>,

    /// Report operations as asynchronous when the platform accepts it.
    #[arg(long = "async")]
    async_mode: bool,

    /// Derive service ids from chart digests instead of names.
    #[arg(long)]
    digest_ids: bool,

    /// Remote release manager endpoint. Without it releases are kept in memory.
    #[arg(long)]
    release_manager: Option<String>,

    /// Bearer token for the remote release manager.
    #[arg(long, requires = "release_manager")]
    release_manager_token: Option<String>,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("CHARTBROKER_LOG").unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut config = match &cli.config {
        Some(path) => BrokerConfig::load_or_default(path)?,
        None => BrokerConfig::default(),
    };
    if let Some(home) = cli.home {
        config.home = home;
    }
    if cli.async_mode {
        config.async_mode = true;
    }
    if cli.digest_ids {
        config.id_strategy = IdStrategy::Digest;
    }
    if let Some(url) = cli.release_manager {
        let mut endpoint = ManagerEndpoint::new(&url);
        if let Some(token) = cli.release_manager_token.as_deref() {
            endpoint = endpoint.with_token(token);
        }
        config.release_manager = ManagerConfig::Http(endpoint);
    }

    let broker = Arc::new(Broker::from_config(&config)?);
    let addr = format!("{}:{}", cli.bind, cli.port);
    info!("starting chartbroker on {addr}");
    info!("repository home: {}", config.home.display());
    chartbroker_server::run_server(&broker, &addr)
}
