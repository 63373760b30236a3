//! Scan platform master: target resolution, agent registry, scheduling,
//! result ETL, and tagging, exposed to agents over HTTP.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Arg, Command};
use tracing::info;

use scan_master::etl::Ingestor;
use scan_master::registry::Registry;
use scan_master::scheduler::Scheduler;
use scan_master::storage::Store;
use scan_master::tagging::Tagger;
use scan_master::transport::{self, AppState};
use scan_master::MasterConfig;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let matches = Command::new("scan-master")
        .version(env!("CARGO_PKG_VERSION"))
        .author("AgentAsKit Contributors")
        .about("Distributed scan platform orchestrator")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .get_matches();

    let config_path = matches.get_one::<PathBuf>("config").map(|p| p.to_string_lossy().to_string());
    let config = MasterConfig::load(config_path.as_deref())?;

    info!("starting scan-master, data_dir={}", config.data_dir);

    let store = Arc::new(Store::open(&config.data_dir)?);
    let registry = Arc::new(Registry::new(store.clone(), config.registry.clone()));
    let tagger = Arc::new(Tagger::new(store.clone()));
    let ingestor = Arc::new(Ingestor::new(store.clone(), tagger.clone()));
    let scheduler = Arc::new(Scheduler::new(store.clone(), registry.clone(), config.scheduler.clone()));

    let state = Arc::new(AppState { store: store.clone(), registry: registry.clone(), ingestor });
    let app = transport::router(state);

    let scheduler_handle = tokio::spawn(scheduler.clone().run());

    let listener = tokio::net::TcpListener::bind(&config.transport.bind_address).await?;
    info!("listening on {}", config.transport.bind_address);
    axum::serve(listener, app).await?;

    scheduler.stop().await;
    scheduler_handle.abort();
    store.flush()?;
    Ok(())
}
