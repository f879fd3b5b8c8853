use kvdis::config::Config;
use kvdis::server;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> std::io::Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let config = match Config::from_args(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("kvdis: {e}");
            std::process::exit(2);
        }
    };

    // RUST_LOG wins over --loglevel
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.loglevel));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("received ctrl-c"),
            Err(e) => error!("failed to listen for ctrl-c: {e}"),
        }
        shutdown.cancel();
    });

    server::run_server(Arc::new(RwLock::new(config)), cancel).await
}
