use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod coordinator;
mod deck;
mod error;
mod http;
mod registry;
mod relay;
#[cfg(test)]
mod tests;

use config::ServerConfig;
use coordinator::Coordinator;
use deck::DirCatalog;
use registry::RoomRegistry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::parse();
    init_logging(&config)?;

    let registry = Arc::new(RoomRegistry::new(Arc::new(DirCatalog::new(&config.assets))));
    let coordinator = Coordinator::new(registry, config.idle_timeout());
    let app = http::router(coordinator);

    let addr = config.addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!(
        "server listening on http://{addr} (cards from {})",
        config.assets.display()
    );
    axum::serve(listener, app).await?;
    Ok(())
}

fn init_logging(config: &ServerConfig) -> anyhow::Result<()> {
    let log_level = if config.verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!("mukatte_server={log_level}"))
    });

    match &config.log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("opening log file {}", path.display()))?;
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(std::sync::Mutex::new(file)),
                )
                .init();
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
    Ok(())
}
