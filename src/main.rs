//! Muster kernel entry point: .env, tracing, config, HTTP listener.
//! Everything interesting lives behind the route table; the binary only
//! wires the pieces together.

mod agents;
mod config;
mod error;
mod exec;
mod health;
mod http;
mod inspect;
mod mesh;
mod models;
mod probe;
mod router;
mod snapshot;
mod store;

use anyhow::Context;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("muster=info")),
        )
        .init();

    let cfg = config::load_config().await;
    info!(
        hosts = cfg.hosts.len(),
        services = cfg.services.len(),
        "config loaded"
    );

    let state = http::AppState::new(Arc::new(cfg));
    let port = state.cfg.listen_port();
    let app = http::build_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("listening on http://{addr}");
    let listener = TcpListener::bind(addr).await.context("bind listener")?;
    axum::serve(listener, app).await.context("serve http")?;
    Ok(())
}
