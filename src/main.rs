use std::env;

use anyhow::Context;
use axum::Router;
use tokio::net::TcpListener;

use figura_backend::core::config::AppPaths;
use figura_backend::core::logging;
use figura_backend::server;
use figura_backend::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let paths = AppPaths::new();
    logging::init(&paths);

    let state = AppState::initialize().await?;

    let bind_addr = env::var("FIGURA_BIND").unwrap_or_else(|_| "127.0.0.1:8000".to_string());
    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", bind_addr))?;
    let addr = listener.local_addr()?;

    tracing::info!("Listening on {}", addr);

    let app: Router = server::router::router(state);
    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}
