//! HTTP server wiring: state construction, router assembly, lifecycle.

pub mod api;

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::config::Config;
use crate::github::GitHubClient;
use crate::store::{NoteStore, StoreHandle};

use api::{AppState, SharedState};

/// Configuration for the digest server.
pub struct ServerConfig {
    pub port: u16,
    pub db_path: std::path::PathBuf,
    pub dev_mode: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 3141,
            db_path: std::path::PathBuf::from(".digest/notes.db"),
            dev_mode: false,
        }
    }
}

pub fn build_router(state: SharedState) -> Router {
    api::api_router().with_state(state)
}

/// Start the server and run until Ctrl+C.
pub async fn start_server(server: ServerConfig, config: Config) -> Result<()> {
    if let Some(parent) = server.db_path.parent() {
        std::fs::create_dir_all(parent).context("Failed to create database directory")?;
    }

    let store = NoteStore::new(&server.db_path).context("Failed to initialize note store")?;
    let github = Arc::new(GitHubClient::new(config.github_token.clone()));

    let state = Arc::new(AppState {
        store: StoreHandle::new(store),
        github,
        config,
    });

    let mut app = build_router(state);

    if server.dev_mode {
        app = app.layer(CorsLayer::permissive());
    }

    let host = if server.dev_mode { "0.0.0.0" } else { "127.0.0.1" };
    let addr = format!("{}:{}", host, server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    let local_addr = listener.local_addr()?;
    info!("Diff Digest running at http://{}", local_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shut down gracefully.");
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        info!("Ctrl+C handler unavailable; running until killed");
        std::future::pending::<()>().await;
    }
    info!("Shutting down...");
}
