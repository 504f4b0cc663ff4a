//! Read-only HTTP surface over a scene store

pub mod handlers;
pub mod router;

use std::net::SocketAddr;
use std::sync::Arc;

use scenery_store::SceneStore;

/// Shared server state handed to every handler.
#[derive(Debug)]
pub struct ServerState {
    pub store: SceneStore,
}

impl ServerState {
    pub fn new(store: SceneStore) -> Self {
        ServerState { store }
    }
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 7891,
        }
    }
}

pub struct SceneryServer {
    state: Arc<ServerState>,
    config: ServerConfig,
}

impl SceneryServer {
    pub fn new(store: SceneStore, config: ServerConfig) -> Self {
        SceneryServer {
            state: Arc::new(ServerState::new(store)),
            config,
        }
    }

    pub fn state(&self) -> Arc<ServerState> {
        Arc::clone(&self.state)
    }

    /// Bind and serve until the process is stopped.
    pub async fn start(self) -> anyhow::Result<()> {
        let addr: SocketAddr = format!("{}:{}", self.config.host, self.config.port).parse()?;
        let app = router::create_router(self.state);
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!("Listening on http://{}", addr);
        axum::serve(listener, app).await?;
        Ok(())
    }
}
