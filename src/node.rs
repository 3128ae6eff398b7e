use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::api::{self, AppState};
use crate::blockchain::Blockchain;
use crate::commands::Commands;
use crate::config::Config;
use crate::error::ChainError;
use crate::hub::{Hub, HubHandle};

/// Install the global tracing subscriber. `RUST_LOG` wins over `default_level`.
/// Safe to call more than once; later calls are ignored.
pub fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// A running ledger with its hub, ready to be served.
pub struct Node {
    pub config: Config,
    pub ledger: Arc<Blockchain>,
    pub hub: HubHandle,
    hub_task: JoinHandle<()>,
}

impl Node {
    /// Build the ledger and start the hub. Must be called inside a Tokio runtime.
    pub fn init(config: Config) -> Result<Self, ChainError> {
        config.validate()?;
        info!(difficulty = config.ledger.difficulty, "starting blogochain node");

        let ledger = Arc::new(Blockchain::new(config.ledger.difficulty)?);
        let (hub, hub_task) = Hub::spawn(Arc::clone(&ledger), config.hub.clone());

        Ok(Self {
            config,
            ledger,
            hub,
            hub_task,
        })
    }

    pub fn commands(&self) -> Commands {
        Commands::new(Arc::clone(&self.ledger), self.hub.clone())
    }

    pub fn app_state(&self) -> AppState {
        AppState::new(self.commands(), self.config.session.clone())
    }

    /// Serve HTTP and websocket traffic until the server fails.
    pub async fn start(self) -> Result<(), ChainError> {
        let addr: SocketAddr = self
            .config
            .bind_address()
            .parse()
            .map_err(|e| ChainError::Config(format!("invalid bind address: {}", e)))?;

        info!(%addr, static_dir = %self.config.server.static_dir, "web interface available");
        let result = api::run_api_server(self.app_state(), addr, &self.config.server.static_dir).await;
        if let Err(e) = &result {
            error!(error = %e, "api server failed");
        }

        self.hub_task.abort();
        result
    }
}
