//! Ready-to-run dialer server
//!
//! Wires the engine, optional persistence, and the HTTP API together.
//!
//! ```text
//! let server = DialerServerBuilder::new()
//!     .with_config(config)
//!     .with_provider(provider)
//!     .build()
//!     .await?;
//! server.run().await?;
//! ```

use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;

use crate::api;
use crate::config::DialerConfig;
use crate::database::DatabaseManager;
use crate::error::{DialerError, Result};
use crate::orchestrator::DialerEngine;
use crate::telephony::TelephonyProvider;

/// Builder for [`DialerServer`]
pub struct DialerServerBuilder {
    config: DialerConfig,
    provider: Option<Arc<dyn TelephonyProvider>>,
}

impl DialerServerBuilder {
    pub fn new() -> Self {
        Self { config: DialerConfig::default(), provider: None }
    }

    pub fn with_config(mut self, config: DialerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_provider(mut self, provider: Arc<dyn TelephonyProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Connect persistence (when configured) and create the engine
    pub async fn build(self) -> Result<DialerServer> {
        let provider = self
            .provider
            .ok_or_else(|| DialerError::configuration("a telephony provider is required"))?;

        let db = match &self.config.database.url {
            Some(url) => {
                let db = DatabaseManager::new(url)
                    .await
                    .map_err(|e| DialerError::database(e.to_string()))?;
                Some(Arc::new(db))
            }
            None => None,
        };

        let engine = DialerEngine::new(self.config.clone(), provider, db)?;
        Ok(DialerServer { config: self.config, engine })
    }
}

impl Default for DialerServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// The assembled dialer: engine plus HTTP control surface
pub struct DialerServer {
    config: DialerConfig,
    engine: Arc<DialerEngine>,
}

impl DialerServer {
    /// The underlying engine, for embedding without the HTTP layer
    pub fn engine(&self) -> Arc<DialerEngine> {
        self.engine.clone()
    }

    /// Serve the API until the process is stopped
    pub async fn run(self) -> Result<()> {
        let app = api::router(self.engine.clone());
        let listener = TcpListener::bind(self.config.general.bind_addr)
            .await
            .map_err(|e| {
                DialerError::configuration(format!(
                    "cannot bind {}: {}",
                    self.config.general.bind_addr, e
                ))
            })?;
        info!("🌐 Dialer API listening on {}", self.config.general.bind_addr);
        axum::serve(listener, app)
            .await
            .map_err(|e| DialerError::internal(format!("server error: {}", e)))
    }
}
