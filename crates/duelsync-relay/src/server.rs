//! `RelayServer` builder and accept loop.

use std::sync::Arc;
use std::time::Instant;

use duelsync_protocol::JsonCodec;
use duelsync_transport::{Listener, WebSocketListener};
use tokio::sync::Mutex;

use crate::handler::handle_connection;
use crate::registry::Registry;
use crate::{RelayConfig, RelayError};

/// Shared relay state passed to each connection handler task.
pub(crate) struct RelayState {
    pub(crate) registry: Mutex<Registry>,
    pub(crate) config: RelayConfig,
    pub(crate) codec: JsonCodec,
    pub(crate) started: Instant,
}

/// Builder for configuring and starting a relay.
///
/// # Example
///
/// ```rust,no_run
/// use duelsync_relay::RelayServer;
///
/// # async fn demo() -> Result<(), duelsync_relay::RelayError> {
/// let server = RelayServer::builder().bind("0.0.0.0:9000").build().await?;
/// server.run().await
/// # }
/// ```
pub struct RelayServerBuilder {
    config: RelayConfig,
}

impl RelayServerBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            config: RelayConfig::default(),
        }
    }

    /// Sets the address to bind to. Overrides the config's `bind_addr`.
    pub fn bind(mut self, addr: &str) -> Self {
        self.config.bind_addr = addr.to_string();
        self
    }

    /// Replaces the whole configuration.
    pub fn config(mut self, config: RelayConfig) -> Self {
        self.config = config;
        self
    }

    /// Binds the listener. Connections are not accepted until
    /// [`RelayServer::run`].
    pub async fn build(self) -> Result<RelayServer, RelayError> {
        let config = self.config.validated();
        let listener = WebSocketListener::bind(&config.bind_addr).await?;

        let state = Arc::new(RelayState {
            registry: Mutex::new(Registry::new(config.max_subscribers)),
            config,
            codec: JsonCodec,
            started: Instant::now(),
        });

        Ok(RelayServer { listener, state })
    }
}

impl Default for RelayServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A bound relay. Call [`run()`](Self::run) to start accepting connections.
pub struct RelayServer {
    listener: WebSocketListener,
    state: Arc<RelayState>,
}

impl RelayServer {
    pub fn builder() -> RelayServerBuilder {
        RelayServerBuilder::new()
    }

    /// Returns the local address the relay is bound to.
    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }

    /// Runs the accept loop until the process is terminated.
    ///
    /// Each connection gets its own handler task. A failed accept (for
    /// example a bad WebSocket upgrade) is logged and skipped.
    pub async fn run(mut self) -> Result<(), RelayError> {
        tracing::info!(addr = ?self.local_addr().ok(), "duelsync relay running");

        loop {
            match self.listener.accept().await {
                Ok(conn) => {
                    let state = Arc::clone(&self.state);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(conn, state).await {
                            tracing::debug!(error = %e, "connection ended with error");
                        }
                    });
                }
                Err(e) => {
                    tracing::error!(error = %e, "accept failed");
                }
            }
        }
    }
}
