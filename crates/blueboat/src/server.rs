//! `RoomServer` builder and server loop.
//!
//! Ties the layers together: transport → protocol → lifecycle → rooms,
//! and owns the shutdown sequence.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use blueboat_protocol::{Codec, JsonCodec, RoomOptions};
use blueboat_room::{DirectoryConfig, RoomDirectory, RoomHandler, RoomTypeRegistry};
use blueboat_store::{KeyValueStore, MemoryPubSub, MemoryStore, PubSub};
use blueboat_transport::{Incoming, Transport, WebSocketTransport};
use tokio::sync::watch;
use tokio::task::JoinSet;

use crate::handler::handle_connection;
use crate::signal::shutdown_signal;
use crate::{LifecycleManager, ServerConfig, ServerError, ShutdownReport, ShutdownTrigger};

/// The current protocol version. Clients must send this in their
/// handshake or be rejected.
pub const PROTOCOL_VERSION: u32 = 1;

/// Shared server state passed to each connection handler task.
pub(crate) struct ServerState<C: Codec> {
    pub(crate) lifecycle: Arc<LifecycleManager>,
    pub(crate) codec: C,
    pub(crate) config: ServerConfig,
    pub(crate) started: Instant,
}

impl<C: Codec> ServerState<C> {
    /// Milliseconds since the server started.
    pub(crate) fn server_time(&self) -> u64 {
        u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

/// Builder for configuring and starting a room server.
///
/// # Example
///
/// ```rust,no_run
/// use blueboat::prelude::*;
///
/// struct Lobby;
///
/// #[async_trait]
/// impl RoomHandler for Lobby {}
///
/// # async fn start() -> Result<(), ServerError> {
/// let mut defaults = RoomOptions::new();
/// defaults.insert("maxPlayers".into(), 4.into());
///
/// let server = RoomServer::builder()
///     .bind("0.0.0.0:8080")
///     .register_room("lobby", Lobby, defaults)
///     .build()
///     .await?;
/// server.run().await?;
/// # Ok(())
/// # }
/// ```
pub struct RoomServerBuilder {
    config: ServerConfig,
    registry: RoomTypeRegistry,
    store: Option<Arc<dyn KeyValueStore>>,
    pubsub: Option<Arc<dyn PubSub>>,
}

impl RoomServerBuilder {
    pub fn new() -> Self {
        Self {
            config: ServerConfig::default(),
            registry: RoomTypeRegistry::new(),
            store: None,
            pubsub: None,
        }
    }

    /// Replaces the whole configuration.
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn bind(mut self, addr: &str) -> Self {
        self.config.bind_addr = addr.to_string();
        self
    }

    pub fn directory_config(mut self, directory: DirectoryConfig) -> Self {
        self.config.directory = directory;
        self
    }

    pub fn dispose_timeout(mut self, timeout: Duration) -> Self {
        self.config.dispose_timeout = timeout;
        self
    }

    pub fn dispose_on_disconnect(mut self, enabled: bool) -> Self {
        self.config.dispose_on_disconnect = enabled;
        self
    }

    /// Registers a room type. Registering a name twice keeps the first.
    pub fn register_room<H: RoomHandler>(
        mut self,
        name: impl Into<String>,
        handler: H,
        default_options: RoomOptions,
    ) -> Self {
        self.registry.register(name, handler, default_options);
        self
    }

    /// The shared key-value store holding the room directory. Without one
    /// the server keeps its directory in memory, visible to this process
    /// only.
    pub fn store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// The pub/sub bus for room events. In-memory if not set.
    pub fn pubsub(mut self, pubsub: Arc<dyn PubSub>) -> Self {
        self.pubsub = Some(pubsub);
        self
    }

    /// Binds the listener and assembles the server.
    pub async fn build(self) -> Result<RoomServer, ServerError> {
        let store = self.store.unwrap_or_else(|| {
            tracing::info!("no shared store configured, room directory is process-local");
            Arc::new(MemoryStore::new())
        });
        let pubsub = self
            .pubsub
            .unwrap_or_else(|| Arc::new(MemoryPubSub::new()));

        let directory = RoomDirectory::new(store, pubsub, self.config.directory.clone());
        let lifecycle = Arc::new(LifecycleManager::new(
            Arc::new(self.registry),
            directory,
            self.config.dispose_timeout,
        ));

        let transport = WebSocketTransport::bind(&self.config.bind_addr).await?;

        let state = Arc::new(ServerState {
            lifecycle,
            codec: JsonCodec,
            config: self.config,
            started: Instant::now(),
        });

        Ok(RoomServer { transport, state })
    }
}

impl Default for RoomServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A bound room server.
///
/// Call [`run()`](Self::run) to start accepting connections.
pub struct RoomServer {
    transport: WebSocketTransport,
    state: Arc<ServerState<JsonCodec>>,
}

impl RoomServer {
    pub fn builder() -> RoomServerBuilder {
        RoomServerBuilder::new()
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.transport.local_addr()?)
    }

    /// The manager owning this server's rooms.
    pub fn lifecycle(&self) -> Arc<LifecycleManager> {
        Arc::clone(&self.state.lifecycle)
    }

    /// Serves until a termination signal arrives, then shuts down.
    ///
    /// See [`run_until`](Self::run_until).
    pub async fn run(self) -> Result<ShutdownReport, ServerError> {
        self.run_until(shutdown_signal()).await
    }

    /// Serves until `shutdown` resolves or the listener fails.
    ///
    /// Shutdown closes the listener, disposes every room this process
    /// owns, then tells connected clients goodbye. A shutdown caused by a
    /// listener failure still drains, then returns [`ServerError::Fatal`].
    pub async fn run_until<F>(mut self, shutdown: F) -> Result<ShutdownReport, ServerError>
    where
        F: Future<Output = ShutdownTrigger>,
    {
        let (closing_tx, closing_rx) = watch::channel(false);
        let mut connections = JoinSet::new();
        tokio::pin!(shutdown);

        let addr = self.transport.local_addr()?;
        tracing::info!(
            %addr,
            room_types = ?self.state.lifecycle.registry().names(),
            "room server running"
        );

        let trigger = loop {
            tokio::select! {
                trigger = &mut shutdown => break trigger,

                accepted = self.transport.accept() => match accepted {
                    Ok(incoming) => {
                        while connections.try_join_next().is_some() {}
                        let state = Arc::clone(&self.state);
                        let closing = closing_rx.clone();
                        connections.spawn(async move {
                            let peer = incoming.peer_addr();
                            let conn = match incoming.upgrade().await {
                                Ok(conn) => conn,
                                Err(e) => {
                                    tracing::debug!(%peer, error = %e, "WebSocket upgrade failed");
                                    return;
                                }
                            };
                            if let Err(e) = handle_connection(conn, state, closing).await {
                                tracing::debug!(error = %e, "connection ended with error");
                            }
                        });
                    }
                    Err(e) if e.is_fatal() => {
                        break ShutdownTrigger::Fatal(e.to_string());
                    }
                    Err(e) => {
                        tracing::debug!(error = %e, "dropped connection during accept");
                    }
                },
            }
        };

        if let Err(e) = self.transport.shutdown().await {
            tracing::warn!(error = %e, "failed to close listener");
        }

        let report = self.state.lifecycle.shutdown(trigger.clone()).await;

        // Rooms are gone; now let the connections go.
        let _ = closing_tx.send(true);
        let drained = tokio::time::timeout(self.state.config.drain_timeout, async {
            while connections.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            tracing::debug!(
                remaining = connections.len(),
                "connections still open after drain timeout, aborting"
            );
            connections.shutdown().await;
        }

        match trigger {
            ShutdownTrigger::Fatal(reason) => Err(ServerError::Fatal(reason)),
            _ => Ok(report),
        }
    }
}
