//! Server half of the real-time channel.
//!
//! [`RealtimeServer`] accepts WebSocket connections, closes any that lack a
//! valid session token (4001 missing, 4002 invalid or expired), registers
//! the rest by [`Identity`](crate::types::Identity), and exposes the
//! push primitives the REST layer calls after mutations.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use cvt_live::auth::{MemoryTokenStore, TokenIssuer};
//! use cvt_live::server::RealtimeServer;
//! use cvt_live::types::Envelope;
//!
//! # #[tokio::main]
//! # async fn main() -> cvt_live::error::Result<()> {
//! let tokens = Arc::new(MemoryTokenStore::new());
//! let server = RealtimeServer::builder(tokens.clone())
//!     .bind_addr("127.0.0.1:3000")
//!     .build();
//! let (addr, _handle) = server.listen().await?;
//! println!("listening on {addr}, token {}", tokens.issue(&"abc".into()));
//!
//! server
//!     .send_to_client("abc", &Envelope::new("staking_update", serde_json::json!({"stakedAmount": 150})))
//!     .await;
//! # Ok(())
//! # }
//! ```

pub mod push;
pub mod registry;
mod session;
pub mod snapshot;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::auth::TokenVerifier;
use crate::constants::{
    DEFAULT_LISTEN_ADDR, HANDSHAKE_TIMEOUT_MS, MIN_TIMER_PERIOD, OUTBOUND_QUEUE_CAPACITY,
    PRICE_BROADCAST_INTERVAL_MS, SERVER_PING_INTERVAL_MS,
};
use crate::error::Result;
use crate::types::Envelope;

pub use push::PriceSource;
pub use registry::{ClientConnection, ConnectionRegistry, Topic};
pub use session::token_from_query;
pub use snapshot::{MemorySnapshots, NoSnapshots, SnapshotSource};

use session::SessionContext;

/// Configuration for [`RealtimeServer`].
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address [`RealtimeServer::listen`] binds.
    pub bind_addr: String,
    /// Per-connection outbound queue depth; pushes beyond it are dropped.
    pub outbound_capacity: usize,
    /// How long a new TCP peer has to finish the WebSocket upgrade.
    pub handshake_timeout: Duration,
    /// Interval between protocol-level pings to each client.
    pub ping_interval: Duration,
    /// Period of the price broadcast started by
    /// [`RealtimeServer::spawn_price_broadcast`].
    pub price_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_LISTEN_ADDR.to_owned(),
            outbound_capacity: OUTBOUND_QUEUE_CAPACITY,
            handshake_timeout: Duration::from_millis(HANDSHAKE_TIMEOUT_MS),
            ping_interval: Duration::from_millis(SERVER_PING_INTERVAL_MS),
            price_interval: Duration::from_millis(PRICE_BROADCAST_INTERVAL_MS),
        }
    }
}

/// Builder for [`RealtimeServer`].
pub struct RealtimeServerBuilder {
    config: ServerConfig,
    verifier: Arc<dyn TokenVerifier>,
    snapshots: Arc<dyn SnapshotSource>,
}

impl RealtimeServerBuilder {
    pub fn bind_addr(mut self, addr: impl Into<String>) -> Self {
        self.config.bind_addr = addr.into();
        self
    }

    pub fn outbound_capacity(mut self, capacity: usize) -> Self {
        self.config.outbound_capacity = capacity;
        self
    }

    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.config.handshake_timeout = timeout;
        self
    }

    /// Floored at 1 ms.
    pub fn ping_interval(mut self, interval: Duration) -> Self {
        self.config.ping_interval = interval.max(MIN_TIMER_PERIOD);
        self
    }

    /// Floored at 1 ms.
    pub fn price_interval(mut self, interval: Duration) -> Self {
        self.config.price_interval = interval.max(MIN_TIMER_PERIOD);
        self
    }

    /// Source of the `user_data` snapshot pushed after authentication.
    pub fn snapshots(mut self, source: Arc<dyn SnapshotSource>) -> Self {
        self.snapshots = source;
        self
    }

    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> RealtimeServer {
        let registry = Arc::new(ConnectionRegistry::new());
        let ctx = Arc::new(SessionContext {
            registry: registry.clone(),
            verifier: self.verifier,
            snapshots: self.snapshots,
            outbound_capacity: self.config.outbound_capacity,
            handshake_timeout: self.config.handshake_timeout,
            ping_interval: self.config.ping_interval,
        });
        RealtimeServer {
            config: self.config,
            registry,
            ctx,
        }
    }
}

/// WebSocket push server.
pub struct RealtimeServer {
    config: ServerConfig,
    registry: Arc<ConnectionRegistry>,
    ctx: Arc<SessionContext>,
}

impl RealtimeServer {
    /// Start building a server that authenticates with `verifier`.
    pub fn builder(verifier: Arc<dyn TokenVerifier>) -> RealtimeServerBuilder {
        RealtimeServerBuilder {
            config: ServerConfig::default(),
            verifier,
            snapshots: Arc::new(NoSnapshots),
        }
    }

    /// Bind `config.bind_addr` and accept connections on a background task.
    ///
    /// Returns the bound address (useful with port 0) and the accept task.
    pub async fn listen(&self) -> Result<(SocketAddr, JoinHandle<()>)> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        let addr = listener.local_addr()?;
        info!(%addr, "Realtime server listening");
        let handle = tokio::spawn(accept_loop(listener, self.ctx.clone()));
        Ok((addr, handle))
    }

    /// Accept connections on an existing listener until the task is dropped.
    pub async fn serve(&self, listener: TcpListener) {
        accept_loop(listener, self.ctx.clone()).await;
    }

    /// The shared connection registry.
    pub fn registry(&self) -> Arc<ConnectionRegistry> {
        self.registry.clone()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// See [`ConnectionRegistry::send_to_client`].
    pub async fn send_to_client(&self, identity: &str, envelope: &Envelope) -> bool {
        self.registry.send_to_client(identity, envelope).await
    }

    /// See [`ConnectionRegistry::broadcast`].
    pub async fn broadcast(&self, envelope: &Envelope) -> usize {
        self.registry.broadcast(envelope).await
    }

    /// Start the periodic `price_update` broadcast at `config.price_interval`.
    pub fn spawn_price_broadcast<P: PriceSource>(&self, source: P) -> JoinHandle<()> {
        push::spawn_price_broadcast(self.registry.clone(), source, self.config.price_interval)
    }
}

impl std::fmt::Debug for RealtimeServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeServer")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

async fn accept_loop(listener: TcpListener, ctx: Arc<SessionContext>) {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!(error = %e, "Accept failed");
                continue;
            }
        };
        debug!(%peer, "Accepted TCP connection");
        let ctx = ctx.clone();
        tokio::spawn(async move {
            if let Err(e) = session::run_session(stream, peer, ctx).await {
                debug!(%peer, error = %e, "Session ended with error");
            }
        });
    }
}
