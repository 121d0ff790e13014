//! Auto-reconnecting real-time channel.
//!
//! [`RealtimeChannel`] keeps one logical connection to the push server,
//! re-establishes it after failures with exponential backoff, sends a
//! `ping` envelope on a fixed heartbeat, and dispatches decoded envelopes to
//! subscribers registered per message type.
//!
//! # Architecture
//!
//! ```text
//!   RealtimeChannel (handle)          ChannelDriver (tokio task)
//!   connect / send / subscribe ──►  command queue ──► select! loop
//!   state()      ◄── watch ◄──────────────────────────┤  ├─ Transport (connect, frames)
//!   notices()    ◄── broadcast ◄──────────────────────┘  ├─ heartbeat interval
//!                                                        └─ backoff deadline
//! ```
//!
//! # Example
//!
//! ```no_run
//! use cvt_live::auth::StaticToken;
//! use cvt_live::types::{MessageType, StakingUpdate};
//! use cvt_live::ws::channel::RealtimeChannel;
//! use cvt_live::ws::subscriptions::typed_handler;
//!
//! # #[tokio::main]
//! # async fn main() -> cvt_live::error::Result<()> {
//! let channel = RealtimeChannel::builder("wss://ws.coinverse.com", StaticToken("jwt".into()))
//!     .max_reconnect_attempts(5)
//!     .build()?;
//!
//! channel.subscribe(
//!     MessageType::StakingUpdate,
//!     &typed_handler(|update: StakingUpdate| {
//!         println!("staked: {}", update.staked_amount);
//!         Ok(())
//!     }),
//! );
//!
//! let state = channel.connect().await?;
//! println!("channel is {state:?}");
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot, watch};

use crate::auth::TokenProvider;
use crate::constants::{
    CONNECT_TIMEOUT_MS, HEARTBEAT_INTERVAL_MS, MAX_RECONNECT_ATTEMPTS, MIN_TIMER_PERIOD,
    NOTICE_CHANNEL_CAPACITY, RECONNECT_BASE_DELAY_MS,
};
use crate::error::{LiveError, Result};
use crate::types::{Envelope, MessageType};
use crate::ws::driver::{ChannelDriver, Command};
use crate::ws::subscriptions::Handler;
use crate::ws::transport::{Transport, WsTransport};

// ---------------------------------------------------------------------------
// State & notices
// ---------------------------------------------------------------------------

/// Lifecycle state of the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Constructed, or cleanly disconnected by the caller.
    Idle,
    /// A connection attempt is in flight.
    Connecting,
    /// Connected; heartbeat running.
    Open,
    /// A caller-requested close is in progress.
    Closing,
    /// Waiting out a backoff delay before the next attempt.
    Reconnecting,
    /// Retries exhausted; only a manual `connect()` recovers.
    Failed,
    /// Disposed; the channel accepts no further commands.
    Disposed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closing => "closing",
            Self::Reconnecting => "reconnecting",
            Self::Failed => "failed",
            Self::Disposed => "disposed",
        };
        f.write_str(name)
    }
}

/// User-visible notifications raised by the channel.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelNotice {
    /// The connection opened.
    Connected,
    /// A retry is scheduled.
    Reconnecting {
        /// Retry number (1-based).
        attempt: u32,
        /// Wait before the retry.
        delay: Duration,
    },
    /// The server sent an `error` envelope.
    ServerError {
        /// The server's message.
        message: String,
    },
    /// Retries are exhausted: "Connection lost. Please refresh the page."
    ConnectionLost {
        /// Retries performed before giving up.
        attempts: u32,
    },
    /// The token provider stopped yielding a token during reconnection.
    CredentialsUnavailable,
    /// The server closed the link with an authentication close code.
    /// Rejected links do not refill the retry budget.
    CredentialsRejected {
        /// 4001 (missing) or 4002 (invalid or expired).
        code: u16,
    },
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Configuration for [`RealtimeChannel`].
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// WebSocket endpoint (used by [`RealtimeChannelBuilder::build`]).
    pub url: String,
    /// Upper bound on waiting for the transport to open.
    pub connect_timeout: Duration,
    /// Delay before the first retry; doubles per retry.
    pub reconnect_base_delay: Duration,
    /// Retries before reporting "connection lost".
    pub max_reconnect_attempts: u32,
    /// Interval between `ping` envelopes while open.
    pub heartbeat_interval: Duration,
    /// Capacity of the notice broadcast channel.
    pub notice_capacity: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            url: crate::constants::WS_DEV_URL.to_owned(),
            connect_timeout: Duration::from_millis(CONNECT_TIMEOUT_MS),
            reconnect_base_delay: Duration::from_millis(RECONNECT_BASE_DELAY_MS),
            max_reconnect_attempts: MAX_RECONNECT_ATTEMPTS,
            heartbeat_interval: Duration::from_millis(HEARTBEAT_INTERVAL_MS),
            notice_capacity: NOTICE_CHANNEL_CAPACITY,
        }
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builder for a [`RealtimeChannel`].
///
/// # Example
///
/// ```no_run
/// use std::time::Duration;
/// use cvt_live::ws::channel::RealtimeChannel;
///
/// # #[tokio::main]
/// # async fn main() -> cvt_live::error::Result<()> {
/// let channel = RealtimeChannel::builder("ws://localhost:3000", || std::env::var("TOKEN").ok())
///     .connect_timeout(Duration::from_secs(3))
///     .heartbeat_interval(Duration::from_secs(15))
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct RealtimeChannelBuilder<P> {
    tokens: P,
    config: ChannelConfig,
}

impl<P: TokenProvider> RealtimeChannelBuilder<P> {
    /// Create a builder for `url` with default timing.
    pub fn new(url: impl Into<String>, tokens: P) -> Self {
        Self {
            tokens,
            config: ChannelConfig {
                url: url.into(),
                ..ChannelConfig::default()
            },
        }
    }

    /// Set the connect timeout. Default: 5 s.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Set the base reconnect delay. Default: 1 s.
    pub fn reconnect_base_delay(mut self, delay: Duration) -> Self {
        self.config.reconnect_base_delay = delay;
        self
    }

    /// Set the retry ceiling. Default: 5.
    pub fn max_reconnect_attempts(mut self, n: u32) -> Self {
        self.config.max_reconnect_attempts = n;
        self
    }

    /// Set the heartbeat interval. Default: 30 s. Floored at 1 ms.
    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.config.heartbeat_interval = interval.max(MIN_TIMER_PERIOD);
        self
    }

    /// Set the notice channel capacity. Default: 64.
    pub fn notice_capacity(mut self, cap: usize) -> Self {
        self.config.notice_capacity = cap.max(1);
        self
    }

    /// Build a channel over [`WsTransport`].
    ///
    /// Must be called inside a Tokio runtime.
    pub fn build(self) -> Result<RealtimeChannel> {
        let transport = WsTransport::new(&self.config.url)?;
        Ok(self.build_with_transport(transport))
    }

    /// Build a channel over a custom transport.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn build_with_transport<T: Transport>(self, transport: T) -> RealtimeChannel {
        RealtimeChannel::spawn(Arc::new(transport), self.tokens, self.config)
    }
}

// ---------------------------------------------------------------------------
// RealtimeChannel
// ---------------------------------------------------------------------------

/// Handle to the real-time channel.
///
/// Construct one per session and pass it by reference to whatever needs to
/// subscribe. Dropping the handle disposes the channel.
pub struct RealtimeChannel {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
    notices: broadcast::Sender<ChannelNotice>,
    config: ChannelConfig,
}

impl RealtimeChannel {
    /// Start building a channel for `url`.
    pub fn builder<P: TokenProvider>(url: impl Into<String>, tokens: P) -> RealtimeChannelBuilder<P> {
        RealtimeChannelBuilder::new(url, tokens)
    }

    fn spawn<T: Transport, P: TokenProvider>(
        transport: Arc<T>,
        tokens: P,
        config: ChannelConfig,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Idle);
        let (notice_tx, _) = broadcast::channel(config.notice_capacity);

        let driver = ChannelDriver::new(
            transport,
            tokens,
            config.clone(),
            cmd_rx,
            state_tx,
            notice_tx.clone(),
        );
        tokio::spawn(driver.run());

        Self {
            commands: cmd_tx,
            state: state_rx,
            notices: notice_tx,
            config,
        }
    }

    /// Open the connection.
    ///
    /// Fails immediately with [`LiveError::MissingToken`] if the token
    /// provider has nothing to offer; no attempt is made in that case.
    /// Otherwise it resolves once the first attempt settles and returns
    /// the resulting state: `Open`, `Reconnecting` (the attempt failed and a
    /// retry is scheduled) or `Failed`. Transport failures are never
    /// returned as errors; they feed the reconnection policy.
    ///
    /// Calling this after the channel reached `Failed` resets the retry
    /// budget and tries again.
    pub async fn connect(&self) -> Result<ConnectionState> {
        let (tx, rx) = oneshot::channel();
        self.command(Command::Connect(tx))?;
        rx.await.map_err(|_| LiveError::Disposed)?
    }

    /// Close the connection cleanly. No reconnection follows; subscriptions
    /// are kept so a later [`connect`](Self::connect) resumes delivery.
    pub async fn disconnect(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.command(Command::Disconnect(tx))?;
        rx.await.map_err(|_| LiveError::Disposed)
    }

    /// Stop timers, close cleanly, clear subscriptions and shut the channel
    /// down. No handler runs after this returns.
    pub async fn dispose(&self) {
        let (tx, rx) = oneshot::channel();
        if self.command(Command::Dispose(tx)).is_ok() {
            let _ = rx.await;
        }
    }

    /// Best-effort send. Returns `false` without queueing if the channel is
    /// not open.
    pub async fn send(&self, envelope: Envelope) -> bool {
        let (tx, rx) = oneshot::channel();
        if self.command(Command::Send(envelope, tx)).is_err() {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    /// Register `handler` for envelopes of type `kind`. Registering the same
    /// handler twice has no effect.
    pub fn subscribe(&self, kind: impl Into<MessageType>, handler: &Handler) {
        let _ = self.command(Command::Subscribe(kind.into(), Arc::clone(handler)));
    }

    /// Deregister `handler` for `kind`.
    pub fn unsubscribe(&self, kind: impl Into<MessageType>, handler: &Handler) {
        let _ = self.command(Command::Unsubscribe(kind.into(), Arc::clone(handler)));
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Whether the channel is open.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// A receiver that observes every state transition.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Subscribe to user-visible notices.
    pub fn notices(&self) -> broadcast::Receiver<ChannelNotice> {
        self.notices.subscribe()
    }

    /// The configuration this channel was built with.
    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    fn command(&self, cmd: Command) -> Result<()> {
        self.commands.send(cmd).map_err(|_| LiveError::Disposed)
    }
}

impl fmt::Debug for RealtimeChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RealtimeChannel")
            .field("state", &self.state())
            .field("url", &self.config.url)
            .finish()
    }
}
