//! Reference values for the real-time channel.
//!
//! These are the defaults behind [`ChannelConfig`](crate::ws::channel::ChannelConfig)
//! and [`ServerConfig`](crate::server::ServerConfig); both can be overridden
//! through their builders.

// ---------------------------------------------------------------------------
// Endpoints
// ---------------------------------------------------------------------------

/// Default WebSocket endpoint for local development.
pub const WS_DEV_URL: &str = "ws://localhost:3000";

/// Production WebSocket endpoint.
pub const WS_PROD_URL: &str = "wss://ws.coinverse.com";

/// Query parameter carrying the session token on connect.
pub const TOKEN_QUERY_PARAM: &str = "token";

/// Default server bind address.
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:3000";

// ---------------------------------------------------------------------------
// Client channel timing
// ---------------------------------------------------------------------------

/// Upper bound on waiting for the transport to report "open" (milliseconds).
pub const CONNECT_TIMEOUT_MS: u64 = 5_000;

/// Base delay of the exponential reconnect backoff (milliseconds).
pub const RECONNECT_BASE_DELAY_MS: u64 = 1_000;

/// Automatic reconnect attempts before the channel reports "connection lost".
pub const MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Interval between client `ping` envelopes (milliseconds).
pub const HEARTBEAT_INTERVAL_MS: u64 = 30_000;

/// Shortest period accepted for any repeating timer. Shorter settings are raised to it.
pub const MIN_TIMER_PERIOD: std::time::Duration = std::time::Duration::from_millis(1);

/// Capacity of the notice broadcast channel.
pub const NOTICE_CHANNEL_CAPACITY: usize = 64;

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

/// Upper bound on a peer completing the WebSocket upgrade (milliseconds).
pub const HANDSHAKE_TIMEOUT_MS: u64 = 5_000;

/// Interval between protocol-level WebSocket pings sent by the server (milliseconds).
pub const SERVER_PING_INTERVAL_MS: u64 = 30_000;

/// Interval of the periodic price broadcast (milliseconds).
pub const PRICE_BROADCAST_INTERVAL_MS: u64 = 10_000;

/// Bounded outbound queue per connection; pushes beyond this are dropped.
pub const OUTBOUND_QUEUE_CAPACITY: usize = 256;

/// Lifetime of tokens issued by [`MemoryTokenStore`](crate::auth::MemoryTokenStore) (hours).
pub const TOKEN_TTL_HOURS: i64 = 24;

// ---------------------------------------------------------------------------
// Close codes
// ---------------------------------------------------------------------------

/// Close codes and reasons used by the server's authentication gate.
pub mod close {
    /// No credential supplied.
    pub const MISSING_CREDENTIAL: u16 = 4001;
    /// Reason text for [`MISSING_CREDENTIAL`].
    pub const MISSING_CREDENTIAL_REASON: &str = "Authentication required";
    /// Credential supplied but invalid or expired.
    pub const INVALID_CREDENTIAL: u16 = 4002;
    /// Reason text for [`INVALID_CREDENTIAL`].
    pub const INVALID_CREDENTIAL_REASON: &str = "Authentication failed";
}
