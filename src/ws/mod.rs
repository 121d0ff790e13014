//! Client half of the real-time channel.
//!
//! ## [`channel`]: `RealtimeChannel`
//!
//! One logical, authenticated connection per session. It reconnects with
//! exponential backoff (1 s, 2 s, 4 s, 8 s, 16 s by default) and sends a
//! `ping` envelope every 30 s while open. Inbound envelopes go to
//! subscribers registered per message type.
//!
//! ## Supporting modules
//!
//! - [`transport`]: the `Transport` seam and its tokio-tungstenite implementation
//! - [`subscriptions`]: the type-keyed handler table with isolated dispatch
//! - [`backoff`]: the retry counter and delay schedule
//!
//! ## Delivery
//!
//! Best-effort: `send` fails fast while disconnected, nothing is buffered
//! across reconnects, and pushes missed while offline are lost.

pub mod backoff;
pub mod channel;
mod driver;
pub mod subscriptions;
pub mod transport;

pub use channel::{ChannelConfig, ChannelNotice, ConnectionState, RealtimeChannel, RealtimeChannelBuilder};
