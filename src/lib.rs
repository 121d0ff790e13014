//! # cvt-live
//!
//! Real-time push channel for the CoinVerse dashboard: an auto-reconnecting
//! WebSocket client and the token-gated server registry that feeds it.
//!
//! ## Quick Start
//!
//! ```no_run
//! use cvt_live::auth::StaticToken;
//! use cvt_live::types::MessageType;
//! use cvt_live::ws::RealtimeChannel;
//! use cvt_live::ws::subscriptions::handler;
//!
//! #[tokio::main]
//! async fn main() -> cvt_live::Result<()> {
//!     let channel = RealtimeChannel::builder("ws://localhost:3000", StaticToken("token".into())).build()?;
//!     channel.subscribe(
//!         MessageType::PriceUpdate,
//!         &handler(|data| {
//!             println!("price: {data}");
//!             Ok(())
//!         }),
//!     );
//!     channel.connect().await?;
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod constants;
pub mod error;
pub mod server;
pub mod types;
pub mod ws;

/// Re-export the error type and Result alias.
pub use error::{LiveError, Result};
/// Re-export the two halves at crate root for convenience.
pub use server::RealtimeServer;
pub use ws::RealtimeChannel;
