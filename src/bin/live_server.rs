//! Binary that runs a local push server with in-memory tokens, prints a
//! demo session token, and broadcasts synthetic prices.
//!
//! # Usage
//!
//! ```sh
//! export CVT_LISTEN_ADDR="127.0.0.1:3000"
//! export CVT_DEMO_IDENTITY="demo-wallet"
//! cargo run --bin live_server --features cli
//! ```
//!
//! Then point `live_check` at it with the printed token.

use std::env;
use std::sync::Arc;

use cvt_live::auth::{MemoryTokenStore, TokenIssuer};
use cvt_live::constants::DEFAULT_LISTEN_ADDR;
use cvt_live::server::{MemorySnapshots, RealtimeServer};
use cvt_live::types::{Balance, Identity, PriceUpdate, UserSnapshot};

#[tokio::main]
async fn main() -> cvt_live::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let addr = env::var("CVT_LISTEN_ADDR").unwrap_or_else(|_| DEFAULT_LISTEN_ADDR.to_owned());
    let identity = Identity::new(env::var("CVT_DEMO_IDENTITY").unwrap_or_else(|_| "demo-wallet".to_owned()));

    let tokens = Arc::new(MemoryTokenStore::new());
    let snapshots = Arc::new(MemorySnapshots::new());
    let snapshot = UserSnapshot {
        wallet_address: identity.clone(),
        balance: Balance {
            sol: 12.5,
            usdt: 1_000.0,
            cvt: 50_000.0,
        },
        ..Default::default()
    };
    snapshots.insert(identity.clone(), serde_json::to_value(&snapshot)?);

    let server = RealtimeServer::builder(tokens.clone())
        .bind_addr(addr)
        .snapshots(snapshots)
        .build();
    let (bound, accept) = server.listen().await?;

    let token = tokens.issue(&identity);
    println!("Listening on ws://{bound}");
    println!("Demo identity: {identity}");
    println!("Session token: {token}");

    let start = std::time::Instant::now();
    let prices = server.spawn_price_broadcast(move || {
        let t = start.elapsed().as_secs_f64();
        Some(PriceUpdate {
            sol: 100.0 + 5.0 * (t / 60.0).sin(),
            cvt: 0.05 + 0.005 * (t / 45.0).cos(),
        })
    });

    tokio::signal::ctrl_c().await?;
    println!("\nShutting down…");
    prices.abort();
    accept.abort();

    Ok(())
}
