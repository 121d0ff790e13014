//! Binary to connect a `RealtimeChannel` to a push server and print every
//! update it receives for 30 seconds.
//!
//! # Usage
//!
//! ```sh
//! export CVT_WS_URL="ws://localhost:3000"
//! export CVT_SESSION_TOKEN="your-session-token"
//! cargo run --bin live_check --features cli
//! ```
//!
//! Without `CVT_WS_URL` the local endpoint is used, or the production one
//! when `CVT_ENV=production`.

use std::env;
use std::time::Duration;

use cvt_live::auth::StaticToken;
use cvt_live::constants::{WS_DEV_URL, WS_PROD_URL};
use cvt_live::types::{AirdropUpdate, MessageType, PresaleUpdate, PriceUpdate, StakingUpdate};
use cvt_live::ws::RealtimeChannel;
use cvt_live::ws::subscriptions::{handler, typed_handler};
use tokio::time;

#[tokio::main]
async fn main() -> cvt_live::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let url = env::var("CVT_WS_URL").unwrap_or_else(|_| {
        match env::var("CVT_ENV").as_deref() {
            Ok("production") => WS_PROD_URL,
            _ => WS_DEV_URL,
        }
        .to_owned()
    });
    let token = env::var("CVT_SESSION_TOKEN").expect("set CVT_SESSION_TOKEN env var before running");

    let channel = RealtimeChannel::builder(url.as_str(), StaticToken(token)).build()?;

    let on_price = typed_handler(|p: PriceUpdate| {
        println!("price     sol={:.2} cvt={:.4}", p.sol, p.cvt);
        Ok(())
    });
    let on_staking = typed_handler(|s: StakingUpdate| {
        println!("staking   staked={} rewards={}", s.staked_amount, s.rewards);
        Ok(())
    });
    let on_presale = typed_handler(|p: PresaleUpdate| {
        println!("presale   bought={} invested={}", p.tokens_bought, p.total_invested);
        Ok(())
    });
    let on_airdrop = typed_handler(|a: AirdropUpdate| {
        println!("airdrop   claimed={} amount={}", a.claimed, a.amount);
        Ok(())
    });
    let on_snapshot = handler(|data| {
        println!("user_data {data:#}");
        Ok(())
    });
    channel.subscribe(MessageType::PriceUpdate, &on_price);
    channel.subscribe(MessageType::StakingUpdate, &on_staking);
    channel.subscribe(MessageType::PresaleUpdate, &on_presale);
    channel.subscribe(MessageType::AirdropUpdate, &on_airdrop);
    channel.subscribe(MessageType::UserData, &on_snapshot);

    let mut notices = channel.notices();

    println!("Connecting to {url}…");
    let state = channel.connect().await?;
    println!("Channel is {state}");
    println!("Listening for updates for 30 seconds…\n");

    let deadline = time::sleep(Duration::from_secs(30));
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline => {
                println!("\n30 seconds elapsed, disposing…");
                break;
            }
            notice = notices.recv() => {
                match notice {
                    Ok(n) => println!("notice    {n:?}"),
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        eprintln!("missed {n} notices");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    channel.dispose().await;
    println!("Done.");

    Ok(())
}
