//! Push sources that drive the registry from outside a session.
//!
//! The periodic price broadcast runs on its own task. The targeted helpers
//! are what a REST handler calls after a mutation it wants reflected live.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::registry::ConnectionRegistry;
use crate::constants::MIN_TIMER_PERIOD;
use crate::error::Result;
use crate::types::{AirdropUpdate, Envelope, MessageType, PresaleUpdate, PriceUpdate, StakingUpdate};

/// Produces the current `{sol, cvt}` quote for the periodic broadcast.
///
/// `None` skips that tick.
pub trait PriceSource: Send + Sync + 'static {
    fn sample(&self) -> Option<PriceUpdate>;
}

impl<F> PriceSource for F
where
    F: Fn() -> Option<PriceUpdate> + Send + Sync + 'static,
{
    fn sample(&self) -> Option<PriceUpdate> {
        self()
    }
}

/// Broadcast a `price_update` to every open connection each `period`.
///
/// The first push happens one period after spawn. Abort the handle to stop.
pub fn spawn_price_broadcast<P: PriceSource>(
    registry: Arc<ConnectionRegistry>,
    source: P,
    period: Duration,
) -> JoinHandle<()> {
    let period = period.max(MIN_TIMER_PERIOD);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            let _ = ticker.tick().await;
            let Some(price) = source.sample() else {
                debug!("Price source had no sample");
                continue;
            };
            match Envelope::from_payload(MessageType::PriceUpdate, &price) {
                Ok(env) => {
                    let _ = registry.broadcast(&env).await;
                }
                Err(e) => warn!(error = %e, "Failed to encode price update"),
            }
        }
    })
}

/// Push a `staking_update` to `identity` only. Returns whether it was queued.
pub async fn push_staking_update(registry: &ConnectionRegistry, identity: &str, update: &StakingUpdate) -> Result<bool> {
    let env = Envelope::from_payload(MessageType::StakingUpdate, update)?;
    Ok(registry.send_to_client(identity, &env).await)
}

/// Push a `presale_update` to `identity` only.
pub async fn push_presale_update(registry: &ConnectionRegistry, identity: &str, update: &PresaleUpdate) -> Result<bool> {
    let env = Envelope::from_payload(MessageType::PresaleUpdate, update)?;
    Ok(registry.send_to_client(identity, &env).await)
}

/// Push an `airdrop_update` to `identity` only.
pub async fn push_airdrop_update(registry: &ConnectionRegistry, identity: &str, update: &AirdropUpdate) -> Result<bool> {
    let env = Envelope::from_payload(MessageType::AirdropUpdate, update)?;
    Ok(registry.send_to_client(identity, &env).await)
}

/// Push a non-fatal `error` notice to `identity`.
pub async fn push_error(registry: &ConnectionRegistry, identity: &str, message: &str) -> bool {
    registry.send_to_client(identity, &Envelope::error(message)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::registry::ClientConnection;
    use tokio::sync::mpsc;
    use tokio_tungstenite::tungstenite::Message;

    fn decode(msg: Message) -> Envelope {
        match msg {
            Message::Text(t) => Envelope::decode(t.as_str()).unwrap(),
            other => panic!("expected text frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn staking_push_is_camel_case() {
        let registry = ConnectionRegistry::new();
        let (tx, mut rx) = mpsc::channel(4);
        registry.register(Arc::new(ClientConnection::new("abc".into(), tx))).await;

        let update = StakingUpdate {
            staked_amount: 150.0,
            rewards: 2.5,
            ..Default::default()
        };
        assert!(push_staking_update(&registry, "abc", &update).await.unwrap());
        let env = decode(rx.try_recv().unwrap());
        assert_eq!(env.kind, MessageType::StakingUpdate);
        assert_eq!(env.data["stakedAmount"], 150.0);
        assert_eq!(env.data["rewards"], 2.5);
    }

    #[tokio::test]
    async fn push_to_offline_identity_is_not_an_error() {
        let registry = ConnectionRegistry::new();
        let delivered = push_airdrop_update(&registry, "ghost", &AirdropUpdate::default()).await.unwrap();
        assert!(!delivered);
        assert!(!push_error(&registry, "ghost", "nope").await);
    }

    #[tokio::test(start_paused = true)]
    async fn price_broadcast_runs_each_period() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (tx, mut rx) = mpsc::channel(8);
        registry.register(Arc::new(ClientConnection::new("abc".into(), tx))).await;

        let handle = spawn_price_broadcast(
            registry.clone(),
            || Some(PriceUpdate { sol: 100.0, cvt: 0.05 }),
            Duration::from_secs(10),
        );

        tokio::time::sleep(Duration::from_secs(9)).await;
        assert!(rx.try_recv().is_err());

        tokio::time::sleep(Duration::from_secs(2)).await;
        let env = decode(rx.try_recv().unwrap());
        assert_eq!(env.kind, MessageType::PriceUpdate);
        assert_eq!(env.data["sol"], 100.0);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(rx.try_recv().is_ok());
        handle.abort();
    }
}
