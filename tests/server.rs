//! Loopback tests for `RealtimeServer`: the token gate, the registry and the
//! inbound protocol, driven by a plain tokio-tungstenite client.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use cvt_live::auth::{MemoryTokenStore, TokenIssuer};
use cvt_live::server::{ConnectionRegistry, MemorySnapshots, RealtimeServer, RealtimeServerBuilder, Topic};
use cvt_live::types::{Envelope, MessageType};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct Harness {
    server: RealtimeServer,
    tokens: Arc<MemoryTokenStore>,
    snapshots: Arc<MemorySnapshots>,
    addr: SocketAddr,
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

async fn start() -> Harness {
    start_with(Arc::new(MemoryTokenStore::new())).await
}

async fn start_with(tokens: Arc<MemoryTokenStore>) -> Harness {
    start_configured(tokens, |b| b).await
}

async fn start_configured(
    tokens: Arc<MemoryTokenStore>,
    configure: impl FnOnce(RealtimeServerBuilder) -> RealtimeServerBuilder,
) -> Harness {
    init_tracing();
    let snapshots = Arc::new(MemorySnapshots::new());
    let builder = RealtimeServer::builder(tokens.clone())
        .bind_addr("127.0.0.1:0")
        .snapshots(snapshots.clone());
    let server = configure(builder).build();
    let (addr, _handle) = server.listen().await.expect("bind loopback");
    Harness {
        server,
        tokens,
        snapshots,
        addr,
    }
}

impl Harness {
    async fn connect_raw(&self, query: &str) -> Client {
        let (ws, _) = connect_async(format!("ws://{}/{query}", self.addr))
            .await
            .expect("handshake");
        ws
    }

    /// Connect as `identity` and wait until the registry has the connection.
    async fn connect_as(&self, identity: &str) -> Client {
        let token = self.tokens.issue(&identity.into());
        let before = self.server.registry().get(identity).await.map(|c| c.id);
        let ws = self.connect_raw(&format!("?token={token}")).await;
        let registry = &self.server.registry();
        wait_until(|| async move {
            registry.get(identity).await.map(|c| c.id).is_some_and(|id| Some(id) != before)
        })
        .await;
        ws
    }
}

async fn wait_until<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return;
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within 2s");
}

/// Next text frame as an envelope, skipping control frames.
async fn next_envelope(ws: &mut Client) -> Option<Envelope> {
    let read = async {
        while let Some(Ok(msg)) = ws.next().await {
            if let Message::Text(text) = msg {
                return Some(Envelope::decode(text.as_str()).expect("server sent valid envelope"));
            }
        }
        None
    };
    timeout(Duration::from_millis(500), read).await.ok().flatten()
}

/// The close frame the server ends the connection with.
async fn close_frame(ws: &mut Client) -> (u16, String) {
    let read = async {
        while let Some(Ok(msg)) = ws.next().await {
            if let Message::Close(Some(frame)) = msg {
                return Some((u16::from(frame.code), frame.reason.as_str().to_owned()));
            }
        }
        None
    };
    timeout(Duration::from_secs(2), read)
        .await
        .ok()
        .flatten()
        .expect("server closed without a close frame")
}

async fn send(ws: &mut Client, text: &str) {
    ws.send(Message::Text(text.to_owned().into())).await.expect("client send");
}

// ---------------------------------------------------------------------------
// Token gate
// ---------------------------------------------------------------------------

#[tokio::test]
async fn missing_token_closes_with_4001() {
    let h = start().await;
    let mut ws = h.connect_raw("").await;

    assert_eq!(close_frame(&mut ws).await, (4001, "Authentication required".into()));
    assert_eq!(h.server.registry().connection_count().await, 0);
}

#[tokio::test]
async fn empty_token_counts_as_missing() {
    let h = start().await;
    let mut ws = h.connect_raw("?token=").await;

    assert_eq!(close_frame(&mut ws).await.0, 4001);
}

#[tokio::test]
async fn invalid_token_closes_with_4002() {
    let h = start().await;
    let mut ws = h.connect_raw("?token=not-a-real-token").await;

    assert_eq!(close_frame(&mut ws).await, (4002, "Authentication failed".into()));
    assert_eq!(h.server.registry().connection_count().await, 0);
}

#[tokio::test]
async fn expired_token_closes_with_4002() {
    let h = start_with(Arc::new(MemoryTokenStore::with_ttl(chrono::Duration::zero()))).await;
    let token = h.tokens.issue(&"abc".into());
    let mut ws = h.connect_raw(&format!("?token={token}")).await;

    assert_eq!(close_frame(&mut ws).await.0, 4002);
    assert!(!h.server.registry().contains("abc").await);
}

#[tokio::test]
async fn stalled_upgrade_is_dropped() {
    let h = start_configured(Arc::new(MemoryTokenStore::new()), |b| {
        b.handshake_timeout(Duration::from_millis(200))
    })
    .await;
    // Plain TCP that never sends an HTTP upgrade request.
    let mut stream = TcpStream::connect(h.addr).await.unwrap();

    let mut buf = [0u8; 64];
    let read = timeout(Duration::from_secs(2), stream.read(&mut buf))
        .await
        .expect("server held a stalled socket open");
    assert!(matches!(read, Ok(0) | Err(_)));
    assert_eq!(h.server.registry().connection_count().await, 0);
}

#[tokio::test]
async fn revoked_token_is_rejected() {
    let h = start().await;
    let token = h.tokens.issue(&"abc".into());
    assert!(h.tokens.revoke(&token));
    let mut ws = h.connect_raw(&format!("?token={token}")).await;

    assert_eq!(close_frame(&mut ws).await.0, 4002);
}

// ---------------------------------------------------------------------------
// Registration and snapshot
// ---------------------------------------------------------------------------

#[tokio::test]
async fn valid_token_registers_and_pushes_snapshot() {
    let h = start().await;
    h.snapshots
        .insert("abc".into(), json!({"walletAddress": "abc", "balance": {"sol": 1.5}}));

    let token = h.tokens.issue(&"abc".into());
    let mut ws = h.connect_raw(&format!("?token={token}")).await;

    let env = next_envelope(&mut ws).await.expect("snapshot");
    assert_eq!(env.kind, MessageType::UserData);
    assert_eq!(env.data["balance"]["sol"], 1.5);
    assert!(h.server.registry().contains("abc").await);
}

#[tokio::test]
async fn missing_snapshot_keeps_connection_open() {
    let h = start().await;
    let mut ws = h.connect_as("no-record").await;

    send(&mut ws, r#"{"type":"ping"}"#).await;
    assert_eq!(next_envelope(&mut ws).await.map(|e| e.kind), Some(MessageType::Pong));
}

#[tokio::test]
async fn close_unregisters_identity() {
    let h = start().await;
    let mut ws = h.connect_as("abc").await;

    ws.close(None).await.unwrap();
    let registry = &h.server.registry();
    wait_until(|| async move { !registry.contains("abc").await }).await;
}

// ---------------------------------------------------------------------------
// Inbound protocol
// ---------------------------------------------------------------------------

#[tokio::test]
async fn ping_is_answered_with_pong() {
    let h = start().await;
    let mut ws = h.connect_as("abc").await;

    send(&mut ws, r#"{"type":"ping"}"#).await;
    let env = next_envelope(&mut ws).await.expect("pong");
    assert_eq!(env.kind, MessageType::Pong);
    assert!(env.data.is_null());
}

#[tokio::test]
async fn malformed_and_unknown_frames_are_ignored() {
    let h = start().await;
    let mut ws = h.connect_as("abc").await;

    send(&mut ws, "garbage").await;
    send(&mut ws, r#"{"type":"leaderboard_subscribe"}"#).await;
    send(&mut ws, r#"{"type":"ping"}"#).await;

    assert_eq!(next_envelope(&mut ws).await.map(|e| e.kind), Some(MessageType::Pong));
    assert!(h.server.registry().contains("abc").await);
}

#[tokio::test]
async fn subscribe_messages_opt_into_topics() {
    let h = start().await;
    let mut staking = h.connect_as("staker").await;
    let mut other = h.connect_as("other").await;

    send(&mut staking, r#"{"type":"subscribe_staking"}"#).await;
    let registry = &h.server.registry();
    wait_until(|| async move {
        registry
            .get("staker")
            .await
            .is_some_and(|c| c.has_topic(Topic::Staking))
    })
    .await;

    let delivered = registry
        .broadcast_to_topic(Topic::Staking, &Envelope::new("staking_update", json!({"rewards": 1})))
        .await;
    assert_eq!(delivered, 1);
    assert_eq!(
        next_envelope(&mut staking).await.map(|e| e.kind),
        Some(MessageType::StakingUpdate)
    );
    assert!(next_envelope(&mut other).await.is_none());
}

// ---------------------------------------------------------------------------
// Push primitives
// ---------------------------------------------------------------------------

#[tokio::test]
async fn send_to_offline_identity_is_silent() {
    let h = start().await;
    let delivered = h
        .server
        .send_to_client("nobody", &Envelope::new("staking_update", json!({"stakedAmount": 1})))
        .await;
    assert!(!delivered);
}

#[tokio::test]
async fn broadcast_reaches_open_connections_only() {
    let h = start().await;
    let mut a = h.connect_as("a").await;
    let mut b = h.connect_as("b").await;
    let mut c = h.connect_as("c").await;

    c.close(None).await.unwrap();
    let registry = &h.server.registry();
    wait_until(|| async move { registry.connection_count().await == 2 }).await;

    let price = Envelope::new(MessageType::PriceUpdate, json!({"sol": 101.5, "cvt": 0.052}));
    assert_eq!(h.server.broadcast(&price).await, 2);
    assert_eq!(next_envelope(&mut a).await, Some(price.clone()));
    assert_eq!(next_envelope(&mut b).await, Some(price));
}

#[tokio::test]
async fn newest_connection_replaces_previous() {
    let h = start().await;
    let mut first = h.connect_as("abc").await;
    let mut second = h.connect_as("abc").await;
    assert_eq!(h.server.registry().connection_count().await, 1);

    let env = Envelope::new("staking_update", json!({"stakedAmount": 150}));
    assert!(h.server.send_to_client("abc", &env).await);
    assert_eq!(next_envelope(&mut second).await, Some(env));
    assert!(next_envelope(&mut first).await.is_none());

    // The replaced connection closing must not evict its successor.
    first.close(None).await.unwrap();
    sleep(Duration::from_millis(100)).await;
    assert!(h.server.registry().contains("abc").await);
}

#[tokio::test]
async fn registry_is_shared_with_push_helpers() {
    let h = start().await;
    let mut ws = h.connect_as("abc").await;
    let registry: Arc<ConnectionRegistry> = h.server.registry();

    let update = cvt_live::types::PresaleUpdate {
        tokens_bought: 1_000.0,
        total_invested: 50.0,
        purchases: Vec::new(),
    };
    assert!(cvt_live::server::push::push_presale_update(&registry, "abc", &update).await.unwrap());
    let env = next_envelope(&mut ws).await.expect("presale push");
    assert_eq!(env.kind, MessageType::PresaleUpdate);
    assert_eq!(env.data["tokensBought"], 1000.0);

    assert!(cvt_live::server::push::push_error(&registry, "abc", "purchase failed").await);
    let env = next_envelope(&mut ws).await.expect("error push");
    assert_eq!(env.data, json!({"message": "purchase failed"}));
}

#[tokio::test]
async fn zero_intervals_are_floored() {
    let h = start_configured(Arc::new(MemoryTokenStore::new()), |b| {
        b.ping_interval(Duration::ZERO).price_interval(Duration::ZERO)
    })
    .await;
    assert_eq!(h.server.config().ping_interval, Duration::from_millis(1));
    assert_eq!(h.server.config().price_interval, Duration::from_millis(1));

    let mut ws = h.connect_as("abc").await;
    let broadcaster = h
        .server
        .spawn_price_broadcast(|| Some(cvt_live::types::PriceUpdate { sol: 1.0, cvt: 0.1 }));

    let env = next_envelope(&mut ws).await.expect("price push");
    assert_eq!(env.kind, MessageType::PriceUpdate);
    assert!(!broadcaster.is_finished());
    broadcaster.abort();

    send(&mut ws, r#"{"type":"ping"}"#).await;
    let pong = timeout(Duration::from_secs(2), async {
        while let Some(env) = next_envelope(&mut ws).await {
            if env.kind == MessageType::Pong {
                return true;
            }
        }
        false
    })
    .await;
    assert_eq!(pong.ok(), Some(true));
    assert!(h.server.registry().contains("abc").await);
}
