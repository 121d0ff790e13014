//! Per-connection session: token gate, registration, read/write loop.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tracing::{debug, info, instrument, trace, warn};

use super::registry::{ClientConnection, ConnectionRegistry, Topic};
use super::snapshot::SnapshotSource;
use crate::auth::TokenVerifier;
use crate::constants::{MIN_TIMER_PERIOD, TOKEN_QUERY_PARAM};
use crate::error::{Result, TokenError};
use crate::types::{Envelope, Identity, MessageType};

/// How long a rejected peer gets to acknowledge the close frame.
const REJECT_LINGER: Duration = Duration::from_secs(5);

/// Everything a session needs from the server that spawned it.
pub(crate) struct SessionContext {
    pub registry: Arc<ConnectionRegistry>,
    pub verifier: Arc<dyn TokenVerifier>,
    pub snapshots: Arc<dyn SnapshotSource>,
    pub outbound_capacity: usize,
    pub handshake_timeout: Duration,
    pub ping_interval: Duration,
}

/// Read the `token` query parameter from a handshake request URI.
///
/// An empty value counts as absent.
pub fn token_from_query(query: Option<&str>) -> Option<String> {
    let query = query?;
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == TOKEN_QUERY_PARAM)
        .map(|(_, value)| value.into_owned())
        .filter(|value| !value.is_empty())
}

/// Run one inbound connection from WebSocket upgrade to unregister.
#[instrument(skip_all, fields(peer = %peer))]
pub(crate) async fn run_session<S>(stream: S, peer: std::net::SocketAddr, ctx: Arc<SessionContext>) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let mut token = None;
    let callback = |req: &Request, resp: Response| -> std::result::Result<Response, ErrorResponse> {
        token = token_from_query(req.uri().query());
        Ok(resp)
    };
    let upgrade = tokio_tungstenite::accept_hdr_async(stream, callback);
    let mut ws = match tokio::time::timeout(ctx.handshake_timeout, upgrade).await {
        Ok(ws) => ws?,
        Err(_) => {
            debug!(timeout_ms = ctx.handshake_timeout.as_millis() as u64, "WebSocket upgrade timed out");
            return Ok(());
        }
    };

    let verified = match token.as_deref() {
        None => Err(TokenError::Missing),
        Some(t) => ctx.verifier.verify(t),
    };
    let identity = match verified {
        Ok(identity) => identity,
        Err(e) => {
            warn!(error = %e, code = e.close_code(), "Rejecting connection");
            reject(&mut ws, &e).await;
            return Ok(());
        }
    };

    serve_authenticated(ws, identity, ctx).await;
    Ok(())
}

async fn reject<S>(ws: &mut WebSocketStream<S>, error: &TokenError)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let frame = CloseFrame {
        code: CloseCode::from(error.close_code()),
        reason: String::from(error.close_reason()).into(),
    };
    if let Err(e) = ws.close(Some(frame)).await {
        debug!(error = %e, "Close frame not delivered");
        return;
    }
    // Drain until the peer's close reply ends the stream.
    let _ = tokio::time::timeout(REJECT_LINGER, async {
        while let Some(Ok(_)) = ws.next().await {}
    })
    .await;
}

#[instrument(skip_all, fields(identity = %identity))]
async fn serve_authenticated<S>(ws: WebSocketStream<S>, identity: Identity, ctx: Arc<SessionContext>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut ws_tx, mut ws_rx) = ws.split();
    let (send_tx, mut send_rx) = mpsc::channel::<Message>(ctx.outbound_capacity.max(1));
    let connection = Arc::new(ClientConnection::new(identity.clone(), send_tx));
    let connection_id = connection.id;

    let _ = ctx.registry.register(connection.clone()).await;
    info!(connection_id, "Client connected");

    match ctx.snapshots.snapshot(&identity).await {
        Some(data) => {
            if !connection.send_envelope(&Envelope::new(MessageType::UserData, data)) {
                debug!("Snapshot not queued");
            }
        }
        None => debug!("No snapshot for identity"),
    }

    let ping_every = ctx.ping_interval.max(MIN_TIMER_PERIOD);
    let writer = tokio::spawn(async move {
        let mut ping = tokio::time::interval(ping_every);
        let _ = ping.tick().await;

        loop {
            tokio::select! {
                msg = send_rx.recv() => {
                    let Some(msg) = msg else { break };
                    if ws_tx.send(msg).await.is_err() {
                        break;
                    }
                }
                _ = ping.tick() => {
                    if ws_tx.send(Message::Ping(Default::default())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    while let Some(frame) = ws_rx.next().await {
        let msg = match frame {
            Ok(msg) => msg,
            Err(e) => {
                debug!(error = %e, "Read error");
                break;
            }
        };
        let text = match msg {
            Message::Text(ref t) => t.as_str(),
            Message::Binary(ref data) => match std::str::from_utf8(data) {
                Ok(s) => s,
                Err(_) => {
                    debug!(len = data.len(), "Dropping non-UTF8 binary frame");
                    continue;
                }
            },
            Message::Close(_) => {
                debug!("Client sent close frame");
                continue;
            }
            _ => continue,
        };
        handle_inbound(&connection, text);
    }

    writer.abort();
    let removed = ctx.registry.unregister(&identity, connection_id).await;
    info!(connection_id, removed, "Client disconnected");
}

/// React to one inbound text frame.
fn handle_inbound(connection: &ClientConnection, text: &str) {
    let envelope = match Envelope::decode(text) {
        Ok(env) => env,
        Err(e) => {
            debug!(error = %e, "Dropping malformed frame");
            return;
        }
    };
    match envelope.kind {
        MessageType::Ping => {
            if !connection.send_envelope(&Envelope::pong()) {
                debug!("Pong not queued");
            }
        }
        MessageType::SubscribePrice => {
            if connection.add_topic(Topic::Price) {
                debug!("Subscribed to price updates");
            }
        }
        MessageType::SubscribeStaking => {
            if connection.add_topic(Topic::Staking) {
                debug!("Subscribed to staking updates");
            }
        }
        other => trace!(kind = %other, "Ignoring inbound message"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_is_read_from_query() {
        assert_eq!(token_from_query(Some("token=abc123")), Some("abc123".into()));
        assert_eq!(token_from_query(Some("x=1&token=a%20b")), Some("a b".into()));
    }

    #[test]
    fn missing_or_empty_token_is_none() {
        assert_eq!(token_from_query(None), None);
        assert_eq!(token_from_query(Some("other=1")), None);
        assert_eq!(token_from_query(Some("token=")), None);
    }

    #[tokio::test]
    async fn ping_gets_pong_on_same_connection() {
        let (tx, mut rx) = mpsc::channel(4);
        let conn = ClientConnection::new("abc".into(), tx);
        handle_inbound(&conn, r#"{"type":"ping"}"#);
        match rx.try_recv().unwrap() {
            Message::Text(t) => assert_eq!(t.as_str(), r#"{"type":"pong"}"#),
            other => panic!("unexpected frame {other:?}"),
        }
    }

    #[tokio::test]
    async fn malformed_and_unknown_frames_are_ignored() {
        let (tx, mut rx) = mpsc::channel(4);
        let conn = ClientConnection::new("abc".into(), tx);
        handle_inbound(&conn, "not json");
        handle_inbound(&conn, r#"{"type":"leaderboard"}"#);
        assert!(rx.try_recv().is_err());
        assert!(conn.is_open());
    }

    #[tokio::test]
    async fn subscribe_messages_record_topics() {
        let (tx, _rx) = mpsc::channel(4);
        let conn = ClientConnection::new("abc".into(), tx);
        handle_inbound(&conn, r#"{"type":"subscribe_staking"}"#);
        assert!(conn.has_topic(Topic::Staking));
        assert!(!conn.has_topic(Topic::Price));
    }
}
