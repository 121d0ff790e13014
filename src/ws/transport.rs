//! Transport seam between the channel's state machine and the network.
//!
//! The driver never touches a socket directly. A [`Transport`] produces a
//! [`TransportLink`]: a pair of queues carrying outbound [`Outbound`]
//! commands and inbound [`TransportEvent`]s. [`WsTransport`] backs a link
//! with a tokio-tungstenite connection; tests back it with plain channels
//! via [`link_pair`].
//!
//! Dropping a `TransportLink` is a clean, locally requested close.

use std::future::Future;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use url::Url;

use crate::constants::TOKEN_QUERY_PARAM;
use crate::error::Result;

// ---------------------------------------------------------------------------
// Link types
// ---------------------------------------------------------------------------

/// A frame the channel wants written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// A text frame.
    Text(String),
    /// Request a clean close.
    Close,
}

/// Something the transport observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// An inbound text frame.
    Message(String),
    /// The remote side closed the connection.
    Closed {
        /// Close code, if the peer sent one.
        code: Option<u16>,
        /// Close reason, possibly empty.
        reason: String,
    },
    /// The connection failed.
    Error(String),
}

/// The channel's half of an open connection.
#[derive(Debug)]
pub struct TransportLink {
    outbound: mpsc::UnboundedSender<Outbound>,
    inbound: mpsc::UnboundedReceiver<TransportEvent>,
}

impl TransportLink {
    /// Queue a text frame. Returns `false` if the transport is gone.
    pub fn send_text(&self, text: String) -> bool {
        self.outbound.send(Outbound::Text(text)).is_ok()
    }

    /// Ask the transport to close cleanly.
    pub fn close(&self) {
        let _ = self.outbound.send(Outbound::Close);
    }

    /// Next inbound event; `None` once the transport has shut down.
    pub async fn recv(&mut self) -> Option<TransportEvent> {
        self.inbound.recv().await
    }
}

/// The transport's half of a link.
#[derive(Debug)]
pub struct LinkPeer {
    /// Frames written by the channel.
    pub outbound: mpsc::UnboundedReceiver<Outbound>,
    /// Events delivered to the channel.
    pub inbound: mpsc::UnboundedSender<TransportEvent>,
}

/// Create a connected link / peer pair.
pub fn link_pair() -> (TransportLink, LinkPeer) {
    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let (in_tx, in_rx) = mpsc::unbounded_channel();
    (
        TransportLink {
            outbound: out_tx,
            inbound: in_rx,
        },
        LinkPeer {
            outbound: out_rx,
            inbound: in_tx,
        },
    )
}

// ---------------------------------------------------------------------------
// Transport trait
// ---------------------------------------------------------------------------

/// Opens connections for the channel.
///
/// `connect` resolves once the connection is open. The channel bounds the
/// wait with its connect timeout, so implementations need not.
pub trait Transport: Send + Sync + 'static {
    fn connect(&self, token: &str) -> impl Future<Output = Result<TransportLink>> + Send;
}

// ---------------------------------------------------------------------------
// WebSocket transport
// ---------------------------------------------------------------------------

/// tokio-tungstenite transport carrying the token as a query parameter.
#[derive(Debug, Clone)]
pub struct WsTransport {
    url: Url,
}

impl WsTransport {
    /// Validate the endpoint URL.
    pub fn new(url: &str) -> Result<Self> {
        Ok(Self {
            url: Url::parse(url)?,
        })
    }

    /// The endpoint with `token` appended as a query parameter.
    pub fn endpoint(&self, token: &str) -> Url {
        let mut url = self.url.clone();
        url.query_pairs_mut().append_pair(TOKEN_QUERY_PARAM, token);
        url
    }
}

impl Transport for WsTransport {
    async fn connect(&self, token: &str) -> Result<TransportLink> {
        let url = self.endpoint(token);
        let (ws, _resp) = connect_async(url.as_str()).await?;
        let (link, peer) = link_pair();
        tokio::spawn(pump(ws, peer));

        tracing::debug!(host = ?self.url.host_str(), "WebSocket transport open");
        Ok(link)
    }
}

/// Move frames between a WebSocket and a [`LinkPeer`] until either side ends.
async fn pump<S>(ws: tokio_tungstenite::WebSocketStream<S>, mut peer: LinkPeer)
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let (mut write, mut read) = ws.split();

    loop {
        tokio::select! {
            out = peer.outbound.recv() => match out {
                Some(Outbound::Text(text)) => {
                    if let Err(e) = write.send(Message::Text(text.into())).await {
                        let _ = peer.inbound.send(TransportEvent::Error(e.to_string()));
                        break;
                    }
                }
                // Close requested, or the link was dropped.
                Some(Outbound::Close) | None => {
                    let frame = CloseFrame {
                        code: CloseCode::Normal,
                        reason: String::new().into(),
                    };
                    let _ = write.send(Message::Close(Some(frame))).await;
                    break;
                }
            },
            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    let _ = peer.inbound.send(TransportEvent::Message(text.as_str().to_owned()));
                }
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = frame
                        .map(|f| (Some(u16::from(f.code)), f.reason.as_str().to_owned()))
                        .unwrap_or((None, String::new()));
                    tracing::debug!(?code, %reason, "WebSocket closed by server");
                    let _ = peer.inbound.send(TransportEvent::Closed { code, reason });
                    break;
                }
                // Ping/pong handled automatically by tungstenite
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    let _ = peer.inbound.send(TransportEvent::Error(e.to_string()));
                    break;
                }
                None => {
                    let _ = peer.inbound.send(TransportEvent::Closed {
                        code: None,
                        reason: String::new(),
                    });
                    break;
                }
            },
        }
    }
}
