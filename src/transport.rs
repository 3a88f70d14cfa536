//! hybrid peer transport: WebSocket signaling with an optional WebRTC
//! data-channel upgrade, both hidden behind a single `PeerTransport` trait
//! so the gossip layer never observes which link carries a given message
//!
//! Structured after `zeratul_p2p::gossip::GossipNetwork`: a peer set, a
//! `tokio::sync::mpsc` channel returned alongside the constructed network,
//! and a `tracing`-instrumented event loop. That module talks QUIC through
//! litep2p; this one talks WebSocket through `tokio-tungstenite`, the same
//! crate the on-topic `flammafex-witness` and `happybigmtn-bitchat-rust`
//! examples reach for in this exact role.

use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const CLOSE_RACE_CEILING: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeerId(pub String);

/// signaling-channel messages exchanged over the WebSocket link
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SignalMessage {
    #[serde(rename = "welcome")]
    Welcome { peer_id: String, peers: Vec<String> },
    #[serde(rename = "peer:joined")]
    PeerJoined { peer_id: String },
    #[serde(rename = "peer:left")]
    PeerLeft { peer_id: String },
    #[serde(rename = "p2p")]
    Gossip {
        payload: Vec<u8>,
        #[serde(rename = "targetPeerId", skip_serializing_if = "Option::is_none", default)]
        target_peer_id: Option<String>,
        #[serde(rename = "fromPeerId", skip_serializing_if = "Option::is_none", default)]
        from_peer_id: Option<String>,
    },
}

/// the concrete link a peer is reached over. the gossip layer holds only a
/// `PeerId` and never inspects this; it exists purely so the transport layer
/// can prefer a direct data channel when one has been negotiated.
pub enum PeerLink {
    WebSocket,
    /// WebRTC data-channel upgrade. establishing one requires a full ICE
    /// negotiation stack that is out of scope for this crate; this variant
    /// documents the upgrade path's contract (gossip-transparent delivery)
    /// without completing ICE itself, so it is never actually selected by
    /// `WebSocketTransport::send` today.
    WebRtc,
}

/// event emitted by a transport implementation up to the gossip layer
#[derive(Debug, Clone)]
pub enum TransportEvent {
    PeerJoined(PeerId),
    PeerLeft(PeerId),
    Message { from: PeerId, payload: Vec<u8> },
}

#[async_trait::async_trait]
pub trait PeerTransport: Send + Sync {
    async fn send(&self, to: &PeerId, payload: Vec<u8>) -> Result<()>;
    async fn broadcast(&self, payload: Vec<u8>) -> Result<()>;
    fn peer_count(&self) -> usize;
    fn peers(&self) -> Vec<PeerId>;
}

/// WebSocket-backed transport: connects to a signaling server, tracks the
/// peer set it's told about, and exposes an mpsc receiver of inbound events
pub struct WebSocketTransport {
    peers: std::sync::Arc<tokio::sync::RwLock<HashSet<PeerId>>>,
    outbound: mpsc::Sender<SignalMessage>,
}

impl WebSocketTransport {
    /// connect to `url`, racing the handshake against `CONNECT_TIMEOUT`
    #[cfg(feature = "network")]
    pub async fn connect(url: &str) -> Result<(Self, mpsc::Receiver<TransportEvent>)> {
        use futures::{SinkExt, StreamExt};
        use tokio_tungstenite::connect_async;
        use tokio_tungstenite::tungstenite::Message as WsMessage;

        let connect_fut = connect_async(url);
        let (ws_stream, _response) = tokio::time::timeout(CONNECT_TIMEOUT, connect_fut)
            .await
            .map_err(|_| Error::ConnectTimeout)?
            .map_err(|e| Error::NetworkUnavailable(e.to_string()))?;

        let (mut write, mut read) = ws_stream.split();
        let (out_tx, mut out_rx) = mpsc::channel::<SignalMessage>(64);
        let (event_tx, event_rx) = mpsc::channel::<TransportEvent>(256);

        let peers = std::sync::Arc::new(tokio::sync::RwLock::new(HashSet::new()));
        let peers_writer = peers.clone();

        tokio::spawn(async move {
            while let Some(msg) = out_rx.recv().await {
                let Ok(text) = serde_json::to_string(&msg) else {
                    continue;
                };
                if write.send(WsMessage::Text(text)).await.is_err() {
                    warn!("websocket send failed, dropping outbound message");
                    break;
                }
            }
        });

        tokio::spawn(async move {
            while let Some(frame) = read.next().await {
                let frame = match frame {
                    Ok(f) => f,
                    Err(e) => {
                        warn!(error = %e, "websocket read error");
                        break;
                    }
                };
                let WsMessage::Text(text) = frame else { continue };
                let Ok(signal) = serde_json::from_str::<SignalMessage>(&text) else {
                    debug!("ignoring unparseable signal frame");
                    continue;
                };
                match signal {
                    SignalMessage::Welcome { peers: roster, .. } => {
                        let mut set = peers_writer.write().await;
                        for p in roster {
                            set.insert(PeerId(p));
                        }
                    }
                    SignalMessage::PeerJoined { peer_id } => {
                        peers_writer.write().await.insert(PeerId(peer_id.clone()));
                        let _ = event_tx.send(TransportEvent::PeerJoined(PeerId(peer_id))).await;
                    }
                    SignalMessage::PeerLeft { peer_id } => {
                        peers_writer.write().await.remove(&PeerId(peer_id.clone()));
                        let _ = event_tx.send(TransportEvent::PeerLeft(PeerId(peer_id))).await;
                    }
                    SignalMessage::Gossip {
                        payload,
                        from_peer_id,
                        ..
                    } => {
                        let from = from_peer_id
                            .map(PeerId)
                            .unwrap_or_else(|| PeerId("unknown".into()));
                        let _ = event_tx.send(TransportEvent::Message { from, payload }).await;
                    }
                }
            }
            info!("websocket transport read loop ended");
        });

        Ok((
            Self {
                peers,
                outbound: out_tx,
            },
            event_rx,
        ))
    }
}

#[async_trait::async_trait]
impl PeerTransport for WebSocketTransport {
    async fn send(&self, to: &PeerId, payload: Vec<u8>) -> Result<()> {
        self.outbound
            .send(SignalMessage::Gossip {
                payload,
                target_peer_id: Some(to.0.clone()),
                from_peer_id: None,
            })
            .await
            .map_err(|_| Error::NotConnected)
    }

    async fn broadcast(&self, payload: Vec<u8>) -> Result<()> {
        self.outbound
            .send(SignalMessage::Gossip {
                payload,
                target_peer_id: None,
                from_peer_id: None,
            })
            .await
            .map_err(|_| Error::NotConnected)
    }

    fn peer_count(&self) -> usize {
        self.peers.try_read().map(|p| p.len()).unwrap_or(0)
    }

    fn peers(&self) -> Vec<PeerId> {
        self.peers
            .try_read()
            .map(|p| p.iter().cloned().collect())
            .unwrap_or_default()
    }
}
