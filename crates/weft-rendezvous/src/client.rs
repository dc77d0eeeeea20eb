//! Rendezvous client.
//!
//! Opens the text-frame channel, registers the node, and surfaces service
//! traffic as typed events. The channel task owns the socket; the node
//! talks to it through an outbound queue and an event stream.
//!
//! Lifecycle: the initial open has a hard timeout and its failure is fatal
//! to node startup. A channel lost later is retried forever with
//! exponential delay, and every successful reopen re-registers the node.

use crate::{
    OPEN_TIMEOUT_SECS, RECONNECT_INITIAL_SECS, RECONNECT_MAX_SECS, RendezvousError,
};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use weft_net::{FrameTransport, TcpTransport};
use weft_proto::{NodeId, RendezvousMessage, SessionSignal};

/// Service traffic surfaced to the node
#[derive(Debug)]
pub enum RendezvousEvent {
    /// Registration snapshot of currently known peers
    PeerList(Vec<NodeId>),
    /// A peer registered
    PeerJoined(NodeId),
    /// A peer's channel closed
    PeerLeft(NodeId),
    /// A directed dial request arrived
    Offer {
        /// Dialing peer
        from: NodeId,
        /// Its session-setup blob
        signal: SessionSignal,
    },
    /// A directed dial reply arrived
    Answer {
        /// Replying peer
        from: NodeId,
        /// Its session-setup blob
        signal: SessionSignal,
    },
    /// The channel was lost and re-established (the node re-announces
    /// itself to the returned peer list)
    Reconnected,
}

/// Handle to the rendezvous channel task.
pub struct RendezvousClient {
    outbound: mpsc::UnboundedSender<RendezvousMessage>,
    task: JoinHandle<()>,
}

impl RendezvousClient {
    /// Open the channel, register, and spawn the channel task.
    ///
    /// # Errors
    ///
    /// Returns [`RendezvousError::Unavailable`] when the channel cannot be
    /// opened within [`OPEN_TIMEOUT_SECS`]; the node treats this as fatal.
    pub async fn connect(
        addr: SocketAddr,
        node_id: NodeId,
        events: mpsc::Sender<RendezvousEvent>,
    ) -> Result<Self, RendezvousError> {
        let mut transport = open_channel(addr).await?;
        register(&mut transport, &node_id).await?;

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_channel(addr, node_id, transport, outbound_rx, events));
        Ok(Self {
            outbound: outbound_tx,
            task,
        })
    }

    /// Queue a frame for the service.
    ///
    /// Returns `false` once the channel task has stopped. Frames queued
    /// while the channel is reconnecting are sent after re-registration.
    pub fn send(&self, message: RendezvousMessage) -> bool {
        self.outbound.send(message).is_ok()
    }

    /// Stop the channel task without farewell traffic.
    pub fn shutdown(&self) {
        self.task.abort();
    }
}

impl Drop for RendezvousClient {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn open_channel(addr: SocketAddr) -> Result<TcpTransport, RendezvousError> {
    tokio::time::timeout(
        Duration::from_secs(OPEN_TIMEOUT_SECS),
        TcpTransport::connect(addr),
    )
    .await
    .map_err(|_| RendezvousError::Unavailable(format!("open timeout to {addr}")))?
    .map_err(|e| RendezvousError::Unavailable(format!("{addr}: {e}")))
}

async fn register(
    transport: &mut TcpTransport,
    node_id: &NodeId,
) -> Result<(), RendezvousError> {
    let frame = RendezvousMessage::Register {
        node_id: node_id.clone(),
    }
    .encode()?;
    transport
        .send(&frame)
        .await
        .map_err(|e| RendezvousError::Channel(e.to_string()))
}

async fn run_channel(
    addr: SocketAddr,
    node_id: NodeId,
    mut transport: TcpTransport,
    mut outbound: mpsc::UnboundedReceiver<RendezvousMessage>,
    events: mpsc::Sender<RendezvousEvent>,
) {
    loop {
        let reason = pump(&node_id, &mut transport, &mut outbound, &events).await;
        match reason {
            PumpEnd::OwnerGone => return,
            PumpEnd::ChannelLost => {
                tracing::warn!("rendezvous channel lost, reconnecting");
            }
        }

        // Reconnect with exponential delay; give up only when aborted.
        let mut delay = Duration::from_secs(RECONNECT_INITIAL_SECS);
        loop {
            tokio::time::sleep(delay).await;
            match open_channel(addr).await {
                Ok(mut reopened) => {
                    if register(&mut reopened, &node_id).await.is_ok() {
                        transport = reopened;
                        tracing::info!("rendezvous channel re-established");
                        if events.send(RendezvousEvent::Reconnected).await.is_err() {
                            return;
                        }
                        break;
                    }
                }
                Err(e) => {
                    tracing::debug!("rendezvous reconnect failed: {e}");
                }
            }
            delay = (delay * 2).min(Duration::from_secs(RECONNECT_MAX_SECS));
        }
    }
}

enum PumpEnd {
    /// The owning node dropped its handles; stop entirely.
    OwnerGone,
    /// The socket closed or failed; reconnect.
    ChannelLost,
}

async fn pump(
    node_id: &NodeId,
    transport: &mut TcpTransport,
    outbound: &mut mpsc::UnboundedReceiver<RendezvousMessage>,
    events: &mpsc::Sender<RendezvousEvent>,
) -> PumpEnd {
    loop {
        tokio::select! {
            queued = outbound.recv() => {
                let Some(message) = queued else {
                    return PumpEnd::OwnerGone;
                };
                let Ok(frame) = message.encode() else {
                    continue;
                };
                if transport.send(&frame).await.is_err() {
                    return PumpEnd::ChannelLost;
                }
            }
            inbound = transport.recv() => {
                match inbound {
                    Ok(Some(frame)) => {
                        if dispatch(node_id, &frame, events).await.is_err() {
                            return PumpEnd::OwnerGone;
                        }
                    }
                    Ok(None) | Err(_) => return PumpEnd::ChannelLost,
                }
            }
        }
    }
}

async fn dispatch(
    node_id: &NodeId,
    frame: &str,
    events: &mpsc::Sender<RendezvousEvent>,
) -> Result<(), ()> {
    let message = match RendezvousMessage::decode(frame) {
        Ok(message) => message,
        Err(e) => {
            tracing::warn!("dropping malformed rendezvous frame: {e}");
            return Ok(());
        }
    };
    let event = match message {
        RendezvousMessage::PeerList { peers } => RendezvousEvent::PeerList(peers),
        RendezvousMessage::PeerJoined { node_id: peer, .. } => RendezvousEvent::PeerJoined(peer),
        RendezvousMessage::PeerLeft { node_id: peer, .. } => RendezvousEvent::PeerLeft(peer),
        RendezvousMessage::Offer { from, to, signal } => {
            if to != *node_id {
                tracing::warn!(to = %to, "misrouted offer dropped");
                return Ok(());
            }
            RendezvousEvent::Offer { from, signal }
        }
        RendezvousMessage::Answer { from, to, signal } => {
            if to != *node_id {
                tracing::warn!(to = %to, "misrouted answer dropped");
                return Ok(());
            }
            RendezvousEvent::Answer { from, signal }
        }
        RendezvousMessage::IceCandidate { from, .. } => {
            // The stream transport needs no candidates; acknowledge and move on.
            tracing::debug!(from = %from, "ignoring ice candidate");
            return Ok(());
        }
        RendezvousMessage::Pong { .. } => return Ok(()),
        RendezvousMessage::Error { message, .. } => {
            tracing::warn!("rendezvous error: {message}");
            return Ok(());
        }
        RendezvousMessage::Register { .. }
        | RendezvousMessage::GetPeers { .. }
        | RendezvousMessage::Ping => {
            tracing::debug!("client-direction frame from service ignored");
            return Ok(());
        }
    };
    events.send(event).await.map_err(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RendezvousServer;

    async fn start_server() -> SocketAddr {
        let server = RendezvousServer::bind("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let addr = server.local_addr();
        tokio::spawn(server.run());
        addr
    }

    #[tokio::test]
    async fn test_connect_and_peer_list() {
        let addr = start_server().await;
        let (events_tx, mut events_rx) = mpsc::channel(16);
        let _client = RendezvousClient::connect(addr, NodeId::from("aaaaaaaaaaaaaaaa"), events_tx)
            .await
            .unwrap();

        match events_rx.recv().await.unwrap() {
            RendezvousEvent::PeerList(peers) => assert!(peers.is_empty()),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_second_client_sees_join() {
        let addr = start_server().await;
        let (a_tx, mut a_rx) = mpsc::channel(16);
        let (b_tx, mut b_rx) = mpsc::channel(16);

        let _a = RendezvousClient::connect(addr, NodeId::from("aaaaaaaaaaaaaaaa"), a_tx)
            .await
            .unwrap();
        assert!(matches!(a_rx.recv().await.unwrap(), RendezvousEvent::PeerList(_)));

        let _b = RendezvousClient::connect(addr, NodeId::from("bbbbbbbbbbbbbbbb"), b_tx)
            .await
            .unwrap();
        match b_rx.recv().await.unwrap() {
            RendezvousEvent::PeerList(peers) => {
                assert_eq!(peers, vec![NodeId::from("aaaaaaaaaaaaaaaa")]);
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(matches!(
            a_rx.recv().await.unwrap(),
            RendezvousEvent::PeerJoined(peer) if peer == NodeId::from("bbbbbbbbbbbbbbbb")
        ));
    }

    #[tokio::test]
    async fn test_offer_is_forwarded() {
        let addr = start_server().await;
        let (a_tx, mut a_rx) = mpsc::channel(16);
        let (b_tx, mut b_rx) = mpsc::channel(16);
        let a_id = NodeId::from("aaaaaaaaaaaaaaaa");
        let b_id = NodeId::from("bbbbbbbbbbbbbbbb");

        let a = RendezvousClient::connect(addr, a_id.clone(), a_tx).await.unwrap();
        let _b = RendezvousClient::connect(addr, b_id.clone(), b_tx).await.unwrap();
        a_rx.recv().await.unwrap(); // peer list
        a_rx.recv().await.unwrap(); // b joined
        b_rx.recv().await.unwrap(); // peer list

        let signal = SessionSignal {
            addr: "127.0.0.1:4444".parse().unwrap(),
            public_key: "cd".repeat(32),
        };
        assert!(a.send(RendezvousMessage::Offer {
            from: a_id.clone(),
            to: b_id,
            signal: signal.clone(),
        }));

        match b_rx.recv().await.unwrap() {
            RendezvousEvent::Offer { from, signal: got } => {
                assert_eq!(from, a_id);
                assert_eq!(got, signal);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_startup_failure_is_fatal() {
        // Nothing listens here.
        let addr: SocketAddr = "127.0.0.1:1".parse().unwrap();
        let (events_tx, _events_rx) = mpsc::channel(16);
        let result = RendezvousClient::connect(addr, NodeId::random(), events_tx).await;
        assert!(matches!(result, Err(RendezvousError::Unavailable(_))));
    }
}
