//! Rendezvous relay server.
//!
//! The service half of the wire: a registration table, presence broadcasts,
//! and directed forwarding of session-setup blobs. Nodes never exchange
//! application data here; the service only introduces them.

use crate::RendezvousError;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{Mutex, mpsc};
use weft_net::{FrameTransport, TcpTransport};
use weft_proto::{NodeId, RendezvousMessage, now_ms};

type Registry = Arc<Mutex<HashMap<NodeId, mpsc::UnboundedSender<String>>>>;

/// A running relay service.
pub struct RendezvousServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    registry: Registry,
}

impl RendezvousServer {
    /// Bind the service socket.
    ///
    /// # Errors
    ///
    /// Returns [`RendezvousError::Channel`] if the address cannot be bound.
    pub async fn bind(addr: SocketAddr) -> Result<Self, RendezvousError> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        tracing::info!(%local_addr, "rendezvous service listening");
        Ok(Self {
            listener,
            local_addr,
            registry: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// The bound address (useful with port 0)
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept and serve clients until the task is dropped.
    pub async fn run(self) {
        loop {
            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    tracing::debug!(%peer, "rendezvous client connected");
                    let registry = Arc::clone(&self.registry);
                    tokio::spawn(serve_client(TcpTransport::new(stream), registry));
                }
                Err(e) => {
                    tracing::warn!("accept failed: {e}");
                }
            }
        }
    }
}

async fn serve_client(mut transport: TcpTransport, registry: Registry) {
    // The first frame must register the client.
    let node_id = loop {
        match transport.recv().await {
            Ok(Some(frame)) => match RendezvousMessage::decode(&frame) {
                Ok(RendezvousMessage::Register { node_id }) => break node_id,
                Ok(_) | Err(_) => {
                    let error = RendezvousMessage::Error {
                        message: "expected register".to_string(),
                        original_message: Some(frame),
                    };
                    if let Ok(text) = error.encode() {
                        let _ = transport.send(&text).await;
                    }
                }
            },
            Ok(None) | Err(_) => return,
        }
    };

    let (queue_tx, mut queue_rx) = mpsc::unbounded_channel::<String>();
    let peers_snapshot = {
        let mut table = registry.lock().await;
        // A reconnecting node displaces its stale registration.
        table.insert(node_id.clone(), queue_tx.clone());
        table
            .iter()
            .filter(|(id, _)| **id != node_id)
            .map(|(id, _)| id.clone())
            .collect::<Vec<_>>()
    };

    send_to(&registry, &node_id, &RendezvousMessage::PeerList { peers: peers_snapshot }).await;
    broadcast_except(
        &registry,
        &node_id,
        &RendezvousMessage::PeerJoined {
            node_id: node_id.clone(),
            timestamp: now_ms(),
        },
    )
    .await;
    tracing::info!(node = %node_id, "registered");

    loop {
        tokio::select! {
            queued = queue_rx.recv() => {
                let Some(frame) = queued else { break };
                if transport.send(&frame).await.is_err() {
                    break;
                }
            }
            inbound = transport.recv() => {
                match inbound {
                    Ok(Some(frame)) => {
                        handle_frame(&registry, &node_id, &frame).await;
                    }
                    Ok(None) | Err(_) => break,
                }
            }
        }
    }

    // Deregister and tell the others, unless a reconnect already replaced us.
    let still_registered = {
        let mut table = registry.lock().await;
        let ours = table
            .get(&node_id)
            .is_some_and(|sender| sender.same_channel(&queue_tx));
        if ours {
            table.remove(&node_id);
        }
        ours
    };
    if still_registered {
        tracing::info!(node = %node_id, "left");
        broadcast_except(
            &registry,
            &node_id,
            &RendezvousMessage::PeerLeft {
                node_id: node_id.clone(),
                timestamp: now_ms(),
            },
        )
        .await;
    }
}

async fn handle_frame(registry: &Registry, sender: &NodeId, frame: &str) {
    let message = match RendezvousMessage::decode(frame) {
        Ok(message) => message,
        Err(e) => {
            tracing::warn!(node = %sender, "malformed frame: {e}");
            send_to(
                registry,
                sender,
                &RendezvousMessage::Error {
                    message: "malformed frame".to_string(),
                    original_message: Some(frame.to_string()),
                },
            )
            .await;
            return;
        }
    };

    match message {
        RendezvousMessage::GetPeers { node_id } => {
            let peers = {
                let table = registry.lock().await;
                table
                    .keys()
                    .filter(|id| **id != node_id)
                    .cloned()
                    .collect::<Vec<_>>()
            };
            send_to(registry, sender, &RendezvousMessage::PeerList { peers }).await;
        }
        RendezvousMessage::Ping => {
            send_to(registry, sender, &RendezvousMessage::Pong { timestamp: now_ms() }).await;
        }
        RendezvousMessage::Offer { ref to, .. }
        | RendezvousMessage::Answer { ref to, .. }
        | RendezvousMessage::IceCandidate { ref to, .. } => {
            let delivered = send_to(registry, to, &message).await;
            if !delivered {
                send_to(
                    registry,
                    sender,
                    &RendezvousMessage::Error {
                        message: format!("unknown peer {to}"),
                        original_message: None,
                    },
                )
                .await;
            }
        }
        RendezvousMessage::Register { .. } => {
            // Already registered on this channel; ignore repeats.
        }
        other => {
            tracing::debug!(node = %sender, "service-direction frame ignored: {other:?}");
        }
    }
}

async fn send_to(registry: &Registry, to: &NodeId, message: &RendezvousMessage) -> bool {
    let Ok(frame) = message.encode() else {
        return false;
    };
    let table = registry.lock().await;
    match table.get(to) {
        Some(queue) => queue.send(frame).is_ok(),
        None => false,
    }
}

async fn broadcast_except(registry: &Registry, except: &NodeId, message: &RendezvousMessage) {
    let Ok(frame) = message.encode() else {
        return;
    };
    let table = registry.lock().await;
    for (id, queue) in table.iter() {
        if id != except {
            let _ = queue.send(frame.clone());
        }
    }
}
