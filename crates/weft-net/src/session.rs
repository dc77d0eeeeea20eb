//! Peer session state machine.
//!
//! One `PeerSession` exists per connected peer. It owns the transport task,
//! decodes inbound frames into typed messages, and keeps the liveness
//! bookkeeping the registry's heartbeat tick reads.

use crate::FrameTransport;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use weft_proto::{NodeId, PeerMessage};

/// Session lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Transport setup in progress
    Connecting,
    /// Channel established, frames flowing
    Open,
    /// Teardown requested, no longer usable
    Closing,
    /// Transport gone
    Closed,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connecting => write!(f, "connecting"),
            Self::Open => write!(f, "open"),
            Self::Closing => write!(f, "closing"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// Events a session delivers to its owner
#[derive(Debug)]
pub enum SessionEvent {
    /// A typed frame arrived from the peer
    Frame {
        /// Sending peer
        peer: NodeId,
        /// Decoded message
        message: PeerMessage,
    },
    /// The transport closed or failed
    Closed {
        /// The peer whose transport ended
        peer: NodeId,
    },
}

/// Heartbeat bookkeeping for one session
#[derive(Debug, Default, Clone, Copy)]
pub struct Liveness {
    /// When the last ping was sent (ms since epoch)
    pub last_ping_sent_ms: i64,
    /// When the last pong arrived (ms since epoch)
    pub last_pong_received_ms: i64,
    /// Consecutive heartbeat intervals without a pong
    pub missed_pongs: u32,
}

/// One connected peer.
#[derive(Debug)]
pub struct PeerSession {
    peer_id: NodeId,
    state: SessionState,
    initiator: bool,
    outbound: mpsc::Sender<String>,
    task: JoinHandle<()>,
    liveness: Liveness,
}

/// Outbound queue depth per session. A full queue makes `send` return
/// `false` rather than blocking the owner.
const OUTBOUND_QUEUE: usize = 1024;

impl PeerSession {
    /// Spawn the transport task for an established, hello-verified transport.
    ///
    /// Inbound frames and the eventual close are delivered on `events`. The
    /// session starts in [`SessionState::Open`].
    #[must_use]
    pub fn spawn<T: FrameTransport>(
        peer_id: NodeId,
        transport: T,
        initiator: bool,
        events: mpsc::Sender<SessionEvent>,
    ) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE);
        let task = tokio::spawn(run_transport(peer_id.clone(), transport, outbound_rx, events));
        Self {
            peer_id,
            state: SessionState::Open,
            initiator,
            outbound: outbound_tx,
            task,
            liveness: Liveness::default(),
        }
    }

    /// The remote peer's id
    #[must_use]
    pub fn peer_id(&self) -> &NodeId {
        &self.peer_id
    }

    /// Current lifecycle state
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Whether this side initiated the transport
    #[must_use]
    pub fn is_initiator(&self) -> bool {
        self.initiator
    }

    /// Whether the session accepts outbound frames
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state == SessionState::Open
    }

    /// Queue a message for the peer.
    ///
    /// Returns `false` if the session is not open or the outbound queue is
    /// unavailable; the message is silently dropped in that case.
    pub fn send(&self, message: &PeerMessage) -> bool {
        if !self.is_open() {
            return false;
        }
        let Ok(frame) = message.encode() else {
            return false;
        };
        self.outbound.try_send(frame).is_ok()
    }

    /// A clone of the outbound queue for long-running senders (uploads).
    ///
    /// Unlike [`send`](Self::send), awaiting on this applies backpressure
    /// instead of dropping.
    #[must_use]
    pub fn outbound(&self) -> mpsc::Sender<String> {
        self.outbound.clone()
    }

    /// Mutable access to the heartbeat bookkeeping
    pub fn liveness_mut(&mut self) -> &mut Liveness {
        &mut self.liveness
    }

    /// The heartbeat bookkeeping
    #[must_use]
    pub fn liveness(&self) -> &Liveness {
        &self.liveness
    }

    /// Begin local teardown; the session stops accepting sends.
    pub fn begin_close(&mut self) {
        if self.state == SessionState::Open || self.state == SessionState::Connecting {
            self.state = SessionState::Closing;
        }
    }

    /// Mark the transport gone and stop the transport task.
    pub fn mark_closed(&mut self) {
        self.state = SessionState::Closed;
        self.task.abort();
    }
}

impl Drop for PeerSession {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run_transport<T: FrameTransport>(
    peer_id: NodeId,
    mut transport: T,
    mut outbound: mpsc::Receiver<String>,
    events: mpsc::Sender<SessionEvent>,
) {
    loop {
        tokio::select! {
            queued = outbound.recv() => {
                match queued {
                    Some(frame) => {
                        if let Err(e) = transport.send(&frame).await {
                            tracing::debug!(peer = %peer_id, "send failed: {e}");
                            break;
                        }
                    }
                    // Owner dropped the session; stop without a farewell frame.
                    None => return,
                }
            }
            inbound = transport.recv() => {
                match inbound {
                    Ok(Some(frame)) => match PeerMessage::decode(&frame) {
                        Ok(message) => {
                            let event = SessionEvent::Frame { peer: peer_id.clone(), message };
                            if events.send(event).await.is_err() {
                                return;
                            }
                        }
                        Err(e) => {
                            tracing::warn!(peer = %peer_id, "dropping malformed frame: {e}");
                        }
                    },
                    Ok(None) => break,
                    Err(e) => {
                        tracing::debug!(peer = %peer_id, "transport error: {e}");
                        break;
                    }
                }
            }
        }
    }
    let _ = events.send(SessionEvent::Closed { peer: peer_id }).await;
}

/// Returns true when `local` must be the transport initiator toward `remote`.
///
/// When two nodes dial each other simultaneously, the lexicographically
/// larger id opens the transport and the other side's dial is redundant.
#[must_use]
pub fn is_initiator(local: &NodeId, remote: &NodeId) -> bool {
    local > remote
}
