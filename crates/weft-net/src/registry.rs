//! Peer registry.
//!
//! Tracks the single session per peer, dials in flight, and the heartbeat
//! schedule. Owned and driven exclusively by the node's actor task.

use crate::session::{PeerSession, is_initiator};
use crate::{MAX_MISSED_PONGS, SessionState};
use std::collections::{HashMap, HashSet};
use weft_proto::{NodeId, PeerMessage};

/// Session state for all peers of one node.
pub struct PeerRegistry {
    local_id: NodeId,
    sessions: HashMap<NodeId, PeerSession>,
    dials_in_flight: HashSet<NodeId>,
}

impl PeerRegistry {
    /// Create an empty registry for the given local identity
    #[must_use]
    pub fn new(local_id: NodeId) -> Self {
        Self {
            local_id,
            sessions: HashMap::new(),
            dials_in_flight: HashSet::new(),
        }
    }

    /// This node's id
    #[must_use]
    pub fn local_id(&self) -> &NodeId {
        &self.local_id
    }

    /// Whether this node is the transport initiator toward `peer`
    #[must_use]
    pub fn initiates_toward(&self, peer: &NodeId) -> bool {
        is_initiator(&self.local_id, peer)
    }

    /// Record a dial attempt.
    ///
    /// Returns `false` (a no-op) when a session already exists or a dial is
    /// already in flight for the peer.
    pub fn begin_dial(&mut self, peer: &NodeId) -> bool {
        if self.sessions.contains_key(peer) || self.dials_in_flight.contains(peer) {
            return false;
        }
        self.dials_in_flight.insert(peer.clone());
        true
    }

    /// Clear the in-flight mark after success or transport error
    pub fn finish_dial(&mut self, peer: &NodeId) {
        self.dials_in_flight.remove(peer);
    }

    /// Whether a dial is currently in flight for `peer`
    #[must_use]
    pub fn dial_in_flight(&self, peer: &NodeId) -> bool {
        self.dials_in_flight.contains(peer)
    }

    /// Install a freshly opened session.
    ///
    /// If a session for the peer already exists the new one is returned for
    /// the caller to discard: a redundant simultaneous-dial artifact.
    pub fn install(&mut self, session: PeerSession) -> Result<(), PeerSession> {
        let peer = session.peer_id().clone();
        if self.sessions.contains_key(&peer) {
            tracing::debug!(peer = %peer, "discarding redundant session");
            return Err(session);
        }
        self.dials_in_flight.remove(&peer);
        self.sessions.insert(peer, session);
        Ok(())
    }

    /// Remove and return a session, stopping its transport task
    pub fn remove(&mut self, peer: &NodeId) -> Option<PeerSession> {
        self.dials_in_flight.remove(peer);
        let mut session = self.sessions.remove(peer)?;
        session.mark_closed();
        Some(session)
    }

    /// Whether an open session to `peer` exists
    #[must_use]
    pub fn is_connected(&self, peer: &NodeId) -> bool {
        self.sessions.get(peer).is_some_and(PeerSession::is_open)
    }

    /// Access a session
    #[must_use]
    pub fn get(&self, peer: &NodeId) -> Option<&PeerSession> {
        self.sessions.get(peer)
    }

    /// Mutable access to a session
    pub fn get_mut(&mut self, peer: &NodeId) -> Option<&mut PeerSession> {
        self.sessions.get_mut(peer)
    }

    /// Send to one peer. Returns `false` if no open session exists or the
    /// frame was dropped.
    pub fn send(&self, peer: &NodeId, message: &PeerMessage) -> bool {
        self.sessions
            .get(peer)
            .is_some_and(|session| session.send(message))
    }

    /// Send to every open session except `exclude`. Returns the number of
    /// peers the frame was queued to.
    pub fn broadcast(&self, message: &PeerMessage, exclude: Option<&NodeId>) -> usize {
        self.sessions
            .values()
            .filter(|s| exclude.is_none_or(|ex| s.peer_id() != ex))
            .filter(|s| s.send(message))
            .count()
    }

    /// Ids of all peers with an open session
    #[must_use]
    pub fn connected_peers(&self) -> Vec<NodeId> {
        self.sessions
            .values()
            .filter(|s| s.is_open())
            .map(|s| s.peer_id().clone())
            .collect()
    }

    /// Number of sessions, in any state
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// One heartbeat interval elapsed: ping every open session, age unpaid
    /// pings, and collect peers whose sessions have expired.
    ///
    /// A session expires after [`MAX_MISSED_PONGS`] consecutive intervals
    /// without a pong; expired sessions move to `Closing` and are returned
    /// for the owner to tear down.
    pub fn heartbeat_tick(&mut self, now_ms: i64) -> Vec<NodeId> {
        let mut expired = Vec::new();
        for session in self.sessions.values_mut() {
            if session.state() != SessionState::Open {
                continue;
            }
            let liveness = *session.liveness();
            let awaiting_pong = liveness.last_ping_sent_ms > 0
                && liveness.last_pong_received_ms < liveness.last_ping_sent_ms;
            if awaiting_pong {
                let missed = liveness.missed_pongs + 1;
                session.liveness_mut().missed_pongs = missed;
                if missed >= MAX_MISSED_PONGS {
                    tracing::warn!(peer = %session.peer_id(), missed, "heartbeat expired");
                    session.begin_close();
                    expired.push(session.peer_id().clone());
                    continue;
                }
            } else {
                session.liveness_mut().missed_pongs = 0;
            }
            if session.send(&PeerMessage::Ping { timestamp: now_ms }) {
                session.liveness_mut().last_ping_sent_ms = now_ms;
            }
        }
        expired
    }

    /// Record a pong from `peer`
    pub fn record_pong(&mut self, peer: &NodeId, now_ms: i64) {
        if let Some(session) = self.sessions.get_mut(peer) {
            let liveness = session.liveness_mut();
            liveness.last_pong_received_ms = now_ms;
            liveness.missed_pongs = 0;
        }
    }

    /// Tear down every session without sending farewell frames
    pub fn close_all(&mut self) {
        for (_, mut session) in self.sessions.drain() {
            session.mark_closed();
        }
        self.dials_in_flight.clear();
    }
}
