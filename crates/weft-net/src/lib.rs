//! # WEFT Net
//!
//! Peer connection fabric for the WEFT node.
//!
//! This crate provides:
//! - **Framed transports**: ordered, reliable, boundary-preserving text
//!   frame streams (TCP and in-memory implementations)
//! - **Session handshake**: the `hello` exchange that binds a transport to
//!   a verified peer identity
//! - **Peer sessions**: one state machine per connected peer with typed
//!   inbound dispatch and heartbeat bookkeeping
//! - **Peer registry**: at most one session per peer, dial tie-break,
//!   unicast and broadcast
//!
//! The registry and sessions hold no locks; a single owner (the node's
//! actor task) drives all mutations.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod error;
pub mod handshake;
pub mod registry;
pub mod session;
pub mod transport;

pub use error::NetError;
pub use handshake::{await_hello, send_hello};
pub use registry::PeerRegistry;
pub use session::{PeerSession, SessionEvent, SessionState};
pub use transport::{FrameTransport, MemoryTransport, TcpTransport};

/// Heartbeat interval in milliseconds
pub const HEARTBEAT_INTERVAL_MS: u64 = 30_000;

/// Consecutive missed pongs before a session is considered dead
pub const MAX_MISSED_PONGS: u32 = 3;
