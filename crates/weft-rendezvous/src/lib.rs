//! # WEFT Rendezvous
//!
//! Client and relay server for the rendezvous service: the trusted third
//! party two nodes use to exchange session-setup blobs before they have a
//! direct channel.
//!
//! The wire is newline-delimited JSON text frames over TCP. The client
//! registers on connect, surfaces presence changes and directed signal
//! blobs as events, and reconnects with exponential backoff if the channel
//! drops mid-run. Failure to open the channel at startup is fatal to node
//! startup; the caller decides whether to retry.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod client;
pub mod error;
pub mod server;

pub use client::{RendezvousClient, RendezvousEvent};
pub use error::RendezvousError;
pub use server::RendezvousServer;

/// Default rendezvous service port
pub const DEFAULT_PORT: u16 = 8080;

/// Timeout for opening the rendezvous channel
pub const OPEN_TIMEOUT_SECS: u64 = 10;

/// Initial reconnect delay after losing the channel
pub const RECONNECT_INITIAL_SECS: u64 = 5;

/// Reconnect delay ceiling
pub const RECONNECT_MAX_SECS: u64 = 60;
