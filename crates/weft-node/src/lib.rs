//! # WEFT Node
//!
//! The node orchestration layer: one self-contained value per node that
//! owns its peer registry, file catalog, transfer engine, ledger, and
//! consensus engine, and wires them to the rendezvous client and the peer
//! fabric.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                    NodeHandle (API)                      │
//! │        commands + oneshot replies, event stream          │
//! ├──────────────────────────────────────────────────────────┤
//! │                     actor task                           │
//! │   registry │ catalog │ transfers │ chain │ consensus     │
//! ├──────────────────────────────────────────────────────────┤
//! │   rendezvous client │ peer sessions │ timers             │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! All state mutations happen on the actor task; sessions, uploads, and
//! dial attempts communicate with it by message. Running several nodes in
//! one process shares nothing between them.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod config;
pub mod error;
pub mod events;
pub mod node;

pub use config::{ConsensusConfig, NodeConfig, TransferConfig};
pub use error::NodeError;
pub use events::NodeEvent;
pub use node::{Node, NodeHandle};
