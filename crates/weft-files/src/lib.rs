//! # WEFT Files
//!
//! File catalog and chunked transfer engine.
//!
//! This crate provides:
//! - **Catalog**: locally shared entries and remotely offered files, with
//!   reconciliation on peer connect and disconnect
//! - **Transfer engine**: metered download scheduling with a concurrency
//!   cap, sparse chunk reassembly with SHA-256 verification, and the
//!   chunking helpers the upload path uses
//!
//! Content lives in memory behind `Arc<[u8]>` handles; persistence is a
//! front-end concern.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod catalog;
pub mod error;
pub mod transfer;

pub use catalog::{Catalog, FileEntry, FileOffer, SharedFile};
pub use error::TransferError;
pub use transfer::{ChunkOutcome, TransferEngine, TransferState, chunk_payloads};

/// Default chunk size in bytes
pub const DEFAULT_CHUNK_SIZE: u64 = 65_536;

/// Maximum concurrent downloads per node
pub const MAX_CONCURRENT_DOWNLOADS: usize = 3;

/// Maximum concurrent uploads served to a single peer; one above the
/// downloader's own cap so a compliant peer is never throttled
pub const MAX_UPLOADS_PER_PEER: usize = 4;

/// Chunks sent between backpressure yields on the upload path
pub const UPLOAD_BURST: u64 = 10;

/// Upload yield duration in milliseconds
pub const UPLOAD_YIELD_MS: u64 = 10;
