//! Node configuration.

use std::net::SocketAddr;
use std::time::Duration;
use weft_files::{DEFAULT_CHUNK_SIZE, MAX_CONCURRENT_DOWNLOADS, MAX_UPLOADS_PER_PEER};
use weft_ledger::{DEFAULT_MIN_VOTES, PRODUCTION_INTERVAL_MS, ROTATION_INTERVAL_MS, VOTE_WINDOW_MS};
use weft_net::HEARTBEAT_INTERVAL_MS;
use weft_proto::NodeId;

/// Node configuration
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Rendezvous service address
    pub rendezvous_addr: SocketAddr,

    /// Listen address for peer transports (port 0 auto-selects)
    pub listen_addr: SocketAddr,

    /// Address advertised in session-setup blobs; derived from the bound
    /// listener when absent (loopback when bound to an unspecified IP)
    pub advertised_addr: Option<SocketAddr>,

    /// Ed25519 seed for a persistent identity; random when absent
    pub identity_seed: Option<[u8; 32]>,

    /// Initial whitelist members, in schedule order
    pub whitelist: Vec<NodeId>,

    /// Whether this node adds itself to its whitelist at startup
    pub whitelist_self: bool,

    /// Transfer configuration
    pub transfer: TransferConfig,

    /// Consensus configuration
    pub consensus: ConsensusConfig,

    /// Heartbeat interval
    pub heartbeat_interval: Duration,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            rendezvous_addr: ([127, 0, 0, 1], weft_rendezvous::DEFAULT_PORT).into(),
            listen_addr: "0.0.0.0:0".parse().expect("static address"),
            advertised_addr: None,
            identity_seed: None,
            whitelist: Vec::new(),
            whitelist_self: false,
            transfer: TransferConfig::default(),
            consensus: ConsensusConfig::default(),
            heartbeat_interval: Duration::from_millis(HEARTBEAT_INTERVAL_MS),
        }
    }
}

/// Transfer configuration
#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// Chunk size for uploads
    pub chunk_size: u64,

    /// Maximum concurrent downloads
    pub max_downloads: usize,

    /// Maximum concurrent uploads served to one peer
    pub max_uploads_per_peer: usize,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_downloads: MAX_CONCURRENT_DOWNLOADS,
            max_uploads_per_peer: MAX_UPLOADS_PER_PEER,
        }
    }
}

/// Consensus timing and quorum configuration.
///
/// The defaults are the protocol values; tests compress the intervals.
#[derive(Debug, Clone)]
pub struct ConsensusConfig {
    /// Minimum approvals regardless of whitelist size
    pub min_votes: usize,

    /// Leader rotation slot length
    pub rotation_interval: Duration,

    /// Leader block-production interval
    pub production_interval: Duration,

    /// Voting window per proposal
    pub vote_window: Duration,

    /// Delay before the catch-up sync request to a new whitelisted peer
    pub sync_delay: Duration,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            min_votes: DEFAULT_MIN_VOTES,
            rotation_interval: Duration::from_millis(ROTATION_INTERVAL_MS as u64),
            production_interval: Duration::from_millis(PRODUCTION_INTERVAL_MS),
            vote_window: Duration::from_millis(VOTE_WINDOW_MS),
            sync_delay: Duration::from_secs(1),
        }
    }
}
