//! Chunked transfer engine.
//!
//! Downloads are tracked per file id: chunks land in a sparse map keyed by
//! index, duplicates are idempotent, and on completion the content is
//! reassembled in index order and verified against the advertised SHA-256.
//! The engine enforces the download cap and the per-peer upload cap; all
//! actual I/O is the owner's business.

use crate::catalog::FileOffer;
use crate::{DEFAULT_CHUNK_SIZE, MAX_CONCURRENT_DOWNLOADS, MAX_UPLOADS_PER_PEER, TransferError};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64;
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;
use weft_crypto::{Digest, sha256};
use weft_proto::{NodeId, now_ms};

/// One in-flight download
pub struct TransferState {
    /// File being downloaded
    pub file_id: Uuid,
    /// Advertised name
    pub name: String,
    /// Advertised MIME type
    pub mime_type: String,
    /// Advertised content digest, checked on completion
    pub expected_hash: Digest,
    /// Advertised content size
    pub expected_size: u64,
    /// Chunk count announced by `file-metadata`; 0 until it arrives
    pub total_chunks: u64,
    /// Chunk size announced by `file-metadata`
    pub chunk_size: u64,
    /// Peer serving the download
    pub source_peer: NodeId,
    /// When the download started (ms since epoch)
    pub started_at_ms: i64,
    chunks: BTreeMap<u64, Vec<u8>>,
}

impl TransferState {
    fn from_offer(offer: &FileOffer) -> Self {
        Self {
            file_id: offer.id,
            name: offer.name.clone(),
            mime_type: offer.mime_type.clone(),
            expected_hash: offer.sha256_hash,
            expected_size: offer.size,
            total_chunks: 0,
            chunk_size: DEFAULT_CHUNK_SIZE,
            source_peer: offer.advertiser.clone(),
            started_at_ms: now_ms(),
            chunks: BTreeMap::new(),
        }
    }

    /// Chunks received so far
    #[must_use]
    pub fn received(&self) -> u64 {
        self.chunks.len() as u64
    }

    fn is_complete(&self) -> bool {
        self.total_chunks > 0 && self.received() == self.total_chunks
    }

    fn assemble(&mut self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.expected_size as usize);
        for chunk in std::mem::take(&mut self.chunks).into_values() {
            bytes.extend_from_slice(&chunk);
        }
        bytes
    }
}

/// What a received chunk did to its transfer
#[derive(Debug)]
pub enum ChunkOutcome {
    /// Chunk stored; transfer still incomplete
    Progress {
        /// Chunks received so far
        received: u64,
        /// Chunks expected in total
        total: u64,
    },
    /// Final chunk stored and the content verified
    Complete {
        /// The reassembled, hash-verified content
        bytes: Vec<u8>,
        /// Chunks received in total
        total: u64,
    },
    /// Chunk index already present; nothing changed
    Duplicate,
    /// No matching transfer (cancelled, finished, or never started)
    Ignored,
    /// The transfer was discarded
    Failed(TransferError),
}

/// Download and upload accounting for one node.
pub struct TransferEngine {
    downloads: HashMap<Uuid, TransferState>,
    uploads_per_peer: HashMap<NodeId, usize>,
    max_downloads: usize,
    max_uploads_per_peer: usize,
}

impl Default for TransferEngine {
    fn default() -> Self {
        Self::new(MAX_CONCURRENT_DOWNLOADS, MAX_UPLOADS_PER_PEER)
    }
}

impl TransferEngine {
    /// Create an engine with explicit caps
    #[must_use]
    pub fn new(max_downloads: usize, max_uploads_per_peer: usize) -> Self {
        Self {
            downloads: HashMap::new(),
            uploads_per_peer: HashMap::new(),
            max_downloads,
            max_uploads_per_peer,
        }
    }

    /// Number of in-flight downloads
    #[must_use]
    pub fn active_downloads(&self) -> usize {
        self.downloads.len()
    }

    /// Start tracking a download from a known offer.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::TooManyTransfers`] at the cap and
    /// [`TransferError::AlreadyDownloading`] for a duplicate request.
    pub fn begin_download(&mut self, offer: &FileOffer) -> Result<(), TransferError> {
        if self.downloads.contains_key(&offer.id) {
            return Err(TransferError::AlreadyDownloading(offer.id));
        }
        if self.downloads.len() >= self.max_downloads {
            return Err(TransferError::TooManyTransfers);
        }
        self.downloads.insert(offer.id, TransferState::from_offer(offer));
        Ok(())
    }

    /// Record the transfer header. Frames from anyone but the transfer's
    /// source peer are ignored.
    pub fn on_metadata(
        &mut self,
        peer: &NodeId,
        file_id: Uuid,
        total_chunks: u64,
        chunk_size: u64,
    ) -> bool {
        match self.downloads.get_mut(&file_id) {
            Some(state) if state.source_peer == *peer => {
                state.total_chunks = total_chunks;
                state.chunk_size = chunk_size;
                true
            }
            _ => false,
        }
    }

    /// Store one chunk and report what happened.
    ///
    /// Duplicates are idempotent; chunks for unknown transfers (late
    /// arrivals after completion or cancellation) are ignored. Completion
    /// verifies the reassembled content and discards the transfer on a
    /// digest mismatch.
    pub fn on_chunk(
        &mut self,
        peer: &NodeId,
        file_id: Uuid,
        chunk_index: u64,
        chunk_data_b64: &str,
    ) -> ChunkOutcome {
        let Some(state) = self.downloads.get_mut(&file_id) else {
            return ChunkOutcome::Ignored;
        };
        if state.source_peer != *peer {
            return ChunkOutcome::Ignored;
        }
        if state.chunks.contains_key(&chunk_index) {
            return ChunkOutcome::Duplicate;
        }
        let data = match B64.decode(chunk_data_b64) {
            Ok(data) => data,
            Err(e) => {
                self.downloads.remove(&file_id);
                return ChunkOutcome::Failed(TransferError::BadChunk(e.to_string()));
            }
        };
        state.chunks.insert(chunk_index, data);

        if !state.is_complete() {
            return ChunkOutcome::Progress {
                received: state.received(),
                total: state.total_chunks,
            };
        }

        let total = state.total_chunks;
        let expected = state.expected_hash;
        let bytes = state.assemble();
        self.downloads.remove(&file_id);
        let actual = sha256(&bytes);
        if actual != expected {
            tracing::warn!(file = %file_id, "reassembled content failed verification");
            return ChunkOutcome::Failed(TransferError::IntegrityFailure {
                expected: expected.to_hex(),
                actual: actual.to_hex(),
            });
        }
        ChunkOutcome::Complete { bytes, total }
    }

    /// Drop a download by explicit request
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::NotDownloading`] if nothing is in flight
    /// for the id.
    pub fn cancel(&mut self, file_id: Uuid) -> Result<TransferState, TransferError> {
        self.downloads
            .remove(&file_id)
            .ok_or(TransferError::NotDownloading(file_id))
    }

    /// Drop every download served by a disconnected peer; returns the
    /// affected file ids.
    pub fn drop_downloads_from(&mut self, peer: &NodeId) -> Vec<Uuid> {
        let lost: Vec<Uuid> = self
            .downloads
            .values()
            .filter(|t| t.source_peer == *peer)
            .map(|t| t.file_id)
            .collect();
        for id in &lost {
            self.downloads.remove(id);
        }
        lost
    }

    /// Access an in-flight download
    #[must_use]
    pub fn download(&self, file_id: Uuid) -> Option<&TransferState> {
        self.downloads.get(&file_id)
    }

    /// Reserve an upload slot toward `peer`.
    ///
    /// Returns `false` when the peer is already at its upload cap.
    pub fn begin_upload(&mut self, peer: &NodeId) -> bool {
        let active = self.uploads_per_peer.entry(peer.clone()).or_insert(0);
        if *active >= self.max_uploads_per_peer {
            return false;
        }
        *active += 1;
        true
    }

    /// Release an upload slot
    pub fn finish_upload(&mut self, peer: &NodeId) {
        if let Some(active) = self.uploads_per_peer.get_mut(peer) {
            *active = active.saturating_sub(1);
            if *active == 0 {
                self.uploads_per_peer.remove(peer);
            }
        }
    }

    /// Clear everything (node shutdown)
    pub fn clear(&mut self) {
        self.downloads.clear();
        self.uploads_per_peer.clear();
    }
}

/// Split content into base64 chunk payloads.
///
/// Yields `(index, payload, is_last)` triples. Empty content yields a
/// single empty final chunk so the receiver still observes completion.
pub fn chunk_payloads(
    content: &[u8],
    chunk_size: u64,
) -> impl Iterator<Item = (u64, String, bool)> + '_ {
    let chunk_size = chunk_size.max(1) as usize;
    let total = content.len().div_ceil(chunk_size).max(1);
    (0..total).map(move |i| {
        let start = i * chunk_size;
        let end = (start + chunk_size).min(content.len());
        (
            i as u64,
            B64.encode(&content[start..end]),
            i + 1 == total,
        )
    })
}

/// Number of chunks `content` splits into
#[must_use]
pub fn chunk_count(content_len: u64, chunk_size: u64) -> u64 {
    content_len.div_ceil(chunk_size.max(1)).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offer(peer: &str, content: &[u8]) -> FileOffer {
        FileOffer {
            id: Uuid::new_v4(),
            name: "blob.bin".to_string(),
            size: content.len() as u64,
            mime_type: "application/octet-stream".to_string(),
            sha256_hash: sha256(content),
            advertiser: NodeId::from(peer),
            seen_at_ms: now_ms(),
        }
    }

    fn run_transfer(engine: &mut TransferEngine, offer: &FileOffer, content: &[u8], chunk: u64) -> ChunkOutcome {
        engine.begin_download(offer).unwrap();
        let total = chunk_count(content.len() as u64, chunk);
        engine.on_metadata(&offer.advertiser, offer.id, total, chunk);
        let mut last = ChunkOutcome::Ignored;
        for (i, payload, _) in chunk_payloads(content, chunk) {
            last = engine.on_chunk(&offer.advertiser, offer.id, i, &payload);
        }
        last
    }

    #[test]
    fn test_download_reassembles_and_verifies() {
        let mut engine = TransferEngine::default();
        let content = vec![0xabu8; 200];
        let offer = offer("aaaaaaaaaaaaaaaa", &content);
        match run_transfer(&mut engine, &offer, &content, 64) {
            ChunkOutcome::Complete { bytes, total } => {
                assert_eq!(bytes, content);
                assert_eq!(total, 4);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(engine.active_downloads(), 0);
    }

    #[test]
    fn test_out_of_order_chunks_reassemble() {
        let mut engine = TransferEngine::default();
        let content: Vec<u8> = (0..150u8).collect();
        let offer = offer("aaaaaaaaaaaaaaaa", &content);
        engine.begin_download(&offer).unwrap();
        engine.on_metadata(&offer.advertiser, offer.id, 3, 64);

        let payloads: Vec<_> = chunk_payloads(&content, 64).collect();
        for &i in &[2usize, 0, 1] {
            let (index, payload, _) = &payloads[i];
            let outcome = engine.on_chunk(&offer.advertiser, offer.id, *index, payload);
            if i == 1 {
                match outcome {
                    ChunkOutcome::Complete { bytes, .. } => assert_eq!(bytes, content),
                    other => panic!("unexpected outcome: {other:?}"),
                }
            }
        }
    }

    #[test]
    fn test_duplicate_chunk_is_idempotent() {
        let mut engine = TransferEngine::default();
        let content = vec![1u8; 100];
        let offer = offer("aaaaaaaaaaaaaaaa", &content);
        engine.begin_download(&offer).unwrap();
        engine.on_metadata(&offer.advertiser, offer.id, 2, 64);

        let (i, payload, _) = chunk_payloads(&content, 64).next().unwrap();
        assert!(matches!(
            engine.on_chunk(&offer.advertiser, offer.id, i, &payload),
            ChunkOutcome::Progress { received: 1, total: 2 }
        ));
        assert!(matches!(
            engine.on_chunk(&offer.advertiser, offer.id, i, &payload),
            ChunkOutcome::Duplicate
        ));
        assert_eq!(engine.download(offer.id).unwrap().received(), 1);
    }

    #[test]
    fn test_late_chunk_after_completion_is_ignored() {
        let mut engine = TransferEngine::default();
        let content = vec![2u8; 50];
        let offer = offer("aaaaaaaaaaaaaaaa", &content);
        run_transfer(&mut engine, &offer, &content, 64);

        let (i, payload, _) = chunk_payloads(&content, 64).next().unwrap();
        assert!(matches!(
            engine.on_chunk(&offer.advertiser, offer.id, i, &payload),
            ChunkOutcome::Ignored
        ));
    }

    #[test]
    fn test_integrity_failure_discards_transfer() {
        let mut engine = TransferEngine::default();
        let content = vec![3u8; 50];
        let mut bad = offer("aaaaaaaaaaaaaaaa", &content);
        bad.sha256_hash = sha256(b"something else");

        match run_transfer(&mut engine, &bad, &content, 64) {
            ChunkOutcome::Failed(TransferError::IntegrityFailure { .. }) => {}
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(engine.active_downloads(), 0);
    }

    #[test]
    fn test_download_cap() {
        let mut engine = TransferEngine::default();
        for _ in 0..MAX_CONCURRENT_DOWNLOADS {
            let o = offer("aaaaaaaaaaaaaaaa", b"x");
            engine.begin_download(&o).unwrap();
        }
        let fourth = offer("aaaaaaaaaaaaaaaa", b"x");
        assert_eq!(
            engine.begin_download(&fourth),
            Err(TransferError::TooManyTransfers)
        );
    }

    #[test]
    fn test_source_disconnect_drops_transfers() {
        let mut engine = TransferEngine::default();
        let o1 = offer("aaaaaaaaaaaaaaaa", b"one");
        let o2 = offer("bbbbbbbbbbbbbbbb", b"two");
        engine.begin_download(&o1).unwrap();
        engine.begin_download(&o2).unwrap();

        let lost = engine.drop_downloads_from(&NodeId::from("aaaaaaaaaaaaaaaa"));
        assert_eq!(lost, vec![o1.id]);
        assert_eq!(engine.active_downloads(), 1);
    }

    #[test]
    fn test_cancel() {
        let mut engine = TransferEngine::default();
        let o = offer("aaaaaaaaaaaaaaaa", b"bytes");
        engine.begin_download(&o).unwrap();
        assert!(engine.cancel(o.id).is_ok());
        assert!(matches!(
            engine.cancel(o.id),
            Err(TransferError::NotDownloading(id)) if id == o.id
        ));
    }

    #[test]
    fn test_chunk_from_wrong_peer_ignored() {
        let mut engine = TransferEngine::default();
        let content = vec![5u8; 10];
        let o = offer("aaaaaaaaaaaaaaaa", &content);
        engine.begin_download(&o).unwrap();
        engine.on_metadata(&o.advertiser, o.id, 1, 64);

        let (i, payload, _) = chunk_payloads(&content, 64).next().unwrap();
        let intruder = NodeId::from("cccccccccccccccc");
        assert!(matches!(
            engine.on_chunk(&intruder, o.id, i, &payload),
            ChunkOutcome::Ignored
        ));
    }

    #[test]
    fn test_upload_slots_per_peer() {
        let mut engine = TransferEngine::new(3, 2);
        let peer = NodeId::from("aaaaaaaaaaaaaaaa");
        assert!(engine.begin_upload(&peer));
        assert!(engine.begin_upload(&peer));
        assert!(!engine.begin_upload(&peer));
        engine.finish_upload(&peer);
        assert!(engine.begin_upload(&peer));

        // Another peer has its own slots.
        assert!(engine.begin_upload(&NodeId::from("bbbbbbbbbbbbbbbb")));
    }

    #[test]
    fn test_chunk_payload_boundaries() {
        // 200 KiB with 64 KiB chunks: three full chunks and a 3072-byte tail.
        let content = vec![0u8; 200 * 1024];
        let chunks: Vec<_> = chunk_payloads(&content, DEFAULT_CHUNK_SIZE).collect();
        assert_eq!(chunks.len(), 4);
        assert!(chunks[..3].iter().all(|(_, _, last)| !last));
        assert!(chunks[3].2);
        let tail = B64.decode(&chunks[3].1).unwrap();
        assert_eq!(tail.len(), 3072);
    }
}
