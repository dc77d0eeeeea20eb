//! File catalog.
//!
//! Tracks the files this node shares and the files its peers have offered.
//! Offers are keyed by file id; when several peers advertise the same id
//! the most recent advertiser wins. All offers from a peer are dropped when
//! it disconnects.

use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;
use weft_crypto::{Digest, sha256};
use weft_proto::{NodeId, now_ms};

/// A locally shared file
#[derive(Debug, Clone)]
pub struct FileEntry {
    /// Catalog id
    pub id: Uuid,
    /// File name
    pub name: String,
    /// Content size in bytes
    pub size: u64,
    /// MIME type
    pub mime_type: String,
    /// SHA-256 of the content
    pub sha256_hash: Digest,
    /// When sharing started (ms since epoch)
    pub shared_at_ms: i64,
    /// How many times the file has been requested
    pub download_count: u64,
}

/// A locally shared file together with its content handle
pub struct SharedFile {
    /// Catalog metadata
    pub entry: FileEntry,
    /// In-memory content
    pub content: Arc<[u8]>,
}

/// A file some peer has offered
#[derive(Debug, Clone)]
pub struct FileOffer {
    /// Catalog id at the advertiser
    pub id: Uuid,
    /// File name
    pub name: String,
    /// Content size in bytes
    pub size: u64,
    /// MIME type
    pub mime_type: String,
    /// Advertised SHA-256 of the content
    pub sha256_hash: Digest,
    /// The peer currently offering the file
    pub advertiser: NodeId,
    /// When the offer was last seen (ms since epoch)
    pub seen_at_ms: i64,
}

/// Shared and offered files of one node.
#[derive(Default)]
pub struct Catalog {
    shared: HashMap<Uuid, SharedFile>,
    offers: HashMap<Uuid, FileOffer>,
}

impl Catalog {
    /// Create an empty catalog
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start sharing content: hashes it, assigns an id, and stores the
    /// entry. Returns the new catalog entry.
    pub fn share(
        &mut self,
        name: impl Into<String>,
        mime_type: impl Into<String>,
        content: Vec<u8>,
    ) -> FileEntry {
        let content: Arc<[u8]> = content.into();
        let entry = FileEntry {
            id: Uuid::new_v4(),
            name: name.into(),
            size: content.len() as u64,
            mime_type: mime_type.into(),
            sha256_hash: sha256(&content),
            shared_at_ms: now_ms(),
            download_count: 0,
        };
        self.shared.insert(entry.id, SharedFile {
            entry: entry.clone(),
            content,
        });
        entry
    }

    /// Stop sharing; returns the removed entry if it existed
    pub fn stop_share(&mut self, file_id: Uuid) -> Option<SharedFile> {
        self.shared.remove(&file_id)
    }

    /// Look up a shared file
    #[must_use]
    pub fn shared(&self, file_id: Uuid) -> Option<&SharedFile> {
        self.shared.get(&file_id)
    }

    /// Count a served request against a shared file
    pub fn record_download(&mut self, file_id: Uuid) {
        if let Some(shared) = self.shared.get_mut(&file_id) {
            shared.entry.download_count += 1;
        }
    }

    /// Snapshot of all shared entries
    #[must_use]
    pub fn shared_entries(&self) -> Vec<FileEntry> {
        self.shared.values().map(|s| s.entry.clone()).collect()
    }

    /// Record an offer heard from a peer.
    ///
    /// Returns `true` when the file id was previously unknown (a new offer
    /// worth surfacing). A repeat offer refreshes the advertiser and
    /// timestamp but reports `false`, so duplicates stay silent.
    pub fn record_offer(&mut self, offer: FileOffer) -> bool {
        match self.offers.get_mut(&offer.id) {
            Some(existing) => {
                existing.advertiser = offer.advertiser;
                existing.seen_at_ms = offer.seen_at_ms;
                false
            }
            None => {
                self.offers.insert(offer.id, offer);
                true
            }
        }
    }

    /// Remove an offer withdrawn by its advertiser.
    ///
    /// A withdrawal from a peer that is not the current advertiser is
    /// ignored (it lost the most-recent-advertiser race).
    pub fn withdraw_offer(&mut self, file_id: Uuid, peer: &NodeId) -> Option<FileOffer> {
        if self.offers.get(&file_id)?.advertiser == *peer {
            self.offers.remove(&file_id)
        } else {
            None
        }
    }

    /// Drop every offer advertised by a disconnected peer
    pub fn drop_offers_from(&mut self, peer: &NodeId) -> Vec<FileOffer> {
        let gone: Vec<Uuid> = self
            .offers
            .values()
            .filter(|o| o.advertiser == *peer)
            .map(|o| o.id)
            .collect();
        gone.into_iter()
            .filter_map(|id| self.offers.remove(&id))
            .collect()
    }

    /// Look up an offer
    #[must_use]
    pub fn offer(&self, file_id: Uuid) -> Option<&FileOffer> {
        self.offers.get(&file_id)
    }

    /// Snapshot of all known offers
    #[must_use]
    pub fn offers(&self) -> Vec<FileOffer> {
        self.offers.values().cloned().collect()
    }

    /// Clear everything (node shutdown)
    pub fn clear(&mut self) {
        self.shared.clear();
        self.offers.clear();
    }
}
