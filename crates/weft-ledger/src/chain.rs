//! The block chain.
//!
//! An ordered, append-only sequence of blocks anchored at a deterministic
//! genesis. Every append re-validates structure, linkage, hash, signature,
//! and every contained transaction; divergent blocks are rejected, never
//! reorganized around.

use crate::mempool::validate_transaction;
use crate::{DEFAULT_MIN_VOTES, LedgerError};
use uuid::Uuid;
use weft_crypto::{Signature, SigningKey, VerifyingKey, sha256};
use weft_proto::{Block, GENESIS_PREVIOUS_HASH, NodeId, Transaction, canonical, now_ms};

/// Compute the hash a block must carry: SHA-256 over the canonical
/// serialization of everything except the `hash` and `signature` fields.
#[must_use]
pub fn compute_block_hash(block: &Block) -> String {
    sha256(&canonical::block_hashable(block)).to_hex()
}

/// The deterministic genesis block every chain starts from.
#[must_use]
pub fn genesis_block() -> Block {
    let mut block = Block {
        index: 0,
        timestamp_ms: 0,
        transactions: Vec::new(),
        previous_hash: GENESIS_PREVIOUS_HASH.to_string(),
        hash: String::new(),
        nonce: 0,
        author: NodeId::genesis(),
        signature: None,
    };
    block.hash = compute_block_hash(&block);
    block
}

/// Build a block extending `previous_hash` at `index`, hashed and stamped
/// with the current time. The caller signs it with [`sign_block`].
#[must_use]
pub fn build_block(
    index: u64,
    previous_hash: String,
    transactions: Vec<Transaction>,
    author: NodeId,
) -> Block {
    let mut block = Block {
        index,
        timestamp_ms: now_ms(),
        transactions,
        previous_hash,
        hash: String::new(),
        nonce: 0,
        author,
        signature: None,
    };
    block.hash = compute_block_hash(&block);
    block
}

/// Sign a block's hash with the author key.
pub fn sign_block(block: &mut Block, key: &SigningKey) {
    block.signature = Some(key.sign(block.hash.as_bytes()).to_hex());
}

/// Quorum for a whitelist of `n` members: `max(min_votes, ceil(n / 2))`.
#[must_use]
pub fn required_approvals(whitelist_len: usize, min_votes: usize) -> usize {
    min_votes.max(whitelist_len.div_ceil(2)).max(DEFAULT_MIN_VOTES)
}

/// The append-only chain of one node.
pub struct Blockchain {
    blocks: Vec<Block>,
}

impl Default for Blockchain {
    fn default() -> Self {
        Self::new()
    }
}

impl Blockchain {
    /// Create a chain holding only the genesis block
    #[must_use]
    pub fn new() -> Self {
        Self {
            blocks: vec![genesis_block()],
        }
    }

    /// Chain length including genesis; also the index of the next block
    #[must_use]
    pub fn height(&self) -> u64 {
        self.blocks.len() as u64
    }

    /// The most recent block
    #[must_use]
    pub fn tip(&self) -> &Block {
        // Invariant: the chain always holds at least the genesis block.
        &self.blocks[self.blocks.len() - 1]
    }

    /// Block at `index`, if committed
    #[must_use]
    pub fn get(&self, index: u64) -> Option<&Block> {
        self.blocks.get(index as usize)
    }

    /// Blocks from `from_index` to the tip (the sync-response payload)
    #[must_use]
    pub fn from_index(&self, from_index: u64) -> Vec<Block> {
        let start = (from_index as usize).min(self.blocks.len());
        self.blocks[start..].to_vec()
    }

    /// Snapshot of the whole chain
    #[must_use]
    pub fn snapshot(&self) -> Vec<Block> {
        self.blocks.clone()
    }

    /// Validate that `block` is the legal next block.
    ///
    /// Checks, in order: field presence, that the block extends the tip
    /// (index and previous hash), hash integrity, the author signature when
    /// present, and every contained transaction (which must all be signed).
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::InvalidBlock`] or the underlying transaction
    /// error for the first failed check.
    pub fn validate_next(
        &self,
        block: &Block,
        key_of: impl Fn(&NodeId) -> Option<VerifyingKey> + Copy,
    ) -> Result<(), LedgerError> {
        if block.hash.is_empty() || block.previous_hash.is_empty() {
            return Err(LedgerError::InvalidBlock("missing hash fields".to_string()));
        }
        if block.timestamp_ms <= 0 {
            return Err(LedgerError::InvalidBlock("missing timestamp".to_string()));
        }
        if block.index != self.height() {
            return Err(LedgerError::InvalidBlock(format!(
                "index {} does not extend height {}",
                block.index,
                self.height()
            )));
        }
        if block.previous_hash != self.tip().hash {
            return Err(LedgerError::InvalidBlock("previous hash mismatch".to_string()));
        }
        if compute_block_hash(block) != block.hash {
            return Err(LedgerError::InvalidBlock("hash mismatch".to_string()));
        }
        if let Some(sig_hex) = &block.signature {
            let signature = Signature::from_hex(sig_hex)
                .map_err(|e| LedgerError::InvalidBlock(format!("malformed signature: {e}")))?;
            let key = key_of(&block.author)
                .ok_or_else(|| LedgerError::UnknownKey(block.author.clone()))?;
            key.verify(block.hash.as_bytes(), &signature)
                .map_err(|_| LedgerError::InvalidBlock("author signature check failed".to_string()))?;
        }
        for tx in &block.transactions {
            if !tx.is_signed() {
                return Err(LedgerError::InvalidBlock(format!(
                    "unsigned transaction {} in block",
                    tx.id
                )));
            }
            validate_transaction(tx, key_of)?;
        }
        Ok(())
    }

    /// Validate and append the next block; returns the ids it committed.
    ///
    /// # Errors
    ///
    /// Propagates the validation error without touching the chain.
    pub fn append(
        &mut self,
        block: Block,
        key_of: impl Fn(&NodeId) -> Option<VerifyingKey> + Copy,
    ) -> Result<Vec<Uuid>, LedgerError> {
        self.validate_next(&block, key_of)?;
        let committed = block.transaction_ids();
        tracing::info!(
            index = block.index,
            author = %block.author,
            transactions = committed.len(),
            "block committed"
        );
        self.blocks.push(block);
        Ok(committed)
    }

    /// Apply a catch-up batch in order, stopping at the first invalid
    /// block. Returns the ids of every transaction committed by the batch.
    pub fn apply_sync_batch(
        &mut self,
        blocks: Vec<Block>,
        key_of: impl Fn(&NodeId) -> Option<VerifyingKey> + Copy,
    ) -> Vec<Uuid> {
        let mut committed = Vec::new();
        for block in blocks {
            // Segments served from below our height overlap; skip the known part.
            if block.index < self.height() {
                continue;
            }
            match self.append(block, key_of) {
                Ok(ids) => committed.extend(ids),
                Err(e) => {
                    tracing::warn!("sync batch aborted: {e}");
                    break;
                }
            }
        }
        committed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_core::OsRng;

    struct Author {
        key: SigningKey,
        id: NodeId,
    }

    impl Author {
        fn new() -> Self {
            let key = SigningKey::generate(&mut OsRng);
            let id = NodeId::from_verifying_key(&key.verifying_key());
            Self { key, id }
        }

        fn signed_tx(&self, to: &str) -> Transaction {
            let mut tx = Transaction::new(self.id.clone(), to, Vec::new(), 1.0);
            let sig = self.key.sign(&canonical::transaction_signable(&tx));
            tx.signature = Some(sig.to_hex());
            tx
        }

        fn next_block(&self, chain: &Blockchain, txs: Vec<Transaction>) -> Block {
            let mut block = build_block(
                chain.height(),
                chain.tip().hash.clone(),
                txs,
                self.id.clone(),
            );
            sign_block(&mut block, &self.key);
            block
        }

        fn key_of(&self) -> impl Fn(&NodeId) -> Option<VerifyingKey> + Copy + '_ {
            move |id: &NodeId| (*id == self.id).then(|| self.key.verifying_key())
        }
    }

    #[test]
    fn test_genesis_shape() {
        let chain = Blockchain::new();
        assert_eq!(chain.height(), 1);
        let genesis = chain.get(0).unwrap();
        assert_eq!(genesis.index, 0);
        assert_eq!(genesis.previous_hash, "0");
        assert_eq!(genesis.author, NodeId::genesis());
        assert!(genesis.transactions.is_empty());
        assert!(genesis.signature.is_none());
    }

    #[test]
    fn test_genesis_is_identical_across_nodes() {
        assert_eq!(genesis_block(), genesis_block());
    }

    #[test]
    fn test_append_valid_block() {
        let author = Author::new();
        let mut chain = Blockchain::new();
        let tx = author.signed_tx("payee");
        let tx_id = tx.id;
        let block = author.next_block(&chain, vec![tx]);

        let committed = chain.append(block, author.key_of()).unwrap();
        assert_eq!(committed, vec![tx_id]);
        assert_eq!(chain.height(), 2);
        assert_eq!(chain.tip().index, 1);
        assert_eq!(chain.tip().previous_hash, chain.get(0).unwrap().hash);
    }

    #[test]
    fn test_hash_recompute_is_stable() {
        let author = Author::new();
        let chain = Blockchain::new();
        let block = author.next_block(&chain, vec![author.signed_tx("x")]);
        assert_eq!(compute_block_hash(&block), block.hash);
        // Serializing and recomputing does not drift.
        let json = serde_json::to_string(&block).unwrap();
        let back: Block = serde_json::from_str(&json).unwrap();
        assert_eq!(compute_block_hash(&back), block.hash);
    }

    #[test]
    fn test_rejects_wrong_index() {
        let author = Author::new();
        let mut chain = Blockchain::new();
        let mut block = author.next_block(&chain, vec![]);
        block.index = 5;
        block.hash = compute_block_hash(&block);
        sign_block(&mut block, &author.key);
        assert!(chain.append(block, author.key_of()).is_err());
    }

    #[test]
    fn test_rejects_wrong_previous_hash() {
        let author = Author::new();
        let mut chain = Blockchain::new();
        let mut block = author.next_block(&chain, vec![]);
        block.previous_hash = "f".repeat(64);
        block.hash = compute_block_hash(&block);
        sign_block(&mut block, &author.key);
        assert!(chain.append(block, author.key_of()).is_err());
    }

    #[test]
    fn test_rejects_tampered_content() {
        let author = Author::new();
        let mut chain = Blockchain::new();
        let mut block = author.next_block(&chain, vec![author.signed_tx("x")]);
        block.transactions.clear(); // hash no longer matches
        assert!(chain.append(block, author.key_of()).is_err());
    }

    #[test]
    fn test_rejects_forged_author_signature() {
        let author = Author::new();
        let forger = Author::new();
        let mut chain = Blockchain::new();
        let mut block = author.next_block(&chain, vec![]);
        // Re-sign with the wrong key.
        sign_block(&mut block, &forger.key);
        assert!(chain.append(block, author.key_of()).is_err());
    }

    #[test]
    fn test_rejects_unsigned_transaction_in_block() {
        let author = Author::new();
        let mut chain = Blockchain::new();
        let unsigned = Transaction::new(author.id.clone(), "x", Vec::new(), 1.0);
        let block = author.next_block(&chain, vec![unsigned]);
        assert!(chain.append(block, author.key_of()).is_err());
    }

    #[test]
    fn test_sync_batch_applies_in_order_and_stops_on_invalid() {
        let author = Author::new();
        let mut source = Blockchain::new();
        for i in 0..3 {
            let block = author.next_block(&source, vec![author.signed_tx(&format!("r{i}"))]);
            source.append(block, author.key_of()).unwrap();
        }

        let mut replica = Blockchain::new();
        let mut batch = source.from_index(1);
        // Corrupt the last block of the batch.
        if let Some(last) = batch.last_mut() {
            last.previous_hash = "0".repeat(64);
        }
        let committed = replica.apply_sync_batch(batch, author.key_of());
        assert_eq!(replica.height(), 3); // applied 2 of 3
        assert_eq!(committed.len(), 2);
    }

    #[test]
    fn test_sync_batch_skips_overlap() {
        let author = Author::new();
        let mut source = Blockchain::new();
        for _ in 0..2 {
            let block = author.next_block(&source, vec![]);
            source.append(block, author.key_of()).unwrap();
        }

        let mut replica = Blockchain::new();
        // Serve from genesis; the replica already has index 0.
        replica.apply_sync_batch(source.from_index(0), author.key_of());
        assert_eq!(replica.height(), source.height());
    }

    #[test]
    fn test_required_approvals() {
        assert_eq!(required_approvals(0, 1), 1);
        assert_eq!(required_approvals(1, 1), 1);
        assert_eq!(required_approvals(2, 1), 1);
        assert_eq!(required_approvals(3, 1), 2);
        assert_eq!(required_approvals(4, 1), 2);
        assert_eq!(required_approvals(5, 1), 3);
        assert_eq!(required_approvals(2, 2), 2);
    }
}
