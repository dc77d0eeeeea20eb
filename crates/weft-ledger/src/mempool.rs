//! Mempool and transaction validation.
//!
//! Pending transactions keyed by id, kept in first-receipt order because
//! block inclusion takes the oldest entries first. Entries leave the pool
//! only when a block commits them.

use crate::{LedgerError, MAX_BLOCK_TRANSACTIONS};
use indexmap::IndexMap;
use uuid::Uuid;
use weft_crypto::{Signature, VerifyingKey};
use weft_proto::{NodeId, Transaction, canonical};

/// Validate a transaction for mempool admission.
///
/// `key_of` resolves a signer's public key; signed transactions from
/// signers with no known key are invalid. Unsigned transactions are
/// admissible here (system-internal use) but are never included in blocks.
///
/// # Errors
///
/// Returns [`LedgerError::InvalidTransaction`] describing the first failed
/// check.
pub fn validate_transaction(
    tx: &Transaction,
    key_of: impl Fn(&NodeId) -> Option<VerifyingKey>,
) -> Result<(), LedgerError> {
    if tx.from.as_str().is_empty() {
        return Err(LedgerError::InvalidTransaction("missing sender".to_string()));
    }
    if tx.timestamp_ms <= 0 {
        return Err(LedgerError::InvalidTransaction("missing timestamp".to_string()));
    }
    if !tx.amount.is_finite() {
        return Err(LedgerError::InvalidTransaction("non-finite amount".to_string()));
    }
    if let Some(sig_hex) = &tx.signature {
        let signature = Signature::from_hex(sig_hex)
            .map_err(|e| LedgerError::InvalidTransaction(format!("malformed signature: {e}")))?;
        let key = key_of(&tx.from).ok_or_else(|| LedgerError::UnknownKey(tx.from.clone()))?;
        key.verify(&canonical::transaction_signable(tx), &signature)
            .map_err(|_| LedgerError::InvalidTransaction("signature check failed".to_string()))?;
    }
    Ok(())
}

/// Pending transactions of one node.
#[derive(Default)]
pub struct Mempool {
    entries: IndexMap<Uuid, Transaction>,
}

impl Mempool {
    /// Create an empty mempool
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a transaction; returns `false` if the id is already present.
    pub fn insert(&mut self, tx: Transaction) -> bool {
        if self.entries.contains_key(&tx.id) {
            return false;
        }
        self.entries.insert(tx.id, tx);
        true
    }

    /// Whether the id is pooled
    #[must_use]
    pub fn contains(&self, id: &Uuid) -> bool {
        self.entries.contains_key(id)
    }

    /// Number of pending transactions
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the pool is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The oldest signed transactions, up to [`MAX_BLOCK_TRANSACTIONS`].
    ///
    /// Entries stay pooled until the block actually commits; a failed
    /// round leaves the pool untouched. Unsigned entries are skipped:
    /// committed blocks carry only authenticated transactions.
    #[must_use]
    pub fn take_for_proposal(&self) -> Vec<Transaction> {
        self.entries
            .values()
            .filter(|tx| tx.is_signed())
            .take(MAX_BLOCK_TRANSACTIONS)
            .cloned()
            .collect()
    }

    /// Remove committed transaction ids
    pub fn purge(&mut self, ids: &[Uuid]) {
        for id in ids {
            self.entries.shift_remove(id);
        }
    }

    /// Snapshot in first-receipt order
    #[must_use]
    pub fn snapshot(&self) -> Vec<Transaction> {
        self.entries.values().cloned().collect()
    }

    /// Clear everything (node shutdown)
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_core::OsRng;
    use weft_crypto::SigningKey;

    fn signed_tx(signer: &SigningKey, to: &str) -> Transaction {
        let from = NodeId::from_verifying_key(&signer.verifying_key());
        let mut tx = Transaction::new(from, to, Vec::new(), 1.0);
        let sig = signer.sign(&canonical::transaction_signable(&tx));
        tx.signature = Some(sig.to_hex());
        tx
    }

    #[test]
    fn test_insert_is_idempotent() {
        let mut pool = Mempool::new();
        let tx = Transaction::new(NodeId::random(), "x", Vec::new(), 0.0);
        assert!(pool.insert(tx.clone()));
        assert!(!pool.insert(tx));
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_proposal_takes_oldest_first() {
        let key = SigningKey::generate(&mut OsRng);
        let mut pool = Mempool::new();
        for i in 0..15 {
            pool.insert(signed_tx(&key, &format!("r{i}")));
        }
        let taken = pool.take_for_proposal();
        assert_eq!(taken.len(), MAX_BLOCK_TRANSACTIONS);
        assert_eq!(taken[0].to, "r0");
        assert_eq!(taken[9].to, "r9");
        // The pool keeps everything until commit.
        assert_eq!(pool.len(), 15);
    }

    #[test]
    fn test_proposal_skips_unsigned() {
        let key = SigningKey::generate(&mut OsRng);
        let mut pool = Mempool::new();
        pool.insert(Transaction::new(NodeId::random(), "u", Vec::new(), 0.0));
        pool.insert(signed_tx(&key, "s"));
        let taken = pool.take_for_proposal();
        assert_eq!(taken.len(), 1);
        assert_eq!(taken[0].to, "s");
    }

    #[test]
    fn test_purge_removes_committed() {
        let key = SigningKey::generate(&mut OsRng);
        let mut pool = Mempool::new();
        let a = signed_tx(&key, "a");
        let b = signed_tx(&key, "b");
        let a_id = a.id;
        pool.insert(a);
        pool.insert(b);
        pool.purge(&[a_id]);
        assert_eq!(pool.len(), 1);
        assert!(!pool.contains(&a_id));
    }

    #[test]
    fn test_validate_signed_transaction() {
        let key = SigningKey::generate(&mut OsRng);
        let pub_key = key.verifying_key();
        let tx = signed_tx(&key, "payee");
        assert!(validate_transaction(&tx, |_| Some(pub_key)).is_ok());
    }

    #[test]
    fn test_validate_rejects_tampered_signature() {
        let key = SigningKey::generate(&mut OsRng);
        let pub_key = key.verifying_key();
        let mut tx = signed_tx(&key, "payee");
        tx.amount = 9999.0;
        assert!(matches!(
            validate_transaction(&tx, |_| Some(pub_key)),
            Err(LedgerError::InvalidTransaction(_))
        ));
    }

    #[test]
    fn test_validate_rejects_unknown_signer() {
        let key = SigningKey::generate(&mut OsRng);
        let tx = signed_tx(&key, "payee");
        assert!(matches!(
            validate_transaction(&tx, |_| None),
            Err(LedgerError::UnknownKey(_))
        ));
    }

    #[test]
    fn test_validate_accepts_unsigned() {
        let tx = Transaction::new(NodeId::random(), "payee", Vec::new(), 0.0);
        assert!(validate_transaction(&tx, |_| None).is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_timestamp() {
        let mut tx = Transaction::new(NodeId::random(), "payee", Vec::new(), 0.0);
        tx.timestamp_ms = 0;
        assert!(validate_transaction(&tx, |_| None).is_err());
    }
}
