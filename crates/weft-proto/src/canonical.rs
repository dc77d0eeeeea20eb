//! Canonical serialization for signable and hashable payloads.
//!
//! Signatures and hashes are only meaningful if every node serializes the
//! covered fields to identical bytes. `serde_json` makes no ordering
//! promise across versions and renders some floats in exponent notation, so
//! the canonical forms are assembled by hand here:
//!
//! - transaction signing blob: `{from, to, data, amount, timestamp}`
//! - block hashing blob: `{index, timestamp, transactions, previousHash,
//!   nonce, author}`, where each transaction is rendered as its full record
//!   `{id, from, to, data, amount, timestamp, signature}` so the block hash
//!   covers exactly the committed entries
//!
//! `amount` is always rendered in plain decimal, never with an exponent.

use crate::{Block, Transaction};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64;
use std::fmt::Write;

/// Render an amount in plain decimal without exponent notation.
///
/// Integral amounts render without a fractional part (`3`, not `3.0`) so
/// the form is stable regardless of how the value was produced.
#[must_use]
pub fn fmt_amount(amount: f64) -> String {
    if amount.is_finite() && amount.fract() == 0.0 && amount.abs() < 9_007_199_254_740_992.0 {
        format!("{}", amount as i64)
    } else {
        // Rust's float Display never uses exponent notation.
        format!("{amount}")
    }
}

fn json_str(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| "\"\"".to_string())
}

/// The byte blob a transaction signature covers.
#[must_use]
pub fn transaction_signable(tx: &Transaction) -> Vec<u8> {
    let mut out = String::new();
    let _ = write!(
        out,
        "{{\"from\":{},\"to\":{},\"data\":{},\"amount\":{},\"timestamp\":{}}}",
        json_str(tx.from.as_str()),
        json_str(&tx.to),
        json_str(&B64.encode(&tx.data)),
        fmt_amount(tx.amount),
        tx.timestamp_ms,
    );
    out.into_bytes()
}

/// The full canonical record of a committed transaction.
///
/// Embedded in the block hashing blob; includes `id` and `signature` so the
/// block hash pins the exact entries that were committed.
#[must_use]
pub fn transaction_record(tx: &Transaction) -> String {
    let signature = match &tx.signature {
        Some(sig) => json_str(sig),
        None => "null".to_string(),
    };
    format!(
        "{{\"id\":{},\"from\":{},\"to\":{},\"data\":{},\"amount\":{},\"timestamp\":{},\"signature\":{}}}",
        json_str(&tx.id.to_string()),
        json_str(tx.from.as_str()),
        json_str(&tx.to),
        json_str(&B64.encode(&tx.data)),
        fmt_amount(tx.amount),
        tx.timestamp_ms,
        signature,
    )
}

/// The byte blob a block hash covers.
///
/// The block's own `hash` and `signature` fields are excluded.
#[must_use]
pub fn block_hashable(block: &Block) -> Vec<u8> {
    let transactions: Vec<String> = block.transactions.iter().map(transaction_record).collect();
    let mut out = String::new();
    let _ = write!(
        out,
        "{{\"index\":{},\"timestamp\":{},\"transactions\":[{}],\"previousHash\":{},\"nonce\":{},\"author\":{}}}",
        block.index,
        block.timestamp_ms,
        transactions.join(","),
        json_str(&block.previous_hash),
        block.nonce,
        json_str(block.author.as_str()),
    );
    out.into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NodeId;
    use uuid::Uuid;

    fn sample_tx() -> Transaction {
        Transaction {
            id: Uuid::nil(),
            from: NodeId::from("0123456789abcdef"),
            to: "bob".to_string(),
            data: b"abc".to_vec(),
            amount: 3.0,
            timestamp_ms: 1700000000000,
            signature: None,
        }
    }

    #[test]
    fn test_signable_blob_is_stable() {
        let tx = sample_tx();
        let blob = String::from_utf8(transaction_signable(&tx)).unwrap();
        assert_eq!(
            blob,
            "{\"from\":\"0123456789abcdef\",\"to\":\"bob\",\"data\":\"YWJj\",\"amount\":3,\"timestamp\":1700000000000}"
        );
    }

    #[test]
    fn test_signable_blob_excludes_id_and_signature() {
        let mut tx = sample_tx();
        let before = transaction_signable(&tx);
        tx.id = Uuid::new_v4();
        tx.signature = Some("ff".to_string());
        assert_eq!(before, transaction_signable(&tx));
    }

    #[test]
    fn test_record_includes_id_and_signature() {
        let mut tx = sample_tx();
        let unsigned = transaction_record(&tx);
        assert!(unsigned.ends_with("\"signature\":null}"));
        tx.signature = Some("ff".to_string());
        assert_ne!(unsigned, transaction_record(&tx));
    }

    #[test]
    fn test_amount_plain_decimal() {
        assert_eq!(fmt_amount(3.0), "3");
        assert_eq!(fmt_amount(0.5), "0.5");
        assert_eq!(fmt_amount(-12.0), "-12");
        assert_eq!(fmt_amount(1.25), "1.25");
        assert!(!fmt_amount(1e21).contains('e'));
    }

    #[test]
    fn test_block_blob_excludes_hash_and_signature() {
        let mut block = Block {
            index: 1,
            timestamp_ms: 5,
            transactions: vec![sample_tx()],
            previous_hash: "aa".to_string(),
            hash: String::new(),
            nonce: 0,
            author: NodeId::from("0123456789abcdef"),
            signature: None,
        };
        let before = block_hashable(&block);
        block.hash = "something".to_string();
        block.signature = Some("ff".to_string());
        assert_eq!(before, block_hashable(&block));
    }

    #[test]
    fn test_block_blob_key_order() {
        let block = Block {
            index: 2,
            timestamp_ms: 9,
            transactions: vec![],
            previous_hash: "aa".to_string(),
            hash: String::new(),
            nonce: 0,
            author: NodeId::from("0123456789abcdef"),
            signature: None,
        };
        let blob = String::from_utf8(block_hashable(&block)).unwrap();
        assert_eq!(
            blob,
            "{\"index\":2,\"timestamp\":9,\"transactions\":[],\"previousHash\":\"aa\",\"nonce\":0,\"author\":\"0123456789abcdef\"}"
        );
    }

    #[test]
    fn test_escaping_of_recipient() {
        let mut tx = sample_tx();
        tx.to = "quote\"inside".to_string();
        let blob = String::from_utf8(transaction_signable(&tx)).unwrap();
        assert!(blob.contains("\"to\":\"quote\\\"inside\""));
    }
}

#[cfg(test)]
mod prop_tests {
    use super::*;
    use crate::NodeId;
    use proptest::prelude::*;
    use uuid::Uuid;

    proptest! {
        #[test]
        fn amount_never_uses_exponent(x in -1e15f64..1e15f64) {
            prop_assert!(!fmt_amount(x).contains('e'));
            prop_assert!(!fmt_amount(x).contains('E'));
        }

        #[test]
        fn signable_blob_is_valid_json(to in ".*", data in proptest::collection::vec(any::<u8>(), 0..64)) {
            let tx = Transaction {
                id: Uuid::nil(),
                from: NodeId::from("0123456789abcdef"),
                to,
                data,
                amount: 1.0,
                timestamp_ms: 1,
                signature: None,
            };
            let blob = transaction_signable(&tx);
            let parsed: serde_json::Value = serde_json::from_slice(&blob).unwrap();
            prop_assert_eq!(parsed["to"].as_str().unwrap(), tx.to.as_str());
        }
    }
}
