//! Blocks and the transactions sealed into them.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::hash::hash_canonical;

use super::report::Report;

/// Timestamp format recorded on blocks (UTC offset included).
pub const BLOCK_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%z";

/// Current time in the block timestamp format.
pub fn block_timestamp_now() -> String {
    chrono::Utc::now().format(BLOCK_TIMESTAMP_FORMAT).to_string()
}

/// A sealed, hash-linked ledger block.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Block {
    /// 0-based position in the chain
    pub index: u64,
    pub timestamp: String,
    /// Hash of the block at `index - 1`, or the genesis sentinel
    pub previous_hash: String,
    /// Root over the block's leaf set
    pub merkle_root: String,
    /// Hash of the canonical block payload
    pub block_hash: String,
}

/// The exact record a block hash is computed over.
#[derive(Debug, Serialize)]
pub struct BlockPayload<'a> {
    pub idx: u64,
    pub timestamp: &'a str,
    pub previous_hash: &'a str,
    pub merkle_root: &'a str,
    pub transactions: &'a [String],
}

impl BlockPayload<'_> {
    pub fn hash(&self) -> Result<String, serde_json::Error> {
        hash_canonical(self)
    }
}

impl Block {
    /// Recompute this block's hash from its stored fields.
    pub fn recompute_hash(&self, transaction_ids: &[String]) -> Result<String, serde_json::Error> {
        BlockPayload {
            idx: self.index,
            timestamp: &self.timestamp,
            previous_hash: &self.previous_hash,
            merkle_root: &self.merkle_root,
            transactions: transaction_ids,
        }
        .hash()
    }
}

/// Read-only projection used when browsing the chain.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlockSummary {
    pub index: u64,
    pub timestamp: String,
    pub block_hash: String,
    pub merkle_root: String,
}

/// The ledger's record that a report was included in a block.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Transaction {
    pub tx_id: String,
    pub block_index: u64,
    pub report_id: String,
    pub title: String,
    pub uploader: String,
    /// Report metadata at the time of inclusion
    pub metadata: BTreeMap<String, String>,
    pub report_digest: String,
}

/// A transaction waiting to be sealed; the block index is assigned on append.
#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub tx_id: String,
    pub report: Report,
    pub report_digest: String,
}

impl NewTransaction {
    /// Wrap a finalized report with a fresh transaction id.
    pub fn for_report(report: Report) -> Result<Self, serde_json::Error> {
        let report_digest = report.digest()?;
        Ok(Self {
            tx_id: new_tx_id(),
            report,
            report_digest,
        })
    }
}

/// `tx_` followed by 32 hex characters.
pub fn new_tx_id() -> String {
    format!("tx_{}", uuid::Uuid::new_v4().simple())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::GENESIS_PREVIOUS_HASH;

    fn genesis() -> Block {
        let tx = vec!["tx_1".to_string()];
        let mut block = Block {
            index: 0,
            timestamp: "2024-01-15T10:00:00+0000".to_string(),
            previous_hash: GENESIS_PREVIOUS_HASH.to_string(),
            merkle_root: "ab".repeat(32),
            block_hash: String::new(),
        };
        block.block_hash = block.recompute_hash(&tx).unwrap();
        block
    }

    #[test]
    fn test_payload_keys_sorted() {
        let tx = vec!["tx_1".to_string()];
        let payload = BlockPayload {
            idx: 3,
            timestamp: "t",
            previous_hash: "p",
            merkle_root: "m",
            transactions: &tx,
        };
        assert_eq!(
            crate::hash::canonical_json(&payload).unwrap(),
            r#"{"idx":3,"merkle_root":"m","previous_hash":"p","timestamp":"t","transactions":["tx_1"]}"#
        );
    }

    #[test]
    fn test_block_hash_covers_every_field() {
        let block = genesis();
        let tx = vec!["tx_1".to_string()];
        assert_eq!(block.recompute_hash(&tx).unwrap(), block.block_hash);

        let mut altered = block.clone();
        altered.timestamp.push('Z');
        assert_ne!(altered.recompute_hash(&tx).unwrap(), block.block_hash);

        let mut altered = block.clone();
        altered.merkle_root = "cd".repeat(32);
        assert_ne!(altered.recompute_hash(&tx).unwrap(), block.block_hash);

        let other_tx = vec!["tx_2".to_string()];
        assert_ne!(block.recompute_hash(&other_tx).unwrap(), block.block_hash);
    }

    #[test]
    fn test_timestamp_format() {
        let ts = block_timestamp_now();
        assert!(chrono::DateTime::parse_from_str(&ts, BLOCK_TIMESTAMP_FORMAT).is_ok());
        assert!(ts.ends_with("+0000"));
    }

    #[test]
    fn test_tx_id_shape() {
        let id = new_tx_id();
        assert!(id.starts_with("tx_"));
        assert_eq!(id.len(), 35);
    }
}
