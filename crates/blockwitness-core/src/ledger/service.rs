//! The operations the ledger exposes to its callers.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::LedgerConfig;
use crate::db::{Database, DbError};
use crate::hash::is_digest;
use crate::merkle::{merkle_root, MerkleProof, MerkleTree, ProofStep};
use crate::models::{
    block_timestamp_now, Block, BlockSummary, NewTransaction, Report, ReportCandidate,
    Transaction,
};

use super::{block_leaves, ChainReport, ChainVerifier, LedgerError, LedgerResult};

/// What the caller gets back after a successful submission.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubmitReceipt {
    pub report_id: String,
    pub tx_id: String,
    pub block_index: u64,
    pub block_hash: String,
    pub report_digest: String,
    pub merkle_root: String,
}

/// A block together with its transactions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlockDetail {
    pub block: Block,
    pub transactions: Vec<Transaction>,
}

/// Where a looked-up digest was found inside a report.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MatchedLeaf {
    Evidence { stored_name: String },
    Report,
}

/// A ledger entry containing a looked-up digest.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DigestMatch {
    pub tx_id: String,
    pub report_id: String,
    pub block_index: u64,
    pub block_hash: String,
    pub merkle_root: String,
    pub matched: MatchedLeaf,
}

/// Inclusion proof for one leaf of a block, checked against the stored root.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProofReport {
    /// Root stored on the block
    pub root: String,
    pub leaf: String,
    /// `None` when the leaf is not part of the block
    pub proof: Option<Vec<ProofStep>>,
    pub valid: bool,
    pub all_leaves: Vec<String>,
    /// Position of the proven leaf in `all_leaves`
    pub leaf_index: Option<usize>,
}

impl ProofReport {
    /// Proof bundle for export, if the leaf was found.
    pub fn to_merkle_proof(&self) -> Option<MerkleProof> {
        let steps = self.proof.clone()?;
        let leaf_index = self.leaf_index?;
        Some(MerkleProof {
            leaf_hash: self.leaf.clone(),
            root_hash: self.root.clone(),
            steps,
            leaf_index,
        })
    }
}

/// Transaction fields shown on the timeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimelineTransaction {
    pub tx_id: String,
    pub title: String,
    pub uploader: String,
    pub report_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimelineEntry {
    pub index: u64,
    pub timestamp: String,
    pub block_hash: String,
    pub merkle_root: String,
    pub transactions: Vec<TimelineTransaction>,
}

/// Everything a certificate or QR renderer needs for one report.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Certificate {
    pub report: Report,
    pub transaction: Transaction,
    pub block: Block,
    pub verification_url: String,
}

/// Ledger operations over a database.
pub struct Ledger<'a> {
    db: &'a Database,
    config: LedgerConfig,
}

impl<'a> Ledger<'a> {
    /// Ledger with default settings.
    pub fn new(db: &'a Database) -> Self {
        Self::with_config(db, LedgerConfig::default())
    }

    pub fn with_config(db: &'a Database, config: LedgerConfig) -> Self {
        Self { db, config }
    }

    /// Commit a report as a new block holding one transaction.
    ///
    /// Retries with a fresh tail read when another writer sealed a block first.
    pub fn submit(&self, candidate: ReportCandidate) -> LedgerResult<SubmitReceipt> {
        let report = candidate.into_report();
        let root = merkle_root(&report.leaves()?);
        let new_tx = NewTransaction::for_report(report)?;

        let mut attempts = 0u32;
        loop {
            attempts += 1;
            let previous_hash = self.db.tail_hash()?;
            let timestamp = block_timestamp_now();

            match self
                .db
                .append_block(&previous_hash, &timestamp, &root, vec![new_tx.clone()])
            {
                Ok(block) => {
                    info!(
                        report_id = %new_tx.report.report_id,
                        block = block.index,
                        "report committed"
                    );
                    return Ok(SubmitReceipt {
                        report_id: new_tx.report.report_id,
                        tx_id: new_tx.tx_id,
                        block_index: block.index,
                        block_hash: block.block_hash,
                        report_digest: new_tx.report_digest,
                        merkle_root: block.merkle_root,
                    });
                }
                Err(DbError::AppendConflict { expected, actual }) => {
                    if attempts > self.config.append_retries {
                        return Err(LedgerError::AppendConflict { attempts });
                    }
                    warn!(attempts, %expected, %actual, "lost race for chain tail, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Get a block with its transactions.
    pub fn get_block(&self, index: u64) -> LedgerResult<BlockDetail> {
        let _snapshot = self.db.read_snapshot()?;
        let block = self
            .db
            .get_block(index)?
            .ok_or_else(|| LedgerError::NotFound(format!("block {}", index)))?;
        let transactions = self.db.get_transactions_for_block(index)?;
        Ok(BlockDetail {
            block,
            transactions,
        })
    }

    /// Most recent blocks first.
    pub fn list_recent_blocks(&self, limit: Option<usize>) -> LedgerResult<Vec<BlockSummary>> {
        let limit = limit.unwrap_or(self.config.list_limit);
        Ok(self.db.list_blocks_descending(limit)?)
    }

    /// Every block newest first, with its transactions ordered by id.
    pub fn timeline(&self) -> LedgerResult<Vec<TimelineEntry>> {
        let _snapshot = self.db.read_snapshot()?;
        let mut blocks = self.db.list_blocks_ascending()?;
        blocks.reverse();

        blocks
            .into_iter()
            .map(|block| {
                let mut transactions: Vec<TimelineTransaction> = self
                    .db
                    .get_transactions_for_block(block.index)?
                    .into_iter()
                    .map(|tx| TimelineTransaction {
                        tx_id: tx.tx_id,
                        title: tx.title,
                        uploader: tx.uploader,
                        report_id: tx.report_id,
                    })
                    .collect();
                transactions.sort_by(|a, b| a.tx_id.cmp(&b.tx_id));

                Ok(TimelineEntry {
                    index: block.index,
                    timestamp: block.timestamp,
                    block_hash: block.block_hash,
                    merkle_root: block.merkle_root,
                    transactions,
                })
            })
            .collect()
    }

    /// Find every ledger entry whose evidence or report digest equals `digest`.
    pub fn find_by_digest(&self, digest: &str) -> LedgerResult<Vec<DigestMatch>> {
        let digest = digest.trim().to_ascii_lowercase();
        if !is_digest(&digest) {
            return Err(LedgerError::InvalidInput(format!(
                "not a SHA-256 hex digest: {}",
                digest
            )));
        }
        let digest = digest.as_str();

        let _snapshot = self.db.read_snapshot()?;
        let mut matches = Vec::new();

        for (tx, block) in self.db.list_transactions_with_blocks()? {
            let make_match = |matched: MatchedLeaf| DigestMatch {
                tx_id: tx.tx_id.clone(),
                report_id: tx.report_id.clone(),
                block_index: block.index,
                block_hash: block.block_hash.clone(),
                merkle_root: block.merkle_root.clone(),
                matched,
            };

            if let Some(report) = self.db.get_report(&tx.report_id)? {
                for item in report.evidence.iter().filter(|e| e.digest == digest) {
                    matches.push(make_match(MatchedLeaf::Evidence {
                        stored_name: item.stored_name.clone(),
                    }));
                }
            }
            if tx.report_digest == digest {
                matches.push(make_match(MatchedLeaf::Report));
            }
        }

        debug!(%digest, found = matches.len(), "digest lookup");
        Ok(matches)
    }

    /// Build an inclusion proof for `leaf` (default: the block's last leaf,
    /// which is the report digest) against the block's stored root.
    pub fn get_merkle_proof(&self, index: u64, leaf: Option<&str>) -> LedgerResult<ProofReport> {
        let _snapshot = self.db.read_snapshot()?;
        let block = self
            .db
            .get_block(index)?
            .ok_or_else(|| LedgerError::NotFound(format!("block {}", index)))?;

        let tree = MerkleTree::new(block_leaves(self.db, index)?)
            .map_err(|_| LedgerError::EmptyLeafSet { index })?;

        let leaf = match leaf.map(str::trim).filter(|l| !l.is_empty()) {
            Some(leaf) => leaf.to_string(),
            None => tree.leaves()[tree.leaf_count() - 1].clone(),
        };

        // Checked against the stored root, not the recomputed one
        let proof = tree.generate_proof(&leaf).ok().map(|proof| MerkleProof {
            root_hash: block.merkle_root.clone(),
            ..proof
        });
        let valid = proof.as_ref().map(MerkleProof::verify).unwrap_or(false);

        debug!(
            block = index,
            leaf_count = tree.leaf_count(),
            height = tree.height(),
            found = proof.is_some(),
            valid,
            "merkle proof requested"
        );
        Ok(ProofReport {
            root: block.merkle_root,
            leaf,
            leaf_index: proof.as_ref().map(|p| p.leaf_index),
            proof: proof.map(|p| p.steps),
            valid,
            all_leaves: tree.leaves().to_vec(),
        })
    }

    /// Certificate data for a committed report.
    pub fn certificate(&self, report_id: &str) -> LedgerResult<Certificate> {
        let _snapshot = self.db.read_snapshot()?;
        let report = self
            .db
            .get_report(report_id)?
            .ok_or_else(|| LedgerError::NotFound(format!("report {}", report_id)))?;
        let transaction = self
            .db
            .get_transaction_by_report(report_id)?
            .ok_or_else(|| LedgerError::NotFound(format!("transaction for report {}", report_id)))?;
        let block = self
            .db
            .get_block(transaction.block_index)?
            .ok_or_else(|| LedgerError::NotFound(format!("block {}", transaction.block_index)))?;

        Ok(Certificate {
            verification_url: self.config.verification_url(block.index),
            report,
            transaction,
            block,
        })
    }

    /// Recompute block hashes and linkage across the chain.
    pub fn verify_chain(&self) -> LedgerResult<ChainReport> {
        Ok(ChainVerifier::new(self.db).verify_chain()?.into())
    }

    /// Recompute every block's Merkle root from its stored reports.
    pub fn verify_merkle_roots(&self) -> LedgerResult<ChainReport> {
        Ok(ChainVerifier::new(self.db).verify_merkle_roots()?.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::{hash_data, GENESIS_PREVIOUS_HASH};
    use crate::merkle::hash_pair;
    use crate::models::EvidenceItem;

    fn setup_db() -> Database {
        Database::open_in_memory().unwrap()
    }

    fn candidate(title: &str, files: &[&[u8]]) -> ReportCandidate {
        files.iter().enumerate().fold(
            ReportCandidate::new(title, "tester"),
            |c, (i, bytes)| {
                c.with_evidence(EvidenceItem::from_bytes(
                    &format!("file-{}.bin", i),
                    "application/octet-stream",
                    bytes,
                ))
            },
        )
    }

    #[test]
    fn test_submit_single_report() {
        let db = setup_db();
        let ledger = Ledger::new(&db);

        let receipt = ledger.submit(candidate("first", &[b"e1", b"e2"])).unwrap();
        assert_eq!(receipt.block_index, 0);
        assert!(receipt.tx_id.starts_with("tx_"));

        let e1 = hash_data(b"e1");
        let e2 = hash_data(b"e2");
        let expected_root = hash_pair(
            &hash_pair(&e1, &e2),
            &hash_pair(&receipt.report_digest, &receipt.report_digest),
        );
        assert_eq!(receipt.merkle_root, expected_root);

        let detail = ledger.get_block(0).unwrap();
        assert_eq!(detail.block.previous_hash, GENESIS_PREVIOUS_HASH);
        assert_eq!(detail.transactions.len(), 1);
        assert_eq!(detail.transactions[0].report_digest, receipt.report_digest);
    }

    #[test]
    fn test_report_without_evidence_has_one_leaf() {
        let db = setup_db();
        let ledger = Ledger::new(&db);

        let receipt = ledger.submit(candidate("bare", &[])).unwrap();
        assert_eq!(receipt.merkle_root, receipt.report_digest);

        let proof = ledger.get_merkle_proof(0, None).unwrap();
        assert_eq!(proof.proof, Some(vec![]));
        assert!(proof.valid);
    }

    #[test]
    fn test_get_block_not_found() {
        let db = setup_db();
        let ledger = Ledger::new(&db);
        assert!(matches!(ledger.get_block(3), Err(LedgerError::NotFound(_))));
        assert!(matches!(
            ledger.get_merkle_proof(3, None),
            Err(LedgerError::NotFound(_))
        ));
    }

    #[test]
    fn test_proof_default_leaf_is_report_digest() {
        let db = setup_db();
        let ledger = Ledger::new(&db);
        let receipt = ledger.submit(candidate("r", &[b"a", b"b", b"c"])).unwrap();

        let report = ledger.get_merkle_proof(0, None).unwrap();
        assert_eq!(report.leaf, receipt.report_digest);
        assert_eq!(report.all_leaves.len(), 4);
        assert!(report.valid);
        assert_eq!(report.to_merkle_proof().unwrap().leaf_index, 3);
        assert!(report.to_merkle_proof().unwrap().verify());
    }

    #[test]
    fn test_proof_uses_first_duplicate_and_stored_root() {
        let db = setup_db();
        let ledger = Ledger::new(&db);
        ledger.submit(candidate("dup", &[b"same", b"same"])).unwrap();

        let report = ledger.get_merkle_proof(0, Some(&hash_data(b"same"))).unwrap();
        assert_eq!(report.leaf_index, Some(0));
        assert!(report.valid);

        // Rewrite the stored report so the recomputed leaves no longer match
        let tx = db.get_transactions_for_block(0).unwrap().remove(0);
        let mut body = db.get_report(&tx.report_id).unwrap().unwrap();
        body.title = "edited".to_string();
        db.conn()
            .execute(
                "UPDATE reports SET body = ?1 WHERE report_id = ?2",
                [body.to_canonical_json().unwrap(), tx.report_id],
            )
            .unwrap();

        let report = ledger.get_merkle_proof(0, None).unwrap();
        assert_eq!(report.leaf, body.digest().unwrap());
        assert!(report.proof.is_some());
        assert!(!report.valid);
        let exported = report.to_merkle_proof().unwrap();
        assert_eq!(exported.root_hash, report.root);
        assert_eq!(exported.leaf_index, 2);
        assert!(!exported.verify());
    }

    #[test]
    fn test_proof_for_unknown_leaf() {
        let db = setup_db();
        let ledger = Ledger::new(&db);
        ledger.submit(candidate("r", &[b"a"])).unwrap();

        let report = ledger.get_merkle_proof(0, Some(&hash_data(b"zzz"))).unwrap();
        assert!(report.proof.is_none());
        assert!(!report.valid);
        assert!(report.to_merkle_proof().is_none());
    }

    #[test]
    fn test_proof_blank_leaf_uses_default() {
        let db = setup_db();
        let ledger = Ledger::new(&db);
        let receipt = ledger.submit(candidate("r", &[b"a"])).unwrap();

        let report = ledger.get_merkle_proof(0, Some("   ")).unwrap();
        assert_eq!(report.leaf, receipt.report_digest);
    }

    #[test]
    fn test_proof_rejects_empty_leaf_set() {
        let db = setup_db();
        let ledger = Ledger::new(&db);
        ledger.submit(candidate("r", &[b"a"])).unwrap();
        db.conn()
            .execute_batch("PRAGMA foreign_keys = OFF; DELETE FROM reports; PRAGMA foreign_keys = ON;")
            .unwrap();

        assert!(matches!(
            ledger.get_merkle_proof(0, None),
            Err(LedgerError::EmptyLeafSet { index: 0 })
        ));
    }

    #[test]
    fn test_find_by_digest() {
        let db = setup_db();
        let ledger = Ledger::new(&db);
        let r1 = ledger.submit(candidate("one", &[b"shared", b"x"])).unwrap();
        let r2 = ledger.submit(candidate("two", &[b"shared"])).unwrap();
        ledger.submit(candidate("three", &[b"y"])).unwrap();

        let found = ledger.find_by_digest(&hash_data(b"shared")).unwrap();
        let blocks: Vec<u64> = found.iter().map(|m| m.block_index).collect();
        assert_eq!(blocks, vec![0, 1]);
        assert_eq!(found[0].report_id, r1.report_id);
        assert!(matches!(found[1].matched, MatchedLeaf::Evidence { .. }));

        let by_report = ledger.find_by_digest(&r2.report_digest).unwrap();
        assert_eq!(by_report.len(), 1);
        assert_eq!(by_report[0].matched, MatchedLeaf::Report);
        assert_eq!(by_report[0].tx_id, r2.tx_id);

        assert!(ledger.find_by_digest(&hash_data(b"nothing")).unwrap().is_empty());
        assert_eq!(
            ledger.find_by_digest(&r2.report_digest.to_uppercase()).unwrap().len(),
            1
        );
        assert!(matches!(
            ledger.find_by_digest("abc"),
            Err(LedgerError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_list_recent_and_timeline() {
        let db = setup_db();
        let config = LedgerConfig {
            list_limit: 2,
            ..LedgerConfig::default()
        };
        let ledger = Ledger::with_config(&db, config);
        for i in 0..3 {
            ledger.submit(candidate(&format!("r{}", i), &[b"z"])).unwrap();
        }

        let recent = ledger.list_recent_blocks(None).unwrap();
        assert_eq!(recent.iter().map(|b| b.index).collect::<Vec<_>>(), vec![2, 1]);
        assert_eq!(ledger.list_recent_blocks(Some(10)).unwrap().len(), 3);

        let timeline = ledger.timeline().unwrap();
        assert_eq!(timeline.len(), 3);
        assert_eq!(timeline[0].index, 2);
        assert_eq!(timeline[0].transactions[0].title, "r2");
    }

    #[test]
    fn test_certificate() {
        let db = setup_db();
        let config = LedgerConfig {
            frontend_origin: "https://witness.example".to_string(),
            ..LedgerConfig::default()
        };
        let ledger = Ledger::with_config(&db, config);
        ledger.submit(candidate("first", &[b"a"])).unwrap();
        let receipt = ledger.submit(candidate("second", &[b"b"])).unwrap();

        let cert = ledger.certificate(&receipt.report_id).unwrap();
        assert_eq!(cert.report.title, "second");
        assert_eq!(cert.transaction.tx_id, receipt.tx_id);
        assert_eq!(cert.block.block_hash, receipt.block_hash);
        assert_eq!(cert.verification_url, "https://witness.example/explorer?block=1");

        assert!(matches!(
            ledger.certificate("missing"),
            Err(LedgerError::NotFound(_))
        ));
    }

    #[test]
    fn test_submit_after_rejected_append() {
        let db = setup_db();
        let ledger = Ledger::new(&db);
        ledger.submit(candidate("first", &[b"a"])).unwrap();

        // A direct append with a stale tail fails; submit re-reads the tail
        let stale = NewTransaction::for_report(candidate("stale", &[]).into_report()).unwrap();
        assert!(matches!(
            db.append_block(GENESIS_PREVIOUS_HASH, "t", "root", vec![stale]),
            Err(DbError::AppendConflict { .. })
        ));

        let receipt = ledger.submit(candidate("second", &[b"b"])).unwrap();
        assert_eq!(receipt.block_index, 1);
        assert!(ledger.verify_chain().unwrap().ok);
    }
}
