//! BlockWitness Core Library
//!
//! Tamper-evident evidence ledger: reports and their evidence files are sealed
//! into an append-only chain of hash-linked blocks, each committing to its
//! contents through a Merkle root.
//!
//! # Architecture
//!
//! ```text
//! Evidence files ──► SHA-256 digests ─┐
//!                                     ├──► Report (canonical JSON) ──► report digest
//! Title / uploader / metadata ────────┘                                     │
//!                                                                           ▼
//!                                    leaves = [evidence digests..., report digest]
//!                                                                           │
//!                                     ┌─────────────────────────────────────▼──┐
//!                                     │            Block Append                 │
//!                                     │  merkle_root = root(leaves)             │
//!                                     │  previous_hash = tail block hash        │
//!                                     │  block_hash = hash(canonical payload)   │
//!                                     └─────────────────────┬──────────────────┘
//!                                                           │
//!                   ┌───────────────────────┬───────────────┼────────────────────┐
//!                   ▼                       ▼               ▼                    ▼
//!             Block Explorer         Digest Lookup    Merkle Proofs      Chain Verification
//! ```
//!
//! # Core Principle
//!
//! **Nothing is ever rewritten.** Verification recomputes and reports problems;
//! it never repairs.
//!
//! # Modules
//!
//! - [`hash`]: SHA-256 digests and canonical JSON
//! - [`merkle`]: Merkle roots, inclusion proofs and proof export
//! - [`models`]: Domain types (Report, EvidenceItem, Block, Transaction)
//! - [`db`]: SQLite block store with atomic appends
//! - [`ledger`]: Submission, lookups, proofs and chain verification
//! - [`config`]: Ledger settings from TOML and the environment

pub mod config;
pub mod db;
pub mod hash;
pub mod ledger;
pub mod merkle;
pub mod models;

// Re-export commonly used types
pub use config::LedgerConfig;
pub use db::Database;
pub use ledger::{ChainReport, ChainVerifier, Ledger, LedgerError, Problem, ProofReport};
pub use merkle::{MerkleProof, MerkleTree, Position, ProofStep};
pub use models::{Block, EvidenceItem, Report, ReportCandidate, Transaction};

// UniFFI setup - using proc macros
uniffi::setup_scaffolding!();

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

// =========================================================================
// FFI Error Type
// =========================================================================

#[derive(Debug, thiserror::Error, uniffi::Error)]
pub enum BlockWitnessError {
    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Config error: {0}")]
    ConfigError(String),

    #[error("Conflict: {0}")]
    Conflict(String),
}

impl From<db::DbError> for BlockWitnessError {
    fn from(e: db::DbError) -> Self {
        match e {
            db::DbError::AppendConflict { .. } => BlockWitnessError::Conflict(e.to_string()),
            _ => BlockWitnessError::DatabaseError(e.to_string()),
        }
    }
}

impl From<LedgerError> for BlockWitnessError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::Database(e) => e.into(),
            LedgerError::Json(e) => e.into(),
            LedgerError::NotFound(what) => BlockWitnessError::NotFound(what),
            LedgerError::InvalidInput(what) => BlockWitnessError::InvalidInput(what),
            LedgerError::EmptyLeafSet { .. } => BlockWitnessError::InvalidInput(e.to_string()),
            LedgerError::AppendConflict { .. } => BlockWitnessError::Conflict(e.to_string()),
        }
    }
}

impl From<serde_json::Error> for BlockWitnessError {
    fn from(e: serde_json::Error) -> Self {
        BlockWitnessError::SerializationError(e.to_string())
    }
}

impl From<config::ConfigError> for BlockWitnessError {
    fn from(e: config::ConfigError) -> Self {
        BlockWitnessError::ConfigError(e.to_string())
    }
}

impl From<std::io::Error> for BlockWitnessError {
    fn from(e: std::io::Error) -> Self {
        BlockWitnessError::InvalidInput(e.to_string())
    }
}

impl<T> From<std::sync::PoisonError<T>> for BlockWitnessError {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        BlockWitnessError::DatabaseError(format!("Lock poisoned: {}", e))
    }
}

// =========================================================================
// Factory Functions (exported to FFI)
// =========================================================================

/// Open or create a ledger at the given path with default settings.
#[uniffi::export]
pub fn open_ledger(path: String) -> Result<Arc<BlockWitnessCore>, BlockWitnessError> {
    let config = LedgerConfig {
        database_path: PathBuf::from(path),
        ..LedgerConfig::default()
    };
    BlockWitnessCore::open(config)
}

/// Open the ledger described by an optional TOML file plus environment overrides.
#[uniffi::export]
pub fn open_ledger_with_config(
    config_path: Option<String>,
) -> Result<Arc<BlockWitnessCore>, BlockWitnessError> {
    let config = LedgerConfig::load(config_path.as_deref().map(std::path::Path::new))?;
    BlockWitnessCore::open(config)
}

/// Create an in-memory ledger (for testing).
#[uniffi::export]
pub fn open_ledger_in_memory() -> Result<Arc<BlockWitnessCore>, BlockWitnessError> {
    let db = Database::open_in_memory()?;
    Ok(Arc::new(BlockWitnessCore {
        db: Arc::new(Mutex::new(db)),
        config: LedgerConfig::default(),
    }))
}

/// SHA-256 hex digest of raw bytes.
#[uniffi::export]
pub fn digest_bytes(data: Vec<u8>) -> String {
    hash::hash_data(&data)
}

/// Describe in-memory evidence for inclusion in a report.
#[uniffi::export]
pub fn describe_evidence(original_name: String, media_type: String, data: Vec<u8>) -> FfiEvidence {
    EvidenceItem::from_bytes(&original_name, &media_type, &data).into()
}

/// Describe an evidence file on disk, hashing it in chunks.
#[uniffi::export]
pub fn describe_evidence_file(
    path: String,
    media_type: String,
) -> Result<FfiEvidence, BlockWitnessError> {
    Ok(EvidenceItem::from_file(std::path::Path::new(&path), &media_type)?.into())
}

/// Check an audit path against a claimed root without touching a ledger.
#[uniffi::export]
pub fn verify_merkle_path(
    leaf: String,
    steps: Vec<FfiProofStep>,
    root: String,
) -> Result<bool, BlockWitnessError> {
    let steps = steps
        .into_iter()
        .map(ProofStep::try_from)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(merkle::verify_path(&leaf, &steps, &root))
}

// =========================================================================
// Main API Object
// =========================================================================

/// Thread-safe ledger wrapper for FFI.
#[derive(uniffi::Object)]
pub struct BlockWitnessCore {
    db: Arc<Mutex<Database>>,
    config: LedgerConfig,
}

impl BlockWitnessCore {
    fn open(config: LedgerConfig) -> Result<Arc<Self>, BlockWitnessError> {
        let db = Database::open_with_timeout(&config.database_path, config.busy_timeout())?;
        Ok(Arc::new(Self {
            db: Arc::new(Mutex::new(db)),
            config,
        }))
    }
}

#[uniffi::export]
impl BlockWitnessCore {
    // =========================================================================
    // Submission
    // =========================================================================

    /// Seal a report and its evidence into a new block.
    pub fn submit_report(
        &self,
        report: FfiReportCandidate,
    ) -> Result<FfiSubmitReceipt, BlockWitnessError> {
        let db = self.db.lock()?;
        let ledger = Ledger::with_config(&db, self.config.clone());
        let receipt = ledger.submit(report.into())?;
        Ok(receipt.into())
    }

    // =========================================================================
    // Browsing
    // =========================================================================

    /// Get a block with its transactions.
    pub fn get_block(&self, index: u64) -> Result<FfiBlockDetail, BlockWitnessError> {
        let db = self.db.lock()?;
        let detail = Ledger::with_config(&db, self.config.clone()).get_block(index)?;
        Ok(detail.into())
    }

    /// Most recent blocks first; `None` uses the configured limit.
    pub fn list_recent_blocks(
        &self,
        limit: Option<u32>,
    ) -> Result<Vec<FfiBlockSummary>, BlockWitnessError> {
        let db = self.db.lock()?;
        let ledger = Ledger::with_config(&db, self.config.clone());
        let blocks = ledger.list_recent_blocks(limit.map(|l| l as usize))?;
        Ok(blocks.into_iter().map(|b| b.into()).collect())
    }

    /// Every block newest first.
    pub fn timeline(&self) -> Result<Vec<FfiTimelineEntry>, BlockWitnessError> {
        let db = self.db.lock()?;
        let entries = Ledger::with_config(&db, self.config.clone()).timeline()?;
        Ok(entries.into_iter().map(|e| e.into()).collect())
    }

    /// Number of sealed blocks.
    pub fn block_count(&self) -> Result<u64, BlockWitnessError> {
        let db = self.db.lock()?;
        Ok(db.block_count()?)
    }

    // =========================================================================
    // Lookups & Proofs
    // =========================================================================

    /// Find ledger entries containing a digest.
    pub fn find_by_digest(&self, digest: String) -> Result<Vec<FfiDigestMatch>, BlockWitnessError> {
        let db = self.db.lock()?;
        let matches = Ledger::with_config(&db, self.config.clone()).find_by_digest(&digest)?;
        Ok(matches.into_iter().map(|m| m.into()).collect())
    }

    /// Inclusion proof for a leaf of a block; `None` proves the report digest.
    pub fn get_merkle_proof(
        &self,
        index: u64,
        leaf: Option<String>,
    ) -> Result<FfiProofReport, BlockWitnessError> {
        let db = self.db.lock()?;
        let ledger = Ledger::with_config(&db, self.config.clone());
        let report = ledger.get_merkle_proof(index, leaf.as_deref())?;
        Ok(report.into())
    }

    /// Inclusion proof in the portable JSON export format, if the leaf is in the block.
    pub fn export_merkle_proof(
        &self,
        index: u64,
        leaf: Option<String>,
    ) -> Result<Option<String>, BlockWitnessError> {
        let db = self.db.lock()?;
        let ledger = Ledger::with_config(&db, self.config.clone());
        let report = ledger.get_merkle_proof(index, leaf.as_deref())?;
        report
            .to_merkle_proof()
            .map(|proof| proof.to_export_format().to_json())
            .transpose()
            .map_err(Into::into)
    }

    /// Certificate data for a committed report.
    pub fn certificate(&self, report_id: String) -> Result<FfiCertificate, BlockWitnessError> {
        let db = self.db.lock()?;
        let cert = Ledger::with_config(&db, self.config.clone()).certificate(&report_id)?;
        Ok(cert.into())
    }

    // =========================================================================
    // Verification
    // =========================================================================

    /// Recompute block hashes and linkage.
    pub fn verify_chain(&self) -> Result<FfiChainReport, BlockWitnessError> {
        let db = self.db.lock()?;
        let report = Ledger::with_config(&db, self.config.clone()).verify_chain()?;
        Ok(report.into())
    }

    /// Recompute every block's Merkle root from its stored reports.
    pub fn verify_merkle_roots(&self) -> Result<FfiChainReport, BlockWitnessError> {
        let db = self.db.lock()?;
        let report = Ledger::with_config(&db, self.config.clone()).verify_merkle_roots()?;
        Ok(report.into())
    }
}

// =========================================================================
// FFI Types
// =========================================================================

/// FFI-safe evidence item.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiEvidence {
    pub stored_name: String,
    pub digest: String,
    pub media_type: String,
    pub size_bytes: u64,
}

impl From<EvidenceItem> for FfiEvidence {
    fn from(item: EvidenceItem) -> Self {
        Self {
            stored_name: item.stored_name,
            digest: item.digest,
            media_type: item.media_type,
            size_bytes: item.size_bytes,
        }
    }
}

impl From<FfiEvidence> for EvidenceItem {
    fn from(item: FfiEvidence) -> Self {
        EvidenceItem {
            stored_name: item.stored_name,
            digest: item.digest,
            media_type: item.media_type,
            size_bytes: item.size_bytes,
        }
    }
}

/// FFI-safe submission input.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiReportCandidate {
    pub title: String,
    pub uploader: String,
    pub metadata: HashMap<String, String>,
    pub evidence: Vec<FfiEvidence>,
}

impl From<FfiReportCandidate> for ReportCandidate {
    fn from(input: FfiReportCandidate) -> Self {
        let candidate = input
            .metadata
            .into_iter()
            .fold(ReportCandidate::new(input.title, input.uploader), |c, (k, v)| {
                c.with_metadata(k, v)
            });
        input
            .evidence
            .into_iter()
            .fold(candidate, |c, e| c.with_evidence(e.into()))
    }
}

/// FFI-safe report.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiReport {
    pub report_id: String,
    pub title: String,
    pub uploader: String,
    pub metadata: HashMap<String, String>,
    pub evidence: Vec<FfiEvidence>,
}

impl From<Report> for FfiReport {
    fn from(report: Report) -> Self {
        Self {
            report_id: report.report_id,
            title: report.title,
            uploader: report.uploader,
            metadata: report.metadata.into_iter().collect(),
            evidence: report.evidence.into_iter().map(|e| e.into()).collect(),
        }
    }
}

/// FFI-safe submission receipt.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiSubmitReceipt {
    pub report_id: String,
    pub tx_id: String,
    pub block_index: u64,
    pub block_hash: String,
    pub report_digest: String,
    pub merkle_root: String,
}

impl From<ledger::SubmitReceipt> for FfiSubmitReceipt {
    fn from(receipt: ledger::SubmitReceipt) -> Self {
        Self {
            report_id: receipt.report_id,
            tx_id: receipt.tx_id,
            block_index: receipt.block_index,
            block_hash: receipt.block_hash,
            report_digest: receipt.report_digest,
            merkle_root: receipt.merkle_root,
        }
    }
}

/// FFI-safe block.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiBlock {
    pub index: u64,
    pub timestamp: String,
    pub previous_hash: String,
    pub merkle_root: String,
    pub block_hash: String,
}

impl From<Block> for FfiBlock {
    fn from(block: Block) -> Self {
        Self {
            index: block.index,
            timestamp: block.timestamp,
            previous_hash: block.previous_hash,
            merkle_root: block.merkle_root,
            block_hash: block.block_hash,
        }
    }
}

/// FFI-safe block summary.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiBlockSummary {
    pub index: u64,
    pub timestamp: String,
    pub block_hash: String,
    pub merkle_root: String,
}

impl From<models::BlockSummary> for FfiBlockSummary {
    fn from(summary: models::BlockSummary) -> Self {
        Self {
            index: summary.index,
            timestamp: summary.timestamp,
            block_hash: summary.block_hash,
            merkle_root: summary.merkle_root,
        }
    }
}

/// FFI-safe transaction.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiTransaction {
    pub tx_id: String,
    pub block_index: u64,
    pub report_id: String,
    pub title: String,
    pub uploader: String,
    pub metadata: HashMap<String, String>,
    pub report_digest: String,
}

impl From<Transaction> for FfiTransaction {
    fn from(tx: Transaction) -> Self {
        Self {
            tx_id: tx.tx_id,
            block_index: tx.block_index,
            report_id: tx.report_id,
            title: tx.title,
            uploader: tx.uploader,
            metadata: tx.metadata.into_iter().collect(),
            report_digest: tx.report_digest,
        }
    }
}

/// FFI-safe block with transactions.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiBlockDetail {
    pub block: FfiBlock,
    pub transactions: Vec<FfiTransaction>,
}

impl From<ledger::BlockDetail> for FfiBlockDetail {
    fn from(detail: ledger::BlockDetail) -> Self {
        Self {
            block: detail.block.into(),
            transactions: detail.transactions.into_iter().map(|t| t.into()).collect(),
        }
    }
}

/// FFI-safe timeline transaction.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiTimelineTransaction {
    pub tx_id: String,
    pub title: String,
    pub uploader: String,
    pub report_id: String,
}

/// FFI-safe timeline entry.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiTimelineEntry {
    pub index: u64,
    pub timestamp: String,
    pub block_hash: String,
    pub merkle_root: String,
    pub transactions: Vec<FfiTimelineTransaction>,
}

impl From<ledger::TimelineEntry> for FfiTimelineEntry {
    fn from(entry: ledger::TimelineEntry) -> Self {
        Self {
            index: entry.index,
            timestamp: entry.timestamp,
            block_hash: entry.block_hash,
            merkle_root: entry.merkle_root,
            transactions: entry
                .transactions
                .into_iter()
                .map(|t| FfiTimelineTransaction {
                    tx_id: t.tx_id,
                    title: t.title,
                    uploader: t.uploader,
                    report_id: t.report_id,
                })
                .collect(),
        }
    }
}

/// FFI-safe digest match. `stored_name` is set for evidence matches only.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiDigestMatch {
    pub tx_id: String,
    pub report_id: String,
    pub block_index: u64,
    pub block_hash: String,
    pub merkle_root: String,
    pub matched_report: bool,
    pub stored_name: Option<String>,
}

impl From<ledger::DigestMatch> for FfiDigestMatch {
    fn from(m: ledger::DigestMatch) -> Self {
        let (matched_report, stored_name) = match m.matched {
            ledger::MatchedLeaf::Report => (true, None),
            ledger::MatchedLeaf::Evidence { stored_name } => (false, Some(stored_name)),
        };
        Self {
            tx_id: m.tx_id,
            report_id: m.report_id,
            block_index: m.block_index,
            block_hash: m.block_hash,
            merkle_root: m.merkle_root,
            matched_report,
            stored_name,
        }
    }
}

/// FFI-safe audit path step. `position` is "left" or "right".
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiProofStep {
    pub sibling: String,
    pub position: String,
}

impl From<ProofStep> for FfiProofStep {
    fn from(step: ProofStep) -> Self {
        Self {
            sibling: step.sibling,
            position: step.position.as_str().to_string(),
        }
    }
}

impl TryFrom<FfiProofStep> for ProofStep {
    type Error = BlockWitnessError;

    fn try_from(step: FfiProofStep) -> Result<Self, Self::Error> {
        let position = Position::parse(&step.position).ok_or_else(|| {
            BlockWitnessError::InvalidInput(format!("unknown position: {}", step.position))
        })?;
        Ok(ProofStep {
            sibling: step.sibling,
            position,
        })
    }
}

/// FFI-safe proof report.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiProofReport {
    pub root: String,
    pub leaf: String,
    pub proof: Option<Vec<FfiProofStep>>,
    pub valid: bool,
    pub all_leaves: Vec<String>,
    pub leaf_index: Option<u64>,
}

impl From<ProofReport> for FfiProofReport {
    fn from(report: ProofReport) -> Self {
        Self {
            root: report.root,
            leaf: report.leaf,
            proof: report
                .proof
                .map(|steps| steps.into_iter().map(|s| s.into()).collect()),
            valid: report.valid,
            all_leaves: report.all_leaves,
            leaf_index: report.leaf_index.map(|i| i as u64),
        }
    }
}

/// FFI-safe verification problem.
#[derive(Debug, Clone, uniffi::Enum)]
pub enum FfiProblem {
    BlockHashMismatch {
        index: u64,
        expected: String,
        recomputed: String,
    },
    PreviousHashMismatch {
        index: u64,
        expected_prev: String,
        got: String,
    },
    IndexGap {
        expected: u64,
        found: u64,
    },
    MerkleRootMismatch {
        index: u64,
        stored: String,
        recomputed: String,
    },
    EmptyLeafSet {
        index: u64,
    },
}

impl From<Problem> for FfiProblem {
    fn from(problem: Problem) -> Self {
        match problem {
            Problem::BlockHashMismatch {
                index,
                expected,
                recomputed,
            } => FfiProblem::BlockHashMismatch {
                index,
                expected,
                recomputed,
            },
            Problem::PreviousHashMismatch {
                index,
                expected_prev,
                got,
            } => FfiProblem::PreviousHashMismatch {
                index,
                expected_prev,
                got,
            },
            Problem::IndexGap { expected, found } => FfiProblem::IndexGap { expected, found },
            Problem::MerkleRootMismatch {
                index,
                stored,
                recomputed,
            } => FfiProblem::MerkleRootMismatch {
                index,
                stored,
                recomputed,
            },
            Problem::EmptyLeafSet { index } => FfiProblem::EmptyLeafSet { index },
        }
    }
}

/// FFI-safe verification outcome.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiChainReport {
    pub ok: bool,
    pub problems: Vec<FfiProblem>,
}

impl From<ChainReport> for FfiChainReport {
    fn from(report: ChainReport) -> Self {
        Self {
            ok: report.ok,
            problems: report.problems.into_iter().map(|p| p.into()).collect(),
        }
    }
}

/// FFI-safe certificate data.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiCertificate {
    pub report: FfiReport,
    pub transaction: FfiTransaction,
    pub block: FfiBlock,
    pub verification_url: String,
}

impl From<ledger::Certificate> for FfiCertificate {
    fn from(cert: ledger::Certificate) -> Self {
        Self {
            report: cert.report.into(),
            transaction: cert.transaction.into(),
            block: cert.block.into(),
            verification_url: cert.verification_url,
        }
    }
}
