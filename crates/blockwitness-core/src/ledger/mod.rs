//! Ledger operations over the block store: submission, lookups, proofs and
//! chain verification.

mod service;
mod verifier;

pub use service::*;
pub use verifier::*;

use thiserror::Error;
use tracing::{debug, warn};

use crate::db::{Database, DbError, DbResult};

/// Ledger errors.
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Block {index} has no merkle leaves")]
    EmptyLeafSet { index: u64 },

    #[error("Append conflict persisted after {attempts} attempts")]
    AppendConflict { attempts: u32 },
}

pub type LedgerResult<T> = Result<T, LedgerError>;

/// Rebuild a block's leaf set from its stored reports.
///
/// For each transaction in recorded order: the report's evidence digests, then
/// the digest of the report itself. Recomputed on every call.
pub fn block_leaves(db: &Database, index: u64) -> DbResult<Vec<String>> {
    let mut leaves = Vec::new();
    for tx in db.get_transactions_for_block(index)? {
        match db.get_report(&tx.report_id)? {
            Some(report) => leaves.extend(report.leaves()?),
            None => warn!(block = index, report_id = %tx.report_id, "report body missing"),
        }
    }
    debug!(block = index, leaf_count = leaves.len(), "rebuilt leaf set");
    Ok(leaves)
}
