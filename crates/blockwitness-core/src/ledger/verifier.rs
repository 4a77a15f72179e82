//! Chain integrity re-verification.
//!
//! Problems are returned as data. Verification never repairs anything.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::db::{Database, DbResult};
use crate::hash::GENESIS_PREVIOUS_HASH;
use crate::merkle::merkle_root;

use super::block_leaves;

/// A divergence between stored and recomputed chain state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "issue", rename_all = "snake_case")]
pub enum Problem {
    /// Stored block hash differs from the hash of the stored payload.
    BlockHashMismatch {
        index: u64,
        expected: String,
        recomputed: String,
    },
    /// `previous_hash` differs from the prior block's recomputed hash.
    PreviousHashMismatch {
        index: u64,
        expected_prev: String,
        got: String,
    },
    /// Stored indices skip or repeat.
    IndexGap { expected: u64, found: u64 },
    /// Stored root differs from the root over the block's current leaf set.
    MerkleRootMismatch {
        index: u64,
        stored: String,
        recomputed: String,
    },
    /// The block's leaf set could not be rebuilt.
    EmptyLeafSet { index: u64 },
}

impl Problem {
    /// Index of the block the problem was found at.
    pub fn index(&self) -> u64 {
        match self {
            Problem::BlockHashMismatch { index, .. }
            | Problem::PreviousHashMismatch { index, .. }
            | Problem::MerkleRootMismatch { index, .. }
            | Problem::EmptyLeafSet { index } => *index,
            Problem::IndexGap { found, .. } => *found,
        }
    }
}

impl fmt::Display for Problem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Problem::BlockHashMismatch {
                index,
                expected,
                recomputed,
            } => write!(
                f,
                "block {}: block hash mismatch (stored {}, recomputed {})",
                index, expected, recomputed
            ),
            Problem::PreviousHashMismatch {
                index,
                expected_prev,
                got,
            } => write!(
                f,
                "block {}: previous hash mismatch (expected {}, stored {})",
                index, expected_prev, got
            ),
            Problem::IndexGap { expected, found } => {
                write!(f, "block {}: index gap (expected block {})", found, expected)
            }
            Problem::MerkleRootMismatch {
                index,
                stored,
                recomputed,
            } => write!(
                f,
                "block {}: merkle root mismatch (stored {}, recomputed {})",
                index, stored, recomputed
            ),
            Problem::EmptyLeafSet { index } => write!(f, "block {}: no merkle leaves", index),
        }
    }
}

/// Outcome of a verification pass.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChainReport {
    pub ok: bool,
    pub problems: Vec<Problem>,
}

impl From<Vec<Problem>> for ChainReport {
    fn from(problems: Vec<Problem>) -> Self {
        Self {
            ok: problems.is_empty(),
            problems,
        }
    }
}

/// Recomputes stored chain state and reports divergences.
pub struct ChainVerifier<'a> {
    db: &'a Database,
}

impl<'a> ChainVerifier<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Check block hashes and previous-hash linkage across the whole chain.
    ///
    /// Linkage is checked against the prior block's *recomputed* hash, so a
    /// tampered block also flags its successor.
    pub fn verify_chain(&self) -> DbResult<Vec<Problem>> {
        let _snapshot = self.db.read_snapshot()?;
        let blocks = self.db.list_blocks_ascending()?;

        let mut problems = Vec::new();
        let mut prev_hash = GENESIS_PREVIOUS_HASH.to_string();
        let mut expected_index = 0u64;

        for block in &blocks {
            if block.index != expected_index {
                problems.push(Problem::IndexGap {
                    expected: expected_index,
                    found: block.index,
                });
            }
            expected_index = block.index + 1;

            let tx_ids = self.db.get_transaction_ids_for_block(block.index)?;
            let recomputed = block.recompute_hash(&tx_ids)?;

            if recomputed != block.block_hash {
                problems.push(Problem::BlockHashMismatch {
                    index: block.index,
                    expected: block.block_hash.clone(),
                    recomputed: recomputed.clone(),
                });
            }
            if block.previous_hash != prev_hash {
                problems.push(Problem::PreviousHashMismatch {
                    index: block.index,
                    expected_prev: prev_hash,
                    got: block.previous_hash.clone(),
                });
            }

            prev_hash = recomputed;
        }

        log_outcome("chain", blocks.len(), &problems);
        Ok(problems)
    }

    /// Rebuild every block's leaf set from stored reports and compare roots.
    pub fn verify_merkle_roots(&self) -> DbResult<Vec<Problem>> {
        let _snapshot = self.db.read_snapshot()?;
        let blocks = self.db.list_blocks_ascending()?;

        let mut problems = Vec::new();
        for block in &blocks {
            let leaves = block_leaves(self.db, block.index)?;
            if leaves.is_empty() {
                problems.push(Problem::EmptyLeafSet { index: block.index });
                continue;
            }

            let recomputed = merkle_root(&leaves);
            if recomputed != block.merkle_root {
                problems.push(Problem::MerkleRootMismatch {
                    index: block.index,
                    stored: block.merkle_root.clone(),
                    recomputed,
                });
            }
        }

        log_outcome("merkle roots", blocks.len(), &problems);
        Ok(problems)
    }
}

fn log_outcome(scope: &str, block_count: usize, problems: &[Problem]) {
    if problems.is_empty() {
        info!(scope, block_count, "verification passed");
    } else {
        for problem in problems {
            warn!(scope, index = problem.index(), ?problem, "integrity problem");
        }
    }
}
