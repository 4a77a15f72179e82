//! Merkle tree core implementation.
//!
//! Leaves are hex digests. A parent is the hash of its children's hex strings
//! concatenated left then right. A layer with an odd count pairs its last node
//! with itself.

use thiserror::Error;
use tracing::debug;

use crate::hash::hash_data;

use super::proof::{MerkleProof, Position, ProofStep};

/// Merkle tree errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MerkleError {
    #[error("Cannot build tree with no leaves")]
    EmptyLeafSet,

    #[error("Leaf not in set: {0}")]
    LeafNotInSet(String),
}

pub type MerkleResult<T> = Result<T, MerkleError>;

/// Root returned for an empty leaf list. Never a valid block root.
pub const EMPTY_ROOT: &str = "";

/// Hash a pair of nodes into their parent.
pub fn hash_pair(left: &str, right: &str) -> String {
    let combined = format!("{}{}", left, right);
    hash_data(combined.as_bytes())
}

fn next_level(level: &[String]) -> Vec<String> {
    level
        .chunks(2)
        .map(|chunk| {
            let left = &chunk[0];
            let right = chunk.get(1).unwrap_or(left);
            hash_pair(left, right)
        })
        .collect()
}

/// Fold an ordered leaf list into its root.
///
/// Returns [`EMPTY_ROOT`] for no leaves and the leaf itself for one leaf.
pub fn merkle_root<S: AsRef<str>>(leaves: &[S]) -> String {
    if leaves.is_empty() {
        return EMPTY_ROOT.to_string();
    }

    let mut current_level: Vec<String> = leaves.iter().map(|l| l.as_ref().to_string()).collect();
    while current_level.len() > 1 {
        current_level = next_level(&current_level);
    }
    current_level.swap_remove(0)
}

/// Build the audit path for `target`, or `None` if it is not a leaf.
///
/// Duplicate digests resolve to their first occurrence.
pub fn merkle_proof<S: AsRef<str>>(leaves: &[S], target: &str) -> Option<Vec<ProofStep>> {
    let leaf_index = leaves.iter().position(|l| l.as_ref() == target)?;
    Some(audit_path(leaves, leaf_index))
}

fn audit_path<S: AsRef<str>>(leaves: &[S], leaf_index: usize) -> Vec<ProofStep> {
    let mut steps = Vec::new();
    let mut current_level: Vec<String> = leaves.iter().map(|l| l.as_ref().to_string()).collect();
    let mut current_index = leaf_index;

    while current_level.len() > 1 {
        let step = if current_index % 2 == 0 {
            // Sibling is on the right, or the node itself at the end of an odd layer
            let sibling = current_level
                .get(current_index + 1)
                .unwrap_or(&current_level[current_index]);
            ProofStep {
                sibling: sibling.clone(),
                position: Position::Right,
            }
        } else {
            ProofStep {
                sibling: current_level[current_index - 1].clone(),
                position: Position::Left,
            }
        };
        steps.push(step);

        current_level = next_level(&current_level);
        current_index /= 2;
    }

    steps
}

/// Replay an audit path from `leaf` and compare with `claimed_root`.
pub fn verify_path(leaf: &str, steps: &[ProofStep], claimed_root: &str) -> bool {
    let mut current_hash = leaf.to_string();

    for step in steps {
        current_hash = match step.position {
            Position::Left => hash_pair(&step.sibling, &current_hash),
            Position::Right => hash_pair(&current_hash, &step.sibling),
        };
    }

    current_hash == claimed_root
}

/// Verify a Merkle proof bundle (standalone function for external use).
pub fn verify_proof(proof: &MerkleProof) -> bool {
    verify_path(&proof.leaf_hash, &proof.steps, &proof.root_hash)
}

/// An in-memory tree over one block's ordered leaf set.
#[derive(Debug, Clone)]
pub struct MerkleTree {
    leaves: Vec<String>,
    root: String,
}

impl MerkleTree {
    /// Build a tree; fails on an empty leaf set.
    pub fn new(leaves: Vec<String>) -> MerkleResult<Self> {
        if leaves.is_empty() {
            return Err(MerkleError::EmptyLeafSet);
        }
        let root = merkle_root(&leaves);
        Ok(Self { leaves, root })
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn leaves(&self) -> &[String] {
        &self.leaves
    }

    pub fn leaf_count(&self) -> usize {
        self.leaves.len()
    }

    /// Number of layers including the leaf layer.
    pub fn height(&self) -> u32 {
        let mut width = self.leaves.len();
        let mut height = 1;
        while width > 1 {
            width = width.div_ceil(2);
            height += 1;
        }
        height
    }

    /// Generate an inclusion proof for a leaf.
    pub fn generate_proof(&self, leaf_hash: &str) -> MerkleResult<MerkleProof> {
        let leaf_index = self
            .leaves
            .iter()
            .position(|h| h == leaf_hash)
            .ok_or_else(|| MerkleError::LeafNotInSet(leaf_hash.to_string()))?;

        debug!(leaf_index, leaf_count = self.leaves.len(), "generating merkle proof");

        Ok(MerkleProof {
            leaf_hash: leaf_hash.to_string(),
            root_hash: self.root.clone(),
            steps: audit_path(&self.leaves, leaf_index),
            leaf_index,
        })
    }
}
