//! Merkle proof structures and the portable export format.

use serde::{Deserialize, Serialize};

/// Side of the tree a sibling sits on, relative to the node being proven.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Position {
    Left,
    Right,
}

impl Position {
    pub fn as_str(&self) -> &'static str {
        match self {
            Position::Left => "left",
            Position::Right => "right",
        }
    }

    /// Parse the lowercase form written by [`Position::as_str`].
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "left" => Some(Position::Left),
            "right" => Some(Position::Right),
            _ => None,
        }
    }
}

/// One level of an audit path.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProofStep {
    /// Hash paired with the tracked node at this level
    pub sibling: String,
    /// Side the sibling is on
    pub position: Position,
}

/// Merkle inclusion proof.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MerkleProof {
    /// Hash of the leaf being proven
    pub leaf_hash: String,
    /// Root hash at time of proof generation
    pub root_hash: String,
    /// Sibling hashes from leaf to root
    pub steps: Vec<ProofStep>,
    /// Index of leaf in tree (for context)
    pub leaf_index: usize,
}

impl MerkleProof {
    pub fn verify(&self) -> bool {
        super::verify_proof(self)
    }

    /// Serialize proof to the portable export format.
    pub fn to_export_format(&self) -> ExportedProof {
        ExportedProof {
            version: "1.0".to_string(),
            algorithm: "SHA-256".to_string(),
            leaf_hash: self.leaf_hash.clone(),
            root_hash: self.root_hash.clone(),
            audit_path: self
                .steps
                .iter()
                .map(|step| AuditPathEntry {
                    hash: step.sibling.clone(),
                    position: step.position.as_str().to_string(),
                })
                .collect(),
            leaf_index: self.leaf_index,
        }
    }
}

/// Self-describing proof for handing to third-party verifiers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportedProof {
    /// Format version
    pub version: String,
    /// Hash algorithm used
    pub algorithm: String,
    pub leaf_hash: String,
    pub root_hash: String,
    /// Audit path from leaf to root
    pub audit_path: Vec<AuditPathEntry>,
    pub leaf_index: usize,
}

/// Single entry in audit path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditPathEntry {
    /// Sibling hash
    pub hash: String,
    /// Position of sibling ("left" or "right")
    pub position: String,
}

impl ExportedProof {
    /// Rebuild the proof bundle. Unknown positions yield `None`.
    pub fn to_proof(&self) -> Option<MerkleProof> {
        let steps = self
            .audit_path
            .iter()
            .map(|entry| {
                Some(ProofStep {
                    sibling: entry.hash.clone(),
                    position: Position::parse(&entry.position)?,
                })
            })
            .collect::<Option<Vec<_>>>()?;

        Some(MerkleProof {
            leaf_hash: self.leaf_hash.clone(),
            root_hash: self.root_hash.clone(),
            steps,
            leaf_index: self.leaf_index,
        })
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
