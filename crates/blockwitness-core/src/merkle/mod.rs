//! Merkle tree construction, inclusion proofs and proof verification.

mod tree;
mod proof;

pub use tree::*;
pub use proof::*;
