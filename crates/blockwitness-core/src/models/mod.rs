//! Domain models for the BlockWitness ledger.

mod block;
mod report;

pub use block::*;
pub use report::*;
