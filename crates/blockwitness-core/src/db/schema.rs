//! SQLite schema definition.

/// Complete database schema for the ledger.
pub const SCHEMA: &str = r#"
-- Enable foreign keys
PRAGMA foreign_keys = ON;

-- ============================================================================
-- Blocks (Append-Only - Immutable after creation)
-- ============================================================================

CREATE TABLE IF NOT EXISTS blocks (
    idx INTEGER PRIMARY KEY CHECK (idx >= 0),
    timestamp TEXT NOT NULL,
    previous_hash TEXT NOT NULL,
    merkle_root TEXT NOT NULL,
    block_hash TEXT NOT NULL
);

-- ============================================================================
-- Reports (canonical JSON body, source of every block's leaf set)
-- ============================================================================

CREATE TABLE IF NOT EXISTS reports (
    report_id TEXT PRIMARY KEY,
    body TEXT NOT NULL,                          -- canonical JSON of the report
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- ============================================================================
-- Transactions
-- ============================================================================

CREATE TABLE IF NOT EXISTS transactions (
    tx_id TEXT PRIMARY KEY,
    block_idx INTEGER NOT NULL REFERENCES blocks(idx),
    position INTEGER NOT NULL,                   -- order within the block payload
    report_id TEXT NOT NULL REFERENCES reports(report_id),
    title TEXT NOT NULL,
    uploader TEXT NOT NULL,
    metadata TEXT NOT NULL DEFAULT '{}',         -- JSON object of strings
    report_hash TEXT NOT NULL,
    UNIQUE (block_idx, position)
);

CREATE INDEX IF NOT EXISTS idx_transactions_block ON transactions(block_idx);
CREATE INDEX IF NOT EXISTS idx_transactions_report ON transactions(report_id);
"#;
