//! Block and transaction database operations (append-only).

use rusqlite::{params, OptionalExtension, Row};
use tracing::{debug, info};

use super::{is_constraint_violation, Database, DbError, DbResult};
use crate::hash::GENESIS_PREVIOUS_HASH;
use crate::models::{Block, BlockPayload, BlockSummary, NewTransaction, Transaction};

const BLOCK_COLUMNS: &str = "idx, timestamp, previous_hash, merkle_root, block_hash";

const TRANSACTION_COLUMNS: &str =
    "tx_id, block_idx, report_id, title, uploader, metadata, report_hash";

fn block_from_row(row: &Row<'_>) -> rusqlite::Result<Block> {
    let idx: i64 = row.get(0)?;
    Ok(Block {
        index: idx as u64,
        timestamp: row.get(1)?,
        previous_hash: row.get(2)?,
        merkle_root: row.get(3)?,
        block_hash: row.get(4)?,
    })
}

/// Raw transaction row; metadata is still JSON text.
struct TransactionRow {
    tx_id: String,
    block_idx: i64,
    report_id: String,
    title: String,
    uploader: String,
    metadata: String,
    report_hash: String,
}

impl TransactionRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            tx_id: row.get(0)?,
            block_idx: row.get(1)?,
            report_id: row.get(2)?,
            title: row.get(3)?,
            uploader: row.get(4)?,
            metadata: row.get(5)?,
            report_hash: row.get(6)?,
        })
    }

    fn into_transaction(self) -> DbResult<Transaction> {
        Ok(Transaction {
            tx_id: self.tx_id,
            block_index: self.block_idx as u64,
            report_id: self.report_id,
            title: self.title,
            uploader: self.uploader,
            metadata: serde_json::from_str(&self.metadata)?,
            report_digest: self.report_hash,
        })
    }
}

impl Database {
    /// Seal a new block at the tail of the chain.
    ///
    /// The tail read, index assignment and all inserts run in one write
    /// transaction. Fails with [`DbError::AppendConflict`] when the current tail
    /// hash is not `previous_hash`; nothing is written in that case.
    pub fn append_block(
        &self,
        previous_hash: &str,
        timestamp: &str,
        merkle_root: &str,
        transactions: Vec<NewTransaction>,
    ) -> DbResult<Block> {
        if transactions.is_empty() {
            return Err(DbError::Constraint(
                "block must contain at least one transaction".into(),
            ));
        }

        let tx = self.write_transaction()?;

        let tail = self.tail_link()?;
        let (index, tail_hash) = match tail {
            Some((idx, hash)) => (idx + 1, hash),
            None => (0, GENESIS_PREVIOUS_HASH.to_string()),
        };
        if tail_hash != previous_hash {
            return Err(DbError::AppendConflict {
                expected: previous_hash.to_string(),
                actual: tail_hash,
            });
        }

        let tx_ids: Vec<String> = transactions.iter().map(|t| t.tx_id.clone()).collect();
        let block = Block {
            index,
            timestamp: timestamp.to_string(),
            previous_hash: previous_hash.to_string(),
            merkle_root: merkle_root.to_string(),
            block_hash: BlockPayload {
                idx: index,
                timestamp,
                previous_hash,
                merkle_root,
                transactions: &tx_ids,
            }
            .hash()?,
        };

        self.conn
            .execute(
                &format!("INSERT INTO blocks ({}) VALUES (?1, ?2, ?3, ?4, ?5)", BLOCK_COLUMNS),
                params![
                    block.index as i64,
                    block.timestamp,
                    block.previous_hash,
                    block.merkle_root,
                    block.block_hash,
                ],
            )
            .map_err(|e| {
                if is_constraint_violation(&e) {
                    DbError::AppendConflict {
                        expected: previous_hash.to_string(),
                        actual: format!("block {} already exists", index),
                    }
                } else {
                    e.into()
                }
            })?;

        for (position, new_tx) in transactions.into_iter().enumerate() {
            self.insert_report(&new_tx.report)?;
            let metadata = serde_json::to_string(&new_tx.report.metadata)?;
            self.conn.execute(
                r#"
                INSERT INTO transactions (
                    tx_id, block_idx, position, report_id, title,
                    uploader, metadata, report_hash
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                "#,
                params![
                    new_tx.tx_id,
                    index as i64,
                    position as i64,
                    new_tx.report.report_id,
                    new_tx.report.title,
                    new_tx.report.uploader,
                    metadata,
                    new_tx.report_digest,
                ],
            )?;
            debug!(tx_id = %new_tx.tx_id, block = index, "recorded transaction");
        }

        tx.commit()?;
        info!(index, block_hash = %block.block_hash, "appended block");
        Ok(block)
    }

    /// Index and hash of the newest block.
    fn tail_link(&self) -> DbResult<Option<(u64, String)>> {
        self.conn
            .query_row(
                "SELECT idx, block_hash FROM blocks ORDER BY idx DESC LIMIT 1",
                [],
                |row| {
                    let idx: i64 = row.get(0)?;
                    Ok((idx as u64, row.get(1)?))
                },
            )
            .optional()
            .map_err(Into::into)
    }

    /// Get the newest block, if any.
    pub fn tail(&self) -> DbResult<Option<Block>> {
        self.conn
            .query_row(
                &format!("SELECT {} FROM blocks ORDER BY idx DESC LIMIT 1", BLOCK_COLUMNS),
                [],
                block_from_row,
            )
            .optional()
            .map_err(Into::into)
    }

    /// Hash the next block must link to.
    pub fn tail_hash(&self) -> DbResult<String> {
        Ok(self
            .tail_link()?
            .map(|(_, hash)| hash)
            .unwrap_or_else(|| GENESIS_PREVIOUS_HASH.to_string()))
    }

    /// Get a block by index.
    pub fn get_block(&self, index: u64) -> DbResult<Option<Block>> {
        self.conn
            .query_row(
                &format!("SELECT {} FROM blocks WHERE idx = ?", BLOCK_COLUMNS),
                [index as i64],
                block_from_row,
            )
            .optional()
            .map_err(Into::into)
    }

    /// Number of stored blocks.
    pub fn block_count(&self) -> DbResult<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM blocks", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// All blocks, oldest first.
    pub fn list_blocks_ascending(&self) -> DbResult<Vec<Block>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {} FROM blocks ORDER BY idx ASC", BLOCK_COLUMNS))?;
        let rows = stmt.query_map([], block_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Most recent blocks first.
    pub fn list_blocks_descending(&self, limit: usize) -> DbResult<Vec<BlockSummary>> {
        let mut stmt = self.conn.prepare(
            "SELECT idx, timestamp, block_hash, merkle_root FROM blocks ORDER BY idx DESC LIMIT ?",
        )?;
        let rows = stmt.query_map([limit as i64], |row| {
            let idx: i64 = row.get(0)?;
            Ok(BlockSummary {
                index: idx as u64,
                timestamp: row.get(1)?,
                block_hash: row.get(2)?,
                merkle_root: row.get(3)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Transactions of a block in recorded order.
    pub fn get_transactions_for_block(&self, index: u64) -> DbResult<Vec<Transaction>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM transactions WHERE block_idx = ? ORDER BY position",
            TRANSACTION_COLUMNS
        ))?;
        let rows = stmt
            .query_map([index as i64], TransactionRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(TransactionRow::into_transaction).collect()
    }

    /// Transaction ids of a block in recorded order.
    pub fn get_transaction_ids_for_block(&self, index: u64) -> DbResult<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT tx_id FROM transactions WHERE block_idx = ? ORDER BY position")?;
        let rows = stmt.query_map([index as i64], |row| row.get(0))?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// The transaction that recorded a report.
    pub fn get_transaction_by_report(&self, report_id: &str) -> DbResult<Option<Transaction>> {
        let row = self
            .conn
            .query_row(
                &format!(
                    "SELECT {} FROM transactions WHERE report_id = ? ORDER BY block_idx LIMIT 1",
                    TRANSACTION_COLUMNS
                ),
                [report_id],
                TransactionRow::from_row,
            )
            .optional()?;
        row.map(TransactionRow::into_transaction).transpose()
    }

    /// Every transaction joined with its block, in chain order.
    pub fn list_transactions_with_blocks(&self) -> DbResult<Vec<(Transaction, Block)>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT t.tx_id, t.block_idx, t.report_id, t.title, t.uploader, t.metadata, t.report_hash,
                   b.idx, b.timestamp, b.previous_hash, b.merkle_root, b.block_hash
            FROM transactions t
            JOIN blocks b ON t.block_idx = b.idx
            ORDER BY b.idx, t.position
            "#,
        )?;

        let rows = stmt
            .query_map([], |row| {
                let tx = TransactionRow::from_row(row)?;
                let idx: i64 = row.get(7)?;
                let block = Block {
                    index: idx as u64,
                    timestamp: row.get(8)?,
                    previous_hash: row.get(9)?,
                    merkle_root: row.get(10)?,
                    block_hash: row.get(11)?,
                };
                Ok((tx, block))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(tx, block)| Ok((tx.into_transaction()?, block)))
            .collect()
    }
}
