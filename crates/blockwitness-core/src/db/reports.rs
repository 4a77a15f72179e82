//! Report body storage.

use rusqlite::{params, OptionalExtension};

use super::{Database, DbResult};
use crate::models::Report;

impl Database {
    /// Store a report's canonical body. Only called while sealing a block.
    pub(super) fn insert_report(&self, report: &Report) -> DbResult<()> {
        let body = report.to_canonical_json()?;
        self.conn.execute(
            "INSERT INTO reports (report_id, body) VALUES (?1, ?2)",
            params![report.report_id, body],
        )?;
        Ok(())
    }

    /// Get a report by ID.
    pub fn get_report(&self, report_id: &str) -> DbResult<Option<Report>> {
        let body: Option<String> = self
            .conn
            .query_row(
                "SELECT body FROM reports WHERE report_id = ?",
                [report_id],
                |row| row.get(0),
            )
            .optional()?;

        match body {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }
}
