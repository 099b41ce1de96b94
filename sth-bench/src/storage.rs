//! Optional time-series persistence of benchmark rows (feature `storage`).
//!
//! Rows are append-only; one run produces one batch keyed by its start
//! timestamp so later runs can be trended.

use std::path::Path;

use rusqlite::{Connection, params};

use crate::compare::ComparisonReport;
use crate::error::BenchResult;

/// SQLite-backed store of benchmark history.
pub struct ResultStore {
    conn: Connection,
}

impl ResultStore {
    /// Open (and migrate) the store at `path`.
    pub fn open(path: &Path) -> BenchResult<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS benchmark_rows (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                run_started_at TEXT NOT NULL,
                scenario TEXT NOT NULL,
                concurrency INTEGER NOT NULL,
                baseline_p95_ms REAL NOT NULL,
                candidate_p95_ms REAL NOT NULL,
                delta_pct REAL NOT NULL,
                regressed INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_rows_run
                ON benchmark_rows (run_started_at);",
        )?;
        Ok(Self { conn })
    }

    /// Append every row of a comparison run.
    pub fn append(&mut self, report: &ComparisonReport) -> BenchResult<()> {
        let tx = self.conn.transaction()?;
        {
            let mut insert = tx.prepare(
                "INSERT INTO benchmark_rows
                 (run_started_at, scenario, concurrency, baseline_p95_ms,
                  candidate_p95_ms, delta_pct, regressed)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            for row in &report.rows {
                insert.execute(params![
                    report.started_at.to_rfc3339(),
                    row.scenario,
                    row.concurrency,
                    row.baseline_p95_ms,
                    row.candidate_p95_ms,
                    row.delta_pct,
                    row.regressed as i64,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Number of stored rows (for tests and trend tooling).
    pub fn row_count(&self) -> BenchResult<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM benchmark_rows", [], |r| r.get(0))?;
        Ok(count as u64)
    }
}
