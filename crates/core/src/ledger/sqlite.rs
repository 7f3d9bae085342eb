use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::events::PipelineEvent;

use super::{EventRecord, LedgerError, LedgerStore, RunFilter, RunRecord, RunSummary};

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS promotion_runs (
        run_id TEXT PRIMARY KEY,
        source_environment TEXT NOT NULL,
        target_environment TEXT NOT NULL,
        version_label TEXT,
        outcome TEXT NOT NULL,
        failed_stage TEXT,
        error_kind TEXT,
        content_hash TEXT,
        started_at TEXT NOT NULL,
        finished_at TEXT,
        data TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_promotion_runs_started_at ON promotion_runs(started_at);
    CREATE INDEX IF NOT EXISTS idx_promotion_runs_target ON promotion_runs(target_environment);

    CREATE TABLE IF NOT EXISTS pipeline_events (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        timestamp TEXT NOT NULL,
        run_id TEXT,
        event_type TEXT NOT NULL,
        job_id TEXT,
        data TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_pipeline_events_run_id ON pipeline_events(run_id);
    CREATE INDEX IF NOT EXISTS idx_pipeline_events_event_type ON pipeline_events(event_type);
"#;

const RUN_COLUMNS: &str = "run_id, source_environment, target_environment, version_label, \
     outcome, failed_stage, error_kind, content_hash, started_at, finished_at";

/// SQLite-backed run ledger
pub struct SqliteLedgerStore {
    conn: Mutex<Connection>,
}

impl SqliteLedgerStore {
    /// Open (or create) the ledger database at `path`
    pub fn new(path: &Path) -> Result<Self, LedgerError> {
        let conn = Connection::open(path).map_err(db_err)?;
        Self::init(conn)
    }

    /// Create an in-memory ledger (useful for testing)
    pub fn in_memory() -> Result<Self, LedgerError> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self, LedgerError> {
        conn.execute_batch(SCHEMA).map_err(db_err)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, LedgerError> {
        self.conn
            .lock()
            .map_err(|_| LedgerError::Database("ledger connection poisoned".to_string()))
    }
}

fn db_err(e: rusqlite::Error) -> LedgerError {
    LedgerError::Database(e.to_string())
}

fn parse_time(value: &str) -> Result<DateTime<Utc>, LedgerError> {
    DateTime::parse_from_rfc3339(value)
        .map(Into::into)
        .map_err(|e| LedgerError::Database(format!("Invalid timestamp: {}", e)))
}

/// Raw run columns as read from SQLite, before timestamp parsing.
type RunRow = (
    String,
    String,
    String,
    Option<String>,
    String,
    Option<String>,
    Option<String>,
    Option<String>,
    String,
    Option<String>,
);

fn read_run_row(row: &Row<'_>) -> rusqlite::Result<RunRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
        row.get(9)?,
    ))
}

fn summary_from_row(row: RunRow) -> Result<RunSummary, LedgerError> {
    let (
        run_id,
        source_environment,
        target_environment,
        version_label,
        outcome,
        failed_stage,
        error_kind,
        content_hash,
        started_at,
        finished_at,
    ) = row;

    Ok(RunSummary {
        run_id,
        source_environment,
        target_environment,
        version_label,
        outcome,
        failed_stage,
        error_kind,
        content_hash,
        started_at: parse_time(&started_at)?,
        finished_at: finished_at.as_deref().map(parse_time).transpose()?,
    })
}

impl LedgerStore for SqliteLedgerStore {
    fn record_event(&self, record: &EventRecord) -> Result<i64, LedgerError> {
        let conn = self.conn()?;

        let data_json = serde_json::to_string(&record.data)
            .map_err(|e| LedgerError::Serialization(e.to_string()))?;

        conn.execute(
            "INSERT INTO pipeline_events (timestamp, run_id, event_type, job_id, data) VALUES (?, ?, ?, ?, ?)",
            params![
                record.timestamp.to_rfc3339(),
                record.run_id,
                record.event_type,
                record.job_id,
                data_json,
            ],
        )
        .map_err(db_err)?;

        Ok(conn.last_insert_rowid())
    }

    fn save_run(&self, run: &RunRecord) -> Result<(), LedgerError> {
        let conn = self.conn()?;
        let s = &run.summary;

        let data_json = serde_json::to_string(&run.data)
            .map_err(|e| LedgerError::Serialization(e.to_string()))?;

        conn.execute(
            &format!(
                "INSERT OR REPLACE INTO promotion_runs ({}, data) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                RUN_COLUMNS
            ),
            params![
                s.run_id,
                s.source_environment,
                s.target_environment,
                s.version_label,
                s.outcome,
                s.failed_stage,
                s.error_kind,
                s.content_hash,
                s.started_at.to_rfc3339(),
                s.finished_at.map(|t| t.to_rfc3339()),
                data_json,
            ],
        )
        .map_err(db_err)?;

        Ok(())
    }

    fn get_run(&self, run_id: &str) -> Result<Option<RunRecord>, LedgerError> {
        let conn = self.conn()?;

        let row = conn
            .query_row(
                &format!("SELECT {}, data FROM promotion_runs WHERE run_id = ?", RUN_COLUMNS),
                params![run_id],
                |row| Ok((read_run_row(row)?, row.get::<_, String>(10)?)),
            )
            .optional()
            .map_err(db_err)?;

        let Some((columns, data_json)) = row else {
            return Ok(None);
        };

        let data = serde_json::from_str(&data_json)
            .map_err(|e| LedgerError::Serialization(e.to_string()))?;

        Ok(Some(RunRecord {
            summary: summary_from_row(columns)?,
            data,
        }))
    }

    fn list_runs(&self, filter: &RunFilter) -> Result<Vec<RunSummary>, LedgerError> {
        let conn = self.conn()?;

        let mut conditions = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(ref target) = filter.target_environment {
            conditions.push("target_environment = ?");
            params.push(Box::new(target.clone()));
        }

        if let Some(ref outcome) = filter.outcome {
            conditions.push("outcome = ?");
            params.push(Box::new(outcome.clone()));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let sql = format!(
            "SELECT {} FROM promotion_runs {} ORDER BY started_at DESC LIMIT ?",
            RUN_COLUMNS, where_clause
        );
        params.push(Box::new(filter.limit));

        let mut stmt = conn.prepare(&sql).map_err(db_err)?;
        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        let rows = stmt
            .query_map(param_refs.as_slice(), read_run_row)
            .map_err(db_err)?;

        let mut runs = Vec::new();
        for row in rows {
            runs.push(summary_from_row(row.map_err(db_err)?)?);
        }

        Ok(runs)
    }

    fn events_for_run(&self, run_id: &str) -> Result<Vec<EventRecord>, LedgerError> {
        let conn = self.conn()?;

        let mut stmt = conn
            .prepare(
                "SELECT id, timestamp, run_id, event_type, job_id, data FROM pipeline_events WHERE run_id = ? ORDER BY id ASC",
            )
            .map_err(db_err)?;

        let rows = stmt
            .query_map(params![run_id], |row| {
                let id: i64 = row.get(0)?;
                let timestamp: String = row.get(1)?;
                let run_id: Option<String> = row.get(2)?;
                let event_type: String = row.get(3)?;
                let job_id: Option<String> = row.get(4)?;
                let data: String = row.get(5)?;
                Ok((id, timestamp, run_id, event_type, job_id, data))
            })
            .map_err(db_err)?;

        let mut records = Vec::new();
        for row in rows {
            let (id, timestamp, run_id, event_type, job_id, data_json) = row.map_err(db_err)?;

            let data: PipelineEvent = serde_json::from_str(&data_json)
                .map_err(|e| LedgerError::Serialization(e.to_string()))?;

            records.push(EventRecord {
                id,
                timestamp: parse_time(&timestamp)?,
                run_id,
                event_type,
                job_id,
                data,
            });
        }

        Ok(records)
    }
}
