use crate::model::{CanonicalTransaction, TransactionKind};
use chrono::{NaiveDate, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;
use std::collections::HashSet;
use std::path::Path;
use tracing::info;
use uuid::Uuid;

const MIGRATIONS: &[(&str, &str)] = &[(
    "0001_init.sql",
    include_str!("../db/migrations/0001_init.sql"),
)];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Processing => "PROCESSING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "PENDING" => Some(Self::Pending),
            "PROCESSING" => Some(Self::Processing),
            "COMPLETED" => Some(Self::Completed),
            "FAILED" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JobRecord {
    pub job_id: String,
    pub status: JobStatus,
    pub source_file: String,
    pub source_kind: String,
    pub csv_layout: String,
    pub date_order: String,
    pub output_file: Option<String>,
    pub error_message: Option<String>,
    pub record_count: i64,
    pub transaction_count: i64,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone)]
pub struct NewJob<'a> {
    pub source_file: &'a str,
    pub source_kind: &'a str,
    pub csv_layout: &'a str,
    pub date_order: &'a str,
}

/// Optional fields written together with a status change.
#[derive(Debug, Clone, Default)]
pub struct JobUpdate {
    pub output_file: Option<String>,
    pub error_message: Option<String>,
    pub record_count: Option<i64>,
    pub transaction_count: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct MigrateResult {
    pub db_path: String,
    pub created: bool,
    pub applied_now: Vec<String>,
    pub skipped: Vec<String>,
    pub applied_total: usize,
    pub pending_total: usize,
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn ensure_schema_migrations_table(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS schema_migrations (
            version TEXT PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );
        "#,
    )
}

fn load_applied_versions(conn: &Connection) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT version FROM schema_migrations ORDER BY version ASC")?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
    let mut versions = Vec::new();
    for row in rows {
        versions.push(row?);
    }
    Ok(versions)
}

fn apply_migrations(conn: &mut Connection) -> Result<(Vec<String>, Vec<String>), String> {
    ensure_schema_migrations_table(conn)
        .map_err(|e| format!("failed to create schema_migrations: {e}"))?;
    let already = load_applied_versions(conn)
        .map_err(|e| format!("failed to read applied migrations: {e}"))?
        .into_iter()
        .collect::<HashSet<_>>();

    let mut applied_now = Vec::new();
    let mut skipped = Vec::new();
    for (version, sql) in MIGRATIONS {
        if already.contains(*version) {
            skipped.push((*version).to_string());
            continue;
        }
        let tx = conn
            .transaction()
            .map_err(|e| format!("failed to begin migration ({version}): {e}"))?;
        tx.execute_batch(sql)
            .map_err(|e| format!("migration failed ({version}): {e}"))?;
        tx.execute(
            "INSERT INTO schema_migrations(version) VALUES (?1)",
            [*version],
        )
        .map_err(|e| format!("failed to record migration ({version}): {e}"))?;
        tx.commit()
            .map_err(|e| format!("failed to commit migration ({version}): {e}"))?;
        applied_now.push((*version).to_string());
    }
    Ok((applied_now, skipped))
}

pub fn apply_embedded_migrations(db_path: &Path) -> Result<MigrateResult, String> {
    let created = !db_path.exists();
    if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .map_err(|e| format!("failed to create database directory: {e}"))?;
    }

    let mut conn = Connection::open(db_path).map_err(|e| format!("failed to open database: {e}"))?;
    conn.execute_batch("PRAGMA foreign_keys = ON;")
        .map_err(|e| format!("failed to enable foreign_keys: {e}"))?;
    let (applied_now, skipped) = apply_migrations(&mut conn)?;

    let applied_total = load_applied_versions(&conn)
        .map_err(|e| format!("failed to read migration result: {e}"))?
        .len();
    if !applied_now.is_empty() {
        info!(db = %db_path.display(), applied = ?applied_now, "database migrated");
    }

    Ok(MigrateResult {
        db_path: db_path.to_string_lossy().to_string(),
        created,
        applied_now,
        skipped,
        applied_total,
        pending_total: MIGRATIONS.len().saturating_sub(applied_total),
    })
}

/// Opens the job database, applying any pending migration first.
pub fn open_job_db(db_path: &Path) -> Result<Connection, String> {
    apply_embedded_migrations(db_path)?;
    let conn = Connection::open(db_path).map_err(|e| format!("failed to open database: {e}"))?;
    conn.execute_batch("PRAGMA foreign_keys = ON;")
        .map_err(|e| format!("failed to enable foreign_keys: {e}"))?;
    Ok(conn)
}

const JOB_COLUMNS: &str = "job_id, status, source_file, source_kind, csv_layout, date_order, output_file, error_message, record_count, transaction_count, created_at, updated_at";

fn job_from_row(row: &Row<'_>) -> rusqlite::Result<JobRecord> {
    let status_raw: String = row.get(1)?;
    let status = JobStatus::parse(&status_raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            1,
            rusqlite::types::Type::Text,
            format!("unknown job status {status_raw}").into(),
        )
    })?;
    Ok(JobRecord {
        job_id: row.get(0)?,
        status,
        source_file: row.get(2)?,
        source_kind: row.get(3)?,
        csv_layout: row.get(4)?,
        date_order: row.get(5)?,
        output_file: row.get(6)?,
        error_message: row.get(7)?,
        record_count: row.get(8)?,
        transaction_count: row.get(9)?,
        created_at: row.get(10)?,
        updated_at: row.get(11)?,
    })
}

pub fn create_job(conn: &Connection, job: &NewJob<'_>) -> Result<JobRecord, String> {
    let job_id = Uuid::new_v4().to_string();
    let now = now_rfc3339();
    conn.execute(
        r#"
        INSERT INTO jobs(job_id, status, source_file, source_kind, csv_layout, date_order, created_at, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
        "#,
        params![
            job_id,
            JobStatus::Pending.as_str(),
            job.source_file,
            job.source_kind,
            job.csv_layout,
            job.date_order,
            now
        ],
    )
    .map_err(|e| format!("failed to create job: {e}"))?;
    get_job(conn, &job_id)?.ok_or_else(|| format!("job vanished after insert: {job_id}"))
}

pub fn get_job(conn: &Connection, job_id: &str) -> Result<Option<JobRecord>, String> {
    conn.query_row(
        &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE job_id = ?1"),
        [job_id],
        job_from_row,
    )
    .optional()
    .map_err(|e| format!("failed to load job {job_id}: {e}"))
}

/// Newest first.
pub fn list_jobs(conn: &Connection, limit: u32, offset: u32) -> Result<Vec<JobRecord>, String> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs ORDER BY created_at DESC, rowid DESC LIMIT ?1 OFFSET ?2"
        ))
        .map_err(|e| format!("failed to prepare job listing: {e}"))?;
    let rows = stmt
        .query_map(params![limit, offset], job_from_row)
        .map_err(|e| format!("failed to list jobs: {e}"))?;
    rows.collect::<rusqlite::Result<Vec<_>>>()
        .map_err(|e| format!("failed to read job row: {e}"))
}

/// Moves a job to `status`. Finished jobs cannot change again.
pub fn update_job_status(
    conn: &Connection,
    job_id: &str,
    status: JobStatus,
    update: &JobUpdate,
) -> Result<JobRecord, String> {
    let current = get_job(conn, job_id)?.ok_or_else(|| format!("job not found: {job_id}"))?;
    if current.status.is_terminal() {
        return Err(format!(
            "job {job_id} is already {} and cannot become {}",
            current.status.as_str(),
            status.as_str()
        ));
    }

    conn.execute(
        r#"
        UPDATE jobs
        SET status = ?1,
            output_file = COALESCE(?2, output_file),
            error_message = COALESCE(?3, error_message),
            record_count = COALESCE(?4, record_count),
            transaction_count = COALESCE(?5, transaction_count),
            updated_at = ?6
        WHERE job_id = ?7
        "#,
        params![
            status.as_str(),
            update.output_file,
            update.error_message,
            update.record_count,
            update.transaction_count,
            now_rfc3339(),
            job_id
        ],
    )
    .map_err(|e| format!("failed to update job {job_id}: {e}"))?;
    get_job(conn, job_id)?.ok_or_else(|| format!("job not found: {job_id}"))
}

/// Replaces the stored transactions of a job. Running it twice with the same input
/// leaves the same rows.
pub fn replace_job_transactions(
    conn: &mut Connection,
    job_id: &str,
    transactions: &[CanonicalTransaction],
) -> Result<usize, String> {
    let tx = conn
        .transaction()
        .map_err(|e| format!("failed to begin transaction write: {e}"))?;
    tx.execute("DELETE FROM transactions WHERE job_id = ?1", [job_id])
        .map_err(|e| format!("failed to clear job transactions: {e}"))?;

    let now = now_rfc3339();
    {
        let mut stmt = tx
            .prepare(
                r#"
                INSERT INTO transactions(transaction_id, job_id, ordinal, date, description, amount, kind, source_file, processing_notes, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                ON CONFLICT(job_id, transaction_id) DO UPDATE SET
                    ordinal = excluded.ordinal,
                    date = excluded.date,
                    description = excluded.description,
                    amount = excluded.amount,
                    kind = excluded.kind,
                    source_file = excluded.source_file,
                    processing_notes = excluded.processing_notes
                "#,
            )
            .map_err(|e| format!("failed to prepare transaction insert: {e}"))?;
        for (ordinal, txn) in transactions.iter().enumerate() {
            let notes = serde_json::to_string(txn.notes())
                .map_err(|e| format!("failed to encode processing notes: {e}"))?;
            stmt.execute(params![
                txn.id(),
                job_id,
                i64::try_from(ordinal).unwrap_or(i64::MAX),
                txn.date().format("%Y-%m-%d").to_string(),
                txn.description(),
                txn.amount(),
                txn.kind().as_str(),
                txn.source_name(),
                notes,
                now
            ])
            .map_err(|e| format!("failed to store transaction {}: {e}", txn.id()))?;
        }
    }
    tx.commit()
        .map_err(|e| format!("failed to commit transactions: {e}"))?;

    let stored = count_job_transactions(conn, job_id)?;
    Ok(stored)
}

fn count_job_transactions(conn: &Connection, job_id: &str) -> Result<usize, String> {
    let count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM transactions WHERE job_id = ?1",
            [job_id],
            |row| row.get(0),
        )
        .map_err(|e| format!("failed to count transactions: {e}"))?;
    Ok(usize::try_from(count).unwrap_or_default())
}

pub fn list_job_transactions(
    conn: &Connection,
    job_id: &str,
) -> Result<Vec<CanonicalTransaction>, String> {
    let mut stmt = conn
        .prepare(
            r#"
            SELECT transaction_id, date, description, amount, kind, source_file, processing_notes
            FROM transactions
            WHERE job_id = ?1
            ORDER BY ordinal ASC
            "#,
        )
        .map_err(|e| format!("failed to prepare transaction listing: {e}"))?;
    let rows = stmt
        .query_map([job_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, f64>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, String>(6)?,
            ))
        })
        .map_err(|e| format!("failed to list transactions: {e}"))?;

    let mut out = Vec::new();
    for row in rows {
        let (id, date, description, amount, kind, source_file, notes) =
            row.map_err(|e| format!("failed to read transaction row: {e}"))?;
        let date = NaiveDate::parse_from_str(&date, "%Y-%m-%d")
            .map_err(|e| format!("stored date {date} is invalid: {e}"))?;
        let kind = match kind.as_str() {
            "Credit" => TransactionKind::Credit,
            "Debit" => TransactionKind::Debit,
            other => return Err(format!("stored kind {other} is invalid")),
        };
        let notes = serde_json::from_str::<Vec<String>>(&notes)
            .map_err(|e| format!("stored notes for {id} are invalid: {e}"))?;
        out.push(CanonicalTransaction::restore(
            id,
            date,
            description,
            amount,
            kind,
            source_file,
            notes,
        ));
    }
    Ok(out)
}
