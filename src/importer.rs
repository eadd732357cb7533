use std::fmt;
use std::path::Path;

use rusqlite::{Connection, OptionalExtension, Row};
use serde::Serialize;

use crate::db;
use crate::error::{PercError, Result};
use crate::ledger::{self, AppliedRow, ImportContext};
use crate::models::{CandidateRecord, ImportJob, JobStatus, Money, RowOutcome, RowStatus};
use crate::normalizer::{self, SheetFormat, SheetRow};
use crate::validator::{self, Rejection};

const UNKNOWN_MATRICULE: &str = "UNKNOWN";

// ---------------------------------------------------------------------------
// Per-row results
// ---------------------------------------------------------------------------

/// Why a candidate row did not reach the ledger.
#[derive(Debug)]
pub enum RowFailure {
    Rejected(Rejection),
    ApplyFailed(PercError),
}

impl fmt::Display for RowFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rejected(r) => write!(f, "{r}"),
            Self::ApplyFailed(e) => write!(f, "{e}"),
        }
    }
}

/// One line of the client-facing report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RowReport {
    pub line: usize,
    pub matricule: String,
    pub status: RowStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<Money>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RowReport {
    fn success(line: usize, matricule: &str, amount: Money) -> Self {
        Self {
            line,
            matricule: matricule.to_string(),
            status: RowStatus::Success,
            amount: Some(amount),
            error: None,
        }
    }

    fn failure(line: usize, matricule: &str, status: RowStatus, reason: String) -> Self {
        Self {
            line,
            matricule: matricule.to_string(),
            status,
            amount: None,
            error: Some(reason),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == RowStatus::Success
    }
}

/// Counters for one import run. Owned by that run only.
#[derive(Debug, Default)]
struct JobTally {
    success: usize,
    errors: usize,
    reports: Vec<RowReport>,
}

impl JobTally {
    fn push(&mut self, report: RowReport) {
        if report.is_success() {
            self.success += 1;
        } else {
            self.errors += 1;
        }
        self.reports.push(report);
    }

    fn status(&self) -> JobStatus {
        if self.errors == 0 {
            JobStatus::Complete
        } else {
            JobStatus::Partial
        }
    }

    fn failures(&self) -> impl Iterator<Item = &RowReport> {
        self.reports.iter().filter(|r| !r.is_success())
    }
}

// ---------------------------------------------------------------------------
// run_import
// ---------------------------------------------------------------------------

pub struct ImportRequest<'a> {
    pub filename: &'a str,
    pub bytes: &'a [u8],
    pub imported_by: &'a str,
    pub period: Option<&'a str>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImportSummary {
    pub import_id: i64,
    pub filename: String,
    pub status: JobStatus,
    pub total_lines: usize,
    pub parsed_lines: usize,
    pub parse_errors: usize,
    pub success_count: usize,
    pub error_count: usize,
    /// First non-success outcomes, in file order.
    pub details: Vec<RowReport>,
}

fn create_job(conn: &Connection, filename: &str, total_rows: usize, imported_by: &str) -> Result<i64> {
    conn.execute(
        "INSERT INTO import_jobs (filename, total_rows, imported_by, status) VALUES (?1, ?2, ?3, ?4)",
        rusqlite::params![filename, total_rows as i64, imported_by, JobStatus::InProgress.as_str()],
    )?;
    Ok(conn.last_insert_rowid())
}

fn record_failure(
    conn: &Connection,
    import_id: i64,
    report: &RowReport,
    raw_data: &str,
) -> Result<()> {
    conn.execute(
        "INSERT INTO import_rows (import_id, line_number, matricule, status, error, raw_data) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        rusqlite::params![
            import_id,
            report.line as i64,
            report.matricule,
            report.status.as_str(),
            report.error,
            raw_data
        ],
    )?;
    Ok(())
}

fn finalize_job(conn: &Connection, import_id: i64, tally: &JobTally) -> Result<()> {
    let failures: Vec<&RowReport> = tally.failures().collect();
    let error_report = serde_json::to_string(&failures)?;
    conn.execute(
        "UPDATE import_jobs SET success_count = ?1, error_count = ?2, status = ?3, error_report = ?4 WHERE id = ?5",
        rusqlite::params![
            tally.success as i64,
            tally.errors as i64,
            tally.status().as_str(),
            error_report,
            import_id
        ],
    )?;
    Ok(())
}

fn process_candidate(
    conn: &Connection,
    ctx: &ImportContext<'_>,
    candidate: &CandidateRecord,
) -> Result<RowReport> {
    let raw_data = serde_json::to_string(candidate)?;
    let outcome: std::result::Result<AppliedRow, RowFailure> = validator::validate(candidate)
        .map_err(RowFailure::Rejected)
        .and_then(|valid| {
            ledger::apply_record(conn, ctx, &valid, &raw_data).map_err(RowFailure::ApplyFailed)
        });

    let matricule = if candidate.matricule.is_empty() {
        UNKNOWN_MATRICULE
    } else {
        candidate.matricule.as_str()
    };
    match outcome {
        Ok(applied) => {
            log::debug!(
                "line {}: {} credited {} ({} -> {})",
                candidate.line,
                matricule,
                applied.amount,
                applied.balance_before,
                applied.balance_after
            );
            Ok(RowReport::success(candidate.line, matricule, applied.amount))
        }
        Err(failure) => {
            log::warn!("line {}: {} rejected: {failure}", candidate.line, matricule);
            let report = RowReport::failure(candidate.line, matricule, RowStatus::Error, failure.to_string());
            // outside the rolled-back scope
            record_failure(conn, ctx.import_id, &report, &raw_data)?;
            Ok(report)
        }
    }
}

/// Run one uploaded file through normalize, validate and apply.
///
/// File-level problems abort before a job exists. Row-level problems are
/// recorded against the job and never stop the batch.
pub fn run_import(conn: &Connection, req: &ImportRequest<'_>, detail_limit: usize) -> Result<ImportSummary> {
    let format = SheetFormat::from_filename(req.filename)?;
    let sheet = normalizer::normalize(req.bytes, format)?;

    let import_id = create_job(conn, req.filename, sheet.stats.total, req.imported_by)?;
    log::info!(
        "import #{import_id} of {} by {} started ({} rows)",
        req.filename,
        req.imported_by,
        sheet.stats.total
    );
    let ctx = ImportContext {
        import_id,
        filename: req.filename,
        period: req.period,
    };

    let mut tally = JobTally::default();
    for row in sheet.rows() {
        let report = match row {
            SheetRow::Unparseable(err) => {
                let report = RowReport::failure(err.line, &err.matricule, RowStatus::ParseError, err.reason.clone());
                record_failure(conn, import_id, &report, &serde_json::to_string(&err.raw)?)?;
                report
            }
            SheetRow::Candidate(candidate) => process_candidate(conn, &ctx, candidate)?,
        };
        tally.push(report);
    }

    finalize_job(conn, import_id, &tally)?;
    log::info!(
        "import #{import_id} finished: {} ok, {} errors",
        tally.success,
        tally.errors
    );

    Ok(ImportSummary {
        import_id,
        filename: req.filename.to_string(),
        status: tally.status(),
        total_lines: sheet.stats.total,
        parsed_lines: sheet.stats.valid,
        parse_errors: sheet.stats.errors,
        success_count: tally.success,
        error_count: tally.errors,
        details: tally.failures().take(detail_limit).cloned().collect(),
    })
}

/// Import a file from disk. The extension is checked before the file is read.
pub fn import_file(
    conn: &Connection,
    file_path: &Path,
    imported_by: &str,
    period: Option<&str>,
    detail_limit: usize,
) -> Result<ImportSummary> {
    let filename = file_path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("")
        .to_string();
    SheetFormat::from_filename(&filename)?;
    let bytes = std::fs::read(file_path)?;
    run_import(
        conn,
        &ImportRequest {
            filename: &filename,
            bytes: &bytes,
            imported_by,
            period,
        },
        detail_limit,
    )
}

// ---------------------------------------------------------------------------
// History
// ---------------------------------------------------------------------------

const JOB_COLUMNS: &str =
    "id, filename, total_rows, success_count, error_count, status, imported_by, error_report, created_at";

fn job_from_row(row: &Row<'_>) -> rusqlite::Result<ImportJob> {
    let status: String = row.get(5)?;
    Ok(ImportJob {
        id: row.get(0)?,
        filename: row.get(1)?,
        total_rows: row.get(2)?,
        success_count: row.get(3)?,
        error_count: row.get(4)?,
        status: JobStatus::parse(&status).unwrap_or(JobStatus::InProgress),
        imported_by: row.get(6)?,
        error_report: row.get(7)?,
        created_at: row.get(8)?,
    })
}

/// Jobs, newest first.
pub fn list_imports(conn: &Connection, limit: usize) -> Result<Vec<ImportJob>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {JOB_COLUMNS} FROM import_jobs ORDER BY created_at DESC, id DESC LIMIT ?1"
    ))?;
    let jobs = stmt
        .query_map([db::sql_count(limit)], job_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(jobs)
}

/// A job and every row outcome recorded for it, in line order.
pub fn import_detail(conn: &Connection, import_id: i64) -> Result<(ImportJob, Vec<RowOutcome>)> {
    let job = conn
        .query_row(
            &format!("SELECT {JOB_COLUMNS} FROM import_jobs WHERE id = ?1"),
            [import_id],
            job_from_row,
        )
        .optional()?
        .ok_or(PercError::UnknownImport(import_id))?;

    let mut stmt = conn.prepare(
        "SELECT id, import_id, line_number, matricule, status, error, raw_data \
         FROM import_rows WHERE import_id = ?1 ORDER BY line_number, id",
    )?;
    let rows = stmt
        .query_map([import_id], |row| {
            let status: String = row.get(4)?;
            Ok(RowOutcome {
                id: row.get(0)?,
                import_id: row.get(1)?,
                line_number: row.get(2)?,
                matricule: row.get(3)?,
                status: RowStatus::parse(&status).unwrap_or(RowStatus::Error),
                error: row.get(5)?,
                raw_data: row.get(6)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok((job, rows))
}
