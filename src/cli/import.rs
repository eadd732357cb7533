use std::path::PathBuf;

use colored::Colorize;
use comfy_table::{Cell, Table};
use serde::Serialize;

use crate::error::Result;
use crate::importer::{self, ImportSummary, RowReport};
use crate::models::{ImportJob, JobStatus, RowOutcome, RowStatus};
use crate::settings::load_settings;

fn status_label(status: JobStatus) -> colored::ColoredString {
    match status {
        JobStatus::Complete => "complete".green().bold(),
        JobStatus::Partial => "partial".yellow().bold(),
        JobStatus::InProgress => "in progress".red().bold(),
    }
}

fn row_status_label(status: RowStatus) -> colored::ColoredString {
    match status {
        RowStatus::Success => "success".green(),
        RowStatus::Error => "error".red(),
        RowStatus::ParseError => "parse error".red(),
    }
}

fn details_table(details: &[RowReport]) -> Table {
    let mut table = Table::new();
    table.set_header(vec!["Line", "Matricule", "Status", "Error"]);
    for d in details {
        table.add_row(vec![
            Cell::new(d.line),
            Cell::new(&d.matricule),
            Cell::new(row_status_label(d.status)),
            Cell::new(d.error.as_deref().unwrap_or("")),
        ]);
    }
    table
}

fn print_summary(summary: &ImportSummary) {
    println!(
        "Import #{} of {}: {}",
        summary.import_id,
        summary.filename,
        status_label(summary.status)
    );
    println!(
        "  {} rows read, {} parsed, {} parse errors",
        summary.total_lines, summary.parsed_lines, summary.parse_errors
    );
    println!(
        "  {} applied, {} rejected",
        summary.success_count.to_string().green(),
        summary.error_count.to_string().red()
    );
    if !summary.details.is_empty() {
        println!("\nFirst rejected rows\n{}", details_table(&summary.details));
        if summary.error_count > summary.details.len() {
            println!("Run `perc imports show {}` for the full list.", summary.import_id);
        }
    }
}

pub fn run(file: &str, period: Option<&str>, json: bool) -> Result<()> {
    let conn = super::open_db()?;
    let session = super::require_admin(&conn)?;
    let settings = load_settings();

    let file_path = PathBuf::from(file);
    let summary = importer::import_file(&conn, &file_path, &session.subject, period, settings.detail_limit)?;

    if json {
        return super::print_json(&summary);
    }
    print_summary(&summary);
    Ok(())
}

pub fn list(limit: Option<usize>, json: bool) -> Result<()> {
    let conn = super::open_db()?;
    super::require_admin(&conn)?;
    let limit = limit.unwrap_or_else(|| load_settings().history_limit);
    let jobs = importer::list_imports(&conn, limit)?;

    if json {
        return super::print_json(&jobs);
    }
    if jobs.is_empty() {
        println!("No imports yet.");
        return Ok(());
    }
    let mut table = Table::new();
    table.set_header(vec!["ID", "File", "Date", "By", "Rows", "OK", "Errors", "Status"]);
    for job in &jobs {
        table.add_row(vec![
            Cell::new(job.id),
            Cell::new(&job.filename),
            Cell::new(&job.created_at),
            Cell::new(&job.imported_by),
            Cell::new(job.total_rows),
            Cell::new(job.success_count),
            Cell::new(job.error_count),
            Cell::new(status_label(job.status)),
        ]);
    }
    println!("Imports\n{table}");
    Ok(())
}

#[derive(Serialize)]
struct ImportDetail {
    job: ImportJob,
    rows: Vec<RowOutcome>,
}

pub fn show(id: i64, json: bool) -> Result<()> {
    let conn = super::open_db()?;
    super::require_admin(&conn)?;
    let (job, rows) = importer::import_detail(&conn, id)?;

    if json {
        return super::print_json(&ImportDetail { job, rows });
    }
    println!("Import #{} of {}: {}", job.id, job.filename, status_label(job.status));
    println!("  by {} on {}", job.imported_by, job.created_at);
    println!(
        "  {} rows, {} applied, {} rejected",
        job.total_rows, job.success_count, job.error_count
    );

    let mut table = Table::new();
    table.set_header(vec!["Line", "Matricule", "Status", "Error"]);
    for row in &rows {
        table.add_row(vec![
            Cell::new(row.line_number),
            Cell::new(&row.matricule),
            Cell::new(row_status_label(row.status)),
            Cell::new(row.error.as_deref().unwrap_or("")),
        ]);
    }
    println!("\n{table}");
    Ok(())
}
