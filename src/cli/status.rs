use serde::Serialize;

use crate::auth::verify_token;
use crate::db::{get_connection, get_metadata};
use crate::error::Result;
use crate::fmt::format_bytes;
use crate::settings::{db_path, load_settings};

#[derive(Serialize)]
struct Counts {
    participants: i64,
    accounts: i64,
    contributions: i64,
    imports: i64,
    admins: i64,
}

#[derive(Serialize)]
struct StatusReport {
    data_dir: String,
    database: String,
    db_size: Option<u64>,
    schema_version: Option<String>,
    session: Option<String>,
    counts: Option<Counts>,
}

fn count(conn: &rusqlite::Connection, table: &str) -> Result<i64> {
    Ok(conn.query_row(&format!("SELECT count(*) FROM {table}"), [], |r| r.get(0))?)
}

pub fn run(json: bool) -> Result<()> {
    let settings = load_settings();
    let db_path = db_path();

    let mut report = StatusReport {
        data_dir: settings.data_dir.clone(),
        database: db_path.display().to_string(),
        db_size: None,
        schema_version: None,
        session: None,
        counts: None,
    };

    if db_path.exists() {
        report.db_size = Some(std::fs::metadata(&db_path)?.len());
        let conn = get_connection(&db_path)?;
        report.schema_version = get_metadata(&conn, "schema_version");
        report.session = settings
            .session_token
            .as_deref()
            .and_then(|t| verify_token(&conn, t).ok())
            .map(|s| format!("{} ({})", s.subject, s.role.as_str()));
        report.counts = Some(Counts {
            participants: count(&conn, "participants")?,
            accounts: count(&conn, "accounts")?,
            contributions: count(&conn, "contributions")?,
            imports: count(&conn, "import_jobs")?,
            admins: count(&conn, "admins")?,
        });
    }

    if json {
        return super::print_json(&report);
    }

    println!("Data dir:   {}", report.data_dir);
    println!("Database:   {}", report.database);
    let Some(counts) = report.counts else {
        println!();
        println!("Database not found. Run `perc init` to set up.");
        return Ok(());
    };
    if let Some(size) = report.db_size {
        println!("DB size:    {}", format_bytes(size));
    }
    println!("Schema:     v{}", report.schema_version.as_deref().unwrap_or("?"));
    println!("Session:    {}", report.session.as_deref().unwrap_or("(none)"));
    println!();
    println!("Participants:   {}", counts.participants);
    println!("Accounts:       {}", counts.accounts);
    println!("Contributions:  {}", counts.contributions);
    println!("Imports:        {}", counts.imports);
    println!("Admins:         {}", counts.admins);
    Ok(())
}
