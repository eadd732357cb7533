pub mod account;
pub mod audit;
pub mod auth;
pub mod backup;
pub mod import;
pub mod init;
pub mod load;
pub mod otp;
pub mod participants;
pub mod stats;
pub mod status;

use clap::{Parser, Subcommand};
use rusqlite::Connection;
use serde::Serialize;
use zeroize::Zeroize;

use crate::auth::{require_role, Session};
use crate::db::get_connection;
use crate::error::{PercError, Result};
use crate::models::{Money, ParseError, Role};
use crate::settings::{db_path, load_settings};

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

pub(crate) fn open_db() -> Result<Connection> {
    let path = db_path();
    if !path.exists() {
        return Err(PercError::Settings(format!(
            "No database found at {}\nRun `perc init` to set up.",
            path.display()
        )));
    }
    get_connection(&path)
}

fn require(conn: &Connection, role: Role) -> Result<Session> {
    let settings = load_settings();
    require_role(conn, settings.session_token.as_deref(), role)
}

pub(crate) fn require_admin(conn: &Connection) -> Result<Session> {
    require(conn, Role::Admin)
}

pub(crate) fn require_agent(conn: &Connection) -> Result<Session> {
    require(conn, Role::Agent)
}

/// `PERC_PASSWORD` when set, otherwise an interactive prompt.
pub(crate) fn read_password(prompt: &str) -> Result<String> {
    if let Ok(pw) = std::env::var("PERC_PASSWORD") {
        return Ok(pw);
    }
    Ok(rpassword::prompt_password(prompt)?)
}

/// Prompt twice; both copies are wiped before returning.
pub(crate) fn read_new_password() -> Result<String> {
    if let Ok(pw) = std::env::var("PERC_PASSWORD") {
        return Ok(pw);
    }
    let mut first = rpassword::prompt_password("New password: ")?;
    let mut confirm = rpassword::prompt_password("Confirm password: ")?;
    let matched = first == confirm;
    confirm.zeroize();
    if !matched {
        first.zeroize();
        return Err(PercError::Other("Passwords do not match".to_string()));
    }
    Ok(first)
}

#[derive(Serialize)]
struct Envelope<'a, T: Serialize> {
    success: bool,
    data: &'a T,
}

pub(crate) fn print_json<T: Serialize>(data: &T) -> Result<()> {
    let envelope = Envelope { success: true, data };
    println!("{}", serde_json::to_string_pretty(&envelope)?);
    Ok(())
}

#[derive(Serialize)]
struct ErrorEnvelope<'a> {
    success: bool,
    status: u16,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<&'a [ParseError]>,
}

pub(crate) fn print_error(err: &PercError, json: bool) {
    if !json {
        eprintln!("Error: {err}");
        if let PercError::NoUsableRows { details } = err {
            for d in details.iter().take(20) {
                eprintln!("  line {}: {}", d.line, d.reason);
            }
        }
        return;
    }
    let details = match err {
        PercError::NoUsableRows { details } => Some(details.as_slice()),
        _ => None,
    };
    let envelope = ErrorEnvelope {
        success: false,
        status: err.status_code(),
        message: err.to_string(),
        details,
    };
    match serde_json::to_string_pretty(&envelope) {
        Ok(out) => println!("{out}"),
        Err(_) => eprintln!("Error: {err}"),
    }
}

fn parse_period(s: &str) -> std::result::Result<String, String> {
    chrono::NaiveDate::parse_from_str(&format!("{s}-01"), "%Y-%m-%d")
        .map(|_| s.to_string())
        .map_err(|_| format!("expected YYYY-MM, got \"{s}\""))
}

// ---------------------------------------------------------------------------
// Command line
// ---------------------------------------------------------------------------

#[derive(Parser)]
#[command(name = "perc", about = "Back-office ledger for PERC retirement-savings contributions.")]
pub struct Cli {
    /// Print results as a JSON envelope.
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Choose a data directory and initialize the database.
    Init {
        /// Path for PERC data (default: ~/Documents/perc)
        #[arg(long = "data-dir")]
        data_dir: Option<String>,
    },
    /// Switch to an existing PERC data directory.
    Load {
        /// Path to data directory containing perc.db
        path: String,
    },
    /// Show current database and summary statistics.
    Status,
    /// Back up the database.
    Backup {
        /// Output path (default: <data_dir>/backups/perc-YYYYMMDD-HHMMSS.db)
        #[arg(long)]
        output: Option<String>,
    },
    /// Import a contribution file (.xlsx, .xls or .csv). Admin only.
    Import {
        /// Path to the file
        file: String,
        /// Contribution period for every row: YYYY-MM
        #[arg(long, value_parser = parse_period)]
        period: Option<String>,
    },
    /// Browse past imports. Admin only.
    Imports {
        #[command(subcommand)]
        command: ImportsCommands,
    },
    /// Look up and correct participants. Admin only.
    Participants {
        #[command(subcommand)]
        command: ParticipantsCommands,
    },
    /// Admin dashboard and recent activity.
    Stats,
    /// Check every balance against its movement history. Admin only.
    Audit,
    /// Statements for the logged-in agent.
    Account {
        #[command(subcommand)]
        command: AccountCommands,
    },
    /// Manage administrators.
    Admin {
        #[command(subcommand)]
        command: AdminCommands,
    },
    /// Open a session.
    Login {
        #[command(subcommand)]
        command: LoginCommands,
    },
    /// Close the current session.
    Logout,
    /// Show the current session.
    Whoami,
    /// One-time codes for agent sign-in.
    Otp {
        #[command(subcommand)]
        command: OtpCommands,
    },
    /// Set the password of the logged-in agent.
    Password,
}

#[derive(Subcommand)]
pub enum ImportsCommands {
    /// List imports, newest first.
    List {
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Show one import with every row outcome.
    Show {
        /// Import ID (shown in `perc imports list`)
        id: i64,
    },
}

#[derive(Subcommand)]
pub enum ParticipantsCommands {
    /// Search by matricule or name.
    List {
        #[arg(long)]
        search: Option<String>,
        #[arg(long, default_value = "50")]
        limit: usize,
    },
    /// Show one participant with their account.
    Show { matricule: String },
    /// Overwrite a balance, recording a correction movement.
    Correct {
        matricule: String,
        /// New balance
        #[arg(long)]
        balance: Money,
        /// Reason recorded on the movement
        #[arg(long)]
        reason: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum AccountCommands {
    /// Account overview.
    Summary,
    /// Current balance only.
    Balance,
    /// Contribution history.
    Contributions {
        /// Year filter: YYYY
        #[arg(long)]
        year: Option<i32>,
        #[arg(long, default_value = "1")]
        page: usize,
        #[arg(long = "per-page", default_value = "20")]
        per_page: usize,
    },
    /// Balance movements, newest first.
    Movements {
        #[arg(long, default_value = "50")]
        limit: usize,
    },
    /// Monthly totals for a year.
    Yearly {
        /// Year: YYYY (default: current year)
        #[arg(long)]
        year: Option<i32>,
    },
    /// Contributions and movements in one feed.
    Operations {
        #[arg(long, default_value = "5")]
        limit: usize,
    },
}

#[derive(Subcommand)]
pub enum AdminCommands {
    /// Create an administrator. The first one needs no session.
    Add {
        username: String,
        /// Full name
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        email: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum LoginCommands {
    /// Sign in as an administrator.
    Admin { username: String },
    /// Sign in as an agent with a password.
    Agent { matricule: String },
}

#[derive(Subcommand)]
pub enum OtpCommands {
    /// Send a one-time code to the agent's phone. Without an SMS gateway the
    /// code is written to stderr.
    Request { matricule: String },
    /// Verify a code and open an agent session.
    Verify { matricule: String, code: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_period() {
        assert_eq!(parse_period("2025-01"), Ok("2025-01".to_string()));
        assert!(parse_period("2025-13").is_err());
        assert!(parse_period("Jan 2025").is_err());
    }

    #[test]
    fn test_cli_definition_is_valid() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
