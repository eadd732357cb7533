use thiserror::Error;

use crate::models::ParseError;

#[derive(Error, Debug)]
pub enum PercError {
    #[error("Database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Password hashing error: {0}")]
    Hash(#[from] bcrypt::BcryptError),

    #[error("Spreadsheet error: {0}")]
    Spreadsheet(String),

    #[error("Unsupported file format: {0} (use .xlsx, .xls or .csv)")]
    UnsupportedFormat(String),

    #[error("Empty file: no data rows below the header")]
    EmptySheet,

    #[error("No usable rows: {} rows could not be parsed", .details.len())]
    NoUsableRows { details: Vec<ParseError> },

    #[error("Unknown participant: {0}")]
    UnknownParticipant(String),

    #[error("Unknown import: {0}")]
    UnknownImport(i64),

    #[error("Account conflict: {0}")]
    AccountConflict(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Invalid username or password")]
    InvalidCredentials,

    #[error("Session invalid or expired")]
    InvalidSession,

    #[error("Not logged in. Run `perc login` first.")]
    NotLoggedIn,

    #[error("Access denied: {0}")]
    Forbidden(String),

    #[error("Code invalid or expired")]
    OtpRejected,

    #[error("No password set for {0}. Use `perc otp request` to sign in.")]
    PasswordNotSet(String),

    #[error("Settings error: {0}")]
    Settings(String),

    #[error("{0}")]
    Other(String),
}

impl PercError {
    /// HTTP-style status class, used for the JSON envelope and the exit code.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::UnsupportedFormat(_)
            | Self::EmptySheet
            | Self::NoUsableRows { .. }
            | Self::Spreadsheet(_)
            | Self::Csv(_)
            | Self::InvalidAmount(_)
            | Self::AccountConflict(_) => 400,
            Self::InvalidCredentials
            | Self::InvalidSession
            | Self::NotLoggedIn
            | Self::OtpRejected
            | Self::PasswordNotSet(_) => 401,
            Self::Forbidden(_) => 403,
            Self::UnknownParticipant(_) | Self::UnknownImport(_) => 404,
            _ => 500,
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self.status_code() {
            400 => 2,
            401 | 403 => 3,
            404 => 4,
            _ => 1,
        }
    }
}

pub type Result<T> = std::result::Result<T, PercError>;
