use std::collections::BTreeMap;
use std::fmt;
use std::iter::Sum;
use std::str::FromStr;

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Money
// ---------------------------------------------------------------------------

/// Exact decimal amount. Stored as canonical TEXT so SQLite never rounds it.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(Decimal);

impl Money {
    pub const ZERO: Money = Money(Decimal::ZERO);

    pub fn new(value: Decimal) -> Self {
        Self(value)
    }

    pub fn value(&self) -> Decimal {
        self.0
    }

    pub fn is_positive(&self) -> bool {
        self.0 > Decimal::ZERO
    }
}

impl FromStr for Money {
    type Err = rust_decimal::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Decimal::from_str(s.trim()).map(Money)
    }
}

impl From<i64> for Money {
    fn from(value: i64) -> Self {
        Money(Decimal::from(value))
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Money {
    pub fn checked_add(self, rhs: Money) -> Option<Money> {
        self.0.checked_add(rhs.0).map(Money)
    }

    pub fn checked_sub(self, rhs: Money) -> Option<Money> {
        self.0.checked_sub(rhs.0).map(Money)
    }

    /// Clamps at the representable bounds instead of panicking.
    pub fn saturating_add(self, rhs: Money) -> Money {
        Money(self.0.saturating_add(rhs.0))
    }
}

/// Totals for display and audit; saturates rather than panicking.
impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self {
        iter.fold(Money::ZERO, Money::saturating_add)
    }
}

impl ToSql for Money {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.0.to_string()))
    }
}

impl FromSql for Money {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value {
            ValueRef::Text(bytes) => {
                let text = std::str::from_utf8(bytes).map_err(|e| FromSqlError::Other(Box::new(e)))?;
                Money::from_str(text).map_err(|e| FromSqlError::Other(Box::new(e)))
            }
            ValueRef::Integer(i) => Ok(Money::from(i)),
            ValueRef::Real(f) => Decimal::from_f64_retain(f)
                .map(Money)
                .ok_or(FromSqlError::InvalidType),
            ValueRef::Null => Ok(Money::ZERO),
            ValueRef::Blob(_) => Err(FromSqlError::InvalidType),
        }
    }
}

// ---------------------------------------------------------------------------
// Status enums
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    InProgress,
    Complete,
    Partial,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InProgress => "in_progress",
            Self::Complete => "complete",
            Self::Partial => "partial",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "in_progress" => Some(Self::InProgress),
            "complete" => Some(Self::Complete),
            "partial" => Some(Self::Partial),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowStatus {
    Success,
    Error,
    ParseError,
}

impl RowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
            Self::ParseError => "parse_error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "success" => Some(Self::Success),
            "error" => Some(Self::Error),
            "parse_error" => Some(Self::ParseError),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementKind {
    Contribution,
    Correction,
}

impl MovementKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Contribution => "contribution",
            Self::Correction => "correction",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Agent,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Agent => "agent",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "admin" => Some(Self::Admin),
            "agent" => Some(Self::Agent),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Ledger entities
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct Participant {
    pub id: i64,
    pub matricule: String,
    pub name: String,
    pub org_unit: String,
    pub email: String,
    pub phone: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Account {
    pub id: i64,
    pub participant_id: i64,
    pub account_number: String,
    pub opened_on: String,
    pub status: String,
    pub balance: Money,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Contribution {
    pub id: i64,
    pub amount: Money,
    pub contribution_type: String,
    pub period: String,
    pub created_at: String,
    pub import_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Movement {
    pub id: i64,
    pub kind: String,
    pub amount: Money,
    pub balance_before: Money,
    pub balance_after: Money,
    pub description: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImportJob {
    pub id: i64,
    pub filename: String,
    pub total_rows: i64,
    pub success_count: i64,
    pub error_count: i64,
    pub status: JobStatus,
    pub imported_by: String,
    pub error_report: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RowOutcome {
    pub id: i64,
    pub import_id: i64,
    pub line_number: i64,
    pub matricule: String,
    pub status: RowStatus,
    pub error: Option<String>,
    pub raw_data: String,
}

// ---------------------------------------------------------------------------
// Import pipeline values
// ---------------------------------------------------------------------------

/// A normalized row from an uploaded sheet, before any validation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CandidateRecord {
    pub line: usize,
    pub matricule: String,
    pub account_number: String,
    pub name: String,
    pub org_unit: String,
    pub email: String,
    pub phone: String,
    /// Normalized numeric string, or empty.
    pub amount: String,
    pub raw_amount: String,
    pub period: Option<String>,
    /// Original cells keyed by header, kept for replay.
    pub raw: BTreeMap<String, String>,
}

/// A row that could not be shaped into a candidate at all.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParseError {
    pub line: usize,
    pub matricule: String,
    pub reason: String,
    pub raw: BTreeMap<String, String>,
}
