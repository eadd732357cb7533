use std::str::FromStr;

use thiserror::Error;

use crate::models::{CandidateRecord, Money};

pub const UNNAMED_PARTICIPANT: &str = "Name not provided";

/// Why a candidate row was turned away before touching the ledger.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    #[error("missing matricule")]
    MissingMatricule,

    #[error("missing account number")]
    MissingAccountNumber,

    #[error("missing amount")]
    MissingAmount,

    #[error("invalid amount: \"{0}\"")]
    InvalidAmount(String),

    #[error("amount must be positive: \"{0}\"")]
    NonPositiveAmount(String),
}

/// A candidate that passed every rule; `amount` is exact and positive.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedRecord {
    pub line: usize,
    pub matricule: String,
    pub account_number: String,
    pub name: String,
    pub org_unit: String,
    pub email: String,
    pub phone: String,
    pub amount: Money,
    pub period: Option<String>,
}

fn parse_amount(normalized: &str) -> Option<Money> {
    let mut s = normalized.trim().to_string();
    if s.starts_with('.') {
        s.insert(0, '0');
    }
    if s.ends_with('.') {
        s.pop();
    }
    Money::from_str(&s).ok()
}

/// Pure check of one candidate. Same input, same verdict.
pub fn validate(record: &CandidateRecord) -> Result<ValidatedRecord, Rejection> {
    if record.matricule.trim().is_empty() {
        return Err(Rejection::MissingMatricule);
    }
    if record.account_number.trim().is_empty() {
        return Err(Rejection::MissingAccountNumber);
    }
    if record.amount.trim().is_empty() {
        return Err(if record.raw_amount.trim().is_empty() {
            Rejection::MissingAmount
        } else {
            Rejection::InvalidAmount(record.raw_amount.clone())
        });
    }
    let amount = parse_amount(&record.amount)
        .ok_or_else(|| Rejection::InvalidAmount(record.raw_amount.clone()))?;
    if !amount.is_positive() {
        return Err(Rejection::NonPositiveAmount(record.raw_amount.clone()));
    }

    let name = if record.name.trim().is_empty() {
        UNNAMED_PARTICIPANT.to_string()
    } else {
        record.name.trim().to_string()
    };

    Ok(ValidatedRecord {
        line: record.line,
        matricule: record.matricule.trim().to_string(),
        account_number: record.account_number.trim().to_string(),
        name,
        org_unit: record.org_unit.trim().to_string(),
        email: record.email.trim().to_string(),
        phone: record.phone.clone(),
        amount,
        period: record.period.clone(),
    })
}
