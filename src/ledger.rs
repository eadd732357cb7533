use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;

use crate::error::{PercError, Result};
use crate::models::{Money, MovementKind, RowStatus};
use crate::validator::ValidatedRecord;

pub const CONTRIBUTION_TYPE: &str = "deposit";

/// Where an applied row came from.
pub struct ImportContext<'a> {
    pub import_id: i64,
    pub filename: &'a str,
    /// Period override for every row of the file, `YYYY-MM`.
    pub period: Option<&'a str>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppliedRow {
    pub participant_id: i64,
    pub account_id: i64,
    pub amount: Money,
    pub balance_before: Money,
    pub balance_after: Money,
}

// ---------------------------------------------------------------------------
// Read-or-create
// ---------------------------------------------------------------------------

/// Insert the participant, or overwrite its demographic fields. Last write wins.
fn upsert_participant(conn: &Connection, record: &ValidatedRecord) -> Result<i64> {
    let existing: Option<i64> = conn
        .query_row(
            "SELECT id FROM participants WHERE matricule = ?1",
            [&record.matricule],
            |r| r.get(0),
        )
        .optional()?;
    match existing {
        Some(id) => {
            conn.execute(
                "UPDATE participants SET name = ?1, org_unit = ?2, email = ?3, phone = ?4, \
                 updated_at = datetime('now') WHERE id = ?5",
                rusqlite::params![record.name, record.org_unit, record.email, record.phone, id],
            )?;
            Ok(id)
        }
        None => {
            conn.execute(
                "INSERT INTO participants (matricule, name, org_unit, email, phone) VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![record.matricule, record.name, record.org_unit, record.email, record.phone],
            )?;
            Ok(conn.last_insert_rowid())
        }
    }
}

/// Find or open the account, returning `(account_id, current_balance)`.
/// An existing account only has its timestamp bumped.
fn upsert_account(conn: &Connection, participant_id: i64, account_number: &str) -> Result<(i64, Money)> {
    let existing: Option<(i64, i64, Money)> = conn
        .query_row(
            "SELECT id, participant_id, balance FROM accounts WHERE account_number = ?1",
            [account_number],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()?;
    if let Some((id, owner, balance)) = existing {
        if owner != participant_id {
            return Err(PercError::AccountConflict(format!(
                "account {account_number} belongs to another participant"
            )));
        }
        conn.execute(
            "UPDATE accounts SET updated_at = datetime('now') WHERE id = ?1",
            [id],
        )?;
        return Ok((id, balance));
    }

    let held: Option<String> = conn
        .query_row(
            "SELECT account_number FROM accounts WHERE participant_id = ?1",
            [participant_id],
            |r| r.get(0),
        )
        .optional()?;
    if let Some(other) = held {
        return Err(PercError::AccountConflict(format!(
            "participant already holds account {other}"
        )));
    }
    conn.execute(
        "INSERT INTO accounts (participant_id, account_number, opened_on, status, balance) \
         VALUES (?1, ?2, date('now'), 'active', ?3)",
        rusqlite::params![participant_id, account_number, Money::ZERO],
    )?;
    Ok((conn.last_insert_rowid(), Money::ZERO))
}

fn insert_movement(
    conn: &Connection,
    account_id: i64,
    kind: MovementKind,
    amount: Money,
    before: Money,
    after: Money,
    description: &str,
) -> Result<()> {
    conn.execute(
        "INSERT INTO movements (account_id, kind, amount, balance_before, balance_after, description) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        rusqlite::params![account_id, kind.as_str(), amount, before, after, description],
    )?;
    Ok(())
}

fn set_balance(conn: &Connection, account_id: i64, balance: Money) -> Result<()> {
    conn.execute(
        "UPDATE accounts SET balance = ?1, updated_at = datetime('now') WHERE id = ?2",
        rusqlite::params![balance, account_id],
    )?;
    Ok(())
}

pub fn current_period() -> String {
    chrono::Utc::now().format("%Y-%m").to_string()
}

// ---------------------------------------------------------------------------
// apply_record
// ---------------------------------------------------------------------------

/// Apply one validated row as a single unit of work. Any failure rolls the
/// whole row back; nothing is written for it.
pub fn apply_record(
    conn: &Connection,
    ctx: &ImportContext<'_>,
    record: &ValidatedRecord,
    raw_data: &str,
) -> Result<AppliedRow> {
    let tx = conn.unchecked_transaction()?;

    let participant_id = upsert_participant(&tx, record)?;
    let (account_id, balance_before) = upsert_account(&tx, participant_id, &record.account_number)?;

    let period = ctx
        .period
        .map(str::to_string)
        .or_else(|| record.period.clone())
        .unwrap_or_else(current_period);
    tx.execute(
        "INSERT INTO contributions (account_id, participant_id, amount, contribution_type, period, import_id) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        rusqlite::params![account_id, participant_id, record.amount, CONTRIBUTION_TYPE, period, ctx.import_id],
    )?;

    let balance_after = balance_before
        .checked_add(record.amount)
        .ok_or_else(|| PercError::InvalidAmount("balance overflow".to_string()))?;
    insert_movement(
        &tx,
        account_id,
        MovementKind::Contribution,
        record.amount,
        balance_before,
        balance_after,
        &format!("CGF import - {}", ctx.filename),
    )?;
    set_balance(&tx, account_id, balance_after)?;

    tx.execute(
        "INSERT INTO import_rows (import_id, line_number, matricule, status, raw_data) VALUES (?1, ?2, ?3, ?4, ?5)",
        rusqlite::params![
            ctx.import_id,
            record.line as i64,
            record.matricule,
            RowStatus::Success.as_str(),
            raw_data
        ],
    )?;

    tx.commit()?;
    Ok(AppliedRow {
        participant_id,
        account_id,
        amount: record.amount,
        balance_before,
        balance_after,
    })
}

// ---------------------------------------------------------------------------
// Manual correction
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Correction {
    pub account_number: String,
    pub balance_before: Money,
    pub balance_after: Money,
    pub delta: Money,
}

/// Overwrite an account balance, recording the difference as a correction movement.
pub fn correct_balance(conn: &Connection, matricule: &str, new_balance: Money, reason: &str) -> Result<Correction> {
    if new_balance < Money::ZERO {
        return Err(PercError::InvalidAmount(format!("{new_balance} (balance cannot be negative)")));
    }
    let tx = conn.unchecked_transaction()?;
    let (account_id, account_number, old_balance): (i64, String, Money) = tx
        .query_row(
            "SELECT a.id, a.account_number, a.balance FROM accounts a \
             JOIN participants p ON p.id = a.participant_id WHERE p.matricule = ?1",
            [matricule],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()?
        .ok_or_else(|| PercError::UnknownParticipant(matricule.to_string()))?;

    let delta = new_balance
        .checked_sub(old_balance)
        .ok_or_else(|| PercError::InvalidAmount(format!("{new_balance} (balance overflow)")))?;
    let reason = if reason.trim().is_empty() { "no reason given" } else { reason.trim() };
    insert_movement(
        &tx,
        account_id,
        MovementKind::Correction,
        delta,
        old_balance,
        new_balance,
        &format!("Manual correction: {reason}"),
    )?;
    set_balance(&tx, account_id, new_balance)?;
    tx.commit()?;

    log::info!("balance of {account_number} corrected {old_balance} -> {new_balance}");
    Ok(Correction {
        account_number,
        balance_before: old_balance,
        balance_after: new_balance,
        delta,
    })
}

/// Balance of the account held by `matricule`.
pub fn balance_of(conn: &Connection, matricule: &str) -> Result<(String, Money)> {
    conn.query_row(
        "SELECT a.account_number, a.balance FROM accounts a \
         JOIN participants p ON p.id = a.participant_id WHERE p.matricule = ?1",
        [matricule],
        |r| Ok((r.get(0)?, r.get(1)?)),
    )
    .optional()?
    .ok_or_else(|| PercError::UnknownParticipant(matricule.to_string()))
}
