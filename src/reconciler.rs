use rusqlite::Connection;
use serde::Serialize;

use crate::error::Result;
use crate::models::Money;

/// One account whose balance does not agree with its movement history.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Discrepancy {
    pub account_number: String,
    pub matricule: String,
    pub balance: Money,
    /// `balance_after` of the newest movement, if any.
    pub last_balance_after: Option<Money>,
    pub movement_sum: Money,
}

#[derive(Debug, Clone, Serialize)]
pub struct StuckJob {
    pub id: i64,
    pub filename: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditReport {
    pub accounts_checked: usize,
    pub discrepancies: Vec<Discrepancy>,
    pub stuck_jobs: Vec<StuckJob>,
}

impl AuditReport {
    pub fn is_clean(&self) -> bool {
        self.discrepancies.is_empty() && self.stuck_jobs.is_empty()
    }
}

/// `(last balance_after, sum of amounts)` over the account's movements.
fn check_account(conn: &Connection, account_id: i64) -> Result<(Option<Money>, Money)> {
    let mut stmt = conn.prepare_cached(
        "SELECT amount, balance_after FROM movements WHERE account_id = ?1 ORDER BY id",
    )?;
    let rows = stmt
        .query_map([account_id], |r| Ok((r.get::<_, Money>(0)?, r.get::<_, Money>(1)?)))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    let sum: Money = rows.iter().map(|(amount, _)| *amount).sum();
    let last = rows.last().map(|(_, after)| *after);
    Ok((last, sum))
}

/// Read-only consistency check over every account and every job.
pub fn audit(conn: &Connection) -> Result<AuditReport> {
    let mut stmt = conn.prepare(
        "SELECT a.id, a.account_number, p.matricule, a.balance \
         FROM accounts a JOIN participants p ON p.id = a.participant_id ORDER BY a.account_number",
    )?;
    let accounts = stmt
        .query_map([], |r| {
            Ok((
                r.get::<_, i64>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, Money>(3)?,
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut discrepancies = Vec::new();
    for (id, account_number, matricule, balance) in &accounts {
        let (last_balance_after, movement_sum) = check_account(conn, *id)?;
        // no history means the balance must still be zero
        let last_ok = last_balance_after.map_or(*balance == Money::ZERO, |b| b == *balance);
        if !last_ok || movement_sum != *balance {
            log::warn!("account {account_number}: balance {balance}, movements sum to {movement_sum}");
            discrepancies.push(Discrepancy {
                account_number: account_number.clone(),
                matricule: matricule.clone(),
                balance: *balance,
                last_balance_after,
                movement_sum,
            });
        }
    }

    let mut stmt = conn.prepare(
        "SELECT id, filename, created_at FROM import_jobs WHERE status = 'in_progress' ORDER BY id",
    )?;
    let stuck_jobs = stmt
        .query_map([], |r| {
            Ok(StuckJob {
                id: r.get(0)?,
                filename: r.get(1)?,
                created_at: r.get(2)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(AuditReport {
        accounts_checked: accounts.len(),
        discrepancies,
        stuck_jobs,
    })
}
