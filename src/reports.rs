use rusqlite::{Connection, OptionalExtension, Row};
use serde::Serialize;

use crate::db::sql_count;
use crate::error::{PercError, Result};
use crate::ledger::current_period;
use crate::models::{Account, Contribution, Movement, Money, Participant};

// ---------------------------------------------------------------------------
// Row mappers
// ---------------------------------------------------------------------------

const PARTICIPANT_COLUMNS: &str = "p.id, p.matricule, p.name, p.org_unit, p.email, p.phone, p.created_at, p.updated_at";
const ACCOUNT_COLUMNS: &str = "a.id, a.participant_id, a.account_number, a.opened_on, a.status, a.balance, a.updated_at";

fn participant_from_row(row: &Row<'_>) -> rusqlite::Result<Participant> {
    Ok(Participant {
        id: row.get(0)?,
        matricule: row.get(1)?,
        name: row.get(2)?,
        org_unit: row.get(3)?,
        email: row.get(4)?,
        phone: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

fn account_from_row(row: &Row<'_>) -> rusqlite::Result<Account> {
    Ok(Account {
        id: row.get(0)?,
        participant_id: row.get(1)?,
        account_number: row.get(2)?,
        opened_on: row.get(3)?,
        status: row.get(4)?,
        balance: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

fn contribution_from_row(row: &Row<'_>) -> rusqlite::Result<Contribution> {
    Ok(Contribution {
        id: row.get(0)?,
        amount: row.get(1)?,
        contribution_type: row.get(2)?,
        period: row.get(3)?,
        created_at: row.get(4)?,
        import_id: row.get(5)?,
    })
}

fn participant_id(conn: &Connection, matricule: &str) -> Result<i64> {
    conn.query_row(
        "SELECT id FROM participants WHERE matricule = ?1",
        [matricule],
        |r| r.get(0),
    )
    .optional()?
    .ok_or_else(|| PercError::UnknownParticipant(matricule.to_string()))
}

// ---------------------------------------------------------------------------
// Admin dashboard
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct LastImport {
    pub id: i64,
    pub filename: String,
    pub success_count: i64,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct LastParticipant {
    pub matricule: String,
    pub name: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecentActivity {
    pub last_import: Option<LastImport>,
    pub last_participant: Option<LastParticipant>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AdminDashboard {
    pub active_participants: i64,
    pub total_balance: Money,
    /// Month the contribution count refers to, `YYYY-MM`.
    pub month: String,
    pub contributions_this_month: i64,
    pub imports: i64,
    pub recent: RecentActivity,
}

pub fn recent_activity(conn: &Connection) -> Result<RecentActivity> {
    let last_import = conn
        .query_row(
            "SELECT id, filename, success_count, created_at FROM import_jobs \
             ORDER BY created_at DESC, id DESC LIMIT 1",
            [],
            |r| {
                Ok(LastImport {
                    id: r.get(0)?,
                    filename: r.get(1)?,
                    success_count: r.get(2)?,
                    created_at: r.get(3)?,
                })
            },
        )
        .optional()?;
    let last_participant = conn
        .query_row(
            "SELECT matricule, name, created_at FROM participants ORDER BY created_at DESC, id DESC LIMIT 1",
            [],
            |r| {
                Ok(LastParticipant {
                    matricule: r.get(0)?,
                    name: r.get(1)?,
                    created_at: r.get(2)?,
                })
            },
        )
        .optional()?;
    Ok(RecentActivity {
        last_import,
        last_participant,
    })
}

/// Dashboard figures, counting contributions recorded during `month` (`YYYY-MM`).
pub fn admin_dashboard_for(conn: &Connection, month: &str) -> Result<AdminDashboard> {
    let active_participants: i64 = conn.query_row(
        "SELECT count(DISTINCT participant_id) FROM accounts WHERE status = 'active'",
        [],
        |r| r.get(0),
    )?;

    let mut stmt = conn.prepare("SELECT balance FROM accounts WHERE status = 'active'")?;
    let total_balance: Money = stmt
        .query_map([], |r| r.get::<_, Money>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?
        .into_iter()
        .sum();

    let contributions_this_month: i64 = conn.query_row(
        "SELECT count(*) FROM contributions WHERE created_at LIKE ?1",
        [format!("{month}%")],
        |r| r.get(0),
    )?;
    let imports: i64 = conn.query_row("SELECT count(*) FROM import_jobs", [], |r| r.get(0))?;

    Ok(AdminDashboard {
        active_participants,
        total_balance,
        month: month.to_string(),
        contributions_this_month,
        imports,
        recent: recent_activity(conn)?,
    })
}

pub fn admin_dashboard(conn: &Connection) -> Result<AdminDashboard> {
    admin_dashboard_for(conn, &current_period())
}

// ---------------------------------------------------------------------------
// Participant lookup
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct ParticipantRow {
    pub matricule: String,
    pub name: String,
    pub org_unit: String,
    pub email: String,
    pub phone: String,
    pub account_number: Option<String>,
    pub balance: Option<Money>,
}

/// Case-insensitive match on matricule or name, ordered by name.
pub fn search_participants(conn: &Connection, search: Option<&str>, limit: usize) -> Result<Vec<ParticipantRow>> {
    let pattern = format!("%{}%", search.unwrap_or("").trim().to_lowercase());
    let mut stmt = conn.prepare(
        "SELECT p.matricule, p.name, p.org_unit, p.email, p.phone, a.account_number, a.balance \
         FROM participants p LEFT JOIN accounts a ON a.participant_id = p.id \
         WHERE lower(p.matricule) LIKE ?1 OR lower(p.name) LIKE ?1 \
         ORDER BY p.name, p.matricule LIMIT ?2",
    )?;
    let rows = stmt
        .query_map(rusqlite::params![pattern, sql_count(limit)], |r| {
            Ok(ParticipantRow {
                matricule: r.get(0)?,
                name: r.get(1)?,
                org_unit: r.get(2)?,
                email: r.get(3)?,
                phone: r.get(4)?,
                account_number: r.get(5)?,
                balance: r.get(6)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[derive(Debug, Clone, Serialize)]
pub struct ContributionStats {
    pub count: i64,
    pub total: Money,
    pub first_at: Option<String>,
    pub last_at: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ParticipantDetail {
    pub participant: Participant,
    pub account: Option<Account>,
    pub stats: ContributionStats,
    /// Newest first.
    pub recent_contributions: Vec<Contribution>,
}

const RECENT_CONTRIBUTIONS: usize = 5;

/// Everything the statement header shows for one participant.
pub fn participant_detail(conn: &Connection, matricule: &str) -> Result<ParticipantDetail> {
    let participant = conn
        .query_row(
            &format!("SELECT {PARTICIPANT_COLUMNS} FROM participants p WHERE p.matricule = ?1"),
            [matricule],
            participant_from_row,
        )
        .optional()?
        .ok_or_else(|| PercError::UnknownParticipant(matricule.to_string()))?;
    let account = conn
        .query_row(
            &format!("SELECT {ACCOUNT_COLUMNS} FROM accounts a WHERE a.participant_id = ?1"),
            [participant.id],
            account_from_row,
        )
        .optional()?;

    let mut stmt = conn.prepare(
        "SELECT id, amount, contribution_type, period, created_at, import_id FROM contributions \
         WHERE participant_id = ?1 ORDER BY created_at DESC, id DESC",
    )?;
    let all = stmt
        .query_map([participant.id], contribution_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let stats = ContributionStats {
        count: all.len() as i64,
        total: all.iter().map(|c| c.amount).sum(),
        first_at: all.last().map(|c| c.created_at.clone()),
        last_at: all.first().map(|c| c.created_at.clone()),
    };
    Ok(ParticipantDetail {
        participant,
        account,
        stats,
        recent_contributions: all.into_iter().take(RECENT_CONTRIBUTIONS).collect(),
    })
}

// ---------------------------------------------------------------------------
// Agent statements
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: usize,
    pub per_page: usize,
    pub total: usize,
    pub pages: usize,
}

/// Contribution history, newest first. `year` filters on the contribution period.
pub fn contributions_page(
    conn: &Connection,
    matricule: &str,
    year: Option<i32>,
    page: usize,
    per_page: usize,
) -> Result<Page<Contribution>> {
    let pid = participant_id(conn, matricule)?;
    let page = page.max(1);
    let per_page = per_page.max(1);
    let offset = (page - 1).saturating_mul(per_page);
    let pattern = year.map(|y| format!("{y:04}-%")).unwrap_or_else(|| "%".to_string());

    let total: i64 = conn.query_row(
        "SELECT count(*) FROM contributions WHERE participant_id = ?1 AND period LIKE ?2",
        rusqlite::params![pid, pattern],
        |r| r.get(0),
    )?;
    let mut stmt = conn.prepare(
        "SELECT id, amount, contribution_type, period, created_at, import_id FROM contributions \
         WHERE participant_id = ?1 AND period LIKE ?2 \
         ORDER BY period DESC, id DESC LIMIT ?3 OFFSET ?4",
    )?;
    let items = stmt
        .query_map(
            rusqlite::params![pid, pattern, sql_count(per_page), sql_count(offset)],
            contribution_from_row,
        )?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let total = total as usize;
    Ok(Page {
        items,
        page,
        per_page,
        total,
        pages: total.div_ceil(per_page),
    })
}

/// Movements on the participant's account, newest first.
pub fn movements(conn: &Connection, matricule: &str, limit: usize) -> Result<Vec<Movement>> {
    let pid = participant_id(conn, matricule)?;
    let mut stmt = conn.prepare(
        "SELECT m.id, m.kind, m.amount, m.balance_before, m.balance_after, m.description, m.created_at \
         FROM movements m JOIN accounts a ON a.id = m.account_id \
         WHERE a.participant_id = ?1 ORDER BY m.id DESC LIMIT ?2",
    )?;
    let rows = stmt
        .query_map(rusqlite::params![pid, sql_count(limit)], |r| {
            Ok(Movement {
                id: r.get(0)?,
                kind: r.get(1)?,
                amount: r.get(2)?,
                balance_before: r.get(3)?,
                balance_after: r.get(4)?,
                description: r.get(5)?,
                created_at: r.get(6)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[derive(Debug, Clone, Serialize)]
pub struct MonthTotal {
    pub month: u32,
    pub count: i64,
    pub total: Money,
}

#[derive(Debug, Clone, Serialize)]
pub struct YearlyStats {
    pub year: i32,
    /// Only months with at least one contribution, ascending.
    pub months: Vec<MonthTotal>,
    pub total: Money,
}

pub fn yearly_stats(conn: &Connection, matricule: &str, year: i32) -> Result<YearlyStats> {
    let pid = participant_id(conn, matricule)?;
    let mut stmt = conn.prepare(
        "SELECT period, amount FROM contributions WHERE participant_id = ?1 AND period LIKE ?2",
    )?;
    let rows = stmt
        .query_map(rusqlite::params![pid, format!("{year:04}-%")], |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, Money>(1)?))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut months: Vec<MonthTotal> = Vec::new();
    for (period, amount) in rows {
        let Some(month) = period.get(5..7).and_then(|m| m.parse::<u32>().ok()) else {
            continue;
        };
        match months.iter_mut().find(|m| m.month == month) {
            Some(entry) => {
                entry.count += 1;
                entry.total = entry.total.saturating_add(amount);
            }
            None => months.push(MonthTotal {
                month,
                count: 1,
                total: amount,
            }),
        }
    }
    months.sort_by_key(|m| m.month);
    let total = months.iter().map(|m| m.total).sum();
    Ok(YearlyStats { year, months, total })
}

#[derive(Debug, Clone, Serialize)]
pub struct Operation {
    /// `contribution` or `movement`.
    pub source: String,
    pub kind: String,
    pub amount: Money,
    pub label: String,
    pub date: String,
}

/// Contributions and movements in one feed, newest first.
pub fn operations(conn: &Connection, matricule: &str, limit: usize) -> Result<Vec<Operation>> {
    let pid = participant_id(conn, matricule)?;
    let mut stmt = conn.prepare(
        "SELECT 'contribution', c.contribution_type, c.amount, 'Contribution ' || c.period, c.created_at, c.id \
         FROM contributions c WHERE c.participant_id = ?1 \
         UNION ALL \
         SELECT 'movement', m.kind, m.amount, m.description, m.created_at, m.id \
         FROM movements m JOIN accounts a ON a.id = m.account_id WHERE a.participant_id = ?1 \
         ORDER BY 5 DESC, 6 DESC LIMIT ?2",
    )?;
    let rows = stmt
        .query_map(rusqlite::params![pid, sql_count(limit)], |r| {
            Ok(Operation {
                source: r.get(0)?,
                kind: r.get(1)?,
                amount: r.get(2)?,
                label: r.get(3)?,
                date: r.get(4)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_db;
    use crate::importer::{run_import, ImportRequest};

    const HEADER: &str = "Matricule,Compte N°,Nom,Direction,E-mail,Tél.,Montant Versé,Période\n";

    fn seed(conn: &Connection, body: &str) {
        let content = format!("{HEADER}{body}");
        run_import(
            conn,
            &ImportRequest {
                filename: "cgf.csv",
                bytes: content.as_bytes(),
                imported_by: "admin",
                period: None,
            },
            20,
        )
        .unwrap();
    }

    fn sample(conn: &Connection) {
        seed(
            conn,
            "M1,C1,Awa Diop,DRH,,,100,2024-01\n\
             M1,C1,Awa Diop,DRH,,,50,2024-02\n\
             M1,C1,Awa Diop,DRH,,,25,2024-02\n\
             M1,C1,Awa Diop,DRH,,,10,2025-01\n\
             M2,C2,Binta Fall,DAF,,,300,2024-01\n",
        );
    }

    #[test]
    fn test_admin_dashboard() {
        let (_dir, conn) = test_db();
        sample(&conn);
        let dash = admin_dashboard(&conn).unwrap();
        assert_eq!(dash.active_participants, 2);
        assert_eq!(dash.total_balance, Money::from(485));
        assert_eq!(dash.contributions_this_month, 5);
        assert_eq!(dash.imports, 1);
        assert_eq!(dash.recent.last_import.unwrap().success_count, 5);
        assert_eq!(dash.recent.last_participant.unwrap().matricule, "M2");

        let past = admin_dashboard_for(&conn, "1999-01").unwrap();
        assert_eq!(past.contributions_this_month, 0);
    }

    #[test]
    fn test_empty_dashboard() {
        let (_dir, conn) = test_db();
        let dash = admin_dashboard(&conn).unwrap();
        assert_eq!(dash.total_balance, Money::ZERO);
        assert!(dash.recent.last_import.is_none());
    }

    #[test]
    fn test_search_is_case_insensitive() {
        let (_dir, conn) = test_db();
        sample(&conn);
        let hits = search_participants(&conn, Some("awa"), 50).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].balance, Some(Money::from(185)));
        assert_eq!(search_participants(&conn, Some("m2"), 50).unwrap()[0].name, "Binta Fall");
        assert_eq!(search_participants(&conn, None, 50).unwrap().len(), 2);
        assert_eq!(search_participants(&conn, None, 1).unwrap().len(), 1);
    }

    #[test]
    fn test_participant_detail() {
        let (_dir, conn) = test_db();
        sample(&conn);
        let detail = participant_detail(&conn, "M1").unwrap();
        assert_eq!(detail.account.unwrap().account_number, "C1");
        assert_eq!(detail.stats.count, 4);
        assert_eq!(detail.stats.total, Money::from(185));
        assert_eq!(detail.recent_contributions.len(), 4);
        assert_eq!(detail.recent_contributions[0].amount, Money::from(10));
        assert!(matches!(
            participant_detail(&conn, "M9"),
            Err(PercError::UnknownParticipant(_))
        ));
    }

    #[test]
    fn test_contributions_page_with_year_filter() {
        let (_dir, conn) = test_db();
        sample(&conn);
        let all = contributions_page(&conn, "M1", None, 1, 2).unwrap();
        assert_eq!(all.total, 4);
        assert_eq!(all.pages, 2);
        assert_eq!(all.items.len(), 2);
        assert_eq!(all.items[0].period, "2025-01");

        let second = contributions_page(&conn, "M1", None, 2, 2).unwrap();
        assert_eq!(second.items.len(), 2);
        assert_eq!(second.items[1].period, "2024-01");

        let y2024 = contributions_page(&conn, "M1", Some(2024), 1, 20).unwrap();
        assert_eq!(y2024.total, 3);
    }

    #[test]
    fn test_contributions_page_far_past_the_end() {
        let (_dir, conn) = test_db();
        sample(&conn);
        let page = contributions_page(&conn, "M1", None, usize::MAX, usize::MAX).unwrap();
        assert!(page.items.is_empty());
        assert_eq!((page.total, page.pages), (4, 1));
        let page = contributions_page(&conn, "M1", None, usize::MAX / 2, 3).unwrap();
        assert!(page.items.is_empty());
    }

    #[test]
    fn test_movements_newest_first() {
        let (_dir, conn) = test_db();
        sample(&conn);
        let moves = movements(&conn, "M1", 50).unwrap();
        assert_eq!(moves.len(), 4);
        assert_eq!(moves[0].balance_after, Money::from(185));
        assert_eq!(moves[3].balance_before, Money::ZERO);
        assert_eq!(movements(&conn, "M1", 1).unwrap().len(), 1);
    }

    #[test]
    fn test_yearly_stats_groups_by_month() {
        let (_dir, conn) = test_db();
        sample(&conn);
        let stats = yearly_stats(&conn, "M1", 2024).unwrap();
        assert_eq!(stats.months.len(), 2);
        assert_eq!(stats.months[0].month, 1);
        assert_eq!(stats.months[1].count, 2);
        assert_eq!(stats.months[1].total, Money::from(75));
        assert_eq!(stats.total, Money::from(175));
        assert!(yearly_stats(&conn, "M1", 2023).unwrap().months.is_empty());
    }

    #[test]
    fn test_operations_merge_both_sources() {
        let (_dir, conn) = test_db();
        sample(&conn);
        let ops = operations(&conn, "M1", 100).unwrap();
        assert_eq!(ops.len(), 8);
        assert_eq!(ops.iter().filter(|o| o.source == "movement").count(), 4);
        assert!(ops.iter().any(|o| o.label == "Contribution 2024-02"));
        assert_eq!(operations(&conn, "M1", 5).unwrap().len(), 5);
    }
}
