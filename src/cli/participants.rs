use colored::Colorize;
use comfy_table::{Cell, CellAlignment, Table};

use crate::error::Result;
use crate::fmt::{money, signed};
use crate::ledger::correct_balance;
use crate::models::Money;
use crate::reports::{self, ParticipantDetail};

pub fn list(search: Option<&str>, limit: usize, json: bool) -> Result<()> {
    let conn = super::open_db()?;
    super::require_admin(&conn)?;
    let rows = reports::search_participants(&conn, search, limit)?;

    if json {
        return super::print_json(&rows);
    }
    if rows.is_empty() {
        println!("No participants found.");
        return Ok(());
    }
    let mut table = Table::new();
    table.set_header(vec!["Matricule", "Name", "Direction", "Phone", "Account", "Balance"]);
    for p in &rows {
        table.add_row(vec![
            Cell::new(&p.matricule),
            Cell::new(&p.name),
            Cell::new(&p.org_unit),
            Cell::new(&p.phone),
            Cell::new(p.account_number.as_deref().unwrap_or("-")),
            Cell::new(p.balance.map(money).unwrap_or_default()).set_alignment(CellAlignment::Right),
        ]);
    }
    println!("Participants\n{table}");
    Ok(())
}

pub(crate) fn print_detail(detail: &ParticipantDetail) {
    let p = &detail.participant;
    println!("{} ({})", p.name.bold(), p.matricule);
    if !p.org_unit.is_empty() {
        println!("  Direction:  {}", p.org_unit);
    }
    if !p.email.is_empty() {
        println!("  E-mail:     {}", p.email);
    }
    if !p.phone.is_empty() {
        println!("  Phone:      {}", p.phone);
    }
    match &detail.account {
        Some(a) => {
            println!("  Account:    {} ({}, opened {})", a.account_number, a.status, a.opened_on);
            println!("  Balance:    {}", money(a.balance).green().bold());
        }
        None => println!("  Account:    (none)"),
    }
    println!(
        "  Contributions: {} totalling {}",
        detail.stats.count,
        money(detail.stats.total)
    );
    if let Some(last) = &detail.stats.last_at {
        println!("  Last contribution: {last}");
    }

    if !detail.recent_contributions.is_empty() {
        let mut table = Table::new();
        table.set_header(vec!["Period", "Amount", "Type", "Recorded"]);
        for c in &detail.recent_contributions {
            table.add_row(vec![
                Cell::new(&c.period),
                Cell::new(money(c.amount)).set_alignment(CellAlignment::Right),
                Cell::new(&c.contribution_type),
                Cell::new(&c.created_at),
            ]);
        }
        println!("\nRecent contributions\n{table}");
    }
}

pub fn show(matricule: &str, json: bool) -> Result<()> {
    let conn = super::open_db()?;
    super::require_admin(&conn)?;
    let detail = reports::participant_detail(&conn, matricule)?;
    if json {
        return super::print_json(&detail);
    }
    print_detail(&detail);
    Ok(())
}

pub fn correct(matricule: &str, balance: Money, reason: Option<&str>, json: bool) -> Result<()> {
    let conn = super::open_db()?;
    let session = super::require_admin(&conn)?;
    let correction = correct_balance(&conn, matricule, balance, reason.unwrap_or(""))?;
    log::info!("correction on {matricule} by {}", session.subject);

    if json {
        return super::print_json(&correction);
    }
    println!(
        "Balance of {} corrected: {} -> {} ({})",
        correction.account_number,
        money(correction.balance_before),
        money(correction.balance_after),
        signed(correction.delta)
    );
    Ok(())
}
