use chrono::Datelike;
use colored::Colorize;
use comfy_table::{Cell, CellAlignment, Table};

use crate::error::Result;
use crate::fmt::{money, signed};
use crate::ledger::balance_of;
use crate::reports;

pub fn summary(json: bool) -> Result<()> {
    let conn = super::open_db()?;
    let session = super::require_agent(&conn)?;
    let detail = reports::participant_detail(&conn, &session.subject)?;
    if json {
        return super::print_json(&detail);
    }
    super::participants::print_detail(&detail);
    Ok(())
}

pub fn balance(json: bool) -> Result<()> {
    let conn = super::open_db()?;
    let session = super::require_agent(&conn)?;
    let (account_number, balance) = balance_of(&conn, &session.subject)?;
    if json {
        return super::print_json(&serde_json::json!({
            "account_number": account_number,
            "balance": balance,
        }));
    }
    println!("{account_number}: {}", money(balance).green().bold());
    Ok(())
}

pub fn contributions(year: Option<i32>, page: usize, per_page: usize, json: bool) -> Result<()> {
    let conn = super::open_db()?;
    let session = super::require_agent(&conn)?;
    let page = reports::contributions_page(&conn, &session.subject, year, page, per_page)?;
    if json {
        return super::print_json(&page);
    }

    let mut table = Table::new();
    table.set_header(vec!["Period", "Amount", "Type", "Recorded"]);
    for c in &page.items {
        table.add_row(vec![
            Cell::new(&c.period),
            Cell::new(money(c.amount)).set_alignment(CellAlignment::Right),
            Cell::new(&c.contribution_type),
            Cell::new(&c.created_at),
        ]);
    }
    println!("Contributions\n{table}");
    println!("Page {}/{} ({} contributions)", page.page, page.pages.max(1), page.total);
    Ok(())
}

pub fn movements(limit: usize, json: bool) -> Result<()> {
    let conn = super::open_db()?;
    let session = super::require_agent(&conn)?;
    let moves = reports::movements(&conn, &session.subject, limit)?;
    if json {
        return super::print_json(&moves);
    }

    let mut table = Table::new();
    table.set_header(vec!["Date", "Kind", "Amount", "Before", "After", "Description"]);
    for m in &moves {
        table.add_row(vec![
            Cell::new(&m.created_at),
            Cell::new(&m.kind),
            Cell::new(signed(m.amount)).set_alignment(CellAlignment::Right),
            Cell::new(money(m.balance_before)).set_alignment(CellAlignment::Right),
            Cell::new(money(m.balance_after)).set_alignment(CellAlignment::Right),
            Cell::new(&m.description),
        ]);
    }
    println!("Movements\n{table}");
    Ok(())
}

pub fn yearly(year: Option<i32>, json: bool) -> Result<()> {
    let conn = super::open_db()?;
    let session = super::require_agent(&conn)?;
    let year = year.unwrap_or_else(|| chrono::Local::now().year());
    let stats = reports::yearly_stats(&conn, &session.subject, year)?;
    if json {
        return super::print_json(&stats);
    }

    let mut table = Table::new();
    table.set_header(vec!["Month", "Contributions", "Total"]);
    for m in &stats.months {
        table.add_row(vec![
            Cell::new(format!("{year}-{:02}", m.month)),
            Cell::new(m.count),
            Cell::new(money(m.total)).set_alignment(CellAlignment::Right),
        ]);
    }
    table.add_row(vec![
        Cell::new("Total".bold()),
        Cell::new(""),
        Cell::new(money(stats.total).bold()).set_alignment(CellAlignment::Right),
    ]);
    println!("Contributions {year}\n{table}");
    Ok(())
}

pub fn operations(limit: usize, json: bool) -> Result<()> {
    let conn = super::open_db()?;
    let session = super::require_agent(&conn)?;
    let ops = reports::operations(&conn, &session.subject, limit)?;
    if json {
        return super::print_json(&ops);
    }

    let mut table = Table::new();
    table.set_header(vec!["Date", "Source", "Label", "Amount"]);
    for op in &ops {
        table.add_row(vec![
            Cell::new(&op.date),
            Cell::new(&op.source),
            Cell::new(&op.label),
            Cell::new(signed(op.amount)).set_alignment(CellAlignment::Right),
        ]);
    }
    println!("Recent operations\n{table}");
    Ok(())
}
