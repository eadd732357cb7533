use colored::Colorize;
use comfy_table::{Cell, CellAlignment, Table};

use crate::error::Result;
use crate::fmt::money;
use crate::reports;

pub fn run(json: bool) -> Result<()> {
    let conn = super::open_db()?;
    super::require_admin(&conn)?;
    let dash = reports::admin_dashboard(&conn)?;

    if json {
        return super::print_json(&dash);
    }

    let mut table = Table::new();
    table.set_header(vec!["Indicator", "Value"]);
    table.add_row(vec![Cell::new("Active participants"), Cell::new(dash.active_participants)]);
    table.add_row(vec![
        Cell::new("Total balance".bold()),
        Cell::new(money(dash.total_balance).green().bold()).set_alignment(CellAlignment::Right),
    ]);
    table.add_row(vec![
        Cell::new(format!("Contributions in {}", dash.month)),
        Cell::new(dash.contributions_this_month),
    ]);
    table.add_row(vec![Cell::new("Imports"), Cell::new(dash.imports)]);
    println!("Dashboard\n{table}");

    println!("\nRecent activity");
    match &dash.recent.last_import {
        Some(imp) => println!(
            "  Last import: {} on {} ({} contributions added)",
            imp.filename, imp.created_at, imp.success_count
        ),
        None => println!("  No imports yet."),
    }
    if let Some(p) = &dash.recent.last_participant {
        println!("  Newest participant: {} ({}) on {}", p.name, p.matricule, p.created_at);
    }
    Ok(())
}
