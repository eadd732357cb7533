use colored::Colorize;
use comfy_table::{Cell, Table};

use crate::error::Result;
use crate::fmt::money;
use crate::reconciler::audit;

pub fn run(json: bool) -> Result<()> {
    let conn = super::open_db()?;
    super::require_admin(&conn)?;
    let report = audit(&conn)?;

    if json {
        return super::print_json(&report);
    }

    if report.is_clean() {
        println!(
            "{} {} accounts match their movement history.",
            "OK".green().bold(),
            report.accounts_checked
        );
        return Ok(());
    }

    if !report.discrepancies.is_empty() {
        let mut table = Table::new();
        table.set_header(vec!["Account", "Matricule", "Balance", "Last movement", "Movement sum"]);
        for d in &report.discrepancies {
            table.add_row(vec![
                Cell::new(&d.account_number),
                Cell::new(&d.matricule),
                Cell::new(money(d.balance)),
                Cell::new(d.last_balance_after.map(money).unwrap_or_else(|| "-".to_string())),
                Cell::new(money(d.movement_sum)),
            ]);
        }
        println!(
            "{} {} of {} accounts disagree with their movements\n{table}",
            "MISMATCH".red().bold(),
            report.discrepancies.len(),
            report.accounts_checked
        );
    }

    if !report.stuck_jobs.is_empty() {
        println!("\n{} imports never finished:", "STUCK".red().bold());
        for job in &report.stuck_jobs {
            println!("  #{} {} (started {})", job.id, job.filename, job.created_at);
        }
    }
    Ok(())
}
