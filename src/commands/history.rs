//! `history` and `rollback` commands

use anyhow::Result;
use colored::Colorize;
use reconcile::{Transaction, TransactionManager, TransactionStatus, TransactionStore};

use super::{Target, confirm};
use crate::Context;
use crate::cli::{HistoryArgs, RollbackArgs};
use crate::paths::StatePaths;
use crate::ui;

fn manager(paths: &StatePaths) -> TransactionManager {
    TransactionManager::new(TransactionStore::new(paths.history_file()))
}

fn status_label(tx: &Transaction) -> String {
    match tx.status {
        TransactionStatus::Success => "success".green().to_string(),
        TransactionStatus::Failed => "failed".red().to_string(),
        TransactionStatus::RolledBack => match &tx.rollback_of {
            Some(original) => format!("{} {}", "rolled back".yellow(), original),
            None => "rolled back".yellow().to_string(),
        },
    }
}

pub fn history(_ctx: &Context, args: HistoryArgs) -> Result<()> {
    let paths = StatePaths::resolve()?;
    let transactions = manager(&paths).list(args.limit)?;

    if transactions.is_empty() {
        ui::info("No recorded runs");
        return Ok(());
    }

    ui::header("History");
    for tx in &transactions {
        println!(
            "  {}  {}  {}  {}",
            tx.id.bold(),
            tx.timestamp.format("%Y-%m-%d %H:%M:%S").to_string().dimmed(),
            status_label(tx),
            format!("{} change(s)", tx.changes.len()).dimmed()
        );
    }
    Ok(())
}

pub fn rollback(ctx: &Context, args: RollbackArgs) -> Result<()> {
    let paths = StatePaths::resolve()?;
    let manager = manager(&paths);
    let transaction = manager.store().find(&args.id)?;

    ui::header(&format!("Rollback {}", transaction.id));
    for change in transaction.changes.iter().rev() {
        ui::dim(&format!(
            "{} {} {} ({})",
            change.resource_type, change.name, change.action, change.target
        ));
    }

    let prompt = format!("Undo {} change(s)?", transaction.changes.len());
    if !confirm(&prompt, args.yes)? {
        ui::warn("Aborted");
        return Ok(());
    }

    let target = Target::local(&paths, None);
    let report = manager.rollback(&args.id, &target.system)?;

    if !ctx.quiet {
        for id in &report.reverted {
            println!("  {} undid {}", "↺".blue(), id);
        }
    }
    for id in &report.skipped {
        ui::warn(&format!("Manual action required: {id}"));
    }
    for (id, error) in &report.failed {
        ui::error(&format!("Could not undo {id}: {error}"));
    }

    if report.is_complete() {
        ui::success(&format!("Rolled back {}", args.id));
        Ok(())
    } else {
        anyhow::bail!(
            "Rollback of {} incomplete: {} change(s) could not be undone",
            args.id,
            report.failed.len()
        )
    }
}
