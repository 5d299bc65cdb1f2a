use colored::Colorize;
use reconcile::{ItemOutcome, ItemStatus, ProgressCallback, RunSummary};

/// Print an info message
pub fn info(msg: &str) {
    println!("{} {}", "ℹ".blue(), msg);
}

/// Print a success message
pub fn success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

/// Print a warning message
pub fn warn(msg: &str) {
    println!("{} {}", "⚠".yellow(), msg);
}

/// Print an error message
pub fn error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}

/// Print a dim/muted message
pub fn dim(msg: &str) {
    println!("  {}", msg.dimmed());
}

/// Print a header/title
pub fn header(title: &str) {
    println!();
    println!("{}", title.bold());
    println!("{}", "─".repeat(title.chars().count()).dimmed());
}

/// Print a section header
pub fn section(title: &str) {
    println!();
    println!("{}", title.cyan().bold());
}

/// Print a key-value pair
pub fn kv(key: &str, value: &str) {
    println!("  {}: {}", key.dimmed(), value);
}

// ============================================================================
// Run progress
// ============================================================================

/// Prints each item as it completes
pub struct ConsoleProgress {
    pub quiet: bool,
}

impl ProgressCallback for ConsoleProgress {
    fn on_layer_start(&self, index: usize, count: usize) {
        if !self.quiet {
            section(&format!("Layer {} ({} resources)", index + 1, count));
        }
    }

    fn on_resource_complete(&self, outcome: &ItemOutcome) {
        match &outcome.status {
            ItemStatus::Changed => println!(
                "  {} {} {}",
                "~".yellow(),
                outcome.id,
                outcome.message.dimmed()
            ),
            ItemStatus::NoChange if !self.quiet => {
                println!("  {} {}", "✓".green(), outcome.id.dimmed());
            }
            ItemStatus::NoChange => {}
            ItemStatus::Failed { error } => {
                eprintln!("  {} {} {}", "✗".red(), outcome.id, error.red());
            }
        }
    }

    fn on_revert(&self, id: &str, error: Option<&str>) {
        match error {
            None => println!("  {} reverted {}", "↺".blue(), id),
            Some(e) => eprintln!("  {} revert of {} failed: {}", "✗".red(), id, e.red()),
        }
    }
}

/// One-line summary of a run
pub fn summary_line(summary: &RunSummary, dry_run: bool) -> String {
    let verb = if dry_run { "would change" } else { "changed" };
    let mut parts = vec![
        format!("{} {}", summary.changed, verb),
        format!("{} unchanged", summary.no_change),
    ];
    if summary.failed > 0 {
        parts.push(format!("{} failed", summary.failed));
    }
    if summary.skipped > 0 {
        parts.push(format!("{} not started", summary.skipped));
    }
    if summary.reverted > 0 {
        parts.push(format!("{} reverted", summary.reverted));
    }
    if summary.revert_failed > 0 {
        parts.push(format!("{} revert failed", summary.revert_failed));
    }
    parts.join(", ")
}
