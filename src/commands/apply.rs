//! `apply` and `plan` commands

use anyhow::Result;
use colored::Colorize;
use reconcile::{
    ApplyContext, CancelToken, DiffSummary, Drift, Engine, ExecuteOptions, ExecutionMode,
    ExecutionPlan, TransactionStore, compute_diffs, execute, group_by_type, new_transaction_id,
};

use super::{Target, confirm};
use crate::Context;
use crate::cli::{ApplyArgs, PlanArgs};
use crate::config::Recipe;
use crate::paths::StatePaths;
use crate::resource::Registry;
use crate::state::StateStore;
use crate::ui::{self, ConsoleProgress};

/// Load a recipe and build its plan against `target`
fn build_plan(recipe: &std::path::Path, target: &Target) -> Result<ExecutionPlan> {
    let items = Recipe::load(recipe)?.into_items()?;
    let factory = Registry::new(&target.providers).factory();
    Ok(ExecutionPlan::build(items, &*factory, &target.system)?)
}

pub fn plan(ctx: &Context, args: PlanArgs) -> Result<()> {
    let paths = StatePaths::resolve()?;
    let target = Target::local(&paths, None);
    let plan = build_plan(&args.recipe, &target)?;

    let cancel = CancelToken::new();
    let apply_ctx = ApplyContext::new(&target.system, &cancel, true);
    let diffs = compute_diffs(&plan, &apply_ctx);
    let summary = DiffSummary::from_diffs(&diffs);

    ui::header(&format!(
        "Plan: {} resources in {} layers",
        plan.total_resources(),
        plan.layers.len()
    ));

    for (resource_type, group) in group_by_type(&diffs) {
        ui::section(&resource_type);
        for diff in group {
            match &diff.drift {
                Drift::InSync if ctx.quiet => {}
                Drift::InSync => println!("  {} {}", "✓".green(), diff.description.dimmed()),
                Drift::Pending => println!(
                    "  {} {} {}",
                    "~".yellow(),
                    diff.description,
                    format!("(layer {}, {})", diff.layer + 1, diff.desired).dimmed()
                ),
                Drift::Unknown { error } => {
                    println!("  {} {} {}", "?".red(), diff.description, error.red());
                }
            }
        }
    }

    println!();
    ui::kv("in sync", &summary.in_sync.to_string());
    ui::kv("pending", &summary.pending.to_string());
    if summary.unknown > 0 {
        ui::kv("unknown", &summary.unknown.to_string());
    }
    Ok(())
}

pub fn apply(ctx: &Context, args: ApplyArgs) -> Result<()> {
    let paths = StatePaths::resolve()?;
    paths.ensure()?;

    let transaction_id = new_transaction_id();
    let backup_key = (!args.dry_run).then_some(transaction_id.as_str());
    let target = Target::local(&paths, backup_key);
    let plan = build_plan(&args.recipe, &target)?;

    if plan.is_empty() {
        ui::info("Recipe declares no resources");
        return Ok(());
    }

    if !args.dry_run {
        let cancel = CancelToken::new();
        let check_ctx = ApplyContext::new(&target.system, &cancel, true);
        let summary = DiffSummary::from_diffs(&compute_diffs(&plan, &check_ctx));
        if !summary.has_changes() && summary.unknown == 0 {
            ui::success("Already converged, nothing to do");
            return Ok(());
        }

        let prompt = format!(
            "Apply {} pending change(s) to {}?",
            summary.pending,
            target.system.transport.name()
        );
        if !confirm(&prompt, args.yes)? {
            ui::warn("Aborted");
            return Ok(());
        }
    }

    let opts = ExecuteOptions {
        dry_run: args.dry_run,
        jobs: args.jobs,
        mode: if args.sequential {
            ExecutionMode::Sequential
        } else {
            ExecutionMode::Layered
        },
    };

    let state = StateStore::open(paths.state_file())?;
    let progress = ConsoleProgress { quiet: ctx.quiet };
    let store = TransactionStore::new(paths.history_file());
    let engine = Engine::new(&target.system, opts)
        .with_hook(&state)
        .with_progress(&progress)
        .with_transaction_id(transaction_id);

    let report = execute(plan, engine, Some(&store));

    println!();
    let line = ui::summary_line(&report.summary, args.dry_run);
    if report.is_success() {
        ui::success(&line);
    } else {
        ui::warn(&line);
    }
    if let Some(id) = &report.transaction_id {
        ui::dim(&format!("transaction {id}"));
    }

    report.into_result()?;
    Ok(())
}
