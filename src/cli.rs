use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "converge")]
#[command(version)]
#[command(about = "Agentless configuration management - converge a machine to a recipe", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Converge the machine to a recipe
    Apply(ApplyArgs),

    /// Show what apply would change, without changing anything
    Plan(PlanArgs),

    /// Undo a recorded run by transaction id
    Rollback(RollbackArgs),

    /// List recorded runs, newest first
    History(HistoryArgs),

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Args)]
pub struct ApplyArgs {
    /// Recipe file (.toml or .json)
    pub recipe: PathBuf,

    /// Report what would change without changing anything
    #[arg(short = 'n', long)]
    pub dry_run: bool,

    /// Don't ask for confirmation
    #[arg(short, long)]
    pub yes: bool,

    /// Worker threads per layer (0 = one per resource)
    #[arg(short, long, default_value = "0")]
    pub jobs: usize,

    /// Apply one resource at a time and continue past failures (no rollback)
    #[arg(long)]
    pub sequential: bool,
}

#[derive(Args)]
pub struct PlanArgs {
    /// Recipe file (.toml or .json)
    pub recipe: PathBuf,
}

#[derive(Args)]
pub struct RollbackArgs {
    /// Transaction id (see `converge history`)
    pub id: String,

    /// Don't ask for confirmation
    #[arg(short, long)]
    pub yes: bool,
}

#[derive(Args)]
pub struct HistoryArgs {
    /// Show at most this many runs
    #[arg(short, long)]
    pub limit: Option<usize>,
}
