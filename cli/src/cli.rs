use std::path::PathBuf;

use clap::{Args as ClapArgs, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "taskq", version, about = "Run dependency-ordered task plans")]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file to use instead of ~/.taskq/config.toml or ./config.toml.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run every task in a plan, respecting dependencies.
    Run(RunArgs),
    /// Check a plan for unknown dependencies and cycles and print its stages.
    Validate(ValidateArgs),
}

#[derive(ClapArgs, Debug, Clone)]
pub struct RunArgs {
    pub plan: PathBuf,

    #[arg(long)]
    pub max_parallel: Option<usize>,

    /// Print the summary and task records as JSON on stdout.
    #[arg(long)]
    pub json: bool,

    /// Cancel tasks whose dependencies failed instead of leaving them pending.
    #[arg(long)]
    pub cancel_blocked: bool,

    #[arg(long)]
    pub no_progress: bool,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct ValidateArgs {
    pub plan: PathBuf,
}
