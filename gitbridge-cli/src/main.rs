//! gitbridge: keep branches of an internal and a customer repository in sync.
//!
//! # Usage
//!
//! ```text
//! gitbridge worker [--config <path>]
//! gitbridge coordinator [--config <path>]
//! gitbridge init worker|coordinator [--path <file>] [--force]
//! gitbridge status [--server <url>] [--json]
//! gitbridge repos [--json]
//! gitbridge branches <repo> [--json]
//! gitbridge commits <repo> <branch> [--count N] [--json]
//! gitbridge push <branch> --from <repo> --to <repo> [--force] [--json]
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    branches::BranchesArgs, commits::CommitsArgs, init::InitArgs, push::PushArgs,
    serve::ServeArgs, status::{ReposArgs, StatusArgs},
};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "gitbridge",
    version,
    about = "Synchronize branches between an internal and a customer git repository",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the worker next to the two working copies.
    Worker(ServeArgs),

    /// Run the coordinator HTTP surface the worker attaches to.
    Coordinator(ServeArgs),

    /// Write a config template.
    Init(InitArgs),

    /// Show whether a worker is attached to the coordinator.
    Status(StatusArgs),

    /// List the configured repositories.
    Repos(ReposArgs),

    /// List a repository's branches and their sync state.
    Branches(BranchesArgs),

    /// Show recent commits of a branch.
    Commits(CommitsArgs),

    /// Push a branch from one repository to the other.
    Push(PushArgs),
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Worker(args) => commands::serve::run_worker(args),
        Commands::Coordinator(args) => commands::serve::run_coordinator(args),
        Commands::Init(args) => args.run(),
        Commands::Status(args) => args.run(),
        Commands::Repos(args) => args.run(),
        Commands::Branches(args) => args.run(),
        Commands::Commits(args) => args.run(),
        Commands::Push(args) => args.run(),
    }
}
