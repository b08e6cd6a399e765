//! `gitbridge branches <repo>`: branch tips compared with the other repository.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use gitbridge_core::{short_hash, BranchInfo};

use super::client::{encode_segment, print_json, ServerArgs};

#[derive(Args, Debug)]
pub struct BranchesArgs {
    /// Repository name as configured on the worker.
    pub repository: String,

    #[command(flatten)]
    pub server: ServerArgs,
}

#[derive(Tabled)]
struct BranchRow {
    #[tabled(rename = "branch")]
    name: String,
    #[tabled(rename = "tip")]
    tip: String,
    #[tabled(rename = "other")]
    other: String,
    #[tabled(rename = "sync")]
    sync: String,
    #[tabled(rename = "last commit")]
    date: String,
    #[tabled(rename = "author")]
    author: String,
    #[tabled(rename = "message")]
    message: String,
}

impl BranchesArgs {
    pub fn run(self) -> Result<()> {
        let path = format!("/api/git/branches/{}", encode_segment(&self.repository, false));
        let branches: Vec<BranchInfo> = self
            .server
            .client()
            .get(&path)
            .with_context(|| format!("failed to list branches of '{}'", self.repository))?;

        if self.server.json {
            return print_json(&branches);
        }
        if branches.is_empty() {
            println!("No remote branches in '{}'.", self.repository);
            return Ok(());
        }

        let rows: Vec<BranchRow> = branches.iter().map(row).collect();
        println!("{}", Table::new(rows).with(Style::rounded()));
        let synced = branches.iter().filter(|b| b.is_synchronized_with_other).count();
        println!("{synced}/{} branches synchronized", branches.len());
        Ok(())
    }
}

fn row(branch: &BranchInfo) -> BranchRow {
    let sync = match (&branch.other_repo_commit_hash, branch.is_synchronized_with_other) {
        (_, true) => "✓ in sync".green().to_string(),
        (Some(_), false) => "~ differs".yellow().to_string(),
        (None, false) => "✗ missing".red().to_string(),
    };
    BranchRow {
        name: branch.name.clone(),
        tip: short_hash(&branch.last_commit_hash).to_string(),
        other: branch
            .other_repo_commit_hash
            .as_deref()
            .map(short_hash)
            .unwrap_or("-")
            .to_string(),
        sync,
        date: branch.last_commit_date.format("%Y-%m-%d %H:%M").to_string(),
        author: branch.last_commit_author.clone(),
        message: truncate(&branch.last_commit_message, 50),
    }
}

pub fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max.saturating_sub(1)).collect();
    out.push('…');
    out
}
