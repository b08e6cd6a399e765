//! `gitbridge commits <repo> <branch> [--count N]`

use anyhow::{Context, Result};
use clap::Args;
use tabled::{settings::Style, Table, Tabled};

use gitbridge_core::{CommitInfo, DEFAULT_COMMIT_COUNT};

use super::branches::truncate;
use super::client::{encode_segment, print_json, ServerArgs};

#[derive(Args, Debug)]
pub struct CommitsArgs {
    pub repository: String,

    /// Branch name without the `origin/` prefix.
    pub branch: String,

    /// Maximum number of commits, newest first.
    #[arg(long, short = 'n', default_value_t = DEFAULT_COMMIT_COUNT)]
    pub count: usize,

    #[command(flatten)]
    pub server: ServerArgs,
}

#[derive(Tabled)]
struct CommitRow {
    #[tabled(rename = "commit")]
    short_hash: String,
    #[tabled(rename = "date")]
    date: String,
    #[tabled(rename = "author")]
    author: String,
    #[tabled(rename = "message")]
    message: String,
}

impl CommitsArgs {
    pub fn run(self) -> Result<()> {
        let path = format!(
            "/api/git/commits/{}/{}?count={}",
            encode_segment(&self.repository, false),
            encode_segment(&self.branch, true),
            self.count
        );
        let commits: Vec<CommitInfo> = self.server.client().get(&path).with_context(|| {
            format!("failed to list commits of '{}' in '{}'", self.branch, self.repository)
        })?;

        if self.server.json {
            return print_json(&commits);
        }
        if commits.is_empty() {
            println!("No commits found for '{}' in '{}'.", self.branch, self.repository);
            return Ok(());
        }

        let rows: Vec<CommitRow> = commits
            .into_iter()
            .map(|c| CommitRow {
                short_hash: c.short_hash,
                date: c.date.format("%Y-%m-%d %H:%M").to_string(),
                author: c.author,
                message: truncate(&c.message, 72),
            })
            .collect();
        println!("{}", Table::new(rows).with(Style::rounded()));
        Ok(())
    }
}
