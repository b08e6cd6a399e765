//! `gitbridge push <branch> --from <repo> --to <repo> [--force]`

use anyhow::{bail, Result};
use clap::Args;
use colored::Colorize;

use gitbridge_core::{PushBranchRequest, SyncResult};

use super::client::{print_json, ServerArgs};

#[derive(Args, Debug)]
pub struct PushArgs {
    pub branch: String,

    /// Source repository.
    #[arg(long)]
    pub from: String,

    /// Target repository.
    #[arg(long)]
    pub to: String,

    /// Overwrite the target branch even when histories have diverged.
    #[arg(long)]
    pub force: bool,

    #[command(flatten)]
    pub server: ServerArgs,
}

impl PushArgs {
    pub fn run(self) -> Result<()> {
        let request = PushBranchRequest {
            branch: self.branch.clone(),
            from_repository: self.from.clone(),
            to_repository: self.to.clone(),
            force: self.force,
        };
        let result: SyncResult = self.server.client().post("/api/git/push", &request)?;

        if self.server.json {
            print_json(&result)?;
        } else {
            print_result(&result);
        }

        if !result.success {
            if result.has_conflicts {
                bail!("push of '{}' refused: conflicts", self.branch);
            }
            bail!("push of '{}' failed", self.branch);
        }
        Ok(())
    }
}

fn print_result(result: &SyncResult) {
    let mark = if result.success {
        "✓".green()
    } else if result.has_conflicts {
        "!".yellow()
    } else {
        "✗".red()
    };
    let mut lines = result.message.lines();
    if let Some(first) = lines.next() {
        println!("{mark} {first}");
    }
    for line in lines {
        println!("  {line}");
    }
    for detail in &result.conflict_details {
        println!("  - {detail}");
    }
}
