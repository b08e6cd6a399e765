//! `gitbridge status` and `gitbridge repos`.

use anyhow::Result;
use clap::Args;
use colored::Colorize;
use serde::{Deserialize, Serialize};

use gitbridge_core::RepositoryInfo;

use super::client::{print_json, ServerArgs};

#[derive(Debug, Serialize, Deserialize)]
struct StatusBody {
    connected: bool,
}

#[derive(Args, Debug)]
pub struct StatusArgs {
    #[command(flatten)]
    pub server: ServerArgs,
}

impl StatusArgs {
    pub fn run(self) -> Result<()> {
        let status: StatusBody = self.server.client().get("/api/git/status")?;
        if self.server.json {
            return print_json(&status);
        }
        if status.connected {
            println!("{} worker connected to {}", "●".green(), self.server.server);
        } else {
            println!("{} no worker connected to {}", "●".red(), self.server.server);
        }
        Ok(())
    }
}

#[derive(Args, Debug)]
pub struct ReposArgs {
    #[command(flatten)]
    pub server: ServerArgs,
}

impl ReposArgs {
    pub fn run(self) -> Result<()> {
        let repos: Vec<RepositoryInfo> = self.server.client().get("/api/git/repositories")?;
        if self.server.json {
            return print_json(&repos);
        }
        for repo in repos {
            println!("{}", repo.name);
        }
        Ok(())
    }
}
