//! `gitbridge worker` and `gitbridge coordinator`: long-running processes.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use gitbridge_core::config;

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Config file (default: ~/.gitbridge/<worker|coordinator>.yaml).
    #[arg(long, short = 'c')]
    pub config: Option<PathBuf>,
}

pub fn run_worker(args: ServeArgs) -> Result<()> {
    let path = match args.config {
        Some(path) => path,
        None => config::worker_config_path_at(&config::home()?),
    };
    let config = config::load_worker_at(&path)
        .context("failed to load worker config; run `gitbridge init worker` first")?;

    gitbridge_channel::init_tracing(config.log_format);
    runtime()?
        .block_on(gitbridge_channel::run_worker(config))
        .context("worker exited with error")
}

pub fn run_coordinator(args: ServeArgs) -> Result<()> {
    let path = match args.config {
        Some(path) => path,
        None => config::coordinator_config_path_at(&config::home()?),
    };
    let config = config::load_coordinator_at(&path)
        .context("failed to load coordinator config; run `gitbridge init coordinator` first")?;

    gitbridge_channel::init_tracing(config.log_format);
    runtime()?
        .block_on(gitbridge_channel::run_coordinator(config))
        .context("coordinator exited with error")
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start tokio runtime")
}
