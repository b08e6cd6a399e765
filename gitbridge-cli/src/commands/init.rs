//! `gitbridge init worker|coordinator [--path <file>] [--force]`

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};

use gitbridge_core::config::{self, ConfigKind};

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum InitKind {
    Worker,
    Coordinator,
}

impl From<InitKind> for ConfigKind {
    fn from(kind: InitKind) -> Self {
        match kind {
            InitKind::Worker => ConfigKind::Worker,
            InitKind::Coordinator => ConfigKind::Coordinator,
        }
    }
}

/// Write a commented config template (mode 0600).
#[derive(Args, Debug)]
pub struct InitArgs {
    /// Which process the config is for.
    #[arg(value_enum)]
    pub kind: InitKind,

    /// Destination file (default: ~/.gitbridge/<kind>.yaml).
    #[arg(long)]
    pub path: Option<PathBuf>,

    /// Overwrite an existing file.
    #[arg(long)]
    pub force: bool,
}

impl InitArgs {
    pub fn run(self) -> Result<()> {
        let kind = ConfigKind::from(self.kind);
        let path = match self.path {
            Some(path) => path,
            None => kind.default_path_at(&config::home()?),
        };

        config::write_template_at(&path, kind, self.force)
            .with_context(|| format!("failed to write {}", path.display()))?;

        println!("✓ Wrote {:?} config template", self.kind);
        println!("  Saved to: {}", path.display());
        println!("  Edit the api key and repository settings before starting.");
        Ok(())
    }
}
