// CLI command implementations

pub mod capture;
pub mod ingest;
pub mod query;
pub mod stats;
pub mod watch;

use anyhow::{Context, Result};
use clap::ValueEnum;
use std::path::{Path, PathBuf};

use symdb::config::Config;
use symdb::index::{Backend, Database, DatabaseContext, Mode};

/// How query results are printed
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Format {
    Text,
    Json,
}

/// A project directory with its configuration
pub struct Project {
    pub root: PathBuf,
    pub config: Config,
}

impl Project {
    pub fn load(root: &Path) -> Result<Self> {
        let root = root
            .canonicalize()
            .with_context(|| format!("project directory {} not found", root.display()))?;
        let config = Config::from_project_dir(&root);
        Ok(Self { root, config })
    }

    pub fn context(&self) -> DatabaseContext {
        DatabaseContext::for_project(&self.root, &self.config)
    }

    /// Open the project's database. Reading requires an existing index.
    pub fn open(&self, mode: Mode) -> Result<Database> {
        let context = self.context();
        if mode == Mode::ReadOnly
            && context.backend == Backend::Sqlite
            && !context.base_dir.exists()
        {
            anyhow::bail!(
                "no index at {}; run `symdb ingest` or `symdb capture` first",
                context.base_dir.display()
            );
        }
        let path = context.base_dir.clone();
        Database::create(context, mode)
            .with_context(|| format!("failed to open database at {}", path.display()))
    }
}
