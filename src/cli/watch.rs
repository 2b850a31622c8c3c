use anyhow::Result;
use std::path::Path;
use std::sync::Arc;
use walkdir::WalkDir;

use symdb::config::Config;
use symdb::index::{Mode, SymbolSource};
use symdb::indexer::source::{CommandSource, NullSource};
use symdb::indexer::watcher::start_watcher;
use symdb::indexer::{shared, Indexer};

use super::Project;

/// The configured external parser, or a source that accepts nothing
pub fn symbol_source(config: &Config) -> Result<Arc<dyn SymbolSource>> {
    if config.indexing.parser.is_empty() {
        tracing::warn!("No parser configured; files are tracked but not parsed");
        return Ok(Arc::new(NullSource));
    }
    Ok(Arc::new(CommandSource::new(
        &config.indexing.parser,
        &config.indexing.extensions,
    )?))
}

/// Index the project (optionally everything up front) and keep it current
pub async fn watch(project: &Path, initial: bool) -> Result<()> {
    let project = Project::load(project)?;
    let db = shared(project.open(Mode::ReadWrite)?);
    let indexer = Arc::new(Indexer::new(
        db,
        symbol_source(&project.config)?,
        project.config.indexing.threads,
    ));

    if initial {
        let sources = WalkDir::new(&project.root)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .filter(|path| {
                let relative = path.strip_prefix(&project.root).unwrap_or(path);
                project.config.is_source_file(path)
                    && project.config.should_index_file(&relative.to_string_lossy())
            });
        let queued = indexer.submit_all(sources);
        println!("Indexing {} files...", queued);
        indexer.wait().await;
        let stats = indexer.stats();
        println!("Initial indexing complete: {} indexed, {} failed", stats.applied, stats.failed);
    }

    println!("Monitoring {} for changes. Press Ctrl+C to stop.", project.root.display());
    let config = Arc::new(project.config.clone());
    tokio::select! {
        result = start_watcher(indexer.clone(), config, &project.root) => result?,
        _ = tokio::signal::ctrl_c() => println!("\nStopping watcher"),
    }

    indexer.wait().await;
    indexer.db().write().sync()?;
    Ok(())
}
