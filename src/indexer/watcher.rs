// File watcher for incremental updates

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::indexer::Indexer;

/// Re-indexes changed sources and drops deleted ones
pub struct FileWatcher {
    indexer: Arc<Indexer>,
    config: Arc<Config>,
    watch_path: PathBuf,
}

impl FileWatcher {
    pub fn new(indexer: Arc<Indexer>, config: Arc<Config>, watch_path: PathBuf) -> Self {
        Self {
            indexer,
            config,
            watch_path,
        }
    }

    /// Watch until the event stream closes
    pub async fn watch(&self) -> Result<()> {
        info!("Starting file watcher for: {}", self.watch_path.display());

        let (tx, mut rx) = mpsc::channel(256);

        // notify calls back on its own thread, outside the runtime
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    if let Err(e) = tx.blocking_send(event) {
                        error!("Failed to send file event: {}", e);
                    }
                }
                Err(e) => error!("File watch error: {}", e),
            },
            notify::Config::default(),
        )?;

        watcher.watch(&self.watch_path, RecursiveMode::Recursive)?;
        info!("File watcher started. Monitoring for changes...");

        while let Some(event) = rx.recv().await {
            self.handle_event(event).await;
        }

        Ok(())
    }

    /// React to one file system event. Failures are logged, never fatal.
    pub(crate) async fn handle_event(&self, event: Event) {
        debug!("File event: {:?}", event);

        match event.kind {
            EventKind::Create(_) | EventKind::Modify(_) => {
                for path in event.paths.iter().filter(|p| self.is_tracked(p)) {
                    if path.is_file() {
                        info!("File changed: {}", path.display());
                        self.indexer.submit(path.clone());
                    }
                }
            }
            EventKind::Remove(_) => {
                let removed: Vec<PathBuf> = event
                    .paths
                    .into_iter()
                    .filter(|p| self.is_tracked(p))
                    .collect();
                if removed.is_empty() {
                    return;
                }
                for path in &removed {
                    info!("File removed: {}", path.display());
                }
                if let Err(e) = self.indexer.remove(removed).await {
                    warn!("Failed to drop removed files: {:#}", e);
                }
            }
            _ => {}
        }
    }

    fn is_tracked(&self, path: &Path) -> bool {
        let relative = path.strip_prefix(&self.watch_path).unwrap_or(path);
        self.config.is_source_file(path)
            && self.config.should_index_file(&relative.to_string_lossy())
            && self.indexer.can_index(path)
    }
}

/// Watch a project directory, feeding changes to `indexer`
pub async fn start_watcher(indexer: Arc<Indexer>, config: Arc<Config>, project_path: &Path) -> Result<()> {
    info!("Initializing file watcher for project: {}", project_path.display());
    let watcher = FileWatcher::new(indexer, config, project_path.to_path_buf());
    watcher.watch().await
}
