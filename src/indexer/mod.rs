// Writer pipeline: parse files off the query path and apply them atomically

pub mod capture;
pub mod source;
pub mod watcher;

use dashmap::DashMap;
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{Notify, Semaphore};
use tracing::{debug, info, warn};

use crate::index::{Database, SourceOccurrence, SymbolSource};
use capture::CompileCommand;

/// A database shared between the indexer and query jobs. Jobs hold the
/// read guard for their whole run; one file update holds the write guard.
pub type SharedDatabase = Arc<RwLock<Database>>;

pub fn shared(db: Database) -> SharedDatabase {
    Arc::new(RwLock::new(db))
}

/// Count of outstanding work with a way to wait for it to drain
#[derive(Debug, Default)]
pub struct Pending {
    count: AtomicUsize,
    idle: Notify,
}

impl Pending {
    pub fn start(&self) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }

    pub fn finish(&self) {
        if self.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }

    pub fn get(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            if self.get() == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// Outcome counters since the indexer was created
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexerStats {
    pub applied: usize,
    pub stale: usize,
    pub failed: usize,
}

#[derive(Debug, Default)]
struct Counters {
    applied: AtomicUsize,
    stale: AtomicUsize,
    failed: AtomicUsize,
}

/// Runs the symbol source on a bounded pool and writes results back.
///
/// Every submission of a path bumps its generation; a finished parse is
/// applied only if no newer submission of the same path happened in the
/// meantime. Nothing is cancelled, older results are just dropped.
pub struct Indexer {
    db: SharedDatabase,
    source: Arc<dyn SymbolSource>,
    generations: Arc<DashMap<PathBuf, u64>>,
    /// Compiler flags last captured for each source
    flags: DashMap<PathBuf, Vec<String>>,
    permits: Arc<Semaphore>,
    pending: Arc<Pending>,
    counters: Arc<Counters>,
}

impl Indexer {
    pub fn new(db: SharedDatabase, source: Arc<dyn SymbolSource>, threads: usize) -> Self {
        Self {
            db,
            source,
            generations: Arc::new(DashMap::new()),
            flags: DashMap::new(),
            permits: Arc::new(Semaphore::new(threads.max(1))),
            pending: Arc::new(Pending::default()),
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn db(&self) -> &SharedDatabase {
        &self.db
    }

    pub fn can_index(&self, path: &Path) -> bool {
        self.source.can_parse(path)
    }

    fn bump(&self, path: &Path) -> u64 {
        let mut generation = self.generations.entry(path.to_path_buf()).or_insert(0);
        *generation += 1;
        *generation
    }

    /// Queue `path` for parsing with the flags last captured for it. Must
    /// be called inside a tokio runtime. Returns the generation of this
    /// submission.
    pub fn submit(&self, path: PathBuf) -> u64 {
        let flags = self
            .flags
            .get(&path)
            .map(|f| f.value().clone())
            .unwrap_or_default();
        self.spawn_parse(path, flags)
    }

    /// Queue the source of a captured compile, remembering its flags for
    /// later submissions of the same file
    pub fn submit_command(&self, command: &CompileCommand) -> u64 {
        let flags = command.flags();
        self.flags.insert(command.source.clone(), flags.clone());
        self.spawn_parse(command.source.clone(), flags)
    }

    fn spawn_parse(&self, path: PathBuf, flags: Vec<String>) -> u64 {
        let generation = self.bump(&path);
        debug!("Queued {} (generation {})", path.display(), generation);

        let db = Arc::clone(&self.db);
        let source = Arc::clone(&self.source);
        let generations = Arc::clone(&self.generations);
        let permits = Arc::clone(&self.permits);
        let pending = Arc::clone(&self.pending);
        let counters = Arc::clone(&self.counters);

        pending.start();
        tokio::spawn(async move {
            let outcome = match permits.acquire_owned().await {
                Ok(_permit) => {
                    let parse_path = path.clone();
                    match tokio::task::spawn_blocking(move || source.parse(&parse_path, &flags)).await {
                        Ok(Ok(occurrences)) => {
                            tokio::task::spawn_blocking(move || {
                                apply(&db, &generations, &path, generation, &occurrences)
                            })
                            .await
                            .unwrap_or_else(|e| Outcome::Failed(e.to_string()))
                        }
                        Ok(Err(e)) => Outcome::Failed(format!("{}: {:#}", path.display(), e)),
                        Err(e) => Outcome::Failed(format!("{}: {}", path.display(), e)),
                    }
                }
                Err(e) => Outcome::Failed(e.to_string()),
            };

            match outcome {
                Outcome::Applied => counters.applied.fetch_add(1, Ordering::SeqCst),
                Outcome::Stale => counters.stale.fetch_add(1, Ordering::SeqCst),
                Outcome::Failed(message) => {
                    warn!("Indexing failed: {}", message);
                    counters.failed.fetch_add(1, Ordering::SeqCst)
                }
            };
            pending.finish();
        });

        generation
    }

    /// Submit every path the source accepts; returns how many were queued
    pub fn submit_all<I: IntoIterator<Item = PathBuf>>(&self, paths: I) -> usize {
        let mut queued = 0;
        for path in paths {
            if self.can_index(&path) {
                self.submit(path);
                queued += 1;
            }
        }
        queued
    }

    /// Drop everything recorded for `paths` without re-parsing. Parses of
    /// these paths still in flight are discarded.
    pub async fn remove(&self, paths: Vec<PathBuf>) -> anyhow::Result<usize> {
        for path in &paths {
            self.bump(path);
        }
        let db = Arc::clone(&self.db);
        let removed = tokio::task::spawn_blocking(move || {
            let mut db = db.write();
            let removed = db.invalidate_entries(paths.iter().map(PathBuf::as_path))?;
            db.sync()?;
            Ok::<_, crate::error::DbError>(removed)
        })
        .await??;
        info!("Removed {} records", removed);
        Ok(removed)
    }

    /// Parses queued or running
    pub fn pending(&self) -> usize {
        self.pending.get()
    }

    pub async fn wait(&self) {
        self.pending.wait_idle().await
    }

    pub fn stats(&self) -> IndexerStats {
        IndexerStats {
            applied: self.counters.applied.load(Ordering::SeqCst),
            stale: self.counters.stale.load(Ordering::SeqCst),
            failed: self.counters.failed.load(Ordering::SeqCst),
        }
    }
}

enum Outcome {
    Applied,
    Stale,
    Failed(String),
}

fn apply(
    db: &SharedDatabase,
    generations: &DashMap<PathBuf, u64>,
    path: &Path,
    generation: u64,
    occurrences: &[SourceOccurrence],
) -> Outcome {
    let mut db = db.write();
    // Checked under the write guard so two appliers cannot interleave
    let current = generations.get(path).map(|g| *g).unwrap_or(0);
    if current != generation {
        debug!(
            "Dropping stale result for {} (generation {} < {})",
            path.display(),
            generation,
            current
        );
        return Outcome::Stale;
    }

    match db.update_file(path, occurrences).and_then(|n| db.sync().map(|_| n)) {
        Ok(written) => {
            info!("Indexed {}: {} entities", path.display(), written);
            Outcome::Applied
        }
        Err(e) => Outcome::Failed(format!("{}: {}", path.display(), e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{DatabaseContext, Location, Mode, SourceLocation, Table};
    use crate::query::QueryEngine;
    use std::sync::mpsc;
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::tempdir;

    /// Reads `<name> <offset>` from the file and defines `name` there.
    /// A file whose name is `slow` signals `started` and then stalls.
    struct LineSource {
        started: Mutex<Option<mpsc::Sender<()>>>,
        flags: Mutex<Vec<Vec<String>>>,
    }

    impl LineSource {
        fn new() -> Self {
            Self {
                started: Mutex::new(None),
                flags: Mutex::new(Vec::new()),
            }
        }
    }

    impl SymbolSource for LineSource {
        fn can_parse(&self, path: &Path) -> bool {
            path.extension().map(|e| e == "c").unwrap_or(false)
        }

        fn parse(&self, path: &Path, flags: &[String]) -> anyhow::Result<Vec<SourceOccurrence>> {
            self.flags.lock().unwrap().push(flags.to_vec());
            let text = std::fs::read_to_string(path)?;
            let mut occurrences = Vec::new();
            for line in text.lines() {
                let (name, offset) = line
                    .split_once(' ')
                    .ok_or_else(|| anyhow::anyhow!("bad line: {}", line))?;
                if name == "slow" {
                    if let Some(tx) = self.started.lock().unwrap().take() {
                        tx.send(()).unwrap();
                    }
                    std::thread::sleep(Duration::from_millis(300));
                }
                occurrences.push(SourceOccurrence {
                    name: name.to_string(),
                    definition: Some(SourceLocation {
                        path: path.to_path_buf(),
                        offset: offset.parse()?,
                    }),
                    ..Default::default()
                });
            }
            Ok(occurrences)
        }
    }

    fn memory_db() -> SharedDatabase {
        shared(Database::create(DatabaseContext::memory(), Mode::ReadWrite).unwrap())
    }

    fn names(db: &SharedDatabase, name: &str) -> Vec<Location> {
        let db = db.read();
        let found = QueryEngine::new(&db).find_symbol(name).unwrap();
        found.into_iter().collect()
    }

    #[tokio::test]
    async fn test_submit_and_wait() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a.c");
        let b = dir.path().join("b.c");
        std::fs::write(&a, "alpha 4\n").unwrap();
        std::fs::write(&b, "beta 8\n").unwrap();

        let db = memory_db();
        let indexer = Indexer::new(db.clone(), Arc::new(LineSource::new()), 2);
        let queued = indexer.submit_all(vec![a.clone(), b.clone(), dir.path().join("notes.txt")]);
        assert_eq!(queued, 2);
        indexer.wait().await;

        assert_eq!(indexer.pending(), 0);
        assert_eq!(indexer.stats().applied, 2);
        assert_eq!(names(&db, "alpha").len(), 1);
        assert_eq!(names(&db, "beta").len(), 1);
    }

    #[tokio::test]
    async fn test_resubmit_replaces_file() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a.c");
        std::fs::write(&a, "old 1\n").unwrap();

        let db = memory_db();
        let indexer = Indexer::new(db.clone(), Arc::new(LineSource::new()), 1);
        indexer.submit(a.clone());
        indexer.wait().await;

        std::fs::write(&a, "new 2\n").unwrap();
        indexer.submit(a.clone());
        indexer.wait().await;

        assert!(names(&db, "old").is_empty());
        assert_eq!(names(&db, "new").len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_last_submission_wins() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a.c");
        std::fs::write(&a, "slow 1\n").unwrap();

        let (tx, rx) = mpsc::channel();
        let source = LineSource::new();
        *source.started.lock().unwrap() = Some(tx);

        let db = memory_db();
        let indexer = Indexer::new(db.clone(), Arc::new(source), 2);
        assert_eq!(indexer.submit(a.clone()), 1);

        // The first parse has read the old content before the rewrite
        tokio::task::spawn_blocking(move || rx.recv().unwrap())
            .await
            .unwrap();
        std::fs::write(&a, "fresh 2\n").unwrap();
        assert_eq!(indexer.submit(a.clone()), 2);
        indexer.wait().await;

        assert_eq!(indexer.stats(), IndexerStats { applied: 1, stale: 1, failed: 0 });
        assert!(names(&db, "slow").is_empty());
        assert_eq!(names(&db, "fresh").len(), 1);
    }

    #[tokio::test]
    async fn test_failed_parse_keeps_previous_data() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a.c");
        std::fs::write(&a, "keep 3\n").unwrap();

        let db = memory_db();
        let indexer = Indexer::new(db.clone(), Arc::new(LineSource::new()), 1);
        indexer.submit(a.clone());
        indexer.wait().await;

        std::fs::write(&a, "garbage\n").unwrap();
        indexer.submit(a.clone());
        indexer.wait().await;

        assert_eq!(indexer.stats().failed, 1);
        assert_eq!(names(&db, "keep").len(), 1);
    }

    #[tokio::test]
    async fn test_remove_invalidates() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a.c");
        std::fs::write(&a, "gone 0\n").unwrap();

        let db = memory_db();
        let indexer = Indexer::new(db.clone(), Arc::new(LineSource::new()), 1);
        indexer.submit(a.clone());
        indexer.wait().await;
        assert_eq!(names(&db, "gone").len(), 1);

        let removed = indexer.remove(vec![a.clone()]).await.unwrap();
        assert!(removed > 0);
        assert!(names(&db, "gone").is_empty());
        assert_eq!(db.read().stats().unwrap().definitions, 0);
        assert!(db.read().read::<Vec<u8>>(Table::General, &Location::new(1, 0).to_key()).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_captured_flags_follow_resubmits() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a.c");
        std::fs::write(&a, "flagged 0\n").unwrap();

        let source = Arc::new(LineSource::new());
        let indexer = Indexer::new(memory_db(), source.clone(), 1);
        indexer.submit(a.clone());
        indexer.wait().await;

        let command = CompileCommand {
            compiler: "gcc".to_string(),
            source: a.clone(),
            directory: dir.path().to_path_buf(),
            includes: vec![PathBuf::from("/inc")],
            defines: vec!["MODE=2".to_string()],
        };
        assert_eq!(indexer.submit_command(&command), 2);
        indexer.wait().await;
        // A later change notification reuses the captured flags
        indexer.submit(a.clone());
        indexer.wait().await;

        let expected = vec!["-I/inc".to_string(), "-DMODE=2".to_string()];
        assert_eq!(
            *source.flags.lock().unwrap(),
            vec![Vec::new(), expected.clone(), expected]
        );
        assert_eq!(indexer.stats().applied, 3);
    }

    #[tokio::test]
    async fn test_pending_wait_without_work() {
        let pending = Pending::default();
        pending.wait_idle().await;
        pending.start();
        assert_eq!(pending.get(), 1);
        pending.finish();
        pending.wait_idle().await;
    }
}
