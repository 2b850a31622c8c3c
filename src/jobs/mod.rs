// Query jobs: run against a read snapshot and report through callbacks

use parking_lot::RwLock;
use regex::Regex;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::DbError;
use crate::index::{Database, Location};
use crate::indexer::{Indexer, SharedDatabase};
use crate::query::{NameFilter, QueryEngine};

/// Opaque handle for one submitted query
pub type JobId = u64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Query {
    /// Where the symbol at a location is defined
    FollowLocation(Location),
    ReferencesForLocation(Location),
    ReferencesForName(String),
    /// Definitions and declarations of a name
    Match(String),
    ListSymbols(NameFilter),
    /// JSON document of the files under the project root, optionally
    /// restricted to relative paths matching a regex
    Dump { filter: Option<String> },
    /// Re-parse files through the attached indexer
    Recompile(Vec<PathBuf>),
    /// Compare the references of `location` with `expected`
    Validate {
        location: Location,
        expected: BTreeSet<Location>,
    },
    /// Find occurrences whose target is gone
    CheckTargets,
    /// Name, kind, target and reference count of the symbol at a location
    CursorInfo(Location),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobEvent {
    /// One result line, sent as soon as the job writes it
    Output { id: JobId, line: String },
    Completed { id: JobId, lines: Vec<String> },
    Failed { id: JobId, error: String },
    /// Sent before `Completed` when a validation finds differences
    Inconsistent { id: JobId, difference: Vec<String> },
}

/// Final state of one job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOutcome {
    pub id: JobId,
    pub lines: Vec<String>,
    pub truncated: bool,
    pub difference: Vec<String>,
}

pub type JobCallback = Arc<dyn Fn(&JobEvent) + Send + Sync>;

pub type LineSink = Box<dyn Fn(&str) + Send>;

/// Line buffer that stops accepting after `limit` lines (0 = no limit)
#[derive(Default)]
pub struct Output {
    lines: Vec<String>,
    limit: usize,
    truncated: bool,
    sink: Option<LineSink>,
}

impl Output {
    pub fn new(limit: usize) -> Self {
        Self {
            lines: Vec::new(),
            limit,
            truncated: false,
            sink: None,
        }
    }

    /// Also hand every accepted line to `sink` as it is written
    pub fn streaming<F>(limit: usize, sink: F) -> Self
    where
        F: Fn(&str) + Send + 'static,
    {
        Self {
            sink: Some(Box::new(sink)),
            ..Self::new(limit)
        }
    }

    /// Returns false once the buffer is full
    pub fn write(&mut self, line: impl Into<String>) -> bool {
        if self.limit != 0 && self.lines.len() >= self.limit {
            self.truncated = true;
            return false;
        }
        let line = line.into();
        if let Some(sink) = &self.sink {
            sink(&line);
        }
        self.lines.push(line);
        true
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn is_truncated(&self) -> bool {
        self.truncated
    }
}

/// Runs queries concurrently with indexing. Each job sees one consistent
/// snapshot: it holds the database read guard from start to finish.
#[derive(Clone)]
pub struct JobRunner {
    db: SharedDatabase,
    indexer: Option<Arc<Indexer>>,
    project_root: PathBuf,
    max_results: usize,
    next_id: Arc<AtomicU64>,
    callbacks: Arc<RwLock<Vec<JobCallback>>>,
}

impl JobRunner {
    pub fn new(db: SharedDatabase, project_root: PathBuf) -> Self {
        Self {
            db,
            indexer: None,
            project_root,
            max_results: 0,
            next_id: Arc::new(AtomicU64::new(0)),
            callbacks: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub fn with_indexer(mut self, indexer: Arc<Indexer>) -> Self {
        self.indexer = Some(indexer);
        self
    }

    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = max_results;
        self
    }

    pub fn subscribe<F>(&self, callback: F)
    where
        F: Fn(&JobEvent) + Send + Sync + 'static,
    {
        self.callbacks.write().push(Arc::new(callback));
    }

    fn emit(&self, event: JobEvent) {
        emit_to(&self.callbacks, &event);
    }

    /// Output for job `id` that reports each line as an `Output` event
    fn output(&self, id: JobId) -> Output {
        let callbacks = Arc::clone(&self.callbacks);
        Output::streaming(self.max_results, move |line| {
            let event = JobEvent::Output {
                id,
                line: line.to_string(),
            };
            emit_to(&callbacks, &event);
        })
    }

    fn allocate_id(&self) -> JobId {
        self.next_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Start a job in the background; results arrive through callbacks
    pub fn submit(&self, query: Query) -> JobId {
        let id = self.allocate_id();
        let runner = self.clone();
        tokio::spawn(async move {
            let _ = runner.execute(id, query).await;
        });
        id
    }

    /// Run a job to completion. Callbacks see the same events as for
    /// `submit`.
    pub async fn run(&self, query: Query) -> anyhow::Result<JobOutcome> {
        let id = self.allocate_id();
        self.execute(id, query).await
    }

    /// Run several jobs concurrently; outcomes come back in query order
    pub async fn run_all(&self, queries: Vec<Query>) -> Vec<anyhow::Result<JobOutcome>> {
        futures::future::join_all(queries.into_iter().map(|query| self.run(query))).await
    }

    async fn execute(&self, id: JobId, query: Query) -> anyhow::Result<JobOutcome> {
        debug!("Job {} started: {:?}", id, query);
        let result = match query {
            Query::Recompile(paths) => self.recompile(id, paths),
            query => {
                let db = Arc::clone(&self.db);
                let root = self.project_root.clone();
                let output = self.output(id);
                tokio::task::spawn_blocking(move || {
                    let db = db.read();
                    run_query(&db, &root, &query, output)
                })
                .await
                .map_err(anyhow::Error::from)
                .and_then(|r| r)
            }
        };

        match result {
            Ok((output, difference)) => {
                if !difference.is_empty() {
                    self.emit(JobEvent::Inconsistent {
                        id,
                        difference: difference.clone(),
                    });
                }
                let truncated = output.is_truncated();
                let lines = output.lines;
                self.emit(JobEvent::Completed {
                    id,
                    lines: lines.clone(),
                });
                Ok(JobOutcome {
                    id,
                    lines,
                    truncated,
                    difference,
                })
            }
            Err(e) => {
                warn!("Job {} failed: {:#}", id, e);
                self.emit(JobEvent::Failed {
                    id,
                    error: format!("{:#}", e),
                });
                Err(e)
            }
        }
    }

    fn recompile(&self, id: JobId, paths: Vec<PathBuf>) -> anyhow::Result<(Output, Vec<String>)> {
        let indexer = self
            .indexer
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("no indexer attached"))?;
        let mut output = self.output(id);
        for path in paths {
            let line = format!("{} (generation {})", path.display(), indexer.submit(path.clone()));
            output.write(line);
        }
        Ok((output, Vec::new()))
    }

    /// Parse location text against the current snapshot
    pub fn locate(&self, text: &str, cwd: &std::path::Path) -> Result<Location, DbError> {
        let db = self.db.read();
        let engine = QueryEngine::new(&db);
        engine.create_location(text, cwd)
    }
}

/// Callbacks may subscribe more callbacks, so none run under the lock
fn emit_to(callbacks: &RwLock<Vec<JobCallback>>, event: &JobEvent) {
    let snapshot = callbacks.read().clone();
    for callback in snapshot {
        callback(event);
    }
}

fn write_locations<I>(engine: &QueryEngine<'_>, output: &mut Output, locations: I) -> Result<(), DbError>
where
    I: IntoIterator<Item = Location>,
{
    for location in locations {
        if !output.write(engine.location_to_string(location)?) {
            break;
        }
    }
    Ok(())
}

fn run_query(
    db: &Database,
    root: &std::path::Path,
    query: &Query,
    mut output: Output,
) -> anyhow::Result<(Output, Vec<String>)> {
    let engine = QueryEngine::new(db);
    let mut difference = Vec::new();

    match query {
        Query::FollowLocation(location) => {
            write_locations(&engine, &mut output, engine.follow_location(*location)?)?;
        }
        Query::ReferencesForLocation(location) => {
            write_locations(&engine, &mut output, engine.find_references(*location)?)?;
        }
        Query::ReferencesForName(name) => {
            write_locations(&engine, &mut output, engine.references_for_name(name)?)?;
        }
        Query::Match(name) => {
            write_locations(&engine, &mut output, engine.find_symbol(name)?)?;
        }
        Query::ListSymbols(filter) => {
            for name in engine.symbol_names(filter.clone())? {
                if !output.write(name?) {
                    break;
                }
            }
        }
        Query::Dump { filter } => {
            let filter = filter.as_deref().map(Regex::new).transpose()?;
            let document = engine.dump(root, filter.as_ref())?;
            for line in serde_json::to_string_pretty(&document)?.lines() {
                output.write(line);
            }
        }
        Query::Validate { location, expected } => {
            for location in engine.validate(*location, expected)? {
                difference.push(engine.location_to_string(location)?);
            }
            output.write(if difference.is_empty() { "consistent" } else { "inconsistent" });
        }
        Query::CheckTargets => {
            for location in engine.dangling_targets()? {
                difference.push(engine.location_to_string(location)?);
            }
            output.write(format!("{} dangling targets", difference.len()));
        }
        Query::CursorInfo(location) => {
            if let Some(info) = engine.cursor_info(*location)? {
                output.write(format!("symbol: {}", info.qualified_name()));
                output.write(format!("kind: {}", info.kind));
                if let Some(target) = info.target {
                    output.write(format!("target: {}", engine.location_to_string(target)?));
                }
                output.write(format!("references: {}", info.references));
            }
        }
        Query::Recompile(_) => anyhow::bail!("recompile does not run against a snapshot"),
    }

    Ok((output, difference))
}
