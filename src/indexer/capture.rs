// Build capture: run dry-run builds and pick compiler invocations out of them

use once_cell::sync::Lazy;
use parking_lot::{Mutex, RwLock};
use regex::Regex;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::{Indexer, Pending};
use crate::index::location::normalize_path;

/// File names treated as makefiles by `recurse_dir`
pub const MAKEFILE_NAMES: [&str; 3] = ["Makefile", "makefile", "GNUmakefile"];

const SOURCE_EXTENSIONS: [&str; 9] = ["c", "cc", "cpp", "cxx", "c++", "C", "m", "mm", "s"];

static COMPILER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:[\w.-]+-)?(?:cc|gcc|g\+\+|clang|clang\+\+|c\+\+)(?:-[\d.]+)?$")
        .expect("compiler pattern is valid")
});

static ENTERING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^\S*make(?:\[\d+\])?: Entering directory [`'"](.+)['"]$"#)
        .expect("directory pattern is valid")
});

/// One compiler invocation found in build output
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CompileCommand {
    pub compiler: String,
    pub source: PathBuf,
    pub directory: PathBuf,
    pub includes: Vec<PathBuf>,
    pub defines: Vec<String>,
}

impl CompileCommand {
    /// The include and define flags, in the form a parser accepts them
    pub fn flags(&self) -> Vec<String> {
        self.includes
            .iter()
            .map(|dir| format!("-I{}", dir.display()))
            .chain(self.defines.iter().map(|define| format!("-D{}", define)))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureEvent {
    Started { makefile: PathBuf },
    Compile { makefile: PathBuf, command: CompileCommand },
    Finished { makefile: PathBuf, commands: usize },
    /// Launch failure, crash or nonzero exit of one build process
    Failed { makefile: PathBuf, error: String },
}

pub type CaptureCallback = Arc<dyn Fn(&CaptureEvent) + Send + Sync>;

/// Split a command line into words, honouring quotes and backslashes
pub fn split_args(line: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut quote: Option<char> = None;
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some('"'), '\\') | (None, '\\') => {
                if let Some(next) = chars.next() {
                    current.push(next);
                }
                in_word = true;
            }
            (Some(_), c) => current.push(c),
            (None, '"') | (None, '\'') => {
                quote = Some(c);
                in_word = true;
            }
            (None, c) if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            (None, c) => {
                current.push(c);
                in_word = true;
            }
        }
    }
    if in_word {
        words.push(current);
    }
    words
}

fn is_source(arg: &str) -> bool {
    Path::new(arg)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| SOURCE_EXTENSIONS.contains(&ext))
        .unwrap_or(false)
}

/// Parse one line of build output as a compiler invocation run in `cwd`.
/// Lines without a source file (links, echo, recursion) yield `None`.
pub fn parse_compile_line(line: &str, cwd: &Path) -> Option<CompileCommand> {
    let words = split_args(line.trim());
    let mut args = words.iter().map(String::as_str);

    let mut compiler = args.next()?;
    if compiler == "ccache" || compiler == "distcc" {
        compiler = args.next()?;
    }
    let name = Path::new(compiler).file_name()?.to_str()?;
    if !COMPILER.is_match(name) {
        return None;
    }

    let mut source = None;
    let mut includes = Vec::new();
    let mut defines = Vec::new();

    while let Some(arg) = args.next() {
        if let Some(dir) = arg.strip_prefix("-I") {
            let dir = if dir.is_empty() { args.next()? } else { dir };
            includes.push(normalize_path(Path::new(dir), cwd));
        } else if let Some(define) = arg.strip_prefix("-D") {
            let define = if define.is_empty() { args.next()? } else { define };
            defines.push(define.to_string());
        } else if arg == "-o" || arg == "-MF" || arg == "-MT" || arg == "-include" || arg == "-x" {
            args.next();
        } else if !arg.starts_with('-') && is_source(arg) {
            source = Some(normalize_path(Path::new(arg), cwd));
        }
    }

    Some(CompileCommand {
        compiler: name.to_string(),
        source: source?,
        directory: cwd.to_path_buf(),
        includes,
        defines,
    })
}

/// Runs dry-run builds concurrently and feeds discovered sources to the
/// indexer. One makefile failing never affects the others.
pub struct BuildCapture {
    command: Vec<String>,
    indexer: Option<Arc<Indexer>>,
    pending: Arc<Pending>,
    callbacks: Arc<RwLock<Vec<CaptureCallback>>>,
    commands: Arc<Mutex<BTreeMap<PathBuf, CompileCommand>>>,
}

impl BuildCapture {
    /// `command` is run as `<command...> -C <dir> -f <makefile>`
    pub fn new(command: Vec<String>, indexer: Option<Arc<Indexer>>) -> Self {
        Self {
            command,
            indexer,
            pending: Arc::new(Pending::default()),
            callbacks: Arc::new(RwLock::new(Vec::new())),
            commands: Arc::new(Mutex::new(BTreeMap::new())),
        }
    }

    pub fn subscribe<F>(&self, callback: F)
    where
        F: Fn(&CaptureEvent) + Send + Sync + 'static,
    {
        self.callbacks.write().push(Arc::new(callback));
    }

    /// Launch a dry run for `makefile`. Returns false if it is not a file.
    /// Must be called inside a tokio runtime.
    pub fn add_makefile(&self, makefile: &Path) -> bool {
        if !makefile.is_file() {
            warn!("Not a makefile: {}", makefile.display());
            return false;
        }
        let makefile = normalize_path(makefile, &std::env::current_dir().unwrap_or_default());
        let (Some(directory), Some(name)) = (makefile.parent(), makefile.file_name()) else {
            return false;
        };
        let Some((program, args)) = self.command.split_first() else {
            warn!("No build command configured");
            return false;
        };

        let mut command = Command::new(program);
        command
            .args(args)
            .arg("-C")
            .arg(directory)
            .arg("-f")
            .arg(name)
            .current_dir(directory)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let run = Run {
            makefile: makefile.clone(),
            directory: directory.to_path_buf(),
            indexer: self.indexer.clone(),
            callbacks: Arc::clone(&self.callbacks),
            commands: Arc::clone(&self.commands),
        };
        let pending = Arc::clone(&self.pending);

        pending.start();
        tokio::spawn(async move {
            run.emit(CaptureEvent::Started {
                makefile: run.makefile.clone(),
            });
            let event = match run.execute(command).await {
                Ok(commands) => CaptureEvent::Finished {
                    makefile: run.makefile.clone(),
                    commands,
                },
                Err(error) => {
                    warn!("Build capture failed for {}: {}", run.makefile.display(), error);
                    CaptureEvent::Failed {
                        makefile: run.makefile.clone(),
                        error,
                    }
                }
            };
            run.emit(event);
            pending.finish();
        });
        true
    }

    /// Add every makefile under `root`; returns how many were launched
    pub fn recurse_dir(&self, root: &Path) -> usize {
        let mut launched = 0;
        let entries = WalkDir::new(root)
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !e.file_name().to_string_lossy().starts_with('.'))
            .filter_map(|e| e.ok());

        for entry in entries {
            let is_makefile = entry.file_type().is_file()
                && MAKEFILE_NAMES.iter().any(|name| entry.file_name() == *name);
            if is_makefile && self.add_makefile(entry.path()) {
                launched += 1;
            }
        }
        info!("Found {} makefiles under {}", launched, root.display());
        launched
    }

    /// Build processes still running plus parse jobs they caused
    pub fn pending(&self) -> usize {
        self.pending.get() + self.indexer.as_ref().map(|i| i.pending()).unwrap_or(0)
    }

    pub async fn wait_idle(&self) {
        self.pending.wait_idle().await;
        if let Some(indexer) = &self.indexer {
            indexer.wait().await;
        }
    }

    /// Compile commands found so far, one per source
    pub fn commands(&self) -> Vec<CompileCommand> {
        self.commands.lock().values().cloned().collect()
    }
}

struct Run {
    makefile: PathBuf,
    directory: PathBuf,
    indexer: Option<Arc<Indexer>>,
    callbacks: Arc<RwLock<Vec<CaptureCallback>>>,
    commands: Arc<Mutex<BTreeMap<PathBuf, CompileCommand>>>,
}

impl Run {
    fn emit(&self, event: CaptureEvent) {
        let callbacks = self.callbacks.read().clone();
        for callback in callbacks {
            callback(&event);
        }
    }

    async fn execute(&self, mut command: Command) -> Result<usize, String> {
        let mut child = command
            .spawn()
            .map_err(|e| format!("cannot launch build: {}", e))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| "build output is not captured".to_string())?;

        let mut lines = BufReader::new(stdout).lines();
        let mut cwd = self.directory.clone();
        let mut seen = HashSet::new();

        while let Some(line) = lines.next_line().await.map_err(|e| e.to_string())? {
            if let Some(caps) = ENTERING.captures(&line) {
                cwd = PathBuf::from(&caps[1]);
                continue;
            }
            let Some(compile) = parse_compile_line(&line, &cwd) else {
                continue;
            };
            if !seen.insert(compile.clone()) {
                continue;
            }
            debug!("{}: {}", self.makefile.display(), compile.source.display());

            let is_new = self
                .commands
                .lock()
                .insert(compile.source.clone(), compile.clone())
                .is_none();
            if is_new {
                if let Some(indexer) = &self.indexer {
                    if indexer.can_index(&compile.source) {
                        indexer.submit_command(&compile);
                    }
                }
            }
            self.emit(CaptureEvent::Compile {
                makefile: self.makefile.clone(),
                command: compile,
            });
        }

        let status = child.wait().await.map_err(|e| e.to_string())?;
        if !status.success() {
            return Err(format!("build exited with {}", status));
        }
        Ok(seen.len())
    }
}
