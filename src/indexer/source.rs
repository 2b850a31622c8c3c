// Symbol sources: where parsed occurrences come from

use anyhow::{bail, Context, Result};
use std::collections::HashSet;
use std::io::BufRead;
use std::path::Path;
use std::process::Command;
use tracing::debug;

use crate::index::{SourceOccurrence, SymbolSource};

/// Read one JSON `SourceOccurrence` per line, skipping blank lines
pub fn read_occurrences<R: BufRead>(reader: R) -> Result<Vec<SourceOccurrence>> {
    let mut occurrences = Vec::new();
    for (number, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let occurrence: SourceOccurrence = serde_json::from_str(&line)
            .with_context(|| format!("line {}: invalid occurrence", number + 1))?;
        occurrences.push(occurrence);
    }
    Ok(occurrences)
}

/// Runs an external parser as `<program> <args...> <file> <flags...>` and
/// reads its stdout as JSON lines
pub struct CommandSource {
    program: String,
    args: Vec<String>,
    extensions: HashSet<String>,
}

impl CommandSource {
    pub fn new(command: &[String], extensions: &[String]) -> Result<Self> {
        let (program, args) = command
            .split_first()
            .context("parser command is empty")?;
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
            extensions: extensions.iter().cloned().collect(),
        })
    }
}

impl SymbolSource for CommandSource {
    fn can_parse(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| self.extensions.contains(ext))
            .unwrap_or(false)
    }

    fn parse(&self, path: &Path, flags: &[String]) -> Result<Vec<SourceOccurrence>> {
        debug!("Running {} on {} {:?}", self.program, path.display(), flags);
        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(path)
            .args(flags)
            .output()
            .with_context(|| format!("failed to run parser {}", self.program))?;

        if !output.status.success() {
            bail!(
                "parser exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        read_occurrences(output.stdout.as_slice())
            .with_context(|| format!("bad parser output for {}", path.display()))
    }
}

/// Accepts nothing; used when no parser is configured so watch and capture
/// can still track files
pub struct NullSource;

impl SymbolSource for NullSource {
    fn can_parse(&self, _path: &Path) -> bool {
        false
    }

    fn parse(&self, _path: &Path, _flags: &[String]) -> Result<Vec<SourceOccurrence>> {
        Ok(Vec::new())
    }
}
