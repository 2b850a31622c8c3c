use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::BTreeSet;
use std::fs::File;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use tracing::info;

use symdb::index::Mode;
use symdb::indexer::source::read_occurrences;

use super::Project;

/// Load JSON-lines occurrences (`-` for stdin) into the project database.
/// With `replace`, every file the input mentions is invalidated first.
pub fn ingest(project: &Path, input: &Path, replace: bool) -> Result<()> {
    let project = Project::load(project)?;

    let occurrences = if input == Path::new("-") {
        read_occurrences(io::stdin().lock())?
    } else {
        let file = File::open(input).with_context(|| format!("cannot open {}", input.display()))?;
        read_occurrences(BufReader::new(file))
            .with_context(|| format!("cannot read {}", input.display()))?
    };

    let mut db = project.open(Mode::ReadWrite)?;

    if replace {
        let paths: BTreeSet<PathBuf> = occurrences
            .iter()
            .flat_map(|o| o.paths().map(Path::to_path_buf))
            .collect();
        let removed = db.invalidate_entries(paths.iter().map(PathBuf::as_path))?;
        info!("Invalidated {} records across {} files", removed, paths.len());
    }

    let progress = ProgressBar::new(occurrences.len() as u64);
    progress.set_style(
        ProgressStyle::with_template("{spinner} [{bar:40}] {pos}/{len} {msg}")?
            .progress_chars("=> "),
    );

    for occurrence in &occurrences {
        progress.set_message(occurrence.name.clone());
        let resolved = db.resolve_occurrence(occurrence)?;
        db.write_occurrence(&resolved)?;
        progress.inc(1);
    }
    progress.finish_and_clear();

    db.sync()?;
    let stats = db.stats()?;
    println!(
        "Ingested {} occurrences: {} files, {} definitions, {} names",
        occurrences.len(),
        stats.files,
        stats.definitions,
        stats.names
    );
    Ok(())
}
