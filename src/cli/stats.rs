use anyhow::Result;
use std::path::Path;

use symdb::index::{Mode, Table};

use super::{Format, Project};

pub fn show_stats(project: &Path, format: Format, verbose: bool) -> Result<()> {
    let project = Project::load(project)?;
    let db = project.open(Mode::ReadOnly)?;
    let stats = db.stats()?;

    if format == Format::Json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    println!("Project: {}", project.root.display());
    println!("Database: {} ({})", db.path().display(), db.context().backend.as_str());
    println!("\nIndex Statistics:");
    println!("  Files: {}", stats.files);
    println!("  Definitions: {}", stats.definitions);
    println!("  Names: {}", stats.names);
    println!("  Reference sets: {}", stats.reference_sets);
    println!("  Targets: {}", stats.targets);

    let size = db_size(db.path());
    if size > 0 {
        println!("  Index size: {:.2} MB", size as f64 / (1024.0 * 1024.0));
    }

    if verbose {
        println!("\nFiles:");
        for info in db.files().iter() {
            let indexed = info
                .last_indexed
                .and_then(|ts| chrono::DateTime::from_timestamp(ts, 0))
                .map(|ts| ts.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| "never".to_string());
            println!("  [{}] {} (indexed {})", info.id, info.path.display(), indexed);
        }
    }

    Ok(())
}

fn db_size(dir: &Path) -> u64 {
    Table::ALL
        .iter()
        .filter_map(|table| std::fs::metadata(dir.join(format!("{}.db", table))).ok())
        .map(|meta| meta.len())
        .sum()
}
