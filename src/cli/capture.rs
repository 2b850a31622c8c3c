use anyhow::Result;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::info;

use symdb::index::Mode;
use symdb::indexer::capture::{BuildCapture, CaptureEvent};
use symdb::indexer::{shared, Indexer};

use super::watch::symbol_source;
use super::Project;

/// Dry-run every makefile under `dir` (or `dir` itself if it is a
/// makefile) and index the sources the builds compile
pub async fn capture(project: &Path, dir: &Path) -> Result<()> {
    let project = Project::load(project)?;
    let db = shared(project.open(Mode::ReadWrite)?);
    let indexer = Arc::new(Indexer::new(
        db.clone(),
        symbol_source(&project.config)?,
        project.config.indexing.threads,
    ));

    let capture = BuildCapture::new(
        project.config.indexing.build_command.clone(),
        Some(indexer.clone()),
    );

    let failures = Arc::new(AtomicUsize::new(0));
    let failed = failures.clone();
    capture.subscribe(move |event| match event {
        CaptureEvent::Started { makefile } => println!("make {}", makefile.display()),
        CaptureEvent::Compile { command, .. } => {
            println!("  {} {}", command.compiler, command.source.display())
        }
        CaptureEvent::Finished { makefile, commands } => {
            println!("done {} ({} compile commands)", makefile.display(), commands)
        }
        CaptureEvent::Failed { makefile, error } => {
            failed.fetch_add(1, Ordering::SeqCst);
            eprintln!("failed {}: {}", makefile.display(), error);
        }
    });

    let launched = if dir.is_file() {
        usize::from(capture.add_makefile(dir))
    } else {
        capture.recurse_dir(dir)
    };
    if launched == 0 {
        anyhow::bail!("no makefiles found under {}", dir.display());
    }

    capture.wait_idle().await;

    let stats = indexer.stats();
    info!("Capture finished: {:?}", stats);
    println!(
        "\n{} sources, {} indexed, {} failed parses, {} failed builds",
        capture.commands().len(),
        stats.applied,
        stats.failed,
        failures.load(Ordering::SeqCst)
    );

    db.write().sync()?;
    Ok(())
}
