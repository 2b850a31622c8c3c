use anyhow::Result;
use std::path::Path;

use symdb::index::Mode;
use symdb::indexer::shared;
use symdb::jobs::{JobRunner, Query};
use symdb::query::NameFilter;

use super::{Format, Project};

/// Query as typed on the command line, before locations are resolved
pub enum Request {
    Follow(String),
    References(String),
    Info(String),
    ReferencesName(String),
    Find(String),
    Names { filter: Option<String>, substring: bool },
    Dump { filter: Option<String> },
    Validate { location: String, expected: Vec<String> },
    Check,
}

pub async fn run(project: &Path, request: Request, format: Format) -> Result<()> {
    let project = Project::load(project)?;
    let db = project.open(Mode::ReadOnly)?;
    let runner = JobRunner::new(shared(db), project.root.clone())
        .with_max_results(project.config.query.max_results);

    let cwd = std::env::current_dir()?;
    let query = match request {
        Request::Follow(text) => Query::FollowLocation(runner.locate(&text, &cwd)?),
        Request::References(text) => Query::ReferencesForLocation(runner.locate(&text, &cwd)?),
        Request::Info(text) => Query::CursorInfo(runner.locate(&text, &cwd)?),
        Request::ReferencesName(name) => Query::ReferencesForName(name),
        Request::Find(name) => Query::Match(name),
        Request::Names { filter, substring } => Query::ListSymbols(match filter {
            None => NameFilter::All,
            Some(f) if substring => NameFilter::Substring(f),
            Some(f) => NameFilter::Prefix(f),
        }),
        Request::Dump { filter } => Query::Dump { filter },
        Request::Validate { location, expected } => Query::Validate {
            location: runner.locate(&location, &cwd)?,
            expected: expected
                .iter()
                .map(|text| runner.locate(text, &cwd))
                .collect::<Result<_, _>>()?,
        },
        Request::Check => Query::CheckTargets,
    };
    let is_dump = matches!(query, Query::Dump { .. });

    let outcome = runner.run(query).await?;

    match format {
        Format::Json if is_dump => println!("{}", outcome.lines.join("\n")),
        Format::Json => {
            let value = serde_json::json!({
                "results": outcome.lines,
                "truncated": outcome.truncated,
                "difference": outcome.difference,
            });
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        Format::Text => {
            for line in &outcome.lines {
                println!("{}", line);
            }
            for line in &outcome.difference {
                println!("  {}", line);
            }
            if outcome.truncated {
                eprintln!("(output truncated at {} results)", outcome.lines.len());
            }
        }
    }

    if !outcome.difference.is_empty() {
        std::process::exit(2);
    }
    Ok(())
}
