use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use symdb::config::{Config, LoggingConfig};
use symdb::index::Mode;

mod cli;

use cli::query::Request;
use cli::Format;

#[derive(Parser)]
#[command(name = "symdb")]
#[command(version)]
#[command(about = "Persistent symbol database for C-family code navigation", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Project directory
    #[arg(short, long, global = true, default_value = ".")]
    project: PathBuf,

    /// Output format
    #[arg(short, long, global = true, value_enum, default_value = "text")]
    format: Format,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Load symbol occurrences from a JSON-lines file (`-` for stdin)
    Ingest {
        input: PathBuf,

        /// Drop what is stored for the mentioned files first
        #[arg(short, long)]
        replace: bool,
    },

    /// Show where the symbol at a location is defined
    Follow {
        /// path, path:offset or path:line:column
        location: String,
    },

    /// List references of the symbol at a location
    References { location: String },

    /// Describe the symbol at a location: name, kind, target, reference count
    Info { location: String },

    /// List references of every symbol with this name
    ReferencesName { name: String },

    /// List definitions and declarations of a name
    Find { name: String },

    /// List symbol names, optionally filtered
    Names {
        filter: Option<String>,

        /// Match anywhere in the name instead of as a prefix
        #[arg(short, long)]
        substring: bool,
    },

    /// Dump the index of the project as JSON
    Dump {
        /// Only files whose relative path matches this regex
        #[arg(long)]
        filter: Option<String>,
    },

    /// Check that a location has exactly the expected references
    Validate {
        location: String,

        #[arg(short, long = "expect", num_args = 0..)]
        expected: Vec<String>,
    },

    /// Report occurrences whose target no longer exists
    Check,

    /// Forget everything indexed for the given files
    Remove {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Capture compile commands from dry-run builds and index the sources
    Capture {
        /// Directory to search for makefiles, or a single makefile
        #[arg(default_value = ".")]
        dir: PathBuf,
    },

    /// Watch the project and re-index changed files
    Watch {
        /// Index every source file before watching
        #[arg(long)]
        initial: bool,
    },

    /// Show index statistics
    Stats,
}

fn init_logging(debug: bool, verbose: bool, logging: &LoggingConfig) {
    let level = if debug {
        "debug"
    } else if verbose {
        "info"
    } else {
        logging.level.as_str()
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("symdb={}", level)));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    match logging.format.as_str() {
        "compact" => builder.compact().init(),
        _ => builder.pretty().init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::from_project_dir(&cli.project);
    init_logging(cli.debug, cli.verbose, &config.logging);

    info!("symdb {} starting", env!("CARGO_PKG_VERSION"));
    debug!("Project: {}", cli.project.display());

    let project = cli.project.as_path();
    match cli.command {
        Commands::Ingest { input, replace } => cli::ingest::ingest(project, &input, replace)?,

        Commands::Follow { location } => {
            cli::query::run(project, Request::Follow(location), cli.format).await?
        }
        Commands::References { location } => {
            cli::query::run(project, Request::References(location), cli.format).await?
        }
        Commands::Info { location } => {
            cli::query::run(project, Request::Info(location), cli.format).await?
        }
        Commands::ReferencesName { name } => {
            cli::query::run(project, Request::ReferencesName(name), cli.format).await?
        }
        Commands::Find { name } => cli::query::run(project, Request::Find(name), cli.format).await?,
        Commands::Names { filter, substring } => {
            cli::query::run(project, Request::Names { filter, substring }, cli.format).await?
        }
        Commands::Dump { filter } => {
            cli::query::run(project, Request::Dump { filter }, cli.format).await?
        }
        Commands::Validate { location, expected } => {
            cli::query::run(project, Request::Validate { location, expected }, cli.format).await?
        }
        Commands::Check => cli::query::run(project, Request::Check, cli.format).await?,

        Commands::Remove { paths } => {
            let project = cli::Project::load(project)?;
            let mut db = project.open(Mode::ReadWrite)?;
            let cwd = std::env::current_dir()?;
            let paths: Vec<PathBuf> = paths
                .iter()
                .map(|p| symdb::index::location::normalize_path(p, &cwd))
                .collect();
            let removed = db.invalidate_entries(paths.iter().map(PathBuf::as_path))?;
            db.sync()?;
            println!("Removed {} records", removed);
        }

        Commands::Capture { dir } => cli::capture::capture(project, &dir).await?,
        Commands::Watch { initial } => cli::watch::watch(project, initial).await?,
        Commands::Stats => cli::stats::show_stats(project, cli.format, cli.verbose)?,
    }

    Ok(())
}
