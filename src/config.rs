// Configuration management for symdb

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::index::Backend;

/// Name of the per-project configuration file
pub const CONFIG_NAME: &str = ".symdb.toml";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub project: ProjectConfig,
    pub storage: StorageConfig,
    pub indexing: IndexingConfig,
    pub query: QueryConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    pub name: String,
    pub root: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: Backend,
    /// Shared directory for per-project databases. Unset means
    /// `<project>/.symdb`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_dir: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexingConfig {
    pub threads: usize,
    pub exclude: Vec<String>,
    pub include: Vec<String>,
    /// Source extensions picked up by the watcher and build capture
    pub extensions: Vec<String>,
    pub watch: bool,
    /// External parser, run as `<parser...> <file>`; prints one JSON
    /// occurrence per line
    pub parser: Vec<String>,
    /// Dry-run build command, run as `<build_command...> -C <dir>`
    pub build_command: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    /// Cap on lines per list-style job, 0 for no cap
    pub max_results: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            name: "unnamed-project".to_string(),
            root: ".".to_string(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: Backend::Sqlite,
            base_dir: None,
        }
    }
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            threads: 4,
            exclude: vec![
                ".git/".to_string(),
                ".symdb/".to_string(),
                "build/".to_string(),
                "*.o".to_string(),
            ],
            include: vec![],
            extensions: ["c", "cc", "cpp", "cxx", "h", "hh", "hpp"]
                .iter()
                .map(|e| e.to_string())
                .collect(),
            watch: false,
            parser: vec![],
            build_command: vec!["make".to_string(), "-n".to_string()],
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from project directory
    /// Looks for .symdb.toml in the project root
    pub fn from_project_dir<P: AsRef<Path>>(project_dir: P) -> Self {
        let config_path = project_dir.as_ref().join(CONFIG_NAME);

        match Self::from_file(&config_path) {
            Ok(config) => {
                tracing::info!("Loaded configuration from {}", config_path.display());
                config
            }
            Err(e) => {
                tracing::debug!("Could not load config from {}: {}", config_path.display(), e);
                tracing::info!("Using default configuration");
                Self::default()
            }
        }
    }

    /// Check if a file path should be indexed based on include/exclude patterns
    pub fn should_index_file(&self, file_path: &str) -> bool {
        for pattern in &self.indexing.exclude {
            if self.matches_pattern(file_path, pattern) {
                return false;
            }
        }

        if !self.indexing.include.is_empty() {
            return self
                .indexing
                .include
                .iter()
                .any(|pattern| self.matches_pattern(file_path, pattern));
        }

        true
    }

    /// Whether the file has one of the configured source extensions
    pub fn is_source_file(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| self.indexing.extensions.iter().any(|e| e == ext))
            .unwrap_or(false)
    }

    /// Simple pattern matching (supports glob-style patterns)
    fn matches_pattern(&self, file_path: &str, pattern: &str) -> bool {
        if let Some(dir) = pattern.strip_suffix('/') {
            // Directory pattern
            file_path.starts_with(pattern) || file_path.contains(&format!("/{}/", dir))
        } else if let Some(suffix) = pattern.strip_prefix("*.") {
            file_path.ends_with(&format!(".{}", suffix))
        } else if let Some(inner) = pattern
            .strip_prefix("**/")
            .and_then(|p| p.strip_suffix("/**"))
        {
            file_path.contains(&format!("/{}/", inner)) || file_path.starts_with(&format!("{}/", inner))
        } else {
            file_path.contains(pattern)
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.project.name.is_empty() {
            return Err(anyhow::anyhow!("Project name cannot be empty"));
        }

        if self.indexing.threads == 0 {
            return Err(anyhow::anyhow!("Thread count must be greater than 0"));
        }
        if self.indexing.build_command.is_empty() {
            return Err(anyhow::anyhow!("Build command cannot be empty"));
        }

        if let Some(dir) = &self.storage.base_dir {
            if dir.is_empty() {
                return Err(anyhow::anyhow!("Storage base_dir cannot be empty when set"));
            }
        }

        let valid_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(anyhow::anyhow!("Invalid log level: {}", self.logging.level));
        }
        let valid_formats = ["compact", "pretty"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            return Err(anyhow::anyhow!("Invalid log format: {}", self.logging.format));
        }

        Ok(())
    }
}

/// Load configuration for a project
pub fn load_config(project_dir: &Path) -> Config {
    Config::from_project_dir(project_dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.project.name, "unnamed-project");
        assert_eq!(config.storage.backend, Backend::Sqlite);
        assert!(config.storage.base_dir.is_none());
        assert!(config.indexing.exclude.contains(&".git/".to_string()));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_should_index_file() {
        let config = Config::default();

        assert!(config.should_index_file("src/main.c"));
        assert!(config.should_index_file("include/util.h"));

        assert!(!config.should_index_file(".git/HEAD"));
        assert!(!config.should_index_file("lib/build/gen.c"));
        assert!(!config.should_index_file("src/main.o"));
    }

    #[test]
    fn test_include_patterns_restrict() {
        let mut config = Config::default();
        config.indexing.include = vec!["src/".to_string()];

        assert!(config.should_index_file("src/a.c"));
        assert!(!config.should_index_file("tests/a.c"));
    }

    #[test]
    fn test_pattern_matching() {
        let config = Config::default();

        assert!(config.matches_pattern("target/debug/file", "target/"));
        assert!(config.matches_pattern("src/target/file", "target/"));
        assert!(!config.matches_pattern("src/targets.c", "target/"));

        assert!(config.matches_pattern("test.c", "*.c"));
        assert!(!config.matches_pattern("test.cc", "*.c"));

        assert!(config.matches_pattern("src/generated/x.c", "**/generated/**"));
        assert!(!config.matches_pattern("src/x.c", "**/generated/**"));
    }

    #[test]
    fn test_is_source_file() {
        let config = Config::default();
        assert!(config.is_source_file(Path::new("/p/a.cpp")));
        assert!(config.is_source_file(Path::new("b.h")));
        assert!(!config.is_source_file(Path::new("Makefile")));
        assert!(!config.is_source_file(Path::new("notes.txt")));
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());

        config.project.name = "".to_string();
        assert!(config.validate().is_err());
        config.project.name = "test".to_string();

        config.indexing.threads = 0;
        assert!(config.validate().is_err());
        config.indexing.threads = 2;

        config.logging.level = "invalid".to_string();
        assert!(config.validate().is_err());
        config.logging.level = "debug".to_string();

        config.logging.format = "json".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_file_and_fallback() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_NAME),
            "[storage]\nbackend = \"memory\"\n\n[query]\nmax_results = 25\n",
        )
        .unwrap();

        let config = Config::from_project_dir(dir.path());
        assert_eq!(config.storage.backend, Backend::Memory);
        assert_eq!(config.query.max_results, 25);
        assert_eq!(config.indexing.threads, 4);

        std::fs::write(dir.path().join(CONFIG_NAME), "[storage]\nbackend = \"rocks\"\n").unwrap();
        assert!(Config::from_file(dir.path().join(CONFIG_NAME)).is_err());
        let fallback = Config::from_project_dir(dir.path());
        assert_eq!(fallback.storage.backend, Backend::Sqlite);
    }
}
