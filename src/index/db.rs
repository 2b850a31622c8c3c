// The symbol database: four tables plus the file registry

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::codec::Codec;
use super::location::FileRegistry;
use super::sqlite::SqliteConnection;
use super::store::{Backend, Connection, Cursor, MemoryConnection};
use super::Table;
use crate::config::Config;
use crate::error::{DbError, Result};

/// Name of the persisted file registry inside the base directory
pub const FILES_NAME: &str = "files.json";

/// Environment override for the directory holding per-project databases
pub const BASE_DIR_ENV: &str = "SYMDB_BASE_DIR";

/// Order batches are committed in. Each table is its own store, so a
/// reader in another process can observe the tables between commits;
/// Targets goes last so a target it sees already has its records.
pub(crate) const COMMIT_ORDER: [Table; 4] = [
    Table::General,
    Table::Dictionary,
    Table::References,
    Table::Targets,
];

/// Access mode a database is opened with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

impl Mode {
    pub fn can_read(&self) -> bool {
        !matches!(self, Mode::WriteOnly)
    }

    pub fn can_write(&self) -> bool {
        !matches!(self, Mode::ReadOnly)
    }
}

/// Where and how a database is stored. Passed explicitly to every
/// database instead of living in process-wide state.
#[derive(Debug, Clone)]
pub struct DatabaseContext {
    pub base_dir: PathBuf,
    pub backend: Backend,
}

impl DatabaseContext {
    pub fn new(base_dir: impl Into<PathBuf>, backend: Backend) -> Self {
        Self {
            base_dir: base_dir.into(),
            backend,
        }
    }

    /// Volatile tables, no files touched
    pub fn memory() -> Self {
        Self::new(PathBuf::new(), Backend::Memory)
    }

    /// Per-project location: `$SYMDB_BASE_DIR/<hash>`, the configured
    /// `storage.base_dir/<hash>`, or `<project>/.symdb` by default.
    pub fn for_project(project_root: &Path, config: &Config) -> Self {
        let backend = config.storage.backend;
        let shared = std::env::var(BASE_DIR_ENV)
            .ok()
            .filter(|dir| !dir.is_empty())
            .or_else(|| config.storage.base_dir.clone());

        let base_dir = match shared {
            Some(shared) => {
                let root = project_root
                    .canonicalize()
                    .unwrap_or_else(|_| project_root.to_path_buf());
                let hash = blake3::hash(root.to_string_lossy().as_bytes()).to_hex();
                PathBuf::from(shared).join(&hash.as_str()[..16])
            }
            None => project_root.join(".symdb"),
        };

        Self::new(base_dir, backend)
    }
}

/// Row counts per table
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseStats {
    pub files: usize,
    pub definitions: usize,
    pub names: usize,
    pub reference_sets: usize,
    pub targets: usize,
}

/// Persistent symbol database.
///
/// Opened once per mode and closed once; while closed every operation
/// fails with `NotOpened`. Mutating methods take `&mut self`, so a
/// `Database` shared between threads needs an outer lock (see
/// `indexer::SharedDatabase`).
pub struct Database {
    context: DatabaseContext,
    mode: Mode,
    connections: Option<Vec<Box<dyn Connection>>>,
    files: FileRegistry,
    batch_depth: usize,
}

impl Database {
    /// A closed database bound to `context`
    pub fn new(context: DatabaseContext) -> Self {
        Self {
            context,
            mode: Mode::ReadOnly,
            connections: None,
            files: FileRegistry::new(),
            batch_depth: 0,
        }
    }

    /// Construct and open in one step
    pub fn create(context: DatabaseContext, mode: Mode) -> Result<Self> {
        let mut db = Self::new(context);
        db.open(mode)?;
        Ok(db)
    }

    /// Open all four tables. On failure nothing stays open.
    pub fn open(&mut self, mode: Mode) -> Result<()> {
        if self.is_opened() {
            self.close();
        }

        info!(
            "Opening {} database at: {}",
            self.context.backend.as_str(),
            self.context.base_dir.display()
        );

        let mut connections: Vec<Box<dyn Connection>> = Vec::with_capacity(Table::ALL.len());
        for table in Table::ALL {
            connections.push(self.create_connection(table, mode)?);
        }

        let files = match self.context.backend {
            Backend::Memory => FileRegistry::new(),
            Backend::Sqlite => FileRegistry::load(&self.files_path())?,
        };

        self.files = files;
        self.mode = mode;
        self.connections = Some(connections);
        debug!("Database opened with {} files", self.files.len());
        Ok(())
    }

    fn create_connection(&self, table: Table, mode: Mode) -> Result<Box<dyn Connection>> {
        Ok(match self.context.backend {
            Backend::Memory => Box::new(MemoryConnection::new()),
            Backend::Sqlite => Box::new(SqliteConnection::open(
                &self.context.base_dir,
                table,
                mode == Mode::ReadOnly,
            )?),
        })
    }

    /// Flush the registry and release every connection
    pub fn close(&mut self) {
        if !self.is_opened() {
            return;
        }
        if let Err(e) = self.sync() {
            warn!("Failed to sync database on close: {}", e);
        }
        self.connections = None;
        self.batch_depth = 0;
        info!("Closed database at: {}", self.context.base_dir.display());
    }

    pub fn is_opened(&self) -> bool {
        self.connections.is_some()
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn path(&self) -> &Path {
        &self.context.base_dir
    }

    pub fn context(&self) -> &DatabaseContext {
        &self.context
    }

    fn files_path(&self) -> PathBuf {
        self.context.base_dir.join(FILES_NAME)
    }

    /// Persist the file registry
    pub fn sync(&mut self) -> Result<()> {
        if !self.is_opened() {
            return Err(DbError::NotOpened);
        }
        if self.context.backend == Backend::Sqlite && self.mode.can_write() {
            let path = self.files_path();
            self.files.save(&path)?;
        }
        Ok(())
    }

    pub(crate) fn connection(&self, table: Table) -> Result<&dyn Connection> {
        let connections = self.connections.as_ref().ok_or(DbError::NotOpened)?;
        Ok(connections[table.index()].as_ref())
    }

    fn ensure_readable(&self) -> Result<()> {
        if !self.mode.can_read() {
            return Err(DbError::WriteOnly);
        }
        Ok(())
    }

    pub(crate) fn ensure_writable(&self) -> Result<()> {
        if !self.is_opened() {
            return Err(DbError::NotOpened);
        }
        if !self.mode.can_write() {
            return Err(DbError::ReadOnly);
        }
        Ok(())
    }

    // ---- Typed table access ----

    /// Read and decode `key`. A missing key, or an empty key, is `None`.
    pub fn read<T: Codec>(&self, table: Table, key: &[u8]) -> Result<Option<T>> {
        self.ensure_readable()?;
        self.fetch(table, key)
    }

    /// Read `key`, falling back to `default` when it is absent
    pub fn read_or<T: Codec>(&self, table: Table, key: &[u8], default: T) -> Result<T> {
        Ok(self.read(table, key)?.unwrap_or(default))
    }

    pub fn write<T: Codec>(&mut self, table: Table, key: &[u8], value: &T) -> Result<()> {
        self.ensure_writable()?;
        self.store(table, key, value)
    }

    pub fn remove(&mut self, table: Table, key: &[u8]) -> Result<()> {
        self.ensure_writable()?;
        self.erase(table, key)
    }

    /// Cursor over `table` in key order
    pub fn cursor(&self, table: Table) -> Result<Box<dyn Cursor + '_>> {
        self.ensure_readable()?;
        Ok(self.connection(table)?.cursor())
    }

    /// Mode-unchecked read used by the writer, which must see existing
    /// values even when opened write-only.
    pub(crate) fn fetch<T: Codec>(&self, table: Table, key: &[u8]) -> Result<Option<T>> {
        let conn = self.connection(table)?;
        if key.is_empty() {
            return Ok(None);
        }
        match conn.read_data(key)? {
            Some(bytes) if !bytes.is_empty() => T::decode(&bytes)
                .map(Some)
                .map_err(|e| DbError::decode(table, e)),
            _ => Ok(None),
        }
    }

    pub(crate) fn store<T: Codec>(&self, table: Table, key: &[u8], value: &T) -> Result<()> {
        let conn = self.connection(table)?;
        if key.is_empty() {
            return Err(DbError::InvalidKey { table });
        }
        let bytes = value.encode().map_err(|e| {
            warn!("Cannot encode value for {} table: {}", table, e);
            DbError::encode(table, e)
        })?;
        conn.write_data(key, &bytes)
    }

    pub(crate) fn erase(&self, table: Table, key: &[u8]) -> Result<()> {
        let conn = self.connection(table)?;
        if key.is_empty() {
            return Err(DbError::InvalidKey { table });
        }
        conn.remove_data(key)
    }

    /// Run `f` with every table's writes grouped into one batch; on error
    /// the batch is rolled back where the backend supports it. Nested calls
    /// join the outer batch.
    pub(crate) fn batch<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        if self.batch_depth == 0 {
            for (begun, table) in Table::ALL.into_iter().enumerate() {
                if let Err(e) = self.connection(table)?.begin_batch() {
                    for earlier in &Table::ALL[..begun] {
                        let _ = self.connection(*earlier)?.rollback_batch();
                    }
                    return Err(e);
                }
            }
        }
        self.batch_depth += 1;

        let result = f(self);

        self.batch_depth -= 1;
        if self.batch_depth == 0 {
            match &result {
                Ok(_) => {
                    for table in COMMIT_ORDER {
                        self.connection(table)?.commit_batch()?;
                    }
                }
                Err(e) => {
                    warn!("Rolling back batch after error: {}", e);
                    for table in Table::ALL {
                        if let Err(rollback) = self.connection(table)?.rollback_batch() {
                            warn!("Rollback of {} table failed: {}", table, rollback);
                        }
                    }
                }
            }
        }

        result
    }

    // ---- File registry ----

    pub fn files(&self) -> &FileRegistry {
        &self.files
    }

    pub fn file_id(&self, path: &Path) -> Option<u32> {
        self.files.id(path)
    }

    pub fn file_path(&self, file_id: u32) -> Option<&Path> {
        self.files.path(file_id)
    }

    /// Id for `path`, registering it on first sight
    pub fn register_file(&mut self, path: &Path) -> Result<u32> {
        self.ensure_writable()?;
        Ok(self.files.insert(path))
    }

    pub(crate) fn files_mut(&mut self) -> &mut FileRegistry {
        &mut self.files
    }

    /// Row counts for every table
    pub fn stats(&self) -> Result<DatabaseStats> {
        self.ensure_readable()?;
        Ok(DatabaseStats {
            files: self.files.len(),
            definitions: self.connection(Table::General)?.len()?,
            names: self.connection(Table::Dictionary)?.len()?,
            reference_sets: self.connection(Table::References)?.len()?,
            targets: self.connection(Table::Targets)?.len()?,
        })
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{EntityRecord, Location};
    use tempfile::tempdir;

    fn sqlite_context(dir: &Path) -> DatabaseContext {
        DatabaseContext::new(dir.join("db"), Backend::Sqlite)
    }

    #[test]
    fn test_create_database() {
        let dir = tempdir().unwrap();
        let db = Database::create(sqlite_context(dir.path()), Mode::ReadWrite).unwrap();
        assert!(db.is_opened());
        for table in Table::ALL {
            assert!(dir.path().join("db").join(format!("{}.db", table)).exists());
        }
    }

    #[test]
    fn test_failed_open_stays_closed() {
        let dir = tempdir().unwrap();
        let mut db = Database::new(sqlite_context(dir.path()));
        assert!(db.open(Mode::ReadOnly).is_err());
        assert!(!db.is_opened());
        assert!(matches!(
            db.read::<Location>(Table::Targets, b"k"),
            Err(DbError::NotOpened)
        ));
    }

    #[test]
    fn test_missing_key_returns_default() {
        let db = Database::create(DatabaseContext::memory(), Mode::ReadWrite).unwrap();
        let key = Location::new(1, 1).to_key();
        assert_eq!(db.read::<EntityRecord>(Table::General, &key).unwrap(), None);
        assert_eq!(
            db.read_or(Table::General, &key, 7u32).unwrap(),
            7,
            "absent keys fall back to the caller's default"
        );
    }

    #[test]
    fn test_empty_key_is_invalid() {
        let mut db = Database::create(DatabaseContext::memory(), Mode::ReadWrite).unwrap();
        assert!(matches!(
            db.write(Table::Dictionary, b"", &1u32),
            Err(DbError::InvalidKey {
                table: Table::Dictionary
            })
        ));
        assert!(matches!(
            db.remove(Table::Targets, b""),
            Err(DbError::InvalidKey {
                table: Table::Targets
            })
        ));
    }

    #[test]
    fn test_write_read_remove() {
        let mut db = Database::create(DatabaseContext::memory(), Mode::ReadWrite).unwrap();
        let key = Location::new(3, 30).to_key();
        let record = EntityRecord {
            name: "foo".to_string(),
            scope: vec!["ns".to_string()],
        };

        db.write(Table::General, &key, &record).unwrap();
        assert_eq!(db.read(Table::General, &key).unwrap(), Some(record));

        db.remove(Table::General, &key).unwrap();
        assert_eq!(db.read::<EntityRecord>(Table::General, &key).unwrap(), None);
    }

    #[test]
    fn test_modes_are_enforced() {
        let dir = tempdir().unwrap();
        let context = sqlite_context(dir.path());
        drop(Database::create(context.clone(), Mode::ReadWrite).unwrap());

        let mut read_only = Database::create(context.clone(), Mode::ReadOnly).unwrap();
        assert!(matches!(
            read_only.write(Table::General, b"k", &1u32),
            Err(DbError::ReadOnly)
        ));
        drop(read_only);

        let write_only = Database::create(context, Mode::WriteOnly).unwrap();
        assert!(matches!(
            write_only.read::<u32>(Table::General, b"k"),
            Err(DbError::WriteOnly)
        ));
    }

    #[test]
    fn test_registry_survives_reopen() {
        let dir = tempdir().unwrap();
        let context = sqlite_context(dir.path());

        let id = {
            let mut db = Database::create(context.clone(), Mode::ReadWrite).unwrap();
            db.register_file(Path::new("/src/main.c")).unwrap()
        };

        let db = Database::create(context, Mode::ReadOnly).unwrap();
        assert_eq!(db.file_id(Path::new("/src/main.c")), Some(id));
        assert_eq!(db.file_path(id), Some(Path::new("/src/main.c")));
    }

    #[test]
    fn test_batch_rolls_back_on_error() {
        let dir = tempdir().unwrap();
        let mut db = Database::create(sqlite_context(dir.path()), Mode::ReadWrite).unwrap();

        let result: Result<()> = db.batch(|db| {
            db.store(Table::Dictionary, b"foo", &1u32)?;
            Err(DbError::Parse("boom".to_string()))
        });
        assert!(result.is_err());
        assert_eq!(db.read::<u32>(Table::Dictionary, b"foo").unwrap(), None);
    }

    #[test]
    fn test_for_project_defaults_inside_project() {
        let config = Config::default();
        let context = DatabaseContext::for_project(Path::new("/work/app"), &config);
        if std::env::var(BASE_DIR_ENV).is_err() {
            assert_eq!(context.base_dir, PathBuf::from("/work/app/.symdb"));
        }
        assert_eq!(context.backend, Backend::Sqlite);
    }

    struct Unencodable;

    impl Codec for Unencodable {
        fn encode(&self) -> crate::index::codec::CodecResult<Vec<u8>> {
            Err(Box::new(bincode::ErrorKind::Custom("not storable".to_string())))
        }

        fn decode(_bytes: &[u8]) -> crate::index::codec::CodecResult<Self> {
            Ok(Unencodable)
        }
    }

    #[test]
    fn test_encode_failure_keeps_stored_value() {
        let mut db = Database::create(DatabaseContext::memory(), Mode::ReadWrite).unwrap();
        db.write(Table::General, b"k", &7u32).unwrap();

        assert!(matches!(
            db.write(Table::General, b"k", &Unencodable),
            Err(DbError::Encode { table: Table::General, .. })
        ));
        assert_eq!(db.read::<u32>(Table::General, b"k").unwrap(), Some(7));
    }

    #[test]
    fn test_targets_commit_last() {
        assert_eq!(COMMIT_ORDER.last(), Some(&Table::Targets));
        for table in Table::ALL {
            assert!(COMMIT_ORDER.contains(&table), "{} is never committed", table);
        }
    }
}
