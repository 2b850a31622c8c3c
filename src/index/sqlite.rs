// SQLite-backed table: one database file per logical table

use parking_lot::Mutex;
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OpenFlags, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};

use super::schema::init_schema;
use super::store::{Connection, Cursor};
use super::Table;
use crate::error::{DbError, Result};

/// Type alias for connection pool
pub type ConnectionPool = Pool<SqliteConnectionManager>;

/// A `Connection` stored in `<base>/<table>.db`.
///
/// Reads go through the pool. Writes go through one dedicated connection,
/// which also serves reads while a batch transaction is open so the writer
/// sees its own uncommitted data.
pub struct SqliteConnection {
    pool: ConnectionPool,
    writer: Option<Mutex<PooledConnection<SqliteConnectionManager>>>,
    in_batch: AtomicBool,
    db_path: PathBuf,
    table: Table,
}

impl SqliteConnection {
    /// Create or open the file for `table`. Read-only opens never create
    /// anything and fail if the file is missing.
    pub fn open(base_dir: &Path, table: Table, read_only: bool) -> Result<Self> {
        let db_path = base_dir.join(format!("{}.db", table.as_str()));

        info!("Opening {} table at: {}", table, db_path.display());

        let manager = if read_only {
            if !db_path.exists() {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("{} does not exist", db_path.display()),
                )
                .into());
            }
            SqliteConnectionManager::file(&db_path).with_flags(
                OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )
        } else {
            std::fs::create_dir_all(base_dir)?;
            SqliteConnectionManager::file(&db_path)
                .with_init(|conn| conn.execute_batch("PRAGMA synchronous = NORMAL;"))
        };

        let pool = Pool::builder().max_size(10).build(manager)?;

        let writer = if read_only {
            None
        } else {
            let conn = pool.get()?;
            init_schema(&conn, table.as_str())?;
            Some(Mutex::new(conn))
        };

        Ok(Self {
            pool,
            writer,
            in_batch: AtomicBool::new(false),
            db_path,
            table,
        })
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    /// Run `f` on the connection that sees the latest data
    fn with_conn<T>(&self, f: impl FnOnce(&rusqlite::Connection) -> Result<T>) -> Result<T> {
        if self.in_batch.load(Ordering::Acquire) {
            if let Some(writer) = &self.writer {
                return f(&writer.lock());
            }
        }
        let conn = self.pool.get()?;
        f(&conn)
    }

    fn with_writer<T>(&self, f: impl FnOnce(&rusqlite::Connection) -> Result<T>) -> Result<T> {
        let writer = self.writer.as_ref().ok_or(DbError::ReadOnly)?;
        f(&writer.lock())
    }

    fn query_one(&self, sql: &str, key: Option<&[u8]>) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(sql)?;
            let map_row = |row: &rusqlite::Row| Ok((row.get(0)?, row.get(1)?));
            let entry = match key {
                Some(key) => stmt.query_row(params![key], map_row).optional()?,
                None => stmt.query_row([], map_row).optional()?,
            };
            Ok(entry)
        })
    }
}

impl Connection for SqliteConnection {
    fn read_data(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare_cached("SELECT value FROM kv WHERE key = ?1")?;
            Ok(stmt.query_row(params![key], |row| row.get(0)).optional()?)
        })
    }

    fn write_data(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.with_writer(|conn| {
            if value.is_empty() {
                debug!("Removing key from {} ({} bytes)", self.table, key.len());
                conn.prepare_cached("DELETE FROM kv WHERE key = ?1")?
                    .execute(params![key])?;
            } else {
                conn.prepare_cached("INSERT OR REPLACE INTO kv (key, value) VALUES (?1, ?2)")?
                    .execute(params![key, value])?;
            }
            Ok(())
        })
    }

    fn cursor(&self) -> Box<dyn Cursor + '_> {
        Box::new(SqliteCursor {
            connection: self,
            current: None,
            started: false,
        })
    }

    fn len(&self) -> Result<usize> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM kv", [], |row| row.get(0))?;
            Ok(count as usize)
        })
    }

    fn begin_batch(&self) -> Result<()> {
        self.with_writer(|conn| Ok(conn.execute_batch("BEGIN IMMEDIATE")?))?;
        self.in_batch.store(true, Ordering::Release);
        Ok(())
    }

    fn commit_batch(&self) -> Result<()> {
        self.in_batch.store(false, Ordering::Release);
        self.with_writer(|conn| Ok(conn.execute_batch("COMMIT")?))
    }

    fn rollback_batch(&self) -> Result<()> {
        self.in_batch.store(false, Ordering::Release);
        self.with_writer(|conn| Ok(conn.execute_batch("ROLLBACK")?))
    }
}

/// Each step is a single indexed lookup relative to the current key, so
/// the cursor holds no pooled connection between steps.
struct SqliteCursor<'a> {
    connection: &'a SqliteConnection,
    current: Option<(Vec<u8>, Vec<u8>)>,
    started: bool,
}

impl Cursor for SqliteCursor<'_> {
    fn seek(&mut self, key: &[u8]) -> Result<bool> {
        self.started = true;
        self.current = self.connection.query_one(
            "SELECT key, value FROM kv WHERE key >= ?1 ORDER BY key LIMIT 1",
            Some(key),
        )?;
        Ok(self.current.is_some())
    }

    fn next(&mut self) -> Result<bool> {
        self.current = match self.current.take() {
            Some((key, _)) => self.connection.query_one(
                "SELECT key, value FROM kv WHERE key > ?1 ORDER BY key LIMIT 1",
                Some(&key),
            )?,
            None if !self.started => self
                .connection
                .query_one("SELECT key, value FROM kv ORDER BY key LIMIT 1", None)?,
            None => None,
        };
        self.started = true;
        Ok(self.current.is_some())
    }

    fn key(&self) -> &[u8] {
        self.current.as_ref().map(|(k, _)| k.as_slice()).unwrap_or(&[])
    }

    fn value(&self) -> &[u8] {
        self.current.as_ref().map(|(_, v)| v.as_slice()).unwrap_or(&[])
    }

    fn is_valid(&self) -> bool {
        self.current.is_some()
    }
}
