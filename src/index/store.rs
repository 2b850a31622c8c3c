// Ordered key/value storage contract and the in-memory backend

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::Bound;

use crate::error::Result;

/// Which concrete engine backs the tables
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Sqlite,
    Memory,
}

impl Backend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::Sqlite => "sqlite",
            Backend::Memory => "memory",
        }
    }

    pub fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "sqlite" => Ok(Backend::Sqlite),
            "memory" => Ok(Backend::Memory),
            _ => anyhow::bail!("Unknown storage backend: {}", s),
        }
    }
}

/// One logical table: an ordered byte-string store.
///
/// Writing an empty value removes the key.
pub trait Connection: Send + Sync {
    fn read_data(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;
    fn write_data(&self, key: &[u8], value: &[u8]) -> Result<()>;

    fn remove_data(&self, key: &[u8]) -> Result<()> {
        self.write_data(key, &[])
    }

    /// A cursor over the keys in byte order. It starts unpositioned; the
    /// first `next()` moves to the smallest key.
    fn cursor(&self) -> Box<dyn Cursor + '_>;

    fn len(&self) -> Result<usize> {
        let mut cursor = self.cursor();
        let mut count = 0;
        while cursor.next()? {
            count += 1;
        }
        Ok(count)
    }

    /// Start grouping writes so they become visible to other connections
    /// together. Backends without transactions may ignore this.
    fn begin_batch(&self) -> Result<()> {
        Ok(())
    }

    fn commit_batch(&self) -> Result<()> {
        Ok(())
    }

    fn rollback_batch(&self) -> Result<()> {
        Ok(())
    }
}

/// Range-scan cursor over a `Connection`
pub trait Cursor {
    /// Move to the first key >= `key`. Returns whether the cursor is valid.
    fn seek(&mut self, key: &[u8]) -> Result<bool>;
    /// Move to the following key. Returns whether the cursor is valid.
    fn next(&mut self) -> Result<bool>;
    fn key(&self) -> &[u8];
    fn value(&self) -> &[u8];
    fn is_valid(&self) -> bool;
}

type UndoLog = Vec<(Vec<u8>, Option<Vec<u8>>)>;

/// `BTreeMap`-backed table used by tests and `backend = "memory"`.
///
/// While a batch is open every write records the value it replaced, so a
/// rollback can restore the map exactly.
#[derive(Debug, Default)]
pub struct MemoryConnection {
    map: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
    undo: Mutex<Option<UndoLog>>,
}

impl MemoryConnection {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Connection for MemoryConnection {
    fn read_data(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.map.read().get(key).cloned())
    }

    fn write_data(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let mut map = self.map.write();
        let previous = if value.is_empty() {
            map.remove(key)
        } else {
            map.insert(key.to_vec(), value.to_vec())
        };
        if let Some(log) = self.undo.lock().as_mut() {
            log.push((key.to_vec(), previous));
        }
        Ok(())
    }

    fn cursor(&self) -> Box<dyn Cursor + '_> {
        Box::new(MemoryCursor {
            connection: self,
            current: None,
            started: false,
        })
    }

    fn len(&self) -> Result<usize> {
        Ok(self.map.read().len())
    }

    fn begin_batch(&self) -> Result<()> {
        *self.undo.lock() = Some(Vec::new());
        Ok(())
    }

    fn commit_batch(&self) -> Result<()> {
        *self.undo.lock() = None;
        Ok(())
    }

    fn rollback_batch(&self) -> Result<()> {
        let Some(log) = self.undo.lock().take() else {
            return Ok(());
        };
        let mut map = self.map.write();
        for (key, previous) in log.into_iter().rev() {
            match previous {
                Some(value) => map.insert(key, value),
                None => map.remove(&key),
            };
        }
        Ok(())
    }
}

/// Re-reads the map on every step, so writes made between steps are seen
/// and no lock is held while the caller works.
struct MemoryCursor<'a> {
    connection: &'a MemoryConnection,
    current: Option<(Vec<u8>, Vec<u8>)>,
    started: bool,
}

impl MemoryCursor<'_> {
    fn position(&mut self, lower: Bound<&[u8]>) -> bool {
        let map = self.connection.map.read();
        self.current = map
            .range::<[u8], _>((lower, Bound::Unbounded))
            .next()
            .map(|(k, v)| (k.clone(), v.clone()));
        self.started = true;
        self.current.is_some()
    }
}

impl Cursor for MemoryCursor<'_> {
    fn seek(&mut self, key: &[u8]) -> Result<bool> {
        Ok(self.position(Bound::Included(key)))
    }

    fn next(&mut self) -> Result<bool> {
        match self.current.take() {
            Some((key, _)) => Ok(self.position(Bound::Excluded(key.as_slice()))),
            None if !self.started => Ok(self.position(Bound::Unbounded)),
            None => Ok(false),
        }
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
