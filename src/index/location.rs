// Source locations, the path <-> file id registry and line indexes

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

use crate::error::Result;

/// A byte position inside a tracked file.
///
/// Ordered by file id first, then offset. File id 0 is never assigned, so
/// `Location::NULL` cannot collide with a real position.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Location {
    file_id: u32,
    offset: u32,
}

impl Location {
    pub const NULL: Location = Location {
        file_id: 0,
        offset: 0,
    };

    /// Width of the encoded key form.
    pub const KEY_LEN: usize = 8;

    pub fn new(file_id: u32, offset: u32) -> Self {
        Self { file_id, offset }
    }

    /// First possible location in a file; used to seek range scans.
    pub fn file_start(file_id: u32) -> Self {
        Self { file_id, offset: 0 }
    }

    pub fn file_id(&self) -> u32 {
        self.file_id
    }

    pub fn offset(&self) -> u32 {
        self.offset
    }

    pub fn is_null(&self) -> bool {
        self.file_id == 0
    }

    /// Big-endian file id followed by big-endian offset, so byte order
    /// matches `Ord`.
    pub fn to_key(&self) -> [u8; Self::KEY_LEN] {
        let mut key = [0u8; Self::KEY_LEN];
        key[..4].copy_from_slice(&self.file_id.to_be_bytes());
        key[4..].copy_from_slice(&self.offset.to_be_bytes());
        key
    }

    pub fn from_key(key: &[u8]) -> Option<Self> {
        if key.len() != Self::KEY_LEN {
            return None;
        }
        let file_id = u32::from_be_bytes([key[0], key[1], key[2], key[3]]);
        let offset = u32::from_be_bytes([key[4], key[5], key[6], key[7]]);
        Some(Self { file_id, offset })
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            write!(f, "<null>")
        } else {
            write!(f, "{}:{}", self.file_id, self.offset)
        }
    }
}

/// Registry entry for one tracked path
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileInfo {
    pub id: u32,
    pub path: PathBuf,
    pub last_indexed: Option<i64>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedRegistry {
    next_id: u32,
    files: Vec<FileInfo>,
}

/// Bijection between tracked paths and file ids.
///
/// Ids are handed out on first sight, grow monotonically and are never
/// reused or dropped, even when the file's entities are invalidated.
#[derive(Debug)]
pub struct FileRegistry {
    by_path: HashMap<PathBuf, u32>,
    by_id: BTreeMap<u32, FileInfo>,
    next_id: u32,
    dirty: bool,
}

impl Default for FileRegistry {
    fn default() -> Self {
        Self {
            by_path: HashMap::new(),
            by_id: BTreeMap::new(),
            next_id: 1,
            dirty: false,
        }
    }
}

impl FileRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a registry previously written by `save`; a missing file yields
    /// an empty registry.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }

        let content = std::fs::read_to_string(path)?;
        let persisted: PersistedRegistry = serde_json::from_str(&content)?;

        let mut registry = Self::new();
        for info in persisted.files {
            registry.next_id = registry.next_id.max(info.id + 1);
            registry.by_path.insert(info.path.clone(), info.id);
            registry.by_id.insert(info.id, info);
        }
        registry.next_id = registry.next_id.max(persisted.next_id);

        debug!("Loaded {} files from {}", registry.len(), path.display());
        Ok(registry)
    }

    pub fn save(&mut self, path: &Path) -> Result<()> {
        if !self.dirty && path.exists() {
            return Ok(());
        }

        let persisted = PersistedRegistry {
            next_id: self.next_id,
            files: self.by_id.values().cloned().collect(),
        };

        // Write to a temp file first so a crash never leaves a torn registry
        let temp_path = path.with_extension("tmp");
        std::fs::write(&temp_path, serde_json::to_vec_pretty(&persisted)?)?;
        std::fs::rename(&temp_path, path)?;

        self.dirty = false;
        Ok(())
    }

    /// Return the id for `path`, assigning the next one if unseen.
    pub fn insert(&mut self, path: &Path) -> u32 {
        if let Some(id) = self.by_path.get(path) {
            return *id;
        }

        let id = self.next_id;
        self.next_id += 1;
        self.by_path.insert(path.to_path_buf(), id);
        self.by_id.insert(
            id,
            FileInfo {
                id,
                path: path.to_path_buf(),
                last_indexed: None,
            },
        );
        self.dirty = true;
        debug!("Registered file {} as {}", path.display(), id);
        id
    }

    pub fn id(&self, path: &Path) -> Option<u32> {
        self.by_path.get(path).copied()
    }

    pub fn path(&self, id: u32) -> Option<&Path> {
        self.by_id.get(&id).map(|info| info.path.as_path())
    }

    pub fn info(&self, id: u32) -> Option<&FileInfo> {
        self.by_id.get(&id)
    }

    pub fn mark_indexed(&mut self, id: u32) {
        if let Some(info) = self.by_id.get_mut(&id) {
            info.last_indexed = Some(chrono::Utc::now().timestamp());
            self.dirty = true;
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &FileInfo> {
        self.by_id.values()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

/// Lexically resolve `path` against `cwd`, dropping `.` and folding `..`.
/// The file does not need to exist.
pub fn normalize_path(path: &Path, cwd: &Path) -> PathBuf {
    let joined = if path.is_absolute() || cwd.as_os_str().is_empty() {
        path.to_path_buf()
    } else {
        cwd.join(path)
    };

    let mut out = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push(component.as_os_str());
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Offsets of line starts in a file, for offset <-> line:column conversion.
/// Lines and columns are 1-based; columns count bytes.
#[derive(Debug, Clone)]
pub struct LineIndex {
    line_starts: Vec<u32>,
    len: u32,
}

impl LineIndex {
    pub fn from_text(text: &str) -> Self {
        Self::from_bytes(text.as_bytes())
    }

    pub fn from_bytes(text: &[u8]) -> Self {
        let mut line_starts = vec![0];
        for (i, byte) in text.iter().copied().enumerate() {
            if byte == b'\n' {
                line_starts.push(i as u32 + 1);
            }
        }
        Self {
            line_starts,
            len: text.len() as u32,
        }
    }

    pub fn from_file(path: &Path) -> std::io::Result<Self> {
        Ok(Self::from_bytes(&std::fs::read(path)?))
    }

    /// Whether `offset` points into the file or just past its last byte
    pub fn contains(&self, offset: u32) -> bool {
        offset <= self.len
    }

    /// 1-based line and column of `offset`, or `None` past the end
    pub fn line_col(&self, offset: u32) -> Option<(u32, u32)> {
        if !self.contains(offset) {
            return None;
        }
        let line = match self.line_starts.binary_search(&offset) {
            Ok(idx) => idx,
            Err(idx) => idx - 1,
        };
        let column = offset - self.line_starts[line];
        Some((line as u32 + 1, column + 1))
    }

    /// Offset for a 1-based line and column, if it lies inside the file.
    pub fn offset(&self, line: u32, column: u32) -> Option<u32> {
        if line == 0 || column == 0 {
            return None;
        }
        let start = *self.line_starts.get(line as usize - 1)?;
        let end = self
            .line_starts
            .get(line as usize)
            .copied()
            .unwrap_or(self.len + 1);
        let offset = start.checked_add(column - 1)?;
        if offset < end {
            Some(offset)
        } else {
            None
        }
    }

    pub fn line_count(&self) -> usize {
        self.line_starts.len()
    }
}
