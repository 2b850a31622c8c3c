// Symbol storage: tables, codec, locations and the database itself

pub mod codec;
pub mod db;
pub mod entity;
pub mod location;
pub mod schema;
pub mod sqlite;
pub mod store;
pub mod target;

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};

pub use db::{Database, DatabaseContext, DatabaseStats, Mode};
pub use location::{FileRegistry, LineIndex, Location};
pub use store::{Backend, Connection, Cursor, MemoryConnection};

/// The four logical tables of a database
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    /// Entity metadata keyed by definition location
    General,
    /// Entity groups keyed by bare symbol name
    Dictionary,
    /// Reference location sets keyed by the site they resolve to
    References,
    /// Occurrence location -> resolved target location
    Targets,
}

impl Table {
    pub const ALL: [Table; 4] = [
        Table::General,
        Table::Dictionary,
        Table::References,
        Table::Targets,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Table::General => "general",
            Table::Dictionary => "dictionary",
            Table::References => "references",
            Table::Targets => "targets",
        }
    }

    pub(crate) fn index(&self) -> usize {
        match self {
            Table::General => 0,
            Table::Dictionary => 1,
            Table::References => 2,
            Table::Targets => 3,
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the General table stores for a definition
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub name: String,
    pub scope: Vec<String>,
}

/// One group of locations for a name, distinguished by scope chain.
///
/// Equality compares scope and locations, but the hash only covers the
/// scope chain. Entries that differ only in locations collide and are told
/// apart by `==`. Keep the two impls in sync with that contract.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DictionaryEntry {
    pub scope: Vec<String>,
    pub locations: BTreeSet<Location>,
}

impl PartialEq for DictionaryEntry {
    fn eq(&self, other: &Self) -> bool {
        self.scope == other.scope && self.locations == other.locations
    }
}

impl Eq for DictionaryEntry {}

impl Hash for DictionaryEntry {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.scope.hash(state);
    }
}

/// All entries stored under one name in the Dictionary table
pub type DictionaryEntries = HashSet<DictionaryEntry>;

/// One symbol as seen in a parsed file, with locations already mapped to
/// file ids.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntityOccurrence {
    pub name: String,
    pub scope: Vec<String>,
    pub definition: Option<Location>,
    pub declarations: BTreeSet<Location>,
    pub references: BTreeSet<Location>,
}

/// A path-based position, as produced by a parser before file ids exist
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SourceLocation {
    pub path: PathBuf,
    pub offset: u32,
}

/// Path-based form of `EntityOccurrence`; this is the wire form read by
/// `symdb ingest` and returned by a `SymbolSource`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceOccurrence {
    pub name: String,
    #[serde(default)]
    pub scope: Vec<String>,
    #[serde(default)]
    pub definition: Option<SourceLocation>,
    #[serde(default)]
    pub declarations: Vec<SourceLocation>,
    #[serde(default)]
    pub references: Vec<SourceLocation>,
}

impl SourceOccurrence {
    /// Every path this occurrence touches
    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.definition
            .iter()
            .chain(self.declarations.iter())
            .chain(self.references.iter())
            .map(|loc| loc.path.as_path())
    }
}

/// Front end that turns a source file into symbol occurrences
pub trait SymbolSource: Send + Sync {
    fn can_parse(&self, path: &Path) -> bool;

    /// `flags` are the compiler flags (`-I`, `-D`) the file was built
    /// with, empty when no build was captured for it.
    fn parse(&self, path: &Path, flags: &[String]) -> anyhow::Result<Vec<SourceOccurrence>>;
}
