// Query execution engine

use regex::Regex;
use serde_json::{json, Map, Value};
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::Path;
use tracing::debug;

use crate::error::{DbError, Result};
use crate::index::codec::Codec;
use crate::index::location::normalize_path;
use crate::index::{
    Cursor, Database, DictionaryEntries, EntityRecord, LineIndex, Location, Table,
};

/// How `symbol_names` matches dictionary keys
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NameFilter {
    All,
    Prefix(String),
    Substring(String),
}

impl NameFilter {
    fn matches(&self, name: &[u8]) -> bool {
        match self {
            NameFilter::All => true,
            NameFilter::Prefix(prefix) => name.starts_with(prefix.as_bytes()),
            NameFilter::Substring(needle) => {
                let needle = needle.as_bytes();
                needle.is_empty() || name.windows(needle.len()).any(|w| w == needle)
            }
        }
    }
}

/// Query engine over one database snapshot
pub struct QueryEngine<'a> {
    db: &'a Database,
    lines: RefCell<HashMap<u32, Option<LineIndex>>>,
}

impl<'a> QueryEngine<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self {
            db,
            lines: RefCell::new(HashMap::new()),
        }
    }

    pub fn db(&self) -> &Database {
        self.db
    }

    /// Target recorded for an occurrence, if any. A result is always a
    /// stored definition or declaration.
    pub fn follow_location(&self, source: Location) -> Result<Option<Location>> {
        if source.is_null() {
            return Ok(None);
        }
        let target = self
            .db
            .read::<Location>(Table::Targets, &source.to_key())?
            .filter(|loc| !loc.is_null());
        debug!("follow {} -> {:?}", source, target);
        Ok(target)
    }

    /// Reference sites of the symbol at `location`, which may be the
    /// definition itself or any occurrence that targets it
    pub fn find_references(&self, location: Location) -> Result<BTreeSet<Location>> {
        if location.is_null() {
            return Ok(BTreeSet::new());
        }
        let anchor = if self.is_anchor(location)? {
            location
        } else {
            match self.follow_location(location)? {
                Some(target) => target,
                None => return Ok(BTreeSet::new()),
            }
        };

        Ok(self
            .db
            .read(Table::References, &anchor.to_key())?
            .unwrap_or_default())
    }

    fn is_anchor(&self, location: Location) -> Result<bool> {
        let key = location.to_key();
        Ok(self.db.read::<EntityRecord>(Table::General, &key)?.is_some()
            || self
                .db
                .read::<BTreeSet<Location>>(Table::References, &key)?
                .is_some())
    }

    /// Every definition and declaration stored under `name`
    pub fn find_symbol(&self, name: &str) -> Result<BTreeSet<Location>> {
        let entries: DictionaryEntries = self
            .db
            .read(Table::Dictionary, name.as_bytes())?
            .unwrap_or_default();
        Ok(entries
            .into_iter()
            .flat_map(|entry| entry.locations)
            .collect())
    }

    /// References of every symbol called `name`
    pub fn references_for_name(&self, name: &str) -> Result<BTreeSet<Location>> {
        let mut references = BTreeSet::new();
        for location in self.find_symbol(name)? {
            references.extend(self.find_references(location)?);
        }
        Ok(references)
    }

    /// Describe the symbol under a location: what it is called, whether
    /// the location defines, declares or merely uses it, and how many
    /// references it has. None when nothing known occurs there.
    pub fn cursor_info(&self, location: Location) -> Result<Option<CursorInfo>> {
        if location.is_null() {
            return Ok(None);
        }
        let target = self.follow_location(location)?;

        let mut record = None;
        for site in std::iter::once(location).chain(target) {
            record = self.db.read::<EntityRecord>(Table::General, &site.to_key())?;
            if record.is_some() {
                break;
            }
        }
        // Entities without a definition only live in the dictionary
        let (record, sites) = match record {
            Some(record) => {
                let sites = self.sites_of(&record)?;
                (record, sites)
            }
            None => {
                let candidates: BTreeSet<Location> =
                    std::iter::once(location).chain(target).collect();
                match self.declared_at(&candidates)? {
                    Some(found) => found,
                    None => return Ok(None),
                }
            }
        };

        let kind = if self
            .db
            .read::<EntityRecord>(Table::General, &location.to_key())?
            .is_some()
        {
            OccurrenceKind::Definition
        } else if sites.contains(&location) {
            OccurrenceKind::Declaration
        } else {
            OccurrenceKind::Reference
        };

        Ok(Some(CursorInfo {
            name: record.name,
            scope: record.scope,
            kind,
            target,
            references: self.find_references(location)?.len(),
        }))
    }

    fn sites_of(&self, record: &EntityRecord) -> Result<BTreeSet<Location>> {
        let entries: DictionaryEntries = self
            .db
            .read(Table::Dictionary, record.name.as_bytes())?
            .unwrap_or_default();
        Ok(entries
            .into_iter()
            .filter(|entry| entry.scope == record.scope)
            .flat_map(|entry| entry.locations)
            .collect())
    }

    /// First dictionary entry with a site among `sites`
    fn declared_at(
        &self,
        sites: &BTreeSet<Location>,
    ) -> Result<Option<(EntityRecord, BTreeSet<Location>)>> {
        let mut found = None;
        let mut cursor = self.db.cursor(Table::Dictionary)?;
        let mut valid = cursor.seek(&[])?;
        while valid && found.is_none() {
            let entries = DictionaryEntries::decode(cursor.value())
                .map_err(|e| DbError::decode(Table::Dictionary, e))?;
            for entry in entries {
                if entry.locations.iter().any(|loc| sites.contains(loc)) {
                    let name = String::from_utf8_lossy(cursor.key()).into_owned();
                    found = Some((
                        EntityRecord {
                            name,
                            scope: entry.scope,
                        },
                        entry.locations,
                    ));
                    break;
                }
            }
            valid = cursor.next()?;
        }
        Ok(found)
    }

    /// Lazily list dictionary names accepted by `filter`, in key order
    pub fn symbol_names(&self, filter: NameFilter) -> Result<SymbolNames<'a>> {
        Ok(SymbolNames {
            cursor: self.db.cursor(Table::Dictionary)?,
            filter,
            positioned: false,
            done: false,
        })
    }

    /// Parse `path`, `path:offset` or `path:line:column`, resolving a
    /// relative path against `cwd`. The path must be tracked.
    pub fn create_location(&self, text: &str, cwd: &Path) -> Result<Location> {
        let text = text.trim();
        if text.is_empty() {
            return Err(DbError::Parse("empty location".to_string()));
        }

        let parts: Vec<&str> = text.rsplitn(3, ':').collect();
        let numeric = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
        let number = |s: &str| {
            s.parse::<u32>()
                .map_err(|_| DbError::Parse(format!("number out of range in {}", text)))
        };

        let (path, position) = match parts.as_slice() {
            [col, line, path] if numeric(*col) && numeric(*line) => {
                (*path, Some((number(*line)?, Some(number(*col)?))))
            }
            [offset, rest @ ..] if numeric(*offset) && !rest.is_empty() => {
                let path_len = text.len() - offset.len() - 1;
                (&text[..path_len], Some((number(*offset)?, None)))
            }
            [last, ..] if last.is_empty() => {
                return Err(DbError::Parse(format!("malformed location: {}", text)));
            }
            _ => (text, None),
        };

        if path.is_empty() {
            return Err(DbError::Parse(format!("missing path in {}", text)));
        }

        let resolved = normalize_path(Path::new(path), cwd);
        let file_id = self
            .db
            .file_id(&resolved)
            .ok_or_else(|| DbError::Parse(format!("unknown path: {}", resolved.display())))?;

        let offset = match position {
            None => 0,
            Some((offset, None)) => {
                // Unreadable files are taken on trust, like in location_to_string
                if self.with_lines(file_id, |lines| lines.contains(offset)) == Some(false) {
                    return Err(DbError::Parse(format!(
                        "{}:{} is outside the file",
                        path, offset
                    )));
                }
                offset
            }
            Some((line, Some(column))) => self
                .with_lines(file_id, |lines| lines.offset(line, column))
                .flatten()
                .ok_or_else(|| {
                    DbError::Parse(format!("{}:{}:{} is outside the file", path, line, column))
                })?,
        };

        Ok(Location::new(file_id, offset))
    }

    /// Format as `path:line:column`, or `path:offset` when the file cannot
    /// be read or the offset lies past its end
    pub fn location_to_string(&self, location: Location) -> Result<String> {
        let path = self
            .db
            .file_path(location.file_id())
            .ok_or(DbError::UnknownFile {
                file_id: location.file_id(),
            })?;

        Ok(
            match self
                .with_lines(location.file_id(), |lines| lines.line_col(location.offset()))
                .flatten()
            {
                Some((line, column)) => format!("{}:{}:{}", path.display(), line, column),
                None => format!("{}:{}", path.display(), location.offset()),
            },
        )
    }

    fn with_lines<T>(&self, file_id: u32, f: impl FnOnce(&LineIndex) -> T) -> Option<T> {
        let mut cache = self.lines.borrow_mut();
        let lines = cache.entry(file_id).or_insert_with(|| {
            let path = self.db.file_path(file_id)?;
            match LineIndex::from_file(path) {
                Ok(lines) => Some(lines),
                Err(e) => {
                    debug!("Cannot build line index for {}: {}", path.display(), e);
                    None
                }
            }
        });
        lines.as_ref().map(f)
    }

    /// Symmetric difference between `expected` and the references
    /// currently resolved for `location`
    pub fn validate(
        &self,
        location: Location,
        expected: &BTreeSet<Location>,
    ) -> Result<BTreeSet<Location>> {
        let actual = self.find_references(location)?;
        Ok(expected.symmetric_difference(&actual).copied().collect())
    }

    /// Occurrences whose recorded target is no longer a stored definition
    /// or declaration
    pub fn dangling_targets(&self) -> Result<BTreeSet<Location>> {
        let mut live: HashSet<Location> = HashSet::new();
        self.db.scan(Table::Dictionary, |_, value| {
            let entries = DictionaryEntries::decode(value)
                .map_err(|e| DbError::decode(Table::Dictionary, e))?;
            live.extend(entries.into_iter().flat_map(|e| e.locations));
            Ok(())
        })?;

        let mut dangling = BTreeSet::new();
        self.db.scan(Table::Targets, |key, value| {
            let source = Location::decode(key).map_err(|e| DbError::decode(Table::Targets, e))?;
            let target = Location::decode(value).map_err(|e| DbError::decode(Table::Targets, e))?;
            if !live.contains(&target) {
                dangling.insert(source);
            }
            Ok(())
        })?;
        Ok(dangling)
    }

    /// JSON document of every tracked file under `root`: definitions with
    /// their names, occurrences with their targets. Targets in the same
    /// file carry only an offset.
    pub fn dump(&self, root: &Path, filter: Option<&Regex>) -> Result<Value> {
        let mut document = Map::new();

        for info in self.db.files().iter() {
            let Ok(relative) = info.path.strip_prefix(root) else {
                continue;
            };
            let relative = relative.to_string_lossy().into_owned();
            if let Some(filter) = filter {
                if !filter.is_match(&relative) {
                    continue;
                }
            }

            let mut symbols: BTreeMap<u32, Value> = BTreeMap::new();

            self.scan_file(Table::General, info.id, |location, value| {
                let record = EntityRecord::decode(value)
                    .map_err(|e| DbError::decode(Table::General, e))?;
                let mut name = record.scope.join("::");
                if !name.is_empty() {
                    name.push_str("::");
                }
                name.push_str(&record.name);
                symbols.insert(
                    location.offset(),
                    json!({ "location": { "offset": location.offset() }, "name": name }),
                );
                Ok(())
            })?;

            self.scan_file(Table::Targets, info.id, |location, value| {
                let target = Location::decode(value)
                    .map_err(|e| DbError::decode(Table::Targets, e))?;
                let target_json = if target.file_id() == info.id {
                    json!({ "offset": target.offset() })
                } else {
                    let file = self
                        .db
                        .file_path(target.file_id())
                        .map(|p| p.strip_prefix(root).unwrap_or(p).to_string_lossy().into_owned())
                        .unwrap_or_default();
                    json!({ "file": file, "offset": target.offset() })
                };
                let entry = symbols
                    .entry(location.offset())
                    .or_insert_with(|| json!({ "location": { "offset": location.offset() } }));
                entry["target"] = target_json;
                Ok(())
            })?;

            document.insert(relative, Value::Array(symbols.into_values().collect()));
        }

        Ok(Value::Object(document))
    }

    /// Visit the keys of `table` that lie inside one file
    fn scan_file(
        &self,
        table: Table,
        file_id: u32,
        mut visit: impl FnMut(Location, &[u8]) -> Result<()>,
    ) -> Result<()> {
        let mut cursor = self.db.cursor(table)?;
        let mut valid = cursor.seek(&Location::file_start(file_id).to_key())?;
        while valid {
            match Location::from_key(cursor.key()) {
                Some(location) if location.file_id() == file_id => {
                    visit(location, cursor.value())?
                }
                _ => break,
            }
            valid = cursor.next()?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OccurrenceKind {
    Definition,
    Declaration,
    Reference,
}

impl std::fmt::Display for OccurrenceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            OccurrenceKind::Definition => "definition",
            OccurrenceKind::Declaration => "declaration",
            OccurrenceKind::Reference => "reference",
        })
    }
}

/// What `cursor_info` knows about one location
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CursorInfo {
    pub name: String,
    pub scope: Vec<String>,
    pub kind: OccurrenceKind,
    pub target: Option<Location>,
    pub references: usize,
}

impl CursorInfo {
    /// Name with its scope chain, `ns::Class::name`
    pub fn qualified_name(&self) -> String {
        let mut qualified = self.scope.join("::");
        if !qualified.is_empty() {
            qualified.push_str("::");
        }
        qualified.push_str(&self.name);
        qualified
    }
}

/// Lazy, restartable listing of dictionary names
pub struct SymbolNames<'a> {
    cursor: Box<dyn Cursor + 'a>,
    filter: NameFilter,
    positioned: bool,
    done: bool,
}

impl SymbolNames<'_> {
    /// Start over from the first matching name
    pub fn restart(&mut self) {
        self.positioned = false;
        self.done = false;
    }

    fn advance(&mut self) -> Result<bool> {
        if self.positioned {
            return self.cursor.next();
        }
        self.positioned = true;
        match &self.filter {
            NameFilter::Prefix(prefix) => self.cursor.seek(prefix.as_bytes()),
            _ => self.cursor.seek(&[]),
        }
    }
}

impl Iterator for SymbolNames<'_> {
    type Item = Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            match self.advance() {
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
                Ok(false) => self.done = true,
                Ok(true) => {
                    let key = self.cursor.key();
                    if self.filter.matches(key) {
                        return Some(Ok(String::from_utf8_lossy(key).into_owned()));
                    }
                    // Keys are sorted, so the prefix range has ended
                    if matches!(self.filter, NameFilter::Prefix(_)) {
                        self.done = true;
                    }
                }
            }
        }
        None
    }
}
