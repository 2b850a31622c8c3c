// Entity ingestion and per-file invalidation

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::Path;
use tracing::{debug, info};

use super::codec::Codec;
use super::db::Database;
use super::target::{best_target, Candidate, CandidateKind};
use super::{
    DictionaryEntries, DictionaryEntry, EntityOccurrence, EntityRecord, Location, SourceLocation,
    SourceOccurrence, Table,
};
use crate::error::{DbError, Result};

impl Database {
    /// Merge one symbol occurrence into the tables.
    ///
    /// Purely additive: callers invalidate a file before writing its
    /// entities again. Writing the same occurrence twice is a no-op since
    /// every merge is a set union.
    pub fn write_entity(
        &mut self,
        name: &str,
        scope: &[String],
        definition: Option<Location>,
        declarations: &BTreeSet<Location>,
        references: &BTreeSet<Location>,
    ) -> Result<()> {
        self.ensure_writable()?;
        self.batch(|db| db.merge_entity(name, scope, definition, declarations, references))
    }

    pub fn write_occurrence(&mut self, occurrence: &EntityOccurrence) -> Result<()> {
        self.write_entity(
            &occurrence.name,
            &occurrence.scope,
            occurrence.definition,
            &occurrence.declarations,
            &occurrence.references,
        )
    }

    fn merge_entity(
        &mut self,
        name: &str,
        scope: &[String],
        definition: Option<Location>,
        declarations: &BTreeSet<Location>,
        references: &BTreeSet<Location>,
    ) -> Result<()> {
        let definition = definition.filter(|loc| !loc.is_null());
        let declarations: BTreeSet<Location> =
            declarations.iter().copied().filter(|loc| !loc.is_null()).collect();
        let references: BTreeSet<Location> =
            references.iter().copied().filter(|loc| !loc.is_null()).collect();

        // Union into the entry sharing this scope chain
        let mut entries: DictionaryEntries =
            self.fetch(Table::Dictionary, name.as_bytes())?.unwrap_or_default();
        let existing = entries.iter().find(|e| e.scope.as_slice() == scope).cloned();
        let previous = existing
            .as_ref()
            .map(|e| e.locations.clone())
            .unwrap_or_default();
        let mut sites = previous.clone();
        sites.extend(declarations.iter().copied());
        sites.extend(definition);

        if sites.is_empty() {
            debug!("Skipping {}: no definition or declaration known", name);
            return Ok(());
        }

        debug!(
            "Writing entity {} ({} sites, {} new references)",
            name,
            sites.len(),
            references.len()
        );

        if let Some(def) = definition {
            let record = EntityRecord {
                name: name.to_string(),
                scope: scope.to_vec(),
            };
            self.store(Table::General, &def.to_key(), &record)?;
        }

        if sites != previous {
            if let Some(existing) = existing {
                entries.remove(&existing);
            }
            entries.insert(DictionaryEntry {
                scope: scope.to_vec(),
                locations: sites.clone(),
            });
            self.store(Table::Dictionary, name.as_bytes(), &entries)?;
        }

        self.retarget(&previous, &sites, references)
    }

    /// Resolve one entity's occurrences against its current `sites`.
    ///
    /// Every declaration and reference gets `best_target` over all sites,
    /// and each reference is filed under its target in References, so the
    /// table is always the inverse of Targets. References anchored at any
    /// of `stale` or `sites` are collected and resolved again along with
    /// `references`. The result depends only on the sites and the set of
    /// references, never on the order files were written in.
    fn retarget(
        &self,
        stale: &BTreeSet<Location>,
        sites: &BTreeSet<Location>,
        mut references: BTreeSet<Location>,
    ) -> Result<()> {
        for site in stale.union(sites) {
            let key = site.to_key();
            if let Some(set) = self.fetch::<BTreeSet<Location>>(Table::References, &key)? {
                references.extend(set);
                self.erase(Table::References, &key)?;
            }
        }

        let mut candidates = Vec::with_capacity(sites.len());
        for site in sites {
            candidates.push(if self.is_definition(*site)? {
                Candidate::definition(*site)
            } else {
                Candidate::declaration(*site)
            });
        }

        // Definitions navigate nowhere; declarations to their best peer
        for candidate in &candidates {
            if candidate.kind == CandidateKind::Definition {
                continue;
            }
            let key = candidate.location.to_key();
            match best_target(Some(candidate.location), candidates.iter().copied()) {
                Some(target) => self.store(Table::Targets, &key, &target)?,
                None => self.erase(Table::Targets, &key)?,
            }
        }

        let mut anchored: BTreeMap<Location, BTreeSet<Location>> = BTreeMap::new();
        for reference in references {
            match best_target(Some(reference), candidates.iter().copied()) {
                Some(target) => {
                    self.store(Table::Targets, &reference.to_key(), &target)?;
                    anchored.entry(target).or_default().insert(reference);
                }
                None => self.erase(Table::Targets, &reference.to_key())?,
            }
        }
        for (anchor, set) in anchored {
            self.store(Table::References, &anchor.to_key(), &set)?;
        }

        Ok(())
    }

    /// Whether `location` is the key of a stored definition
    pub(crate) fn is_definition(&self, location: Location) -> Result<bool> {
        Ok(self
            .connection(Table::General)?
            .read_data(&location.to_key())?
            .is_some())
    }

    /// Remove everything tied to `paths`: records keyed inside those files
    /// and every stored location pointing into them. Unknown paths are
    /// ignored; the registry keeps its entries so file ids stay stable.
    /// Returns the number of records removed or rewritten.
    pub fn invalidate_entries<'a, I>(&mut self, paths: I) -> Result<usize>
    where
        I: IntoIterator<Item = &'a Path>,
    {
        self.ensure_writable()?;

        let file_ids: HashSet<u32> = paths
            .into_iter()
            .filter_map(|path| self.file_id(path))
            .collect();
        if file_ids.is_empty() {
            return Ok(0);
        }

        self.batch(|db| db.purge_files(&file_ids))
    }

    fn purge_files(&mut self, file_ids: &HashSet<u32>) -> Result<usize> {
        let in_files = |loc: &Location| file_ids.contains(&loc.file_id());
        let mut changed = 0;

        // General: keys only, each file is one contiguous key range
        for file_id in file_ids {
            let mut doomed = Vec::new();
            {
                let conn = self.connection(Table::General)?;
                let mut cursor = conn.cursor();
                let mut valid = cursor.seek(&Location::file_start(*file_id).to_key())?;
                while valid {
                    match Location::from_key(cursor.key()) {
                        Some(loc) if loc.file_id() == *file_id => doomed.push(cursor.key().to_vec()),
                        _ => break,
                    }
                    valid = cursor.next()?;
                }
            }
            changed += doomed.len();
            for key in doomed {
                self.erase(Table::General, &key)?;
            }
        }

        // Targets: drop if either end is in an invalidated file
        let mut doomed = Vec::new();
        self.scan(Table::Targets, |key, value| {
            let source = Location::from_key(key);
            let target = Location::from_key(value);
            if source.map_or(false, |l| in_files(&l)) || target.map_or(false, |l| in_files(&l)) {
                doomed.push(key.to_vec());
            }
            Ok(())
        })?;
        changed += doomed.len();
        for key in doomed {
            self.erase(Table::Targets, &key)?;
        }

        // References: drop sets anchored in the files, prune the rest.
        // References from other files whose anchor is going away are kept
        // aside and resolved again against what is left of their entity.
        let mut orphans: HashMap<Location, BTreeSet<Location>> = HashMap::new();
        let mut rewrites: Vec<(Vec<u8>, BTreeSet<Location>)> = Vec::new();
        self.scan(Table::References, |key, value| {
            let anchor = Location::from_key(key).filter(|l| in_files(l));
            let set: BTreeSet<Location> = Codec::decode(value).map_err(|e| DbError::decode(Table::References, e))?;
            let kept: BTreeSet<Location> = set.iter().copied().filter(|l| !in_files(l)).collect();
            if let Some(anchor) = anchor {
                rewrites.push((key.to_vec(), BTreeSet::new()));
                if !kept.is_empty() {
                    orphans.insert(anchor, kept);
                }
            } else if kept.len() != set.len() {
                rewrites.push((key.to_vec(), kept));
            }
            Ok(())
        })?;
        changed += rewrites.len();
        for (key, set) in rewrites {
            if set.is_empty() {
                self.erase(Table::References, &key)?;
            } else {
                self.store(Table::References, &key, &set)?;
            }
        }

        // Dictionary: prune locations, drop emptied entries and names
        let mut rewrites: Vec<(Vec<u8>, DictionaryEntries)> = Vec::new();
        let mut survivors: Vec<(BTreeSet<Location>, BTreeSet<Location>)> = Vec::new();
        self.scan(Table::Dictionary, |key, value| {
            let entries: DictionaryEntries = Codec::decode(value).map_err(|e| DbError::decode(Table::Dictionary, e))?;
            if !entries.iter().any(|e| e.locations.iter().any(|l| in_files(l))) {
                return Ok(());
            }
            let mut pruned = DictionaryEntries::new();
            for mut entry in entries {
                let before = entry.locations.len();
                let mut adopted = BTreeSet::new();
                entry.locations.retain(|l| {
                    if in_files(l) {
                        adopted.extend(orphans.remove(l).unwrap_or_default());
                        false
                    } else {
                        true
                    }
                });
                if entry.locations.is_empty() {
                    continue;
                }
                if entry.locations.len() != before {
                    survivors.push((entry.locations.clone(), adopted));
                }
                pruned.insert(entry);
            }
            rewrites.push((key.to_vec(), pruned));
            Ok(())
        })?;
        changed += rewrites.len();
        for (key, entries) in rewrites {
            if entries.is_empty() {
                self.erase(Table::Dictionary, &key)?;
            } else {
                self.store(Table::Dictionary, &key, &entries)?;
            }
        }

        // Entities that lost a site but still exist: their declarations and
        // references may now resolve to a different site
        for (sites, adopted) in survivors {
            self.retarget(&sites, &sites, adopted)?;
        }
        if !orphans.is_empty() {
            debug!("Dropped references of {} removed anchors", orphans.len());
        }

        info!("Invalidated {} files ({} records)", file_ids.len(), changed);
        Ok(changed)
    }

    /// Visit every (key, value) of `table` in key order
    pub(crate) fn scan(
        &self,
        table: Table,
        mut visit: impl FnMut(&[u8], &[u8]) -> Result<()>,
    ) -> Result<()> {
        let conn = self.connection(table)?;
        let mut cursor = conn.cursor();
        while cursor.next()? {
            visit(cursor.key(), cursor.value())?;
        }
        Ok(())
    }

    // ---- Path-based ingestion ----

    fn resolve_location(&mut self, location: &SourceLocation) -> Location {
        let file_id = self.files_mut().insert(&location.path);
        Location::new(file_id, location.offset)
    }

    /// Map a parser occurrence onto file ids, registering unseen paths
    pub fn resolve_occurrence(&mut self, occurrence: &SourceOccurrence) -> Result<EntityOccurrence> {
        self.ensure_writable()?;
        let definition = occurrence
            .definition
            .as_ref()
            .map(|loc| self.resolve_location(loc));
        let declarations = occurrence
            .declarations
            .iter()
            .map(|loc| self.resolve_location(loc))
            .collect();
        let references = occurrence
            .references
            .iter()
            .map(|loc| self.resolve_location(loc))
            .collect();

        Ok(EntityOccurrence {
            name: occurrence.name.clone(),
            scope: occurrence.scope.clone(),
            definition,
            declarations,
            references,
        })
    }

    /// Replace everything known about `path` with `occurrences` as one
    /// atomic step: invalidate, then write.
    pub fn update_file(&mut self, path: &Path, occurrences: &[SourceOccurrence]) -> Result<usize> {
        self.ensure_writable()?;
        if occurrences.iter().any(|o| o.name.is_empty()) {
            return Err(DbError::InvalidKey {
                table: Table::Dictionary,
            });
        }
        let file_id = self.files_mut().insert(path);

        let written = self.batch(|db| {
            db.invalidate_entries([path])?;
            let mut written = 0;
            for occurrence in occurrences {
                let resolved = db.resolve_occurrence(occurrence)?;
                db.write_occurrence(&resolved)?;
                written += 1;
            }
            Ok(written)
        })?;

        self.files_mut().mark_indexed(file_id);
        debug!("Updated {} with {} entities", path.display(), written);
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::db::{DatabaseContext, Mode};
    use crate::index::store::Backend;
    use crate::query::QueryEngine;
    use std::path::PathBuf;
    use tempfile::tempdir;

    const F1: &str = "/src/f1.c";
    const F2: &str = "/src/f2.c";

    fn memory_db() -> Database {
        Database::create(DatabaseContext::memory(), Mode::ReadWrite).unwrap()
    }

    fn set(locs: &[Location]) -> BTreeSet<Location> {
        locs.iter().copied().collect()
    }

    fn write_foo(db: &mut Database) -> (Location, Location) {
        let f1 = db.register_file(Path::new(F1)).unwrap();
        let f2 = db.register_file(Path::new(F2)).unwrap();
        let def = Location::new(f1, 100);
        let reference = Location::new(f2, 50);
        db.write_entity("foo", &[], Some(def), &set(&[]), &set(&[reference]))
            .unwrap();
        (def, reference)
    }

    fn dictionary(db: &Database, name: &str) -> DictionaryEntries {
        db.read(Table::Dictionary, name.as_bytes())
            .unwrap()
            .unwrap_or_default()
    }

    fn dump(db: &Database) -> Vec<(Table, Vec<u8>, Vec<u8>)> {
        let mut rows = Vec::new();
        for table in Table::ALL {
            db.scan(table, |k, v| {
                rows.push((table, k.to_vec(), v.to_vec()));
                Ok(())
            })
            .unwrap();
        }
        rows
    }

    #[test]
    fn test_write_entity_populates_all_tables() {
        let mut db = memory_db();
        let (def, reference) = write_foo(&mut db);

        let record: EntityRecord = db.read(Table::General, &def.to_key()).unwrap().unwrap();
        assert_eq!(record.name, "foo");

        let entries = dictionary(&db, "foo");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries.iter().next().unwrap().locations, set(&[def]));

        let target: Location = db.read(Table::Targets, &reference.to_key()).unwrap().unwrap();
        assert_eq!(target, def);

        let refs: BTreeSet<Location> = db.read(Table::References, &def.to_key()).unwrap().unwrap();
        assert_eq!(refs, set(&[reference]));
    }

    #[test]
    fn test_write_entity_is_idempotent() {
        let mut db = memory_db();
        write_foo(&mut db);
        let once = dump(&db);
        write_foo(&mut db);
        assert_eq!(dump(&db), once);
    }

    #[test]
    fn test_dictionary_merges_by_scope() {
        let mut db = memory_db();
        let f = db.register_file(Path::new(F1)).unwrap();
        let ns = vec!["ns".to_string()];

        db.write_entity("bar", &ns, Some(Location::new(f, 1)), &set(&[]), &set(&[]))
            .unwrap();
        db.write_entity("bar", &ns, None, &set(&[Location::new(f, 9)]), &set(&[]))
            .unwrap();
        db.write_entity("bar", &[], Some(Location::new(f, 20)), &set(&[]), &set(&[]))
            .unwrap();

        let entries = dictionary(&db, "bar");
        assert_eq!(entries.len(), 2);
        let scoped = entries.iter().find(|e| e.scope == ns).unwrap();
        assert_eq!(scoped.locations, set(&[Location::new(f, 1), Location::new(f, 9)]));
    }

    #[test]
    fn test_declaration_targets_definition() {
        let mut db = memory_db();
        let header = db.register_file(Path::new("/src/foo.h")).unwrap();
        let source = db.register_file(Path::new("/src/foo.c")).unwrap();
        let decl = Location::new(header, 4);
        let def = Location::new(source, 40);

        db.write_entity("foo", &[], Some(def), &set(&[decl]), &set(&[]))
            .unwrap();

        let target: Location = db.read(Table::Targets, &decl.to_key()).unwrap().unwrap();
        assert_eq!(target, def);
        assert_eq!(db.read::<Location>(Table::Targets, &def.to_key()).unwrap(), None);
    }

    #[test]
    fn test_references_without_definition_anchor_on_declaration() {
        let mut db = memory_db();
        let f = db.register_file(Path::new(F1)).unwrap();
        let decl = Location::new(f, 10);
        let reference = Location::new(f, 80);

        db.write_entity("ext", &[], None, &set(&[decl]), &set(&[reference]))
            .unwrap();

        let refs: BTreeSet<Location> = db.read(Table::References, &decl.to_key()).unwrap().unwrap();
        assert_eq!(refs, set(&[reference]));
        let target: Location = db.read(Table::Targets, &reference.to_key()).unwrap().unwrap();
        assert_eq!(target, decl);
        // A lone declaration has nothing else to point at
        assert_eq!(db.read::<Location>(Table::Targets, &decl.to_key()).unwrap(), None);
    }

    #[test]
    fn test_invalidate_definition_file() {
        let mut db = memory_db();
        let (def, reference) = write_foo(&mut db);

        db.invalidate_entries([Path::new(F1)]).unwrap();

        assert!(dictionary(&db, "foo").is_empty());
        assert_eq!(db.read::<EntityRecord>(Table::General, &def.to_key()).unwrap(), None);
        assert_eq!(db.read::<Location>(Table::Targets, &reference.to_key()).unwrap(), None);
        assert_eq!(
            db.read::<BTreeSet<Location>>(Table::References, &def.to_key()).unwrap(),
            None
        );
        // Registry entries outlive invalidation
        assert_eq!(db.file_id(Path::new(F1)), Some(def.file_id()));
    }

    #[test]
    fn test_invalidate_reference_file() {
        let mut db = memory_db();
        let f3 = db.register_file(Path::new("/src/f3.c")).unwrap();
        let (def, reference) = write_foo(&mut db);
        let other = Location::new(f3, 7);
        db.write_entity("foo", &[], Some(def), &set(&[]), &set(&[other]))
            .unwrap();

        db.invalidate_entries([Path::new(F2)]).unwrap();

        let refs: BTreeSet<Location> = db.read(Table::References, &def.to_key()).unwrap().unwrap();
        assert_eq!(refs, set(&[other]));
        assert_eq!(db.read::<Location>(Table::Targets, &reference.to_key()).unwrap(), None);
        assert_eq!(dictionary(&db, "foo").len(), 1);
    }

    #[test]
    fn test_invalidate_is_idempotent() {
        let mut db = memory_db();
        write_foo(&mut db);

        assert!(db.invalidate_entries([Path::new(F1)]).unwrap() > 0);
        let once = dump(&db);
        assert_eq!(db.invalidate_entries([Path::new(F1)]).unwrap(), 0);
        assert_eq!(dump(&db), once);
    }

    #[test]
    fn test_invalidate_unknown_path_is_noop() {
        let mut db = memory_db();
        write_foo(&mut db);
        let before = dump(&db);
        assert_eq!(db.invalidate_entries([Path::new("/nowhere.c")]).unwrap(), 0);
        assert_eq!(dump(&db), before);
    }

    #[test]
    fn test_update_file_replaces_previous_occurrences() {
        let dir = tempdir().unwrap();
        let context = DatabaseContext::new(dir.path().join("db"), Backend::Sqlite);
        let mut db = Database::create(context, Mode::ReadWrite).unwrap();
        let path = PathBuf::from(F1);

        let at = |offset| SourceLocation {
            path: path.clone(),
            offset,
        };
        let first = SourceOccurrence {
            name: "foo".to_string(),
            definition: Some(at(10)),
            references: vec![at(30)],
            ..Default::default()
        };
        let second = SourceOccurrence {
            name: "foo".to_string(),
            definition: Some(at(12)),
            ..Default::default()
        };

        db.update_file(&path, &[first]).unwrap();
        db.update_file(&path, &[second]).unwrap();

        let id = db.file_id(&path).unwrap();
        let entries = dictionary(&db, "foo");
        assert_eq!(entries.iter().next().unwrap().locations, set(&[Location::new(id, 12)]));
        assert_eq!(
            db.read::<Location>(Table::Targets, &Location::new(id, 30).to_key())
                .unwrap(),
            None
        );
        assert!(db.files().info(id).unwrap().last_indexed.is_some());
    }

    #[test]
    fn test_read_only_rejects_entity_writes() {
        let dir = tempdir().unwrap();
        let context = DatabaseContext::new(dir.path().join("db"), Backend::Sqlite);
        drop(Database::create(context.clone(), Mode::ReadWrite).unwrap());
        let mut db = Database::create(context, Mode::ReadOnly).unwrap();
        assert!(db
            .write_entity("foo", &[], Some(Location::new(1, 1)), &set(&[]), &set(&[]))
            .is_err());
        assert!(db.invalidate_entries([Path::new(F1)]).is_err());
    }

    /// foo declared in foo.h, called from a.c, defined in b.c
    struct Header {
        decl: Location,
        call: Location,
        def: Location,
    }

    fn header_files(db: &mut Database) -> Header {
        let h = db.register_file(Path::new("/src/foo.h")).unwrap();
        let a = db.register_file(Path::new("/src/a.c")).unwrap();
        let b = db.register_file(Path::new("/src/b.c")).unwrap();
        Header {
            decl: Location::new(h, 4),
            call: Location::new(a, 30),
            def: Location::new(b, 10),
        }
    }

    fn write_caller(db: &mut Database, h: &Header) {
        db.write_entity("foo", &[], None, &set(&[h.decl]), &set(&[h.call]))
            .unwrap();
    }

    fn write_definer(db: &mut Database, h: &Header) {
        db.write_entity("foo", &[], Some(h.def), &set(&[h.decl]), &set(&[]))
            .unwrap();
    }

    fn navigation(db: &Database, h: &Header) -> (Option<Location>, BTreeSet<Location>, BTreeSet<Location>) {
        let engine = QueryEngine::new(db);
        (
            engine.follow_location(h.call).unwrap(),
            engine.find_references(h.def).unwrap(),
            engine.find_references(h.call).unwrap(),
        )
    }

    #[test]
    fn test_write_order_does_not_change_targets() {
        let mut definer_first = memory_db();
        let h = header_files(&mut definer_first);
        write_definer(&mut definer_first, &h);
        write_caller(&mut definer_first, &h);

        let mut caller_first = memory_db();
        header_files(&mut caller_first);
        write_caller(&mut caller_first, &h);
        assert_eq!(
            QueryEngine::new(&caller_first).follow_location(h.call).unwrap(),
            Some(h.decl)
        );
        write_definer(&mut caller_first, &h);

        let expected = (Some(h.def), set(&[h.call]), set(&[h.call]));
        assert_eq!(navigation(&definer_first, &h), expected);
        assert_eq!(navigation(&caller_first, &h), expected);
        assert_eq!(dump(&definer_first), dump(&caller_first));
    }

    #[test]
    fn test_reindexing_definition_file_keeps_callers() {
        let mut db = memory_db();
        let h = header_files(&mut db);
        write_caller(&mut db, &h);
        write_definer(&mut db, &h);
        let indexed = dump(&db);

        // With b.c gone the call falls back to the declaration
        db.invalidate_entries([Path::new("/src/b.c")]).unwrap();
        let engine = QueryEngine::new(&db);
        assert_eq!(engine.follow_location(h.call).unwrap(), Some(h.decl));
        assert_eq!(engine.find_references(h.decl).unwrap(), set(&[h.call]));

        write_definer(&mut db, &h);
        assert_eq!(dump(&db), indexed);
        assert_eq!(navigation(&db, &h), (Some(h.def), set(&[h.call]), set(&[h.call])));
    }

    #[test]
    fn test_failed_update_leaves_file_untouched() {
        let mut db = memory_db();
        let path = PathBuf::from(F1);
        let at = |offset| SourceLocation {
            path: path.clone(),
            offset,
        };
        let keep = SourceOccurrence {
            name: "keep".to_string(),
            definition: Some(at(1)),
            ..Default::default()
        };
        let fresh = SourceOccurrence {
            name: "fresh".to_string(),
            definition: Some(at(5)),
            ..Default::default()
        };
        let unnamed = SourceOccurrence {
            name: String::new(),
            definition: Some(at(9)),
            ..Default::default()
        };

        db.update_file(&path, &[keep]).unwrap();
        let before = dump(&db);

        assert!(matches!(
            db.update_file(&path, &[fresh, unnamed]),
            Err(DbError::InvalidKey { .. })
        ));
        assert_eq!(dump(&db), before);
        assert!(dictionary(&db, "fresh").is_empty());
        assert_eq!(dictionary(&db, "keep").len(), 1);
    }

    #[test]
    fn test_failed_batch_rolls_back_memory_tables() {
        let mut db = memory_db();
        let (def, _) = write_foo(&mut db);
        let before = dump(&db);

        let result: Result<()> = db.batch(|db| {
            db.invalidate_entries([Path::new(F1)])?;
            db.write_entity("bar", &[], Some(Location::new(def.file_id(), 7)), &set(&[]), &set(&[]))?;
            db.write(Table::Targets, &[], &def)
        });

        assert!(matches!(result, Err(DbError::InvalidKey { table: Table::Targets })));
        assert_eq!(dump(&db), before);
    }
}
