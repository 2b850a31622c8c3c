use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use tempfile::tempdir;

use symdb::index::{
    Backend, Database, DatabaseContext, Mode, SourceLocation, SourceOccurrence,
};

fn occurrences(path: &Path, count: u32) -> Vec<SourceOccurrence> {
    let header = PathBuf::from("/bench/include/api.h");
    (0..count)
        .map(|i| SourceOccurrence {
            name: format!("fn_{i}"),
            scope: vec!["bench".to_string()],
            definition: Some(SourceLocation {
                path: path.to_path_buf(),
                offset: i * 32,
            }),
            declarations: vec![SourceLocation {
                path: header.clone(),
                offset: i * 8,
            }],
            references: vec![SourceLocation {
                path: path.to_path_buf(),
                offset: 100_000 + i * 32,
            }],
        })
        .collect()
}

fn bench_update_file(c: &mut Criterion) {
    let path = PathBuf::from("/bench/src/main.c");
    let batch = occurrences(&path, 500);

    c.bench_function("update_file_memory", |b| {
        let mut db = Database::create(DatabaseContext::memory(), Mode::ReadWrite).unwrap();
        b.iter(|| db.update_file(&path, &batch).unwrap())
    });

    c.bench_function("update_file_sqlite", |b| {
        let dir = tempdir().unwrap();
        let context = DatabaseContext::new(dir.path().join("db"), Backend::Sqlite);
        let mut db = Database::create(context, Mode::ReadWrite).unwrap();
        b.iter(|| db.update_file(&path, &batch).unwrap())
    });
}

fn bench_invalidate(c: &mut Criterion) {
    let path = PathBuf::from("/bench/src/main.c");
    let batch = occurrences(&path, 500);

    c.bench_function("invalidate_file", |b| {
        b.iter_batched(
            || {
                let mut db = Database::create(DatabaseContext::memory(), Mode::ReadWrite).unwrap();
                db.update_file(&path, &batch).unwrap();
                db
            },
            |mut db| db.invalidate_entries([path.as_path()]).unwrap(),
            BatchSize::SmallInput,
        )
    });

    c.bench_function("write_entity", |b| {
        let mut db = Database::create(DatabaseContext::memory(), Mode::ReadWrite).unwrap();
        let file = db.register_file(&path).unwrap();
        let mut offset = 0;
        b.iter(|| {
            offset += 1;
            let references: BTreeSet<_> =
                [symdb::index::Location::new(file, offset + 1_000_000)].into_iter().collect();
            db.write_entity(
                "hot",
                &[],
                Some(symdb::index::Location::new(file, offset)),
                &BTreeSet::new(),
                &references,
            )
            .unwrap()
        })
    });
}

criterion_group!(benches, bench_update_file, bench_invalidate);
criterion_main!(benches);
