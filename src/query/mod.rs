// Read-side resolution over the symbol tables

pub mod engine;

pub use engine::{CursorInfo, NameFilter, OccurrenceKind, QueryEngine, SymbolNames};
