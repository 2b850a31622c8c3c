//! symdb: a persistent, incrementally updated symbol database for C-family
//! code navigation.
//!
//! The index lives in four ordered key/value tables (definitions, names,
//! reference sets and occurrence targets) keyed by compact file locations.
//! An [`indexer::Indexer`] applies parsed files one atomic update at a time
//! while [`jobs::JobRunner`] answers navigation queries from consistent
//! read snapshots.

pub mod config;
pub mod error;
pub mod index;
pub mod indexer;
pub mod jobs;
pub mod query;

pub use error::{DbError, Result};
