// Error types for the symbol database

use crate::index::Table;

pub type Result<T> = std::result::Result<T, DbError>;

/// Errors produced by the storage layer and the query resolver.
///
/// A missing key is never an error: reads return the caller's default.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("empty key passed to {table} table")]
    InvalidKey { table: Table },

    #[error("cannot parse location: {0}")]
    Parse(String),

    #[error("no tracked file with id {file_id}")]
    UnknownFile { file_id: u32 },

    #[error("database is not opened")]
    NotOpened,

    #[error("database is opened read-only")]
    ReadOnly,

    #[error("database is opened write-only")]
    WriteOnly,

    #[error("cannot decode value from {table} table: {message}")]
    Decode { table: Table, message: String },

    #[error("cannot encode value for {table} table: {message}")]
    Encode { table: Table, message: String },

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("encoding error: {0}")]
    Bincode(#[from] bincode::Error),
}

impl DbError {
    pub(crate) fn decode(table: Table, err: impl std::fmt::Display) -> Self {
        DbError::Decode {
            table,
            message: err.to_string(),
        }
    }

    pub(crate) fn encode(table: Table, err: impl std::fmt::Display) -> Self {
        DbError::Encode {
            table,
            message: err.to_string(),
        }
    }
}
