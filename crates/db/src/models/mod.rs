//! Row types for the SQLite schema and their conversions into domain types.

pub mod checkpoint;
pub mod project;

use shorts_core::store::StoreError;

/// Map a column value that failed domain parsing to a corrupt-record error.
pub(crate) fn corrupt(table: &str, detail: impl std::fmt::Display) -> StoreError {
    StoreError::Corrupt(format!("{table}: {detail}"))
}
