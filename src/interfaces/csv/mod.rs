//! CSV batch surface: operations in, per-user balances out.

pub mod balance_writer;
pub mod operation_reader;
pub mod processor;

use thiserror::Error;

/// A row that could not be turned into an operation.
#[derive(Error, Debug)]
pub enum InputError {
    #[error("CSV error: {0}")]
    Csv(#[from] ::csv::Error),
    #[error("`{op}` requires the `{field}` column")]
    MissingField {
        op: &'static str,
        field: &'static str,
    },
    #[error("invalid currency kind: {0}")]
    InvalidKind(String),
}
