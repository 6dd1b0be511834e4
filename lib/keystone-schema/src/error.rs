use thiserror::Error;

use crate::types::{ColumnType, ValueCategory};
use crate::validator::Action;

/// The declaration itself is unusable, or names a table it does not contain.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error("Table {0} does not exist")]
    UnknownTable(String),

    #[error("Columns for table {0} are empty")]
    EmptyColumns(String),

    #[error("Invalid schema: {0}")]
    Invalid(String),

    #[error("Failed to load schema from {path}: {message}")]
    Load { path: String, message: String },
}

impl SchemaError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::Invalid(msg.into())
    }
}

/// A record was rejected before any statement was issued.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Field {0} is required")]
    MissingField(String),

    #[error("Field id is required to {0}")]
    MissingId(Action),

    #[error("Invalid id {0:?}")]
    InvalidId(String),

    #[error("Column {column} type mismatch. Expected {expected} found {found}")]
    TypeMismatch {
        column: String,
        expected: ColumnType,
        found: ValueCategory,
    },

    #[error("Invalid value for column {column}: {reason}")]
    InvalidValue { column: String, reason: String },

    #[error("Unknown column {column} in {context}")]
    UnknownColumn { column: String, context: String },

    #[error("Expected a record object, found {0}")]
    NotARecord(ValueCategory),

    #[error("Data is empty")]
    EmptyBatch,
}

impl ValidationError {
    pub(crate) fn invalid_value(column: &str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            column: column.to_string(),
            reason: reason.into(),
        }
    }

    pub fn unknown_column(column: &str, context: &str) -> Self {
        Self::UnknownColumn {
            column: column.to_string(),
            context: context.to_string(),
        }
    }
}
