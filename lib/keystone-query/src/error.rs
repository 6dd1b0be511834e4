use keystone_schema::{SchemaError, ValidationError};
use thiserror::Error;

/// Duplicate table, duplicate object, duplicate column, duplicate database.
const ALREADY_PRESENT: [&str; 4] = ["42P07", "42710", "42701", "42P04"];

/// Undefined object, undefined table, undefined column.
const ALREADY_ABSENT: [&str; 3] = ["42704", "42P01", "42703"];

/// Direction of a structural statement.
///
/// A create only tolerates finding its target already there, a drop only
/// tolerates finding it already gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DdlEffect {
    Create,
    Drop,
}

impl DdlEffect {
    fn tolerates(self, code: &str) -> bool {
        match self {
            DdlEffect::Create => ALREADY_PRESENT.contains(&code),
            DdlEffect::Drop => ALREADY_ABSENT.contains(&code),
        }
    }
}

#[derive(Error, Debug)]
pub enum QueryError {
    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("No record found in {table} for id {id}")]
    NotFound { table: String, id: String },

    /// Constraint violation, kept exactly as the server reported it.
    #[error("{0}")]
    Integrity(sqlx::Error),

    #[error(transparent)]
    Database(sqlx::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Schema,
    Validation,
    NotFound,
    Integrity,
    Database,
}

impl QueryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            QueryError::Schema(_) => ErrorKind::Schema,
            QueryError::Validation(_) => ErrorKind::Validation,
            QueryError::NotFound { .. } => ErrorKind::NotFound,
            QueryError::Integrity(_) => ErrorKind::Integrity,
            QueryError::Database(_) => ErrorKind::Database,
        }
    }

    pub(crate) fn not_found(table: &str, id: impl ToString) -> Self {
        QueryError::NotFound {
            table: table.to_string(),
            id: id.to_string(),
        }
    }

    /// SQLSTATE of the underlying database error, if any.
    pub fn sqlstate(&self) -> Option<String> {
        match self {
            QueryError::Integrity(e) | QueryError::Database(e) => sqlstate(e),
            _ => None,
        }
    }
}

impl From<sqlx::Error> for QueryError {
    fn from(e: sqlx::Error) -> Self {
        match sqlstate(&e) {
            Some(code) if code.starts_with("23") => QueryError::Integrity(e),
            _ => QueryError::Database(e),
        }
    }
}

fn sqlstate(e: &sqlx::Error) -> Option<String> {
    e.as_database_error()
        .and_then(|db| db.code())
        .map(|code| code.into_owned())
}

pub(crate) fn is_already_applied(e: &sqlx::Error, effect: DdlEffect) -> bool {
    sqlstate(e).is_some_and(|code| effect.tolerates(&code))
}
