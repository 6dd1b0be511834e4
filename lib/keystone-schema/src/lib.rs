//! Declarative schema model for keystone.
//!
//! A [`SchemaDefinition`] is loaded once from TOML or JSON, checked at load
//! time, and then drives both schema reconciliation and record validation.

mod definition;
mod error;
mod naming;
mod types;
mod validator;

pub use definition::{ColumnDefinition, ReferentialAction, SchemaDefinition, TableDefinition};
pub use error::{SchemaError, ValidationError};
pub use naming::{
    constraint_name, is_audit_column, trigger_name, ConstraintKind, TriggerKind, AUDIT_COLUMNS,
    CREATED_DATE, ID_COLUMN, MAX_IDENTIFIER_LEN, NAME_COLUMN, SLUG_COLUMN, UPDATED_DATE,
};
pub use types::{ColumnType, ValueCategory};
pub use validator::{
    column_type_of, format_fields, format_value, now_timestamp, parse_id, validate_and_format,
    validate_batch, Action, Record,
};
