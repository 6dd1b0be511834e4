use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

use crate::definition::ColumnDefinition;
use crate::error::ValidationError;
use crate::naming::{is_audit_column, CREATED_DATE, ID_COLUMN, UPDATED_DATE};
use crate::types::{ColumnType, ValueCategory};

/// A flat row: column name to value.
pub type Record = serde_json::Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Insert,
    Update,
    Upsert,
    Delete,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Action::Insert => "insert",
            Action::Update => "update",
            Action::Upsert => "upsert",
            Action::Delete => "delete",
        })
    }
}

pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Type of a column, audit columns included.
pub fn column_type_of(columns: &[ColumnDefinition], name: &str) -> Option<ColumnType> {
    match name {
        ID_COLUMN => Some(ColumnType::Uuid),
        CREATED_DATE | UPDATED_DATE => Some(ColumnType::Timestamp),
        _ => columns
            .iter()
            .find(|c| c.column_name == name)
            .map(|c| c.column_type),
    }
}

pub fn parse_id(value: &Value) -> Result<Uuid, ValidationError> {
    match value {
        Value::String(s) => Uuid::parse_str(s).map_err(|_| ValidationError::InvalidId(s.clone())),
        other => Err(ValidationError::InvalidId(other.to_string())),
    }
}

/// Validate one record for `action` and return the cleaned copy that may be written.
pub fn validate_and_format(
    record: &Record,
    columns: &[ColumnDefinition],
    action: Action,
) -> Result<Record, ValidationError> {
    if matches!(action, Action::Insert | Action::Upsert) {
        check_required(record, columns)?;
    }

    if matches!(action, Action::Update | Action::Upsert | Action::Delete) {
        match record.get(ID_COLUMN) {
            None | Some(Value::Null) => return Err(ValidationError::MissingId(action)),
            Some(_) => {}
        }
    }

    let mut formatted = format_fields(record, columns)?;

    if matches!(action, Action::Update | Action::Upsert) && !formatted.contains_key(UPDATED_DATE) {
        formatted.insert(UPDATED_DATE.to_string(), Value::String(now_timestamp()));
    }

    Ok(formatted)
}

/// Validate a single record or an array of them.
///
/// Returns the formatted records and whether the input was an array.
pub fn validate_batch(
    value: &Value,
    columns: &[ColumnDefinition],
    action: Action,
) -> Result<(Vec<Record>, bool), ValidationError> {
    match value {
        Value::Array(items) => {
            if items.is_empty() {
                return Err(ValidationError::EmptyBatch);
            }
            let records = items
                .iter()
                .map(|item| validate_and_format(as_record(item)?, columns, action))
                .collect::<Result<Vec<_>, _>>()?;
            Ok((records, true))
        }
        other => Ok((vec![validate_and_format(as_record(other)?, columns, action)?], false)),
    }
}

fn as_record(value: &Value) -> Result<&Record, ValidationError> {
    value
        .as_object()
        .ok_or_else(|| ValidationError::NotARecord(ValueCategory::of(value)))
}

fn check_required(record: &Record, columns: &[ColumnDefinition]) -> Result<(), ValidationError> {
    for column in columns.iter().filter(|c| c.required && !c.derived) {
        match record.get(&column.column_name) {
            None | Some(Value::Null) => {
                return Err(ValidationError::MissingField(column.column_name.clone()));
            }
            Some(Value::String(s)) if s.is_empty() => {
                return Err(ValidationError::MissingField(column.column_name.clone()));
            }
            Some(_) => {}
        }
    }
    Ok(())
}

/// Drop unknown keys, type-check and sanitize the rest. No required/id rules.
pub fn format_fields(
    record: &Record,
    columns: &[ColumnDefinition],
) -> Result<Record, ValidationError> {
    let mut formatted = Record::new();

    for (key, value) in record {
        if is_audit_column(key) {
            if let Some(value) = format_audit_value(key, value)? {
                formatted.insert(key.clone(), value);
            }
            continue;
        }

        let Some(column) = columns.iter().find(|c| &c.column_name == key) else {
            continue;
        };

        let value = format_value(key, column.column_type, value)?;
        if column.unsigned && numeric_value(&value).is_some_and(|n| n < 0.0) {
            return Err(ValidationError::invalid_value(key, "must not be negative"));
        }
        formatted.insert(key.clone(), value);
    }

    Ok(formatted)
}

// null audit values are dropped so the server defaults apply
fn format_audit_value(key: &str, value: &Value) -> Result<Option<Value>, ValidationError> {
    if value.is_null() {
        return Ok(None);
    }
    if key == ID_COLUMN {
        let id = parse_id(value)?;
        return Ok(Some(Value::String(id.to_string())));
    }
    format_value(key, ColumnType::Timestamp, value).map(Some)
}

/// Check that `value` fits `column_type` and convert it to the form written to the database.
pub fn format_value(
    column: &str,
    column_type: ColumnType,
    value: &Value,
) -> Result<Value, ValidationError> {
    let category = ValueCategory::of(value);
    if category == ValueCategory::Null {
        return Ok(Value::Null);
    }
    if !category.allowed_types().contains(&column_type) {
        return Err(ValidationError::TypeMismatch {
            column: column.to_string(),
            expected: column_type,
            found: category,
        });
    }

    match (column_type, value) {
        (ColumnType::Json | ColumnType::Jsonb, _) => Ok(Value::String(value.to_string())),
        (ColumnType::Date, Value::String(s)) => parse_date(s)
            .map(|d| Value::String(d.format("%Y-%m-%d").to_string()))
            .ok_or_else(|| ValidationError::invalid_value(column, format!("{:?} is not a date", s))),
        (ColumnType::Datetime | ColumnType::Timestamp, Value::String(s)) => parse_datetime(s)
            .map(|dt| Value::String(dt.to_rfc3339_opts(SecondsFormat::Micros, true)))
            .ok_or_else(|| {
                ValidationError::invalid_value(column, format!("{:?} is not a timestamp", s))
            }),
        (ColumnType::Uuid, Value::String(s)) => Uuid::parse_str(s)
            .map(|id| Value::String(id.to_string()))
            .map_err(|_| ValidationError::invalid_value(column, format!("{:?} is not a uuid", s))),
        (ColumnType::Decimal, Value::String(s)) => match s.trim().parse::<f64>() {
            Ok(_) => Ok(value.clone()),
            Err(_) => Err(ValidationError::invalid_value(
                column,
                format!("{:?} is not a decimal", s),
            )),
        },
        (ColumnType::Integer, Value::Number(n)) => match n.as_i64() {
            Some(v) if i32::try_from(v).is_ok() => Ok(value.clone()),
            _ => Err(ValidationError::invalid_value(column, format!("{} is not a 32-bit integer", n))),
        },
        (ColumnType::BigInteger, Value::Number(n)) => match n.as_i64() {
            Some(_) => Ok(value.clone()),
            None => Err(ValidationError::invalid_value(column, format!("{} is not a 64-bit integer", n))),
        },
        _ => Ok(value.clone()),
    }
}

fn numeric_value(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .or_else(|| parse_datetime(s).map(|dt| dt.date_naive()))
}

fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}
