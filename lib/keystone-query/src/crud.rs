use keystone_schema::{
    column_type_of, format_fields, now_timestamp, parse_id, validate_and_format, validate_batch,
    Action, ColumnDefinition, Record, ValidationError, ValueCategory, CREATED_DATE, ID_COLUMN,
    UPDATED_DATE,
};
use serde::Serialize;
use serde_json::Value;
use sqlx::{Executor, Postgres, QueryBuilder};
use std::slice;
use tracing::debug;
use uuid::Uuid;

use crate::error::QueryError;
use crate::filter::{
    check_fields, check_sort, project, push_order_and_page, FilterOptions, Filtered, Page,
    WhereClause,
};
use crate::sql::{bind_text, cast_type, column_ref, quote_ident};
use crate::QueryWrapper;

const DEFAULT_BATCH_SIZE: usize = 1000;

/// A single result for a single input, a list for a list.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> OneOrMany<T> {
    fn from_parts(mut items: Vec<T>, is_array: bool) -> Self {
        if !is_array && items.len() == 1 {
            if let Some(item) = items.pop() {
                return OneOrMany::One(item);
            }
        }
        OneOrMany::Many(items)
    }

    pub fn len(&self) -> usize {
        match self {
            OneOrMany::One(_) => 1,
            OneOrMany::Many(items) => items.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn into_vec(self) -> Vec<T> {
        match self {
            OneOrMany::One(item) => vec![item],
            OneOrMany::Many(items) => items,
        }
    }

    /// The single item, if this came from a single input.
    pub fn one(self) -> Option<T> {
        match self {
            OneOrMany::One(item) => Some(item),
            OneOrMany::Many(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InsertOptions {
    /// Rows per multi-row `INSERT`.
    pub batch_size: usize,
}

impl Default for InsertOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

// ============ Reads ============

impl QueryWrapper {
    pub async fn find(
        &self,
        table: &str,
        id: &str,
        fields: Option<&[String]>,
    ) -> Result<Option<Record>, QueryError> {
        let definition = self.table(table)?;
        check_fields(fields, &definition.columns)?;
        let id = Uuid::parse_str(id).map_err(|_| ValidationError::InvalidId(id.to_string()))?;

        let sql = format!(
            "SELECT to_jsonb(t) FROM {} AS t WHERE {} = $1",
            quote_ident(table),
            column_ref(ID_COLUMN)
        );
        let row = sqlx::query_scalar::<_, Value>(&sql)
            .bind(id)
            .fetch_optional(self.pool())
            .await?;
        Ok(row.and_then(into_record).map(|r| project(r, fields)))
    }

    pub async fn find_or_fail(
        &self,
        table: &str,
        id: &str,
        fields: Option<&[String]>,
    ) -> Result<Record, QueryError> {
        self.find(table, id, fields)
            .await?
            .ok_or_else(|| QueryError::not_found(table, id))
    }

    /// Rows matching every `filter` entry by equality (`null` matches `IS NULL`).
    pub async fn filter(
        &self,
        table: &str,
        filter: &Record,
        options: &FilterOptions,
    ) -> Result<Filtered, QueryError> {
        let definition = self.table(table)?;
        let fields = options.fields.as_deref();
        check_fields(fields, &definition.columns)?;
        check_sort(&options.sort, &definition.columns)?;
        let clause = WhereClause::new(filter, options.search.as_ref(), &definition.columns)?;

        let mut qb = QueryBuilder::new(format!("SELECT to_jsonb(t) FROM {} AS t", quote_ident(table)));
        clause.push_to(&mut qb);
        push_order_and_page(&mut qb, &options.sort, options.pagination.as_ref());
        let rows: Vec<Record> = fetch_records(self.pool(), qb)
            .await?
            .into_iter()
            .map(|r| project(r, fields))
            .collect();

        if options.pagination.is_none() {
            return Ok(Filtered::Rows(rows));
        }

        let mut count_qb = QueryBuilder::new(format!("SELECT count(*) FROM {} AS t", quote_ident(table)));
        clause.push_to(&mut count_qb);
        let count = count_qb
            .build_query_scalar::<i64>()
            .fetch_one(self.pool())
            .await?;

        Ok(Filtered::Page(Page { data: rows, count }))
    }
}

// ============ Writes ============

impl QueryWrapper {
    /// Insert one record or an array of records.
    ///
    /// Arrays go in as multi-row statements of at most `batch_size` rows,
    /// all inside one transaction.
    pub async fn insert(
        &self,
        table: &str,
        data: &Value,
        options: InsertOptions,
    ) -> Result<OneOrMany<Record>, QueryError> {
        let definition = self.table(table)?;
        let (records, is_array) = validate_batch(data, &definition.columns, Action::Insert)?;

        if !is_array {
            let qb = insert_statement(table, &definition.columns, &records);
            let rows = fetch_records(self.pool(), qb).await?;
            return Ok(OneOrMany::from_parts(rows, false));
        }

        let mut tx = self.pool().begin().await?;
        let mut rows = Vec::with_capacity(records.len());
        for chunk in records.chunks(options.batch_size.max(1)) {
            let qb = insert_statement(table, &definition.columns, chunk);
            rows.extend(fetch_records(&mut *tx, qb).await?);
        }
        tx.commit().await?;

        debug!(table, rows = rows.len(), "inserted batch");
        Ok(OneOrMany::from_parts(rows, true))
    }

    /// Insert records without an id; replace every column of records with one.
    pub async fn upsert(&self, table: &str, data: &Value) -> Result<OneOrMany<Record>, QueryError> {
        let definition = self.table(table)?;
        let (items, is_array) = records_of(data)?;

        let mut prepared = Vec::with_capacity(items.len());
        for item in items {
            let has_id = item.get(ID_COLUMN).is_some_and(|id| !id.is_null());
            let action = if has_id { Action::Upsert } else { Action::Insert };
            prepared.push((action, validate_and_format(item, &definition.columns, action)?));
        }

        let mut tx = self.pool().begin().await?;
        let mut rows = Vec::with_capacity(prepared.len());
        for (action, record) in &prepared {
            let qb = match action {
                Action::Upsert => upsert_statement(table, &definition.columns, record),
                _ => insert_statement(table, &definition.columns, slice::from_ref(record)),
            };
            rows.extend(fetch_records(&mut *tx, qb).await?);
        }
        tx.commit().await?;

        Ok(OneOrMany::from_parts(rows, is_array))
    }

    /// Update records by primary key. Any id without a row fails the whole call.
    pub async fn update_by_id(
        &self,
        table: &str,
        data: &Value,
    ) -> Result<OneOrMany<Record>, QueryError> {
        let definition = self.table(table)?;
        let (records, is_array) = validate_batch(data, &definition.columns, Action::Update)?;

        let mut tx = self.pool().begin().await?;
        let mut rows = Vec::with_capacity(records.len());
        for record in &records {
            let id = record
                .get(ID_COLUMN)
                .and_then(Value::as_str)
                .ok_or(ValidationError::MissingId(Action::Update))?;

            let mut qb = QueryBuilder::new(format!("UPDATE {} AS t", quote_ident(table)));
            push_assignments(&mut qb, &definition.columns, record);
            qb.push(" WHERE ").push(column_ref(ID_COLUMN)).push(" = ");
            qb.push_bind(id.to_string()).push("::uuid");
            qb.push(" RETURNING to_jsonb(t)");

            let row = qb
                .build_query_scalar::<Value>()
                .fetch_optional(&mut *tx)
                .await?
                .and_then(into_record)
                .ok_or_else(|| QueryError::not_found(table, id))?;
            rows.push(row);
        }
        tx.commit().await?;

        Ok(OneOrMany::from_parts(rows, is_array))
    }

    /// Apply `data` to every row matching `filter`.
    pub async fn update_by_filter(
        &self,
        table: &str,
        data: &Record,
        filter: &Record,
    ) -> Result<Vec<Record>, QueryError> {
        let definition = self.table(table)?;
        let mut record = format_fields(data, &definition.columns)?;
        record.remove(ID_COLUMN);
        if !record.contains_key(UPDATED_DATE) {
            record.insert(UPDATED_DATE.to_string(), Value::String(now_timestamp()));
        }
        let clause = WhereClause::new(filter, None, &definition.columns)?;

        let mut qb = QueryBuilder::new(format!("UPDATE {} AS t", quote_ident(table)));
        push_assignments(&mut qb, &definition.columns, &record);
        clause.push_to(&mut qb);
        qb.push(" RETURNING to_jsonb(t)");

        let mut tx = self.pool().begin().await?;
        let rows = fetch_records(&mut *tx, qb).await?;
        tx.commit().await?;

        debug!(table, rows = rows.len(), "updated by filter");
        Ok(rows)
    }

    /// Delete by an id string, a record carrying `id`, or an array of either.
    ///
    /// Ids come back in input order. If any id matches no row nothing is deleted.
    pub async fn delete_by_id(&self, table: &str, ids: &Value) -> Result<OneOrMany<Uuid>, QueryError> {
        let definition = self.table(table)?;
        let (targets, is_array) = match ids {
            Value::Array(items) => {
                if items.is_empty() {
                    return Err(ValidationError::EmptyBatch.into());
                }
                let targets = items
                    .iter()
                    .map(|item| delete_target(item, &definition.columns))
                    .collect::<Result<Vec<_>, _>>()?;
                (targets, true)
            }
            other => (vec![delete_target(other, &definition.columns)?], false),
        };

        let sql = format!(
            "DELETE FROM {} AS t WHERE {} = ANY($1) RETURNING {}",
            quote_ident(table),
            column_ref(ID_COLUMN),
            column_ref(ID_COLUMN)
        );

        let mut tx = self.pool().begin().await?;
        let deleted: Vec<Uuid> = sqlx::query_scalar(&sql)
            .bind(targets.clone())
            .fetch_all(&mut *tx)
            .await?;
        if let Some(missing) = targets.iter().find(|id| !deleted.contains(id)) {
            // dropping the transaction rolls the batch back
            return Err(QueryError::not_found(table, missing));
        }
        tx.commit().await?;

        Ok(OneOrMany::from_parts(targets, is_array))
    }

    pub async fn delete_by_filter(&self, table: &str, filter: &Record) -> Result<Vec<Uuid>, QueryError> {
        let definition = self.table(table)?;
        let clause = WhereClause::new(filter, None, &definition.columns)?;

        let mut qb = QueryBuilder::new(format!("DELETE FROM {} AS t", quote_ident(table)));
        clause.push_to(&mut qb);
        qb.push(" RETURNING ").push(column_ref(ID_COLUMN));

        let ids = qb.build_query_scalar::<Uuid>().fetch_all(self.pool()).await?;
        debug!(table, rows = ids.len(), "deleted by filter");
        Ok(ids)
    }
}

// ============ Statement helpers ============

async fn fetch_records<'c, E>(
    executor: E,
    mut qb: QueryBuilder<'static, Postgres>,
) -> Result<Vec<Record>, QueryError>
where
    E: Executor<'c, Database = Postgres>,
{
    let rows = qb.build_query_scalar::<Value>().fetch_all(executor).await?;
    Ok(rows.into_iter().filter_map(into_record).collect())
}

fn into_record(value: Value) -> Option<Record> {
    match value {
        Value::Object(record) => Some(record),
        _ => None,
    }
}

fn as_record(value: &Value) -> Result<&Record, ValidationError> {
    value
        .as_object()
        .ok_or_else(|| ValidationError::NotARecord(ValueCategory::of(value)))
}

fn records_of(data: &Value) -> Result<(Vec<&Record>, bool), ValidationError> {
    match data {
        Value::Array(items) if items.is_empty() => Err(ValidationError::EmptyBatch),
        Value::Array(items) => Ok((items.iter().map(as_record).collect::<Result<_, _>>()?, true)),
        other => Ok((vec![as_record(other)?], false)),
    }
}

fn delete_target(value: &Value, columns: &[ColumnDefinition]) -> Result<Uuid, ValidationError> {
    match value {
        Value::Object(record) => {
            let record = validate_and_format(record, columns, Action::Delete)?;
            record
                .get(ID_COLUMN)
                .ok_or(ValidationError::MissingId(Action::Delete))
                .and_then(parse_id)
        }
        other => parse_id(other),
    }
}

/// `$n::type` for a known column, `DEFAULT` when the record has no value for it.
fn push_value(
    qb: &mut QueryBuilder<'static, Postgres>,
    columns: &[ColumnDefinition],
    name: &str,
    value: Option<&Value>,
) {
    match (value, column_type_of(columns, name)) {
        (Some(value), Some(column_type)) => {
            qb.push_bind(bind_text(value)).push("::").push(cast_type(column_type));
        }
        _ => {
            qb.push("DEFAULT");
        }
    }
}

fn push_assignments(qb: &mut QueryBuilder<'static, Postgres>, columns: &[ColumnDefinition], record: &Record) {
    let mut first = true;
    for (name, value) in record.iter().filter(|(name, _)| name.as_str() != ID_COLUMN) {
        qb.push(if first { " SET " } else { ", " });
        first = false;
        qb.push(quote_ident(name)).push(" = ");
        push_value(qb, columns, name, Some(value));
    }
}

fn insert_statement(
    table: &str,
    columns: &[ColumnDefinition],
    records: &[Record],
) -> QueryBuilder<'static, Postgres> {
    let mut names: Vec<&str> = Vec::new();
    for record in records {
        for key in record.keys() {
            if !names.contains(&key.as_str()) {
                names.push(key);
            }
        }
    }
    // every row takes its defaults
    if names.is_empty() {
        names.push(ID_COLUMN);
    }

    let mut qb = QueryBuilder::new(format!("INSERT INTO {} AS t (", quote_ident(table)));
    qb.push(quoted_list(&names));
    qb.push(") VALUES ");
    for (i, record) in records.iter().enumerate() {
        qb.push(if i == 0 { "(" } else { ", (" });
        for (j, name) in names.iter().enumerate() {
            if j > 0 {
                qb.push(", ");
            }
            push_value(&mut qb, columns, name, record.get(*name));
        }
        qb.push(")");
    }
    qb.push(" RETURNING to_jsonb(t)");
    qb
}

/// Insert, or on an existing id overwrite every declared column.
///
/// Declared columns missing from the record are written as their defaults,
/// so the stored row never mixes old and new values.
fn upsert_statement(
    table: &str,
    columns: &[ColumnDefinition],
    record: &Record,
) -> QueryBuilder<'static, Postgres> {
    let mut names: Vec<&str> = vec![ID_COLUMN];
    names.extend(columns.iter().map(|c| c.column_name.as_str()));
    if record.contains_key(CREATED_DATE) {
        names.push(CREATED_DATE);
    }
    names.push(UPDATED_DATE);

    let mut qb = QueryBuilder::new(format!("INSERT INTO {} AS t (", quote_ident(table)));
    qb.push(quoted_list(&names));
    qb.push(") VALUES (");
    for (i, name) in names.iter().enumerate() {
        if i > 0 {
            qb.push(", ");
        }
        push_value(&mut qb, columns, name, record.get(*name));
    }
    qb.push(") ON CONFLICT (").push(quote_ident(ID_COLUMN)).push(") DO UPDATE SET ");

    let replaced: Vec<String> = columns
        .iter()
        .map(|c| c.column_name.as_str())
        .chain([UPDATED_DATE])
        .map(|name| format!("{0} = EXCLUDED.{0}", quote_ident(name)))
        .collect();
    qb.push(replaced.join(", "));
    qb.push(" RETURNING to_jsonb(t)");
    qb
}

fn quoted_list(names: &[&str]) -> String {
    names
        .iter()
        .map(|n| quote_ident(n))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use keystone_schema::ColumnType;
    use serde_json::json;

    fn columns() -> Vec<ColumnDefinition> {
        vec![
            ColumnDefinition::new("name", ColumnType::String).required(),
            ColumnDefinition::new("age", ColumnType::Integer),
        ]
    }

    fn record(value: Value) -> Record {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn test_insert_statement_fills_gaps_with_default() {
        let records = vec![record(json!({"name": "a"})), record(json!({"age": 3, "name": "b"}))];
        let qb = insert_statement("tbl_Person", &columns(), &records);
        assert_eq!(
            qb.sql(),
            "INSERT INTO \"tbl_Person\" AS t (\"name\", \"age\") VALUES ($1::text, DEFAULT), \
             ($2::text, $3::integer) RETURNING to_jsonb(t)"
        );
    }

    #[test]
    fn test_insert_statement_without_values() {
        let qb = insert_statement("tbl_Person", &columns(), &[Record::new(), Record::new()]);
        assert_eq!(
            qb.sql(),
            "INSERT INTO \"tbl_Person\" AS t (\"id\") VALUES (DEFAULT), (DEFAULT) RETURNING to_jsonb(t)"
        );
    }

    #[test]
    fn test_upsert_statement_replaces_every_column() {
        let id = Uuid::new_v4().to_string();
        let input = record(json!({"id": id, "name": "a", "updated_date": "2024-01-01T00:00:00Z"}));
        let qb = upsert_statement("tbl_Person", &columns(), &input);
        assert_eq!(
            qb.sql(),
            "INSERT INTO \"tbl_Person\" AS t (\"id\", \"name\", \"age\", \"updated_date\") \
             VALUES ($1::uuid, $2::text, DEFAULT, $3::timestamptz) ON CONFLICT (\"id\") DO UPDATE SET \
             \"name\" = EXCLUDED.\"name\", \"age\" = EXCLUDED.\"age\", \
             \"updated_date\" = EXCLUDED.\"updated_date\" RETURNING to_jsonb(t)"
        );
    }

    #[test]
    fn test_assignments_skip_id() {
        let mut qb = QueryBuilder::new("UPDATE \"tbl_Person\" AS t");
        let input = record(json!({"id": "x", "age": null, "name": "b"}));
        push_assignments(&mut qb, &columns(), &input);
        assert_eq!(
            qb.sql(),
            "UPDATE \"tbl_Person\" AS t SET \"age\" = $1::integer, \"name\" = $2::text"
        );
    }

    #[test]
    fn test_delete_targets() {
        let id = Uuid::new_v4();
        assert_eq!(delete_target(&json!(id.to_string()), &columns()).unwrap(), id);
        assert_eq!(
            delete_target(&json!({"id": id.to_string(), "name": "x"}), &columns()).unwrap(),
            id
        );
        assert_eq!(
            delete_target(&json!({"name": "x"}), &columns()).unwrap_err(),
            ValidationError::MissingId(Action::Delete)
        );
        assert!(matches!(
            delete_target(&json!(7), &columns()),
            Err(ValidationError::InvalidId(_))
        ));
    }

    #[test]
    fn test_records_of() {
        assert_eq!(records_of(&json!([])).unwrap_err(), ValidationError::EmptyBatch);
        let single = json!({"a": 1});
        let (items, is_array) = records_of(&single).unwrap();
        assert_eq!((items.len(), is_array), (1, false));
        assert!(records_of(&json!([1])).is_err());
    }

    #[test]
    fn test_one_or_many() {
        assert_eq!(OneOrMany::from_parts(vec![1], false), OneOrMany::One(1));
        assert_eq!(OneOrMany::from_parts(vec![1], true), OneOrMany::Many(vec![1]));
        assert_eq!(OneOrMany::One(1).into_vec(), vec![1]);
        assert_eq!(
            serde_json::to_value(OneOrMany::Many(vec![1, 2])).unwrap(),
            json!([1, 2])
        );
    }
}
