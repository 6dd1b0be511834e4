use keystone_schema::{
    column_type_of, format_value, ColumnDefinition, ColumnType, Record, ValidationError,
    CREATED_DATE, ID_COLUMN,
};
use serde::{Deserialize, Serialize};
use sqlx::{Postgres, QueryBuilder};

use crate::sql::{bind_text, cast_type, column_ref, like_pattern};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    /// Zero-based.
    pub page: u32,
    pub size: u32,
}

impl Pagination {
    pub fn new(page: u32, size: u32) -> Self {
        Self { page, size }
    }

    fn offset(&self) -> i64 {
        i64::from(self.page) * i64::from(self.size)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    fn as_sql(self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sort {
    pub column: String,
    #[serde(default)]
    pub direction: SortDirection,
}

impl Sort {
    pub fn asc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            direction: SortDirection::Asc,
        }
    }

    pub fn desc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            direction: SortDirection::Desc,
        }
    }
}

impl Default for Sort {
    fn default() -> Self {
        Self::asc(CREATED_DATE)
    }
}

/// Case-insensitive substring match of `value` against any of `fields`.
/// An empty `value` matches every row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Search {
    pub value: String,
    pub fields: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterOptions {
    pub pagination: Option<Pagination>,
    /// Applied in order; `created_date ASC` when empty.
    pub sort: Vec<Sort>,
    /// Keys to keep in each returned row; all of them when absent.
    pub fields: Option<Vec<String>>,
    pub search: Option<Search>,
}

impl FilterOptions {
    pub fn paginate(mut self, page: u32, size: u32) -> Self {
        self.pagination = Some(Pagination::new(page, size));
        self
    }

    /// Add a sort key after any already given.
    pub fn sort_by(mut self, sort: Sort) -> Self {
        self.sort.push(sort);
        self
    }

    pub fn search(mut self, value: impl Into<String>, fields: &[&str]) -> Self {
        self.search = Some(Search {
            value: value.into(),
            fields: fields.iter().map(|f| f.to_string()).collect(),
        });
        self
    }

    pub fn fields(mut self, fields: &[&str]) -> Self {
        self.fields = Some(fields.iter().map(|f| f.to_string()).collect());
        self
    }
}

/// Result of [`QueryWrapper::filter`](crate::QueryWrapper::filter).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Filtered {
    Rows(Vec<Record>),
    Page(Page),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page {
    pub data: Vec<Record>,
    /// Matching rows ignoring pagination.
    pub count: i64,
}

impl Filtered {
    pub fn rows(&self) -> &[Record] {
        match self {
            Filtered::Rows(rows) => rows,
            Filtered::Page(page) => &page.data,
        }
    }

    pub fn into_rows(self) -> Vec<Record> {
        match self {
            Filtered::Rows(rows) => rows,
            Filtered::Page(page) => page.data,
        }
    }
}

// ============ WHERE clause ============

#[derive(Debug, Clone, PartialEq)]
enum Condition {
    IsNull(String),
    Equals {
        column: String,
        value: String,
        column_type: ColumnType,
    },
    Search {
        columns: Vec<String>,
        pattern: String,
    },
}

/// Validated filter conditions, pushable into more than one statement.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct WhereClause {
    conditions: Vec<Condition>,
}

impl WhereClause {
    pub(crate) fn new(
        filter: &Record,
        search: Option<&Search>,
        columns: &[ColumnDefinition],
    ) -> Result<Self, ValidationError> {
        let mut conditions = Vec::new();

        for (key, value) in filter {
            let column_type = column_type_of(columns, key)
                .ok_or_else(|| ValidationError::unknown_column(key, "filter"))?;
            let formatted = format_value(key, column_type, value)?;
            match bind_text(&formatted) {
                None => conditions.push(Condition::IsNull(key.clone())),
                Some(value) => conditions.push(Condition::Equals {
                    column: key.clone(),
                    value,
                    column_type,
                }),
            }
        }

        if let Some(search) = search.filter(|s| !s.value.is_empty()) {
            let mut searched = Vec::new();
            for field in &search.fields {
                if column_type_of(columns, field).is_none() {
                    return Err(ValidationError::unknown_column(field, "search"));
                }
                if field != ID_COLUMN {
                    searched.push(field.clone());
                }
            }
            if !searched.is_empty() {
                conditions.push(Condition::Search {
                    columns: searched,
                    pattern: like_pattern(&search.value),
                });
            }
        }

        Ok(Self { conditions })
    }

    pub(crate) fn push_to(&self, qb: &mut QueryBuilder<'static, Postgres>) {
        for (i, condition) in self.conditions.iter().enumerate() {
            qb.push(if i == 0 { " WHERE " } else { " AND " });
            match condition {
                Condition::IsNull(column) => {
                    qb.push(column_ref(column)).push(" IS NULL");
                }
                // json has no equality operator
                Condition::Equals {
                    column,
                    value,
                    column_type: ColumnType::Json,
                } => {
                    qb.push(column_ref(column)).push("::jsonb = ");
                    qb.push_bind(value.clone()).push("::jsonb");
                }
                Condition::Equals {
                    column,
                    value,
                    column_type,
                } => {
                    qb.push(column_ref(column)).push(" = ");
                    qb.push_bind(value.clone())
                        .push("::")
                        .push(cast_type(*column_type));
                }
                Condition::Search { columns, pattern } => {
                    qb.push("(");
                    for (j, column) in columns.iter().enumerate() {
                        if j > 0 {
                            qb.push(" OR ");
                        }
                        qb.push(column_ref(column)).push("::text ILIKE ");
                        qb.push_bind(pattern.clone());
                    }
                    qb.push(")");
                }
            }
        }
    }
}

/// `id` always closes the ordering: rows inserted by one statement share
/// `created_date`, and pages must not overlap.
pub(crate) fn push_order_and_page(
    qb: &mut QueryBuilder<'static, Postgres>,
    sort: &[Sort],
    pagination: Option<&Pagination>,
) {
    let default = [Sort::default()];
    let sort = if sort.is_empty() { &default[..] } else { sort };

    qb.push(" ORDER BY ");
    for (i, key) in sort.iter().enumerate() {
        if i > 0 {
            qb.push(", ");
        }
        qb.push(column_ref(&key.column))
            .push(" ")
            .push(key.direction.as_sql());
    }
    if !sort.iter().any(|key| key.column == ID_COLUMN) {
        qb.push(", ").push(column_ref(ID_COLUMN)).push(" ASC");
    }
    if let Some(pagination) = pagination {
        qb.push(" LIMIT ").push_bind(i64::from(pagination.size));
        qb.push(" OFFSET ").push_bind(pagination.offset());
    }
}

pub(crate) fn check_sort(sort: &[Sort], columns: &[ColumnDefinition]) -> Result<(), ValidationError> {
    for key in sort {
        if column_type_of(columns, &key.column).is_none() {
            return Err(ValidationError::unknown_column(&key.column, "sort"));
        }
    }
    Ok(())
}

/// Keep only `fields` in `record`.
pub(crate) fn project(mut record: Record, fields: Option<&[String]>) -> Record {
    if let Some(fields) = fields.filter(|f| !f.is_empty()) {
        record.retain(|key, _| fields.iter().any(|f| f == key));
    }
    record
}

pub(crate) fn check_fields(
    fields: Option<&[String]>,
    columns: &[ColumnDefinition],
) -> Result<(), ValidationError> {
    for field in fields.unwrap_or_default() {
        if column_type_of(columns, field).is_none() {
            return Err(ValidationError::unknown_column(field, "fields"));
        }
    }
    Ok(())
}
