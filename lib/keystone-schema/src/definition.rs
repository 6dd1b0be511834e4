use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::Path;

use crate::error::SchemaError;
use crate::naming::{
    constraint_name, is_audit_column, trigger_name, ConstraintKind, TriggerKind, ID_COLUMN,
    MAX_IDENTIFIER_LEN, NAME_COLUMN, SLUG_COLUMN,
};
use crate::types::{self, ColumnType};

// ============ Type Definitions ============

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaDefinition {
    /// Target database. Overrides the configured one when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    pub tables: Vec<TableDefinition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableDefinition {
    pub table_name: String,
    /// Adds a derived, unique `slug` column filled from `name` on insert.
    #[serde(default, skip_serializing_if = "is_false")]
    pub slug: bool,
    #[serde(default)]
    pub columns: Vec<ColumnDefinition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDefinition {
    pub column_name: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub type_params: Vec<u32>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub required: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub unique: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub unsigned: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub index: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub foreign_key: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_table: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_column: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_update: Option<ReferentialAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_delete: Option<ReferentialAction>,
    /// Filled by the database rather than the caller; exempt from required checks.
    #[serde(skip)]
    pub derived: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReferentialAction {
    #[serde(rename = "CASCADE")]
    Cascade,
    #[serde(rename = "RESTRICT")]
    Restrict,
    #[default]
    #[serde(rename = "NO ACTION")]
    NoAction,
    #[serde(rename = "SET NULL")]
    SetNull,
}

impl ReferentialAction {
    pub fn as_sql(self) -> &'static str {
        match self {
            ReferentialAction::Cascade => "CASCADE",
            ReferentialAction::Restrict => "RESTRICT",
            ReferentialAction::NoAction => "NO ACTION",
            ReferentialAction::SetNull => "SET NULL",
        }
    }
}

impl fmt::Display for ReferentialAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

fn is_false(value: &bool) -> bool {
    !*value
}

// ============ ColumnDefinition Methods ============

impl ColumnDefinition {
    pub fn new(column_name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            column_name: column_name.into(),
            column_type,
            type_params: Vec::new(),
            required: false,
            unique: false,
            unsigned: false,
            default: None,
            index: false,
            foreign_key: false,
            reference_table: None,
            reference_column: None,
            on_update: None,
            on_delete: None,
            derived: false,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn indexed(mut self) -> Self {
        self.index = true;
        self
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn references(mut self, table: impl Into<String>, column: impl Into<String>) -> Self {
        self.foreign_key = true;
        self.reference_table = Some(table.into());
        self.reference_column = Some(column.into());
        self
    }

    pub fn on_delete(mut self, action: ReferentialAction) -> Self {
        self.on_delete = Some(action);
        self
    }

    /// The implicit column appended to slug tables.
    pub fn slug() -> Self {
        let mut column = Self::new(SLUG_COLUMN, ColumnType::String).required().unique();
        column.derived = true;
        column
    }

    pub fn reference_column(&self) -> &str {
        self.reference_column.as_deref().unwrap_or(ID_COLUMN)
    }

    pub fn on_update_action(&self) -> ReferentialAction {
        self.on_update.unwrap_or_default()
    }

    pub fn on_delete_action(&self) -> ReferentialAction {
        self.on_delete.unwrap_or_default()
    }
}

// ============ TableDefinition Methods ============

impl TableDefinition {
    pub fn new(table_name: impl Into<String>, columns: Vec<ColumnDefinition>) -> Self {
        Self {
            table_name: table_name.into(),
            slug: false,
            columns,
        }
    }

    pub fn with_slug(mut self) -> Self {
        self.slug = true;
        self
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDefinition> {
        self.columns.iter().find(|c| c.column_name == name)
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.column_name.as_str())
    }

    fn has_column(&self, name: &str) -> bool {
        is_audit_column(name) || self.column(name).is_some()
    }
}

// ============ SchemaDefinition Methods ============

impl SchemaDefinition {
    pub fn new(tables: Vec<TableDefinition>) -> Result<Self, SchemaError> {
        Self {
            database: None,
            tables,
        }
        .prepare()
    }

    /// Read a schema file. `.json` files are parsed as JSON, anything else as TOML.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, SchemaError> {
        let path = path.as_ref();
        let load_error = |message: String| SchemaError::Load {
            path: path.display().to_string(),
            message,
        };

        let contents = fs::read_to_string(path).map_err(|e| load_error(e.to_string()))?;
        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

        if is_json {
            Self::from_json_str(&contents)
        } else {
            Self::from_toml_str(&contents)
        }
        .map_err(|e| match e {
            SchemaError::Load { message, .. } => load_error(message),
            other => other,
        })
    }

    pub fn from_toml_str(toml_str: &str) -> Result<Self, SchemaError> {
        let schema: SchemaDefinition = toml::from_str(toml_str).map_err(|e| SchemaError::Load {
            path: "<toml>".to_string(),
            message: e.to_string(),
        })?;
        schema.prepare()
    }

    pub fn from_json_str(json_str: &str) -> Result<Self, SchemaError> {
        let schema: SchemaDefinition =
            serde_json::from_str(json_str).map_err(|e| SchemaError::Load {
                path: "<json>".to_string(),
                message: e.to_string(),
            })?;
        schema.prepare()
    }

    /// Serialize as TOML. Implicit slug columns are left out.
    pub fn to_toml_string(&self) -> Result<String, SchemaError> {
        let mut declared = self.clone();
        for table in &mut declared.tables {
            table.columns.retain(|c| !c.derived);
        }
        toml::to_string_pretty(&declared).map_err(|e| SchemaError::invalid(e.to_string()))
    }

    /// Look up a table for data access. Tables without columns are rejected.
    pub fn table(&self, name: &str) -> Result<&TableDefinition, SchemaError> {
        let table = self
            .tables
            .iter()
            .find(|t| t.table_name == name)
            .ok_or_else(|| SchemaError::UnknownTable(name.to_string()))?;
        if table.columns.is_empty() {
            return Err(SchemaError::EmptyColumns(name.to_string()));
        }
        Ok(table)
    }

    pub fn contains_table(&self, name: &str) -> bool {
        self.tables.iter().any(|t| t.table_name == name)
    }

    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.iter().map(|t| t.table_name.as_str())
    }

    pub fn has_slug_tables(&self) -> bool {
        self.tables.iter().any(|t| t.slug)
    }

    /// Append implicit columns and check the declaration.
    fn prepare(mut self) -> Result<Self, SchemaError> {
        for table in &mut self.tables {
            if !table.slug {
                continue;
            }
            match table.column(SLUG_COLUMN) {
                Some(column) if column.derived => {}
                Some(_) => {
                    return Err(SchemaError::invalid(format!(
                        "table {} sets slug and also declares a slug column",
                        table.table_name
                    )));
                }
                None => table.columns.push(ColumnDefinition::slug()),
            }
        }
        self.check()?;
        Ok(self)
    }

    fn check(&self) -> Result<(), SchemaError> {
        let mut table_names = HashSet::new();

        for table in &self.tables {
            let name = &table.table_name;
            if name.is_empty() {
                return Err(SchemaError::invalid("table_name must not be empty"));
            }
            if !table_names.insert(name.as_str()) {
                return Err(SchemaError::invalid(format!("duplicate table {}", name)));
            }
            check_identifier(name)?;
            check_identifier(&trigger_name(name, TriggerKind::Change))?;

            if table.slug {
                check_identifier(&trigger_name(name, TriggerKind::Slug))?;
                if table.column(NAME_COLUMN).is_none() {
                    return Err(SchemaError::invalid(format!(
                        "slug table {} must declare a name column",
                        name
                    )));
                }
            }

            self.check_columns(table)?;
        }
        Ok(())
    }

    fn check_columns(&self, table: &TableDefinition) -> Result<(), SchemaError> {
        let table_name = &table.table_name;
        let mut column_names = HashSet::new();

        for column in &table.columns {
            let name = &column.column_name;
            if name.is_empty() {
                return Err(SchemaError::invalid(format!(
                    "column_name must not be empty in table {}",
                    table_name
                )));
            }
            if is_audit_column(name) {
                return Err(SchemaError::invalid(format!(
                    "column {} of table {} is managed automatically and cannot be declared",
                    name, table_name
                )));
            }
            if !column_names.insert(name.as_str()) {
                return Err(SchemaError::invalid(format!(
                    "duplicate column {} in table {}",
                    name, table_name
                )));
            }
            check_identifier(name)?;

            if column.unique {
                check_identifier(&constraint_name(table_name, name, ConstraintKind::Unique))?;
            }
            if column.index {
                check_identifier(&constraint_name(table_name, name, ConstraintKind::Index))?;
            }
            if let Some(default) = &column.default {
                if !types::accepts(column.column_type, default) {
                    return Err(SchemaError::invalid(format!(
                        "default for {}.{} is not a valid {} value",
                        table_name, name, column.column_type
                    )));
                }
            }

            if column.foreign_key {
                check_identifier(&constraint_name(table_name, name, ConstraintKind::Foreign))?;
                self.check_reference(table_name, column)?;
            }
        }
        Ok(())
    }

    fn check_reference(&self, table_name: &str, column: &ColumnDefinition) -> Result<(), SchemaError> {
        let reference_table = column.reference_table.as_deref().ok_or_else(|| {
            SchemaError::invalid(format!(
                "foreign key {}.{} has no reference_table",
                table_name, column.column_name
            ))
        })?;

        let referenced = self
            .tables
            .iter()
            .find(|t| t.table_name == reference_table)
            .ok_or_else(|| {
                SchemaError::invalid(format!(
                    "foreign key {}.{} references unknown table {}",
                    table_name, column.column_name, reference_table
                ))
            })?;

        // tables are reconciled in declaration order
        let position = |name: &str| self.tables.iter().position(|t| t.table_name == name);
        if position(reference_table) > position(table_name) {
            return Err(SchemaError::invalid(format!(
                "foreign key {}.{} references table {} which is declared after it",
                table_name, column.column_name, reference_table
            )));
        }

        if !referenced.has_column(column.reference_column()) {
            return Err(SchemaError::invalid(format!(
                "foreign key {}.{} references unknown column {}.{}",
                table_name,
                column.column_name,
                reference_table,
                column.reference_column()
            )));
        }
        Ok(())
    }
}

fn check_identifier(name: &str) -> Result<(), SchemaError> {
    if name.len() > MAX_IDENTIFIER_LEN {
        return Err(SchemaError::invalid(format!(
            "identifier {} exceeds {} bytes",
            name, MAX_IDENTIFIER_LEN
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const COMPANY_SCHEMA: &str = r#"
        database = "db_template"

        [[tables]]
        table_name = "tbl_Company"

        [[tables.columns]]
        column_name = "name"
        type = "string"
        unique = true
        required = true

        [[tables.columns]]
        column_name = "legal_name"
        type = "string"
        required = true

        [[tables]]
        table_name = "tbl_User"

        [[tables.columns]]
        column_name = "username"
        type = "string"
        required = true
        index = true

        [[tables.columns]]
        column_name = "company_id"
        type = "uuid"
        required = true
        foreign_key = true
        reference_table = "tbl_Company"
        reference_column = "id"
        on_update = "CASCADE"
        on_delete = "RESTRICT"
    "#;

    #[test]
    fn test_from_toml_str() {
        let schema = SchemaDefinition::from_toml_str(COMPANY_SCHEMA).unwrap();
        assert_eq!(schema.database.as_deref(), Some("db_template"));
        assert_eq!(
            schema.table_names().collect::<Vec<_>>(),
            vec!["tbl_Company", "tbl_User"]
        );

        let user = schema.table("tbl_User").unwrap();
        let company_id = user.column("company_id").unwrap();
        assert_eq!(company_id.column_type, ColumnType::Uuid);
        assert_eq!(company_id.on_update_action(), ReferentialAction::Cascade);
        assert_eq!(company_id.on_delete_action(), ReferentialAction::Restrict);
        assert!(user.column("username").unwrap().index);
    }

    #[test]
    fn test_from_json_str() {
        let schema = SchemaDefinition::from_json_str(
            &json!({
                "tables": [{
                    "table_name": "tbl_Post",
                    "slug": true,
                    "columns": [
                        { "column_name": "name", "type": "string", "required": true },
                        { "column_name": "views", "type": "bigInteger", "unsigned": true, "default": 0 },
                        { "column_name": "meta", "type": "jsonb" }
                    ]
                }]
            })
            .to_string(),
        )
        .unwrap();

        let post = schema.table("tbl_Post").unwrap();
        let slug = post.column("slug").unwrap();
        assert!(slug.derived && slug.unique && slug.required);
        assert_eq!(post.columns.len(), 4);
        assert!(schema.has_slug_tables());
    }

    #[test]
    fn test_from_file_picks_format_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let toml_path = dir.path().join("schema.toml");
        fs::write(&toml_path, COMPANY_SCHEMA).unwrap();
        assert_eq!(SchemaDefinition::from_file(&toml_path).unwrap().tables.len(), 2);

        let json_path = dir.path().join("schema.json");
        fs::write(&json_path, r#"{"tables": [{"table_name": "t", "columns": []}]}"#).unwrap();
        assert_eq!(SchemaDefinition::from_file(&json_path).unwrap().tables.len(), 1);

        let missing = SchemaDefinition::from_file(dir.path().join("nope.toml")).unwrap_err();
        assert!(matches!(missing, SchemaError::Load { .. }));
    }

    #[test]
    fn test_unknown_type_rejected_at_load() {
        let err = SchemaDefinition::from_json_str(
            r#"{"tables": [{"table_name": "t", "columns": [{"column_name": "a", "type": "text"}]}]}"#,
        )
        .unwrap_err();
        assert!(matches!(err, SchemaError::Load { .. }));
    }

    #[test]
    fn test_reference_must_exist() {
        let err = SchemaDefinition::new(vec![TableDefinition::new(
            "tbl_User",
            vec![ColumnDefinition::new("company_id", ColumnType::Uuid).references("tbl_Company", "id")],
        )])
        .unwrap_err();
        assert!(err.to_string().contains("unknown table tbl_Company"));

        let err = SchemaDefinition::new(vec![
            TableDefinition::new("a", vec![ColumnDefinition::new("x", ColumnType::String)]),
            TableDefinition::new(
                "b",
                vec![ColumnDefinition::new("a_x", ColumnType::String).references("a", "y")],
            ),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("unknown column a.y"));
    }

    #[test]
    fn test_reference_must_be_declared_first() {
        let err = SchemaDefinition::new(vec![
            TableDefinition::new(
                "tbl_b",
                vec![
                    ColumnDefinition::new("title", ColumnType::String),
                    ColumnDefinition::new("a_id", ColumnType::Uuid).references("tbl_a", "id"),
                ],
            ),
            TableDefinition::new("tbl_a", vec![ColumnDefinition::new("name", ColumnType::String)]),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("tbl_b.a_id references table tbl_a which is declared after it"));

        let tree = SchemaDefinition::new(vec![TableDefinition::new(
            "tbl_Node",
            vec![ColumnDefinition::new("parent_id", ColumnType::Uuid).references("tbl_Node", "id")],
        )]);
        assert!(tree.is_ok());
    }

    #[test]
    fn test_foreign_key_needs_reference_table() {
        let mut column = ColumnDefinition::new("company_id", ColumnType::Uuid);
        column.foreign_key = true;
        let err = SchemaDefinition::new(vec![TableDefinition::new("t", vec![column])]).unwrap_err();
        assert!(err.to_string().contains("no reference_table"));
    }

    #[test]
    fn test_duplicates_and_reserved_columns_rejected() {
        assert!(SchemaDefinition::new(vec![
            TableDefinition::new("t", vec![]),
            TableDefinition::new("t", vec![]),
        ])
        .is_err());

        assert!(SchemaDefinition::new(vec![TableDefinition::new(
            "t",
            vec![
                ColumnDefinition::new("a", ColumnType::String),
                ColumnDefinition::new("a", ColumnType::Integer),
            ],
        )])
        .is_err());

        let err = SchemaDefinition::new(vec![TableDefinition::new(
            "t",
            vec![ColumnDefinition::new("created_date", ColumnType::Timestamp)],
        )])
        .unwrap_err();
        assert!(err.to_string().contains("managed automatically"));
    }

    #[test]
    fn test_slug_table_requires_name() {
        let err = SchemaDefinition::new(vec![
            TableDefinition::new("t", vec![ColumnDefinition::new("title", ColumnType::String)])
                .with_slug(),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("must declare a name column"));

        let err = SchemaDefinition::new(vec![
            TableDefinition::new(
                "t",
                vec![
                    ColumnDefinition::new("name", ColumnType::String),
                    ColumnDefinition::new("slug", ColumnType::String),
                ],
            )
            .with_slug(),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("also declares a slug column"));
    }

    #[test]
    fn test_identifier_length_checked() {
        let long_table = "t".repeat(60);
        let err = SchemaDefinition::new(vec![TableDefinition::new(
            long_table,
            vec![ColumnDefinition::new("name", ColumnType::String).unique()],
        )])
        .unwrap_err();
        assert!(err.to_string().contains("exceeds 63 bytes"));
    }

    #[test]
    fn test_default_must_match_type() {
        let err = SchemaDefinition::new(vec![TableDefinition::new(
            "t",
            vec![ColumnDefinition::new("count", ColumnType::Integer).with_default(json!("zero"))],
        )])
        .unwrap_err();
        assert!(err.to_string().contains("default for t.count"));
    }

    #[test]
    fn test_table_lookup_errors() {
        let schema = SchemaDefinition::new(vec![TableDefinition::new("bare", vec![])]).unwrap();
        assert_eq!(
            schema.table("missing").unwrap_err(),
            SchemaError::UnknownTable("missing".to_string())
        );
        assert_eq!(
            schema.table("bare").unwrap_err(),
            SchemaError::EmptyColumns("bare".to_string())
        );
        assert!(schema.contains_table("bare"));
    }

    #[test]
    fn test_to_toml_string_omits_implicit_slug() {
        let schema = SchemaDefinition::new(vec![
            TableDefinition::new("t", vec![ColumnDefinition::new("name", ColumnType::String)])
                .with_slug(),
        ])
        .unwrap();
        let text = schema.to_toml_string().unwrap();
        assert!(!text.contains("\"slug\""));
        let reparsed = SchemaDefinition::from_toml_str(&text).unwrap();
        assert_eq!(reparsed, schema);
    }
}
