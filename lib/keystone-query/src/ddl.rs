//! Structural changes.
//!
//! Statement rendering is pure and kept separate from execution so the SQL
//! can be checked without a server. Every primitive is safe to repeat: it
//! either uses `IF [NOT] EXISTS` or its "already there" (for a create) or
//! "already gone" (for a drop) error is swallowed by
//! [`QueryWrapper::execute_ddl`].

use keystone_schema::{
    constraint_name, ColumnDefinition, ColumnType, ConstraintKind, CREATED_DATE, ID_COLUMN,
    UPDATED_DATE,
};
use serde_json::Value;
use tracing::{debug, info};

use crate::error::{is_already_applied, DdlEffect, QueryError};
use crate::sql::{quote_ident, quote_literal};
use crate::QueryWrapper;

const DEFAULT_STRING_LENGTH: u32 = 255;
const DEFAULT_DECIMAL_PRECISION: u32 = 8;
const DEFAULT_DECIMAL_SCALE: u32 = 2;
// real holds up to 24 bits of mantissa
const REAL_MAX_PRECISION: u32 = 24;

pub fn column_sql_type(column: &ColumnDefinition) -> String {
    let param = |i: usize| column.type_params.get(i).copied();
    match column.column_type {
        ColumnType::String => format!("varchar({})", param(0).unwrap_or(DEFAULT_STRING_LENGTH)),
        ColumnType::Uuid => "uuid".to_string(),
        ColumnType::Date => "date".to_string(),
        ColumnType::Datetime | ColumnType::Timestamp => "timestamptz".to_string(),
        ColumnType::Integer => "integer".to_string(),
        ColumnType::BigInteger => "bigint".to_string(),
        ColumnType::Decimal => format!(
            "numeric({}, {})",
            param(0).unwrap_or(DEFAULT_DECIMAL_PRECISION),
            param(1).unwrap_or(DEFAULT_DECIMAL_SCALE)
        ),
        ColumnType::Float => match param(0) {
            Some(p) if p > REAL_MAX_PRECISION => "double precision".to_string(),
            _ => "real".to_string(),
        },
        ColumnType::Boolean => "boolean".to_string(),
        ColumnType::Json => "json".to_string(),
        ColumnType::Jsonb => "jsonb".to_string(),
    }
}

pub fn default_literal(column: &ColumnDefinition) -> Option<String> {
    let value = column.default.as_ref()?;
    let literal = match value {
        Value::Null => "NULL".to_string(),
        _ if column.column_type.is_json() => quote_literal(&value.to_string()),
        Value::Bool(true) => "TRUE".to_string(),
        Value::Bool(false) => "FALSE".to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => quote_literal(s),
        other => quote_literal(&other.to_string()),
    };
    Some(literal)
}

/// Column clause for `CREATE TABLE` / `ADD COLUMN`, with unique and foreign
/// key constraints inline under their generated names.
pub fn column_definition_sql(table: &str, column: &ColumnDefinition) -> String {
    let name = quote_ident(&column.column_name);
    let mut sql = format!("{} {}", name, column_sql_type(column));

    if column.required {
        sql.push_str(" NOT NULL");
    }
    if let Some(default) = default_literal(column) {
        sql.push_str(&format!(" DEFAULT {}", default));
    }
    if column.unsigned {
        sql.push_str(&format!(" CHECK ({} >= 0)", name));
    }
    if column.unique {
        let constraint = constraint_name(table, &column.column_name, ConstraintKind::Unique);
        sql.push_str(&format!(" CONSTRAINT {} UNIQUE", quote_ident(&constraint)));
    }
    if let Some(references) = references_sql(column) {
        let constraint = constraint_name(table, &column.column_name, ConstraintKind::Foreign);
        sql.push_str(&format!(" CONSTRAINT {} {}", quote_ident(&constraint), references));
    }
    sql
}

fn references_sql(column: &ColumnDefinition) -> Option<String> {
    if !column.foreign_key {
        return None;
    }
    let reference_table = column.reference_table.as_deref()?;
    Some(format!(
        "REFERENCES {} ({}) ON UPDATE {} ON DELETE {}",
        quote_ident(reference_table),
        quote_ident(column.reference_column()),
        column.on_update_action().as_sql(),
        column.on_delete_action().as_sql()
    ))
}

/// A bare table: uuid key plus the audit timestamps.
pub fn create_table_sql(table: &str) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {} (\n  {} uuid PRIMARY KEY DEFAULT uuid_generate_v4(),\n  {} timestamptz NOT NULL DEFAULT now(),\n  {} timestamptz NOT NULL DEFAULT now()\n)",
        quote_ident(table),
        quote_ident(ID_COLUMN),
        quote_ident(CREATED_DATE),
        quote_ident(UPDATED_DATE)
    )
}

pub fn drop_table_sql(table: &str) -> String {
    format!("DROP TABLE IF EXISTS {} CASCADE", quote_ident(table))
}

pub fn add_columns_sql(table: &str, columns: &[&ColumnDefinition]) -> Option<String> {
    if columns.is_empty() {
        return None;
    }
    let clauses: Vec<String> = columns
        .iter()
        .map(|c| format!("ADD COLUMN IF NOT EXISTS {}", column_definition_sql(table, c)))
        .collect();
    Some(format!("ALTER TABLE {} {}", quote_ident(table), clauses.join(", ")))
}

pub fn drop_columns_sql(table: &str, columns: &[&str]) -> Option<String> {
    if columns.is_empty() {
        return None;
    }
    let clauses: Vec<String> = columns
        .iter()
        .map(|c| format!("DROP COLUMN IF EXISTS {}", quote_ident(c)))
        .collect();
    Some(format!("ALTER TABLE {} {}", quote_ident(table), clauses.join(", ")))
}

pub fn create_index_sql(table: &str, column: &str) -> String {
    format!(
        "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
        quote_ident(&constraint_name(table, column, ConstraintKind::Index)),
        quote_ident(table),
        quote_ident(column)
    )
}

pub fn drop_index_sql(table: &str, column: &str) -> String {
    format!(
        "DROP INDEX IF EXISTS {}",
        quote_ident(&constraint_name(table, column, ConstraintKind::Index))
    )
}

pub fn create_unique_sql(table: &str, column: &str) -> String {
    format!(
        "ALTER TABLE {} ADD CONSTRAINT {} UNIQUE ({})",
        quote_ident(table),
        quote_ident(&constraint_name(table, column, ConstraintKind::Unique)),
        quote_ident(column)
    )
}

pub fn create_foreign_key_sql(table: &str, column: &ColumnDefinition) -> Option<String> {
    let references = references_sql(column)?;
    Some(format!(
        "ALTER TABLE {} ADD CONSTRAINT {} FOREIGN KEY ({}) {}",
        quote_ident(table),
        quote_ident(&constraint_name(table, &column.column_name, ConstraintKind::Foreign)),
        quote_ident(&column.column_name),
        references
    ))
}

pub fn drop_constraint_sql(table: &str, column: &str, kind: ConstraintKind) -> String {
    format!(
        "ALTER TABLE {} DROP CONSTRAINT IF EXISTS {}",
        quote_ident(table),
        quote_ident(&constraint_name(table, column, kind))
    )
}

pub fn install_extension_sql(extension: &str) -> String {
    format!("CREATE EXTENSION IF NOT EXISTS {}", quote_ident(extension))
}

pub fn drop_trigger_sql(table: &str, trigger: &str) -> String {
    format!("DROP TRIGGER IF EXISTS {} ON {}", quote_ident(trigger), quote_ident(table))
}

/// `events` is the timing clause, e.g. `BEFORE INSERT`.
pub fn create_trigger_sql(table: &str, trigger: &str, events: &str, function: &str) -> String {
    format!(
        "CREATE TRIGGER {} {} ON {} FOR EACH ROW EXECUTE FUNCTION {}()",
        quote_ident(trigger),
        events,
        quote_ident(table),
        function
    )
}

// ============ Execution ============

impl QueryWrapper {
    /// Run one structural statement.
    ///
    /// Returns `false` when the server reports the change as already applied
    /// in the direction given by `effect`; every other error propagates.
    pub async fn execute_ddl(&self, sql: &str, effect: DdlEffect) -> Result<bool, QueryError> {
        debug!(sql, "executing ddl");
        match sqlx::query(sql).execute(self.pool()).await {
            Ok(_) => Ok(true),
            Err(e) if is_already_applied(&e, effect) => {
                debug!(sql, error = %e, "ddl already applied");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Run raw SQL, possibly several statements, without preparing it.
    pub async fn execute_raw(&self, sql: &str) -> Result<(), QueryError> {
        sqlx::raw_sql(sql).execute(self.pool()).await?;
        Ok(())
    }

    pub async fn create_table(&self, table: &str) -> Result<bool, QueryError> {
        let created = self.execute_ddl(&create_table_sql(table), DdlEffect::Create).await?;
        if created {
            info!(table, "created table");
        }
        Ok(created)
    }

    pub async fn drop_table(&self, table: &str) -> Result<bool, QueryError> {
        let dropped = self.execute_ddl(&drop_table_sql(table), DdlEffect::Drop).await?;
        if dropped {
            info!(table, "dropped table");
        }
        Ok(dropped)
    }

    pub async fn create_columns(
        &self,
        table: &str,
        columns: &[&ColumnDefinition],
    ) -> Result<bool, QueryError> {
        let Some(sql) = add_columns_sql(table, columns) else {
            return Ok(false);
        };
        let applied = self.execute_ddl(&sql, DdlEffect::Create).await?;
        if applied {
            info!(table, count = columns.len(), "added columns");
        }
        Ok(applied)
    }

    pub async fn drop_columns(&self, table: &str, columns: &[&str]) -> Result<bool, QueryError> {
        let Some(sql) = drop_columns_sql(table, columns) else {
            return Ok(false);
        };
        let applied = self.execute_ddl(&sql, DdlEffect::Drop).await?;
        if applied {
            info!(table, ?columns, "dropped columns");
        }
        Ok(applied)
    }

    pub async fn create_index(&self, table: &str, column: &str) -> Result<bool, QueryError> {
        self.execute_ddl(&create_index_sql(table, column), DdlEffect::Create)
            .await
    }

    pub async fn drop_index(&self, table: &str, column: &str) -> Result<bool, QueryError> {
        self.execute_ddl(&drop_index_sql(table, column), DdlEffect::Drop)
            .await
    }

    pub async fn create_unique(&self, table: &str, column: &str) -> Result<bool, QueryError> {
        self.execute_ddl(&create_unique_sql(table, column), DdlEffect::Create)
            .await
    }

    pub async fn drop_unique(&self, table: &str, column: &str) -> Result<bool, QueryError> {
        let sql = drop_constraint_sql(table, column, ConstraintKind::Unique);
        self.execute_ddl(&sql, DdlEffect::Drop).await
    }

    /// No-op for a column that is not a foreign key.
    pub async fn create_foreign_key(
        &self,
        table: &str,
        column: &ColumnDefinition,
    ) -> Result<bool, QueryError> {
        match create_foreign_key_sql(table, column) {
            Some(sql) => self.execute_ddl(&sql, DdlEffect::Create).await,
            None => Ok(false),
        }
    }

    pub async fn drop_foreign_key(&self, table: &str, column: &str) -> Result<bool, QueryError> {
        let sql = drop_constraint_sql(table, column, ConstraintKind::Foreign);
        self.execute_ddl(&sql, DdlEffect::Drop).await
    }

    pub async fn install_extension(&self, extension: &str) -> Result<bool, QueryError> {
        self.execute_ddl(&install_extension_sql(extension), DdlEffect::Create)
            .await
    }

    /// `CREATE OR REPLACE FUNCTION ...` statements; the body may contain `$$` quoting.
    pub async fn create_function(&self, sql: &str) -> Result<(), QueryError> {
        self.execute_raw(sql).await
    }

    pub async fn drop_trigger(&self, table: &str, trigger: &str) -> Result<bool, QueryError> {
        self.execute_ddl(&drop_trigger_sql(table, trigger), DdlEffect::Drop)
            .await
    }

    pub async fn create_trigger(
        &self,
        table: &str,
        trigger: &str,
        events: &str,
        function: &str,
    ) -> Result<bool, QueryError> {
        let sql = create_trigger_sql(table, trigger, events, function);
        self.execute_ddl(&sql, DdlEffect::Create).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keystone_schema::ReferentialAction;
    use serde_json::json;

    #[test]
    fn test_column_sql_types() {
        let string = ColumnDefinition::new("name", ColumnType::String);
        assert_eq!(column_sql_type(&string), "varchar(255)");

        let mut short = ColumnDefinition::new("code", ColumnType::String);
        short.type_params = vec![12];
        assert_eq!(column_sql_type(&short), "varchar(12)");

        let mut price = ColumnDefinition::new("price", ColumnType::Decimal);
        assert_eq!(column_sql_type(&price), "numeric(8, 2)");
        price.type_params = vec![12, 4];
        assert_eq!(column_sql_type(&price), "numeric(12, 4)");

        let mut ratio = ColumnDefinition::new("ratio", ColumnType::Float);
        assert_eq!(column_sql_type(&ratio), "real");
        ratio.type_params = vec![53];
        assert_eq!(column_sql_type(&ratio), "double precision");

        let seen = ColumnDefinition::new("seen_at", ColumnType::Datetime);
        assert_eq!(column_sql_type(&seen), "timestamptz");
    }

    #[test]
    fn test_default_literals() {
        let flag = ColumnDefinition::new("active", ColumnType::Boolean).with_default(json!(true));
        assert_eq!(default_literal(&flag).as_deref(), Some("TRUE"));

        let label = ColumnDefinition::new("label", ColumnType::String).with_default(json!("it's"));
        assert_eq!(default_literal(&label).as_deref(), Some("'it''s'"));

        let meta = ColumnDefinition::new("meta", ColumnType::Jsonb).with_default(json!({"a": 1}));
        assert_eq!(default_literal(&meta).as_deref(), Some("'{\"a\":1}'"));

        let count = ColumnDefinition::new("count", ColumnType::Integer);
        assert_eq!(default_literal(&count), None);
    }

    #[test]
    fn test_column_definition_with_inline_constraints() {
        let column = ColumnDefinition::new("company_id", ColumnType::Uuid)
            .required()
            .references("tbl_Company", "id")
            .on_delete(ReferentialAction::Cascade);
        assert_eq!(
            column_definition_sql("tbl_User", &column),
            "\"company_id\" uuid NOT NULL CONSTRAINT \"tbl_user_company_id_foreign\" \
             REFERENCES \"tbl_Company\" (\"id\") ON UPDATE NO ACTION ON DELETE CASCADE"
        );

        let mut stock = ColumnDefinition::new("stock", ColumnType::Integer).unique();
        stock.unsigned = true;
        assert_eq!(
            column_definition_sql("tbl_Item", &stock),
            "\"stock\" integer CHECK (\"stock\" >= 0) CONSTRAINT \"tbl_item_stock_unique\" UNIQUE"
        );
    }

    #[test]
    fn test_create_table_is_bare() {
        let sql = create_table_sql("tbl_User");
        assert!(sql.starts_with("CREATE TABLE IF NOT EXISTS \"tbl_User\""));
        assert!(sql.contains("\"id\" uuid PRIMARY KEY DEFAULT uuid_generate_v4()"));
        assert!(sql.contains("\"updated_date\" timestamptz NOT NULL DEFAULT now()"));
    }

    #[test]
    fn test_column_lists() {
        let name = ColumnDefinition::new("name", ColumnType::String);
        let age = ColumnDefinition::new("age", ColumnType::Integer);
        assert_eq!(
            add_columns_sql("t1", &[&name, &age]).unwrap(),
            "ALTER TABLE \"t1\" ADD COLUMN IF NOT EXISTS \"name\" varchar(255), \
             ADD COLUMN IF NOT EXISTS \"age\" integer"
        );
        assert_eq!(add_columns_sql("t1", &[]), None);
        assert_eq!(
            drop_columns_sql("t1", &["legacy"]).unwrap(),
            "ALTER TABLE \"t1\" DROP COLUMN IF EXISTS \"legacy\""
        );
    }

    #[test]
    fn test_constraint_statements_use_generated_names() {
        assert_eq!(
            create_index_sql("tbl_User", "email"),
            "CREATE INDEX IF NOT EXISTS \"tbl_user_email_index\" ON \"tbl_User\" (\"email\")"
        );
        assert_eq!(drop_index_sql("tbl_User", "email"), "DROP INDEX IF EXISTS \"tbl_user_email_index\"");
        assert_eq!(
            create_unique_sql("tbl_User", "email"),
            "ALTER TABLE \"tbl_User\" ADD CONSTRAINT \"tbl_user_email_unique\" UNIQUE (\"email\")"
        );
        assert_eq!(
            drop_constraint_sql("tbl_User", "company_id", ConstraintKind::Foreign),
            "ALTER TABLE \"tbl_User\" DROP CONSTRAINT IF EXISTS \"tbl_user_company_id_foreign\""
        );

        let plain = ColumnDefinition::new("email", ColumnType::String);
        assert_eq!(create_foreign_key_sql("tbl_User", &plain), None);
    }

    #[test]
    fn test_trigger_statements() {
        assert_eq!(
            create_trigger_sql("tbl_Post", "tbl_post_slug_trigger", "BEFORE INSERT", "keystone_set_slug"),
            "CREATE TRIGGER \"tbl_post_slug_trigger\" BEFORE INSERT ON \"tbl_Post\" \
             FOR EACH ROW EXECUTE FUNCTION keystone_set_slug()"
        );
        assert_eq!(
            drop_trigger_sql("tbl_Post", "tbl_post_slug_trigger"),
            "DROP TRIGGER IF EXISTS \"tbl_post_slug_trigger\" ON \"tbl_Post\""
        );
        assert_eq!(
            install_extension_sql("uuid-ossp"),
            "CREATE EXTENSION IF NOT EXISTS \"uuid-ossp\""
        );
    }
}
