use keystone_config::{connect, DbConfig, DbPool};
use keystone_schema::{SchemaDefinition, TableDefinition};
use std::sync::Arc;
use tracing::info;

use crate::error::{is_already_applied, DdlEffect, QueryError};
use crate::sql::quote_ident;

/// Data access bound to one database and one schema declaration.
pub struct QueryWrapper {
    schema: Arc<SchemaDefinition>,
    config: DbConfig,
    pool: DbPool,
}

impl QueryWrapper {
    /// Bind to the configured database, or to the one the schema names.
    ///
    /// The pool is lazy: nothing connects until the first query.
    pub fn new(schema: SchemaDefinition, config: DbConfig) -> Self {
        Self::with_shared_schema(Arc::new(schema), config)
    }

    pub fn with_shared_schema(schema: Arc<SchemaDefinition>, config: DbConfig) -> Self {
        let config = match &schema.database {
            Some(database) => config.with_database(database.clone()),
            None => config,
        };
        let pool = connect(&config, &config.database);
        Self {
            schema,
            config,
            pool,
        }
    }

    pub fn schema(&self) -> &SchemaDefinition {
        &self.schema
    }

    pub fn schema_handle(&self) -> Arc<SchemaDefinition> {
        Arc::clone(&self.schema)
    }

    pub fn config(&self) -> &DbConfig {
        &self.config
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    pub fn database(&self) -> &str {
        &self.config.database
    }

    pub(crate) fn table(&self, name: &str) -> Result<&TableDefinition, QueryError> {
        Ok(self.schema.table(name)?)
    }

    /// Whether the bound database accepts connections.
    pub async fn check_database(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }

    /// Create database `name` from the maintenance database.
    ///
    /// A connection cannot create or drop the database it is bound to, so the
    /// current pool is closed, the statement runs on a short-lived pool against
    /// the maintenance database, and a fresh lazy pool is bound afterwards.
    pub async fn create_database(&mut self, name: &str) -> Result<bool, QueryError> {
        let sql = format!("CREATE DATABASE {}", quote_ident(name));
        let created = self.on_maintenance_database(&sql, DdlEffect::Create).await?;
        if created {
            info!(database = name, "created database");
        }
        Ok(created)
    }

    /// Drop database `name`, terminating any sessions still attached to it.
    ///
    /// Sessions of a just-closed pool can outlive `close()` on the server side;
    /// `WITH (FORCE)` (PostgreSQL 13+) ends them instead of failing with 55006.
    pub async fn drop_database(&mut self, name: &str) -> Result<bool, QueryError> {
        let sql = drop_database_sql(name);
        let dropped = self.on_maintenance_database(&sql, DdlEffect::Drop).await?;
        if dropped {
            info!(database = name, "dropped database");
        }
        Ok(dropped)
    }

    async fn on_maintenance_database(
        &mut self,
        sql: &str,
        effect: DdlEffect,
    ) -> Result<bool, QueryError> {
        self.pool.close().await;

        let maintenance = connect(&self.config, &self.config.maintenance_database);
        let result = sqlx::query(sql).execute(&maintenance).await;
        maintenance.close().await;

        self.pool = connect(&self.config, &self.config.database);

        match result {
            Ok(_) => Ok(true),
            Err(e) if is_already_applied(&e, effect) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

pub(crate) fn drop_database_sql(name: &str) -> String {
    format!("DROP DATABASE IF EXISTS {} WITH (FORCE)", quote_ident(name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use keystone_schema::{ColumnDefinition, ColumnType};

    fn schema(database: Option<&str>) -> SchemaDefinition {
        let mut schema = SchemaDefinition::new(vec![TableDefinition::new(
            "tbl_Note",
            vec![ColumnDefinition::new("body", ColumnType::String)],
        )])
        .unwrap();
        schema.database = database.map(str::to_string);
        schema
    }

    #[tokio::test]
    async fn test_schema_database_overrides_config() {
        let config = DbConfig::from_url("postgres://app@127.0.0.1:1/configured").unwrap();

        let db = QueryWrapper::new(schema(None), config.clone());
        assert_eq!(db.database(), "configured");

        let db = QueryWrapper::new(schema(Some("declared")), config);
        assert_eq!(db.database(), "declared");
        assert!(db.table("tbl_Note").is_ok());
        assert!(matches!(db.table("tbl_Missing"), Err(QueryError::Schema(_))));
    }

    #[test]
    fn test_drop_database_terminates_sessions() {
        assert_eq!(
            drop_database_sql("keystone_test_1"),
            "DROP DATABASE IF EXISTS \"keystone_test_1\" WITH (FORCE)"
        );
    }
}
