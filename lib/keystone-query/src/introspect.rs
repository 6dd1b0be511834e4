use serde::Serialize;

use crate::error::QueryError;
use crate::QueryWrapper;

/// Names of what currently exists for one table. Always fetched fresh.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LiveTableState {
    pub columns: Vec<String>,
    pub indices: Vec<String>,
    pub foreign_keys: Vec<String>,
}

impl LiveTableState {
    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c == name)
    }

    pub fn has_index(&self, name: &str) -> bool {
        self.indices.iter().any(|i| i == name)
    }

    pub fn has_foreign_key(&self, name: &str) -> bool {
        self.foreign_keys.iter().any(|f| f == name)
    }
}

impl QueryWrapper {
    pub async fn list_tables(&self) -> Result<Vec<String>, QueryError> {
        let tables = sqlx::query_scalar::<_, String>(
            r#"
            SELECT table_name::text
            FROM information_schema.tables
            WHERE table_schema = 'public'
                AND table_type = 'BASE TABLE'
            ORDER BY table_name
            "#,
        )
        .fetch_all(self.pool())
        .await?;
        Ok(tables)
    }

    pub async fn list_columns(&self, table: &str) -> Result<Vec<String>, QueryError> {
        let columns = sqlx::query_scalar::<_, String>(
            r#"
            SELECT column_name::text
            FROM information_schema.columns
            WHERE table_schema = 'public'
                AND table_name = $1
            ORDER BY ordinal_position
            "#,
        )
        .bind(table)
        .fetch_all(self.pool())
        .await?;
        Ok(columns)
    }

    /// Every index on the table, including those backing unique constraints.
    pub async fn list_indices(&self, table: &str) -> Result<Vec<String>, QueryError> {
        let indices = sqlx::query_scalar::<_, String>(
            r#"
            SELECT indexname::text
            FROM pg_indexes
            WHERE schemaname = 'public'
                AND tablename = $1
            ORDER BY indexname
            "#,
        )
        .bind(table)
        .fetch_all(self.pool())
        .await?;
        Ok(indices)
    }

    pub async fn list_foreign_keys(&self, table: &str) -> Result<Vec<String>, QueryError> {
        let foreign_keys = sqlx::query_scalar::<_, String>(
            r#"
            SELECT c.conname::text
            FROM pg_constraint c
            JOIN pg_class r ON r.oid = c.conrelid
            JOIN pg_namespace n ON n.oid = r.relnamespace
            WHERE c.contype = 'f'
                AND n.nspname = 'public'
                AND r.relname = $1
            ORDER BY c.conname
            "#,
        )
        .bind(table)
        .fetch_all(self.pool())
        .await?;
        Ok(foreign_keys)
    }

    pub async fn live_state(&self, table: &str) -> Result<LiveTableState, QueryError> {
        let (columns, indices, foreign_keys) = tokio::try_join!(
            self.list_columns(table),
            self.list_indices(table),
            self.list_foreign_keys(table),
        )?;
        Ok(LiveTableState {
            columns,
            indices,
            foreign_keys,
        })
    }
}
