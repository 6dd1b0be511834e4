use anyhow::{Context, Result};
use keystone_query::{QueryError, QueryWrapper};
use keystone_schema::{trigger_name, ColumnDefinition, SchemaDefinition, TableDefinition, TriggerKind};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use crate::plan::{find_orphan_tables, plan_table, Change, ColumnCheck};
use crate::routines::{
    notify_function_sql, set_slug_function_sql, slugify_function_sql, CHANGE_EVENTS,
    NOTIFY_FUNCTION, SET_SLUG_FUNCTION, SLUG_EVENTS, UNACCENT_EXTENSION, UUID_EXTENSION,
};

/// Progress through one reconciliation pass.
///
/// A failed pass stays at the last stage it completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    NotStarted,
    DatabaseEnsured,
    ExtensionsInstalled,
    TablesDropped,
    /// Number of declared tables reconciled so far.
    TablesReconciled(usize),
    TriggersReinstalled,
    Done,
}

/// What a pass changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub database_created: bool,
    pub changes: Vec<Change>,
    /// Triggers dropped and recreated; this happens on every pass.
    pub triggers: usize,
}

impl ReconcileReport {
    /// True when the database already matched the declaration.
    pub fn is_noop(&self) -> bool {
        !self.database_created && self.changes.is_empty()
    }
}

/// Drives a [`QueryWrapper`] until its database matches the declared schema.
pub struct SchemaBuilder<'a> {
    db: &'a mut QueryWrapper,
    schema: Arc<SchemaDefinition>,
    stage: Stage,
}

impl<'a> SchemaBuilder<'a> {
    pub fn new(db: &'a mut QueryWrapper) -> Self {
        let schema = db.schema_handle();
        Self {
            db,
            schema,
            stage: Stage::NotStarted,
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Run one full pass. Safe to repeat; a second pass over an unchanged
    /// declaration applies no structural changes.
    pub async fn setup_schema(&mut self) -> Result<ReconcileReport> {
        self.stage = Stage::NotStarted;
        let mut report = ReconcileReport::default();
        info!(database = self.db.database(), "reconciling schema");

        report.database_created = self.ensure_database().await?;
        self.stage = Stage::DatabaseEnsured;

        self.install_routines().await?;
        self.stage = Stage::ExtensionsInstalled;

        report.changes.extend(self.drop_orphan_tables().await?);
        self.stage = Stage::TablesDropped;

        let schema = Arc::clone(&self.schema);
        for (i, table) in schema.tables.iter().enumerate() {
            let changes = self
                .reconcile_table(table)
                .await
                .with_context(|| format!("Failed to reconcile table {}", table.table_name))?;
            report.changes.extend(changes);
            self.stage = Stage::TablesReconciled(i + 1);
        }

        report.triggers = self.reinstall_triggers().await?;
        self.stage = Stage::TriggersReinstalled;

        self.stage = Stage::Done;
        info!(
            changes = report.changes.len(),
            triggers = report.triggers,
            "schema reconciled"
        );
        Ok(report)
    }

    async fn ensure_database(&mut self) -> Result<bool> {
        if self.db.check_database().await {
            return Ok(false);
        }
        let database = self.db.database().to_string();
        info!(database, "database not reachable, creating it");
        self.db
            .create_database(&database)
            .await
            .with_context(|| format!("Failed to create database {}", database))?;
        Ok(true)
    }

    async fn install_routines(&self) -> Result<()> {
        self.db
            .install_extension(UUID_EXTENSION)
            .await
            .context("Failed to install uuid-ossp")?;
        self.db
            .create_function(&notify_function_sql())
            .await
            .context("Failed to create change notification routine")?;

        if self.schema.has_slug_tables() {
            self.db
                .install_extension(UNACCENT_EXTENSION)
                .await
                .context("Failed to install unaccent")?;
            self.db
                .create_function(&slugify_function_sql())
                .await
                .context("Failed to create slug routine")?;
            self.db
                .create_function(&set_slug_function_sql())
                .await
                .context("Failed to create slug trigger routine")?;
        }
        Ok(())
    }

    async fn drop_orphan_tables(&self) -> Result<Vec<Change>> {
        let live = self.db.list_tables().await.context("Failed to list tables")?;
        let mut changes = Vec::new();

        for table in find_orphan_tables(&self.schema, &live) {
            warn!(table, "dropping table missing from schema");
            for kind in [TriggerKind::Change, TriggerKind::Slug] {
                self.db.drop_trigger(&table, &trigger_name(&table, kind)).await?;
            }
            let dropped = self
                .db
                .drop_table(&table)
                .await
                .with_context(|| format!("Failed to drop table {}", table))?;
            if dropped {
                changes.push(Change::DropTable { table });
            }
        }
        Ok(changes)
    }

    async fn reconcile_table(&self, table: &TableDefinition) -> Result<Vec<Change>> {
        let name = &table.table_name;
        let live = if self.db.list_tables().await?.contains(name) {
            Some(self.db.live_state(name).await?)
        } else {
            None
        };

        let plan = plan_table(table, live.as_ref());
        if plan.is_empty() {
            return Ok(Vec::new());
        }

        let mut applied = Vec::new();
        if let Some(change) = &plan.create_table {
            applied.extend(self.apply(table, change).await?);
        }
        if let Some(change) = &plan.drop_columns {
            applied.extend(self.apply(table, change).await?);
        }
        for check in &plan.column_checks {
            applied.extend(self.apply_column_check(table, check).await?);
        }
        if let Some(change) = &plan.add_columns {
            applied.extend(self.apply(table, change).await?);
        }
        for change in &plan.add_indices {
            applied.extend(self.apply(table, change).await?);
        }

        for change in &applied {
            info!(%change, "applied");
        }
        Ok(applied)
    }

    async fn apply_column_check(
        &self,
        table: &TableDefinition,
        check: &ColumnCheck,
    ) -> Result<Vec<Change>> {
        let (index, unique, foreign_key) = tokio::try_join!(
            self.apply_optional(table, check.index.as_ref()),
            self.apply_optional(table, check.unique.as_ref()),
            self.apply_optional(table, check.foreign_key.as_ref()),
        )?;
        Ok([index, unique, foreign_key].into_iter().flatten().collect())
    }

    async fn apply_optional(
        &self,
        table: &TableDefinition,
        change: Option<&Change>,
    ) -> Result<Option<Change>> {
        match change {
            Some(change) => self.apply(table, change).await,
            None => Ok(None),
        }
    }

    /// The change, if the database did not already have it.
    async fn apply(&self, table: &TableDefinition, change: &Change) -> Result<Option<Change>> {
        let result: Result<bool, QueryError> = match change {
            Change::CreateTable { table } => self.db.create_table(table).await,
            Change::DropTable { table } => self.db.drop_table(table).await,
            Change::AddColumns { table: name, columns } => {
                let columns: Vec<&ColumnDefinition> =
                    columns.iter().filter_map(|c| table.column(c)).collect();
                self.db.create_columns(name, &columns).await
            }
            Change::DropColumns { table, columns } => {
                let columns: Vec<&str> = columns.iter().map(String::as_str).collect();
                self.db.drop_columns(table, &columns).await
            }
            Change::CreateIndex { table, column } => self.db.create_index(table, column).await,
            Change::DropIndex { table, column } => self.db.drop_index(table, column).await,
            Change::CreateUnique { table, column } => self.db.create_unique(table, column).await,
            Change::DropUnique { table, column } => self.db.drop_unique(table, column).await,
            Change::CreateForeignKey { table: name, column } => match table.column(column) {
                Some(definition) => self.db.create_foreign_key(name, definition).await,
                None => Ok(false),
            },
            Change::DropForeignKey { table, column } => {
                self.db.drop_foreign_key(table, column).await
            }
        };
        let applied = result.with_context(|| format!("Failed to {}", change))?;
        Ok(applied.then(|| change.clone()))
    }

    async fn reinstall_triggers(&self) -> Result<usize> {
        let mut count = 0;
        for table in &self.schema.tables {
            let name = &table.table_name;

            let trigger = trigger_name(name, TriggerKind::Change);
            self.db.drop_trigger(name, &trigger).await?;
            self.db
                .create_trigger(name, &trigger, CHANGE_EVENTS, NOTIFY_FUNCTION)
                .await
                .with_context(|| format!("Failed to create trigger {}", trigger))?;
            count += 1;

            if table.slug {
                let trigger = trigger_name(name, TriggerKind::Slug);
                self.db.drop_trigger(name, &trigger).await?;
                self.db
                    .create_trigger(name, &trigger, SLUG_EVENTS, SET_SLUG_FUNCTION)
                    .await
                    .with_context(|| format!("Failed to create trigger {}", trigger))?;
                count += 1;
            }
        }
        Ok(count)
    }
}
