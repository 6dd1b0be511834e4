//! Diffing a declared table against its live state.
//!
//! Planning is pure: it reads the declaration and the introspected name sets
//! and decides what to change. `SchemaBuilder` applies the result.

use keystone_query::LiveTableState;
use keystone_schema::{
    constraint_name, is_audit_column, ConstraintKind, SchemaDefinition, TableDefinition,
};
use serde::Serialize;
use std::fmt;

/// One structural change applied during a pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "change", rename_all = "snake_case")]
pub enum Change {
    CreateTable { table: String },
    DropTable { table: String },
    AddColumns { table: String, columns: Vec<String> },
    DropColumns { table: String, columns: Vec<String> },
    CreateIndex { table: String, column: String },
    DropIndex { table: String, column: String },
    CreateUnique { table: String, column: String },
    DropUnique { table: String, column: String },
    CreateForeignKey { table: String, column: String },
    DropForeignKey { table: String, column: String },
}

impl fmt::Display for Change {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Change::CreateTable { table } => write!(f, "create table {}", table),
            Change::DropTable { table } => write!(f, "drop table {}", table),
            Change::AddColumns { table, columns } => {
                write!(f, "add columns {} to {}", columns.join(", "), table)
            }
            Change::DropColumns { table, columns } => {
                write!(f, "drop columns {} from {}", columns.join(", "), table)
            }
            Change::CreateIndex { table, column } => write!(f, "create index on {}.{}", table, column),
            Change::DropIndex { table, column } => write!(f, "drop index on {}.{}", table, column),
            Change::CreateUnique { table, column } => {
                write!(f, "create unique constraint on {}.{}", table, column)
            }
            Change::DropUnique { table, column } => {
                write!(f, "drop unique constraint on {}.{}", table, column)
            }
            Change::CreateForeignKey { table, column } => {
                write!(f, "create foreign key on {}.{}", table, column)
            }
            Change::DropForeignKey { table, column } => {
                write!(f, "drop foreign key on {}.{}", table, column)
            }
        }
    }
}

/// Index, unique and foreign-key changes for one existing column.
///
/// The three are independent and may be applied concurrently.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnCheck {
    pub index: Option<Change>,
    pub unique: Option<Change>,
    pub foreign_key: Option<Change>,
}

impl ColumnCheck {
    fn is_empty(&self) -> bool {
        self.index.is_none() && self.unique.is_none() && self.foreign_key.is_none()
    }

    fn changes(&self) -> impl Iterator<Item = &Change> {
        [&self.index, &self.unique, &self.foreign_key]
            .into_iter()
            .flatten()
    }
}

/// Everything needed to bring one table in line, in execution order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TablePlan {
    pub create_table: Option<Change>,
    pub drop_columns: Option<Change>,
    pub column_checks: Vec<ColumnCheck>,
    /// New columns, created with their unique and foreign-key constraints inline.
    pub add_columns: Option<Change>,
    pub add_indices: Vec<Change>,
}

impl TablePlan {
    pub fn is_empty(&self) -> bool {
        self.changes().next().is_none()
    }

    pub fn changes(&self) -> impl Iterator<Item = &Change> {
        self.create_table
            .iter()
            .chain(self.drop_columns.iter())
            .chain(self.column_checks.iter().flat_map(ColumnCheck::changes))
            .chain(self.add_columns.iter())
            .chain(self.add_indices.iter())
    }
}

/// Plan one table. `live` is `None` when the table does not exist yet.
pub fn plan_table(table: &TableDefinition, live: Option<&LiveTableState>) -> TablePlan {
    let name = &table.table_name;

    let Some(live) = live else {
        let mut plan = TablePlan {
            create_table: Some(Change::CreateTable {
                table: name.clone(),
            }),
            ..Default::default()
        };
        add_new_columns(&mut plan, table, table.column_names().collect());
        return plan;
    };

    let mut plan = TablePlan::default();

    let undeclared: Vec<String> = live
        .columns
        .iter()
        .filter(|c| !is_audit_column(c) && table.column(c).is_none())
        .cloned()
        .collect();
    if !undeclared.is_empty() {
        plan.drop_columns = Some(Change::DropColumns {
            table: name.clone(),
            columns: undeclared,
        });
    }

    let mut new_columns = Vec::new();
    for column in &table.columns {
        let column_name = column.column_name.as_str();
        if !live.has_column(column_name) {
            new_columns.push(column_name);
            continue;
        }

        let has = |kind| constraint_name(name, column_name, kind);
        let check = ColumnCheck {
            index: toggle(
                column.index,
                live.has_index(&has(ConstraintKind::Index)),
                Change::CreateIndex { table: name.clone(), column: column_name.to_string() },
                Change::DropIndex { table: name.clone(), column: column_name.to_string() },
            ),
            unique: toggle(
                column.unique,
                live.has_index(&has(ConstraintKind::Unique)),
                Change::CreateUnique { table: name.clone(), column: column_name.to_string() },
                Change::DropUnique { table: name.clone(), column: column_name.to_string() },
            ),
            foreign_key: toggle(
                column.foreign_key,
                live.has_foreign_key(&has(ConstraintKind::Foreign)),
                Change::CreateForeignKey { table: name.clone(), column: column_name.to_string() },
                Change::DropForeignKey { table: name.clone(), column: column_name.to_string() },
            ),
        };
        if !check.is_empty() {
            plan.column_checks.push(check);
        }
    }

    add_new_columns(&mut plan, table, new_columns);
    plan
}

fn toggle(wanted: bool, present: bool, create: Change, drop: Change) -> Option<Change> {
    match (wanted, present) {
        (true, false) => Some(create),
        (false, true) => Some(drop),
        _ => None,
    }
}

fn add_new_columns(plan: &mut TablePlan, table: &TableDefinition, columns: Vec<&str>) {
    if columns.is_empty() {
        return;
    }
    let name = &table.table_name;
    plan.add_indices = columns
        .iter()
        .filter(|c| table.column(c).is_some_and(|c| c.index))
        .map(|c| Change::CreateIndex {
            table: name.clone(),
            column: c.to_string(),
        })
        .collect();
    plan.add_columns = Some(Change::AddColumns {
        table: name.clone(),
        columns: columns.into_iter().map(str::to_string).collect(),
    });
}

/// Live tables the declaration does not mention.
pub fn find_orphan_tables(schema: &SchemaDefinition, live_tables: &[String]) -> Vec<String> {
    live_tables
        .iter()
        .filter(|t| !schema.contains_table(t))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use keystone_schema::{ColumnDefinition, ColumnType};

    fn user_table() -> TableDefinition {
        TableDefinition::new(
            "tbl_User",
            vec![
                ColumnDefinition::new("username", ColumnType::String).required().unique(),
                ColumnDefinition::new("email", ColumnType::String).indexed(),
                ColumnDefinition::new("company_id", ColumnType::Uuid).references("tbl_Company", "id"),
            ],
        )
    }

    fn live(columns: &[&str], indices: &[&str], foreign_keys: &[&str]) -> LiveTableState {
        let owned = |names: &[&str]| names.iter().map(|n| n.to_string()).collect();
        LiveTableState {
            columns: owned(columns),
            indices: owned(indices),
            foreign_keys: owned(foreign_keys),
        }
    }

    fn in_sync() -> LiveTableState {
        live(
            &["id", "created_date", "updated_date", "username", "email", "company_id"],
            &["tbl_User_pkey", "tbl_user_username_unique", "tbl_user_email_index"],
            &["tbl_user_company_id_foreign"],
        )
    }

    #[test]
    fn test_absent_table_is_created_with_all_columns() {
        let plan = plan_table(&user_table(), None);
        let changes: Vec<String> = plan.changes().map(|c| c.to_string()).collect();
        assert_eq!(
            changes,
            vec![
                "create table tbl_User",
                "add columns username, email, company_id to tbl_User",
                "create index on tbl_User.email",
            ]
        );
    }

    #[test]
    fn test_matching_table_needs_nothing() {
        assert!(plan_table(&user_table(), Some(&in_sync())).is_empty());
    }

    #[test]
    fn test_undeclared_columns_dropped_audit_kept() {
        let mut state = in_sync();
        state.columns.push("legacy".into());
        let plan = plan_table(&user_table(), Some(&state));
        assert_eq!(
            plan.drop_columns,
            Some(Change::DropColumns {
                table: "tbl_User".into(),
                columns: vec!["legacy".into()]
            })
        );
        assert_eq!(plan.changes().count(), 1);
    }

    #[test]
    fn test_constraint_flags_toggle() {
        let state = live(
            &["id", "created_date", "updated_date", "username", "email", "company_id"],
            &["tbl_user_company_id_index"],
            &[],
        );
        let mut table = user_table();
        table.columns[1].index = false;
        let plan = plan_table(&table, Some(&state));

        let changes: Vec<&Change> = plan.changes().collect();
        assert_eq!(
            changes,
            vec![
                &Change::CreateUnique { table: "tbl_User".into(), column: "username".into() },
                &Change::DropIndex { table: "tbl_User".into(), column: "company_id".into() },
                &Change::CreateForeignKey { table: "tbl_User".into(), column: "company_id".into() },
            ]
        );
        assert_eq!(plan.column_checks.len(), 2);
        assert_eq!(
            plan.column_checks[1].foreign_key,
            Some(Change::CreateForeignKey { table: "tbl_User".into(), column: "company_id".into() })
        );
        assert_eq!(
            plan.column_checks[1].index,
            Some(Change::DropIndex { table: "tbl_User".into(), column: "company_id".into() })
        );
    }

    #[test]
    fn test_new_columns_added_after_checks() {
        let state = live(
            &["id", "created_date", "updated_date", "username"],
            &["tbl_user_username_unique"],
            &[],
        );
        let plan = plan_table(&user_table(), Some(&state));
        assert!(plan.column_checks.is_empty());
        assert_eq!(
            plan.add_columns,
            Some(Change::AddColumns {
                table: "tbl_User".into(),
                columns: vec!["email".into(), "company_id".into()]
            })
        );
        assert_eq!(
            plan.add_indices,
            vec![Change::CreateIndex { table: "tbl_User".into(), column: "email".into() }]
        );
    }

    #[test]
    fn test_find_orphan_tables() {
        let schema = SchemaDefinition::new(vec![TableDefinition::new(
            "tbl_Company",
            vec![ColumnDefinition::new("name", ColumnType::String)],
        )])
        .unwrap();
        let live = vec!["tbl_Company".to_string(), "tbl_Old".to_string()];
        assert_eq!(find_orphan_tables(&schema, &live), vec!["tbl_Old".to_string()]);
    }
}
