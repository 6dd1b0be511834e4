//! Schema reconciliation for keystone.
//!
//! [`SchemaBuilder::setup_schema`] makes the live database match a
//! [`SchemaDefinition`](keystone_schema::SchemaDefinition): it creates the
//! database if needed, installs the shared routines, drops tables that are no
//! longer declared, diffs each declared table and reinstalls the triggers.

mod builder;
mod plan;
mod routines;

pub use builder::{ReconcileReport, SchemaBuilder, Stage};
pub use plan::{find_orphan_tables, plan_table, Change, ColumnCheck, TablePlan};
pub use routines::{
    notify_function_sql, set_slug_function_sql, slugify_function_sql, CHANGE_CHANNEL,
    NOTIFY_FUNCTION, SET_SLUG_FUNCTION, SLUGIFY_FUNCTION,
};
