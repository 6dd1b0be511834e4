//! Data access for keystone-managed tables.
//!
//! [`QueryWrapper`] owns the connection pool and the schema declaration. Every
//! mutation is validated against the declaration before a statement is
//! issued; values are bound as text and cast by the server, and rows come
//! back as flat JSON records.

mod crud;
mod ddl;
mod error;
mod filter;
mod introspect;
mod sql;
mod wrapper;

pub use crud::{InsertOptions, OneOrMany};
pub use ddl::{
    add_columns_sql, column_definition_sql, column_sql_type, create_foreign_key_sql,
    create_index_sql, create_table_sql, create_trigger_sql, create_unique_sql, default_literal,
    drop_columns_sql, drop_constraint_sql, drop_index_sql, drop_table_sql, drop_trigger_sql,
    install_extension_sql,
};
pub use error::{DdlEffect, ErrorKind, QueryError};
pub use filter::{FilterOptions, Filtered, Page, Pagination, Search, Sort, SortDirection};
pub use introspect::LiveTableState;
pub use sql::{bind_text, cast_type, quote_ident, quote_literal};
pub use wrapper::QueryWrapper;

pub use keystone_schema::Record;
