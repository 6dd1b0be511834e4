use sqlx::{PgPool, postgres::PgPoolOptions};

use crate::DbConfig;

pub type DbPool = PgPool;

/// Create a connection pool bound to `database`.
///
/// Every call returns a fresh pool; switching databases means building a new
/// pool, never re-targeting an existing one. The pool is lazy, so a missing
/// database only surfaces on first use.
pub fn connect(config: &DbConfig, database: &str) -> DbPool {
    tracing::debug!(database, max_connections = config.max_connections, "creating pool");
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect_lazy_with(config.options_for(database))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_is_lazy() {
        // nothing listens here; a lazy pool must still be constructible
        let config = DbConfig::from_url("postgres://nobody@127.0.0.1:1/missing").unwrap();
        let pool = connect(&config, "missing");
        assert_eq!(pool.size(), 0);
        pool.close().await;
    }
}
