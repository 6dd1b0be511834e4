pub mod drop_database;
pub mod init;
pub mod introspect;
pub mod migrate;

use anyhow::Result;
use keystone_config::{DbConfig, Settings};
use keystone_query::QueryWrapper;
use keystone_schema::SchemaDefinition;

fn load_config(settings_path: &str, url: Option<&str>) -> Result<(Settings, DbConfig)> {
    let settings = Settings::load(settings_path)?;
    let config = settings.db_config(url)?;
    Ok((settings, config))
}

/// A wrapper for commands that work on the database without a declaration.
fn bare_wrapper(config: DbConfig) -> Result<QueryWrapper> {
    Ok(QueryWrapper::new(SchemaDefinition::new(Vec::new())?, config))
}
