use anyhow::{Context, Result};
use keystone_query::LiveTableState;
use std::collections::BTreeMap;

pub async fn run(settings_path: &str, url: Option<&str>, json: bool) -> Result<()> {
    let (_, config) = super::load_config(settings_path, url)?;
    let db = super::bare_wrapper(config)?;

    let mut tables: BTreeMap<String, LiveTableState> = BTreeMap::new();
    for table in db.list_tables().await.context("Failed to list tables")? {
        let state = db
            .live_state(&table)
            .await
            .with_context(|| format!("Failed to read table {}", table))?;
        tables.insert(table, state);
    }
    db.close().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&tables)?);
        return Ok(());
    }

    if tables.is_empty() {
        println!("No tables in {}.", db.database());
    }
    for (table, state) in &tables {
        println!("{}", table);
        println!("  columns:      {}", state.columns.join(", "));
        println!("  indices:      {}", state.indices.join(", "));
        println!("  foreign keys: {}", state.foreign_keys.join(", "));
    }
    Ok(())
}
