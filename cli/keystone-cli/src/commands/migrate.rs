use anyhow::{Context, Result};
use keystone_migrate::SchemaBuilder;
use keystone_query::QueryWrapper;
use keystone_schema::SchemaDefinition;

pub async fn run(settings_path: &str, url: Option<&str>, schema_path: Option<&str>) -> Result<()> {
    let (settings, config) = super::load_config(settings_path, url)?;
    let schema_path = schema_path.unwrap_or(settings.schema_path());
    let schema = SchemaDefinition::from_file(schema_path)
        .with_context(|| format!("Failed to load schema {}", schema_path))?;

    let mut db = QueryWrapper::new(schema, config);
    println!("Reconciling database {}...", db.database());

    let report = SchemaBuilder::new(&mut db).setup_schema().await?;
    db.close().await;

    if report.database_created {
        println!("Created database {}.", db.database());
    }
    if report.changes.is_empty() {
        println!("Database is already in sync with schema.");
    } else {
        for change in &report.changes {
            println!("  {}", change);
        }
        println!("\nApplied {} change(s).", report.changes.len());
    }
    println!("Reinstalled {} trigger(s).", report.triggers);

    Ok(())
}
