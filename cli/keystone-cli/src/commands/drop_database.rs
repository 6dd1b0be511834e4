use anyhow::{Context, Result};

pub async fn run(settings_path: &str, url: Option<&str>, name: &str) -> Result<()> {
    let (_, config) = super::load_config(settings_path, url)?;
    let mut db = super::bare_wrapper(config)?;

    db.drop_database(name)
        .await
        .with_context(|| format!("Failed to drop database {}", name))?;
    db.close().await;

    println!("Dropped database {}.", name);
    Ok(())
}
