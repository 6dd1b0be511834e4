use anyhow::{Context, Result};
use serde::Deserialize;
use sqlx::postgres::PgConnectOptions;
use std::env;
use std::fs;
use std::path::Path;
use std::str::FromStr;

pub const DEFAULT_SETTINGS_PATH: &str = "keystone.toml";
pub const DEFAULT_SCHEMA_PATH: &str = "schema/schema.toml";

const DEFAULT_MAINTENANCE_DATABASE: &str = "postgres";
const DEFAULT_MAX_CONNECTIONS: u32 = 5;

pub fn retrieve_from_env(key: &str) -> Result<String> {
    dotenvy::dotenv().ok();
    env::var(key).with_context(|| format!("Missing environment variable: {}", key))
}

fn optional_env(key: &str) -> Option<String> {
    retrieve_from_env(key).ok().filter(|v| !v.is_empty())
}

// ============ Settings File ============

/// Contents of `keystone.toml`. Every key is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub schema: Option<String>,
    pub database: DatabaseSettings,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    pub url: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub name: Option<String>,
    pub maintenance_database: Option<String>,
    pub max_connections: Option<u32>,
}

impl Settings {
    /// Read settings from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let toml_str = fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings file {:?}", path))?;
        Self::from_toml_str(&toml_str)
            .with_context(|| format!("Failed to parse settings file {:?}", path))
    }

    pub fn from_toml_str(toml_str: &str) -> Result<Self> {
        Ok(toml::from_str(toml_str)?)
    }

    /// Like `from_file`, but a missing file yields the defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::debug!(path = %path.display(), "settings file not found, using defaults");
            return Ok(Self::default());
        }
        Self::from_file(path)
    }

    pub fn schema_path(&self) -> &str {
        self.schema.as_deref().unwrap_or(DEFAULT_SCHEMA_PATH)
    }

    /// Resolve connection settings.
    ///
    /// Precedence: `url_override` (command line), then `DATABASE_URL`, then the
    /// settings file.
    pub fn db_config(&self, url_override: Option<&str>) -> Result<DbConfig> {
        let env_url = optional_env("DATABASE_URL");
        let mut config = self.resolve(url_override, env_url.as_deref())?;
        if let Some(maintenance) = optional_env("KEYSTONE_MAINTENANCE_DB") {
            config = config.with_maintenance_database(maintenance);
        }
        Ok(config)
    }

    fn resolve(&self, url_override: Option<&str>, env_url: Option<&str>) -> Result<DbConfig> {
        let db = &self.database;
        let url = url_override.or(env_url).or(db.url.as_deref());

        let mut config = match url {
            Some(url) => DbConfig::from_url(url)?,
            None => {
                let name = db
                    .name
                    .as_deref()
                    .context("No database configured: set DATABASE_URL or [database] in keystone.toml")?;
                DbConfig::from_parts(
                    db.host.as_deref().unwrap_or("localhost"),
                    db.port.unwrap_or(5432),
                    db.user.as_deref().unwrap_or("postgres"),
                    db.password.as_deref(),
                    name,
                )?
            }
        };

        if let Some(maintenance) = &db.maintenance_database {
            config = config.with_maintenance_database(maintenance.clone());
        }
        if let Some(max) = db.max_connections {
            config = config.with_max_connections(max);
        }
        Ok(config)
    }
}

// ============ Connection Config ============

/// Server connection options plus the names of the target and maintenance databases.
///
/// The options are never bound to one database; `options_for` produces a copy
/// pointed at whichever database a pool should serve.
#[derive(Debug, Clone)]
pub struct DbConfig {
    options: PgConnectOptions,
    pub database: String,
    pub maintenance_database: String,
    pub max_connections: u32,
}

impl DbConfig {
    pub fn from_url(url: &str) -> Result<Self> {
        let options = PgConnectOptions::from_str(url).context("Invalid database URL")?;
        let database = options
            .get_database()
            .map(str::to_string)
            .context("Database URL must name a database")?;

        Ok(Self {
            options,
            database,
            maintenance_database: DEFAULT_MAINTENANCE_DATABASE.to_string(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
        })
    }

    /// Build a config from individual settings. User and password are percent-encoded.
    pub fn from_parts(
        host: &str,
        port: u16,
        user: &str,
        password: Option<&str>,
        database: &str,
    ) -> Result<Self> {
        Self::from_url(&build_url(host, port, user, password, database))
    }

    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    pub fn with_maintenance_database(mut self, database: impl Into<String>) -> Self {
        self.maintenance_database = database.into();
        self
    }

    pub fn with_max_connections(mut self, max: u32) -> Self {
        self.max_connections = max.max(1);
        self
    }

    /// Connection options bound to `database`.
    pub fn options_for(&self, database: &str) -> PgConnectOptions {
        self.options.clone().database(database)
    }
}

fn build_url(host: &str, port: u16, user: &str, password: Option<&str>, database: &str) -> String {
    let credentials = match password {
        Some(password) => format!(
            "{}:{}",
            urlencoding::encode(user),
            urlencoding::encode(password)
        ),
        None => urlencoding::encode(user).into_owned(),
    };
    format!(
        "postgres://{}@{}:{}/{}",
        credentials,
        host,
        port,
        urlencoding::encode(database)
    )
}
