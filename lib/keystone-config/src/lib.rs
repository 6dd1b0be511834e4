mod config;
mod connect;

pub use config::{
    retrieve_from_env, DatabaseSettings, DbConfig, Settings, DEFAULT_SCHEMA_PATH,
    DEFAULT_SETTINGS_PATH,
};
pub use connect::{connect, DbPool};
