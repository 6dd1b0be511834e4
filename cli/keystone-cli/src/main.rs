mod commands;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "keystone")]
#[command(about = "Keep a PostgreSQL database in line with a declared schema", long_about = None)]
struct Cli {
    /// Settings file
    #[arg(long, global = true, default_value = keystone_config::DEFAULT_SETTINGS_PATH)]
    settings: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scaffold a schema file, .env and keystone.toml
    Init {
        #[arg(short, long)]
        path: Option<String>,
    },
    /// Reconcile the database with the schema
    Migrate {
        #[arg(short, long)]
        connect: Option<String>,
        #[arg(short, long)]
        schema: Option<String>,
    },
    /// List tables with their columns, indices and foreign keys
    Introspect {
        #[arg(short, long)]
        connect: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Drop a database through the maintenance database
    DropDatabase {
        #[arg(short, long)]
        connect: Option<String>,
        name: String,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Init { path } => commands::init::run(path.as_deref()),
        Commands::Migrate { connect, schema } => {
            commands::migrate::run(&cli.settings, connect.as_deref(), schema.as_deref()).await
        }
        Commands::Introspect { connect, json } => {
            commands::introspect::run(&cli.settings, connect.as_deref(), json).await
        }
        Commands::DropDatabase { connect, name } => {
            commands::drop_database::run(&cli.settings, connect.as_deref(), &name).await
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
