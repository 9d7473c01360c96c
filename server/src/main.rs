mod config;
mod http;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use migration::{Migrator, MigratorTrait};
use platform_db::{DbPool, connect};
use platform_obs::{init_tracing, shutdown_tracing};
use tracing::info;

use crate::{
    config::AppConfig,
    http::{AppState, ServeConfig},
};

#[derive(Parser, Debug)]
#[command(name = "salary-server", version, about = "Employee salary service")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP server (applies migrations and seeds an empty table first).
    Serve(ServeCommand),
    /// Run database migrations.
    #[command(subcommand)]
    Migrate(MigrateCommand),
    /// Insert the fixed seed rows if the users table is empty.
    Seed,
}

#[derive(Subcommand, Debug)]
enum MigrateCommand {
    /// Apply pending migrations.
    Up,
    /// Rollback the most recent migration.
    Down,
}

#[derive(Args, Debug)]
struct ServeCommand {
    #[arg(long, default_value = "0.0.0.0")]
    host: std::net::IpAddr,
    #[arg(long, default_value_t = 3000)]
    port: u16,
}

impl From<ServeCommand> for ServeConfig {
    fn from(value: ServeCommand) -> Self {
        ServeConfig::new(value.host, value.port)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = AppConfig::load()?;
    init_tracing(config.obs.clone())?;

    let outcome = match cli.command {
        Command::Serve(cmd) => run_server(cmd, &config).await,
        Command::Migrate(action) => match action {
            MigrateCommand::Up => migrate_up(&config).await,
            MigrateCommand::Down => migrate_down(&config).await,
        },
        Command::Seed => run_seed(&config).await,
    };
    shutdown_tracing();
    outcome
}

async fn setup_pool(config: &AppConfig) -> Result<DbPool> {
    connect(&config.database)
        .await
        .context("failed to connect to database")
}

async fn initialize_schema(pool: &DbPool) -> Result<()> {
    Migrator::up(pool, None)
        .await
        .context("failed to apply migrations")?;
    let seeded = platform_db::ensure_seeded(pool)
        .await
        .context("failed to seed users table")?;
    info!(seeded, "schema ready");
    Ok(())
}

async fn run_server(cmd: ServeCommand, config: &AppConfig) -> Result<()> {
    let pool = setup_pool(config).await?;
    initialize_schema(&pool).await?;
    let state = AppState { pool };
    http::serve(cmd.into(), state).await
}

async fn run_seed(config: &AppConfig) -> Result<()> {
    let pool = setup_pool(config).await?;
    if platform_db::ensure_seeded(&pool).await? {
        info!("seed rows inserted");
    } else {
        info!("users table already populated; nothing to seed");
    }
    Ok(())
}

async fn migrate_up(config: &AppConfig) -> Result<()> {
    let pool = setup_pool(config).await?;
    Migrator::up(&pool, None).await?;
    info!("database migrations applied");
    Ok(())
}

async fn migrate_down(config: &AppConfig) -> Result<()> {
    let pool = setup_pool(config).await?;
    Migrator::down(&pool, Some(1)).await?;
    info!("most recent migration rolled back");
    Ok(())
}
