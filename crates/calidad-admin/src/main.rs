use std::path::PathBuf;

use anyhow::{Context, Result};
use calidad_core::config::EtlConfig;
use calidad_core::{access, db, reports};
use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Calidad administrative tooling", long_about = None)]
struct Cli {
    /// Path to a calidad.toml configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Apply the embedded schema migrations
    Migrate,
    /// Grant the pipeline role access to the water_data schema
    GrantAccess(GrantAccessArgs),
    /// List recent pipeline runs from the ledger
    Runs(RunsArgs),
}

#[derive(Args, Debug)]
struct GrantAccessArgs {
    /// Role that runs the pipeline
    #[arg(long)]
    principal: String,
    /// Skip running migrations before granting
    #[arg(long)]
    skip_migrations: bool,
}

#[derive(Args, Debug)]
struct RunsArgs {
    #[arg(long, default_value_t = 10)]
    limit: i64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    let cli = Cli::parse();
    dotenvy::dotenv().ok();
    let config = EtlConfig::load(cli.config.as_deref()).context("failed to load configuration")?;

    match cli.command {
        Command::Migrate => handle_migrate(&config).await,
        Command::GrantAccess(args) => handle_grant_access(&config, args).await,
        Command::Runs(args) => handle_runs(&config, args).await,
    }
}

async fn connect_pool(config: &EtlConfig) -> Result<db::DbPool> {
    db::connect(&config.database)
        .await
        .context("DATABASE_URL (or CALIDAD_DATABASE_URL) must point at a reachable database")
}

async fn handle_migrate(config: &EtlConfig) -> Result<()> {
    let pool = connect_pool(config).await?;
    db::run_migrations(&pool).await?;
    println!("Migrations applied");
    Ok(())
}

async fn handle_grant_access(config: &EtlConfig, args: GrantAccessArgs) -> Result<()> {
    access::validate_principal(&args.principal)?;
    let pool = connect_pool(config).await?;

    if args.skip_migrations {
        info!("Skipping migrations at user request");
    } else {
        db::run_migrations(&pool).await?;
    }

    access::grant_access(&pool, &args.principal).await?;
    println!(
        "Granted {} access to schema {}",
        args.principal,
        access::SCHEMA
    );
    Ok(())
}

async fn handle_runs(config: &EtlConfig, args: RunsArgs) -> Result<()> {
    let pool = connect_pool(config).await?;
    let runs = reports::recent_runs(&pool, args.limit).await?;

    if runs.is_empty() {
        println!("No pipeline runs recorded");
        return Ok(());
    }

    for run in runs {
        let finished = run
            .finished_at
            .map(|at| at.to_rfc3339())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{}  {:<8}  read={} loaded={} rejected={}  started={} finished={}  {}",
            run.run_id,
            run.outcome,
            run.rows_read,
            run.rows_loaded,
            run.rows_rejected,
            run.started_at.to_rfc3339(),
            finished,
            run.source_file
        );
        if let Some(error) = run.error {
            println!("    error: {error}");
        }
    }
    Ok(())
}
