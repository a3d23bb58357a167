use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use calidad_core::config::EtlConfig;
use calidad_core::pipeline::{self, RunOptions};
use calidad_core::{db, outputs, reports};
use clap::{Args, Parser, Subcommand};
use comfy_table::{presets::UTF8_FULL, Table};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Water-quality ETL for CONAGUA monitoring exports", long_about = None)]
struct Cli {
    /// Path to a calidad.toml configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run database migrations
    Migrate,
    /// Read a raw export and report what was recognised
    Extract(InputArgs),
    /// Extract and transform, writing the clean CSV and Parquet files
    Transform(TransformArgs),
    /// Extract, transform and load into the database without writing files
    Load(LoadArgs),
    /// Run the whole pipeline
    Run(RunArgs),
    /// Print the aggregate views
    Report(ReportArgs),
}

#[derive(Args, Debug, Default)]
struct InputArgs {
    /// Input file or glob pattern (defaults to the configured raw file)
    #[arg(long, short)]
    input: Option<String>,
}

#[derive(Args, Debug, Default)]
struct TransformArgs {
    #[command(flatten)]
    input: InputArgs,
    /// Directory for the clean files (defaults to the data directory)
    #[arg(long)]
    output_dir: Option<PathBuf>,
}

#[derive(Args, Debug, Default)]
struct LoadArgs {
    #[command(flatten)]
    input: InputArgs,
    /// Skip running embedded migrations before loading
    #[arg(long)]
    skip_migrations: bool,
}

#[derive(Args, Debug, Default)]
struct RunArgs {
    #[command(flatten)]
    input: InputArgs,
    /// Extract, transform and write files without touching the database
    #[arg(long)]
    dry_run: bool,
    /// Do not write the clean CSV and Parquet files
    #[arg(long)]
    no_files: bool,
    /// Skip running embedded migrations before loading
    #[arg(long)]
    skip_migrations: bool,
    #[arg(long)]
    output_dir: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct ReportArgs {
    /// Emit JSON instead of tables
    #[arg(long)]
    json: bool,
    /// Number of period rows to show
    #[arg(long, default_value_t = 20)]
    periods: i64,
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
        Command::Migrate => {
            let pool = connect_pool(&config).await?;
            db::run_migrations(&pool).await?;
            info!("Database migrations applied");
            Ok(())
        }
        Command::Extract(args) => handle_extract(&config, args),
        Command::Transform(args) => handle_transform(&config, args),
        Command::Load(args) => handle_load(&config, args).await,
        Command::Run(args) => handle_run(&config, args).await,
        Command::Report(args) => handle_report(&config, args).await,
    }
}

async fn connect_pool(config: &EtlConfig) -> Result<db::DbPool> {
    db::connect(&config.database)
        .await
        .context("DATABASE_URL (or CALIDAD_DATABASE_URL) must point at a reachable database")
}

/// Expands `--input` (a path or glob) into concrete files.
fn resolve_inputs(config: &EtlConfig, args: &InputArgs) -> Result<Vec<PathBuf>> {
    let pattern = match &args.input {
        Some(pattern) => pattern.clone(),
        None => return Ok(vec![config.paths.raw_path()]),
    };

    if Path::new(&pattern).exists() {
        return Ok(vec![PathBuf::from(pattern)]);
    }

    let mut paths = Vec::new();
    for entry in glob::glob(&pattern).with_context(|| format!("invalid pattern '{pattern}'"))? {
        paths.push(entry?);
    }
    if paths.is_empty() {
        bail!("no input files match '{pattern}'");
    }
    paths.sort();
    Ok(paths)
}

fn handle_extract(config: &EtlConfig, args: InputArgs) -> Result<()> {
    for path in resolve_inputs(config, &args)? {
        let extracted = calidad_parser::extract_file(&path)
            .with_context(|| format!("failed to extract {}", path.display()))?;
        let report = serde_json::json!({
            "source_file": path.display().to_string(),
            "format": extracted.metadata.format,
            "rows_read": extracted.rows_read,
            "duplicates_dropped": extracted.duplicates_dropped,
            "records": extracted.records.len(),
            "source_columns": extracted.metadata.source_columns,
            "ignored_columns": extracted.metadata.ignored_columns,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
    }
    Ok(())
}

fn handle_transform(config: &EtlConfig, args: TransformArgs) -> Result<()> {
    let output_dir = args.output_dir.as_deref();
    for path in resolve_inputs(config, &args.input)? {
        let batch = pipeline::prepare(config, &path)?;
        let written = outputs::write_clean_files(
            &batch.records,
            &config.paths.clean_csv_path(output_dir),
            &config.paths.clean_parquet_path(output_dir),
        )?;
        let summary = pipeline::summarize(batch, true, Some(written), None);
        println!("{}", serde_json::to_string_pretty(&summary)?);
    }
    Ok(())
}

async fn handle_load(config: &EtlConfig, args: LoadArgs) -> Result<()> {
    if args.skip_migrations {
        warn!("Skipping migrations before loading");
    }
    for path in resolve_inputs(config, &args.input)? {
        let batch = pipeline::prepare(config, &path)?;
        let report = pipeline::load_with_retry(config, &batch, !args.skip_migrations).await?;
        let summary = pipeline::summarize(batch, false, None, Some(report));
        println!("{}", serde_json::to_string_pretty(&summary)?);
    }
    Ok(())
}

async fn handle_run(config: &EtlConfig, args: RunArgs) -> Result<()> {
    let inputs = resolve_inputs(config, &args.input)?;
    if inputs.len() > 1 && !args.no_files {
        warn!(
            files = inputs.len(),
            "several inputs share one output location; the last file's outputs win"
        );
    }

    for input in inputs {
        let options = RunOptions {
            input,
            dry_run: args.dry_run,
            write_files: !args.no_files,
            output_dir: args.output_dir.clone(),
            run_migrations: !args.skip_migrations,
        };
        let summary = pipeline::run(config, &options)
            .await
            .with_context(|| format!("pipeline failed for {}", options.input.display()))?;
        info!(
            source = %summary.source_file,
            transformed = summary.transformed,
            rejected = summary.rejected,
            "pipeline finished"
        );
        println!("{}", serde_json::to_string_pretty(&summary)?);
    }
    Ok(())
}

async fn handle_report(config: &EtlConfig, args: ReportArgs) -> Result<()> {
    let pool = connect_pool(config).await?;
    let states = reports::state_summary(&pool).await?;
    let periods = reports::period_summary(&pool, args.periods).await?;
    let lights = reports::traffic_light_distribution(&pool).await?;

    if args.json {
        let report = serde_json::json!({
            "resumen_por_estado": states,
            "calidad_por_periodo": periods,
            "semaforo": lights,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL).set_header(vec![
        "Estado", "Sitios", "Promedio", "Verdes", "Amarillos", "Rojos",
    ]);
    for row in &states {
        table.add_row(vec![
            row.state.clone().unwrap_or_else(|| "-".to_string()),
            row.total_sites.to_string(),
            format_index(row.average_index),
            row.green_sites.to_string(),
            row.yellow_sites.to_string(),
            row.red_sites.to_string(),
        ]);
    }
    println!("{table}");

    let mut table = Table::new();
    table.load_preset(UTF8_FULL).set_header(vec![
        "Periodo", "Estado", "Mediciones", "Promedio", "Mínimo", "Máximo",
    ]);
    for row in &periods {
        table.add_row(vec![
            row.period.clone(),
            row.state.clone().unwrap_or_else(|| "-".to_string()),
            row.measurements.to_string(),
            format_index(row.average_index),
            format_index(row.min_index),
            format_index(row.max_index),
        ]);
    }
    println!("{table}");

    let mut table = Table::new();
    table.load_preset(UTF8_FULL).set_header(vec!["Semáforo", "Registros"]);
    for row in &lights {
        table.add_row(vec![row.traffic_light.clone(), row.total.to_string()]);
    }
    println!("{table}");

    Ok(())
}

fn format_index(value: Option<f64>) -> String {
    value
        .map(|value| format!("{value:.2}"))
        .unwrap_or_else(|| "-".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_flags_parse() {
        let cli = Cli::parse_from([
            "calidad",
            "--config",
            "calidad.toml",
            "run",
            "--input",
            "data/*.csv",
            "--dry-run",
            "--no-files",
        ]);
        assert_eq!(cli.config, Some(PathBuf::from("calidad.toml")));
        match cli.command {
            Command::Run(args) => {
                assert_eq!(args.input.input.as_deref(), Some("data/*.csv"));
                assert!(args.dry_run);
                assert!(args.no_files);
                assert!(!args.skip_migrations);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn default_input_is_configured_raw_file() {
        let config = EtlConfig::default();
        let inputs = resolve_inputs(&config, &InputArgs::default()).unwrap();
        assert_eq!(inputs, vec![PathBuf::from("data/calidad_agua.csv")]);
    }

    #[test]
    fn unmatched_glob_is_an_error() {
        let config = EtlConfig::default();
        let args = InputArgs {
            input: Some("does/not/exist/*.csv".to_string()),
        };
        assert!(resolve_inputs(&config, &args).is_err());
    }

    #[test]
    fn report_defaults() {
        let cli = Cli::parse_from(["calidad", "report"]);
        match cli.command {
            Command::Report(args) => {
                assert!(!args.json);
                assert_eq!(args.periods, 20);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
