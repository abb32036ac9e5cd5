//! sluice CLI - configuration-driven extract/load pipelines.

use clap::{Parser, Subcommand};
use sluice::{BackendRegistry, Config, Pipeline, SluiceError};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{info, Level};
use tracing_subscriber::fmt::format::FmtSpan;

#[derive(Parser)]
#[command(name = "sluice")]
#[command(about = "Extract rows from a database or API and merge them into a warehouse table")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Run identifier used in logs and chunk file names [default: process id]
    #[arg(long)]
    run_id: Option<String>,

    /// Output JSON result to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract from the source and merge into the target
    Run {
        /// Write every extracted chunk to a CSV file
        #[arg(long)]
        dump_csv: bool,

        /// Override rows per chunk (0 or less disables chunking)
        #[arg(long, allow_hyphen_values = true)]
        chunk_size: Option<i64>,
    },

    /// Parse and validate the configuration without connecting
    Validate,

    /// Test source and target connections
    HealthCheck,

    /// Print the source queries with configured placeholders resolved
    Queries,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<(), SluiceError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format);

    let mut config = Config::load(&cli.config)?;
    info!("Loaded configuration from {:?}", cli.config);

    let run_id = cli
        .run_id
        .clone()
        .unwrap_or_else(|| std::process::id().to_string());

    match cli.command {
        Commands::Run {
            dump_csv,
            chunk_size,
        } => {
            if dump_csv {
                config.source.dump_data_csv = true;
            }
            if let Some(size) = chunk_size {
                config.source.chunk_size = size;
            }

            let registry = BackendRegistry::with_builtins();
            let mut pipeline = Pipeline::new(config, &registry, run_id).await?;
            let outcome = pipeline.run().await;
            pipeline.close().await;
            let result = outcome?;

            if cli.output_json {
                println!("{}", result.to_json()?);
            } else {
                println!("\nPipeline completed!");
                println!("  Run ID: {}", result.run_id);
                println!("  Duration: {:.2}s", result.duration_seconds);
                println!("  Chunks: {}", result.chunks);
                println!(
                    "  Rows: {} extracted, {} processed",
                    result.rows_extracted, result.rows_processed
                );
                println!(
                    "  Target: {} inserted, {} updated",
                    result.inserted_rows, result.updated_rows
                );
                for file in &result.chunk_files {
                    println!("  Chunk file: {}", file.display());
                }
            }
        }

        Commands::Validate => {
            // Config::load already validated; report what was checked.
            if cli.output_json {
                let summary = serde_json::json!({
                    "valid": true,
                    "source": config.source.connection.r#type,
                    "target": config.target.full_name(),
                    "config_hash": config.hash(),
                });
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                println!("Configuration is valid");
                println!("  Source: {}", config.source.connection.r#type);
                println!("  Target: {}", config.target.full_name());
            }
        }

        Commands::HealthCheck => {
            let registry = BackendRegistry::with_builtins();
            let pipeline = Pipeline::new(config, &registry, run_id).await?;
            let result = pipeline.health_check().await;
            pipeline.close().await;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("Health Check Results:");
                print_side("Source", result.source_connected, result.source_latency_ms, &result.source_error);
                print_side("Target", result.target_connected, result.target_latency_ms, &result.target_error);
                println!(
                    "\nOverall: {}",
                    if result.healthy { "HEALTHY" } else { "UNHEALTHY" }
                );
            }

            if !result.healthy {
                return Err(SluiceError::Connection {
                    backend: "pipeline".into(),
                    message: "health check failed".into(),
                });
            }
        }

        Commands::Queries => {
            let queries = &config.source.queries;
            let mut resolved = serde_json::Map::new();
            for role in queries.roles() {
                // Iteration placeholders are only known at run time.
                let sql = match queries.get_query(role) {
                    Ok(sql) => sql,
                    Err(_) => queries.sql(role)?.to_string(),
                };
                resolved.insert(role.to_string(), serde_json::Value::String(sql));
            }

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&resolved)?);
            } else {
                for (role, sql) in &resolved {
                    println!("[{}]", role);
                    println!("{}\n", sql.as_str().unwrap_or_default());
                }
            }
        }
    }

    Ok(())
}

fn print_side(label: &str, connected: bool, latency_ms: u64, error: &Option<String>) {
    println!(
        "  {}: {} ({}ms)",
        label,
        if connected { "OK" } else { "FAILED" },
        latency_ms
    );
    if let Some(err) = error {
        println!("    Error: {}", err);
    }
}

fn setup_logging(verbosity: &str, format: &str) {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    // Logs go to stderr so --output-json stays parseable.
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false)
        .with_writer(std::io::stderr);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}
