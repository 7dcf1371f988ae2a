//! mysql-pg-monitor CLI - Row-count consistency monitor for MySQL to PostgreSQL CDC.

mod render;

use clap::{Parser, Subcommand};
use mysql_pg_monitor::core::{SourceShard, TargetDatabase};
use mysql_pg_monitor::{
    discover, drivers, health_check, normalize, Config, MonitorError, Registry, Scheduler,
};
use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};
use tracing_subscriber::fmt::format::FmtSpan;

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

#[derive(Parser)]
#[command(name = "mysql-pg-monitor")]
#[command(about = "Row-count consistency monitor for sharded MySQL to PostgreSQL CDC")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Output JSON to stdout instead of text
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
    /// Monitor row counts until interrupted
    Run {
        /// Override the configured shard list (comma separated)
        #[arg(long, value_delimiter = ',')]
        databases: Option<Vec<String>>,
    },

    /// List the entities discovered on every shard
    Discover {
        /// Override the configured shard list (comma separated)
        #[arg(long, value_delimiter = ',')]
        databases: Option<Vec<String>>,
    },

    /// Test database connections
    HealthCheck,

    /// Print the canonical entity name for each table name
    Normalize {
        /// Source table names
        #[arg(required = true)]
        names: Vec<String>,
    },
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

async fn run() -> Result<(), MonitorError> {
    let cli = Cli::parse();

    // Handle normalize separately (doesn't need a config or a database)
    if let Commands::Normalize { names } = &cli.command {
        print_normalized(names, cli.output_json)?;
        return Ok(());
    }

    setup_logging(&cli.verbosity, &cli.log_format).map_err(MonitorError::Config)?;

    let mut config = Config::load(&cli.config)?;
    info!("Loaded configuration from {:?}", cli.config);

    match cli.command {
        Commands::Normalize { .. } => unreachable!(), // Handled above
        Commands::Run { databases } => {
            if let Some(databases) = databases {
                config = config.with_databases(databases)?;
            }
            let cancel = setup_signal_handler()?;
            monitor(&config, cancel, cli.output_json).await?;
        }

        Commands::Discover { databases } => {
            if let Some(databases) = databases {
                config = config.with_databases(databases)?;
            }
            let shards = drivers::connect_shards(&config.source)?;
            let prefixes = config.source.ignored_prefixes();
            let registry = discover(shards.clone(), &prefixes).await;
            close_shards(&shards).await;
            print_registry(&registry?, cli.output_json)?;
        }

        Commands::HealthCheck => {
            let shards = drivers::connect_shards(&config.source)?;
            let target = drivers::PgTarget::new(&config.target)?;
            let result = health_check(&shards, &target).await;
            close_shards(&shards).await;
            target.close().await;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("Health Check Results:");
                for endpoint in &result.endpoints {
                    let role = if endpoint.role == "source" {
                        "Source (MySQL)"
                    } else {
                        "Target (PostgreSQL)"
                    };
                    println!(
                        "  {} {}: {} ({}ms)",
                        role,
                        endpoint.name,
                        if endpoint.connected { "OK" } else { "FAILED" },
                        endpoint.latency_ms
                    );
                    if let Some(ref err) = endpoint.error {
                        println!("    Error: {}", err);
                    }
                }
                println!(
                    "\n  Overall: {}",
                    if result.healthy { "HEALTHY" } else { "UNHEALTHY" }
                );
            }

            let failed = result.failed().next().map(|e| e.name.clone());
            if let Some(endpoint) = failed {
                return Err(MonitorError::connection(endpoint, "health check failed"));
            }
        }
    }

    Ok(())
}

/// Discover, start the scheduler and render every snapshot until cancelled.
async fn monitor(
    config: &Config,
    cancel: CancellationToken,
    output_json: bool,
) -> Result<(), MonitorError> {
    let shards = drivers::connect_shards(&config.source)?;
    let target: Arc<dyn TargetDatabase> = Arc::new(drivers::PgTarget::new(&config.target)?);

    let prefixes = config.source.ignored_prefixes();
    let registry = tokio::select! {
        registry = discover(shards.clone(), &prefixes) => registry,
        _ = cancel.cancelled() => Err(MonitorError::Cancelled),
    };
    let registry = match registry {
        Ok(registry) => Arc::new(registry),
        Err(e) => {
            close_shards(&shards).await;
            target.close().await;
            return Err(e);
        }
    };
    for diagnostic in registry.diagnostics() {
        warn!("Shard {} is not monitored: {}", diagnostic.shard, diagnostic.error);
    }

    let scheduler = Scheduler::new(registry, target.clone(), config.settings(), cancel);
    let mut snapshots = scheduler.subscribe();
    let engine = tokio::spawn(scheduler.run());

    let max_rows = config.monitor.max_tables_display;
    let clear_screen = !output_json && std::io::stdout().is_terminal();

    // The channel closes once the scheduler has published its final snapshot
    while snapshots.changed().await.is_ok() {
        let snapshot = snapshots.borrow_and_update().clone();
        if output_json {
            println!("{}", serde_json::to_string(snapshot.as_ref())?);
        } else {
            if clear_screen {
                print!("\x1b[2J\x1b[H");
            }
            println!(
                "{}",
                render::render(&snapshot, max_rows, chrono::Utc::now())
            );
        }
    }

    let outcome = match engine.await {
        Ok(outcome) => outcome,
        Err(e) => Err(MonitorError::Io(std::io::Error::other(e))),
    };

    close_shards(&shards).await;
    target.close().await;
    info!("Monitor stopped");
    outcome
}

async fn close_shards(shards: &[Arc<dyn SourceShard>]) {
    for shard in shards {
        shard.close().await;
    }
}

fn print_registry(registry: &Registry, output_json: bool) -> Result<(), MonitorError> {
    if output_json {
        let groups: Vec<_> = registry
            .groups()
            .iter()
            .map(|group| {
                let entities: Vec<_> = group
                    .entities()
                    .iter()
                    .map(|e| {
                        serde_json::json!({
                            "canonical_name": e.canonical_name(),
                            "source_members": e.source_members(),
                        })
                    })
                    .collect();
                serde_json::json!({ "shard": group.shard_name(), "entities": entities })
            })
            .collect();
        let doc = serde_json::json!({
            "groups": groups,
            "diagnostics": registry.diagnostics(),
        });
        println!("{}", serde_json::to_string_pretty(&doc)?);
        return Ok(());
    }

    for group in registry.groups() {
        println!(
            "{} ({} entities)",
            group.shard_name(),
            group.entities().len()
        );
        for entity in group.entities() {
            println!(
                "  {} <- {}",
                entity.canonical_name(),
                entity.source_members().join(", ")
            );
        }
    }
    for diagnostic in registry.diagnostics() {
        println!("{} skipped: {}", diagnostic.shard, diagnostic.error);
    }
    println!("\nTotal: {} entities", registry.entity_count());
    Ok(())
}

fn print_normalized(names: &[String], output_json: bool) -> Result<(), MonitorError> {
    if output_json {
        let pairs: serde_json::Map<String, serde_json::Value> = names
            .iter()
            .map(|name| (name.clone(), serde_json::Value::String(normalize(name))))
            .collect();
        println!("{}", serde_json::to_string_pretty(&pairs)?);
    } else {
        for name in names {
            println!("{} -> {}", name, normalize(name));
        }
    }
    Ok(())
}

fn setup_logging(verbosity: &str, format: &str) -> Result<(), String> {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    // stdout carries the rendered table
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false)
        .with_writer(std::io::stderr);

    if format == "json" {
        subscriber.json().try_init().map_err(|e| e.to_string())
    } else {
        subscriber.try_init().map_err(|e| e.to_string())
    }
}

/// Setup signal handlers for graceful shutdown.
/// Handles both SIGINT (Ctrl-C) and SIGTERM.
/// Returns a CancellationToken that will be cancelled when a signal is received.
#[cfg(unix)]
fn setup_signal_handler() -> Result<CancellationToken, MonitorError> {
    let cancel_token = CancellationToken::new();

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    let token = cancel_token.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = sigint.recv() => eprintln!("\nReceived SIGINT. Shutting down..."),
            _ = sigterm.recv() => eprintln!("\nReceived SIGTERM. Shutting down..."),
        }
        token.cancel();
    });

    Ok(cancel_token)
}

/// Setup signal handler for Windows (only Ctrl-C)
#[cfg(not(unix))]
fn setup_signal_handler() -> Result<CancellationToken, MonitorError> {
    let cancel_token = CancellationToken::new();
    let token = cancel_token.clone();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nReceived Ctrl-C. Shutting down...");
            token.cancel();
        }
    });

    Ok(cancel_token)
}
