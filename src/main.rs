mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use ridetrack::ingest_config::IngestConfig;
use ridetrack::log_format::TargetFirstFormat;
use std::io::IsTerminal;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

const VERSION: &str = match option_env!("VERGEN_GIT_DESCRIBE") {
    Some(describe) => describe,
    None => env!("CARGO_PKG_VERSION"),
};

#[derive(Parser)]
#[command(name = "ridetrack", version = VERSION, about = "Vehicle location ingestion")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply pending database migrations
    Migrate,
    /// Rebuild the caches from the database and report what was loaded
    Bootstrap,
    /// Ingest newline-delimited JSON position reports
    Run {
        /// Input file; `-` or omitted reads stdin
        #[arg(long)]
        input: Option<PathBuf>,
        /// Use the in-memory store instead of PostgreSQL
        #[arg(long, default_value_t = false)]
        memory: bool,
        /// Number of location workers (overrides INGEST_WORKERS)
        #[arg(long)]
        workers: Option<usize>,
        /// Queue capacity, 1000-10000 (overrides INGEST_QUEUE_CAPACITY)
        #[arg(long)]
        queue_capacity: Option<usize>,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .event_format(TargetFirstFormat::new(std::io::stderr().is_terminal()))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let config = IngestConfig::from_env()?;

    match cli.command {
        Commands::Migrate => commands::handle_migrate(config).await,
        Commands::Bootstrap => commands::handle_bootstrap(config).await,
        Commands::Run {
            input,
            memory,
            workers,
            queue_capacity,
        } => {
            let config = config.with_overrides(queue_capacity, workers)?;
            commands::handle_run(config, commands::ReportSource::from_arg(input), memory).await
        }
    }
}
