use clap::Parser;
use miette::{IntoDiagnostic, Result};
use pvflow::application::engine::TrafficEngine;
use pvflow::config::{EngineConfig, parse_due_days};
use pvflow::domain::clock::{Clock, SystemClock};
use pvflow::infrastructure::in_memory::InMemoryStore;
use pvflow::interfaces::csv::command_reader::CommandReader;
use pvflow::interfaces::csv::ticket_writer::TicketWriter;
use pvflow::interfaces::journal::Replayer;
use pvflow::telemetry;
use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Command journal CSV file
    input: PathBuf,

    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Days granted to pay a ticket when no due date is given
    #[arg(long, value_parser = parse_due_days)]
    due_days: Option<i64>,

    /// Log filter, e.g. `info` or `pvflow=debug`
    #[arg(long)]
    log_level: Option<String>,
}

fn build_engine(config: &EngineConfig) -> Result<TrafficEngine> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    match &config.db_path {
        #[cfg(feature = "storage-rocksdb")]
        Some(path) => {
            let store = pvflow::infrastructure::rocksdb::RocksDBStore::open(path).into_diagnostic()?;
            info!(db_path = %path.display(), "using RocksDB storage");
            Ok(TrafficEngine::new(store, clock, config))
        }
        #[cfg(not(feature = "storage-rocksdb"))]
        Some(path) => miette::bail!(
            "cannot open {}: built without the storage-rocksdb feature",
            path.display()
        ),
        None => Ok(TrafficEngine::new(InMemoryStore::new(), clock, config)),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = EngineConfig::load().into_diagnostic()?;
    if let Some(days) = cli.due_days {
        config.default_due_days = days;
    }
    if let Some(level) = cli.log_level {
        config.telemetry.log_level = level;
    }
    if cli.db_path.is_some() {
        config.db_path = cli.db_path;
    }
    telemetry::init(&config.telemetry).into_diagnostic()?;
    info!(due_days = config.default_due_days, "engine configured");

    let mut replayer = Replayer::new(build_engine(&config)?);

    // Replay the journal
    let file = File::open(cli.input).into_diagnostic()?;
    let reader = CommandReader::new(file);
    for (line, command) in reader.commands().enumerate() {
        match command {
            Ok(command) => {
                if let Err(e) = replayer.apply(command).await {
                    eprintln!("Error processing command on line {}: {}", line + 2, e);
                }
            }
            Err(e) => {
                eprintln!("Error reading command: {}", e);
            }
        }
    }

    let tickets = replayer.summary().await.into_diagnostic()?;

    let stdout = io::stdout();
    let mut writer = TicketWriter::new(stdout.lock());
    writer.write_tickets(tickets).into_diagnostic()?;

    Ok(())
}
