//! FieldGate collector daemon
//!
//! Usage:
//!   fieldgate [--config fieldgate.toml] [--listen 0.0.0.0:8000] [--transport datagram]
//!   fieldgate --print-default-config > fieldgate.toml
//!
//! Log filtering follows `RUST_LOG` when set, otherwise `logging.level`.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;
use env_logger::Env;
use log::info;

use fieldgate_collector::config::CollectorConfig;
use fieldgate_collector::{app, CollectorError, TransportKind};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Edge telemetry collector: registers sensing nodes and forwards their readings",
    long_about = None
)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long, env = "FIELDGATE_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Bind address, overrides listen.address
    #[arg(long, value_name = "ADDR")]
    listen: Option<String>,

    /// Socket transport, overrides listen.transport
    #[arg(long, value_enum)]
    transport: Option<TransportKind>,

    /// Default log filter, overrides logging.level
    #[arg(long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Print the default configuration as TOML and exit
    #[arg(long)]
    print_default_config: bool,
}

impl Cli {
    fn apply(&self, config: &mut CollectorConfig) {
        if let Some(listen) = &self.listen {
            config.listen.address = listen.clone();
        }
        if let Some(transport) = self.transport {
            config.listen.transport = transport;
        }
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
    }
}

fn main() -> Result<(), CollectorError> {
    let cli = Cli::parse();

    if cli.print_default_config {
        print!("{}", CollectorConfig::default().to_toml()?);
        return Ok(());
    }

    let mut config = match &cli.config {
        Some(path) => CollectorConfig::from_file(path)?,
        None => CollectorConfig::default(),
    };
    cli.apply(&mut config);

    env_logger::Builder::from_env(Env::default().default_filter_or(config.logging.level.as_str()))
        .init();

    info!("FieldGate collector v{}", env!("CARGO_PKG_VERSION"));
    if let Some(path) = &cli.config {
        info!("Configuration loaded from {}", path.display());
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&shutdown);
    ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        flag.store(true, Ordering::Release);
    })?;

    let stats = app::run(&config, &shutdown)?;
    info!(
        "Shutdown complete: {} hellos, {} data, {} enqueued, {} dropped as malformed, {} evicted",
        stats.hellos, stats.data, stats.enqueued, stats.malformed, stats.evictions
    );
    Ok(())
}
