//! Entry point. `clap` derive CLI over the same engine core
//! `original_source/main.cpp`/`MainService.cpp` both front: `serve` boots
//! every known user's scanners and starts the HTTP surface; `bootstrap`
//! runs the registry's enumeration step once without serving, useful for
//! cold-starting a freshly provisioned host. Logging setup mirrors
//! `fspulse/src/main.rs`'s `setup_logging`.

mod catalogue;
mod config;
mod error;
mod http;
mod mime;
mod pool;
mod registry;
mod scan_target;
mod schema;
mod scanner;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use directories::ProjectDirs;

use error::IndexError;

#[derive(Parser)]
#[command(name = "fsindexd", version, about = "Per-user filesystem indexer and substring search service.")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Boots the scanner registry for every known user and starts the HTTP surface.
    Serve,
    /// Runs the registry's bootstrap/enumeration step once, without serving.
    Bootstrap,
}

fn main() {
    let cli = Cli::parse();

    let project_dirs = match ProjectDirs::from("", "", "fsindexd") {
        Some(d) => d,
        None => {
            eprintln!("error: could not determine project directories for this platform");
            std::process::exit(1);
        }
    };

    let config = match config::Config::load(&project_dirs) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(1);
        }
    };

    let _logger = match setup_logging(&config.log_level.value, &project_dirs) {
        Ok(l) => l,
        Err(e) => {
            eprintln!("error: failed to initialise logging: {e}");
            std::process::exit(1);
        }
    };

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("error: failed to start async runtime: {e}");
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        Command::Bootstrap => registry::bootstrap(&config.base_dir.value, &config.excluded_patterns.value)
            .map(|n| log::info!("bootstrap started {n} scanner(s)")),
        Command::Serve => runtime.block_on(run_serve(&config)),
    };

    registry::shutdown();
    pool::shutdown();

    if let Err(e) = result {
        log::error!("{e}");
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run_serve(config: &config::Config) -> Result<(), IndexError> {
    let started = registry::bootstrap(&config.base_dir.value, &config.excluded_patterns.value)?;
    log::info!("bootstrap started {started} scanner(s)");

    let state = Arc::new(http::AppState::new(
        config.base_dir.value.clone(),
        config.excluded_patterns.value.clone(),
    ));

    http::serve(state, &config.bind_host.value, config.bind_port.value)
        .await
        .map_err(IndexError::FileSystem)
}

fn setup_logging(
    level: &str,
    project_dirs: &ProjectDirs,
) -> Result<flexi_logger::LoggerHandle, flexi_logger::FlexiLoggerError> {
    let log_dir: PathBuf = project_dirs.data_local_dir().join("logs");
    flexi_logger::Logger::try_with_str(level)?
        .log_to_file(flexi_logger::FileSpec::default().directory(log_dir))
        .rotate(
            flexi_logger::Criterion::Size(10_000_000),
            flexi_logger::Naming::Timestamps,
            flexi_logger::Cleanup::KeepLogFiles(5),
        )
        .duplicate_to_stderr(flexi_logger::Duplicate::Warn)
        .start()
}
