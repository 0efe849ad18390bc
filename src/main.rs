use async_trait::async_trait;
use clap::Parser;
use std::path::PathBuf;

use fuzzfactory::{ExecutionLogger, FuzzFactory, FuzzRunDriver, RunBody};
use targetconn::{TargetConnector, TargetError};

#[derive(Parser, Debug)]
#[command(author, version, about = "Fuzzing harness bridging a debugger and a remote target", long_about = None)]
struct Args {
    /// Environment configuration document (JSON)
    config: PathBuf,

    /// Number of fuzz runs to drive
    #[arg(short, long, default_value_t = 1)]
    runs: u64,

    /// Save each run's execution log into this directory
    #[arg(long)]
    log_dir: Option<PathBuf>,

    #[arg(long, default_value = "info")]
    log_level: log::LevelFilter,
}

/// Logs where the target stopped after each run
struct FrameReport;

#[async_trait]
impl RunBody for FrameReport {
    async fn execute(&mut self, run: u64, connector: &mut dyn TargetConnector) -> Result<(), TargetError> {
        let frame = connector.current_frame().await?;
        let symbols = connector.symbol_table();
        let symbol_count = symbols.read().map(|table| table.len()).unwrap_or_default();
        log::info!(
            "Run {}: saved registers {:?} ({} symbols known)",
            run,
            frame.saved_registers(),
            symbol_count
        );
        Ok(())
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    if let Err(e) = simple_logger::SimpleLogger::new()
        .with_level(log::LevelFilter::Warn)
        .with_module_level("fuzzlink", args.log_level)
        .with_module_level("fuzzfactory", args.log_level)
        .with_module_level("remotectl", args.log_level)
        .with_module_level("targetconn", args.log_level)
        .init()
    {
        eprintln!("Failed to initialize logging: {e}");
    }

    log::info!("fuzzlink starting with {}", args.config.display());

    let mut factory = match FuzzFactory::from_file(&args.config) {
        Ok(factory) => factory,
        Err(e) => {
            log::error!("{e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = factory.init().await {
        log::error!("Could not set up the fuzzing environment: {e}");
        std::process::exit(1);
    }

    let mut completed = 0;
    {
        let mut driver = FuzzRunDriver::new(&mut factory);
        if let Some(dir) = &args.log_dir {
            driver.add_logger(Box::new(ExecutionLogger::per_run(dir)));
        }

        let mut body = FrameReport;
        for _ in 0..args.runs {
            match driver.run_once(&mut body).await {
                Ok(_) => completed += 1,
                Err(aborted) => log::error!("{aborted}"),
            }
        }
    }
    log::info!("{completed} of {} runs completed", args.runs);

    if let Err(e) = factory.shutdown().await {
        log::warn!("Shutdown: {e}");
    }
}
