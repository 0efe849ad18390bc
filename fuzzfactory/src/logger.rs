/// Per-run data loggers

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use targetconn::{TargetConnector, TargetError};

/// Collects data about each fuzz run from the target connection
#[async_trait]
pub trait DataLogger: Send {
    async fn start_run(&mut self, run: u64) -> Result<(), TargetError>;

    async fn finish_run(&mut self, run: u64, connector: &mut dyn TargetConnector) -> Result<(), TargetError>;
}

const DEFAULT_LOG_NAME: &str = "gdb";
const EXECUTION_LOG_EXTENSION: &str = "execlog";

/// Saves the connector's execution log once a run finishes
#[derive(Debug, Clone)]
pub struct ExecutionLogger {
    dir: PathBuf,
    prefix: String,
    per_run: bool,
}

impl ExecutionLogger {
    /// Every run writes the same `<dir>/<prefix>.execlog`
    pub fn new(dir: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            prefix: prefix.into(),
            per_run: false,
        }
    }

    /// Each run writes its own `<dir>/run-<n>.execlog`
    pub fn per_run(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            prefix: String::new(),
            per_run: true,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn set_prefix(&mut self, prefix: impl Into<String>) {
        self.prefix = prefix.into();
    }

    pub fn log_file(&self) -> PathBuf {
        let name = if self.prefix.is_empty() {
            DEFAULT_LOG_NAME
        } else {
            self.prefix.as_str()
        };
        self.dir.join(format!("{}.{}", name, EXECUTION_LOG_EXTENSION))
    }
}

#[async_trait]
impl DataLogger for ExecutionLogger {
    async fn start_run(&mut self, run: u64) -> Result<(), TargetError> {
        if self.per_run {
            self.prefix = format!("run-{}", run);
        }
        tokio::fs::create_dir_all(&self.dir).await?;
        Ok(())
    }

    async fn finish_run(&mut self, run: u64, connector: &mut dyn TargetConnector) -> Result<(), TargetError> {
        let path = self.log_file();
        log::info!("Saving execution log of run {} to {}", run, path.display());
        connector.save_execution_log(&path).await
    }
}
