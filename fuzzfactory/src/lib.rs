/// Fuzzing environment factory
/// 
/// Builds the remote control link and the target connector from one
/// configuration document, runs the remote programs bound to each trigger
/// phase and drives fuzz runs on top of them.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use remotectl::RemoteError;
use targetconn::TargetError;

pub mod config;
pub mod driver;
pub mod factory;
pub mod logger;
pub mod triggers;

pub use config::ConfigDocument;
pub use driver::{FuzzRunDriver, RunAborted, RunBody, RunStage};
pub use factory::{FactoryPhase, FuzzFactory, DEFAULT_TRIGGER_TIMEOUT};
pub use logger::{DataLogger, ExecutionLogger};
pub use triggers::{TriggerPhase, TriggerRegistry};

#[derive(Error, Debug)]
pub enum FactoryError {
    #[error("The configuration document '{0}' does not exist")]
    NotFound(PathBuf),
    #[error("Failed to read configuration document '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Malformed configuration: {0}")]
    MalformedConfig(String),
    #[error("Could not find '{0}' section")]
    MissingSection(&'static str),
    #[error("Could not find connector with identifier '{0}'")]
    UnresolvedConnector(String),
    #[error("Unknown execution trigger '{0}'")]
    InvalidTrigger(String),
    #[error("Could not execute command '{command}' within {timeout:?}, check the connection and the remote terminal for errors")]
    Timeout { command: String, timeout: Duration },
    #[error("Remote program '{command}' reported an errorcode #{code}")]
    RemoteExecutionFailed { command: String, code: i32 },
    #[error("Remote control error: {0}")]
    Remote(#[from] RemoteError),
    #[error("Target connection error: {0}")]
    Target(#[from] TargetError),
    #[error("The factory has not been initialized")]
    NotInitialized,
}

pub type Result<T> = std::result::Result<T, FactoryError>;
