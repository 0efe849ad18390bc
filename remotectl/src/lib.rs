/// Remote control of the fuzzing target
/// 
/// A persistent connection to an agent on the target machine. The agent runs
/// programs on request and reports their exit status asynchronously; callers
/// correlate those reports with their requests by program name.

use thiserror::Error;

pub mod codec;
pub mod command;
pub mod execution;
pub mod protocol;

pub use codec::{ExecRequest, ExecStatusEvent, Message};
pub use command::RemoteExecCommand;
pub use execution::{ExecutionStatus, RemoteExecutionInfo, WaitOutcome};
pub use protocol::RemoteControlProtocol;

#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("Failed to connect to remote agent at {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Remote link I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Connection to remote agent lost")]
    ConnectionLost,
    #[error("Malformed remote message: {0}")]
    Codec(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, RemoteError>;
