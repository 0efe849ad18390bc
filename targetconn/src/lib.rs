/// Target connection layer for the fuzzer
/// 
/// This crate drives a GDB subprocess over GDB/MI (Machine Interface),
/// correlates every command with its streamed output and turns that output
/// into typed debugging facts: symbol tables and stack frames.

use std::time::Duration;
use thiserror::Error;

pub mod commands;
pub mod connector;
pub mod engine;
pub mod frame;
pub mod gdb_connector;
pub mod handler;
pub mod info_frame;
pub mod parser;
pub mod process;
pub mod registers;
pub mod symbol_listing;
pub mod symbols;
pub mod types;

pub use commands::GdbCommand;
pub use connector::{ConnectorRegistry, TargetConnector};
pub use engine::DebuggerEngine;
pub use frame::{AddressSpecifier, StackFrameInfo, TypedStreamSerializable};
pub use gdb_connector::GdbConnector;
pub use handler::{Feed, MiResultHandler, ResponseHandler};
pub use info_frame::GdbStackFrameInfo;
pub use parser::*;
pub use registers::{GdbRegisterResolver, RegisterType, RegisterTypeResolver};
pub use symbols::{SharedSymbolTable, Symbol, SymbolKind, SymbolSource, SymbolTable};
pub use types::*;

#[derive(Error, Debug)]
pub enum TargetError {
    #[error("Failed to start GDB process: {0}")]
    ProcessStart(#[source] std::io::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("GDB process terminated unexpectedly")]
    ConnectionLost,
    #[error("Unexpected GDB output: {line:?}")]
    ProtocolError { line: String },
    #[error("GDB command failed: {0}")]
    CommandFailed(String),
    #[error("No response from GDB within {0:?}")]
    Timeout(Duration),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Invalid connector configuration '{key}': {reason}")]
    InvalidConfig { key: String, reason: String },
    #[error("Connector is not connected")]
    NotConnected,
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl TargetError {
    pub(crate) fn protocol(line: impl Into<String>) -> Self {
        TargetError::ProtocolError { line: line.into() }
    }
}

pub type Result<T> = std::result::Result<T, TargetError>;
