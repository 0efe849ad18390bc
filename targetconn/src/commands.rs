/// GDB commands
/// 
/// A command pairs the text sent to GDB with the response handler that
/// understands its output, bound to the engine it runs against.

use crate::engine::DebuggerEngine;
use crate::handler::{MiResultHandler, ResponseHandler};
use crate::info_frame::InfoFrameHandler;
use crate::symbol_listing::SymbolListingHandler;
use crate::symbols::{SharedSymbolTable, SymbolKind};
use crate::Result;

pub struct GdbCommand<'a, H> {
    engine: &'a DebuggerEngine,
    command: String,
    handler: H,
}

impl<'a, H: ResponseHandler> GdbCommand<'a, H> {
    pub fn new(engine: &'a DebuggerEngine, command: impl Into<String>, handler: H) -> Self {
        Self {
            engine,
            command: command.into(),
            handler,
        }
    }

    /// The MI text written to GDB, without the token
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Submit the command and wait for its handler to resolve
    pub async fn execute(self) -> Result<H::Output> {
        self.engine.submit(&self.command, self.handler).await
    }
}

impl<'a> GdbCommand<'a, MiResultHandler> {
    /// A plain MI command such as `file-exec-and-symbols "/tmp/target"`
    pub fn mi(engine: &'a DebuggerEngine, command: impl Into<String>) -> Self {
        Self::new(engine, command, MiResultHandler::new())
    }

    /// A CLI command run through the MI console interpreter
    pub fn console(engine: &'a DebuggerEngine, command: &str) -> Self {
        Self::new(engine, console_command(command), MiResultHandler::new())
    }
}

impl<'a> GdbCommand<'a, SymbolListingHandler> {
    /// `info functions`: adds every function symbol to `symbols`, then calls
    /// `callback` with the number of functions listed
    pub fn info_functions<F>(engine: &'a DebuggerEngine, symbols: SharedSymbolTable, callback: F) -> Self
    where
        F: FnOnce(usize) + Send + 'static,
    {
        let handler = SymbolListingHandler::new(SymbolKind::Function, symbols, Box::new(callback));
        Self::new(engine, console_command("info functions"), handler)
    }

    /// `info variables`: like [`info_functions`](Self::info_functions) for global variables
    pub fn info_variables<F>(engine: &'a DebuggerEngine, symbols: SharedSymbolTable, callback: F) -> Self
    where
        F: FnOnce(usize) + Send + 'static,
    {
        let handler = SymbolListingHandler::new(SymbolKind::Variable, symbols, Box::new(callback));
        Self::new(engine, console_command("info variables"), handler)
    }
}

impl<'a> GdbCommand<'a, InfoFrameHandler> {
    /// `info frame` for the selected frame
    pub fn info_frame(engine: &'a DebuggerEngine) -> Self {
        Self::new(engine, console_command("info frame"), InfoFrameHandler::new())
    }
}

/// Wrap a CLI command for `-interpreter-exec console`
pub fn console_command(command: &str) -> String {
    format!("interpreter-exec console {}", quote(command))
}

/// Quote an argument as a C string for the MI input syntax
pub fn quote(text: &str) -> String {
    let mut quoted = String::with_capacity(text.len() + 2);
    quoted.push('"');
    for ch in text.chars() {
        match ch {
            '"' => quoted.push_str("\\\""),
            '\\' => quoted.push_str("\\\\"),
            '\n' => quoted.push_str("\\n"),
            other => quoted.push(other),
        }
    }
    quoted.push('"');
    quoted
}
