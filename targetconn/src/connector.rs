/// Target connectors
/// 
/// A connector attaches the fuzzer to a concrete target execution or
/// debugging mechanism. Connectors are created by identifier through a
/// [`ConnectorRegistry`].

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;

use crate::frame::StackFrameInfo;
use crate::gdb_connector::GdbConnector;
use crate::symbols::SharedSymbolTable;
use crate::Result;

#[async_trait]
pub trait TargetConnector: Send {
    /// Apply the key/value configuration. Called once, before `connect`.
    fn setup(&mut self, config: &HashMap<String, String>) -> Result<()>;

    async fn connect(&mut self) -> Result<()>;

    async fn close(&mut self) -> Result<()>;

    fn is_connected(&self) -> bool;

    /// Symbols resolved so far
    fn symbol_table(&self) -> SharedSymbolTable;

    /// Snapshot of the currently selected stack frame
    async fn current_frame(&mut self) -> Result<Box<dyn StackFrameInfo>>;

    /// Write the execution trace of the last run to `path`
    async fn save_execution_log(&mut self, path: &Path) -> Result<()>;
}

type ConnectorConstructor = Box<dyn Fn() -> Box<dyn TargetConnector> + Send + Sync>;

/// Maps connector identifiers to constructors
#[derive(Default)]
pub struct ConnectorRegistry {
    constructors: HashMap<String, ConnectorConstructor>,
}

impl ConnectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry knowing every connector this crate ships
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("gdb", || Box::new(GdbConnector::new()));
        registry
    }

    pub fn register<F>(&mut self, identifier: &str, constructor: F)
    where
        F: Fn() -> Box<dyn TargetConnector> + Send + Sync + 'static,
    {
        if self.constructors.insert(identifier.to_string(), Box::new(constructor)).is_some() {
            log::warn!("Connector '{}' registered twice, keeping the last one", identifier);
        }
    }

    /// Build a fresh connector, or `None` for an unknown identifier
    pub fn create(&self, identifier: &str) -> Option<Box<dyn TargetConnector>> {
        self.constructors.get(identifier).map(|constructor| constructor())
    }

    pub fn identifiers(&self) -> impl Iterator<Item = &str> {
        self.constructors.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_resolve_gdb() {
        let registry = ConnectorRegistry::with_defaults();
        let connector = registry.create("gdb").unwrap();
        assert!(!connector.is_connected());
        assert!(registry.create("winapi").is_none());
    }
}
