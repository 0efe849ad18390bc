/// Symbol table
/// 
/// Resolved function and variable symbols of the debugged program. The table
/// is filled by response handlers and only read by everything else.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// A symbol table shared between the handler that fills it and its readers
pub type SharedSymbolTable = Arc<RwLock<SymbolTable>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SymbolKind {
    Function,
    Variable,
}

/// Where GDB got the symbol from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SymbolSource {
    /// Debugging information: file, line and full declaration, no address
    Debugging,
    /// Linker symbols: address and name only
    NonDebugging,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Symbol {
    pub name: String,
    pub kind: SymbolKind,
    pub source: SymbolSource,
    pub address: Option<u64>,
    pub file: Option<String>,
    pub line: Option<u32>,
    pub declaration: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SymbolTable {
    symbols: HashMap<String, Symbol>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }
    
    pub fn shared() -> SharedSymbolTable {
        Arc::new(RwLock::new(Self::new()))
    }
    
    /// Insert or update a symbol.
    ///
    /// Entries from the same source replace each other. A debugging entry is
    /// never replaced by a non-debugging entry of the same name.
    pub fn insert(&mut self, symbol: Symbol) {
        if let Some(existing) = self.symbols.get(&symbol.name) {
            if existing.source == SymbolSource::Debugging && symbol.source == SymbolSource::NonDebugging {
                log::debug!("Keeping debugging entry for '{}'", symbol.name);
                return;
            }
        }
        self.symbols.insert(symbol.name.clone(), symbol);
    }
    
    pub fn get(&self, name: &str) -> Option<&Symbol> {
        self.symbols.get(name)
    }
    
    pub fn contains(&self, name: &str) -> bool {
        self.symbols.contains_key(name)
    }
    
    pub fn len(&self) -> usize {
        self.symbols.len()
    }
    
    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
    
    pub fn clear(&mut self) {
        self.symbols.clear();
    }
    
    pub fn iter(&self) -> impl Iterator<Item = &Symbol> {
        self.symbols.values()
    }
    
    /// The symbol located exactly at `address`
    pub fn at_address(&self, address: u64) -> Option<&Symbol> {
        self.symbols.values().find(|s| s.address == Some(address))
    }
    
    /// The function with the highest address not above `address`
    pub fn function_containing(&self, address: u64) -> Option<&Symbol> {
        self.symbols
            .values()
            .filter(|s| s.kind == SymbolKind::Function)
            .filter_map(|s| s.address.filter(|&a| a <= address).map(|a| (a, s)))
            .max_by_key(|(a, _)| *a)
            .map(|(_, s)| s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linker(name: &str, address: u64) -> Symbol {
        Symbol {
            name: name.into(),
            kind: SymbolKind::Function,
            source: SymbolSource::NonDebugging,
            address: Some(address),
            file: None,
            line: None,
            declaration: None,
        }
    }

    fn debug(name: &str, line: u32) -> Symbol {
        Symbol {
            name: name.into(),
            kind: SymbolKind::Function,
            source: SymbolSource::Debugging,
            address: None,
            file: Some("t.c".into()),
            line: Some(line),
            declaration: Some(format!("int {}(void)", name)),
        }
    }

    #[test]
    fn test_same_source_last_write_wins() {
        let mut table = SymbolTable::new();
        table.insert(linker("_init", 0x1000));
        table.insert(linker("_init", 0x2000));
        assert_eq!(table.len(), 1);
        assert_eq!(table.get("_init").unwrap().address, Some(0x2000));
    }

    #[test]
    fn test_debugging_entry_is_kept() {
        let mut table = SymbolTable::new();
        table.insert(debug("main", 3));
        table.insert(linker("main", 0x1139));
        assert_eq!(table.get("main").unwrap().source, SymbolSource::Debugging);

        let mut table = SymbolTable::new();
        table.insert(linker("main", 0x1139));
        table.insert(debug("main", 3));
        assert_eq!(table.get("main").unwrap().line, Some(3));
    }

    #[test]
    fn test_address_lookups() {
        let mut table = SymbolTable::new();
        table.insert(linker("_init", 0x1000));
        table.insert(linker("_start", 0x1040));
        table.insert(debug("main", 3));
        assert_eq!(table.at_address(0x1040).unwrap().name, "_start");
        assert_eq!(table.function_containing(0x1052).unwrap().name, "_start");
        assert_eq!(table.function_containing(0x1010).unwrap().name, "_init");
        assert!(table.function_containing(0x10).is_none());
    }
}
