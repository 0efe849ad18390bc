/// Stack frame information and address specifiers

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::registers::{RegisterType, RegisterTypeResolver};
use crate::symbols::SymbolTable;
use crate::{Result, TargetError};

/// Values that can be written to and restored from a typed byte stream
///
/// `decode(&x.encode()?)` yields a value equal to `x`.
pub trait TypedStreamSerializable: Sized {
    fn encode(&self) -> Result<Vec<u8>>;
    fn decode(bytes: &[u8]) -> Result<Self>;
}

impl<T: Serialize + DeserializeOwned> TypedStreamSerializable for T {
    fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Describes where in memory a value lives
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AddressSpecifier {
    /// A fixed address
    Static { address: u64 },
    /// `register + offset`, evaluated against the current register values
    RegisterRelative { register: String, offset: i64 },
    /// `symbol + offset`, evaluated against a symbol table
    Symbol { name: String, offset: i64 },
}

impl AddressSpecifier {
    pub fn fixed(address: u64) -> Self {
        AddressSpecifier::Static { address }
    }

    /// Compute the concrete address.
    ///
    /// `read_register` supplies current register values for register relative
    /// specifiers.
    pub fn resolve<F>(&self, read_register: F, symbols: &SymbolTable) -> Result<u64>
    where
        F: Fn(&str) -> Option<u64>,
    {
        match self {
            AddressSpecifier::Static { address } => Ok(*address),
            AddressSpecifier::RegisterRelative { register, offset } => read_register(register)
                .map(|base| base.wrapping_add_signed(*offset))
                .ok_or_else(|| TargetError::NotFound(format!("register {}", register))),
            AddressSpecifier::Symbol { name, offset } => symbols
                .get(name)
                .and_then(|s| s.address)
                .map(|base| base.wrapping_add_signed(*offset))
                .ok_or_else(|| TargetError::NotFound(format!("address of symbol {}", name))),
        }
    }
}

/// Information about the currently active stack frame
pub trait StackFrameInfo: Send + Sync {
    /// Names of all registers saved in this frame
    fn saved_registers(&self) -> Vec<String>;

    /// Where a saved register is stored. Fails with `NotFound` for names
    /// not listed by [`saved_registers`](Self::saved_registers).
    fn saved_register_address(&self, register_name: &str) -> Result<AddressSpecifier>;

    /// Look a saved register up by role
    fn saved_register_address_of(
        &self,
        register_type: RegisterType,
        resolver: &dyn RegisterTypeResolver,
    ) -> Result<AddressSpecifier> {
        let name = resolver
            .register_name(register_type)
            .ok_or_else(|| TargetError::NotFound(format!("{:?} register", register_type)))?;
        self.saved_register_address(name)
    }
}
