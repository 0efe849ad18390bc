/// Register type resolution
/// 
/// Connector-independent code asks for registers by role; each connector maps
/// roles to its own register names.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RegisterType {
    InstructionPointer,
    StackPointer,
    FramePointer,
}

pub trait RegisterTypeResolver: Send + Sync {
    /// Name of the register playing `register_type`, if the architecture has one
    fn register_name(&self, register_type: RegisterType) -> Option<&str>;
}

/// Register names as GDB reports them
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GdbRegisterResolver {
    X86_64,
    I386,
    Arm,
    Aarch64,
}

impl GdbRegisterResolver {
    /// Resolver for a GDB architecture name such as `i386:x86-64`
    pub fn for_arch(arch: &str) -> Option<Self> {
        match arch.to_ascii_lowercase().as_str() {
            "x86_64" | "x86-64" | "amd64" | "i386:x86-64" => Some(Self::X86_64),
            "i386" | "x86" | "i686" => Some(Self::I386),
            "arm" | "armv7" => Some(Self::Arm),
            "aarch64" | "arm64" => Some(Self::Aarch64),
            _ => None,
        }
    }
}

impl RegisterTypeResolver for GdbRegisterResolver {
    fn register_name(&self, register_type: RegisterType) -> Option<&str> {
        use RegisterType::*;
        let name = match (self, register_type) {
            (Self::X86_64, InstructionPointer) => "rip",
            (Self::X86_64, StackPointer) => "rsp",
            (Self::X86_64, FramePointer) => "rbp",
            (Self::I386, InstructionPointer) => "eip",
            (Self::I386, StackPointer) => "esp",
            (Self::I386, FramePointer) => "ebp",
            (Self::Arm, InstructionPointer) => "pc",
            (Self::Arm, StackPointer) => "sp",
            (Self::Arm, FramePointer) => "r11",
            (Self::Aarch64, InstructionPointer) => "pc",
            (Self::Aarch64, StackPointer) => "sp",
            (Self::Aarch64, FramePointer) => "x29",
        };
        Some(name)
    }
}
