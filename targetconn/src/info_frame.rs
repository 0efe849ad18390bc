/// Parser for `info frame`
/// 
/// ```text
/// Stack level 0, frame at 0x7fffffffe0e0:
///  rip = 0x555555555131 in main (t.c:3); saved rip = 0x7ffff7dd5d90
///  source language c.
///  Arglist at 0x7fffffffe0d0, args:
///  Locals at 0x7fffffffe0d0, Previous frame's sp is 0x7fffffffe0e0
///  Saved registers:
///   rbp at 0x7fffffffe0d0, rip at 0x7fffffffe0d8
/// ```

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::frame::{AddressSpecifier, StackFrameInfo};
use crate::handler::{check_result, Feed, ResponseHandler};
use crate::types::{GdbOutput, OutputLine, StreamType};
use crate::{Result, TargetError};

static STACK_LEVEL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^Stack level (\d+), frame at 0x([0-9a-fA-F]+):").expect("stack level pattern is valid")
});

static PC_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*\w+ = 0x([0-9a-fA-F]+)(?: in (\S+))?").expect("pc pattern is valid")
});

static SAVED_REGISTER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\w+) at 0x([0-9a-fA-F]+)").expect("saved register pattern is valid")
});

/// Snapshot of one GDB stack frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GdbStackFrameInfo {
    pub level: u32,
    pub frame_address: u64,
    pub pc: Option<u64>,
    pub function: Option<String>,
    saved: BTreeMap<String, AddressSpecifier>,
}

impl GdbStackFrameInfo {
    pub fn new(level: u32, frame_address: u64) -> Self {
        Self {
            level,
            frame_address,
            pc: None,
            function: None,
            saved: BTreeMap::new(),
        }
    }

    pub fn with_saved_register(mut self, name: &str, address: u64) -> Self {
        self.saved.insert(name.to_string(), AddressSpecifier::fixed(address));
        self
    }
}

impl StackFrameInfo for GdbStackFrameInfo {
    fn saved_registers(&self) -> Vec<String> {
        self.saved.keys().cloned().collect()
    }

    fn saved_register_address(&self, register_name: &str) -> Result<AddressSpecifier> {
        self.saved
            .get(register_name)
            .cloned()
            .ok_or_else(|| TargetError::NotFound(format!("saved register {}", register_name)))
    }
}

#[derive(Debug, Default)]
pub struct InfoFrameHandler {
    frame: Option<GdbStackFrameInfo>,
    in_saved_registers: bool,
    result_seen: bool,
}

impl InfoFrameHandler {
    pub fn new() -> Self {
        Self::default()
    }

    fn consume_line(&mut self, line: &str) -> Result<()> {
        if let Some(caps) = STACK_LEVEL.captures(line) {
            let level = caps[1].parse().map_err(|_| TargetError::protocol(line))?;
            let address = parse_hex(&caps[2]).ok_or_else(|| TargetError::protocol(line))?;
            self.frame = Some(GdbStackFrameInfo::new(level, address));
            self.in_saved_registers = false;
            return Ok(());
        }

        let Some(frame) = self.frame.as_mut() else {
            return Ok(());
        };

        if line.trim() == "Saved registers:" {
            self.in_saved_registers = true;
        } else if self.in_saved_registers {
            for caps in SAVED_REGISTER.captures_iter(line) {
                let address = parse_hex(&caps[2]).ok_or_else(|| TargetError::protocol(line))?;
                frame.saved.insert(caps[1].to_string(), AddressSpecifier::fixed(address));
            }
        } else if frame.pc.is_none() {
            if let Some(caps) = PC_LINE.captures(line) {
                frame.pc = parse_hex(&caps[1]);
                frame.function = caps.get(2).map(|m| m.as_str().to_string());
            }
        }
        Ok(())
    }
}

impl ResponseHandler for InfoFrameHandler {
    type Output = GdbStackFrameInfo;

    fn feed(&mut self, line: &OutputLine) -> Feed<GdbStackFrameInfo> {
        match line {
            OutputLine::Record(GdbOutput::Stream(stream)) if stream.stream_type == StreamType::Console => {
                for text in stream.content.split('\n') {
                    if let Err(e) = self.consume_line(text) {
                        return Feed::Error(e);
                    }
                }
                Feed::NeedMore
            }
            OutputLine::Record(GdbOutput::Result(result)) => match check_result(result) {
                Ok(()) => {
                    self.result_seen = true;
                    Feed::NeedMore
                }
                Err(e) => Feed::Error(e),
            },
            OutputLine::Prompt if self.result_seen => match self.frame.take() {
                Some(frame) => Feed::Done(frame),
                None => Feed::Error(TargetError::protocol("info frame printed no stack level")),
            },
            _ => Feed::NeedMore,
        }
    }
}

fn parse_hex(digits: &str) -> Option<u64> {
    u64::from_str_radix(digits, 16).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::TypedStreamSerializable;
    use crate::parser::parse_output_line;
    use crate::registers::{GdbRegisterResolver, RegisterType};

    const INFO_FRAME: &[&str] = &[
        r#"~"Stack level 0, frame at 0x7fffffffe0e0:\n""#,
        r#"~" rip = 0x555555555131 in main (t.c:3); saved rip = 0x7ffff7dd5d90\n""#,
        r#"~" source language c.\n""#,
        r#"~" Arglist at 0x7fffffffe0d0, args: \n""#,
        r#"~" Locals at 0x7fffffffe0d0, Previous frame's sp is 0x7fffffffe0e0\n""#,
        r#"~" Saved registers:\n""#,
        r#"~"  rbp at 0x7fffffffe0d0, rip at 0x7fffffffe0d8\n""#,
        "3^done",
        "(gdb)",
    ];

    fn parse(lines: &[&str]) -> Feed<GdbStackFrameInfo> {
        let mut handler = InfoFrameHandler::new();
        for line in lines {
            match handler.feed(&parse_output_line(line).unwrap()) {
                Feed::NeedMore => continue,
                other => return other,
            }
        }
        Feed::NeedMore
    }

    #[test]
    fn test_every_saved_register_resolves() {
        let Feed::Done(frame) = parse(INFO_FRAME) else {
            panic!("info frame output was not accepted");
        };
        assert_eq!(frame.level, 0);
        assert_eq!(frame.frame_address, 0x7fffffffe0e0);
        assert_eq!(frame.pc, Some(0x555555555131));
        assert_eq!(frame.function.as_deref(), Some("main"));

        let names = frame.saved_registers();
        assert_eq!(names, vec!["rbp".to_string(), "rip".to_string()]);
        for name in &names {
            assert!(frame.saved_register_address(name).is_ok());
        }
        assert_eq!(
            frame.saved_register_address("rip").unwrap(),
            AddressSpecifier::fixed(0x7fffffffe0d8)
        );
        assert!(matches!(frame.saved_register_address("rsp"), Err(TargetError::NotFound(_))));
    }

    #[test]
    fn test_lookup_by_register_role() {
        let frame = GdbStackFrameInfo::new(1, 0x1000).with_saved_register("rbp", 0xff0);
        let resolver = GdbRegisterResolver::X86_64;
        assert_eq!(
            frame.saved_register_address_of(RegisterType::FramePointer, &resolver).unwrap(),
            AddressSpecifier::fixed(0xff0)
        );
        assert!(frame.saved_register_address_of(RegisterType::StackPointer, &resolver).is_err());
    }

    #[test]
    fn test_frame_snapshot_survives_encoding() {
        let frame = GdbStackFrameInfo::new(2, 0x2000).with_saved_register("rip", 0x1ff8);
        let decoded = GdbStackFrameInfo::decode(&frame.encode().unwrap()).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn test_no_stack_is_command_failure() {
        match parse(&[r#"4^error,msg="No stack.""#]) {
            Feed::Error(TargetError::CommandFailed(msg)) => assert_eq!(msg, "No stack."),
            other => panic!("Expected command failure, got {:?}", other),
        }
    }
}
