/// GDB/MI records
///
/// What one line of debugger output turns into once parsed. Field values keep
/// GDB's own structure (constants, lists and tuples); interpreting them is
/// left to the response handlers.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Named values of a result or async record, `key=value,...`
pub type Fields = BTreeMap<String, Value>;

/// One classified line of debugger output
#[derive(Debug, Clone, PartialEq)]
pub enum OutputLine {
    Record(GdbOutput),
    /// `(gdb)`, printed once GDB accepts the next command
    Prompt,
}

#[derive(Debug, Clone, PartialEq)]
pub enum GdbOutput {
    Result(GdbResult),
    Async(AsyncRecord),
    Stream(StreamRecord),
}

/// `[token]^class[,fields]`, the answer to one command
#[derive(Debug, Clone, PartialEq)]
pub struct GdbResult {
    pub token: Option<u32>,
    pub class: ResultClass,
    pub results: Fields,
}

impl GdbResult {
    /// A constant field of the record
    pub fn field(&self, key: &str) -> Option<&str> {
        self.results.get(key).and_then(Value::as_str)
    }

    /// The `msg` field of an `^error` record
    pub fn error_message(&self) -> &str {
        self.field("msg").unwrap_or("Unknown error")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultClass {
    Done,
    Running,
    Connected,
    Error,
    Exit,
}

impl ResultClass {
    pub fn from_keyword(keyword: &str) -> Option<Self> {
        Some(match keyword {
            "done" => ResultClass::Done,
            "running" => ResultClass::Running,
            "connected" => ResultClass::Connected,
            "error" => ResultClass::Error,
            "exit" => ResultClass::Exit,
            _ => return None,
        })
    }
}

/// Out-of-band notification, `[token](*|+|=)class[,fields]`
#[derive(Debug, Clone, PartialEq)]
pub struct AsyncRecord {
    pub token: Option<u32>,
    pub kind: AsyncKind,
    /// e.g. `stopped`, `thread-group-added`
    pub class: String,
    pub results: Fields,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsyncKind {
    /// `*`: the inferior changed execution state
    Exec,
    /// `+`: progress of a slow operation
    Status,
    /// `=`: everything else
    Notify,
}

impl AsyncKind {
    pub fn from_prefix(prefix: char) -> Option<Self> {
        match prefix {
            '*' => Some(AsyncKind::Exec),
            '+' => Some(AsyncKind::Status),
            '=' => Some(AsyncKind::Notify),
            _ => None,
        }
    }
}

/// Text GDB prints on behalf of a command, already unescaped
#[derive(Debug, Clone, PartialEq)]
pub struct StreamRecord {
    pub stream_type: StreamType,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamType {
    /// `~`: CLI output, what `info ...` commands produce
    Console,
    /// `@`: output of the remote target
    Target,
    /// `&`: GDB's own log
    Log,
}

impl StreamType {
    pub fn from_prefix(prefix: char) -> Option<Self> {
        match prefix {
            '~' => Some(StreamType::Console),
            '@' => Some(StreamType::Target),
            '&' => Some(StreamType::Log),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Const(String),
    List(Vec<Value>),
    Tuple(Fields),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Const(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(list) => Some(list),
            _ => None,
        }
    }

    pub fn as_tuple(&self) -> Option<&Fields> {
        match self {
            Value::Tuple(fields) => Some(fields),
            _ => None,
        }
    }

    /// Field `key` of a tuple
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_tuple().and_then(|fields| fields.get(key))
    }
}

impl fmt::Display for ResultClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keyword = match self {
            ResultClass::Done => "done",
            ResultClass::Running => "running",
            ResultClass::Connected => "connected",
            ResultClass::Error => "error",
            ResultClass::Exit => "exit",
        };
        f.write_str(keyword)
    }
}
