/// Wire codec for the remote agent link
/// 
/// Messages are JSON objects, one per line, tagged by `kind`:
///
/// ```text
/// {"kind":"exec","id":7,"name":"job","path":"/bin/true","args":[],"env":[]}
/// {"kind":"exec_status","id":7,"name":"job","pid":1234,"status":0}
/// ```
///
/// `id` is optional in both directions. An agent that echoes it lets a
/// report be matched to the exact request; without it reports are matched
/// by program name.

use serde::{Deserialize, Serialize};

use crate::command::RemoteExecCommand;
use crate::Result;

/// A request to run a program
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    pub name: String,
    pub path: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: Vec<String>,
}

impl ExecRequest {
    pub fn new(command: &RemoteExecCommand, id: Option<u64>) -> Self {
        Self {
            id,
            name: command.name.clone(),
            path: command.path.clone(),
            args: command.args.clone(),
            env: command.env.clone(),
        }
    }

    pub fn command(&self) -> RemoteExecCommand {
        RemoteExecCommand::new(self.name.clone(), self.path.clone(), self.args.clone(), self.env.clone())
    }
}

/// Exit report of a remote program; status 0 means success
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecStatusEvent {
    /// Echo of the request id, if the agent supports it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    pub name: String,
    pub pid: u32,
    pub status: i32,
}

impl ExecStatusEvent {
    pub fn new(name: impl Into<String>, pid: u32, status: i32) -> Self {
        Self {
            id: None,
            name: name.into(),
            pid,
            status,
        }
    }

    pub fn with_id(mut self, id: Option<u64>) -> Self {
        self.id = id;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Message {
    /// Run a program (to the agent)
    Exec(ExecRequest),
    /// A program finished (from the agent)
    ExecStatus(ExecStatusEvent),
}

impl Message {
    /// Encode as one newline terminated line
    pub fn encode(&self) -> Result<String> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }

    pub fn decode(line: &str) -> Result<Self> {
        Ok(serde_json::from_str(line.trim())?)
    }
}
