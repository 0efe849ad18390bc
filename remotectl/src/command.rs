/// Remote program invocations

use serde::{Deserialize, Serialize};

/// A named program to run on the target
///
/// The name is the correlation key for status reports. Names of commands
/// outstanding at the same time must be unique.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteExecCommand {
    pub name: String,
    pub path: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: Vec<String>,
}

impl RemoteExecCommand {
    pub fn new(name: impl Into<String>, path: impl Into<String>, args: Vec<String>, env: Vec<String>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            args,
            env,
        }
    }
}
