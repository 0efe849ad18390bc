/// Configuration document
/// 
/// The document is read and checked for well-formedness up front; its
/// sections are only interpreted when the factory initializes.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use remotectl::RemoteExecCommand;

use crate::triggers::TriggerPhase;
use crate::{FactoryError, Result};

pub const REMOTE_CONTROL_SECTION: &str = "remote_control";
pub const TARGET_CONNECTION_SECTION: &str = "target_connection";

const DEFAULT_TIMEOUT_MS: u64 = 5000;

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteControlSection {
    pub host: String,
    #[serde(default)]
    pub port: u16,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub exec: Vec<ExecEntry>,
}

/// One triggered remote program
#[derive(Debug, Clone, Deserialize)]
pub struct ExecEntry {
    pub trigger: String,
    pub name: Option<String>,
    pub cmd: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: Vec<String>,
}

impl ExecEntry {
    pub fn phase(&self) -> Result<TriggerPhase> {
        self.trigger.parse()
    }

    /// The remote command, named after `cmd` unless a name is given
    pub fn to_command(&self) -> RemoteExecCommand {
        let name = self.name.clone().unwrap_or_else(|| self.cmd.clone());
        RemoteExecCommand::new(name, self.cmd.clone(), self.args.clone(), self.env.clone())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TargetConnectionSection {
    pub connector: String,
    #[serde(default)]
    pub config: Map<String, Value>,
}

impl TargetConnectionSection {
    /// Flatten `config` into the connector's key/value mapping
    pub fn settings(&self) -> Result<HashMap<String, String>> {
        self.config
            .iter()
            .map(|(key, value)| {
                let value = match value {
                    Value::String(s) => s.clone(),
                    Value::Number(n) => n.to_string(),
                    Value::Bool(b) => b.to_string(),
                    other => {
                        return Err(FactoryError::MalformedConfig(format!(
                            "connector setting '{}' must be a string, number or boolean, got {}",
                            key, other
                        )))
                    }
                };
                Ok((key.clone(), value))
            })
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct ConfigDocument {
    path: Option<PathBuf>,
    root: Map<String, Value>,
}

impl ConfigDocument {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(FactoryError::NotFound(path.to_path_buf()));
        }
        let text = std::fs::read_to_string(path).map_err(|source| FactoryError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        log::debug!("Loaded configuration from {}", path.display());

        let mut document = Self::parse(&text)?;
        document.path = Some(path.to_path_buf());
        Ok(document)
    }

    pub fn parse(text: &str) -> Result<Self> {
        match serde_json::from_str(text) {
            Ok(Value::Object(root)) => Ok(Self { path: None, root }),
            Ok(_) => Err(FactoryError::MalformedConfig(
                "the document root must be an object".to_string(),
            )),
            Err(e) => Err(FactoryError::MalformedConfig(e.to_string())),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// `None` when the document has no remote control section
    pub fn remote_control(&self) -> Result<Option<RemoteControlSection>> {
        self.section(REMOTE_CONTROL_SECTION)
    }

    pub fn target_connection(&self) -> Result<TargetConnectionSection> {
        self.section(TARGET_CONNECTION_SECTION)?
            .ok_or(FactoryError::MissingSection(TARGET_CONNECTION_SECTION))
    }

    fn section<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>> {
        match self.root.get(name) {
            None => Ok(None),
            Some(value) => T::deserialize(value)
                .map(Some)
                .map_err(|e| FactoryError::MalformedConfig(format!("section '{}': {}", name, e))),
        }
    }
}
