/// GDB target connector
/// 
/// Launches GDB, loads the target, optionally selects a remote target and
/// resolves the function symbols once connected. With `record` set, process
/// recording starts on the selected target so execution logs can be saved.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use crate::commands::{quote, GdbCommand};
use crate::connector::TargetConnector;
use crate::engine::DebuggerEngine;
use crate::frame::StackFrameInfo;
use crate::registers::GdbRegisterResolver;
use crate::symbols::{SharedSymbolTable, SymbolTable};
use crate::{Result, TargetError};

#[derive(Debug, Clone, PartialEq)]
pub struct GdbSettings {
    pub gdb_exec: String,
    pub gdb_args: Vec<String>,
    pub file: Option<String>,
    pub target: Option<String>,
    pub command_timeout: Option<Duration>,
    pub arch: GdbRegisterResolver,
    /// Start `record full` once the target is selected
    pub record: bool,
}

impl Default for GdbSettings {
    fn default() -> Self {
        Self {
            gdb_exec: "gdb".to_string(),
            gdb_args: Vec::new(),
            file: None,
            target: None,
            command_timeout: None,
            arch: GdbRegisterResolver::X86_64,
            record: false,
        }
    }
}

impl GdbSettings {
    pub fn from_config(config: &HashMap<String, String>) -> Result<Self> {
        let mut settings = Self::default();
        
        for (key, value) in config {
            match key.as_str() {
                "gdb_exec" => settings.gdb_exec = value.clone(),
                "gdb_args" => settings.gdb_args = value.split_whitespace().map(str::to_string).collect(),
                "file" => settings.file = Some(value.clone()),
                "target" => settings.target = Some(value.clone()),
                "command_timeout_ms" => {
                    let millis = value.parse::<u64>().map_err(|e| TargetError::InvalidConfig {
                        key: key.clone(),
                        reason: e.to_string(),
                    })?;
                    settings.command_timeout = Some(Duration::from_millis(millis));
                }
                "arch" => {
                    settings.arch = GdbRegisterResolver::for_arch(value).ok_or_else(|| TargetError::InvalidConfig {
                        key: key.clone(),
                        reason: format!("unsupported architecture '{}'", value),
                    })?;
                }
                "record" => settings.record = parse_flag(key, value)?,
                other => log::debug!("Ignoring unknown GDB connector key '{}'", other),
            }
        }
        
        Ok(settings)
    }
}

fn parse_flag(key: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(TargetError::InvalidConfig {
            key: key.to_string(),
            reason: format!("expected a boolean, got '{}'", value),
        }),
    }
}

pub struct GdbConnector {
    settings: GdbSettings,
    engine: Option<DebuggerEngine>,
    symbols: SharedSymbolTable,
    /// Process recording is active in the live session
    recording: bool,
}

impl Default for GdbConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl GdbConnector {
    pub fn new() -> Self {
        Self {
            settings: GdbSettings::default(),
            engine: None,
            symbols: SymbolTable::shared(),
            recording: false,
        }
    }
    
    pub fn settings(&self) -> &GdbSettings {
        &self.settings
    }
    
    /// Register names of the configured architecture
    pub fn register_resolver(&self) -> GdbRegisterResolver {
        self.settings.arch
    }
    
    /// The engine of the live session
    pub fn engine(&self) -> Option<&DebuggerEngine> {
        self.engine.as_ref()
    }
    
    /// Whether the session records execution
    pub fn is_recording(&self) -> bool {
        self.recording && self.engine.is_some()
    }
    
    /// Run the connect sequence on an already started engine
    pub async fn attach(&mut self, engine: DebuggerEngine) -> Result<()> {
        match self.prepare(&engine).await {
            Ok(recording) => {
                self.recording = recording;
                self.engine = Some(engine);
                Ok(())
            }
            Err(e) => {
                engine.shutdown().await;
                Err(e)
            }
        }
    }
    
    /// Connect sequence, returns whether recording was started
    async fn prepare(&self, engine: &DebuggerEngine) -> Result<bool> {
        GdbCommand::mi(engine, "gdb-set confirm off").execute().await?;
        
        if let Some(file) = &self.settings.file {
            log::debug!("Loading target file {}", file);
            GdbCommand::mi(engine, format!("file-exec-and-symbols {}", quote(file))).execute().await?;
        }
        
        if let Some(target) = &self.settings.target {
            log::debug!("Selecting target {}", target);
            GdbCommand::mi(engine, format!("target-select {}", target)).execute().await?;
        }
        
        // Recording needs a live inferior, which only a selected target provides here
        let recording = match (&self.settings.target, self.settings.record) {
            (Some(_), true) => {
                GdbCommand::console(engine, "record full").execute().await?;
                log::debug!("Process recording started");
                true
            }
            (None, true) => {
                log::warn!("Recording requested without a target, execution logs are disabled");
                false
            }
            (_, false) => false,
        };
        
        self.symbols
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
        GdbCommand::info_functions(engine, self.symbols.clone(), |count| {
            log::info!("Resolved {} function symbols", count);
        })
        .execute()
        .await?;
        
        Ok(recording)
    }
    
    fn live_engine(&self) -> Result<&DebuggerEngine> {
        self.engine.as_ref().ok_or(TargetError::NotConnected)
    }
}

#[async_trait]
impl TargetConnector for GdbConnector {
    fn setup(&mut self, config: &HashMap<String, String>) -> Result<()> {
        self.settings = GdbSettings::from_config(config)?;
        log::debug!("GDB connector settings: {:?}", self.settings);
        Ok(())
    }
    
    async fn connect(&mut self) -> Result<()> {
        if self.engine.is_some() {
            self.close().await?;
        }
        
        let engine = DebuggerEngine::spawn(&self.settings.gdb_exec, &self.settings.gdb_args)?
            .with_timeout(self.settings.command_timeout);
        self.attach(engine).await
    }
    
    async fn close(&mut self) -> Result<()> {
        if let Some(engine) = self.engine.take() {
            if engine.is_running() {
                if let Err(e) = GdbCommand::mi(&engine, "gdb-exit").execute().await {
                    log::warn!("GDB did not exit cleanly: {}", e);
                }
            }
            engine.shutdown().await;
        }
        self.recording = false;
        Ok(())
    }
    
    fn is_connected(&self) -> bool {
        self.engine.as_ref().map_or(false, |engine| engine.is_running())
    }
    
    fn symbol_table(&self) -> SharedSymbolTable {
        self.symbols.clone()
    }
    
    async fn current_frame(&mut self) -> Result<Box<dyn StackFrameInfo>> {
        let frame = GdbCommand::info_frame(self.live_engine()?).execute().await?;
        Ok(Box::new(frame))
    }
    
    async fn save_execution_log(&mut self, path: &Path) -> Result<()> {
        let engine = self.live_engine()?;
        if !self.recording {
            log::info!("Recording is off, not saving an execution log to {}", path.display());
            return Ok(());
        }
        let command = format!("record save {}", path.display());
        GdbCommand::console(engine, &command).execute().await?;
        log::debug!("Execution log written to {}", path.display());
        Ok(())
    }
}
