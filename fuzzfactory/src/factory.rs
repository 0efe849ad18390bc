/// The fuzz factory
/// 
/// Owns the remote control link, the triggered remote programs and the
/// target connector of one fuzzing environment.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use remotectl::{ExecStatusEvent, RemoteControlProtocol, RemoteExecCommand, WaitOutcome};
use targetconn::{ConnectorRegistry, TargetConnector};

use crate::config::ConfigDocument;
use crate::triggers::{TriggerPhase, TriggerRegistry};
use crate::{FactoryError, Result};

pub const DEFAULT_TRIGGER_TIMEOUT: Duration = Duration::from_millis(5000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FactoryPhase {
    /// The document is well-formed, nothing is connected
    Parsed,
    /// Remote link, triggers and target connection are live
    Initialized,
}

pub struct FuzzFactory {
    document: ConfigDocument,
    registry: ConnectorRegistry,
    phase: FactoryPhase,
    remote: Option<RemoteControlProtocol>,
    status_monitor: Option<JoinHandle<()>>,
    triggers: TriggerRegistry,
    trigger_timeout: Duration,
    connector: Option<Box<dyn TargetConnector>>,
}

impl FuzzFactory {
    /// Read the document at `path`. Nothing is connected until [`FuzzFactory::init`].
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::from_document(ConfigDocument::load(path)?))
    }

    pub fn from_document(document: ConfigDocument) -> Self {
        Self {
            document,
            registry: ConnectorRegistry::with_defaults(),
            phase: FactoryPhase::Parsed,
            remote: None,
            status_monitor: None,
            triggers: TriggerRegistry::new(),
            trigger_timeout: DEFAULT_TRIGGER_TIMEOUT,
            connector: None,
        }
    }

    /// Resolve connector identifiers through `registry` instead of the built-in one
    pub fn with_registry(mut self, registry: ConnectorRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn phase(&self) -> FactoryPhase {
        self.phase
    }

    pub fn document(&self) -> &ConfigDocument {
        &self.document
    }

    /// Bring the environment up.
    ///
    /// Connects the remote link and registers the triggers, runs the
    /// Immediate triggers, then builds and connects the target connector.
    /// On failure everything acquired so far is released and the factory
    /// stays Parsed. Calling it again starts over from a clean state.
    pub async fn init(&mut self) -> Result<()> {
        self.teardown().await;

        match self.try_init().await {
            Ok(()) => {
                self.phase = FactoryPhase::Initialized;
                log::info!("Fuzz factory initialized");
                Ok(())
            }
            Err(e) => {
                log::error!("Fuzz factory initialization failed: {}", e);
                self.teardown().await;
                Err(e)
            }
        }
    }

    async fn try_init(&mut self) -> Result<()> {
        self.init_remote_control().await?;
        self.run_immediate().await?;
        self.init_target_connection().await
    }

    async fn init_remote_control(&mut self) -> Result<()> {
        let Some(section) = self.document.remote_control()? else {
            log::info!("No remote control configured, remote triggers disabled");
            return Ok(());
        };

        log::info!("Connecting to remote agent at {}:{}", section.host, section.port);
        let remote = RemoteControlProtocol::connect(&section.host, section.port).await?;
        self.status_monitor = Some(spawn_status_monitor(remote.subscribe()));
        self.remote = Some(remote);
        self.trigger_timeout = Duration::from_millis(section.timeout_ms);

        for entry in &section.exec {
            let phase = entry.phase()?;
            let command = entry.to_command();
            log::debug!("Registered {} trigger '{}' -> {}", phase, command.name, command.path);
            self.triggers.register(phase, command);
        }
        Ok(())
    }

    async fn init_target_connection(&mut self) -> Result<()> {
        let section = self.document.target_connection()?;
        let mut connector = self
            .registry
            .create(&section.connector)
            .ok_or_else(|| FactoryError::UnresolvedConnector(section.connector.clone()))?;

        log::info!("Setting up target connector '{}'", section.connector);
        connector.setup(&section.settings()?)?;
        // Keep it even if connecting fails, so teardown closes what was started
        let connector = self.connector.insert(connector);
        connector.connect().await?;
        Ok(())
    }

    /// Run the Immediate triggers
    pub async fn run_immediate(&self) -> Result<()> {
        self.run_triggers(TriggerPhase::Immediate).await
    }

    /// Run the triggers bound to the start of a fuzz run
    pub async fn run_on_start(&self) -> Result<()> {
        self.ensure_initialized()?;
        self.run_triggers(TriggerPhase::OnFuzzStart).await
    }

    /// Run the triggers bound to the end of a fuzz run
    pub async fn run_on_stop(&self) -> Result<()> {
        self.ensure_initialized()?;
        self.run_triggers(TriggerPhase::OnFuzzStop).await
    }

    /// Send each command of `phase` in order and wait for it; the first
    /// failure aborts the rest.
    async fn run_triggers(&self, phase: TriggerPhase) -> Result<()> {
        let commands = self.triggers.commands(phase);
        if commands.is_empty() {
            return Ok(());
        }
        let remote = self.remote.as_ref().ok_or(FactoryError::NotInitialized)?;

        for command in commands {
            self.run_trigger(remote, phase, command).await?;
        }
        Ok(())
    }

    async fn run_trigger(
        &self,
        remote: &RemoteControlProtocol,
        phase: TriggerPhase,
        command: &Arc<RemoteExecCommand>,
    ) -> Result<()> {
        log::info!("{}: running '{}' on the remote target", phase, command.path);
        let mut info = remote.execute(command.clone()).await?;

        match remote.wait_for_completion(&mut info, self.trigger_timeout).await? {
            WaitOutcome::Success => {
                log::debug!("{}: '{}' finished (pid {:?})", phase, command.path, info.pid());
                Ok(())
            }
            WaitOutcome::Error(code) => Err(FactoryError::RemoteExecutionFailed {
                command: command.path.clone(),
                code,
            }),
            WaitOutcome::TimedOut => Err(FactoryError::Timeout {
                command: command.path.clone(),
                timeout: self.trigger_timeout,
            }),
        }
    }

    fn ensure_initialized(&self) -> Result<()> {
        match self.phase {
            FactoryPhase::Initialized => Ok(()),
            FactoryPhase::Parsed => Err(FactoryError::NotInitialized),
        }
    }

    pub fn triggers(&self) -> &TriggerRegistry {
        &self.triggers
    }

    pub fn trigger_timeout(&self) -> Duration {
        self.trigger_timeout
    }

    pub fn remote(&self) -> Option<&RemoteControlProtocol> {
        self.remote.as_ref()
    }

    pub fn connector(&self) -> Option<&dyn TargetConnector> {
        self.connector.as_deref()
    }

    pub fn connector_mut(&mut self) -> Option<&mut (dyn TargetConnector + 'static)> {
        self.connector.as_deref_mut()
    }

    /// Close the target connection and drop the remote link
    pub async fn shutdown(&mut self) -> Result<()> {
        let closed = match self.connector.as_mut() {
            Some(connector) if connector.is_connected() => connector.close().await,
            _ => Ok(()),
        };
        self.teardown().await;
        closed.map_err(FactoryError::from)
    }

    async fn teardown(&mut self) {
        if let Some(mut connector) = self.connector.take() {
            if connector.is_connected() {
                if let Err(e) = connector.close().await {
                    log::warn!("Failed to close target connection: {}", e);
                }
            }
        }
        if let Some(monitor) = self.status_monitor.take() {
            monitor.abort();
        }
        self.remote = None;
        self.triggers.clear();
        self.trigger_timeout = DEFAULT_TRIGGER_TIMEOUT;
        self.phase = FactoryPhase::Parsed;
    }
}

fn spawn_status_monitor(mut events: mpsc::UnboundedReceiver<ExecStatusEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            log::debug!(
                "Remote status: '{}' pid={} status={}",
                event.name, event.pid, event.status
            );
        }
    })
}

impl Drop for FuzzFactory {
    fn drop(&mut self) {
        if let Some(monitor) = self.status_monitor.take() {
            monitor.abort();
        }
    }
}
