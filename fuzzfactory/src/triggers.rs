/// Trigger phases and the registry of triggered remote executions

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use remotectl::RemoteExecCommand;

use crate::FactoryError;

/// When a remote program runs relative to the fuzz-run lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TriggerPhase {
    /// Once, while the factory initializes
    Immediate,
    /// At the beginning of every fuzz run
    OnFuzzStart,
    /// At the end of every fuzz run
    OnFuzzStop,
}

impl TriggerPhase {
    pub const ALL: [TriggerPhase; 3] = [
        TriggerPhase::Immediate,
        TriggerPhase::OnFuzzStart,
        TriggerPhase::OnFuzzStop,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerPhase::Immediate => "Immediate",
            TriggerPhase::OnFuzzStart => "OnFuzzStart",
            TriggerPhase::OnFuzzStop => "OnFuzzStop",
        }
    }
}

impl FromStr for TriggerPhase {
    type Err = FactoryError;

    /// Case-insensitive
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TriggerPhase::ALL
            .into_iter()
            .find(|phase| phase.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| FactoryError::InvalidTrigger(s.to_string()))
    }
}

impl fmt::Display for TriggerPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Remote commands per phase, in execution order
#[derive(Debug, Default)]
pub struct TriggerRegistry {
    triggers: HashMap<TriggerPhase, Vec<Arc<RemoteExecCommand>>>,
}

impl TriggerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, phase: TriggerPhase, command: RemoteExecCommand) {
        self.triggers.entry(phase).or_default().push(Arc::new(command));
    }

    pub fn commands(&self, phase: TriggerPhase) -> &[Arc<RemoteExecCommand>] {
        self.triggers.get(&phase).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.triggers.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&mut self) {
        self.triggers.clear();
    }
}
