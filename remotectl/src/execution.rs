/// Per-request correlation records

use std::sync::Arc;
use tokio::sync::oneshot;

use crate::codec::ExecStatusEvent;
use crate::command::RemoteExecCommand;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionStatus {
    #[default]
    Pending,
    Success,
    Error,
}

/// Result of waiting for a remote program
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Success,
    Error(i32),
    TimedOut,
}

/// Tracks one in-flight remote execution until its status report arrives
#[derive(Debug)]
pub struct RemoteExecutionInfo {
    command: Arc<RemoteExecCommand>,
    pub(crate) registration: u64,
    status: ExecutionStatus,
    pid: Option<u32>,
    error_code: i32,
    pub(crate) completion: Option<oneshot::Receiver<ExecStatusEvent>>,
}

impl RemoteExecutionInfo {
    pub(crate) fn new(
        command: Arc<RemoteExecCommand>,
        registration: u64,
        completion: oneshot::Receiver<ExecStatusEvent>,
    ) -> Self {
        Self {
            command,
            registration,
            status: ExecutionStatus::Pending,
            pid: None,
            error_code: 0,
            completion: Some(completion),
        }
    }

    pub fn command(&self) -> &RemoteExecCommand {
        &self.command
    }

    pub fn status(&self) -> ExecutionStatus {
        self.status
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn error_code(&self) -> i32 {
        self.error_code
    }

    /// Record the terminal status. Only the first report counts.
    pub(crate) fn complete(&mut self, event: &ExecStatusEvent) {
        if self.status != ExecutionStatus::Pending {
            return;
        }
        self.status = if event.status == 0 {
            ExecutionStatus::Success
        } else {
            ExecutionStatus::Error
        };
        self.error_code = event.status;
        self.pid = Some(event.pid);
    }

    pub fn outcome(&self) -> WaitOutcome {
        match self.status {
            ExecutionStatus::Pending => WaitOutcome::TimedOut,
            ExecutionStatus::Success => WaitOutcome::Success,
            ExecutionStatus::Error => WaitOutcome::Error(self.error_code),
        }
    }
}
