/// The GDB subprocess
/// 
/// Launches GDB in MI mode with all three standard streams piped. The child
/// is killed when its handle is dropped, so an engine going away never
/// leaves a debugger behind.

use std::process::Stdio;
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};

use crate::{Result, TargetError};

/// Arguments every session is started with: quiet, no init files, MI3 interpreter
const BASE_ARGS: [&str; 3] = ["-q", "-nx", "--interpreter=mi3"];

pub struct GdbProcess {
    child: Child,
}

impl GdbProcess {
    pub fn start(gdb_path: &str, extra_args: &[String]) -> Result<Self> {
        log::debug!("Starting GDB process: {} {:?}", gdb_path, extra_args);
        
        let child = Command::new(gdb_path)
            .args(BASE_ARGS)
            .args(extra_args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(TargetError::ProcessStart)?;
            
        log::info!("GDB started (pid {:?})", child.id());
        
        Ok(GdbProcess { child })
    }
    
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }
    
    /// Take the stdin, stdout and stderr handles
    pub fn take_pipes(&mut self) -> Result<(ChildStdin, ChildStdout, ChildStderr)> {
        let missing = |what: &str| {
            TargetError::ProcessStart(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                format!("Failed to get {} handle", what),
            ))
        };
        let stdin = self.child.stdin.take().ok_or_else(|| missing("stdin"))?;
        let stdout = self.child.stdout.take().ok_or_else(|| missing("stdout"))?;
        let stderr = self.child.stderr.take().ok_or_else(|| missing("stderr"))?;
        Ok((stdin, stdout, stderr))
    }
    
    /// Kill GDB unless it already exited, then reap it
    pub async fn kill(&mut self) -> std::io::Result<()> {
        match self.child.try_wait()? {
            Some(status) => log::debug!("GDB already exited: {}", status),
            None => {
                self.child.kill().await?;
                log::debug!("GDB killed");
            }
        }
        Ok(())
    }
}
