/// Command/response engine for the GDB subprocess
/// 
/// This module owns the debugger's input and output streams. It sends one
/// command at a time, routes every output line to the response handler of
/// the command in flight and resolves the caller once that handler is done.
///
/// Concurrent callers queue on an async mutex: a second `submit` blocks until
/// the first one resolved, so two handlers never see each other's output.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::ChildStderr;
use tokio::sync::{mpsc, Mutex};

use crate::handler::{Feed, MiResultHandler, ResponseHandler};
use crate::parser::parse_output_line;
use crate::process::GdbProcess;
use crate::types::{GdbOutput, GdbResult, OutputLine};
use crate::{Result, TargetError};

type BoxWriter = Box<dyn AsyncWrite + Unpin + Send>;

/// Manages communication with one GDB process
pub struct DebuggerEngine {
    io: Mutex<EngineIo>,
    process: Mutex<Option<GdbProcess>>,
    token_counter: AtomicU32,
    is_running: Arc<AtomicBool>,
    timeout: Option<Duration>,
}

struct EngineIo {
    stdin: BoxWriter,
    lines: mpsc::UnboundedReceiver<String>,
    in_flight: Option<InFlight>,
    /// Token of an abandoned command whose output is still arriving
    skip_until: Option<u32>,
}

#[derive(Debug, Clone, Copy)]
struct InFlight {
    token: u32,
    result_seen: bool,
}

impl DebuggerEngine {
    /// Launch GDB and attach an engine to its standard streams
    pub fn spawn(gdb_path: &str, extra_args: &[String]) -> Result<Self> {
        let mut process = GdbProcess::start(gdb_path, extra_args)?;
        let (stdin, stdout, stderr) = process.take_pipes()?;
        
        Self::start_stderr_reader(stderr);
        
        let mut engine = Self::from_io(stdout, stdin);
        engine.process = Mutex::new(Some(process));
        Ok(engine)
    }
    
    /// Build an engine on top of arbitrary debugger output and input streams
    pub fn from_io<R, W>(stdout: R, stdin: W) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (line_sender, lines) = mpsc::unbounded_channel();
        let is_running = Arc::new(AtomicBool::new(true));
        
        Self::start_stdout_reader(stdout, line_sender, is_running.clone());
        
        DebuggerEngine {
            io: Mutex::new(EngineIo {
                stdin: Box::new(stdin),
                lines,
                in_flight: None,
                skip_until: None,
            }),
            process: Mutex::new(None),
            token_counter: AtomicU32::new(1),
            is_running,
            timeout: None,
        }
    }
    
    /// Bound every command by `timeout`; `None` waits indefinitely
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
    
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
    
    /// Check if GDB is still connected
    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }
    
    /// Send `command` and feed its output to `handler` until it resolves
    pub async fn submit<H: ResponseHandler>(&self, command: &str, handler: H) -> Result<H::Output> {
        self.submit_with_timeout(command, handler, self.timeout).await
    }
    
    /// Like [`submit`](Self::submit) with an explicit bound for this command only
    pub async fn submit_with_timeout<H: ResponseHandler>(
        &self,
        command: &str,
        mut handler: H,
        timeout: Option<Duration>,
    ) -> Result<H::Output> {
        let mut io = self.io.lock().await;
        
        if !self.is_running() {
            return Err(TargetError::ConnectionLost);
        }
        
        io.discard_stale();
        
        let token = self.token_counter.fetch_add(1, Ordering::SeqCst);
        let command_line = format!("{}-{}\n", token, command);
        
        log::debug!("SEND[{}]: {}", token, command);
        
        io.in_flight = Some(InFlight { token, result_seen: false });
        
        let outcome = match io.write_line(&command_line).await {
            Err(e) => Err(e),
            Ok(()) => match timeout {
                Some(limit) => tokio::time::timeout(limit, io.dispatch(&mut handler))
                    .await
                    .unwrap_or(Err(TargetError::Timeout(limit))),
                None => io.dispatch(&mut handler).await,
            },
        };
        
        if let Some(flight) = io.in_flight.take() {
            if outcome.is_err() && !flight.result_seen {
                io.skip_until = Some(flight.token);
            }
        }
        
        match &outcome {
            Ok(_) => log::debug!("RECV[{}]: SUCCESS", token),
            Err(e) => log::error!("RECV[{}]: FAILED -> {}", token, e),
        }
        
        outcome
    }
    
    /// Run a plain MI command and return its result record
    pub async fn execute_mi(&self, command: &str) -> Result<GdbResult> {
        self.submit(command, MiResultHandler::new()).await
    }
    
    /// Stop the session and kill GDB if this engine launched it
    pub async fn shutdown(&self) {
        self.is_running.store(false, Ordering::SeqCst);
        
        if let Some(mut process) = self.process.lock().await.take() {
            if let Err(e) = process.kill().await {
                log::warn!("Failed to kill GDB process: {}", e);
            }
        }
    }
    
    /// Start reading from GDB stdout
    fn start_stdout_reader<R>(stdout: R, line_sender: mpsc::UnboundedSender<String>, is_running: Arc<AtomicBool>)
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        tokio::spawn(async move {
            log::debug!("GDB stdout reader started");
            let mut reader = BufReader::new(stdout);
            let mut buf = Vec::new();
            
            while is_running.load(Ordering::SeqCst) {
                buf.clear();
                // The inferior may print anything, so lines are not assumed to be UTF-8
                match reader.read_until(b'\n', &mut buf).await {
                    Ok(0) => {
                        log::debug!("GDB stdout: EOF reached");
                        break;
                    }
                    Ok(_) => {
                        let line = String::from_utf8_lossy(&buf);
                        let trimmed = line.trim_end_matches(['\r', '\n']);
                        if !trimmed.trim().is_empty() {
                            log::debug!("GDB_OUT: {}", trimmed);
                            if line_sender.send(trimmed.to_string()).is_err() {
                                break;
                            }
                        }
                    }
                    Err(e) => {
                        log::error!("GDB stdout read error: {}", e);
                        break;
                    }
                }
            }
            
            is_running.store(false, Ordering::SeqCst);
            log::debug!("GDB stdout reader finished");
        });
    }
    
    /// Start reading from GDB stderr
    fn start_stderr_reader(stderr: ChildStderr) {
        tokio::spawn(async move {
            let mut reader = BufReader::new(stderr);
            let mut buf = Vec::new();
            
            loop {
                buf.clear();
                match reader.read_until(b'\n', &mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {
                        let line = String::from_utf8_lossy(&buf);
                        let trimmed = line.trim();
                        if !trimmed.is_empty() {
                            log::warn!("GDB stderr: {}", trimmed);
                        }
                    }
                }
            }
            log::debug!("GDB stderr reader finished");
        });
    }
}

impl EngineIo {
    async fn write_line(&mut self, command_line: &str) -> Result<()> {
        let lost = |e: std::io::Error| match e.kind() {
            std::io::ErrorKind::BrokenPipe => TargetError::ConnectionLost,
            _ => TargetError::Io(e),
        };
        self.stdin.write_all(command_line.as_bytes()).await.map_err(lost)?;
        self.stdin.flush().await.map_err(lost)
    }
    
    /// Feed output lines to `handler` until it reaches a terminal state
    async fn dispatch<H: ResponseHandler>(&mut self, handler: &mut H) -> Result<H::Output> {
        loop {
            let raw = self.lines.recv().await.ok_or(TargetError::ConnectionLost)?;
            let Some(line) = self.classify(&raw) else {
                continue;
            };
            match handler.feed(&line) {
                Feed::NeedMore => {}
                Feed::Done(output) => return Ok(output),
                Feed::Error(e) => return Err(e),
            }
        }
    }
    
    /// Drop output that arrived while no command was in flight
    fn discard_stale(&mut self) {
        while let Ok(raw) = self.lines.try_recv() {
            if self.classify(&raw).is_some() {
                log::debug!("UNSOLICITED: {}", raw);
            }
        }
    }
    
    /// Parse a raw line and decide whether it may reach the active handler
    fn classify(&mut self, raw: &str) -> Option<OutputLine> {
        let parsed = match parse_output_line(raw) {
            Ok(parsed) => parsed,
            Err(e) => {
                log::warn!("GDB_PARSE_ERROR: '{}' -> {}", raw, e);
                return None;
            }
        };
        
        if let Some(abandoned) = self.skip_until {
            if let OutputLine::Record(GdbOutput::Result(result)) = &parsed {
                if result.token == Some(abandoned) {
                    log::debug!("RECV[{}]: late result of abandoned command", abandoned);
                    self.skip_until = None;
                }
            }
            log::debug!("DISCARD: {}", raw);
            return None;
        }
        
        if let OutputLine::Record(GdbOutput::Result(result)) = &parsed {
            match self.in_flight.as_mut() {
                Some(flight) if result.token == Some(flight.token) => {
                    log::debug!("RECV[{}]: Result -> class={:?}", flight.token, result.class);
                    flight.result_seen = true;
                }
                _ => {
                    log::warn!("RECV[{:?}]: No pending command found for result", result.token);
                    return None;
                }
            }
        }
        
        Some(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ResultClass;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};

    /// Answers every command with the lines `respond` produces for its token
    fn fake_gdb<F>(respond: F) -> DebuggerEngine
    where
        F: Fn(u32, &str) -> Vec<String> + Send + 'static,
    {
        let (engine_side, gdb_side) = tokio::io::duplex(64 * 1024);
        let (engine_read, engine_write) = tokio::io::split(engine_side);
        tokio::spawn(serve(gdb_side, respond));
        DebuggerEngine::from_io(engine_read, engine_write)
    }

    async fn serve<F>(gdb_side: DuplexStream, respond: F)
    where
        F: Fn(u32, &str) -> Vec<String>,
    {
        let (read, mut write) = tokio::io::split(gdb_side);
        let mut lines = BufReader::new(read).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let (token, command) = line.split_once('-').unwrap();
            for out in respond(token.parse().unwrap(), command) {
                write.write_all(format!("{}\n", out).as_bytes()).await.unwrap();
            }
        }
    }

    #[tokio::test]
    async fn test_result_is_routed_to_submitter() {
        let engine = fake_gdb(|token, _| vec![format!("{}^done,value=\"42\"", token), "(gdb) ".into()]);
        let result = engine.execute_mi("data-evaluate-expression 6*7").await.unwrap();
        assert_eq!(result.class, ResultClass::Done);
        assert_eq!(result.field("value"), Some("42"));
    }

    #[tokio::test]
    async fn test_eof_fails_with_connection_lost() {
        let (engine_side, gdb_side) = tokio::io::duplex(1024);
        let (engine_read, engine_write) = tokio::io::split(engine_side);
        let engine = DebuggerEngine::from_io(engine_read, engine_write);
        drop(gdb_side);
        match engine.execute_mi("gdb-version").await {
            Err(TargetError::ConnectionLost) => {}
            other => panic!("Expected ConnectionLost, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_timeout_leaves_engine_usable() {
        // The first command is only answered once the next one arrives
        let pending = std::sync::Mutex::new(None);
        let engine = fake_gdb(move |token, command| {
            if command.starts_with("exec-continue") {
                *pending.lock().unwrap() = Some(token);
                return Vec::new();
            }
            let mut out = Vec::new();
            if let Some(late) = pending.lock().unwrap().take() {
                out.push(format!("{}^running", late));
                out.push("(gdb)".into());
            }
            out.push(format!("{}^done", token));
            out.push("(gdb)".into());
            out
        });
        let slow = engine
            .submit_with_timeout("exec-continue", MiResultHandler::new(), Some(Duration::from_millis(50)))
            .await;
        assert!(matches!(slow, Err(TargetError::Timeout(_))));
        
        let result = tokio_test::assert_ok!(engine.execute_mi("gdb-set confirm off").await);
        assert_eq!(result.class, ResultClass::Done);
    }

    #[tokio::test]
    async fn test_abandoned_output_is_skipped() {
        // The first answer carries a line the handler rejects before its result record
        let engine = fake_gdb(|token, command| {
            if command.starts_with("interpreter-exec") {
                vec![
                    "~\"All defined functions:\\n\"".into(),
                    "~\"this is not a symbol\\n\"".into(),
                    "~\"0x1000  _init\\n\"".into(),
                    format!("{}^done", token),
                    "(gdb)".into(),
                ]
            } else {
                vec![format!("{}^done", token), "(gdb)".into()]
            }
        });
        let symbols = crate::symbols::SymbolTable::shared();
        let failed = crate::commands::GdbCommand::info_functions(&engine, symbols.clone(), |_| {})
            .execute()
            .await;
        assert!(matches!(failed, Err(TargetError::ProtocolError { .. })));
        
        let result = engine.execute_mi("gdb-set confirm off").await.unwrap();
        assert_eq!(result.class, ResultClass::Done);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_submitters_get_their_own_results() {
        // Echo the expression back so every caller can recognise its answer
        let engine = Arc::new(fake_gdb(|token, command| {
            let expression = command.trim_start_matches("data-evaluate-expression ");
            vec![format!("{}^done,value=\"{}\"", token, expression), "(gdb) ".into()]
        }));

        let callers: Vec<_> = (0..20)
            .map(|i| {
                let engine = engine.clone();
                tokio::spawn(async move {
                    let result = engine.execute_mi(&format!("data-evaluate-expression {}", i)).await;
                    (i, result)
                })
            })
            .collect();

        for caller in callers {
            let (i, result) = caller.await.unwrap();
            let result = tokio_test::assert_ok!(result);
            assert_eq!(result.field("value"), Some(i.to_string().as_str()));
        }
    }

    #[tokio::test]
    async fn test_invalid_utf8_output_keeps_reader_alive() {
        let (engine_side, gdb_side) = tokio::io::duplex(1024);
        let (engine_read, engine_write) = tokio::io::split(engine_side);
        let engine = DebuggerEngine::from_io(engine_read, engine_write);

        tokio::spawn(async move {
            let (read, mut write) = tokio::io::split(gdb_side);
            let mut lines = BufReader::new(read).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let (token, _) = line.split_once('-').unwrap();
                // Raw bytes from the inferior sharing the terminal
                write.write_all(b"\xff\xfe garbage \xc3\n").await.unwrap();
                write.write_all(format!("{}^done\n(gdb)\n", token).as_bytes()).await.unwrap();
            }
        });

        for _ in 0..2 {
            let result = tokio_test::assert_ok!(engine.execute_mi("gdb-set confirm off").await);
            assert_eq!(result.class, ResultClass::Done);
        }
        assert!(engine.is_running());
    }
}
