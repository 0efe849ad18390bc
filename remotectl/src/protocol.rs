/// Remote control protocol
/// 
/// Sending is synchronous with the caller; completion reports arrive on a
/// background reader task and are routed to the waiting
/// [`RemoteExecutionInfo`]. Each request carries its registration id; a
/// report echoing that id is matched exactly, one without it is matched by
/// program name. The protocol performs no retries.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::codec::{ExecRequest, ExecStatusEvent, Message};
use crate::command::RemoteExecCommand;
use crate::execution::{RemoteExecutionInfo, WaitOutcome};
use crate::{RemoteError, Result};

type BoxWriter = Box<dyn AsyncWrite + Unpin + Send>;

struct PendingExecution {
    registration: u64,
    sender: oneshot::Sender<ExecStatusEvent>,
}

/// Routes status reports to the records waiting for them
#[derive(Default)]
struct Correlation {
    pending: HashMap<String, PendingExecution>,
    /// Registrations per name that timed out; their reports may still come
    abandoned: HashMap<String, Vec<u64>>,
}

impl Correlation {
    fn register(&mut self, name: &str, registration: u64, sender: oneshot::Sender<ExecStatusEvent>) {
        let previous = self
            .pending
            .insert(name.to_string(), PendingExecution { registration, sender });
        if previous.is_some() {
            log::warn!("Remote execution '{}' is already outstanding, replacing it", name);
        }
    }

    /// Drop the entry of `registration` unless a newer one replaced it.
    /// An abandoned entry still expects a late report.
    fn forget(&mut self, name: &str, registration: u64, abandoned: bool) {
        if self.pending.get(name).map_or(false, |p| p.registration == registration) {
            self.pending.remove(name);
        }
        if abandoned {
            self.abandoned.entry(name.to_string()).or_default().push(registration);
        }
    }

    /// The waiter `event` completes, if any
    fn route(&mut self, event: &ExecStatusEvent) -> Option<oneshot::Sender<ExecStatusEvent>> {
        match event.id {
            Some(id) => {
                if self.pending.get(&event.name).map_or(false, |p| p.registration == id) {
                    return self.pending.remove(&event.name).map(|p| p.sender);
                }
                if self.take_abandoned(&event.name, Some(id)) {
                    log::debug!("Late report for timed out remote execution '{}' #{}, ignoring", event.name, id);
                } else {
                    log::warn!("No pending remote execution '{}' #{}, ignoring status", event.name, id);
                }
                None
            }
            None => {
                // Without an id the oldest timed out run of that name is
                // assumed to be the one reporting
                if self.take_abandoned(&event.name, None) {
                    log::debug!("Late report for timed out remote execution '{}', ignoring", event.name);
                    return None;
                }
                let waiter = self.pending.remove(&event.name).map(|p| p.sender);
                if waiter.is_none() {
                    log::warn!("No pending remote execution named '{}', ignoring status", event.name);
                }
                waiter
            }
        }
    }

    fn take_abandoned(&mut self, name: &str, id: Option<u64>) -> bool {
        let Some(registrations) = self.abandoned.get_mut(name) else {
            return false;
        };
        let position = match id {
            Some(id) => registrations.iter().position(|&r| r == id),
            None => Some(0),
        };
        let Some(position) = position else {
            return false;
        };
        registrations.remove(position);
        if registrations.is_empty() {
            self.abandoned.remove(name);
        }
        true
    }

    fn clear(&mut self) {
        self.pending.clear();
        self.abandoned.clear();
    }
}

type SharedCorrelation = Arc<Mutex<Correlation>>;
type Subscribers = Arc<Mutex<Vec<mpsc::UnboundedSender<ExecStatusEvent>>>>;

/// Connection to a remote agent
pub struct RemoteControlProtocol {
    writer: tokio::sync::Mutex<BoxWriter>,
    correlation: SharedCorrelation,
    subscribers: Subscribers,
    registration_counter: AtomicU64,
    is_connected: Arc<AtomicBool>,
    reader: JoinHandle<()>,
}

impl std::fmt::Debug for RemoteControlProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteControlProtocol").finish_non_exhaustive()
    }
}

impl RemoteControlProtocol {
    /// Connect to the agent listening on `host:port`
    pub async fn connect(host: &str, port: u16) -> Result<Self> {
        let addr = format!("{}:{}", host, port);
        log::debug!("Connecting to remote agent at {}", addr);
        
        let stream = TcpStream::connect((host, port))
            .await
            .map_err(|source| RemoteError::Connect { addr: addr.clone(), source })?;
        stream.set_nodelay(true)?;
        
        log::info!("Connected to remote agent at {}", addr);
        Ok(Self::from_stream(stream))
    }
    
    /// Run the protocol over an already established byte stream
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read, write) = tokio::io::split(stream);
        let correlation = SharedCorrelation::default();
        let subscribers: Subscribers = Arc::new(Mutex::new(Vec::new()));
        let is_connected = Arc::new(AtomicBool::new(true));
        
        let reader = Self::start_reader(read, correlation.clone(), subscribers.clone(), is_connected.clone());
        
        Self {
            writer: tokio::sync::Mutex::new(Box::new(write)),
            correlation,
            subscribers,
            registration_counter: AtomicU64::new(1),
            is_connected,
            reader,
        }
    }
    
    pub fn is_connected(&self) -> bool {
        self.is_connected.load(Ordering::SeqCst)
    }
    
    /// Receive every status report from now on
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<ExecStatusEvent> {
        let (sender, receiver) = mpsc::unbounded_channel();
        lock(&self.subscribers).push(sender);
        receiver
    }
    
    /// Ask the agent to run `command` without tracking it. The protocol never
    /// answers directly; completion is reported through the status stream.
    pub async fn send_command(&self, command: &RemoteExecCommand) -> Result<()> {
        self.send(ExecRequest::new(command, None)).await
    }
    
    async fn send(&self, request: ExecRequest) -> Result<()> {
        if !self.is_connected() {
            return Err(RemoteError::ConnectionLost);
        }
        
        let line = Message::Exec(request).encode()?;
        log::debug!("REMOTE SEND: {}", line.trim_end());
        
        let mut writer = self.writer.lock().await;
        let lost = |e: std::io::Error| match e.kind() {
            std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted => RemoteError::ConnectionLost,
            _ => RemoteError::Io(e),
        };
        writer.write_all(line.as_bytes()).await.map_err(lost)?;
        writer.flush().await.map_err(lost)
    }
    
    /// Register a correlation record for `command` without sending it
    pub fn register(&self, command: Arc<RemoteExecCommand>) -> RemoteExecutionInfo {
        let registration = self.registration_counter.fetch_add(1, Ordering::SeqCst);
        let (sender, receiver) = oneshot::channel();
        lock(&self.correlation).register(&command.name, registration, sender);
        RemoteExecutionInfo::new(command, registration, receiver)
    }
    
    /// Register `command` and send it, tagged with its registration id
    pub async fn execute(&self, command: Arc<RemoteExecCommand>) -> Result<RemoteExecutionInfo> {
        let info = self.register(command.clone());
        if let Err(e) = self.send(ExecRequest::new(&command, Some(info.registration))).await {
            lock(&self.correlation).forget(&command.name, info.registration, false);
            return Err(e);
        }
        Ok(info)
    }
    
    /// Block until the status report for `info` arrives or `timeout` elapses.
    ///
    /// A timed out record is abandoned: its report, should it arrive later,
    /// is dropped and never completes another record of the same name.
    pub async fn wait_for_completion(
        &self,
        info: &mut RemoteExecutionInfo,
        timeout: Duration,
    ) -> Result<WaitOutcome> {
        let Some(completion) = info.completion.take() else {
            return Ok(info.outcome());
        };
        
        match tokio::time::timeout(timeout, completion).await {
            Ok(Ok(event)) => {
                info.complete(&event);
                log::debug!(
                    "Remote execution '{}' finished: pid={} status={}",
                    event.name, event.pid, event.status
                );
                Ok(info.outcome())
            }
            Ok(Err(_)) => Err(RemoteError::ConnectionLost),
            Err(_) => {
                log::warn!("Remote execution '{}' timed out after {:?}", info.command().name, timeout);
                lock(&self.correlation).forget(&info.command().name, info.registration, true);
                Ok(WaitOutcome::TimedOut)
            }
        }
    }
    
    fn start_reader<R>(read: R, correlation: SharedCorrelation, subscribers: Subscribers, is_connected: Arc<AtomicBool>) -> JoinHandle<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        tokio::spawn(async move {
            log::debug!("Remote reader started");
            let mut reader = BufReader::new(read);
            let mut line = String::new();
            
            loop {
                line.clear();
                match reader.read_line(&mut line).await {
                    Ok(0) => {
                        log::debug!("Remote link: EOF reached");
                        break;
                    }
                    Ok(_) => {
                        let trimmed = line.trim();
                        if trimmed.is_empty() {
                            continue;
                        }
                        log::debug!("REMOTE RECV: {}", trimmed);
                        match Message::decode(trimmed) {
                            Ok(Message::ExecStatus(event)) => Self::deliver(event, &correlation, &subscribers),
                            Ok(other) => log::warn!("Unexpected message from remote agent: {:?}", other),
                            Err(e) => log::warn!("REMOTE_PARSE_ERROR: '{}' -> {}", trimmed, e),
                        }
                    }
                    Err(e) => {
                        log::error!("Remote link read error: {}", e);
                        break;
                    }
                }
            }
            
            is_connected.store(false, Ordering::SeqCst);
            // Dropping the senders fails every outstanding wait
            lock(&correlation).clear();
            lock(&subscribers).clear();
            log::debug!("Remote reader finished");
        })
    }
    
    fn deliver(event: ExecStatusEvent, correlation: &SharedCorrelation, subscribers: &Subscribers) {
        let waiter = lock(correlation).route(&event);
        if let Some(waiter) = waiter {
            if waiter.send(event.clone()).is_err() {
                log::debug!("Waiter for remote execution went away");
            }
        }
        
        lock(subscribers).retain(|subscriber| subscriber.send(event.clone()).is_ok());
    }
}

impl Drop for RemoteControlProtocol {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines, ReadHalf};
    use tokio_test::{assert_err, assert_ok};

    fn job() -> Arc<RemoteExecCommand> {
        Arc::new(RemoteExecCommand::new("job", "/bin/true", vec![], vec![]))
    }

    fn connected() -> (RemoteControlProtocol, DuplexStream) {
        let (ours, agent) = tokio::io::duplex(4096);
        (RemoteControlProtocol::from_stream(ours), agent)
    }

    async fn send_event<W: AsyncWrite + Unpin>(agent: &mut W, event: ExecStatusEvent) {
        let line = Message::ExecStatus(event).encode().unwrap();
        agent.write_all(line.as_bytes()).await.unwrap();
    }

    async fn report(agent: &mut DuplexStream, name: &str, pid: u32, status: i32) {
        send_event(agent, ExecStatusEvent::new(name, pid, status)).await;
    }

    async fn next_request(requests: &mut Lines<BufReader<ReadHalf<DuplexStream>>>) -> ExecRequest {
        let line = requests.next_line().await.unwrap().unwrap();
        match Message::decode(&line).unwrap() {
            Message::Exec(request) => request,
            other => panic!("Expected exec request, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_success_report_completes_wait() {
        let (protocol, agent) = connected();
        let (agent_read, mut agent_write) = tokio::io::split(agent);

        let mut info = assert_ok!(protocol.execute(job()).await);

        let mut requests = BufReader::new(agent_read).lines();
        let request = next_request(&mut requests).await;
        assert_eq!(request.command(), *job());
        assert!(request.id.is_some());

        send_event(&mut agent_write, ExecStatusEvent::new("job", 1234, 0).with_id(request.id)).await;

        let outcome = assert_ok!(protocol.wait_for_completion(&mut info, Duration::from_secs(5)).await);
        assert_eq!(outcome, WaitOutcome::Success);
        assert_eq!(info.pid(), Some(1234));
    }

    #[tokio::test]
    async fn test_untracked_send_carries_no_id() {
        let (protocol, agent) = connected();
        let (agent_read, _agent_write) = tokio::io::split(agent);

        assert_ok!(protocol.send_command(&job()).await);
        let mut requests = BufReader::new(agent_read).lines();
        assert_eq!(next_request(&mut requests).await.id, None);
    }

    #[tokio::test]
    async fn test_nonzero_status_is_error() {
        let (protocol, mut agent) = connected();
        let mut info = protocol.register(job());
        report(&mut agent, "job", 99, 7).await;
        let outcome = assert_ok!(protocol.wait_for_completion(&mut info, Duration::from_secs(5)).await);
        assert_eq!(outcome, WaitOutcome::Error(7));
        assert_eq!(info.error_code(), 7);
    }

    #[tokio::test]
    async fn test_other_names_do_not_complete() {
        let (protocol, mut agent) = connected();
        let mut info = protocol.register(job());
        report(&mut agent, "setup", 5, 0).await;
        let outcome = assert_ok!(protocol.wait_for_completion(&mut info, Duration::from_millis(100)).await);
        assert_eq!(outcome, WaitOutcome::TimedOut);
    }

    #[tokio::test]
    async fn test_late_report_after_timeout_is_harmless() {
        let (protocol, mut agent) = connected();
        let mut events = protocol.subscribe();

        let mut first = protocol.register(job());
        let outcome = assert_ok!(protocol.wait_for_completion(&mut first, Duration::from_millis(20)).await);
        assert_eq!(outcome, WaitOutcome::TimedOut);

        // Arrives for the abandoned record
        report(&mut agent, "job", 1, 1).await;
        assert_eq!(events.recv().await.unwrap().pid, 1);
        assert_eq!(first.outcome(), WaitOutcome::TimedOut);

        let mut second = protocol.register(job());
        report(&mut agent, "job", 2, 0).await;
        let outcome = assert_ok!(protocol.wait_for_completion(&mut second, Duration::from_secs(5)).await);
        assert_eq!(outcome, WaitOutcome::Success);
        assert_eq!(second.pid(), Some(2));
    }

    #[tokio::test]
    async fn test_late_report_does_not_complete_newer_record() {
        let (protocol, mut agent) = connected();
        let mut events = protocol.subscribe();

        let mut first = protocol.register(job());
        let outcome = assert_ok!(protocol.wait_for_completion(&mut first, Duration::from_millis(20)).await);
        assert_eq!(outcome, WaitOutcome::TimedOut);

        // The next run registers before the first one's report shows up
        let mut second = protocol.register(job());
        report(&mut agent, "job", 1, 1).await;
        assert_eq!(events.recv().await.unwrap().pid, 1);

        report(&mut agent, "job", 2, 0).await;
        let outcome = assert_ok!(protocol.wait_for_completion(&mut second, Duration::from_secs(5)).await);
        assert_eq!(outcome, WaitOutcome::Success);
        assert_eq!(second.pid(), Some(2));
    }

    #[tokio::test]
    async fn test_reports_are_matched_by_request_id() {
        let (protocol, agent) = connected();
        let (agent_read, mut agent_write) = tokio::io::split(agent);
        let mut requests = BufReader::new(agent_read).lines();

        let mut first = assert_ok!(protocol.execute(job()).await);
        let first_id = next_request(&mut requests).await.id;
        let outcome = assert_ok!(protocol.wait_for_completion(&mut first, Duration::from_millis(20)).await);
        assert_eq!(outcome, WaitOutcome::TimedOut);

        let mut second = assert_ok!(protocol.execute(job()).await);
        let second_id = next_request(&mut requests).await.id;
        assert_ne!(first_id, second_id);

        // Reports may come in any order, the ids tell them apart
        send_event(&mut agent_write, ExecStatusEvent::new("job", 1, 1).with_id(first_id)).await;
        send_event(&mut agent_write, ExecStatusEvent::new("job", 2, 0).with_id(second_id)).await;

        let outcome = assert_ok!(protocol.wait_for_completion(&mut second, Duration::from_secs(5)).await);
        assert_eq!(outcome, WaitOutcome::Success);
        assert_eq!(second.pid(), Some(2));
    }

    #[tokio::test]
    async fn test_connection_loss_fails_outstanding_waits() {
        let (protocol, agent) = connected();
        let mut info = protocol.register(job());
        drop(agent);
        let outcome = protocol.wait_for_completion(&mut info, Duration::from_secs(5)).await;
        assert!(matches!(outcome, Err(RemoteError::ConnectionLost)));
        assert!(!protocol.is_connected());
        let error = assert_err!(protocol.send_command(&job()).await);
        assert!(matches!(error, RemoteError::ConnectionLost));
    }
}
