#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;

use fuzzfactory::{ConfigDocument, FuzzFactory};
use remotectl::{ExecStatusEvent, Message, RemoteExecCommand};
use targetconn::{
    ConnectorRegistry, GdbStackFrameInfo, SharedSymbolTable, StackFrameInfo, SymbolTable, TargetConnector,
    TargetError,
};

/// What the mock connector went through
#[derive(Debug, Default)]
pub struct MockState {
    pub created: usize,
    pub settings: HashMap<String, String>,
    pub connected: bool,
    pub connects: usize,
    pub closes: usize,
    pub saved_logs: Vec<PathBuf>,
}

pub type SharedMockState = Arc<Mutex<MockState>>;

pub struct MockConnector {
    state: SharedMockState,
    symbols: SharedSymbolTable,
    fail_connect: bool,
}

#[async_trait]
impl TargetConnector for MockConnector {
    fn setup(&mut self, config: &HashMap<String, String>) -> targetconn::Result<()> {
        self.state.lock().unwrap().settings = config.clone();
        Ok(())
    }

    async fn connect(&mut self) -> targetconn::Result<()> {
        let mut state = self.state.lock().unwrap();
        state.connects += 1;
        if self.fail_connect {
            return Err(TargetError::ConnectionLost);
        }
        state.connected = true;
        Ok(())
    }

    async fn close(&mut self) -> targetconn::Result<()> {
        let mut state = self.state.lock().unwrap();
        state.closes += 1;
        state.connected = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.state.lock().unwrap().connected
    }

    fn symbol_table(&self) -> SharedSymbolTable {
        self.symbols.clone()
    }

    async fn current_frame(&mut self) -> targetconn::Result<Box<dyn StackFrameInfo>> {
        Ok(Box::new(GdbStackFrameInfo::new(0, 0x7fff_0000)))
    }

    async fn save_execution_log(&mut self, path: &Path) -> targetconn::Result<()> {
        self.state.lock().unwrap().saved_logs.push(path.to_path_buf());
        Ok(())
    }
}

/// A registry whose "mock" connector reports into the returned state
pub fn mock_registry(fail_connect: bool) -> (ConnectorRegistry, SharedMockState) {
    let state = SharedMockState::default();
    let mut registry = ConnectorRegistry::new();
    let shared = state.clone();
    registry.register("mock", move || {
        shared.lock().unwrap().created += 1;
        Box::new(MockConnector {
            state: shared.clone(),
            symbols: SymbolTable::shared(),
            fail_connect,
        })
    });
    (registry, state)
}

pub fn factory(config: &str, registry: ConnectorRegistry) -> FuzzFactory {
    FuzzFactory::from_document(ConfigDocument::parse(config).unwrap()).with_registry(registry)
}

pub type Received = Arc<Mutex<Vec<RemoteExecCommand>>>;

/// A remote agent on an ephemeral port.
///
/// Every exec request is recorded; `respond` gives the status to report
/// for it, or `None` to stay silent.
pub async fn spawn_agent<F>(respond: F) -> (u16, Received)
where
    F: Fn(&RemoteExecCommand) -> Option<i32> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let received = Received::default();
    let log = received.clone();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let (read, mut write) = stream.into_split();
        let mut lines = BufReader::new(read).lines();
        let mut pid = 100;

        while let Ok(Some(line)) = lines.next_line().await {
            let Ok(Message::Exec(request)) = Message::decode(&line) else {
                continue;
            };
            let command = request.command();
            log.lock().unwrap().push(command.clone());
            if let Some(status) = respond(&command) {
                pid += 1;
                let report = Message::ExecStatus(ExecStatusEvent::new(command.name.clone(), pid, status).with_id(request.id))
                    .encode()
                    .unwrap();
                if write.write_all(report.as_bytes()).await.is_err() {
                    break;
                }
            }
        }
    });

    (port, received)
}

pub fn names(received: &Received) -> Vec<String> {
    received.lock().unwrap().iter().map(|c| c.name.clone()).collect()
}
