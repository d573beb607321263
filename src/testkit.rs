//! Scripted in-memory transport for tests.
//!
//! `MockConnector` stands in for [`SshConnector`](crate::transport::SshConnector)
//! behind the [`Connector`] seam. Per-device behaviors script how the fake
//! device answers, and the connector counts connect calls and concurrently
//! open streams so tests can assert on handshake reuse and scheduler bounds.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::credential::DeviceCredential;
use crate::error::{Result, TransportError};
use crate::transport::{Connector, ShellStream};

/// How a scripted device responds.
#[derive(Debug, Clone)]
pub(crate) enum MockBehavior {
    /// Answer every write with the same reply. Good enough for a device
    /// shell that echoes a prompt after each command.
    Shell { greeting: String, reply: String },

    /// Answer the n-th write with the n-th reply, then go silent.
    Sequence {
        greeting: String,
        replies: Vec<String>,
    },

    /// Reject the password.
    AuthFailed,

    /// Connection times out.
    Unreachable,
}

impl MockBehavior {
    pub fn shell(greeting: &str, reply: &str) -> Self {
        MockBehavior::Shell {
            greeting: greeting.to_string(),
            reply: reply.to_string(),
        }
    }

    pub fn sequence(greeting: &str, replies: Vec<String>) -> Self {
        MockBehavior::Sequence {
            greeting: greeting.to_string(),
            replies,
        }
    }
}

#[derive(Default)]
struct StreamGauge {
    current: AtomicUsize,
    max: AtomicUsize,
}

impl StreamGauge {
    fn opened(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.max.fetch_max(now, Ordering::SeqCst);
    }

    fn closed(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Scripted replacement for the SSH connector.
pub(crate) struct MockConnector {
    behaviors: Mutex<HashMap<String, MockBehavior>>,
    connect_calls: AtomicUsize,
    gauge: Arc<StreamGauge>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self {
            behaviors: Mutex::new(HashMap::new()),
            connect_calls: AtomicUsize::new(0),
            gauge: Arc::new(StreamGauge::default()),
        }
    }

    /// Script the behavior for one device ip.
    pub fn behave(&self, ip: &str, behavior: MockBehavior) {
        self.behaviors
            .lock()
            .unwrap()
            .insert(ip.to_string(), behavior);
    }

    /// Total successful-or-not connect attempts observed.
    pub fn connect_calls(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }

    /// High-water mark of concurrently open shell streams.
    pub fn max_open_streams(&self) -> usize {
        self.gauge.max.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, credential: &DeviceCredential) -> Result<Box<dyn ShellStream>> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);

        let behavior = self
            .behaviors
            .lock()
            .unwrap()
            .get(&credential.ip)
            .cloned()
            .unwrap_or(MockBehavior::Unreachable);

        match behavior {
            MockBehavior::AuthFailed => Err(TransportError::AuthenticationFailed {
                user: credential.username.clone(),
            }
            .into()),
            MockBehavior::Unreachable => {
                Err(TransportError::Timeout(Duration::from_secs(10)).into())
            }
            MockBehavior::Shell { greeting, reply } => {
                self.gauge.opened();
                Ok(Box::new(ScriptedStream::new(
                    greeting,
                    Script::Repeat(reply),
                    self.gauge.clone(),
                )))
            }
            MockBehavior::Sequence { greeting, replies } => {
                self.gauge.opened();
                Ok(Box::new(ScriptedStream::new(
                    greeting,
                    Script::Ordered(replies.into()),
                    self.gauge.clone(),
                )))
            }
        }
    }
}

enum Script {
    Repeat(String),
    Ordered(VecDeque<String>),
}

/// Fake device shell: queued output chunks, replies driven by writes.
struct ScriptedStream {
    outgoing: VecDeque<Bytes>,
    script: Script,
    closed: bool,
    gauge: Arc<StreamGauge>,
}

impl ScriptedStream {
    fn new(greeting: String, script: Script, gauge: Arc<StreamGauge>) -> Self {
        let mut outgoing = VecDeque::new();
        if !greeting.is_empty() {
            outgoing.push_back(Bytes::from(greeting));
        }
        Self {
            outgoing,
            script,
            closed: false,
            gauge,
        }
    }
}

#[async_trait]
impl ShellStream for ScriptedStream {
    async fn send(&mut self, _data: &[u8]) -> Result<()> {
        if self.closed {
            return Err(TransportError::Disconnected.into());
        }
        match &mut self.script {
            Script::Repeat(reply) => {
                self.outgoing.push_back(Bytes::from(reply.clone()));
            }
            Script::Ordered(replies) => {
                if let Some(reply) = replies.pop_front() {
                    self.outgoing.push_back(Bytes::from(reply));
                }
            }
        }
        Ok(())
    }

    async fn recv(&mut self, poll: Duration) -> Result<Option<Bytes>> {
        if self.closed {
            return Err(TransportError::Disconnected.into());
        }
        if let Some(chunk) = self.outgoing.pop_front() {
            return Ok(Some(chunk));
        }
        tokio::time::sleep(poll).await;
        Ok(None)
    }

    async fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.closed = true;
            self.gauge.closed();
        }
        Ok(())
    }
}

impl Drop for ScriptedStream {
    fn drop(&mut self) {
        if !self.closed {
            self.gauge.closed();
        }
    }
}
