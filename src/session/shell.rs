//! The interactive device session and its state machine.

use std::time::Duration;

use indexmap::IndexMap;
use log::{debug, error, info, warn};
use tokio::time::Instant;

use super::buffer::OutputBuffer;
use super::completion::{CommandClass, CompletionPredicate, settle_delay};
use crate::credential::DeviceCredential;
use crate::error::{Error, Result, SessionError, TransportError};
use crate::transport::{Connector, ShellStream};

/// Connect attempts before giving up. Authentication failures short-circuit
/// this ceiling.
const CONNECT_ATTEMPTS: u32 = 3;

/// Wait for the first prompt after the shell channel opens.
const INITIAL_PROMPT_TIMEOUT: Duration = Duration::from_secs(5);

/// Pause between mode-switch command and the newline nudge that forces the
/// device to redraw its prompt.
const MODE_SWITCH_PAUSE: Duration = Duration::from_secs(2);

/// Granularity of all read polling.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Short poll used when draining stale output before a command.
const DRAIN_POLL: Duration = Duration::from_millis(50);

/// Consecutive empty polls before a command is declared finished without a
/// prompt (~3 seconds at `POLL_INTERVAL`).
const MAX_SILENT_POLLS: u32 = 30;

/// Output substituted when a command produced nothing at all.
const NO_RESPONSE: &str = "no response";

/// Session lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    /// Authenticated, shell open, prompt observed. Only Ready sessions may
    /// be pooled.
    Ready,
    Executing,
    /// Equivalent to Disconnected for pooling purposes; must reconnect.
    Failed,
}

/// An interactive shell session to one device.
///
/// Exclusively owned by at most one task at a time. Commands are executed
/// strictly in submission order; completion is inferred from prompt
/// characters via the session's [`CompletionPredicate`].
pub struct Session {
    credential: DeviceCredential,
    stream: Option<Box<dyn ShellStream>>,
    state: SessionState,
    buffer: OutputBuffer,
    predicate: CompletionPredicate,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("credential", &self.credential)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Connect to a device: up to 3 attempts, each opening the transport,
    /// authenticating, opening a terminal channel, and waiting for the
    /// initial prompt. Authentication failure is fatal immediately.
    pub async fn connect(connector: &dyn Connector, credential: DeviceCredential) -> Result<Self> {
        let mut last_error: Option<Error> = None;

        for attempt in 1..=CONNECT_ATTEMPTS {
            debug!(
                "connecting to {} (attempt {attempt}/{CONNECT_ATTEMPTS})",
                credential.ip
            );

            match connector.connect(&credential).await {
                Ok(stream) => {
                    let mut session = Session {
                        credential: credential.clone(),
                        stream: Some(stream),
                        state: SessionState::Connecting,
                        buffer: OutputBuffer::default(),
                        predicate: CompletionPredicate::default(),
                    };

                    match session.await_prompt(INITIAL_PROMPT_TIMEOUT).await {
                        Ok(()) => {
                            session.buffer.clear();
                            session.state = SessionState::Ready;
                            info!("connected to {}", credential.ip);
                            return Ok(session);
                        }
                        Err(e) => {
                            warn!("no prompt from {} after connect: {e}", credential.ip);
                            session.close().await;
                            last_error = Some(e);
                        }
                    }
                }
                Err(Error::Transport(TransportError::AuthenticationFailed { user })) => {
                    error!("authentication failed for {}@{}", user, credential.ip);
                    return Err(TransportError::AuthenticationFailed { user }.into());
                }
                Err(e) => {
                    warn!("connect to {} failed: {e}", credential.ip);
                    last_error = Some(e);
                }
            }
        }

        Err(SessionError::ConnectFailed {
            host: credential.ip.clone(),
            attempts: CONNECT_ATTEMPTS,
            reason: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown".to_string()),
        }
        .into())
    }

    /// Wrap an already-open stream. Used by [`Session::connect`] internally
    /// and by callers that negotiate their own transport.
    pub fn from_stream(credential: DeviceCredential, stream: Box<dyn ShellStream>) -> Self {
        Session {
            credential,
            stream: Some(stream),
            state: SessionState::Connecting,
            buffer: OutputBuffer::default(),
            predicate: CompletionPredicate::default(),
        }
    }

    /// Replace the completion strategy, for device dialects with different
    /// prompt or confirmation conventions.
    pub fn set_completion_predicate(&mut self, predicate: CompletionPredicate) {
        self.predicate = predicate;
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn credential(&self) -> &DeviceCredential {
        &self.credential
    }

    pub fn ip(&self) -> &str {
        &self.credential.ip
    }

    /// Read until a prompt character shows up, answering confirmation
    /// questions with `Y` along the way.
    async fn await_prompt(&mut self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;

        loop {
            if Instant::now() >= deadline {
                return Err(SessionError::PromptTimeout(timeout).into());
            }

            let stream = self.stream.as_mut().ok_or(SessionError::NotReady)?;
            let Some(chunk) = stream.recv(POLL_INTERVAL).await? else {
                continue;
            };
            self.buffer.extend(&chunk);

            // Confirmation first: "[Y/N]" contains a prompt character.
            if self.predicate.needs_confirmation(&chunk) {
                debug!(
                    "confirmation prompt from {}, answering 'Y'",
                    self.credential.ip
                );
                stream.send(b"Y\n").await?;
                continue;
            }
            if self.predicate.prompt_seen(self.buffer.tail()) {
                return Ok(());
            }
        }
    }

    /// Liveness check for pooled sessions: send a bare newline and expect a
    /// prompt back within `timeout`. A failed probe moves the session to
    /// `Failed`.
    pub async fn probe(&mut self, timeout: Duration) -> bool {
        if self.state != SessionState::Ready {
            return false;
        }
        let Some(stream) = self.stream.as_mut() else {
            return false;
        };
        if stream.send(b"\n").await.is_err() {
            self.state = SessionState::Failed;
            return false;
        }
        match self.await_prompt(timeout).await {
            Ok(()) => {
                self.buffer.clear();
                true
            }
            Err(_) => {
                self.state = SessionState::Failed;
                false
            }
        }
    }

    /// Execute one command and return its raw output text.
    ///
    /// Device-reported errors in the output are not errors here; failure
    /// classification happens at the batch level for connection problems
    /// only. An `Err` from this method means the session itself broke.
    pub async fn execute(&mut self, command: &str) -> Result<String> {
        self.execute_with_wait(command, None).await
    }

    /// Execute one command with an explicit completion-wait budget.
    ///
    /// Precedence for the wait: explicit argument, then the credential's
    /// per-command override, then the command-class default.
    pub async fn execute_with_wait(
        &mut self,
        command: &str,
        wait: Option<Duration>,
    ) -> Result<String> {
        if self.state != SessionState::Ready {
            return Err(SessionError::NotReady.into());
        }
        let command = command.trim();
        if command.is_empty() {
            return Err(SessionError::EmptyCommand.into());
        }

        self.state = SessionState::Executing;
        let outcome = self.execute_inner(command, wait).await;
        self.state = match outcome {
            Ok(_) => SessionState::Ready,
            Err(_) => SessionState::Failed,
        };
        outcome
    }

    async fn execute_inner(&mut self, command: &str, wait: Option<Duration>) -> Result<String> {
        self.drain_stale().await?;

        let class = CommandClass::classify(command);
        debug!("executing '{}' on {}", command, self.credential.ip);

        {
            let stream = self.stream.as_mut().ok_or(SessionError::NotReady)?;
            stream.send(format!("{command}\n").as_bytes()).await?;

            if class == CommandClass::ModeEnter {
                // The view switch redraws nothing on its own; nudge the
                // device into showing its new prompt.
                tokio::time::sleep(MODE_SWITCH_PAUSE).await;
                stream.send(b"\n").await?;
            }
        }

        let wait = wait
            .or(self.credential.timeout)
            .unwrap_or_else(|| class.wait_budget());

        let deadline = Instant::now() + wait;
        let mut silent_polls: u32 = 0;

        while Instant::now() < deadline {
            let stream = self.stream.as_mut().ok_or(SessionError::NotReady)?;
            match stream.recv(POLL_INTERVAL).await? {
                Some(chunk) => {
                    silent_polls = 0;
                    self.buffer.extend(&chunk);

                    if self.predicate.needs_confirmation(&chunk) {
                        info!(
                            "confirmation prompt during '{}' on {}, answering 'Y'",
                            command, self.credential.ip
                        );
                        stream.send(b"Y\n").await?;
                        continue;
                    }
                    if self.predicate.prompt_seen(&chunk) {
                        break;
                    }
                }
                None => {
                    silent_polls += 1;
                    if silent_polls >= MAX_SILENT_POLLS {
                        break;
                    }
                }
            }
        }

        let output = self.buffer.take_string().trim().to_string();
        if output.is_empty() {
            warn!(
                "command '{}' on {} produced no output",
                command, self.credential.ip
            );
            return Ok(NO_RESPONSE.to_string());
        }
        Ok(output)
    }

    /// Execute commands strictly in order, returning an insertion-ordered
    /// mapping of command to output.
    ///
    /// Tracks whether the device has entered privileged mode and stretches
    /// the settle delay between commands accordingly.
    pub async fn execute_many(
        &mut self,
        commands: &[String],
    ) -> Result<IndexMap<String, String>> {
        let mut results = IndexMap::with_capacity(commands.len());
        let mut in_privileged_mode = false;

        for raw in commands {
            let command = raw.trim();
            if command.is_empty() {
                continue;
            }

            match CommandClass::classify(command) {
                CommandClass::ModeEnter => in_privileged_mode = true,
                CommandClass::ModeExit if in_privileged_mode => in_privileged_mode = false,
                _ => {}
            }

            let output = self.execute(command).await?;

            let lower = output.to_ascii_lowercase();
            if ["error", "failed", "invalid", NO_RESPONSE]
                .iter()
                .any(|k| lower.contains(k))
            {
                warn!(
                    "command '{}' on {} may have failed: {}",
                    command, self.credential.ip, output
                );
            }

            results.insert(command.to_string(), output);

            tokio::time::sleep(settle_delay(command, in_privileged_mode)).await;
        }

        Ok(results)
    }

    /// Consume leftover output from a previous command so it is not
    /// attributed to the next one.
    async fn drain_stale(&mut self) -> Result<()> {
        let stream = self.stream.as_mut().ok_or(SessionError::NotReady)?;
        while let Some(chunk) = stream.recv(DRAIN_POLL).await? {
            let _ = chunk;
        }
        self.buffer.clear();
        Ok(())
    }

    /// Close the shell channel and transport, swallowing close-time errors.
    /// Idempotent.
    pub async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.close().await {
                debug!("error closing session to {}: {e}", self.credential.ip);
            }
            info!("closed connection to {}", self.credential.ip);
        }
        self.state = SessionState::Disconnected;
    }
}
