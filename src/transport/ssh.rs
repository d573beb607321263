//! SSH transport implementation using russh.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use log::debug;
use russh::client::{self, Handle, Msg};
use russh::keys::PublicKey;
use russh::{Channel, ChannelMsg};

use super::{Connector, ShellStream};
use crate::credential::DeviceCredential;
use crate::error::{Result, TransportError};

/// Terminal type requested for the interactive channel.
const TERMINAL_TYPE: &str = "vt100";

/// Fixed terminal geometry. Wide enough that device tables do not wrap.
const TERMINAL_WIDTH: u32 = 160;
const TERMINAL_HEIGHT: u32 = 48;

/// SSH connector producing interactive shell channels.
#[derive(Debug, Clone)]
pub struct SshConnector {
    /// Timeout for the TCP connect + SSH handshake.
    connect_timeout: Duration,

    /// Transport-level keepalive interval.
    keepalive: Duration,
}

impl SshConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            keepalive: Duration::from_secs(60),
        }
    }

    pub fn keepalive(mut self, keepalive: Duration) -> Self {
        self.keepalive = keepalive;
        self
    }
}

impl Default for SshConnector {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

/// Open a transport to the device and authenticate with its password.
///
/// Shared by the interactive connector and the SFTP transfer manager, which
/// opens a different channel type on the resulting handle.
pub(crate) async fn open_authenticated(
    credential: &DeviceCredential,
    connect_timeout: Duration,
    keepalive: Duration,
) -> Result<Handle<DeviceHandler>> {
    let config = Arc::new(client::Config {
        inactivity_timeout: None,
        keepalive_interval: Some(keepalive),
        ..Default::default()
    });

    let mut session = tokio::time::timeout(
        connect_timeout,
        client::connect(
            config,
            (credential.ip.as_str(), credential.port),
            DeviceHandler,
        ),
    )
    .await
    .map_err(|_| TransportError::Timeout(connect_timeout))?
    .map_err(TransportError::Ssh)?;

    let auth = session
        .authenticate_password(&credential.username, &credential.password)
        .await
        .map_err(TransportError::Ssh)?;

    if !auth.success() {
        return Err(TransportError::AuthenticationFailed {
            user: credential.username.clone(),
        }
        .into());
    }

    Ok(session)
}

#[async_trait]
impl Connector for SshConnector {
    async fn connect(&self, credential: &DeviceCredential) -> Result<Box<dyn ShellStream>> {
        let session =
            open_authenticated(credential, self.connect_timeout, self.keepalive).await?;

        let channel = session
            .channel_open_session()
            .await
            .map_err(TransportError::Ssh)?;

        channel
            .request_pty(
                true,
                TERMINAL_TYPE,
                TERMINAL_WIDTH,
                TERMINAL_HEIGHT,
                0,
                0,
                &[],
            )
            .await
            .map_err(TransportError::Ssh)?;

        channel
            .request_shell(true)
            .await
            .map_err(TransportError::Ssh)?;

        debug!(
            "opened shell channel to {}:{}",
            credential.ip, credential.port
        );

        Ok(Box::new(SshShellStream {
            session: Some(session),
            channel,
        }))
    }
}

/// Interactive shell channel over a russh session.
struct SshShellStream {
    /// The owning session handle; `None` once closed.
    session: Option<Handle<DeviceHandler>>,
    channel: Channel<Msg>,
}

#[async_trait]
impl ShellStream for SshShellStream {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        if self.session.is_none() {
            return Err(TransportError::Disconnected.into());
        }
        self.channel
            .data(data)
            .await
            .map_err(TransportError::Ssh)?;
        Ok(())
    }

    async fn recv(&mut self, poll: Duration) -> Result<Option<Bytes>> {
        if self.session.is_none() {
            return Err(TransportError::Disconnected.into());
        }
        // One deadline for the whole call; a stream of control messages must
        // not stretch the poll window.
        let deadline = tokio::time::Instant::now() + poll;
        loop {
            match tokio::time::timeout_at(deadline, self.channel.wait()).await {
                Err(_) => return Ok(None),
                Ok(None) => return Err(TransportError::Disconnected.into()),
                Ok(Some(msg)) => match interpret(msg) {
                    MsgEvent::Output(data) => return Ok(Some(data)),
                    MsgEvent::Closed => return Err(TransportError::Disconnected.into()),
                    MsgEvent::Control => continue,
                },
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(session) = self.session.take() {
            let _ = self.channel.eof().await;
            let _ = session
                .disconnect(russh::Disconnect::ByApplication, "", "en")
                .await;
        }
        Ok(())
    }
}

/// Shell-relevant interpretation of one channel message.
enum MsgEvent {
    /// Terminal output to accumulate.
    Output(Bytes),
    /// The channel is gone.
    Closed,
    /// Window adjusts, exit status and the like; no shell output.
    Control,
}

fn interpret(msg: ChannelMsg) -> MsgEvent {
    match msg {
        ChannelMsg::Data { data } => MsgEvent::Output(Bytes::copy_from_slice(&data)),
        ChannelMsg::ExtendedData { data, .. } => MsgEvent::Output(Bytes::copy_from_slice(&data)),
        ChannelMsg::Eof | ChannelMsg::Close => MsgEvent::Closed,
        _ => MsgEvent::Control,
    }
}

/// SSH client handler for russh.
///
/// Host keys are accepted unconditionally. The targets are lab and
/// production network devices addressed by IP from an operator-supplied
/// list; known-hosts management is the caller's concern, not this engine's.
#[derive(Debug)]
pub(crate) struct DeviceHandler;

impl client::Handler for DeviceHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        Ok(true)
    }
}
