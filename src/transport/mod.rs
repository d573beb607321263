//! SSH transport layer wrapping russh.
//!
//! This module provides the low-level SSH connection management,
//! handling connection setup, authentication, and shell channel creation.
//! The [`Connector`] and [`ShellStream`] traits are the injection seam the
//! session layer and tests build on.

mod ssh;

pub use ssh::SshConnector;
pub(crate) use ssh::{open_authenticated, DeviceHandler};

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::credential::DeviceCredential;
use crate::error::Result;

/// A bidirectional byte stream to a device shell.
///
/// One instance corresponds to one interactive terminal channel. All reads
/// are poll-bounded; `recv` returning `Ok(None)` means no data arrived within
/// the poll window, not end of stream.
#[async_trait]
pub trait ShellStream: Send {
    /// Write raw bytes to the device.
    async fn send(&mut self, data: &[u8]) -> Result<()>;

    /// Wait up to `poll` for the next chunk of output.
    ///
    /// Returns `Ok(None)` when nothing arrived within the window and an
    /// error when the channel is gone.
    async fn recv(&mut self, poll: Duration) -> Result<Option<Bytes>>;

    /// Close the channel and the underlying transport. Idempotent and
    /// best-effort.
    async fn close(&mut self) -> Result<()>;
}

/// Factory for shell streams. The production implementation is
/// [`SshConnector`]; tests supply scripted mocks.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a transport, authenticate, and open an interactive shell
    /// channel for the given device.
    async fn connect(&self, credential: &DeviceCredential) -> Result<Box<dyn ShellStream>>;
}
