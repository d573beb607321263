//! Error types for fleetssh.

use std::io;
use std::time::Duration;

use thiserror::Error;

/// Main error type for fleetssh operations.
#[derive(Error, Debug)]
pub enum Error {
    /// SSH transport-level errors
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Interactive-shell session errors
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// Batch scheduler errors
    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    /// File transfer errors
    #[error("Transfer error: {0}")]
    Transfer(#[from] TransferError),
}

/// Transport layer errors (SSH connection, authentication).
#[derive(Error, Debug)]
pub enum TransportError {
    /// SSH handshake or protocol error
    #[error("SSH error: {0}")]
    Ssh(#[from] russh::Error),

    /// Authentication failed. Never retried - wrong credentials will not
    /// become right on a second attempt.
    #[error("Authentication failed for user '{user}'")]
    AuthenticationFailed { user: String },

    /// Connection was closed unexpectedly
    #[error("Connection disconnected")]
    Disconnected,

    /// Operation timed out
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Session layer errors (prompt negotiation, command execution).
#[derive(Error, Debug)]
pub enum SessionError {
    /// All connect attempts exhausted
    #[error("Connect to {host} failed after {attempts} attempts: {reason}")]
    ConnectFailed {
        host: String,
        attempts: u32,
        reason: String,
    },

    /// No prompt observed within the wait window
    #[error("No prompt within {0:?}")]
    PromptTimeout(Duration),

    /// Session is not in the Ready state
    #[error("Session not ready - call connect() first")]
    NotReady,

    /// Commands must be non-empty lines
    #[error("Empty command")]
    EmptyCommand,
}

/// Scheduler errors. Only setup-time misuse is surfaced here; per-device
/// failures are captured into that device's `ExecutionResult` instead.
#[derive(Error, Debug)]
pub enum SchedulerError {
    /// A batch is already in progress on this executor
    #[error("A batch is already running on this executor")]
    AlreadyRunning,
}

/// File transfer errors.
#[derive(Error, Debug)]
pub enum TransferError {
    /// All connect attempts exhausted
    #[error("SFTP connect to {host} failed after {attempts} attempts: {reason}")]
    ConnectFailed {
        host: String,
        attempts: u32,
        reason: String,
    },

    /// Transfer session is not connected
    #[error("SFTP session not connected - call connect() first")]
    NotConnected,

    /// Local file does not exist (checked before any remote attempt)
    #[error("Local file not found: {0}")]
    LocalFileMissing(String),

    /// Remote file does not exist (distinguished from generic I/O failure)
    #[error("Remote file not found: {0}")]
    RemoteFileMissing(String),

    /// SFTP protocol error
    #[error("SFTP error: {0}")]
    Sftp(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Result type alias using fleetssh's Error.
pub type Result<T> = std::result::Result<T, Error>;
