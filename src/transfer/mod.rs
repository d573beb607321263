//! Bulk file transfer over SFTP.
//!
//! Each [`FileTransfer`] owns a dedicated connection to one device - never
//! the interactive-shell pool, since transfers are one-shot and long-lived.
//! Uploads and downloads stream in chunks with a byte-granularity progress
//! callback, and failures are logged and reported as a verdict rather than
//! propagated as raw errors.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, TimeZone};
use log::{debug, error, info, warn};
use russh::client::Handle;
use russh_sftp::client::SftpSession;
use russh_sftp::client::error::Error as SftpError;
use russh_sftp::protocol::{FileType, StatusCode};
use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::credential::DeviceCredential;
use crate::error::{Error, Result, TransferError, TransportError};
use crate::transport::{open_authenticated, DeviceHandler};

/// Connect attempts before giving up, as for interactive sessions.
const CONNECT_ATTEMPTS: u32 = 3;

/// Streaming chunk size for uploads and downloads.
const CHUNK_SIZE: usize = 32 * 1024;

/// Progress callback: `(filename, bytes_transferred, total_bytes)`.
pub type TransferProgress = Arc<dyn Fn(&str, u64, u64) + Send + Sync>;

/// One entry from a remote directory listing.
#[derive(Debug, Clone, Serialize)]
pub struct RemoteFileEntry {
    pub filename: String,

    /// Size in bytes; 0 when the server did not report one.
    pub size: u64,

    /// Modification time, human readable; the epoch when unreported.
    pub modified: String,

    pub is_dir: bool,
}

/// SFTP transfer session to one device.
pub struct FileTransfer {
    credential: DeviceCredential,
    handle: Option<Handle<DeviceHandler>>,
    sftp: Option<SftpSession>,
    progress: Option<TransferProgress>,
}

impl FileTransfer {
    /// Connect and open an SFTP channel: up to 3 attempts, authentication
    /// failure fatal immediately, everything else retried.
    pub async fn connect(credential: DeviceCredential) -> Result<Self> {
        let mut last_error: Option<Error> = None;

        for attempt in 1..=CONNECT_ATTEMPTS {
            info!(
                "opening SFTP session to {} (attempt {attempt}/{CONNECT_ATTEMPTS})",
                credential.ip
            );

            match Self::open(&credential).await {
                Ok(transfer) => {
                    info!("SFTP session to {} established", credential.ip);
                    return Ok(transfer);
                }
                Err(Error::Transport(TransportError::AuthenticationFailed { user })) => {
                    error!("SFTP authentication failed for {}@{}", user, credential.ip);
                    return Err(TransportError::AuthenticationFailed { user }.into());
                }
                Err(e) => {
                    warn!("SFTP connect to {} failed: {e}", credential.ip);
                    last_error = Some(e);
                }
            }
        }

        Err(TransferError::ConnectFailed {
            host: credential.ip.clone(),
            attempts: CONNECT_ATTEMPTS,
            reason: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown".to_string()),
        }
        .into())
    }

    async fn open(credential: &DeviceCredential) -> Result<Self> {
        let handle =
            open_authenticated(credential, Duration::from_secs(30), Duration::from_secs(60))
                .await?;

        let channel = handle
            .channel_open_session()
            .await
            .map_err(TransportError::Ssh)?;
        channel
            .request_subsystem(true, "sftp")
            .await
            .map_err(TransportError::Ssh)?;

        let sftp = SftpSession::new(channel.into_stream())
            .await
            .map_err(sftp_error)?;

        Ok(Self {
            credential: credential.clone(),
            handle: Some(handle),
            sftp: Some(sftp),
            progress: None,
        })
    }

    /// Install a progress callback for subsequent transfers.
    pub fn set_progress_callback(&mut self, callback: impl Fn(&str, u64, u64) + Send + Sync + 'static) {
        self.progress = Some(Arc::new(callback));
    }

    /// Upload a local file, creating the remote parent directory when
    /// needed. Returns the verdict; the failure reason is logged, not
    /// propagated.
    pub async fn upload(&mut self, local_path: &Path, remote_path: &str) -> bool {
        match self.upload_inner(local_path, remote_path).await {
            Ok(()) => {
                info!(
                    "uploaded {} -> {}:{}",
                    local_path.display(),
                    self.credential.ip,
                    remote_path
                );
                true
            }
            Err(e) => {
                error!("upload of {} failed: {e}", local_path.display());
                false
            }
        }
    }

    async fn upload_inner(&mut self, local_path: &Path, remote_path: &str) -> Result<()> {
        // Fail fast before touching the wire.
        if !local_path.exists() {
            return Err(
                TransferError::LocalFileMissing(local_path.display().to_string()).into(),
            );
        }

        let sftp = self.sftp.as_ref().ok_or(TransferError::NotConnected)?;

        if let Some(parent) = remote_parent(remote_path) {
            if sftp.metadata(parent.clone()).await.is_err() {
                if let Err(e) = sftp.create_dir(parent.clone()).await {
                    // The directory may have appeared in the meantime, or
                    // creation may be disallowed; the upload itself decides.
                    warn!("could not create remote directory {parent}: {e}");
                }
            }
        }

        let total = tokio::fs::metadata(local_path)
            .await
            .map_err(TransferError::Io)?
            .len();
        let name = local_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| local_path.display().to_string());

        let mut local = tokio::fs::File::open(local_path)
            .await
            .map_err(TransferError::Io)?;
        let mut remote = sftp
            .create(remote_path)
            .await
            .map_err(sftp_error)?;

        let mut sent: u64 = 0;
        let mut buf = vec![0u8; CHUNK_SIZE];
        loop {
            let n = local.read(&mut buf).await.map_err(TransferError::Io)?;
            if n == 0 {
                break;
            }
            remote
                .write_all(&buf[..n])
                .await
                .map_err(TransferError::Io)?;
            sent += n as u64;
            self.report(&name, sent, total);
        }
        remote.shutdown().await.map_err(TransferError::Io)?;

        Ok(())
    }

    /// Download a remote file, creating local parent directories. Returns
    /// the verdict; a missing remote file is logged distinctly from other
    /// I/O failures.
    pub async fn download(&mut self, remote_path: &str, local_path: &Path) -> bool {
        match self.download_inner(remote_path, local_path).await {
            Ok(()) => {
                info!(
                    "downloaded {}:{} -> {}",
                    self.credential.ip,
                    remote_path,
                    local_path.display()
                );
                true
            }
            Err(e @ Error::Transfer(TransferError::RemoteFileMissing(_))) => {
                error!("{e}");
                false
            }
            Err(e) => {
                error!("download of {remote_path} failed: {e}");
                false
            }
        }
    }

    async fn download_inner(&mut self, remote_path: &str, local_path: &Path) -> Result<()> {
        let sftp = self.sftp.as_ref().ok_or(TransferError::NotConnected)?;

        let attrs = sftp.metadata(remote_path).await.map_err(|e| {
            if is_missing(&e) {
                TransferError::RemoteFileMissing(remote_path.to_string())
            } else {
                sftp_error(e)
            }
        })?;
        let total = attrs.size.unwrap_or(0);

        if let Some(parent) = local_path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(TransferError::Io)?;
            }
        }

        let mut remote = sftp.open(remote_path).await.map_err(sftp_error)?;
        let mut local = tokio::fs::File::create(local_path)
            .await
            .map_err(TransferError::Io)?;

        let mut received: u64 = 0;
        let mut buf = vec![0u8; CHUNK_SIZE];
        loop {
            let n = remote.read(&mut buf).await.map_err(TransferError::Io)?;
            if n == 0 {
                break;
            }
            local
                .write_all(&buf[..n])
                .await
                .map_err(TransferError::Io)?;
            received += n as u64;
            self.report(remote_path, received, total);
        }
        local.flush().await.map_err(TransferError::Io)?;

        Ok(())
    }

    /// List a remote directory. An entry whose metadata cannot be used is
    /// skipped with a warning rather than aborting the listing.
    pub async fn list_directory(&self, path: &str) -> Result<Vec<RemoteFileEntry>> {
        let sftp = self.sftp.as_ref().ok_or(TransferError::NotConnected)?;

        let mut entries = Vec::new();
        let dir = sftp.read_dir(path).await.map_err(sftp_error)?;
        for entry in dir {
            let filename = entry.file_name();
            if filename.is_empty() || filename == "." || filename == ".." {
                warn!("skipping unusable directory entry in {path}");
                continue;
            }
            let attrs = entry.metadata();
            entries.push(RemoteFileEntry {
                filename,
                size: attrs.size.unwrap_or(0),
                modified: format_mtime(attrs.mtime.unwrap_or(0)),
                is_dir: matches!(attrs.file_type(), FileType::Dir),
            });
        }

        Ok(entries)
    }

    /// Close the SFTP channel and the transport. Idempotent, best-effort.
    pub async fn close(&mut self) {
        if let Some(sftp) = self.sftp.take() {
            if let Err(e) = sftp.close().await {
                debug!("error closing SFTP channel to {}: {e}", self.credential.ip);
            }
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle
                .disconnect(russh::Disconnect::ByApplication, "", "en")
                .await;
            info!("closed SFTP session to {}", self.credential.ip);
        }
    }

    fn report(&self, name: &str, transferred: u64, total: u64) {
        if let Some(progress) = &self.progress {
            progress(name, transferred, total);
        }
    }
}

fn sftp_error(e: SftpError) -> TransferError {
    TransferError::Sftp(e.to_string())
}

fn is_missing(e: &SftpError) -> bool {
    matches!(e, SftpError::Status(status) if status.status_code == StatusCode::NoSuchFile)
}

/// Parent directory of a remote path, if it has one.
fn remote_parent(remote_path: &str) -> Option<String> {
    let trimmed = remote_path.trim_end_matches('/');
    let (parent, _) = trimmed.rsplit_once('/')?;
    if parent.is_empty() {
        None
    } else {
        Some(parent.to_string())
    }
}

/// Render an SFTP mtime the way the device UI shows it.
fn format_mtime(mtime: u32) -> String {
    Local
        .timestamp_opt(i64::from(mtime), 0)
        .single()
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "1970-01-01 00:00:00".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_parent() {
        assert_eq!(remote_parent("/flash/backup/config.cfg").as_deref(), Some("/flash/backup"));
        assert_eq!(remote_parent("flash/config.cfg").as_deref(), Some("flash"));
        assert_eq!(remote_parent("config.cfg"), None);
        assert_eq!(remote_parent("/config.cfg"), None);
    }

    #[test]
    fn test_format_mtime_epoch_default() {
        // The epoch default renders as a plausible timestamp whatever the
        // local offset is.
        let formatted = format_mtime(0);
        assert_eq!(formatted.len(), "1970-01-01 00:00:00".len());
        assert!(formatted.starts_with("19"));
    }

    #[test]
    fn test_entry_serializes_for_display() {
        let entry = RemoteFileEntry {
            filename: "vrpcfg.zip".to_string(),
            size: 4096,
            modified: "2024-05-01 10:00:00".to_string(),
            is_dir: false,
        };
        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("vrpcfg.zip"));
        assert!(json.contains("4096"));
    }
}
