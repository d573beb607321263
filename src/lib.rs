//! # Fleetssh
//!
//! Async batch command execution for fleets of network devices over SSH.
//!
//! Fleetssh drives interactive device shells (Huawei VRP and similar CLIs)
//! concurrently: a bounded scheduler fans a command list out across many
//! devices, a keyed connection pool amortizes handshake cost, and completion
//! is detected by prompt heuristics rather than exit codes, since device
//! shells never report them. SFTP file transfer to the same devices is
//! included.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::collections::HashMap;
//! use std::sync::Arc;
//! use fleetssh::{BatchExecutor, DeviceCredential, SshConnector};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), fleetssh::Error> {
//!     let devices = vec![
//!         DeviceCredential::new("192.168.1.1", "admin", "secret"),
//!         DeviceCredential::new("192.168.1.2", "admin", "secret"),
//!     ];
//!     let commands: HashMap<String, Vec<String>> = devices
//!         .iter()
//!         .map(|d| (d.ip.clone(), vec!["display version".to_string()]))
//!         .collect();
//!
//!     let executor = BatchExecutor::new(Arc::new(SshConnector::default()), 5);
//!     let results = executor.run(&devices, &commands).await?;
//!
//!     for (ip, result) in &results {
//!         println!("{ip}: {:?}", result.status);
//!     }
//!     Ok(())
//! }
//! ```

pub mod credential;
pub mod error;
pub mod pool;
pub mod scheduler;
pub mod session;
pub mod transfer;
pub mod transport;

#[cfg(test)]
pub(crate) mod testkit;

// Re-export main types for convenience
pub use credential::{parse_device_list, DeviceCredential, PoolKey};
pub use error::{Error, Result, SchedulerError, SessionError, TransferError, TransportError};
pub use pool::ConnectionPool;
pub use scheduler::{
    BatchExecutor, BatchStats, ExecStatus, ExecutionResult, ProgressCallback, DEFAULT_MAX_THREADS,
};
pub use session::{CommandClass, CompletionPredicate, Session, SessionState};
pub use transfer::{FileTransfer, RemoteFileEntry, TransferProgress};
pub use transport::{Connector, ShellStream, SshConnector};
