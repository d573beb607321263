//! Device credentials, pool identity, and device-list import.

use std::fmt;
use std::time::Duration;

use log::warn;
use serde::{Deserialize, Serialize};

/// Default SSH port for devices that do not specify one.
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Credentials and connection parameters for one device.
///
/// Pooling identity is `(username, ip, port)` - see [`PoolKey`]. The password
/// is not part of the identity and is assumed stable per key for the process
/// lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceCredential {
    /// Device address (hostname or IP).
    pub ip: String,

    /// Username for authentication.
    pub username: String,

    /// Password for authentication.
    pub password: String,

    /// SSH port (default: 22).
    #[serde(default = "default_port")]
    pub port: u16,

    /// Per-command wait override. When set, it replaces the command-class
    /// wait budget for every command on this device.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,
}

fn default_port() -> u16 {
    DEFAULT_SSH_PORT
}

impl DeviceCredential {
    /// Create a credential with the default port and no timeout override.
    pub fn new(
        ip: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            ip: ip.into(),
            username: username.into(),
            password: password.into(),
            port: DEFAULT_SSH_PORT,
            timeout: None,
        }
    }

    /// Set a non-default port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set a per-command wait override.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// The pooling identity for this credential.
    pub fn key(&self) -> PoolKey {
        PoolKey {
            username: self.username.clone(),
            ip: self.ip.clone(),
            port: self.port,
        }
    }
}

/// Identity of a pooled connection: `(username, ip, port)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PoolKey {
    pub username: String,
    pub ip: String,
    pub port: u16,
}

impl fmt::Display for PoolKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.username, self.ip, self.port)
    }
}

/// Parse a delimited device list, one device per line:
///
/// ```text
/// ip,username,password[,port]
/// ```
///
/// Blank lines and lines starting with `#` are skipped. Malformed lines are
/// skipped with a warning and never abort the whole import.
pub fn parse_device_list(text: &str) -> Vec<DeviceCredential> {
    let mut devices = Vec::new();

    for (lineno, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        if fields.len() < 3 || fields[..3].iter().any(|f| f.is_empty()) {
            warn!("Skipping malformed device line {}: '{}'", lineno + 1, line);
            continue;
        }

        let port = match fields.get(3) {
            None | Some(&"") => DEFAULT_SSH_PORT,
            Some(p) => match p.parse::<u16>() {
                Ok(port) => port,
                Err(_) => {
                    warn!(
                        "Skipping device line {} with invalid port '{}'",
                        lineno + 1,
                        p
                    );
                    continue;
                }
            },
        };

        devices.push(DeviceCredential {
            ip: fields[0].to_string(),
            username: fields[1].to_string(),
            password: fields[2].to_string(),
            port,
            timeout: None,
        });
    }

    devices
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_key_identity() {
        let a = DeviceCredential::new("10.0.0.1", "admin", "secret");
        let b = DeviceCredential::new("10.0.0.1", "admin", "different-password");
        // Password is not part of the identity
        assert_eq!(a.key(), b.key());

        let c = DeviceCredential::new("10.0.0.1", "admin", "secret").with_port(2222);
        assert_ne!(a.key(), c.key());
    }

    #[test]
    fn test_pool_key_display() {
        let key = DeviceCredential::new("10.0.0.1", "admin", "x").key();
        assert_eq!(key.to_string(), "admin@10.0.0.1:22");
    }

    #[test]
    fn test_parse_device_list() {
        let text = "\
# lab switches
10.0.0.1,admin,secret
10.0.0.2, admin , secret2 , 2222

10.0.0.3,admin
not-a-device
10.0.0.4,admin,secret,notaport
10.0.0.5,operator,pw5,
";
        let devices = parse_device_list(text);
        assert_eq!(devices.len(), 3);

        assert_eq!(devices[0].ip, "10.0.0.1");
        assert_eq!(devices[0].port, DEFAULT_SSH_PORT);

        assert_eq!(devices[1].ip, "10.0.0.2");
        assert_eq!(devices[1].username, "admin");
        assert_eq!(devices[1].password, "secret2");
        assert_eq!(devices[1].port, 2222);

        // Trailing empty port field falls back to the default
        assert_eq!(devices[2].ip, "10.0.0.5");
        assert_eq!(devices[2].port, DEFAULT_SSH_PORT);
    }

    #[test]
    fn test_credential_serde_round_trip() {
        let device = DeviceCredential::new("10.0.0.1", "admin", "secret").with_port(830);
        let json = serde_json::to_string(&device).unwrap();
        let back: DeviceCredential = serde_json::from_str(&json).unwrap();
        assert_eq!(back.ip, device.ip);
        assert_eq!(back.port, 830);
        assert!(back.timeout.is_none());
    }
}
