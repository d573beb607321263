//! Keyed connection pool.
//!
//! Interactive-shell setup costs seconds of wall time per device
//! (authentication plus prompt negotiation); the pool amortizes it across
//! repeated operations against the same device within a run. Sessions are
//! checked out: an acquired session leaves the map and is exclusively owned
//! by the caller until released or closed, so no two tasks ever share a live
//! session.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use log::debug;
use tokio::sync::Mutex;

use crate::credential::{DeviceCredential, PoolKey};
use crate::error::Result;
use crate::session::{Session, SessionState};
use crate::transport::Connector;

/// Prompt wait for the liveness probe on reuse.
const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Pool of idle device sessions, keyed by `(username, ip, port)`.
pub struct ConnectionPool {
    connector: Arc<dyn Connector>,
    entries: Mutex<HashMap<PoolKey, Session>>,
}

impl ConnectionPool {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Check out a session for `credential`.
    ///
    /// A cached entry is probed for liveness first; a dead entry is evicted
    /// and replaced with a fresh connect. The returned session is owned by
    /// the caller until passed back via [`release`](Self::release) or
    /// [`close_session`](Self::close_session).
    pub async fn acquire(&self, credential: &DeviceCredential) -> Result<Session> {
        let key = credential.key();
        let cached = self.entries.lock().await.remove(&key);

        if let Some(mut session) = cached {
            if session.probe(PROBE_TIMEOUT).await {
                debug!("reusing pooled session for {key}");
                return Ok(session);
            }
            debug!("pooled session for {key} is dead, reconnecting");
            session.close().await;
        }

        Session::connect(self.connector.as_ref(), credential.clone()).await
    }

    /// Return a session to the pool. Only `Ready` sessions are pooled;
    /// anything else is closed instead.
    pub async fn release(&self, mut session: Session) {
        if session.state() == SessionState::Ready {
            let key = session.credential().key();
            debug!("returning session for {key} to pool");
            self.entries.lock().await.insert(key, session);
        } else {
            session.close().await;
        }
    }

    /// Close a checked-out session and make sure its key holds no stale
    /// entry.
    pub async fn close_session(&self, mut session: Session) {
        let key = session.credential().key();
        if let Some(mut stale) = self.entries.lock().await.remove(&key) {
            stale.close().await;
        }
        session.close().await;
    }

    /// Evict and close the cached entry for `key`, if any.
    pub async fn evict(&self, key: &PoolKey) {
        if let Some(mut session) = self.entries.lock().await.remove(key) {
            debug!("evicting pooled session for {key}");
            session.close().await;
        }
    }

    /// Best-effort close of every pooled session. Invoked at the end of a
    /// batch run regardless of how it ended.
    pub async fn clear_all(&self) {
        let entries = std::mem::take(&mut *self.entries.lock().await);
        for (key, mut session) in entries {
            debug!("closing pooled session for {key}");
            session.close().await;
        }
    }

    /// Number of idle sessions currently pooled.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::{MockBehavior, MockConnector};

    fn credential(ip: &str) -> DeviceCredential {
        DeviceCredential::new(ip, "admin", "secret")
    }

    #[tokio::test(start_paused = true)]
    async fn test_reuse_skips_second_handshake() {
        let connector = Arc::new(MockConnector::new());
        connector.behave("10.0.0.1", MockBehavior::shell("<Switch>", "ok\n<Switch>"));
        let pool = ConnectionPool::new(connector.clone());

        let session = pool.acquire(&credential("10.0.0.1")).await.unwrap();
        pool.release(session).await;
        assert_eq!(pool.len().await, 1);

        let session = pool.acquire(&credential("10.0.0.1")).await.unwrap();
        assert_eq!(session.state(), SessionState::Ready);
        // The second acquire was served by the probe, not a new handshake.
        assert_eq!(connector.connect_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dead_entry_evicted_and_reconnected() {
        let connector = Arc::new(MockConnector::new());
        // The device answers the initial prompt and nothing else, so the
        // liveness probe on reuse times out.
        connector.behave("10.0.0.1", MockBehavior::sequence("<Switch>", vec![]));
        let pool = ConnectionPool::new(connector.clone());

        let session = pool.acquire(&credential("10.0.0.1")).await.unwrap();
        pool.release(session).await;

        let session = pool.acquire(&credential("10.0.0.1")).await.unwrap();
        assert_eq!(session.state(), SessionState::Ready);
        assert_eq!(connector.connect_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_session_empties_pool() {
        let connector = Arc::new(MockConnector::new());
        connector.behave("10.0.0.1", MockBehavior::shell("<Switch>", "ok\n<Switch>"));
        let pool = ConnectionPool::new(connector.clone());

        let session = pool.acquire(&credential("10.0.0.1")).await.unwrap();
        pool.close_session(session).await;
        assert!(pool.is_empty().await);

        // Closing again via a fresh acquire/close pair still leaves the
        // pool empty and errors nowhere.
        let session = pool.acquire(&credential("10.0.0.1")).await.unwrap();
        pool.close_session(session).await;
        assert!(pool.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_all() {
        let connector = Arc::new(MockConnector::new());
        connector.behave("10.0.0.1", MockBehavior::shell("<Switch>", "ok\n<Switch>"));
        connector.behave("10.0.0.2", MockBehavior::shell("<Switch>", "ok\n<Switch>"));
        let pool = ConnectionPool::new(connector.clone());

        let a = pool.acquire(&credential("10.0.0.1")).await.unwrap();
        let b = pool.acquire(&credential("10.0.0.2")).await.unwrap();
        pool.release(a).await;
        pool.release(b).await;
        assert_eq!(pool.len().await, 2);

        pool.clear_all().await;
        assert!(pool.is_empty().await);
    }
}
