//! Connection registry.
//!
//! The single source of truth for connection liveness. Removal is the
//! linearization point of teardown: whichever thread gets the record out
//! of `remove` proceeds with epoll removal, and the descriptor itself
//! closes when the last `Arc<Conn>` drops. Workers never hold the
//! registry lock while performing I/O.

use crate::conn::Conn;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::os::fd::RawFd;
use std::sync::Arc;
use std::time::Duration;

pub(crate) struct ConnectionRegistry {
    conns: Mutex<HashMap<RawFd, Arc<Conn>>>,
}

impl ConnectionRegistry {
    pub(crate) fn new() -> Self {
        Self {
            conns: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.conns.lock().len()
    }

    pub(crate) fn insert(&self, conn: Arc<Conn>) {
        self.conns.lock().insert(conn.fd(), conn);
    }

    pub(crate) fn get(&self, fd: RawFd) -> Option<Arc<Conn>> {
        self.conns.lock().get(&fd).cloned()
    }

    /// Updates the last-activity clock of a live connection.
    pub(crate) fn touch(&self, fd: RawFd) {
        if let Some(conn) = self.conns.lock().get(&fd) {
            conn.touch();
        }
    }

    /// Removes and returns a connection; `None` means another thread
    /// already tore it down.
    pub(crate) fn remove(&self, fd: RawFd) -> Option<Arc<Conn>> {
        self.conns.lock().remove(&fd)
    }

    /// Collects connections idle longer than `timeout`.
    ///
    /// Candidates are gathered under the lock and returned for the caller
    /// to tear down after releasing it.
    pub(crate) fn idle_candidates(&self, timeout: Duration) -> Vec<Arc<Conn>> {
        self.conns
            .lock()
            .values()
            .filter(|conn| conn.idle_for() > timeout)
            .cloned()
            .collect()
    }

    /// Empties the registry, returning every live connection.
    pub(crate) fn drain(&self) -> Vec<Arc<Conn>> {
        self.conns.lock().drain().map(|(_, conn)| conn).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::net::UnixStream;
    use wirecall_protocol::Stream;

    fn test_conn(id: u64) -> (Arc<Conn>, UnixStream) {
        let (a, b) = UnixStream::pair().unwrap();
        (
            Arc::new(Conn::new(Stream::Unix(a), id, format!("peer-{id}"))),
            b,
        )
    }

    #[test]
    fn test_insert_get_remove() {
        let registry = ConnectionRegistry::new();
        let (conn, _peer) = test_conn(1);
        let fd = conn.fd();

        registry.insert(conn.clone());
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(fd).unwrap().id, 1);

        let removed = registry.remove(fd).unwrap();
        assert_eq!(removed.id, 1);
        assert_eq!(registry.len(), 0);
        // Second removal observes the teardown already happened.
        assert!(registry.remove(fd).is_none());
    }

    #[test]
    fn test_idle_candidates() {
        let registry = ConnectionRegistry::new();
        let (old, _peer_a) = test_conn(1);
        let (fresh, _peer_b) = test_conn(2);
        registry.insert(old.clone());
        registry.insert(fresh.clone());

        std::thread::sleep(Duration::from_millis(30));
        fresh.touch();

        let idle = registry.idle_candidates(Duration::from_millis(20));
        assert_eq!(idle.len(), 1);
        assert_eq!(idle[0].id, 1);

        // Nothing qualifies with a generous timeout.
        assert!(registry
            .idle_candidates(Duration::from_secs(60))
            .is_empty());
    }

    #[test]
    fn test_drain() {
        let registry = ConnectionRegistry::new();
        let (a, _pa) = test_conn(1);
        let (b, _pb) = test_conn(2);
        registry.insert(a);
        registry.insert(b);

        let drained = registry.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(registry.len(), 0);
    }
}
