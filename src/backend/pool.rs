//! Per-worker idle connection pools.
//!
//! Every backend owns one pool per worker thread. A worker only ever touches
//! its own slot, so the slot lock is never contended and the hot path does not
//! go near the registry lock. Acquire policy, health checks and eviction
//! belong to the dispatch layer; this module only keeps idle handles and
//! closes them when the pool is destroyed.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

/// An opaque pooled server connection.
pub trait PooledConnection: Send {
    /// Close the underlying connection. Called exactly once by the pool that
    /// owns the handle when the pool is closed or dropped.
    fn close(&mut self);
}

/// Idle connections for one (backend, worker) pair.
pub struct ConnectionPool {
    idle: Mutex<VecDeque<Box<dyn PooledConnection>>>,
    closed: AtomicBool,
}

impl ConnectionPool {
    /// Create an empty, open pool.
    pub fn new() -> Self {
        Self {
            idle: Mutex::new(VecDeque::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Return an idle connection to the pool.
    ///
    /// A closed pool closes the connection immediately and returns `false`.
    pub fn put(&self, mut conn: Box<dyn PooledConnection>) -> bool {
        let mut idle = self.idle.lock();
        // Checked under the slot lock so a concurrent close() cannot miss it.
        if self.closed.load(Ordering::Acquire) {
            drop(idle);
            conn.close();
            return false;
        }
        idle.push_back(conn);
        true
    }

    /// Take the most recently returned idle connection, if any.
    pub fn take(&self) -> Option<Box<dyn PooledConnection>> {
        self.idle.lock().pop_back()
    }

    /// Number of idle connections currently held.
    pub fn idle_count(&self) -> usize {
        self.idle.lock().len()
    }

    /// Whether the pool has been closed.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Close every idle connection and refuse new ones.
    ///
    /// Idempotent. Returns the number of connections closed by this call.
    pub fn close(&self) -> usize {
        let drained: Vec<_> = {
            let mut idle = self.idle.lock();
            self.closed.store(true, Ordering::Release);
            idle.drain(..).collect()
        };

        let count = drained.len();
        for mut conn in drained {
            conn.close();
        }
        count
    }
}

impl Default for ConnectionPool {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ConnectionPool {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("idle", &self.idle_count())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;

    /// Connection that counts how often it was closed.
    pub(crate) struct CountingConnection {
        closes: Arc<AtomicUsize>,
    }

    impl CountingConnection {
        pub(crate) fn boxed(closes: &Arc<AtomicUsize>) -> Box<dyn PooledConnection> {
            Box::new(Self {
                closes: Arc::clone(closes),
            })
        }
    }

    impl PooledConnection for CountingConnection {
        fn close(&mut self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_new_pool_is_empty() {
        let pool = ConnectionPool::new();
        assert_eq!(pool.idle_count(), 0);
        assert!(!pool.is_closed());
        assert!(pool.take().is_none());
    }

    #[test]
    fn test_put_and_take() {
        let closes = Arc::new(AtomicUsize::new(0));
        let pool = ConnectionPool::new();

        assert!(pool.put(CountingConnection::boxed(&closes)));
        assert!(pool.put(CountingConnection::boxed(&closes)));
        assert_eq!(pool.idle_count(), 2);

        let conn = pool.take();
        assert!(conn.is_some());
        assert_eq!(pool.idle_count(), 1);
        assert_eq!(closes.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_close_closes_idle_connections_once() {
        let closes = Arc::new(AtomicUsize::new(0));
        let pool = ConnectionPool::new();
        for _ in 0..3 {
            pool.put(CountingConnection::boxed(&closes));
        }

        assert_eq!(pool.close(), 3);
        assert_eq!(pool.close(), 0);
        assert!(pool.is_closed());
        assert_eq!(closes.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_put_into_closed_pool_closes_connection() {
        let closes = Arc::new(AtomicUsize::new(0));
        let pool = ConnectionPool::new();
        pool.close();

        assert!(!pool.put(CountingConnection::boxed(&closes)));
        assert_eq!(pool.idle_count(), 0);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_drop_closes_connections() {
        let closes = Arc::new(AtomicUsize::new(0));
        {
            let pool = ConnectionPool::new();
            pool.put(CountingConnection::boxed(&closes));
            pool.put(CountingConnection::boxed(&closes));
        }
        assert_eq!(closes.load(Ordering::SeqCst), 2);
    }
}
