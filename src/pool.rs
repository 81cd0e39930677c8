//! Per-host connection pooling.
//!
//! Each host gets a fixed-size slot list of independently constructed
//! connections, built lazily on first lookup and never resized. Leasing is
//! a lock-free Idle→Used CAS over the slots; the map mutex is held only for
//! lookup and lazy creation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::connection::Connection;

pub(crate) struct ConnectionPool {
    slots: Mutex<HashMap<String, Vec<Arc<Connection>>>>,
    max_per_host: usize,
    tcp_nodelay: bool,
}

impl ConnectionPool {
    pub(crate) fn new(max_per_host: usize, tcp_nodelay: bool) -> Self {
        ConnectionPool {
            slots: Mutex::new(HashMap::new()),
            max_per_host,
            tcp_nodelay,
        }
    }

    /// Lease an Idle connection for `host`, or None when every slot is Used.
    pub(crate) fn pick_connection(&self, host: &str) -> Option<Arc<Connection>> {
        let pool = {
            let mut slots = self.slots.lock().unwrap();
            slots
                .entry(host.to_string())
                .or_insert_with(|| {
                    (0..self.max_per_host)
                        .map(|_| Arc::new(Connection::new(self.tcp_nodelay)))
                        .collect()
                })
                .clone()
        };

        pool.into_iter().find(|conn| conn.try_lease())
    }

    /// Return a leased connection to Idle. No notification; draining the
    /// pending queues is the caller's responsibility.
    pub(crate) fn release_connection(&self, conn: &Connection) {
        conn.release_lease();
    }

    /// Best-effort count of Used slots for `host`; may race with leasing.
    pub(crate) fn used_connections(&self, host: &str) -> usize {
        self.snapshot(host)
            .iter()
            .filter(|conn| !conn.is_idle())
            .count()
    }

    /// Best-effort count of Idle slots for `host`; may race with leasing.
    pub(crate) fn idle_connections(&self, host: &str) -> usize {
        self.snapshot(host)
            .iter()
            .filter(|conn| conn.is_idle())
            .count()
    }

    fn snapshot(&self, host: &str) -> Vec<Arc<Connection>> {
        self.slots
            .lock()
            .unwrap()
            .get(host)
            .cloned()
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leases_up_to_capacity() {
        let pool = ConnectionPool::new(2, true);
        let a = pool.pick_connection("h").unwrap();
        let b = pool.pick_connection("h").unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        assert!(pool.pick_connection("h").is_none());
        assert_eq!(pool.used_connections("h"), 2);
        assert_eq!(pool.idle_connections("h"), 0);
    }

    #[test]
    fn release_makes_slot_leasable_again() {
        let pool = ConnectionPool::new(1, true);
        let conn = pool.pick_connection("h").unwrap();
        assert!(pool.pick_connection("h").is_none());
        pool.release_connection(&conn);
        assert!(pool.pick_connection("h").is_some());
    }

    #[test]
    fn hosts_are_partitioned() {
        let pool = ConnectionPool::new(1, true);
        let _a = pool.pick_connection("a").unwrap();
        assert!(pool.pick_connection("b").is_some());
    }

    #[test]
    fn unknown_host_counts_are_zero() {
        let pool = ConnectionPool::new(1, true);
        assert_eq!(pool.used_connections("nope"), 0);
        assert_eq!(pool.idle_connections("nope"), 0);
    }
}
