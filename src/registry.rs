//! Live-connection registry: one in-memory row per agent IP.
//!
//! The map is concurrent; each entry carries its own lock so per-record
//! `last_seen` bumps run while readers iterate. Lock order is always map
//! first, then entry. Entries are never removed during process lifetime;
//! removal is a future operator action.

use crate::domain_types::AliasName;
use crate::record::now_unix;
use dashmap::DashMap;
use std::net::IpAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Liveness and labeling for one agent IP.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionEntry {
    pub remote_addr: IpAddr,
    pub first_seen: i64,
    pub last_seen: i64,
    /// Agent-reported hostname, captured from the first decoded record.
    pub hostname: String,
    /// Operator-assigned label, at most 32 characters.
    pub alias: String,
}

impl ConnectionEntry {
    fn new(remote_addr: IpAddr, now: i64) -> Self {
        Self {
            remote_addr,
            first_seen: now,
            last_seen: now,
            hostname: String::new(),
            alias: String::new(),
        }
    }
}

type SharedEntry = Arc<Mutex<ConnectionEntry>>;

fn lock(entry: &SharedEntry) -> MutexGuard<'_, ConnectionEntry> {
    entry.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Concurrent map of remote IP to connection metadata.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: DashMap<IpAddr, SharedEntry>,
}

impl ConnectionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an accepted connection. A repeat IP never creates a second
    /// entry; it just refreshes `last_seen`.
    pub fn add(&self, remote_addr: IpAddr) {
        let now = now_unix();
        let entry = self
            .connections
            .entry(remote_addr)
            .or_insert_with(|| Arc::new(Mutex::new(ConnectionEntry::new(remote_addr, now))))
            .value()
            .clone();
        let mut guard = lock(&entry);
        guard.last_seen = guard.last_seen.max(now);
    }

    /// Refresh `last_seen` for a decoded record, storing the agent-reported
    /// hostname when provided.
    pub fn record_seen(&self, remote_addr: IpAddr, hostname: Option<&str>) {
        let Some(entry) = self.connections.get(&remote_addr).map(|e| e.value().clone()) else {
            return;
        };
        let now = now_unix();
        let mut guard = lock(&entry);
        guard.last_seen = guard.last_seen.max(now);
        if let Some(hostname) = hostname {
            guard.hostname = hostname.to_string();
        }
    }

    /// Copy every entry for rendering. Readers may observe any valid recent
    /// value of an entry's fields; that is acceptable for a dashboard.
    #[must_use]
    pub fn snapshot(&self) -> Vec<ConnectionEntry> {
        self.connections
            .iter()
            .map(|item| lock(item.value()).clone())
            .collect()
    }

    /// Look up one entry by IP.
    #[must_use]
    pub fn lookup(&self, remote_addr: IpAddr) -> Option<ConnectionEntry> {
        self.connections
            .get(&remote_addr)
            .map(|entry| lock(entry.value()).clone())
    }

    /// Assign the operator alias. Returns `false` when the IP is unknown.
    pub fn set_alias(&self, remote_addr: IpAddr, alias: &AliasName) -> bool {
        let Some(entry) = self.connections.get(&remote_addr).map(|e| e.value().clone()) else {
            return false;
        };
        lock(&entry).alias = alias.to_string();
        true
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(text: &str) -> IpAddr {
        text.parse().unwrap()
    }

    #[test]
    fn test_should_keep_one_entry_per_ip_across_repeat_adds() {
        let registry = ConnectionRegistry::new();
        let addr = ip("192.168.1.10");

        registry.add(addr);
        let first = registry.lookup(addr).unwrap();

        registry.add(addr);
        registry.add(addr);

        assert_eq!(registry.len(), 1);
        let after = registry.lookup(addr).unwrap();
        assert_eq!(after.first_seen, first.first_seen);
        assert!(after.last_seen >= first.last_seen);
    }

    #[test]
    fn test_should_capture_hostname_and_keep_last_seen_monotone() {
        let registry = ConnectionRegistry::new();
        let addr = ip("10.0.0.5");
        registry.add(addr);

        registry.record_seen(addr, Some("blackwall"));
        let entry = registry.lookup(addr).unwrap();
        assert_eq!(entry.hostname, "blackwall");

        let before = entry.last_seen;
        registry.record_seen(addr, None);
        assert!(registry.lookup(addr).unwrap().last_seen >= before);
    }

    #[test]
    fn test_should_ignore_record_seen_for_unknown_ip() {
        let registry = ConnectionRegistry::new();
        registry.record_seen(ip("172.16.0.1"), Some("ghost"));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_should_set_alias_only_for_known_connections() {
        let registry = ConnectionRegistry::new();
        let addr = ip("10.1.2.3");
        let alias = AliasName::try_new("edge-router").unwrap();

        assert!(!registry.set_alias(addr, &alias));

        registry.add(addr);
        assert!(registry.set_alias(addr, &alias));
        assert_eq!(registry.lookup(addr).unwrap().alias, "edge-router");
    }

    #[test]
    fn test_should_snapshot_all_entries() {
        let registry = ConnectionRegistry::new();
        registry.add(ip("10.0.0.1"));
        registry.add(ip("10.0.0.2"));
        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 2);
    }
}
