//! Session lease expiry tracking.
//!
//! A lease only records when a session key should be considered expired.
//! The sessions themselves belong to the worker pool.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug, Default)]
pub struct SessionLeases {
    leases: HashMap<String, Instant>,
}

impl SessionLeases {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start (or renew) the lease for `key`, expiring `ttl` after `now`.
    pub fn register(&mut self, key: &str, ttl: Duration, now: Instant) {
        self.leases.insert(key.to_string(), now + ttl);
    }

    pub fn remove(&mut self, key: &str) -> bool {
        self.leases.remove(key).is_some()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.leases.contains_key(key)
    }

    pub fn expires_at(&self, key: &str) -> Option<Instant> {
        self.leases.get(key).copied()
    }

    pub fn len(&self) -> usize {
        self.leases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leases.is_empty()
    }

    /// Keys whose lease ran out strictly before `now`, sorted.
    pub fn expired(&self, now: Instant) -> Vec<String> {
        let mut keys: Vec<String> = self
            .leases
            .iter()
            .filter(|(_, expires_at)| now > **expires_at)
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Remove and return the expired keys.
    pub fn take_expired(&mut self, now: Instant) -> Vec<String> {
        let keys = self.expired(now);
        for key in &keys {
            self.leases.remove(key);
        }
        keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lease_expires_only_after_ttl() {
        let start = Instant::now();
        let mut leases = SessionLeases::new();
        leases.register("chat-1", Duration::from_secs(60), start);

        assert!(leases.expired(start + Duration::from_secs(60)).is_empty());
        assert_eq!(
            leases.expired(start + Duration::from_secs(61)),
            vec!["chat-1".to_string()]
        );
    }

    #[test]
    fn take_expired_removes_once() {
        let start = Instant::now();
        let mut leases = SessionLeases::new();
        leases.register("a", Duration::from_secs(1), start);
        leases.register("b", Duration::from_secs(100), start);

        let later = start + Duration::from_secs(5);
        assert_eq!(leases.take_expired(later), vec!["a".to_string()]);
        assert!(leases.take_expired(later).is_empty());
        assert!(leases.contains("b"));
        assert_eq!(leases.len(), 1);
    }

    #[test]
    fn register_renews_existing_lease() {
        let start = Instant::now();
        let mut leases = SessionLeases::new();
        leases.register("a", Duration::from_secs(1), start);
        leases.register("a", Duration::from_secs(10), start);
        assert!(leases.expired(start + Duration::from_secs(5)).is_empty());
        assert_eq!(leases.expires_at("a"), Some(start + Duration::from_secs(10)));
    }

    #[test]
    fn remove_reports_presence() {
        let mut leases = SessionLeases::new();
        leases.register("a", Duration::from_secs(1), Instant::now());
        assert!(leases.remove("a"));
        assert!(!leases.remove("a"));
        assert!(leases.is_empty());
    }
}
