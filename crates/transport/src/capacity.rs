//! Per-endpoint capacity guard
//!
//! Each speech-to-speech server URL admits one in-flight turn per process.
//! A second request fails fast with `busy` instead of queueing.

use dashmap::DashSet;
use once_cell::sync::Lazy;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

static GLOBAL: Lazy<CapacityGuard> = Lazy::new(CapacityGuard::new);

/// Set of endpoints with a turn in flight
#[derive(Debug, Clone, Default)]
pub struct CapacityGuard {
    in_flight: Arc<DashSet<String>>,
}

impl CapacityGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide guard
    pub fn global() -> Self {
        GLOBAL.clone()
    }

    /// Claim the endpoint; `None` if a turn is already in flight
    pub fn try_acquire(&self, key: &str) -> Option<CapacityPermit> {
        if !self.in_flight.insert(key.to_string()) {
            return None;
        }
        Some(CapacityPermit {
            key: key.to_string(),
            in_flight: self.in_flight.clone(),
            released: AtomicBool::new(false),
        })
    }

    pub fn is_in_flight(&self, key: &str) -> bool {
        self.in_flight.contains(key)
    }
}

/// Claim on one endpoint, released on drop
#[derive(Debug)]
pub struct CapacityPermit {
    key: String,
    in_flight: Arc<DashSet<String>>,
    released: AtomicBool,
}

impl CapacityPermit {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Free the endpoint. Only the first call has an effect.
    pub fn release(&self) {
        if !self.released.swap(true, Ordering::SeqCst) {
            self.in_flight.remove(&self.key);
            tracing::trace!(endpoint = %self.key, "Capacity released");
        }
    }
}

impl Drop for CapacityPermit {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_turn_per_endpoint() {
        let guard = CapacityGuard::new();
        let permit = guard.try_acquire("ws://a").unwrap();
        assert!(guard.try_acquire("ws://a").is_none());
        assert!(guard.try_acquire("ws://b").is_some());

        drop(permit);
        assert!(!guard.is_in_flight("ws://a"));
        assert!(guard.try_acquire("ws://a").is_some());
    }

    #[test]
    fn test_double_release_is_noop() {
        let guard = CapacityGuard::new();
        let first = guard.try_acquire("ws://a").unwrap();
        first.release();

        let second = guard.try_acquire("ws://a").unwrap();
        // Releasing (and dropping) the stale permit must not free the new claim
        first.release();
        drop(first);
        assert!(guard.is_in_flight("ws://a"));
        assert_eq!(second.key(), "ws://a");
    }

    #[test]
    fn test_global_is_shared() {
        let permit = CapacityGuard::global()
            .try_acquire("ws://global-test")
            .unwrap();
        assert!(CapacityGuard::global().is_in_flight("ws://global-test"));
        drop(permit);
        assert!(!CapacityGuard::global().is_in_flight("ws://global-test"));
    }
}
