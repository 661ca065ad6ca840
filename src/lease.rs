//! Time-bounded exclusive control leases over entities.
//!
//! A controller must hold a valid lease on an entity before the world
//! accepts intents for it. Leases expire on their own; nothing actively
//! revokes them.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

use crate::tick::Clock;

pub const DEFAULT_LEASE_DURATION_MS: u64 = 30_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub lease_id: String,
    pub entity_id: String,
    pub controller_id: String,
    pub acquired_at_ms: u64,
    pub expires_at_ms: u64,
}

impl Lease {
    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms >= self.expires_at_ms
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LeaseError {
    #[error("entity {entity_id} already leased by {controller_id}")]
    AlreadyLeased {
        entity_id: String,
        controller_id: String,
    },
    #[error("no lease found for entity {0}")]
    NotFound(String),
    #[error("lease {0} has expired")]
    Expired(String),
}

/// Grants, renews, and releases leases. A controller that already holds a
/// valid lease on an entity may "acquire" it again idempotently — this is
/// how a reconnecting client resumes control without an explicit renew.
pub struct LeaseManager {
    lease_duration_ms: u64,
    clock: Arc<dyn Clock>,
    leases: HashMap<String, Lease>,
    entity_leases: HashMap<String, String>,
    next_lease_seq: u64,
}

impl LeaseManager {
    pub fn new(lease_duration_ms: u64, clock: Arc<dyn Clock>) -> Self {
        Self {
            lease_duration_ms,
            clock,
            leases: HashMap::new(),
            entity_leases: HashMap::new(),
            next_lease_seq: 0,
        }
    }

    fn next_lease_id(&mut self, entity_id: &str) -> String {
        self.next_lease_seq += 1;
        format!("lease-{entity_id}-{}", self.next_lease_seq)
    }

    /// Acquire a lease on `entity_id` for `controller_id`.
    ///
    /// Idempotent for the same controller (renews and returns the existing
    /// lease id). Fails if a different controller holds a non-expired
    /// lease. An expired lease is cleaned up and replaced transparently.
    pub fn acquire(&mut self, entity_id: &str, controller_id: &str) -> Result<Lease, LeaseError> {
        let now = self.clock.now_ms();

        if let Some(existing_id) = self.entity_leases.get(entity_id).cloned() {
            let existing = self.leases.get(&existing_id).expect("index is consistent");
            if !existing.is_expired(now) {
                if existing.controller_id == controller_id {
                    return Ok(self.renew_locked(&existing_id, now));
                }
                return Err(LeaseError::AlreadyLeased {
                    entity_id: entity_id.to_string(),
                    controller_id: existing.controller_id.clone(),
                });
            }
            self.remove_lease(&existing_id);
        }

        let lease_id = self.next_lease_id(entity_id);
        let lease = Lease {
            lease_id: lease_id.clone(),
            entity_id: entity_id.to_string(),
            controller_id: controller_id.to_string(),
            acquired_at_ms: now,
            expires_at_ms: now + self.lease_duration_ms,
        };
        self.entity_leases.insert(entity_id.to_string(), lease_id.clone());
        self.leases.insert(lease_id, lease.clone());
        Ok(lease)
    }

    /// Extend a held lease's expiry from now.
    pub fn renew(&mut self, lease_id: &str) -> Result<Lease, LeaseError> {
        let now = self.clock.now_ms();
        let lease = self
            .leases
            .get(lease_id)
            .ok_or_else(|| LeaseError::NotFound(lease_id.to_string()))?;
        if lease.is_expired(now) {
            return Err(LeaseError::Expired(lease_id.to_string()));
        }
        Ok(self.renew_locked(lease_id, now))
    }

    fn renew_locked(&mut self, lease_id: &str, now: u64) -> Lease {
        let lease = self.leases.get_mut(lease_id).expect("caller checked existence");
        lease.expires_at_ms = now + self.lease_duration_ms;
        lease.clone()
    }

    /// Release a lease. Returns `true` if a lease was removed.
    pub fn release(&mut self, lease_id: &str) -> bool {
        if self.leases.contains_key(lease_id) {
            self.remove_lease(lease_id);
            true
        } else {
            false
        }
    }

    fn remove_lease(&mut self, lease_id: &str) {
        if let Some(lease) = self.leases.remove(lease_id) {
            if self.entity_leases.get(&lease.entity_id) == Some(&lease.lease_id) {
                self.entity_leases.remove(&lease.entity_id);
            }
        }
    }

    /// Current lease on `entity_id`, sweeping it out first if expired.
    pub fn get_lease_for_entity(&mut self, entity_id: &str) -> Option<Lease> {
        let lease_id = self.entity_leases.get(entity_id)?.clone();
        let now = self.clock.now_ms();
        let lease = self.leases.get(&lease_id)?.clone();
        if lease.is_expired(now) {
            self.remove_lease(&lease_id);
            return None;
        }
        Some(lease)
    }

    pub fn get_lease(&mut self, lease_id: &str) -> Option<Lease> {
        let now = self.clock.now_ms();
        let lease = self.leases.get(lease_id)?.clone();
        if lease.is_expired(now) {
            self.remove_lease(lease_id);
            return None;
        }
        Some(lease)
    }

    pub fn is_valid_lease(&mut self, lease_id: &str, entity_id: &str) -> bool {
        match self.get_lease(lease_id) {
            Some(lease) => lease.entity_id == entity_id,
            None => false,
        }
    }

    /// Remove every expired lease. Returns the number removed.
    pub fn cleanup_expired(&mut self) -> usize {
        let now = self.clock.now_ms();
        let expired: Vec<String> = self
            .leases
            .values()
            .filter(|l| l.is_expired(now))
            .map(|l| l.lease_id.clone())
            .collect();
        let count = expired.len();
        for lease_id in expired {
            self.remove_lease(&lease_id);
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tick::FakeClock;

    fn manager(clock: Arc<FakeClock>) -> LeaseManager {
        LeaseManager::new(1000, clock)
    }

    #[test]
    fn acquire_is_idempotent_for_same_controller() {
        let clock = Arc::new(FakeClock::new(0));
        let mut mgr = manager(clock);
        let first = mgr.acquire("e1", "c1").unwrap();
        let second = mgr.acquire("e1", "c1").unwrap();
        assert_eq!(first.lease_id, second.lease_id);
    }

    #[test]
    fn acquire_rejects_different_controller() {
        let clock = Arc::new(FakeClock::new(0));
        let mut mgr = manager(clock);
        mgr.acquire("e1", "c1").unwrap();
        let err = mgr.acquire("e1", "c2").unwrap_err();
        assert_eq!(
            err,
            LeaseError::AlreadyLeased {
                entity_id: "e1".to_string(),
                controller_id: "c1".to_string(),
            }
        );
    }

    #[test]
    fn expired_lease_is_reclaimable_by_anyone() {
        let clock = Arc::new(FakeClock::new(0));
        let mut mgr = manager(clock.clone());
        mgr.acquire("e1", "c1").unwrap();

        clock.advance(1001);
        let lease = mgr.acquire("e1", "c2").unwrap();
        assert_eq!(lease.controller_id, "c2");
    }

    #[test]
    fn renew_extends_expiry() {
        let clock = Arc::new(FakeClock::new(0));
        let mut mgr = manager(clock.clone());
        let lease = mgr.acquire("e1", "c1").unwrap();

        clock.advance(500);
        let renewed = mgr.renew(&lease.lease_id).unwrap();
        assert_eq!(renewed.expires_at_ms, 500 + 1000);
    }

    #[test]
    fn release_then_get_lease_for_entity_is_none() {
        let clock = Arc::new(FakeClock::new(0));
        let mut mgr = manager(clock);
        let lease = mgr.acquire("e1", "c1").unwrap();
        assert!(mgr.release(&lease.lease_id));
        assert!(mgr.get_lease_for_entity("e1").is_none());
    }

    #[test]
    fn cleanup_expired_sweeps_stale_leases() {
        let clock = Arc::new(FakeClock::new(0));
        let mut mgr = manager(clock.clone());
        mgr.acquire("e1", "c1").unwrap();
        mgr.acquire("e2", "c2").unwrap();

        clock.advance(1001);
        assert_eq!(mgr.cleanup_expired(), 2);
    }
}
