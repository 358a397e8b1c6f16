//! C2: TunerLeaseRegistry — a bounded multiset of tuner slots.
//!
//! Non-blocking acquire/release with a deterministic smallest-id tie-break,
//! mediated by a `parking_lot::Mutex`, the way `rust-srec` favors
//! `parking_lot` over `std::sync::Mutex` for short, non-async-held critical
//! sections throughout its codebase.

use std::collections::{BTreeSet, HashMap};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// What a lease is being held for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeasePurpose {
    Live,
    Recording,
}

/// A held tuner slot. Dropping it without calling `release` leaks the slot
/// from the registry's bookkeeping (callers must explicitly release), so the
/// orchestrator treats `release` as the last side effect of a terminal
/// transition.
#[derive(Debug, Clone)]
pub struct TunerLease {
    pub slot_id: u32,
    pub purpose: LeasePurpose,
    pub acquired_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CapacitySnapshot {
    pub total: u32,
    pub used: u32,
    pub available: u32,
    pub by_purpose: HashMap<String, u32>,
}

struct State {
    free: BTreeSet<u32>,
    used: HashMap<u32, LeasePurpose>,
    total: u32,
    reserved_for_recording: u32,
}

/// Bounded registry of tuner slots.
pub struct TunerLeaseRegistry {
    state: Mutex<State>,
}

impl TunerLeaseRegistry {
    /// Create a registry with `total` slots, `reserved_for_recording` of
    /// which live sessions may never acquire.
    pub fn new(total: u32, reserved_for_recording: u32) -> Self {
        let free = (0..total).collect();
        Self {
            state: Mutex::new(State {
                free,
                used: HashMap::new(),
                total,
                reserved_for_recording: reserved_for_recording.min(total),
            }),
        }
    }

    /// Acquire a free slot for `purpose`, or `None` if none is available.
    /// Never blocks and never queues — admission failure is surfaced
    /// immediately to the caller.
    pub fn acquire(&self, purpose: LeasePurpose) -> Option<TunerLease> {
        let mut state = self.state.lock();

        let live_capacity = state.total.saturating_sub(state.reserved_for_recording);
        if purpose == LeasePurpose::Live {
            let live_in_use = state
                .used
                .values()
                .filter(|p| **p == LeasePurpose::Live)
                .count() as u32;
            if live_in_use >= live_capacity {
                return None;
            }
        }

        let slot_id = state.free.pop_first()?;
        state.used.insert(slot_id, purpose);
        Some(TunerLease {
            slot_id,
            purpose,
            acquired_at: chrono::Utc::now(),
        })
    }

    /// Release a previously acquired lease. Idempotent: releasing an
    /// already-released slot id is a no-op.
    pub fn release(&self, lease: &TunerLease) {
        let mut state = self.state.lock();
        if state.used.remove(&lease.slot_id).is_some() {
            state.free.insert(lease.slot_id);
        }
    }

    pub fn snapshot(&self) -> CapacitySnapshot {
        let state = self.state.lock();
        let mut by_purpose = HashMap::new();
        for purpose in state.used.values() {
            let key = match purpose {
                LeasePurpose::Live => "live_sessions",
                LeasePurpose::Recording => "recordings",
            };
            *by_purpose.entry(key.to_string()).or_insert(0) += 1;
        }
        CapacitySnapshot {
            total: state.total,
            used: state.used.len() as u32,
            available: state.free.len() as u32,
            by_purpose,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_tie_breaks_on_smallest_id() {
        let reg = TunerLeaseRegistry::new(4, 0);
        let a = reg.acquire(LeasePurpose::Live).unwrap();
        assert_eq!(a.slot_id, 0);
        let b = reg.acquire(LeasePurpose::Live).unwrap();
        assert_eq!(b.slot_id, 1);
        reg.release(&a);
        let c = reg.acquire(LeasePurpose::Live).unwrap();
        assert_eq!(c.slot_id, 0);
    }

    #[test]
    fn acquire_fails_immediately_when_exhausted() {
        let reg = TunerLeaseRegistry::new(1, 0);
        let _a = reg.acquire(LeasePurpose::Live).unwrap();
        assert!(reg.acquire(LeasePurpose::Live).is_none());
    }

    #[test]
    fn release_is_idempotent() {
        let reg = TunerLeaseRegistry::new(1, 0);
        let a = reg.acquire(LeasePurpose::Live).unwrap();
        reg.release(&a);
        reg.release(&a);
        assert_eq!(reg.snapshot().available, 1);
    }

    #[test]
    fn recording_reservation_blocks_live_but_not_recording() {
        let reg = TunerLeaseRegistry::new(2, 1);
        let _live = reg.acquire(LeasePurpose::Live).unwrap();
        assert!(reg.acquire(LeasePurpose::Live).is_none());
        assert!(reg.acquire(LeasePurpose::Recording).is_some());
    }

    #[test]
    fn snapshot_reports_by_purpose() {
        let reg = TunerLeaseRegistry::new(3, 0);
        reg.acquire(LeasePurpose::Live).unwrap();
        reg.acquire(LeasePurpose::Recording).unwrap();
        let snap = reg.snapshot();
        assert_eq!(snap.total, 3);
        assert_eq!(snap.used, 2);
        assert_eq!(snap.available, 1);
        assert_eq!(snap.by_purpose.get("live_sessions"), Some(&1));
        assert_eq!(snap.by_purpose.get("recordings"), Some(&1));
    }
}
