//! Vault statistics

use std::sync::atomic::{AtomicU64, Ordering};

/// Vault-wide counters, shared between the vault and its coordinator
pub struct VaultStats {
    pub deposits_submitted: AtomicU64,
    pub deposits_rejected: AtomicU64,
    pub positions_finalized: AtomicU64,
    pub fallback_assessments: AtomicU64,
    pub clamped_assessments: AtomicU64,
    pub manual_resolutions: AtomicU64,
    pub collateral_returns: AtomicU64,
    pub dispatch_failures: AtomicU64,
    pub breaker_trips: AtomicU64,
    pub redemptions: AtomicU64,
    pub state_conflicts: AtomicU64,
    pub release_failures: AtomicU64,
}

impl VaultStats {
    pub fn new() -> Self {
        Self {
            deposits_submitted: AtomicU64::new(0),
            deposits_rejected: AtomicU64::new(0),
            positions_finalized: AtomicU64::new(0),
            fallback_assessments: AtomicU64::new(0),
            clamped_assessments: AtomicU64::new(0),
            manual_resolutions: AtomicU64::new(0),
            collateral_returns: AtomicU64::new(0),
            dispatch_failures: AtomicU64::new(0),
            breaker_trips: AtomicU64::new(0),
            redemptions: AtomicU64::new(0),
            state_conflicts: AtomicU64::new(0),
            release_failures: AtomicU64::new(0),
        }
    }

    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> VaultStatsSnapshot {
        VaultStatsSnapshot {
            deposits_submitted: self.deposits_submitted.load(Ordering::Relaxed),
            deposits_rejected: self.deposits_rejected.load(Ordering::Relaxed),
            positions_finalized: self.positions_finalized.load(Ordering::Relaxed),
            fallback_assessments: self.fallback_assessments.load(Ordering::Relaxed),
            clamped_assessments: self.clamped_assessments.load(Ordering::Relaxed),
            manual_resolutions: self.manual_resolutions.load(Ordering::Relaxed),
            collateral_returns: self.collateral_returns.load(Ordering::Relaxed),
            dispatch_failures: self.dispatch_failures.load(Ordering::Relaxed),
            breaker_trips: self.breaker_trips.load(Ordering::Relaxed),
            redemptions: self.redemptions.load(Ordering::Relaxed),
            state_conflicts: self.state_conflicts.load(Ordering::Relaxed),
            release_failures: self.release_failures.load(Ordering::Relaxed),
        }
    }
}

impl Default for VaultStats {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VaultStatsSnapshot {
    pub deposits_submitted: u64,
    pub deposits_rejected: u64,
    pub positions_finalized: u64,
    pub fallback_assessments: u64,
    pub clamped_assessments: u64,
    pub manual_resolutions: u64,
    pub collateral_returns: u64,
    pub dispatch_failures: u64,
    pub breaker_trips: u64,
    pub redemptions: u64,
    pub state_conflicts: u64,
    pub release_failures: u64,
}
