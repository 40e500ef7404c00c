//! Batched round-robin rescue of stuck positions
//!
//! An external scheduler calls [`RescueMonitor::scan`] and, if work exists,
//! [`RescueMonitor::execute`] with the returned batch. Each scan visits at
//! most `max_scan` registered owners starting at the cursor and advances the
//! cursor by the number visited, so with N owners and batch size K every
//! owner is visited within `ceil(N/K)` scans.

use crate::{
    AccessControl, AccountId, NoOpObserver, PositionId, Registry, RequestId, Role, Settlement,
    VaultError, VaultObserver,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A pending position the monitor believes is eligible for automated rescue
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RescueTicket {
    pub owner: AccountId,
    pub position_id: PositionId,
    pub request_id: RequestId,
}

/// What the monitor rescues from. Implemented by the vault.
pub trait RescueTarget {
    /// The owner's pending position if it is past the automation delay
    fn rescue_candidate(&self, owner: &AccountId) -> Option<RescueTicket>;

    /// Return the ticket's collateral to its owner on behalf of `caller`
    fn automated_rescue(
        &mut self,
        caller: &AccountId,
        ticket: &RescueTicket,
    ) -> Result<Settlement, VaultError>;
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ScanResult {
    pub work_exists: bool,
    pub batch: Vec<RescueTicket>,
    /// Registry slots examined
    pub visited: usize,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExecutionReport {
    pub rescued: Vec<RescueTicket>,
    /// No longer eligible when re-validated
    pub skipped: Vec<RescueTicket>,
    pub failed: Vec<(RescueTicket, Box<str>)>,
}

pub struct RescueMonitor {
    registry: Registry,
    cursor: usize,
    max_scan: usize,
    enabled: bool,
    /// Account the monitor acts as; must hold AutomationCaller on the vault
    account: AccountId,
    observer: Arc<dyn VaultObserver>,
}

impl RescueMonitor {
    pub fn new(account: AccountId, max_scan: usize, enabled: bool) -> Self {
        Self {
            registry: Registry::new(),
            cursor: 0,
            max_scan: max_scan.max(1),
            enabled,
            account,
            observer: Arc::new(NoOpObserver),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn VaultObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn account(&self) -> &AccountId {
        &self.account
    }

    /// Enroll `owner` in automated rescue. Only the owner may enroll themselves.
    pub fn opt_in(&mut self, caller: &AccountId, owner: AccountId) -> Result<bool, VaultError> {
        ensure_self(caller, &owner)?;
        let added = self.registry.opt_in(owner.clone());
        if added {
            tracing::info!(owner = %owner, "Opted in to automated rescue");
        }
        Ok(added)
    }

    /// Takes effect immediately, including for batches already scanned
    pub fn opt_out(&mut self, caller: &AccountId, owner: &AccountId) -> Result<bool, VaultError> {
        ensure_self(caller, owner)?;
        let removed = self.registry.opt_out(owner);
        if removed {
            tracing::info!(owner = %owner, "Opted out of automated rescue");
        }
        Ok(removed)
    }

    pub fn is_registered(&self, owner: &AccountId) -> bool {
        self.registry.contains(owner)
    }

    pub fn registered(&self) -> usize {
        self.registry.len()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Kill switch, operator only
    pub fn set_enabled(
        &mut self,
        access: &AccessControl,
        caller: &AccountId,
        enabled: bool,
    ) -> Result<(), VaultError> {
        if !access.has(Role::Operator, caller) {
            return Err(VaultError::Unauthorized {
                caller: caller.clone(),
                role: Role::Operator,
            });
        }
        self.enabled = enabled;
        tracing::info!(enabled, by = %caller, "Rescue monitor toggled");
        Ok(())
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Compute the next batch without moving the cursor
    pub fn preview<T: RescueTarget + ?Sized>(&self, target: &T) -> ScanResult {
        let len = self.registry.len();
        if !self.enabled || len == 0 {
            return ScanResult::default();
        }

        let start = self.cursor % len;
        let visited = self.max_scan.min(len);
        let batch: Vec<_> = (0..visited)
            .filter_map(|offset| self.registry.get((start + offset) % len))
            .filter_map(|owner| target.rescue_candidate(owner))
            .collect();

        ScanResult {
            work_exists: !batch.is_empty(),
            batch,
            visited,
        }
    }

    /// Compute the next batch and advance the cursor past the visited owners
    pub fn scan<T: RescueTarget + ?Sized>(&mut self, target: &T) -> ScanResult {
        let result = self.preview(target);
        let len = self.registry.len();
        if result.visited > 0 {
            self.cursor = (self.cursor % len + result.visited) % len;
        }
        tracing::debug!(visited = result.visited, eligible = result.batch.len(), cursor = self.cursor, "Rescue scan");
        result
    }

    /// Rescue every still-eligible ticket. One failure never aborts the batch.
    pub fn execute<T: RescueTarget + ?Sized>(
        &mut self,
        target: &mut T,
        batch: Vec<RescueTicket>,
    ) -> ExecutionReport {
        let mut report = ExecutionReport::default();

        for ticket in batch {
            if let Some(reason) = self.revalidate(target, &ticket) {
                self.observer.on_rescue_skipped(&ticket.owner, reason);
                report.skipped.push(ticket);
                continue;
            }

            match target.automated_rescue(&self.account, &ticket) {
                Ok(_) => report.rescued.push(ticket),
                Err(e) => {
                    tracing::warn!(owner = %ticket.owner, request_id = %ticket.request_id, error = %e, "Automated rescue failed");
                    report.failed.push((ticket, e.to_string().into()));
                }
            }
        }

        tracing::info!(
            rescued = report.rescued.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            "Rescue batch executed"
        );
        report
    }

    fn revalidate<T: RescueTarget + ?Sized>(
        &self,
        target: &T,
        ticket: &RescueTicket,
    ) -> Option<&'static str> {
        if !self.enabled {
            return Some("monitor disabled");
        }
        if !self.registry.contains(&ticket.owner) {
            return Some("owner opted out");
        }
        match target.rescue_candidate(&ticket.owner) {
            Some(current) if current == *ticket => None,
            Some(_) => Some("position changed since scan"),
            None => Some("no longer eligible"),
        }
    }
}

fn ensure_self(caller: &AccountId, owner: &AccountId) -> Result<(), VaultError> {
    if caller == owner {
        Ok(())
    } else {
        Err(VaultError::NotSelf {
            caller: caller.clone(),
            owner: owner.clone(),
        })
    }
}
