//! Role-based permission sets
//!
//! The roles are orthogonal: holding one never implies another. Position
//! owners are not a role; ownership is checked against the position itself.

use crate::AccountId;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    /// Grants roles, resets the circuit breaker
    Operator,
    /// Escalation ladder after the manual-processing delay
    ManualProcessor,
    /// Rescue on behalf of opted-in owners after the automation delay
    AutomationCaller,
    /// Delivers risk-engine callbacks
    OracleCaller,
}

#[derive(Debug, Default, Clone)]
pub struct AccessControl {
    members: HashMap<Role, HashSet<AccountId>>,
}

impl AccessControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has(&self, role: Role, account: &AccountId) -> bool {
        self.members
            .get(&role)
            .is_some_and(|set| set.contains(account))
    }

    /// Unconditional grant, used for bootstrap from config
    pub fn grant(&mut self, role: Role, account: AccountId) -> bool {
        self.members.entry(role).or_default().insert(account)
    }

    pub fn revoke(&mut self, role: Role, account: &AccountId) -> bool {
        self.members
            .get_mut(&role)
            .is_some_and(|set| set.remove(account))
    }

    pub fn members(&self, role: Role) -> Vec<AccountId> {
        let mut out: Vec<_> = self
            .members
            .get(&role)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        out.sort();
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roles_are_orthogonal() {
        let mut access = AccessControl::new();
        let bot = AccountId::from("keeper");
        access.grant(Role::AutomationCaller, bot.clone());

        assert!(access.has(Role::AutomationCaller, &bot));
        assert!(!access.has(Role::ManualProcessor, &bot));
        assert!(!access.has(Role::Operator, &bot));
    }

    #[test]
    fn test_grant_and_revoke() {
        let mut access = AccessControl::new();
        let ops = AccountId::from("ops");
        assert!(access.grant(Role::ManualProcessor, ops.clone()));
        assert!(!access.grant(Role::ManualProcessor, ops.clone()));
        assert_eq!(access.members(Role::ManualProcessor), vec![ops.clone()]);

        assert!(access.revoke(Role::ManualProcessor, &ops));
        assert!(!access.revoke(Role::ManualProcessor, &ops));
        assert!(!access.has(Role::ManualProcessor, &ops));
    }
}
