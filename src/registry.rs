//! Opt-in registry for automated rescue

use crate::AccountId;
use std::collections::HashMap;

/// Dense arena of opted-in owners plus a reverse index.
///
/// Opt-out swaps the last member into the vacated slot, so both operations
/// are O(1) and the arena never has holes.
#[derive(Debug, Default, Clone)]
pub struct Registry {
    members: Vec<AccountId>,
    index: HashMap<AccountId, usize>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if already registered
    pub fn opt_in(&mut self, account: AccountId) -> bool {
        if self.index.contains_key(&account) {
            return false;
        }
        self.index.insert(account.clone(), self.members.len());
        self.members.push(account);
        true
    }

    /// Returns false if not registered
    pub fn opt_out(&mut self, account: &AccountId) -> bool {
        let Some(slot) = self.index.remove(account) else {
            return false;
        };
        self.members.swap_remove(slot);
        if let Some(moved) = self.members.get(slot) {
            self.index.insert(moved.clone(), slot);
        }
        true
    }

    pub fn contains(&self, account: &AccountId) -> bool {
        self.index.contains_key(account)
    }

    pub fn get(&self, slot: usize) -> Option<&AccountId> {
        self.members.get(slot)
    }

    pub fn members(&self) -> &[AccountId] {
        &self.members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(n: usize) -> AccountId {
        AccountId::new(format!("user-{n}"))
    }

    #[test]
    fn test_opt_in_is_idempotent() {
        let mut registry = Registry::new();
        assert!(registry.opt_in(account(1)));
        assert!(!registry.opt_in(account(1)));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_opt_out_keeps_arena_dense_and_index_consistent() {
        let mut registry = Registry::new();
        for n in 0..5 {
            registry.opt_in(account(n));
        }

        assert!(registry.opt_out(&account(1)));
        assert!(!registry.opt_out(&account(1)));

        // The last member moved into slot 1
        assert_eq!(registry.get(1), Some(&account(4)));
        assert_eq!(registry.len(), 4);
        for (slot, member) in registry.members().iter().enumerate() {
            assert_eq!(registry.index[member], slot);
        }

        // Removing the tail member moves nothing
        assert!(registry.opt_out(&account(3)));
        assert!(!registry.contains(&account(3)));
        assert_eq!(registry.members(), &[account(0), account(4), account(2)]);
    }
}
