//! PositionStore: the single writer of collateral custody state

use crate::{
    AccountId, Basket, PositionEntry, PositionId, PositionSnapshot, Position, Redemption,
    RequestId, StoreError,
};
use rust_decimal::Decimal;
use std::collections::HashMap;

/// Collateral released by a redemption
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RedeemOutcome {
    pub payout: Basket,
    pub remaining_minted: Decimal,
    pub closed: bool,
}

/// Owns every position and enforces the lifecycle transitions.
///
/// At most one pending position per owner. Finalize and rescue take the
/// position out of the map, transition it, and put back (or drop) the result,
/// so a position is never observable half-transitioned.
#[derive(Default)]
pub struct PositionStore {
    positions: HashMap<PositionId, PositionEntry>,
    pending_by_owner: HashMap<AccountId, PositionId>,
    next_id: u64,
}

impl PositionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail with `AlreadyPending` if `owner` has an unresolved position
    pub fn ensure_can_open(&self, owner: &AccountId) -> Result<(), StoreError> {
        match self.pending_by_owner.get(owner) {
            Some(position_id) => Err(StoreError::AlreadyPending {
                owner: owner.clone(),
                position_id: *position_id,
            }),
            None => Ok(()),
        }
    }

    /// Create a pending position bound to `request_id`
    pub fn open(
        &mut self,
        owner: AccountId,
        basket: Basket,
        total_value: Decimal,
        request_id: RequestId,
        now_millis: u64,
    ) -> Result<PositionId, StoreError> {
        self.ensure_can_open(&owner)?;
        if total_value <= Decimal::ZERO {
            return Err(StoreError::ZeroValue);
        }

        self.next_id += 1;
        let id = PositionId::new(self.next_id);
        let position = Position::new(id, owner.clone(), basket, total_value, request_id, now_millis);
        self.pending_by_owner.insert(owner, id);
        self.positions.insert(id, PositionEntry::Pending(position));

        tracing::debug!(position_id = %id, request_id = %request_id, "Position opened");
        Ok(id)
    }

    /// Check that `position_id` is pending on `request_id` without mutating
    pub fn ensure_resolvable(
        &self,
        position_id: PositionId,
        request_id: RequestId,
    ) -> Result<(), StoreError> {
        match self.positions.get(&position_id) {
            None => Err(StoreError::UnknownPosition(position_id)),
            Some(PositionEntry::Active(_)) => Err(StoreError::AlreadyFinalized(position_id)),
            Some(PositionEntry::Pending(p)) if p.state.request_id != request_id => {
                Err(StoreError::StaleRequest {
                    position_id,
                    expected: p.state.request_id,
                    got: request_id,
                })
            }
            Some(PositionEntry::Pending(_)) => Ok(()),
        }
    }

    /// Pending → Active
    pub fn finalize(
        &mut self,
        position_id: PositionId,
        request_id: RequestId,
        minted: Decimal,
        ratio_bps: u32,
        confidence: u8,
        now_millis: u64,
    ) -> Result<PositionSnapshot, StoreError> {
        self.ensure_resolvable(position_id, request_id)?;
        if minted <= Decimal::ZERO {
            return Err(StoreError::NothingMinted(position_id));
        }

        let Some(PositionEntry::Pending(pending)) = self.positions.remove(&position_id) else {
            return Err(StoreError::UnknownPosition(position_id));
        };
        self.pending_by_owner.remove(&pending.owner);

        let active = pending.finalize(minted, ratio_bps, confidence, now_millis);
        let entry = PositionEntry::Active(active);
        let snapshot = entry.snapshot();
        self.positions.insert(position_id, entry);

        tracing::debug!(position_id = %position_id, minted = %minted, ratio_bps, "Position finalized");
        Ok(snapshot)
    }

    /// Pending → destroyed, returning the full basket
    pub fn rescue(
        &mut self,
        position_id: PositionId,
        request_id: RequestId,
    ) -> Result<(AccountId, Basket), StoreError> {
        self.ensure_resolvable(position_id, request_id)?;

        let Some(PositionEntry::Pending(pending)) = self.positions.remove(&position_id) else {
            return Err(StoreError::UnknownPosition(position_id));
        };
        self.pending_by_owner.remove(&pending.owner);
        let owner = pending.owner.clone();

        tracing::debug!(position_id = %position_id, request_id = %request_id, "Position rescued");
        Ok((owner, pending.into_refund()))
    }

    /// Check that `burn` can be redeemed from an active position, returning its owner
    pub fn ensure_redeemable(
        &self,
        position_id: PositionId,
        burn: Decimal,
    ) -> Result<&AccountId, StoreError> {
        let active = match self.positions.get(&position_id) {
            None => return Err(StoreError::UnknownPosition(position_id)),
            Some(PositionEntry::Pending(_)) => return Err(StoreError::NotActive(position_id)),
            Some(PositionEntry::Active(p)) => p,
        };
        if burn <= Decimal::ZERO || burn > active.state.minted {
            return Err(StoreError::InvalidBurn {
                requested: burn,
                outstanding: active.state.minted,
            });
        }
        Ok(&active.owner)
    }

    /// Burn part of an active position, destroying it once fully repaid
    pub fn redeem(
        &mut self,
        position_id: PositionId,
        burn: Decimal,
        now_millis: u64,
    ) -> Result<RedeemOutcome, StoreError> {
        self.ensure_redeemable(position_id, burn)?;

        let Some(PositionEntry::Active(active)) = self.positions.remove(&position_id) else {
            return Err(StoreError::UnknownPosition(position_id));
        };
        match active.redeem(burn, now_millis) {
            Ok(Redemption::Closed { payout }) => {
                tracing::debug!(position_id = %position_id, "Position closed");
                Ok(RedeemOutcome {
                    payout,
                    remaining_minted: Decimal::ZERO,
                    closed: true,
                })
            }
            Ok(Redemption::Partial { position, payout }) => {
                let remaining_minted = position.state.minted;
                self.positions.insert(position_id, PositionEntry::Active(position));
                Ok(RedeemOutcome {
                    payout,
                    remaining_minted,
                    closed: false,
                })
            }
            Err((untouched, e)) => {
                self.positions.insert(position_id, PositionEntry::Active(untouched));
                Err(e.into())
            }
        }
    }

    pub fn get(&self, position_id: PositionId) -> Option<PositionSnapshot> {
        self.positions.get(&position_id).map(PositionEntry::snapshot)
    }

    pub fn pending_for(&self, owner: &AccountId) -> Option<PositionSnapshot> {
        self.pending_by_owner
            .get(owner)
            .and_then(|id| self.get(*id))
    }

    pub fn positions_of(&self, owner: &AccountId) -> Vec<PositionSnapshot> {
        let mut out: Vec<_> = self
            .positions
            .values()
            .filter(|e| e.owner() == owner)
            .map(PositionEntry::snapshot)
            .collect();
        out.sort_by_key(|p| p.id);
        out
    }

    pub fn pending_count(&self) -> usize {
        self.pending_by_owner.len()
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}
