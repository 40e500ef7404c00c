//! Typestate states for collateral positions

pub mod markers {
    pub trait PositionState: Send + 'static {}
}

use crate::{AccountId, Basket, BasketError, PositionId, RequestId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// State types
pub struct Pending {
    pub request_id: RequestId,
}
pub struct Active {
    pub minted: Decimal,
    pub ratio_bps: u32,
    pub confidence: u8,
    pub finalized_at_millis: u64,
}

impl markers::PositionState for Pending {}
impl markers::PositionState for Active {}

/// Position container with typestate
pub struct Position<S: markers::PositionState> {
    pub id: PositionId,
    pub owner: AccountId,
    pub basket: Basket,
    pub total_value: Decimal,
    pub created_at_millis: u64,
    pub last_updated_at_millis: u64,
    pub state: S,
}

impl Position<Pending> {
    pub fn new(
        id: PositionId,
        owner: AccountId,
        basket: Basket,
        total_value: Decimal,
        request_id: RequestId,
        now_millis: u64,
    ) -> Self {
        Self {
            id,
            owner,
            basket,
            total_value,
            created_at_millis: now_millis,
            last_updated_at_millis: now_millis,
            state: Pending { request_id },
        }
    }

    pub fn finalize(
        self,
        minted: Decimal,
        ratio_bps: u32,
        confidence: u8,
        now_millis: u64,
    ) -> Position<Active> {
        Position {
            id: self.id,
            owner: self.owner,
            basket: self.basket,
            total_value: self.total_value,
            created_at_millis: self.created_at_millis,
            last_updated_at_millis: now_millis,
            state: Active {
                minted,
                ratio_bps,
                confidence,
                finalized_at_millis: now_millis,
            },
        }
    }

    /// Consume the position, yielding the full basket for return to the owner
    pub fn into_refund(self) -> Basket {
        self.basket
    }
}

/// Result of burning part of an active position
pub enum Redemption {
    /// Position still has minted supply outstanding
    Partial {
        position: Position<Active>,
        payout: Basket,
    },
    /// Position fully repaid and destroyed
    Closed { payout: Basket },
}

impl Position<Active> {
    /// Burn `burn` synthetic units and release the matching fraction of collateral.
    ///
    /// Payouts round down; the final burn releases whatever remains, so the
    /// sum of all payouts equals the deposited basket.
    /// On arithmetic failure the untouched position is handed back.
    pub fn redeem(
        mut self,
        burn: Decimal,
        now_millis: u64,
    ) -> Result<Redemption, (Self, BasketError)> {
        if burn >= self.state.minted {
            return Ok(Redemption::Closed {
                payout: self.basket.without_zeros(),
            });
        }
        let payout = match self.basket.pro_rata(burn, self.state.minted) {
            Ok(payout) => payout,
            Err(e) => return Err((self, e)),
        };
        self.basket.deduct(&payout);
        self.state.minted -= burn;
        self.last_updated_at_millis = now_millis;
        Ok(Redemption::Partial {
            position: self,
            payout: payout.without_zeros(),
        })
    }
}

/// Type-erased position entry for HashMap storage
pub enum PositionEntry {
    Pending(Position<Pending>),
    Active(Position<Active>),
}

impl PositionEntry {
    pub fn id(&self) -> PositionId {
        match self {
            Self::Pending(p) => p.id,
            Self::Active(p) => p.id,
        }
    }

    pub fn owner(&self) -> &AccountId {
        match self {
            Self::Pending(p) => &p.owner,
            Self::Active(p) => &p.owner,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending(_))
    }

    pub fn request_id(&self) -> Option<RequestId> {
        match self {
            Self::Pending(p) => Some(p.state.request_id),
            Self::Active(_) => None,
        }
    }

    pub fn snapshot(&self) -> PositionSnapshot {
        match self {
            Self::Pending(p) => PositionSnapshot {
                id: p.id,
                owner: p.owner.clone(),
                basket: p.basket.clone(),
                total_value: p.total_value,
                minted: Decimal::ZERO,
                ratio_bps: 0,
                confidence: 0,
                request_id: Some(p.state.request_id),
                pending: true,
                created_at_millis: p.created_at_millis,
                last_updated_at_millis: p.last_updated_at_millis,
            },
            Self::Active(p) => PositionSnapshot {
                id: p.id,
                owner: p.owner.clone(),
                basket: p.basket.clone(),
                total_value: p.total_value,
                minted: p.state.minted,
                ratio_bps: p.state.ratio_bps,
                confidence: p.state.confidence,
                request_id: None,
                pending: false,
                created_at_millis: p.created_at_millis,
                last_updated_at_millis: p.last_updated_at_millis,
            },
        }
    }
}

/// Read-only copy of a position
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionSnapshot {
    pub id: PositionId,
    pub owner: AccountId,
    pub basket: Basket,
    pub total_value: Decimal,
    pub minted: Decimal,
    pub ratio_bps: u32,
    pub confidence: u8,
    pub request_id: Option<RequestId>,
    pub pending: bool,
    pub created_at_millis: u64,
    pub last_updated_at_millis: u64,
}
