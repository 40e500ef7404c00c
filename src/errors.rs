//! Error types for deposits, position transitions and the escalation ladder

use crate::{AccountId, AssetId, EngineKind, LedgerError, PositionId, RequestId, Role};
use rust_decimal::Decimal;

/// Basket input validation failure
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum BasketError {
    #[error("basket is empty")]
    Empty,
    #[error("length mismatch: {assets} assets, {amounts} amounts")]
    LengthMismatch { assets: usize, amounts: usize },
    #[error("asset {0} appears more than once")]
    DuplicateAsset(AssetId),
    #[error("amount for {0} must be positive")]
    NonPositiveAmount(AssetId),
    #[error("arithmetic overflow scaling basket")]
    Overflow,
}

/// PositionStore transition failure
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("owner {owner} already has pending position {position_id}")]
    AlreadyPending {
        owner: AccountId,
        position_id: PositionId,
    },
    #[error("position {0} is not pending")]
    AlreadyFinalized(PositionId),
    #[error("position {position_id} is bound to request {expected}, got {got}")]
    StaleRequest {
        position_id: PositionId,
        expected: RequestId,
        got: RequestId,
    },
    #[error("position {0} not found")]
    UnknownPosition(PositionId),
    #[error("position {0} has not been finalized")]
    NotActive(PositionId),
    #[error("burn amount {requested} invalid, minted outstanding {outstanding}")]
    InvalidBurn {
        requested: Decimal,
        outstanding: Decimal,
    },
    #[error("position value must be positive")]
    ZeroValue,
    #[error("position {0} cannot be finalized with nothing minted")]
    NothingMinted(PositionId),
    #[error(transparent)]
    Basket(#[from] BasketError),
}

/// Protocol or ladder failure inside the coordinator
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum CoordinatorError {
    #[error("request {0} not found")]
    UnknownRequest(RequestId),
    #[error("request {0} already processed")]
    AlreadyFinalized(RequestId),
    #[error("request {request_id} not yet eligible: {elapsed_millis}ms elapsed, {required_millis}ms required")]
    TooEarly {
        request_id: RequestId,
        elapsed_millis: u64,
        required_millis: u64,
    },
    #[error("circuit breaker open, new requests paused")]
    CircuitOpen,
    #[error("request {request_id} uses engine {engine:?} which is not forwarded automatically")]
    NotForwardable {
        request_id: RequestId,
        engine: EngineKind,
    },
    #[error("request {request_id} exhausted {max} dispatch retries")]
    RetriesExhausted { request_id: RequestId, max: u32 },
    #[error("request {request_id} would mint nothing at {ratio_bps} bps")]
    NothingToMint { request_id: RequestId, ratio_bps: u32 },
}

/// Top-level vault error
#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    // Input validation
    #[error(transparent)]
    Basket(#[from] BasketError),
    #[error("asset {0} has no price feed or fallback price")]
    UnsupportedAsset(AssetId),
    #[error("engine {0:?} is not enabled on this deployment")]
    EngineNotAllowed(EngineKind),
    #[error("basket value {0} is too small to mint at the maximum ratio")]
    BelowMinimumValue(Decimal),

    // State conflicts and ladder timing
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Coordinator(#[from] CoordinatorError),
    #[error("owner {0} has no pending request")]
    NoPendingRequest(AccountId),
    #[error("{caller} is not the owner of position {position_id}")]
    NotOwner {
        caller: AccountId,
        position_id: PositionId,
    },
    #[error("{caller} cannot change rescue enrollment for {owner}")]
    NotSelf { caller: AccountId, owner: AccountId },

    // Authorization
    #[error("{caller} lacks role {role:?}")]
    Unauthorized { caller: AccountId, role: Role },
    #[error("re-entrant call rejected")]
    Reentrant,

    // External effects
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error("vault service stopped")]
    ServiceStopped,
}

impl VaultError {
    /// Race or re-entry: the caller lost to another resolution path or targeted a stale request
    pub fn is_state_conflict(&self) -> bool {
        matches!(
            self,
            Self::Store(
                StoreError::AlreadyPending { .. }
                    | StoreError::AlreadyFinalized(_)
                    | StoreError::StaleRequest { .. }
            ) | Self::Coordinator(CoordinatorError::AlreadyFinalized(_))
                | Self::NoPendingRequest(_)
        )
    }

    /// Rejected synchronously because the input itself is bad
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::Basket(_)
                | Self::UnsupportedAsset(_)
                | Self::EngineNotAllowed(_)
                | Self::BelowMinimumValue(_)
                | Self::Store(StoreError::InvalidBurn { .. } | StoreError::ZeroValue)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_conflict_classification() {
        let conflict = VaultError::Coordinator(CoordinatorError::AlreadyFinalized(RequestId::new(1)));
        assert!(conflict.is_state_conflict());
        assert!(!conflict.is_validation());

        let pending = VaultError::Store(StoreError::AlreadyPending {
            owner: AccountId::from("alice"),
            position_id: PositionId::new(1),
        });
        assert!(pending.is_state_conflict());

        let early = VaultError::Coordinator(CoordinatorError::TooEarly {
            request_id: RequestId::new(1),
            elapsed_millis: 10,
            required_millis: 20,
        });
        assert!(!early.is_state_conflict());
    }

    #[test]
    fn test_validation_classification() {
        assert!(VaultError::Basket(BasketError::Empty).is_validation());
        assert!(VaultError::UnsupportedAsset(AssetId::from("XYZ")).is_validation());
        assert!(!VaultError::Reentrant.is_validation());
    }
}
