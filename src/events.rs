//! Request lifecycle events

use crate::{AccountId, EngineKind, PositionId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Which ladder rung returned the collateral
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RescuePath {
    /// Authorized manual processor chose EmergencyReturn
    Manual,
    /// Position owner after the self-rescue delay
    Owner,
    /// Allow-listed automation on behalf of an opted-in owner
    Automation,
}

impl RescuePath {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Owner => "owner",
            Self::Automation => "automation",
        }
    }
}

/// Events stored in the request journal
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestEvent {
    Submitted {
        owner: AccountId,
        engine: EngineKind,
        value: Decimal,
        submitted_at_millis: u64,
    },
    PositionBound {
        position_id: PositionId,
    },
    Dispatched {
        attempt: u32,
        dispatched_at_millis: u64,
    },
    DispatchFailed {
        attempt: u32,
        error: Box<str>,
        failed_at_millis: u64,
    },
    /// Not forwarded; waiting for out-of-band processing
    Deferred {
        deferred_at_millis: u64,
    },
    Finalized {
        ratio_bps: u32,
        confidence: u8,
        source: Box<str>,
        parsed: bool,
        minted: Decimal,
        finalized_at_millis: u64,
    },
    Rescued {
        path: RescuePath,
        rescued_at_millis: u64,
    },
    /// Deposit rolled back before a position was bound
    Abandoned {
        reason: Box<str>,
        abandoned_at_millis: u64,
    },
}

impl RequestEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Submitted { .. } => "submitted",
            Self::PositionBound { .. } => "position_bound",
            Self::Dispatched { .. } => "dispatched",
            Self::DispatchFailed { .. } => "dispatch_failed",
            Self::Deferred { .. } => "deferred",
            Self::Finalized { .. } => "finalized",
            Self::Rescued { .. } => "rescued",
            Self::Abandoned { .. } => "abandoned",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Finalized { .. } | Self::Rescued { .. } | Self::Abandoned { .. }
        )
    }
}
