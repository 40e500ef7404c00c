//! Risk engine selector and the outbound dispatch seam

use crate::{AccountId, RequestId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Which external path assesses a deposit
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EngineKind {
    /// Forwarded to the automatic oracle channel
    Algorithmic,
    /// Never forwarded; an authorized processor supplies the result out of band
    EnterpriseOffChain,
    /// Never forwarded; resolved only through manual processing
    ManualOnly,
    /// Forwarded with a marker telling the engine not to answer, producing a stuck request
    TestFailureInjection,
}

impl EngineKind {
    /// Manual processing is allowed from submission instead of after the wait window
    pub fn is_manual_first(&self) -> bool {
        matches!(self, Self::EnterpriseOffChain | Self::ManualOnly)
    }
}

/// Payload sent to the external engine
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskQuery {
    pub request_id: RequestId,
    pub owner: AccountId,
    pub engine: EngineKind,
    /// `SYMBOL:amount` pairs
    pub basket: Box<str>,
    /// `SYMBOL:price` pairs at submission time
    pub prices: Box<str>,
    pub total_value: Decimal,
    pub attempt: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error("risk engine unavailable: {0}")]
    Unavailable(Box<str>),
    #[error("risk engine rejected request: {0}")]
    Rejected(Box<str>),
}

/// External risk engine.
///
/// `dispatch` must not block: it hands the query to the engine and returns.
/// The answer arrives later through the vault's callback entry point.
pub trait RiskEngine: Send + Sync + 'static {
    fn dispatch(&self, query: &RiskQuery) -> Result<(), EngineError>;

    /// Notify the enterprise processor that a query awaits out-of-band handling
    fn announce_offchain(&self, _query: &RiskQuery) {}
}

/// Engine that forwards queries to an off-process worker over a channel
#[derive(Clone)]
pub struct ChannelRiskEngine {
    queries: mpsc::UnboundedSender<RiskQuery>,
    offchain: Option<mpsc::UnboundedSender<RiskQuery>>,
}

impl ChannelRiskEngine {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<RiskQuery>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                queries: tx,
                offchain: None,
            },
            rx,
        )
    }

    /// Also publish enterprise queries on a separate channel
    pub fn with_offchain_queue(mut self) -> (Self, mpsc::UnboundedReceiver<RiskQuery>) {
        let (tx, rx) = mpsc::unbounded_channel();
        self.offchain = Some(tx);
        (self, rx)
    }
}

impl RiskEngine for ChannelRiskEngine {
    fn dispatch(&self, query: &RiskQuery) -> Result<(), EngineError> {
        self.queries
            .send(query.clone())
            .map_err(|_| EngineError::Unavailable("risk worker channel closed".into()))
    }

    fn announce_offchain(&self, query: &RiskQuery) {
        if let Some(tx) = &self.offchain {
            if tx.send(query.clone()).is_err() {
                tracing::warn!(request_id = %query.request_id, "Enterprise queue closed, request waits for manual processing");
            }
        }
    }
}
