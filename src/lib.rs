//! Risk-Assessed Basket Vault
//!
//! Users lock a basket of collateral assets and receive a synthetic currency
//! minted at a collateral ratio chosen by an external, asynchronous risk
//! engine. The engine may answer late, answer garbage, or never answer; the
//! vault guarantees every deposit either becomes an active position or is
//! returned through a tiered recovery ladder:
//!
//! | Since submission | Who may act                                   |
//! |------------------|-----------------------------------------------|
//! | 0                | the engine callback                           |
//! | 30 min           | a manual processor (mint, force 160%, return) |
//! | 2 h              | the owner (return)                            |
//! | 4 h              | the rescue monitor, for opted-in owners       |
//!
//! # Quick Start
//!
//! ```rust,ignore
//! let (engine, mut queries) = ChannelRiskEngine::new();
//! let deps = VaultDeps::new(Arc::new(engine), Arc::new(InMemoryLedger::new()));
//! let (vault, _task) = spawn_vault(VaultConfig::from_file("vault.toml")?, deps, keeper);
//!
//! let receipt = vault.deposit(alice, assets, amounts, EngineKind::Algorithmic).await?;
//!
//! // Risk worker
//! while let Some(query) = queries.recv().await {
//!     let text = score(&query.basket, &query.prices);
//!     vault.risk_callback(router.clone(), query.request_id, text).await?;
//! }
//!
//! // External scheduler
//! vault.run_rescue().await?;
//! ```

#![warn(missing_docs)]

// === Core Types ===
mod basket;
mod context;
mod errors;
mod events;
mod state;

// === Components ===
mod access;
mod breaker;
mod coordinator;
mod monitor;
mod oracle;
mod registry;
mod response;
mod store;
mod vault;

// === External Seams ===
mod engine;
mod ledger;

// === Storage ===
#[cfg(feature = "lmdb")]
mod heed_journal;
mod journal;

// === Configuration ===
mod config;

// === Observability ===
mod observer;
mod stats;

// === Service ===
mod service;

#[cfg(feature = "test-harness")]
pub mod harness;

#[cfg(test)]
mod testkit;

// === Re-exports ===

// Types
pub use basket::{round_down, Basket, BasketEntry, AMOUNT_SCALE};
pub use context::{AccountId, AssetId, Clock, ManualClock, PositionId, RequestId, SystemClock};

// State (typestate)
pub use state::{Active, Pending, Position, PositionEntry, PositionSnapshot, Redemption};

// Events
pub use events::{RequestEvent, RescuePath};

// Errors
pub use errors::{BasketError, CoordinatorError, StoreError, VaultError};

// Components
pub use access::{AccessControl, Role};
pub use breaker::{BreakerDecision, CircuitBreaker};
pub use coordinator::{
    minted_for, ForwardOutcome, LadderStage, ManualStrategy, RequestStatus, Resolution,
    RiskAssessment, RiskRequest, RiskRequestCoordinator,
};
pub use monitor::{ExecutionReport, RescueMonitor, RescueTarget, RescueTicket, ScanResult};
pub use oracle::{PriceFeed, PriceOracleAdapter, PriceQuote, PriceSample, PriceSource, StaticFeed};
pub use registry::Registry;
pub use response::{parse_response, AssessmentSource, ParsedResponse};
pub use store::{PositionStore, RedeemOutcome};
pub use vault::{DepositReceipt, Settlement, Vault, VaultDeps};

// External seams
pub use engine::{ChannelRiskEngine, EngineError, EngineKind, RiskEngine, RiskQuery};
pub use ledger::{CollateralLedger, InMemoryLedger, LedgerError};

// Storage
#[cfg(feature = "lmdb")]
pub use heed_journal::HeedJournal;
pub use journal::{unresolved_requests, InMemoryJournal, JournalEntry, JournalError, RequestJournal};

// Configuration
pub use config::{
    AccessConfig, BreakerConfig, ConfigError, LadderConfig, MonitorConfig, OracleConfig,
    VaultConfig, FALLBACK_RATIO_BPS, FORCE_DEFAULT_RATIO_BPS, HOUR_MILLIS, MAX_CONFIDENCE,
    MAX_RATIO_BPS, MAX_SCAN, MINUTE_MILLIS, MIN_CONFIDENCE, MIN_RATIO_BPS,
};

// Observability
pub use observer::{NoOpObserver, TracingObserver, VaultObserver};
pub use stats::{VaultStats, VaultStatsSnapshot};

// Service
pub use service::{spawn, spawn_vault, VaultCommand, VaultHandle};
