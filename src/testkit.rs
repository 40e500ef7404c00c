//! Shared fixtures for unit tests

use crate::{
    AccountId, AssetId, Basket, ChannelRiskEngine, EngineError, InMemoryJournal, InMemoryLedger,
    ManualClock, RiskEngine, RiskQuery, Vault, VaultConfig, VaultDeps,
};
use rust_decimal_macros::dec;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing_subscriber::EnvFilter;

pub(crate) const OPERATOR: &str = "ops";
pub(crate) const PROCESSOR: &str = "processor";
pub(crate) const KEEPER: &str = "keeper";
pub(crate) const ROUTER: &str = "router";

/// 2023-11-14T22:13:20Z
const START_MILLIS: u64 = 1_700_000_000_000;

pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

pub(crate) fn alice() -> AccountId {
    AccountId::from("alice")
}

pub(crate) fn dai_weth_basket() -> Basket {
    Basket::new([
        (AssetId::from("DAI"), dec!(2000)),
        (AssetId::from("WETH"), dec!(1)),
    ])
    .unwrap()
}

/// DAI at $1, WETH at $2000, one account per role, injection enabled
pub(crate) fn test_config() -> VaultConfig {
    let mut config = VaultConfig::default();
    config.allow_test_failure_injection = true;
    config.oracle.static_prices.insert("DAI".into(), dec!(1));
    config.oracle.static_prices.insert("WETH".into(), dec!(2000));
    config.access.operators = vec![OPERATOR.into()];
    config.access.manual_processors = vec![PROCESSOR.into()];
    config.access.automation_callers = vec![KEEPER.into()];
    config.access.oracle_callers = vec![ROUTER.into()];
    config
}

/// Engine whose transport is always down
pub(crate) struct FailingEngine;

impl RiskEngine for FailingEngine {
    fn dispatch(&self, _query: &RiskQuery) -> Result<(), EngineError> {
        Err(EngineError::Unavailable("engine offline".into()))
    }
}

pub(crate) struct Fixture {
    pub vault: Vault,
    pub ledger: Arc<InMemoryLedger>,
    pub clock: ManualClock,
    pub journal: Arc<InMemoryJournal>,
    /// Queries sent to the channel engine; stays empty with a custom engine
    pub queries: UnboundedReceiver<RiskQuery>,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: VaultConfig) -> Self {
        let (engine, queries) = ChannelRiskEngine::new();
        Self::build(config, Arc::new(engine), queries)
    }

    pub fn with_engine(config: VaultConfig, engine: Arc<dyn RiskEngine>) -> Self {
        let (_, queries) = ChannelRiskEngine::new();
        Self::build(config, engine, queries)
    }

    fn build(
        config: VaultConfig,
        engine: Arc<dyn RiskEngine>,
        queries: UnboundedReceiver<RiskQuery>,
    ) -> Self {
        init_tracing();
        let ledger = Arc::new(InMemoryLedger::new());
        let clock = ManualClock::new(START_MILLIS);
        let journal = Arc::new(InMemoryJournal::new());
        let deps = VaultDeps::new(engine, ledger.clone())
            .with_journal(journal.clone())
            .with_clock(Arc::new(clock.clone()));

        let fixture = Self {
            vault: Vault::new(config, deps),
            ledger,
            clock,
            journal,
            queries,
        };
        fixture.fund(&alice());
        fixture
    }

    /// Wallet holding exactly one default basket
    pub fn fund(&self, owner: &AccountId) {
        self.ledger.credit(owner, &AssetId::from("DAI"), dec!(2000));
        self.ledger.credit(owner, &AssetId::from("WETH"), dec!(1));
    }
}
