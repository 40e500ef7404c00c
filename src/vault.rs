//! Vault: the composition root
//!
//! Every entry point validates, updates state, and only then performs
//! external effects. Pulls from the owner (lock, burn) are the exception:
//! they happen first so a failed pull leaves nothing to undo.

use crate::{
    minted_for, AccessControl, AccountId, AssetId, Basket, BasketError, Clock, CollateralLedger,
    CoordinatorError, EngineKind, ForwardOutcome, InMemoryJournal, LadderStage, ManualStrategy,
    PositionId, PositionSnapshot, PositionStore, PriceFeed, PriceOracleAdapter, PriceQuote,
    RedeemOutcome, RequestId, RequestJournal, RescuePath, RescueTarget, RescueTicket, Resolution,
    RiskEngine, RiskRequest, RiskRequestCoordinator, Role, StoreError, SystemClock,
    TracingObserver, VaultConfig, VaultError, VaultObserver, VaultStats, VaultStatsSnapshot,
    MAX_RATIO_BPS,
};
use rust_decimal::Decimal;
use std::sync::Arc;

/// External collaborators injected into the vault
pub struct VaultDeps {
    pub engine: Arc<dyn RiskEngine>,
    pub ledger: Arc<dyn CollateralLedger>,
    pub journal: Arc<dyn RequestJournal>,
    pub clock: Arc<dyn Clock>,
    pub feeds: Vec<(AssetId, Arc<dyn PriceFeed>)>,
    pub observer: Arc<dyn VaultObserver>,
}

impl VaultDeps {
    pub fn new(engine: Arc<dyn RiskEngine>, ledger: Arc<dyn CollateralLedger>) -> Self {
        Self {
            engine,
            ledger,
            journal: Arc::new(InMemoryJournal::new()),
            clock: Arc::new(SystemClock),
            feeds: Vec::new(),
            observer: Arc::new(TracingObserver),
        }
    }

    pub fn with_journal(mut self, journal: Arc<dyn RequestJournal>) -> Self {
        self.journal = journal;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_feed(mut self, asset: AssetId, feed: Arc<dyn PriceFeed>) -> Self {
        self.feeds.push((asset, feed));
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn VaultObserver>) -> Self {
        self.observer = observer;
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DepositReceipt {
    pub position_id: PositionId,
    pub request_id: RequestId,
    pub total_value: Decimal,
    pub forward: ForwardOutcome,
}

/// Effect applied by a resolution
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Settlement {
    Minted(PositionSnapshot),
    Returned {
        position_id: PositionId,
        owner: AccountId,
        basket: Basket,
        path: RescuePath,
    },
}

pub struct Vault {
    config: VaultConfig,
    store: PositionStore,
    coordinator: RiskRequestCoordinator,
    oracle: PriceOracleAdapter,
    ledger: Arc<dyn CollateralLedger>,
    access: AccessControl,
    clock: Arc<dyn Clock>,
    observer: Arc<dyn VaultObserver>,
    stats: Arc<VaultStats>,
    /// Collateral owed to owners whose position is gone but whose release failed
    unreleased: Vec<(AccountId, Basket)>,
    entered: bool,
}

impl Vault {
    pub fn new(config: VaultConfig, deps: VaultDeps) -> Self {
        let stats = Arc::new(VaultStats::new());

        let mut oracle =
            PriceOracleAdapter::new(config.staleness_threshold_millis(), deps.clock.clone());
        for (symbol, price) in &config.oracle.static_prices {
            oracle.set_static_price(AssetId::new(symbol.as_str()), *price);
        }
        for (asset, feed) in deps.feeds {
            oracle.set_feed(asset, feed);
        }

        let coordinator = RiskRequestCoordinator::new(deps.engine, deps.journal, &config)
            .with_observer(deps.observer.clone())
            .with_stats(stats.clone());

        Self {
            access: config.access.build(),
            config,
            store: PositionStore::new(),
            coordinator,
            oracle,
            ledger: deps.ledger,
            clock: deps.clock,
            observer: deps.observer,
            stats,
            unreleased: Vec::new(),
            entered: false,
        }
    }

    // === User entry points ===

    /// Lock a basket and open a pending position assessed by `engine`
    pub fn deposit(
        &mut self,
        owner: &AccountId,
        assets: &[AssetId],
        amounts: &[Decimal],
        engine: EngineKind,
    ) -> Result<DepositReceipt, VaultError> {
        let result = self.guarded("deposit", |vault| {
            vault.deposit_inner(owner, assets, amounts, engine)
        });
        if result.is_err() {
            VaultStats::bump(&self.stats.deposits_rejected);
        }
        result
    }

    fn deposit_inner(
        &mut self,
        owner: &AccountId,
        assets: &[AssetId],
        amounts: &[Decimal],
        engine: EngineKind,
    ) -> Result<DepositReceipt, VaultError> {
        let basket = Basket::from_parts(assets, amounts)?;
        if engine == EngineKind::TestFailureInjection && !self.config.allow_test_failure_injection
        {
            return Err(VaultError::EngineNotAllowed(engine));
        }
        self.store.ensure_can_open(owner)?;
        self.coordinator.ensure_accepting()?;

        let total_value = self.price_basket(&basket)?;
        if total_value <= Decimal::ZERO {
            return Err(StoreError::ZeroValue.into());
        }
        // The highest ratio mints the least; anything below it always mints
        if minted_for(total_value, MAX_RATIO_BPS).is_zero() {
            return Err(VaultError::BelowMinimumValue(total_value));
        }
        let prices = self.oracle.encode_prices(&basket);
        let now = self.clock.now_millis();

        self.ledger.lock(owner, &basket)?;

        let request_id = match self.coordinator.submit(
            owner.clone(),
            basket.clone(),
            total_value,
            engine,
            now,
        ) {
            Ok(id) => id,
            Err(e) => {
                self.unwind_lock(owner, &basket);
                return Err(e.into());
            }
        };
        let position_id =
            match self
                .store
                .open(owner.clone(), basket.clone(), total_value, request_id, now)
            {
                Ok(id) => id,
                Err(e) => {
                    self.coordinator.abandon(request_id, &e.to_string(), now);
                    self.unwind_lock(owner, &basket);
                    return Err(e.into());
                }
            };
        self.coordinator.attach_position(request_id, position_id, now)?;

        VaultStats::bump(&self.stats.deposits_submitted);
        self.observer
            .on_deposit_submitted(request_id, position_id, owner, engine, total_value);

        let forward = self.coordinator.forward(request_id, &prices, now)?;
        Ok(DepositReceipt {
            position_id,
            request_id,
            total_value,
            forward,
        })
    }

    /// Owner self-rescue of their pending position after the owner delay
    pub fn emergency_withdraw(&mut self, caller: &AccountId) -> Result<Settlement, VaultError> {
        self.guarded("emergency_withdraw", |vault| {
            let request_id = vault
                .store
                .pending_for(caller)
                .and_then(|p| p.request_id)
                .ok_or_else(|| VaultError::NoPendingRequest(caller.clone()))?;
            vault.ensure_position_resolvable(request_id)?;

            let now = vault.clock.now_millis();
            let resolution = vault.coordinator.resolve_owner_rescue(request_id, now)?;
            vault.settle(resolution, now)
        })
    }

    /// Burn synthetic units and take back the matching share of collateral
    pub fn redeem(
        &mut self,
        caller: &AccountId,
        position_id: PositionId,
        burn: Decimal,
    ) -> Result<RedeemOutcome, VaultError> {
        self.guarded("redeem", |vault| {
            let owner = vault.store.ensure_redeemable(position_id, burn)?;
            if owner != caller {
                return Err(VaultError::NotOwner {
                    caller: caller.clone(),
                    position_id,
                });
            }

            vault.ledger.burn(caller, burn)?;
            let now = vault.clock.now_millis();
            let outcome = match vault.store.redeem(position_id, burn, now) {
                Ok(outcome) => outcome,
                Err(e) => {
                    if let Err(undo) = vault.ledger.mint(caller, burn) {
                        tracing::error!(owner = %caller, error = %undo, "Failed to restore burned units");
                    }
                    return Err(e.into());
                }
            };
            vault.push_release(caller, &outcome.payout)?;

            VaultStats::bump(&vault.stats.redemptions);
            vault.observer.on_redeemed(position_id, burn, outcome.closed);
            Ok(outcome)
        })
    }

    // === Privileged entry points ===

    /// Risk engine answer, delivered by an oracle caller
    pub fn on_risk_callback(
        &mut self,
        caller: &AccountId,
        request_id: RequestId,
        raw_text: &str,
    ) -> Result<Settlement, VaultError> {
        self.guarded("risk_callback", |vault| {
            vault.require(Role::OracleCaller, caller)?;
            vault.ensure_position_resolvable(request_id)?;

            let now = vault.clock.now_millis();
            let resolution = vault.coordinator.resolve_callback(request_id, raw_text, now)?;
            vault.settle(resolution, now)
        })
    }

    pub fn manual_process(
        &mut self,
        caller: &AccountId,
        request_id: RequestId,
        strategy: ManualStrategy,
        text: Option<&str>,
    ) -> Result<Settlement, VaultError> {
        self.guarded("manual_process", |vault| {
            vault.require(Role::ManualProcessor, caller)?;
            vault.ensure_position_resolvable(request_id)?;

            let now = vault.clock.now_millis();
            let resolution = vault
                .coordinator
                .resolve_manual(request_id, strategy, text, now)?;
            tracing::info!(request_id = %request_id, by = %caller, strategy = ?strategy, "Manual resolution applied");
            vault.settle(resolution, now)
        })
    }

    /// EmergencyReturn by an automation caller on behalf of the ticket's owner
    pub fn automated_rescue(
        &mut self,
        caller: &AccountId,
        ticket: &RescueTicket,
    ) -> Result<Settlement, VaultError> {
        self.guarded("automated_rescue", |vault| {
            vault.require(Role::AutomationCaller, caller)?;
            vault.coordinator.open_request(ticket.request_id)?;
            vault
                .store
                .ensure_resolvable(ticket.position_id, ticket.request_id)?;

            let now = vault.clock.now_millis();
            let resolution = vault
                .coordinator
                .resolve_automated_rescue(ticket.request_id, now)?;
            vault.settle(resolution, now)
        })
    }

    pub fn retry_dispatch(
        &mut self,
        caller: &AccountId,
        request_id: RequestId,
    ) -> Result<ForwardOutcome, VaultError> {
        self.guarded("retry_dispatch", |vault| {
            vault.require(Role::ManualProcessor, caller)?;
            let prices = {
                let request = vault.coordinator.open_request(request_id)?;
                vault.oracle.encode_prices(&request.basket)
            };
            let now = vault.clock.now_millis();
            Ok(vault.coordinator.retry_dispatch(request_id, &prices, now)?)
        })
    }

    pub fn grant_role(
        &mut self,
        caller: &AccountId,
        role: Role,
        account: AccountId,
    ) -> Result<bool, VaultError> {
        self.require(Role::Operator, caller)?;
        tracing::info!(role = ?role, account = %account, by = %caller, "Role granted");
        Ok(self.access.grant(role, account))
    }

    pub fn revoke_role(
        &mut self,
        caller: &AccountId,
        role: Role,
        account: &AccountId,
    ) -> Result<bool, VaultError> {
        self.require(Role::Operator, caller)?;
        tracing::info!(role = ?role, account = %account, by = %caller, "Role revoked");
        Ok(self.access.revoke(role, account))
    }

    pub fn reset_circuit_breaker(&mut self, caller: &AccountId) -> Result<(), VaultError> {
        self.require(Role::Operator, caller)?;
        self.coordinator.reset_breaker();
        Ok(())
    }

    /// Retry every owed release, keeping the ones that fail again. Returns how many went out.
    pub fn retry_unreleased(&mut self, caller: &AccountId) -> Result<usize, VaultError> {
        self.require(Role::Operator, caller)?;
        self.guarded("retry_unreleased", |vault| {
            let owed = std::mem::take(&mut vault.unreleased);
            let total = owed.len();
            for (owner, basket) in owed {
                if let Err(e) = vault.ledger.release(&owner, &basket) {
                    tracing::error!(owner = %owner, basket = %basket.encode(), error = %e, "Owed collateral still not released");
                    vault.unreleased.push((owner, basket));
                }
            }
            let released = total - vault.unreleased.len();
            tracing::info!(released, outstanding = vault.unreleased.len(), by = %caller, "Owed releases retried");
            Ok(released)
        })
    }

    // === Views ===

    pub fn position(&self, position_id: PositionId) -> Option<PositionSnapshot> {
        self.store.get(position_id)
    }

    pub fn pending_position(&self, owner: &AccountId) -> Option<PositionSnapshot> {
        self.store.pending_for(owner)
    }

    pub fn positions_of(&self, owner: &AccountId) -> Vec<PositionSnapshot> {
        self.store.positions_of(owner)
    }

    pub fn request(&self, request_id: RequestId) -> Option<&RiskRequest> {
        self.coordinator.get(request_id)
    }

    pub fn ladder_stage(&self, request_id: RequestId) -> Result<LadderStage, VaultError> {
        Ok(self
            .coordinator
            .ladder_stage(request_id, self.clock.now_millis())?)
    }

    pub fn quote(&self, asset: &AssetId) -> Option<PriceQuote> {
        self.oracle.quote(asset)
    }

    pub fn is_paused(&self) -> bool {
        self.coordinator.is_paused()
    }

    pub fn unreleased(&self) -> &[(AccountId, Basket)] {
        &self.unreleased
    }

    pub fn access(&self) -> &AccessControl {
        &self.access
    }

    pub fn config(&self) -> &VaultConfig {
        &self.config
    }

    pub fn stats(&self) -> VaultStatsSnapshot {
        self.stats.snapshot()
    }

    // === Internals ===

    /// Reject re-entry and classify failures for the stats
    fn guarded<T>(
        &mut self,
        op: &'static str,
        f: impl FnOnce(&mut Self) -> Result<T, VaultError>,
    ) -> Result<T, VaultError> {
        if self.entered {
            return Err(VaultError::Reentrant);
        }
        self.entered = true;
        let result = f(self);
        self.entered = false;

        if let Err(e) = &result {
            if e.is_state_conflict() {
                VaultStats::bump(&self.stats.state_conflicts);
            }
            tracing::debug!(op, error = %e, "Vault call rejected");
        }
        result
    }

    fn require(&self, role: Role, caller: &AccountId) -> Result<(), VaultError> {
        if self.access.has(role, caller) {
            Ok(())
        } else {
            Err(VaultError::Unauthorized {
                caller: caller.clone(),
                role,
            })
        }
    }

    /// Both halves must agree before any resolution is recorded
    fn ensure_position_resolvable(&self, request_id: RequestId) -> Result<(), VaultError> {
        let request = self.coordinator.open_request(request_id)?;
        let position_id = request
            .position_id
            .ok_or(CoordinatorError::UnknownRequest(request_id))?;
        self.store.ensure_resolvable(position_id, request_id)?;
        Ok(())
    }

    fn price_basket(&self, basket: &Basket) -> Result<Decimal, VaultError> {
        basket.iter().try_fold(Decimal::ZERO, |acc, entry| {
            let value = self
                .oracle
                .value_of(&entry.asset, entry.amount)
                .ok_or_else(|| VaultError::UnsupportedAsset(entry.asset.clone()))?;
            acc.checked_add(value)
                .ok_or(VaultError::Basket(BasketError::Overflow))
        })
    }

    fn settle(&mut self, resolution: Resolution, now_millis: u64) -> Result<Settlement, VaultError> {
        match resolution {
            Resolution::Mint {
                request_id,
                position_id,
                owner,
                assessment,
                minted,
            } => {
                let snapshot = self.store.finalize(
                    position_id,
                    request_id,
                    minted,
                    assessment.ratio_bps,
                    assessment.confidence,
                    now_millis,
                )?;
                self.ledger.mint(&owner, minted)?;

                VaultStats::bump(&self.stats.positions_finalized);
                self.observer
                    .on_position_finalized(request_id, position_id, assessment.ratio_bps, minted);
                Ok(Settlement::Minted(snapshot))
            }
            Resolution::Return {
                request_id,
                position_id,
                owner,
                path,
            } => {
                let (owner_of_record, basket) = self.store.rescue(position_id, request_id)?;
                debug_assert_eq!(owner, owner_of_record);
                self.push_release(&owner_of_record, &basket)?;

                VaultStats::bump(&self.stats.collateral_returns);
                self.observer.on_position_rescued(request_id, position_id, path);
                Ok(Settlement::Returned {
                    position_id,
                    owner: owner_of_record,
                    basket,
                    path,
                })
            }
        }
    }

    /// Release collateral whose position no longer exists. A failed release is
    /// kept as owed so an operator can retry it.
    fn push_release(&mut self, owner: &AccountId, basket: &Basket) -> Result<(), VaultError> {
        if let Err(e) = self.ledger.release(owner, basket) {
            tracing::error!(owner = %owner, basket = %basket.encode(), error = %e, "Collateral release failed, recorded as owed");
            VaultStats::bump(&self.stats.release_failures);
            self.unreleased.push((owner.clone(), basket.clone()));
            return Err(e.into());
        }
        Ok(())
    }

    fn unwind_lock(&self, owner: &AccountId, basket: &Basket) {
        if let Err(e) = self.ledger.release(owner, basket) {
            tracing::error!(owner = %owner, error = %e, "Failed to return collateral after rejected deposit");
        }
    }
}

impl RescueTarget for Vault {
    fn rescue_candidate(&self, owner: &AccountId) -> Option<RescueTicket> {
        let pending = self.store.pending_for(owner)?;
        let request_id = pending.request_id?;
        match self
            .coordinator
            .ladder_stage(request_id, self.clock.now_millis())
        {
            Ok(LadderStage::AutomatedRescue) => Some(RescueTicket {
                owner: owner.clone(),
                position_id: pending.id,
                request_id,
            }),
            _ => None,
        }
    }

    fn automated_rescue(
        &mut self,
        caller: &AccountId,
        ticket: &RescueTicket,
    ) -> Result<Settlement, VaultError> {
        Vault::automated_rescue(self, caller, ticket)
    }
}
