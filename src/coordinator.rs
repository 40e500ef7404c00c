//! Request/callback protocol and the escalation ladder
//!
//! Every request moves `Submitted → {Finalized | Rescued}` exactly once. The
//! callback, the manual processor, the owner and the automation all race for
//! that single transition; whoever arrives second sees `AlreadyFinalized`.
//!
//! The coordinator only decides. Moving collateral and minting is left to the
//! vault, which applies the returned [`Resolution`].

use crate::config::{
    FALLBACK_RATIO_BPS, FORCE_DEFAULT_RATIO_BPS, MAX_CONFIDENCE, MAX_RATIO_BPS, MIN_CONFIDENCE,
    MIN_RATIO_BPS,
};
use crate::response::{DEFAULT_CONFIDENCE, UNPARSED_CONFIDENCE};
use crate::{
    parse_response, round_down, AccountId, AssessmentSource, Basket, BreakerDecision,
    CircuitBreaker, CoordinatorError, EngineError, EngineKind, LadderConfig, NoOpObserver,
    ParsedResponse, PositionId, RequestEvent, RequestId, RequestJournal, RescuePath, RiskEngine,
    RiskQuery, VaultConfig, VaultObserver, VaultStats,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestStatus {
    Submitted,
    Finalized,
    Rescued(RescuePath),
}

/// Validated, clamped outcome of a risk assessment
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub ratio_bps: u32,
    pub confidence: u8,
    pub source: AssessmentSource,
    /// False when the response held no ratio and the fallback was applied
    pub parsed: bool,
    /// True when the raw ratio or confidence fell outside the accepted range
    pub clamped: bool,
}

impl RiskAssessment {
    pub fn from_parsed(parsed: &ParsedResponse) -> Self {
        if !parsed.parsed {
            return Self {
                ratio_bps: FALLBACK_RATIO_BPS,
                confidence: UNPARSED_CONFIDENCE as u8,
                source: AssessmentSource::Fallback,
                parsed: false,
                clamped: false,
            };
        }

        let raw_bps = parsed.ratio_pct.saturating_mul(100);
        let ratio_bps = raw_bps.clamp(i64::from(MIN_RATIO_BPS), i64::from(MAX_RATIO_BPS));
        let confidence = parsed
            .confidence
            .clamp(i64::from(MIN_CONFIDENCE), i64::from(MAX_CONFIDENCE));

        Self {
            ratio_bps: ratio_bps as u32,
            confidence: confidence as u8,
            source: parsed.source.clone(),
            parsed: true,
            clamped: ratio_bps != raw_bps || confidence != parsed.confidence,
        }
    }

    /// The ForceDefaultMint outcome
    pub fn force_default() -> Self {
        Self {
            ratio_bps: FORCE_DEFAULT_RATIO_BPS,
            confidence: DEFAULT_CONFIDENCE as u8,
            source: AssessmentSource::Manual,
            parsed: true,
            clamped: false,
        }
    }
}

/// Synthetic units minted for `value` at `ratio_bps`, truncated
pub fn minted_for(value: Decimal, ratio_bps: u32) -> Decimal {
    // ratio_bps >= MIN_RATIO_BPS, so the divisor is never below 1.25
    round_down(value / Decimal::new(i64::from(ratio_bps), 4))
}

/// Per-request bookkeeping
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RiskRequest {
    pub id: RequestId,
    pub owner: AccountId,
    pub position_id: Option<PositionId>,
    pub basket: Basket,
    pub value: Decimal,
    pub submitted_at_millis: u64,
    pub engine: EngineKind,
    pub status: RequestStatus,
    pub retry_count: u32,
    pub assessment: Option<RiskAssessment>,
}

impl RiskRequest {
    pub fn processed(&self) -> bool {
        self.status != RequestStatus::Submitted
    }

    pub fn elapsed_millis(&self, now_millis: u64) -> u64 {
        now_millis.saturating_sub(self.submitted_at_millis)
    }
}

/// How an authorized manual processor resolves a request
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ManualStrategy {
    /// Parse the supplied engine text as if it were the callback
    SubmitExternalResult,
    /// Mint at the fixed 160% ratio
    ForceDefaultMint,
    /// Return the full basket to the owner
    EmergencyReturn,
}

/// Where a request sits on the escalation ladder
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LadderStage {
    AwaitingCallback,
    ManualWindow,
    OwnerRescue,
    AutomatedRescue,
    Resolved,
}

/// Result of handing a request to its engine
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ForwardOutcome {
    Dispatched { attempt: u32 },
    /// Manual-first engine; nothing was sent to the automatic oracle
    Deferred,
    Failed { attempt: u32, error: EngineError },
}

/// What the vault must apply after a successful resolution
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Resolution {
    Mint {
        request_id: RequestId,
        position_id: PositionId,
        owner: AccountId,
        assessment: RiskAssessment,
        minted: Decimal,
    },
    Return {
        request_id: RequestId,
        position_id: PositionId,
        owner: AccountId,
        path: RescuePath,
    },
}

impl Resolution {
    pub fn request_id(&self) -> RequestId {
        match self {
            Self::Mint { request_id, .. } | Self::Return { request_id, .. } => *request_id,
        }
    }

    pub fn position_id(&self) -> PositionId {
        match self {
            Self::Mint { position_id, .. } | Self::Return { position_id, .. } => *position_id,
        }
    }

    pub fn owner(&self) -> &AccountId {
        match self {
            Self::Mint { owner, .. } | Self::Return { owner, .. } => owner,
        }
    }
}

/// Owns every risk request, the escalation ladder and the circuit breaker
pub struct RiskRequestCoordinator {
    requests: HashMap<RequestId, RiskRequest>,
    next_id: u64,
    breaker: CircuitBreaker,
    engine: Arc<dyn RiskEngine>,
    journal: Arc<dyn RequestJournal>,
    observer: Arc<dyn VaultObserver>,
    stats: Arc<VaultStats>,
    ladder: LadderConfig,
    max_dispatch_retries: u32,
}

impl RiskRequestCoordinator {
    pub fn new(
        engine: Arc<dyn RiskEngine>,
        journal: Arc<dyn RequestJournal>,
        config: &VaultConfig,
    ) -> Self {
        Self {
            requests: HashMap::new(),
            next_id: 0,
            breaker: CircuitBreaker::new(
                config.breaker.failure_threshold,
                config.breaker_window_millis(),
            ),
            engine,
            journal,
            observer: Arc::new(NoOpObserver),
            stats: Arc::new(VaultStats::new()),
            ladder: config.ladder.clone(),
            max_dispatch_retries: config.max_dispatch_retries,
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn VaultObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn with_stats(mut self, stats: Arc<VaultStats>) -> Self {
        self.stats = stats;
        self
    }

    /// Fail with `CircuitOpen` while the breaker is paused
    pub fn ensure_accepting(&self) -> Result<(), CoordinatorError> {
        match self.breaker.evaluate() {
            BreakerDecision::Allow => Ok(()),
            BreakerDecision::Paused { trip_count } => {
                tracing::warn!(trip_count, "Request rejected, circuit breaker open");
                Err(CoordinatorError::CircuitOpen)
            }
        }
    }

    /// Record a new request. Forwarding is a separate step once the position is bound.
    pub fn submit(
        &mut self,
        owner: AccountId,
        basket: Basket,
        value: Decimal,
        engine: EngineKind,
        now_millis: u64,
    ) -> Result<RequestId, CoordinatorError> {
        self.ensure_accepting()?;

        self.next_id += 1;
        let id = RequestId::new(self.next_id);
        self.record(
            id,
            RequestEvent::Submitted {
                owner: owner.clone(),
                engine,
                value,
                submitted_at_millis: now_millis,
            },
            now_millis,
        );
        self.requests.insert(
            id,
            RiskRequest {
                id,
                owner,
                position_id: None,
                basket,
                value,
                submitted_at_millis: now_millis,
                engine,
                status: RequestStatus::Submitted,
                retry_count: 0,
                assessment: None,
            },
        );

        tracing::debug!(request_id = %id, engine = ?engine, "Risk request submitted");
        Ok(id)
    }

    pub fn attach_position(
        &mut self,
        request_id: RequestId,
        position_id: PositionId,
        now_millis: u64,
    ) -> Result<(), CoordinatorError> {
        let request = self
            .requests
            .get_mut(&request_id)
            .ok_or(CoordinatorError::UnknownRequest(request_id))?;
        request.position_id = Some(position_id);
        self.record(
            request_id,
            RequestEvent::PositionBound { position_id },
            now_millis,
        );
        Ok(())
    }

    /// Drop a request whose deposit could not complete
    pub fn abandon(&mut self, request_id: RequestId, reason: &str, now_millis: u64) {
        if self.requests.remove(&request_id).is_some() {
            tracing::warn!(request_id = %request_id, reason = %reason, "Risk request abandoned");
            self.record(
                request_id,
                RequestEvent::Abandoned {
                    reason: reason.into(),
                    abandoned_at_millis: now_millis,
                },
                now_millis,
            );
        }
    }

    /// Hand the request to its engine. The only place engine kinds are dispatched on.
    pub fn forward(
        &mut self,
        request_id: RequestId,
        prices: &str,
        now_millis: u64,
    ) -> Result<ForwardOutcome, CoordinatorError> {
        let request = self
            .requests
            .get(&request_id)
            .ok_or(CoordinatorError::UnknownRequest(request_id))?;
        let attempt = request.retry_count + 1;
        let query = RiskQuery {
            request_id,
            owner: request.owner.clone(),
            engine: request.engine,
            basket: request.basket.encode().into(),
            prices: prices.into(),
            total_value: request.value,
            attempt,
        };

        let outcome = match query.engine {
            EngineKind::Algorithmic | EngineKind::TestFailureInjection => {
                match self.engine.dispatch(&query) {
                    Ok(()) => ForwardOutcome::Dispatched { attempt },
                    Err(error) => ForwardOutcome::Failed { attempt, error },
                }
            }
            EngineKind::EnterpriseOffChain => {
                self.engine.announce_offchain(&query);
                ForwardOutcome::Deferred
            }
            EngineKind::ManualOnly => ForwardOutcome::Deferred,
        };

        match &outcome {
            ForwardOutcome::Dispatched { attempt } => {
                self.record(
                    request_id,
                    RequestEvent::Dispatched {
                        attempt: *attempt,
                        dispatched_at_millis: now_millis,
                    },
                    now_millis,
                );
            }
            ForwardOutcome::Deferred => {
                self.record(
                    request_id,
                    RequestEvent::Deferred {
                        deferred_at_millis: now_millis,
                    },
                    now_millis,
                );
            }
            ForwardOutcome::Failed { attempt, error } => {
                VaultStats::bump(&self.stats.dispatch_failures);
                self.observer
                    .on_dispatch_failed(request_id, *attempt, &error.to_string());
                self.record(
                    request_id,
                    RequestEvent::DispatchFailed {
                        attempt: *attempt,
                        error: error.to_string().into(),
                        failed_at_millis: now_millis,
                    },
                    now_millis,
                );
                self.record_engine_failure(now_millis);
            }
        }
        Ok(outcome)
    }

    /// Known, bound and not yet processed
    pub fn open_request(&self, request_id: RequestId) -> Result<&RiskRequest, CoordinatorError> {
        let request = self
            .requests
            .get(&request_id)
            .ok_or(CoordinatorError::UnknownRequest(request_id))?;
        if request.processed() {
            return Err(CoordinatorError::AlreadyFinalized(request_id));
        }
        if request.position_id.is_none() {
            return Err(CoordinatorError::UnknownRequest(request_id));
        }
        Ok(request)
    }

    /// Validate and apply an engine callback. Unparsable text never fails; it
    /// resolves at the fallback ratio and counts against the breaker.
    pub fn resolve_callback(
        &mut self,
        request_id: RequestId,
        raw_text: &str,
        now_millis: u64,
    ) -> Result<Resolution, CoordinatorError> {
        self.open_request(request_id)?;

        let assessment = self.assess(request_id, raw_text);
        if assessment.parsed {
            self.breaker.record_success();
        } else {
            self.record_engine_failure(now_millis);
        }
        self.finalize(request_id, assessment, now_millis)
    }

    pub fn resolve_manual(
        &mut self,
        request_id: RequestId,
        strategy: ManualStrategy,
        text: Option<&str>,
        now_millis: u64,
    ) -> Result<Resolution, CoordinatorError> {
        let request = self.open_request(request_id)?;
        if !request.engine.is_manual_first() {
            ensure_elapsed(request, self.ladder.manual_delay_millis(), now_millis)?;
        }

        VaultStats::bump(&self.stats.manual_resolutions);
        tracing::info!(request_id = %request_id, strategy = ?strategy, "Manual processing");
        match strategy {
            ManualStrategy::SubmitExternalResult => {
                let assessment = self.assess(request_id, text.unwrap_or_default());
                self.finalize(request_id, assessment, now_millis)
            }
            ManualStrategy::ForceDefaultMint => {
                self.finalize(request_id, RiskAssessment::force_default(), now_millis)
            }
            ManualStrategy::EmergencyReturn => {
                self.return_collateral(request_id, RescuePath::Manual, now_millis)
            }
        }
    }

    /// Owner self-rescue; the caller has already been checked against the owner
    pub fn resolve_owner_rescue(
        &mut self,
        request_id: RequestId,
        now_millis: u64,
    ) -> Result<Resolution, CoordinatorError> {
        let request = self.open_request(request_id)?;
        ensure_elapsed(request, self.ladder.owner_rescue_delay_millis(), now_millis)?;
        self.return_collateral(request_id, RescuePath::Owner, now_millis)
    }

    pub fn resolve_automated_rescue(
        &mut self,
        request_id: RequestId,
        now_millis: u64,
    ) -> Result<Resolution, CoordinatorError> {
        let request = self.open_request(request_id)?;
        ensure_elapsed(request, self.ladder.automation_delay_millis(), now_millis)?;
        self.return_collateral(request_id, RescuePath::Automation, now_millis)
    }

    /// Re-forward an unprocessed request to its automatic engine
    pub fn retry_dispatch(
        &mut self,
        request_id: RequestId,
        prices: &str,
        now_millis: u64,
    ) -> Result<ForwardOutcome, CoordinatorError> {
        let request = self.open_request(request_id)?;
        if request.engine.is_manual_first() {
            return Err(CoordinatorError::NotForwardable {
                request_id,
                engine: request.engine,
            });
        }
        if request.retry_count >= self.max_dispatch_retries {
            return Err(CoordinatorError::RetriesExhausted {
                request_id,
                max: self.max_dispatch_retries,
            });
        }
        self.ensure_accepting()?;

        if let Some(request) = self.requests.get_mut(&request_id) {
            request.retry_count += 1;
        }
        self.forward(request_id, prices, now_millis)
    }

    pub fn ladder_stage(
        &self,
        request_id: RequestId,
        now_millis: u64,
    ) -> Result<LadderStage, CoordinatorError> {
        let request = self
            .requests
            .get(&request_id)
            .ok_or(CoordinatorError::UnknownRequest(request_id))?;
        Ok(self.stage_of(request, now_millis))
    }

    fn stage_of(&self, request: &RiskRequest, now_millis: u64) -> LadderStage {
        if request.processed() {
            return LadderStage::Resolved;
        }
        let elapsed = request.elapsed_millis(now_millis);
        if elapsed >= self.ladder.automation_delay_millis() {
            LadderStage::AutomatedRescue
        } else if elapsed >= self.ladder.owner_rescue_delay_millis() {
            LadderStage::OwnerRescue
        } else if elapsed >= self.ladder.manual_delay_millis() || request.engine.is_manual_first() {
            LadderStage::ManualWindow
        } else {
            LadderStage::AwaitingCallback
        }
    }

    pub fn get(&self, request_id: RequestId) -> Option<&RiskRequest> {
        self.requests.get(&request_id)
    }

    pub fn unresolved_count(&self) -> usize {
        self.requests.values().filter(|r| !r.processed()).count()
    }

    pub fn is_paused(&self) -> bool {
        self.breaker.is_paused()
    }

    pub fn consecutive_failures(&self) -> usize {
        self.breaker.consecutive_failures()
    }

    pub fn breaker_trip_count(&self) -> u64 {
        self.breaker.trip_count()
    }

    pub fn reset_breaker(&mut self) {
        self.breaker.reset();
        tracing::info!("Circuit breaker reset, deposits resumed");
    }

    fn assess(&self, request_id: RequestId, raw_text: &str) -> RiskAssessment {
        let assessment = RiskAssessment::from_parsed(&parse_response(raw_text));
        if !assessment.parsed {
            VaultStats::bump(&self.stats.fallback_assessments);
            self.observer.on_fallback_assessment(request_id);
        } else if assessment.clamped {
            VaultStats::bump(&self.stats.clamped_assessments);
            tracing::warn!(request_id = %request_id, ratio_bps = assessment.ratio_bps, confidence = assessment.confidence, "Risk response clamped into range");
        }
        assessment
    }

    fn finalize(
        &mut self,
        request_id: RequestId,
        assessment: RiskAssessment,
        now_millis: u64,
    ) -> Result<Resolution, CoordinatorError> {
        let minted = {
            let request = self.open_request(request_id)?;
            minted_for(request.value, assessment.ratio_bps)
        };
        // Left unprocessed so the rescue ladder still applies
        if minted <= Decimal::ZERO {
            return Err(CoordinatorError::NothingToMint {
                request_id,
                ratio_bps: assessment.ratio_bps,
            });
        }
        let (position_id, owner) = {
            let request = self.mark(request_id, RequestStatus::Finalized)?;
            request.assessment = Some(assessment.clone());
            (request.position_id, request.owner.clone())
        };
        let position_id = position_id.ok_or(CoordinatorError::UnknownRequest(request_id))?;

        self.record(
            request_id,
            RequestEvent::Finalized {
                ratio_bps: assessment.ratio_bps,
                confidence: assessment.confidence,
                source: assessment.source.as_token().into(),
                parsed: assessment.parsed,
                minted,
                finalized_at_millis: now_millis,
            },
            now_millis,
        );
        Ok(Resolution::Mint {
            request_id,
            position_id,
            owner,
            assessment,
            minted,
        })
    }

    fn return_collateral(
        &mut self,
        request_id: RequestId,
        path: RescuePath,
        now_millis: u64,
    ) -> Result<Resolution, CoordinatorError> {
        let (position_id, owner) = {
            let request = self.mark(request_id, RequestStatus::Rescued(path))?;
            (request.position_id, request.owner.clone())
        };
        let position_id = position_id.ok_or(CoordinatorError::UnknownRequest(request_id))?;

        self.record(
            request_id,
            RequestEvent::Rescued {
                path,
                rescued_at_millis: now_millis,
            },
            now_millis,
        );
        Ok(Resolution::Return {
            request_id,
            position_id,
            owner,
            path,
        })
    }

    /// The single check-and-set every resolution path goes through
    fn mark(
        &mut self,
        request_id: RequestId,
        status: RequestStatus,
    ) -> Result<&mut RiskRequest, CoordinatorError> {
        let request = self
            .requests
            .get_mut(&request_id)
            .ok_or(CoordinatorError::UnknownRequest(request_id))?;
        if request.processed() {
            return Err(CoordinatorError::AlreadyFinalized(request_id));
        }
        request.status = status;
        Ok(request)
    }

    fn record_engine_failure(&mut self, now_millis: u64) {
        if self.breaker.record_failure(now_millis) {
            VaultStats::bump(&self.stats.breaker_trips);
            self.observer.on_breaker_tripped(
                self.breaker.trip_count(),
                self.breaker.consecutive_failures(),
            );
        }
    }

    fn record(&self, request_id: RequestId, event: RequestEvent, now_millis: u64) {
        let event_type = event.event_type();
        if let Err(e) = self.journal.append(request_id, event, now_millis) {
            tracing::warn!(request_id = %request_id, event_type, error = %e, "Failed to journal request event");
        }
    }
}

fn ensure_elapsed(
    request: &RiskRequest,
    required_millis: u64,
    now_millis: u64,
) -> Result<(), CoordinatorError> {
    let elapsed_millis = request.elapsed_millis(now_millis);
    if elapsed_millis < required_millis {
        return Err(CoordinatorError::TooEarly {
            request_id: request.id,
            elapsed_millis,
            required_millis,
        });
    }
    Ok(())
}
