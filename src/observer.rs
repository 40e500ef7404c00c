//! Vault observer trait

use crate::{AccountId, EngineKind, PositionId, RequestId, RescuePath};
use rust_decimal::Decimal;

/// Observer trait for external observability
pub trait VaultObserver: Send + Sync + 'static {
    fn on_deposit_submitted(
        &self,
        request_id: RequestId,
        position_id: PositionId,
        owner: &AccountId,
        engine: EngineKind,
        value: Decimal,
    );
    fn on_dispatch_failed(&self, request_id: RequestId, attempt: u32, error: &str);
    fn on_breaker_tripped(&self, trip_count: u64, consecutive_failures: usize);
    fn on_fallback_assessment(&self, request_id: RequestId);
    fn on_position_finalized(
        &self,
        request_id: RequestId,
        position_id: PositionId,
        ratio_bps: u32,
        minted: Decimal,
    );
    fn on_position_rescued(&self, request_id: RequestId, position_id: PositionId, path: RescuePath);
    fn on_redeemed(&self, position_id: PositionId, burned: Decimal, closed: bool);
    fn on_rescue_skipped(&self, owner: &AccountId, reason: &str);
}

/// No-op observer
pub struct NoOpObserver;

impl VaultObserver for NoOpObserver {
    fn on_deposit_submitted(
        &self,
        _request_id: RequestId,
        _position_id: PositionId,
        _owner: &AccountId,
        _engine: EngineKind,
        _value: Decimal,
    ) {
    }
    fn on_dispatch_failed(&self, _request_id: RequestId, _attempt: u32, _error: &str) {}
    fn on_breaker_tripped(&self, _trip_count: u64, _consecutive_failures: usize) {}
    fn on_fallback_assessment(&self, _request_id: RequestId) {}
    fn on_position_finalized(
        &self,
        _request_id: RequestId,
        _position_id: PositionId,
        _ratio_bps: u32,
        _minted: Decimal,
    ) {
    }
    fn on_position_rescued(&self, _request_id: RequestId, _position_id: PositionId, _path: RescuePath) {}
    fn on_redeemed(&self, _position_id: PositionId, _burned: Decimal, _closed: bool) {}
    fn on_rescue_skipped(&self, _owner: &AccountId, _reason: &str) {}
}

/// Tracing-based observer
pub struct TracingObserver;

impl VaultObserver for TracingObserver {
    fn on_deposit_submitted(
        &self,
        request_id: RequestId,
        position_id: PositionId,
        owner: &AccountId,
        engine: EngineKind,
        value: Decimal,
    ) {
        tracing::info!(request_id = %request_id, position_id = %position_id, owner = %owner, engine = ?engine, value = %value, "Deposit submitted");
    }

    fn on_dispatch_failed(&self, request_id: RequestId, attempt: u32, error: &str) {
        tracing::warn!(request_id = %request_id, attempt, error = %error, "Risk engine dispatch failed");
    }

    fn on_breaker_tripped(&self, trip_count: u64, consecutive_failures: usize) {
        tracing::error!(trip_count, consecutive_failures, "Circuit breaker tripped, new deposits paused");
    }

    fn on_fallback_assessment(&self, request_id: RequestId) {
        tracing::warn!(request_id = %request_id, "Unparsable risk response, fallback ratio applied");
    }

    fn on_position_finalized(
        &self,
        request_id: RequestId,
        position_id: PositionId,
        ratio_bps: u32,
        minted: Decimal,
    ) {
        tracing::info!(request_id = %request_id, position_id = %position_id, ratio_bps, minted = %minted, "Position finalized");
    }

    fn on_position_rescued(&self, request_id: RequestId, position_id: PositionId, path: RescuePath) {
        tracing::info!(request_id = %request_id, position_id = %position_id, path = path.as_str(), "Collateral returned");
    }

    fn on_redeemed(&self, position_id: PositionId, burned: Decimal, closed: bool) {
        tracing::info!(position_id = %position_id, burned = %burned, closed, "Position redeemed");
    }

    fn on_rescue_skipped(&self, owner: &AccountId, reason: &str) {
        tracing::warn!(owner = %owner, reason = %reason, "Batch rescue skipped");
    }
}
