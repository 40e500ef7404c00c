//! Single-writer async surface over the vault
//!
//! The vault and the rescue monitor live on one tokio task that handles
//! commands in arrival order. Callbacks, user calls, processors and the
//! external scheduler all reach the vault through a cloneable
//! [`VaultHandle`], so every mutation runs to completion before the next.

use crate::{
    AccountId, AssetId, DepositReceipt, EngineKind, ExecutionReport, ForwardOutcome,
    ManualStrategy, PositionId, PositionSnapshot, RedeemOutcome, RequestId, RescueMonitor, Role,
    Settlement, Vault, VaultConfig, VaultDeps, VaultError, VaultStatsSnapshot,
};
use rust_decimal::Decimal;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

const MAILBOX_CAPACITY: usize = 1024;

type ReplyTo<T> = oneshot::Sender<T>;

#[derive(Debug)]
pub enum VaultCommand {
    Deposit {
        owner: AccountId,
        assets: Vec<AssetId>,
        amounts: Vec<Decimal>,
        engine: EngineKind,
        reply_to: ReplyTo<Result<DepositReceipt, VaultError>>,
    },
    RiskCallback {
        caller: AccountId,
        request_id: RequestId,
        text: String,
        reply_to: ReplyTo<Result<Settlement, VaultError>>,
    },
    ManualProcess {
        caller: AccountId,
        request_id: RequestId,
        strategy: ManualStrategy,
        text: Option<String>,
        reply_to: ReplyTo<Result<Settlement, VaultError>>,
    },
    EmergencyWithdraw {
        caller: AccountId,
        reply_to: ReplyTo<Result<Settlement, VaultError>>,
    },
    Redeem {
        caller: AccountId,
        position_id: PositionId,
        burn: Decimal,
        reply_to: ReplyTo<Result<RedeemOutcome, VaultError>>,
    },
    RetryDispatch {
        caller: AccountId,
        request_id: RequestId,
        reply_to: ReplyTo<Result<ForwardOutcome, VaultError>>,
    },
    GrantRole {
        caller: AccountId,
        role: Role,
        account: AccountId,
        reply_to: ReplyTo<Result<bool, VaultError>>,
    },
    ResetBreaker {
        caller: AccountId,
        reply_to: ReplyTo<Result<(), VaultError>>,
    },
    RetryUnreleased {
        caller: AccountId,
        reply_to: ReplyTo<Result<usize, VaultError>>,
    },
    OptIn {
        caller: AccountId,
        owner: AccountId,
        reply_to: ReplyTo<Result<bool, VaultError>>,
    },
    OptOut {
        caller: AccountId,
        owner: AccountId,
        reply_to: ReplyTo<Result<bool, VaultError>>,
    },
    SetMonitorEnabled {
        caller: AccountId,
        enabled: bool,
        reply_to: ReplyTo<Result<(), VaultError>>,
    },
    /// One scheduler tick: scan, then execute whatever was found
    RunRescue {
        reply_to: ReplyTo<ExecutionReport>,
    },
    GetPosition {
        position_id: PositionId,
        reply_to: ReplyTo<Option<PositionSnapshot>>,
    },
    GetPendingPosition {
        owner: AccountId,
        reply_to: ReplyTo<Option<PositionSnapshot>>,
    },
    GetStats {
        reply_to: ReplyTo<VaultStatsSnapshot>,
    },
}

struct VaultActor {
    vault: Vault,
    monitor: RescueMonitor,
}

impl VaultActor {
    fn handle(&mut self, msg: VaultCommand) {
        // A dropped receiver only means the caller stopped waiting
        match msg {
            VaultCommand::Deposit {
                owner,
                assets,
                amounts,
                engine,
                reply_to,
            } => {
                let _ = reply_to.send(self.vault.deposit(&owner, &assets, &amounts, engine));
            }
            VaultCommand::RiskCallback {
                caller,
                request_id,
                text,
                reply_to,
            } => {
                let _ = reply_to.send(self.vault.on_risk_callback(&caller, request_id, &text));
            }
            VaultCommand::ManualProcess {
                caller,
                request_id,
                strategy,
                text,
                reply_to,
            } => {
                let result =
                    self.vault
                        .manual_process(&caller, request_id, strategy, text.as_deref());
                let _ = reply_to.send(result);
            }
            VaultCommand::EmergencyWithdraw { caller, reply_to } => {
                let _ = reply_to.send(self.vault.emergency_withdraw(&caller));
            }
            VaultCommand::Redeem {
                caller,
                position_id,
                burn,
                reply_to,
            } => {
                let _ = reply_to.send(self.vault.redeem(&caller, position_id, burn));
            }
            VaultCommand::RetryDispatch {
                caller,
                request_id,
                reply_to,
            } => {
                let _ = reply_to.send(self.vault.retry_dispatch(&caller, request_id));
            }
            VaultCommand::GrantRole {
                caller,
                role,
                account,
                reply_to,
            } => {
                let _ = reply_to.send(self.vault.grant_role(&caller, role, account));
            }
            VaultCommand::ResetBreaker { caller, reply_to } => {
                let _ = reply_to.send(self.vault.reset_circuit_breaker(&caller));
            }
            VaultCommand::RetryUnreleased { caller, reply_to } => {
                let _ = reply_to.send(self.vault.retry_unreleased(&caller));
            }
            VaultCommand::OptIn {
                caller,
                owner,
                reply_to,
            } => {
                let _ = reply_to.send(self.monitor.opt_in(&caller, owner));
            }
            VaultCommand::OptOut {
                caller,
                owner,
                reply_to,
            } => {
                let _ = reply_to.send(self.monitor.opt_out(&caller, &owner));
            }
            VaultCommand::SetMonitorEnabled {
                caller,
                enabled,
                reply_to,
            } => {
                let result = self
                    .monitor
                    .set_enabled(self.vault.access(), &caller, enabled);
                let _ = reply_to.send(result);
            }
            VaultCommand::RunRescue { reply_to } => {
                let scan = self.monitor.scan(&self.vault);
                let report = if scan.work_exists {
                    self.monitor.execute(&mut self.vault, scan.batch)
                } else {
                    ExecutionReport::default()
                };
                let _ = reply_to.send(report);
            }
            VaultCommand::GetPosition {
                position_id,
                reply_to,
            } => {
                let _ = reply_to.send(self.vault.position(position_id));
            }
            VaultCommand::GetPendingPosition { owner, reply_to } => {
                let _ = reply_to.send(self.vault.pending_position(&owner));
            }
            VaultCommand::GetStats { reply_to } => {
                let _ = reply_to.send(self.vault.stats());
            }
        }
    }
}

/// Cloneable address of a running vault
#[derive(Clone)]
pub struct VaultHandle {
    tx: mpsc::Sender<VaultCommand>,
}

impl VaultHandle {
    async fn call<T>(
        &self,
        make: impl FnOnce(ReplyTo<T>) -> VaultCommand,
    ) -> Result<T, VaultError> {
        let (reply_to, rx) = oneshot::channel();
        self.tx
            .send(make(reply_to))
            .await
            .map_err(|_| VaultError::ServiceStopped)?;
        rx.await.map_err(|_| VaultError::ServiceStopped)
    }

    pub async fn deposit(
        &self,
        owner: AccountId,
        assets: Vec<AssetId>,
        amounts: Vec<Decimal>,
        engine: EngineKind,
    ) -> Result<DepositReceipt, VaultError> {
        self.call(|reply_to| VaultCommand::Deposit {
            owner,
            assets,
            amounts,
            engine,
            reply_to,
        })
        .await?
    }

    pub async fn risk_callback(
        &self,
        caller: AccountId,
        request_id: RequestId,
        text: impl Into<String>,
    ) -> Result<Settlement, VaultError> {
        let text = text.into();
        self.call(|reply_to| VaultCommand::RiskCallback {
            caller,
            request_id,
            text,
            reply_to,
        })
        .await?
    }

    pub async fn manual_process(
        &self,
        caller: AccountId,
        request_id: RequestId,
        strategy: ManualStrategy,
        text: Option<String>,
    ) -> Result<Settlement, VaultError> {
        self.call(|reply_to| VaultCommand::ManualProcess {
            caller,
            request_id,
            strategy,
            text,
            reply_to,
        })
        .await?
    }

    pub async fn emergency_withdraw(&self, caller: AccountId) -> Result<Settlement, VaultError> {
        self.call(|reply_to| VaultCommand::EmergencyWithdraw { caller, reply_to })
            .await?
    }

    pub async fn redeem(
        &self,
        caller: AccountId,
        position_id: PositionId,
        burn: Decimal,
    ) -> Result<RedeemOutcome, VaultError> {
        self.call(|reply_to| VaultCommand::Redeem {
            caller,
            position_id,
            burn,
            reply_to,
        })
        .await?
    }

    pub async fn retry_dispatch(
        &self,
        caller: AccountId,
        request_id: RequestId,
    ) -> Result<ForwardOutcome, VaultError> {
        self.call(|reply_to| VaultCommand::RetryDispatch {
            caller,
            request_id,
            reply_to,
        })
        .await?
    }

    pub async fn grant_role(
        &self,
        caller: AccountId,
        role: Role,
        account: AccountId,
    ) -> Result<bool, VaultError> {
        self.call(|reply_to| VaultCommand::GrantRole {
            caller,
            role,
            account,
            reply_to,
        })
        .await?
    }

    pub async fn reset_circuit_breaker(&self, caller: AccountId) -> Result<(), VaultError> {
        self.call(|reply_to| VaultCommand::ResetBreaker { caller, reply_to })
            .await?
    }

    pub async fn retry_unreleased(&self, caller: AccountId) -> Result<usize, VaultError> {
        self.call(|reply_to| VaultCommand::RetryUnreleased { caller, reply_to })
            .await?
    }

    pub async fn opt_in(&self, caller: AccountId, owner: AccountId) -> Result<bool, VaultError> {
        self.call(|reply_to| VaultCommand::OptIn {
            caller,
            owner,
            reply_to,
        })
        .await?
    }

    pub async fn opt_out(&self, caller: AccountId, owner: AccountId) -> Result<bool, VaultError> {
        self.call(|reply_to| VaultCommand::OptOut {
            caller,
            owner,
            reply_to,
        })
        .await?
    }

    pub async fn set_monitor_enabled(
        &self,
        caller: AccountId,
        enabled: bool,
    ) -> Result<(), VaultError> {
        self.call(|reply_to| VaultCommand::SetMonitorEnabled {
            caller,
            enabled,
            reply_to,
        })
        .await?
    }

    pub async fn run_rescue(&self) -> Result<ExecutionReport, VaultError> {
        self.call(|reply_to| VaultCommand::RunRescue { reply_to })
            .await
    }

    pub async fn position(
        &self,
        position_id: PositionId,
    ) -> Result<Option<PositionSnapshot>, VaultError> {
        self.call(|reply_to| VaultCommand::GetPosition {
            position_id,
            reply_to,
        })
        .await
    }

    pub async fn pending_position(
        &self,
        owner: AccountId,
    ) -> Result<Option<PositionSnapshot>, VaultError> {
        self.call(|reply_to| VaultCommand::GetPendingPosition { owner, reply_to })
            .await
    }

    pub async fn stats(&self) -> Result<VaultStatsSnapshot, VaultError> {
        self.call(|reply_to| VaultCommand::GetStats { reply_to })
            .await
    }
}

/// Build the vault and its rescue monitor from config and run them on a tokio task.
///
/// `monitor_account` is the identity the monitor rescues as; it needs the
/// AutomationCaller role. The task ends once every handle is dropped.
pub fn spawn_vault(
    config: VaultConfig,
    deps: VaultDeps,
    monitor_account: AccountId,
) -> (VaultHandle, JoinHandle<()>) {
    let monitor = RescueMonitor::new(
        monitor_account,
        config.monitor.max_scan,
        config.monitor.enabled,
    )
    .with_observer(deps.observer.clone());
    let vault = Vault::new(config, deps);
    spawn(vault, monitor)
}

/// Run an already built vault and monitor
pub fn spawn(vault: Vault, monitor: RescueMonitor) -> (VaultHandle, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel(MAILBOX_CAPACITY);
    let service = vault.config().service_name.clone();
    let mut actor = VaultActor { vault, monitor };

    let task = tokio::spawn(async move {
        tracing::info!(service = %service, "Vault service started");
        while let Some(msg) = rx.recv().await {
            actor.handle(msg);
        }
        tracing::info!(service = %service, "Vault service stopped");
    });

    (VaultHandle { tx }, task)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::{self, KEEPER, PROCESSOR, ROUTER};
    use crate::{ChannelRiskEngine, InMemoryLedger, ManualClock};
    use rust_decimal_macros::dec;
    use std::sync::Arc;
    use std::time::Duration;

    struct Running {
        handle: VaultHandle,
        task: JoinHandle<()>,
        ledger: Arc<InMemoryLedger>,
        clock: ManualClock,
        queries: mpsc::UnboundedReceiver<crate::RiskQuery>,
    }

    fn start() -> Running {
        testkit::init_tracing();
        let (engine, queries) = ChannelRiskEngine::new();
        let ledger = Arc::new(InMemoryLedger::new());
        let clock = ManualClock::new(1_700_000_000_000);
        for user in ["alice", "bob"] {
            ledger.credit(&AccountId::from(user), &AssetId::from("DAI"), dec!(2000));
            ledger.credit(&AccountId::from(user), &AssetId::from("WETH"), dec!(1));
        }
        let deps = VaultDeps::new(Arc::new(engine), ledger.clone())
            .with_clock(Arc::new(clock.clone()));
        let (handle, task) = spawn_vault(testkit::test_config(), deps, AccountId::from(KEEPER));
        Running {
            handle,
            task,
            ledger,
            clock,
            queries,
        }
    }

    fn basket() -> (Vec<AssetId>, Vec<Decimal>) {
        (
            vec![AssetId::from("DAI"), AssetId::from("WETH")],
            vec![dec!(2000), dec!(1)],
        )
    }

    #[tokio::test]
    async fn test_worker_answers_dispatched_queries() {
        let mut running = start();
        let (assets, amounts) = basket();
        let receipt = running
            .handle
            .deposit(testkit::alice(), assets, amounts, EngineKind::Algorithmic)
            .await
            .unwrap();

        // Off-process risk worker
        let query = running.queries.recv().await.unwrap();
        let settlement = running
            .handle
            .risk_callback(
                AccountId::from(ROUTER),
                query.request_id,
                "RATIO:140 CONFIDENCE:80 SOURCE:ALGORITHMIC_AI",
            )
            .await
            .unwrap();

        let Settlement::Minted(position) = settlement else {
            panic!("expected mint");
        };
        assert_eq!(position.id, receipt.position_id);
        assert_eq!(position.minted, dec!(2857.14285714));
        assert_eq!(running.handle.stats().await.unwrap().positions_finalized, 1);
    }

    #[tokio::test]
    async fn test_concurrent_deposits_are_single_flight() {
        let running = start();
        let (assets, amounts) = basket();
        let half: Vec<_> = amounts.iter().map(|a| a / dec!(2)).collect();

        let (a, b) = tokio::join!(
            running.handle.deposit(
                testkit::alice(),
                assets.clone(),
                half.clone(),
                EngineKind::Algorithmic
            ),
            running
                .handle
                .deposit(testkit::alice(), assets, half, EngineKind::Algorithmic),
        );

        assert_eq!([a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count(), 1);
        let err = a.err().or(b.err()).unwrap();
        assert!(err.is_state_conflict());
        assert_eq!(
            running
                .ledger
                .wallet_balance(&testkit::alice(), &AssetId::from("DAI")),
            dec!(1000)
        );
    }

    #[tokio::test]
    async fn test_scheduler_tick_rescues_opted_in_owner() {
        let running = start();
        let (assets, amounts) = basket();
        let bob = AccountId::from("bob");

        for owner in [testkit::alice(), bob.clone()] {
            running
                .handle
                .deposit(owner, assets.clone(), amounts.clone(), EngineKind::TestFailureInjection)
                .await
                .unwrap();
        }
        assert!(running
            .handle
            .opt_in(testkit::alice(), testkit::alice())
            .await
            .unwrap());
        // Bob cannot enroll or remove anyone but themselves
        assert!(running
            .handle
            .opt_out(bob.clone(), testkit::alice())
            .await
            .is_err());
        assert!(running
            .handle
            .opt_in(bob.clone(), testkit::alice())
            .await
            .is_err());

        running.clock.advance(Duration::from_secs(4 * 60 * 60 + 60));
        let report = running.handle.run_rescue().await.unwrap();

        assert_eq!(report.rescued.len(), 1);
        assert_eq!(report.rescued[0].owner, testkit::alice());
        assert!(running
            .handle
            .pending_position(testkit::alice())
            .await
            .unwrap()
            .is_none());
        // Not opted in, so only the owner path applies
        assert!(running.handle.pending_position(bob.clone()).await.unwrap().is_some());
        running.handle.emergency_withdraw(bob.clone()).await.unwrap();
        assert_eq!(
            running.ledger.wallet_balance(&bob, &AssetId::from("WETH")),
            dec!(1)
        );
    }

    #[tokio::test]
    async fn test_manual_processing_through_handle() {
        let running = start();
        let (assets, amounts) = basket();
        let receipt = running
            .handle
            .deposit(testkit::alice(), assets, amounts, EngineKind::ManualOnly)
            .await
            .unwrap();

        let settlement = running
            .handle
            .manual_process(
                AccountId::from(PROCESSOR),
                receipt.request_id,
                ManualStrategy::EmergencyReturn,
                None,
            )
            .await
            .unwrap();
        assert!(matches!(settlement, Settlement::Returned { .. }));
    }

    #[tokio::test]
    async fn test_service_stops_when_handles_drop() {
        let running = start();
        let Running { handle, task, .. } = running;
        drop(handle);
        task.await.unwrap();
    }
}
