//! Collateral and synthetic-currency ledger seam

use crate::{AccountId, AssetId, Basket};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::RwLock;

/// Token movements the vault needs, without their transfer mechanics
pub trait CollateralLedger: Send + Sync + 'static {
    /// Pull `basket` from the owner's wallet into vault custody
    fn lock(&self, owner: &AccountId, basket: &Basket) -> Result<(), LedgerError>;
    /// Return `basket` from custody to the owner
    fn release(&self, owner: &AccountId, basket: &Basket) -> Result<(), LedgerError>;
    /// Issue synthetic units to the owner
    fn mint(&self, owner: &AccountId, amount: Decimal) -> Result<(), LedgerError>;
    /// Destroy synthetic units held by the owner
    fn burn(&self, owner: &AccountId, amount: Decimal) -> Result<(), LedgerError>;
}

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("{owner} holds {available} {asset}, needs {required}")]
    InsufficientBalance {
        owner: AccountId,
        asset: Box<str>,
        available: Decimal,
        required: Decimal,
    },
    #[error("custody holds {available} {asset}, cannot release {required}")]
    CustodyShortfall {
        asset: AssetId,
        available: Decimal,
        required: Decimal,
    },
    #[error("Storage error: {0}")]
    Storage(Box<str>),
}

/// Symbol used for the synthetic currency in error messages
const SYNTHETIC: &str = "SYNTH";

#[derive(Default)]
struct Balances {
    wallets: HashMap<(AccountId, AssetId), Decimal>,
    custody: HashMap<AssetId, Decimal>,
    synthetic: HashMap<AccountId, Decimal>,
    synthetic_supply: Decimal,
}

/// In-memory ledger
#[derive(Default)]
pub struct InMemoryLedger {
    data: RwLock<Balances>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fund an owner's wallet (test and simulation setup)
    pub fn credit(&self, owner: &AccountId, asset: &AssetId, amount: Decimal) {
        if let Ok(mut data) = self.data.write() {
            *data
                .wallets
                .entry((owner.clone(), asset.clone()))
                .or_default() += amount;
        }
    }

    pub fn wallet_balance(&self, owner: &AccountId, asset: &AssetId) -> Decimal {
        self.data
            .read()
            .ok()
            .and_then(|d| d.wallets.get(&(owner.clone(), asset.clone())).copied())
            .unwrap_or_default()
    }

    pub fn custody_balance(&self, asset: &AssetId) -> Decimal {
        self.data
            .read()
            .ok()
            .and_then(|d| d.custody.get(asset).copied())
            .unwrap_or_default()
    }

    pub fn synthetic_balance(&self, owner: &AccountId) -> Decimal {
        self.data
            .read()
            .ok()
            .and_then(|d| d.synthetic.get(owner).copied())
            .unwrap_or_default()
    }

    pub fn synthetic_supply(&self) -> Decimal {
        self.data
            .read()
            .map(|d| d.synthetic_supply)
            .unwrap_or_default()
    }
}

fn poisoned(e: impl std::fmt::Display) -> LedgerError {
    LedgerError::Storage(e.to_string().into())
}

impl CollateralLedger for InMemoryLedger {
    fn lock(&self, owner: &AccountId, basket: &Basket) -> Result<(), LedgerError> {
        let mut data = self.data.write().map_err(poisoned)?;
        // Check everything first so a short wallet moves nothing
        for entry in basket.iter() {
            let available = data
                .wallets
                .get(&(owner.clone(), entry.asset.clone()))
                .copied()
                .unwrap_or_default();
            if available < entry.amount {
                return Err(LedgerError::InsufficientBalance {
                    owner: owner.clone(),
                    asset: entry.asset.as_str().into(),
                    available,
                    required: entry.amount,
                });
            }
        }
        for entry in basket.iter() {
            *data
                .wallets
                .entry((owner.clone(), entry.asset.clone()))
                .or_default() -= entry.amount;
            *data.custody.entry(entry.asset.clone()).or_default() += entry.amount;
        }
        Ok(())
    }

    fn release(&self, owner: &AccountId, basket: &Basket) -> Result<(), LedgerError> {
        let mut data = self.data.write().map_err(poisoned)?;
        for entry in basket.iter() {
            let available = data.custody.get(&entry.asset).copied().unwrap_or_default();
            if available < entry.amount {
                return Err(LedgerError::CustodyShortfall {
                    asset: entry.asset.clone(),
                    available,
                    required: entry.amount,
                });
            }
        }
        for entry in basket.iter() {
            *data.custody.entry(entry.asset.clone()).or_default() -= entry.amount;
            *data
                .wallets
                .entry((owner.clone(), entry.asset.clone()))
                .or_default() += entry.amount;
        }
        Ok(())
    }

    fn mint(&self, owner: &AccountId, amount: Decimal) -> Result<(), LedgerError> {
        let mut data = self.data.write().map_err(poisoned)?;
        *data.synthetic.entry(owner.clone()).or_default() += amount;
        data.synthetic_supply += amount;
        Ok(())
    }

    fn burn(&self, owner: &AccountId, amount: Decimal) -> Result<(), LedgerError> {
        let mut data = self.data.write().map_err(poisoned)?;
        let available = data.synthetic.get(owner).copied().unwrap_or_default();
        if available < amount {
            return Err(LedgerError::InsufficientBalance {
                owner: owner.clone(),
                asset: SYNTHETIC.into(),
                available,
                required: amount,
            });
        }
        *data.synthetic.entry(owner.clone()).or_default() -= amount;
        data.synthetic_supply -= amount;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_lock_is_all_or_nothing() {
        let ledger = InMemoryLedger::new();
        let alice = AccountId::from("alice");
        ledger.credit(&alice, &AssetId::from("DAI"), dec!(2000));

        let basket = Basket::new([
            (AssetId::from("DAI"), dec!(2000)),
            (AssetId::from("WETH"), dec!(1)),
        ])
        .unwrap();
        assert!(matches!(
            ledger.lock(&alice, &basket),
            Err(LedgerError::InsufficientBalance { .. })
        ));
        assert_eq!(ledger.wallet_balance(&alice, &AssetId::from("DAI")), dec!(2000));
        assert_eq!(ledger.custody_balance(&AssetId::from("DAI")), dec!(0));
    }

    #[test]
    fn test_lock_release_roundtrip_and_synthetic_supply() {
        let ledger = InMemoryLedger::new();
        let alice = AccountId::from("alice");
        let dai = AssetId::from("DAI");
        ledger.credit(&alice, &dai, dec!(100));
        let basket = Basket::new([(dai.clone(), dec!(60))]).unwrap();

        ledger.lock(&alice, &basket).unwrap();
        assert_eq!(ledger.custody_balance(&dai), dec!(60));
        ledger.release(&alice, &basket).unwrap();
        assert_eq!(ledger.wallet_balance(&alice, &dai), dec!(100));

        ledger.mint(&alice, dec!(40)).unwrap();
        assert!(ledger.burn(&alice, dec!(41)).is_err());
        ledger.burn(&alice, dec!(15)).unwrap();
        assert_eq!(ledger.synthetic_balance(&alice), dec!(25));
        assert_eq!(ledger.synthetic_supply(), dec!(25));
    }
}
