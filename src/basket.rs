//! Collateral baskets and their wire encoding
//!
//! The encoding sent to the risk engine is comma-joined `SYMBOL:amount`
//! pairs (`DAI:1000,WETH:0.5`). Symbols are not escaped: a symbol containing
//! `,` or `:` produces an ambiguous string. Deployments list only plain
//! ticker symbols, so this is kept as-is.

use crate::{AssetId, BasketError};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// Decimal places kept on minted amounts and collateral payouts
pub const AMOUNT_SCALE: u32 = 8;

/// Truncate toward zero at [`AMOUNT_SCALE`]
pub fn round_down(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(AMOUNT_SCALE, RoundingStrategy::ToZero)
}

/// One collateral entry
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasketEntry {
    pub asset: AssetId,
    pub amount: Decimal,
}

/// Ordered collateral entries, asset IDs unique
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Basket {
    entries: Vec<BasketEntry>,
}

impl Basket {
    /// Build a validated basket from (asset, amount) pairs
    pub fn new<I>(entries: I) -> Result<Self, BasketError>
    where
        I: IntoIterator<Item = (AssetId, Decimal)>,
    {
        let mut basket = Self::default();
        for (asset, amount) in entries {
            if amount <= Decimal::ZERO {
                return Err(BasketError::NonPositiveAmount(asset));
            }
            if basket.amount_of(&asset).is_some() {
                return Err(BasketError::DuplicateAsset(asset));
            }
            basket.entries.push(BasketEntry { asset, amount });
        }
        if basket.entries.is_empty() {
            return Err(BasketError::Empty);
        }
        Ok(basket)
    }

    /// Build a basket from parallel asset/amount arrays
    pub fn from_parts(assets: &[AssetId], amounts: &[Decimal]) -> Result<Self, BasketError> {
        if assets.len() != amounts.len() {
            return Err(BasketError::LengthMismatch {
                assets: assets.len(),
                amounts: amounts.len(),
            });
        }
        Self::new(assets.iter().cloned().zip(amounts.iter().copied()))
    }

    pub fn entries(&self) -> &[BasketEntry] {
        &self.entries
    }

    pub fn iter(&self) -> impl Iterator<Item = &BasketEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn amount_of(&self, asset: &AssetId) -> Option<Decimal> {
        self.entries
            .iter()
            .find(|e| &e.asset == asset)
            .map(|e| e.amount)
    }

    /// Wire encoding for the risk engine
    pub fn encode(&self) -> String {
        self.entries
            .iter()
            .map(|e| format!("{}:{}", e.asset, e.amount.normalize()))
            .collect::<Vec<_>>()
            .join(",")
    }

    /// `amount * numerator / denominator` per entry, rounded down.
    ///
    /// Entries that round to zero are kept with a zero amount so the result
    /// lines up index-for-index with `self`.
    pub(crate) fn pro_rata(
        &self,
        numerator: Decimal,
        denominator: Decimal,
    ) -> Result<Basket, BasketError> {
        let entries = self
            .entries
            .iter()
            .map(|e| {
                e.amount
                    .checked_mul(numerator)
                    .and_then(|v| v.checked_div(denominator))
                    .map(|v| BasketEntry {
                        asset: e.asset.clone(),
                        amount: round_down(v),
                    })
                    .ok_or(BasketError::Overflow)
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Basket { entries })
    }

    /// Subtract a pro-rata payout computed from this basket
    pub(crate) fn deduct(&mut self, payout: &Basket) {
        for entry in self.entries.iter_mut() {
            if let Some(paid) = payout.amount_of(&entry.asset) {
                entry.amount = (entry.amount - paid).max(Decimal::ZERO);
            }
        }
    }

    /// Drop zero-amount entries (payout baskets only)
    pub(crate) fn without_zeros(mut self) -> Basket {
        self.entries.retain(|e| !e.amount.is_zero());
        self
    }
}
