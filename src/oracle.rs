//! Price oracle adapter with staleness detection and static fallback
//!
//! Valuation never fails for a supported asset. A feed that errors, reports
//! a non-positive price, or has not updated within the staleness threshold
//! is replaced by the configured static price. Collateral valuation must not
//! block a deposit or a withdrawal.

use crate::{AssetId, Basket, Clock};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Latest reading from an external price source
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PriceSample {
    pub price: Decimal,
    pub updated_at_millis: u64,
}

/// External price source for one asset
pub trait PriceFeed: Send + Sync + 'static {
    fn latest(&self) -> Result<PriceSample, Box<str>>;
}

/// Where a quote came from
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PriceSource {
    Feed,
    /// Feed missing, stale, or broken; static price used
    Fallback,
    /// Feed stale and no static price configured; stale price used
    StaleFeed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PriceQuote {
    pub price: Decimal,
    pub source: PriceSource,
}

/// Wraps per-asset feeds with a staleness verdict and static fallback prices
pub struct PriceOracleAdapter {
    feeds: HashMap<AssetId, Arc<dyn PriceFeed>>,
    static_prices: HashMap<AssetId, Decimal>,
    staleness_threshold_millis: u64,
    clock: Arc<dyn Clock>,
}

impl PriceOracleAdapter {
    pub fn new(staleness_threshold_millis: u64, clock: Arc<dyn Clock>) -> Self {
        Self {
            feeds: HashMap::new(),
            static_prices: HashMap::new(),
            staleness_threshold_millis,
            clock,
        }
    }

    pub fn with_feed(mut self, asset: AssetId, feed: Arc<dyn PriceFeed>) -> Self {
        self.feeds.insert(asset, feed);
        self
    }

    pub fn with_static_price(mut self, asset: AssetId, price: Decimal) -> Self {
        self.static_prices.insert(asset, price);
        self
    }

    pub fn set_feed(&mut self, asset: AssetId, feed: Arc<dyn PriceFeed>) {
        self.feeds.insert(asset, feed);
    }

    pub fn set_static_price(&mut self, asset: AssetId, price: Decimal) {
        self.static_prices.insert(asset, price);
    }

    pub fn supports(&self, asset: &AssetId) -> bool {
        self.feeds.contains_key(asset) || self.static_prices.contains_key(asset)
    }

    /// First asset in `basket` with neither a feed nor a static price
    pub fn first_unsupported<'a>(&self, basket: &'a Basket) -> Option<&'a AssetId> {
        basket.iter().map(|e| &e.asset).find(|a| !self.supports(a))
    }

    /// Current price, `None` only for unsupported assets
    pub fn quote(&self, asset: &AssetId) -> Option<PriceQuote> {
        let fallback = self.static_prices.get(asset).copied();
        let Some(feed) = self.feeds.get(asset) else {
            return fallback.map(|price| PriceQuote {
                price,
                source: PriceSource::Fallback,
            });
        };

        let sample = match feed.latest() {
            Ok(sample) if sample.price > Decimal::ZERO => sample,
            Ok(sample) => {
                tracing::warn!(asset = %asset, price = %sample.price, "Non-positive feed price, using fallback");
                return fallback.map(|price| PriceQuote {
                    price,
                    source: PriceSource::Fallback,
                });
            }
            Err(error) => {
                tracing::warn!(asset = %asset, error = %error, "Price feed error, using fallback");
                return fallback.map(|price| PriceQuote {
                    price,
                    source: PriceSource::Fallback,
                });
            }
        };

        let age = self
            .clock
            .now_millis()
            .saturating_sub(sample.updated_at_millis);
        if age <= self.staleness_threshold_millis {
            return Some(PriceQuote {
                price: sample.price,
                source: PriceSource::Feed,
            });
        }

        match fallback {
            Some(price) => {
                tracing::warn!(asset = %asset, age_ms = age, "Price feed stale, using static price");
                Some(PriceQuote {
                    price,
                    source: PriceSource::Fallback,
                })
            }
            None => {
                tracing::warn!(asset = %asset, age_ms = age, "Price feed stale and no static price configured");
                Some(PriceQuote {
                    price: sample.price,
                    source: PriceSource::StaleFeed,
                })
            }
        }
    }

    /// USD value of `amount` units of `asset`
    pub fn value_of(&self, asset: &AssetId, amount: Decimal) -> Option<Decimal> {
        self.quote(asset)
            .and_then(|q| q.price.checked_mul(amount))
    }

    /// USD value of a whole basket, `None` if any asset is unsupported
    pub fn value_basket(&self, basket: &Basket) -> Option<Decimal> {
        basket.iter().try_fold(Decimal::ZERO, |acc, e| {
            self.value_of(&e.asset, e.amount)
                .and_then(|v| acc.checked_add(v))
        })
    }

    /// Current prices for the basket's assets in the basket wire encoding
    pub fn encode_prices(&self, basket: &Basket) -> String {
        basket
            .iter()
            .filter_map(|e| {
                self.quote(&e.asset)
                    .map(|q| format!("{}:{}", e.asset, q.price.normalize()))
            })
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Settable in-process feed, used for fixed deployments and tests
#[derive(Default)]
pub struct StaticFeed {
    sample: RwLock<Option<PriceSample>>,
}

impl StaticFeed {
    pub fn new(price: Decimal, updated_at_millis: u64) -> Self {
        Self {
            sample: RwLock::new(Some(PriceSample {
                price,
                updated_at_millis,
            })),
        }
    }

    pub fn update(&self, price: Decimal, updated_at_millis: u64) {
        if let Ok(mut sample) = self.sample.write() {
            *sample = Some(PriceSample {
                price,
                updated_at_millis,
            });
        }
    }

    pub fn clear(&self) {
        if let Ok(mut sample) = self.sample.write() {
            *sample = None;
        }
    }
}

impl PriceFeed for StaticFeed {
    fn latest(&self) -> Result<PriceSample, Box<str>> {
        let sample = self.sample.read().map_err(|e| e.to_string().into_boxed_str())?;
        (*sample).ok_or_else(|| "no price published".into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ManualClock;
    use rust_decimal_macros::dec;
    use std::time::Duration;

    const HOUR: u64 = 3_600_000;

    fn weth() -> AssetId {
        AssetId::from("WETH")
    }

    #[test]
    fn test_fresh_feed_is_used() {
        let clock = ManualClock::new(10 * HOUR);
        let feed = Arc::new(StaticFeed::new(dec!(2000), 10 * HOUR - 1000));
        let oracle = PriceOracleAdapter::new(HOUR, Arc::new(clock))
            .with_feed(weth(), feed)
            .with_static_price(weth(), dec!(1800));

        let quote = oracle.quote(&weth()).unwrap();
        assert_eq!(quote.price, dec!(2000));
        assert_eq!(quote.source, PriceSource::Feed);
        assert_eq!(oracle.value_of(&weth(), dec!(0.5)), Some(dec!(1000)));
    }

    #[test]
    fn test_stale_feed_falls_back_to_static() {
        let clock = ManualClock::new(10 * HOUR);
        let feed = Arc::new(StaticFeed::new(dec!(2000), 10 * HOUR));
        let oracle = PriceOracleAdapter::new(HOUR, Arc::new(clock.clone()))
            .with_feed(weth(), feed)
            .with_static_price(weth(), dec!(1800));

        clock.advance(Duration::from_millis(HOUR + 1));
        let quote = oracle.quote(&weth()).unwrap();
        assert_eq!(quote.price, dec!(1800));
        assert_eq!(quote.source, PriceSource::Fallback);
    }

    #[test]
    fn test_broken_feed_without_static_is_unpriced() {
        let clock = ManualClock::new(0);
        let feed = Arc::new(StaticFeed::default());
        let oracle = PriceOracleAdapter::new(HOUR, Arc::new(clock)).with_feed(weth(), feed);

        assert!(oracle.supports(&weth()));
        assert_eq!(oracle.quote(&weth()), None);
    }

    #[test]
    fn test_stale_feed_without_static_degrades_to_stale_price() {
        let clock = ManualClock::new(5 * HOUR);
        let feed = Arc::new(StaticFeed::new(dec!(2000), 0));
        let oracle = PriceOracleAdapter::new(HOUR, Arc::new(clock)).with_feed(weth(), feed);

        let quote = oracle.quote(&weth()).unwrap();
        assert_eq!(quote.source, PriceSource::StaleFeed);
        assert_eq!(quote.price, dec!(2000));
    }

    #[test]
    fn test_basket_value_and_price_encoding() {
        let clock = ManualClock::new(0);
        let oracle = PriceOracleAdapter::new(HOUR, Arc::new(clock))
            .with_static_price(AssetId::from("DAI"), dec!(1.00))
            .with_static_price(weth(), dec!(2000));
        let basket = Basket::new([(AssetId::from("DAI"), dec!(2000)), (weth(), dec!(1))]).unwrap();

        assert_eq!(oracle.value_basket(&basket), Some(dec!(4000)));
        assert_eq!(oracle.encode_prices(&basket), "DAI:1,WETH:2000");

        let unknown = Basket::new([(AssetId::from("XYZ"), dec!(1))]).unwrap();
        assert_eq!(oracle.first_unsupported(&unknown), Some(&AssetId::from("XYZ")));
        assert_eq!(oracle.value_basket(&unknown), None);
    }
}
