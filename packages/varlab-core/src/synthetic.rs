//! Seeded synthetic price histories for demos and calibration tests.

use chrono::{Datelike, Duration, NaiveDate, Weekday};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, StandardNormal};

use crate::market_data::MarketData;
use crate::{Error, Result};

/// Business-day random walk generator.
///
/// Daily returns are `drift + volatility * z`. With a correlation `rho`, each
/// symbol's shock is `sqrt(rho) * market + sqrt(1 - rho) * idiosyncratic`.
#[derive(Debug, Clone)]
pub struct SyntheticMarket {
    seed: u64,
    drift: f64,
    volatility: f64,
    correlation: f64,
    start_price: f64,
}

impl SyntheticMarket {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            drift: 0.0003,
            volatility: 0.02,
            correlation: 0.0,
            start_price: 100.0,
        }
    }

    pub fn with_drift(mut self, drift: f64) -> Self {
        self.drift = drift;
        self
    }

    pub fn with_volatility(mut self, volatility: f64) -> Self {
        self.volatility = volatility;
        self
    }

    /// Pairwise correlation of daily shocks, in `[0, 1]`.
    pub fn with_correlation(mut self, correlation: f64) -> Self {
        self.correlation = correlation;
        self
    }

    pub fn with_start_price(mut self, start_price: f64) -> Self {
        self.start_price = start_price;
        self
    }

    /// Generate `days` business days of prices for each symbol, starting at `start`.
    pub fn generate(&self, symbols: &[&str], start: NaiveDate, days: usize) -> Result<MarketData> {
        if symbols.is_empty() || days == 0 {
            return Err(Error::InvalidInput(
                "synthetic market needs at least one symbol and one day".to_string(),
            ));
        }
        if !(self.volatility.is_finite() && self.volatility >= 0.0) {
            return Err(Error::InvalidInput(format!(
                "volatility must be non-negative, got {}",
                self.volatility
            )));
        }
        if !(0.0..=1.0).contains(&self.correlation) {
            return Err(Error::InvalidInput(format!(
                "correlation must be in [0, 1], got {}",
                self.correlation
            )));
        }
        if !(self.start_price.is_finite() && self.start_price > 0.0) {
            return Err(Error::InvalidInput(format!(
                "start price must be positive, got {}",
                self.start_price
            )));
        }

        let mut rng = StdRng::seed_from_u64(self.seed);
        let common = self.correlation.sqrt();
        let idiosyncratic = (1.0 - self.correlation).sqrt();

        let mut columns = vec![Vec::with_capacity(days); symbols.len()];
        let mut prices = vec![self.start_price; symbols.len()];

        for _ in 0..days {
            let market: f64 = StandardNormal.sample(&mut rng);
            for (price, column) in prices.iter_mut().zip(columns.iter_mut()) {
                let own: f64 = StandardNormal.sample(&mut rng);
                let z = common * market + idiosyncratic * own;
                *price *= 1.0 + self.drift + self.volatility * z;
                column.push(*price);
            }
        }

        let mut table = MarketData::new(business_days(start, days))?;
        for (symbol, column) in symbols.iter().zip(columns) {
            table = table.with_column(*symbol, column)?;
        }

        tracing::debug!(seed = self.seed, symbols = symbols.len(), days, "Generated synthetic market");
        Ok(table)
    }
}

/// The first `count` weekdays on or after `start`.
pub fn business_days(start: NaiveDate, count: usize) -> Vec<NaiveDate> {
    let mut dates = Vec::with_capacity(count);
    let mut day = start;
    while dates.len() < count {
        if !matches!(day.weekday(), Weekday::Sat | Weekday::Sun) {
            dates.push(day);
        }
        day += Duration::days(1);
    }
    dates
}
