//! In-memory price source for tests and demos.

use std::collections::BTreeMap;

use chrono::NaiveDate;

use crate::market_data::{MarketData, PriceSeries};
use crate::ports::MarketDataSource;
use crate::{Error, Result};

/// Price source backed by a map of symbol to observations.
///
/// The dataset version is ignored.
#[derive(Debug, Clone, Default)]
pub struct InMemoryMarketData {
    series: BTreeMap<String, Vec<(NaiveDate, f64)>>,
}

impl InMemoryMarketData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_series(mut self, symbol: impl Into<String>, points: Vec<(NaiveDate, f64)>) -> Self {
        self.series.insert(symbol.into(), points);
        self
    }

    /// Expose every column of a table as a separate series.
    pub fn from_market_data(market_data: &MarketData) -> Self {
        let series = market_data
            .symbols()
            .into_iter()
            .filter_map(|symbol| {
                market_data.column(symbol).map(|prices| {
                    let points = market_data
                        .dates()
                        .iter()
                        .copied()
                        .zip(prices.iter().copied())
                        .filter(|(_, p)| p.is_finite())
                        .collect();
                    (symbol.to_string(), points)
                })
            })
            .collect();
        Self { series }
    }

    pub fn symbols(&self) -> Vec<&str> {
        self.series.keys().map(String::as_str).collect()
    }
}

impl MarketDataSource for InMemoryMarketData {
    fn load(&self, symbol: &str, version: &str) -> Result<PriceSeries> {
        self.series
            .get(symbol)
            .map(|points| PriceSeries::new(symbol, points.clone()))
            .ok_or_else(|| {
                Error::InvalidInput(format!(
                    "no prices for '{}' in dataset '{}'",
                    symbol, version
                ))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 2, d).unwrap()
    }

    #[test]
    fn test_load_known_and_unknown() {
        let source = InMemoryMarketData::new().with_series("AAPL", vec![(day(1), 185.0)]);

        let series = source.load("AAPL", "v1").unwrap();
        assert_eq!(series.symbol, "AAPL");
        assert_eq!(series.len(), 1);

        let err = source.load("MSFT", "v1").unwrap_err();
        assert!(err.to_string().contains("MSFT"));
    }

    #[test]
    fn test_from_market_data_drops_missing() {
        let table = MarketData::new(vec![day(1), day(2)])
            .unwrap()
            .with_column("AAPL", vec![f64::NAN, 186.0])
            .unwrap();
        let source = InMemoryMarketData::from_market_data(&table);

        assert_eq!(source.symbols(), vec!["AAPL"]);
        assert_eq!(source.load("AAPL", "").unwrap().points, vec![(day(2), 186.0)]);
    }
}
