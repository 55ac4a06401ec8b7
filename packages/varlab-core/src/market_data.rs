//! Time-indexed market data table.
//!
//! Prices are stored per symbol in columns aligned to a shared ascending date
//! index. `NaN` marks a missing observation. A row-indexed snapshot of closing
//! quotes can be attached for symbols that have no time series.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::Range;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Closing prices for a single symbol, as delivered by a data source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PriceSeries {
    /// Symbol identifier
    pub symbol: String,
    /// `(date, close)` observations
    pub points: Vec<(NaiveDate, f64)>,
}

impl PriceSeries {
    pub fn new(symbol: impl Into<String>, points: Vec<(NaiveDate, f64)>) -> Self {
        Self {
            symbol: symbol.into(),
            points,
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Price table keyed by symbol, aligned on business days.
#[derive(Debug, Clone, Default)]
pub struct MarketData {
    dates: Vec<NaiveDate>,
    columns: BTreeMap<String, Vec<f64>>,
    quotes: BTreeMap<String, f64>,
}

impl MarketData {
    /// Create an empty table over a strictly ascending date index.
    pub fn new(dates: Vec<NaiveDate>) -> Result<Self> {
        if dates.windows(2).any(|pair| pair[0] >= pair[1]) {
            return Err(Error::InvalidInput(
                "market data dates must be strictly ascending".to_string(),
            ));
        }
        Ok(Self {
            dates,
            columns: BTreeMap::new(),
            quotes: BTreeMap::new(),
        })
    }

    /// Add a price column aligned to the date index.
    pub fn with_column(mut self, symbol: impl Into<String>, prices: Vec<f64>) -> Result<Self> {
        let symbol = symbol.into();
        if prices.len() != self.dates.len() {
            return Err(Error::InvalidInput(format!(
                "column '{}' has {} prices for {} dates",
                symbol,
                prices.len(),
                self.dates.len()
            )));
        }
        self.columns.insert(symbol, prices);
        Ok(self)
    }

    /// Add a row-indexed closing quote.
    pub fn with_quote(mut self, symbol: impl Into<String>, close: f64) -> Self {
        self.quotes.insert(symbol.into(), close);
        self
    }

    /// Outer-join per-symbol series on their dates and forward-fill gaps.
    ///
    /// Rows before a symbol's first observation stay missing.
    pub fn from_series(series: Vec<PriceSeries>) -> Result<Self> {
        let dates: Vec<NaiveDate> = series
            .iter()
            .flat_map(|s| s.points.iter().map(|(date, _)| *date))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let mut table = Self::new(dates)?;

        for s in series {
            // Later duplicates of a date win
            let observed: BTreeMap<NaiveDate, f64> = s.points.into_iter().collect();
            let mut last = f64::NAN;
            let column = table
                .dates
                .iter()
                .map(|date| {
                    if let Some(price) = observed.get(date).filter(|p| p.is_finite()) {
                        last = *price;
                    }
                    last
                })
                .collect();
            table.columns.insert(s.symbol, column);
        }

        Ok(table)
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    /// Number of rows in the date index.
    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    pub fn symbols(&self) -> Vec<&str> {
        self.columns.keys().map(String::as_str).collect()
    }

    pub fn has_column(&self, symbol: &str) -> bool {
        self.columns.contains_key(symbol)
    }

    pub fn column(&self, symbol: &str) -> Option<&[f64]> {
        self.columns.get(symbol).map(Vec::as_slice)
    }

    pub fn quote(&self, symbol: &str) -> Option<f64> {
        self.quotes.get(symbol).copied()
    }

    /// Most recent price: last finite value of the column, else the row quote.
    pub fn latest_price(&self, symbol: &str) -> Option<f64> {
        self.columns
            .get(symbol)
            .and_then(|prices| prices.iter().rev().copied().find(|p| p.is_finite()))
            .or_else(|| self.quote(symbol))
    }

    /// Percentage changes of a column's non-missing prices.
    ///
    /// Each return is labelled with the row index of the later observation.
    pub fn returns(&self, symbol: &str) -> Vec<(usize, f64)> {
        let Some(prices) = self.columns.get(symbol) else {
            return Vec::new();
        };

        let observed: Vec<(usize, f64)> = prices
            .iter()
            .copied()
            .enumerate()
            .filter(|(_, p)| p.is_finite())
            .collect();

        observed
            .windows(2)
            .map(|pair| (pair[1].0, pair[1].1 / pair[0].1 - 1.0))
            .filter(|(_, r)| r.is_finite())
            .collect()
    }

    /// Copy of a contiguous range of rows. Quotes are carried over.
    pub fn rows(&self, range: Range<usize>) -> Self {
        let end = range.end.min(self.dates.len());
        let start = range.start.min(end);
        Self {
            dates: self.dates[start..end].to_vec(),
            columns: self
                .columns
                .iter()
                .map(|(symbol, prices)| (symbol.clone(), prices[start..end].to_vec()))
                .collect(),
            quotes: self.quotes.clone(),
        }
    }

    /// Copy of the most recent `n` rows.
    pub fn tail(&self, n: usize) -> Self {
        let len = self.dates.len();
        self.rows(len.saturating_sub(n)..len)
    }

    /// Multiply one symbol's prices (column and quote) by `factor`.
    ///
    /// Returns false when the symbol is unknown.
    pub fn scale_symbol(&mut self, symbol: &str, factor: f64) -> bool {
        let mut found = false;
        if let Some(prices) = self.columns.get_mut(symbol) {
            prices.iter_mut().for_each(|p| *p *= factor);
            found = true;
        }
        if let Some(close) = self.quotes.get_mut(symbol) {
            *close *= factor;
            found = true;
        }
        found
    }

    /// Multiply every column and quote by `factor`.
    pub fn scale_all(&mut self, factor: f64) {
        self.columns
            .values_mut()
            .flat_map(|prices| prices.iter_mut())
            .for_each(|p| *p *= factor);
        self.quotes.values_mut().for_each(|close| *close *= factor);
    }
}
