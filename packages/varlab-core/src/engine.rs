//! Risk analytics engine: valuation, VaR, CVaR, Greeks and stress P&L.
//!
//! All calculations use signed returns; a loss is a negative number.

use std::collections::BTreeMap;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::market_data::MarketData;
use crate::stats::{mean, norm_ppf, percentile, sample_std, tail_mean};
use crate::types::{confidence_label, Greeks, Portfolio, StressScenario, VarMethod};
use crate::{Error, Result};

/// Parameters for a VaR or CVaR calculation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VarParams {
    pub method: VarMethod,
    pub confidence_levels: Vec<f64>,
    /// Number of most recent daily returns used
    pub window_days: usize,
}

impl Default for VarParams {
    fn default() -> Self {
        Self {
            method: VarMethod::Historical,
            confidence_levels: vec![0.95, 0.99],
            window_days: 250,
        }
    }
}

impl VarParams {
    pub fn new(method: VarMethod, confidence_levels: Vec<f64>, window_days: usize) -> Self {
        Self {
            method,
            confidence_levels,
            window_days,
        }
    }

    /// Check confidence levels lie strictly inside (0, 1) and the window fits the method.
    pub fn validate(&self) -> Result<()> {
        if let Some(level) = self
            .confidence_levels
            .iter()
            .copied()
            .find(|c| !(*c > 0.0 && *c < 1.0))
        {
            return Err(Error::InvalidConfidence(level));
        }
        let minimum = match self.method {
            VarMethod::Historical => 1,
            // sample standard deviation needs two returns
            VarMethod::Parametric => 2,
        };
        if self.window_days < minimum {
            return Err(Error::InvalidInput(format!(
                "{} VaR window must contain at least {} day(s), got {}",
                self.method, minimum, self.window_days
            )));
        }
        Ok(())
    }
}

/// Outcome of one stress scenario.
///
/// A scenario that could not be valued carries `error` and no values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StressRow {
    pub scenario: String,
    pub base_npv: f64,
    pub stressed_npv: Option<f64>,
    pub pnl: Option<f64>,
    pub pct_change: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StressRow {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Risk model port.
///
/// Implementations must be shareable across threads; callers own the portfolio
/// and market data and lend them for each call.
pub trait RiskModel: Send + Sync {
    /// Mark-to-market value: sum of quantity times latest price.
    fn value_portfolio(&self, portfolio: &Portfolio, market_data: &MarketData) -> Result<f64>;

    /// Value at Risk per confidence label, in NAV currency.
    fn calculate_var(
        &self,
        portfolio: &Portfolio,
        market_data: &MarketData,
        params: &VarParams,
    ) -> Result<BTreeMap<String, f64>>;

    /// Conditional VaR (expected shortfall) per confidence label.
    fn calculate_cvar(
        &self,
        portfolio: &Portfolio,
        market_data: &MarketData,
        params: &VarParams,
    ) -> Result<BTreeMap<String, f64>>;

    fn compute_greeks(&self, portfolio: &Portfolio, market_data: &MarketData) -> Result<Greeks>;

    /// Revalue the portfolio under each scenario. Output order matches input order.
    fn stress_test(
        &self,
        portfolio: &Portfolio,
        market_data: &MarketData,
        scenarios: &[StressScenario],
    ) -> Result<Vec<StressRow>>;
}

/// Stateless equity risk engine.
#[derive(Debug, Clone, Copy, Default)]
pub struct RiskAnalyticsEngine;

impl RiskAnalyticsEngine {
    pub fn new() -> Self {
        Self
    }

    /// Returns over the most recent `window_days`, after validating `params`.
    fn window_returns(
        &self,
        portfolio: &Portfolio,
        market_data: &MarketData,
        params: &VarParams,
    ) -> Result<Vec<f64>> {
        params.validate()?;

        let returns = weighted_returns(portfolio.weights(), market_data);
        let required = params.window_days;
        if returns.len() < required {
            return Err(Error::InsufficientData {
                required,
                available: returns.len(),
            });
        }

        let window = returns[returns.len() - required..].to_vec();
        tracing::debug!(
            method = %params.method,
            observations = window.len(),
            "Computed portfolio return window"
        );
        Ok(window)
    }
}

impl RiskModel for RiskAnalyticsEngine {
    fn value_portfolio(&self, portfolio: &Portfolio, market_data: &MarketData) -> Result<f64> {
        let mut total = 0.0;

        for (symbol, quantity) in portfolio.positions() {
            let price = market_data
                .latest_price(symbol)
                .ok_or_else(|| Error::Pricing {
                    symbol: symbol.clone(),
                    reason: "no price in market data".to_string(),
                })?;

            if !price.is_finite() || price < 0.0 {
                return Err(Error::Pricing {
                    symbol: symbol.clone(),
                    reason: format!("invalid price {}", price),
                });
            }

            total += quantity * price;
        }

        Ok(total)
    }

    fn calculate_var(
        &self,
        portfolio: &Portfolio,
        market_data: &MarketData,
        params: &VarParams,
    ) -> Result<BTreeMap<String, f64>> {
        let returns = self.window_returns(portfolio, market_data, params)?;
        let nav = portfolio.nav();

        Ok(params
            .confidence_levels
            .iter()
            .map(|&c| {
                let threshold = return_threshold(&returns, params.method, c);
                (confidence_label(c), threshold * nav)
            })
            .collect())
    }

    fn calculate_cvar(
        &self,
        portfolio: &Portfolio,
        market_data: &MarketData,
        params: &VarParams,
    ) -> Result<BTreeMap<String, f64>> {
        let returns = self.window_returns(portfolio, market_data, params)?;
        let nav = portfolio.nav();

        Ok(params
            .confidence_levels
            .iter()
            .map(|&c| {
                let threshold = return_threshold(&returns, params.method, c);
                (confidence_label(c), tail_mean(&returns, threshold) * nav)
            })
            .collect())
    }

    fn compute_greeks(&self, portfolio: &Portfolio, _market_data: &MarketData) -> Result<Greeks> {
        // Linear equity exposure only: delta is the invested fraction
        Ok(Greeks {
            delta: Some(portfolio.weights().values().sum()),
            gamma: Some(0.0),
            vega: Some(0.0),
            ..Default::default()
        })
    }

    fn stress_test(
        &self,
        portfolio: &Portfolio,
        market_data: &MarketData,
        scenarios: &[StressScenario],
    ) -> Result<Vec<StressRow>> {
        let base_npv = self.value_portfolio(portfolio, market_data)?;

        let rows = scenarios
            .par_iter()
            .map(|scenario| {
                let stressed = apply_shocks(market_data, scenario);
                match self.value_portfolio(portfolio, &stressed) {
                    Ok(stressed_npv) => {
                        let pnl = stressed_npv - base_npv;
                        let pct_change = if base_npv == 0.0 { 0.0 } else { pnl / base_npv };
                        StressRow {
                            scenario: scenario.name().to_string(),
                            base_npv,
                            stressed_npv: Some(stressed_npv),
                            pnl: Some(pnl),
                            pct_change: Some(pct_change),
                            error: None,
                        }
                    }
                    Err(e) => {
                        tracing::warn!(scenario = scenario.name(), error = %e, "Stress scenario failed");
                        StressRow {
                            scenario: scenario.name().to_string(),
                            base_npv,
                            stressed_npv: None,
                            pnl: None,
                            pct_change: None,
                            error: Some(e.to_string()),
                        }
                    }
                }
            })
            .collect();

        Ok(rows)
    }
}

/// VaR threshold as a return: empirical percentile or `mu + z * sigma`.
fn return_threshold(returns: &[f64], method: VarMethod, confidence: f64) -> f64 {
    let alpha = 1.0 - confidence;
    match method {
        VarMethod::Historical => percentile(returns, alpha),
        VarMethod::Parametric => mean(returns) + norm_ppf(alpha) * sample_std(returns),
    }
}

/// Daily weighted portfolio returns in date order.
///
/// Each symbol's NaN-dropped prices produce percentage changes; on every date the
/// portfolio return is the weighted sum over the symbols observed that day.
/// Weighted symbols without a price column are skipped.
pub fn weighted_returns(weights: &BTreeMap<String, f64>, market_data: &MarketData) -> Vec<f64> {
    let mut by_row: BTreeMap<usize, f64> = BTreeMap::new();

    for (symbol, weight) in weights {
        if !market_data.has_column(symbol) {
            tracing::debug!(symbol = %symbol, "No price history for symbol, excluded from returns");
            continue;
        }
        for (row, ret) in market_data.returns(symbol) {
            *by_row.entry(row).or_insert(0.0) += weight * ret;
        }
    }

    by_row.into_values().collect()
}

/// Copy of the market data with a scenario's shocks applied.
///
/// Keys resolve in order: an exact symbol scales that symbol, `"equity_all"`
/// scales everything, anything else (including `"rates"`) leaves prices unchanged.
pub fn apply_shocks(market_data: &MarketData, scenario: &StressScenario) -> MarketData {
    let mut stressed = market_data.clone();

    for (factor, shock) in scenario.shocks() {
        let multiplier = 1.0 + shock;
        if stressed.scale_symbol(factor, multiplier) {
            continue;
        }
        match factor.as_str() {
            "equity_all" => stressed.scale_all(multiplier),
            "rates" => {
                tracing::debug!(scenario = scenario.name(), "Rate shocks do not affect equity prices")
            }
            other => tracing::debug!(
                scenario = scenario.name(),
                factor = other,
                "Shock factor not present in market data, ignored"
            ),
        }
    }

    stressed
}
