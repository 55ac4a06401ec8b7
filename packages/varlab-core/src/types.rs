//! Core domain types: portfolio snapshots, stress scenarios and risk metrics.
//!
//! Every type with invariants is built through a validating constructor and
//! deserializes through the same validation, so an instance that exists is valid.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Tolerance for the portfolio weight-sum invariant.
pub const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

/// Largest accepted absolute shock (500%). Catches "40" typed instead of "0.40".
pub const MAX_SHOCK_MAGNITUDE: f64 = 5.0;

/// Format a confidence level as a report label, e.g. `0.95` -> `"95%"`.
///
/// Integral percentages print without decimals; fractional ones keep them
/// (`0.975` -> `"97.5%"`), so distinct levels never share a label.
pub fn confidence_label(level: f64) -> String {
    let pct = level * 100.0;
    let rounded = pct.round();
    if (pct - rounded).abs() < 1e-9 {
        format!("{}%", rounded as i64)
    } else {
        let text = format!("{:.6}", pct);
        let text = text.trim_end_matches('0').trim_end_matches('.');
        format!("{}%", text)
    }
}

/// Descriptive metadata attached to a portfolio snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct PortfolioMetadata {
    /// Name of the strategy or fund
    pub strategy_name: String,
    /// Identifier of the rebalance event that produced the snapshot
    pub rebalance_id: String,
    /// Benchmark identifier
    #[serde(skip_serializing_if = "Option::is_none")]
    pub benchmark: Option<String>,
    /// When the snapshot was created
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<NaiveDate>,
}

/// Portfolio holdings snapshot at a valuation date.
///
/// Invariants:
/// - `positions` and `weights` reference the same symbols
/// - weights sum to 1.0, or to 0.0 for an all-cash portfolio (within [`WEIGHT_SUM_TOLERANCE`])
/// - `nav` is finite and non-negative
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(try_from = "PortfolioRecord")]
pub struct Portfolio {
    positions: BTreeMap<String, f64>,
    weights: BTreeMap<String, f64>,
    nav: f64,
    as_of_date: NaiveDate,
    metadata: PortfolioMetadata,
}

#[derive(Deserialize)]
struct PortfolioRecord {
    positions: BTreeMap<String, f64>,
    weights: BTreeMap<String, f64>,
    nav: f64,
    as_of_date: NaiveDate,
    #[serde(default)]
    metadata: PortfolioMetadata,
}

impl TryFrom<PortfolioRecord> for Portfolio {
    type Error = Error;

    fn try_from(record: PortfolioRecord) -> Result<Self> {
        Ok(Portfolio::new(
            record.positions,
            record.weights,
            record.nav,
            record.as_of_date,
        )?
        .with_metadata(record.metadata))
    }
}

impl Portfolio {
    /// Create a validated portfolio snapshot.
    pub fn new(
        positions: BTreeMap<String, f64>,
        weights: BTreeMap<String, f64>,
        nav: f64,
        as_of_date: NaiveDate,
    ) -> Result<Self> {
        let position_symbols: BTreeSet<&String> = positions.keys().collect();
        let weight_symbols: BTreeSet<&String> = weights.keys().collect();

        if position_symbols != weight_symbols {
            let missing_in_weights: Vec<&&String> =
                position_symbols.difference(&weight_symbols).collect();
            let missing_in_positions: Vec<&&String> =
                weight_symbols.difference(&position_symbols).collect();
            return Err(Error::InvalidPortfolio(format!(
                "positions and weights must reference the same symbols \
                 (missing in weights: {:?}, missing in positions: {:?})",
                missing_in_weights, missing_in_positions
            )));
        }

        let weight_sum: f64 = weights.values().sum();
        let fully_invested = (weight_sum - 1.0).abs() < WEIGHT_SUM_TOLERANCE;
        let all_cash = weight_sum.abs() < WEIGHT_SUM_TOLERANCE;
        if !(fully_invested || all_cash) {
            return Err(Error::InvalidPortfolio(format!(
                "weights must sum to 1.0 (or 0.0 for cash-only), got {:.6}",
                weight_sum
            )));
        }

        if !nav.is_finite() || nav < 0.0 {
            return Err(Error::InvalidPortfolio(format!(
                "NAV must be non-negative, got {}",
                nav
            )));
        }

        Ok(Self {
            positions,
            weights,
            nav,
            as_of_date,
            metadata: PortfolioMetadata::default(),
        })
    }

    /// Build a portfolio from target weights, deriving quantities as `nav * weight / price`.
    pub fn from_weights(
        weights: BTreeMap<String, f64>,
        nav: f64,
        prices: &BTreeMap<String, f64>,
        as_of_date: NaiveDate,
    ) -> Result<Self> {
        let mut positions = BTreeMap::new();

        for (symbol, weight) in &weights {
            let price = prices.get(symbol).ok_or_else(|| {
                Error::InvalidPortfolio(format!("price not found for symbol '{}'", symbol))
            })?;
            if *price <= 0.0 {
                return Err(Error::InvalidPortfolio(format!(
                    "price for '{}' must be positive, got {}",
                    symbol, price
                )));
            }
            positions.insert(symbol.clone(), nav * weight / price);
        }

        Self::new(positions, weights, nav, as_of_date)
    }

    /// Attach metadata to the snapshot.
    pub fn with_metadata(mut self, metadata: PortfolioMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn positions(&self) -> &BTreeMap<String, f64> {
        &self.positions
    }

    pub fn weights(&self) -> &BTreeMap<String, f64> {
        &self.weights
    }

    pub fn nav(&self) -> f64 {
        self.nav
    }

    pub fn as_of_date(&self) -> NaiveDate {
        self.as_of_date
    }

    pub fn metadata(&self) -> &PortfolioMetadata {
        &self.metadata
    }

    /// Symbols held, in sorted order.
    pub fn symbols(&self) -> Vec<&str> {
        self.positions.keys().map(String::as_str).collect()
    }

    pub fn num_positions(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Quantity held for a symbol (0.0 if not held).
    pub fn position(&self, symbol: &str) -> f64 {
        self.positions.get(symbol).copied().unwrap_or(0.0)
    }

    /// Portfolio weight for a symbol (0.0 if not held).
    pub fn weight(&self, symbol: &str) -> f64 {
        self.weights.get(symbol).copied().unwrap_or(0.0)
    }

    /// Position value in NAV currency (`nav * weight`).
    pub fn position_value(&self, symbol: &str) -> f64 {
        self.nav * self.weight(symbol)
    }
}

/// Stress testing scenario: a named set of risk-factor shocks.
///
/// Shock keys are exact symbols, the sentinel `"equity_all"`, or `"rates"`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(try_from = "ScenarioRecord")]
pub struct StressScenario {
    name: String,
    shocks: BTreeMap<String, f64>,
    description: String,
    date_calibrated: NaiveDate,
}

#[derive(Deserialize)]
struct ScenarioRecord {
    name: String,
    shocks: BTreeMap<String, f64>,
    #[serde(default)]
    description: String,
    date_calibrated: NaiveDate,
}

impl TryFrom<ScenarioRecord> for StressScenario {
    type Error = Error;

    fn try_from(record: ScenarioRecord) -> Result<Self> {
        StressScenario::new(
            record.name,
            record.shocks,
            record.description,
            record.date_calibrated,
        )
    }
}

impl StressScenario {
    /// Create a validated scenario.
    pub fn new(
        name: impl Into<String>,
        shocks: BTreeMap<String, f64>,
        description: impl Into<String>,
        date_calibrated: NaiveDate,
    ) -> Result<Self> {
        let name = name.into();

        if name.trim().is_empty() {
            return Err(Error::InvalidScenario {
                name,
                reason: "name must not be empty".to_string(),
            });
        }

        if shocks.is_empty() {
            return Err(Error::InvalidScenario {
                name,
                reason: "at least one shock must be defined".to_string(),
            });
        }

        let extreme: Vec<(&String, &f64)> = shocks
            .iter()
            .filter(|(_, shock)| !shock.is_finite() || shock.abs() > MAX_SHOCK_MAGNITUDE)
            .collect();
        if !extreme.is_empty() {
            let reason = format!(
                "extreme shocks (|shock| > {}): {:?}",
                MAX_SHOCK_MAGNITUDE, extreme
            );
            return Err(Error::InvalidScenario { name, reason });
        }

        Ok(Self {
            name,
            shocks,
            description: description.into(),
            date_calibrated,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn shocks(&self) -> &BTreeMap<String, f64> {
        &self.shocks
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn date_calibrated(&self) -> NaiveDate {
        self.date_calibrated
    }

    /// Shock for a risk factor, if defined.
    pub fn shock(&self, risk_factor: &str) -> Option<f64> {
        self.shocks.get(risk_factor).copied()
    }

    pub fn has_shock(&self, risk_factor: &str) -> bool {
        self.shocks.contains_key(risk_factor)
    }

    pub fn risk_factors(&self) -> Vec<&str> {
        self.shocks.keys().map(String::as_str).collect()
    }

    pub fn num_shocks(&self) -> usize {
        self.shocks.len()
    }
}

/// Greek risk sensitivities, aggregated at portfolio level.
///
/// Unset values mean "not applicable to the instruments held".
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq)]
pub struct Greeks {
    pub delta: Option<f64>,
    pub gamma: Option<f64>,
    pub vega: Option<f64>,
    pub theta: Option<f64>,
    pub rho: Option<f64>,
    pub duration: Option<f64>,
    pub convexity: Option<f64>,
}

impl Greeks {
    /// True when no sensitivity is populated.
    pub fn is_empty(&self) -> bool {
        self.to_map().iter().all(|(_, value)| value.is_none())
    }

    /// Name/value pairs in a fixed order.
    pub fn to_map(&self) -> [(&'static str, Option<f64>); 7] {
        [
            ("delta", self.delta),
            ("gamma", self.gamma),
            ("vega", self.vega),
            ("theta", self.theta),
            ("rho", self.rho),
            ("duration", self.duration),
            ("convexity", self.convexity),
        ]
    }
}

/// VaR, CVaR and Greeks computed for one portfolio snapshot.
///
/// Invariants:
/// - `var` and `cvar` carry the same confidence labels
/// - `cvar[label] <= var[label]` for every label (both are signed, losses negative)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(try_from = "RiskMetricsRecord")]
pub struct RiskMetrics {
    var: BTreeMap<String, f64>,
    cvar: BTreeMap<String, f64>,
    greeks: Greeks,
    as_of_date: NaiveDate,
    portfolio_id: String,
    calculation_metadata: serde_json::Map<String, serde_json::Value>,
}

#[derive(Deserialize)]
struct RiskMetricsRecord {
    var: BTreeMap<String, f64>,
    cvar: BTreeMap<String, f64>,
    #[serde(default)]
    greeks: Greeks,
    as_of_date: NaiveDate,
    portfolio_id: String,
    #[serde(default)]
    calculation_metadata: serde_json::Map<String, serde_json::Value>,
}

impl TryFrom<RiskMetricsRecord> for RiskMetrics {
    type Error = Error;

    fn try_from(record: RiskMetricsRecord) -> Result<Self> {
        RiskMetrics::new(
            record.var,
            record.cvar,
            record.greeks,
            record.as_of_date,
            record.portfolio_id,
            record.calculation_metadata,
        )
    }
}

impl RiskMetrics {
    /// Create validated risk metrics.
    pub fn new(
        var: BTreeMap<String, f64>,
        cvar: BTreeMap<String, f64>,
        greeks: Greeks,
        as_of_date: NaiveDate,
        portfolio_id: impl Into<String>,
        calculation_metadata: serde_json::Map<String, serde_json::Value>,
    ) -> Result<Self> {
        if !var.keys().eq(cvar.keys()) {
            return Err(Error::InvalidRiskMetrics(format!(
                "VaR and CVaR must have the same confidence levels (VaR: {:?}, CVaR: {:?})",
                var.keys().collect::<Vec<_>>(),
                cvar.keys().collect::<Vec<_>>()
            )));
        }

        for (label, &var_value) in &var {
            let cvar_value = cvar[label];
            if !var_value.is_finite() || !cvar_value.is_finite() {
                return Err(Error::InvalidRiskMetrics(format!(
                    "VaR and CVaR must be finite at {}: VaR={}, CVaR={}",
                    label, var_value, cvar_value
                )));
            }
            let tolerance = 1e-6 * var_value.abs().max(cvar_value.abs()).max(1.0);
            if cvar_value > var_value + tolerance {
                return Err(Error::InvalidRiskMetrics(format!(
                    "CVaR must be <= VaR at {}: VaR={}, CVaR={}",
                    label, var_value, cvar_value
                )));
            }
        }

        Ok(Self {
            var,
            cvar,
            greeks,
            as_of_date,
            portfolio_id: portfolio_id.into(),
            calculation_metadata,
        })
    }

    /// Create metrics with VaR/CVaR only (no Greeks, no metadata).
    pub fn var_only(
        var: BTreeMap<String, f64>,
        cvar: BTreeMap<String, f64>,
        as_of_date: NaiveDate,
        portfolio_id: impl Into<String>,
    ) -> Result<Self> {
        Self::new(
            var,
            cvar,
            Greeks::default(),
            as_of_date,
            portfolio_id,
            serde_json::Map::new(),
        )
    }

    pub fn var(&self) -> &BTreeMap<String, f64> {
        &self.var
    }

    pub fn cvar(&self) -> &BTreeMap<String, f64> {
        &self.cvar
    }

    pub fn greeks(&self) -> &Greeks {
        &self.greeks
    }

    pub fn as_of_date(&self) -> NaiveDate {
        self.as_of_date
    }

    pub fn portfolio_id(&self) -> &str {
        &self.portfolio_id
    }

    pub fn calculation_metadata(&self) -> &serde_json::Map<String, serde_json::Value> {
        &self.calculation_metadata
    }

    /// VaR at a confidence label such as `"95%"`.
    pub fn var_at(&self, label: &str) -> Option<f64> {
        self.var.get(label).copied()
    }

    /// CVaR at a confidence label such as `"95%"`.
    pub fn cvar_at(&self, label: &str) -> Option<f64> {
        self.cvar.get(label).copied()
    }

    pub fn confidence_levels(&self) -> Vec<&str> {
        self.var.keys().map(String::as_str).collect()
    }

    pub fn has_greeks(&self) -> bool {
        !self.greeks.is_empty()
    }
}

/// VaR estimation method.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum VarMethod {
    /// Empirical percentile of realized returns
    #[default]
    Historical,
    /// Variance-covariance (normal) approximation
    Parametric,
}

impl VarMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            VarMethod::Historical => "historical",
            VarMethod::Parametric => "parametric",
        }
    }
}

impl FromStr for VarMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "historical" => Ok(VarMethod::Historical),
            "parametric" => Ok(VarMethod::Parametric),
            _ => Err(Error::UnknownMethod(s.to_string())),
        }
    }
}

impl fmt::Display for VarMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// API response wrapper used by the CLI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    /// Create a successful response.
    pub fn ok(data: T) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    /// Create an error response.
    pub fn err(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(error.into()),
        }
    }
}
