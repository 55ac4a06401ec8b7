//! Boundaries to the outside world: price sources and report sinks.
//!
//! The risk model port lives with its implementation in [`crate::engine`].

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::market_data::PriceSeries;
use crate::types::{Greeks, RiskMetrics};
use crate::Result;

/// Source of historical closing prices.
pub trait MarketDataSource: Send + Sync {
    /// Load the price history of `symbol` from dataset `version`.
    fn load(&self, symbol: &str, version: &str) -> Result<PriceSeries>;
}

/// Destination for risk report artifacts.
pub trait ReportSink: Send + Sync {
    /// Persist the report and return where it was written.
    fn write_risk_report(&self, report: &RiskReport) -> Result<PathBuf>;
}

/// VaR and CVaR at one confidence level.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct VarCvar {
    pub var: f64,
    pub cvar: f64,
}

/// Serialized risk report.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RiskReport {
    pub portfolio_id: String,
    pub as_of_date: NaiveDate,
    /// Keyed by confidence label, e.g. `"95%"`
    pub levels: BTreeMap<String, VarCvar>,
    pub greeks: Greeks,
    pub calculation_metadata: serde_json::Map<String, serde_json::Value>,
}

impl From<&RiskMetrics> for RiskReport {
    fn from(metrics: &RiskMetrics) -> Self {
        let levels = metrics
            .var()
            .iter()
            .filter_map(|(label, var)| {
                metrics.cvar_at(label).map(|cvar| {
                    (
                        label.clone(),
                        VarCvar {
                            var: *var,
                            cvar,
                        },
                    )
                })
            })
            .collect();

        Self {
            portfolio_id: metrics.portfolio_id().to_string(),
            as_of_date: metrics.as_of_date(),
            levels,
            greeks: *metrics.greeks(),
            calculation_metadata: metrics.calculation_metadata().clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_from_metrics() {
        let var = BTreeMap::from([("95%".to_string(), -1_000.0), ("99%".to_string(), -1_600.0)]);
        let cvar = BTreeMap::from([("95%".to_string(), -1_300.0), ("99%".to_string(), -1_900.0)]);
        let date = NaiveDate::from_ymd_opt(2024, 3, 28).unwrap();
        let metrics = RiskMetrics::var_only(var, cvar, date, "core-equity").unwrap();

        let report = RiskReport::from(&metrics);
        assert_eq!(report.portfolio_id, "core-equity");
        assert_eq!(report.levels.len(), 2);
        assert_eq!(
            report.levels["99%"],
            VarCvar {
                var: -1_600.0,
                cvar: -1_900.0
            }
        );
    }
}
