//! Stress test orchestration with a linearity sanity check.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::engine::{apply_shocks, RiskModel};
use crate::market_data::MarketData;
use crate::types::{Portfolio, StressScenario};
use crate::{Error, Result};

/// Allowed deviation of the 20%/10% P&L ratio from 2.0.
const LINEARITY_TOLERANCE: f64 = 0.2;
/// P&L below this is too small to judge linearity.
const NEGLIGIBLE_PNL: f64 = 1e-6;

/// Inputs of a stress run.
#[derive(Debug, Clone)]
pub struct StressTestRequest {
    pub portfolio: Portfolio,
    pub scenarios: Vec<StressScenario>,
    pub market_data: MarketData,
    pub validate_linearity: bool,
    /// Risk factor shocked by the linearity check
    pub linearity_factor: String,
}

impl StressTestRequest {
    pub fn new(
        portfolio: Portfolio,
        scenarios: Vec<StressScenario>,
        market_data: MarketData,
    ) -> Self {
        Self {
            portfolio,
            scenarios,
            market_data,
            validate_linearity: true,
            linearity_factor: "equity_all".to_string(),
        }
    }

    pub fn with_linearity_check(mut self, enabled: bool) -> Self {
        self.validate_linearity = enabled;
        self
    }

    pub fn with_linearity_factor(mut self, factor: impl Into<String>) -> Self {
        self.linearity_factor = factor.into();
        self
    }
}

/// Outcome of one scenario, with the shocks that defined it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StressTestResult {
    pub scenario_name: String,
    pub base_npv: f64,
    pub stressed_npv: Option<f64>,
    pub pnl: Option<f64>,
    pub pct_change: Option<f64>,
    pub shocks_applied: BTreeMap<String, f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Result of the -10% / -20% shock pair.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LinearityCheck {
    pub factor: String,
    pub pnl_10: Option<f64>,
    pub pnl_20: Option<f64>,
    /// `|pnl_20| / |pnl_10|`, when both are large enough to compare
    pub ratio: Option<f64>,
    pub consistent: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct StressTestResponse {
    pub results: Vec<StressTestResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub linearity: Option<LinearityCheck>,
    pub warnings: Vec<String>,
}

impl StressTestResponse {
    /// Successful scenario with the largest loss.
    pub fn worst_case(&self) -> Option<&StressTestResult> {
        self.successful()
            .min_by(|a, b| a.pnl.unwrap_or(0.0).total_cmp(&b.pnl.unwrap_or(0.0)))
    }

    /// Successful scenario with the largest gain.
    pub fn best_case(&self) -> Option<&StressTestResult> {
        self.successful()
            .max_by(|a, b| a.pnl.unwrap_or(0.0).total_cmp(&b.pnl.unwrap_or(0.0)))
    }

    pub fn failed(&self) -> impl Iterator<Item = &StressTestResult> {
        self.results.iter().filter(|r| r.error.is_some())
    }

    fn successful(&self) -> impl Iterator<Item = &StressTestResult> {
        self.results.iter().filter(|r| r.pnl.is_some())
    }
}

pub struct StressTestingService<R> {
    risk_model: R,
}

impl<R: RiskModel> StressTestingService<R> {
    pub fn new(risk_model: R) -> Self {
        Self { risk_model }
    }

    pub fn run(&self, request: &StressTestRequest) -> Result<StressTestResponse> {
        if request.scenarios.is_empty() {
            return Err(Error::InvalidInput(
                "at least one stress scenario is required".to_string(),
            ));
        }

        let mut warnings = Vec::new();

        let rows = self.risk_model.stress_test(
            &request.portfolio,
            &request.market_data,
            &request.scenarios,
        )?;

        let results: Vec<StressTestResult> = request
            .scenarios
            .iter()
            .zip(rows)
            .map(|(scenario, row)| {
                if let Some(error) = &row.error {
                    warnings.push(format!("Scenario '{}' failed: {}", scenario.name(), error));
                }
                StressTestResult {
                    scenario_name: row.scenario,
                    base_npv: row.base_npv,
                    stressed_npv: row.stressed_npv,
                    pnl: row.pnl,
                    pct_change: row.pct_change,
                    shocks_applied: scenario.shocks().clone(),
                    error: row.error,
                }
            })
            .collect();

        let base_npv = results.first().map(|r| r.base_npv);
        let linearity = if request.validate_linearity {
            Some(self.check_linearity(request, base_npv, &mut warnings))
        } else {
            None
        };

        tracing::info!(
            scenarios = results.len(),
            failed = results.iter().filter(|r| r.error.is_some()).count(),
            "Stress test complete"
        );

        Ok(StressTestResponse {
            results,
            linearity,
            warnings,
        })
    }

    /// Shock the factor by -10% and -20%; for linear holdings the P&L doubles.
    ///
    /// Reuses the base NPV of the scenario run. Never fails the run: problems
    /// are reported as warnings.
    fn check_linearity(
        &self,
        request: &StressTestRequest,
        base_npv: Option<f64>,
        warnings: &mut Vec<String>,
    ) -> LinearityCheck {
        let factor = request.linearity_factor.clone();
        let mut check = LinearityCheck {
            factor: factor.clone(),
            pnl_10: None,
            pnl_20: None,
            ratio: None,
            consistent: true,
        };

        let shocks = [("Linearity_10pct", -0.10), ("Linearity_20pct", -0.20)]
            .into_iter()
            .map(|(name, shock)| {
                StressScenario::new(
                    name,
                    BTreeMap::from([(factor.clone(), shock)]),
                    "linearity check",
                    request.portfolio.as_of_date(),
                )
            })
            .collect::<Result<Vec<_>>>();

        let pnls: Result<Vec<f64>> = shocks.and_then(|shocks| {
            let base_npv = match base_npv {
                Some(base) => base,
                None => self
                    .risk_model
                    .value_portfolio(&request.portfolio, &request.market_data)?,
            };
            shocks
                .iter()
                .map(|scenario| {
                    let stressed = apply_shocks(&request.market_data, scenario);
                    let npv = self.risk_model.value_portfolio(&request.portfolio, &stressed)?;
                    Ok(npv - base_npv)
                })
                .collect()
        });

        let pnls = match pnls {
            Ok(pnls) => pnls,
            Err(e) => {
                warnings.push(format!("Linearity validation failed: {}", e));
                return check;
            }
        };

        check.pnl_10 = pnls.first().copied();
        check.pnl_20 = pnls.get(1).copied();

        if let (Some(pnl_10), Some(pnl_20)) = (check.pnl_10, check.pnl_20) {
            if pnl_10.abs() >= NEGLIGIBLE_PNL && pnl_20.abs() >= NEGLIGIBLE_PNL {
                let ratio = pnl_20.abs() / pnl_10.abs();
                check.ratio = Some(ratio);
                check.consistent = (ratio - 2.0).abs() <= LINEARITY_TOLERANCE;
                if !check.consistent {
                    tracing::warn!(factor = %factor, ratio, "Stress P&L is not linear in the shock");
                    warnings.push(format!(
                        "Linearity check on '{}': 20%/10% P&L ratio = {:.2}, expected ~2.0",
                        factor, ratio
                    ));
                }
            }
        }

        check
    }
}
