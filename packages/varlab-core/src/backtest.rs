//! Rolling VaR backtest with Kupiec proportion-of-failures test.
//!
//! Each test day the historical VaR is estimated from the trailing window and
//! compared against the realized next-day P&L. A breach is a loss worse than
//! the predicted VaR. Over `n` days with `x` breaches the Kupiec likelihood
//! ratio is
//!
//! ```text
//! LR = -2 [ x ln(p / (x/n)) + (n - x) ln((1 - p) / (1 - x/n)) ]
//! ```
//!
//! with `p = 1 - confidence`, asymptotically chi-squared with one degree of freedom.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use statrs::distribution::{ChiSquared, ContinuousCDF};

use crate::engine::{RiskAnalyticsEngine, RiskModel, VarParams};
use crate::market_data::MarketData;
use crate::types::{confidence_label, Portfolio, VarMethod};
use crate::{Error, Result};

/// Chi-squared(1) critical value at 95%.
pub const CRITICAL_VALUE_95: f64 = 3.84;
/// Chi-squared(1) critical value at 99%.
pub const CRITICAL_VALUE_99: f64 = 6.63;

/// Backtest parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VarBacktestConfig {
    pub confidence: f64,
    pub lookback_days: usize,
    pub nav: f64,
    /// Portfolio weights; equal weights over every column when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weights: Option<BTreeMap<String, f64>>,
}

impl Default for VarBacktestConfig {
    fn default() -> Self {
        Self {
            confidence: 0.95,
            lookback_days: 252,
            nav: 1_000_000.0,
            weights: None,
        }
    }
}

/// One test day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestDay {
    pub date: NaiveDate,
    pub predicted_var: f64,
    pub actual_pnl: f64,
    pub breached: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalibrationVerdict {
    Valid,
    Rejected,
    /// No breaches, or every day breached
    InsufficientEvidence,
}

/// Kupiec proportion-of-failures test outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KupiecTest {
    pub lr_statistic: Option<f64>,
    pub p_value: Option<f64>,
    pub critical_value_95: f64,
    pub critical_value_99: f64,
    pub reject_at_95: Option<bool>,
    pub reject_at_99: Option<bool>,
    pub model_valid_95: Option<bool>,
    pub verdict: CalibrationVerdict,
}

impl KupiecTest {
    pub fn from_counts(breaches: usize, days: usize, expected_rate: f64) -> Self {
        let lr = kupiec_pof(breaches, days, expected_rate);
        let p_value = lr.and_then(|lr| {
            ChiSquared::new(1.0)
                .ok()
                .map(|chi| 1.0 - chi.cdf(lr))
        });
        let model_valid_95 = lr.map(|lr| lr <= CRITICAL_VALUE_95);
        let verdict = match model_valid_95 {
            Some(true) => CalibrationVerdict::Valid,
            Some(false) => CalibrationVerdict::Rejected,
            None => CalibrationVerdict::InsufficientEvidence,
        };

        Self {
            lr_statistic: lr,
            p_value,
            critical_value_95: CRITICAL_VALUE_95,
            critical_value_99: CRITICAL_VALUE_99,
            reject_at_95: lr.map(|lr| lr > CRITICAL_VALUE_95),
            reject_at_99: lr.map(|lr| lr > CRITICAL_VALUE_99),
            model_valid_95,
            verdict,
        }
    }
}

/// Kupiec POF likelihood ratio; `None` unless `0 < breaches < days`.
pub fn kupiec_pof(breaches: usize, days: usize, expected_rate: f64) -> Option<f64> {
    if breaches == 0 || breaches >= days || !(expected_rate > 0.0 && expected_rate < 1.0) {
        return None;
    }

    let x = breaches as f64;
    let n = days as f64;
    let p = expected_rate;
    let observed = x / n;

    Some(-2.0 * (x * (p / observed).ln() + (n - x) * ((1.0 - p) / (1.0 - observed)).ln()))
}

/// Breach transition counts between consecutive test days (0 = no breach, 1 = breach).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionCounts {
    pub n00: usize,
    pub n01: usize,
    pub n10: usize,
    pub n11: usize,
}

impl TransitionCounts {
    pub fn from_breaches(breaches: &[bool]) -> Self {
        let mut counts = Self::default();
        for pair in breaches.windows(2) {
            match (pair[0], pair[1]) {
                (false, false) => counts.n00 += 1,
                (false, true) => counts.n01 += 1,
                (true, false) => counts.n10 += 1,
                (true, true) => counts.n11 += 1,
            }
        }
        counts
    }
}

/// Reading of the actual/expected breach ratio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalibrationAssessment {
    /// Ratio within [0.8, 1.2]
    WellCalibrated,
    /// Fewer breaches than expected
    Conservative,
    /// More breaches than expected
    UnderestimatesRisk,
}

impl CalibrationAssessment {
    pub fn from_ratio(ratio: f64) -> Self {
        if ratio < 0.8 {
            CalibrationAssessment::Conservative
        } else if ratio > 1.2 {
            CalibrationAssessment::UnderestimatesRisk
        } else {
            CalibrationAssessment::WellCalibrated
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            CalibrationAssessment::WellCalibrated => {
                "VaR model is well-calibrated (breach rate within 20% of expected)"
            }
            CalibrationAssessment::Conservative => {
                "VaR model may be too conservative (fewer breaches than expected)"
            }
            CalibrationAssessment::UnderestimatesRisk => {
                "VaR model may underestimate risk (more breaches than expected)"
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestStatistics {
    pub total_days: usize,
    pub num_breaches: usize,
    pub breach_rate: f64,
    pub expected_breach_rate: f64,
    pub breach_rate_ratio: f64,
}

/// Full backtest artifact: summary plus per-day rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VarBacktest {
    pub config: VarBacktestConfig,
    pub statistics: BacktestStatistics,
    pub kupiec: KupiecTest,
    pub transitions: TransitionCounts,
    pub assessment: CalibrationAssessment,
    pub days: Vec<BacktestDay>,
}

impl VarBacktest {
    /// True unless the Kupiec test rejects at 95%.
    pub fn passed(&self) -> bool {
        self.kupiec.verdict != CalibrationVerdict::Rejected
    }
}

/// Backtest historical VaR with the default engine.
pub fn run_var_backtest(market_data: &MarketData, config: &VarBacktestConfig) -> Result<VarBacktest> {
    run_var_backtest_with(&RiskAnalyticsEngine::new(), market_data, config)
}

/// Backtest historical VaR produced by `model`.
///
/// Test days run from `lookback_days` to the second-to-last row; each predicts
/// from price rows `t - lookback_days ..= t` and is checked against day `t + 1`.
pub fn run_var_backtest_with<R: RiskModel>(
    model: &R,
    market_data: &MarketData,
    config: &VarBacktestConfig,
) -> Result<VarBacktest> {
    if !(config.confidence > 0.0 && config.confidence < 1.0) {
        return Err(Error::InvalidConfidence(config.confidence));
    }
    if config.lookback_days == 0 {
        return Err(Error::InvalidInput("lookback window must be positive".to_string()));
    }
    if !(config.nav.is_finite() && config.nav > 0.0) {
        return Err(Error::InvalidInput(format!("NAV must be positive, got {}", config.nav)));
    }

    let window = config.lookback_days;
    let rows = market_data.len();
    if rows < window + 2 {
        return Err(Error::InsufficientData {
            required: window + 2,
            available: rows,
        });
    }

    let weights = resolve_weights(market_data, config.weights.as_ref())?;
    let positions = weights
        .iter()
        .map(|(symbol, w)| (symbol.clone(), config.nav * w))
        .collect();
    let portfolio = Portfolio::new(
        positions,
        weights.clone(),
        config.nav,
        market_data.dates()[rows - 1],
    )?;

    let params = VarParams::new(VarMethod::Historical, vec![config.confidence], window);
    let label = confidence_label(config.confidence);

    tracing::debug!(
        confidence = config.confidence,
        lookback = window,
        test_days = rows - window - 1,
        "Running VaR backtest"
    );

    let days = (window..rows - 1)
        .into_par_iter()
        .map(|t| {
            let history = market_data.rows(t - window..t + 1);
            let var = model.calculate_var(&portfolio, &history, &params)?;
            let predicted_var = var.get(&label).copied().ok_or_else(|| {
                Error::InvalidInput(format!("risk model returned no VaR for {}", label))
            })?;

            let actual_pnl = config.nav * realized_return(market_data, &weights, t);

            Ok(BacktestDay {
                date: market_data.dates()[t],
                predicted_var,
                actual_pnl,
                breached: actual_pnl < predicted_var,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let total_days = days.len();
    let num_breaches = days.iter().filter(|d| d.breached).count();
    let breach_rate = num_breaches as f64 / total_days as f64;
    let expected_breach_rate = 1.0 - config.confidence;
    let breach_rate_ratio = breach_rate / expected_breach_rate;

    let kupiec = KupiecTest::from_counts(num_breaches, total_days, expected_breach_rate);
    let breaches: Vec<bool> = days.iter().map(|d| d.breached).collect();

    tracing::info!(
        days = total_days,
        breaches = num_breaches,
        lr = ?kupiec.lr_statistic,
        verdict = ?kupiec.verdict,
        "VaR backtest complete"
    );

    Ok(VarBacktest {
        config: config.clone(),
        statistics: BacktestStatistics {
            total_days,
            num_breaches,
            breach_rate,
            expected_breach_rate,
            breach_rate_ratio,
        },
        kupiec,
        transitions: TransitionCounts::from_breaches(&breaches),
        assessment: CalibrationAssessment::from_ratio(breach_rate_ratio),
        days,
    })
}

fn resolve_weights(
    market_data: &MarketData,
    weights: Option<&BTreeMap<String, f64>>,
) -> Result<BTreeMap<String, f64>> {
    match weights {
        Some(weights) => {
            if let Some(missing) = weights.keys().find(|s| !market_data.has_column(s)) {
                return Err(Error::InvalidInput(format!(
                    "backtest weight for '{}' has no price column",
                    missing
                )));
            }
            Ok(weights.clone())
        }
        None => {
            let symbols = market_data.symbols();
            if symbols.is_empty() {
                return Err(Error::NoMarketData);
            }
            let weight = 1.0 / symbols.len() as f64;
            Ok(symbols.into_iter().map(|s| (s.to_string(), weight)).collect())
        }
    }
}

/// Weighted return from row `t` to `t + 1`. Symbols without both prices are skipped.
fn realized_return(market_data: &MarketData, weights: &BTreeMap<String, f64>, t: usize) -> f64 {
    weights
        .iter()
        .filter_map(|(symbol, w)| {
            let prices = market_data.column(symbol)?;
            let r = prices[t + 1] / prices[t] - 1.0;
            r.is_finite().then_some(w * r)
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synthetic::SyntheticMarket;
    use approx::assert_abs_diff_eq;
    use chrono::Duration;

    fn dates(n: usize) -> Vec<NaiveDate> {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        (0..n).map(|i| start + Duration::days(i as i64)).collect()
    }

    #[test]
    fn test_kupiec_reference_values() {
        assert_abs_diff_eq!(
            kupiec_pof(5, 250, 0.01).unwrap(),
            1.9568097882306779,
            epsilon = 1e-9
        );
        assert_abs_diff_eq!(
            kupiec_pof(25, 250, 0.05).unwrap(),
            10.327109456373158,
            epsilon = 1e-9
        );
        assert_abs_diff_eq!(
            kupiec_pof(12, 250, 0.05).unwrap(),
            0.021324025180578188,
            epsilon = 1e-9
        );
    }

    #[test]
    fn test_kupiec_undefined_at_edges() {
        assert_eq!(kupiec_pof(0, 250, 0.05), None);
        assert_eq!(kupiec_pof(250, 250, 0.05), None);
        assert_eq!(kupiec_pof(5, 250, 0.0), None);

        let test = KupiecTest::from_counts(0, 250, 0.05);
        assert_eq!(test.verdict, CalibrationVerdict::InsufficientEvidence);
        assert_eq!(test.reject_at_95, None);
        assert_eq!(test.p_value, None);
    }

    #[test]
    fn test_kupiec_verdicts() {
        let valid = KupiecTest::from_counts(12, 250, 0.05);
        assert_eq!(valid.verdict, CalibrationVerdict::Valid);
        assert_eq!(valid.model_valid_95, Some(true));
        assert!(valid.p_value.unwrap() > 0.5);

        let rejected = KupiecTest::from_counts(25, 250, 0.05);
        assert_eq!(rejected.verdict, CalibrationVerdict::Rejected);
        assert_eq!(rejected.reject_at_95, Some(true));
        assert_eq!(rejected.reject_at_99, Some(true));
        assert!(rejected.p_value.unwrap() < 0.01);
    }

    #[test]
    fn test_transition_counts() {
        let counts = TransitionCounts::from_breaches(&[false, false, true, true, false, true]);
        assert_eq!(
            counts,
            TransitionCounts {
                n00: 1,
                n01: 2,
                n10: 1,
                n11: 1
            }
        );
        assert_eq!(TransitionCounts::from_breaches(&[true]), TransitionCounts::default());
    }

    #[test]
    fn test_calibration_assessment_bands() {
        assert_eq!(CalibrationAssessment::from_ratio(1.0), CalibrationAssessment::WellCalibrated);
        assert_eq!(CalibrationAssessment::from_ratio(0.8), CalibrationAssessment::WellCalibrated);
        assert_eq!(CalibrationAssessment::from_ratio(1.2), CalibrationAssessment::WellCalibrated);
        assert_eq!(CalibrationAssessment::from_ratio(0.5), CalibrationAssessment::Conservative);
        assert_eq!(
            CalibrationAssessment::from_ratio(1.5),
            CalibrationAssessment::UnderestimatesRisk
        );
    }

    /// Four +1% days, a -10% crash, then +1%.
    fn crash_market() -> MarketData {
        let mut prices = vec![100.0];
        for r in [0.01, 0.01, 0.01, 0.01, -0.10, 0.01] {
            let last = *prices.last().unwrap();
            prices.push(last * (1.0 + r));
        }
        MarketData::new(dates(prices.len()))
            .unwrap()
            .with_column("SPY", prices)
            .unwrap()
    }

    #[test]
    fn test_rolling_window_and_breaches() {
        let config = VarBacktestConfig {
            confidence: 0.75,
            lookback_days: 4,
            nav: 1_000.0,
            weights: None,
        };

        let result = run_var_backtest(&crash_market(), &config).unwrap();
        assert_eq!(result.days.len(), 2);

        // Window of four +1% returns predicts a gain; the crash breaches it
        let first = &result.days[0];
        assert_eq!(first.date, dates(7)[4]);
        assert_abs_diff_eq!(first.predicted_var, 10.0, epsilon = 1e-9);
        assert_abs_diff_eq!(first.actual_pnl, -100.0, epsilon = 1e-9);
        assert!(first.breached);

        // Window now contains the crash: rank 0.75 between -10% and +1%
        let second = &result.days[1];
        assert_abs_diff_eq!(second.predicted_var, -17.5, epsilon = 1e-9);
        assert!(!second.breached);

        assert_eq!(result.statistics.num_breaches, 1);
        assert_abs_diff_eq!(result.statistics.breach_rate, 0.5);
        assert_abs_diff_eq!(result.statistics.breach_rate_ratio, 2.0, epsilon = 1e-12);
        assert_eq!(result.transitions.n10, 1);
        assert_eq!(result.kupiec.verdict, CalibrationVerdict::Valid);
    }

    #[test]
    fn test_backtest_needs_enough_rows() {
        let config = VarBacktestConfig {
            lookback_days: 6,
            ..Default::default()
        };
        match run_var_backtest(&crash_market(), &config) {
            Err(Error::InsufficientData {
                required,
                available,
            }) => {
                assert_eq!(required, 8);
                assert_eq!(available, 7);
            }
            other => panic!("expected insufficient data, got {:?}", other),
        }
    }

    #[test]
    fn test_backtest_rejects_bad_config() {
        let market = crash_market();
        let bad_confidence = VarBacktestConfig {
            confidence: 1.0,
            lookback_days: 4,
            ..Default::default()
        };
        assert!(matches!(
            run_var_backtest(&market, &bad_confidence),
            Err(Error::InvalidConfidence(_))
        ));

        let unknown_symbol = VarBacktestConfig {
            lookback_days: 4,
            weights: Some(BTreeMap::from([("QQQ".to_string(), 1.0)])),
            ..Default::default()
        };
        assert!(matches!(
            run_var_backtest(&market, &unknown_symbol),
            Err(Error::InvalidInput(_))
        ));

        let bad_weights = VarBacktestConfig {
            lookback_days: 4,
            weights: Some(BTreeMap::from([("SPY".to_string(), 0.5)])),
            ..Default::default()
        };
        assert!(matches!(
            run_var_backtest(&market, &bad_weights),
            Err(Error::InvalidPortfolio(_))
        ));
    }

    #[test]
    fn test_historical_var_is_calibrated_on_normal_returns() {
        let config = VarBacktestConfig {
            confidence: 0.95,
            lookback_days: 250,
            ..Default::default()
        };

        let mut days = 0;
        let mut breaches = 0;
        for seed in [42, 7, 2024, 31337] {
            let market = SyntheticMarket::new(seed)
                .with_drift(0.0)
                .with_volatility(0.01)
                .generate(&["SPY"], NaiveDate::from_ymd_opt(2015, 1, 1).unwrap(), 2_000)
                .unwrap();
            let result = run_var_backtest(&market, &config).unwrap();

            assert_eq!(result.days.len(), 2_000 - 250 - 1);
            // Output stays in date order
            assert!(result.days.windows(2).all(|w| w[0].date < w[1].date));

            let rate = result.statistics.breach_rate;
            assert!((0.025..=0.08).contains(&rate), "seed {} breach rate {}", seed, rate);

            days += result.statistics.total_days;
            breaches += result.statistics.num_breaches;
        }

        // Pooled over 6,996 days: within 20% of the 5% target
        let pooled = breaches as f64 / days as f64;
        assert!((0.04..=0.06).contains(&pooled), "pooled breach rate {}", pooled);
    }
}
