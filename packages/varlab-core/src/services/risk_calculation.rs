//! Risk run orchestration: load prices, compute VaR, CVaR and Greeks, report.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Serialize;
use serde_json::json;

use crate::engine::{RiskModel, VarParams};
use crate::market_data::{MarketData, PriceSeries};
use crate::ports::{MarketDataSource, ReportSink, RiskReport};
use crate::types::{Greeks, Portfolio, RiskMetrics, VarMethod};
use crate::{Error, Result};

/// Parameters of a risk run.
#[derive(Debug, Clone)]
pub struct RiskCalculationRequest {
    pub portfolio: Portfolio,
    /// Dataset version passed through to the market data source
    pub market_data_version: String,
    pub methods: Vec<VarMethod>,
    pub confidence_levels: Vec<f64>,
    pub window_days: usize,
    pub compute_greeks: bool,
    pub generate_report: bool,
}

impl RiskCalculationRequest {
    /// Request with default methods, levels and window.
    pub fn new(portfolio: Portfolio, market_data_version: impl Into<String>) -> Self {
        let defaults = VarParams::default();
        Self {
            portfolio,
            market_data_version: market_data_version.into(),
            methods: vec![defaults.method],
            confidence_levels: defaults.confidence_levels,
            window_days: defaults.window_days,
            compute_greeks: true,
            generate_report: false,
        }
    }

    pub fn with_methods(mut self, methods: Vec<VarMethod>) -> Self {
        self.methods = methods;
        self
    }

    pub fn with_confidence_levels(mut self, levels: Vec<f64>) -> Self {
        self.confidence_levels = levels;
        self
    }

    pub fn with_window_days(mut self, window_days: usize) -> Self {
        self.window_days = window_days;
        self
    }

    pub fn with_greeks(mut self, compute_greeks: bool) -> Self {
        self.compute_greeks = compute_greeks;
        self
    }

    pub fn with_report(mut self, generate_report: bool) -> Self {
        self.generate_report = generate_report;
        self
    }
}

/// Result of a risk run.
#[derive(Debug, Clone, Serialize)]
pub struct RiskCalculationResponse {
    pub metrics: RiskMetrics,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report_path: Option<PathBuf>,
    pub warnings: Vec<String>,
}

/// Coordinates market data loading, risk computation and reporting.
pub struct RiskCalculationService<D, R> {
    data_source: D,
    risk_model: R,
    report_sink: Option<Box<dyn ReportSink>>,
}

impl<D: MarketDataSource, R: RiskModel> RiskCalculationService<D, R> {
    pub fn new(data_source: D, risk_model: R) -> Self {
        Self {
            data_source,
            risk_model,
            report_sink: None,
        }
    }

    pub fn with_report_sink(mut self, sink: Box<dyn ReportSink>) -> Self {
        self.report_sink = Some(sink);
        self
    }

    pub fn risk_model(&self) -> &R {
        &self.risk_model
    }

    /// Run the full workflow for one portfolio.
    ///
    /// With several methods, VaR and CVaR keys are prefixed `"{method}_{label}"`.
    pub fn calculate(&self, request: &RiskCalculationRequest) -> Result<RiskCalculationResponse> {
        let mut warnings = Vec::new();

        let methods = if request.methods.is_empty() {
            vec![VarMethod::default()]
        } else {
            request.methods.clone()
        };
        let prefixed = methods.len() > 1;

        let market_data = self.load_market_data(request, &mut warnings)?;
        let portfolio = &request.portfolio;

        let mut var = BTreeMap::new();
        let mut cvar = BTreeMap::new();
        for method in &methods {
            let params = VarParams::new(
                *method,
                request.confidence_levels.clone(),
                request.window_days,
            );
            let method_var = self.risk_model.calculate_var(portfolio, &market_data, &params)?;
            let method_cvar = self
                .risk_model
                .calculate_cvar(portfolio, &market_data, &params)?;

            var.extend(label_results(method_var, *method, prefixed));
            cvar.extend(label_results(method_cvar, *method, prefixed));
        }

        let greeks = if request.compute_greeks {
            match self.risk_model.compute_greeks(portfolio, &market_data) {
                Ok(greeks) => greeks,
                Err(e) => {
                    tracing::warn!(error = %e, "Greeks computation failed");
                    warnings.push(format!("Greeks computation failed: {}", e));
                    Greeks::default()
                }
            }
        } else {
            Greeks::default()
        };

        let portfolio_id = match portfolio.metadata().strategy_name.as_str() {
            "" => "unknown",
            name => name,
        };

        let metadata = json!({
            "methods": methods.iter().map(VarMethod::as_str).collect::<Vec<_>>(),
            "confidence_levels": request.confidence_levels,
            "window_days": request.window_days,
            "market_data_version": request.market_data_version,
        });
        let metadata = match metadata {
            serde_json::Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };

        let metrics = RiskMetrics::new(
            var,
            cvar,
            greeks,
            portfolio.as_of_date(),
            portfolio_id,
            metadata,
        )?;

        let report_path = match (&self.report_sink, request.generate_report) {
            (Some(sink), true) => Some(sink.write_risk_report(&RiskReport::from(&metrics))?),
            (None, true) => {
                warnings.push("Report requested but no report sink is configured".to_string());
                None
            }
            _ => None,
        };

        tracing::info!(
            portfolio = portfolio_id,
            levels = metrics.confidence_levels().len(),
            warnings = warnings.len(),
            "Risk calculation complete"
        );

        Ok(RiskCalculationResponse {
            metrics,
            report_path,
            warnings,
        })
    }

    /// Load one series per held symbol. Individual failures become warnings.
    fn load_market_data(
        &self,
        request: &RiskCalculationRequest,
        warnings: &mut Vec<String>,
    ) -> Result<MarketData> {
        let mut series: Vec<PriceSeries> = Vec::new();

        for symbol in request.portfolio.symbols() {
            match self.data_source.load(symbol, &request.market_data_version) {
                Ok(loaded) if !loaded.is_empty() => series.push(loaded),
                Ok(_) => {
                    tracing::warn!(symbol, "Empty price series, skipping");
                    warnings.push(format!("No prices for {}", symbol));
                }
                Err(e) => {
                    tracing::warn!(symbol, error = %e, "Failed to load prices, skipping");
                    warnings.push(format!("Failed to load {}: {}", symbol, e));
                }
            }
        }

        if series.is_empty() {
            return Err(Error::NoMarketData);
        }

        MarketData::from_series(series)
    }
}

fn label_results(
    results: BTreeMap<String, f64>,
    method: VarMethod,
    prefixed: bool,
) -> impl Iterator<Item = (String, f64)> {
    results.into_iter().map(move |(label, value)| {
        if prefixed {
            (format!("{}_{}", method, label), value)
        } else {
            (label, value)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::InMemoryMarketData;
    use crate::engine::{RiskAnalyticsEngine, StressRow};
    use crate::types::{PortfolioMetadata, StressScenario};
    use chrono::{Duration, NaiveDate};
    use std::sync::Mutex;

    fn start() -> NaiveDate {
        NaiveDate::from_ymd_opt(2023, 1, 2).unwrap()
    }

    fn series(days: usize, initial: f64, phase: f64) -> Vec<(NaiveDate, f64)> {
        let mut price = initial;
        (0..=days)
            .map(|t| {
                if t > 0 {
                    let x = t as f64;
                    price *= 1.0 + 0.012 * (0.9 * x + phase).sin() + 0.004 * (2.1 * x).cos();
                }
                (start() + Duration::days(t as i64), price)
            })
            .collect()
    }

    fn source(days: usize) -> InMemoryMarketData {
        InMemoryMarketData::new()
            .with_series("AAPL", series(days, 190.0, 0.0))
            .with_series("MSFT", series(days, 370.0, 0.8))
    }

    fn portfolio() -> Portfolio {
        Portfolio::new(
            BTreeMap::from([("AAPL".to_string(), 260.0), ("MSFT".to_string(), 135.0)]),
            BTreeMap::from([("AAPL".to_string(), 0.5), ("MSFT".to_string(), 0.5)]),
            100_000.0,
            start(),
        )
        .unwrap()
        .with_metadata(PortfolioMetadata {
            strategy_name: "core-equity".to_string(),
            ..Default::default()
        })
    }

    #[test]
    fn test_single_method_run() {
        let service = RiskCalculationService::new(source(300), RiskAnalyticsEngine::new());
        let response = service
            .calculate(&RiskCalculationRequest::new(portfolio(), "v1"))
            .unwrap();

        let metrics = &response.metrics;
        assert_eq!(metrics.portfolio_id(), "core-equity");
        assert_eq!(metrics.confidence_levels(), vec!["95%", "99%"]);
        assert!(metrics.cvar_at("99%").unwrap() <= metrics.var_at("99%").unwrap());
        assert!(metrics.has_greeks());
        assert_eq!(metrics.calculation_metadata()["window_days"], 250);
        assert_eq!(metrics.calculation_metadata()["market_data_version"], "v1");
        assert!(response.warnings.is_empty());
        assert!(response.report_path.is_none());
    }

    #[test]
    fn test_multiple_methods_are_prefixed() {
        let service = RiskCalculationService::new(source(300), RiskAnalyticsEngine::new());
        let request = RiskCalculationRequest::new(portfolio(), "v1")
            .with_methods(vec![VarMethod::Historical, VarMethod::Parametric])
            .with_confidence_levels(vec![0.95]);

        let metrics = service.calculate(&request).unwrap().metrics;
        assert_eq!(
            metrics.confidence_levels(),
            vec!["historical_95%", "parametric_95%"]
        );
        assert_eq!(
            metrics.var().keys().collect::<Vec<_>>(),
            metrics.cvar().keys().collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_missing_symbol_becomes_warning() {
        let data = InMemoryMarketData::new().with_series("AAPL", series(300, 190.0, 0.0));
        let service = RiskCalculationService::new(data, RiskAnalyticsEngine::new());

        let response = service
            .calculate(&RiskCalculationRequest::new(portfolio(), "v1"))
            .unwrap();
        assert_eq!(response.warnings.len(), 1);
        assert!(response.warnings[0].contains("MSFT"));
    }

    #[test]
    fn test_no_market_data() {
        let service =
            RiskCalculationService::new(InMemoryMarketData::new(), RiskAnalyticsEngine::new());
        let result = service.calculate(&RiskCalculationRequest::new(portfolio(), "v1"));
        assert!(matches!(result, Err(Error::NoMarketData)));
    }

    #[test]
    fn test_short_history_fails() {
        let service = RiskCalculationService::new(source(50), RiskAnalyticsEngine::new());
        let result = service.calculate(&RiskCalculationRequest::new(portfolio(), "v1"));
        assert!(matches!(
            result,
            Err(Error::InsufficientData {
                required: 250,
                available: 50
            })
        ));
    }

    struct NoGreeks;

    impl RiskModel for NoGreeks {
        fn value_portfolio(&self, p: &Portfolio, m: &MarketData) -> Result<f64> {
            RiskAnalyticsEngine.value_portfolio(p, m)
        }

        fn calculate_var(
            &self,
            p: &Portfolio,
            m: &MarketData,
            params: &VarParams,
        ) -> Result<BTreeMap<String, f64>> {
            RiskAnalyticsEngine.calculate_var(p, m, params)
        }

        fn calculate_cvar(
            &self,
            p: &Portfolio,
            m: &MarketData,
            params: &VarParams,
        ) -> Result<BTreeMap<String, f64>> {
            RiskAnalyticsEngine.calculate_cvar(p, m, params)
        }

        fn compute_greeks(&self, _p: &Portfolio, _m: &MarketData) -> Result<Greeks> {
            Err(Error::InvalidInput("no option model".to_string()))
        }

        fn stress_test(
            &self,
            p: &Portfolio,
            m: &MarketData,
            s: &[StressScenario],
        ) -> Result<Vec<StressRow>> {
            RiskAnalyticsEngine.stress_test(p, m, s)
        }
    }

    #[test]
    fn test_greeks_failure_is_a_warning() {
        let service = RiskCalculationService::new(source(300), NoGreeks);
        let response = service
            .calculate(&RiskCalculationRequest::new(portfolio(), "v1"))
            .unwrap();

        assert!(!response.metrics.has_greeks());
        assert!(response.warnings[0].contains("Greeks"));
    }

    #[derive(Default)]
    struct RecordingSink {
        reports: Mutex<Vec<RiskReport>>,
    }

    impl ReportSink for std::sync::Arc<RecordingSink> {
        fn write_risk_report(&self, report: &RiskReport) -> Result<PathBuf> {
            self.reports.lock().unwrap().push(report.clone());
            Ok(PathBuf::from("memory://report"))
        }
    }

    #[test]
    fn test_report_generation() {
        let sink = std::sync::Arc::new(RecordingSink::default());
        let service = RiskCalculationService::new(source(300), RiskAnalyticsEngine::new())
            .with_report_sink(Box::new(sink.clone()));

        let response = service
            .calculate(&RiskCalculationRequest::new(portfolio(), "v1").with_report(true))
            .unwrap();

        assert_eq!(response.report_path, Some(PathBuf::from("memory://report")));
        let reports = sink.reports.lock().unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].portfolio_id, "core-equity");
        assert_eq!(reports[0].levels.len(), 2);
    }

    #[test]
    fn test_report_requested_without_sink() {
        let service = RiskCalculationService::new(source(300), RiskAnalyticsEngine::new());
        let response = service
            .calculate(&RiskCalculationRequest::new(portfolio(), "v1").with_report(true))
            .unwrap();
        assert!(response.report_path.is_none());
        assert_eq!(response.warnings.len(), 1);
    }
}
