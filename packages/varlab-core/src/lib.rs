//! Varlab Core - Portfolio risk exposure and VaR model validation.
//!
//! This crate provides:
//!
//! - **Domain types**: validated `Portfolio`, `StressScenario`, `RiskMetrics`
//! - **Risk analytics**: historical/parametric VaR, CVaR, Greeks, stress P&L
//! - **Services**: risk-run orchestration and stress testing with a linearity check
//! - **Backtesting**: rolling VaR backtest with the Kupiec POF test
//!
//! # Example
//!
//! ```rust,no_run
//! use std::collections::BTreeMap;
//! use chrono::NaiveDate;
//! use varlab_core::{MarketData, Portfolio, RiskAnalyticsEngine, RiskModel, VarParams};
//!
//! let as_of = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
//! let portfolio = Portfolio::new(
//!     BTreeMap::from([("AAPL".to_string(), 100.0)]),
//!     BTreeMap::from([("AAPL".to_string(), 1.0)]),
//!     19_000.0,
//!     as_of,
//! )?;
//!
//! let market_data: MarketData = unimplemented!("load prices");
//! let engine = RiskAnalyticsEngine::new();
//! let var = engine.calculate_var(&portfolio, &market_data, &VarParams::default())?;
//! println!("95% VaR: {}", var["95%"]);
//! # Ok::<(), varlab_core::Error>(())
//! ```

pub mod adapters;
pub mod backtest;
pub mod config;
pub mod engine;
pub mod market_data;
pub mod ports;
pub mod scenarios;
pub mod services;
pub mod stats;
pub mod synthetic;
pub mod types;

// Re-export commonly used types
pub use types::{
    confidence_label, ApiResponse, Greeks, Portfolio, PortfolioMetadata, RiskMetrics,
    StressScenario, VarMethod, MAX_SHOCK_MAGNITUDE, WEIGHT_SUM_TOLERANCE,
};

// Re-export main functionality
pub use backtest::{
    kupiec_pof, run_var_backtest, run_var_backtest_with, BacktestDay, BacktestStatistics,
    CalibrationAssessment, CalibrationVerdict, KupiecTest, TransitionCounts, VarBacktest,
    VarBacktestConfig,
};
pub use config::{LogLevel, RiskConfig};
pub use engine::{RiskAnalyticsEngine, RiskModel, StressRow, VarParams};
pub use market_data::{MarketData, PriceSeries};
pub use ports::{MarketDataSource, ReportSink, RiskReport, VarCvar};
pub use services::{
    LinearityCheck, RiskCalculationRequest, RiskCalculationResponse, RiskCalculationService,
    StressTestRequest, StressTestResponse, StressTestResult, StressTestingService,
};

/// Error types for varlab-core operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Insufficient data: required {required} observations, only {available} available")]
    InsufficientData { required: usize, available: usize },

    #[error("Pricing failed for '{symbol}': {reason}")]
    Pricing { symbol: String, reason: String },

    #[error("Confidence level must be in (0, 1): {0}")]
    InvalidConfidence(f64),

    #[error("Unknown VaR method: {0}")]
    UnknownMethod(String),

    #[error("Invalid portfolio: {0}")]
    InvalidPortfolio(String),

    #[error("Invalid stress scenario '{name}': {reason}")]
    InvalidScenario { name: String, reason: String },

    #[error("Invalid risk metrics: {0}")]
    InvalidRiskMetrics(String),

    #[error("No market data loaded for any portfolio symbol")]
    NoMarketData,

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type for varlab-core operations.
pub type Result<T> = std::result::Result<T, Error>;
