//! Varlab CLI - portfolio VaR, stress testing and VaR backtesting.
//!
//! Every command prints a JSON `ApiResponse` on stdout; logs go to stderr.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{bail, Context};
use chrono::{Duration, Utc};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use varlab_core::{
    adapters::{load_portfolio, load_price_table, CsvDirectorySource, InMemoryMarketData, JsonReportWriter},
    config::{parse_levels, LogLevel},
    run_var_backtest, scenarios,
    synthetic::SyntheticMarket,
    ApiResponse, MarketData, MarketDataSource, Portfolio, RiskAnalyticsEngine,
    RiskCalculationRequest, RiskCalculationService, RiskConfig, StressScenario, StressTestRequest,
    StressTestingService, VarBacktestConfig, VarMethod,
};

#[derive(Parser)]
#[command(name = "varlab")]
#[command(about = "Portfolio VaR, stress testing and VaR model validation")]
#[command(version)]
struct Cli {
    /// Config file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Calculate VaR, CVaR and Greeks for a portfolio
    Var {
        /// Portfolio snapshot (JSON)
        #[arg(short, long)]
        portfolio: PathBuf,
        /// Wide price table (CSV: date,SYM1,SYM2,...)
        #[arg(long, conflicts_with = "price_dir")]
        prices: Option<PathBuf>,
        /// Directory of per-symbol CSV files (date,close)
        #[arg(long)]
        price_dir: Option<PathBuf>,
        /// Dataset version for the price directory
        #[arg(long, default_value = "latest")]
        data_version: String,
        /// VaR methods (comma-separated: historical, parametric)
        #[arg(short, long)]
        method: Option<String>,
        /// Confidence levels (comma-separated, e.g. 0.95,0.99)
        #[arg(short, long)]
        confidence: Option<String>,
        /// Historical window in days
        #[arg(short, long)]
        window: Option<usize>,
        /// Skip Greeks
        #[arg(long)]
        no_greeks: bool,
        /// Write a JSON risk report
        #[arg(long)]
        report: bool,
    },
    /// Revalue a portfolio under stress scenarios
    Stress {
        /// Portfolio snapshot (JSON)
        #[arg(short, long)]
        portfolio: PathBuf,
        /// Wide price table (CSV: date,SYM1,SYM2,...)
        #[arg(long)]
        prices: PathBuf,
        /// Scenario catalog (YAML or JSON); built-in scenarios when omitted
        #[arg(short, long)]
        scenarios: Option<PathBuf>,
        /// Skip the linearity check
        #[arg(long)]
        no_linearity: bool,
    },
    /// Backtest historical VaR with the Kupiec test
    Backtest {
        /// Wide price table (CSV); synthetic data when omitted
        #[arg(long)]
        prices: Option<PathBuf>,
        /// Confidence level
        #[arg(short, long)]
        confidence: Option<f64>,
        /// Lookback window in days
        #[arg(short, long)]
        lookback: Option<usize>,
        /// Portfolio NAV
        #[arg(long)]
        nav: Option<f64>,
        /// Symbols for synthetic data (comma-separated)
        #[arg(long, default_value = "AAPL,MSFT,GOOGL,AMZN,META")]
        symbols: String,
        /// Business days of synthetic data
        #[arg(long, default_value = "1000")]
        days: usize,
        /// Random seed for synthetic data
        #[arg(long, default_value = "42")]
        seed: u64,
        /// Include per-day rows in the output
        #[arg(long)]
        detail: bool,
    },
    /// List built-in stress scenarios
    Scenarios {
        /// Held symbols, used to select sector events (comma-separated)
        #[arg(long)]
        symbols: Option<String>,
    },
}

/// Command result and whether the process should exit successfully.
struct Outcome {
    data: Value,
    success: bool,
}

impl Outcome {
    fn ok(data: Value) -> Self {
        Self {
            data,
            success: true,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match build_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            println!("{}", render(&ApiResponse::<Value>::err(format!("{:#}", e))));
            return ExitCode::FAILURE;
        }
    };

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_filter_str())),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    tracing::debug!(?config, "Configuration loaded");

    let (output, success) = match run(cli.command, &config) {
        Ok(outcome) => (render(&ApiResponse::ok(outcome.data)), outcome.success),
        Err(e) => {
            tracing::error!("{:#}", e);
            (render(&ApiResponse::<Value>::err(format!("{:#}", e))), false)
        }
    };

    println!("{}", output);

    if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn render<T: serde::Serialize>(response: &ApiResponse<T>) -> String {
    serde_json::to_string_pretty(response)
        .unwrap_or_else(|e| format!(r#"{{"ok": false, "error": "serialization failed: {}"}}"#, e))
}

fn build_config(cli: &Cli) -> anyhow::Result<RiskConfig> {
    let mut config = RiskConfig::load(cli.config.as_deref())?;
    if let Some(level) = &cli.log_level {
        config.log_level = level.parse::<LogLevel>()?;
    }
    Ok(config)
}

fn run(command: Commands, config: &RiskConfig) -> anyhow::Result<Outcome> {
    match command {
        Commands::Var {
            portfolio,
            prices,
            price_dir,
            data_version,
            method,
            confidence,
            window,
            no_greeks,
            report,
        } => {
            let portfolio = read_portfolio(&portfolio)?;

            let mut request = RiskCalculationRequest::new(portfolio, data_version)
                .with_methods(config.var.methods.clone())
                .with_confidence_levels(config.var.confidence_levels.clone())
                .with_window_days(window.unwrap_or(config.var.window_days))
                .with_greeks(!no_greeks)
                .with_report(report);
            if let Some(methods) = method {
                request = request.with_methods(parse_methods(&methods)?);
            }
            if let Some(levels) = confidence {
                request = request.with_confidence_levels(parse_levels(&levels)?);
            }

            match (prices, price_dir) {
                (Some(prices), _) => {
                    let table = read_price_table(&prices)?;
                    handle_var(InMemoryMarketData::from_market_data(&table), &request, config)
                }
                (None, Some(dir)) => handle_var(CsvDirectorySource::new(dir), &request, config),
                (None, None) => bail!("either --prices or --price-dir is required"),
            }
        }
        Commands::Stress {
            portfolio,
            prices,
            scenarios: scenario_file,
            no_linearity,
        } => {
            let portfolio = read_portfolio(&portfolio)?;
            let market_data = read_price_table(&prices)?;
            let scenario_list = match scenario_file {
                Some(path) => scenarios::load_catalog(&path)
                    .with_context(|| format!("failed to load scenarios from {}", path.display()))?,
                None => builtin_scenarios(config, &portfolio.symbols())?,
            };
            handle_stress(portfolio, scenario_list, market_data, !no_linearity, config)
        }
        Commands::Backtest {
            prices,
            confidence,
            lookback,
            nav,
            symbols,
            days,
            seed,
            detail,
        } => {
            let market_data = match prices {
                Some(path) => read_price_table(&path)?,
                None => {
                    let symbols = split_list(&symbols);
                    let start = Utc::now().date_naive() - Duration::days((days as i64) * 7 / 5);
                    SyntheticMarket::new(seed).generate(&symbols, start, days)?
                }
            };

            let backtest_config = VarBacktestConfig {
                confidence: confidence.unwrap_or(config.backtest.confidence),
                lookback_days: lookback.unwrap_or(config.backtest.lookback_days),
                nav: nav.unwrap_or(config.backtest.nav),
                weights: config.backtest.weights.clone(),
            };
            handle_backtest(&market_data, &backtest_config, detail)
        }
        Commands::Scenarios { symbols } => {
            let held = symbols.as_deref().map(split_list).unwrap_or_default();
            let list = builtin_scenarios(config, &held)?;
            Ok(Outcome::ok(json!({
                "count": list.len(),
                "scenarios": list,
            })))
        }
    }
}

fn handle_var<D: MarketDataSource>(
    source: D,
    request: &RiskCalculationRequest,
    config: &RiskConfig,
) -> anyhow::Result<Outcome> {
    let mut service = RiskCalculationService::new(source, RiskAnalyticsEngine::new());
    if request.generate_report {
        let writer = match &config.report.dir {
            Some(dir) => JsonReportWriter::with_dir(dir),
            None => JsonReportWriter::new(),
        };
        service = service.with_report_sink(Box::new(writer));
    }

    let response = service.calculate(request)?;
    Ok(Outcome::ok(json!({
        "portfolio_id": response.metrics.portfolio_id(),
        "as_of_date": response.metrics.as_of_date(),
        "var": response.metrics.var(),
        "cvar": response.metrics.cvar(),
        "greeks": response.metrics.greeks(),
        "calculation_metadata": response.metrics.calculation_metadata(),
        "report_path": response.report_path,
        "warnings": response.warnings,
    })))
}

fn handle_stress(
    portfolio: Portfolio,
    scenarios: Vec<StressScenario>,
    market_data: MarketData,
    validate_linearity: bool,
    config: &RiskConfig,
) -> anyhow::Result<Outcome> {
    let request = StressTestRequest::new(portfolio, scenarios, market_data)
        .with_linearity_check(validate_linearity && config.stress.validate_linearity)
        .with_linearity_factor(config.stress.linearity_factor.clone());

    let response = StressTestingService::new(RiskAnalyticsEngine::new()).run(&request)?;
    Ok(Outcome::ok(json!({
        "results": response.results,
        "worst_case": response.worst_case().map(|r| &r.scenario_name),
        "best_case": response.best_case().map(|r| &r.scenario_name),
        "linearity": response.linearity,
        "warnings": response.warnings,
    })))
}

fn handle_backtest(
    market_data: &MarketData,
    config: &VarBacktestConfig,
    detail: bool,
) -> anyhow::Result<Outcome> {
    let result = run_var_backtest(market_data, config)?;
    let passed = result.passed();

    let mut data = json!({
        "test_parameters": result.config,
        "statistics": result.statistics,
        "kupiec_test": result.kupiec,
        "independence_test": result.transitions,
        "assessment": result.assessment,
        "interpretation": result.assessment.description(),
    });
    if detail {
        data["results"] = json!(result.days);
    }

    Ok(Outcome {
        data,
        success: passed,
    })
}

fn builtin_scenarios(config: &RiskConfig, held: &[&str]) -> anyhow::Result<Vec<StressScenario>> {
    let today = Utc::now().date_naive();
    let mut list = Vec::new();
    if config.stress.historical_events {
        list.extend(scenarios::historical_events()?);
    }
    if config.stress.standard_ladder {
        list.extend(scenarios::standard_ladder(today)?);
    }
    if config.stress.sector_events {
        list.extend(scenarios::sector_events(held, today)?);
    }
    Ok(list)
}

fn read_portfolio(path: &Path) -> anyhow::Result<Portfolio> {
    load_portfolio(path).with_context(|| format!("failed to load portfolio {}", path.display()))
}

fn read_price_table(path: &Path) -> anyhow::Result<MarketData> {
    load_price_table(path).with_context(|| format!("failed to load prices {}", path.display()))
}

fn parse_methods(text: &str) -> anyhow::Result<Vec<VarMethod>> {
    Ok(split_list(text)
        .into_iter()
        .map(str::parse)
        .collect::<varlab_core::Result<Vec<VarMethod>>>()?)
}

fn split_list(text: &str) -> Vec<&str> {
    text.split(',').map(str::trim).filter(|s| !s.is_empty()).collect()
}
