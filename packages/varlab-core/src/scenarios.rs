//! Stress scenario catalogs: historical drawdowns, a standard shock ladder,
//! sector events and file-based catalogs.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use chrono::NaiveDate;

use crate::types::StressScenario;
use crate::{Error, Result};

/// Risk factor that shocks every equity price.
pub const EQUITY_ALL: &str = "equity_all";

/// (name, drawdown, description, trough date)
const HISTORICAL_EVENTS: [(&str, f64, &str, (i32, u32, u32)); 7] = [
    (
        "Black Monday 1987",
        -0.226,
        "Single-day crash, program trading (1 day)",
        (1987, 10, 19),
    ),
    (
        "Dot-com Crash 2000-2002",
        -0.49,
        "Tech bubble burst (31 months)",
        (2002, 10, 9),
    ),
    (
        "2008 Financial Crisis",
        -0.57,
        "Lehman collapse, credit freeze, GFC (17 months)",
        (2009, 3, 9),
    ),
    (
        "Flash Crash 2010",
        -0.09,
        "Intraday algorithmic crash (36 minutes)",
        (2010, 5, 6),
    ),
    (
        "European Debt Crisis 2011",
        -0.19,
        "Greek debt crisis contagion (5 months)",
        (2011, 10, 3),
    ),
    (
        "COVID Crash 2020",
        -0.34,
        "Pandemic market crash (33 days)",
        (2020, 3, 23),
    ),
    (
        "2022 Bear Market",
        -0.25,
        "Fed rate hikes, inflation fears (9 months)",
        (2022, 10, 12),
    ),
];

const SECTOR_EVENTS: [(&str, &str, &[(&str, f64)]); 3] = [
    (
        "Tech Selloff 2022",
        "Tech sector drawdown in 2022",
        &[
            ("AAPL", -0.28),
            ("GOOGL", -0.39),
            ("MSFT", -0.29),
            ("AMZN", -0.50),
            ("META", -0.64),
        ],
    ),
    (
        "Bank Crisis 2023",
        "Regional bank failures",
        &[("JPM", -0.10), ("BAC", -0.25), ("WFC", -0.20), ("GS", -0.15)],
    ),
    (
        "Energy Crash 2020",
        "Oil price collapse",
        &[("XOM", -0.45), ("CVX", -0.40), ("COP", -0.55)],
    ),
];

const LADDER: [f64; 5] = [-0.10, -0.20, -0.40, -0.60, 0.20];

fn date(ymd: (i32, u32, u32)) -> Result<NaiveDate> {
    NaiveDate::from_ymd_opt(ymd.0, ymd.1, ymd.2)
        .ok_or_else(|| Error::InvalidInput(format!("invalid calendar date {:?}", ymd)))
}

/// Market-wide replays of documented equity drawdowns.
pub fn historical_events() -> Result<Vec<StressScenario>> {
    HISTORICAL_EVENTS
        .iter()
        .map(|(name, drawdown, description, trough)| {
            StressScenario::new(
                *name,
                BTreeMap::from([(EQUITY_ALL.to_string(), *drawdown)]),
                *description,
                date(*trough)?,
            )
        })
        .collect()
}

/// Uniform equity shocks of -10%, -20%, -40%, -60% and +20%.
pub fn standard_ladder(date_calibrated: NaiveDate) -> Result<Vec<StressScenario>> {
    LADDER
        .iter()
        .map(|shock| {
            StressScenario::new(
                format!("Equity {:+.0}%", shock * 100.0),
                BTreeMap::from([(EQUITY_ALL.to_string(), *shock)]),
                "Uniform equity shock",
                date_calibrated,
            )
        })
        .collect()
}

/// Sector events restricted to the given symbols.
///
/// Events touching none of the symbols are left out.
pub fn sector_events(held: &[&str], date_calibrated: NaiveDate) -> Result<Vec<StressScenario>> {
    let mut scenarios = Vec::new();

    for (name, description, shocks) in SECTOR_EVENTS {
        let relevant: BTreeMap<String, f64> = shocks
            .iter()
            .filter(|(symbol, _)| held.contains(symbol))
            .map(|(symbol, shock)| (symbol.to_string(), *shock))
            .collect();

        if relevant.is_empty() {
            continue;
        }
        scenarios.push(StressScenario::new(
            name,
            relevant,
            description,
            date_calibrated,
        )?);
    }

    Ok(scenarios)
}

/// Load a list of scenarios from a `.yaml`/`.yml` or `.json` file.
pub fn load_catalog(path: impl AsRef<Path>) -> Result<Vec<StressScenario>> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)?;

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase);

    let scenarios: Vec<StressScenario> = match extension.as_deref() {
        Some("yaml") | Some("yml") => serde_yaml::from_str(&content)?,
        Some("json") => serde_json::from_str(&content)?,
        _ => {
            return Err(Error::InvalidInput(format!(
                "unsupported scenario file '{}': expected .yaml, .yml or .json",
                path.display()
            )))
        }
    };

    tracing::debug!(path = %path.display(), count = scenarios.len(), "Loaded scenario catalog");
    Ok(scenarios)
}
