//! Filesystem loaders for price tables, per-symbol price files and portfolios.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::Deserialize;

use crate::market_data::{MarketData, PriceSeries};
use crate::ports::MarketDataSource;
use crate::types::Portfolio;
use crate::{Error, Result};

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Load a wide price table: a `date` column followed by one column per symbol.
///
/// Empty cells are treated as missing observations. Rows may appear in any order.
pub fn load_price_table(path: impl AsRef<Path>) -> Result<MarketData> {
    let path = path.as_ref();
    let mut reader = csv::Reader::from_path(path)?;

    let headers = reader.headers()?.clone();
    let symbols: Vec<String> = headers.iter().skip(1).map(|h| h.trim().to_string()).collect();
    if symbols.is_empty() {
        return Err(Error::InvalidInput(format!(
            "{}: expected a date column followed by at least one symbol column",
            path.display()
        )));
    }

    let mut rows: Vec<(NaiveDate, Vec<f64>)> = Vec::new();
    for (index, record) in reader.records().enumerate() {
        let record = record?;
        let line = index + 2;

        let raw_date = record.get(0).unwrap_or_default().trim();
        let date = NaiveDate::parse_from_str(raw_date, DATE_FORMAT).map_err(|e| {
            Error::InvalidInput(format!(
                "{} line {}: invalid date '{}': {}",
                path.display(),
                line,
                raw_date,
                e
            ))
        })?;

        let prices = (1..=symbols.len())
            .map(|col| parse_price(record.get(col).unwrap_or_default(), path, line))
            .collect::<Result<Vec<f64>>>()?;
        rows.push((date, prices));
    }

    rows.sort_by_key(|(date, _)| *date);

    let mut table = MarketData::new(rows.iter().map(|(date, _)| *date).collect())?;
    for (col, symbol) in symbols.into_iter().enumerate() {
        let column = rows.iter().map(|(_, prices)| prices[col]).collect();
        table = table.with_column(symbol, column)?;
    }

    tracing::debug!(path = %path.display(), rows = table.len(), "Loaded price table");
    Ok(table)
}

fn parse_price(cell: &str, path: &Path, line: usize) -> Result<f64> {
    let cell = cell.trim();
    if cell.is_empty() {
        return Ok(f64::NAN);
    }
    cell.parse::<f64>().map_err(|e| {
        Error::InvalidInput(format!(
            "{} line {}: invalid price '{}': {}",
            path.display(),
            line,
            cell,
            e
        ))
    })
}

/// Load a portfolio snapshot from JSON. Validation runs during deserialization.
pub fn load_portfolio(path: impl AsRef<Path>) -> Result<Portfolio> {
    let content = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

#[derive(Debug, Deserialize)]
struct CloseRecord {
    date: NaiveDate,
    close: f64,
}

/// Price source reading one `date,close` CSV per symbol.
///
/// Files are looked up as `<root>/<version>/<SYMBOL>.csv`, falling back to
/// `<root>/<SYMBOL>.csv` when no directory exists for the version.
#[derive(Debug, Clone)]
pub struct CsvDirectorySource {
    root: PathBuf,
}

impl CsvDirectorySource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn file_for(&self, symbol: &str, version: &str) -> PathBuf {
        let file_name = format!("{}.csv", symbol);
        let versioned = self.root.join(version);
        if !version.is_empty() && versioned.is_dir() {
            versioned.join(file_name)
        } else {
            self.root.join(file_name)
        }
    }
}

impl MarketDataSource for CsvDirectorySource {
    fn load(&self, symbol: &str, version: &str) -> Result<PriceSeries> {
        let path = self.file_for(symbol, version);
        let mut reader = csv::Reader::from_path(&path)?;

        let points = reader
            .deserialize::<CloseRecord>()
            .map(|record| record.map(|r| (r.date, r.close)))
            .collect::<std::result::Result<Vec<_>, csv::Error>>()?;

        tracing::debug!(symbol, path = %path.display(), points = points.len(), "Loaded price series");
        Ok(PriceSeries::new(symbol, points))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_load_price_table_sorts_and_marks_missing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("prices.csv");
        fs::write(
            &path,
            "date,AAPL,MSFT\n2024-01-03,186.0,\n2024-01-02,185.0,370.0\n",
        )
        .unwrap();

        let table = load_price_table(&path).unwrap();
        assert_eq!(table.symbols(), vec!["AAPL", "MSFT"]);
        assert_eq!(table.column("AAPL").unwrap(), &[185.0, 186.0]);
        assert!(table.column("MSFT").unwrap()[1].is_nan());
        assert_eq!(table.latest_price("MSFT"), Some(370.0));
    }

    #[test]
    fn test_load_price_table_rejects_bad_cells() {
        let dir = tempdir().unwrap();

        let bad_date = dir.path().join("bad_date.csv");
        fs::write(&bad_date, "date,AAPL\n01/02/2024,185.0\n").unwrap();
        assert!(matches!(load_price_table(&bad_date), Err(Error::InvalidInput(_))));

        let bad_price = dir.path().join("bad_price.csv");
        fs::write(&bad_price, "date,AAPL\n2024-01-02,abc\n").unwrap();
        let err = load_price_table(&bad_price).unwrap_err();
        assert!(err.to_string().contains("line 2"));

        let duplicate = dir.path().join("duplicate.csv");
        fs::write(&duplicate, "date,AAPL\n2024-01-02,1.0\n2024-01-02,2.0\n").unwrap();
        assert!(load_price_table(&duplicate).is_err());
    }

    #[test]
    fn test_csv_directory_source() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("AAPL.csv"),
            "date,close\n2024-01-02,185.0\n2024-01-03,186.5\n",
        )
        .unwrap();
        fs::create_dir(dir.path().join("v2")).unwrap();
        fs::write(dir.path().join("v2").join("AAPL.csv"), "date,close\n2024-01-02,1.0\n").unwrap();

        let source = CsvDirectorySource::new(dir.path());

        let latest = source.load("AAPL", "latest").unwrap();
        assert_eq!(latest.len(), 2);
        assert_eq!(latest.points[1].1, 186.5);

        let versioned = source.load("AAPL", "v2").unwrap();
        assert_eq!(versioned.points, vec![(NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(), 1.0)]);

        assert!(source.load("MSFT", "latest").is_err());
    }

    #[test]
    fn test_load_portfolio() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("portfolio.json");
        fs::write(
            &path,
            r#"{"positions": {"AAPL": 100.0}, "weights": {"AAPL": 1.0},
                "nav": 18500.0, "as_of_date": "2024-01-03"}"#,
        )
        .unwrap();

        let portfolio = load_portfolio(&path).unwrap();
        assert_eq!(portfolio.nav(), 18_500.0);

        assert!(load_portfolio(dir.path().join("missing.json")).is_err());
    }
}
