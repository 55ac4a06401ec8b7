//! JSON risk report persistence.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::ports::{ReportSink, RiskReport};
use crate::Result;

/// Writes each report to its own timestamped JSON file in a directory.
#[derive(Debug, Clone)]
pub struct JsonReportWriter {
    dir: PathBuf,
}

impl JsonReportWriter {
    /// Create a writer for the default report directory.
    ///
    /// Default directory: `~/.varlab/reports`
    /// Can be overridden with the `VARLAB_REPORT_DIR` environment variable.
    pub fn new() -> Self {
        Self::with_dir(Self::default_dir())
    }

    /// Create a writer for a custom directory.
    pub fn with_dir(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn default_dir() -> PathBuf {
        if let Ok(dir) = env::var("VARLAB_REPORT_DIR") {
            return PathBuf::from(dir);
        }

        directories::BaseDirs::new()
            .map(|dirs| dirs.home_dir().join(".varlab/reports"))
            .unwrap_or_else(|| PathBuf::from("reports"))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Read a previously written report.
    pub fn read(path: impl AsRef<Path>) -> Result<RiskReport> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// First free file name for the current second.
    fn next_path(&self) -> PathBuf {
        let stamp = Utc::now().format("%Y%m%d_%H%M%S");
        let mut path = self.dir.join(format!("risk_report_{}.json", stamp));
        let mut suffix = 1;
        while path.exists() {
            path = self
                .dir
                .join(format!("risk_report_{}_{}.json", stamp, suffix));
            suffix += 1;
        }
        path
    }
}

impl Default for JsonReportWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl ReportSink for JsonReportWriter {
    fn write_risk_report(&self, report: &RiskReport) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;

        let path = self.next_path();
        let content = serde_json::to_string_pretty(report)?;
        fs::write(&path, content)?;

        tracing::info!(path = %path.display(), portfolio = %report.portfolio_id, "Wrote risk report");
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::VarCvar;
    use crate::types::Greeks;
    use chrono::NaiveDate;
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    fn report() -> RiskReport {
        RiskReport {
            portfolio_id: "core-equity".to_string(),
            as_of_date: NaiveDate::from_ymd_opt(2024, 3, 28).unwrap(),
            levels: BTreeMap::from([(
                "95%".to_string(),
                VarCvar {
                    var: -1_200.0,
                    cvar: -1_650.0,
                },
            )]),
            greeks: Greeks {
                delta: Some(1.0),
                ..Default::default()
            },
            calculation_metadata: serde_json::Map::new(),
        }
    }

    #[test]
    fn test_write_and_read_back() {
        let dir = tempdir().unwrap();
        let writer = JsonReportWriter::with_dir(dir.path().join("nested/reports"));

        let path = writer.write_risk_report(&report()).unwrap();
        assert!(path.exists());

        let file_name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(file_name.starts_with("risk_report_"));
        assert!(file_name.ends_with(".json"));

        assert_eq!(JsonReportWriter::read(&path).unwrap(), report());
    }

    #[test]
    fn test_consecutive_writes_do_not_overwrite() {
        let dir = tempdir().unwrap();
        let writer = JsonReportWriter::with_dir(dir.path());

        let first = writer.write_risk_report(&report()).unwrap();
        let second = writer.write_risk_report(&report()).unwrap();
        assert_ne!(first, second);
        assert!(first.exists() && second.exists());
    }
}
