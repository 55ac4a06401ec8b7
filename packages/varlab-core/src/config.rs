//! Configuration management.
//!
//! Sources, lowest to highest precedence: built-in defaults, a TOML file,
//! `VARLAB_*` environment variables, then command-line flags (applied by the binary).

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::backtest::VarBacktestConfig;
use crate::engine::VarParams;
use crate::types::VarMethod;
use crate::{Error, Result};

/// Log levels accepted by the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl FromStr for LogLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            _ => Err(Error::Config(format!(
                "invalid log level '{}', expected one of: trace, debug, info, warn, error",
                s
            ))),
        }
    }
}

impl LogLevel {
    /// Filter directive understood by `tracing_subscriber::EnvFilter`.
    pub fn as_filter_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_filter_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VarSection {
    pub methods: Vec<VarMethod>,
    pub confidence_levels: Vec<f64>,
    pub window_days: usize,
}

impl Default for VarSection {
    fn default() -> Self {
        let params = VarParams::default();
        Self {
            methods: vec![params.method],
            confidence_levels: params.confidence_levels,
            window_days: params.window_days,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StressSection {
    pub validate_linearity: bool,
    pub linearity_factor: String,
    /// Include the built-in historical drawdown replays
    pub historical_events: bool,
    /// Include the uniform -10% .. +20% shock ladder
    pub standard_ladder: bool,
    /// Include sector events for held symbols
    pub sector_events: bool,
}

impl Default for StressSection {
    fn default() -> Self {
        Self {
            validate_linearity: true,
            linearity_factor: "equity_all".to_string(),
            historical_events: true,
            standard_ladder: true,
            sector_events: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportSection {
    /// Report directory; `~/.varlab/reports` when unset
    pub dir: Option<PathBuf>,
}

/// Top-level configuration file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    pub log_level: LogLevel,
    pub var: VarSection,
    pub stress: StressSection,
    pub backtest: VarBacktestConfig,
    pub report: ReportSection,
}

impl RiskConfig {
    /// Default config file path.
    ///
    /// Default path: `~/.varlab/config.toml`
    /// Can be overridden with the `VARLAB_CONFIG` environment variable.
    pub fn default_path() -> PathBuf {
        if let Ok(path) = std::env::var("VARLAB_CONFIG") {
            return PathBuf::from(path);
        }

        directories::BaseDirs::new()
            .map(|dirs| dirs.home_dir().join(".varlab/config.toml"))
            .unwrap_or_else(|| PathBuf::from("varlab.toml"))
    }

    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        let config: RiskConfig = toml::from_str(&content).map_err(|e| {
            Error::Config(format!("failed to parse {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Build configuration from defaults, file and environment.
    ///
    /// An explicit `path` must exist; the default path is optional.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let default = Self::default_path();
                if default.exists() {
                    Self::from_file(&default)?
                } else {
                    Self::default()
                }
            }
        };

        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `VARLAB_*` overrides obtained from `lookup`.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(level) = lookup("VARLAB_LOG_LEVEL") {
            self.log_level = level.parse()?;
        }

        if let Some(window) = lookup("VARLAB_WINDOW_DAYS") {
            self.var.window_days = window.trim().parse().map_err(|_| {
                Error::Config(format!("VARLAB_WINDOW_DAYS must be an integer, got '{}'", window))
            })?;
        }

        if let Some(levels) = lookup("VARLAB_CONFIDENCE_LEVELS") {
            self.var.confidence_levels = parse_levels(&levels)?;
        }

        if let Some(dir) = lookup("VARLAB_REPORT_DIR") {
            self.report.dir = Some(PathBuf::from(dir));
        }

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.var.methods.is_empty() {
            return Err(Error::Config("at least one VaR method is required".to_string()));
        }
        if self.var.confidence_levels.is_empty() {
            return Err(Error::Config(
                "at least one confidence level is required".to_string(),
            ));
        }
        let levels = self
            .var
            .confidence_levels
            .iter()
            .chain(std::iter::once(&self.backtest.confidence));
        for level in levels {
            if !(*level > 0.0 && *level < 1.0) {
                return Err(Error::Config(format!(
                    "confidence level must be in (0, 1), got {}",
                    level
                )));
            }
        }
        if self.var.window_days == 0 || self.backtest.lookback_days == 0 {
            return Err(Error::Config("window lengths must be positive".to_string()));
        }
        if !(self.backtest.nav.is_finite() && self.backtest.nav > 0.0) {
            return Err(Error::Config(format!(
                "backtest NAV must be positive, got {}",
                self.backtest.nav
            )));
        }
        Ok(())
    }

    /// VaR parameters for one method.
    pub fn var_params(&self, method: VarMethod) -> VarParams {
        VarParams::new(
            method,
            self.var.confidence_levels.clone(),
            self.var.window_days,
        )
    }
}

/// Parse a comma-separated list such as `"0.95,0.99"`.
pub fn parse_levels(text: &str) -> Result<Vec<f64>> {
    text.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<f64>()
                .map_err(|_| Error::Config(format!("invalid confidence level '{}'", s)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = RiskConfig::default();
        assert_eq!(config.log_level, LogLevel::Info);
        assert_eq!(config.var.methods, vec![VarMethod::Historical]);
        assert_eq!(config.var.confidence_levels, vec![0.95, 0.99]);
        assert_eq!(config.var.window_days, 250);
        assert_eq!(config.backtest.lookback_days, 252);
        assert_eq!(config.stress.linearity_factor, "equity_all");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_file_partial_sections() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            r#"
log_level = "debug"

[var]
methods = ["historical", "parametric"]
window_days = 500

[backtest]
confidence = 0.99
"#,
        )
        .unwrap();

        let config = RiskConfig::from_file(&path).unwrap();
        assert_eq!(config.log_level, LogLevel::Debug);
        assert_eq!(config.var.methods.len(), 2);
        assert_eq!(config.var.window_days, 500);
        assert_eq!(config.var.confidence_levels, vec![0.95, 0.99]);
        assert_eq!(config.backtest.confidence, 0.99);
        assert_eq!(config.backtest.lookback_days, 252);
    }

    #[test]
    fn test_from_file_rejects_invalid() {
        let dir = tempdir().unwrap();

        let bad_level = dir.path().join("bad_level.toml");
        fs::write(&bad_level, "[var]\nconfidence_levels = [0.95, 1.5]\n").unwrap();
        assert!(matches!(RiskConfig::from_file(&bad_level), Err(Error::Config(_))));

        let bad_method = dir.path().join("bad_method.toml");
        fs::write(&bad_method, "[var]\nmethods = [\"monte_carlo\"]\n").unwrap();
        assert!(RiskConfig::from_file(&bad_method).is_err());

        assert!(RiskConfig::from_file(&dir.path().join("missing.toml")).is_err());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = RiskConfig::default();
        config
            .apply_overrides(lookup(&[
                ("VARLAB_LOG_LEVEL", "WARN"),
                ("VARLAB_WINDOW_DAYS", "100"),
                ("VARLAB_CONFIDENCE_LEVELS", "0.9, 0.975"),
                ("VARLAB_REPORT_DIR", "/tmp/reports"),
            ]))
            .unwrap();

        assert_eq!(config.log_level, LogLevel::Warn);
        assert_eq!(config.var.window_days, 100);
        assert_eq!(config.var.confidence_levels, vec![0.9, 0.975]);
        assert_eq!(config.report.dir, Some(PathBuf::from("/tmp/reports")));
    }

    #[test]
    fn test_env_overrides_invalid() {
        let mut config = RiskConfig::default();
        assert!(config
            .apply_overrides(lookup(&[("VARLAB_WINDOW_DAYS", "many")]))
            .is_err());
        assert!(config
            .apply_overrides(lookup(&[("VARLAB_LOG_LEVEL", "loud")]))
            .is_err());
    }

    #[test]
    fn test_parse_levels() {
        assert_eq!(parse_levels("0.95,0.99").unwrap(), vec![0.95, 0.99]);
        assert!(parse_levels("0.95,abc").is_err());
    }

    #[test]
    fn test_var_params() {
        let config = RiskConfig::default();
        let params = config.var_params(VarMethod::Parametric);
        assert_eq!(params.method, VarMethod::Parametric);
        assert_eq!(params.window_days, 250);
    }
}
