use crate::anomaly::{AnomalyConfig, SavingsConfig};
use crate::classify::ClassificationConfig;
use crate::error::{ConfigError, RateTableError};
use crate::rates::{RateEntry, RateTable};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Engine configuration, typically loaded from `cicost.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub rates: RatesConfig,

    #[serde(default)]
    pub classification: ClassificationConfig,

    #[serde(default)]
    pub anomaly: AnomalyConfig,

    #[serde(default)]
    pub savings: SavingsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RatesConfig {
    /// Fallback price per minute; must be positive.
    #[serde(default = "default_rate")]
    pub default_per_minute: f64,

    #[serde(default)]
    pub entries: Vec<RateEntry>,
}

fn default_rate() -> f64 {
    0.1
}

impl Default for RatesConfig {
    fn default() -> Self {
        Self {
            default_per_minute: default_rate(),
            entries: Vec::new(),
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        toml::from_str(content).context("Failed to parse engine configuration")
    }

    /// Validate the rate section and build the lookup table.
    pub fn rate_table(&self) -> Result<RateTable, RateTableError> {
        RateTable::from_entries(self.rates.default_per_minute, &self.rates.entries)
    }

    /// Validate every section and return the rate table ready for use.
    pub fn validate(&self) -> Result<RateTable, ConfigError> {
        let anomaly = &self.anomaly;
        if !anomaly.sensitivity.is_finite() || anomaly.sensitivity < 0.0 {
            return Err(ConfigError::InvalidSensitivity(anomaly.sensitivity));
        }
        if anomaly.min_baseline_periods == 0 {
            return Err(ConfigError::ZeroMinBaselinePeriods);
        }
        if anomaly.baseline_window < anomaly.min_baseline_periods {
            return Err(ConfigError::BaselineWindowTooShort {
                window: anomaly.baseline_window,
                min: anomaly.min_baseline_periods,
            });
        }
        Ok(self.rate_table()?)
    }
}

/// Load engine configuration from a TOML file.
pub fn load_config(path: &Path) -> anyhow::Result<EngineConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
    toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file '{}'", path.display()))
}
