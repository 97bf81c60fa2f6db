//! TOML-based analysis configuration.

use std::fmt;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Consumer adoption scenario under which markets are partitioned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdoptionScenario {
    /// Entire applicable stock is contestable immediately, every year.
    TechnicalPotential,
    /// Stock becomes contestable as it turns over (retirement plus the
    /// configured retrofit rate) or is newly constructed.
    MaxAdoptionPotential,
}

impl AdoptionScenario {
    pub const ALL: [AdoptionScenario; 2] = [
        AdoptionScenario::TechnicalPotential,
        AdoptionScenario::MaxAdoptionPotential,
    ];
}

impl fmt::Display for AdoptionScenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdoptionScenario::TechnicalPotential => f.write_str("technical potential"),
            AdoptionScenario::MaxAdoptionPotential => f.write_str("max adoption potential"),
        }
    }
}

/// Top-level analysis configuration parsed from TOML.
///
/// All fields have defaults matching the reference analysis horizon. Load
/// from TOML with [`AnalysisConfig::from_toml_file`] or use
/// [`AnalysisConfig::default`].
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AnalysisConfig {
    /// Analysis horizon and scenario selection.
    pub analysis: HorizonConfig,
    /// Stock turnover parameters.
    pub stock_flow: StockFlowConfig,
    /// Distribution-sampling parameters.
    pub sampling: SamplingConfig,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            analysis: HorizonConfig::default(),
            stock_flow: StockFlowConfig::default(),
            sampling: SamplingConfig::default(),
        }
    }
}

/// Analysis horizon and the adoption scenarios to prepare.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HorizonConfig {
    /// First modeled year (inclusive).
    pub first_year: u32,
    /// Last modeled year (inclusive, must be >= first_year).
    pub last_year: u32,
    /// Adoption scenarios prepared for each measure.
    pub scenarios: Vec<AdoptionScenario>,
}

impl Default for HorizonConfig {
    fn default() -> Self {
        Self {
            first_year: 2009,
            last_year: 2040,
            scenarios: AdoptionScenario::ALL.to_vec(),
        }
    }
}

/// Stock turnover parameters consumed by the partitioner.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StockFlowConfig {
    /// Annual fraction of existing stock retrofitted ahead of end-of-life,
    /// added to the 1/lifetime retirement rate (0.0 to 1.0).
    pub retrofit_rate: f64,
}

impl Default for StockFlowConfig {
    fn default() -> Self {
        Self { retrofit_rate: 0.01 }
    }
}

/// Parameters for resolving distribution-valued measure attributes.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SamplingConfig {
    /// Number of draws averaged when resolving a distribution (must be > 0).
    pub distribution_samples: u32,
    /// Master random seed.
    pub seed: u64,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            distribution_samples: 100,
            seed: 42,
        }
    }
}

impl AnalysisConfig {
    /// Loads configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns a description of the failure when the file cannot be read,
    /// the TOML fails to parse, or a parameter is out of range.
    pub fn from_toml_file(path: &Path) -> Result<Self, String> {
        let raw = fs::read_to_string(path)
            .map_err(|err| format!("failed to read config `{}`: {err}", path.display()))?;
        Self::from_toml_str(&raw)
            .map_err(|err| format!("invalid config `{}`: {err}", path.display()))
    }

    /// Parses configuration from a TOML string and validates it.
    pub fn from_toml_str(raw: &str) -> Result<Self, String> {
        let config: AnalysisConfig = toml::from_str(raw).map_err(|err| err.to_string())?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), String> {
        if self.analysis.last_year < self.analysis.first_year {
            return Err(format!(
                "at `analysis.last_year`: {} is before first_year {}",
                self.analysis.last_year, self.analysis.first_year
            ));
        }
        if !(0.0..=1.0).contains(&self.stock_flow.retrofit_rate) {
            return Err("at `stock_flow.retrofit_rate`: must be within [0, 1]".to_string());
        }
        if self.sampling.distribution_samples == 0 {
            return Err("at `sampling.distribution_samples`: must be > 0".to_string());
        }
        if self.analysis.scenarios.is_empty() {
            return Err("at `analysis.scenarios`: at least one scenario required".to_string());
        }
        Ok(())
    }

    /// First modeled year.
    pub fn first_year(&self) -> u32 {
        self.analysis.first_year
    }

    /// Last modeled year.
    pub fn last_year(&self) -> u32 {
        self.analysis.last_year
    }
}
