//! Baseline data provider containers.
//!
//! The engine performs no I/O; the collaborator that loads the national
//! baseline dataset hands over these flat, already-keyed tables. Lookups
//! fail loudly — a missing record is a resolution error that aborts
//! preparation of the requesting measure, never a silent default.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::series::YearSeries;
use crate::taxonomy::{FuelType, MsegKey, Sector, SegmentType};

/// Countable-stock basis for one microsegment.
///
/// Demand-side segments (envelope components) and a handful of aggregate
/// segments carry no unit-countable stock and are flagged `NotApplicable`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StockBasis {
    /// Unit counts by year. For `StructureType::New` keys the series holds
    /// annual new-construction additions; for `Existing` keys, total stock
    /// levels.
    Units(YearSeries),
    NotApplicable,
}

/// Baseline stock and energy series for one microsegment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaselineRecord {
    pub stock: StockBasis,
    /// Site energy use by year (MMBtu).
    pub energy: YearSeries,
}

/// Typical/best performance levels for a baseline technology.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceRecord {
    pub typical: YearSeries,
    pub best: YearSeries,
    /// Unit tag, e.g. `"EF"` or `"kWh/yr"`.
    pub units: String,
    pub source: String,
}

/// Installed-cost levels for a baseline technology.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostRecord {
    /// Typical installed cost per unit by year.
    pub typical: YearSeries,
    pub units: String,
    pub source: String,
}

/// Lifetime data for a baseline technology.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifetimeRecord {
    /// Stock-weighted average retiring lifetime by year (years).
    pub average: YearSeries,
    /// Spread around the average (years).
    pub range: f64,
    pub units: String,
    pub source: String,
}

/// Competed-choice parameters carried through to cross-measure competition.
///
/// Residential segments use logistic market-share coefficients; commercial
/// segments use Bass-diffusion parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ChoiceParams {
    Logistic { b1: f64, b2: f64 },
    BassDiffusion { p: f64, q: f64 },
}

/// Cost, performance, lifetime, and consumer-choice record for one
/// microsegment's baseline technology.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TechRecord {
    pub performance: PerformanceRecord,
    pub installed_cost: CostRecord,
    pub lifetime: LifetimeRecord,
    pub consumer_choice: ChoiceParams,
}

/// Per-fuel, per-sector, per-year conversion and price tables.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversionTables {
    /// Site-to-source energy conversion factor by fuel.
    pub site_source: HashMap<FuelType, YearSeries>,
    /// Carbon intensity (Mt CO2 per source MMBtu) by fuel and sector.
    pub carbon_intensity: HashMap<(FuelType, Sector), YearSeries>,
    /// Retail energy price ($ per site MMBtu) by fuel and sector.
    pub energy_price: HashMap<(FuelType, Sector), YearSeries>,
    /// Carbon price ($ per Mt CO2) by sector.
    pub carbon_price: HashMap<Sector, YearSeries>,
}

impl ConversionTables {
    pub fn site_source(&self, fuel: FuelType) -> Result<&YearSeries, EngineError> {
        self.site_source
            .get(&fuel)
            .ok_or_else(|| EngineError::MissingConversion {
                table: "site-source",
                fuel: fuel.to_string(),
                sector: "-".to_string(),
            })
    }

    pub fn carbon_intensity(
        &self,
        fuel: FuelType,
        sector: Sector,
    ) -> Result<&YearSeries, EngineError> {
        self.carbon_intensity
            .get(&(fuel, sector))
            .ok_or_else(|| EngineError::MissingConversion {
                table: "carbon-intensity",
                fuel: fuel.to_string(),
                sector: sector.to_string(),
            })
    }

    pub fn energy_price(
        &self,
        fuel: FuelType,
        sector: Sector,
    ) -> Result<&YearSeries, EngineError> {
        self.energy_price
            .get(&(fuel, sector))
            .ok_or_else(|| EngineError::MissingConversion {
                table: "energy-price",
                fuel: fuel.to_string(),
                sector: sector.to_string(),
            })
    }

    pub fn carbon_price(&self, sector: Sector) -> Result<&YearSeries, EngineError> {
        self.carbon_price
            .get(&sector)
            .ok_or_else(|| EngineError::MissingConversion {
                table: "carbon-price",
                fuel: "-".to_string(),
                sector: sector.to_string(),
            })
    }
}

/// The full pre-resolved baseline dataset handed to the aggregator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BaselineData {
    msegs: HashMap<MsegKey, BaselineRecord>,
    tech_info: HashMap<MsegKey, TechRecord>,
    pub conversions: ConversionTables,
}

impl BaselineData {
    pub fn new(conversions: ConversionTables) -> Self {
        Self {
            msegs: HashMap::new(),
            tech_info: HashMap::new(),
            conversions,
        }
    }

    /// Inserts the baseline stock/energy record for `key`.
    ///
    /// # Errors
    ///
    /// Rejects keys that fail [`MsegKey::validate`].
    pub fn insert_baseline(
        &mut self,
        key: MsegKey,
        record: BaselineRecord,
    ) -> Result<(), EngineError> {
        key.validate()?;
        self.msegs.insert(Self::data_key(&key), record);
        Ok(())
    }

    /// Inserts the cost/performance/lifetime record for `key`.
    pub fn insert_tech(&mut self, key: MsegKey, record: TechRecord) -> Result<(), EngineError> {
        key.validate()?;
        self.tech_info.insert(Self::data_key(&key), record);
        Ok(())
    }

    /// Baseline stock/energy record for `key`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::MissingKey`] naming the full key chain when
    /// absent.
    pub fn baseline(&self, key: &MsegKey) -> Result<&BaselineRecord, EngineError> {
        self.msegs
            .get(&Self::data_key(key))
            .ok_or_else(|| EngineError::MissingKey {
                table: "baseline",
                key: key.to_string(),
            })
    }

    /// Cost/performance/lifetime record for `key`.
    pub fn tech(&self, key: &MsegKey) -> Result<&TechRecord, EngineError> {
        self.tech_info
            .get(&Self::data_key(key))
            .ok_or_else(|| EngineError::MissingKey {
                table: "tech",
                key: key.to_string(),
            })
    }

    /// Checks every stored series against the analysis horizon.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::SeriesMismatch`] for the first series that
    /// does not cover `[first_year, last_year]` exactly.
    pub fn validate_horizon(&self, first_year: u32, last_year: u32) -> Result<(), EngineError> {
        let horizon = YearSeries::zeros(first_year, last_year);
        for (key, record) in &self.msegs {
            if let StockBasis::Units(stock) = &record.stock {
                horizon.check_aligned(stock, &format!("stock for `{key}`"))?;
            }
            horizon.check_aligned(&record.energy, &format!("energy for `{key}`"))?;
        }
        for (key, record) in &self.tech_info {
            horizon.check_aligned(
                &record.performance.typical,
                &format!("performance for `{key}`"),
            )?;
            horizon.check_aligned(
                &record.installed_cost.typical,
                &format!("installed cost for `{key}`"),
            )?;
            horizon.check_aligned(&record.lifetime.average, &format!("lifetime for `{key}`"))?;
        }
        Ok(())
    }

    // Data tables describe the segment itself; whether a measure reaches it
    // as a primary or secondary market does not change the series, so
    // lookups normalize the segment type.
    fn data_key(key: &MsegKey) -> MsegKey {
        key.with_seg_type(SegmentType::Primary)
    }
}
