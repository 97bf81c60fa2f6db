//! Core engine types: partition results, ledgers, and collaborator inputs.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::baseline::ChoiceParams;
use crate::engine::secondary::SecondaryLedger;
use crate::error::EngineError;
use crate::series::YearSeries;
use crate::taxonomy::{ClimateZone, MsegKey, ReportCategory, Sector, StructureType};

/// One quantity's four trajectories: total/competed crossed with
/// baseline/efficient.
///
/// For stock, "efficient" holds the measure-captured stock (total) and the
/// competed-and-captured stock (competed). `add_assign` is the typed
/// accumulator used for every roll-up in the engine — keys sum
/// component-wise, with the compiler enforcing structural compatibility.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuantityBlock {
    pub total_baseline: YearSeries,
    pub total_efficient: YearSeries,
    pub competed_baseline: YearSeries,
    pub competed_efficient: YearSeries,
}

impl QuantityBlock {
    /// All-zero block over `[first_year, last_year]`.
    pub fn zeros(first_year: u32, last_year: u32) -> Self {
        Self {
            total_baseline: YearSeries::zeros(first_year, last_year),
            total_efficient: YearSeries::zeros(first_year, last_year),
            competed_baseline: YearSeries::zeros(first_year, last_year),
            competed_efficient: YearSeries::zeros(first_year, last_year),
        }
    }

    /// Adds `other` component-wise.
    pub fn add_assign(&mut self, other: &QuantityBlock) {
        self.total_baseline.add_assign(&other.total_baseline);
        self.total_efficient.add_assign(&other.total_efficient);
        self.competed_baseline.add_assign(&other.competed_baseline);
        self.competed_efficient.add_assign(&other.competed_efficient);
    }

    /// Scales only the efficient trajectories (used by package benefits).
    pub fn scale_efficient(&mut self, factor: f64) {
        self.total_efficient.scale(factor);
        self.competed_efficient.scale(factor);
    }

    /// Scales the efficient trajectories pointwise by a yearly factor.
    pub fn scale_efficient_by(&mut self, factors: &YearSeries) {
        self.total_efficient.mul_assign(factors);
        self.competed_efficient.mul_assign(factors);
    }

    /// True when competed never exceeds total on either side, within `tol`.
    pub fn competed_within_total(&self, tol: f64) -> bool {
        self.total_baseline.dominates(&self.competed_baseline, tol)
            && self.total_efficient.dominates(&self.competed_efficient, tol)
    }
}

/// Stock, energy, and carbon cost trajectories.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostBlock {
    pub stock: QuantityBlock,
    pub energy: QuantityBlock,
    pub carbon: QuantityBlock,
}

impl CostBlock {
    pub fn zeros(first_year: u32, last_year: u32) -> Self {
        Self {
            stock: QuantityBlock::zeros(first_year, last_year),
            energy: QuantityBlock::zeros(first_year, last_year),
            carbon: QuantityBlock::zeros(first_year, last_year),
        }
    }

    pub fn add_assign(&mut self, other: &CostBlock) {
        self.stock.add_assign(&other.stock);
        self.energy.add_assign(&other.energy);
        self.carbon.add_assign(&other.carbon);
    }
}

/// Weighted baseline lifetime plus the measure's own lifetime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifetimeBlock {
    /// Stock-weighted average retiring lifetime of the baseline stock, by
    /// year.
    pub baseline: YearSeries,
    /// Measure lifetime in years (stock-weighted blend for packages).
    pub measure: f64,
}

/// Complete partition output for one microsegment key, or the measure-level
/// roll-up of all of them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionResult {
    pub stock: QuantityBlock,
    pub energy: QuantityBlock,
    pub carbon: QuantityBlock,
    pub cost: CostBlock,
    pub lifetime: LifetimeBlock,
}

impl PartitionResult {
    pub fn zeros(first_year: u32, last_year: u32, measure_lifetime: f64) -> Self {
        Self {
            stock: QuantityBlock::zeros(first_year, last_year),
            energy: QuantityBlock::zeros(first_year, last_year),
            carbon: QuantityBlock::zeros(first_year, last_year),
            cost: CostBlock::zeros(first_year, last_year),
            lifetime: LifetimeBlock {
                baseline: YearSeries::zeros(first_year, last_year),
                measure: measure_lifetime,
            },
        }
    }

    /// Adds the additive quantities of `other` component-wise.
    ///
    /// Lifetime is deliberately untouched: the baseline lifetime of a
    /// roll-up is a stock-weighted average, not a sum, and is finalized by
    /// [`roll_up_master`].
    pub fn add_assign(&mut self, other: &PartitionResult) {
        self.stock.add_assign(&other.stock);
        self.energy.add_assign(&other.energy);
        self.carbon.add_assign(&other.carbon);
        self.cost.add_assign(&other.cost);
    }
}

/// Folds a contributing-key ledger into a measure-level `master_mseg`.
///
/// Additive quantities sum component-wise; the baseline lifetime is the
/// total-baseline-stock-weighted average across keys (falling back to a
/// plain average in years with no countable stock); the measure lifetime is
/// the terminal-year measure-stock-weighted blend of per-key lifetimes.
pub fn roll_up_master(
    ledger: &BTreeMap<MsegKey, PartitionResult>,
    first_year: u32,
    last_year: u32,
) -> PartitionResult {
    let mut master = PartitionResult::zeros(first_year, last_year, 0.0);
    let mut life_weighted = YearSeries::zeros(first_year, last_year);
    let mut life_unweighted = YearSeries::zeros(first_year, last_year);
    let mut measure_life_weighted = 0.0;
    let mut measure_life_weight = 0.0;
    let mut measure_life_plain = 0.0;

    for result in ledger.values() {
        master.add_assign(result);
        let mut weighted = result.lifetime.baseline.clone();
        weighted.mul_assign(&result.stock.total_baseline);
        life_weighted.add_assign(&weighted);
        life_unweighted.add_assign(&result.lifetime.baseline);

        let terminal_stock = result
            .stock
            .total_efficient
            .get(last_year)
            .unwrap_or(0.0);
        measure_life_weighted += result.lifetime.measure * terminal_stock;
        measure_life_weight += terminal_stock;
        measure_life_plain += result.lifetime.measure;
    }

    let n = ledger.len() as f64;
    for year in first_year..=last_year {
        let stock = master.stock.total_baseline.get(year).unwrap_or(0.0);
        let avg = if stock > 0.0 {
            life_weighted.get(year).unwrap_or(0.0) / stock
        } else if n > 0.0 {
            life_unweighted.get(year).unwrap_or(0.0) / n
        } else {
            0.0
        };
        if let Some(v) = master.lifetime.baseline.get_mut(year) {
            *v = avg;
        }
    }
    master.lifetime.measure = if measure_life_weight > 0.0 {
        measure_life_weighted / measure_life_weight
    } else if n > 0.0 {
        measure_life_plain / n
    } else {
        0.0
    };
    master
}

/// Per-measure adjustment ledger retained for cross-measure competition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MsegAdjust {
    /// Raw per-key partition results ("contributing mseg keys and values").
    pub contributing: BTreeMap<MsegKey, PartitionResult>,
    /// Competed-choice parameters by key.
    pub choice_params: BTreeMap<MsegKey, ChoiceParams>,
    /// Secondary (demand-side) adjustment ledger.
    pub secondary: SecondaryLedger,
}

/// One cell of the reporting breakdown.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct BreakoutKey {
    pub climate_zone: ClimateZone,
    pub sector: Sector,
    pub structure_type: StructureType,
    pub category: ReportCategory,
}

/// Baseline-energy-normalized shares of a measure's market, for reporting.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutBreak {
    pub shares: BTreeMap<BreakoutKey, f64>,
}

impl OutBreak {
    /// Adds raw baseline energy into one cell.
    pub fn accumulate(&mut self, key: BreakoutKey, baseline_energy: f64) {
        *self.shares.entry(key).or_insert(0.0) += baseline_energy;
    }

    /// Normalizes cells to shares summing to 1 (no-op when empty or zero).
    pub fn normalize(&mut self) {
        let total: f64 = self.shares.values().sum();
        if total > 0.0 {
            for share in self.shares.values_mut() {
                *share /= total;
            }
        }
    }

    pub fn total_share(&self) -> f64 {
        self.shares.values().sum()
    }
}

/// Everything the aggregator writes for one (measure, adoption scenario).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasureMarkets {
    pub master_mseg: PartitionResult,
    pub mseg_adjust: MsegAdjust,
    pub mseg_out_break: OutBreak,
}

/// Time-sensitive-valuation scaling factors for one microsegment.
///
/// Produced by the out-of-scope load-shape collaborator; the engine applies
/// them blindly. Baseline energy carries no factor by construction (the
/// baseline load shape defines the reference).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TsvFactors {
    pub energy_efficient: YearSeries,
    pub cost_baseline: f64,
    pub cost_efficient: YearSeries,
    pub carbon_baseline: f64,
    pub carbon_efficient: YearSeries,
}

impl TsvFactors {
    /// Identity factors (all ones) over the horizon.
    pub fn neutral(first_year: u32, last_year: u32) -> Self {
        Self {
            energy_efficient: YearSeries::fill(first_year, last_year, 1.0),
            cost_baseline: 1.0,
            cost_efficient: YearSeries::fill(first_year, last_year, 1.0),
            carbon_baseline: 1.0,
            carbon_efficient: YearSeries::fill(first_year, last_year, 1.0),
        }
    }
}

/// Per-key TSV factor table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TsvData {
    pub factors: HashMap<MsegKey, TsvFactors>,
}

impl TsvData {
    /// Factors for `key`, or neutral ones when the table has no entry.
    pub fn factors_or_neutral(&self, key: &MsegKey, first_year: u32, last_year: u32) -> TsvFactors {
        self.factors
            .get(key)
            .cloned()
            .unwrap_or_else(|| TsvFactors::neutral(first_year, last_year))
    }
}

/// Pre-resolved cost-unit conversion factors, keyed by
/// `(measure-reported unit, baseline-native unit)`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CostConversion {
    pub factors: HashMap<(String, String), f64>,
}

impl CostConversion {
    /// Converts `cost` from `from_units` into `to_units`.
    ///
    /// Equal unit strings convert with factor 1; anything else requires a
    /// table entry.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::MissingConversion`] when no factor is known.
    pub fn convert(&self, cost: f64, from_units: &str, to_units: &str) -> Result<f64, EngineError> {
        if from_units == to_units {
            return Ok(cost);
        }
        self.factors
            .get(&(from_units.to_string(), to_units.to_string()))
            .map(|factor| cost * factor)
            .ok_or_else(|| EngineError::MissingConversion {
                table: "cost-unit",
                fuel: from_units.to_string(),
                sector: to_units.to_string(),
            })
    }
}
