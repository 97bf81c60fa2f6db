//! The stock-and-flow partitioner.
//!
//! Pure per-microsegment computation: given one key's baseline series, the
//! measure's resolved attributes, and the external conversion/TSV views,
//! produce the full baseline/efficient, total/competed trajectory record.
//! No I/O, no shared state — the aggregator calls this once per key.

use crate::config::{AdoptionScenario, StockFlowConfig};
use crate::engine::secondary::{CaptureTrajectories, SecondaryFractions};
use crate::engine::types::{PartitionResult, TsvFactors};
use crate::error::EngineError;
use crate::measure::{Measure, MeasureType, PerformanceUnits};
use crate::series::YearSeries;
use crate::taxonomy::MsegKey;

/// Baseline series for one microsegment, borrowed from the provider.
#[derive(Debug, Clone, Copy)]
pub struct SegmentView<'a> {
    /// Unit counts; `None` for segments without countable stock (demand
    /// side, "NA" entries). For new-construction keys this series holds
    /// annual additions rather than levels.
    pub stock: Option<&'a YearSeries>,
    /// Site energy use by year.
    pub energy: &'a YearSeries,
    /// Baseline typical performance level by year.
    pub performance: &'a YearSeries,
    /// Baseline installed cost per unit by year.
    pub unit_cost: &'a YearSeries,
    /// Average retiring lifetime by year.
    pub lifetime: &'a YearSeries,
}

/// Conversion and price series for the segment's fuel and sector.
#[derive(Debug, Clone, Copy)]
pub struct ConversionView<'a> {
    pub site_source: &'a YearSeries,
    pub carbon_intensity: &'a YearSeries,
    pub energy_price: &'a YearSeries,
    pub carbon_price: &'a YearSeries,
    /// Tables for `fuel_switch_to`, when the measure switches fuels; the
    /// captured portion's carbon and energy cost use these.
    pub switched: Option<SwitchedView<'a>>,
}

/// Conversion tables for the destination fuel of a fuel-switching measure.
#[derive(Debug, Clone, Copy)]
pub struct SwitchedView<'a> {
    pub site_source: &'a YearSeries,
    pub carbon_intensity: &'a YearSeries,
    pub energy_price: &'a YearSeries,
}

/// Partition output for a primary key: the result record plus the capture
/// trajectories the secondary ledger needs.
#[derive(Debug, Clone)]
pub struct PrimaryPartition {
    pub result: PartitionResult,
    pub capture: CaptureTrajectories,
}

/// Measure relative performance for `year`: the factor multiplying baseline
/// unit energy for captured stock.
///
/// Absolute units convert via the baseline/measure performance ratio in the
/// unit's direction; relative-savings units subtract the savings fraction,
/// with the dynamic flavor re-based against the anchor year's baseline
/// performance.
pub fn relative_performance(
    measure: &Measure,
    baseline_performance: &YearSeries,
    year: u32,
) -> f64 {
    let value = measure.performance.at(year);
    match &measure.performance_units {
        PerformanceUnits::Absolute {
            higher_is_better, ..
        } => {
            let base = baseline_performance.get(year).unwrap_or(0.0);
            if base <= 0.0 || value <= 0.0 {
                return 1.0;
            }
            if *higher_is_better {
                base / value
            } else {
                value / base
            }
        }
        PerformanceUnits::RelativeSavingsConstant => 1.0 - value.clamp(0.0, 1.0),
        PerformanceUnits::RelativeSavingsDynamic { anchor_year } => {
            let anchor = baseline_performance
                .get(*anchor_year)
                .unwrap_or_else(|| baseline_performance.values()[0]);
            let current = baseline_performance.get(year).unwrap_or(anchor);
            let rebased = if current > 0.0 {
                value * anchor / current
            } else {
                value
            };
            1.0 - rebased.clamp(0.0, 1.0)
        }
    }
}

/// Partitions one primary microsegment.
///
/// # Arguments
///
/// * `key` - Fully concrete microsegment key
/// * `measure` - The measure competing for this segment
/// * `measure_unit_cost` - Measure installed cost converted to the
///   baseline's native unit, per year
/// * `sub_market_fraction` - Applicable sub-market fraction for the key's
///   structure type
/// * `seg` - Baseline series for the segment
/// * `conv` - Conversion/price series for the segment's fuel and sector
/// * `tsv` - Time-sensitive-valuation factors (neutral when unused)
/// * `stock_flow` - Turnover parameters
/// * `scenario` - Adoption scenario governing the competed split
///
/// # Errors
///
/// Returns [`EngineError::SeriesMismatch`] when input series do not share
/// the energy series' horizon.
#[expect(clippy::too_many_arguments)]
pub fn partition_primary(
    key: &MsegKey,
    measure: &Measure,
    measure_unit_cost: &YearSeries,
    sub_market_fraction: f64,
    seg: &SegmentView<'_>,
    conv: &ConversionView<'_>,
    tsv: &TsvFactors,
    stock_flow: &StockFlowConfig,
    scenario: AdoptionScenario,
) -> Result<PrimaryPartition, EngineError> {
    check_views(key, seg, conv, measure_unit_cost)?;
    let first = seg.energy.first_year();
    let last = seg.energy.last_year();
    let new_flow = key.structure_type == crate::taxonomy::StructureType::New;

    let mut result = PartitionResult::zeros(first, last, measure.lifetime);
    result.lifetime.baseline = seg.lifetime.clone();

    let mut capture = CaptureTrajectories {
        total_energy: seg.energy.clone(),
        captured_unscaled: YearSeries::zeros(first, last),
        captured_scaled: YearSeries::zeros(first, last),
        competed: YearSeries::zeros(first, last),
        competed_captured_unscaled: YearSeries::zeros(first, last),
        competed_captured_scaled: YearSeries::zeros(first, last),
    };

    // Running capture state. Countable segments track units; uncountable
    // ones track fractions of the (energy-proxy) market. `scaled` carries
    // the sub-market fraction, `unscaled` feeds the secondary ledger.
    let mut captured_scaled = 0.0;
    let mut captured_unscaled = 0.0;
    let mut cumulative_competed = 0.0;
    let countable = seg.stock.is_some();
    let cumulative_stock = seg.stock.map(|s| s.cumulative());

    for year in first..=last {
        let energy = seg.energy.get(year).unwrap_or(0.0);

        // 1. Stock split.
        let (total_units, competed_units) = match seg.stock {
            Some(stock) => {
                let total = if new_flow {
                    cumulative_stock.as_ref().and_then(|c| c.get(year)).unwrap_or(0.0)
                } else {
                    stock.get(year).unwrap_or(0.0)
                };
                let competed = match scenario {
                    AdoptionScenario::TechnicalPotential => total,
                    AdoptionScenario::MaxAdoptionPotential => {
                        if new_flow {
                            stock.get(year).unwrap_or(0.0)
                        } else {
                            let life = seg.lifetime.get(year).unwrap_or(0.0);
                            let rate = if life > 0.0 {
                                (1.0 / life + stock_flow.retrofit_rate).min(1.0)
                            } else {
                                1.0
                            };
                            // Cumulative competed stock never exceeds total.
                            let headroom = (total - cumulative_competed).max(0.0);
                            (total * rate).min(headroom)
                        }
                    }
                };
                (total, competed)
            }
            // Energy-proxy market for uncountable segments.
            None => {
                let competed = match scenario {
                    AdoptionScenario::TechnicalPotential => energy,
                    AdoptionScenario::MaxAdoptionPotential => {
                        let life = seg.lifetime.get(year).unwrap_or(0.0);
                        let rate = if life > 0.0 {
                            (1.0 / life + stock_flow.retrofit_rate).min(1.0)
                        } else {
                            1.0
                        };
                        let headroom = (energy - cumulative_competed).max(0.0);
                        (energy * rate).min(headroom)
                    }
                };
                (energy, competed)
            }
        };
        if scenario == AdoptionScenario::MaxAdoptionPotential && !new_flow {
            cumulative_competed += competed_units;
        }

        // 2. Measure stock capture.
        let on_market = measure.on_market(year);
        let captured_competed_scaled = if on_market {
            competed_units * sub_market_fraction
        } else {
            0.0
        };
        let captured_competed_unscaled = if on_market { competed_units } else { 0.0 };
        captured_scaled = (captured_scaled + captured_competed_scaled).min(total_units);
        captured_unscaled = (captured_unscaled + captured_competed_unscaled).min(total_units);

        let competed_share = share(competed_units, total_units);
        let captured_share = share(captured_scaled, total_units);
        let captured_competed_share = share(captured_competed_scaled, total_units);

        // 3./4. Energy and carbon.
        let rel = relative_performance(measure, seg.performance, year);
        let tsv_energy = tsv.energy_efficient.get(year).unwrap_or(1.0);
        let tsv_cost_eff = tsv.cost_efficient.get(year).unwrap_or(1.0);
        let tsv_carbon_eff = tsv.carbon_efficient.get(year).unwrap_or(1.0);

        let site_source = conv.site_source.get(year).unwrap_or(0.0);
        let intensity = conv.carbon_intensity.get(year).unwrap_or(0.0);
        let price = conv.energy_price.get(year).unwrap_or(0.0);
        let carbon_price = conv.carbon_price.get(year).unwrap_or(0.0);
        let (sw_site_source, sw_intensity, sw_price) = match &conv.switched {
            Some(sw) => (
                sw.site_source.get(year).unwrap_or(0.0),
                sw.carbon_intensity.get(year).unwrap_or(0.0),
                sw.energy_price.get(year).unwrap_or(0.0),
            ),
            None => (site_source, intensity, price),
        };

        let energy_competed = energy * competed_share;
        let captured_energy = energy * captured_share;
        let uncaptured_energy = energy - captured_energy;
        let captured_energy_eff = captured_energy * rel;
        let cc_energy = energy * captured_competed_share;
        let competed_uncaptured = energy_competed - cc_energy;
        let cc_energy_eff = cc_energy * rel;

        let energy_total_eff = (uncaptured_energy + captured_energy_eff) * tsv_energy;
        let energy_competed_eff = (competed_uncaptured + cc_energy_eff) * tsv_energy;

        let carbon_base = energy * site_source * intensity * tsv.carbon_baseline;
        let carbon_competed_base =
            energy_competed * site_source * intensity * tsv.carbon_baseline;
        let carbon_total_eff = (uncaptured_energy * site_source * intensity
            + captured_energy_eff * sw_site_source * sw_intensity)
            * tsv_carbon_eff;
        let carbon_competed_eff = (competed_uncaptured * site_source * intensity
            + cc_energy_eff * sw_site_source * sw_intensity)
            * tsv_carbon_eff;

        // 5. Cost roll-up.
        let base_cost = seg.unit_cost.get(year).unwrap_or(0.0);
        let measure_cost = match measure.measure_type {
            MeasureType::FullService => measure_unit_cost.get(year).unwrap_or(0.0),
            // An add-on keeps the host technology and layers its own cost.
            MeasureType::AddOn => base_cost + measure_unit_cost.get(year).unwrap_or(0.0),
        };
        let stock_cost_base = total_units * base_cost;
        let stock_cost_competed = competed_units * base_cost;
        let stock_cost_eff =
            (total_units - captured_scaled) * base_cost + captured_scaled * measure_cost;
        let stock_cost_competed_eff = (competed_units - captured_competed_scaled) * base_cost
            + captured_competed_scaled * measure_cost;

        let energy_cost_base = energy * price * tsv.cost_baseline;
        let energy_cost_competed = energy_competed * price * tsv.cost_baseline;
        let energy_cost_eff =
            (uncaptured_energy * price + captured_energy_eff * sw_price) * tsv_cost_eff;
        let energy_cost_competed_eff =
            (competed_uncaptured * price + cc_energy_eff * sw_price) * tsv_cost_eff;

        // Capture ledger trajectories (energy terms).
        let unscaled_share = share(captured_unscaled, total_units);
        set(&mut capture.captured_scaled, year, captured_energy);
        set(&mut capture.captured_unscaled, year, energy * unscaled_share);
        set(&mut capture.competed, year, energy_competed);
        set(&mut capture.competed_captured_scaled, year, cc_energy);
        set(
            &mut capture.competed_captured_unscaled,
            year,
            energy * share(captured_competed_unscaled, total_units),
        );

        // Write the result record.
        let r = &mut result;
        if countable {
            set(&mut r.stock.total_baseline, year, total_units);
            set(&mut r.stock.total_efficient, year, captured_scaled);
            set(&mut r.stock.competed_baseline, year, competed_units);
            set(&mut r.stock.competed_efficient, year, captured_competed_scaled);
            set(&mut r.cost.stock.total_baseline, year, stock_cost_base);
            set(&mut r.cost.stock.total_efficient, year, stock_cost_eff);
            set(&mut r.cost.stock.competed_baseline, year, stock_cost_competed);
            set(
                &mut r.cost.stock.competed_efficient,
                year,
                stock_cost_competed_eff,
            );
        }
        set(&mut r.energy.total_baseline, year, energy);
        set(&mut r.energy.total_efficient, year, energy_total_eff);
        set(&mut r.energy.competed_baseline, year, energy_competed);
        set(&mut r.energy.competed_efficient, year, energy_competed_eff);

        set(&mut r.carbon.total_baseline, year, carbon_base);
        set(&mut r.carbon.total_efficient, year, carbon_total_eff);
        set(&mut r.carbon.competed_baseline, year, carbon_competed_base);
        set(&mut r.carbon.competed_efficient, year, carbon_competed_eff);

        set(&mut r.cost.energy.total_baseline, year, energy_cost_base);
        set(&mut r.cost.energy.total_efficient, year, energy_cost_eff);
        set(&mut r.cost.energy.competed_baseline, year, energy_cost_competed);
        set(
            &mut r.cost.energy.competed_efficient,
            year,
            energy_cost_competed_eff,
        );

        set(
            &mut r.cost.carbon.total_baseline,
            year,
            carbon_base * carbon_price,
        );
        set(
            &mut r.cost.carbon.total_efficient,
            year,
            carbon_total_eff * carbon_price,
        );
        set(
            &mut r.cost.carbon.competed_baseline,
            year,
            carbon_competed_base * carbon_price,
        );
        set(
            &mut r.cost.carbon.competed_efficient,
            year,
            carbon_competed_eff * carbon_price,
        );
    }

    Ok(PrimaryPartition { result, capture })
}

/// Partitions one secondary (demand-linked supply-side) microsegment.
///
/// The segment's load is adjusted only in proportion to the primary
/// market's captured share, delivered as [`SecondaryFractions`] from the
/// secondary ledger. No stock is attributed to secondary segments.
pub fn partition_secondary(
    key: &MsegKey,
    measure: &Measure,
    seg: &SegmentView<'_>,
    conv: &ConversionView<'_>,
    tsv: &TsvFactors,
    fractions: &SecondaryFractions,
) -> Result<PartitionResult, EngineError> {
    check_views(key, seg, conv, seg.unit_cost)?;
    let first = seg.energy.first_year();
    let last = seg.energy.last_year();
    let mut result = PartitionResult::zeros(first, last, measure.lifetime);
    result.lifetime.baseline = seg.lifetime.clone();

    for year in first..=last {
        let energy = seg.energy.get(year).unwrap_or(0.0);
        let rel = relative_performance(measure, seg.performance, year);
        let savings = 1.0 - rel;
        let affected = fractions.affected_total.get(year).unwrap_or(0.0);
        let competed = fractions.competed.get(year).unwrap_or(0.0);
        let affected_competed = fractions.affected_competed.get(year).unwrap_or(0.0);

        let tsv_energy = tsv.energy_efficient.get(year).unwrap_or(1.0);
        let tsv_cost_eff = tsv.cost_efficient.get(year).unwrap_or(1.0);
        let tsv_carbon_eff = tsv.carbon_efficient.get(year).unwrap_or(1.0);
        let site_source = conv.site_source.get(year).unwrap_or(0.0);
        let intensity = conv.carbon_intensity.get(year).unwrap_or(0.0);
        let price = conv.energy_price.get(year).unwrap_or(0.0);
        let carbon_price = conv.carbon_price.get(year).unwrap_or(0.0);

        let energy_eff = energy * (1.0 - affected * savings) * tsv_energy;
        let energy_competed = energy * competed;
        let energy_competed_eff = energy * (competed - affected_competed * savings) * tsv_energy;

        let r = &mut result;
        set(&mut r.energy.total_baseline, year, energy);
        set(&mut r.energy.total_efficient, year, energy_eff);
        set(&mut r.energy.competed_baseline, year, energy_competed);
        set(&mut r.energy.competed_efficient, year, energy_competed_eff);

        let to_carbon = site_source * intensity;
        set(
            &mut r.carbon.total_baseline,
            year,
            energy * to_carbon * tsv.carbon_baseline,
        );
        set(
            &mut r.carbon.total_efficient,
            year,
            energy * (1.0 - affected * savings) * to_carbon * tsv_carbon_eff,
        );
        set(
            &mut r.carbon.competed_baseline,
            year,
            energy_competed * to_carbon * tsv.carbon_baseline,
        );
        set(
            &mut r.carbon.competed_efficient,
            year,
            energy * (competed - affected_competed * savings) * to_carbon * tsv_carbon_eff,
        );

        set(
            &mut r.cost.energy.total_baseline,
            year,
            energy * price * tsv.cost_baseline,
        );
        set(
            &mut r.cost.energy.total_efficient,
            year,
            energy * (1.0 - affected * savings) * price * tsv_cost_eff,
        );
        set(
            &mut r.cost.energy.competed_baseline,
            year,
            energy_competed * price * tsv.cost_baseline,
        );
        set(
            &mut r.cost.energy.competed_efficient,
            year,
            energy * (competed - affected_competed * savings) * price * tsv_cost_eff,
        );

        let carbon_base = energy * to_carbon * tsv.carbon_baseline;
        set(&mut r.cost.carbon.total_baseline, year, carbon_base * carbon_price);
        set(
            &mut r.cost.carbon.total_efficient,
            year,
            energy * (1.0 - affected * savings) * to_carbon * tsv_carbon_eff * carbon_price,
        );
        set(
            &mut r.cost.carbon.competed_baseline,
            year,
            energy_competed * to_carbon * tsv.carbon_baseline * carbon_price,
        );
        set(
            &mut r.cost.carbon.competed_efficient,
            year,
            energy * (competed - affected_competed * savings)
                * to_carbon
                * tsv_carbon_eff
                * carbon_price,
        );
    }

    Ok(result)
}

fn share(part: f64, whole: f64) -> f64 {
    if whole > 0.0 {
        (part / whole).clamp(0.0, 1.0)
    } else {
        0.0
    }
}

fn set(series: &mut YearSeries, year: u32, value: f64) {
    if let Some(slot) = series.get_mut(year) {
        *slot = value;
    }
}

fn check_views(
    key: &MsegKey,
    seg: &SegmentView<'_>,
    conv: &ConversionView<'_>,
    measure_unit_cost: &YearSeries,
) -> Result<(), EngineError> {
    let what = |name: &str| format!("{name} for `{key}`");
    let energy = seg.energy;
    if let Some(stock) = seg.stock {
        energy.check_aligned(stock, &what("stock"))?;
    }
    energy.check_aligned(seg.performance, &what("performance"))?;
    energy.check_aligned(seg.unit_cost, &what("unit cost"))?;
    energy.check_aligned(seg.lifetime, &what("lifetime"))?;
    energy.check_aligned(conv.site_source, &what("site-source"))?;
    energy.check_aligned(conv.carbon_intensity, &what("carbon intensity"))?;
    energy.check_aligned(conv.energy_price, &what("energy price"))?;
    energy.check_aligned(conv.carbon_price, &what("carbon price"))?;
    energy.check_aligned(measure_unit_cost, &what("measure unit cost"))?;
    if let Some(sw) = &conv.switched {
        energy.check_aligned(sw.site_source, &what("switched site-source"))?;
        energy.check_aligned(sw.carbon_intensity, &what("switched carbon intensity"))?;
        energy.check_aligned(sw.energy_price, &what("switched energy price"))?;
    }
    Ok(())
}
