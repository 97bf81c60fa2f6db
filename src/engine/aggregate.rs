//! Market aggregation: walk every microsegment a measure applies to,
//! partition each one, and roll the results into the measure's prepared
//! markets.

use std::collections::BTreeMap;

use tracing::{debug, error, warn};

use crate::baseline::{BaselineData, ChoiceParams, StockBasis};
use crate::config::{AdoptionScenario, AnalysisConfig};
use crate::engine::partition::{
    partition_primary, partition_secondary, ConversionView, SegmentView, SwitchedView,
};
use crate::engine::secondary::SecondaryLedger;
use crate::engine::types::{
    roll_up_master, BreakoutKey, CostConversion, MeasureMarkets, MsegAdjust, OutBreak,
    PartitionResult, TsvData, TsvFactors,
};
use crate::error::EngineError;
use crate::measure::{Measure, PrepWarning};
use crate::series::YearSeries;
use crate::taxonomy::{MsegKey, Sector, SegmentType, Side};

/// Prepares one measure's markets for one adoption scenario.
///
/// Enumerates the measure's primary keys (then secondary keys, which
/// consume the secondary ledger the primary pass filled), partitions each,
/// and writes `measure.markets[scenario]` exactly once.
///
/// # Errors
///
/// Propagates resolution ([`EngineError::MissingKey`]) and input-shape
/// errors; the caller is expected to mark the measure inactive rather than
/// abort the batch. Re-preparing an already-prepared scenario is an error.
pub fn aggregate(
    measure: &mut Measure,
    baseline: &BaselineData,
    cost_conversion: &CostConversion,
    tsv: &TsvData,
    config: &AnalysisConfig,
    scenario: AdoptionScenario,
) -> Result<Vec<PrepWarning>, EngineError> {
    if measure.markets.contains_key(&scenario) {
        return Err(EngineError::InvalidMeasure {
            measure: measure.name.clone(),
            detail: format!("markets already prepared for {scenario}"),
        });
    }

    let mut warnings = Vec::new();
    if measure.validate_sub_market_sources(&mut warnings) {
        for w in &warnings {
            if w.critical {
                error!(measure = %w.measure, critical = true, "{}", w.detail);
            } else {
                warn!(measure = %w.measure, "{}", w.detail);
            }
        }
        measure.remove = true;
        return Ok(warnings);
    }
    for w in &warnings {
        warn!(measure = %w.measure, "{}", w.detail);
    }

    let first = config.first_year();
    let last = config.last_year();
    let mut contributing: BTreeMap<MsegKey, PartitionResult> = BTreeMap::new();
    let mut choice_params: BTreeMap<MsegKey, ChoiceParams> = BTreeMap::new();
    let mut secondary_ledger = SecondaryLedger::default();
    let mut out_break = OutBreak::default();

    // Primary pass.
    for key in measure.scope.keys(SegmentType::Primary)? {
        let base = baseline.baseline(&key)?;
        let tech = baseline.tech(&key)?;
        let seg = SegmentView {
            stock: match &base.stock {
                StockBasis::Units(series) => Some(series),
                StockBasis::NotApplicable => None,
            },
            energy: &base.energy,
            performance: &tech.performance.typical,
            unit_cost: &tech.installed_cost.typical,
            lifetime: &tech.lifetime.average,
        };
        let conv = conversion_view(baseline, &key, measure)?;
        let measure_cost = converted_measure_cost(
            measure,
            cost_conversion,
            &tech.installed_cost.units,
            first,
            last,
        )?;
        let factors = tsv_factors(measure, tsv, &key, first, last);
        let fraction = measure.sub_market_fraction(key.structure_type);

        let out = partition_primary(
            &key,
            measure,
            &measure_cost,
            fraction,
            &seg,
            &conv,
            &factors,
            &config.stock_flow,
            scenario,
        )?;

        if key.side == Some(Side::Demand) {
            secondary_ledger.record_primary(&key, &out.capture, fraction);
        }
        out_break.accumulate(breakout_key(&key), out.result.energy.total_baseline.total());
        choice_params.insert(
            key.clone(),
            scaled_choice_params(tech.consumer_choice, key.building_type.sector(), base),
        );
        if contributing.insert(key.clone(), out.result).is_some() {
            return Err(EngineError::InvalidDimension {
                dimension: "microsegment key",
                value: format!("duplicate contributing key `{key}`"),
            });
        }
    }

    // Secondary pass: supply-side segments adjusted by the primary capture.
    if let Some(secondary_scope) = &measure.secondary_scope {
        for key in secondary_scope.keys(SegmentType::Secondary)? {
            let Some(fractions) = secondary_ledger.fractions(&key) else {
                debug!(measure = %measure.name, key = %key, "no primary capture; skipping secondary key");
                continue;
            };
            let base = baseline.baseline(&key)?;
            let tech = baseline.tech(&key)?;
            let seg = SegmentView {
                stock: None,
                energy: &base.energy,
                performance: &tech.performance.typical,
                unit_cost: &tech.installed_cost.typical,
                lifetime: &tech.lifetime.average,
            };
            let conv = conversion_view(baseline, &key, measure)?;
            let factors = tsv_factors(measure, tsv, &key, first, last);
            let result = partition_secondary(&key, measure, &seg, &conv, &factors, &fractions)?;
            out_break.accumulate(breakout_key(&key), result.energy.total_baseline.total());
            if contributing.insert(key.clone(), result).is_some() {
                return Err(EngineError::InvalidDimension {
                    dimension: "microsegment key",
                    value: format!("duplicate contributing key `{key}`"),
                });
            }
        }
    }

    let master_mseg = roll_up_master(&contributing, first, last);
    out_break.normalize();

    measure.markets.insert(
        scenario,
        MeasureMarkets {
            master_mseg,
            mseg_adjust: MsegAdjust {
                contributing,
                choice_params,
                secondary: secondary_ledger,
            },
            mseg_out_break: out_break,
        },
    );
    Ok(warnings)
}

/// Prepares every measure for every configured adoption scenario.
///
/// Failures are isolated per measure: a resolution or input-shape error
/// marks that measure inactive (`remove = true`) and the batch continues.
/// Returns all accumulated warnings.
pub fn prepare_measures(
    measures: &mut [Measure],
    baseline: &BaselineData,
    cost_conversion: &CostConversion,
    tsv: &TsvData,
    config: &AnalysisConfig,
) -> Result<Vec<PrepWarning>, EngineError> {
    baseline.validate_horizon(config.first_year(), config.last_year())?;
    let mut warnings = Vec::new();
    for measure in measures.iter_mut() {
        for &scenario in &config.analysis.scenarios {
            if measure.remove {
                break;
            }
            match aggregate(measure, baseline, cost_conversion, tsv, config, scenario) {
                Ok(mut w) => warnings.append(&mut w),
                Err(err) => {
                    error!(measure = %measure.name, %scenario, "preparation failed: {err}");
                    warnings.push(PrepWarning {
                        measure: measure.name.clone(),
                        detail: format!("excluded after preparation failure: {err}"),
                        critical: true,
                    });
                    measure.remove = true;
                }
            }
        }
    }
    Ok(warnings)
}

fn conversion_view<'a>(
    baseline: &'a BaselineData,
    key: &MsegKey,
    measure: &Measure,
) -> Result<ConversionView<'a>, EngineError> {
    let sector = key.building_type.sector();
    let tables = &baseline.conversions;
    let switched = match measure.fuel_switch_to {
        Some(to_fuel) if key.seg_type == SegmentType::Primary && to_fuel != key.fuel_type => {
            Some(SwitchedView {
                site_source: tables.site_source(to_fuel)?,
                carbon_intensity: tables.carbon_intensity(to_fuel, sector)?,
                energy_price: tables.energy_price(to_fuel, sector)?,
            })
        }
        _ => None,
    };
    Ok(ConversionView {
        site_source: tables.site_source(key.fuel_type)?,
        carbon_intensity: tables.carbon_intensity(key.fuel_type, sector)?,
        energy_price: tables.energy_price(key.fuel_type, sector)?,
        carbon_price: tables.carbon_price(sector)?,
        switched,
    })
}

fn converted_measure_cost(
    measure: &Measure,
    cost_conversion: &CostConversion,
    baseline_units: &str,
    first: u32,
    last: u32,
) -> Result<YearSeries, EngineError> {
    let mut series = YearSeries::zeros(first, last);
    for year in first..=last {
        let reported = measure.installed_cost.at(year);
        let converted =
            cost_conversion.convert(reported, &measure.cost_units, baseline_units)?;
        if let Some(slot) = series.get_mut(year) {
            *slot = converted;
        }
    }
    Ok(series)
}

fn tsv_factors(
    measure: &Measure,
    tsv: &TsvData,
    key: &MsegKey,
    first: u32,
    last: u32,
) -> TsvFactors {
    if measure.time_sensitive {
        tsv.factors_or_neutral(key, first, last)
    } else {
        TsvFactors::neutral(first, last)
    }
}

fn breakout_key(key: &MsegKey) -> BreakoutKey {
    BreakoutKey {
        climate_zone: key.climate_zone,
        sector: key.building_type.sector(),
        structure_type: key.structure_type,
        category: key.end_use.report_category(),
    }
}

fn scaled_choice_params(
    params: ChoiceParams,
    sector: Sector,
    base: &crate::baseline::BaselineRecord,
) -> ChoiceParams {
    match (params, sector) {
        // Residential logistic coefficients scale with typical per-unit
        // annual consumption; commercial parameters pass through as given.
        (ChoiceParams::Logistic { b1, b2 }, Sector::Residential) => {
            let unit_energy = match &base.stock {
                StockBasis::Units(stock) => {
                    let units = stock.values()[0];
                    if units > 0.0 {
                        base.energy.values()[0] / units
                    } else {
                        1.0
                    }
                }
                StockBasis::NotApplicable => 1.0,
            };
            ChoiceParams::Logistic {
                b1: b1 * unit_energy,
                b2: b2 * unit_energy,
            }
        }
        (other, _) => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::baseline::{
        BaselineRecord, ConversionTables, CostRecord, LifetimeRecord, PerformanceRecord,
        TechRecord,
    };
    use crate::config::SamplingConfig;
    use crate::measure::{
        ApplicableScope, CostSpec, MeasureDef, MeasureType, PerformanceSpec, PerformanceUnits,
        SourceMeta, SubMarketScaling, ValueSpec,
    };
    use crate::taxonomy::{
        BuildingType, ClimateZone, EndUse, FuelType, Sector, StructureType, Technology,
    };
    use std::collections::HashMap;

    const FIRST: u32 = 2009;
    const LAST: u32 = 2011;

    fn config() -> AnalysisConfig {
        let mut config = AnalysisConfig::default();
        config.analysis.first_year = FIRST;
        config.analysis.last_year = LAST;
        config
    }

    fn conversions() -> ConversionTables {
        let mut tables = ConversionTables::default();
        let one = || YearSeries::fill(FIRST, LAST, 1.0);
        for fuel in [FuelType::NaturalGas, FuelType::Electricity] {
            tables.site_source.insert(fuel, one());
            for sector in [Sector::Residential, Sector::Commercial] {
                tables
                    .carbon_intensity
                    .insert((fuel, sector), YearSeries::fill(FIRST, LAST, 0.05));
                tables
                    .energy_price
                    .insert((fuel, sector), YearSeries::fill(FIRST, LAST, 10.0));
            }
        }
        for sector in [Sector::Residential, Sector::Commercial] {
            tables
                .carbon_price
                .insert(sector, YearSeries::fill(FIRST, LAST, 30.0));
        }
        tables
    }

    fn tech_record(performance: f64, choice: ChoiceParams) -> TechRecord {
        TechRecord {
            performance: PerformanceRecord {
                typical: YearSeries::fill(FIRST, LAST, performance),
                best: YearSeries::fill(FIRST, LAST, performance * 1.2),
                units: "EF".to_string(),
                source: "AEO".to_string(),
            },
            installed_cost: CostRecord {
                typical: YearSeries::fill(FIRST, LAST, 18.0),
                units: "$/unit".to_string(),
                source: "AEO".to_string(),
            },
            lifetime: LifetimeRecord {
                average: YearSeries::fill(FIRST, LAST, 10.0),
                range: 2.0,
                units: "years".to_string(),
                source: "AEO".to_string(),
            },
            consumer_choice: choice,
        }
    }

    fn wh_key(cz: ClimateZone, tech: &str) -> MsegKey {
        MsegKey {
            seg_type: SegmentType::Primary,
            climate_zone: cz,
            building_type: BuildingType::SingleFamily,
            fuel_type: FuelType::NaturalGas,
            end_use: EndUse::WaterHeating,
            side: None,
            technology: Technology::new(tech).unwrap(),
            structure_type: StructureType::Existing,
        }
    }

    fn wh_baseline() -> BaselineData {
        let mut data = BaselineData::new(conversions());
        for cz in [ClimateZone::Cz1, ClimateZone::Cz2] {
            data.insert_baseline(
                wh_key(cz, "storage water heater"),
                BaselineRecord {
                    stock: StockBasis::Units(YearSeries::fill(FIRST, LAST, 15.0)),
                    energy: YearSeries::fill(FIRST, LAST, 15.15),
                },
            )
            .unwrap();
            data.insert_tech(
                wh_key(cz, "storage water heater"),
                tech_record(18.0, ChoiceParams::Logistic { b1: -0.5, b2: -0.1 }),
            )
            .unwrap();
        }
        data
    }

    fn wh_measure(zones: Vec<ClimateZone>) -> Measure {
        let def = MeasureDef {
            id: 7,
            name: "gas WH EF 25".to_string(),
            measure_type: MeasureType::FullService,
            scope: ApplicableScope {
                climate_zones: zones,
                building_types: vec![BuildingType::SingleFamily],
                structure_types: vec![StructureType::Existing],
                fuel_types: vec![FuelType::NaturalGas],
                end_uses: vec![EndUse::WaterHeating],
                side: None,
                technologies: vec![Technology::new("storage water heater").unwrap()],
            },
            secondary_scope: None,
            performance: PerformanceSpec {
                value: ValueSpec::Point(25.0),
                units: PerformanceUnits::Absolute {
                    unit: "EF".to_string(),
                    higher_is_better: true,
                },
            },
            installed_cost: CostSpec {
                value: ValueSpec::Point(25.0),
                units: "$/unit".to_string(),
            },
            lifetime: ValueSpec::Point(10.0),
            market_entry_year: None,
            market_exit_year: None,
            sub_market: None,
            fuel_switch_to: None,
            time_sensitive: false,
        };
        Measure::from_def(def, &SamplingConfig::default()).unwrap()
    }

    #[test]
    fn master_equals_sum_of_contributing_keys() {
        let baseline = wh_baseline();
        let mut measure = wh_measure(vec![ClimateZone::Cz1, ClimateZone::Cz2]);
        aggregate(
            &mut measure,
            &baseline,
            &CostConversion::default(),
            &TsvData::default(),
            &config(),
            AdoptionScenario::TechnicalPotential,
        )
        .unwrap();
        let markets = &measure.markets[&AdoptionScenario::TechnicalPotential];
        assert_eq!(markets.mseg_adjust.contributing.len(), 2);
        let mut by_hand = PartitionResult::zeros(FIRST, LAST, 0.0);
        for result in markets.mseg_adjust.contributing.values() {
            by_hand.add_assign(result);
        }
        assert_eq!(markets.master_mseg.energy, by_hand.energy);
        assert_eq!(markets.master_mseg.stock, by_hand.stock);
        assert_eq!(markets.master_mseg.cost, by_hand.cost);
        // Two identical zones: 2 * 15.15 baseline energy.
        assert!(
            (markets.master_mseg.energy.total_baseline.get(FIRST).unwrap() - 30.3).abs() < 1e-9
        );
    }

    #[test]
    fn out_break_shares_sum_to_one() {
        let baseline = wh_baseline();
        let mut measure = wh_measure(vec![ClimateZone::Cz1, ClimateZone::Cz2]);
        aggregate(
            &mut measure,
            &baseline,
            &CostConversion::default(),
            &TsvData::default(),
            &config(),
            AdoptionScenario::MaxAdoptionPotential,
        )
        .unwrap();
        let out = &measure.markets[&AdoptionScenario::MaxAdoptionPotential].mseg_out_break;
        assert!((out.total_share() - 1.0).abs() < 1e-12);
        assert_eq!(out.shares.len(), 2);
        for share in out.shares.values() {
            assert!((share - 0.5).abs() < 1e-12);
        }
    }

    #[test]
    fn residential_choice_params_scaled_by_unit_energy() {
        let baseline = wh_baseline();
        let mut measure = wh_measure(vec![ClimateZone::Cz1]);
        aggregate(
            &mut measure,
            &baseline,
            &CostConversion::default(),
            &TsvData::default(),
            &config(),
            AdoptionScenario::TechnicalPotential,
        )
        .unwrap();
        let markets = &measure.markets[&AdoptionScenario::TechnicalPotential];
        let params = markets.mseg_adjust.choice_params.values().next().unwrap();
        // Unit energy 15.15 / 15 = 1.01.
        match params {
            ChoiceParams::Logistic { b1, b2 } => {
                assert!((b1 - (-0.5 * 1.01)).abs() < 1e-12);
                assert!((b2 - (-0.1 * 1.01)).abs() < 1e-12);
            }
            other => panic!("unexpected params {other:?}"),
        }
    }

    #[test]
    fn commercial_choice_params_pass_through_unscaled() {
        let base = BaselineRecord {
            stock: StockBasis::Units(YearSeries::fill(FIRST, LAST, 15.0)),
            energy: YearSeries::fill(FIRST, LAST, 15.15),
        };
        // A commercial segment keeps its parameters even when the record
        // carries logistic coefficients.
        let logistic = ChoiceParams::Logistic { b1: -0.5, b2: -0.1 };
        assert_eq!(
            scaled_choice_params(logistic, Sector::Commercial, &base),
            logistic
        );
        let bass = ChoiceParams::BassDiffusion { p: 0.02, q: 0.4 };
        assert_eq!(scaled_choice_params(bass, Sector::Commercial, &base), bass);
        assert_eq!(scaled_choice_params(bass, Sector::Residential, &base), bass);
    }

    #[test]
    fn missing_baseline_key_propagates() {
        let baseline = wh_baseline();
        // Cz3 has no baseline entry.
        let mut measure = wh_measure(vec![ClimateZone::Cz3]);
        let err = aggregate(
            &mut measure,
            &baseline,
            &CostConversion::default(),
            &TsvData::default(),
            &config(),
            AdoptionScenario::TechnicalPotential,
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::MissingKey { .. }));
    }

    #[test]
    fn repreparing_scenario_is_an_error() {
        let baseline = wh_baseline();
        let mut measure = wh_measure(vec![ClimateZone::Cz1]);
        let run = |m: &mut Measure| {
            aggregate(
                m,
                &baseline,
                &CostConversion::default(),
                &TsvData::default(),
                &config(),
                AdoptionScenario::TechnicalPotential,
            )
        };
        run(&mut measure).unwrap();
        assert!(run(&mut measure).is_err());
    }

    #[test]
    fn prepare_measures_isolates_failures() {
        let baseline = wh_baseline();
        let mut measures = vec![
            wh_measure(vec![ClimateZone::Cz3]), // will fail resolution
            wh_measure(vec![ClimateZone::Cz1]),
        ];
        let warnings = prepare_measures(
            &mut measures,
            &baseline,
            &CostConversion::default(),
            &TsvData::default(),
            &config(),
        )
        .unwrap();
        assert!(measures[0].remove);
        assert!(measures[0].markets.is_empty());
        assert!(!measures[1].remove);
        assert_eq!(measures[1].markets.len(), 2);
        assert!(warnings.iter().any(|w| w.critical));
    }

    #[test]
    fn all_invalid_sub_market_sources_deactivate_measure() {
        let baseline = wh_baseline();
        let mut measure = wh_measure(vec![ClimateZone::Cz1]);
        measure.sub_market = Some(SubMarketScaling {
            fractions: HashMap::from([(StructureType::Existing, 0.5)]),
            sources: vec![SourceMeta::default()],
        });
        let warnings = aggregate(
            &mut measure,
            &baseline,
            &CostConversion::default(),
            &TsvData::default(),
            &config(),
            AdoptionScenario::TechnicalPotential,
        )
        .unwrap();
        assert!(measure.remove);
        assert!(measure.markets.is_empty());
        assert!(warnings.iter().any(|w| w.critical));
    }

    #[test]
    fn windows_measure_adjusts_supply_side_secondary() {
        // Demand-side windows measure in one zone; its secondary scope is
        // the supply-side heating equipment whose load it reduces.
        let mut data = BaselineData::new(conversions());
        let demand_key = MsegKey {
            seg_type: SegmentType::Primary,
            climate_zone: ClimateZone::Cz1,
            building_type: BuildingType::SingleFamily,
            fuel_type: FuelType::NaturalGas,
            end_use: EndUse::Heating,
            side: Some(Side::Demand),
            technology: Technology::new("windows conduction").unwrap(),
            structure_type: StructureType::Existing,
        };
        let supply_key = MsegKey {
            side: Some(Side::Supply),
            technology: Technology::new("furnace").unwrap(),
            ..demand_key.clone()
        };
        data.insert_baseline(
            demand_key.clone(),
            BaselineRecord {
                stock: StockBasis::NotApplicable,
                energy: YearSeries::fill(FIRST, LAST, 100.0),
            },
        )
        .unwrap();
        data.insert_tech(
            demand_key.clone(),
            tech_record(1.0, ChoiceParams::Logistic { b1: -0.5, b2: -0.1 }),
        )
        .unwrap();
        data.insert_baseline(
            supply_key.clone(),
            BaselineRecord {
                stock: StockBasis::Units(YearSeries::fill(FIRST, LAST, 40.0)),
                energy: YearSeries::fill(FIRST, LAST, 100.0),
            },
        )
        .unwrap();
        data.insert_tech(
            supply_key.clone(),
            tech_record(0.8, ChoiceParams::Logistic { b1: -0.5, b2: -0.1 }),
        )
        .unwrap();

        let def = MeasureDef {
            id: 9,
            name: "low-e windows".to_string(),
            measure_type: MeasureType::FullService,
            scope: ApplicableScope {
                climate_zones: vec![ClimateZone::Cz1],
                building_types: vec![BuildingType::SingleFamily],
                structure_types: vec![StructureType::Existing],
                fuel_types: vec![FuelType::NaturalGas],
                end_uses: vec![EndUse::Heating],
                side: Some(Side::Demand),
                technologies: vec![Technology::new("windows conduction").unwrap()],
            },
            secondary_scope: Some(ApplicableScope {
                climate_zones: vec![ClimateZone::Cz1],
                building_types: vec![BuildingType::SingleFamily],
                structure_types: vec![StructureType::Existing],
                fuel_types: vec![FuelType::NaturalGas],
                end_uses: vec![EndUse::Heating],
                side: Some(Side::Supply),
                technologies: vec![Technology::new("furnace").unwrap()],
            }),
            performance: PerformanceSpec {
                value: ValueSpec::Point(0.3),
                units: PerformanceUnits::RelativeSavingsConstant,
            },
            installed_cost: CostSpec {
                value: ValueSpec::Point(12.0),
                units: "$/unit".to_string(),
            },
            lifetime: ValueSpec::Point(20.0),
            market_entry_year: None,
            market_exit_year: None,
            sub_market: None,
            fuel_switch_to: None,
            time_sensitive: false,
        };
        let mut measure = Measure::from_def(def, &SamplingConfig::default()).unwrap();
        aggregate(
            &mut measure,
            &data,
            &CostConversion::default(),
            &TsvData::default(),
            &config(),
            AdoptionScenario::TechnicalPotential,
        )
        .unwrap();
        let markets = &measure.markets[&AdoptionScenario::TechnicalPotential];
        assert_eq!(markets.mseg_adjust.contributing.len(), 2);

        let secondary_key = supply_key.with_seg_type(SegmentType::Secondary);
        let secondary = &markets.mseg_adjust.contributing[&secondary_key];
        // Full technical-potential capture of the demand side cuts the
        // supply-side load by the full 30% savings.
        let base = secondary.energy.total_baseline.get(FIRST).unwrap();
        let eff = secondary.energy.total_efficient.get(FIRST).unwrap();
        assert!((base - 100.0).abs() < 1e-9);
        assert!((eff - 70.0).abs() < 1e-9);
        // Secondary segments carry no stock.
        assert_eq!(secondary.stock.total_baseline.get(FIRST), Some(0.0));
        // The ledger kept one bucket for the shared dimensions.
        assert_eq!(markets.mseg_adjust.secondary.buckets.len(), 1);
    }
}
