//! Shared test fixtures for integration tests.

use std::collections::HashMap;

use ecm_engine::baseline::{
    BaselineData, BaselineRecord, ChoiceParams, ConversionTables, CostRecord, LifetimeRecord,
    PerformanceRecord, StockBasis, TechRecord,
};
use ecm_engine::config::{AnalysisConfig, SamplingConfig};
use ecm_engine::measure::{
    ApplicableScope, CostSpec, Measure, MeasureDef, MeasureType, PerformanceSpec,
    PerformanceUnits, SourceMeta, SubMarketScaling, ValueSpec,
};
use ecm_engine::series::YearSeries;
use ecm_engine::taxonomy::{
    BuildingType, ClimateZone, EndUse, FuelType, MsegKey, Sector, SegmentType, Side,
    StructureType, Technology,
};

/// First modeled year of the test horizon.
pub const FIRST: u32 = 2009;
/// Last modeled year of the test horizon.
pub const LAST: u32 = 2012;

/// Analysis configuration over the test horizon, both scenarios enabled.
pub fn test_config() -> AnalysisConfig {
    let mut config = AnalysisConfig::default();
    config.analysis.first_year = FIRST;
    config.analysis.last_year = LAST;
    config
}

/// Conversion tables covering gas and electricity for both sectors.
pub fn conversion_tables() -> ConversionTables {
    let mut tables = ConversionTables::default();
    for fuel in [FuelType::NaturalGas, FuelType::Electricity] {
        tables
            .site_source
            .insert(fuel, YearSeries::fill(FIRST, LAST, 1.0));
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

/// Gas storage water heater key in the given climate zone.
pub fn wh_key(climate_zone: ClimateZone) -> MsegKey {
    MsegKey {
        seg_type: SegmentType::Primary,
        climate_zone,
        building_type: BuildingType::SingleFamily,
        fuel_type: FuelType::NaturalGas,
        end_use: EndUse::WaterHeating,
        side: None,
        technology: Technology::new("storage water heater").unwrap(),
        structure_type: StructureType::Existing,
    }
}

/// Gas heating key on the given side (windows on demand, furnace on supply).
pub fn heating_key(side: Side) -> MsegKey {
    let technology = match side {
        Side::Demand => Technology::new("windows conduction").unwrap(),
        Side::Supply => Technology::new("furnace").unwrap(),
    };
    MsegKey {
        seg_type: SegmentType::Primary,
        climate_zone: ClimateZone::Cz1,
        building_type: BuildingType::SingleFamily,
        fuel_type: FuelType::NaturalGas,
        end_use: EndUse::Heating,
        side: Some(side),
        technology,
        structure_type: StructureType::Existing,
    }
}

fn tech_record(performance: f64) -> TechRecord {
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
        consumer_choice: ChoiceParams::Logistic { b1: -0.5, b2: -0.1 },
    }
}

/// Baseline dataset: gas water heating in Cz1/Cz2 (15 units, 15.15 MMBtu,
/// EF 18 typical) plus linked heating demand/supply segments in Cz1.
pub fn sample_baseline() -> BaselineData {
    let mut data = BaselineData::new(conversion_tables());
    for climate_zone in [ClimateZone::Cz1, ClimateZone::Cz2] {
        data.insert_baseline(
            wh_key(climate_zone),
            BaselineRecord {
                stock: StockBasis::Units(YearSeries::fill(FIRST, LAST, 15.0)),
                energy: YearSeries::fill(FIRST, LAST, 15.15),
            },
        )
        .unwrap();
        data.insert_tech(wh_key(climate_zone), tech_record(18.0)).unwrap();
    }
    data.insert_baseline(
        heating_key(Side::Demand),
        BaselineRecord {
            stock: StockBasis::NotApplicable,
            energy: YearSeries::fill(FIRST, LAST, 100.0),
        },
    )
    .unwrap();
    data.insert_tech(heating_key(Side::Demand), tech_record(1.0))
        .unwrap();
    data.insert_baseline(
        heating_key(Side::Supply),
        BaselineRecord {
            stock: StockBasis::Units(YearSeries::fill(FIRST, LAST, 40.0)),
            energy: YearSeries::fill(FIRST, LAST, 100.0),
        },
    )
    .unwrap();
    data.insert_tech(heating_key(Side::Supply), tech_record(0.8))
        .unwrap();
    data
}

/// EF 25 gas water heater measure over the given climate zones.
pub fn wh_measure_def(id: u64, climate_zones: Vec<ClimateZone>) -> MeasureDef {
    MeasureDef {
        id,
        name: format!("gas WH EF 25 #{id}"),
        measure_type: MeasureType::FullService,
        scope: ApplicableScope {
            climate_zones,
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
    }
}

/// 30%-savings low-e windows measure with a supply-side secondary scope.
pub fn windows_measure_def(id: u64) -> MeasureDef {
    let scope = |side, technology: &str| ApplicableScope {
        climate_zones: vec![ClimateZone::Cz1],
        building_types: vec![BuildingType::SingleFamily],
        structure_types: vec![StructureType::Existing],
        fuel_types: vec![FuelType::NaturalGas],
        end_uses: vec![EndUse::Heating],
        side: Some(side),
        technologies: vec![Technology::new(technology).unwrap()],
    };
    MeasureDef {
        id,
        name: "low-e windows".to_string(),
        measure_type: MeasureType::FullService,
        scope: scope(Side::Demand, "windows conduction"),
        secondary_scope: Some(scope(Side::Supply, "furnace")),
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
    }
}

/// Sub-market scaling with a fully valid source.
pub fn valid_sub_market(fraction: f64) -> SubMarketScaling {
    SubMarketScaling {
        fractions: HashMap::from([(StructureType::Existing, fraction)]),
        sources: vec![SourceMeta {
            title: "Shipment study".to_string(),
            author: "A. Analyst".to_string(),
            organization: "Energy Lab".to_string(),
            year: Some(2018),
            url: "https://example.org/study".to_string(),
            fraction_derivation: "share of shipments with feature X".to_string(),
        }],
    }
}

/// Builds a measure with the default sampling configuration.
pub fn build_measure(def: MeasureDef) -> Measure {
    Measure::from_def(def, &SamplingConfig::default()).unwrap()
}
