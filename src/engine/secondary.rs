//! Secondary (demand-side) microsegment adjustments.
//!
//! A measure on the demand side of heating or cooling (e.g. windows)
//! reduces the load the supply side must meet. Crediting the full supply
//! baseline as well would double-count the avoided energy, so primary
//! demand-side keys record their capture trajectories here and secondary
//! supply-side keys consume them as fractions of the load actually
//! affected.
//!
//! Three categories are tracked per (climate zone, building type, structure
//! type) bucket: `sub_market` (total energy before vs. after sub-market
//! scaling), `stock_and_flow` (original vs. previously-captured, competed,
//! and competed-and-captured energy, prior to sub-market scaling), and
//! `market_share` (original vs. adjusted totals — identical at preparation
//! time and rescaled later by the cross-measure competition stage).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::series::YearSeries;
use crate::taxonomy::{BuildingType, ClimateZone, MsegKey, StructureType};

/// Bucket key: the dimensions shared between a demand-side primary key and
/// the supply-side secondary keys it adjusts.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct AdjKey {
    pub climate_zone: ClimateZone,
    pub building_type: BuildingType,
    pub structure_type: StructureType,
}

impl AdjKey {
    pub fn of(key: &MsegKey) -> Self {
        Self {
            climate_zone: key.climate_zone,
            building_type: key.building_type,
            structure_type: key.structure_type,
        }
    }
}

/// Original vs. sub-market-scaled total energy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubMarketAdj {
    pub original: YearSeries,
    pub adjusted: YearSeries,
}

/// Original vs. captured/competed/competed-and-captured energy, before
/// sub-market scaling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockFlowAdj {
    pub original: YearSeries,
    pub captured: YearSeries,
    pub competed: YearSeries,
    pub competed_captured: YearSeries,
}

/// Original vs. adjusted market-share energy; the adjusted side is
/// rewritten during cross-measure competition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketShareAdj {
    pub original_total: YearSeries,
    pub adjusted_total: YearSeries,
    pub original_competed_captured: YearSeries,
    pub adjusted_competed_captured: YearSeries,
}

/// One bucket of secondary adjustments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdjBucket {
    pub sub_market: SubMarketAdj,
    pub stock_and_flow: StockFlowAdj,
    pub market_share: MarketShareAdj,
}

impl AdjBucket {
    fn zeros(first_year: u32, last_year: u32) -> Self {
        let z = || YearSeries::zeros(first_year, last_year);
        Self {
            sub_market: SubMarketAdj {
                original: z(),
                adjusted: z(),
            },
            stock_and_flow: StockFlowAdj {
                original: z(),
                captured: z(),
                competed: z(),
                competed_captured: z(),
            },
            market_share: MarketShareAdj {
                original_total: z(),
                adjusted_total: z(),
                original_competed_captured: z(),
                adjusted_competed_captured: z(),
            },
        }
    }
}

/// Capture trajectories reported by the partitioner for one primary key.
///
/// `captured`/`competed_captured` come in two flavors: `unscaled` excludes
/// the sub-market fraction (feeding the stock-and-flow category) and
/// `scaled` includes it (feeding the market-share category).
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureTrajectories {
    pub total_energy: YearSeries,
    pub captured_unscaled: YearSeries,
    pub captured_scaled: YearSeries,
    pub competed: YearSeries,
    pub competed_captured_unscaled: YearSeries,
    pub competed_captured_scaled: YearSeries,
}

/// Per-year fractions a secondary supply-side key applies to its baseline
/// load.
#[derive(Debug, Clone, PartialEq)]
pub struct SecondaryFractions {
    /// Share of the total load affected by the measure.
    pub affected_total: YearSeries,
    /// Share of the load competed this year.
    pub competed: YearSeries,
    /// Share of the load both competed and captured this year.
    pub affected_competed: YearSeries,
}

/// The full secondary adjustment ledger for one measure and scenario.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SecondaryLedger {
    pub buckets: BTreeMap<AdjKey, AdjBucket>,
}

impl SecondaryLedger {
    /// Records a primary demand-side key's capture trajectories.
    pub fn record_primary(
        &mut self,
        key: &MsegKey,
        capture: &CaptureTrajectories,
        sub_market_fraction: f64,
    ) {
        let first = capture.total_energy.first_year();
        let last = capture.total_energy.last_year();
        let bucket = self
            .buckets
            .entry(AdjKey::of(key))
            .or_insert_with(|| AdjBucket::zeros(first, last));

        bucket.sub_market.original.add_assign(&capture.total_energy);
        bucket
            .sub_market
            .adjusted
            .add_assign(&capture.total_energy.scaled(sub_market_fraction));

        bucket
            .stock_and_flow
            .original
            .add_assign(&capture.total_energy);
        bucket
            .stock_and_flow
            .captured
            .add_assign(&capture.captured_unscaled);
        bucket.stock_and_flow.competed.add_assign(&capture.competed);
        bucket
            .stock_and_flow
            .competed_captured
            .add_assign(&capture.competed_captured_unscaled);

        bucket
            .market_share
            .original_total
            .add_assign(&capture.captured_scaled);
        bucket
            .market_share
            .adjusted_total
            .add_assign(&capture.captured_scaled);
        bucket
            .market_share
            .original_competed_captured
            .add_assign(&capture.competed_captured_scaled);
        bucket
            .market_share
            .adjusted_competed_captured
            .add_assign(&capture.competed_captured_scaled);
    }

    /// Fractions for a secondary key, or `None` when no primary key filled
    /// the matching bucket (the secondary segment then sees no impact).
    pub fn fractions(&self, key: &MsegKey) -> Option<SecondaryFractions> {
        let bucket = self.buckets.get(&AdjKey::of(key))?;
        let first = bucket.sub_market.original.first_year();
        let last = bucket.sub_market.original.last_year();

        let mut affected_total = YearSeries::zeros(first, last);
        let mut competed = YearSeries::zeros(first, last);
        let mut affected_competed = YearSeries::zeros(first, last);

        for year in first..=last {
            let original = bucket.stock_and_flow.original.get(year).unwrap_or(0.0);
            if original <= 0.0 {
                continue;
            }
            let sub_market_ratio = ratio(
                bucket.sub_market.adjusted.get(year),
                bucket.sub_market.original.get(year),
                1.0,
            );
            let share_total_ratio = ratio(
                bucket.market_share.adjusted_total.get(year),
                bucket.market_share.original_total.get(year),
                1.0,
            );
            let share_cc_ratio = ratio(
                bucket.market_share.adjusted_competed_captured.get(year),
                bucket.market_share.original_competed_captured.get(year),
                1.0,
            );
            let captured = bucket.stock_and_flow.captured.get(year).unwrap_or(0.0);
            let competed_e = bucket.stock_and_flow.competed.get(year).unwrap_or(0.0);
            let cc = bucket
                .stock_and_flow
                .competed_captured
                .get(year)
                .unwrap_or(0.0);

            set(
                &mut affected_total,
                year,
                clamp01(captured / original * sub_market_ratio * share_total_ratio),
            );
            set(&mut competed, year, clamp01(competed_e / original));
            set(
                &mut affected_competed,
                year,
                clamp01(cc / original * sub_market_ratio * share_cc_ratio),
            );
        }

        Some(SecondaryFractions {
            affected_total,
            competed,
            affected_competed,
        })
    }
}

fn ratio(numerator: Option<f64>, denominator: Option<f64>, default: f64) -> f64 {
    match (numerator, denominator) {
        (Some(n), Some(d)) if d > 0.0 => n / d,
        _ => default,
    }
}

fn clamp01(v: f64) -> f64 {
    v.clamp(0.0, 1.0)
}

fn set(series: &mut YearSeries, year: u32, value: f64) {
    if let Some(slot) = series.get_mut(year) {
        *slot = value;
    }
}
