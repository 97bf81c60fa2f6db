//! Measure packaging: bundling prepared measures into a single offering
//! with optional synergy benefits.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::AdoptionScenario;
use crate::engine::secondary::SecondaryLedger;
use crate::engine::types::{
    roll_up_master, MeasureMarkets, MsegAdjust, OutBreak, PartitionResult,
};
use crate::error::EngineError;
use crate::measure::Measure;
use crate::taxonomy::MsegKey;

/// Synergy benefits applied to a package's efficient trajectories.
///
/// Both fractions live in `[0, 1]`; `{0, 0}` is the identity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PackageBenefits {
    /// Additional fractional reduction of efficient energy, carbon, and
    /// their costs (installing the bundle together saves more than the
    /// parts).
    pub energy_savings_increase: f64,
    /// Fractional reduction of efficient stock cost (shared installation
    /// labor).
    pub cost_reduction: f64,
}

impl PackageBenefits {
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidDimension`] when either fraction falls
    /// outside `[0, 1]`.
    pub fn new(energy_savings_increase: f64, cost_reduction: f64) -> Result<Self, EngineError> {
        for (name, value) in [
            ("package benefit energy_savings_increase", energy_savings_increase),
            ("package benefit cost_reduction", cost_reduction),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(EngineError::InvalidDimension {
                    dimension: name,
                    value: format!("{value} outside [0, 1]"),
                });
            }
        }
        Ok(Self {
            energy_savings_increase,
            cost_reduction,
        })
    }
}

/// A bundle of prepared measures presented as one market offering.
#[derive(Debug, Clone)]
pub struct MeasurePackage {
    pub name: String,
    /// Names of the contributing measures, in input order.
    pub contributing_measures: Vec<String>,
    pub benefits: PackageBenefits,
    /// Merged markets, one tree per adoption scenario common to every
    /// contributing measure.
    pub markets: HashMap<AdoptionScenario, MeasureMarkets>,
}

/// Merges prepared measures into a package and applies its benefits.
///
/// Contributing-key ledgers merge by summing shared keys (two package
/// members reaching the same microsegment address the same physical
/// market, so their captured slices add). The measure-level roll-up is
/// recomputed from the merged ledger, and reporting shares are recombined
/// weighted by each member's total baseline energy.
///
/// # Errors
///
/// * [`EngineError::EmptyPackage`] when no active, prepared measure
///   contributes or the members share no adoption scenario.
/// * [`EngineError::SeriesMismatch`] when members were prepared over
///   different analysis horizons.
/// * [`EngineError::ChoiceParamConflict`] when two members carry divergent
///   competed-choice parameters for the same key.
pub fn merge_measures(
    measures: &[Measure],
    name: &str,
    benefits: PackageBenefits,
) -> Result<MeasurePackage, EngineError> {
    let empty = |reason: &str| EngineError::EmptyPackage {
        package: name.to_string(),
        reason: reason.to_string(),
    };

    let active: Vec<&Measure> = measures.iter().filter(|m| !m.remove).collect();
    if active.is_empty() {
        return Err(empty("no active contributing measures"));
    }
    for measure in &active {
        if measure.markets.is_empty() {
            return Err(EngineError::EmptyPackage {
                package: name.to_string(),
                reason: format!("measure `{}` has no prepared markets", measure.name),
            });
        }
    }

    let scenarios: Vec<AdoptionScenario> = AdoptionScenario::ALL
        .into_iter()
        .filter(|s| active.iter().all(|m| m.markets.contains_key(s)))
        .collect();
    if scenarios.is_empty() {
        return Err(empty("contributing measures share no adoption scenario"));
    }

    let mut markets = HashMap::new();
    for scenario in scenarios {
        let mut merged = merge_scenario(&active, name, scenario)?;
        apply_pkg_benefits(&mut merged, &benefits);
        markets.insert(scenario, merged);
    }

    debug!(package = name, members = active.len(), "package merged");
    Ok(MeasurePackage {
        name: name.to_string(),
        contributing_measures: active.iter().map(|m| m.name.clone()).collect(),
        benefits,
        markets,
    })
}

fn merge_scenario(
    active: &[&Measure],
    name: &str,
    scenario: AdoptionScenario,
) -> Result<MeasureMarkets, EngineError> {
    let mut contributing: BTreeMap<MsegKey, PartitionResult> = BTreeMap::new();
    let mut choice_params = BTreeMap::new();
    let mut secondary = SecondaryLedger::default();
    let mut out_break = OutBreak::default();

    // Members prepared over different horizons cannot be summed; reject
    // up front instead of panicking inside pointwise series arithmetic.
    let horizon = &active[0].markets[&scenario].master_mseg.energy.total_baseline;
    for measure in active {
        horizon.check_aligned(
            &measure.markets[&scenario].master_mseg.energy.total_baseline,
            &format!("prepared horizon of package member `{}`", measure.name),
        )?;
    }
    let first_year = horizon.first_year();
    let last_year = horizon.last_year();

    for measure in active {
        let markets = &measure.markets[&scenario];

        for (key, result) in &markets.mseg_adjust.contributing {
            match contributing.get_mut(key) {
                Some(existing) => merge_results(existing, result, last_year),
                None => {
                    contributing.insert(key.clone(), result.clone());
                }
            }
        }
        for (key, params) in &markets.mseg_adjust.choice_params {
            match choice_params.get(key) {
                Some(existing) if existing != params => {
                    return Err(EngineError::ChoiceParamConflict {
                        package: name.to_string(),
                        key: key.to_string(),
                    });
                }
                Some(_) => {}
                None => {
                    choice_params.insert(key.clone(), *params);
                }
            }
        }
        merge_secondary(&mut secondary, &markets.mseg_adjust.secondary);
        // Weight each member's normalized shares by its total baseline
        // energy so the recombined cells reflect absolute market sizes.
        let weight = markets.master_mseg.energy.total_baseline.total();
        for (cell, share) in &markets.mseg_out_break.shares {
            out_break.accumulate(*cell, share * weight);
        }
    }
    out_break.normalize();

    Ok(MeasureMarkets {
        master_mseg: roll_up_master(&contributing, first_year, last_year),
        mseg_adjust: MsegAdjust {
            contributing,
            choice_params,
            secondary,
        },
        mseg_out_break: out_break,
    })
}

// Shared-key merge: additive quantities sum; the baseline lifetime comes
// from the segment's own data and is identical across members; the measure
// lifetime blends weighted by terminal-year captured stock.
fn merge_results(existing: &mut PartitionResult, incoming: &PartitionResult, last_year: u32) {
    let w_existing = existing
        .stock
        .total_efficient
        .get(last_year)
        .unwrap_or(0.0);
    let w_incoming = incoming
        .stock
        .total_efficient
        .get(last_year)
        .unwrap_or(0.0);
    existing.lifetime.measure = if w_existing + w_incoming > 0.0 {
        (existing.lifetime.measure * w_existing + incoming.lifetime.measure * w_incoming)
            / (w_existing + w_incoming)
    } else {
        (existing.lifetime.measure + incoming.lifetime.measure) / 2.0
    };
    existing.add_assign(incoming);
}

fn merge_secondary(into: &mut SecondaryLedger, from: &SecondaryLedger) {
    for (adj_key, bucket) in &from.buckets {
        match into.buckets.get_mut(adj_key) {
            Some(existing) => {
                existing.sub_market.original.add_assign(&bucket.sub_market.original);
                existing.sub_market.adjusted.add_assign(&bucket.sub_market.adjusted);
                let sf = &mut existing.stock_and_flow;
                sf.original.add_assign(&bucket.stock_and_flow.original);
                sf.captured.add_assign(&bucket.stock_and_flow.captured);
                sf.competed.add_assign(&bucket.stock_and_flow.competed);
                sf.competed_captured
                    .add_assign(&bucket.stock_and_flow.competed_captured);
                let ms = &mut existing.market_share;
                ms.original_total
                    .add_assign(&bucket.market_share.original_total);
                ms.adjusted_total
                    .add_assign(&bucket.market_share.adjusted_total);
                ms.original_competed_captured
                    .add_assign(&bucket.market_share.original_competed_captured);
                ms.adjusted_competed_captured
                    .add_assign(&bucket.market_share.adjusted_competed_captured);
            }
            None => {
                into.buckets.insert(*adj_key, bucket.clone());
            }
        }
    }
}

/// Applies package benefits to one merged market tree.
///
/// The energy benefit deepens the efficient energy, carbon, and related
/// cost trajectories; the cost benefit trims the efficient stock cost.
/// Baseline trajectories are never touched, and `{0, 0}` is a no-op.
pub fn apply_pkg_benefits(markets: &mut MeasureMarkets, benefits: &PackageBenefits) {
    let energy_factor = 1.0 - benefits.energy_savings_increase;
    let cost_factor = 1.0 - benefits.cost_reduction;
    if energy_factor == 1.0 && cost_factor == 1.0 {
        return;
    }
    let scale = |result: &mut PartitionResult| {
        result.energy.scale_efficient(energy_factor);
        result.carbon.scale_efficient(energy_factor);
        result.cost.energy.scale_efficient(energy_factor);
        result.cost.carbon.scale_efficient(energy_factor);
        result.cost.stock.scale_efficient(cost_factor);
    };
    scale(&mut markets.master_mseg);
    // Contributing keys scale identically so the ledger stays additive
    // against the roll-up.
    for result in markets.mseg_adjust.contributing.values_mut() {
        scale(result);
    }
}
