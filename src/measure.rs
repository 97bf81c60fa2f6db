//! Energy-conservation measure definitions.
//!
//! A [`Measure`] is constructed once from user-supplied attributes via
//! [`Measure::from_def`], which resolves any distribution-valued attribute
//! into a deterministic scalar with a seeded RNG. After construction the
//! measure is immutable except for the late-bound `markets` trees filled by
//! the aggregator and the `remove` soft-fail flag.

use std::collections::HashMap;
use std::fmt;

use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, LogNormal, Normal, Triangular};
use serde::{Deserialize, Serialize};

use crate::config::{AdoptionScenario, SamplingConfig};
use crate::engine::types::MeasureMarkets;
use crate::error::EngineError;
use crate::series::YearSeries;
use crate::taxonomy::{
    BuildingType, ClimateZone, EndUse, FuelType, MsegKey, SegmentType, Side, StructureType,
    Technology,
};

/// Whether a measure replaces the baseline technology outright or attaches
/// to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeasureType {
    FullService,
    AddOn,
}

/// A scalar-or-distribution attribute value, as supplied by the user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueSpec {
    Point(f64),
    Normal { mean: f64, sd: f64 },
    LogNormal { mu: f64, sigma: f64 },
    Triangular { low: f64, mode: f64, high: f64 },
    /// Already year-indexed (e.g. a performance level that improves over
    /// the projection).
    Yearly(YearSeries),
}

impl ValueSpec {
    /// Resolves into a deterministic value, sampling distributions with the
    /// given RNG.
    ///
    /// Draws are truncated at zero — cost, performance, and lifetime are
    /// non-negative physical quantities.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidMeasure`]-shaped detail via the caller
    /// when distribution parameters are malformed (e.g. negative sd).
    pub fn resolve(&self, rng: &mut StdRng, samples: u32) -> Result<ResolvedValue, String> {
        let sample_mean = |dist: &dyn Fn(&mut StdRng) -> f64, rng: &mut StdRng| -> f64 {
            let mut acc = 0.0;
            for _ in 0..samples {
                acc += dist(rng).max(0.0);
            }
            acc / f64::from(samples)
        };
        match self {
            ValueSpec::Point(v) => Ok(ResolvedValue::Scalar(*v)),
            ValueSpec::Normal { mean, sd } => {
                let dist = Normal::new(*mean, *sd).map_err(|e| format!("normal: {e}"))?;
                Ok(ResolvedValue::Scalar(sample_mean(
                    &|rng: &mut StdRng| dist.sample(rng),
                    rng,
                )))
            }
            ValueSpec::LogNormal { mu, sigma } => {
                let dist = LogNormal::new(*mu, *sigma).map_err(|e| format!("lognormal: {e}"))?;
                Ok(ResolvedValue::Scalar(sample_mean(
                    &|rng: &mut StdRng| dist.sample(rng),
                    rng,
                )))
            }
            ValueSpec::Triangular { low, mode, high } => {
                let dist =
                    Triangular::new(*low, *high, *mode).map_err(|e| format!("triangular: {e}"))?;
                Ok(ResolvedValue::Scalar(sample_mean(
                    &|rng: &mut StdRng| dist.sample(rng),
                    rng,
                )))
            }
            ValueSpec::Yearly(series) => Ok(ResolvedValue::Yearly(series.clone())),
        }
    }
}

/// A resolved attribute: a scalar or a per-year series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ResolvedValue {
    Scalar(f64),
    Yearly(YearSeries),
}

impl ResolvedValue {
    /// Value applicable to `year` (scalars apply to every year).
    pub fn at(&self, year: u32) -> f64 {
        match self {
            ResolvedValue::Scalar(v) => *v,
            ResolvedValue::Yearly(series) => series.get(year).unwrap_or_else(|| {
                // Years outside a yearly attribute's range hold its edge
                // value, matching how projections extend flat.
                if year < series.first_year() {
                    series.values()[0]
                } else {
                    *series.values().last().unwrap_or(&0.0)
                }
            }),
        }
    }

    /// Scalar view; yearly values collapse to the first year's level.
    pub fn scalar(&self) -> f64 {
        match self {
            ResolvedValue::Scalar(v) => *v,
            ResolvedValue::Yearly(series) => series.values()[0],
        }
    }
}

/// Semantics of a measure's reported performance value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PerformanceUnits {
    /// Same physical unit as the baseline performance series.
    Absolute {
        unit: String,
        /// Whether larger values mean less energy (EF, COP) or more
        /// (kWh/yr).
        higher_is_better: bool,
    },
    /// Fractional savings relative to baseline energy, fixed over time.
    RelativeSavingsConstant,
    /// Fractional savings anchored to the baseline performance of
    /// `anchor_year`, re-based as the baseline improves.
    RelativeSavingsDynamic { anchor_year: u32 },
}

/// Performance attribute: value plus units semantics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSpec {
    pub value: ValueSpec,
    pub units: PerformanceUnits,
}

/// Installed-cost attribute: value plus the measure's reported cost unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostSpec {
    pub value: ValueSpec,
    /// Reported unit, e.g. `"$/unit"` or `"$/ft^2 floor"`; converted to the
    /// baseline's native unit by the cost-conversion collaborator.
    pub units: String,
}

/// Concrete (pre-expanded) applicable dimensions for one segment type.
///
/// Wildcard expansion ("all" -> concrete lists) happens upstream; the
/// engine only ever sees explicit lists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicableScope {
    pub climate_zones: Vec<ClimateZone>,
    pub building_types: Vec<BuildingType>,
    pub structure_types: Vec<StructureType>,
    pub fuel_types: Vec<FuelType>,
    pub end_uses: Vec<EndUse>,
    /// Supply/demand side for heating/cooling end uses.
    pub side: Option<Side>,
    pub technologies: Vec<Technology>,
}

impl ApplicableScope {
    /// Enumerates every concrete microsegment key in this scope.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidDimension`] when any dimension list is
    /// empty or a generated key is internally inconsistent.
    pub fn keys(&self, seg_type: SegmentType) -> Result<Vec<MsegKey>, EngineError> {
        let check = |name: &'static str, empty: bool| {
            if empty {
                Err(EngineError::InvalidDimension {
                    dimension: name,
                    value: "empty applicable list".to_string(),
                })
            } else {
                Ok(())
            }
        };
        check("climate zones", self.climate_zones.is_empty())?;
        check("building types", self.building_types.is_empty())?;
        check("structure types", self.structure_types.is_empty())?;
        check("fuel types", self.fuel_types.is_empty())?;
        check("end uses", self.end_uses.is_empty())?;
        check("technologies", self.technologies.is_empty())?;

        let mut keys = Vec::new();
        for &climate_zone in &self.climate_zones {
            for &building_type in &self.building_types {
                for &fuel_type in &self.fuel_types {
                    for &end_use in &self.end_uses {
                        let side = if end_use.has_demand_side() {
                            self.side
                        } else {
                            None
                        };
                        for technology in &self.technologies {
                            for &structure_type in &self.structure_types {
                                let key = MsegKey {
                                    seg_type,
                                    climate_zone,
                                    building_type,
                                    fuel_type,
                                    end_use,
                                    side,
                                    technology: technology.clone(),
                                    structure_type,
                                };
                                key.validate()?;
                                keys.push(key);
                            }
                        }
                    }
                }
            }
        }
        Ok(keys)
    }
}

/// Attribution metadata for a sub-market scaling source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceMeta {
    pub title: String,
    pub author: String,
    pub organization: String,
    pub year: Option<u32>,
    pub url: String,
    /// Free-text note explaining how the fraction was derived.
    pub fraction_derivation: String,
}

impl SourceMeta {
    /// Field-by-field validation findings, one message per invalid field.
    pub fn invalid_fields(&self) -> Vec<String> {
        let mut findings = Vec::new();
        if self.title.trim().is_empty() {
            findings.push("missing source title".to_string());
        }
        if self.author.trim().is_empty() {
            findings.push("missing source author".to_string());
        }
        if self.organization.trim().is_empty() {
            findings.push("missing source organization".to_string());
        }
        match self.year {
            None => findings.push("missing source year".to_string()),
            Some(y) if !(1900..=2100).contains(&y) => {
                findings.push(format!("implausible source year {y}"));
            }
            Some(_) => {}
        }
        if !is_plausible_url(&self.url) {
            findings.push(format!("malformed source URL `{}`", self.url));
        }
        if self.fraction_derivation.trim().is_empty() {
            findings.push("missing fraction-derivation note".to_string());
        }
        findings
    }

    /// Number of required fields checked by [`Self::invalid_fields`].
    pub const FIELD_COUNT: usize = 6;
}

fn is_plausible_url(url: &str) -> bool {
    let rest = if let Some(rest) = url.strip_prefix("https://") {
        rest
    } else if let Some(rest) = url.strip_prefix("http://") {
        rest
    } else {
        return false;
    };
    let host = rest.split('/').next().unwrap_or("");
    host.contains('.') && !host.ends_with('.')
}

/// Sub-market scaling: per-structure-type fractions plus their sources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubMarketScaling {
    /// Fraction of the nominal market addressable, per structure type;
    /// absent entries mean 1.0.
    pub fractions: HashMap<StructureType, f64>,
    pub sources: Vec<SourceMeta>,
}

impl SubMarketScaling {
    pub fn fraction_for(&self, structure_type: StructureType) -> f64 {
        self.fractions.get(&structure_type).copied().unwrap_or(1.0)
    }
}

/// A non-fatal finding raised during measure preparation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrepWarning {
    pub measure: String,
    pub detail: String,
    /// Set when the finding disqualified the measure from competition.
    pub critical: bool,
}

impl fmt::Display for PrepWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.critical {
            write!(f, "CRITICAL [{}]: {}", self.measure, self.detail)
        } else {
            write!(f, "[{}]: {}", self.measure, self.detail)
        }
    }
}

/// User-supplied measure attributes, before distribution resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasureDef {
    pub id: u64,
    pub name: String,
    pub measure_type: MeasureType,
    pub scope: ApplicableScope,
    /// Demand-linked supply-side markets this measure also affects.
    pub secondary_scope: Option<ApplicableScope>,
    pub performance: PerformanceSpec,
    pub installed_cost: CostSpec,
    pub lifetime: ValueSpec,
    pub market_entry_year: Option<u32>,
    pub market_exit_year: Option<u32>,
    pub sub_market: Option<SubMarketScaling>,
    pub fuel_switch_to: Option<FuelType>,
    /// Whether the measure opts into time-sensitive valuation factors.
    pub time_sensitive: bool,
}

/// A fully constructed measure.
///
/// `markets` and `remove` are the only fields written after construction;
/// the aggregator fills `markets` exactly once per adoption scenario.
#[derive(Debug, Clone)]
pub struct Measure {
    pub id: u64,
    pub name: String,
    pub measure_type: MeasureType,
    pub scope: ApplicableScope,
    pub secondary_scope: Option<ApplicableScope>,
    pub performance: ResolvedValue,
    pub performance_units: PerformanceUnits,
    /// Installed cost in the measure's reported units.
    pub installed_cost: ResolvedValue,
    pub cost_units: String,
    /// Resolved lifetime (years).
    pub lifetime: f64,
    pub market_entry_year: Option<u32>,
    pub market_exit_year: Option<u32>,
    pub sub_market: Option<SubMarketScaling>,
    pub fuel_switch_to: Option<FuelType>,
    pub time_sensitive: bool,
    /// Prepared markets, one tree per adoption scenario.
    pub markets: HashMap<AdoptionScenario, MeasureMarkets>,
    /// Soft-fail flag: excluded from downstream competition when set.
    pub remove: bool,
}

impl Measure {
    /// Constructs a measure from its definition, resolving distributions
    /// with a seeded RNG (`sampling.seed` xor the measure id, so sibling
    /// measures draw independent streams deterministically).
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidMeasure`] for malformed distribution
    /// parameters, out-of-range sub-market fractions, an inverted market
    /// entry/exit window, or an add-on measure reporting absolute
    /// performance units (add-ons layer savings onto a host technology and
    /// must use relative-savings units).
    pub fn from_def(def: MeasureDef, sampling: &SamplingConfig) -> Result<Self, EngineError> {
        let invalid = |detail: String| EngineError::InvalidMeasure {
            measure: def.name.clone(),
            detail,
        };

        if def.measure_type == MeasureType::AddOn
            && matches!(def.performance.units, PerformanceUnits::Absolute { .. })
        {
            return Err(invalid(
                "add-on measures require relative-savings performance units".to_string(),
            ));
        }
        if let (Some(entry), Some(exit)) = (def.market_entry_year, def.market_exit_year) {
            if exit <= entry {
                return Err(invalid(format!(
                    "market exit year {exit} not after entry year {entry}"
                )));
            }
        }
        if let Some(sub_market) = &def.sub_market {
            for (structure_type, fraction) in &sub_market.fractions {
                if !(0.0..=1.0).contains(fraction) {
                    return Err(invalid(format!(
                        "sub-market fraction {fraction} for {structure_type} outside [0, 1]"
                    )));
                }
            }
        }

        let mut rng = StdRng::seed_from_u64(sampling.seed ^ def.id);
        let samples = sampling.distribution_samples;
        let performance = def
            .performance
            .value
            .resolve(&mut rng, samples)
            .map_err(|e| invalid(format!("performance {e}")))?;
        let installed_cost = def
            .installed_cost
            .value
            .resolve(&mut rng, samples)
            .map_err(|e| invalid(format!("installed cost {e}")))?;
        let lifetime = def
            .lifetime
            .resolve(&mut rng, samples)
            .map_err(|e| invalid(format!("lifetime {e}")))?
            .scalar();
        if lifetime <= 0.0 {
            return Err(invalid(format!("non-positive lifetime {lifetime}")));
        }

        Ok(Self {
            id: def.id,
            name: def.name,
            measure_type: def.measure_type,
            scope: def.scope,
            secondary_scope: def.secondary_scope,
            performance,
            performance_units: def.performance.units,
            installed_cost,
            cost_units: def.installed_cost.units,
            lifetime,
            market_entry_year: def.market_entry_year,
            market_exit_year: def.market_exit_year,
            sub_market: def.sub_market,
            fuel_switch_to: def.fuel_switch_to,
            time_sensitive: def.time_sensitive,
            markets: HashMap::new(),
            remove: false,
        })
    }

    /// Whether the measure is on the market in `year`.
    ///
    /// The window is `[entry, exit)`; a missing bound is open on that side.
    pub fn on_market(&self, year: u32) -> bool {
        if let Some(entry) = self.market_entry_year {
            if year < entry {
                return false;
            }
        }
        if let Some(exit) = self.market_exit_year {
            if year >= exit {
                return false;
            }
        }
        true
    }

    /// Sub-market fraction applicable to `structure_type` (1.0 when none).
    pub fn sub_market_fraction(&self, structure_type: StructureType) -> f64 {
        self.sub_market
            .as_ref()
            .map_or(1.0, |s| s.fraction_for(structure_type))
    }

    /// Validates sub-market scaling source metadata.
    ///
    /// Returns one non-fatal warning per invalid field. When every required
    /// field of every source is invalid, appends the CRITICAL warning and
    /// returns `true` so the caller can mark the measure inactive.
    pub fn validate_sub_market_sources(&self, warnings: &mut Vec<PrepWarning>) -> bool {
        let Some(sub_market) = &self.sub_market else {
            return false;
        };
        if sub_market.sources.is_empty() {
            warnings.push(PrepWarning {
                measure: self.name.clone(),
                detail: "sub-market scaling has no sources".to_string(),
                critical: true,
            });
            return true;
        }
        let mut invalid_count = 0usize;
        for (i, source) in sub_market.sources.iter().enumerate() {
            for finding in source.invalid_fields() {
                invalid_count += 1;
                warnings.push(PrepWarning {
                    measure: self.name.clone(),
                    detail: format!("sub-market source {}: {finding}", i + 1),
                    critical: false,
                });
            }
        }
        let all_invalid = invalid_count == sub_market.sources.len() * SourceMeta::FIELD_COUNT;
        if all_invalid {
            warnings.push(PrepWarning {
                measure: self.name.clone(),
                detail: "every sub-market source field is invalid; measure excluded".to_string(),
                critical: true,
            });
        }
        all_invalid
    }
}
