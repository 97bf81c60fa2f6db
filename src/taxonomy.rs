//! Closed market-taxonomy types and the microsegment key.
//!
//! Every taxonomy dimension is a closed enum validated at ingestion rather
//! than a free-form string, so a misspelled climate zone or fuel is a
//! compile-time or parse-time error instead of a silent empty lookup. The
//! technology axis is the one open-ended dimension and stays a validated
//! newtype.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// AIA climate zones 1 through 5.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ClimateZone {
    Cz1,
    Cz2,
    Cz3,
    Cz4,
    Cz5,
}

impl ClimateZone {
    /// All climate zones, in taxonomy order.
    pub const ALL: [ClimateZone; 5] = [
        ClimateZone::Cz1,
        ClimateZone::Cz2,
        ClimateZone::Cz3,
        ClimateZone::Cz4,
        ClimateZone::Cz5,
    ];
}

impl fmt::Display for ClimateZone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ClimateZone::Cz1 => "AIA CZ1",
            ClimateZone::Cz2 => "AIA CZ2",
            ClimateZone::Cz3 => "AIA CZ3",
            ClimateZone::Cz4 => "AIA CZ4",
            ClimateZone::Cz5 => "AIA CZ5",
        };
        f.write_str(s)
    }
}

/// Building sector, derived from the building type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Sector {
    Residential,
    Commercial,
}

impl fmt::Display for Sector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sector::Residential => f.write_str("residential"),
            Sector::Commercial => f.write_str("commercial"),
        }
    }
}

/// Building types covered by the baseline dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BuildingType {
    SingleFamily,
    MultiFamily,
    MobileHome,
    Assembly,
    Education,
    LargeOffice,
    Retail,
}

impl BuildingType {
    /// Sector this building type belongs to.
    pub fn sector(self) -> Sector {
        match self {
            BuildingType::SingleFamily | BuildingType::MultiFamily | BuildingType::MobileHome => {
                Sector::Residential
            }
            BuildingType::Assembly
            | BuildingType::Education
            | BuildingType::LargeOffice
            | BuildingType::Retail => Sector::Commercial,
        }
    }
}

impl fmt::Display for BuildingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BuildingType::SingleFamily => "single family home",
            BuildingType::MultiFamily => "multi family home",
            BuildingType::MobileHome => "mobile home",
            BuildingType::Assembly => "assembly",
            BuildingType::Education => "education",
            BuildingType::LargeOffice => "large office",
            BuildingType::Retail => "retail",
        };
        f.write_str(s)
    }
}

/// Fuels tracked in the baseline conversion tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FuelType {
    Electricity,
    NaturalGas,
    Distillate,
    OtherFuel,
}

impl fmt::Display for FuelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FuelType::Electricity => "electricity",
            FuelType::NaturalGas => "natural gas",
            FuelType::Distillate => "distillate",
            FuelType::OtherFuel => "other fuel",
        };
        f.write_str(s)
    }
}

/// End uses, including the two with a supply/demand split.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EndUse {
    Heating,
    Cooling,
    WaterHeating,
    Lighting,
    Refrigeration,
    Cooking,
    Drying,
    Ventilation,
    Other,
}

impl EndUse {
    /// Whether this end use splits into supply and demand sides.
    ///
    /// Heating and cooling energy is carried on the supply side (equipment)
    /// while envelope components sit on the demand side and alter the load
    /// the supply side must meet.
    pub fn has_demand_side(self) -> bool {
        matches!(self, EndUse::Heating | EndUse::Cooling)
    }

    /// Reporting bucket used by the output breakdown.
    pub fn report_category(self) -> ReportCategory {
        match self {
            EndUse::Heating => ReportCategory::Heating,
            EndUse::Cooling => ReportCategory::Cooling,
            EndUse::WaterHeating => ReportCategory::WaterHeating,
            EndUse::Lighting => ReportCategory::Lighting,
            EndUse::Refrigeration => ReportCategory::Refrigeration,
            EndUse::Cooking | EndUse::Drying | EndUse::Ventilation | EndUse::Other => {
                ReportCategory::Other
            }
        }
    }
}

impl fmt::Display for EndUse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EndUse::Heating => "heating",
            EndUse::Cooling => "cooling",
            EndUse::WaterHeating => "water heating",
            EndUse::Lighting => "lighting",
            EndUse::Refrigeration => "refrigeration",
            EndUse::Cooking => "cooking",
            EndUse::Drying => "drying",
            EndUse::Ventilation => "ventilation",
            EndUse::Other => "other",
        };
        f.write_str(s)
    }
}

/// Coarse end-use buckets for the reporting breakdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ReportCategory {
    Heating,
    Cooling,
    WaterHeating,
    Lighting,
    Refrigeration,
    Other,
}

impl fmt::Display for ReportCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReportCategory::Heating => "heating",
            ReportCategory::Cooling => "cooling",
            ReportCategory::WaterHeating => "water heating",
            ReportCategory::Lighting => "lighting",
            ReportCategory::Refrigeration => "refrigeration",
            ReportCategory::Other => "other",
        };
        f.write_str(s)
    }
}

/// Structure vintage: newly constructed vs. existing stock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum StructureType {
    New,
    Existing,
}

impl StructureType {
    pub const ALL: [StructureType; 2] = [StructureType::New, StructureType::Existing];
}

impl fmt::Display for StructureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StructureType::New => f.write_str("new"),
            StructureType::Existing => f.write_str("existing"),
        }
    }
}

/// Whether a microsegment belongs to a measure's primary market or to a
/// secondary (demand-linked) market it also affects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SegmentType {
    Primary,
    Secondary,
}

impl fmt::Display for SegmentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SegmentType::Primary => f.write_str("primary"),
            SegmentType::Secondary => f.write_str("secondary"),
        }
    }
}

/// Supply or demand side of a heating/cooling end use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Side {
    Supply,
    Demand,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Supply => f.write_str("supply"),
            Side::Demand => f.write_str("demand"),
        }
    }
}

/// Technology identifier.
///
/// The technology axis is open-ended in the baseline dataset (hundreds of
/// entries), so it stays a validated newtype rather than an enum.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Technology(String);

impl Technology {
    /// Creates a technology id, rejecting empty names.
    pub fn new(name: impl Into<String>) -> Result<Self, EngineError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(EngineError::InvalidDimension {
                dimension: "technology",
                value: "<empty>".to_string(),
            });
        }
        Ok(Technology(name))
    }
}

impl fmt::Display for Technology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One fully concrete microsegment key.
///
/// Ordered tuple of every taxonomy dimension; unique within a measure's
/// contributing set and the lookup key for both the baseline stock/energy
/// table and the cost/performance/lifetime table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MsegKey {
    pub seg_type: SegmentType,
    pub climate_zone: ClimateZone,
    pub building_type: BuildingType,
    pub fuel_type: FuelType,
    pub end_use: EndUse,
    /// Supply/demand side; `Some` only for end uses with a demand split.
    pub side: Option<Side>,
    pub technology: Technology,
    pub structure_type: StructureType,
}

impl MsegKey {
    /// Validates internal consistency of the key.
    ///
    /// A side tag is required for heating/cooling keys and forbidden for
    /// every other end use.
    pub fn validate(&self) -> Result<(), EngineError> {
        match (self.end_use.has_demand_side(), self.side) {
            (true, None) => Err(EngineError::InvalidDimension {
                dimension: "side",
                value: format!("{} requires a supply/demand side", self.end_use),
            }),
            (false, Some(side)) => Err(EngineError::InvalidDimension {
                dimension: "side",
                value: format!("{} does not take a {side} side", self.end_use),
            }),
            _ => Ok(()),
        }
    }

    /// Key for the same microsegment on the other segment type.
    pub fn with_seg_type(&self, seg_type: SegmentType) -> MsegKey {
        MsegKey {
            seg_type,
            ..self.clone()
        }
    }
}

impl fmt::Display for MsegKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} | {} | {} | {} | {}",
            self.seg_type, self.climate_zone, self.building_type, self.fuel_type, self.end_use
        )?;
        if let Some(side) = self.side {
            write!(f, " | {side}")?;
        }
        write!(f, " | {} | {}", self.technology, self.structure_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(end_use: EndUse, side: Option<Side>) -> MsegKey {
        MsegKey {
            seg_type: SegmentType::Primary,
            climate_zone: ClimateZone::Cz1,
            building_type: BuildingType::SingleFamily,
            fuel_type: FuelType::NaturalGas,
            end_use,
            side,
            technology: Technology::new("storage water heater").unwrap(),
            structure_type: StructureType::Existing,
        }
    }

    #[test]
    fn sector_mapping() {
        assert_eq!(BuildingType::MobileHome.sector(), Sector::Residential);
        assert_eq!(BuildingType::LargeOffice.sector(), Sector::Commercial);
    }

    #[test]
    fn heating_requires_side() {
        assert!(key(EndUse::Heating, None).validate().is_err());
        assert!(key(EndUse::Heating, Some(Side::Supply)).validate().is_ok());
    }

    #[test]
    fn water_heating_rejects_side() {
        assert!(key(EndUse::WaterHeating, Some(Side::Demand)).validate().is_err());
        assert!(key(EndUse::WaterHeating, None).validate().is_ok());
    }

    #[test]
    fn empty_technology_rejected() {
        assert!(Technology::new("  ").is_err());
    }

    #[test]
    fn key_display_includes_side_when_present() {
        let k = key(EndUse::Cooling, Some(Side::Demand));
        let s = k.to_string();
        assert!(s.contains("demand"));
        assert!(s.contains("AIA CZ1"));
    }
}
