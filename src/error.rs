//! Error taxonomy for measure preparation and packaging.

use thiserror::Error;

/// All failure modes surfaced by the engine.
///
/// Resolution and input-shape errors abort preparation of the affected
/// measure only; the batch driver marks it inactive and moves on. Packaging
/// conflicts are configuration errors and fail fast.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A requested microsegment has no matching baseline or tech record.
    #[error("no {table} record for microsegment `{key}`")]
    MissingKey {
        /// Which table the lookup missed (`"baseline"`, `"tech"`, ...).
        table: &'static str,
        /// Rendered key chain.
        key: String,
    },

    /// A dimension value is not a recognized taxonomy member or is
    /// inconsistent with the rest of its key.
    #[error("invalid {dimension}: {value}")]
    InvalidDimension {
        dimension: &'static str,
        value: String,
    },

    /// Two year-indexed series do not cover the same contiguous horizon.
    #[error("series mismatch: {0}")]
    SeriesMismatch(String),

    /// A conversion table has no entry for the requested fuel/sector pair.
    #[error("no {table} conversion entry for fuel `{fuel}`, sector `{sector}`")]
    MissingConversion {
        table: &'static str,
        fuel: String,
        sector: String,
    },

    /// Two package members carry divergent competed-choice parameters for
    /// the same contributing microsegment key.
    #[error("conflicting competed-choice parameters for `{key}` in package `{package}`")]
    ChoiceParamConflict { package: String, key: String },

    /// A package was requested with no contributing measures, or a named
    /// contributing measure is missing its prepared markets.
    #[error("package `{package}` is not buildable: {reason}")]
    EmptyPackage { package: String, reason: String },

    /// A measure attribute is outside its documented range.
    #[error("measure `{measure}`: {detail}")]
    InvalidMeasure { measure: String, detail: String },
}
