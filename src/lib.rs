//! Stock-and-flow partitioning, market aggregation, and packaging for
//! energy-conservation measures.

pub mod baseline;
pub mod config;
/// Partitioning, aggregation, and the per-key ledger modules.
pub mod engine;
pub mod error;
pub mod io;
pub mod measure;
pub mod package;
pub mod series;
pub mod taxonomy;
