//! The measure-preparation engine: partitioning, aggregation, and the
//! ledgers that carry per-key detail through to competition and reporting.

pub mod aggregate;
pub mod partition;
pub mod secondary;
pub mod types;
