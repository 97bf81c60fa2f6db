//! Result export modules.

pub mod export;
