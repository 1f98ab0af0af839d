//! Common code, types and libraries shared by the coordinator crates.

pub mod backoff;
pub mod errors;
pub mod knobs;
mod metrics;
pub mod runtime;
pub mod types;
