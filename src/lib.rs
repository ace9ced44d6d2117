//! indicator-engine: computes user-defined technical indicators over stock
//! price history and caches the results in a shared or per-user tier.
//!
//! Hexagonal architecture: domain logic in [`domain`], port traits in [`ports`],
//! concrete implementations in [`adapters`], command-line front end in [`cli`].

pub mod adapters;
pub mod cli;
pub mod domain;
pub mod ports;
