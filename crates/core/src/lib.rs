//! Core business logic for escrutinio.
//!
//! - [`BallotLedgerService`]: versioned tally submissions per polling table
//! - [`VoterRegistryService`]: the voter roll and its single-use vote mark
//! - [`AggregationService`]: read-only totals and per-table overviews

pub mod services;

pub use services::*;
