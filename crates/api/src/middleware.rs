//! API middleware.

#![allow(missing_docs)]

use escrutinio_core::{AggregationService, BallotLedgerService, VoterRegistryService};

/// Application state.
#[derive(Clone)]
pub struct AppState {
    pub ledger_service: BallotLedgerService,
    pub registry_service: VoterRegistryService,
    pub aggregation_service: AggregationService,
}
