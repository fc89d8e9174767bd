//! Business logic services.

#![allow(missing_docs)]

pub mod aggregation;
pub mod input;
pub mod ledger;
pub mod registry;

pub use aggregation::{AggregationService, PartyTotal, TableOverview};
pub use ledger::{BallotLedgerService, CurrentPage, DetailLine, SubmitTallyInput, TallySubmission};
pub use registry::{
    MarkVoteInput, TableStats, VoterInput, VoterListQuery, VoterPage, VoterRegistryService,
};
