//! Database entities.

pub mod ballot_record;
pub mod voter;

pub use ballot_record::Entity as BallotRecord;
pub use voter::Entity as Voter;
