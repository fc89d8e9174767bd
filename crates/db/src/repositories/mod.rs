//! Database repositories.

pub mod ballot_record;
pub mod voter;

pub use ballot_record::{BallotRecordRepository, BallotRecordSummary, TallyFields};
pub use voter::{VoteMark, VoterFilter, VoterRepository};
