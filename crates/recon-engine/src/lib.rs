mod engine;
mod types;

pub use engine::match_transactions;
pub use types::{ExceptionRecord, MatchOutcome, MatchRecord};
