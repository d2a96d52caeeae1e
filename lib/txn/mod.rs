/// Deferred cache mutations.
pub mod staging;
/// The per-transaction handle.
pub mod transaction;

pub use staging::{StagedMutation, StagingLog};
pub use transaction::Transaction;
